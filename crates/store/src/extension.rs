use std::path::Path;

/// Open (or create) the SQLite database at `path` and apply the pragma set this crate relies on
/// for a single-writer, WAL-mode workload, then run the bootstrap schema.
pub fn connect_sqlite(path: impl AsRef<Path>) -> rusqlite::Result<rusqlite::Connection> {
  use rusqlite::OpenFlags;
  let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
    | OpenFlags::SQLITE_OPEN_CREATE
    | OpenFlags::SQLITE_OPEN_NO_MUTEX;

  let conn = rusqlite::Connection::open_with_flags(path, flags)?;
  configure(&conn)?;
  Ok(conn)
}

pub fn connect_sqlite_in_memory() -> rusqlite::Result<rusqlite::Connection> {
  let conn = rusqlite::Connection::open_in_memory()?;
  configure(&conn)?;
  Ok(conn)
}

fn configure(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
  conn.busy_timeout(std::time::Duration::from_secs(10))?;

  const PRAGMAS: &[&str] = &[
    "PRAGMA busy_timeout       = 10000",
    "PRAGMA journal_mode       = WAL",
    "PRAGMA journal_size_limit = 200000000",
    "PRAGMA synchronous        = NORMAL",
    "PRAGMA foreign_keys       = ON",
    "PRAGMA temp_store         = MEMORY",
    "PRAGMA cache_size         = -16000",
  ];

  for pragma in PRAGMAS {
    let mut stmt = conn.prepare(pragma)?;
    let mut rows = stmt.query([])?;
    rows.next()?;
  }

  crate::schema::bootstrap(conn)?;

  Ok(())
}
