use crossbeam_channel::{Receiver, Sender};
use std::fmt::{self, Debug};
use tokio::sync::oneshot;

use crate::error::Error;
use crate::params::Params;
use crate::rows::{columns, Column, Row, Rows};
use std::sync::Arc;

pub type Result<T> = std::result::Result<T, Error>;

type CallFn = Box<dyn FnOnce(&mut rusqlite::Connection) + Send + 'static>;

enum Message {
  Run(CallFn),
  Close(oneshot::Sender<std::result::Result<(), rusqlite::Error>>),
}

/// A handle to a SQLite connection owned by a dedicated background thread.
///
/// All reads and writes in this crate go through a single writer thread so that the upserts
/// in `queries.rs` (keyed on unique constraints) are trivially atomic against concurrent callers.
#[derive(Clone)]
pub struct Connection {
  sender: Sender<Message>,
}

impl Connection {
  pub async fn from_conn(conn: rusqlite::Connection) -> Result<Self> {
    start(move || Ok(conn)).await
  }

  pub async fn open_in_memory() -> Result<Self> {
    start(rusqlite::Connection::open_in_memory).await
  }

  pub async fn open<F>(open: F) -> Result<Self>
  where
    F: FnOnce() -> rusqlite::Result<rusqlite::Connection> + Send + 'static,
  {
    start(open).await
  }

  /// Call a function in the background thread and get the result asynchronously.
  pub async fn call<F, R>(&self, function: F) -> Result<R>
  where
    F: FnOnce(&mut rusqlite::Connection) -> Result<R> + 'static + Send,
    R: Send + 'static,
  {
    let (sender, receiver) = oneshot::channel::<Result<R>>();

    self
      .sender
      .send(Message::Run(Box::new(move |conn| {
        let value = function(conn);
        let _ = sender.send(value);
      })))
      .map_err(|_| Error::ConnectionClosed)?;

    receiver.await.map_err(|_| Error::ConnectionClosed)?
  }

  /// Run `function` inside a transaction; commits on `Ok`, rolls back on `Err`.
  ///
  /// Used by the persister (SPEC_FULL §4.5) and the hourly-stats upsert (§4.6): row writes and
  /// the hourly merge must land in the same commit.
  pub async fn with_transaction<F, R>(&self, function: F) -> Result<R>
  where
    F: FnOnce(&rusqlite::Transaction<'_>) -> Result<R> + 'static + Send,
    R: Send + 'static,
  {
    self
      .call(move |conn| {
        let txn = conn.transaction()?;
        let result = function(&txn)?;
        txn.commit()?;
        Ok(result)
      })
      .await
  }

  pub async fn query(&self, sql: &str, params: impl Params + Send + 'static) -> Result<Rows> {
    let sql = sql.to_string();
    self
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        params.bind(&mut stmt)?;
        let rows = stmt.raw_query();
        Ok(Rows::from_rows(rows)?)
      })
      .await
  }

  pub async fn query_row(
    &self,
    sql: &str,
    params: impl Params + Send + 'static,
  ) -> Result<Option<Row>> {
    let sql = sql.to_string();
    self
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        params.bind(&mut stmt)?;
        let mut rows = stmt.raw_query();
        if let Some(row) = rows.next()? {
          return Ok(Some(Row::from_row(row, None)?));
        }
        Ok(None)
      })
      .await
  }

  pub async fn query_value<T: serde::de::DeserializeOwned + Send + 'static>(
    &self,
    sql: &str,
    params: impl Params + Send + 'static,
  ) -> Result<Option<T>> {
    let sql = sql.to_string();
    self
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        params.bind(&mut stmt)?;
        let mut rows = stmt.raw_query();
        if let Some(row) = rows.next()? {
          return Ok(Some(serde_rusqlite::from_row(row)?));
        }
        Ok(None)
      })
      .await
  }

  pub async fn query_values<T: serde::de::DeserializeOwned + Send + 'static>(
    &self,
    sql: &str,
    params: impl Params + Send + 'static,
  ) -> Result<Vec<T>> {
    let sql = sql.to_string();
    self
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        params.bind(&mut stmt)?;
        let mut rows = stmt.raw_query();

        let mut values = vec![];
        while let Some(row) = rows.next()? {
          values.push(serde_rusqlite::from_row(row)?);
        }
        Ok(values)
      })
      .await
  }

  pub async fn execute(&self, sql: &str, params: impl Params + Send + 'static) -> Result<usize> {
    let sql = sql.to_string();
    self
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        params.bind(&mut stmt)?;
        Ok(stmt.raw_execute()?)
      })
      .await
  }

  /// Batch-execute a SQL script (no parameters), returning rows of the last statement.
  pub async fn execute_batch(&self, sql: &str) -> Result<Option<Rows>> {
    let sql = sql.to_string();
    self
      .call(move |conn| {
        let batch = rusqlite::Batch::new(conn, &sql);

        let mut p = batch.peekable();
        while let Some(iter) = p.next() {
          let mut stmt = iter?;

          let mut rows = stmt.raw_query();
          let row = rows.next()?;
          if p.peek().is_none() {
            if let Some(row) = row {
              let cols: Arc<Vec<Column>> = Arc::new(columns(row.as_ref()));

              let mut result = vec![Row::from_row(row, Some(cols.clone()))?];
              while let Some(row) = rows.next()? {
                result.push(Row::from_row(row, Some(cols.clone()))?);
              }
              return Ok(Some(Rows(result, cols)));
            }
            return Ok(None);
          }
        }
        Ok(None)
      })
      .await
  }

  /// Close the connection. Returns `Err(Error::Close(self, ..))` on failure so the caller can
  /// retry; any concurrent `call`s afterwards see `Error::ConnectionClosed`.
  pub async fn close(self) -> Result<()> {
    let (sender, receiver) = oneshot::channel::<std::result::Result<(), rusqlite::Error>>();

    if let Err(crossbeam_channel::SendError(_)) = self.sender.send(Message::Close(sender)) {
      return Ok(());
    }

    let Ok(result) = receiver.await else {
      return Ok(());
    };

    result.map_err(|e| Error::Close(self, e))
  }
}

impl Debug for Connection {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Connection").finish()
  }
}

async fn start<F>(open: F) -> Result<Connection>
where
  F: FnOnce() -> rusqlite::Result<rusqlite::Connection> + Send + 'static,
{
  let (sender, receiver) = crossbeam_channel::unbounded::<Message>();
  let (result_sender, result_receiver) = oneshot::channel();

  std::thread::spawn(move || {
    let conn = match open() {
      Ok(c) => c,
      Err(e) => {
        let _ = result_sender.send(Err(e));
        return;
      }
    };

    if result_sender.send(Ok(())).is_err() {
      return;
    }

    event_loop(conn, receiver);
  });

  result_receiver
    .await
    .expect(BUG_TEXT)
    .map(|_| Connection { sender })
    .map_err(Error::from)
}

fn event_loop(mut conn: rusqlite::Connection, receiver: Receiver<Message>) {
  while let Ok(message) = receiver.recv() {
    match message {
      Message::Run(f) => f(&mut conn),
      Message::Close(s) => {
        match conn.close() {
          Ok(v) => s.send(Ok(v)).expect(BUG_TEXT),
          Err((_conn, e)) => s.send(Err(e)).expect(BUG_TEXT),
        };
        return;
      }
    }
  }
}

const BUG_TEXT: &str = "bug in accesswatch-store, please report";
