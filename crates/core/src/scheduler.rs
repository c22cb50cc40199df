use accesswatch_store::{queries, Connection};
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use cron::Schedule;
use futures_util::future::BoxFuture;
use log::*;
use parking_lot::Mutex;
use std::collections::{hash_map::Entry, HashMap};
use std::future::Future;
use std::str::FromStr;
use std::sync::{
  atomic::{AtomicI32, Ordering},
  Arc,
};

use crate::config::Config;

type CallbackError = Box<dyn std::error::Error + Sync + Send>;
type CallbackFunction = dyn Fn() -> BoxFuture<'static, Result<(), CallbackError>> + Sync + Send;
type LatestCallbackExecution = Option<(DateTime<Utc>, Option<CallbackError>)>;

static TASK_COUNTER: AtomicI32 = AtomicI32::new(1024);

pub trait CallbackResultTrait {
  fn into_result(self) -> Result<(), CallbackError>;
}

impl CallbackResultTrait for () {
  fn into_result(self) -> Result<(), CallbackError> {
    Ok(())
  }
}

impl<T: Into<CallbackError>> CallbackResultTrait for Result<(), T> {
  fn into_result(self) -> Result<(), CallbackError> {
    self.map_err(Into::into)
  }
}

/// One scheduled job: a `cron` spec plus the callback that runs at each firing (SPEC_FULL §4.7).
#[allow(unused)]
pub struct Task {
  pub id: i32,
  pub name: String,
  pub schedule: Schedule,
  pub(crate) callback: Arc<CallbackFunction>,

  handle: Option<tokio::task::AbortHandle>,
  latest: Arc<Mutex<LatestCallbackExecution>>,
}

/// Owns the running tasks; aborts them all on drop.
pub struct TaskRegistry {
  pub(crate) tasks: Mutex<HashMap<i32, Task>>,
}

impl Task {
  fn new(id: i32, name: String, schedule: Schedule, callback: Arc<CallbackFunction>) -> Self {
    Task {
      id,
      name,
      schedule,
      callback,
      handle: None,
      latest: Arc::new(Mutex::new(None)),
    }
  }

  fn start(&mut self) {
    let name = self.name.clone();
    let callback = self.callback.clone();
    let schedule = self.schedule.clone();
    let latest = self.latest.clone();

    let handle = tokio::spawn(async move {
      loop {
        let now = Utc::now();
        let Some(next) = schedule.upcoming(Utc).next() else {
          break;
        };
        let Ok(duration) = (next - now).to_std() else {
          warn!("invalid duration for '{name}': {next:?}");
          continue;
        };

        tokio::time::sleep(duration).await;

        let result = (*callback)().await;
        if let Err(ref err) = result {
          error!("task '{name}' failed: {err}");
        }
        *latest.lock() = Some((Utc::now(), result.err()));
      }

      info!("exited task: '{name}'");
    });

    self.handle = Some(handle.abort_handle());
  }

  fn stop(&mut self) {
    if let Some(ref handle) = self.handle {
      handle.abort();
    }
    self.handle = None;
  }
}

impl Default for TaskRegistry {
  fn default() -> Self {
    Self::new()
  }
}

impl TaskRegistry {
  pub fn new() -> Self {
    TaskRegistry {
      tasks: Mutex::new(HashMap::new()),
    }
  }

  pub fn add_task(
    &self,
    id: Option<i32>,
    name: impl Into<String>,
    schedule: Schedule,
    callback: Box<CallbackFunction>,
  ) -> bool {
    let id = id.unwrap_or_else(|| TASK_COUNTER.fetch_add(1, Ordering::SeqCst));
    match self.tasks.lock().entry(id) {
      Entry::Occupied(_) => false,
      Entry::Vacant(entry) => {
        let task = {
          let mut task = Task::new(id, name.into(), schedule, callback.into());
          task.start();
          task
        };
        entry.insert(task);
        true
      }
    }
  }
}

impl Drop for TaskRegistry {
  fn drop(&mut self) {
    let mut tasks = self.tasks.lock();
    for t in tasks.values_mut() {
      t.stop();
    }
  }
}

pub fn build_callback<O, F, Fut>(f: F) -> Box<CallbackFunction>
where
  F: 'static + Sync + Send + Fn() -> Fut,
  Fut: Sync + Send + Future<Output = O>,
  O: CallbackResultTrait,
{
  let fun = Arc::new(f);
  Box::new(move || {
    let fun = fun.clone();
    Box::pin(async move { fun().await.into_result() })
  })
}

fn day_bounds(date: NaiveDate) -> (i64, i64) {
  let start = date.and_hms_opt(0, 0, 0).expect("valid time").and_utc().timestamp();
  (start, start + 86_400)
}

/// Roll up yesterday's hourly stats into `daily_stats` (SPEC_FULL §4.7).
async fn run_daily_rollup(conn: &Connection) -> accesswatch_store::Result<()> {
  let yesterday = (Utc::now() - ChronoDuration::days(1)).date_naive();
  let (start, end) = day_bounds(yesterday);
  match conn
    .call(move |c| queries::compute_daily_rollup(c, start, end).map_err(Into::into))
    .await?
  {
    Some(daily) => info!("daily rollup for {yesterday}: {} requests", daily.total_requests),
    None => debug!("daily rollup for {yesterday}: nothing to roll up"),
  }
  Ok(())
}

/// Delete `hourly_stats` rows older than the retention window (SPEC_FULL §4.7).
async fn run_retention_sweep(conn: &Connection, retention_days: i64) -> accesswatch_store::Result<()> {
  let cutoff = (Utc::now() - ChronoDuration::days(retention_days)).timestamp();
  let deleted = conn
    .call(move |c| queries::delete_hourly_stats_before(c, cutoff).map_err(Into::into))
    .await?;
  if deleted > 0 {
    info!("retention sweep deleted {deleted} hourly_stats rows older than {cutoff}");
  }
  Ok(())
}

/// Advance `geo_locations.last_hit` in one set-based statement (SPEC_FULL §4.7).
async fn run_location_refresh(conn: &Connection) -> accesswatch_store::Result<()> {
  let updated = conn
    .call(|c| queries::refresh_location_last_hits(c).map_err(Into::into))
    .await?;
  if updated > 0 {
    debug!("location last-hit refresh touched {updated} rows");
  }
  Ok(())
}

fn daily_spec(hour: u32, minute: u32) -> String {
  format!("0 {minute} {hour} * * * *")
}

fn hourly_spec(every_n_hours: u64) -> String {
  format!("0 0 */{every_n_hours} * * * *")
}

/// Build and start the three periodic jobs (SPEC_FULL §4.7). Each job logs and returns on its own
/// timer; a failed run is logged by the registry and retried at the next firing.
pub fn build_task_registry(config: &Config, conn: Connection) -> Result<TaskRegistry, CallbackError> {
  let tasks = TaskRegistry::new();

  let rollup_spec = daily_spec(config.daily_rollup_hour, config.daily_rollup_minute);
  let rollup_conn = conn.clone();
  match Schedule::from_str(&rollup_spec) {
    Ok(schedule) => {
      tasks.add_task(
        None,
        "Daily Rollup",
        schedule,
        build_callback(move || {
          let conn = rollup_conn.clone();
          async move { run_daily_rollup(&conn).await }
        }),
      );
    }
    Err(err) => error!("invalid cron spec for daily rollup '{rollup_spec}': {err}"),
  }

  let retention_days = config.hourly_retention_days;
  let retention_conn = conn.clone();
  match Schedule::from_str(&rollup_spec) {
    Ok(schedule) => {
      tasks.add_task(
        None,
        "Hourly Stats Retention",
        schedule,
        build_callback(move || {
          let conn = retention_conn.clone();
          async move { run_retention_sweep(&conn, retention_days).await }
        }),
      );
    }
    Err(err) => error!("invalid cron spec for retention sweep '{rollup_spec}': {err}"),
  }

  let refresh_spec = hourly_spec(config.location_refresh_interval_hours);
  let refresh_conn = conn.clone();
  match Schedule::from_str(&refresh_spec) {
    Ok(schedule) => {
      tasks.add_task(
        None,
        "Location Last-Hit Refresh",
        schedule,
        build_callback(move || {
          let conn = refresh_conn.clone();
          async move { run_location_refresh(&conn).await }
        }),
      );
    }
    Err(err) => error!("invalid cron spec for location refresh '{refresh_spec}': {err}"),
  }

  Ok(tasks)
}

/// Administrative backfill: recompute the daily rollup for every day in `[from, to]` inclusive
/// (SPEC_FULL §4.7). Returns the number of days that produced a non-empty rollup.
pub async fn backfill(conn: &Connection, from: NaiveDate, to: NaiveDate) -> accesswatch_store::Result<usize> {
  let mut produced = 0;
  let mut day = from;
  while day <= to {
    let (start, end) = day_bounds(day);
    let result = conn
      .call(move |c| queries::compute_daily_rollup(c, start, end).map_err(Into::into))
      .await?;
    if result.is_some() {
      produced += 1;
    }
    day += ChronoDuration::days(1);
  }
  Ok(produced)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn daily_spec_is_a_valid_seven_field_cron_expression() {
    let spec = daily_spec(0, 5);
    assert_eq!(spec, "0 5 0 * * * *");
    Schedule::from_str(&spec).unwrap();
  }

  #[test]
  fn hourly_spec_is_a_valid_seven_field_cron_expression() {
    Schedule::from_str(&hourly_spec(1)).unwrap();
  }

  #[tokio::test]
  async fn scheduled_task_runs_and_records_latest_error() {
    let registry = TaskRegistry::new();
    let (sender, receiver) = tokio::sync::oneshot::channel();
    let sender = std::sync::Arc::new(Mutex::new(Some(sender)));

    let expression = "*    *     *         *            *         *         *";
    registry.add_task(
      None,
      "Test Task",
      Schedule::from_str(expression).unwrap(),
      build_callback(move || {
        let sender = sender.clone();
        async move {
          if let Some(s) = sender.lock().take() {
            let _ = s.send(());
          }
          Err::<(), &'static str>("boom")
        }
      }),
    );

    receiver.await.unwrap();

    let tasks = registry.tasks.lock();
    let first = tasks.keys().next().unwrap();
    let latest = tasks.get(first).unwrap().latest.lock();
    let (_timestamp, err) = latest.as_ref().unwrap();
    assert_eq!(err.as_ref().unwrap().to_string(), "boom");
  }
}
