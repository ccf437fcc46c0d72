//! In-memory [`Connection`] for executor tests.
//!
//! Commands are words, not SQL:
//!
//! - `SET k` stores `params[0]` under `k`
//! - `GET k` returns one `value` row, or none
//! - `PUSH k` appends `params[0]` to the list under `k`
//! - `SCAN k` returns one row per list element
//! - `FAIL code` fails with that SQLSTATE
//!
//! Anything else succeeds with no rows.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::connection::{Connection, IsolationLevel};
use super::query::{BackendError, QueryMetadata, Row};
use crate::ast::dialect::{Dialect, SQLITE};
use crate::error::{Error, Result};
use crate::value::Value;

const BACKEND: &str = "memory";

/// Route executor logs to the test harness. Safe to call from every test.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

#[derive(Default)]
struct State {
    data: BTreeMap<String, Value>,
    // data as of BEGIN
    snapshot: Option<BTreeMap<String, Value>>,
    savepoints: Vec<(String, BTreeMap<String, Value>)>,
    log: Vec<String>,
    commit_failures: u32,
    commit_error: Option<fn() -> Error>,
    fail_rollbacks: bool,
}

pub(crate) struct MemoryConnection {
    state: Mutex<State>,
    latency: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MemoryConnection {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            latency: None,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Every command sleeps for `latency` before it completes.
    pub(crate) fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::new()
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Value visible outside any open transaction.
    pub(crate) fn committed(&self, key: &str) -> Option<Value> {
        let state = self.state();
        let data = state.snapshot.as_ref().unwrap_or(&state.data);
        data.get(key).cloned()
    }

    pub(crate) fn log(&self) -> Vec<String> {
        self.state().log.clone()
    }

    pub(crate) fn count(&self, entry: &str) -> usize {
        self.state().log.iter().filter(|e| *e == entry).count()
    }

    pub(crate) fn fail_next_commits(&self, count: u32, error: fn() -> Error) {
        let mut state = self.state();
        state.commit_failures = count;
        state.commit_error = Some(error);
    }

    pub(crate) fn fail_rollbacks(&self, fail: bool) {
        self.state().fail_rollbacks = fail;
    }

    /// Most commands ever running at once.
    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn command<T>(&self, entry: String, apply: impl FnOnce(&mut State) -> Result<T>) -> Result<T> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let result = {
            let mut state = self.state();
            state.log.push(entry);
            apply(&mut state)
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

fn value_row(value: Value) -> Row {
    Row::new(Arc::from(vec!["value".to_string()]), vec![value])
}

fn run(state: &mut State, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
    let (verb, arg) = sql.split_once(' ').unwrap_or((sql, ""));
    let first = || params.first().cloned().unwrap_or(Value::Null);
    match verb {
        "SET" => {
            state.data.insert(arg.to_string(), first());
            Ok(Vec::new())
        }
        "GET" => Ok(state.data.get(arg).cloned().map(value_row).into_iter().collect()),
        "PUSH" => {
            let entry = state
                .data
                .entry(arg.to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            if let Value::Array(items) = entry {
                items.push(first());
            }
            Ok(Vec::new())
        }
        "SCAN" => match state.data.get(arg) {
            Some(Value::Array(items)) => Ok(items.iter().cloned().map(value_row).collect()),
            _ => Ok(Vec::new()),
        },
        "FAIL" => Err(BackendError::from_sqlstate(BACKEND, arg, "requested failure").into()),
        _ => Ok(Vec::new()),
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn label(&self) -> &str {
        "memory"
    }

    fn dialect(&self) -> Option<&'static Dialect> {
        Some(&SQLITE)
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.command(format!("exec {sql}"), |state| run(state, sql, params))
            .await
    }

    async fn execute_streaming(
        &self,
        sql: &str,
        params: &[Value],
        on_row: &mut (dyn FnMut(Row) -> Result<()> + Send),
    ) -> Result<QueryMetadata> {
        let started = Instant::now();
        let rows = self.execute(sql, params).await?;
        let mut metadata = QueryMetadata {
            columns: rows.first().map(|r| r.columns().to_vec()).unwrap_or_default(),
            ..QueryMetadata::default()
        };
        for row in rows {
            on_row(row)?;
            metadata.row_count += 1;
        }
        metadata.execution_time = started.elapsed();
        Ok(metadata)
    }

    async fn begin(&self, _isolation: IsolationLevel) -> Result<()> {
        self.command("begin".to_string(), |state| {
            state.snapshot = Some(state.data.clone());
            Ok(())
        })
        .await
    }

    async fn commit(&self) -> Result<()> {
        self.command("commit".to_string(), |state| {
            if state.commit_failures > 0 {
                state.commit_failures -= 1;
                if let Some(error) = state.commit_error {
                    return Err(error());
                }
            }
            state.snapshot = None;
            state.savepoints.clear();
            Ok(())
        })
        .await
    }

    async fn rollback(&self) -> Result<()> {
        self.command("rollback".to_string(), |state| {
            if state.fail_rollbacks {
                return Err(BackendError::from_sqlstate(BACKEND, "08006", "connection lost during rollback").into());
            }
            if let Some(snapshot) = state.snapshot.take() {
                state.data = snapshot;
            }
            state.savepoints.clear();
            Ok(())
        })
        .await
    }

    async fn savepoint(&self, name: &str) -> Result<()> {
        self.command(format!("savepoint {name}"), |state| {
            let data = state.data.clone();
            state.savepoints.push((name.to_string(), data));
            Ok(())
        })
        .await
    }

    async fn release_savepoint(&self, name: &str) -> Result<()> {
        self.command(format!("release {name}"), |state| {
            let idx = savepoint_index(state, name)?;
            state.savepoints.truncate(idx);
            Ok(())
        })
        .await
    }

    async fn rollback_to_savepoint(&self, name: &str) -> Result<()> {
        self.command(format!("rollback to {name}"), |state| {
            let idx = savepoint_index(state, name)?;
            state.savepoints.truncate(idx + 1);
            state.data = state.savepoints[idx].1.clone();
            Ok(())
        })
        .await
    }
}

fn savepoint_index(state: &State, name: &str) -> Result<usize> {
    state
        .savepoints
        .iter()
        .rposition(|(n, _)| n == name)
        .ok_or_else(|| BackendError::from_sqlstate(BACKEND, "3B001", format!("savepoint {name} does not exist")).into())
}
