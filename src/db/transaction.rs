//! Transactional executor.
//!
//! ```text
//!          begin()                 savepoint()
//!  Idle ────────────► depth 0 ─────────────────► depth 1 ... N
//!   ▲                  │   ▲                         │
//!   │ commit/rollback  │   └── release / rollback to ┘
//!   └──────────────────┘
//! ```
//!
//! One executor drives one connection. Two locks keep its commands in order:
//!
//! - the **session** lock is held for a whole logical operation (a root
//!   transaction or a standalone statement), so callers queue FIFO;
//! - the **lane** lock is held for a single round trip, so statements a
//!   transaction body issues concurrently still reach the connection one
//!   at a time.
//!
//! Every round trip runs in a spawned task that owns the lane guard; a
//! caller that stops polling cannot leave a command half sent. A root
//! transaction dropped while open spawns its own rollback, and that task
//! keeps the session lock until the rollback is done.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};
use tracing::{debug, info_span, trace, warn, Instrument, Span};

use super::connection::{Connection, IsolationLevel};
use super::query::{BackendError, QueryMetadata, Row};
use crate::ast::builder::RenderedStatement;
use crate::error::{Error, Result};
use crate::value::Value;

tokio::task_local! {
    // executors whose session the current call path holds
    static HELD_SESSIONS: Vec<u64>;
}

static NEXT_EXECUTOR_ID: AtomicU64 = AtomicU64::new(1);

const SAVEPOINT_PREFIX: &str = "dbkit_sp_";

/// Whether a failed root transaction is run again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    #[default]
    Never,
    /// Retry serialization failures and deadlocks, up to `max_attempts`
    /// attempts in total (unbounded when `None`).
    OnConflict { max_attempts: Option<u32> },
}

impl RetryPolicy {
    fn allows_retry(&self, attempts: u32) -> bool {
        match self {
            RetryPolicy::Never => false,
            RetryPolicy::OnConflict { max_attempts: None } => true,
            RetryPolicy::OnConflict {
                max_attempts: Some(max),
            } => attempts < *max,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransactionOptions {
    pub isolation: IsolationLevel,
    pub retry: RetryPolicy,
}

impl TransactionOptions {
    pub fn retry_on_conflict(mut self) -> Self {
        self.retry = RetryPolicy::OnConflict { max_attempts: None };
        self
    }

    pub fn isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }
}

/// One command sent to the connection.
#[derive(Debug)]
enum Op {
    Execute { sql: String, params: Vec<Value> },
    Begin(IsolationLevel),
    Commit,
    Rollback,
    Savepoint(String),
    Release(String),
    RollbackTo(String),
}

impl Op {
    fn name(&self) -> &'static str {
        match self {
            Op::Execute { .. } => "execute",
            Op::Begin(_) => "begin",
            Op::Commit => "commit",
            Op::Rollback => "rollback",
            Op::Savepoint(_) => "savepoint",
            Op::Release(_) => "release savepoint",
            Op::RollbackTo(_) => "rollback to savepoint",
        }
    }

    async fn apply<C: Connection>(self, connection: &C) -> Result<Vec<Row>> {
        match self {
            Op::Execute { sql, params } => connection.execute(&sql, &params).await,
            Op::Begin(isolation) => connection.begin(isolation).await.map(|_| Vec::new()),
            Op::Commit => connection.commit().await.map(|_| Vec::new()),
            Op::Rollback => connection.rollback().await.map(|_| Vec::new()),
            Op::Savepoint(name) => connection.savepoint(&name).await.map(|_| Vec::new()),
            Op::Release(name) => connection.release_savepoint(&name).await.map(|_| Vec::new()),
            Op::RollbackTo(name) => connection.rollback_to_savepoint(&name).await.map(|_| Vec::new()),
        }
    }
}

fn task_failed(err: tokio::task::JoinError) -> Error {
    BackendError::connection("executor", format!("connection task failed: {err}")).into()
}

/// Serialized access to one connection.
pub struct Executor<C: Connection> {
    connection: Arc<C>,
    session: Arc<Mutex<()>>,
    lane: Arc<Mutex<()>>,
    id: u64,
    span: Span,
}

impl<C: Connection> Clone for Executor<C> {
    fn clone(&self) -> Self {
        Self {
            connection: Arc::clone(&self.connection),
            session: Arc::clone(&self.session),
            lane: Arc::clone(&self.lane),
            id: self.id,
            span: self.span.clone(),
        }
    }
}

impl<C: Connection> Executor<C> {
    /// Executor logging under a span named after the connection.
    pub fn new(connection: C) -> Self {
        let span = info_span!("executor", connection = %connection.label());
        Self::with_span(connection, span)
    }

    pub fn with_span(connection: C, span: Span) -> Self {
        Self {
            connection: Arc::new(connection),
            session: Arc::new(Mutex::new(())),
            lane: Arc::new(Mutex::new(())),
            id: NEXT_EXECUTOR_ID.fetch_add(1, Ordering::Relaxed),
            span,
        }
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    fn held_by_caller(&self) -> bool {
        HELD_SESSIONS
            .try_with(|held| held.contains(&self.id))
            .unwrap_or(false)
    }

    async fn acquire_session(&self) -> Result<OwnedMutexGuard<()>> {
        if self.held_by_caller() {
            return Err(Error::TransactionDeadlock);
        }
        Ok(Arc::clone(&self.session).lock_owned().await)
    }

    fn held_with_self(&self) -> Vec<u64> {
        let mut held = HELD_SESSIONS.try_with(Clone::clone).unwrap_or_default();
        held.push(self.id);
        held
    }

    /// One command, run to completion on its own task.
    async fn round_trip(&self, op: Op) -> Result<Vec<Row>> {
        let lane = Arc::clone(&self.lane).lock_owned().await;
        let connection = Arc::clone(&self.connection);
        debug!(op = op.name(), "round trip");
        let task = tokio::spawn(
            async move {
                let result = op.apply(connection.as_ref()).await;
                drop(lane);
                result
            }
            .instrument(self.span.clone()),
        );
        task.await.map_err(task_failed)?
    }

    async fn stream_rows(
        &self,
        sql: String,
        params: Vec<Value>,
        on_row: &mut (dyn FnMut(Row) -> Result<()> + Send),
    ) -> Result<QueryMetadata> {
        let lane = Arc::clone(&self.lane).lock_owned().await;
        let connection = Arc::clone(&self.connection);
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let task = tokio::spawn(
            async move {
                let mut forward = move |row: Row| {
                    sender.send(row).map_err(|_| {
                        Error::from(BackendError::connection("executor", "row consumer stopped"))
                    })
                };
                let result = connection.execute_streaming(&sql, &params, &mut forward).await;
                drop(lane);
                result
            }
            .instrument(self.span.clone()),
        );

        let mut consumer_error = None;
        while let Some(row) = receiver.recv().await {
            if let Err(err) = on_row(row) {
                consumer_error = Some(err);
                break;
            }
        }
        drop(receiver);

        let metadata = task.await.map_err(task_failed)?;
        match consumer_error {
            Some(err) => Err(err),
            None => metadata,
        }
    }

    /// Standalone statement, queued behind any running transaction.
    pub async fn execute(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let _session = self.acquire_session().await?;
        self.round_trip(Op::Execute {
            sql: sql.to_string(),
            params: params.to_vec(),
        })
        .await
    }

    pub async fn run(&self, statement: &RenderedStatement) -> Result<Vec<Row>> {
        self.check_dialect(statement)?;
        trace!(parent: &self.span, sql = %statement.inline(), "run");
        self.execute(&statement.sql, &statement.binds).await
    }

    /// First row of the result; `ObjectNotFound` when there is none.
    pub async fn fetch_one(&self, sql: &str, params: &[Value]) -> Result<Row> {
        self.execute(sql, params)
            .await?
            .into_iter()
            .next()
            .ok_or(Error::ObjectNotFound)
    }

    pub async fn execute_streaming(
        &self,
        sql: &str,
        params: &[Value],
        mut on_row: impl FnMut(Row) -> Result<()> + Send,
    ) -> Result<QueryMetadata> {
        let _session = self.acquire_session().await?;
        self.stream_rows(sql.to_string(), params.to_vec(), &mut on_row).await
    }

    fn check_dialect(&self, statement: &RenderedStatement) -> Result<()> {
        match self.connection.dialect() {
            Some(dialect) if dialect.name != statement.dialect.name => Err(Error::invalid_expression(format!(
                "{} statement sent to a {} connection",
                statement.dialect.name, dialect.name
            ))),
            _ => Ok(()),
        }
    }

    /// Run `body` in a root transaction.
    ///
    /// The body gets a [`Transaction`] handle; `Ok` commits, `Err` rolls
    /// back and is returned. With a retrying policy, conflicts from the
    /// body or the commit roll back and run the body again from the start.
    pub async fn transaction<T, F>(&self, options: TransactionOptions, mut body: F) -> Result<T>
    where
        F: for<'t> FnMut(&'t Transaction<'t, C>) -> BoxFuture<'t, Result<T>> + Send,
        T: Send,
    {
        let session = self.acquire_session().await?;
        let mut open = OpenTransaction {
            connection: Arc::clone(&self.connection),
            lane: Arc::clone(&self.lane),
            session: Some(session),
            in_progress: false,
        };
        let held = self.held_with_self();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            // marked first: a caller dropped while BEGIN is in flight must roll back
            open.in_progress = true;
            if let Err(err) = self.round_trip(Op::Begin(options.isolation)).await {
                open.in_progress = false;
                return Err(err);
            }
            debug!(parent: &self.span, attempts, "transaction started");

            let tx = Transaction {
                executor: self,
                depth: 0,
            };
            let outcome = HELD_SESSIONS.scope(held.clone(), body(&tx)).await;
            let failure = match outcome {
                Ok(value) => match self.round_trip(Op::Commit).await {
                    Ok(_) => {
                        open.in_progress = false;
                        debug!(parent: &self.span, attempts, "transaction committed");
                        return Ok(value);
                    }
                    Err(err) => err,
                },
                Err(err) => err,
            };

            if let Err(rollback) = self.round_trip(Op::Rollback).await {
                warn!(parent: &self.span, error = %rollback, "rollback failed");
                open.in_progress = false;
                return Err(Error::RollbackFailed {
                    rollback: Box::new(rollback),
                    original: Box::new(failure),
                });
            }
            open.in_progress = false;

            if failure.is_conflict() && options.retry.allows_retry(attempts) {
                warn!(parent: &self.span, attempts, error = %failure, "conflict, retrying transaction");
                continue;
            }
            return Err(failure);
        }
    }
}

/// Holds the session for a root transaction. Dropped while the transaction
/// is still open (the caller stopped polling), it rolls back on a spawned
/// task that keeps the session until the rollback finishes.
struct OpenTransaction<C: Connection> {
    connection: Arc<C>,
    lane: Arc<Mutex<()>>,
    session: Option<OwnedMutexGuard<()>>,
    in_progress: bool,
}

impl<C: Connection> Drop for OpenTransaction<C> {
    fn drop(&mut self) {
        if !self.in_progress {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let connection = Arc::clone(&self.connection);
        let lane = Arc::clone(&self.lane);
        let session = self.session.take();
        runtime.spawn(async move {
            let _lane = lane.lock_owned().await;
            if let Err(err) = connection.rollback().await {
                warn!(connection = %connection.label(), error = %err, "rollback of abandoned transaction failed");
            }
            drop(session);
        });
    }
}

/// Handle to an open transaction frame. Depth 0 is the root; deeper frames
/// are savepoints.
pub struct Transaction<'e, C: Connection> {
    executor: &'e Executor<C>,
    depth: u32,
}

impl<'e, C: Connection> Transaction<'e, C> {
    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub async fn execute(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.executor
            .round_trip(Op::Execute {
                sql: sql.to_string(),
                params: params.to_vec(),
            })
            .await
    }

    pub async fn run(&self, statement: &RenderedStatement) -> Result<Vec<Row>> {
        self.executor.check_dialect(statement)?;
        trace!(parent: &self.executor.span, depth = self.depth, sql = %statement.inline(), "run");
        self.execute(&statement.sql, &statement.binds).await
    }

    pub async fn fetch_one(&self, sql: &str, params: &[Value]) -> Result<Row> {
        self.execute(sql, params)
            .await?
            .into_iter()
            .next()
            .ok_or(Error::ObjectNotFound)
    }

    pub async fn execute_streaming(
        &self,
        sql: &str,
        params: &[Value],
        mut on_row: impl FnMut(Row) -> Result<()> + Send,
    ) -> Result<QueryMetadata> {
        self.executor
            .stream_rows(sql.to_string(), params.to_vec(), &mut on_row)
            .await
    }

    /// Run `body` in a nested frame backed by a savepoint. Nested frames
    /// never retry; a conflict propagates to the root.
    pub async fn transaction<T, F>(&self, body: F) -> Result<T>
    where
        F: for<'c> FnOnce(&'c Transaction<'c, C>) -> BoxFuture<'c, Result<T>> + Send,
        T: Send,
    {
        let depth = self.depth + 1;
        let name = format!("{SAVEPOINT_PREFIX}{depth}");
        self.executor.round_trip(Op::Savepoint(name.clone())).await?;
        debug!(parent: &self.executor.span, depth, "savepoint created");

        let child = Transaction {
            executor: self.executor,
            depth,
        };
        match body(&child).await {
            Ok(value) => {
                self.executor.round_trip(Op::Release(name)).await?;
                Ok(value)
            }
            Err(original) => match self.executor.round_trip(Op::RollbackTo(name)).await {
                Ok(_) => Err(original),
                Err(rollback) => Err(Error::RollbackFailed {
                    rollback: Box::new(rollback),
                    original: Box::new(original),
                }),
            },
        }
    }
}
