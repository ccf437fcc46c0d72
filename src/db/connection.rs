use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::query::{QueryMetadata, Row};
use crate::ast::dialect::Dialect;
use crate::error::Result;
use crate::value::Value;

/// Transaction isolation requested at `BEGIN`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum IsolationLevel {
    /// Whatever the server is configured with.
    #[default]
    Default,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    /// SQL spelling, or `None` for the server default.
    pub fn sql(&self) -> Option<&'static str> {
        match self {
            IsolationLevel::Default => None,
            IsolationLevel::ReadCommitted => Some("READ COMMITTED"),
            IsolationLevel::RepeatableRead => Some("REPEATABLE READ"),
            IsolationLevel::Serializable => Some("SERIALIZABLE"),
        }
    }
}

/// One live backend session.
///
/// Implementations issue exactly the command they are asked for; ordering,
/// transaction bookkeeping and retries live in the executor.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Human-readable name used in logs.
    fn label(&self) -> &str;

    /// SQL dialect of the backend, `None` for non-SQL stores.
    fn dialect(&self) -> Option<&'static Dialect>;

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Run a statement, handing rows to `on_row` as they arrive. An error
    /// from `on_row` stops the stream and is returned.
    async fn execute_streaming(
        &self,
        sql: &str,
        params: &[Value],
        on_row: &mut (dyn FnMut(Row) -> Result<()> + Send),
    ) -> Result<QueryMetadata>;

    async fn begin(&self, isolation: IsolationLevel) -> Result<()>;

    async fn commit(&self) -> Result<()>;

    async fn rollback(&self) -> Result<()>;

    async fn savepoint(&self, name: &str) -> Result<()>;

    async fn release_savepoint(&self, name: &str) -> Result<()>;

    async fn rollback_to_savepoint(&self, name: &str) -> Result<()>;
}
