use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::value::Value;

/// Categorized backend failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Syntax errors (SQLSTATE class 42 - syntax_error, etc.)
    Syntax,
    /// Semantic errors (missing table/column, ambiguous reference)
    Semantic,
    /// Execution/runtime errors (division by zero, constraint violation)
    Execution,
    /// Transaction state errors (e.g., transaction aborted)
    Transaction,
    /// Serialization failures and detected deadlocks; safe to retry
    Conflict,
    /// Connection/communication errors
    Connection,
    /// Unknown or unclassified errors
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Syntax => write!(f, "Syntax Error"),
            ErrorCategory::Semantic => write!(f, "Semantic Error"),
            ErrorCategory::Execution => write!(f, "Execution Error"),
            ErrorCategory::Transaction => write!(f, "Transaction Error"),
            ErrorCategory::Conflict => write!(f, "Conflict"),
            ErrorCategory::Connection => write!(f, "Connection Error"),
            ErrorCategory::Unknown => write!(f, "Error"),
        }
    }
}

/// Structured error reported by a backend.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{category}: {message}")]
pub struct BackendError {
    /// Which backend produced it ("postgres", "mysql", ...)
    pub backend: &'static str,
    pub category: ErrorCategory,
    /// Severity as reported (ERROR, FATAL, etc.)
    pub severity: String,
    /// SQLSTATE or vendor error code; empty when the failure never reached the server
    pub code: String,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
    /// Character position in the statement (1-based byte offset)
    pub position: Option<u32>,
    /// Computed line number (1-based) from position, if available
    pub line: Option<usize>,
    /// Computed column number (1-based) from position, if available
    pub col: Option<usize>,
}

impl BackendError {
    /// Create a BackendError from a tokio_postgres error, using the statement
    /// text to compute line/column from the byte position.
    pub fn from_pg_error(err: &tokio_postgres::Error, query: &str) -> Self {
        if let Some(db_err) = err.as_db_error() {
            let code = db_err.code().code().to_string();
            let position = db_err.position().and_then(|p| match p {
                tokio_postgres::error::ErrorPosition::Original(pos) => Some(*pos),
                tokio_postgres::error::ErrorPosition::Internal { .. } => None,
            });
            let (line, col) = match position {
                Some(pos) => byte_offset_to_line_col(query, pos as usize),
                None => (None, None),
            };

            BackendError {
                backend: "postgres",
                category: categorize_sqlstate(&code),
                severity: db_err.severity().to_string(),
                code,
                message: db_err.message().to_string(),
                detail: db_err.detail().map(|s| s.to_string()),
                hint: db_err.hint().map(|s| s.to_string()),
                position,
                line,
                col,
            }
        } else {
            // Non-database error (connection, protocol, etc.)
            let category = if err.is_closed() || err.source().is_some() {
                ErrorCategory::Connection
            } else {
                ErrorCategory::Unknown
            };
            BackendError {
                category,
                detail: err.source().map(|e| e.to_string()),
                ..Self::from_string("postgres", err.to_string())
            }
        }
    }

    /// Error carrying a SQLSTATE code, classified by its class.
    pub fn from_sqlstate(backend: &'static str, code: &str, message: impl Into<String>) -> Self {
        BackendError {
            category: categorize_sqlstate(code),
            code: code.to_string(),
            ..Self::from_string(backend, message)
        }
    }

    /// Error carrying a MySQL server error number.
    pub fn from_mysql_code(code: u16, message: impl Into<String>) -> Self {
        BackendError {
            category: categorize_mysql(code),
            code: code.to_string(),
            ..Self::from_string("mysql", message)
        }
    }

    /// Create a simple error from a plain string (for non-database errors).
    pub fn from_string(backend: &'static str, message: impl Into<String>) -> Self {
        BackendError {
            backend,
            category: ErrorCategory::Unknown,
            severity: "ERROR".to_string(),
            code: String::new(),
            message: message.into(),
            detail: None,
            hint: None,
            position: None,
            line: None,
            col: None,
        }
    }

    pub fn connection(backend: &'static str, message: impl Into<String>) -> Self {
        BackendError {
            category: ErrorCategory::Connection,
            ..Self::from_string(backend, message)
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.category == ErrorCategory::Conflict
    }

    /// Format as a rich multi-line string.
    pub fn display_full(&self) -> String {
        let mut lines = vec![format!("{}: {}", self.category, self.message)];

        if let (Some(line), Some(col)) = (self.line, self.col) {
            lines.push(format!("  at line {}, column {}", line, col));
        }
        if !self.code.is_empty() {
            lines.push(format!("  {} code: {}", self.backend, self.code));
        }
        if let Some(detail) = &self.detail {
            lines.push(format!("  Detail: {}", detail));
        }
        if let Some(hint) = &self.hint {
            lines.push(format!("  Hint: {}", hint));
        }

        lines.join("\n")
    }
}

/// Convert a 1-based byte offset in a query string to (line, column) both 1-based.
fn byte_offset_to_line_col(query: &str, byte_pos: usize) -> (Option<usize>, Option<usize>) {
    if byte_pos == 0 || query.is_empty() {
        return (Some(1), Some(1));
    }
    let target = (byte_pos - 1).min(query.len()); // PostgreSQL positions are 1-based
    let mut line = 1usize;
    let mut col = 1usize;
    for (i, ch) in query.char_indices() {
        if i >= target {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (Some(line), Some(col))
}

/// Categorize a SQLSTATE code into an ErrorCategory.
pub fn categorize_sqlstate(code: &str) -> ErrorCategory {
    match code {
        // serialization_failure, deadlock_detected
        "40001" | "40P01" => return ErrorCategory::Conflict,
        _ => {}
    }
    let Some(class) = code.get(..2) else {
        return ErrorCategory::Unknown;
    };
    match class {
        // Class 42: Syntax Error or Access Rule Violation
        "42" => {
            if code == "42601" || code == "42000" {
                ErrorCategory::Syntax
            } else {
                // 42P01 = undefined_table, 42703 = undefined_column, etc.
                ErrorCategory::Semantic
            }
        }
        // Class 22: Data Exception, Class 23: Integrity Constraint Violation
        "22" | "23" => ErrorCategory::Execution,
        // Class 25: Invalid Transaction State, Class 40: Transaction Rollback
        "25" | "40" => ErrorCategory::Transaction,
        // Class 08: Connection Exception
        "08" => ErrorCategory::Connection,
        // Resources, limits, prerequisite state, operator intervention
        "53" | "54" | "55" | "57" => ErrorCategory::Execution,
        _ => ErrorCategory::Unknown,
    }
}

/// Categorize a MySQL server error number.
pub fn categorize_mysql(code: u16) -> ErrorCategory {
    match code {
        // ER_LOCK_DEADLOCK, ER_LOCK_WAIT_TIMEOUT
        1213 | 1205 => ErrorCategory::Conflict,
        // ER_PARSE_ERROR
        1064 => ErrorCategory::Syntax,
        // unknown table / column / database
        1146 | 1054 | 1049 => ErrorCategory::Semantic,
        // duplicate entry, foreign key failures, data too long, division by 0
        1062 | 1451 | 1452 | 1406 | 1365 => ErrorCategory::Execution,
        // server gone away, lost connection
        2006 | 2013 => ErrorCategory::Connection,
        _ => ErrorCategory::Unknown,
    }
}

/// One decoded result row. Column names are shared across the rows of one
/// result.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        let idx = self.columns.iter().position(|c| c == name)?;
        self.values.get(idx)
    }

    pub fn get_index(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    /// Checked typed read of a named column.
    pub fn try_get<T>(&self, name: &str) -> Result<T>
    where
        T: TryFrom<Value, Error = Error>,
    {
        let value = self
            .get(name)
            .ok_or_else(|| Error::invalid_expression(format!("no column named {name:?}")))?;
        T::try_from(value.clone())
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

/// Summary of a streamed statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryMetadata {
    pub columns: Vec<String>,
    pub row_count: usize,
    pub affected_rows: Option<u64>,
    pub execution_time: Duration,
}

/// Decode a tokio_postgres row through the PostgreSQL value codec.
pub(crate) fn decode_pg_row(row: &tokio_postgres::Row, columns: &mut Option<Arc<[String]>>) -> Result<Row> {
    let names = match columns {
        Some(names) if names.len() == row.len() => Arc::clone(names),
        _ => {
            let names: Arc<[String]> = row.columns().iter().map(|c| c.name().to_string()).collect();
            *columns = Some(Arc::clone(&names));
            names
        }
    };

    let mut values = Vec::with_capacity(row.len());
    for idx in 0..row.len() {
        let value = row.try_get::<_, Value>(idx).map_err(unwrap_codec_error)?;
        values.push(value);
    }
    Ok(Row::new(names, values))
}

// Codec failures travel through tokio_postgres boxed; recover the typed error.
fn unwrap_codec_error(err: tokio_postgres::Error) -> Error {
    let display = err.to_string();
    match err.into_source().map(|source| source.downcast::<Error>()) {
        Some(Ok(inner)) => *inner,
        Some(Err(other)) => Error::Codec(other.to_string()),
        None => Error::Codec(display),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category_display() {
        assert_eq!(ErrorCategory::Syntax.to_string(), "Syntax Error");
        assert_eq!(ErrorCategory::Conflict.to_string(), "Conflict");
        assert_eq!(ErrorCategory::Unknown.to_string(), "Error");
    }

    #[test]
    fn test_backend_error_from_string() {
        let err = BackendError::from_string("redis", "test error");
        assert_eq!(err.category, ErrorCategory::Unknown);
        assert_eq!(err.message, "test error");
        assert_eq!(err.backend, "redis");
        assert!(err.detail.is_none());
        assert!(err.position.is_none());
    }

    #[test]
    fn test_backend_error_display_full() {
        let err = BackendError {
            position: Some(45),
            hint: Some("Remove trailing comma.".to_string()),
            line: Some(3),
            col: Some(1),
            ..BackendError::from_sqlstate("postgres", "42601", "syntax error at or near \",\"")
        };
        let full = err.display_full();
        assert!(full.contains("Syntax Error"));
        assert!(full.contains("at line 3, column 1"));
        assert!(full.contains("42601"));
        assert!(full.contains("Remove trailing comma"));
    }

    #[test]
    fn test_byte_offset_to_line_col() {
        let query = "SELECT *\nFROM users\nWHERE id = 1";
        assert_eq!(byte_offset_to_line_col(query, 1), (Some(1), Some(1)));
        assert_eq!(byte_offset_to_line_col(query, 10), (Some(2), Some(1)));
        assert_eq!(byte_offset_to_line_col(query, 21), (Some(3), Some(1)));
    }

    #[test]
    fn test_categorize_sqlstate() {
        assert_eq!(categorize_sqlstate("42601"), ErrorCategory::Syntax);
        assert_eq!(categorize_sqlstate("42P01"), ErrorCategory::Semantic);
        assert_eq!(categorize_sqlstate("23505"), ErrorCategory::Execution);
        assert_eq!(categorize_sqlstate("25001"), ErrorCategory::Transaction);
        assert_eq!(categorize_sqlstate("40001"), ErrorCategory::Conflict);
        assert_eq!(categorize_sqlstate("40P01"), ErrorCategory::Conflict);
        assert_eq!(categorize_sqlstate("40002"), ErrorCategory::Transaction);
        assert_eq!(categorize_sqlstate("08006"), ErrorCategory::Connection);
        assert_eq!(categorize_sqlstate("XX000"), ErrorCategory::Unknown);
        assert_eq!(categorize_sqlstate(""), ErrorCategory::Unknown);
        // class boundary inside a multibyte character
        assert_eq!(categorize_sqlstate("é1"), ErrorCategory::Unknown);
        assert_eq!(categorize_sqlstate("4"), ErrorCategory::Unknown);
    }

    #[test]
    fn test_categorize_mysql() {
        assert_eq!(categorize_mysql(1213), ErrorCategory::Conflict);
        assert_eq!(categorize_mysql(1205), ErrorCategory::Conflict);
        assert_eq!(categorize_mysql(1062), ErrorCategory::Execution);
        assert!(BackendError::from_mysql_code(1213, "Deadlock found").is_conflict());
    }

    #[test]
    fn test_row_access() {
        let columns: Arc<[String]> = vec!["id".to_string(), "name".to_string()].into();
        let row = Row::new(columns, vec![Value::Int64(7), Value::String("ada".into())]);
        assert_eq!(row.get("name"), Some(&Value::String("ada".into())));
        assert_eq!(row.get_index(0), Some(&Value::Int64(7)));
        assert_eq!(row.try_get::<i32>("id").unwrap(), 7);
        assert!(matches!(row.try_get::<i64>("missing"), Err(Error::InvalidExpression(_))));
        assert!(matches!(row.try_get::<bool>("id"), Err(Error::UnsupportedType { .. })));
    }
}
