/// Predicate AST and the statement compilers.
///
/// One predicate tree feeds two back ends:
///
/// ```text
/// key("age").ge(18).and(...)     (types.rs)
///       ↓                    ↓
/// SQL compiler           Document compiler
/// (compiler.rs,          (document.rs)
///  dialect.rs)                ↓
///       ↓                BSON filter / $expr
/// Statement builder      (builder.rs)
///       ↓
/// SQL text + binds  →  syntax check (parser.rs)
/// ```
pub mod builder;
pub mod compiler;
pub mod dialect;
pub mod document;
pub mod parser;
pub mod types;

// Re-export key types for convenience
pub use builder::{
    JoinKind, Piece, RenderedStatement, SortDirection, SqlFragment, Statement, ViewOptions,
};
pub use compiler::{compile_sql, compile_sql_with_key, render_inline, PrimaryKey};
pub use dialect::{
    Dialect, LockStrength, LockWait, Placeholder, RowLock, UpdateOperator, MYSQL, POSTGRES, SQLITE,
};
pub use document::{compile_expression, compile_filter, escape_regex};
pub use parser::check_syntax;
pub use types::*;
