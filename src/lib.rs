//! Backend-neutral values, predicates and transactions.
//!
//! - [`value`]: the [`Value`] model and its wire codecs
//! - [`ast`]: predicates, dialects, the SQL and document compilers
//! - [`db`]: connections, configuration and the transactional executor

pub mod ast;
pub mod db;
pub mod error;
pub mod value;

pub use error::{Error, Result};
pub use value::Value;
