mod config;
mod connection;
mod postgres;
mod query;
#[cfg(test)]
pub(crate) mod testing;
mod transaction;
mod url;

pub use config::*;
pub use connection::*;
pub use postgres::*;
pub use query::*;
pub use transaction::*;
pub use url::*;
