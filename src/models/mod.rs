//! Data models shared by the pool, the transaction coordinator and the binary.

pub mod connection;
pub mod query;

pub use connection::{ConnectionConfigError, ConnectionTarget, DatabaseType, TransactionState};
pub use query::{QueryParam, StatementResult};
