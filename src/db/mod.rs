//! Database access layer.
//!
//! - `client`: physical connections and the factory opening them
//! - `pool`: bounded connection pool with idle reaping
//! - `health`: periodic health checks and status listeners
//! - `transaction`: transactions, savepoints and retrying units of work
//! - `profiler`: statement timing and slow-query tracking
//! - `database`: the facade tying them together

#[macro_use]
pub mod macros;
pub mod client;
pub mod database;
pub mod health;
pub mod params;
pub mod pool;
pub mod profiler;
pub mod transaction;
pub mod types;

pub use client::{ConnectionFactory, DbClient, EngineActivity, SqlxClient, SqlxFactory};
pub use database::Database;
pub use health::{HealthMonitor, HealthStatus, ListenerId};
pub use pool::{ConnectionPool, PoolMetrics, PoolStats, PooledConnection};
pub use profiler::{ProfileStats, QueryProfile, QueryProfiler};
pub use transaction::{
    IsolationLevel, TransactionContext, TransactionCoordinator, TransactionHandle,
    TransactionMetadata, TransactionOptions,
};
pub use types::{FromRow, FromValue, Row, Value};
