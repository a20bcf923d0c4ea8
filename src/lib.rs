//! Taskflow database layer.
//!
//! Connection pooling, health monitoring, transaction coordination and query
//! profiling for the taskflow backend (PostgreSQL, MySQL, SQLite).

pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use config::{Config, Settings};
pub use db::{ConnectionPool, Database, HealthMonitor, QueryProfiler, TransactionCoordinator};
pub use error::{DbError, DbResult};
