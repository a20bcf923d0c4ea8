//! The process-wide database facade.
//!
//! Wires one profiler, one pool, one health monitor and one transaction
//! coordinator together from [`Settings`], and manages their startup and
//! shutdown order.

use crate::config::Settings;
use crate::db::client::{ConnectionFactory, SqlxFactory};
use crate::db::health::{HealthMonitor, HealthStatus};
use crate::db::pool::ConnectionPool;
use crate::db::profiler::QueryProfiler;
use crate::db::transaction::TransactionCoordinator;
use crate::error::{DbError, DbResult};
use crate::models::ConnectionTarget;
use std::sync::{Arc, OnceLock};
use tracing::info;

static GLOBAL: OnceLock<Arc<Database>> = OnceLock::new();

/// Pool, health monitor, transaction coordinator and profiler for one database.
#[derive(Debug, Clone)]
pub struct Database {
    pool: ConnectionPool,
    monitor: HealthMonitor,
    coordinator: TransactionCoordinator,
    profiler: Arc<QueryProfiler>,
}

impl Database {
    /// Assemble the components around `factory`. Nothing is connected yet.
    pub fn new(settings: &Settings, factory: Arc<dyn ConnectionFactory>) -> DbResult<Self> {
        settings.validate()?;
        let profiler = Arc::new(QueryProfiler::new(settings.profiler.clone()));
        let pool = ConnectionPool::new(settings.pool.clone(), factory, Arc::clone(&profiler))?;
        let monitor = HealthMonitor::new(
            settings.health.clone(),
            pool.clone(),
            settings.application_name(),
        );
        let coordinator = TransactionCoordinator::new(pool.clone(), settings.transaction.clone());

        Ok(Self {
            pool,
            monitor,
            coordinator,
            profiler,
        })
    }

    /// Build a database backed by sqlx connections to `settings.database_url`.
    pub fn connect(settings: &Settings) -> DbResult<Self> {
        let url = settings
            .database_url
            .as_deref()
            .ok_or_else(|| DbError::config("DATABASE_URL is not set"))?;
        let target = ConnectionTarget::new(url, settings.application_name())
            .map_err(|e| DbError::config(e.to_string()))?;

        info!(
            db_type = %target.db_type,
            url = %target.masked_connection_string(),
            "Configured database"
        );
        Self::new(settings, Arc::new(SqlxFactory::new(target)))
    }

    /// Open the pool's minimum connections, then start periodic health checks.
    pub async fn initialize(&self) -> DbResult<()> {
        self.pool.initialize().await?;
        self.monitor.start();
        info!(
            min_connections = self.pool.config().min_connections,
            max_connections = self.pool.config().max_connections,
            "Database initialized"
        );
        Ok(())
    }

    /// Stop health checks, roll back live transactions and close the pool.
    pub async fn close(&self) {
        self.monitor.stop();
        let rolled_back = self.coordinator.rollback_all().await;
        self.pool.close_all_connections().await;
        info!(rolled_back, "Database closed");
    }

    pub fn is_healthy(&self) -> bool {
        self.pool.is_healthy() && self.monitor.status().is_healthy
    }

    /// Run a health check immediately.
    pub async fn check_health(&self) -> HealthStatus {
        self.monitor.check_health().await
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn monitor(&self) -> &HealthMonitor {
        &self.monitor
    }

    pub fn transactions(&self) -> &TransactionCoordinator {
        &self.coordinator
    }

    pub fn profiler(&self) -> &Arc<QueryProfiler> {
        &self.profiler
    }

    /// Publish `db` as the process-wide instance. Fails if one is already set.
    pub fn install_global(db: Arc<Database>) -> DbResult<()> {
        GLOBAL
            .set(db)
            .map_err(|_| DbError::internal("Global database already installed"))
    }

    /// The process-wide instance, if one was installed.
    pub fn global() -> Option<Arc<Database>> {
        GLOBAL.get().cloned()
    }
}
