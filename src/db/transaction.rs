//! Transaction coordination.
//!
//! A transaction borrows one pooled connection for its whole life. The
//! coordinator issues the backend's BEGIN sequence, keeps a live-transaction
//! registry, enforces optional timeouts and runs units of work with automatic
//! commit/rollback and retry of serialization and lock failures.
//!
//! The connection sits behind an async mutex so a timeout rollback waits for
//! any statement already in flight.

use crate::config::TransactionConfig;
use crate::db::pool::{ConnectionPool, PooledConnection};
use crate::db::types::{FromRow, Row};
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, QueryParam, StatementResult, TransactionState};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Longest savepoint name accepted (PostgreSQL identifier limit).
const MAX_SAVEPOINT_NAME_LEN: usize = 63;

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    /// Get the SQL keyword for this isolation level.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }
}

impl std::fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Per-transaction options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionOptions {
    /// Ignored on SQLite
    pub isolation: Option<IsolationLevel>,
    /// Roll back automatically once this elapses
    pub timeout: Option<Duration>,
    /// Overrides the coordinator's retry count for `execute_in_transaction`
    pub max_retries: Option<u32>,
}

impl TransactionOptions {
    pub fn with_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = Some(isolation);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// Registry view of a live transaction.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionMetadata {
    pub transaction_id: String,
    pub backend: DatabaseType,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub isolation: Option<IsolationLevel>,
    pub savepoint_depth: usize,
}

struct TxnInner {
    state: TransactionState,
    conn: Option<PooledConnection>,
    savepoints: Vec<String>,
    savepoint_seq: u32,
}

impl TxnInner {
    /// The connection, provided the transaction is still active.
    fn active_conn(&mut self, id: &str) -> DbResult<&mut PooledConnection> {
        if !self.state.is_active() {
            return Err(DbError::transaction(
                format!("Transaction is {}", self.state),
                id,
            ));
        }
        self.conn
            .as_mut()
            .ok_or_else(|| DbError::transaction("Transaction has no connection", id))
    }

    async fn release_conn(&mut self, healthy: bool) {
        if let Some(mut conn) = self.conn.take() {
            if !healthy {
                conn.mark_unhealthy();
            }
            conn.release().await;
        }
    }
}

struct TxnCore {
    id: String,
    backend: DatabaseType,
    isolation: Option<IsolationLevel>,
    timeout: Option<Duration>,
    started: Instant,
    started_at: DateTime<Utc>,
    savepoint_depth: AtomicUsize,
    inner: tokio::sync::Mutex<TxnInner>,
}

impl TxnCore {
    fn metadata(&self) -> TransactionMetadata {
        TransactionMetadata {
            transaction_id: self.id.clone(),
            backend: self.backend,
            started_at: self.started_at,
            duration_ms: self.started.elapsed().as_millis() as u64,
            timeout_ms: self.timeout.map(|t| t.as_millis() as u64),
            isolation: self.isolation,
            savepoint_depth: self.savepoint_depth.load(Ordering::Relaxed),
        }
    }

    fn set_savepoints(&self, inner: &mut TxnInner, keep: usize) {
        inner.savepoints.truncate(keep);
        self.savepoint_depth
            .store(inner.savepoints.len(), Ordering::Relaxed);
    }

    async fn commit(&self) -> DbResult<()> {
        let mut inner = self.inner.lock().await;
        let conn = inner.active_conn(&self.id)?;

        match conn.execute("COMMIT", &[]).await {
            Ok(_) => {
                inner.state = TransactionState::Committed;
                self.set_savepoints(&mut inner, 0);
                inner.release_conn(true).await;
                debug!(
                    transaction_id = %self.id,
                    elapsed_ms = self.started.elapsed().as_millis() as u64,
                    "Transaction committed"
                );
                Ok(())
            }
            Err(commit_err) => {
                warn!(
                    transaction_id = %self.id,
                    error = %commit_err,
                    "Commit failed, rolling back"
                );
                let rollback = conn.execute("ROLLBACK", &[]).await;
                inner.state = TransactionState::RolledBack;
                self.set_savepoints(&mut inner, 0);
                inner.release_conn(rollback.is_ok()).await;
                match rollback {
                    Ok(_) => Err(commit_err),
                    Err(rollback_err) => {
                        warn!(
                            transaction_id = %self.id,
                            error = %rollback_err,
                            "Rollback after failed commit also failed"
                        );
                        Err(rollback_err)
                    }
                }
            }
        }
    }

    /// Roll back into `terminal` unless already ended. Returns whether anything happened.
    async fn rollback(&self, terminal: TransactionState) -> DbResult<bool> {
        let mut inner = self.inner.lock().await;
        if inner.state.is_ended() {
            return Ok(false);
        }

        let result = match inner.conn.as_mut() {
            Some(conn) => conn.execute("ROLLBACK", &[]).await.map(|_| ()),
            None => Ok(()),
        };
        inner.state = terminal;
        self.set_savepoints(&mut inner, 0);
        inner.release_conn(result.is_ok()).await;
        result.map(|()| true)
    }
}

type Registry = Arc<parking_lot::Mutex<HashMap<String, Arc<TxnCore>>>>;

/// Statement and savepoint access to a live transaction.
///
/// Handed to units of work; it cannot commit or roll back the transaction.
#[derive(Clone)]
pub struct TransactionHandle {
    core: Arc<TxnCore>,
}

impl TransactionHandle {
    pub fn id(&self) -> &str {
        &self.core.id
    }

    pub fn backend(&self) -> DatabaseType {
        self.core.backend
    }

    pub fn isolation(&self) -> Option<IsolationLevel> {
        self.core.isolation
    }

    pub async fn state(&self) -> TransactionState {
        self.core.inner.lock().await.state
    }

    /// Savepoint names, oldest first.
    pub async fn savepoints(&self) -> Vec<String> {
        self.core.inner.lock().await.savepoints.clone()
    }

    pub async fn execute(&self, sql: &str, params: &[QueryParam]) -> DbResult<StatementResult> {
        let mut inner = self.core.inner.lock().await;
        inner.active_conn(&self.core.id)?.execute(sql, params).await
    }

    pub async fn fetch_all(&self, sql: &str, params: &[QueryParam]) -> DbResult<Vec<Row>> {
        let mut inner = self.core.inner.lock().await;
        inner.active_conn(&self.core.id)?.fetch_all(sql, params).await
    }

    pub async fn fetch_optional(&self, sql: &str, params: &[QueryParam]) -> DbResult<Option<Row>> {
        let mut inner = self.core.inner.lock().await;
        inner
            .active_conn(&self.core.id)?
            .fetch_optional(sql, params)
            .await
    }

    pub async fn query_as<T: FromRow>(&self, sql: &str, params: &[QueryParam]) -> DbResult<Vec<T>> {
        let mut inner = self.core.inner.lock().await;
        inner.active_conn(&self.core.id)?.query_as(sql, params).await
    }

    /// Push a savepoint. A name is generated (`sp_<n>`) when omitted.
    pub async fn savepoint(&self, name: Option<&str>) -> DbResult<String> {
        let id = self.core.id.as_str();
        let mut inner = self.core.inner.lock().await;
        inner.active_conn(id)?;

        let name = match name {
            Some(name) => {
                validate_savepoint_name(name, id)?;
                name.to_string()
            }
            None => {
                inner.savepoint_seq += 1;
                format!("sp_{}", inner.savepoint_seq)
            }
        };

        inner
            .active_conn(id)?
            .execute(&format!("SAVEPOINT {}", name), &[])
            .await?;
        inner.savepoints.push(name.clone());
        let depth = inner.savepoints.len();
        self.core.set_savepoints(&mut inner, depth);
        debug!(transaction_id = %id, savepoint = %name, depth, "Savepoint created");
        Ok(name)
    }

    /// Undo work since `name`. Later savepoints are discarded; `name` stays.
    pub async fn rollback_to_savepoint(&self, name: &str) -> DbResult<()> {
        let id = self.core.id.as_str();
        let mut inner = self.core.inner.lock().await;
        inner.active_conn(id)?;
        let pos = find_savepoint(&inner.savepoints, name, id)?;

        inner
            .active_conn(id)?
            .execute(&format!("ROLLBACK TO SAVEPOINT {}", name), &[])
            .await?;
        self.core.set_savepoints(&mut inner, pos + 1);
        debug!(transaction_id = %id, savepoint = %name, "Rolled back to savepoint");
        Ok(())
    }

    /// Release `name` and every savepoint after it.
    pub async fn release_savepoint(&self, name: &str) -> DbResult<()> {
        let id = self.core.id.as_str();
        let mut inner = self.core.inner.lock().await;
        inner.active_conn(id)?;
        let pos = find_savepoint(&inner.savepoints, name, id)?;

        inner
            .active_conn(id)?
            .execute(&format!("RELEASE SAVEPOINT {}", name), &[])
            .await?;
        self.core.set_savepoints(&mut inner, pos);
        debug!(transaction_id = %id, savepoint = %name, "Savepoint released");
        Ok(())
    }
}

impl std::fmt::Debug for TransactionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionHandle")
            .field("id", &self.core.id)
            .field("backend", &self.core.backend)
            .finish()
    }
}

fn validate_savepoint_name(name: &str, transaction_id: &str) -> DbResult<()> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && name.len() <= MAX_SAVEPOINT_NAME_LEN;
    if valid {
        Ok(())
    } else {
        Err(DbError::transaction(
            format!("Invalid savepoint name '{}'", name),
            transaction_id,
        ))
    }
}

/// Position of the most recent savepoint called `name`.
fn find_savepoint(savepoints: &[String], name: &str, transaction_id: &str) -> DbResult<usize> {
    savepoints
        .iter()
        .rposition(|s| s == name)
        .ok_or_else(|| {
            DbError::transaction(format!("Unknown savepoint '{}'", name), transaction_id)
        })
}

/// A live transaction owned by the caller that began it.
///
/// Dereferences to [`TransactionHandle`]. Dropping it while still active rolls
/// it back from a background task.
pub struct TransactionContext {
    handle: TransactionHandle,
    registry: Registry,
    /// Dropping it cancels the pending timeout
    timeout_cancel: Option<oneshot::Sender<()>>,
    finished: bool,
}

impl TransactionContext {
    /// A handle sharing this transaction, for passing to units of work.
    pub fn handle(&self) -> TransactionHandle {
        self.handle.clone()
    }

    fn finish(&mut self) {
        self.finished = true;
        self.timeout_cancel.take();
        self.registry.lock().remove(&self.handle.core.id);
    }

    /// Commit. A failed COMMIT is rolled back on the same connection before
    /// the error is returned; the connection is released either way.
    pub async fn commit(mut self) -> DbResult<()> {
        self.timeout_cancel.take();
        let result = self.handle.core.commit().await;
        self.finish();
        result
    }

    /// Roll back. A no-op on a transaction that has already ended.
    pub async fn rollback(mut self) -> DbResult<()> {
        self.timeout_cancel.take();
        let result = self
            .handle
            .core
            .rollback(TransactionState::RolledBack)
            .await;
        self.finish();
        match result {
            Ok(true) => {
                debug!(transaction_id = %self.handle.core.id, "Transaction rolled back");
                Ok(())
            }
            Ok(false) => {
                debug!(
                    transaction_id = %self.handle.core.id,
                    "Rollback requested on an ended transaction, ignoring"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

impl Deref for TransactionContext {
    type Target = TransactionHandle;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

impl Drop for TransactionContext {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.timeout_cancel.take();

        let core = Arc::clone(&self.handle.core);
        let registry = Arc::clone(&self.registry);
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            registry.lock().remove(&core.id);
            return;
        };
        runtime.spawn(async move {
            match core.rollback(TransactionState::RolledBack).await {
                Ok(true) => warn!(
                    transaction_id = %core.id,
                    "Transaction dropped while active, rolled back"
                ),
                Ok(false) => {}
                Err(e) => warn!(
                    transaction_id = %core.id,
                    error = %e,
                    "Rollback of dropped transaction failed"
                ),
            }
            registry.lock().remove(&core.id);
        });
    }
}

impl std::fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionContext")
            .field("id", &self.handle.core.id)
            .field("finished", &self.finished)
            .finish()
    }
}

/// Runs units of work in transactions on pooled connections.
#[derive(Clone)]
pub struct TransactionCoordinator {
    pool: ConnectionPool,
    config: TransactionConfig,
    registry: Registry,
}

impl TransactionCoordinator {
    pub fn new(pool: ConnectionPool, config: TransactionConfig) -> Self {
        Self {
            pool,
            config,
            registry: Arc::new(parking_lot::Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &TransactionConfig {
        &self.config
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Acquire a connection and open a transaction on it.
    pub async fn begin_transaction(&self, options: TransactionOptions) -> DbResult<TransactionContext> {
        let mut conn = self.pool.get_connection().await?;
        let backend = conn
            .backend()
            .ok_or_else(|| DbError::internal("Pooled connection has no client"))?;
        let transaction_id = generate_transaction_id();

        let core = Arc::new(TxnCore {
            id: transaction_id.clone(),
            backend,
            isolation: options.isolation,
            timeout: options.timeout,
            started: Instant::now(),
            started_at: Utc::now(),
            savepoint_depth: AtomicUsize::new(0),
            inner: tokio::sync::Mutex::new(TxnInner {
                state: TransactionState::Created,
                conn: None,
                savepoints: Vec::new(),
                savepoint_seq: 0,
            }),
        });

        if let Err(e) = begin_statements(&mut conn, backend, options.isolation).await {
            warn!(transaction_id = %transaction_id, error = %e, "BEGIN failed");
            conn.release().await;
            return Err(e);
        }

        {
            let mut inner = core.inner.lock().await;
            inner.conn = Some(conn);
            inner.state = TransactionState::Active;
        }
        self.registry
            .lock()
            .insert(transaction_id.clone(), Arc::clone(&core));

        let timeout_cancel = options
            .timeout
            .map(|timeout| spawn_timeout(Arc::clone(&core), Arc::clone(&self.registry), timeout));

        debug!(
            transaction_id = %transaction_id,
            backend = %backend,
            isolation = ?options.isolation,
            timeout_ms = options.timeout.map(|t| t.as_millis() as u64),
            "Transaction started"
        );

        Ok(TransactionContext {
            handle: TransactionHandle { core },
            registry: Arc::clone(&self.registry),
            timeout_cancel,
            finished: false,
        })
    }

    pub async fn commit_transaction(&self, ctx: TransactionContext) -> DbResult<()> {
        ctx.commit().await
    }

    pub async fn rollback_transaction(&self, ctx: TransactionContext) -> DbResult<()> {
        ctx.rollback().await
    }

    /// Run `work` in a transaction: commit on success, roll back on error.
    ///
    /// Work failing with a serialization, deadlock or lock error is retried up
    /// to `max_retries` more times with a linearly growing backoff.
    pub async fn execute_in_transaction<T, F, Fut>(
        &self,
        mut work: F,
        options: TransactionOptions,
    ) -> DbResult<T>
    where
        F: FnMut(TransactionHandle) -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        let max_retries = options.max_retries.unwrap_or(self.config.max_retries);
        let mut attempt: u32 = 0;

        loop {
            let err = match self.run_once(&mut work, options.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            let Some(reason) = err.retry_reason() else {
                return Err(err);
            };
            if attempt >= max_retries {
                if max_retries > 0 {
                    warn!(attempts = attempt + 1, %reason, "Transaction retries exhausted");
                }
                return Err(err);
            }

            attempt += 1;
            let backoff = self.config.retry_backoff * attempt;
            info!(
                attempt,
                max_retries,
                %reason,
                backoff_ms = backoff.as_millis() as u64,
                "Retrying transaction"
            );
            tokio::time::sleep(backoff).await;
        }
    }

    async fn run_once<T, F, Fut>(&self, work: &mut F, options: TransactionOptions) -> DbResult<T>
    where
        F: FnMut(TransactionHandle) -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        let ctx = self.begin_transaction(options).await?;
        match work(ctx.handle()).await {
            Ok(value) => {
                ctx.commit().await?;
                Ok(value)
            }
            Err(e) => {
                let transaction_id = ctx.id().to_string();
                if let Err(rollback_err) = ctx.rollback().await {
                    warn!(
                        transaction_id = %transaction_id,
                        error = %rollback_err,
                        "Rollback after failed work also failed"
                    );
                }
                Err(e)
            }
        }
    }

    pub fn list_transactions(&self) -> Vec<TransactionMetadata> {
        self.registry
            .lock()
            .values()
            .map(|core| core.metadata())
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.registry.lock().len()
    }

    /// Roll back every live transaction. Returns how many were rolled back.
    pub async fn rollback_all(&self) -> usize {
        let cores: Vec<Arc<TxnCore>> = self.registry.lock().drain().map(|(_, c)| c).collect();
        let mut rolled_back = 0;
        for core in cores {
            match core.rollback(TransactionState::RolledBack).await {
                Ok(true) => {
                    rolled_back += 1;
                    info!(transaction_id = %core.id, "Rolled back transaction on shutdown");
                }
                Ok(false) => {}
                Err(e) => warn!(
                    transaction_id = %core.id,
                    error = %e,
                    "Rollback on shutdown failed"
                ),
            }
        }
        rolled_back
    }
}

impl std::fmt::Debug for TransactionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionCoordinator")
            .field("config", &self.config)
            .field("active", &self.active_count())
            .finish()
    }
}

/// Issue the backend's isolation and BEGIN statements.
async fn begin_statements(
    conn: &mut PooledConnection,
    backend: DatabaseType,
    isolation: Option<IsolationLevel>,
) -> DbResult<()> {
    let set_isolation = isolation.map(|level| format!("SET TRANSACTION ISOLATION LEVEL {}", level.as_sql()));

    match backend {
        DatabaseType::PostgreSQL => {
            conn.execute("BEGIN", &[]).await?;
            if let Some(sql) = set_isolation {
                if let Err(e) = conn.execute(&sql, &[]).await {
                    if let Err(rollback_err) = conn.execute("ROLLBACK", &[]).await {
                        warn!(
                            error = %rollback_err,
                            "Rollback after failed isolation statement also failed"
                        );
                        conn.mark_unhealthy();
                    }
                    return Err(e);
                }
            }
        }
        DatabaseType::MySQL => {
            // applies to the next transaction only
            if let Some(sql) = set_isolation {
                conn.execute(&sql, &[]).await?;
            }
            conn.execute("START TRANSACTION", &[]).await?;
        }
        DatabaseType::SQLite => {
            if let Some(level) = isolation {
                debug!(isolation = %level, "SQLite ignores isolation levels");
            }
            conn.execute("BEGIN", &[]).await?;
        }
    }
    Ok(())
}

/// Roll the transaction back once `timeout` elapses, unless the returned
/// sender is dropped first. A rollback already under way is never interrupted.
fn spawn_timeout(core: Arc<TxnCore>, registry: Registry, timeout: Duration) -> oneshot::Sender<()> {
    let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(timeout) => {}
            _ = cancel_rx => return,
        }
        match core.rollback(TransactionState::TimedOut).await {
            Ok(true) => warn!(
                transaction_id = %core.id,
                timeout_ms = timeout.as_millis() as u64,
                "Transaction timed out, rolled back"
            ),
            Ok(false) => {}
            Err(e) => warn!(
                transaction_id = %core.id,
                error = %e,
                "Transaction timed out, rollback failed"
            ),
        }
        registry.lock().remove(&core.id);
    });
    cancel_tx
}

/// Generate a unique transaction ID.
fn generate_transaction_id() -> String {
    format!("tx_{}", uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isolation_level_sql() {
        assert_eq!(IsolationLevel::ReadCommitted.as_sql(), "READ COMMITTED");
        assert_eq!(IsolationLevel::Serializable.to_string(), "SERIALIZABLE");
    }

    #[test]
    fn test_savepoint_name_validation() {
        assert!(validate_savepoint_name("sp_1", "tx").is_ok());
        assert!(validate_savepoint_name("_before_update", "tx").is_ok());
        assert!(validate_savepoint_name("1sp", "tx").is_err());
        assert!(validate_savepoint_name("sp; DROP TABLE tasks", "tx").is_err());
        assert!(validate_savepoint_name("", "tx").is_err());
        assert!(validate_savepoint_name(&"a".repeat(64), "tx").is_err());
    }

    #[test]
    fn test_find_savepoint_prefers_latest() {
        let stack = vec!["a".to_string(), "b".to_string(), "a".to_string()];
        assert_eq!(find_savepoint(&stack, "a", "tx").unwrap(), 2);
        assert_eq!(find_savepoint(&stack, "b", "tx").unwrap(), 1);
        assert!(matches!(
            find_savepoint(&stack, "c", "tx"),
            Err(DbError::TransactionState { .. })
        ));
    }

    #[test]
    fn test_transaction_id_format() {
        let id = generate_transaction_id();
        assert!(id.starts_with("tx_"));
        assert_eq!(id.len(), 3 + 32);
    }

    #[test]
    fn test_options_builder() {
        let options = TransactionOptions::default()
            .with_isolation(IsolationLevel::RepeatableRead)
            .with_timeout(Duration::from_secs(5))
            .with_max_retries(2);
        assert_eq!(options.isolation, Some(IsolationLevel::RepeatableRead));
        assert_eq!(options.max_retries, Some(2));
    }
}
