//! Scripted in-memory connections for exercising the pool, health monitor and
//! transaction coordinator without a database server.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use taskflow_db::config::{PoolConfig, TransactionConfig};
use taskflow_db::db::{
    ConnectionFactory, ConnectionPool, DbClient, QueryProfiler, Row, TransactionCoordinator,
};
use taskflow_db::error::{DbError, DbResult};
use taskflow_db::models::{DatabaseType, QueryParam, StatementResult};

/// Knobs shared by every connection a [`MockFactory`] opens.
#[derive(Debug)]
pub struct Script {
    pub backend: DatabaseType,
    pub ping_delay: Mutex<Duration>,
    pub connect_delay: Mutex<Duration>,
    pub fail_ping: AtomicBool,
    pub fail_connect: AtomicBool,
    pub fail_commit: AtomicBool,
    pub fail_rollback: AtomicBool,
    /// `SET TRANSACTION ISOLATION LEVEL ...` statements fail
    pub fail_isolation: AtomicBool,
    /// (connection number, statement) in execution order
    pub log: Mutex<Vec<(u64, String)>>,
    pub connects: AtomicU64,
    pub closes: AtomicU64,
}

impl Script {
    pub fn new(backend: DatabaseType) -> Arc<Self> {
        Arc::new(Self {
            backend,
            ping_delay: Mutex::new(Duration::ZERO),
            connect_delay: Mutex::new(Duration::ZERO),
            fail_ping: AtomicBool::new(false),
            fail_connect: AtomicBool::new(false),
            fail_commit: AtomicBool::new(false),
            fail_rollback: AtomicBool::new(false),
            fail_isolation: AtomicBool::new(false),
            log: Mutex::new(Vec::new()),
            connects: AtomicU64::new(0),
            closes: AtomicU64::new(0),
        })
    }

    pub fn set_ping_delay(&self, delay: Duration) {
        *self.ping_delay.lock() = delay;
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock() = delay;
    }

    pub fn statements(&self) -> Vec<String> {
        self.log.lock().iter().map(|(_, sql)| sql.clone()).collect()
    }

    pub fn statements_on(&self, conn: u64) -> Vec<String> {
        self.log
            .lock()
            .iter()
            .filter(|(c, _)| *c == conn)
            .map(|(_, sql)| sql.clone())
            .collect()
    }

    /// Connection number that ran `sql` most recently.
    pub fn conn_of(&self, sql: &str) -> Option<u64> {
        self.log
            .lock()
            .iter()
            .rev()
            .find(|(_, s)| s == sql)
            .map(|(c, _)| *c)
    }

    pub fn connects(&self) -> u64 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> u64 {
        self.closes.load(Ordering::SeqCst)
    }
}

pub struct MockClient {
    number: u64,
    script: Arc<Script>,
}

#[async_trait]
impl DbClient for MockClient {
    fn backend(&self) -> DatabaseType {
        self.script.backend
    }

    async fn execute(&mut self, sql: &str, _params: &[QueryParam]) -> DbResult<StatementResult> {
        self.script.log.lock().push((self.number, sql.to_string()));
        if sql == "COMMIT" && self.script.fail_commit.load(Ordering::SeqCst) {
            return Err(DbError::statement(
                "could not commit: constraint violated",
                Some("23505".to_string()),
            ));
        }
        if sql.starts_with("SET TRANSACTION") && self.script.fail_isolation.load(Ordering::SeqCst) {
            return Err(DbError::statement(
                "invalid transaction isolation level",
                Some("25001".to_string()),
            ));
        }
        if sql == "ROLLBACK" && self.script.fail_rollback.load(Ordering::SeqCst) {
            return Err(DbError::connection(
                "connection reset during rollback",
                "Check network stability",
            ));
        }
        Ok(StatementResult::with_rows(1))
    }

    async fn fetch_all(&mut self, sql: &str, _params: &[QueryParam]) -> DbResult<Vec<Row>> {
        self.script.log.lock().push((self.number, sql.to_string()));
        Ok(Vec::new())
    }

    async fn ping(&mut self) -> DbResult<()> {
        let delay = *self.script.ping_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.script.fail_ping.load(Ordering::SeqCst) {
            return Err(DbError::connection("server closed the connection", "Reconnect"));
        }
        Ok(())
    }

    async fn close(self: Box<Self>) -> DbResult<()> {
        self.script.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct MockFactory {
    pub script: Arc<Script>,
}

#[async_trait]
impl ConnectionFactory for MockFactory {
    async fn connect(&self) -> DbResult<Box<dyn DbClient>> {
        let delay = *self.script.connect_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.script.fail_connect.load(Ordering::SeqCst) {
            return Err(DbError::connection_creation(
                "connection refused",
                "Check that the server is reachable",
            ));
        }
        let number = self.script.connects.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Box::new(MockClient {
            number,
            script: Arc::clone(&self.script),
        }))
    }
}

pub fn mock_pool(config: PoolConfig, script: &Arc<Script>) -> ConnectionPool {
    let factory = Arc::new(MockFactory {
        script: Arc::clone(script),
    });
    ConnectionPool::new(config, factory, Arc::new(QueryProfiler::default()))
        .expect("valid pool config")
}

pub async fn initialized_pool(config: PoolConfig, script: &Arc<Script>) -> ConnectionPool {
    let pool = mock_pool(config, script);
    pool.initialize().await.expect("pool initializes");
    pool
}

pub async fn coordinator(script: &Arc<Script>, config: TransactionConfig) -> TransactionCoordinator {
    let pool = initialized_pool(PoolConfig::new(1, 3), script).await;
    TransactionCoordinator::new(pool, config)
}

/// Poll `cond` until it holds or `within` elapses.
pub async fn eventually<F: Fn() -> bool>(within: Duration, cond: F) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if cond() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
