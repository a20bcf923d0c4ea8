//! Single physical connections and the factory that opens them.
//!
//! The pool never talks to a driver directly: it owns boxed [`DbClient`]s made
//! by a [`ConnectionFactory`]. The production factory opens one sqlx
//! connection per slot (PostgreSQL, MySQL or SQLite); tests plug in scripted
//! clients through the same traits.

use crate::db::params::{mysql_query, postgres_query, sqlite_query};
use crate::db::types::{Row, decode_rows};
use crate::error::{DbError, DbResult};
use crate::models::{ConnectionTarget, DatabaseType, QueryParam, StatementResult};
use async_trait::async_trait;
use serde::Serialize;
use sqlx::mysql::MySqlConnectOptions;
use sqlx::postgres::PgConnectOptions;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{ConnectOptions, Connection, MySqlConnection, PgConnection, SqliteConnection};
use std::str::FromStr;
use tracing::debug;

/// Engine-side session counts for this application.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineActivity {
    pub total: i64,
    pub active: i64,
    pub idle: i64,
    /// Sessions parked inside an open transaction (PostgreSQL only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_in_transaction: Option<i64>,
}

/// One physical connection, exclusively owned by whoever holds it.
#[async_trait]
pub trait DbClient: Send + 'static {
    fn backend(&self) -> DatabaseType;

    /// Run a statement that returns no rows.
    async fn execute(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<StatementResult>;

    /// Run a query and decode every returned row.
    async fn fetch_all(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<Vec<Row>>;

    /// Trivial round trip used by health checks.
    async fn ping(&mut self) -> DbResult<()>;

    /// Session counts scoped to `application_name`, where the engine exposes them.
    async fn activity(&mut self, application_name: &str) -> DbResult<Option<EngineActivity>> {
        let _ = application_name;
        Ok(None)
    }

    async fn close(self: Box<Self>) -> DbResult<()>;
}

/// Opens new physical connections for the pool.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    async fn connect(&self) -> DbResult<Box<dyn DbClient>>;
}

/// Backend-specific sqlx connection (avoids AnyConnection limitations).
#[derive(Debug)]
pub enum SqlxClient {
    MySql(MySqlConnection),
    Postgres(PgConnection),
    SQLite(SqliteConnection),
}

const PG_ACTIVITY_SQL: &str = "SELECT count(*) AS total, \
     count(*) FILTER (WHERE state = 'active') AS active, \
     count(*) FILTER (WHERE state = 'idle') AS idle, \
     count(*) FILTER (WHERE state LIKE 'idle in transaction%') AS idle_in_transaction \
     FROM pg_stat_activity WHERE application_name = $1";

const MYSQL_ACTIVITY_SQL: &str = "SELECT COUNT(*) AS total, \
     CAST(COALESCE(SUM(command <> 'Sleep'), 0) AS SIGNED) AS active, \
     CAST(COALESCE(SUM(command = 'Sleep'), 0) AS SIGNED) AS idle \
     FROM information_schema.processlist \
     WHERE user = SUBSTRING_INDEX(CURRENT_USER(), '@', 1)";

#[async_trait]
impl DbClient for SqlxClient {
    fn backend(&self) -> DatabaseType {
        match self {
            SqlxClient::MySql(_) => DatabaseType::MySQL,
            SqlxClient::Postgres(_) => DatabaseType::PostgreSQL,
            SqlxClient::SQLite(_) => DatabaseType::SQLite,
        }
    }

    async fn execute(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<StatementResult> {
        let result = impl_db_dispatch!(self, {
            MySql(conn) => {
                let r = mysql_query(sql, params).execute(&mut *conn).await?;
                StatementResult {
                    rows_affected: r.rows_affected(),
                    last_insert_id: Some(r.last_insert_id())
                        .filter(|id| *id > 0)
                        .and_then(|id| i64::try_from(id).ok()),
                }
            },
            Postgres(conn) => {
                let r = postgres_query(sql, params).execute(&mut *conn).await?;
                StatementResult::with_rows(r.rows_affected())
            },
            SQLite(conn) => {
                let r = sqlite_query(sql, params).execute(&mut *conn).await?;
                StatementResult {
                    rows_affected: r.rows_affected(),
                    last_insert_id: Some(r.last_insert_rowid()).filter(|id| *id > 0),
                }
            },
        });
        Ok(result)
    }

    async fn fetch_all(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<Vec<Row>> {
        let rows = impl_db_dispatch!(self, {
            MySql(conn) => decode_rows(&mysql_query(sql, params).fetch_all(&mut *conn).await?),
            Postgres(conn) => decode_rows(&postgres_query(sql, params).fetch_all(&mut *conn).await?),
            SQLite(conn) => decode_rows(&sqlite_query(sql, params).fetch_all(&mut *conn).await?),
        });
        Ok(rows)
    }

    async fn ping(&mut self) -> DbResult<()> {
        impl_db_dispatch!(self, {
            MySql(conn) => conn.ping().await?,
            Postgres(conn) => conn.ping().await?,
            SQLite(conn) => conn.ping().await?,
        });
        Ok(())
    }

    async fn activity(&mut self, application_name: &str) -> DbResult<Option<EngineActivity>> {
        let (sql, params) = match self.backend() {
            DatabaseType::PostgreSQL => (PG_ACTIVITY_SQL, vec![QueryParam::from(application_name)]),
            DatabaseType::MySQL => (MYSQL_ACTIVITY_SQL, Vec::new()),
            DatabaseType::SQLite => return Ok(None),
        };
        let rows = self.fetch_all(sql, &params).await?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };
        Ok(Some(EngineActivity {
            total: row.get("total")?,
            active: row.get("active")?,
            idle: row.get("idle")?,
            idle_in_transaction: row
                .value("idle_in_transaction")
                .map(|_| row.get("idle_in_transaction"))
                .transpose()?,
        }))
    }

    async fn close(self: Box<Self>) -> DbResult<()> {
        impl_db_dispatch!(*self, {
            MySql(conn) => conn.close().await?,
            Postgres(conn) => conn.close().await?,
            SQLite(conn) => conn.close().await?,
        });
        Ok(())
    }
}

/// Factory opening one sqlx connection per pool slot.
#[derive(Debug, Clone)]
pub struct SqlxFactory {
    target: ConnectionTarget,
}

impl SqlxFactory {
    pub fn new(target: ConnectionTarget) -> Self {
        Self { target }
    }

    pub fn target(&self) -> &ConnectionTarget {
        &self.target
    }

    fn creation_error(&self, err: sqlx::Error) -> DbError {
        let suggestion = match self.target.db_type {
            DatabaseType::SQLite => "Check that the database file path exists and is writable",
            _ => "Check that the server is reachable and the credentials are valid",
        };
        DbError::connection_creation(
            format!(
                "{} connection to {} failed: {}",
                self.target.db_type,
                self.target.masked_connection_string(),
                err
            ),
            suggestion,
        )
    }
}

#[async_trait]
impl ConnectionFactory for SqlxFactory {
    async fn connect(&self) -> DbResult<Box<dyn DbClient>> {
        let url = self.target.connection_string.as_str();
        let client = match self.target.db_type {
            DatabaseType::PostgreSQL => {
                let options = PgConnectOptions::from_str(url)?
                    .application_name(&self.target.application_name);
                SqlxClient::Postgres(options.connect().await.map_err(|e| self.creation_error(e))?)
            }
            DatabaseType::MySQL => {
                let options = MySqlConnectOptions::from_str(url)?;
                SqlxClient::MySql(options.connect().await.map_err(|e| self.creation_error(e))?)
            }
            DatabaseType::SQLite => {
                let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
                SqlxClient::SQLite(options.connect().await.map_err(|e| self.creation_error(e))?)
            }
        };

        debug!(db_type = %self.target.db_type, "Opened database connection");
        Ok(Box::new(client))
    }
}
