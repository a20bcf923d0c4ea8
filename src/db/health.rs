//! Periodic and on-demand database health checks.
//!
//! Each check borrows a pooled connection, times a trivial round trip, reads
//! engine-side session counts where the backend exposes them, and folds the
//! result into a [`HealthStatus`] snapshot delivered to every registered
//! listener.

use crate::config::HealthConfig;
use crate::db::client::EngineActivity;
use crate::db::pool::{ConnectionPool, PoolStats};
use crate::error::{DbError, DbResult};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const ONE_MINUTE: Duration = Duration::from_secs(60);
const FIVE_MINUTES: Duration = Duration::from_secs(5 * 60);
const FIFTEEN_MINUTES: Duration = Duration::from_secs(15 * 60);

/// Point-in-time health snapshot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthStatus {
    pub is_healthy: bool,
    /// `None` until the first check completes
    pub checked_at: Option<DateTime<Utc>>,
    pub pool: PoolStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine: Option<EngineActivity>,
    pub latency_ms: Option<f64>,
    pub avg_latency_1m_ms: Option<f64>,
    pub avg_latency_5m_ms: Option<f64>,
    pub avg_latency_15m_ms: Option<f64>,
    /// Failed checks over the last five minutes
    pub error_rate: f64,
    pub error_count: u64,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    /// Why the database is considered unhealthy
    pub issues: Vec<String>,
}

/// Identifies a registered status listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&HealthStatus) + Send + Sync>;

#[derive(Debug, Clone, Copy)]
struct LatencySample {
    at: Instant,
    latency_ms: f64,
}

#[derive(Default)]
struct MonitorState {
    status: HealthStatus,
    latencies: VecDeque<LatencySample>,
    /// (when, succeeded) for the error-rate window
    outcomes: VecDeque<(Instant, bool)>,
    error_count: u64,
    last_error: Option<(String, DateTime<Utc>)>,
}

impl MonitorState {
    fn average_since(&self, now: Instant, window: Duration) -> Option<f64> {
        let recent: Vec<f64> = self
            .latencies
            .iter()
            .filter(|s| now.saturating_duration_since(s.at) <= window)
            .map(|s| s.latency_ms)
            .collect();
        if recent.is_empty() {
            None
        } else {
            Some(recent.iter().sum::<f64>() / recent.len() as f64)
        }
    }

    fn error_rate(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 0.0;
        }
        let failed = self.outcomes.iter().filter(|(_, ok)| !ok).count();
        failed as f64 / self.outcomes.len() as f64
    }
}

struct MonitorInner {
    config: HealthConfig,
    pool: ConnectionPool,
    application_name: String,
    state: Mutex<MonitorState>,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_listener_id: AtomicU64,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Health monitor for one connection pool.
#[derive(Clone)]
pub struct HealthMonitor {
    inner: Arc<MonitorInner>,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig, pool: ConnectionPool, application_name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                config,
                pool,
                application_name: application_name.into(),
                state: Mutex::new(MonitorState::default()),
                listeners: Mutex::new(Vec::new()),
                next_listener_id: AtomicU64::new(1),
                task: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.inner.config
    }

    /// Start periodic checks. The first check runs immediately.
    pub fn start(&self) {
        let mut task = self.inner.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            debug!("Health monitor already running");
            return;
        }

        let weak: Weak<MonitorInner> = Arc::downgrade(&self.inner);
        let period = self.inner.config.check_interval;
        *task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                HealthMonitor { inner }.check_health().await;
            }
        }));

        info!(
            interval_ms = period.as_millis() as u64,
            "Health monitor started"
        );
    }

    pub fn stop(&self) {
        if let Some(task) = self.inner.task.lock().take() {
            task.abort();
            info!("Health monitor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .task
            .lock()
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    /// Latest snapshot.
    pub fn status(&self) -> HealthStatus {
        self.inner.state.lock().status.clone()
    }

    /// Register a listener called after every check.
    pub fn on_status_change<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&HealthStatus) + Send + Sync + 'static,
    {
        let id = ListenerId(self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.inner.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    /// Returns `false` if the id was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    /// Run one check now and return the new snapshot. Never fails.
    pub async fn check_health(&self) -> HealthStatus {
        let inner = &self.inner;
        let timeout = inner.config.timeout;

        let probe = match tokio::time::timeout(timeout, self.probe()).await {
            Ok(result) => result,
            Err(_) => Err(DbError::health_check(format!(
                "Health check timed out after {}ms",
                timeout.as_millis()
            ))),
        };
        let pool = inner.pool.stats();

        let (status, previous) = {
            let mut state = inner.state.lock();
            let now = Instant::now();
            let previous = state.status.checked_at.map(|_| state.status.is_healthy);
            let status = self.record(&mut state, now, pool, probe);
            state.status = status.clone();
            (status, previous)
        };

        match (previous, status.is_healthy) {
            (Some(true) | None, false) => warn!(issues = ?status.issues, "Database unhealthy"),
            (Some(false), true) => info!("Database healthy again"),
            _ => debug!(
                healthy = status.is_healthy,
                latency_ms = status.latency_ms,
                "Health check completed"
            ),
        }

        self.notify(&status);
        status
    }

    async fn probe(&self) -> DbResult<(Duration, Option<EngineActivity>)> {
        let mut conn = self.inner.pool.get_connection().await?;
        let latency = conn.ping().await?;
        let engine = match conn.activity(&self.inner.application_name).await {
            Ok(activity) => activity,
            Err(e) => {
                debug!(error = %e, "Engine activity query failed");
                None
            }
        };
        conn.release().await;
        Ok((latency, engine))
    }

    fn record(
        &self,
        state: &mut MonitorState,
        now: Instant,
        pool: PoolStats,
        probe: DbResult<(Duration, Option<EngineActivity>)>,
    ) -> HealthStatus {
        let config = &self.inner.config;
        let capacity = config.history_capacity();
        let mut issues = Vec::new();

        let (latency_ms, engine) = match probe {
            Ok((latency, engine)) => {
                let latency_ms = latency.as_secs_f64() * 1000.0;
                while state.latencies.len() >= capacity {
                    state.latencies.pop_front();
                }
                state.latencies.push_back(LatencySample { at: now, latency_ms });
                state.outcomes.push_back((now, true));
                if latency > config.max_latency {
                    issues.push(format!(
                        "Latency {:.1}ms exceeds maximum {}ms",
                        latency_ms,
                        config.max_latency.as_millis()
                    ));
                }
                (Some(latency_ms), engine)
            }
            Err(e) => {
                let message = e.to_string();
                state.outcomes.push_back((now, false));
                state.error_count += 1;
                state.last_error = Some((message.clone(), Utc::now()));
                issues.push(message);
                (None, None)
            }
        };

        while state
            .outcomes
            .front()
            .is_some_and(|(at, _)| now.saturating_duration_since(*at) > FIVE_MINUTES)
        {
            state.outcomes.pop_front();
        }

        let utilization = pool.utilization();
        if utilization > config.max_pool_utilization {
            issues.push(format!(
                "Pool utilization {:.0}% exceeds maximum {:.0}%",
                utilization * 100.0,
                config.max_pool_utilization * 100.0
            ));
        }

        let error_rate = state.error_rate();
        if error_rate > config.max_error_rate {
            issues.push(format!(
                "Error rate {:.1}% exceeds maximum {:.1}%",
                error_rate * 100.0,
                config.max_error_rate * 100.0
            ));
        }

        HealthStatus {
            is_healthy: issues.is_empty(),
            checked_at: Some(Utc::now()),
            pool,
            engine,
            latency_ms,
            avg_latency_1m_ms: state.average_since(now, ONE_MINUTE),
            avg_latency_5m_ms: state.average_since(now, FIVE_MINUTES),
            avg_latency_15m_ms: state.average_since(now, FIFTEEN_MINUTES),
            error_rate,
            error_count: state.error_count,
            last_error: state.last_error.as_ref().map(|(m, _)| m.clone()),
            last_error_at: state.last_error.as_ref().map(|(_, at)| *at),
            issues,
        }
    }

    fn notify(&self, status: &HealthStatus) {
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(status))).is_err() {
                warn!("Health status listener panicked");
            }
        }
    }
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("config", &self.inner.config)
            .field("running", &self.is_running())
            .finish()
    }
}
