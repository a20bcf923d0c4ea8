//! Connection pool management.
//!
//! The pool owns a bounded set of [`DbClient`] slots. Each slot is either idle
//! (parked in a FIFO) or active (checked out through a [`PooledConnection`]).
//! Slots being opened, or pulled out by the reaper for a health check, are
//! counted as pending so the pool never exceeds `max_connections`.
//!
//! Acquirers that find the pool at capacity queue up as waiters. A released
//! healthy slot is handed directly to the oldest live waiter; when capacity is
//! freed instead (slot destroyed, creation failed) the oldest waiter is woken to
//! retry on its own.

use crate::config::PoolConfig;
use crate::db::client::{ConnectionFactory, DbClient, EngineActivity};
use crate::db::profiler::{ProfileOutcome, QueryProfiler};
use crate::db::types::{FromRow, Row};
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, QueryParam, StatementResult};
use futures_util::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Occupancy snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PoolStats {
    /// Idle + active + pending
    pub total: u32,
    pub active: u32,
    pub idle: u32,
    /// Slots being opened or health-checked by the reaper
    pub pending: u32,
    /// Acquirers queued for a connection
    pub waiting: u32,
    pub min_connections: u32,
    pub max_connections: u32,
}

impl PoolStats {
    /// Fraction of slots checked out (0 for an empty pool).
    pub fn utilization(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.active as f64 / self.total as f64
        }
    }
}

/// Cumulative pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolMetrics {
    pub connections_created: u64,
    pub connections_closed: u64,
    pub checkouts: u64,
    pub checkout_failures: u64,
    pub acquire_timeouts: u64,
    pub health_checks: u64,
    pub health_check_failures: u64,
}

#[derive(Debug, Default)]
struct MetricsCounters {
    connections_created: AtomicU64,
    connections_closed: AtomicU64,
    checkouts: AtomicU64,
    checkout_failures: AtomicU64,
    acquire_timeouts: AtomicU64,
    health_checks: AtomicU64,
    health_check_failures: AtomicU64,
}

impl MetricsCounters {
    fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> PoolMetrics {
        PoolMetrics {
            connections_created: self.connections_created.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            checkouts: self.checkouts.load(Ordering::Relaxed),
            checkout_failures: self.checkout_failures.load(Ordering::Relaxed),
            acquire_timeouts: self.acquire_timeouts.load(Ordering::Relaxed),
            health_checks: self.health_checks.load(Ordering::Relaxed),
            health_check_failures: self.health_check_failures.load(Ordering::Relaxed),
        }
    }
}

/// One physical connection plus bookkeeping.
struct Slot {
    id: u64,
    client: Box<dyn DbClient>,
    created_at: Instant,
    idle_since: Instant,
    healthy: bool,
}

/// `None` wakes a waiter to retry after capacity was freed.
type Waiter = oneshot::Sender<Option<Slot>>;

#[derive(Default)]
struct PoolState {
    idle: VecDeque<Slot>,
    active: HashSet<u64>,
    pending: u32,
    waiters: VecDeque<Waiter>,
}

impl PoolState {
    fn total(&self) -> u32 {
        self.idle.len() as u32 + self.active.len() as u32 + self.pending
    }

    /// Give a healthy slot to the oldest live waiter, or park it as idle.
    ///
    /// The caller sets `idle_since`; the reaper keeps the original timestamp.
    fn return_slot(&mut self, slot: Slot) {
        self.active.insert(slot.id);
        let mut pending = slot;
        while let Some(waiter) = self.waiters.pop_front() {
            match waiter.send(Some(pending)).err().flatten() {
                // waiter gave up; try the next one
                Some(back) => pending = back,
                None => return,
            }
        }
        self.active.remove(&pending.id);
        self.idle.push_back(pending);
    }

    /// Wake the oldest live waiter so it retries creation itself.
    fn notify_capacity(&mut self) {
        while let Some(waiter) = self.waiters.pop_front() {
            if waiter.send(None).is_ok() {
                return;
            }
        }
    }
}

impl PoolState {
    /// Settle the receiver of a waiter whose deadline passed.
    ///
    /// A slot handed over at the last moment is still the caller's; a capacity
    /// wake-up it can no longer act on moves to the next waiter.
    fn abandon_wait(&mut self, mut rx: oneshot::Receiver<Option<Slot>>) -> Option<Slot> {
        rx.close();
        match rx.try_recv() {
            Ok(Some(slot)) => Some(slot),
            Ok(None) => {
                self.notify_capacity();
                None
            }
            Err(_) => None,
        }
    }
}

/// `pending` counts already taken for slots being opened or checked.
///
/// Dropping it gives the counts back and wakes waiters, so a cancelled future
/// never leaks capacity. [`PendingReservation::settle`] hands them back as part
/// of a state update the caller makes under the lock instead.
struct PendingReservation<'a> {
    inner: &'a PoolInner,
    count: u32,
}

impl<'a> PendingReservation<'a> {
    fn taken(inner: &'a PoolInner, count: u32) -> Self {
        Self { inner, count }
    }

    fn settle(mut self, state: &mut PoolState) {
        state.pending -= self.count;
        self.count = 0;
    }
}

impl Drop for PendingReservation<'_> {
    fn drop(&mut self) {
        if self.count > 0 {
            let mut state = self.inner.state.lock();
            state.pending -= self.count;
            for _ in 0..self.count {
                state.notify_capacity();
            }
        }
    }
}

enum Step {
    Idle(Slot),
    Create,
    Wait(oneshot::Receiver<Option<Slot>>),
}

struct PoolInner {
    config: PoolConfig,
    factory: Arc<dyn ConnectionFactory>,
    profiler: Arc<QueryProfiler>,
    state: Mutex<PoolState>,
    initialized: AtomicBool,
    closed: AtomicBool,
    init_lock: tokio::sync::Mutex<()>,
    reaper: Mutex<Option<JoinHandle<()>>>,
    next_slot_id: AtomicU64,
    metrics: MetricsCounters,
}

impl PoolInner {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Decide the next acquisition step under one short lock.
    fn next_step(&self) -> Step {
        let mut state = self.state.lock();
        if let Some(slot) = state.idle.pop_front() {
            state.active.insert(slot.id);
            return Step::Idle(slot);
        }
        if state.total() < self.config.max_connections {
            state.pending += 1;
            return Step::Create;
        }
        let (tx, rx) = oneshot::channel();
        state.waiters.push_back(tx);
        Step::Wait(rx)
    }

    async fn open_slot(&self) -> DbResult<Slot> {
        let client = tokio::time::timeout(self.config.create_timeout, self.factory.connect())
            .await
            .map_err(|_| {
                DbError::connection_creation(
                    format!(
                        "Timed out after {}ms",
                        self.config.create_timeout.as_millis()
                    ),
                    "Check database availability or raise the create timeout",
                )
            })??;

        MetricsCounters::incr(&self.metrics.connections_created);
        let id = self.next_slot_id.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        debug!(slot_id = id, "Connection created");
        Ok(Slot {
            id,
            client,
            created_at: now,
            idle_since: now,
            healthy: true,
        })
    }

    /// Round trip bounded by the create timeout.
    async fn check_slot(&self, slot: &mut Slot) -> bool {
        MetricsCounters::incr(&self.metrics.health_checks);
        let healthy = matches!(
            tokio::time::timeout(self.config.create_timeout, slot.client.ping()).await,
            Ok(Ok(()))
        );
        if !healthy {
            MetricsCounters::incr(&self.metrics.health_check_failures);
            slot.healthy = false;
        }
        healthy
    }

    /// Disconnect a slot that has already been removed from every set.
    async fn destroy(&self, slot: Slot, reason: &'static str) {
        let id = slot.id;
        let age_ms = slot.created_at.elapsed().as_millis() as u64;
        MetricsCounters::incr(&self.metrics.connections_closed);
        match tokio::time::timeout(self.config.destroy_timeout, slot.client.close()).await {
            Ok(Ok(())) => debug!(slot_id = id, age_ms, reason, "Connection closed"),
            Ok(Err(e)) => warn!(slot_id = id, reason, error = %e, "Error closing connection"),
            Err(_) => warn!(
                slot_id = id,
                reason,
                timeout_ms = self.config.destroy_timeout.as_millis() as u64,
                "Timed out closing connection"
            ),
        }
    }

    /// Remove an active slot and tear it down.
    async fn discard_active(&self, slot: Slot, reason: &'static str) {
        {
            let mut state = self.state.lock();
            state.active.remove(&slot.id);
            state.notify_capacity();
        }
        self.destroy(slot, reason).await;
    }

    async fn release(&self, mut slot: Slot) {
        if slot.healthy && !self.is_closed() {
            self.check_slot(&mut slot).await;
        }
        self.return_checked(slot).await;
    }

    /// Park or hand off a slot whose health is already known.
    async fn return_checked(&self, mut slot: Slot) {
        if self.is_closed() {
            self.discard_active(slot, "pool closed").await;
            return;
        }
        if !slot.healthy {
            warn!(slot_id = slot.id, "Released connection is unhealthy, destroying");
            self.discard_active(slot, "unhealthy").await;
            return;
        }

        slot.idle_since = Instant::now();
        let rejected = {
            let mut state = self.state.lock();
            if self.is_closed() {
                state.active.remove(&slot.id);
                Some(slot)
            } else {
                state.return_slot(slot);
                None
            }
        };
        if let Some(slot) = rejected {
            self.destroy(slot, "pool closed").await;
        }
    }

    /// One reaper pass: check idle slots, retire expired ones, top up to the minimum.
    async fn reap(&self) {
        let to_check = self.state.lock().idle.len();

        for _ in 0..to_check {
            let candidate = {
                let mut state = self.state.lock();
                let Some(slot) = state.idle.pop_front() else {
                    break;
                };
                let expired = slot.idle_since.elapsed() >= self.config.idle_timeout;
                // the popped slot is no longer counted by total()
                if expired && state.total() >= self.config.min_connections {
                    state.notify_capacity();
                    Err(slot)
                } else {
                    state.pending += 1;
                    Ok(slot)
                }
            };

            let mut slot = match candidate {
                Ok(slot) => slot,
                Err(slot) => {
                    debug!(slot_id = slot.id, "Retiring idle connection");
                    self.destroy(slot, "idle timeout").await;
                    continue;
                }
            };

            let reservation = PendingReservation::taken(self, 1);
            let healthy = self.check_slot(&mut slot).await;
            let rejected = {
                let mut state = self.state.lock();
                reservation.settle(&mut state);
                if self.is_closed() {
                    Some((slot, "pool closed"))
                } else if healthy {
                    state.return_slot(slot);
                    None
                } else {
                    state.notify_capacity();
                    Some((slot, "unhealthy"))
                }
            };
            if let Some((slot, reason)) = rejected {
                if reason == "unhealthy" {
                    warn!(slot_id = slot.id, "Idle connection failed health check, destroying");
                }
                self.destroy(slot, reason).await;
            }
        }

        self.replenish().await;
    }

    /// Create slots until the pool holds `min_connections`. Stops quietly on error.
    async fn replenish(&self) {
        loop {
            {
                let mut state = self.state.lock();
                if self.is_closed() || state.total() >= self.config.min_connections {
                    return;
                }
                state.pending += 1;
            }

            let reservation = PendingReservation::taken(self, 1);
            match self.open_slot().await {
                Ok(slot) => {
                    let rejected = {
                        let mut state = self.state.lock();
                        reservation.settle(&mut state);
                        if self.is_closed() {
                            Some(slot)
                        } else {
                            state.return_slot(slot);
                            None
                        }
                    };
                    if let Some(slot) = rejected {
                        self.destroy(slot, "pool closed").await;
                        return;
                    }
                }
                Err(e) => {
                    drop(reservation);
                    warn!(error = %e, "Could not replenish pool, retrying on next reap");
                    return;
                }
            }
        }
    }

    fn spawn_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self.config.reap_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // first tick completes immediately
            interval.tick().await;

            loop {
                interval.tick().await;

                // Exit once the pool is gone
                let Some(inner) = weak.upgrade() else {
                    debug!("Connection pool dropped, reaper exiting");
                    return;
                };
                if inner.is_closed() {
                    return;
                }
                inner.reap().await;
            }
        })
    }
}

/// A bounded pool of database connections.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Create a pool. No connection is opened until [`ConnectionPool::initialize`].
    pub fn new(
        config: PoolConfig,
        factory: Arc<dyn ConnectionFactory>,
        profiler: Arc<QueryProfiler>,
    ) -> DbResult<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(PoolInner {
                config,
                factory,
                profiler,
                state: Mutex::new(PoolState::default()),
                initialized: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                init_lock: tokio::sync::Mutex::new(()),
                reaper: Mutex::new(None),
                next_slot_id: AtomicU64::new(1),
                metrics: MetricsCounters::default(),
            }),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn profiler(&self) -> &Arc<QueryProfiler> {
        &self.inner.profiler
    }

    /// Open `min_connections` slots and start the reaper.
    ///
    /// Fails as a whole, closing whatever it opened, if any connection cannot be
    /// established. Calling it again after success is a no-op.
    pub async fn initialize(&self) -> DbResult<()> {
        let inner = &self.inner;
        let _guard = inner.init_lock.lock().await;
        if inner.is_closed() {
            return Err(DbError::PoolClosed);
        }
        if inner.initialized.load(Ordering::Acquire) {
            debug!("Connection pool already initialized");
            return Ok(());
        }

        let min = inner.config.min_connections;
        inner.state.lock().pending += min;
        let reservation = PendingReservation::taken(inner, min);
        let results = join_all((0..min).map(|_| inner.open_slot())).await;

        let mut opened = Vec::with_capacity(results.len());
        let mut first_error = None;
        for result in results {
            match result {
                Ok(slot) => opened.push(slot),
                Err(e) if first_error.is_none() => first_error = Some(e),
                Err(_) => {}
            }
        }

        if let Some(err) = first_error {
            drop(reservation);
            warn!(
                opened = opened.len(),
                min_connections = min,
                error = %err,
                "Pool initialization failed, closing opened connections"
            );
            join_all(opened.into_iter().map(|s| inner.destroy(s, "initialization failed"))).await;
            return Err(err);
        }

        {
            let mut state = inner.state.lock();
            reservation.settle(&mut state);
            for slot in opened {
                state.return_slot(slot);
            }
        }
        inner.initialized.store(true, Ordering::Release);
        *inner.reaper.lock() = Some(inner.spawn_reaper());

        info!(
            min_connections = min,
            max_connections = inner.config.max_connections,
            "Connection pool initialized"
        );
        Ok(())
    }

    /// Check out a healthy connection, waiting up to `acquire_timeout` at capacity.
    pub async fn get_connection(&self) -> DbResult<PooledConnection> {
        let result = self.acquire().await;
        match &result {
            Ok(_) => MetricsCounters::incr(&self.inner.metrics.checkouts),
            Err(_) => MetricsCounters::incr(&self.inner.metrics.checkout_failures),
        }
        result
    }

    async fn acquire(&self) -> DbResult<PooledConnection> {
        let inner = &self.inner;
        let started = tokio::time::Instant::now();
        let deadline = started + inner.config.acquire_timeout;

        loop {
            if inner.is_closed() {
                return Err(DbError::PoolClosed);
            }

            match inner.next_step() {
                Step::Idle(slot) => {
                    // checked out first so an abandoned acquire still returns it
                    let mut conn = self.checkout(slot);
                    let healthy = match conn.slot.as_mut() {
                        Some(slot) => inner.check_slot(slot).await,
                        None => false,
                    };
                    if healthy {
                        return Ok(conn);
                    }
                    if let Some(slot) = conn.slot.take() {
                        warn!(slot_id = slot.id, "Idle connection failed health check, destroying");
                        inner.discard_active(slot, "unhealthy").await;
                    }
                }
                Step::Create => {
                    // given back on failure or if this future is dropped
                    let reservation = PendingReservation::taken(inner, 1);
                    let slot = inner.open_slot().await?;
                    let rejected = {
                        let mut state = inner.state.lock();
                        reservation.settle(&mut state);
                        if inner.is_closed() {
                            Some(slot)
                        } else {
                            state.active.insert(slot.id);
                            return Ok(self.checkout(slot));
                        }
                    };
                    if let Some(slot) = rejected {
                        inner.destroy(slot, "pool closed").await;
                    }
                    return Err(DbError::PoolClosed);
                }
                Step::Wait(mut rx) => match tokio::time::timeout_at(deadline, &mut rx).await {
                    Ok(Ok(Some(slot))) => return Ok(self.checkout(slot)),
                    // capacity freed; go around again
                    Ok(Ok(None)) => continue,
                    Ok(Err(_)) => return Err(DbError::PoolClosed),
                    Err(_) => {
                        let reclaimed = inner.state.lock().abandon_wait(rx);
                        if let Some(slot) = reclaimed {
                            return Ok(self.checkout(slot));
                        }
                        MetricsCounters::incr(&inner.metrics.acquire_timeouts);
                        let waited = started.elapsed();
                        debug!(waited_ms = waited.as_millis() as u64, "Connection acquire timed out");
                        return Err(DbError::acquire_timeout(waited));
                    }
                },
            }
        }
    }

    fn checkout(&self, slot: Slot) -> PooledConnection {
        debug!(slot_id = slot.id, "Connection checked out");
        PooledConnection {
            slot: Some(slot),
            pool: Arc::clone(&self.inner),
        }
    }

    /// Return a connection to the pool, destroying it if unhealthy.
    pub async fn release_connection(&self, conn: PooledConnection) {
        conn.release().await;
    }

    /// Stop the reaper, fail all waiters and disconnect idle slots. Idempotent.
    ///
    /// Connections checked out at this point are disconnected when released.
    pub async fn close_all_connections(&self) {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(reaper) = inner.reaper.lock().take() {
            reaper.abort();
        }

        let (idle, outstanding) = {
            let mut state = inner.state.lock();
            // dropping the senders fails every waiter with PoolClosed
            state.waiters.clear();
            let idle: Vec<Slot> = state.idle.drain(..).collect();
            let outstanding = state.active.len();
            state.active.clear();
            (idle, outstanding)
        };

        let closing = idle.len();
        join_all(idle.into_iter().map(|s| inner.destroy(s, "pool closed"))).await;
        info!(
            closed = closing,
            checked_out = outstanding,
            "Connection pool closed"
        );
    }

    /// Initialized, not closed and holding at least `min_connections`.
    pub fn is_healthy(&self) -> bool {
        let inner = &self.inner;
        inner.initialized.load(Ordering::Acquire)
            && !inner.is_closed()
            && inner.state.lock().total() >= inner.config.min_connections
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        PoolStats {
            total: state.total(),
            active: state.active.len() as u32,
            idle: state.idle.len() as u32,
            pending: state.pending,
            waiting: state.waiters.iter().filter(|w| !w.is_closed()).count() as u32,
            min_connections: self.inner.config.min_connections,
            max_connections: self.inner.config.max_connections,
        }
    }

    pub fn metrics(&self) -> PoolMetrics {
        self.inner.metrics.snapshot()
    }

    /// Run one reaper pass now.
    pub async fn reap_now(&self) {
        if !self.inner.is_closed() {
            self.inner.reap().await;
        }
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

/// A checked-out connection.
///
/// Statements issued through it are profiled. Dropping it without calling
/// [`PooledConnection::release`] returns it to the pool from a background task.
pub struct PooledConnection {
    slot: Option<Slot>,
    pool: Arc<PoolInner>,
}

impl PooledConnection {
    fn slot_mut(&mut self) -> DbResult<&mut Slot> {
        self.slot
            .as_mut()
            .ok_or_else(|| DbError::internal("Connection already released"))
    }

    pub fn id(&self) -> u64 {
        self.slot.as_ref().map(|s| s.id).unwrap_or_default()
    }

    pub fn backend(&self) -> Option<DatabaseType> {
        self.slot.as_ref().map(|s| s.client.backend())
    }

    /// Flag the connection so the pool destroys it on release.
    pub fn mark_unhealthy(&mut self) {
        if let Some(slot) = self.slot.as_mut() {
            slot.healthy = false;
        }
    }

    fn observe_error(slot: &mut Slot, err: &DbError) {
        if err.is_connection_broken() {
            warn!(slot_id = slot.id, error = %err, "Connection broken, will be destroyed on release");
            slot.healthy = false;
        }
    }

    pub async fn execute(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<StatementResult> {
        let profiler = Arc::clone(&self.pool.profiler);
        let slot = self.slot_mut()?;
        let handle = profiler.start_profile(sql, params);
        let result = slot.client.execute(sql, params).await;
        match &result {
            Ok(r) => profiler.end_profile(handle, ProfileOutcome::Executed(r)),
            Err(e) => {
                profiler.end_profile(handle, ProfileOutcome::Failed(e));
                Self::observe_error(slot, e);
            }
        }
        result
    }

    pub async fn fetch_all(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<Vec<Row>> {
        let profiler = Arc::clone(&self.pool.profiler);
        let slot = self.slot_mut()?;
        let handle = profiler.start_profile(sql, params);
        let result = slot.client.fetch_all(sql, params).await;
        match &result {
            Ok(rows) => profiler.end_profile(handle, ProfileOutcome::Fetched(rows.len())),
            Err(e) => {
                profiler.end_profile(handle, ProfileOutcome::Failed(e));
                Self::observe_error(slot, e);
            }
        }
        result
    }

    pub async fn fetch_optional(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<Option<Row>> {
        Ok(self.fetch_all(sql, params).await?.into_iter().next())
    }

    pub async fn query_as<T: FromRow>(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<Vec<T>> {
        self.fetch_all(sql, params)
            .await?
            .iter()
            .map(T::from_row)
            .collect()
    }

    /// Timed round trip.
    pub async fn ping(&mut self) -> DbResult<Duration> {
        let slot = self.slot_mut()?;
        let started = Instant::now();
        let result = slot.client.ping().await;
        if let Err(e) = &result {
            Self::observe_error(slot, e);
        }
        result.map(|()| started.elapsed())
    }

    pub(crate) async fn activity(&mut self, application_name: &str) -> DbResult<Option<EngineActivity>> {
        self.slot_mut()?.client.activity(application_name).await
    }

    /// Return the connection to the pool now.
    pub async fn release(mut self) {
        let pool = Arc::clone(&self.pool);
        // the slot stays guarded by `self` until its health is known
        if let Some(slot) = self.slot.as_mut() {
            if slot.healthy && !pool.is_closed() {
                pool.check_slot(slot).await;
            }
        }
        if let Some(slot) = self.slot.take() {
            pool.return_checked(slot).await;
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(slot) = self.slot.take() else {
            return;
        };
        let pool = Arc::clone(&self.pool);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { pool.release(slot).await });
            }
            Err(_) => {
                // No runtime to close it on; drop the client and free the slot
                warn!(slot_id = slot.id, "Connection dropped outside a runtime, discarding");
                let mut state = pool.state.lock();
                state.active.remove(&slot.id);
                state.notify_capacity();
                MetricsCounters::incr(&pool.metrics.connections_closed);
            }
        }
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("slot_id", &self.id())
            .field("released", &self.slot.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(total: u32, active: u32) -> PoolStats {
        PoolStats {
            total,
            active,
            ..PoolStats::default()
        }
    }

    #[test]
    fn test_utilization() {
        assert_eq!(stats(0, 0).utilization(), 0.0);
        assert_eq!(stats(4, 1).utilization(), 0.25);
        assert_eq!(stats(2, 2).utilization(), 1.0);
    }

    #[test]
    fn test_notify_capacity_skips_dead_waiters() {
        let mut state = PoolState::default();
        let (dead_tx, dead_rx) = oneshot::channel();
        drop(dead_rx);
        let (live_tx, mut live_rx) = oneshot::channel();
        state.waiters.push_back(dead_tx);
        state.waiters.push_back(live_tx);

        state.notify_capacity();

        assert!(state.waiters.is_empty());
        assert!(matches!(live_rx.try_recv(), Ok(None)));
    }

    #[test]
    fn test_timed_out_waiter_forwards_capacity_wakeup() {
        let mut state = PoolState::default();
        let (first_tx, first_rx) = oneshot::channel();
        let (next_tx, mut next_rx) = oneshot::channel();
        state.waiters.push_back(first_tx);
        state.waiters.push_back(next_tx);

        // capacity freed just as the first waiter's deadline passed
        state.notify_capacity();
        assert!(state.abandon_wait(first_rx).is_none());

        assert!(state.waiters.is_empty());
        assert!(matches!(next_rx.try_recv(), Ok(None)));
    }

    #[test]
    fn test_abandoned_wait_without_wakeup_leaves_queue_alone() {
        let mut state = PoolState::default();
        let (first_tx, first_rx) = oneshot::channel();
        let (next_tx, mut next_rx) = oneshot::channel();
        state.waiters.push_back(first_tx);
        state.waiters.push_back(next_tx);

        assert!(state.abandon_wait(first_rx).is_none());

        // the closed sender is skipped later; the live waiter is not woken
        assert_eq!(state.waiters.len(), 2);
        assert!(next_rx.try_recv().is_err());
    }
}
