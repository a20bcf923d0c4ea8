//! Per-statement profiling.
//!
//! Every statement issued through a pooled connection is bracketed by
//! [`QueryProfiler::start_profile`] and [`QueryProfiler::end_profile`]. Finished
//! profiles live in a bounded ring buffer and are aggregated on demand.

use crate::config::ProfilerConfig;
use crate::error::DbError;
use crate::models::{QueryParam, StatementResult};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::warn;

/// Maximum length of recorded statement text.
const MAX_SQL_LENGTH: usize = 2048;

/// Maximum length of each recorded parameter.
const MAX_PARAM_LENGTH: usize = 100;

/// In-flight measurement returned by [`QueryProfiler::start_profile`].
///
/// Inert when the profiler is disabled.
#[derive(Debug)]
pub struct ProfileHandle {
    inner: Option<HandleInner>,
}

#[derive(Debug)]
struct HandleInner {
    id: u64,
    sql: String,
    operation: &'static str,
    params: Vec<String>,
    started: Instant,
    started_at: DateTime<Utc>,
    stack: Vec<String>,
}

impl ProfileHandle {
    pub fn id(&self) -> Option<u64> {
        self.inner.as_ref().map(|h| h.id)
    }

    pub fn is_inert(&self) -> bool {
        self.inner.is_none()
    }
}

/// How a profiled statement ended.
#[derive(Debug, Clone, Copy)]
pub enum ProfileOutcome<'a> {
    Executed(&'a StatementResult),
    Fetched(usize),
    Failed(&'a DbError),
}

/// One finished statement.
#[derive(Debug, Clone, Serialize)]
pub struct QueryProfile {
    pub id: u64,
    /// Sanitized and truncated
    pub sql: String,
    pub operation: &'static str,
    pub params: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_returned: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub slow: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stack: Vec<String>,
}

/// Per-operation aggregate.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OperationStats {
    pub count: usize,
    pub failed: usize,
    pub avg_duration_ms: f64,
}

/// Aggregate over the retained history.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfileStats {
    pub total_queries: usize,
    pub failed_queries: usize,
    pub slow_queries: usize,
    pub avg_duration_ms: f64,
    pub max_duration_ms: f64,
    pub p95_duration_ms: f64,
    pub by_operation: BTreeMap<String, OperationStats>,
}

#[derive(Debug)]
pub struct QueryProfiler {
    config: ProfilerConfig,
    next_id: AtomicU64,
    history: Mutex<VecDeque<QueryProfile>>,
}

impl QueryProfiler {
    pub fn new(config: ProfilerConfig) -> Self {
        let capacity = config.max_history.min(4096);
        Self {
            config,
            next_id: AtomicU64::new(1),
            history: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn disabled() -> Self {
        Self::new(ProfilerConfig::disabled())
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    pub fn start_profile(&self, sql: &str, params: &[QueryParam]) -> ProfileHandle {
        if !self.config.enabled {
            return ProfileHandle { inner: None };
        }

        ProfileHandle {
            inner: Some(HandleInner {
                id: self.next_id.fetch_add(1, Ordering::Relaxed),
                sql: truncate_string(&sanitize_sql(sql, "?"), MAX_SQL_LENGTH),
                operation: extract_operation(sql),
                params: params.iter().map(|p| p.preview(MAX_PARAM_LENGTH)).collect(),
                started: Instant::now(),
                started_at: Utc::now(),
                stack: capture_stack(self.config.max_stack_depth),
            }),
        }
    }

    pub fn end_profile(&self, handle: ProfileHandle, outcome: ProfileOutcome<'_>) {
        let Some(h) = handle.inner else {
            return;
        };

        let elapsed = h.started.elapsed();
        let duration_ms = elapsed.as_secs_f64() * 1000.0;
        let slow = elapsed >= self.config.slow_query_threshold;

        let (rows_affected, rows_returned, error) = match outcome {
            ProfileOutcome::Executed(result) => (Some(result.rows_affected), None, None),
            ProfileOutcome::Fetched(count) => (None, Some(count), None),
            ProfileOutcome::Failed(err) => (None, None, Some(err.to_string())),
        };

        let profile = QueryProfile {
            id: h.id,
            sql: h.sql,
            operation: h.operation,
            params: h.params,
            started_at: h.started_at,
            ended_at: Utc::now(),
            duration_ms,
            rows_affected,
            rows_returned,
            error,
            slow,
            stack: h.stack,
        };

        if let Some(err) = &profile.error {
            warn!(
                profile_id = profile.id,
                operation = profile.operation,
                duration_ms = profile.duration_ms,
                sql = %profile.sql,
                error = %err,
                "Statement failed"
            );
        } else if slow {
            warn!(
                profile_id = profile.id,
                operation = profile.operation,
                duration_ms = profile.duration_ms,
                threshold_ms = self.config.slow_query_threshold.as_millis() as u64,
                sql = %profile.sql,
                "Slow query"
            );
        }

        if self.config.max_history == 0 {
            return;
        }
        let mut history = self.history.lock();
        while history.len() >= self.config.max_history {
            history.pop_front();
        }
        history.push_back(profile);
    }

    /// Snapshot of retained profiles, oldest first.
    pub fn profiles(&self) -> Vec<QueryProfile> {
        self.history.lock().iter().cloned().collect()
    }

    pub fn stats(&self) -> ProfileStats {
        let history = self.history.lock();
        if history.is_empty() {
            return ProfileStats::default();
        }

        let mut durations: Vec<f64> = history.iter().map(|p| p.duration_ms).collect();
        durations.sort_by(|a, b| a.total_cmp(b));
        let total: f64 = durations.iter().sum();
        let p95_idx = ((durations.len() as f64 * 0.95).ceil() as usize).saturating_sub(1);

        let mut by_operation: BTreeMap<String, OperationStats> = BTreeMap::new();
        for p in history.iter() {
            let entry = by_operation.entry(p.operation.to_string()).or_default();
            // running mean
            entry.count += 1;
            entry.avg_duration_ms += (p.duration_ms - entry.avg_duration_ms) / entry.count as f64;
            if p.error.is_some() {
                entry.failed += 1;
            }
        }

        ProfileStats {
            total_queries: history.len(),
            failed_queries: history.iter().filter(|p| p.error.is_some()).count(),
            slow_queries: history.iter().filter(|p| p.slow).count(),
            avg_duration_ms: total / durations.len() as f64,
            max_duration_ms: durations.last().copied().unwrap_or_default(),
            p95_duration_ms: durations[p95_idx.min(durations.len() - 1)],
            by_operation,
        }
    }

    /// Slow statements, slowest first.
    pub fn slow_queries(&self, limit: usize) -> Vec<QueryProfile> {
        let mut slow: Vec<QueryProfile> = self
            .history
            .lock()
            .iter()
            .filter(|p| p.slow)
            .cloned()
            .collect();
        slow.sort_by(|a, b| b.duration_ms.total_cmp(&a.duration_ms));
        slow.truncate(limit);
        slow
    }

    pub fn export_stats(&self) -> serde_json::Value {
        serde_json::json!({
            "generated_at": Utc::now(),
            "enabled": self.config.enabled,
            "slow_query_threshold_ms": self.config.slow_query_threshold.as_millis() as u64,
            "max_history": self.config.max_history,
            "stats": self.stats(),
            "slow_queries": self.slow_queries(10),
        })
    }

    pub fn clear_stats(&self) {
        self.history.lock().clear();
    }
}

impl Default for QueryProfiler {
    fn default() -> Self {
        Self::new(ProfilerConfig::default())
    }
}

/// Frames of the current call stack, when backtraces are enabled for the process.
fn capture_stack(depth: usize) -> Vec<String> {
    if depth == 0 {
        return Vec::new();
    }
    let bt = Backtrace::capture();
    if bt.status() != BacktraceStatus::Captured {
        return Vec::new();
    }
    bt.to_string()
        .lines()
        .map(str::trim)
        .filter(|l| l.split(':').next().is_some_and(|n| n.parse::<usize>().is_ok()))
        .take(depth)
        .map(String::from)
        .collect()
}

/// Replace string and numeric literals with a placeholder.
///
/// Double quotes delimit identifiers, not literals, and `$n` bind markers are kept.
pub fn sanitize_sql(sql: &str, placeholder: &str) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if in_string {
            if c == '\'' {
                // Check for escaped quote
                if chars.peek() == Some(&'\'') {
                    chars.next();
                    continue;
                }
                in_string = false;
                result.push_str(placeholder);
            }
            continue;
        }

        if c == '\'' {
            in_string = true;
            continue;
        }

        if c.is_ascii_digit()
            && !result.ends_with(|ch: char| ch.is_alphanumeric() || ch == '_' || ch == '$')
        {
            while chars
                .peek()
                .is_some_and(|ch| ch.is_ascii_digit() || *ch == '.')
            {
                chars.next();
            }
            result.push_str(placeholder);
            continue;
        }

        result.push(c);
    }

    // Unterminated literal
    if in_string {
        result.push_str(placeholder);
    }

    result
}

/// Truncate a string to at most `max_len` characters.
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

/// Extract the operation type from a SQL statement.
pub fn extract_operation(sql: &str) -> &'static str {
    let sql_upper = sql.trim_start().to_uppercase();

    if sql_upper.starts_with("SELECT") || sql_upper.starts_with("WITH") {
        "SELECT"
    } else if sql_upper.starts_with("INSERT") {
        "INSERT"
    } else if sql_upper.starts_with("UPDATE") {
        "UPDATE"
    } else if sql_upper.starts_with("DELETE") {
        "DELETE"
    } else if sql_upper.starts_with("BEGIN") || sql_upper.starts_with("START TRANSACTION") {
        "BEGIN"
    } else if sql_upper.starts_with("COMMIT") {
        "COMMIT"
    } else if sql_upper.starts_with("ROLLBACK TO") {
        "ROLLBACK TO SAVEPOINT"
    } else if sql_upper.starts_with("ROLLBACK") {
        "ROLLBACK"
    } else if sql_upper.starts_with("SAVEPOINT") {
        "SAVEPOINT"
    } else if sql_upper.starts_with("RELEASE") {
        "RELEASE SAVEPOINT"
    } else if sql_upper.starts_with("SET") {
        "SET"
    } else if sql_upper.starts_with("CREATE") {
        "CREATE"
    } else if sql_upper.starts_with("ALTER") {
        "ALTER"
    } else if sql_upper.starts_with("DROP") {
        "DROP"
    } else {
        "OTHER"
    }
}
