//! Configuration handling for the taskflow database core.
//!
//! Library consumers build [`Settings`] from environment-style key/value pairs;
//! the binary parses the same keys through `clap` (flags with env fallbacks).

use crate::error::{DbError, DbResult};
use clap::Parser;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_APPLICATION_NAME: &str = "taskflow";

// Pool configuration defaults
pub const DEFAULT_MIN_CONNECTIONS: u32 = 2;
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_REAP_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_CREATE_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_DESTROY_TIMEOUT_MS: u64 = 5_000;

// Health monitor defaults
pub const DEFAULT_HEALTH_CHECK_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_HEALTH_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_HEALTH_MAX_LATENCY_MS: u64 = 1_000;
pub const DEFAULT_HEALTH_MAX_ERROR_RATE: f64 = 0.1;
pub const DEFAULT_HEALTH_MAX_POOL_UTILIZATION: f64 = 0.9;

// Profiler defaults
pub const DEFAULT_SLOW_QUERY_THRESHOLD_MS: u64 = 1_000;
pub const DEFAULT_MAX_PROFILE_HISTORY: usize = 1_000;

// Transaction defaults
pub const DEFAULT_TXN_MAX_RETRIES: u32 = 0;
pub const DEFAULT_TXN_RETRY_BACKOFF_MS: u64 = 100;

/// Connection pool sizing and timing. Immutable once the pool is built.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    pub min_connections: u32,
    pub max_connections: u32,
    /// How long `get_connection` waits before failing
    pub acquire_timeout: Duration,
    /// Idle slots older than this are retired by the reaper while above the minimum
    pub idle_timeout: Duration,
    pub reap_interval: Duration,
    /// Bounds connection creation and per-slot health checks
    pub create_timeout: Duration,
    pub destroy_timeout: Duration,
}

impl PoolConfig {
    /// Create a configuration with the given bounds and default timings.
    pub fn new(min_connections: u32, max_connections: u32) -> Self {
        Self {
            min_connections,
            max_connections,
            ..Self::default()
        }
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval;
        self
    }

    pub fn with_create_timeout(mut self, timeout: Duration) -> Self {
        self.create_timeout = timeout;
        self
    }

    pub fn with_destroy_timeout(mut self, timeout: Duration) -> Self {
        self.destroy_timeout = timeout;
        self
    }

    /// Validate pool options.
    pub fn validate(&self) -> DbResult<()> {
        if self.max_connections == 0 {
            return Err(DbError::config("max_connections must be greater than 0"));
        }
        if self.min_connections > self.max_connections {
            return Err(DbError::config(format!(
                "min_connections ({}) cannot exceed max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }
        for (name, value) in [
            ("acquire_timeout", self.acquire_timeout),
            ("reap_interval", self.reap_interval),
            ("create_timeout", self.create_timeout),
            ("destroy_timeout", self.destroy_timeout),
        ] {
            if value.is_zero() {
                return Err(DbError::config(format!("{} must be greater than 0", name)));
            }
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: DEFAULT_MIN_CONNECTIONS,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: Duration::from_millis(DEFAULT_ACQUIRE_TIMEOUT_MS),
            idle_timeout: Duration::from_millis(DEFAULT_IDLE_TIMEOUT_MS),
            reap_interval: Duration::from_millis(DEFAULT_REAP_INTERVAL_MS),
            create_timeout: Duration::from_millis(DEFAULT_CREATE_TIMEOUT_MS),
            destroy_timeout: Duration::from_millis(DEFAULT_DESTROY_TIMEOUT_MS),
        }
    }
}

/// Health monitor thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthConfig {
    pub check_interval: Duration,
    /// Upper bound for one whole check, connection acquisition included
    pub timeout: Duration,
    pub max_latency: Duration,
    /// Fraction of failed checks over the last five minutes
    pub max_error_rate: f64,
    /// Fraction of slots checked out
    pub max_pool_utilization: f64,
}

impl HealthConfig {
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_latency(mut self, max_latency: Duration) -> Self {
        self.max_latency = max_latency;
        self
    }

    pub fn with_max_error_rate(mut self, rate: f64) -> Self {
        self.max_error_rate = rate;
        self
    }

    pub fn with_max_pool_utilization(mut self, utilization: f64) -> Self {
        self.max_pool_utilization = utilization;
        self
    }

    /// Number of latency samples that cover one hour at the configured interval.
    pub fn history_capacity(&self) -> usize {
        let interval_ms = self.check_interval.as_millis().max(1);
        (3_600_000 / interval_ms).max(1) as usize
    }

    pub fn validate(&self) -> DbResult<()> {
        if self.check_interval.is_zero() || self.timeout.is_zero() {
            return Err(DbError::config(
                "health check_interval and timeout must be greater than 0",
            ));
        }
        for (name, value) in [
            ("max_error_rate", self.max_error_rate),
            ("max_pool_utilization", self.max_pool_utilization),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(DbError::config(format!(
                    "{} must be between 0 and 1 (got {})",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_millis(DEFAULT_HEALTH_CHECK_INTERVAL_MS),
            timeout: Duration::from_millis(DEFAULT_HEALTH_TIMEOUT_MS),
            max_latency: Duration::from_millis(DEFAULT_HEALTH_MAX_LATENCY_MS),
            max_error_rate: DEFAULT_HEALTH_MAX_ERROR_RATE,
            max_pool_utilization: DEFAULT_HEALTH_MAX_POOL_UTILIZATION,
        }
    }
}

/// Query profiler settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfilerConfig {
    pub enabled: bool,
    pub slow_query_threshold: Duration,
    pub max_history: usize,
    /// Frames kept from a captured call stack
    pub max_stack_depth: usize,
}

impl ProfilerConfig {
    /// A profiler that records nothing.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn with_slow_query_threshold(mut self, threshold: Duration) -> Self {
        self.slow_query_threshold = threshold;
        self
    }

    pub fn with_max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history;
        self
    }
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            slow_query_threshold: Duration::from_millis(DEFAULT_SLOW_QUERY_THRESHOLD_MS),
            max_history: DEFAULT_MAX_PROFILE_HISTORY,
            max_stack_depth: 10,
        }
    }
}

/// Transaction coordinator settings.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionConfig {
    /// Extra attempts for work that failed with a retryable engine error
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_TXN_MAX_RETRIES,
            retry_backoff: Duration::from_millis(DEFAULT_TXN_RETRY_BACKOFF_MS),
        }
    }
}

/// Everything needed to build a [`crate::Database`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    /// Connection URL (sensitive - not logged)
    pub database_url: Option<String>,
    pub application_name: Option<String>,
    pub pool: PoolConfig,
    pub health: HealthConfig,
    pub profiler: ProfilerConfig,
    pub transaction: TransactionConfig,
}

impl Settings {
    /// Keys understood by [`Settings::from_pairs`].
    pub const KEYS: &'static [&'static str] = &[
        "DATABASE_URL",
        "DB_APPLICATION_NAME",
        "DB_POOL_MIN",
        "DB_POOL_MAX",
        "DB_POOL_ACQUIRE_TIMEOUT_MS",
        "DB_POOL_IDLE_TIMEOUT_MS",
        "DB_POOL_REAP_INTERVAL_MS",
        "DB_POOL_CREATE_TIMEOUT_MS",
        "DB_POOL_DESTROY_TIMEOUT_MS",
        "DB_HEALTH_CHECK_INTERVAL_MS",
        "DB_HEALTH_TIMEOUT_MS",
        "DB_HEALTH_MAX_LATENCY_MS",
        "DB_HEALTH_MAX_ERROR_RATE",
        "DB_HEALTH_MAX_POOL_UTILIZATION",
        "DB_PROFILER_SLOW_QUERY_MS",
        "DB_PROFILER_MAX_HISTORY",
        "DB_PROFILER_ENABLED",
        "DB_TXN_MAX_RETRIES",
        "DB_TXN_RETRY_BACKOFF_MS",
    ];

    /// Build settings from environment-style key/value input.
    ///
    /// Unknown keys are ignored so a whole process environment can be passed in.
    /// Missing keys keep their defaults.
    pub fn from_pairs<I, K, V>(pairs: I) -> DbResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut opts: HashMap<String, String> = pairs
            .into_iter()
            .filter_map(|(k, v)| {
                let key = k.as_ref().to_ascii_uppercase();
                Self::KEYS
                    .contains(&key.as_str())
                    .then(|| (key, v.into()))
            })
            .collect();

        let mut settings = Settings {
            database_url: opts.remove("DATABASE_URL"),
            application_name: opts.remove("DB_APPLICATION_NAME"),
            ..Settings::default()
        };

        let pool = &mut settings.pool;
        set(&mut opts, "DB_POOL_MIN", &mut pool.min_connections)?;
        set(&mut opts, "DB_POOL_MAX", &mut pool.max_connections)?;
        set_ms(&mut opts, "DB_POOL_ACQUIRE_TIMEOUT_MS", &mut pool.acquire_timeout)?;
        set_ms(&mut opts, "DB_POOL_IDLE_TIMEOUT_MS", &mut pool.idle_timeout)?;
        set_ms(&mut opts, "DB_POOL_REAP_INTERVAL_MS", &mut pool.reap_interval)?;
        set_ms(&mut opts, "DB_POOL_CREATE_TIMEOUT_MS", &mut pool.create_timeout)?;
        set_ms(&mut opts, "DB_POOL_DESTROY_TIMEOUT_MS", &mut pool.destroy_timeout)?;

        let health = &mut settings.health;
        set_ms(&mut opts, "DB_HEALTH_CHECK_INTERVAL_MS", &mut health.check_interval)?;
        set_ms(&mut opts, "DB_HEALTH_TIMEOUT_MS", &mut health.timeout)?;
        set_ms(&mut opts, "DB_HEALTH_MAX_LATENCY_MS", &mut health.max_latency)?;
        set(&mut opts, "DB_HEALTH_MAX_ERROR_RATE", &mut health.max_error_rate)?;
        set(
            &mut opts,
            "DB_HEALTH_MAX_POOL_UTILIZATION",
            &mut health.max_pool_utilization,
        )?;

        let profiler = &mut settings.profiler;
        set_ms(
            &mut opts,
            "DB_PROFILER_SLOW_QUERY_MS",
            &mut profiler.slow_query_threshold,
        )?;
        set(&mut opts, "DB_PROFILER_MAX_HISTORY", &mut profiler.max_history)?;
        if let Some(v) = opts.remove("DB_PROFILER_ENABLED") {
            profiler.enabled = parse_bool("DB_PROFILER_ENABLED", &v)?;
        }

        let transaction = &mut settings.transaction;
        set(&mut opts, "DB_TXN_MAX_RETRIES", &mut transaction.max_retries)?;
        set_ms(
            &mut opts,
            "DB_TXN_RETRY_BACKOFF_MS",
            &mut transaction.retry_backoff,
        )?;

        settings.validate()?;
        Ok(settings)
    }

    /// Build settings from the process environment.
    pub fn from_env() -> DbResult<Self> {
        Self::from_pairs(std::env::vars())
    }

    pub fn validate(&self) -> DbResult<()> {
        self.pool.validate()?;
        self.health.validate()
    }

    /// Application name reported to the engine.
    pub fn application_name(&self) -> &str {
        self.application_name
            .as_deref()
            .unwrap_or(DEFAULT_APPLICATION_NAME)
    }
}

fn set<T: FromStr>(opts: &mut HashMap<String, String>, key: &str, target: &mut T) -> DbResult<()> {
    if let Some(raw) = opts.remove(key) {
        *target = raw
            .trim()
            .parse()
            .map_err(|_| DbError::config(format!("{}: invalid value '{}'", key, raw)))?;
    }
    Ok(())
}

fn set_ms(opts: &mut HashMap<String, String>, key: &str, target: &mut Duration) -> DbResult<()> {
    let mut millis = target.as_millis() as u64;
    set(opts, key, &mut millis)?;
    *target = Duration::from_millis(millis);
    Ok(())
}

fn parse_bool(key: &str, raw: &str) -> DbResult<bool> {
    let v = raw.trim();
    if v.eq_ignore_ascii_case("true") || v == "1" {
        Ok(true)
    } else if v.eq_ignore_ascii_case("false") || v == "0" {
        Ok(false)
    } else {
        Err(DbError::config(format!("{}: invalid value '{}'", key, raw)))
    }
}

/// Configuration for the taskflow-db binary.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "taskflow-db",
    about = "Connection pool health probe and monitor for the taskflow backend",
    version,
    author
)]
pub struct Config {
    /// Database connection URL (postgres://, mysql:// or sqlite:)
    #[arg(short = 'd', long = "database-url", value_name = "URL", env = "DATABASE_URL")]
    pub database_url: String,

    /// Application name reported to the database engine
    #[arg(long, default_value = DEFAULT_APPLICATION_NAME, env = "DB_APPLICATION_NAME")]
    pub application_name: String,

    /// Minimum number of pooled connections
    #[arg(long, default_value_t = DEFAULT_MIN_CONNECTIONS, env = "DB_POOL_MIN")]
    pub pool_min: u32,

    /// Maximum number of pooled connections
    #[arg(long, default_value_t = DEFAULT_MAX_CONNECTIONS, env = "DB_POOL_MAX")]
    pub pool_max: u32,

    /// Connection acquire timeout in milliseconds
    #[arg(long, default_value_t = DEFAULT_ACQUIRE_TIMEOUT_MS, env = "DB_POOL_ACQUIRE_TIMEOUT_MS")]
    pub acquire_timeout_ms: u64,

    /// Idle connection timeout in milliseconds
    #[arg(long, default_value_t = DEFAULT_IDLE_TIMEOUT_MS, env = "DB_POOL_IDLE_TIMEOUT_MS")]
    pub idle_timeout_ms: u64,

    /// Reaper interval in milliseconds
    #[arg(long, default_value_t = DEFAULT_REAP_INTERVAL_MS, env = "DB_POOL_REAP_INTERVAL_MS")]
    pub reap_interval_ms: u64,

    /// Connection creation timeout in milliseconds
    #[arg(long, default_value_t = DEFAULT_CREATE_TIMEOUT_MS, env = "DB_POOL_CREATE_TIMEOUT_MS")]
    pub create_timeout_ms: u64,

    /// Connection teardown timeout in milliseconds
    #[arg(long, default_value_t = DEFAULT_DESTROY_TIMEOUT_MS, env = "DB_POOL_DESTROY_TIMEOUT_MS")]
    pub destroy_timeout_ms: u64,

    /// Health check interval in milliseconds
    #[arg(
        long,
        default_value_t = DEFAULT_HEALTH_CHECK_INTERVAL_MS,
        env = "DB_HEALTH_CHECK_INTERVAL_MS"
    )]
    pub health_interval_ms: u64,

    /// Health check timeout in milliseconds
    #[arg(long, default_value_t = DEFAULT_HEALTH_TIMEOUT_MS, env = "DB_HEALTH_TIMEOUT_MS")]
    pub health_timeout_ms: u64,

    /// Round-trip latency above which the database is reported unhealthy
    #[arg(long, default_value_t = DEFAULT_HEALTH_MAX_LATENCY_MS, env = "DB_HEALTH_MAX_LATENCY_MS")]
    pub max_latency_ms: u64,

    /// Failed-check ratio above which the database is reported unhealthy
    #[arg(long, default_value_t = DEFAULT_HEALTH_MAX_ERROR_RATE, env = "DB_HEALTH_MAX_ERROR_RATE")]
    pub max_error_rate: f64,

    /// Pool utilization above which the database is reported unhealthy
    #[arg(
        long,
        default_value_t = DEFAULT_HEALTH_MAX_POOL_UTILIZATION,
        env = "DB_HEALTH_MAX_POOL_UTILIZATION"
    )]
    pub max_pool_utilization: f64,

    /// Statements slower than this are logged as slow queries
    #[arg(
        long,
        default_value_t = DEFAULT_SLOW_QUERY_THRESHOLD_MS,
        env = "DB_PROFILER_SLOW_QUERY_MS"
    )]
    pub slow_query_ms: u64,

    /// Number of statement profiles kept in memory
    #[arg(long, default_value_t = DEFAULT_MAX_PROFILE_HISTORY, env = "DB_PROFILER_MAX_HISTORY")]
    pub max_profile_history: usize,

    /// Disable statement profiling
    #[arg(long, env = "DB_PROFILER_DISABLED")]
    pub no_profiler: bool,

    /// Retries for transactions failing with serialization or lock errors
    #[arg(long, default_value_t = DEFAULT_TXN_MAX_RETRIES, env = "DB_TXN_MAX_RETRIES")]
    pub txn_max_retries: u32,

    /// Run a single health check, print it as JSON and exit
    #[arg(long)]
    pub check: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "LOG_JSON")]
    pub json_logs: bool,
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Convert the parsed arguments into validated library settings.
    pub fn settings(&self) -> DbResult<Settings> {
        let settings = Settings {
            database_url: Some(self.database_url.clone()),
            application_name: Some(self.application_name.clone()),
            pool: PoolConfig {
                min_connections: self.pool_min,
                max_connections: self.pool_max,
                acquire_timeout: Duration::from_millis(self.acquire_timeout_ms),
                idle_timeout: Duration::from_millis(self.idle_timeout_ms),
                reap_interval: Duration::from_millis(self.reap_interval_ms),
                create_timeout: Duration::from_millis(self.create_timeout_ms),
                destroy_timeout: Duration::from_millis(self.destroy_timeout_ms),
            },
            health: HealthConfig {
                check_interval: Duration::from_millis(self.health_interval_ms),
                timeout: Duration::from_millis(self.health_timeout_ms),
                max_latency: Duration::from_millis(self.max_latency_ms),
                max_error_rate: self.max_error_rate,
                max_pool_utilization: self.max_pool_utilization,
            },
            profiler: ProfilerConfig {
                enabled: !self.no_profiler,
                slow_query_threshold: Duration::from_millis(self.slow_query_ms),
                max_history: self.max_profile_history,
                ..ProfilerConfig::default()
            },
            transaction: TransactionConfig {
                max_retries: self.txn_max_retries,
                ..TransactionConfig::default()
            },
        };
        settings.validate()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_config_defaults_are_valid() {
        let config = PoolConfig::default();
        assert_eq!(config.min_connections, DEFAULT_MIN_CONNECTIONS);
        assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pool_config_min_exceeds_max() {
        let err = PoolConfig::new(6, 5).validate().unwrap_err();
        assert!(err.to_string().contains("cannot exceed"));
    }

    #[test]
    fn test_pool_config_zero_max() {
        assert!(PoolConfig::new(0, 0).validate().is_err());
    }

    #[test]
    fn test_pool_config_zero_timeout() {
        let config = PoolConfig::new(1, 2).with_acquire_timeout(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_history_capacity_covers_one_hour() {
        let config = HealthConfig::default().with_check_interval(Duration::from_secs(30));
        assert_eq!(config.history_capacity(), 120);

        let config = HealthConfig::default().with_check_interval(Duration::from_secs(7200));
        assert_eq!(config.history_capacity(), 1);
    }

    #[test]
    fn test_health_config_rejects_out_of_range_ratios() {
        let config = HealthConfig::default().with_max_pool_utilization(1.5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_settings_from_pairs() {
        let settings = Settings::from_pairs([
            ("DATABASE_URL", "sqlite:tasks.db"),
            ("DB_POOL_MIN", "3"),
            ("DB_POOL_MAX", "7"),
            ("DB_POOL_ACQUIRE_TIMEOUT_MS", "500"),
            ("DB_HEALTH_MAX_LATENCY_MS", "50"),
            ("DB_HEALTH_MAX_POOL_UTILIZATION", "0.75"),
            ("DB_PROFILER_ENABLED", "false"),
            ("DB_TXN_MAX_RETRIES", "2"),
            ("HOME", "/root"),
        ])
        .unwrap();

        assert_eq!(settings.database_url.as_deref(), Some("sqlite:tasks.db"));
        assert_eq!(settings.pool.min_connections, 3);
        assert_eq!(settings.pool.max_connections, 7);
        assert_eq!(settings.pool.acquire_timeout, Duration::from_millis(500));
        assert_eq!(settings.health.max_latency, Duration::from_millis(50));
        assert!((settings.health.max_pool_utilization - 0.75).abs() < f64::EPSILON);
        assert!(!settings.profiler.enabled);
        assert_eq!(settings.transaction.max_retries, 2);
        assert_eq!(settings.application_name(), DEFAULT_APPLICATION_NAME);
    }

    #[test]
    fn test_settings_keys_are_case_insensitive() {
        let settings = Settings::from_pairs([("db_pool_max", "4"), ("db_pool_min", "1")]).unwrap();
        assert_eq!(settings.pool.max_connections, 4);
        assert_eq!(settings.pool.min_connections, 1);
    }

    #[test]
    fn test_settings_invalid_number() {
        let err = Settings::from_pairs([("DB_POOL_MAX", "many")]).unwrap_err();
        assert!(err.to_string().contains("DB_POOL_MAX"));
    }

    #[test]
    fn test_settings_validation_runs() {
        let result = Settings::from_pairs([("DB_POOL_MIN", "20"), ("DB_POOL_MAX", "5")]);
        assert!(result.is_err());
    }

    #[test]
    fn test_config_settings_roundtrip() {
        let config = Config::try_parse_from([
            "taskflow-db",
            "--database-url",
            "postgres://app:pw@localhost/tasks",
            "--pool-min",
            "1",
            "--pool-max",
            "4",
            "--no-profiler",
        ])
        .unwrap();
        let settings = config.settings().unwrap();
        assert_eq!(settings.pool.max_connections, 4);
        assert!(!settings.profiler.enabled);
    }
}
