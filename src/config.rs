//! Configuration module for tcpwatch.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::scheduler::{OverlapPolicy, MIN_INTERVAL_SECS};

pub const MAX_CONCURRENT_PROBES: usize = 10_000;
pub const MAX_RETENTION_DAYS: i64 = 3650;
const MAX_PRUNE_INTERVAL: Duration = Duration::from_secs(30 * 86_400);
const MAX_WRITE_RETRIES: u32 = 10;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the API server (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "tcpwatch.db")
    pub db_path: String,
    /// Per-attempt connect timeout (default: 3s, always below the minimum interval)
    pub probe_timeout: Duration,
    /// Ceiling on simultaneous in-flight probes (default: 50)
    pub max_concurrent_probes: usize,
    /// Probe interval used when none has been persisted (default: 300s)
    pub default_interval_secs: u64,
    /// How long probe results are kept (default: 30 days)
    pub retention_days: i64,
    /// How often retention pruning runs (default: once a day)
    pub prune_interval: Duration,
    /// Attempts made after a failed result write (default: 3)
    pub write_retries: u32,
    /// What to do when a cycle is still running at the next firing (default: overlap)
    pub overlap_policy: OverlapPolicy,
    /// Upper bound on the random delay before each probe (default: 100ms)
    pub probe_jitter: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "tcpwatch.db".to_string(),
            probe_timeout: Duration::from_secs(3),
            max_concurrent_probes: 50,
            default_interval_secs: 300,
            retention_days: 30,
            prune_interval: Duration::from_secs(86_400),
            write_retries: 3,
            overlap_policy: OverlapPolicy::Overlap,
            probe_jitter: Duration::from_millis(100),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `TCPWATCH_HTTP_PORT`: HTTP port (default: 8080)
    /// - `TCPWATCH_DB_PATH`: Database file path (default: "tcpwatch.db")
    /// - `TCPWATCH_PROBE_TIMEOUT_MS`: connect timeout in ms (default: 3000)
    /// - `TCPWATCH_MAX_CONCURRENT_PROBES`: in-flight probe ceiling (default: 50)
    /// - `TCPWATCH_DEFAULT_INTERVAL_SECS`: fallback probe interval (default: 300)
    /// - `TCPWATCH_RETENTION_DAYS`: result retention (default: 30)
    /// - `TCPWATCH_PRUNE_INTERVAL_SECS`: pruning cadence (default: 86400)
    /// - `TCPWATCH_WRITE_RETRIES`: bounded write retries (default: 3)
    /// - `TCPWATCH_OVERLAP_POLICY`: "overlap" or "skip" (default: overlap)
    /// - `TCPWATCH_PROBE_JITTER_MS`: max pre-probe delay in ms (default: 100)
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Some(port) = env_parse("TCPWATCH_HTTP_PORT") {
            cfg.http_port = port;
        }

        if let Ok(db_path) = env::var("TCPWATCH_DB_PATH") {
            cfg.db_path = db_path;
        }

        if let Some(ms) = env_parse::<u64>("TCPWATCH_PROBE_TIMEOUT_MS") {
            cfg.probe_timeout = Duration::from_millis(ms);
        }

        if let Some(n) = env_parse::<usize>("TCPWATCH_MAX_CONCURRENT_PROBES") {
            cfg.max_concurrent_probes = n;
        }

        if let Some(secs) = env_parse("TCPWATCH_DEFAULT_INTERVAL_SECS") {
            cfg.default_interval_secs = secs;
        }

        if let Some(days) = env_parse::<i64>("TCPWATCH_RETENTION_DAYS") {
            cfg.retention_days = days;
        }

        if let Some(secs) = env_parse::<u64>("TCPWATCH_PRUNE_INTERVAL_SECS") {
            cfg.prune_interval = Duration::from_secs(secs);
        }

        if let Some(n) = env_parse("TCPWATCH_WRITE_RETRIES") {
            cfg.write_retries = n;
        }

        if let Some(policy) = env_parse("TCPWATCH_OVERLAP_POLICY") {
            cfg.overlap_policy = policy;
        }

        if let Some(ms) = env_parse::<u64>("TCPWATCH_PROBE_JITTER_MS") {
            cfg.probe_jitter = Duration::from_millis(ms);
        }

        cfg.sanitize()
    }

    /// Pull out-of-range values back to something the scheduler can run with.
    pub fn sanitize(mut self) -> Self {
        let defaults = Self::default();

        // A probe must always settle before the next cycle could fire.
        let ceiling = Duration::from_secs(MIN_INTERVAL_SECS) - Duration::from_millis(500);
        if self.probe_timeout.is_zero() || self.probe_timeout > ceiling {
            tracing::warn!(
                "Probe timeout {:?} out of range, using {:?}",
                self.probe_timeout,
                defaults.probe_timeout
            );
            self.probe_timeout = defaults.probe_timeout;
        }
        if self.probe_jitter >= self.probe_timeout {
            self.probe_jitter = Duration::ZERO;
        }

        if !(1..=MAX_CONCURRENT_PROBES).contains(&self.max_concurrent_probes) {
            tracing::warn!(
                "Concurrency limit {} is invalid, using {}",
                self.max_concurrent_probes,
                defaults.max_concurrent_probes
            );
            self.max_concurrent_probes = defaults.max_concurrent_probes;
        }

        if !(1..=MAX_RETENTION_DAYS).contains(&self.retention_days) {
            tracing::warn!("Retention of {} days is invalid, using {}", self.retention_days, defaults.retention_days);
            self.retention_days = defaults.retention_days;
        }

        if self.prune_interval.is_zero() || self.prune_interval > MAX_PRUNE_INTERVAL {
            tracing::warn!(
                "Prune interval {:?} out of range, using {:?}",
                self.prune_interval,
                defaults.prune_interval
            );
            self.prune_interval = defaults.prune_interval;
        }

        if self.write_retries > MAX_WRITE_RETRIES {
            tracing::warn!("{} write retries is too many, using {}", self.write_retries, MAX_WRITE_RETRIES);
            self.write_retries = MAX_WRITE_RETRIES;
        }

        self
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring malformed {}={:?}", key, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.http_port, 8080);
        assert_eq!(cfg.db_path, "tcpwatch.db");
        assert_eq!(cfg.retention_days, 30);
        assert_eq!(cfg.max_concurrent_probes, 50);
        assert_eq!(cfg.overlap_policy, OverlapPolicy::Overlap);
    }

    #[test]
    fn test_sanitize_clamps_timeout_below_interval_floor() {
        let cfg = ServerConfig {
            probe_timeout: Duration::from_secs(30),
            max_concurrent_probes: 0,
            retention_days: -5,
            ..Default::default()
        }
        .sanitize();

        assert_eq!(cfg.probe_timeout, Duration::from_secs(3));
        assert_eq!(cfg.max_concurrent_probes, 50);
        assert_eq!(cfg.retention_days, 30);
    }

    #[test]
    fn test_sanitize_rejects_huge_concurrency_limit() {
        let cfg = ServerConfig {
            max_concurrent_probes: usize::MAX,
            ..Default::default()
        }
        .sanitize();
        assert_eq!(cfg.max_concurrent_probes, 50);

        let cfg = ServerConfig {
            max_concurrent_probes: MAX_CONCURRENT_PROBES,
            ..Default::default()
        }
        .sanitize();
        assert_eq!(cfg.max_concurrent_probes, MAX_CONCURRENT_PROBES);
    }

    #[test]
    fn test_sanitize_rejects_huge_retention() {
        let cfg = ServerConfig {
            retention_days: i64::MAX / 1000,
            prune_interval: Duration::from_secs(u64::MAX),
            write_retries: u32::MAX,
            ..Default::default()
        }
        .sanitize();
        assert_eq!(cfg.retention_days, 30);
        assert_eq!(cfg.prune_interval, Duration::from_secs(86_400));
        assert_eq!(cfg.write_retries, 10);

        let cfg = ServerConfig {
            retention_days: MAX_RETENTION_DAYS,
            ..Default::default()
        }
        .sanitize();
        assert_eq!(cfg.retention_days, MAX_RETENTION_DAYS);
    }

    #[test]
    fn test_sanitize_drops_jitter_longer_than_timeout() {
        let cfg = ServerConfig {
            probe_timeout: Duration::from_millis(500),
            probe_jitter: Duration::from_secs(1),
            ..Default::default()
        }
        .sanitize();

        assert_eq!(cfg.probe_jitter, Duration::ZERO);
    }
}
