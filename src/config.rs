//! Configuration module for uptime-keeper.
//!
//! Loads configuration from environment variables with sensible defaults.

use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use thiserror::Error;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the API server (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "uptime-keeper.db")
    pub db_path: String,
    /// User-Agent sent with every check
    pub user_agent: String,
    /// Initial scheduler settings
    pub monitor: MonitorSettings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "uptime-keeper.db".to_string(),
            user_agent: format!("uptime-keeper/{}", env!("CARGO_PKG_VERSION")),
            monitor: MonitorSettings::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `UPTIME_KEEPER_HTTP_PORT`: HTTP port (default: 8080)
    /// - `UPTIME_KEEPER_DB_PATH`: Database file path (default: "uptime-keeper.db")
    /// - `UPTIME_KEEPER_USER_AGENT`: User-Agent for checks
    /// - `UPTIME_KEEPER_KEEPALIVE_TIMEOUT_SECS`: keep-alive check timeout (default: 15)
    /// - `UPTIME_KEEPER_STANDARD_DELAY_MS`: delay between standard checks (default: 300)
    /// - `UPTIME_KEEPER_KEEPALIVE_DELAY_MS`: delay between keep-alive checks (default: 200)
    /// - `UPTIME_KEEPER_CHECK_JITTER_MS`: random extra delay per dispatch (default: 100)
    /// - `UPTIME_KEEPER_MAX_CONCURRENT_CHECKS`: concurrent checks per tick (default: 5)
    /// - `UPTIME_KEEPER_LOG_RETENTION_DAYS`: check-log retention (default: 30)
    ///
    /// Unparseable values are ignored and the default is kept.
    pub fn load() -> Self {
        let mut cfg = Self::default();

        override_from_env("UPTIME_KEEPER_HTTP_PORT", &mut cfg.http_port);

        if let Ok(db_path) = env::var("UPTIME_KEEPER_DB_PATH") {
            cfg.db_path = db_path;
        }
        if let Ok(user_agent) = env::var("UPTIME_KEEPER_USER_AGENT") {
            if !user_agent.trim().is_empty() {
                cfg.user_agent = user_agent;
            }
        }

        let monitor = &mut cfg.monitor;
        override_from_env("UPTIME_KEEPER_KEEPALIVE_TIMEOUT_SECS", &mut monitor.keepalive_timeout_secs);
        override_from_env("UPTIME_KEEPER_STANDARD_DELAY_MS", &mut monitor.standard_delay_ms);
        override_from_env("UPTIME_KEEPER_KEEPALIVE_DELAY_MS", &mut monitor.keepalive_delay_ms);
        override_from_env("UPTIME_KEEPER_CHECK_JITTER_MS", &mut monitor.check_jitter_ms);
        override_from_env("UPTIME_KEEPER_MAX_CONCURRENT_CHECKS", &mut monitor.max_concurrent_checks);
        override_from_env("UPTIME_KEEPER_LOG_RETENTION_DAYS", &mut monitor.log_retention_days);

        if let Err(e) = cfg.monitor.validate() {
            tracing::warn!("Ignoring monitor settings from environment: {}", e);
            cfg.monitor = MonitorSettings::default();
        }

        cfg
    }
}

fn override_from_env<T: FromStr>(key: &str, slot: &mut T) {
    if let Ok(raw) = env::var(key) {
        match raw.parse() {
            Ok(value) => *slot = value,
            Err(_) => tracing::warn!("Ignoring invalid value for {}: {:?}", key, raw),
        }
    }
}

/// Settings rejected by [`MonitorSettings::validate`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettingsError {
    #[error("{field} must be between {min} and {max}")]
    OutOfRange {
        field: &'static str,
        min: u64,
        max: u64,
    },
}

/// Scheduler settings.
///
/// The scheduler holds one immutable snapshot at a time; reconfiguring
/// swaps in a new value with a bumped `version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    pub version: u64,
    pub keepalive_timeout_secs: u64,
    pub standard_delay_ms: u64,
    pub keepalive_delay_ms: u64,
    pub check_jitter_ms: u64,
    pub max_concurrent_checks: usize,
    pub log_retention_days: u32,
    pub housekeeping_interval_secs: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            version: 1,
            keepalive_timeout_secs: 15,
            standard_delay_ms: 300,
            keepalive_delay_ms: 200,
            check_jitter_ms: 100,
            max_concurrent_checks: 5,
            log_retention_days: 30,
            housekeeping_interval_secs: 60,
        }
    }
}

impl MonitorSettings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        check_range("keepalive_timeout_secs", self.keepalive_timeout_secs, 1, 60)?;
        check_range("standard_delay_ms", self.standard_delay_ms, 0, 10_000)?;
        check_range("keepalive_delay_ms", self.keepalive_delay_ms, 0, 10_000)?;
        check_range("check_jitter_ms", self.check_jitter_ms, 0, 5_000)?;
        check_range("max_concurrent_checks", self.max_concurrent_checks as u64, 1, 50)?;
        check_range("log_retention_days", u64::from(self.log_retention_days), 1, 365)?;
        check_range("housekeeping_interval_secs", self.housekeeping_interval_secs, 1, 86_400)?;
        Ok(())
    }
}

fn check_range(field: &'static str, value: u64, min: u64, max: u64) -> Result<(), SettingsError> {
    if value < min || value > max {
        return Err(SettingsError::OutOfRange { field, min, max });
    }
    Ok(())
}
