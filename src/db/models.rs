//! Database model types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Status codes treated as healthy when a target does not configure its own.
pub const DEFAULT_EXPECTED_STATUS_CODES: [u16; 5] = [200, 201, 204, 301, 302];

pub const MIN_TIMEOUT_SECS: u32 = 5;
pub const MAX_TIMEOUT_SECS: u32 = 60;
pub const DEFAULT_TIMEOUT_SECS: u32 = 30;

/// Error returned when a stored or submitted enum value is not recognised.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid {kind}: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}

/// The fixed set of standard check intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum CheckInterval {
    OneMinute,
    FiveMinutes,
    FifteenMinutes,
    ThirtyMinutes,
    SixtyMinutes,
}

impl CheckInterval {
    pub const ALL: [CheckInterval; 5] = [
        CheckInterval::OneMinute,
        CheckInterval::FiveMinutes,
        CheckInterval::FifteenMinutes,
        CheckInterval::ThirtyMinutes,
        CheckInterval::SixtyMinutes,
    ];

    pub fn minutes(self) -> u32 {
        match self {
            CheckInterval::OneMinute => 1,
            CheckInterval::FiveMinutes => 5,
            CheckInterval::FifteenMinutes => 15,
            CheckInterval::ThirtyMinutes => 30,
            CheckInterval::SixtyMinutes => 60,
        }
    }

    pub fn from_minutes(minutes: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|i| i.minutes() == minutes)
    }

    pub fn period(self) -> std::time::Duration {
        std::time::Duration::from_secs(u64::from(self.minutes()) * 60)
    }
}

impl Default for CheckInterval {
    fn default() -> Self {
        CheckInterval::FiveMinutes
    }
}

impl TryFrom<u32> for CheckInterval {
    type Error = ParseEnumError;

    fn try_from(minutes: u32) -> Result<Self, Self::Error> {
        Self::from_minutes(minutes)
            .ok_or_else(|| ParseEnumError::new("check interval", minutes.to_string()))
    }
}

impl From<CheckInterval> for u32 {
    fn from(interval: CheckInterval) -> Self {
        interval.minutes()
    }
}

/// Generates `as_str`, `Display` and `FromStr` for a plain string-backed enum.
macro_rules! string_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(ParseEnumError::new($kind, other)),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Head,
    Post,
}

string_enum!(HttpMethod, "http method", { Get => "GET", Head => "HEAD", Post => "POST" });

/// Current status shown for a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LiveStatus {
    Up,
    Down,
    #[default]
    Pending,
    Maintenance,
}

string_enum!(LiveStatus, "status", {
    Up => "up",
    Down => "down",
    Pending => "pending",
    Maintenance => "maintenance",
});

/// Classification of a single completed check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Up,
    Down,
}

string_enum!(Outcome, "outcome", { Up => "up", Down => "down" });

impl From<Outcome> for LiveStatus {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Up => LiveStatus::Up,
            Outcome::Down => LiveStatus::Down,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeepAliveStatus {
    Awake,
    Sleeping,
    #[default]
    Unknown,
}

string_enum!(KeepAliveStatus, "keep-alive status", {
    Awake => "awake",
    Sleeping => "sleeping",
    Unknown => "unknown",
});

impl From<Outcome> for KeepAliveStatus {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Up => KeepAliveStatus::Awake,
            Outcome::Down => KeepAliveStatus::Sleeping,
        }
    }
}

/// Performance grade derived from 24h uptime and response time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    F,
}

string_enum!(Grade, "grade", { A => "A", B => "B", C => "C", D => "D", F => "F" });

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderEntry {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeepAliveConfig {
    pub enabled: bool,
    pub platform: String,
    pub aggressive_mode: bool,
    pub last_ping: Option<DateTime<Utc>>,
    pub ping_count: i64,
    pub status: KeepAliveStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    pub enabled: bool,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertingConfig {
    pub enabled: bool,
    /// Consecutive failures needed before an alert becomes due.
    pub threshold: u32,
    pub consecutive_failures: u32,
    pub last_alert_sent: Option<DateTime<Utc>>,
    pub cooldown_minutes: u32,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 3,
            consecutive_failures: 0,
            last_alert_sent: None,
            cooldown_minutes: 30,
        }
    }
}

/// Live status fields, overwritten by every recorded check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveState {
    pub last_status: LiveStatus,
    pub last_checked: Option<DateTime<Utc>>,
    pub last_response_time_ms: Option<u64>,
    pub last_status_code: Option<u16>,
}

/// Rolling statistics aggregated from the check log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetStats {
    pub total_checks: i64,
    pub uptime_24h: f64,
    pub uptime_7d: f64,
    pub uptime_30d: f64,
    pub avg_response_24h: f64,
    pub avg_response_7d: f64,
    pub avg_response_30d: f64,
    pub last_incident: Option<DateTime<Utc>>,
    pub grade: Grade,
}

impl Default for TargetStats {
    fn default() -> Self {
        Self {
            total_checks: 0,
            uptime_24h: 100.0,
            uptime_7d: 100.0,
            uptime_30d: 100.0,
            avg_response_24h: 0.0,
            avg_response_7d: 0.0,
            avg_response_30d: 0.0,
            last_incident: None,
            grade: Grade::A,
        }
    }
}

/// A monitored endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub id: i64,
    pub owner: String,
    pub name: String,
    pub url: String,
    pub method: HttpMethod,
    pub timeout_secs: u32,
    pub interval: CheckInterval,
    pub expected_status_codes: Vec<u16>,
    pub body_match: Option<String>,
    pub max_response_time_ms: Option<u64>,
    pub headers: Vec<HeaderEntry>,
    pub follow_redirects: bool,
    pub active: bool,
    pub keep_alive: KeepAliveConfig,
    pub maintenance: MaintenanceConfig,
    pub alerting: AlertingConfig,
    pub status: LiveState,
    pub stats: TargetStats,
    pub created_at: DateTime<Utc>,
}

impl Default for Target {
    fn default() -> Self {
        Self {
            id: 0,
            owner: String::new(),
            name: String::new(),
            url: String::new(),
            method: HttpMethod::Get,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            interval: CheckInterval::default(),
            expected_status_codes: DEFAULT_EXPECTED_STATUS_CODES.to_vec(),
            body_match: None,
            max_response_time_ms: None,
            headers: Vec::new(),
            follow_redirects: true,
            active: true,
            keep_alive: KeepAliveConfig {
                platform: "other".to_string(),
                ..Default::default()
            },
            maintenance: MaintenanceConfig::default(),
            alerting: AlertingConfig::default(),
            status: LiveState::default(),
            stats: TargetStats::default(),
            created_at: Utc::now(),
        }
    }
}

impl Target {
    /// Clamp the configured timeout into the supported range.
    pub fn effective_timeout_secs(&self) -> u32 {
        self.timeout_secs.clamp(MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS)
    }
}

/// An immutable record of one completed check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckLogEntry {
    pub id: i64,
    pub target_id: i64,
    pub outcome: Outcome,
    pub status_code: Option<u16>,
    pub response_time_ms: Option<u64>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Live-status write applied atomically after a check.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub outcome: Outcome,
    pub checked_at: DateTime<Utc>,
    pub response_time_ms: Option<u64>,
    pub status_code: Option<u16>,
}

/// Counter values after a status update was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedCheck {
    pub consecutive_failures: u32,
    pub total_checks: i64,
}

/// Aggregate of check-log entries inside one time window.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WindowStats {
    pub total: i64,
    pub up: i64,
    pub avg_response_ms: Option<f64>,
}

impl WindowStats {
    /// Uptime percentage for the window; an empty window counts as fully up.
    pub fn uptime_percent(&self) -> f64 {
        if self.total <= 0 {
            return 100.0;
        }
        (self.up as f64 * 100.0) / self.total as f64
    }
}
