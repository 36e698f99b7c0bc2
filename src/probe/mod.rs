//! Probe module for availability checks.
//!
//! A [`Checker`] runs one HTTP probe and classifies it. Network failures are
//! outcomes, not errors: every call yields a [`CheckResult`].

mod http;

pub use http::*;

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::db::{HeaderEntry, HttpMethod, Outcome, Target};

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Which classification rule a check uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckMode {
    /// Status must be in the target's expected set.
    Standard,
    /// Any status in `[200, 400)` counts as awake.
    KeepAlive,
}

/// Everything needed to probe one target once.
#[derive(Debug, Clone)]
pub struct CheckRequest {
    pub target_id: i64,
    pub url: String,
    pub method: HttpMethod,
    pub timeout: Duration,
    pub follow_redirects: bool,
    pub headers: Vec<HeaderEntry>,
    pub expected_status_codes: Vec<u16>,
    pub body_match: Option<String>,
    pub max_response_time_ms: Option<u64>,
    pub mode: CheckMode,
}

impl CheckRequest {
    /// A standard check using the target's own timeout.
    pub fn standard(target: &Target) -> Self {
        Self {
            target_id: target.id,
            url: target.url.clone(),
            method: target.method,
            timeout: Duration::from_secs(u64::from(target.effective_timeout_secs())),
            follow_redirects: target.follow_redirects,
            headers: target.headers.clone(),
            expected_status_codes: target.expected_status_codes.clone(),
            body_match: target.body_match.clone(),
            max_response_time_ms: target.max_response_time_ms,
            mode: CheckMode::Standard,
        }
    }

    /// A keep-alive ping with the lane's fixed timeout.
    pub fn keep_alive(target: &Target, timeout: Duration) -> Self {
        Self {
            timeout,
            body_match: None,
            max_response_time_ms: None,
            mode: CheckMode::KeepAlive,
            ..Self::standard(target)
        }
    }
}

/// The classified outcome of one probe.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckResult {
    pub outcome: Outcome,
    pub status_code: Option<u16>,
    pub response_time_ms: u64,
    pub error_message: Option<String>,
}

impl CheckResult {
    pub fn up(status_code: u16, response_time_ms: u64) -> Self {
        Self {
            outcome: Outcome::Up,
            status_code: Some(status_code),
            response_time_ms,
            error_message: None,
        }
    }

    pub fn down(status_code: Option<u16>, response_time_ms: u64, error_message: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Down,
            status_code,
            response_time_ms,
            error_message: Some(error_message.into()),
        }
    }
}

/// Runs a single probe. Implementations must not panic on network failure
/// and must return within roughly `request.timeout`.
#[async_trait]
pub trait Checker: Send + Sync {
    async fn check(&self, request: &CheckRequest) -> CheckResult;
}

/// Classify a received response.
///
/// `body` is only inspected when the request carries a body match.
pub fn classify(request: &CheckRequest, status: u16, body: Option<&str>, elapsed_ms: u64) -> CheckResult {
    match request.mode {
        CheckMode::KeepAlive => {
            if (200..400).contains(&status) {
                CheckResult::up(status, elapsed_ms)
            } else {
                CheckResult::down(Some(status), elapsed_ms, format!("unexpected status code {}", status))
            }
        }
        CheckMode::Standard => {
            if !request.expected_status_codes.contains(&status) {
                return CheckResult::down(Some(status), elapsed_ms, format!("unexpected status code {}", status));
            }
            if let Some(needle) = &request.body_match {
                if !body.is_some_and(|b| b.contains(needle.as_str())) {
                    return CheckResult::down(
                        Some(status),
                        elapsed_ms,
                        format!("response body does not contain \"{}\"", needle),
                    );
                }
            }
            if let Some(limit) = request.max_response_time_ms {
                if elapsed_ms > limit {
                    return CheckResult::down(
                        Some(status),
                        elapsed_ms,
                        format!("response time {}ms exceeded limit of {}ms", elapsed_ms, limit),
                    );
                }
            }
            CheckResult::up(status, elapsed_ms)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn standard_request() -> CheckRequest {
        CheckRequest::standard(&Target {
            url: "https://example.com".to_string(),
            ..Default::default()
        })
    }

    #[test]
    fn test_standard_uses_expected_set() {
        let request = standard_request();
        assert_eq!(classify(&request, 301, None, 10).outcome, Outcome::Up);
        assert_eq!(classify(&request, 204, None, 10).outcome, Outcome::Up);

        let missing = classify(&request, 404, None, 10);
        assert_eq!(missing.outcome, Outcome::Down);
        assert_eq!(missing.status_code, Some(404));
        assert_eq!(missing.error_message.as_deref(), Some("unexpected status code 404"));
    }

    #[test]
    fn test_keepalive_range_boundaries() {
        let request = CheckRequest::keep_alive(
            &Target { url: "https://example.com".to_string(), ..Default::default() },
            Duration::from_secs(15),
        );
        assert_eq!(request.timeout, Duration::from_secs(15));
        assert_eq!(classify(&request, 200, None, 5).outcome, Outcome::Up);
        assert_eq!(classify(&request, 399, None, 5).outcome, Outcome::Up);
        assert_eq!(classify(&request, 400, None, 5).outcome, Outcome::Down);
        assert_eq!(classify(&request, 199, None, 5).outcome, Outcome::Down);
    }

    #[test]
    fn test_keepalive_ignores_body_match() {
        let target = Target {
            url: "https://example.com".to_string(),
            body_match: Some("ready".to_string()),
            max_response_time_ms: Some(10),
            ..Default::default()
        };
        let request = CheckRequest::keep_alive(&target, Duration::from_secs(15));
        assert_eq!(classify(&request, 302, None, 500).outcome, Outcome::Up);
    }

    #[test]
    fn test_body_match_and_response_limit() {
        let mut request = standard_request();
        request.body_match = Some("healthy".to_string());
        assert_eq!(classify(&request, 200, Some("status: healthy"), 10).outcome, Outcome::Up);
        assert_eq!(classify(&request, 200, Some("status: degraded"), 10).outcome, Outcome::Down);
        assert_eq!(classify(&request, 200, None, 10).outcome, Outcome::Down);

        request.body_match = None;
        request.max_response_time_ms = Some(1000);
        assert_eq!(classify(&request, 200, None, 1000).outcome, Outcome::Up);
        let slow = classify(&request, 200, None, 1001);
        assert_eq!(slow.outcome, Outcome::Down);
        assert_eq!(slow.status_code, Some(200));
    }
}
