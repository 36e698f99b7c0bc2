//! HTTP request handlers.

use super::AppState;
use crate::config::MonitorSettings;
use crate::db::{
    AlertingConfig, CheckInterval, DbError, HeaderEntry, HttpMethod, KeepAliveConfig, MaintenanceConfig, Target,
    DEFAULT_EXPECTED_STATUS_CODES,
};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};

const DEFAULT_LOG_LIMIT: u32 = 100;
const MAX_LOG_LIMIT: u32 = 1000;

fn store_error(e: DbError) -> Response {
    match e {
        DbError::NotFound => (StatusCode::NOT_FOUND, "Target not found").into_response(),
        e => {
            tracing::error!("Store error: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

// ============================================================================
// Health
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub scheduler_running: bool,
    pub settings_version: u64,
}

pub async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        scheduler_running: state.scheduler.is_running().await,
        settings_version: state.scheduler.settings().await.version,
    })
}

// ============================================================================
// API: Targets
// ============================================================================

pub async fn handle_get_targets(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.get_targets() {
        Ok(targets) => Json(targets).into_response(),
        Err(e) => store_error(e),
    }
}

pub async fn handle_get_target(State(state): State<AppState>, Path(id): Path<i64>) -> impl IntoResponse {
    match state.store.get_target(id) {
        Ok(target) => Json(target).into_response(),
        Err(e) => store_error(e),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct KeepAliveRequest {
    pub enabled: bool,
    pub platform: Option<String>,
    pub aggressive_mode: bool,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AlertingRequest {
    pub enabled: bool,
    pub threshold: u32,
    pub cooldown_minutes: u32,
}

impl Default for AlertingRequest {
    fn default() -> Self {
        let defaults = AlertingConfig::default();
        Self {
            enabled: defaults.enabled,
            threshold: defaults.threshold,
            cooldown_minutes: defaults.cooldown_minutes,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateTargetRequest {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub method: Option<String>,
    /// Minutes; one of 1, 5, 15, 30, 60.
    #[serde(default)]
    pub interval: Option<u32>,
    #[serde(default)]
    pub timeout_secs: Option<u32>,
    #[serde(default)]
    pub expected_status_codes: Option<Vec<u16>>,
    #[serde(default)]
    pub body_match: Option<String>,
    #[serde(default)]
    pub max_response_time_ms: Option<u64>,
    #[serde(default)]
    pub headers: Vec<HeaderEntry>,
    #[serde(default)]
    pub follow_redirects: Option<bool>,
    #[serde(default)]
    pub keep_alive: KeepAliveRequest,
    #[serde(default)]
    pub alerting: AlertingRequest,
}

impl CreateTargetRequest {
    /// Validate the request and build an unsaved target.
    pub fn into_target(self) -> Result<Target, String> {
        let url = reqwest::Url::parse(self.url.trim()).map_err(|e| format!("Invalid URL: {}", e))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err("URL must use http or https".to_string());
        }

        let method = match self.method.as_deref() {
            None => HttpMethod::Get,
            Some(m) => m.to_ascii_uppercase().parse::<HttpMethod>().map_err(|e| e.to_string())?,
        };

        let interval = match self.interval {
            None => CheckInterval::default(),
            Some(minutes) => CheckInterval::try_from(minutes).map_err(|e| e.to_string())?,
        };

        if self.alerting.threshold == 0 {
            return Err("Alert threshold must be at least 1".to_string());
        }

        let defaults = Target::default();
        let name = if self.name.trim().is_empty() {
            url.host_str().unwrap_or_default().to_string()
        } else {
            self.name
        };

        let mut target = Target {
            owner: self.owner,
            name,
            url: url.to_string(),
            method,
            interval,
            body_match: self.body_match.filter(|b| !b.is_empty()),
            max_response_time_ms: self.max_response_time_ms,
            headers: self.headers,
            follow_redirects: self.follow_redirects.unwrap_or(true),
            keep_alive: KeepAliveConfig {
                enabled: self.keep_alive.enabled,
                platform: self.keep_alive.platform.unwrap_or(defaults.keep_alive.platform.clone()),
                aggressive_mode: self.keep_alive.aggressive_mode,
                ..Default::default()
            },
            alerting: AlertingConfig {
                enabled: self.alerting.enabled,
                threshold: self.alerting.threshold,
                cooldown_minutes: self.alerting.cooldown_minutes,
                ..Default::default()
            },
            ..defaults
        };

        if let Some(timeout) = self.timeout_secs {
            target.timeout_secs = timeout;
        }
        target.timeout_secs = target.effective_timeout_secs();

        target.expected_status_codes = match self.expected_status_codes {
            Some(codes) if !codes.is_empty() => codes,
            _ => DEFAULT_EXPECTED_STATUS_CODES.to_vec(),
        };

        Ok(target)
    }
}

pub async fn handle_create_target(
    State(state): State<AppState>,
    Json(req): Json<CreateTargetRequest>,
) -> impl IntoResponse {
    let mut target = match req.into_target() {
        Ok(target) => target,
        Err(e) => return (StatusCode::BAD_REQUEST, e).into_response(),
    };

    if let Err(e) = state.store.add_target(&mut target) {
        return store_error(e);
    }

    tracing::info!("Added target {} ({}) every {}m", target.name, target.url, target.interval.minutes());
    state.scheduler.submit_check(target.id);

    (StatusCode::CREATED, Json(target)).into_response()
}

pub async fn handle_delete_target(State(state): State<AppState>, Path(id): Path<i64>) -> impl IntoResponse {
    match state.store.delete_target(id) {
        Ok(()) => {
            tracing::info!("Deleted target {}", id);
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => store_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    #[serde(default)]
    pub limit: Option<u32>,
}

pub async fn handle_get_logs(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<LogsQuery>,
) -> impl IntoResponse {
    if let Err(e) = state.store.get_target(id) {
        return store_error(e);
    }

    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT).clamp(1, MAX_LOG_LIMIT);
    match state.store.get_check_logs(id, limit) {
        Ok(logs) => Json(logs).into_response(),
        Err(e) => store_error(e),
    }
}

pub async fn handle_clear_logs(State(state): State<AppState>, Path(id): Path<i64>) -> impl IntoResponse {
    if let Err(e) = state.store.get_target(id) {
        return store_error(e);
    }

    match state.store.delete_check_logs(id) {
        Ok(deleted) => {
            tracing::info!("Cleared {} check logs for target {}", deleted, id);
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => store_error(e),
    }
}

pub async fn handle_check_now(State(state): State<AppState>, Path(id): Path<i64>) -> impl IntoResponse {
    let target = match state.store.get_target(id) {
        Ok(target) => target,
        Err(e) => return store_error(e),
    };

    if !target.active || target.maintenance.enabled {
        return (StatusCode::CONFLICT, "Target is inactive or in maintenance").into_response();
    }

    if state.scheduler.submit_check(id) {
        StatusCode::ACCEPTED.into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "Check queue is full").into_response()
    }
}

pub async fn handle_set_maintenance(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(maintenance): Json<MaintenanceConfig>,
) -> impl IntoResponse {
    if let (Some(start), Some(end)) = (maintenance.start, maintenance.end) {
        if end <= start {
            return (StatusCode::BAD_REQUEST, "Maintenance end must be after start").into_response();
        }
    }

    if let Err(e) = state.store.set_maintenance(id, &maintenance) {
        return store_error(e);
    }

    tracing::info!(
        "Maintenance {} for target {}",
        if maintenance.enabled { "enabled" } else { "disabled" },
        id
    );

    match state.store.get_target(id) {
        Ok(target) => Json(target).into_response(),
        Err(e) => store_error(e),
    }
}

// ============================================================================
// API: Settings
// ============================================================================

pub async fn handle_get_settings(State(state): State<AppState>) -> impl IntoResponse {
    let settings = state.scheduler.settings().await;
    Json(MonitorSettings::clone(&settings))
}

pub async fn handle_update_settings(
    State(state): State<AppState>,
    Json(settings): Json<MonitorSettings>,
) -> impl IntoResponse {
    match state.scheduler.reconfigure(settings).await {
        Ok(applied) => Json(MonitorSettings::clone(&applied)).into_response(),
        Err(e) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::db::{LiveStatus, Store};
    use crate::probe::{CheckRequest, CheckResult, Checker};
    use crate::scheduler::Scheduler;
    use async_trait::async_trait;
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    struct AlwaysUp;

    #[async_trait]
    impl Checker for AlwaysUp {
        async fn check(&self, _request: &CheckRequest) -> CheckResult {
            CheckResult::up(200, 50)
        }
    }

    fn test_state() -> (NamedTempFile, AppState) {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(tmp.path()).unwrap());
        let scheduler = Arc::new(Scheduler::new(store.clone(), Arc::new(AlwaysUp), MonitorSettings::default()));
        let state = AppState {
            config: ServerConfig::default(),
            store,
            scheduler,
        };
        (tmp, state)
    }

    fn create_request(json: serde_json::Value) -> CreateTargetRequest {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_create_request_defaults() {
        let target = create_request(serde_json::json!({
            "name": "",
            "url": "https://example.com/health",
        }))
        .into_target()
        .unwrap();

        assert_eq!(target.name, "example.com");
        assert_eq!(target.method, HttpMethod::Get);
        assert_eq!(target.interval, CheckInterval::FiveMinutes);
        assert_eq!(target.timeout_secs, 30);
        assert_eq!(target.expected_status_codes, DEFAULT_EXPECTED_STATUS_CODES.to_vec());
        assert!(target.alerting.enabled);
    }

    #[test]
    fn test_create_request_validation() {
        let bad_scheme = create_request(serde_json::json!({"name": "x", "url": "ftp://example.com"}));
        assert!(bad_scheme.into_target().is_err());

        let bad_interval = create_request(serde_json::json!({"name": "x", "url": "https://a.io", "interval": 10}));
        assert!(bad_interval.into_target().is_err());

        let bad_method = create_request(serde_json::json!({"name": "x", "url": "https://a.io", "method": "PATCH"}));
        assert!(bad_method.into_target().is_err());

        let clamped = create_request(serde_json::json!({
            "name": "x",
            "url": "https://a.io",
            "method": "head",
            "timeout_secs": 300,
        }))
        .into_target()
        .unwrap();
        assert_eq!(clamped.method, HttpMethod::Head);
        assert_eq!(clamped.timeout_secs, 60);
    }

    #[tokio::test]
    async fn test_create_then_fetch_and_delete() {
        let (_tmp, state) = test_state();

        let req = create_request(serde_json::json!({"name": "API", "url": "https://api.example.com"}));
        let response = handle_create_target(State(state.clone()), Json(req)).await.into_response();
        assert_eq!(response.status(), StatusCode::CREATED);

        let targets = state.store.get_targets().unwrap();
        assert_eq!(targets.len(), 1);
        let id = targets[0].id;

        let response = handle_get_target(State(state.clone()), Path(id)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let response = handle_clear_logs(State(state.clone()), Path(id)).await.into_response();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = handle_delete_target(State(state.clone()), Path(id)).await.into_response();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = handle_get_target(State(state.clone()), Path(id)).await.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_maintenance_endpoint() {
        let (_tmp, state) = test_state();
        let mut target = Target {
            url: "https://example.com".to_string(),
            ..Default::default()
        };
        state.store.add_target(&mut target).unwrap();

        let maintenance = MaintenanceConfig {
            enabled: true,
            reason: Some("upgrade".to_string()),
            ..Default::default()
        };
        let response = handle_set_maintenance(State(state.clone()), Path(target.id), Json(maintenance))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            state.store.get_target(target.id).unwrap().status.last_status,
            LiveStatus::Maintenance
        );

        let response = handle_check_now(State(state.clone()), Path(target.id)).await.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = handle_set_maintenance(State(state.clone()), Path(9999), Json(MaintenanceConfig::default()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_update_settings_bumps_version() {
        let (_tmp, state) = test_state();

        let settings = MonitorSettings {
            log_retention_days: 7,
            ..Default::default()
        };
        let response = handle_update_settings(State(state.clone()), Json(settings)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.scheduler.settings().await.version, 2);
        assert_eq!(state.scheduler.settings().await.log_retention_days, 7);

        let invalid = MonitorSettings {
            log_retention_days: 0,
            ..Default::default()
        };
        let response = handle_update_settings(State(state.clone()), Json(invalid)).await.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.scheduler.settings().await.version, 2);
    }
}
