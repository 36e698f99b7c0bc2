//! Outcome recorder: turns a check result into durable state.

use crate::db::{CheckLogEntry, DbError, Grade, KeepAliveStatus, StatusUpdate, Store, Target, TargetStats};
use crate::probe::{CheckMode, CheckResult};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;

/// What a single `record` call persisted.
#[derive(Debug, Clone)]
pub struct Recorded {
    /// The target as stored after all writes.
    pub target: Target,
    pub log_entry: CheckLogEntry,
    /// An alert became due with this check. Delivery is up to the caller.
    pub alert_due: bool,
}

/// Persists check results against the store.
///
/// Writes are not wrapped in one transaction. The log entry goes first so
/// that history survives a failure in the later status writes.
#[derive(Clone)]
pub struct Recorder {
    store: Arc<Store>,
}

impl Recorder {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn record(&self, target: &Target, result: &CheckResult, mode: CheckMode) -> Result<Recorded, DbError> {
        self.record_at(target, result, mode, Utc::now())
    }

    pub fn record_at(
        &self,
        target: &Target,
        result: &CheckResult,
        mode: CheckMode,
        now: DateTime<Utc>,
    ) -> Result<Recorded, DbError> {
        let mut log_entry = CheckLogEntry {
            id: 0,
            target_id: target.id,
            outcome: result.outcome,
            status_code: result.status_code,
            response_time_ms: Some(result.response_time_ms),
            error_message: result.error_message.clone(),
            created_at: now,
        };
        self.store.append_check_log(&mut log_entry)?;

        let applied = self.store.apply_check(
            target.id,
            &StatusUpdate {
                outcome: result.outcome,
                checked_at: now,
                response_time_ms: Some(result.response_time_ms),
                status_code: result.status_code,
            },
        )?;

        if mode == CheckMode::KeepAlive {
            self.store
                .record_keepalive_ping(target.id, now, KeepAliveStatus::from(result.outcome))?;
        }

        let alert_due = applied.consecutive_failures > 0 && self.store.claim_alert(target.id, now)?;
        if alert_due {
            tracing::warn!(
                target_id = target.id,
                url = %target.url,
                consecutive_failures = applied.consecutive_failures,
                "Alert due for {}: {}",
                target.name,
                result.error_message.as_deref().unwrap_or("check failed")
            );
        }

        let stats = aggregate_stats(&self.store, target.id, now)?;
        self.store.update_stats(target.id, &stats)?;

        let target = self.store.get_target(target.id)?;
        Ok(Recorded {
            target,
            log_entry,
            alert_due,
        })
    }
}

/// Rebuild the rolling windows from the check log.
///
/// Only the window fields and the grade are meaningful in the returned value;
/// counters are maintained by the store.
pub fn aggregate_stats(store: &Store, target_id: i64, now: DateTime<Utc>) -> Result<TargetStats, DbError> {
    let day = store.window_stats(target_id, now - ChronoDuration::hours(24))?;
    let week = store.window_stats(target_id, now - ChronoDuration::days(7))?;
    let month = store.window_stats(target_id, now - ChronoDuration::days(30))?;

    let uptime_24h = day.uptime_percent();
    let avg_response_24h = day.avg_response_ms.unwrap_or(0.0);

    Ok(TargetStats {
        uptime_24h,
        uptime_7d: week.uptime_percent(),
        uptime_30d: month.uptime_percent(),
        avg_response_24h,
        avg_response_7d: week.avg_response_ms.unwrap_or(0.0),
        avg_response_30d: month.avg_response_ms.unwrap_or(0.0),
        grade: compute_grade(uptime_24h, avg_response_24h),
        ..Default::default()
    })
}

/// Grade from 24h uptime (percent) and 24h average response time (ms).
/// First matching band wins.
pub fn compute_grade(uptime_24h: f64, avg_response_24h: f64) -> Grade {
    if uptime_24h >= 99.9 && avg_response_24h < 500.0 {
        Grade::A
    } else if uptime_24h >= 99.5 && avg_response_24h < 1000.0 {
        Grade::B
    } else if uptime_24h >= 99.0 && avg_response_24h < 2000.0 {
        Grade::C
    } else if uptime_24h >= 95.0 {
        Grade::D
    } else {
        Grade::F
    }
}
