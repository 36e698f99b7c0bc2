//! Retention manager for expiring old check logs and maintenance windows.

use crate::config::MonitorSettings;
use crate::db::{DbError, Store};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify, RwLock};

/// Result of one housekeeping pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionReport {
    pub logs_deleted: usize,
    pub maintenance_ended: usize,
}

/// Periodic housekeeping task.
pub struct RetentionManager {
    store: Arc<Store>,
    settings: Arc<RwLock<Arc<MonitorSettings>>>,
    reconfigured: Arc<Notify>,
}

impl RetentionManager {
    pub fn new(store: Arc<Store>, settings: Arc<RwLock<Arc<MonitorSettings>>>) -> Self {
        Self {
            store,
            settings,
            reconfigured: Arc::new(Notify::new()),
        }
    }

    /// Tell a running loop to pick up a new housekeeping period.
    pub fn settings_changed(&self) {
        self.reconfigured.notify_one();
    }

    /// Start the housekeeping loop; it exits when `stop` fires.
    pub fn start(&self, mut stop: broadcast::Receiver<()>) {
        let store = self.store.clone();
        let settings = self.settings.clone();
        let reconfigured = self.reconfigured.clone();

        tokio::spawn(async move {
            let mut period = housekeeping_period(&**settings.read().await);
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = stop.recv() => break,
                    _ = reconfigured.notified() => {
                        let next = housekeeping_period(&**settings.read().await);
                        if next != period {
                            tracing::info!("RetentionManager: running every {:?}", next);
                            period = next;
                            interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
                            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                        }
                    }
                    _ = interval.tick() => {
                        let retention_days = settings.read().await.log_retention_days;
                        match process_retention(&store, retention_days, Utc::now()) {
                            Ok(report) if report != RetentionReport::default() => {
                                tracing::info!(
                                    "RetentionManager: deleted {} check logs, ended {} maintenance windows",
                                    report.logs_deleted,
                                    report.maintenance_ended
                                );
                            }
                            Ok(_) => {}
                            Err(e) => tracing::error!("RetentionManager: housekeeping failed: {}", e),
                        }
                    }
                }
            }

            tracing::info!("RetentionManager: stopped");
        });
    }
}

fn housekeeping_period(settings: &MonitorSettings) -> Duration {
    Duration::from_secs(settings.housekeeping_interval_secs.max(1))
}

/// Delete logs past retention and end maintenance windows that have elapsed.
///
/// Both steps run even if the first one fails; the first error is returned.
pub fn process_retention(
    store: &Store,
    retention_days: u32,
    now: DateTime<Utc>,
) -> Result<RetentionReport, DbError> {
    let cutoff = now - ChronoDuration::days(i64::from(retention_days));
    let deleted = store.delete_check_logs_before(cutoff);
    let ended = store.expire_maintenance(now);

    Ok(RetentionReport {
        logs_deleted: deleted?,
        maintenance_ended: ended?,
    })
}
