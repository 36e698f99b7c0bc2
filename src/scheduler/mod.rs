//! Scheduler module for running checks on tiered intervals.
//!
//! Every standard interval tier and the keep-alive lane run as independent
//! periodic tasks. A tick loads its targets, dispatches checks with a small
//! delay between them, bounds concurrency with a per-tick semaphore and
//! waits for every check before the lane sleeps again.

mod recorder;
mod retention;

pub use recorder::*;
pub use retention::*;

use crate::config::{MonitorSettings, SettingsError};
use crate::db::{CheckInterval, Outcome, Store, Target};
use crate::probe::{CheckMode, CheckRequest, CheckResult, Checker};

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock, Semaphore};
use tokio::task::JoinHandle;

/// Pending one-shot checks beyond this are dropped with a warning.
const ONESHOT_QUEUE_SIZE: usize = 256;

/// Extra time granted to a checker beyond its request timeout.
const CHECK_GUARD_GRACE: Duration = Duration::from_secs(2);

/// A group of targets that is checked together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    /// Standard checks for one interval tier.
    Tier(CheckInterval),
    /// Aggressive keep-alive pings, every minute.
    KeepAlive,
    /// One pass over every active target, run at startup.
    Sweep,
}

impl Lane {
    /// Lanes that run on a timer.
    pub fn periodic() -> Vec<Lane> {
        CheckInterval::ALL
            .into_iter()
            .map(Lane::Tier)
            .chain(std::iter::once(Lane::KeepAlive))
            .collect()
    }

    pub fn period(self) -> Option<Duration> {
        match self {
            Lane::Tier(interval) => Some(interval.period()),
            Lane::KeepAlive => Some(Duration::from_secs(60)),
            Lane::Sweep => None,
        }
    }

    pub fn mode(self) -> CheckMode {
        match self {
            Lane::KeepAlive => CheckMode::KeepAlive,
            Lane::Tier(_) | Lane::Sweep => CheckMode::Standard,
        }
    }

    fn load_targets(self, store: &Store) -> Result<Vec<Target>, crate::db::DbError> {
        match self {
            Lane::Tier(interval) => store.list_due_targets(interval),
            Lane::KeepAlive => store.list_keepalive_targets(),
            Lane::Sweep => store.list_active_targets(),
        }
    }

    fn request_for(self, target: &Target, settings: &MonitorSettings) -> CheckRequest {
        match self.mode() {
            CheckMode::KeepAlive => {
                CheckRequest::keep_alive(target, Duration::from_secs(settings.keepalive_timeout_secs))
            }
            CheckMode::Standard => CheckRequest::standard(target),
        }
    }

    /// Delay between dispatching two checks of the same tick.
    fn dispatch_delay(self, settings: &MonitorSettings) -> Duration {
        let base = match self.mode() {
            CheckMode::KeepAlive => settings.keepalive_delay_ms,
            CheckMode::Standard => settings.standard_delay_ms,
        };
        let jitter = if settings.check_jitter_ms > 0 {
            rand::random::<u64>() % (settings.check_jitter_ms + 1)
        } else {
            0
        };
        Duration::from_millis(base + jitter)
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lane::Tier(interval) => write!(f, "{}m", interval.minutes()),
            Lane::KeepAlive => f.write_str("keep-alive"),
            Lane::Sweep => f.write_str("startup sweep"),
        }
    }
}

/// Counts from one tick of a lane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub targets: usize,
    pub up: usize,
    pub down: usize,
    /// Checks whose recording failed or whose task panicked.
    pub failed: usize,
    /// Targets not dispatched, or not recorded, because of shutdown.
    pub abandoned: usize,
}

impl TickSummary {
    fn log(&self, lane: Lane) {
        if self.targets == 0 {
            tracing::debug!("Scheduler: {} tick had no targets", lane);
            return;
        }
        tracing::info!(
            lane = %lane,
            up = self.up,
            down = self.down,
            failed = self.failed,
            abandoned = self.abandoned,
            "Scheduler: {} tick checked {} targets",
            lane,
            self.targets
        );
    }
}

/// How one check ended, from the scheduler's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CheckStatus {
    Recorded(Outcome),
    Failed,
    Abandoned,
}

/// Checker plus recorder, shared by every lane and the one-shot worker.
struct Pipeline {
    store: Arc<Store>,
    checker: Arc<dyn Checker>,
    recorder: Recorder,
}

impl Pipeline {
    async fn run_check(&self, target: Target, request: CheckRequest, shutdown: &AtomicBool) -> CheckStatus {
        let guard = request.timeout + CHECK_GUARD_GRACE;
        let result = match tokio::time::timeout(guard, self.checker.check(&request)).await {
            Ok(result) => result,
            Err(_) => CheckResult::down(
                None,
                guard.as_millis() as u64,
                format!("check timed out after {:?}", guard),
            ),
        };

        if shutdown.load(Ordering::SeqCst) {
            tracing::debug!("Scheduler: dropping result for {} after shutdown", target.name);
            return CheckStatus::Abandoned;
        }

        match self.recorder.record(&target, &result, request.mode) {
            Ok(recorded) => {
                tracing::debug!(
                    target_id = target.id,
                    status = %recorded.target.status.last_status,
                    response_ms = result.response_time_ms,
                    "Scheduler: checked {}",
                    target.name
                );
                CheckStatus::Recorded(result.outcome)
            }
            Err(e) => {
                tracing::error!("Scheduler: failed to record check for {}: {}", target.name, e);
                CheckStatus::Failed
            }
        }
    }
}

/// The main scheduler that orchestrates check execution.
pub struct Scheduler {
    pipeline: Arc<Pipeline>,
    settings: Arc<RwLock<Arc<MonitorSettings>>>,
    shutdown: Arc<AtomicBool>,
    stop_tx: Mutex<Option<broadcast::Sender<()>>>,
    oneshot_tx: mpsc::Sender<i64>,
    retention_manager: RetentionManager,
}

impl Scheduler {
    /// Create a new scheduler. Must be called inside a tokio runtime; the
    /// one-shot worker is spawned immediately.
    pub fn new(store: Arc<Store>, checker: Arc<dyn Checker>, settings: MonitorSettings) -> Self {
        let settings = Arc::new(RwLock::new(Arc::new(settings)));
        let pipeline = Arc::new(Pipeline {
            store: store.clone(),
            checker,
            recorder: Recorder::new(store.clone()),
        });
        let shutdown = Arc::new(AtomicBool::new(false));

        let (oneshot_tx, oneshot_rx) = mpsc::channel(ONESHOT_QUEUE_SIZE);
        tokio::spawn(run_oneshot_worker(
            oneshot_rx,
            pipeline.clone(),
            shutdown.clone(),
        ));

        Self {
            retention_manager: RetentionManager::new(store, settings.clone()),
            pipeline,
            settings,
            shutdown,
            stop_tx: Mutex::new(None),
            oneshot_tx,
        }
    }

    /// Start the startup sweep, every periodic lane and housekeeping.
    ///
    /// Returns false if the scheduler was already running.
    pub async fn start(&self) -> bool {
        let mut stop_guard = self.stop_tx.lock().await;
        if stop_guard.is_some() {
            return false;
        }

        let (stop_tx, _) = broadcast::channel(1);
        *stop_guard = Some(stop_tx.clone());
        self.shutdown.store(false, Ordering::SeqCst);
        drop(stop_guard);

        tracing::info!("Scheduler: starting");
        self.retention_manager.start(stop_tx.subscribe());

        let pipeline = self.pipeline.clone();
        let settings = self.settings.clone();
        let shutdown = self.shutdown.clone();
        let mut sweep_stop = stop_tx.subscribe();

        tokio::spawn(async move {
            let snapshot = settings.read().await.clone();
            tokio::select! {
                _ = sweep_stop.recv() => return,
                summary = run_lane(&pipeline, Lane::Sweep, &snapshot, &shutdown) => summary.log(Lane::Sweep),
            }

            for lane in Lane::periodic() {
                let stop_rx = stop_tx.subscribe();
                if shutdown.load(Ordering::SeqCst) {
                    return;
                }
                tokio::spawn(run_lane_loop(
                    lane,
                    pipeline.clone(),
                    settings.clone(),
                    shutdown.clone(),
                    stop_rx,
                ));
            }
        });

        true
    }

    /// Stop every periodic lane. In-flight checks finish but are not
    /// recorded. Returns false if the scheduler was not running.
    pub async fn stop(&self) -> bool {
        let mut stop_guard = self.stop_tx.lock().await;
        let Some(stop_tx) = stop_guard.take() else {
            return false;
        };

        self.shutdown.store(true, Ordering::SeqCst);
        let _ = stop_tx.send(());
        tracing::info!("Scheduler: stopped");
        true
    }

    pub async fn is_running(&self) -> bool {
        self.stop_tx.lock().await.is_some()
    }

    /// Queue an immediate standard check for a target.
    ///
    /// Returns false when the queue is full or closed; the request path that
    /// asked for the check is never failed by this.
    pub fn submit_check(&self, target_id: i64) -> bool {
        match self.oneshot_tx.try_send(target_id) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Scheduler: one-shot queue full, dropping check for target {}", target_id);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::error!("Scheduler: one-shot worker is gone, dropping check for target {}", target_id);
                false
            }
        }
    }

    /// Run a single tick of a lane now and wait for it to finish.
    pub async fn run_lane_once(&self, lane: Lane) -> TickSummary {
        let snapshot = self.settings().await;
        let summary = run_lane(&self.pipeline, lane, &snapshot, &self.shutdown).await;
        summary.log(lane);
        summary
    }

    /// The settings snapshot new ticks will use.
    pub async fn settings(&self) -> Arc<MonitorSettings> {
        self.settings.read().await.clone()
    }

    /// Replace the settings as a whole. Ticks already running keep the
    /// snapshot they started with.
    pub async fn reconfigure(&self, settings: MonitorSettings) -> Result<Arc<MonitorSettings>, SettingsError> {
        settings.validate()?;

        let mut current = self.settings.write().await;
        let next = Arc::new(MonitorSettings {
            version: current.version + 1,
            ..settings
        });
        *current = next.clone();
        drop(current);
        self.retention_manager.settings_changed();

        tracing::info!("Scheduler: settings updated to version {}", next.version);
        Ok(next)
    }
}

/// Timer loop for one periodic lane. The first tick fires one period after
/// start; missed ticks are skipped rather than bunched.
async fn run_lane_loop(
    lane: Lane,
    pipeline: Arc<Pipeline>,
    settings: Arc<RwLock<Arc<MonitorSettings>>>,
    shutdown: Arc<AtomicBool>,
    mut stop_rx: broadcast::Receiver<()>,
) {
    let Some(period) = lane.period() else {
        return;
    };

    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    tracing::info!("Scheduler: {} lane running every {:?}", lane, period);

    loop {
        tokio::select! {
            _ = stop_rx.recv() => break,
            _ = interval.tick() => {
                let snapshot = settings.read().await.clone();
                run_lane(&pipeline, lane, &snapshot, &shutdown).await.log(lane);
            }
        }
    }

    tracing::debug!("Scheduler: {} lane stopped", lane);
}

/// Run one tick of a lane.
async fn run_lane(
    pipeline: &Arc<Pipeline>,
    lane: Lane,
    settings: &MonitorSettings,
    shutdown: &Arc<AtomicBool>,
) -> TickSummary {
    let mut summary = TickSummary::default();

    let targets = match lane.load_targets(&pipeline.store) {
        Ok(targets) => targets,
        Err(e) => {
            tracing::error!("Scheduler: failed to load targets for {} lane: {}", lane, e);
            return summary;
        }
    };
    summary.targets = targets.len();

    let permits = Arc::new(Semaphore::new(settings.max_concurrent_checks.max(1)));
    let mut handles: Vec<(String, JoinHandle<CheckStatus>)> = Vec::with_capacity(targets.len());

    for (i, target) in targets.into_iter().enumerate() {
        if shutdown.load(Ordering::SeqCst) {
            summary.abandoned += summary.targets - i;
            break;
        }
        if i > 0 {
            tokio::time::sleep(lane.dispatch_delay(settings)).await;
        }

        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };

        let request = lane.request_for(&target, settings);
        let name = target.name.clone();
        let pipeline = pipeline.clone();
        let shutdown = shutdown.clone();

        let handle = tokio::spawn(async move {
            let _permit = permit;
            pipeline.run_check(target, request, &shutdown).await
        });
        handles.push((name, handle));
    }

    for (name, handle) in handles {
        match handle.await {
            Ok(CheckStatus::Recorded(Outcome::Up)) => summary.up += 1,
            Ok(CheckStatus::Recorded(Outcome::Down)) => summary.down += 1,
            Ok(CheckStatus::Failed) => summary.failed += 1,
            Ok(CheckStatus::Abandoned) => summary.abandoned += 1,
            Err(e) => {
                tracing::error!("Scheduler: check task for {} in {} lane failed: {}", name, lane, e);
                summary.failed += 1;
            }
        }
    }

    summary
}

/// Consume one-shot check requests until the scheduler is dropped.
async fn run_oneshot_worker(
    mut rx: mpsc::Receiver<i64>,
    pipeline: Arc<Pipeline>,
    shutdown: Arc<AtomicBool>,
) {
    while let Some(target_id) = rx.recv().await {
        let target = match pipeline.store.get_target(target_id) {
            Ok(target) => target,
            Err(e) => {
                tracing::warn!("Scheduler: one-shot check skipped for target {}: {}", target_id, e);
                continue;
            }
        };

        if !target.active || target.maintenance.enabled {
            tracing::debug!("Scheduler: one-shot check skipped for inactive target {}", target.name);
            continue;
        }

        let request = CheckRequest::standard(&target);
        let task_pipeline = pipeline.clone();
        let task_shutdown = shutdown.clone();
        let handle = tokio::spawn(async move {
            task_pipeline.run_check(target, request, &task_shutdown).await
        });

        if let Err(e) = handle.await {
            tracing::error!("Scheduler: one-shot check for target {} failed: {}", target_id, e);
        }
    }
}
