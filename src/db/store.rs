//! SQLite database store implementation.

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult, Row};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use super::models::*;

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Database connection lock poisoned")]
    Poisoned,
    #[error("Not found")]
    NotFound,
}

const TARGET_COLUMNS: &str = "id, owner, name, url, method, timeout_secs, interval_minutes, \
     expected_status_codes, body_match, max_response_time_ms, headers, follow_redirects, active, \
     keepalive_enabled, keepalive_platform, keepalive_aggressive, keepalive_last_ping, \
     keepalive_ping_count, keepalive_status, \
     maintenance_enabled, maintenance_start, maintenance_end, maintenance_reason, \
     alert_enabled, alert_threshold, consecutive_failures, last_alert_sent, alert_cooldown_minutes, \
     last_status, last_checked, last_response_time_ms, last_status_code, \
     total_checks, uptime_24h, uptime_7d, uptime_30d, \
     avg_response_24h, avg_response_7d, avg_response_30d, last_incident, grade, created_at";

const LOG_COLUMNS: &str =
    "id, target_id, outcome, status_code, response_time_ms, error_message, created_at";

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Initialize the database with migrations.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn()?;

        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;

        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    // --- Targets ---

    /// Add a new target and return its ID.
    pub fn add_target(&self, target: &mut Target) -> Result<i64, DbError> {
        target.timeout_secs = target.effective_timeout_secs();
        if target.expected_status_codes.is_empty() {
            target.expected_status_codes = DEFAULT_EXPECTED_STATUS_CODES.to_vec();
        }
        target.status.last_status = if target.maintenance.enabled {
            LiveStatus::Maintenance
        } else {
            LiveStatus::Pending
        };

        let expected = serde_json::to_string(&target.expected_status_codes)?;
        let headers = serde_json::to_string(&target.headers)?;

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO targets (owner, name, url, method, timeout_secs, interval_minutes,
                expected_status_codes, body_match, max_response_time_ms, headers, follow_redirects, active,
                keepalive_enabled, keepalive_platform, keepalive_aggressive,
                maintenance_enabled, maintenance_start, maintenance_end, maintenance_reason,
                alert_enabled, alert_threshold, alert_cooldown_minutes,
                last_status, grade, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25)",
            params![
                target.owner,
                target.name,
                target.url,
                target.method.as_str(),
                target.timeout_secs,
                target.interval.minutes(),
                expected,
                target.body_match,
                target.max_response_time_ms.map(|ms| ms as i64),
                headers,
                target.follow_redirects,
                target.active,
                target.keep_alive.enabled,
                target.keep_alive.platform,
                target.keep_alive.aggressive_mode,
                target.maintenance.enabled,
                target.maintenance.start.map(to_millis),
                target.maintenance.end.map(to_millis),
                target.maintenance.reason,
                target.alerting.enabled,
                target.alerting.threshold,
                target.alerting.cooldown_minutes,
                target.status.last_status.as_str(),
                target.stats.grade.as_str(),
                to_millis(target.created_at),
            ],
        )?;
        let id = conn.last_insert_rowid();
        target.id = id;
        Ok(id)
    }

    /// Get all targets.
    pub fn get_targets(&self) -> Result<Vec<Target>, DbError> {
        self.query_targets("1 = 1", [])
    }

    /// Get a target by ID.
    pub fn get_target(&self, id: i64) -> Result<Target, DbError> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM targets WHERE id = ?1", TARGET_COLUMNS);
        conn.query_row(&sql, params![id], target_from_row)
            .optional()?
            .ok_or(DbError::NotFound)
    }

    /// Active targets on the given standard tier, excluding maintenance.
    pub fn list_due_targets(&self, interval: CheckInterval) -> Result<Vec<Target>, DbError> {
        self.query_targets(
            "active = 1 AND maintenance_enabled = 0 AND interval_minutes = ?1",
            params![interval.minutes()],
        )
    }

    /// Active targets in the aggressive keep-alive lane, excluding maintenance.
    pub fn list_keepalive_targets(&self) -> Result<Vec<Target>, DbError> {
        self.query_targets(
            "active = 1 AND maintenance_enabled = 0 AND keepalive_enabled = 1 AND keepalive_aggressive = 1",
            [],
        )
    }

    /// Every active target not under maintenance, regardless of tier.
    pub fn list_active_targets(&self) -> Result<Vec<Target>, DbError> {
        self.query_targets("active = 1 AND maintenance_enabled = 0", [])
    }

    fn query_targets<P: rusqlite::Params>(&self, filter: &str, params: P) -> Result<Vec<Target>, DbError> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM targets WHERE {} ORDER BY id ASC", TARGET_COLUMNS, filter);
        let mut stmt = conn.prepare(&sql)?;
        let targets = stmt
            .query_map(params, target_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(targets)
    }

    /// Delete a target and its check log.
    pub fn delete_target(&self, id: i64) -> Result<(), DbError> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        tx.execute("DELETE FROM check_logs WHERE target_id = ?1", params![id])?;
        let removed = tx.execute("DELETE FROM targets WHERE id = ?1", params![id])?;
        tx.commit()?;

        if removed == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Replace a target's maintenance settings.
    ///
    /// Enabling maintenance shows the target as `maintenance`; disabling it
    /// returns the target to `pending` until its next check completes.
    pub fn set_maintenance(&self, id: i64, maintenance: &MaintenanceConfig) -> Result<(), DbError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE targets SET maintenance_enabled = ?2, maintenance_start = ?3, maintenance_end = ?4,
                maintenance_reason = ?5,
                last_status = CASE
                    WHEN ?2 = 1 THEN 'maintenance'
                    WHEN last_status = 'maintenance' THEN 'pending'
                    ELSE last_status END
             WHERE id = ?1",
            params![
                id,
                maintenance.enabled,
                maintenance.start.map(to_millis),
                maintenance.end.map(to_millis),
                maintenance.reason,
            ],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Turn off maintenance for every target whose window has ended.
    pub fn expire_maintenance(&self, now: DateTime<Utc>) -> Result<usize, DbError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE targets SET maintenance_enabled = 0,
                last_status = CASE WHEN last_status = 'maintenance' THEN 'pending' ELSE last_status END
             WHERE maintenance_enabled = 1 AND maintenance_end IS NOT NULL AND maintenance_end <= ?1",
            params![to_millis(now)],
        )?;
        Ok(changed)
    }

    // --- Check outcomes ---

    /// Apply the live-status fields and counters of a completed check.
    ///
    /// Counters are incremented in SQL so concurrent lanes never lose an
    /// update. A target in maintenance keeps showing `maintenance`.
    pub fn apply_check(&self, target_id: i64, update: &StatusUpdate) -> Result<AppliedCheck, DbError> {
        let conn = self.conn()?;
        conn.query_row(
            "UPDATE targets SET
                last_status = CASE WHEN maintenance_enabled = 1 THEN 'maintenance' ELSE ?2 END,
                last_checked = ?3,
                last_response_time_ms = ?4,
                last_status_code = ?5,
                total_checks = total_checks + 1,
                consecutive_failures = CASE WHEN ?2 = 'up' THEN 0 ELSE consecutive_failures + 1 END,
                last_incident = CASE WHEN ?2 = 'down' AND last_status <> 'down' THEN ?3 ELSE last_incident END
             WHERE id = ?1
             RETURNING consecutive_failures, total_checks",
            params![
                target_id,
                update.outcome.as_str(),
                to_millis(update.checked_at),
                update.response_time_ms.map(|ms| ms as i64),
                update.status_code,
            ],
            |row| {
                Ok(AppliedCheck {
                    consecutive_failures: row.get(0)?,
                    total_checks: row.get(1)?,
                })
            },
        )
        .optional()?
        .ok_or(DbError::NotFound)
    }

    /// Record a keep-alive ping against a target.
    pub fn record_keepalive_ping(
        &self,
        target_id: i64,
        at: DateTime<Utc>,
        status: KeepAliveStatus,
    ) -> Result<(), DbError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE targets SET keepalive_last_ping = ?2, keepalive_ping_count = keepalive_ping_count + 1,
                keepalive_status = ?3
             WHERE id = ?1",
            params![target_id, to_millis(at), status.as_str()],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Atomically claim an alert for the target.
    ///
    /// Returns true when alerting is enabled, the failure streak has reached
    /// the threshold and the cooldown since the previous alert has elapsed.
    /// The claim stamps `last_alert_sent` so only one caller wins.
    pub fn claim_alert(&self, target_id: i64, now: DateTime<Utc>) -> Result<bool, DbError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE targets SET last_alert_sent = ?2
             WHERE id = ?1
                AND alert_enabled = 1
                AND consecutive_failures >= alert_threshold
                AND (last_alert_sent IS NULL OR last_alert_sent + alert_cooldown_minutes * 60000 <= ?2)",
            params![target_id, to_millis(now)],
        )?;
        Ok(changed == 1)
    }

    /// Store freshly aggregated statistics and the grade derived from them.
    pub fn update_stats(&self, target_id: i64, stats: &TargetStats) -> Result<(), DbError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE targets SET uptime_24h = ?2, uptime_7d = ?3, uptime_30d = ?4,
                avg_response_24h = ?5, avg_response_7d = ?6, avg_response_30d = ?7, grade = ?8
             WHERE id = ?1",
            params![
                target_id,
                stats.uptime_24h,
                stats.uptime_7d,
                stats.uptime_30d,
                stats.avg_response_24h,
                stats.avg_response_7d,
                stats.avg_response_30d,
                stats.grade.as_str(),
            ],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    // --- Check log ---

    /// Append a check-log entry and fill in its ID.
    ///
    /// Fails with `NotFound` if the target no longer exists.
    pub fn append_check_log(&self, entry: &mut CheckLogEntry) -> Result<i64, DbError> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT INTO check_logs (target_id, outcome, status_code, response_time_ms, error_message, created_at)
             SELECT ?1, ?2, ?3, ?4, ?5, ?6
             WHERE EXISTS (SELECT 1 FROM targets WHERE id = ?1)",
            params![
                entry.target_id,
                entry.outcome.as_str(),
                entry.status_code,
                entry.response_time_ms.map(|ms| ms as i64),
                entry.error_message,
                to_millis(entry.created_at),
            ],
        )?;
        if inserted == 0 {
            return Err(DbError::NotFound);
        }
        let id = conn.last_insert_rowid();
        entry.id = id;
        Ok(id)
    }

    /// Most recent check-log entries for a target, newest first.
    pub fn get_check_logs(&self, target_id: i64, limit: u32) -> Result<Vec<CheckLogEntry>, DbError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM check_logs WHERE target_id = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2",
            LOG_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let entries = stmt
            .query_map(params![target_id, limit], log_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(entries)
    }

    /// Number of check-log entries stored for a target.
    pub fn count_check_logs(&self, target_id: i64) -> Result<i64, DbError> {
        let conn = self.conn()?;
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM check_logs WHERE target_id = ?1",
            params![target_id],
            |r| r.get(0),
        )?)
    }

    /// Aggregate a target's check log from `since` onwards.
    pub fn window_stats(&self, target_id: i64, since: DateTime<Utc>) -> Result<WindowStats, DbError> {
        let conn = self.conn()?;
        let stats = conn.query_row(
            "SELECT COUNT(*),
                COALESCE(SUM(CASE WHEN outcome = 'up' THEN 1 ELSE 0 END), 0),
                AVG(response_time_ms)
             FROM check_logs WHERE target_id = ?1 AND created_at >= ?2",
            params![target_id, to_millis(since)],
            |row| {
                Ok(WindowStats {
                    total: row.get(0)?,
                    up: row.get(1)?,
                    avg_response_ms: row.get(2)?,
                })
            },
        )?;
        Ok(stats)
    }

    /// Bulk-delete every check-log entry of a target.
    pub fn delete_check_logs(&self, target_id: i64) -> Result<usize, DbError> {
        let conn = self.conn()?;
        Ok(conn.execute("DELETE FROM check_logs WHERE target_id = ?1", params![target_id])?)
    }

    /// Delete check-log entries older than the cutoff.
    pub fn delete_check_logs_before(&self, cutoff: DateTime<Utc>) -> Result<usize, DbError> {
        let conn = self.conn()?;
        Ok(conn.execute(
            "DELETE FROM check_logs WHERE created_at < ?1",
            params![to_millis(cutoff)],
        )?)
    }
}

fn to_millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

fn get_time(row: &Row<'_>, idx: usize) -> SqlResult<Option<DateTime<Utc>>> {
    let ms: Option<i64> = row.get(idx)?;
    Ok(ms.and_then(from_millis))
}

fn get_parsed<T>(row: &Row<'_>, idx: usize) -> SqlResult<T>
where
    T: FromStr<Err = ParseEnumError>,
{
    let text: String = row.get(idx)?;
    text.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn get_json<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> SqlResult<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn get_u64(row: &Row<'_>, idx: usize) -> SqlResult<Option<u64>> {
    let value: Option<i64> = row.get(idx)?;
    Ok(value.and_then(|v| u64::try_from(v).ok()))
}

fn target_from_row(row: &Row<'_>) -> SqlResult<Target> {
    let interval_minutes: u32 = row.get(6)?;
    let interval = CheckInterval::try_from(interval_minutes)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Integer, Box::new(e)))?;

    Ok(Target {
        id: row.get(0)?,
        owner: row.get(1)?,
        name: row.get(2)?,
        url: row.get(3)?,
        method: get_parsed(row, 4)?,
        timeout_secs: row.get(5)?,
        interval,
        expected_status_codes: get_json(row, 7)?,
        body_match: row.get(8)?,
        max_response_time_ms: get_u64(row, 9)?,
        headers: get_json(row, 10)?,
        follow_redirects: row.get(11)?,
        active: row.get(12)?,
        keep_alive: KeepAliveConfig {
            enabled: row.get(13)?,
            platform: row.get(14)?,
            aggressive_mode: row.get(15)?,
            last_ping: get_time(row, 16)?,
            ping_count: row.get(17)?,
            status: get_parsed(row, 18)?,
        },
        maintenance: MaintenanceConfig {
            enabled: row.get(19)?,
            start: get_time(row, 20)?,
            end: get_time(row, 21)?,
            reason: row.get(22)?,
        },
        alerting: AlertingConfig {
            enabled: row.get(23)?,
            threshold: row.get(24)?,
            consecutive_failures: row.get(25)?,
            last_alert_sent: get_time(row, 26)?,
            cooldown_minutes: row.get(27)?,
        },
        status: LiveState {
            last_status: get_parsed(row, 28)?,
            last_checked: get_time(row, 29)?,
            last_response_time_ms: get_u64(row, 30)?,
            last_status_code: row.get(31)?,
        },
        stats: TargetStats {
            total_checks: row.get(32)?,
            uptime_24h: row.get(33)?,
            uptime_7d: row.get(34)?,
            uptime_30d: row.get(35)?,
            avg_response_24h: row.get(36)?,
            avg_response_7d: row.get(37)?,
            avg_response_30d: row.get(38)?,
            last_incident: get_time(row, 39)?,
            grade: get_parsed(row, 40)?,
        },
        created_at: get_time(row, 41)?.unwrap_or_else(Utc::now),
    })
}

fn log_from_row(row: &Row<'_>) -> SqlResult<CheckLogEntry> {
    Ok(CheckLogEntry {
        id: row.get(0)?,
        target_id: row.get(1)?,
        outcome: get_parsed(row, 2)?,
        status_code: row.get(3)?,
        response_time_ms: get_u64(row, 4)?,
        error_message: row.get(5)?,
        created_at: get_time(row, 6)?.unwrap_or_else(Utc::now),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use tempfile::NamedTempFile;

    fn test_store() -> (NamedTempFile, Store) {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        (tmp, store)
    }

    fn new_target(store: &Store, url: &str, interval: CheckInterval) -> Target {
        let mut target = Target {
            name: url.to_string(),
            url: url.to_string(),
            interval,
            ..Default::default()
        };
        store.add_target(&mut target).unwrap();
        target
    }

    fn log_entry(target_id: i64, outcome: Outcome, response_ms: u64, at: DateTime<Utc>) -> CheckLogEntry {
        CheckLogEntry {
            id: 0,
            target_id,
            outcome,
            status_code: Some(200),
            response_time_ms: Some(response_ms),
            error_message: None,
            created_at: at,
        }
    }

    #[test]
    fn test_target_round_trip() {
        let (_tmp, store) = test_store();

        let mut target = Target {
            owner: "user-1".to_string(),
            name: "Docs".to_string(),
            url: "https://docs.example.com".to_string(),
            method: HttpMethod::Head,
            timeout_secs: 90,
            interval: CheckInterval::ThirtyMinutes,
            body_match: Some("Welcome".to_string()),
            headers: vec![HeaderEntry { name: "X-Probe".to_string(), value: "1".to_string() }],
            ..Default::default()
        };
        target.keep_alive.enabled = true;
        target.keep_alive.platform = "render".to_string();
        let id = store.add_target(&mut target).unwrap();
        assert!(id > 0);

        let fetched = store.get_target(id).unwrap();
        assert_eq!(fetched.owner, "user-1");
        assert_eq!(fetched.method, HttpMethod::Head);
        assert_eq!(fetched.timeout_secs, 60);
        assert_eq!(fetched.interval, CheckInterval::ThirtyMinutes);
        assert_eq!(fetched.body_match.as_deref(), Some("Welcome"));
        assert_eq!(fetched.headers.len(), 1);
        assert_eq!(fetched.keep_alive.platform, "render");
        assert_eq!(fetched.status.last_status, LiveStatus::Pending);
        assert_eq!(fetched.stats.grade, Grade::A);
    }

    #[test]
    fn test_delete_target_removes_logs() {
        let (_tmp, store) = test_store();
        let target = new_target(&store, "https://a.example.com", CheckInterval::FiveMinutes);

        let mut entry = log_entry(target.id, Outcome::Up, 50, Utc::now());
        store.append_check_log(&mut entry).unwrap();
        assert_eq!(store.count_check_logs(target.id).unwrap(), 1);

        store.delete_target(target.id).unwrap();
        assert!(matches!(store.get_target(target.id), Err(DbError::NotFound)));
        assert_eq!(store.count_check_logs(target.id).unwrap(), 0);
        assert!(matches!(store.delete_target(target.id), Err(DbError::NotFound)));

        let mut late = log_entry(target.id, Outcome::Up, 50, Utc::now());
        assert!(matches!(store.append_check_log(&mut late), Err(DbError::NotFound)));
        assert_eq!(store.count_check_logs(target.id).unwrap(), 0);
    }

    #[test]
    fn test_lane_queries_filter_by_tier_and_maintenance() {
        let (_tmp, store) = test_store();
        let one = new_target(&store, "https://one.example.com", CheckInterval::OneMinute);
        let five = new_target(&store, "https://five.example.com", CheckInterval::FiveMinutes);
        let paused = new_target(&store, "https://paused.example.com", CheckInterval::FiveMinutes);

        let mut keepalive = Target {
            url: "https://sleepy.example.com".to_string(),
            interval: CheckInterval::SixtyMinutes,
            ..Default::default()
        };
        keepalive.keep_alive.enabled = true;
        keepalive.keep_alive.aggressive_mode = true;
        store.add_target(&mut keepalive).unwrap();

        store
            .set_maintenance(paused.id, &MaintenanceConfig { enabled: true, ..Default::default() })
            .unwrap();

        let ones: Vec<i64> = store.list_due_targets(CheckInterval::OneMinute).unwrap().iter().map(|t| t.id).collect();
        assert_eq!(ones, vec![one.id]);

        let fives: Vec<i64> = store.list_due_targets(CheckInterval::FiveMinutes).unwrap().iter().map(|t| t.id).collect();
        assert_eq!(fives, vec![five.id]);

        let lane: Vec<i64> = store.list_keepalive_targets().unwrap().iter().map(|t| t.id).collect();
        assert_eq!(lane, vec![keepalive.id]);

        assert_eq!(store.list_active_targets().unwrap().len(), 3);
        assert_eq!(store.get_target(paused.id).unwrap().status.last_status, LiveStatus::Maintenance);
    }

    #[test]
    fn test_apply_check_counters() {
        let (_tmp, store) = test_store();
        let target = new_target(&store, "https://a.example.com", CheckInterval::FiveMinutes);
        let now = Utc::now();

        let down = StatusUpdate { outcome: Outcome::Down, checked_at: now, response_time_ms: Some(3000), status_code: None };
        let up = StatusUpdate { outcome: Outcome::Up, checked_at: now, response_time_ms: Some(80), status_code: Some(200) };

        assert_eq!(store.apply_check(target.id, &down).unwrap().consecutive_failures, 1);
        assert_eq!(store.apply_check(target.id, &down).unwrap().consecutive_failures, 2);
        let applied = store.apply_check(target.id, &up).unwrap();
        assert_eq!(applied.consecutive_failures, 0);
        assert_eq!(applied.total_checks, 3);

        let fetched = store.get_target(target.id).unwrap();
        assert_eq!(fetched.status.last_status, LiveStatus::Up);
        assert_eq!(fetched.status.last_status_code, Some(200));
        assert_eq!(fetched.stats.last_incident.map(|t| t.timestamp_millis()), Some(now.timestamp_millis()));

        assert!(matches!(store.apply_check(9999, &up), Err(DbError::NotFound)));
    }

    #[test]
    fn test_claim_alert_respects_threshold_and_cooldown() {
        let (_tmp, store) = test_store();
        let target = new_target(&store, "https://a.example.com", CheckInterval::FiveMinutes);
        let now = Utc::now();
        let down = StatusUpdate { outcome: Outcome::Down, checked_at: now, response_time_ms: None, status_code: None };

        for _ in 0..2 {
            store.apply_check(target.id, &down).unwrap();
            assert!(!store.claim_alert(target.id, now).unwrap());
        }
        store.apply_check(target.id, &down).unwrap();
        assert!(store.claim_alert(target.id, now).unwrap());
        assert!(!store.claim_alert(target.id, now + ChronoDuration::minutes(29)).unwrap());
        assert!(store.claim_alert(target.id, now + ChronoDuration::minutes(30)).unwrap());
    }

    #[test]
    fn test_window_stats_and_retention() {
        let (_tmp, store) = test_store();
        let target = new_target(&store, "https://a.example.com", CheckInterval::FiveMinutes);
        let now = Utc::now();

        for (outcome, ms, age_hours) in [
            (Outcome::Up, 100, 1),
            (Outcome::Down, 300, 2),
            (Outcome::Up, 200, 48),
            (Outcome::Up, 200, 24 * 40),
        ] {
            let mut entry = log_entry(target.id, outcome, ms, now - ChronoDuration::hours(age_hours));
            store.append_check_log(&mut entry).unwrap();
        }

        let day = store.window_stats(target.id, now - ChronoDuration::hours(24)).unwrap();
        assert_eq!(day.total, 2);
        assert_eq!(day.up, 1);
        assert_eq!(day.avg_response_ms, Some(200.0));
        assert_eq!(day.uptime_percent(), 50.0);

        let month = store.window_stats(target.id, now - ChronoDuration::days(30)).unwrap();
        assert_eq!(month.total, 3);

        let removed = store.delete_check_logs_before(now - ChronoDuration::days(30)).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.count_check_logs(target.id).unwrap(), 3);

        let logs = store.get_check_logs(target.id, 2).unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].response_time_ms, Some(100));
    }

    #[test]
    fn test_expire_maintenance() {
        let (_tmp, store) = test_store();
        let target = new_target(&store, "https://a.example.com", CheckInterval::FiveMinutes);
        let now = Utc::now();

        store
            .set_maintenance(
                target.id,
                &MaintenanceConfig {
                    enabled: true,
                    start: Some(now - ChronoDuration::hours(2)),
                    end: Some(now - ChronoDuration::minutes(1)),
                    reason: Some("database upgrade".to_string()),
                },
            )
            .unwrap();

        assert_eq!(store.expire_maintenance(now).unwrap(), 1);
        let fetched = store.get_target(target.id).unwrap();
        assert!(!fetched.maintenance.enabled);
        assert_eq!(fetched.status.last_status, LiveStatus::Pending);
        assert_eq!(store.expire_maintenance(now).unwrap(), 0);
    }
}
