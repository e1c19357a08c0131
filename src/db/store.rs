//! SQLite database store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Result as SqlResult, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;

use super::models::*;

mod embedded {
    refinery::embed_migrations!("migrations");
}

/// Results deleted per statement while pruning, so appends can interleave.
const PRUNE_BATCH: usize = 5_000;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

const TARGET_COLUMNS: &str = "id, region, public_ip, port, business_system, internal_ip, \
     internal_port, is_active, created_at, updated_at";

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Not found")]
    NotFound,
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Invalid input: {0}")]
    Invalid(String),
    #[error("database connection lock poisoned")]
    Poisoned,
}

#[derive(Error, Debug)]
#[error("unparseable timestamp {0:?}")]
struct BadTimestamp(String);

/// Thread-safe database store.
///
/// Writes go through one connection and reads through another; with WAL
/// journaling a reader never waits on an in-progress write and only ever sees
/// committed rows.
#[derive(Clone)]
pub struct Store {
    writer: Arc<Mutex<Connection>>,
    reader: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) the database at `path` and bring the schema up to date.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let path = path.as_ref();

        let mut writer = Connection::open(path)?;
        configure(&writer)?;
        embedded::migrations::runner()
            .run(&mut writer)
            .map_err(|e| DbError::Migration(e.to_string()))?;

        let reader = Connection::open(path)?;
        configure(&reader)?;
        reader.pragma_update(None, "query_only", "ON")?;

        Ok(Self {
            writer: Arc::new(Mutex::new(writer)),
            reader: Arc::new(Mutex::new(reader)),
        })
    }

    fn writer(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.writer.lock().map_err(|_| DbError::Poisoned)
    }

    fn reader(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.reader.lock().map_err(|_| DbError::Poisoned)
    }

    // --- Target registry ---

    /// Register a new target.
    pub fn add_target(&self, new: &NewTarget) -> Result<Target, DbError> {
        new.validate().map_err(DbError::Invalid)?;

        let now = Utc::now();
        let conn = self.writer()?;
        conn.execute(
            "INSERT INTO targets (region, public_ip, port, business_system, internal_ip, internal_port, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                new.region.trim(),
                new.public_ip,
                new.port,
                new.business_system,
                new.internal_ip,
                new.internal_port,
                new.is_active,
                format_db_time(now),
            ],
        )
        .map_err(|e| conflict(e, || format!("target {}:{} already exists", new.public_ip, new.port)))?;

        let id = conn.last_insert_rowid();
        select_target(&conn, id)
    }

    /// Get a target by ID.
    pub fn get_target(&self, id: i64) -> Result<Target, DbError> {
        let conn = self.reader()?;
        select_target(&conn, id)
    }

    /// List targets, optionally filtered by region and active flag.
    pub fn list_targets(&self, region: Option<&str>, is_active: Option<bool>) -> Result<Vec<Target>, DbError> {
        self.select_targets(region, is_active, 0, -1)
    }

    /// One page of [`Store::list_targets`], skipping `skip` rows.
    pub fn page_targets(
        &self,
        region: Option<&str>,
        is_active: Option<bool>,
        skip: u32,
        limit: u32,
    ) -> Result<Vec<Target>, DbError> {
        self.select_targets(region, is_active, i64::from(skip), i64::from(limit))
    }

    fn select_targets(
        &self,
        region: Option<&str>,
        is_active: Option<bool>,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Target>, DbError> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TARGET_COLUMNS} FROM targets
             WHERE (?1 IS NULL OR region = ?1) AND (?2 IS NULL OR is_active = ?2)
             ORDER BY id ASC
             LIMIT ?3 OFFSET ?4"
        ))?;

        let targets = stmt
            .query_map(params![region, is_active, limit, offset], target_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(targets)
    }

    /// Owned snapshot of every active target.
    pub fn list_active_targets(&self) -> Result<Vec<Target>, DbError> {
        self.list_targets(None, Some(true))
    }

    /// Apply a partial update to a target.
    pub fn update_target(&self, id: i64, update: &TargetUpdate) -> Result<Target, DbError> {
        let conn = self.writer()?;
        let mut target = select_target(&conn, id)?;
        update.apply(&mut target).map_err(DbError::Invalid)?;
        target.updated_at = Utc::now();

        conn.execute(
            "UPDATE targets SET region=?1, public_ip=?2, port=?3, business_system=?4, internal_ip=?5,
             internal_port=?6, is_active=?7, updated_at=?8 WHERE id=?9",
            params![
                target.region,
                target.public_ip,
                target.port,
                target.business_system,
                target.internal_ip,
                target.internal_port,
                target.is_active,
                format_db_time(target.updated_at),
                id,
            ],
        )
        .map_err(|e| conflict(e, || format!("target {}:{} already exists", target.public_ip, target.port)))?;

        Ok(target)
    }

    /// Activate or deactivate a target.
    #[cfg(test)]
    pub fn set_target_active(&self, id: i64, active: bool) -> Result<Target, DbError> {
        self.update_target(
            id,
            &TargetUpdate {
                is_active: Some(active),
                ..Default::default()
            },
        )
    }

    /// Flip a target's active flag.
    pub fn toggle_target(&self, id: i64) -> Result<Target, DbError> {
        let conn = self.writer()?;
        let changed = conn.execute(
            "UPDATE targets SET is_active = NOT is_active, updated_at = ?1 WHERE id = ?2",
            params![format_db_time(Utc::now()), id],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound);
        }
        select_target(&conn, id)
    }

    /// Delete a target. Its results stay behind with a null target link.
    pub fn delete_target(&self, id: i64) -> Result<(), DbError> {
        let conn = self.writer()?;
        let changed = conn.execute("DELETE FROM targets WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Delete several targets, returning how many existed.
    pub fn delete_targets(&self, ids: &[i64]) -> Result<usize, DbError> {
        let conn = self.writer()?;
        let tx = conn.unchecked_transaction()?;
        let mut deleted = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM targets WHERE id = ?1")?;
            for id in ids {
                deleted += stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(deleted)
    }

    /// Distinct regions across all registered targets.
    pub fn list_regions(&self) -> Result<Vec<String>, DbError> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare("SELECT DISTINCT region FROM targets ORDER BY region ASC")?;
        let regions = stmt
            .query_map([], |row| row.get(0))?
            .collect::<SqlResult<Vec<String>>>()?;
        Ok(regions)
    }

    /// Active target counts grouped by region.
    pub fn active_region_counts(&self) -> Result<Vec<RegionCount>, DbError> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            "SELECT region, COUNT(*) FROM targets WHERE is_active = 1 GROUP BY region ORDER BY region ASC",
        )?;
        let counts = stmt
            .query_map([], |row| {
                Ok(RegionCount {
                    region: row.get(0)?,
                    count: row.get(1)?,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(counts)
    }

    // --- Probe results ---

    /// Persist one probe result.
    ///
    /// If the target was deleted after the cycle snapshot the row is kept with
    /// a null target link instead of failing the foreign key.
    pub fn append_result(&self, result: &ProbeResult) -> Result<i64, DbError> {
        let conn = self.writer()?;
        conn.execute(
            "INSERT INTO probe_results (target_id, region, public_ip, port, latency_ms, is_successful, probe_time)
             VALUES ((SELECT id FROM targets WHERE id = ?1), ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                result.target_id,
                result.region,
                result.public_ip,
                result.port,
                result.latency_ms,
                result.is_successful,
                format_db_time(result.probe_time),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Results matching `filter`, oldest first.
    pub fn query_results(&self, filter: &ResultFilter) -> Result<Vec<ProbeResult>, DbError> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            "SELECT target_id, region, public_ip, port, latency_ms, is_successful, probe_time
             FROM probe_results
             WHERE probe_time >= ?1 AND probe_time < ?2
               AND (?3 IS NULL OR target_id = ?3)
               AND (?4 IS NULL OR region = ?4)
             ORDER BY probe_time ASC, id ASC
             LIMIT ?5",
        )?;

        let results = stmt
            .query_map(
                params![
                    format_db_time(filter.start),
                    format_db_time(filter.end),
                    filter.target_id,
                    filter.region,
                    filter.limit,
                ],
                |row| {
                    Ok(ProbeResult {
                        target_id: row.get(0)?,
                        region: row.get(1)?,
                        public_ip: row.get(2)?,
                        port: row.get(3)?,
                        latency_ms: row.get(4)?,
                        is_successful: row.get(5)?,
                        probe_time: time_column(row, 6)?,
                    })
                },
            )?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(results)
    }

    /// Delete every result strictly older than `cutoff`, returning the count.
    ///
    /// Runs in batches and releases the writer between them.
    pub fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize, DbError> {
        let cutoff = format_db_time(cutoff);
        let mut total = 0;

        loop {
            let deleted = {
                let conn = self.writer()?;
                conn.execute(
                    "DELETE FROM probe_results WHERE id IN
                     (SELECT id FROM probe_results WHERE probe_time < ?1 LIMIT ?2)",
                    params![cutoff, PRUNE_BATCH as i64],
                )?
            };
            total += deleted;
            if deleted < PRUNE_BATCH {
                break;
            }
        }

        Ok(total)
    }

    /// Per-target probe counts and mean successful latency within `[start, end)`.
    pub fn aggregate_results(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        region: Option<&str>,
    ) -> Result<Vec<TargetAggregate>, DbError> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            "SELECT r.target_id, r.region, r.public_ip, r.port, t.business_system,
                    COUNT(*),
                    SUM(CASE WHEN r.is_successful = 1 THEN 1 ELSE 0 END),
                    AVG(CASE WHEN r.is_successful = 1 THEN r.latency_ms END)
             FROM probe_results r
             LEFT JOIN targets t ON t.id = r.target_id
             WHERE r.probe_time >= ?1 AND r.probe_time < ?2 AND (?3 IS NULL OR r.region = ?3)
             GROUP BY r.target_id, r.region, r.public_ip, r.port
             ORDER BY r.region ASC, r.public_ip ASC, r.port ASC",
        )?;

        let rows = stmt
            .query_map(
                params![format_db_time(start), format_db_time(end), region],
                |row| {
                    Ok(TargetAggregate {
                        target_id: row.get(0)?,
                        region: row.get(1)?,
                        public_ip: row.get(2)?,
                        port: row.get(3)?,
                        business_system: row.get(4)?,
                        total_probes: row.get(5)?,
                        successful_probes: row.get(6)?,
                        avg_latency_ms: row.get(7)?,
                    })
                },
            )?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(rows)
    }

    /// Total and successful result counts since `since`.
    pub fn count_results_since(&self, since: DateTime<Utc>) -> Result<(i64, i64), DbError> {
        let conn = self.reader()?;
        let counts = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(CASE WHEN is_successful = 1 THEN 1 ELSE 0 END), 0)
             FROM probe_results WHERE probe_time >= ?1",
            params![format_db_time(since)],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(counts)
    }

    // --- Settings ---

    pub fn get_setting(&self, key: &str) -> Result<Option<String>, DbError> {
        let conn = self.reader()?;
        let value = conn
            .query_row("SELECT value FROM settings WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<(), DbError> {
        let conn = self.writer()?;
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }
}

fn configure(conn: &Connection) -> Result<(), DbError> {
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    let _mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    Ok(())
}

fn conflict(err: rusqlite::Error, describe: impl FnOnce() -> String) -> DbError {
    match err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            DbError::Conflict(describe())
        }
        other => DbError::Sqlite(other),
    }
}

fn select_target(conn: &Connection, id: i64) -> Result<Target, DbError> {
    conn.query_row(
        &format!("SELECT {TARGET_COLUMNS} FROM targets WHERE id = ?1"),
        params![id],
        target_from_row,
    )
    .optional()?
    .ok_or(DbError::NotFound)
}

fn target_from_row(row: &Row<'_>) -> SqlResult<Target> {
    Ok(Target {
        id: row.get(0)?,
        region: row.get(1)?,
        public_ip: row.get(2)?,
        port: row.get(3)?,
        business_system: row.get(4)?,
        internal_ip: row.get(5)?,
        internal_port: row.get(6)?,
        is_active: row.get(7)?,
        created_at: time_column(row, 8)?,
        updated_at: time_column(row, 9)?,
    })
}

fn time_column(row: &Row<'_>, idx: usize) -> SqlResult<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_db_time(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            Box::new(BadTimestamp(raw)),
        )
    })
}

/// Fixed-width UTC text, so string order matches time order.
pub fn format_db_time(dt: DateTime<Utc>) -> String {
    dt.format(TIME_FORMAT).to_string()
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [
        TIME_FORMAT,
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
    ];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use tempfile::NamedTempFile;

    fn store() -> (NamedTempFile, Store) {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        (tmp, store)
    }

    fn result_at(target: &Target, time: DateTime<Utc>, latency: Option<f64>) -> ProbeResult {
        match latency {
            Some(ms) => ProbeResult::success(target, ms, time),
            None => ProbeResult::failure(target, time),
        }
    }

    #[test]
    fn test_target_crud() {
        let (_tmp, store) = store();

        let target = store.add_target(&NewTarget::new("SG", "8.8.8.8", 53)).unwrap();
        assert!(target.id > 0);
        assert!(target.is_active);

        let fetched = store.get_target(target.id).unwrap();
        assert_eq!(fetched.region, "SG");
        assert_eq!(fetched.port, 53);

        let updated = store
            .update_target(
                target.id,
                &TargetUpdate {
                    business_system: Some("dns".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.business_system.as_deref(), Some("dns"));
        assert_eq!(store.get_target(target.id).unwrap().business_system.as_deref(), Some("dns"));

        store.delete_target(target.id).unwrap();
        assert!(matches!(store.get_target(target.id), Err(DbError::NotFound)));
        assert!(matches!(store.delete_target(target.id), Err(DbError::NotFound)));
    }

    #[test]
    fn test_duplicate_endpoint_is_conflict() {
        let (_tmp, store) = store();
        store.add_target(&NewTarget::new("SG", "8.8.8.8", 53)).unwrap();

        let err = store.add_target(&NewTarget::new("HK", "8.8.8.8", 53)).unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));

        let other = store.add_target(&NewTarget::new("SG", "8.8.8.8", 443)).unwrap();
        let err = store
            .update_target(
                other.id,
                &TargetUpdate {
                    port: Some(53),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));
    }

    #[test]
    fn test_invalid_target_rejected() {
        let (_tmp, store) = store();
        let err = store.add_target(&NewTarget::new("SG", "", 53)).unwrap_err();
        assert!(matches!(err, DbError::Invalid(_)));
    }

    #[test]
    fn test_active_listing_and_toggle() {
        let (_tmp, store) = store();
        let a = store.add_target(&NewTarget::new("SG", "10.0.0.1", 80)).unwrap();
        let b = store.add_target(&NewTarget::new("HK", "10.0.0.2", 80)).unwrap();

        assert_eq!(store.list_active_targets().unwrap().len(), 2);

        let toggled = store.toggle_target(a.id).unwrap();
        assert!(!toggled.is_active);
        let active = store.list_active_targets().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, b.id);

        assert!(store.set_target_active(a.id, true).unwrap().is_active);
        assert_eq!(store.list_targets(Some("HK"), None).unwrap().len(), 1);
        assert_eq!(store.list_regions().unwrap(), vec!["HK".to_string(), "SG".to_string()]);
        assert_eq!(store.active_region_counts().unwrap().len(), 2);
        assert!(matches!(store.toggle_target(999), Err(DbError::NotFound)));
    }

    #[test]
    fn test_page_targets() {
        let (_tmp, store) = store();
        for i in 1..=5 {
            store.add_target(&NewTarget::new("SG", &format!("10.0.0.{}", i), 80)).unwrap();
        }
        store.add_target(&NewTarget::new("HK", "10.0.1.1", 80)).unwrap();

        let first = store.page_targets(None, None, 0, 2).unwrap();
        let ips: Vec<_> = first.iter().map(|t| t.public_ip.as_str()).collect();
        assert_eq!(ips, vec!["10.0.0.1", "10.0.0.2"]);

        let rest = store.page_targets(Some("SG"), None, 3, 10).unwrap();
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].public_ip, "10.0.0.4");

        assert!(store.page_targets(None, None, 100, 10).unwrap().is_empty());
        assert_eq!(store.list_targets(None, None).unwrap().len(), 6);
    }

    #[test]
    fn test_region_is_trimmed_on_insert_and_update() {
        let (_tmp, store) = store();
        let a = store.add_target(&NewTarget::new("SG ", "10.0.0.1", 80)).unwrap();
        let b = store.add_target(&NewTarget::new("HK", "10.0.0.2", 80)).unwrap();
        assert_eq!(a.region, "SG");

        let moved = store
            .update_target(
                b.id,
                &TargetUpdate {
                    region: Some(" SG ".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(moved.region, "SG");
        assert_eq!(store.list_regions().unwrap(), vec!["SG".to_string()]);
    }

    #[test]
    fn test_query_results_filters_and_orders() {
        let (_tmp, store) = store();
        let sg = store.add_target(&NewTarget::new("SG", "10.0.0.1", 80)).unwrap();
        let hk = store.add_target(&NewTarget::new("HK", "10.0.0.2", 80)).unwrap();
        let now = Utc::now();

        store.append_result(&result_at(&sg, now - ChronoDuration::minutes(1), Some(5.0))).unwrap();
        store.append_result(&result_at(&sg, now - ChronoDuration::minutes(3), None)).unwrap();
        store.append_result(&result_at(&hk, now - ChronoDuration::minutes(2), Some(7.0))).unwrap();
        store.append_result(&result_at(&sg, now - ChronoDuration::days(2), Some(1.0))).unwrap();

        let window = ResultFilter::between(now - ChronoDuration::hours(1), now);
        let all = store.query_results(&window).unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| w[0].probe_time <= w[1].probe_time));

        let only_sg = store
            .query_results(&ResultFilter {
                target_id: Some(sg.id),
                ..window.clone()
            })
            .unwrap();
        assert_eq!(only_sg.len(), 2);
        assert!(!only_sg[0].is_successful);
        assert_eq!(only_sg[0].latency_ms, FAILED_LATENCY_MS);

        let only_hk = store
            .query_results(&ResultFilter {
                region: Some("HK".to_string()),
                ..window
            })
            .unwrap();
        assert_eq!(only_hk.len(), 1);
        assert_eq!(only_hk[0].latency_ms, 7.0);
    }

    #[test]
    fn test_deleted_target_keeps_orphaned_results() {
        let (_tmp, store) = store();
        let target = store.add_target(&NewTarget::new("SG", "10.0.0.1", 80)).unwrap();
        let now = Utc::now();

        store.append_result(&result_at(&target, now - ChronoDuration::seconds(5), Some(3.0))).unwrap();
        store.delete_target(target.id).unwrap();

        // A result produced from a snapshot taken before the delete.
        store.append_result(&result_at(&target, now - ChronoDuration::seconds(1), None)).unwrap();

        let rows = store
            .query_results(&ResultFilter::between(now - ChronoDuration::minutes(1), now))
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.target_id.is_none()));
        assert!(rows.iter().all(|r| r.public_ip == "10.0.0.1"));
    }

    #[test]
    fn test_prune_removes_only_strictly_older() {
        let (_tmp, store) = store();
        let target = store.add_target(&NewTarget::new("SG", "8.8.8.8", 53)).unwrap();
        let now = Utc::now();

        for days in [29, 30, 31] {
            store
                .append_result(&result_at(&target, now - ChronoDuration::days(days), Some(10.0)))
                .unwrap();
        }

        let cutoff = now - ChronoDuration::days(30);
        assert_eq!(store.prune_before(cutoff).unwrap(), 1);

        let everything = ResultFilter::between(now - ChronoDuration::days(365), now);
        let after_first = store.query_results(&everything).unwrap();
        assert_eq!(after_first.len(), 2);
        assert!(after_first.iter().all(|r| r.probe_time >= cutoff));

        assert_eq!(store.prune_before(cutoff).unwrap(), 0);
        assert_eq!(store.query_results(&everything).unwrap(), after_first);
    }

    #[test]
    fn test_prune_spans_multiple_batches() {
        let (_tmp, store) = store();
        let target = store.add_target(&NewTarget::new("SG", "8.8.8.8", 53)).unwrap();
        let old = Utc::now() - ChronoDuration::days(40);

        for i in 0..(PRUNE_BATCH + 10) {
            let time = old + ChronoDuration::milliseconds(i as i64);
            store.append_result(&result_at(&target, time, None)).unwrap();
        }

        assert_eq!(store.prune_before(Utc::now() - ChronoDuration::days(30)).unwrap(), PRUNE_BATCH + 10);
    }

    #[test]
    fn test_aggregate_results() {
        let (_tmp, store) = store();
        let target = store.add_target(&NewTarget::new("SG", "8.8.8.8", 53)).unwrap();
        let dead = store.add_target(&NewTarget::new("HK", "10.9.9.9", 22)).unwrap();
        let now = Utc::now();

        store.append_result(&result_at(&target, now - ChronoDuration::minutes(2), Some(10.0))).unwrap();
        store.append_result(&result_at(&target, now - ChronoDuration::minutes(1), Some(20.0))).unwrap();
        store.append_result(&result_at(&target, now - ChronoDuration::minutes(1), None)).unwrap();
        store.append_result(&result_at(&dead, now - ChronoDuration::minutes(1), None)).unwrap();

        let rows = store
            .aggregate_results(now - ChronoDuration::hours(1), now, None)
            .unwrap();
        assert_eq!(rows.len(), 2);

        let sg = rows.iter().find(|r| r.region == "SG").unwrap();
        assert_eq!(sg.total_probes, 3);
        assert_eq!(sg.successful_probes, 2);
        assert_eq!(sg.avg_latency_ms, Some(15.0));

        let hk = rows.iter().find(|r| r.region == "HK").unwrap();
        assert_eq!(hk.successful_probes, 0);
        assert_eq!(hk.avg_latency_ms, None);

        let filtered = store
            .aggregate_results(now - ChronoDuration::hours(1), now, Some("HK"))
            .unwrap();
        assert_eq!(filtered.len(), 1);

        assert_eq!(store.count_results_since(now - ChronoDuration::hours(1)).unwrap(), (4, 2));
    }

    #[test]
    fn test_settings_roundtrip() {
        let (_tmp, store) = store();
        assert_eq!(store.get_setting("probe_interval").unwrap(), None);
        store.set_setting("probe_interval", "60").unwrap();
        store.set_setting("probe_interval", "120").unwrap();
        assert_eq!(store.get_setting("probe_interval").unwrap().as_deref(), Some("120"));
    }

    #[test]
    fn test_parse_db_time_formats() {
        let now = Utc::now();
        assert_eq!(parse_db_time(&format_db_time(now)), Some(now));
        assert!(parse_db_time("2024-01-01 12:00:00").is_some());
        assert!(parse_db_time("2024-01-01T12:00:00Z").is_some());
        assert!(parse_db_time("yesterday").is_none());
    }
}
