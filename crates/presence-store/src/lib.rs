//! presence-store — SQLite-backed record store for face templates and
//! attendance records.
//!
//! The store owns the two invariants the engine's atomicity rests on: at
//! most one *active* face template per user (partial unique index) and at
//! most one attendance record per (user, date) (`UNIQUE(user_id,
//! attendance_date)`). Check-in is a single INSERT, so a lost race
//! surfaces as a constraint violation rather than a second row; checkout
//! is a compare-and-update guarded by `check_out_time IS NULL`.

use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime, Utc};
use presence_core::attendance::{AttendanceRecord, AttendanceStatus, CheckOutUpdate, NewCheckIn};
use rusqlite::OptionalExtension;
use thiserror::Error;
use tokio_rusqlite::Connection;
use uuid::Uuid;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS face_templates (
    id          TEXT PRIMARY KEY,
    user_id     TEXT NOT NULL,
    encoding    TEXT NOT NULL,
    is_active   INTEGER NOT NULL DEFAULT 1,
    created_at  TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_templates_one_active
    ON face_templates (user_id) WHERE is_active = 1;

CREATE TABLE IF NOT EXISTS attendance_records (
    id                    TEXT PRIMARY KEY,
    user_id               TEXT NOT NULL,
    attendance_date       TEXT NOT NULL,
    check_in_time         TEXT NOT NULL,
    check_out_time        TEXT,
    status                TEXT NOT NULL,
    check_in_latitude     REAL,
    check_in_longitude    REAL,
    check_out_latitude    REAL,
    check_out_longitude   REAL,
    check_in_confidence   REAL NOT NULL,
    check_out_confidence  REAL,
    device_info           TEXT,
    work_hours            TEXT,
    created_at            TEXT NOT NULL,
    updated_at            TEXT NOT NULL,
    UNIQUE (user_id, attendance_date)
);
";

const RECORD_COLUMNS: &str = "id, user_id, attendance_date, check_in_time, check_out_time, \
     status, check_in_latitude, check_in_longitude, check_out_latitude, check_out_longitude, \
     check_in_confidence, check_out_confidence, device_info, work_hours";

#[derive(Error, Debug)]
pub enum StoreError {
    /// An attendance record for this (user, date) already exists.
    #[error("attendance record already exists for this user and date")]
    DuplicateCheckIn,
    #[error("storage backend error: {0}")]
    Backend(#[from] tokio_rusqlite::Error),
}

/// An active template row. `encoding` stays in its raw storage form; the
/// codec decodes it at the verification boundary.
#[derive(Debug, Clone)]
pub struct TemplateRow {
    pub id: String,
    pub user_id: String,
    pub encoding: String,
    pub created_at: NaiveDateTime,
}

/// Handle to the SQLite store. Cheap to clone; all calls run on the
/// connection's worker thread.
#[derive(Clone)]
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) the database at `path` and apply the schema.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path.to_path_buf()).await?;
        tracing::debug!(path = %path.display(), "opening record store");
        Self::init(conn).await
    }

    /// In-memory store, used by tests.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    /// The user's active face template, if one is enrolled.
    pub async fn find_active_template(
        &self,
        user_id: &str,
    ) -> Result<Option<TemplateRow>, StoreError> {
        let user_id = user_id.to_string();
        let row = self
            .conn
            .call(move |conn| {
                let row = conn
                    .query_row(
                        "SELECT id, user_id, encoding, created_at
                         FROM face_templates
                         WHERE user_id = ?1 AND is_active = 1",
                        [&user_id],
                        |row| {
                            Ok(TemplateRow {
                                id: row.get(0)?,
                                user_id: row.get(1)?,
                                encoding: row.get(2)?,
                                created_at: row.get(3)?,
                            })
                        },
                    )
                    .optional()?;
                Ok(row)
            })
            .await?;
        Ok(row)
    }

    /// Deactivate the user's current template (if any) and insert the new
    /// one, in a single transaction. Old rows are kept, never deleted.
    /// Returns the new template id.
    pub async fn enroll_template(
        &self,
        user_id: &str,
        encoding_json: String,
    ) -> Result<String, StoreError> {
        let user_id = user_id.to_string();
        let id = Uuid::new_v4().to_string();
        let returned = id.clone();
        let now = Utc::now().naive_utc();

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "UPDATE face_templates SET is_active = 0
                     WHERE user_id = ?1 AND is_active = 1",
                    [&user_id],
                )?;
                tx.execute(
                    "INSERT INTO face_templates (id, user_id, encoding, is_active, created_at)
                     VALUES (?1, ?2, ?3, 1, ?4)",
                    rusqlite::params![id, user_id, encoding_json, now],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(returned)
    }

    /// The user's attendance record for `date`, if one exists.
    pub async fn find_day_record(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> Result<Option<AttendanceRecord>, StoreError> {
        let user_id = user_id.to_string();
        let row = self
            .conn
            .call(move |conn| {
                let sql = format!(
                    "SELECT {RECORD_COLUMNS} FROM attendance_records
                     WHERE user_id = ?1 AND attendance_date = ?2"
                );
                let row = conn
                    .query_row(&sql, rusqlite::params![user_id, date], record_from_row)
                    .optional()?;
                Ok(row)
            })
            .await?;
        Ok(row)
    }

    /// Create the day's record. Atomic per (user, date): a concurrent
    /// duplicate trips the UNIQUE constraint and maps to
    /// [`StoreError::DuplicateCheckIn`]. Returns the new record id.
    pub async fn insert_check_in(
        &self,
        user_id: &str,
        new: &NewCheckIn,
        device_info: Option<String>,
    ) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        let returned = id.clone();
        let user_id = user_id.to_string();
        let new = new.clone();
        let now = Utc::now().naive_utc();

        let result = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO attendance_records
                     (id, user_id, attendance_date, check_in_time, status,
                      check_in_latitude, check_in_longitude, check_in_confidence,
                      device_info, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    rusqlite::params![
                        id,
                        user_id,
                        new.date,
                        new.check_in_time,
                        new.status.as_str(),
                        new.latitude,
                        new.longitude,
                        new.confidence as f64,
                        device_info,
                        now,
                        now
                    ],
                )?;
                Ok(())
            })
            .await;

        match result {
            Ok(()) => Ok(returned),
            Err(e) if is_unique_violation(&e) => Err(StoreError::DuplicateCheckIn),
            Err(e) => Err(StoreError::Backend(e)),
        }
    }

    /// Complete the day's record. Guarded by `check_out_time IS NULL`:
    /// returns false when another request already completed it.
    pub async fn update_check_out(&self, update: &CheckOutUpdate) -> Result<bool, StoreError> {
        let update = update.clone();
        let now = Utc::now().naive_utc();

        let affected = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    "UPDATE attendance_records
                     SET check_out_time = ?1, check_out_latitude = ?2,
                         check_out_longitude = ?3, check_out_confidence = ?4,
                         work_hours = ?5, updated_at = ?6
                     WHERE id = ?7 AND check_out_time IS NULL",
                    rusqlite::params![
                        update.check_out_time,
                        update.latitude,
                        update.longitude,
                        update.confidence as f64,
                        update.work_hours,
                        now,
                        update.record_id
                    ],
                )?;
                Ok(n)
            })
            .await?;
        Ok(affected == 1)
    }

    /// Records for a user, newest first, optionally bounded by inclusive
    /// dates.
    pub async fn history(
        &self,
        user_id: &str,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<AttendanceRecord>, StoreError> {
        let user_id = user_id.to_string();
        let rows = self
            .conn
            .call(move |conn| {
                let sql = format!(
                    "SELECT {RECORD_COLUMNS} FROM attendance_records
                     WHERE user_id = ?1
                       AND (?2 IS NULL OR attendance_date >= ?2)
                       AND (?3 IS NULL OR attendance_date <= ?3)
                     ORDER BY attendance_date DESC"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(rusqlite::params![user_id, from, to], record_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }
}

fn record_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AttendanceRecord> {
    let status_text: String = row.get(5)?;
    let status = AttendanceStatus::parse(&status_text).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            5,
            rusqlite::types::Type::Text,
            format!("unknown attendance status: {status_text}").into(),
        )
    })?;

    Ok(AttendanceRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        date: row.get(2)?,
        check_in_time: row.get(3)?,
        check_out_time: row.get(4)?,
        status,
        check_in_latitude: row.get(6)?,
        check_in_longitude: row.get(7)?,
        check_out_latitude: row.get(8)?,
        check_out_longitude: row.get(9)?,
        check_in_confidence: row.get::<_, f64>(10)? as f32,
        check_out_confidence: row.get::<_, Option<f64>>(11)?.map(|v| v as f32),
        device_info: row.get(12)?,
        work_hours: row.get(13)?,
    })
}

fn is_unique_violation(e: &tokio_rusqlite::Error) -> bool {
    matches!(
        e,
        tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(err, _))
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 11).unwrap()
    }

    fn new_check_in() -> NewCheckIn {
        NewCheckIn {
            date: day(),
            check_in_time: day().and_hms_opt(8, 30, 0).unwrap(),
            status: AttendanceStatus::Present,
            latitude: -6.242,
            longitude: 106.979,
            confidence: 0.31,
        }
    }

    #[tokio::test]
    async fn test_enroll_and_find_active_template() {
        let store = Store::open_in_memory().await.unwrap();
        assert!(store.find_active_template("alice").await.unwrap().is_none());

        let id = store
            .enroll_template("alice", "[0.1, 0.2]".into())
            .await
            .unwrap();

        let row = store.find_active_template("alice").await.unwrap().unwrap();
        assert_eq!(row.id, id);
        assert_eq!(row.user_id, "alice");
        assert_eq!(row.encoding, "[0.1, 0.2]");
    }

    #[tokio::test]
    async fn test_re_enroll_replaces_active_template() {
        let store = Store::open_in_memory().await.unwrap();
        let first = store.enroll_template("alice", "[1.0]".into()).await.unwrap();
        let second = store.enroll_template("alice", "[2.0]".into()).await.unwrap();
        assert_ne!(first, second);

        // Only the newest template is active; the old row survives inactive.
        let row = store.find_active_template("alice").await.unwrap().unwrap();
        assert_eq!(row.id, second);
        assert_eq!(row.encoding, "[2.0]");
    }

    #[tokio::test]
    async fn test_insert_check_in_round_trips() {
        let store = Store::open_in_memory().await.unwrap();
        let id = store
            .insert_check_in("alice", &new_check_in(), Some("kiosk-3".into()))
            .await
            .unwrap();

        let record = store.find_day_record("alice", day()).await.unwrap().unwrap();
        assert_eq!(record.id, id);
        assert_eq!(record.user_id, "alice");
        assert_eq!(record.date, day());
        assert_eq!(record.status, AttendanceStatus::Present);
        assert_eq!(record.check_in_latitude, Some(-6.242));
        assert_eq!(record.check_in_confidence, 0.31);
        assert_eq!(record.device_info.as_deref(), Some("kiosk-3"));
        assert!(record.check_out_time.is_none());
        assert!(record.work_hours.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_check_in_hits_unique_constraint() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .insert_check_in("alice", &new_check_in(), None)
            .await
            .unwrap();

        let err = store
            .insert_check_in("alice", &new_check_in(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateCheckIn));

        // Other users and other dates are unaffected.
        store.insert_check_in("bob", &new_check_in(), None).await.unwrap();
        let mut tomorrow = new_check_in();
        tomorrow.date = day().succ_opt().unwrap();
        store.insert_check_in("alice", &tomorrow, None).await.unwrap();
    }

    #[tokio::test]
    async fn test_check_out_applies_exactly_once() {
        let store = Store::open_in_memory().await.unwrap();
        let id = store
            .insert_check_in("alice", &new_check_in(), None)
            .await
            .unwrap();

        let update = CheckOutUpdate {
            record_id: id.clone(),
            check_out_time: day().and_hms_opt(17, 6, 0).unwrap(),
            latitude: -6.243,
            longitude: 106.980,
            confidence: 0.28,
            work_hours: "08:36".into(),
        };

        assert!(store.update_check_out(&update).await.unwrap());
        // Second attempt loses the guard: the record is already complete.
        assert!(!store.update_check_out(&update).await.unwrap());

        let record = store.find_day_record("alice", day()).await.unwrap().unwrap();
        assert_eq!(record.work_hours.as_deref(), Some("08:36"));
        assert_eq!(record.check_out_confidence, Some(0.28));
        assert_eq!(record.check_out_latitude, Some(-6.243));
    }

    #[tokio::test]
    async fn test_history_orders_and_filters() {
        let store = Store::open_in_memory().await.unwrap();
        for offset in 0..3u64 {
            let mut check_in = new_check_in();
            check_in.date = day() + chrono::Duration::days(offset as i64);
            check_in.check_in_time = check_in.date.and_hms_opt(8, 0, 0).unwrap();
            store.insert_check_in("alice", &check_in, None).await.unwrap();
        }

        let all = store.history("alice", None, None).await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all[0].date > all[1].date && all[1].date > all[2].date);

        let bounded = store
            .history("alice", Some(day().succ_opt().unwrap()), Some(day().succ_opt().unwrap()))
            .await
            .unwrap();
        assert_eq!(bounded.len(), 1);
        assert_eq!(bounded[0].date, day().succ_opt().unwrap());

        assert!(store.history("bob", None, None).await.unwrap().is_empty());
    }
}
