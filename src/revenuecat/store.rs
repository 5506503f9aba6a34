use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::status::{SubscriberStatus, SubscriptionStatus};
use crate::environment::FirebaseEnv;
use crate::error::{AdminError, Result};

/// Last known RevenueCat status of one user.
#[derive(Debug, Clone, Serialize)]
pub struct StoredStatus {
    pub uid: String,
    pub phone: String,
    pub app_user_id: String,
    pub status: SubscriptionStatus,
    pub is_active: bool,
    pub is_sandbox: bool,
    pub product_identifier: Option<String>,
    pub period_type: Option<String>,
    pub will_renew: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl StoredStatus {
    pub fn label(&self) -> &'static str {
        self.status.label()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub snapshot_date: NaiveDate,
    pub status: SubscriptionStatus,
    pub is_active: bool,
    pub product_identifier: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ActiveCounts {
    pub active_trials: u64,
    pub active_subscriptions: u64,
    pub active_customers: u64,
}

fn parse_ts(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// SQLite cache of subscriber statuses plus one snapshot per user and day.
pub struct RevenueCatStore {
    conn: Mutex<Connection>,
}

impl RevenueCatStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AdminError::LockPoisoned("revenuecat store"))
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS revenuecat_user_status (
                env                      TEXT NOT NULL,
                uid                      TEXT NOT NULL,
                phone                    TEXT NOT NULL,
                app_user_id              TEXT NOT NULL,
                status                   TEXT NOT NULL,
                status_label             TEXT NOT NULL,
                is_active                INTEGER NOT NULL,
                is_sandbox               INTEGER NOT NULL,
                product_identifier       TEXT,
                period_type              TEXT,
                will_renew               INTEGER NOT NULL,
                expires_at               TEXT,
                purchase_date            TEXT,
                grace_period_expires_at  TEXT,
                raw_data                 TEXT NOT NULL,
                created_at               TEXT NOT NULL,
                updated_at               TEXT NOT NULL,
                PRIMARY KEY (env, uid)
            );
            CREATE INDEX IF NOT EXISTS idx_rc_status_app_user ON revenuecat_user_status (app_user_id);
            CREATE TABLE IF NOT EXISTS revenuecat_history (
                env                 TEXT NOT NULL,
                uid                 TEXT NOT NULL,
                phone               TEXT NOT NULL,
                app_user_id         TEXT NOT NULL,
                snapshot_date       TEXT NOT NULL,
                status              TEXT NOT NULL,
                is_active           INTEGER NOT NULL,
                is_sandbox          INTEGER NOT NULL,
                product_identifier  TEXT,
                created_at          TEXT NOT NULL,
                PRIMARY KEY (env, uid, snapshot_date)
            );
            CREATE INDEX IF NOT EXISTS idx_rc_history_date ON revenuecat_history (snapshot_date);
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Upserts the user's status and today's history snapshot.
    pub fn save(
        &self,
        env: FirebaseEnv,
        uid: &str,
        phone: &str,
        app_user_id: &str,
        status: &SubscriberStatus,
        raw: &Value,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn()?;
        let now_s = now.to_rfc3339();
        conn.execute(
            "INSERT INTO revenuecat_user_status (
                env, uid, phone, app_user_id, status, status_label, is_active, is_sandbox,
                product_identifier, period_type, will_renew, expires_at, purchase_date,
                grace_period_expires_at, raw_data, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?16)
             ON CONFLICT(env, uid) DO UPDATE SET
                phone=excluded.phone, app_user_id=excluded.app_user_id, status=excluded.status,
                status_label=excluded.status_label, is_active=excluded.is_active,
                is_sandbox=excluded.is_sandbox, product_identifier=excluded.product_identifier,
                period_type=excluded.period_type, will_renew=excluded.will_renew,
                expires_at=excluded.expires_at, purchase_date=excluded.purchase_date,
                grace_period_expires_at=excluded.grace_period_expires_at,
                raw_data=excluded.raw_data, updated_at=excluded.updated_at",
            params![
                env.as_str(),
                uid,
                phone,
                app_user_id,
                status.status.as_str(),
                status.label(),
                status.is_active,
                status.is_sandbox,
                status.product_identifier,
                status.period_type,
                status.will_renew,
                status.expires_at.map(|d| d.to_rfc3339()),
                status.purchase_date.map(|d| d.to_rfc3339()),
                status.grace_period_expires_at.map(|d| d.to_rfc3339()),
                raw.to_string(),
                now_s,
            ],
        )?;
        conn.execute(
            "INSERT INTO revenuecat_history (
                env, uid, phone, app_user_id, snapshot_date, status, is_active, is_sandbox,
                product_identifier, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(env, uid, snapshot_date) DO UPDATE SET
                status=excluded.status, is_active=excluded.is_active,
                is_sandbox=excluded.is_sandbox, product_identifier=excluded.product_identifier",
            params![
                env.as_str(),
                uid,
                phone,
                app_user_id,
                now.date_naive().to_string(),
                status.status.as_str(),
                status.is_active,
                status.is_sandbox,
                status.product_identifier,
                now_s,
            ],
        )?;
        Ok(())
    }

    fn row_to_status(row: &Row<'_>) -> rusqlite::Result<StoredStatus> {
        let status: String = row.get(3)?;
        Ok(StoredStatus {
            uid: row.get(0)?,
            phone: row.get(1)?,
            app_user_id: row.get(2)?,
            status: SubscriptionStatus::parse(&status),
            is_active: row.get(4)?,
            is_sandbox: row.get(5)?,
            product_identifier: row.get(6)?,
            period_type: row.get(7)?,
            will_renew: row.get(8)?,
            expires_at: parse_ts(row.get(9)?),
            updated_at: parse_ts(row.get(10)?),
        })
    }

    const STATUS_COLUMNS: &'static str = "uid, phone, app_user_id, status, is_active, is_sandbox, \
        product_identifier, period_type, will_renew, expires_at, updated_at";

    pub fn get(&self, env: FirebaseEnv, uid: &str) -> Result<Option<StoredStatus>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM revenuecat_user_status WHERE env = ?1 AND uid = ?2",
            Self::STATUS_COLUMNS
        );
        Ok(conn
            .query_row(&sql, params![env.as_str(), uid], Self::row_to_status)
            .optional()?)
    }

    pub fn list(&self, env: FirebaseEnv) -> Result<Vec<StoredStatus>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM revenuecat_user_status WHERE env = ?1 ORDER BY updated_at DESC",
            Self::STATUS_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![env.as_str()], Self::row_to_status)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn history(&self, env: FirebaseEnv, uid: &str) -> Result<Vec<HistoryEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT snapshot_date, status, is_active, product_identifier
             FROM revenuecat_history WHERE env = ?1 AND uid = ?2 ORDER BY snapshot_date DESC",
        )?;
        let rows = stmt.query_map(params![env.as_str(), uid], |row| {
            let date: String = row.get(0)?;
            let status: String = row.get(1)?;
            Ok(HistoryEntry {
                snapshot_date: date.parse().unwrap_or(NaiveDate::MIN),
                status: SubscriptionStatus::parse(&status),
                is_active: row.get(2)?,
                product_identifier: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Non-sandbox statuses still active at `now`, split into trials and
    /// paid subscriptions.
    pub fn active_counts(&self, env: FirebaseEnv, now: DateTime<Utc>) -> Result<ActiveCounts> {
        let mut counts = ActiveCounts::default();
        for status in self.list(env)? {
            let active = status.is_active && status.expires_at.is_some_and(|e| e > now);
            if !active || status.is_sandbox {
                continue;
            }
            counts.active_customers += 1;
            if status.period_type.as_deref() == Some("trial") {
                counts.active_trials += 1;
            } else {
                counts.active_subscriptions += 1;
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::revenuecat::status::parse_subscriber_status;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn trial_subscriber(expires: &str) -> Value {
        json!({ "subscriptions": { "yearly": { "expires_date": expires, "period_type": "trial" } } })
    }

    #[test]
    fn poisoned_connection_is_reported_as_an_error() {
        let store = std::sync::Arc::new(RevenueCatStore::open_in_memory().unwrap());
        let holder = store.clone();
        let _ = std::thread::spawn(move || {
            let _guard = holder.conn.lock().unwrap();
            panic!("connection holder died");
        })
        .join();
        assert!(matches!(
            store.list(FirebaseEnv::Dev),
            Err(AdminError::LockPoisoned(_))
        ));
    }

    #[test]
    fn save_upserts_and_keeps_one_snapshot_per_day() {
        let store = RevenueCatStore::open_in_memory().unwrap();
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap();
        let raw = trial_subscriber("2025-07-01T00:00:00Z");
        let status = parse_subscriber_status(&raw, now);

        store.save(FirebaseEnv::Prod, "u1", "+33600", "hash", &status, &raw, now).unwrap();
        store
            .save(FirebaseEnv::Prod, "u1", "+33600", "hash", &status, &raw, now + Duration::hours(2))
            .unwrap();
        store
            .save(FirebaseEnv::Prod, "u1", "+33600", "hash", &status, &raw, now + Duration::days(1))
            .unwrap();

        assert_eq!(store.list(FirebaseEnv::Prod).unwrap().len(), 1);
        assert_eq!(store.history(FirebaseEnv::Prod, "u1").unwrap().len(), 2);
        let stored = store.get(FirebaseEnv::Prod, "u1").unwrap().unwrap();
        assert_eq!(stored.status, SubscriptionStatus::Trial);
        assert!(store.get(FirebaseEnv::Dev, "u1").unwrap().is_none());
    }

    #[test]
    fn active_counts_skip_sandbox_and_expired() {
        let store = RevenueCatStore::open_in_memory().unwrap();
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap();
        let trial = trial_subscriber("2025-07-01T00:00:00Z");
        let paid = json!({ "subscriptions": { "m": { "expires_date": "2025-07-01T00:00:00Z", "period_type": "normal" } } });
        let sandbox = json!({ "subscriptions": { "m": { "expires_date": "2025-07-01T00:00:00Z", "is_sandbox": true } } });
        let expired = trial_subscriber("2025-01-01T00:00:00Z");
        for (uid, raw) in [("a", &trial), ("b", &paid), ("c", &sandbox), ("d", &expired)] {
            let status = parse_subscriber_status(raw, now);
            store.save(FirebaseEnv::Dev, uid, uid, uid, &status, raw, now).unwrap();
        }
        let counts = store.active_counts(FirebaseEnv::Dev, now).unwrap();
        assert_eq!(
            counts,
            ActiveCounts {
                active_trials: 1,
                active_subscriptions: 1,
                active_customers: 2
            }
        );
    }
}
