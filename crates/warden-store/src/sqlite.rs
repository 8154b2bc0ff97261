//! SQLite-based store implementation

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};
use warden_api::{
    BreakRule, Child, DailyAllocation, DailyUsage, Session, SessionStatus, UsageCharge,
};
use warden_util::{ChildId, DeviceId, SessionId};

use crate::{AuditEvent, Store, StoreError, StoreResult};

const SESSION_COLUMNS: &str = "id, device_id, device_kind, participants_json, prepaid_json, \
     started_at, expected_minutes, actual_minutes, status, last_break_at, break_ends_at, \
     paused_seconds, warning_sent_at, last_extended_at, ended_at, version";

/// SQLite-based store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        if let Some(parent) = path.as_ref().parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("store lock poisoned".into()))
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            -- Audit log (append-only)
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                event_json TEXT NOT NULL
            );

            -- Children
            CREATE TABLE IF NOT EXISTS children (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                weekday_minutes INTEGER NOT NULL,
                weekend_minutes INTEGER NOT NULL,
                break_after_minutes INTEGER,
                break_minutes INTEGER,
                downtime_enabled INTEGER NOT NULL DEFAULT 1
            );

            -- Daily allocations, created on first access
            CREATE TABLE IF NOT EXISTS allocations (
                child_id TEXT NOT NULL,
                day TEXT NOT NULL,
                base_minutes INTEGER NOT NULL,
                bonus_minutes INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (child_id, day)
            );

            -- Usage from finished sessions
            CREATE TABLE IF NOT EXISTS usage (
                child_id TEXT NOT NULL,
                day TEXT NOT NULL,
                minutes_used INTEGER NOT NULL DEFAULT 0,
                sessions_completed INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (child_id, day)
            );

            -- Sessions
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                device_id TEXT NOT NULL,
                device_kind TEXT NOT NULL,
                participants_json TEXT NOT NULL,
                prepaid_json TEXT NOT NULL DEFAULT '{}',
                started_at TEXT NOT NULL,
                expected_minutes INTEGER NOT NULL,
                actual_minutes INTEGER,
                status TEXT NOT NULL,
                last_break_at TEXT,
                break_ends_at TEXT,
                paused_seconds INTEGER NOT NULL DEFAULT 0,
                warning_sent_at TEXT,
                last_extended_at TEXT,
                ended_at TEXT,
                version INTEGER NOT NULL DEFAULT 0
            );

            -- Days on which downtime is lifted
            CREATE TABLE IF NOT EXISTS downtime_skips (
                day TEXT PRIMARY KEY
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp);
            CREATE INDEX IF NOT EXISTS idx_usage_day ON usage(day);
            CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status);
            CREATE INDEX IF NOT EXISTS idx_sessions_started_at ON sessions(started_at);
            "#,
        )?;

        debug!("Store schema initialized");
        Ok(())
    }

    fn load_allocation(
        conn: &Connection,
        child_id: &ChildId,
        day: NaiveDate,
    ) -> StoreResult<Option<DailyAllocation>> {
        let row: Option<(i64, i64)> = conn
            .query_row(
                "SELECT base_minutes, bonus_minutes FROM allocations WHERE child_id = ? AND day = ?",
                params![child_id.as_str(), format_day(day)],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        Ok(row.map(|(base, bonus)| DailyAllocation {
            child_id: child_id.clone(),
            day,
            base_minutes: base as u32,
            bonus_minutes: bonus as u32,
        }))
    }

    fn query_sessions(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> StoreResult<Vec<Session>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, SessionRow::from_row)?;

        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row?.into_session()?);
        }
        Ok(sessions)
    }

    /// Version-checked write of every mutable session column
    fn write_session(conn: &Connection, session: &Session) -> StoreResult<()> {
        let changed = conn.execute(
            r#"
            UPDATE sessions SET
                participants_json = ?,
                prepaid_json = ?,
                expected_minutes = ?,
                actual_minutes = ?,
                status = ?,
                last_break_at = ?,
                break_ends_at = ?,
                paused_seconds = ?,
                warning_sent_at = ?,
                last_extended_at = ?,
                ended_at = ?,
                version = version + 1
            WHERE id = ? AND version = ?
            "#,
            params![
                serde_json::to_string(&session.participants)?,
                serde_json::to_string(&session.prepaid_minutes)?,
                session.expected_minutes,
                session.actual_minutes,
                session.status.as_str(),
                session.last_break_at.map(format_ts),
                session.break_ends_at.map(format_ts),
                session.paused_seconds,
                session.warning_sent_at.map(format_ts),
                session.last_extended_at.map(format_ts),
                session.ended_at.map(format_ts),
                session.id.to_string(),
                session.version as i64,
            ],
        )?;

        if changed == 0 {
            let exists: Option<i64> = conn
                .query_row(
                    "SELECT version FROM sessions WHERE id = ?",
                    [session.id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;

            return Err(match exists {
                Some(stored) => StoreError::Conflict(format!(
                    "session {} is at version {}, caller had {}",
                    session.id, stored, session.version
                )),
                None => StoreError::NotFound(format!("session {}", session.id)),
            });
        }

        Ok(())
    }
}

impl Store for SqliteStore {
    fn upsert_child(&self, child: &Child) -> StoreResult<()> {
        let conn = self.conn()?;

        conn.execute(
            r#"
            INSERT INTO children (id, name, weekday_minutes, weekend_minutes,
                                  break_after_minutes, break_minutes, downtime_enabled)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                weekday_minutes = excluded.weekday_minutes,
                weekend_minutes = excluded.weekend_minutes,
                break_after_minutes = excluded.break_after_minutes,
                break_minutes = excluded.break_minutes,
                downtime_enabled = excluded.downtime_enabled
            "#,
            params![
                child.id.as_str(),
                child.name,
                child.weekday_minutes,
                child.weekend_minutes,
                child.break_rule.map(|r| r.after_minutes),
                child.break_rule.map(|r| r.break_minutes),
                child.downtime_enabled,
            ],
        )?;

        debug!(child_id = %child.id, "Child upserted");
        Ok(())
    }

    fn get_child(&self, child_id: &ChildId) -> StoreResult<Option<Child>> {
        let conn = self.conn()?;

        let child = conn
            .query_row(
                "SELECT id, name, weekday_minutes, weekend_minutes, break_after_minutes, \
                 break_minutes, downtime_enabled FROM children WHERE id = ?",
                [child_id.as_str()],
                child_from_row,
            )
            .optional()?;

        Ok(child)
    }

    fn list_children(&self) -> StoreResult<Vec<Child>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT id, name, weekday_minutes, weekend_minutes, break_after_minutes, \
             break_minutes, downtime_enabled FROM children ORDER BY id",
        )?;
        let children = stmt
            .query_map([], child_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(children)
    }

    fn get_allocation(
        &self,
        child_id: &ChildId,
        day: NaiveDate,
    ) -> StoreResult<Option<DailyAllocation>> {
        let conn = self.conn()?;
        Self::load_allocation(&conn, child_id, day)
    }

    fn insert_allocation_if_absent(
        &self,
        allocation: &DailyAllocation,
    ) -> StoreResult<DailyAllocation> {
        let conn = self.conn()?;

        let inserted = conn.execute(
            r#"
            INSERT OR IGNORE INTO allocations (child_id, day, base_minutes, bonus_minutes)
            VALUES (?, ?, ?, ?)
            "#,
            params![
                allocation.child_id.as_str(),
                format_day(allocation.day),
                allocation.base_minutes,
                allocation.bonus_minutes,
            ],
        )?;

        if inserted > 0 {
            debug!(
                child_id = %allocation.child_id,
                day = %allocation.day,
                base_minutes = allocation.base_minutes,
                "Allocation created"
            );
        }

        Self::load_allocation(&conn, &allocation.child_id, allocation.day)?.ok_or_else(|| {
            StoreError::NotFound(format!(
                "allocation for {} on {}",
                allocation.child_id, allocation.day
            ))
        })
    }

    fn add_bonus(
        &self,
        child_id: &ChildId,
        day: NaiveDate,
        minutes: u32,
    ) -> StoreResult<DailyAllocation> {
        let conn = self.conn()?;

        let changed = conn.execute(
            "UPDATE allocations SET bonus_minutes = bonus_minutes + ? WHERE child_id = ? AND day = ?",
            params![minutes, child_id.as_str(), format_day(day)],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!(
                "allocation for {} on {}",
                child_id, day
            )));
        }

        debug!(child_id = %child_id, day = %day, minutes, "Bonus added");
        Self::load_allocation(&conn, child_id, day)?
            .ok_or_else(|| StoreError::NotFound(format!("allocation for {} on {}", child_id, day)))
    }

    fn get_usage(&self, child_id: &ChildId, day: NaiveDate) -> StoreResult<DailyUsage> {
        let conn = self.conn()?;

        let row: Option<(i64, i64)> = conn
            .query_row(
                "SELECT minutes_used, sessions_completed FROM usage WHERE child_id = ? AND day = ?",
                params![child_id.as_str(), format_day(day)],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        Ok(match row {
            Some((minutes, sessions)) => DailyUsage {
                child_id: child_id.clone(),
                day,
                minutes_used: minutes as u32,
                sessions_completed: sessions as u32,
            },
            None => DailyUsage::empty(child_id.clone(), day),
        })
    }

    fn insert_session(&self, session: &Session) -> StoreResult<()> {
        let conn = self.conn()?;

        conn.execute(
            &format!(
                "INSERT INTO sessions ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                SESSION_COLUMNS
            ),
            params![
                session.id.to_string(),
                session.device_id.as_str(),
                session.device_kind,
                serde_json::to_string(&session.participants)?,
                serde_json::to_string(&session.prepaid_minutes)?,
                format_ts(session.started_at),
                session.expected_minutes,
                session.actual_minutes,
                session.status.as_str(),
                session.last_break_at.map(format_ts),
                session.break_ends_at.map(format_ts),
                session.paused_seconds,
                session.warning_sent_at.map(format_ts),
                session.last_extended_at.map(format_ts),
                session.ended_at.map(format_ts),
                session.version as i64,
            ],
        )?;

        debug!(session_id = %session.id, "Session inserted");
        Ok(())
    }

    fn get_session(&self, session_id: &SessionId) -> StoreResult<Option<Session>> {
        let conn = self.conn()?;

        let sessions = Self::query_sessions(
            &conn,
            &format!("SELECT {} FROM sessions WHERE id = ?", SESSION_COLUMNS),
            [session_id.to_string()],
        )?;

        Ok(sessions.into_iter().next())
    }

    fn list_open_sessions(&self) -> StoreResult<Vec<Session>> {
        let conn = self.conn()?;

        Self::query_sessions(
            &conn,
            &format!(
                "SELECT {} FROM sessions WHERE status IN ('active', 'paused') ORDER BY started_at",
                SESSION_COLUMNS
            ),
            params![],
        )
    }

    fn list_sessions_started_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<Session>> {
        let conn = self.conn()?;

        Self::query_sessions(
            &conn,
            &format!(
                "SELECT {} FROM sessions WHERE started_at >= ? AND started_at < ? ORDER BY started_at",
                SESSION_COLUMNS
            ),
            params![format_ts(from), format_ts(to)],
        )
    }

    fn update_session(&self, session: &mut Session) -> StoreResult<()> {
        let conn = self.conn()?;
        Self::write_session(&conn, session)?;
        session.version += 1;

        debug!(session_id = %session.id, version = session.version, "Session updated");
        Ok(())
    }

    fn commit_session(&self, session: &mut Session, charges: &[UsageCharge]) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        Self::write_session(&tx, session)?;

        for charge in charges {
            tx.execute(
                r#"
                INSERT INTO usage (child_id, day, minutes_used, sessions_completed)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(child_id, day)
                DO UPDATE SET
                    minutes_used = minutes_used + excluded.minutes_used,
                    sessions_completed = sessions_completed + excluded.sessions_completed
                "#,
                params![
                    charge.child_id.as_str(),
                    format_day(charge.day),
                    charge.minutes,
                    charge.sessions,
                ],
            )?;
        }

        tx.commit()?;
        session.version += 1;

        debug!(
            session_id = %session.id,
            version = session.version,
            charges = charges.len(),
            "Session committed"
        );
        Ok(())
    }

    fn delete_session(&self, session_id: &SessionId) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM sessions WHERE id = ?", [session_id.to_string()])?;

        debug!(session_id = %session_id, "Session deleted");
        Ok(())
    }

    fn set_downtime_skip(&self, day: NaiveDate, skip: bool) -> StoreResult<()> {
        let conn = self.conn()?;

        if skip {
            conn.execute(
                "INSERT OR IGNORE INTO downtime_skips (day) VALUES (?)",
                [format_day(day)],
            )?;
        } else {
            conn.execute("DELETE FROM downtime_skips WHERE day = ?", [format_day(day)])?;
        }

        debug!(day = %day, skip, "Downtime override updated");
        Ok(())
    }

    fn is_downtime_skipped(&self, day: NaiveDate) -> StoreResult<bool> {
        let conn = self.conn()?;

        let found: Option<String> = conn
            .query_row(
                "SELECT day FROM downtime_skips WHERE day = ?",
                [format_day(day)],
                |row| row.get(0),
            )
            .optional()?;

        Ok(found.is_some())
    }

    fn append_audit(&self, mut event: AuditEvent) -> StoreResult<()> {
        let conn = self.conn()?;
        let event_json = serde_json::to_string(&event.event)?;

        conn.execute(
            "INSERT INTO audit_log (timestamp, event_json) VALUES (?, ?)",
            params![format_ts(event.timestamp), event_json],
        )?;

        event.id = conn.last_insert_rowid();
        debug!(event_id = event.id, "Audit event appended");

        Ok(())
    }

    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT id, timestamp, event_json FROM audit_log ORDER BY id DESC LIMIT ?",
        )?;

        let rows = stmt.query_map([limit as i64], |row| {
            let id: i64 = row.get(0)?;
            let timestamp_str: String = row.get(1)?;
            let event_json: String = row.get(2)?;
            Ok((id, timestamp_str, event_json))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (id, timestamp_str, event_json) = row?;
            let timestamp = parse_ts(&timestamp_str)?;
            let event: crate::AuditEventType = serde_json::from_str(&event_json)?;

            events.push(AuditEvent {
                id,
                timestamp,
                event,
            });
        }

        Ok(events)
    }

    fn is_healthy(&self) -> bool {
        match self.conn.lock() {
            Ok(conn) => conn.query_row("SELECT 1", [], |_| Ok(())).is_ok(),
            Err(_) => {
                warn!("Store lock poisoned");
                false
            }
        }
    }
}

/// Raw column values of one `sessions` row
struct SessionRow {
    id: String,
    device_id: String,
    device_kind: String,
    participants_json: String,
    prepaid_json: String,
    started_at: String,
    expected_minutes: i64,
    actual_minutes: Option<i64>,
    status: String,
    last_break_at: Option<String>,
    break_ends_at: Option<String>,
    paused_seconds: i64,
    warning_sent_at: Option<String>,
    last_extended_at: Option<String>,
    ended_at: Option<String>,
    version: i64,
}

impl SessionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            device_id: row.get(1)?,
            device_kind: row.get(2)?,
            participants_json: row.get(3)?,
            prepaid_json: row.get(4)?,
            started_at: row.get(5)?,
            expected_minutes: row.get(6)?,
            actual_minutes: row.get(7)?,
            status: row.get(8)?,
            last_break_at: row.get(9)?,
            break_ends_at: row.get(10)?,
            paused_seconds: row.get(11)?,
            warning_sent_at: row.get(12)?,
            last_extended_at: row.get(13)?,
            ended_at: row.get(14)?,
            version: row.get(15)?,
        })
    }

    fn into_session(self) -> StoreResult<Session> {
        let id = SessionId::parse(&self.id)
            .ok_or_else(|| StoreError::Serialization(format!("bad session id: {}", self.id)))?;
        let status = SessionStatus::parse(&self.status).ok_or_else(|| {
            StoreError::Serialization(format!("bad session status: {}", self.status))
        })?;
        let participants: Vec<ChildId> = serde_json::from_str(&self.participants_json)?;
        let prepaid_minutes: BTreeMap<ChildId, u32> = serde_json::from_str(&self.prepaid_json)?;

        Ok(Session {
            id,
            device_id: DeviceId::new(self.device_id),
            device_kind: self.device_kind,
            participants,
            prepaid_minutes,
            started_at: parse_ts(&self.started_at)?,
            expected_minutes: self.expected_minutes as u32,
            actual_minutes: self.actual_minutes.map(|m| m as u32),
            status,
            last_break_at: parse_opt_ts(self.last_break_at)?,
            break_ends_at: parse_opt_ts(self.break_ends_at)?,
            paused_seconds: self.paused_seconds,
            warning_sent_at: parse_opt_ts(self.warning_sent_at)?,
            last_extended_at: parse_opt_ts(self.last_extended_at)?,
            ended_at: parse_opt_ts(self.ended_at)?,
            version: self.version as u64,
        })
    }
}

fn child_from_row(row: &Row<'_>) -> rusqlite::Result<Child> {
    let id: String = row.get(0)?;
    let after: Option<u32> = row.get(4)?;
    let length: Option<u32> = row.get(5)?;

    Ok(Child {
        id: ChildId::new(id),
        name: row.get(1)?,
        weekday_minutes: row.get(2)?,
        weekend_minutes: row.get(3)?,
        break_rule: match (after, length) {
            (Some(after_minutes), Some(break_minutes)) => Some(BreakRule {
                after_minutes,
                break_minutes,
            }),
            _ => None,
        },
        downtime_enabled: row.get(6)?,
    })
}

// Fixed-width UTC timestamps sort lexically in time order
fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Serialization(format!("bad timestamp '{}': {}", s, e)))
}

fn parse_opt_ts(s: Option<String>) -> StoreResult<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_ts).transpose()
}

fn format_day(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AuditEventType;
    use chrono::{Duration, TimeZone};

    fn t(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 6, h, m, 0).unwrap()
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 6).unwrap()
    }

    fn session(minutes: u32, started_at: DateTime<Utc>) -> Session {
        Session::new(
            DeviceId::new("tv"),
            "tv",
            vec![ChildId::new("alice"), ChildId::new("bob")],
            minutes,
            started_at,
        )
    }

    #[test]
    fn test_in_memory_store() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.is_healthy());
    }

    #[test]
    fn test_open_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("warden.db");

        let store = SqliteStore::open(&path).unwrap();
        assert!(store.is_healthy());
        assert!(path.exists());
    }

    #[test]
    fn test_audit_log() {
        let store = SqliteStore::in_memory().unwrap();

        store
            .append_audit(AuditEvent::at(t(9, 0), AuditEventType::ServiceStarted))
            .unwrap();
        store
            .append_audit(AuditEvent::at(
                t(9, 1),
                AuditEventType::DowntimeSkipped {
                    day: day(),
                    skip: true,
                },
            ))
            .unwrap();

        let events = store.get_recent_audits(10).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0].event,
            AuditEventType::DowntimeSkipped { skip: true, .. }
        ));
        assert_eq!(events[1].event, AuditEventType::ServiceStarted);
        assert_eq!(events[1].timestamp, t(9, 0));
    }

    #[test]
    fn test_children_roundtrip() {
        let store = SqliteStore::in_memory().unwrap();
        let mut child = Child {
            id: ChildId::new("alice"),
            name: "Alice".into(),
            weekday_minutes: 60,
            weekend_minutes: 120,
            break_rule: Some(BreakRule {
                after_minutes: 30,
                break_minutes: 10,
            }),
            downtime_enabled: true,
        };

        store.upsert_child(&child).unwrap();
        assert_eq!(store.get_child(&child.id).unwrap(), Some(child.clone()));

        child.break_rule = None;
        child.weekday_minutes = 45;
        store.upsert_child(&child).unwrap();

        let children = store.list_children().unwrap();
        assert_eq!(children, vec![child]);
        assert!(store.get_child(&ChildId::new("nobody")).unwrap().is_none());
    }

    #[test]
    fn test_allocation_first_writer_wins() {
        let store = SqliteStore::in_memory().unwrap();
        let child_id = ChildId::new("alice");

        assert!(store.get_allocation(&child_id, day()).unwrap().is_none());

        let first = DailyAllocation {
            child_id: child_id.clone(),
            day: day(),
            base_minutes: 60,
            bonus_minutes: 0,
        };
        assert_eq!(store.insert_allocation_if_absent(&first).unwrap(), first);

        let second = DailyAllocation {
            base_minutes: 999,
            ..first.clone()
        };
        assert_eq!(store.insert_allocation_if_absent(&second).unwrap(), first);
    }

    #[test]
    fn test_bonus_accumulates() {
        let store = SqliteStore::in_memory().unwrap();
        let child_id = ChildId::new("alice");

        assert!(matches!(
            store.add_bonus(&child_id, day(), 10),
            Err(StoreError::NotFound(_))
        ));

        store
            .insert_allocation_if_absent(&DailyAllocation {
                child_id: child_id.clone(),
                day: day(),
                base_minutes: 60,
                bonus_minutes: 0,
            })
            .unwrap();

        store.add_bonus(&child_id, day(), 10).unwrap();
        let alloc = store.add_bonus(&child_id, day(), 5).unwrap();
        assert_eq!(alloc.bonus_minutes, 15);
        assert_eq!(alloc.total(), 75);
    }

    #[test]
    fn test_session_roundtrip() {
        let store = SqliteStore::in_memory().unwrap();
        let mut s = session(30, t(10, 0));
        s.prepaid_minutes.insert(ChildId::new("bob"), 4);
        s.warning_sent_at = Some(t(10, 0));

        store.insert_session(&s).unwrap();

        let loaded = store.get_session(&s.id).unwrap().unwrap();
        assert_eq!(loaded, s);
        assert!(store.get_session(&SessionId::new()).unwrap().is_none());
    }

    #[test]
    fn test_update_session_bumps_version() {
        let store = SqliteStore::in_memory().unwrap();
        let mut s = session(30, t(10, 0));
        store.insert_session(&s).unwrap();

        s.expected_minutes = 45;
        store.update_session(&mut s).unwrap();
        assert_eq!(s.version, 1);

        let loaded = store.get_session(&s.id).unwrap().unwrap();
        assert_eq!(loaded.expected_minutes, 45);
        assert_eq!(loaded.version, 1);
    }

    #[test]
    fn test_stale_update_conflicts() {
        let store = SqliteStore::in_memory().unwrap();
        let s = session(30, t(10, 0));
        store.insert_session(&s).unwrap();

        let mut first = store.get_session(&s.id).unwrap().unwrap();
        let mut second = first.clone();

        first.expected_minutes = 40;
        store.update_session(&mut first).unwrap();

        second.status = SessionStatus::Completed;
        let result = store.update_session(&mut second);
        assert!(matches!(result, Err(StoreError::Conflict(_))));
        assert_eq!(second.version, 0);

        let loaded = store.get_session(&s.id).unwrap().unwrap();
        assert_eq!(loaded.expected_minutes, 40);
        assert_eq!(loaded.status, SessionStatus::Active);
    }

    #[test]
    fn test_update_missing_session_not_found() {
        let store = SqliteStore::in_memory().unwrap();
        let mut s = session(30, t(10, 0));

        let result = store.update_session(&mut s);
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_commit_session_applies_charges() {
        let store = SqliteStore::in_memory().unwrap();
        let mut s = session(30, t(10, 0));
        store.insert_session(&s).unwrap();

        s.status = SessionStatus::Completed;
        s.actual_minutes = Some(30);
        s.ended_at = Some(t(10, 30));

        let charges: Vec<UsageCharge> = s
            .participants
            .iter()
            .map(|child_id| UsageCharge {
                child_id: child_id.clone(),
                day: day(),
                minutes: 30,
                sessions: 1,
            })
            .collect();
        store.commit_session(&mut s, &charges).unwrap();

        for child_id in &s.participants {
            let usage = store.get_usage(child_id, day()).unwrap();
            assert_eq!(usage.minutes_used, 30);
            assert_eq!(usage.sessions_completed, 1);
        }
        assert!(store.list_open_sessions().unwrap().is_empty());
    }

    #[test]
    fn test_conflicting_commit_leaves_usage_untouched() {
        let store = SqliteStore::in_memory().unwrap();
        let s = session(30, t(10, 0));
        store.insert_session(&s).unwrap();

        let mut stale = s.clone();
        let mut fresh = s.clone();
        store.update_session(&mut fresh).unwrap();

        stale.status = SessionStatus::Completed;
        let charge = UsageCharge {
            child_id: ChildId::new("alice"),
            day: day(),
            minutes: 30,
            sessions: 1,
        };
        let result = store.commit_session(&mut stale, &[charge]);
        assert!(matches!(result, Err(StoreError::Conflict(_))));

        let usage = store.get_usage(&ChildId::new("alice"), day()).unwrap();
        assert_eq!(usage.minutes_used, 0);
    }

    #[test]
    fn test_list_sessions() {
        let store = SqliteStore::in_memory().unwrap();

        let early = session(30, t(8, 0));
        let mut done = session(30, t(9, 0));
        done.status = SessionStatus::Expired;
        let late = session(30, t(23, 59));
        let tomorrow = session(30, t(0, 0) + Duration::days(1));

        for s in [&late, &early, &done, &tomorrow] {
            store.insert_session(s).unwrap();
        }

        let open: Vec<_> = store
            .list_open_sessions()
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(open, vec![early.id.clone(), late.id.clone(), tomorrow.id.clone()]);

        let today: Vec<_> = store
            .list_sessions_started_between(t(0, 0), t(0, 0) + Duration::days(1))
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(today, vec![early.id, done.id, late.id]);
    }

    #[test]
    fn test_delete_session() {
        let store = SqliteStore::in_memory().unwrap();
        let s = session(30, t(10, 0));
        store.insert_session(&s).unwrap();

        store.delete_session(&s.id).unwrap();
        assert!(store.get_session(&s.id).unwrap().is_none());
    }

    #[test]
    fn test_downtime_skips() {
        let store = SqliteStore::in_memory().unwrap();

        assert!(!store.is_downtime_skipped(day()).unwrap());

        store.set_downtime_skip(day(), true).unwrap();
        store.set_downtime_skip(day(), true).unwrap();
        assert!(store.is_downtime_skipped(day()).unwrap());
        assert!(!store.is_downtime_skipped(day().succ_opt().unwrap()).unwrap());

        store.set_downtime_skip(day(), false).unwrap();
        assert!(!store.is_downtime_skipped(day()).unwrap());
    }
}
