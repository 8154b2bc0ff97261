//! Store trait definitions

use chrono::{DateTime, NaiveDate, Utc};
use warden_api::{Child, DailyAllocation, DailyUsage, Session, UsageCharge};
use warden_util::{ChildId, SessionId};

use crate::{AuditEvent, StoreResult};

/// Main store trait
///
/// Every session write is version-checked: `update_session` and
/// `commit_session` only succeed when the stored version matches the one on
/// the caller's copy, and bump it on success.
pub trait Store: Send + Sync {
    // Children

    /// Insert or replace a child definition
    fn upsert_child(&self, child: &Child) -> StoreResult<()>;

    fn get_child(&self, child_id: &ChildId) -> StoreResult<Option<Child>>;

    fn list_children(&self) -> StoreResult<Vec<Child>>;

    // Allocations

    fn get_allocation(
        &self,
        child_id: &ChildId,
        day: NaiveDate,
    ) -> StoreResult<Option<DailyAllocation>>;

    /// Insert the allocation unless one exists for the same child and day,
    /// and return whichever row is stored
    fn insert_allocation_if_absent(
        &self,
        allocation: &DailyAllocation,
    ) -> StoreResult<DailyAllocation>;

    /// Add reward minutes to an existing allocation
    fn add_bonus(
        &self,
        child_id: &ChildId,
        day: NaiveDate,
        minutes: u32,
    ) -> StoreResult<DailyAllocation>;

    // Usage summaries

    /// Usage for a child and day (an empty row when nothing was recorded)
    fn get_usage(&self, child_id: &ChildId, day: NaiveDate) -> StoreResult<DailyUsage>;

    // Sessions

    fn insert_session(&self, session: &Session) -> StoreResult<()>;

    fn get_session(&self, session_id: &SessionId) -> StoreResult<Option<Session>>;

    /// All `Active` and `Paused` sessions, oldest first
    fn list_open_sessions(&self) -> StoreResult<Vec<Session>>;

    /// Sessions of any status with `from <= started_at < to`, oldest first
    fn list_sessions_started_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<Session>>;

    /// Persist a session; bumps `session.version` on success
    fn update_session(&self, session: &mut Session) -> StoreResult<()>;

    /// Persist a session and apply usage charges in one transaction
    fn commit_session(&self, session: &mut Session, charges: &[UsageCharge]) -> StoreResult<()>;

    fn delete_session(&self, session_id: &SessionId) -> StoreResult<()>;

    // Window override

    /// Set or clear the "skip downtime" override for a calendar day
    fn set_downtime_skip(&self, day: NaiveDate, skip: bool) -> StoreResult<()>;

    fn is_downtime_skipped(&self, day: NaiveDate) -> StoreResult<bool>;

    // Audit log

    /// Append an audit event
    fn append_audit(&self, event: AuditEvent) -> StoreResult<()>;

    /// Get recent audit events, newest first
    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>>;

    // Health

    /// Check if store is healthy
    fn is_healthy(&self) -> bool;
}
