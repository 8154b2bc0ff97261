//! Time budget calculation
//!
//! The single source of truth for how many minutes a child has, has used and
//! has left on a calendar day. Finished sessions are read from the usage
//! summary; open sessions are computed on the fly and never persisted.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use tracing::info;
use warden_api::{Child, DailyAllocation, Session};
use warden_store::{AuditEvent, AuditEventType, Store, StoreResult};
use warden_util::{ChildId, SessionId, local_day};

use crate::SessionTiming;

/// Minutes available on a day
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvailableTime {
    pub base: u32,
    pub bonus: u32,
    pub total: u32,
}

/// Minutes consumed on a day
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumedTime {
    pub from_completed: u32,
    pub from_active: u32,
    pub total: u32,
    pub sessions_completed: u32,
}

/// How open sessions count against a budget
#[derive(Debug, Clone, Copy)]
enum OpenSessionCharge<'a> {
    /// Minutes actually used so far
    Elapsed,
    /// Elapsed, except the session being extended counts at its committed duration
    CommittedFor(&'a SessionId),
    /// Committed duration of every open session
    Committed,
}

pub struct TimeCalculator {
    store: Arc<dyn Store>,
    timezone: Tz,
}

impl TimeCalculator {
    pub fn new(store: Arc<dyn Store>, timezone: Tz) -> Self {
        Self { store, timezone }
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Calendar day key of an instant in the configured timezone
    pub fn day_of(&self, ts: DateTime<Utc>) -> NaiveDate {
        local_day(ts, self.timezone)
    }

    /// The day's allocation, created from the child's weekday or weekend
    /// allowance on first access
    pub fn allocation(&self, child: &Child, day: NaiveDate) -> StoreResult<DailyAllocation> {
        if let Some(existing) = self.store.get_allocation(&child.id, day)? {
            return Ok(existing);
        }

        self.store.insert_allocation_if_absent(&DailyAllocation {
            child_id: child.id.clone(),
            day,
            base_minutes: child.base_minutes_for(day.weekday()),
            bonus_minutes: 0,
        })
    }

    pub fn available_time(&self, child: &Child, day: NaiveDate) -> StoreResult<AvailableTime> {
        let allocation = self.allocation(child, day)?;
        Ok(AvailableTime {
            base: allocation.base_minutes,
            bonus: allocation.bonus_minutes,
            total: allocation.total(),
        })
    }

    pub fn consumed_time(
        &self,
        child_id: &ChildId,
        day: NaiveDate,
        now: DateTime<Utc>,
    ) -> StoreResult<ConsumedTime> {
        self.consumed(child_id, day, now, OpenSessionCharge::Elapsed)
    }

    pub fn remaining_time(
        &self,
        child: &Child,
        day: NaiveDate,
        now: DateTime<Utc>,
    ) -> StoreResult<u32> {
        self.remaining(child, day, now, OpenSessionCharge::Elapsed)
    }

    /// Remaining time with `session_id` counted at its committed duration
    /// and every other open session at its elapsed time
    pub fn remaining_time_for_extension(
        &self,
        child: &Child,
        day: NaiveDate,
        session_id: &SessionId,
        now: DateTime<Utc>,
    ) -> StoreResult<u32> {
        self.remaining(child, day, now, OpenSessionCharge::CommittedFor(session_id))
    }

    /// Remaining time with every open session counted at its committed duration
    pub fn remaining_time_committed(
        &self,
        child: &Child,
        day: NaiveDate,
        now: DateTime<Utc>,
    ) -> StoreResult<u32> {
        self.remaining(child, day, now, OpenSessionCharge::Committed)
    }

    /// Add reward minutes to a day's allocation
    pub fn grant_bonus(
        &self,
        child: &Child,
        day: NaiveDate,
        minutes: u32,
        now: DateTime<Utc>,
    ) -> StoreResult<DailyAllocation> {
        self.allocation(child, day)?;
        let allocation = self.store.add_bonus(&child.id, day, minutes)?;

        let _ = self.store.append_audit(AuditEvent::at(
            now,
            AuditEventType::BonusGranted {
                child_id: child.id.clone(),
                day,
                minutes,
            },
        ));

        info!(
            child_id = %child.id,
            day = %day,
            minutes,
            total = allocation.total(),
            "Bonus granted"
        );

        Ok(allocation)
    }

    fn remaining(
        &self,
        child: &Child,
        day: NaiveDate,
        now: DateTime<Utc>,
        charge: OpenSessionCharge<'_>,
    ) -> StoreResult<u32> {
        let available = self.available_time(child, day)?;
        let consumed = self.consumed(&child.id, day, now, charge)?;
        Ok(available.total.saturating_sub(consumed.total))
    }

    fn consumed(
        &self,
        child_id: &ChildId,
        day: NaiveDate,
        now: DateTime<Utc>,
        charge: OpenSessionCharge<'_>,
    ) -> StoreResult<ConsumedTime> {
        let usage = self.store.get_usage(child_id, day)?;

        let from_active = self
            .open_sessions_for(child_id, day)?
            .iter()
            .map(|session| match charge {
                OpenSessionCharge::Elapsed => session.live_charge(child_id, now),
                OpenSessionCharge::CommittedFor(id) if &session.id == id => {
                    session.committed_charge(child_id)
                }
                OpenSessionCharge::CommittedFor(_) => session.live_charge(child_id, now),
                OpenSessionCharge::Committed => session.committed_charge(child_id),
            })
            .fold(0u32, u32::saturating_add);

        Ok(ConsumedTime {
            from_completed: usage.minutes_used,
            from_active,
            total: usage.minutes_used.saturating_add(from_active),
            sessions_completed: usage.sessions_completed,
        })
    }

    /// Open sessions of `child_id` that started on `day`
    fn open_sessions_for(&self, child_id: &ChildId, day: NaiveDate) -> StoreResult<Vec<Session>> {
        Ok(self
            .store
            .list_open_sessions()?
            .into_iter()
            .filter(|s| s.has_participant(child_id) && self.day_of(s.started_at) == day)
            .collect())
    }
}
