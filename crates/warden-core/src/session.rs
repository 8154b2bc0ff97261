//! Per-session time arithmetic
//!
//! Remaining time is never stored. Everything here is derived from the
//! session record and the caller's notion of "now".

use chrono::{DateTime, Duration, Utc};
use warden_api::Session;
use warden_util::{ChildId, whole_minutes};

/// Time arithmetic over a [`Session`] record
pub trait SessionTiming {
    /// Seconds spent in breaks up to `now`, including a break in progress
    fn break_seconds(&self, now: DateTime<Utc>) -> i64;

    /// Minutes of use, excluding breaks and clamped to the committed duration.
    /// Terminal sessions report their recorded duration.
    fn elapsed_minutes(&self, now: DateTime<Utc>) -> u32;

    /// Committed minutes not yet used, never negative
    fn remaining_minutes(&self, now: DateTime<Utc>) -> u32;

    /// When the committed duration runs out (or ran out)
    fn end_time(&self) -> DateTime<Utc>;

    /// Minutes of continuous use since the session started or the last break ended
    fn minutes_since_break(&self, now: DateTime<Utc>) -> u32;

    /// Whether a mandatory break is running
    fn in_break(&self) -> bool;

    /// Live minutes not yet booked to `child_id`'s usage
    fn live_charge(&self, child_id: &ChildId, now: DateTime<Utc>) -> u32;

    /// Committed minutes not yet booked to `child_id`'s usage
    fn committed_charge(&self, child_id: &ChildId) -> u32;
}

impl SessionTiming for Session {
    fn break_seconds(&self, now: DateTime<Utc>) -> i64 {
        let running = match (self.last_break_at, self.break_ends_at) {
            (Some(began), Some(ends)) => (now.min(ends) - began).num_seconds().max(0),
            _ => 0,
        };
        self.paused_seconds + running
    }

    fn elapsed_minutes(&self, now: DateTime<Utc>) -> u32 {
        if self.status.is_terminal() {
            return self.actual_minutes.unwrap_or(self.expected_minutes);
        }

        let used = now - self.started_at - Duration::seconds(self.break_seconds(now));
        whole_minutes(used).min(self.expected_minutes)
    }

    fn remaining_minutes(&self, now: DateTime<Utc>) -> u32 {
        if self.status.is_terminal() {
            return 0;
        }
        self.expected_minutes
            .saturating_sub(self.elapsed_minutes(now))
    }

    fn end_time(&self) -> DateTime<Utc> {
        if self.status.is_terminal() {
            let minutes = self.actual_minutes.unwrap_or(self.expected_minutes);
            return self
                .ended_at
                .unwrap_or(self.started_at + Duration::minutes(minutes as i64));
        }

        let running_break = match (self.last_break_at, self.break_ends_at) {
            (Some(began), Some(ends)) => ends - began,
            _ => Duration::zero(),
        };

        self.started_at
            + Duration::minutes(self.expected_minutes as i64)
            + Duration::seconds(self.paused_seconds)
            + running_break
    }

    fn minutes_since_break(&self, now: DateTime<Utc>) -> u32 {
        let anchor = match self.last_break_at {
            Some(last) if last > self.started_at => last,
            _ => self.started_at,
        };
        whole_minutes(now - anchor)
    }

    fn in_break(&self) -> bool {
        self.break_ends_at.is_some()
    }

    fn live_charge(&self, child_id: &ChildId, now: DateTime<Utc>) -> u32 {
        self.elapsed_minutes(now)
            .saturating_sub(self.prepaid_for(child_id))
    }

    fn committed_charge(&self, child_id: &ChildId) -> u32 {
        self.expected_minutes
            .saturating_sub(self.prepaid_for(child_id))
    }
}
