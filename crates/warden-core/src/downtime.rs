//! Recurring downtime evaluation
//!
//! A pure function of the schedule, the timezone and an instant. It gates
//! admission only; running sessions are never cut short by it.

use chrono::{DateTime, Datelike, Duration, Utc};
use chrono_tz::Tz;
use warden_api::Child;
use warden_config::{DowntimeSchedule, DowntimeWindow};
use warden_util::{local_datetime, local_day, local_minute_of_day};

pub struct Downtime {
    schedule: DowntimeSchedule,
    timezone: Tz,
}

impl Downtime {
    pub fn new(schedule: DowntimeSchedule, timezone: Tz) -> Self {
        Self { schedule, timezone }
    }

    /// Evaluator with nothing configured; never excludes anyone
    pub fn disabled(timezone: Tz) -> Self {
        Self::new(DowntimeSchedule::default(), timezone)
    }

    pub fn is_enabled(&self) -> bool {
        self.schedule.is_enabled()
    }

    /// Window that applies on the local day of `ts`
    fn window_at(&self, ts: DateTime<Utc>) -> Option<DowntimeWindow> {
        self.schedule
            .window_for(local_day(ts, self.timezone).weekday())
    }

    pub fn is_in_window(&self, ts: DateTime<Utc>) -> bool {
        match self.window_at(ts) {
            Some(window) => window.contains_minute(local_minute_of_day(ts, self.timezone)),
            None => false,
        }
    }

    /// Whether downtime currently blocks `child`
    pub fn is_child_excluded(&self, child: &Child, ts: DateTime<Utc>) -> bool {
        child.downtime_enabled && self.is_enabled() && self.is_in_window(ts)
    }

    /// When the window `ts` falls in ends; `None` outside a window
    pub fn current_window_end(&self, ts: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let window = self.window_at(ts)?;
        let minute = local_minute_of_day(ts, self.timezone);
        if !window.contains_minute(minute) {
            return None;
        }

        let today = local_day(ts, self.timezone);
        // Overnight windows entered before midnight end tomorrow
        let end_day = if window.wraps_midnight() && minute >= window.start.minutes_from_midnight() {
            today + Duration::days(1)
        } else {
            today
        };

        Some(local_datetime(end_day, window.end.to_naive_time(), self.timezone))
    }

    /// Next instant after `ts` at which a window opens; `None` when no day
    /// of the week has one
    pub fn next_window_start(&self, ts: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let today = local_day(ts, self.timezone);

        (0..=7).find_map(|offset| {
            let day = today + Duration::days(offset);
            let window = self.schedule.window_for(day.weekday())?;
            let start = local_datetime(day, window.start.to_naive_time(), self.timezone);
            (start > ts).then_some(start)
        })
    }
}
