//! Session lifecycle manager
//!
//! Admission, extension, participant changes and termination of sessions.
//! Validation and budget checks always complete before the first write, and
//! the session row exists in the store before its device is unlocked.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use warden_api::{Child, ChildStatus, DailyAllocation, Session, SessionEndReason, SessionStatus, UsageCharge};
use warden_config::Policy;
use warden_driver_api::{DeviceDriver, DriverRegistry, with_timeout};
use warden_store::{AuditEvent, AuditEventType, Store, StoreError};
use warden_util::{ChildId, DeviceId, SessionId, day_start};

use crate::{
    CoreEvent, DeviceDirectory, Downtime, SessionError, SessionResult, SessionTiming,
    TimeCalculator,
};

/// Capacity of the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Reloads attempted when a session row changes under an extension
const CONFLICT_RETRIES: u32 = 3;

/// Orchestrates the session state machine
pub struct SessionManager {
    store: Arc<dyn Store>,
    drivers: Arc<DriverRegistry>,
    devices: Arc<DeviceDirectory>,
    calculator: TimeCalculator,
    downtime: Downtime,
    warning_minutes: u32,
    driver_timeout: std::time::Duration,
    events: broadcast::Sender<CoreEvent>,
}

impl SessionManager {
    pub fn new(
        policy: &Policy,
        store: Arc<dyn Store>,
        drivers: Arc<DriverRegistry>,
        devices: Arc<DeviceDirectory>,
    ) -> Self {
        let timezone = policy.service.timezone;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        info!(
            timezone = %timezone,
            warning_minutes = policy.service.warning_minutes,
            downtime = policy.downtime.is_enabled(),
            "Session manager initialized"
        );

        Self {
            calculator: TimeCalculator::new(store.clone(), timezone),
            downtime: Downtime::new(policy.downtime.clone(), timezone),
            store,
            drivers,
            devices,
            warning_minutes: policy.service.warning_minutes,
            driver_timeout: policy.service.driver_timeout,
            events,
        }
    }

    pub fn calculator(&self) -> &TimeCalculator {
        &self.calculator
    }

    pub fn downtime(&self) -> &Downtime {
        &self.downtime
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn warning_minutes(&self) -> u32 {
        self.warning_minutes
    }

    /// Receive every event published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.events.subscribe()
    }

    /// Admit a new session and unlock its device
    ///
    /// Admission is all-or-nothing: if any child is blocked by downtime or
    /// lacks budget, nothing is written.
    pub async fn start(
        &self,
        device_id: &DeviceId,
        children: &[ChildId],
        minutes: u32,
        now: DateTime<Utc>,
    ) -> SessionResult<Session> {
        if children.is_empty() {
            return Err(SessionError::EmptyParticipants);
        }
        if minutes == 0 {
            return Err(SessionError::InvalidDuration);
        }

        let device = self
            .devices
            .get(device_id)
            .ok_or_else(|| SessionError::UnknownDevice(device_id.clone()))?;
        let driver = self
            .drivers
            .get(&device.driver)
            .ok_or_else(|| SessionError::UnknownDriver(device.driver.clone()))?;

        let participants = self.load_children(&dedup(children))?;
        let today = self.calculator.day_of(now);

        self.check_downtime(device_id, &participants, today, now)?;

        for child in &participants {
            let remaining = self
                .calculator
                .remaining_time_committed(child, today, now)?;
            if remaining < minutes {
                self.audit_denied(device_id, Some(&child.id), "insufficient time", now);
                debug!(
                    child_id = %child.id,
                    remaining,
                    requested = minutes,
                    "Start denied: insufficient time"
                );
                return Err(SessionError::InsufficientTime {
                    child_id: child.id.clone(),
                    remaining,
                    requested: minutes,
                });
            }
        }

        let mut session = Session::new(
            device.id.clone(),
            device.kind.clone(),
            participants.iter().map(|c| c.id.clone()).collect(),
            minutes,
            now,
        );
        let short = minutes <= self.warning_minutes;
        if short {
            session.warning_sent_at = Some(now);
        }

        // Durable record first, then the side effect
        self.store.insert_session(&session)?;

        if let Err(e) = with_timeout(
            self.driver_timeout,
            driver.name(),
            "start",
            driver.start(&session),
        )
        .await
        {
            warn!(
                session_id = %session.id,
                device_id = %device_id,
                error = %e,
                "Driver start failed, removing session"
            );
            if let Err(delete_err) = self.store.delete_session(&session.id) {
                error!(
                    session_id = %session.id,
                    error = %delete_err,
                    "Compensating delete failed"
                );
            }
            self.audit_denied(device_id, None, &format!("driver start failed: {}", e), now);
            return Err(SessionError::Driver(e));
        }

        self.audit(
            now,
            AuditEventType::SessionStarted {
                session_id: session.id.clone(),
                device_id: device_id.clone(),
                participants: session.participants.clone(),
                minutes,
            },
        );

        info!(
            session_id = %session.id,
            device_id = %device_id,
            participants = ?session.participants,
            minutes,
            "Session started"
        );

        self.publish(CoreEvent::SessionStarted {
            session_id: session.id.clone(),
            device_id: device_id.clone(),
            participants: session.participants.clone(),
            expected_minutes: minutes,
        });

        if short {
            self.send_warning(driver.as_ref(), &session, minutes).await;
            self.audit(
                now,
                AuditEventType::WarningIssued {
                    session_id: session.id.clone(),
                    minutes_remaining: minutes,
                },
            );
            self.publish(CoreEvent::WarningIssued {
                session_id: session.id.clone(),
                minutes_remaining: minutes,
            });
        }

        Ok(session)
    }

    /// Add minutes to an active session
    pub async fn extend(
        &self,
        session_id: &SessionId,
        minutes: u32,
        now: DateTime<Utc>,
    ) -> SessionResult<Session> {
        if minutes == 0 {
            return Err(SessionError::InvalidDuration);
        }

        let session = self.load_session(session_id)?;
        if session.status != SessionStatus::Active {
            return Err(SessionError::InvalidState {
                session_id: session_id.clone(),
                status: session.status,
            });
        }

        let day = self.calculator.day_of(session.started_at);
        for child in self.load_children(&session.participants)? {
            let remaining = self
                .calculator
                .remaining_time_for_extension(&child, day, session_id, now)?;
            if remaining < minutes {
                debug!(
                    session_id = %session_id,
                    child_id = %child.id,
                    remaining,
                    requested = minutes,
                    "Extension denied: insufficient time"
                );
                return Err(SessionError::InsufficientTime {
                    child_id: child.id.clone(),
                    remaining,
                    requested: minutes,
                });
            }
        }

        let driver = self.driver_for(&session.device_id)?;
        let extender = driver.extender();
        if let Some(extender) = extender {
            with_timeout(
                self.driver_timeout,
                driver.name(),
                "extend",
                extender.extend(&session, minutes),
            )
            .await?;
        }

        let session = match self.persist_extension(session, minutes, now) {
            Ok(session) => session,
            Err(e) => {
                // The device may already run on the longer deadline
                if extender.is_some()
                    && let Ok(Some(current)) = self.store.get_session(session_id)
                    && !current.status.is_open()
                {
                    warn!(session_id = %session_id, status = ?current.status, "Session closed during extension, stopping device again");
                    self.stop_device(&current).await;
                }
                return Err(e);
            }
        };

        self.audit(
            now,
            AuditEventType::SessionExtended {
                session_id: session_id.clone(),
                added_minutes: minutes,
                expected_minutes: session.expected_minutes,
            },
        );

        info!(
            session_id = %session_id,
            added_minutes = minutes,
            expected_minutes = session.expected_minutes,
            "Session extended"
        );

        self.publish(CoreEvent::SessionExtended {
            session_id: session_id.clone(),
            added_minutes: minutes,
            expected_minutes: session.expected_minutes,
        });

        Ok(session)
    }

    /// Write an extension against the latest copy of the session
    ///
    /// A version conflict reloads the row and reapplies the extension as long
    /// as the session is still open.
    fn persist_extension(
        &self,
        mut session: Session,
        minutes: u32,
        now: DateTime<Utc>,
    ) -> SessionResult<Session> {
        let mut attempts = 0;
        loop {
            session.expected_minutes += minutes;
            session.warning_sent_at = None;
            session.last_extended_at = Some(now);
            if session.break_ends_at.is_none() {
                session.last_break_at = Some(now);
            }

            match self.store.update_session(&mut session) {
                Ok(()) => return Ok(session),
                Err(StoreError::Conflict(msg)) if attempts < CONFLICT_RETRIES => {
                    attempts += 1;
                    debug!(session_id = %session.id, reason = %msg, "Session changed during extension, reloading");
                    session = self.load_session(&session.id)?;
                    if !session.status.is_open() {
                        return Err(SessionError::InvalidState {
                            session_id: session.id.clone(),
                            status: session.status,
                        });
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Stop an open session and credit its usage
    pub async fn stop(&self, session_id: &SessionId, now: DateTime<Utc>) -> SessionResult<Session> {
        let session = self.load_session(session_id)?;
        if !session.status.is_open() {
            return Err(SessionError::InvalidState {
                session_id: session_id.clone(),
                status: session.status,
            });
        }

        let (session, _) = self.finish(session, SessionEndReason::Stopped, now).await?;
        Ok(session)
    }

    /// Add children to an open session
    ///
    /// Each joiner must be able to afford the minutes already elapsed; those
    /// minutes are booked to their usage right away.
    pub async fn add_participants(
        &self,
        session_id: &SessionId,
        children: &[ChildId],
        now: DateTime<Utc>,
    ) -> SessionResult<Session> {
        if children.is_empty() {
            return Err(SessionError::EmptyParticipants);
        }

        let mut session = self.load_session(session_id)?;
        if !session.status.is_open() {
            return Err(SessionError::InvalidState {
                session_id: session_id.clone(),
                status: session.status,
            });
        }

        let joining: Vec<ChildId> = dedup(children)
            .into_iter()
            .filter(|c| !session.has_participant(c))
            .collect();
        if joining.is_empty() {
            return Ok(session);
        }

        let joiners = self.load_children(&joining)?;
        let elapsed = session.elapsed_minutes(now);
        let day = self.calculator.day_of(session.started_at);

        for child in &joiners {
            let remaining = self.calculator.remaining_time_committed(child, day, now)?;
            if remaining < elapsed {
                return Err(SessionError::InsufficientTime {
                    child_id: child.id.clone(),
                    remaining,
                    requested: elapsed,
                });
            }
        }

        let charges: Vec<UsageCharge> = joining
            .iter()
            .map(|child_id| UsageCharge {
                child_id: child_id.clone(),
                day,
                minutes: elapsed,
                sessions: 0,
            })
            .collect();

        for child_id in &joining {
            session.participants.push(child_id.clone());
            session.prepaid_minutes.insert(child_id.clone(), elapsed);
        }
        self.store.commit_session(&mut session, &charges)?;

        self.audit(
            now,
            AuditEventType::ParticipantsJoined {
                session_id: session_id.clone(),
                children: joining.clone(),
                charged_minutes: elapsed,
            },
        );

        info!(
            session_id = %session_id,
            children = ?joining,
            charged_minutes = elapsed,
            "Participants joined"
        );

        self.publish(CoreEvent::ParticipantsJoined {
            session_id: session_id.clone(),
            children: joining,
            charged_minutes: elapsed,
        });

        Ok(session)
    }

    /// Today's numbers for one child
    pub fn status(&self, child_id: &ChildId, now: DateTime<Utc>) -> SessionResult<ChildStatus> {
        let child = self.load_child(child_id)?;
        let today = self.calculator.day_of(now);

        let available = self.calculator.available_time(&child, today)?;
        let consumed = self.calculator.consumed_time(child_id, today, now)?;
        let in_downtime = self.downtime.is_child_excluded(&child, now)
            && !self.store.is_downtime_skipped(today)?;

        Ok(ChildStatus {
            child_id: child_id.clone(),
            day: today,
            used_minutes: consumed.total,
            remaining_minutes: available.total.saturating_sub(consumed.total),
            limit_minutes: available.total,
            sessions_today: consumed.sessions_completed,
            in_downtime,
        })
    }

    /// Give a child reward minutes for today
    pub fn grant_bonus(
        &self,
        child_id: &ChildId,
        minutes: u32,
        now: DateTime<Utc>,
    ) -> SessionResult<DailyAllocation> {
        if minutes == 0 {
            return Err(SessionError::InvalidDuration);
        }
        let child = self.load_child(child_id)?;
        let today = self.calculator.day_of(now);
        Ok(self.calculator.grant_bonus(&child, today, minutes, now)?)
    }

    /// Lift (or restore) downtime for one calendar day
    pub fn skip_downtime(&self, day: NaiveDate, skip: bool, now: DateTime<Utc>) -> SessionResult<()> {
        self.store.set_downtime_skip(day, skip)?;
        self.audit(now, AuditEventType::DowntimeSkipped { day, skip });
        info!(day = %day, skip, "Downtime override updated");
        Ok(())
    }

    /// Sessions of any status that `child_id` took part in, started on `day`
    pub fn sessions_for_day(
        &self,
        child_id: &ChildId,
        day: NaiveDate,
    ) -> SessionResult<Vec<Session>> {
        let tz = self.calculator.timezone();
        let from = day_start(day, tz);
        let to = day_start(day + Duration::days(1), tz);

        Ok(self
            .store
            .list_sessions_started_between(from, to)?
            .into_iter()
            .filter(|s| s.has_participant(child_id))
            .collect())
    }

    /// Move an open session to its terminal state
    ///
    /// The terminal row and its charges are committed against the version
    /// that was read; only then is the device stopped. A conflict leaves the
    /// device untouched. A stop failure is logged and the session stays
    /// closed and charged.
    pub(crate) async fn finish(
        &self,
        mut session: Session,
        reason: SessionEndReason,
        now: DateTime<Utc>,
    ) -> SessionResult<(Session, CoreEvent)> {
        let actual = session.elapsed_minutes(now);
        let day = self.calculator.day_of(session.started_at);
        let charges: Vec<UsageCharge> = session
            .participants
            .iter()
            .map(|child_id| UsageCharge {
                child_id: child_id.clone(),
                day,
                minutes: actual.saturating_sub(session.prepaid_for(child_id)),
                sessions: 1,
            })
            .collect();

        session.status = reason.status();
        session.actual_minutes = Some(actual);
        session.ended_at = Some(now);
        self.store.commit_session(&mut session, &charges)?;

        self.stop_device(&session).await;

        self.audit(
            now,
            AuditEventType::SessionEnded {
                session_id: session.id.clone(),
                reason,
                actual_minutes: actual,
            },
        );

        info!(
            session_id = %session.id,
            device_id = %session.device_id,
            reason = ?reason,
            actual_minutes = actual,
            "Session ended"
        );

        let event = self.publish(CoreEvent::SessionEnded {
            session_id: session.id.clone(),
            reason,
            actual_minutes: actual,
        });

        Ok((session, event))
    }

    async fn stop_device(&self, session: &Session) {
        match self.driver_for(&session.device_id) {
            Ok(driver) => {
                if let Err(e) = with_timeout(
                    self.driver_timeout,
                    driver.name(),
                    "stop",
                    driver.stop(session),
                )
                .await
                {
                    warn!(
                        session_id = %session.id,
                        device_id = %session.device_id,
                        error = %e,
                        "Driver stop failed"
                    );
                }
            }
            Err(e) => warn!(
                session_id = %session.id,
                error = %e,
                "No driver to stop device"
            ),
        }
    }

    /// Send a warning, logging instead of failing
    pub(crate) async fn send_warning(
        &self,
        driver: &dyn DeviceDriver,
        session: &Session,
        minutes_remaining: u32,
    ) -> bool {
        if !driver.capabilities().can_warn {
            debug!(
                session_id = %session.id,
                driver = driver.name(),
                "Driver cannot warn, skipping"
            );
            return false;
        }

        match with_timeout(
            self.driver_timeout,
            driver.name(),
            "warn",
            driver.warn(session, minutes_remaining),
        )
        .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    session_id = %session.id,
                    minutes_remaining,
                    error = %e,
                    "Driver warning failed"
                );
                false
            }
        }
    }

    pub(crate) fn driver_for(&self, device_id: &DeviceId) -> SessionResult<Arc<dyn DeviceDriver>> {
        let device = self
            .devices
            .get(device_id)
            .ok_or_else(|| SessionError::UnknownDevice(device_id.clone()))?;
        self.drivers
            .get(&device.driver)
            .ok_or(SessionError::UnknownDriver(device.driver))
    }

    pub(crate) fn load_child(&self, child_id: &ChildId) -> SessionResult<Child> {
        self.store
            .get_child(child_id)?
            .ok_or_else(|| SessionError::UnknownChild(child_id.clone()))
    }

    pub(crate) fn audit(&self, now: DateTime<Utc>, event: AuditEventType) {
        let _ = self.store.append_audit(AuditEvent::at(now, event));
    }

    pub(crate) fn publish(&self, event: CoreEvent) -> CoreEvent {
        // No receivers is fine
        let _ = self.events.send(event.clone());
        event
    }

    fn load_children(&self, ids: &[ChildId]) -> SessionResult<Vec<Child>> {
        ids.iter().map(|id| self.load_child(id)).collect()
    }

    fn load_session(&self, session_id: &SessionId) -> SessionResult<Session> {
        self.store
            .get_session(session_id)?
            .ok_or_else(|| SessionError::SessionNotFound(session_id.clone()))
    }

    fn check_downtime(
        &self,
        device_id: &DeviceId,
        children: &[Child],
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> SessionResult<()> {
        let Some(blocked) = children
            .iter()
            .find(|c| self.downtime.is_child_excluded(c, now))
        else {
            return Ok(());
        };

        if self.store.is_downtime_skipped(today)? {
            debug!(day = %today, "Downtime skipped for today");
            return Ok(());
        }

        let until = self.downtime.current_window_end(now).unwrap_or(now);
        self.audit_denied(device_id, Some(&blocked.id), "downtime", now);
        debug!(child_id = %blocked.id, until = %until, "Start denied: downtime");

        Err(SessionError::DowntimeActive {
            child_id: blocked.id.clone(),
            until,
        })
    }

    fn audit_denied(
        &self,
        device_id: &DeviceId,
        child_id: Option<&ChildId>,
        reason: &str,
        now: DateTime<Utc>,
    ) {
        self.audit(
            now,
            AuditEventType::StartDenied {
                device_id: device_id.clone(),
                child_id: child_id.cloned(),
                reason: reason.to_string(),
            },
        );
    }
}

/// Drop repeated IDs, keeping first occurrences in order
fn dedup(ids: &[ChildId]) -> Vec<ChildId> {
    let mut out: Vec<ChildId> = Vec::with_capacity(ids.len());
    for id in ids {
        if !out.contains(id) {
            out.push(id.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use std::time::Duration as StdDuration;
    use warden_config::{DowntimeSchedule, DowntimeWindow};
    use warden_driver_api::{DriverCall, DriverError, MockDriver};
    use warden_util::WallClock;

    fn tv() -> DeviceId {
        DeviceId::new("tv")
    }

    #[tokio::test]
    async fn start_validation_errors() {
        let h = Harness::new(vec![child("alice", 60)]);
        let m = &h.manager;

        assert!(matches!(
            m.start(&tv(), &[], 30, t(10, 0)).await,
            Err(SessionError::EmptyParticipants)
        ));
        assert!(matches!(
            m.start(&tv(), &ids(&["alice"]), 0, t(10, 0)).await,
            Err(SessionError::InvalidDuration)
        ));
        assert!(matches!(
            m.start(&DeviceId::new("toaster"), &ids(&["alice"]), 30, t(10, 0)).await,
            Err(SessionError::UnknownDevice(_))
        ));
        assert!(matches!(
            m.start(&DeviceId::new("fridge"), &ids(&["alice"]), 30, t(10, 0)).await,
            Err(SessionError::UnknownDriver(name)) if name == "cloud"
        ));
        assert!(matches!(
            m.start(&tv(), &ids(&["alice", "mallory"]), 30, t(10, 0)).await,
            Err(SessionError::UnknownChild(id)) if id.as_str() == "mallory"
        ));

        assert!(h.store.list_open_sessions().unwrap().is_empty());
        assert!(h.driver.calls().is_empty());
    }

    #[tokio::test]
    async fn single_child_budget_scenario() {
        let h = Harness::new(vec![child("alice", 60)]);
        let m = &h.manager;
        let alice = &child("alice", 60);
        let monday = m.calculator().day_of(t(10, 0));

        let first = m.start(&tv(), &ids(&["alice"]), 30, t(10, 0)).await.unwrap();
        assert_eq!(first.status, SessionStatus::Active);
        assert_eq!(
            m.calculator()
                .remaining_time_committed(alice, monday, t(10, 0))
                .unwrap(),
            30
        );

        let second = m.start(&DeviceId::new("console"), &ids(&["alice"]), 40, t(10, 5)).await;
        assert!(matches!(
            second,
            Err(SessionError::InsufficientTime { remaining: 30, requested: 40, .. })
        ));

        let stopped = m.stop(&first.id, t(10, 30)).await.unwrap();
        assert_eq!(stopped.status, SessionStatus::Completed);
        assert_eq!(stopped.actual_minutes, Some(30));

        let usage = h.store.get_usage(&alice.id, monday).unwrap();
        assert_eq!(usage.minutes_used, 30);
        assert_eq!(usage.sessions_completed, 1);

        let status = m.status(&alice.id, t(10, 30)).unwrap();
        assert_eq!(status.used_minutes, 30);
        assert_eq!(status.remaining_minutes, 30);
        assert_eq!(status.limit_minutes, 60);
        assert_eq!(status.sessions_today, 1);
        assert!(!status.in_downtime);
    }

    #[tokio::test]
    async fn admission_is_all_or_nothing() {
        let h = Harness::new(vec![child("alice", 60), child("bob", 20)]);
        let m = &h.manager;

        let result = m.start(&tv(), &ids(&["alice", "bob"]), 30, t(10, 0)).await;
        assert!(matches!(
            result,
            Err(SessionError::InsufficientTime { ref child_id, remaining: 20, .. }) if child_id.as_str() == "bob"
        ));

        assert!(h.store.list_open_sessions().unwrap().is_empty());
        assert!(h.driver.calls().is_empty());
        let day = m.calculator().day_of(t(10, 0));
        for name in ["alice", "bob"] {
            let usage = h.store.get_usage(&ChildId::new(name), day).unwrap();
            assert_eq!(usage.minutes_used, 0);
        }
    }

    #[tokio::test]
    async fn shared_session_charges_each_participant_fully() {
        let h = Harness::new(vec![child("alice", 60), child("bob", 90)]);
        let m = &h.manager;

        let session = m
            .start(&tv(), &ids(&["alice", "bob"]), 30, t(10, 0))
            .await
            .unwrap();
        m.stop(&session.id, t(10, 30)).await.unwrap();

        let day = m.calculator().day_of(t(10, 0));
        for name in ["alice", "bob"] {
            let usage = h.store.get_usage(&ChildId::new(name), day).unwrap();
            assert_eq!(usage.minutes_used, 30, "{} usage", name);
            assert_eq!(usage.sessions_completed, 1);
        }
    }

    #[tokio::test]
    async fn duplicate_children_are_collapsed() {
        let h = Harness::new(vec![child("alice", 60)]);
        let session = h
            .manager
            .start(&tv(), &ids(&["alice", "alice"]), 30, t(10, 0))
            .await
            .unwrap();

        assert_eq!(session.participants, ids(&["alice"]));
    }

    #[tokio::test]
    async fn driver_start_failure_removes_session() {
        let h = Harness::new(vec![child("alice", 60)]);
        h.driver.set_fail_start(true);

        let result = h.manager.start(&tv(), &ids(&["alice"]), 30, t(10, 0)).await;
        assert!(matches!(
            result,
            Err(SessionError::Driver(DriverError::StartFailed(_)))
        ));

        assert!(h.store.list_open_sessions().unwrap().is_empty());
        let calls = h.driver.calls();
        assert_eq!(calls.len(), 1);
        let DriverCall::Start { session_id, .. } = &calls[0] else {
            panic!("expected a start call");
        };
        assert!(h.store.get_session(session_id).unwrap().is_none());

        let audits = h.store.get_recent_audits(1).unwrap();
        assert!(matches!(audits[0].event, AuditEventType::StartDenied { .. }));
    }

    #[tokio::test]
    async fn driver_start_timeout_removes_session() {
        let h = Harness::build(vec![child("alice", 60)], MockDriver::new(), |policy| {
            policy.service.driver_timeout = StdDuration::from_millis(20);
        });
        h.driver.set_delay(Some(StdDuration::from_secs(5)));

        let result = h.manager.start(&tv(), &ids(&["alice"]), 30, t(10, 0)).await;
        assert!(matches!(
            result,
            Err(SessionError::Driver(DriverError::Timeout { operation: "start", .. }))
        ));
        assert!(h.store.list_open_sessions().unwrap().is_empty());
    }

    #[tokio::test]
    async fn short_session_warns_at_creation() {
        let h = Harness::new(vec![child("alice", 60)]);
        let mut events = h.manager.subscribe();

        let session = h.manager.start(&tv(), &ids(&["alice"]), 5, t(10, 0)).await.unwrap();

        assert_eq!(session.warning_sent_at, Some(t(10, 0)));
        assert_eq!(h.driver.warnings_for(&session.id), vec![5]);

        let stored = h.store.get_session(&session.id).unwrap().unwrap();
        assert_eq!(stored.warning_sent_at, Some(t(10, 0)));

        assert!(matches!(events.try_recv().unwrap(), CoreEvent::SessionStarted { .. }));
        assert!(matches!(
            events.try_recv().unwrap(),
            CoreEvent::WarningIssued { minutes_remaining: 5, .. }
        ));
    }

    #[tokio::test]
    async fn long_session_does_not_warn_at_creation() {
        let h = Harness::new(vec![child("alice", 60)]);
        let session = h.manager.start(&tv(), &ids(&["alice"]), 6, t(10, 0)).await.unwrap();

        assert_eq!(session.warning_sent_at, None);
        assert!(h.driver.warnings_for(&session.id).is_empty());
    }

    fn evening_downtime(policy: &mut Policy) {
        policy.downtime = DowntimeSchedule::flat(DowntimeWindow::new(
            WallClock::new(20, 0).unwrap(),
            WallClock::new(7, 0).unwrap(),
        ));
    }

    #[tokio::test]
    async fn downtime_blocks_start_until_skipped() {
        let mut free = child("bob", 60);
        free.downtime_enabled = false;
        let h = Harness::build(vec![child("alice", 60), free], MockDriver::new(), evening_downtime);
        let m = &h.manager;

        let result = m.start(&tv(), &ids(&["bob", "alice"]), 30, t(21, 0)).await;
        match result {
            Err(SessionError::DowntimeActive { child_id, until }) => {
                assert_eq!(child_id.as_str(), "alice");
                assert_eq!(until, t(7, 0) + Duration::days(1));
            }
            other => panic!("unexpected result {:?}", other),
        }
        assert!(m.status(&ChildId::new("alice"), t(21, 0)).unwrap().in_downtime);

        // opted-out child alone is fine
        m.start(&tv(), &ids(&["bob"]), 10, t(21, 0)).await.unwrap();

        let day = m.calculator().day_of(t(21, 0));
        m.skip_downtime(day, true, t(21, 0)).unwrap();
        assert!(!m.status(&ChildId::new("alice"), t(21, 0)).unwrap().in_downtime);
        m.start(&DeviceId::new("console"), &ids(&["alice"]), 10, t(21, 0))
            .await
            .unwrap();

        m.skip_downtime(day, false, t(21, 5)).unwrap();
        assert!(m.start(&tv(), &ids(&["alice"]), 10, t(21, 5)).await.is_err());
    }

    #[tokio::test]
    async fn extend_updates_commitment_and_resets_warning() {
        let h = Harness::new(vec![child("alice", 120)]);
        let m = &h.manager;

        let session = m.start(&tv(), &ids(&["alice"]), 30, t(10, 0)).await.unwrap();
        let mut stored = h.store.get_session(&session.id).unwrap().unwrap();
        stored.last_break_at = Some(t(10, 5));
        stored.warning_sent_at = Some(t(10, 25));
        h.store.update_session(&mut stored).unwrap();

        let extended = m.extend(&session.id, 15, t(10, 26)).await.unwrap();
        assert_eq!(extended.expected_minutes, 45);
        assert_eq!(extended.warning_sent_at, None);
        assert_eq!(extended.last_break_at, Some(t(10, 26)));
        assert_eq!(extended.last_extended_at, Some(t(10, 26)));
        let stored = h.store.get_session(&session.id).unwrap().unwrap();
        assert_eq!(stored.last_break_at, Some(t(10, 26)));
        assert_eq!(stored.version, extended.version);

        // plain mock driver has no extender
        assert!(!h
            .driver
            .calls()
            .iter()
            .any(|c| matches!(c, DriverCall::Extend { .. })));
    }

    #[tokio::test]
    async fn extend_calls_extender_before_persisting() {
        let h = Harness::build(vec![child("alice", 120)], MockDriver::new().with_extender(), |_| {});
        let m = &h.manager;
        let session = m.start(&tv(), &ids(&["alice"]), 30, t(10, 0)).await.unwrap();

        h.driver.set_fail_extend(true);
        let result = m.extend(&session.id, 15, t(10, 10)).await;
        assert!(matches!(
            result,
            Err(SessionError::Driver(DriverError::ExtendFailed(_)))
        ));
        let stored = h.store.get_session(&session.id).unwrap().unwrap();
        assert_eq!(stored.expected_minutes, 30);

        h.driver.set_fail_extend(false);
        m.extend(&session.id, 15, t(10, 10)).await.unwrap();
        assert!(h.driver.calls().contains(&DriverCall::Extend {
            session_id: session.id.clone(),
            additional_minutes: 15
        }));
    }

    #[tokio::test]
    async fn stop_during_device_extension_keeps_device_stopped() {
        let h = Harness::build(vec![child("alice", 120)], MockDriver::new().with_extender(), |_| {});
        let session = h.manager.start(&tv(), &ids(&["alice"]), 30, t(10, 0)).await.unwrap();
        h.driver.set_delay(Some(StdDuration::from_millis(300)));

        let manager = h.manager.clone();
        let id = session.id.clone();
        let extend = tokio::spawn(async move { manager.extend(&id, 20, t(10, 25)).await });
        tokio::time::sleep(StdDuration::from_millis(50)).await;

        let stopped = h.manager.stop(&session.id, t(10, 26)).await.unwrap();
        assert_eq!(stopped.status, SessionStatus::Completed);

        assert!(matches!(
            extend.await.unwrap(),
            Err(SessionError::InvalidState { status: SessionStatus::Completed, .. })
        ));

        let stored = h.store.get_session(&session.id).unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Completed);
        assert_eq!(stored.expected_minutes, 30);

        // the late extension is followed by another stop
        let calls = h.driver.calls();
        let stops = calls
            .iter()
            .filter(|c| matches!(c, DriverCall::Stop { .. }))
            .count();
        assert_eq!(stops, 2);
        assert!(matches!(calls.last(), Some(DriverCall::Stop { .. })));
    }

    #[tokio::test]
    async fn extension_cannot_outrun_the_clock() {
        let h = Harness::new(vec![child("alice", 60)]);
        let m = &h.manager;

        let session = m.start(&tv(), &ids(&["alice"]), 10, t(10, 0)).await.unwrap();
        let extended = m.extend(&session.id, 50, t(10, 0)).await.unwrap();
        assert_eq!(extended.expected_minutes, 60);

        // nothing has been used yet, but the whole day is committed
        let again = m.extend(&session.id, 1, t(10, 0)).await;
        assert!(matches!(
            again,
            Err(SessionError::InsufficientTime { remaining: 0, requested: 1, .. })
        ));

        let later = m.extend(&session.id, 1, t(10, 30)).await;
        assert!(matches!(later, Err(SessionError::InsufficientTime { .. })));
    }

    #[tokio::test]
    async fn extend_rejects_non_active_sessions() {
        let h = Harness::new(vec![child("alice", 60)]);
        let m = &h.manager;
        let session = m.start(&tv(), &ids(&["alice"]), 30, t(10, 0)).await.unwrap();

        let mut paused = h.store.get_session(&session.id).unwrap().unwrap();
        paused.status = SessionStatus::Paused;
        paused.last_break_at = Some(t(10, 5));
        paused.break_ends_at = Some(t(10, 15));
        h.store.update_session(&mut paused).unwrap();

        assert!(matches!(
            m.extend(&session.id, 5, t(10, 6)).await,
            Err(SessionError::InvalidState { status: SessionStatus::Paused, .. })
        ));
        assert!(matches!(
            m.extend(&SessionId::new(), 5, t(10, 6)).await,
            Err(SessionError::SessionNotFound(_))
        ));
        assert!(matches!(
            m.extend(&session.id, 0, t(10, 6)).await,
            Err(SessionError::InvalidDuration)
        ));
    }

    #[tokio::test]
    async fn stop_rejects_terminal_sessions() {
        let h = Harness::new(vec![child("alice", 60)]);
        let m = &h.manager;
        let session = m.start(&tv(), &ids(&["alice"]), 30, t(10, 0)).await.unwrap();

        m.stop(&session.id, t(10, 10)).await.unwrap();
        assert!(matches!(
            m.stop(&session.id, t(10, 11)).await,
            Err(SessionError::InvalidState { status: SessionStatus::Completed, .. })
        ));

        let day = m.calculator().day_of(t(10, 0));
        let usage = h.store.get_usage(&ChildId::new("alice"), day).unwrap();
        assert_eq!(usage.minutes_used, 10);
        assert_eq!(usage.sessions_completed, 1);
    }

    #[tokio::test]
    async fn stop_survives_driver_failure() {
        let h = Harness::new(vec![child("alice", 60)]);
        let m = &h.manager;
        let session = m.start(&tv(), &ids(&["alice"]), 30, t(10, 0)).await.unwrap();

        h.driver.set_fail_stop(true);
        let stopped = m.stop(&session.id, t(10, 20)).await.unwrap();

        assert_eq!(stopped.status, SessionStatus::Completed);
        let day = m.calculator().day_of(t(10, 0));
        assert_eq!(
            h.store.get_usage(&ChildId::new("alice"), day).unwrap().minutes_used,
            20
        );
    }

    #[tokio::test]
    async fn stop_charges_no_more_than_commitment() {
        let h = Harness::new(vec![child("alice", 60)]);
        let m = &h.manager;
        let session = m.start(&tv(), &ids(&["alice"]), 30, t(10, 0)).await.unwrap();

        let stopped = m.stop(&session.id, t(12, 0)).await.unwrap();
        assert_eq!(stopped.actual_minutes, Some(30));

        let day = m.calculator().day_of(t(10, 0));
        assert_eq!(
            h.store.get_usage(&ChildId::new("alice"), day).unwrap().minutes_used,
            30
        );
    }

    #[tokio::test]
    async fn late_joiner_pays_for_elapsed_time_once() {
        let h = Harness::new(vec![child("alice", 60), child("bob", 60)]);
        let m = &h.manager;
        let day = m.calculator().day_of(t(10, 0));
        let bob = ChildId::new("bob");

        let session = m.start(&tv(), &ids(&["alice"]), 30, t(10, 0)).await.unwrap();
        let joined = m
            .add_participants(&session.id, &ids(&["bob", "alice"]), t(10, 10))
            .await
            .unwrap();

        assert_eq!(joined.participants, ids(&["alice", "bob"]));
        assert_eq!(joined.prepaid_for(&bob), 10);

        let usage = h.store.get_usage(&bob, day).unwrap();
        assert_eq!(usage.minutes_used, 10);
        assert_eq!(usage.sessions_completed, 0);

        // live view does not double count the prepaid minutes
        let status = m.status(&bob, t(10, 20)).unwrap();
        assert_eq!(status.used_minutes, 20);

        m.stop(&session.id, t(10, 30)).await.unwrap();
        for name in ["alice", "bob"] {
            let usage = h.store.get_usage(&ChildId::new(name), day).unwrap();
            assert_eq!(usage.minutes_used, 30, "{} usage", name);
            assert_eq!(usage.sessions_completed, 1);
        }
    }

    #[tokio::test]
    async fn late_joiner_must_afford_elapsed_time() {
        let h = Harness::new(vec![child("alice", 60), child("bob", 5)]);
        let m = &h.manager;
        let session = m.start(&tv(), &ids(&["alice"]), 30, t(10, 0)).await.unwrap();

        let result = m.add_participants(&session.id, &ids(&["bob"]), t(10, 10)).await;
        assert!(matches!(
            result,
            Err(SessionError::InsufficientTime { remaining: 5, requested: 10, .. })
        ));

        let stored = h.store.get_session(&session.id).unwrap().unwrap();
        assert_eq!(stored.participants, ids(&["alice"]));
    }

    #[tokio::test]
    async fn bonus_raises_budget() {
        let h = Harness::new(vec![child("alice", 30)]);
        let m = &h.manager;
        let alice = ChildId::new("alice");

        assert!(m.start(&tv(), &ids(&["alice"]), 40, t(10, 0)).await.is_err());

        let allocation = m.grant_bonus(&alice, 15, t(10, 0)).unwrap();
        assert_eq!(allocation.total(), 45);

        m.start(&tv(), &ids(&["alice"]), 40, t(10, 1)).await.unwrap();
        assert_eq!(m.status(&alice, t(10, 1)).unwrap().limit_minutes, 45);
    }

    #[tokio::test]
    async fn history_lists_sessions_of_the_day() {
        let h = Harness::new(vec![child("alice", 120), child("bob", 120)]);
        let m = &h.manager;

        let first = m.start(&tv(), &ids(&["alice"]), 10, t(9, 0)).await.unwrap();
        m.stop(&first.id, t(9, 10)).await.unwrap();
        let second = m.start(&tv(), &ids(&["alice", "bob"]), 10, t(11, 0)).await.unwrap();
        m.start(&DeviceId::new("console"), &ids(&["bob"]), 10, t(12, 0))
            .await
            .unwrap();

        let day = m.calculator().day_of(t(9, 0));
        let history: Vec<_> = m
            .sessions_for_day(&ChildId::new("alice"), day)
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(history, vec![first.id, second.id]);

        let tomorrow = day + Duration::days(1);
        assert!(m.sessions_for_day(&ChildId::new("alice"), tomorrow).unwrap().is_empty());
    }
}
