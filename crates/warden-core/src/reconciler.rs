//! Periodic reconciliation sweep
//!
//! The only actor that starts and ends mandatory breaks or expires a
//! session. Each open session is read, decided, persisted and pushed to its
//! driver before the next one is looked at.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use warden_api::{Session, SessionEndReason, SessionStatus};
use warden_store::{AuditEventType, StoreError};

use crate::{CoreEvent, SessionError, SessionManager, SessionResult, SessionTiming};

pub struct Reconciler {
    manager: Arc<SessionManager>,
}

impl Reconciler {
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self { manager }
    }

    /// Run one sweep over every open session
    ///
    /// A failure on one session is logged and the sweep moves on.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Vec<CoreEvent> {
        let sessions = match self.manager.store().list_open_sessions() {
            Ok(sessions) => sessions,
            Err(e) => {
                error!(error = %e, "Failed to list open sessions");
                return Vec::new();
            }
        };

        let mut events = Vec::new();
        for session in sessions {
            let session_id = session.id.clone();
            match self.reconcile(session, now).await {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(SessionError::Store(StoreError::Conflict(msg))) => {
                    debug!(session_id = %session_id, reason = %msg, "Session changed during sweep, skipping");
                }
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "Failed to reconcile session");
                }
            }
        }

        if !events.is_empty() {
            debug!(count = events.len(), "Sweep produced events");
        }
        events
    }

    async fn reconcile(&self, mut session: Session, now: DateTime<Utc>) -> SessionResult<Option<CoreEvent>> {
        let manager = &self.manager;

        if let Some(ends) = session.break_ends_at {
            if now < ends {
                return Ok(None);
            }
            return self.end_break(session, ends, now).map(Some);
        }

        if let Some(event) = self.start_break_if_due(&mut session, now).await? {
            return Ok(Some(event));
        }

        let remaining = session.remaining_minutes(now);
        if remaining == 0 {
            let (_, event) = manager.finish(session, SessionEndReason::Expired, now).await?;
            return Ok(Some(event));
        }

        if remaining <= manager.warning_minutes() && session.warning_sent_at.is_none() {
            session.warning_sent_at = Some(now);
            manager.store().update_session(&mut session)?;

            match manager.driver_for(&session.device_id) {
                Ok(driver) => {
                    manager.send_warning(driver.as_ref(), &session, remaining).await;
                }
                Err(e) => warn!(session_id = %session.id, error = %e, "No driver to warn"),
            }

            manager.audit(
                now,
                AuditEventType::WarningIssued {
                    session_id: session.id.clone(),
                    minutes_remaining: remaining,
                },
            );
            info!(session_id = %session.id, minutes_remaining = remaining, "Warning issued");

            return Ok(Some(manager.publish(CoreEvent::WarningIssued {
                session_id: session.id.clone(),
                minutes_remaining: remaining,
            })));
        }

        Ok(None)
    }

    fn end_break(
        &self,
        mut session: Session,
        ends: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> SessionResult<CoreEvent> {
        let manager = &self.manager;
        let began = session.last_break_at.unwrap_or(ends);

        session.paused_seconds += (ends - began).num_seconds().max(0);
        session.last_break_at = Some(ends);
        session.break_ends_at = None;
        session.status = SessionStatus::Active;
        manager.store().update_session(&mut session)?;

        manager.audit(
            now,
            AuditEventType::BreakEnded {
                session_id: session.id.clone(),
            },
        );
        info!(session_id = %session.id, "Break ended");

        Ok(manager.publish(CoreEvent::BreakEnded {
            session_id: session.id,
        }))
    }

    /// Pause the whole session when the first participant's break rule is due
    async fn start_break_if_due(
        &self,
        session: &mut Session,
        now: DateTime<Utc>,
    ) -> SessionResult<Option<CoreEvent>> {
        let manager = &self.manager;
        let continuous = session.minutes_since_break(now);

        let mut due = None;
        for child_id in &session.participants {
            let child = match manager.store().get_child(child_id)? {
                Some(child) => child,
                None => {
                    warn!(session_id = %session.id, child_id = %child_id, "Participant not found");
                    continue;
                }
            };
            if let Some(rule) = child.break_rule
                && continuous >= rule.after_minutes
            {
                due = Some((child.id, rule));
                break;
            }
        }

        let Some((triggered_by, rule)) = due else {
            return Ok(None);
        };

        let until = now + Duration::minutes(rule.break_minutes as i64);
        session.last_break_at = Some(now);
        session.break_ends_at = Some(until);
        session.status = SessionStatus::Paused;
        manager.store().update_session(session)?;

        match manager.driver_for(&session.device_id) {
            Ok(driver) => {
                manager.send_warning(driver.as_ref(), session, 0).await;
            }
            Err(e) => warn!(session_id = %session.id, error = %e, "No driver to announce break"),
        }

        manager.audit(
            now,
            AuditEventType::BreakStarted {
                session_id: session.id.clone(),
                triggered_by: triggered_by.clone(),
                until,
            },
        );
        info!(
            session_id = %session.id,
            triggered_by = %triggered_by,
            break_minutes = rule.break_minutes,
            "Break started"
        );

        Ok(Some(manager.publish(CoreEvent::BreakStarted {
            session_id: session.id.clone(),
            triggered_by,
            until,
        })))
    }

    /// Sweep on every tick until `shutdown` flips to true
    ///
    /// Ticks go through a single-slot queue, so a sweep that outlasts the
    /// interval absorbs the pending tick instead of overlapping itself. The
    /// shutdown signal is only observed between sweeps.
    pub async fn run(self, interval: std::time::Duration, mut shutdown: watch::Receiver<bool>) {
        if *shutdown.borrow() {
            return;
        }

        let (tick_tx, mut tick_rx) = mpsc::channel::<()>(1);
        let ticker = tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                timer.tick().await;
                match tick_tx.try_send(()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(())) => debug!("Sweep still running, tick absorbed"),
                    Err(TrySendError::Closed(())) => break,
                }
            }
        });

        info!(interval_secs = interval.as_secs(), "Reconciler started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                Some(()) = tick_rx.recv() => {
                    self.sweep(warden_util::now()).await;
                }
            }
        }

        ticker.abort();
        info!("Reconciler stopped");
    }
}
