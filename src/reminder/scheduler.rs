use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::calendar::Event;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderPayload {
    pub event_id: i64,
    pub title: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("Exact alarm permission denied")]
    PermissionDenied,
    #[error("Alarm service unavailable: {0}")]
    Unavailable(String),
}

/// One-shot alarms keyed by event id. Registering an id again replaces the
/// previous alarm; cancelling an unknown id does nothing.
pub trait AlarmScheduler: Send + Sync {
    fn schedule_once(
        &self,
        id: i64,
        fire_time: DateTime<Utc>,
        payload: ReminderPayload,
    ) -> Result<(), ScheduleError>;

    fn cancel(&self, id: i64);
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReminderOutcome {
    /// No reminder minutes, or the event has no id to key the alarm by.
    NotRequested,
    /// The fire time is already in the past; nothing was registered.
    Elapsed { fire_time: DateTime<Utc> },
    Scheduled { fire_time: DateTime<Utc> },
    /// The alarm could not be registered. The event itself was saved.
    Degraded { reason: String },
}

/// Counts from one [`ReminderScheduler::reconcile`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub scheduled: usize,
    pub cancelled: usize,
    pub unchanged: usize,
    pub failed: usize,
}

type Armed = (DateTime<Utc>, ReminderPayload);

pub struct ReminderScheduler {
    alarms: Arc<dyn AlarmScheduler>,
    clock: Arc<dyn Clock>,
    armed: Mutex<HashMap<i64, Armed>>,
}

impl ReminderScheduler {
    pub fn new(alarms: Arc<dyn AlarmScheduler>, clock: Arc<dyn Clock>) -> Self {
        Self {
            alarms,
            clock,
            armed: Mutex::new(HashMap::new()),
        }
    }

    fn armed(&self) -> MutexGuard<'_, HashMap<i64, Armed>> {
        self.armed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fire time and payload for an event that still wants an alarm.
    fn wanted(&self, event: &Event, now: DateTime<Utc>) -> Option<(i64, Armed)> {
        let fire_time = event.reminder_fire_time()?;
        let event_id = event.id?;
        if event.is_read_only() || fire_time < now {
            return None;
        }
        let payload = ReminderPayload {
            event_id,
            title: event.title.clone(),
            description: event.description.clone(),
        };
        Some((event_id, (fire_time, payload)))
    }

    fn arm(
        &self,
        event_id: i64,
        fire_time: DateTime<Utc>,
        payload: ReminderPayload,
    ) -> Result<(), ScheduleError> {
        match self.alarms.schedule_once(event_id, fire_time, payload.clone()) {
            Ok(()) => {
                tracing::info!("Reminder for event {} scheduled at {}", event_id, fire_time);
                self.armed().insert(event_id, (fire_time, payload));
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Could not schedule reminder for event {}: {}", event_id, e);
                self.armed().remove(&event_id);
                Err(e)
            }
        }
    }

    pub fn set_reminder(&self, event: &Event) -> ReminderOutcome {
        let Some(fire_time) = event.reminder_fire_time() else {
            return ReminderOutcome::NotRequested;
        };
        let Some(event_id) = event.id else {
            tracing::debug!("Not scheduling reminder for unsaved event {}", event.title);
            return ReminderOutcome::NotRequested;
        };

        let now = self.clock.now();
        if fire_time < now {
            tracing::debug!("Reminder for event {} at {} has already passed", event_id, fire_time);
            return ReminderOutcome::Elapsed { fire_time };
        }

        let payload = ReminderPayload {
            event_id,
            title: event.title.clone(),
            description: event.description.clone(),
        };

        match self.arm(event_id, fire_time, payload) {
            Ok(()) => ReminderOutcome::Scheduled { fire_time },
            Err(e) => ReminderOutcome::Degraded {
                reason: e.to_string(),
            },
        }
    }

    pub fn cancel_reminder(&self, event_id: i64) {
        tracing::debug!("Cancelling reminder for event {}", event_id);
        self.armed().remove(&event_id);
        self.alarms.cancel(event_id);
    }

    /// Bring the armed alarms in line with `events`, the full current list
    /// of user-owned events. Alarms whose event is gone, moved or edited are
    /// cancelled; missing ones are registered; identical ones are left alone.
    pub fn reconcile(&self, events: &[Event]) -> ReconcileReport {
        let now = self.clock.now();
        let wanted: HashMap<i64, Armed> = events
            .iter()
            .filter_map(|event| self.wanted(event, now))
            .collect();
        let current = self.armed().clone();
        let mut report = ReconcileReport::default();

        for (event_id, armed) in &current {
            if wanted.get(event_id) == Some(armed) {
                continue;
            }
            if armed.0 < now && !wanted.contains_key(event_id) {
                // Already fired.
                self.armed().remove(event_id);
                continue;
            }
            self.cancel_reminder(*event_id);
            report.cancelled += 1;
        }

        for (event_id, (fire_time, payload)) in wanted {
            if current.get(&event_id) == Some(&(fire_time, payload.clone())) {
                report.unchanged += 1;
                continue;
            }
            match self.arm(event_id, fire_time, payload) {
                Ok(()) => report.scheduled += 1,
                Err(_) => report.failed += 1,
            }
        }

        if report.scheduled + report.cancelled + report.failed > 0 {
            tracing::info!(
                "Reminders reconciled: {} scheduled, {} cancelled, {} unchanged, {} failed",
                report.scheduled,
                report.cancelled,
                report.unchanged,
                report.failed
            );
        }
        report
    }

    pub fn reschedule(&self, event: &Event) -> ReminderOutcome {
        if let Some(event_id) = event.id {
            self.cancel_reminder(event_id);
        }
        self.set_reminder(event)
    }
}
