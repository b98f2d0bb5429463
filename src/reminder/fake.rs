//! In-memory alarm service and virtual clock for tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

use super::{AlarmScheduler, Clock, ReminderPayload, ScheduleError};

/// Shared, ordered record of calls. Other test doubles may append to the same
/// journal to assert cross-component ordering.
pub(crate) type Journal = Arc<Mutex<Vec<String>>>;

pub(crate) struct FakeClock {
    now: Mutex<DateTime<Utc>>,
}

impl FakeClock {
    pub(crate) fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub(crate) fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

pub(crate) struct FakeAlarmScheduler {
    clock: Arc<FakeClock>,
    journal: Journal,
    pending: Mutex<BTreeMap<i64, (DateTime<Utc>, ReminderPayload)>>,
    denied: AtomicBool,
}

impl FakeAlarmScheduler {
    pub(crate) fn new(clock: Arc<FakeClock>) -> Self {
        Self::with_journal(clock, Journal::default())
    }

    pub(crate) fn with_journal(clock: Arc<FakeClock>, journal: Journal) -> Self {
        Self {
            clock,
            journal,
            pending: Mutex::new(BTreeMap::new()),
            denied: AtomicBool::new(false),
        }
    }

    pub(crate) fn deny_permission(&self) {
        self.denied.store(true, Ordering::SeqCst);
    }

    pub(crate) fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }

    pub(crate) fn pending_ids(&self) -> Vec<i64> {
        self.pending.lock().unwrap().keys().copied().collect()
    }

    /// Remove and return every alarm whose fire time has been reached.
    pub(crate) fn fire_due(&self) -> Vec<ReminderPayload> {
        let now = self.clock.now();
        let mut pending = self.pending.lock().unwrap();
        let due: Vec<i64> = pending
            .iter()
            .filter(|(_, (fire_time, _))| *fire_time <= now)
            .map(|(id, _)| *id)
            .collect();
        due.into_iter()
            .filter_map(|id| pending.remove(&id).map(|(_, payload)| payload))
            .collect()
    }
}

impl AlarmScheduler for FakeAlarmScheduler {
    fn schedule_once(
        &self,
        id: i64,
        fire_time: DateTime<Utc>,
        payload: ReminderPayload,
    ) -> Result<(), ScheduleError> {
        if self.denied.load(Ordering::SeqCst) {
            return Err(ScheduleError::PermissionDenied);
        }
        self.journal
            .lock()
            .unwrap()
            .push(format!("schedule {} {}", id, fire_time));
        self.pending.lock().unwrap().insert(id, (fire_time, payload));
        Ok(())
    }

    fn cancel(&self, id: i64) {
        self.journal.lock().unwrap().push(format!("cancel {}", id));
        self.pending.lock().unwrap().remove(&id);
    }
}
