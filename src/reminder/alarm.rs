use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use super::{AlarmScheduler, ReminderPayload, ScheduleError};

/// Receives a reminder once its alarm fires.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, payload: &ReminderPayload);
}

pub struct LogNotifier;

impl NotificationSink for LogNotifier {
    fn notify(&self, payload: &ReminderPayload) {
        tracing::info!("Reminder fired for event {}: {}", payload.event_id, payload.title);
        match payload.description.as_deref() {
            Some(description) => println!("Reminder: {} ({})", payload.title, description),
            None => println!("Reminder: {}", payload.title),
        }
    }
}

/// Alarms as sleeping tokio tasks. They live only as long as the process.
pub struct TokioAlarmScheduler {
    exact_alarms: bool,
    sink: Arc<dyn NotificationSink>,
    tasks: Mutex<HashMap<i64, JoinHandle<()>>>,
}

impl TokioAlarmScheduler {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            exact_alarms: true,
            sink,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Without exact alarms every registration is refused.
    pub fn with_exact_alarms(mut self, allowed: bool) -> Self {
        self.exact_alarms = allowed;
        self
    }

    pub fn pending(&self) -> usize {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|task| !task.is_finished())
            .count()
    }
}

impl AlarmScheduler for TokioAlarmScheduler {
    fn schedule_once(
        &self,
        id: i64,
        fire_time: DateTime<Utc>,
        payload: ReminderPayload,
    ) -> Result<(), ScheduleError> {
        if !self.exact_alarms {
            return Err(ScheduleError::PermissionDenied);
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ScheduleError::Unavailable(e.to_string()))?;

        let delay = (fire_time - Utc::now()).to_std().unwrap_or_default();
        let sink = self.sink.clone();
        let task = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            sink.notify(&payload);
        });

        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|_, task| !task.is_finished());
        if let Some(previous) = tasks.insert(id, task) {
            previous.abort();
        }
        Ok(())
    }

    fn cancel(&self, id: i64) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = tasks.remove(&id) {
            task.abort();
        }
    }
}

impl Drop for TokioAlarmScheduler {
    fn drop(&mut self) {
        let tasks = self.tasks.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, task) in tasks.drain() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tokio::sync::mpsc;

    struct ChannelSink(mpsc::UnboundedSender<ReminderPayload>);

    impl NotificationSink for ChannelSink {
        fn notify(&self, payload: &ReminderPayload) {
            self.0.send(payload.clone()).unwrap();
        }
    }

    fn payload(event_id: i64) -> ReminderPayload {
        ReminderPayload {
            event_id,
            title: format!("Event {}", event_id),
            description: None,
        }
    }

    fn channel_scheduler() -> (TokioAlarmScheduler, mpsc::UnboundedReceiver<ReminderPayload>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (TokioAlarmScheduler::new(Arc::new(ChannelSink(tx))), rx)
    }

    #[tokio::test]
    async fn due_alarm_notifies_sink() {
        let (scheduler, mut rx) = channel_scheduler();

        scheduler
            .schedule_once(1, Utc::now() - Duration::seconds(1), payload(1))
            .unwrap();

        let fired = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fired.event_id, 1);
    }

    #[tokio::test]
    async fn cancelled_alarm_never_fires() {
        let (scheduler, mut rx) = channel_scheduler();
        scheduler
            .schedule_once(1, Utc::now() + Duration::milliseconds(50), payload(1))
            .unwrap();

        scheduler.cancel(1);

        let waited = tokio::time::timeout(std::time::Duration::from_millis(200), rx.recv()).await;
        assert!(waited.is_err());
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test]
    async fn registering_same_id_replaces_alarm() {
        let (scheduler, _rx) = channel_scheduler();
        let later = Utc::now() + Duration::hours(1);

        scheduler.schedule_once(1, later, payload(1)).unwrap();
        scheduler.schedule_once(1, later, payload(1)).unwrap();
        scheduler.schedule_once(2, later, payload(2)).unwrap();

        assert_eq!(scheduler.pending(), 2);
    }

    #[tokio::test]
    async fn without_exact_alarms_permission_is_denied() {
        let (scheduler, _rx) = channel_scheduler();
        let scheduler = scheduler.with_exact_alarms(false);

        let result = scheduler.schedule_once(1, Utc::now(), payload(1));

        assert_eq!(result, Err(ScheduleError::PermissionDenied));
    }

    #[test]
    fn outside_a_runtime_alarms_are_unavailable() {
        let (scheduler, _rx) = channel_scheduler();

        let result = scheduler.schedule_once(1, Utc::now(), payload(1));

        assert!(matches!(result, Err(ScheduleError::Unavailable(_))));
    }
}
