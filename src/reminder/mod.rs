pub mod alarm;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod fake;

pub use alarm::{LogNotifier, NotificationSink, TokioAlarmScheduler};
pub use scheduler::{
    AlarmScheduler, Clock, ReconcileReport, ReminderOutcome, ReminderPayload, ReminderScheduler, ScheduleError,
    SystemClock,
};
