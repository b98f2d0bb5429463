use std::sync::Arc;

use chrono::NaiveDate;

use crate::calendar::Event;
use crate::reminder::{ReconcileReport, ReminderOutcome, ReminderScheduler};
use crate::storage::session::Session;
use crate::sync::repository::{DayReload, EventRepository, RepositoryError};

/// What a mutation did to the calendar and to its reminder.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceOutcome {
    pub reload: DayReload,
    pub reminder: ReminderOutcome,
}

/// Event CRUD with reminders kept in step.
pub struct CalendarService {
    repository: Arc<EventRepository>,
    reminders: ReminderScheduler,
}

impl CalendarService {
    pub fn new(repository: Arc<EventRepository>, reminders: ReminderScheduler) -> Self {
        Self {
            repository,
            reminders,
        }
    }

    pub fn repository(&self) -> &EventRepository {
        &self.repository
    }

    pub async fn create(
        &self,
        session: &Session,
        event: &Event,
    ) -> Result<ServiceOutcome, RepositoryError> {
        let reload = self.repository.create_event(session, event).await?;
        let reminder = self.reminders.set_reminder(&reload.event);
        Ok(ServiceOutcome { reload, reminder })
    }

    pub async fn update(
        &self,
        session: &Session,
        event: &Event,
    ) -> Result<ServiceOutcome, RepositoryError> {
        event.validate()?;
        let id = event.require_id()?;
        if event.is_read_only() {
            return Err(RepositoryError::ReadOnly);
        }

        // The old alarm goes first so a moved event never fires at its old time.
        self.reminders.cancel_reminder(id);
        let reload = self.repository.update_event(session, event).await?;
        let reminder = self.reminders.set_reminder(&reload.event);
        Ok(ServiceOutcome { reload, reminder })
    }

    pub async fn delete(
        &self,
        session: &Session,
        event: &Event,
    ) -> Result<ServiceOutcome, RepositoryError> {
        let id = event.require_id()?;
        if event.is_read_only() {
            return Err(RepositoryError::ReadOnly);
        }

        self.reminders.cancel_reminder(id);
        let reload = self.repository.delete_event(session, event).await?;
        Ok(ServiceOutcome {
            reload,
            reminder: ReminderOutcome::NotRequested,
        })
    }

    pub async fn events_for_date(
        &self,
        session: &Session,
        date: NaiveDate,
    ) -> Result<Vec<Event>, RepositoryError> {
        self.repository.get_events_for_date(session, date).await
    }

    pub async fn all_events(&self, session: &Session) -> Result<Vec<Event>, RepositoryError> {
        self.repository.get_all_events(session).await
    }

    /// Re-read the user's events and align this process's alarms with them.
    /// Events created, moved or deleted by other processes sharing the same
    /// database or account are picked up here. A failed read leaves the
    /// armed alarms as they are.
    pub async fn reconcile_reminders(
        &self,
        session: &Session,
    ) -> Result<ReconcileReport, RepositoryError> {
        let events = self.repository.owned_events(session).await?;
        Ok(self.reminders.reconcile(&events))
    }
}
