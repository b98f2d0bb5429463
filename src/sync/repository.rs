use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use thiserror::Error;

use crate::calendar::{day_bounds, Event, ValidationError};
use crate::storage::event_store::{EventStore, StoreError};
use crate::storage::session::Session;
use crate::sync::api::{ApiError, RemoteEventService};
use crate::sync::subscriptions::SubscriptionManager;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Invalid event: {0}")]
    Validation(#[from] ValidationError),
    #[error("Subscribed events are read-only")]
    ReadOnly,
    #[error("Local storage failure: {0}")]
    Storage(#[from] StoreError),
    #[error("Cloud request failed: {0}")]
    Remote(#[from] ApiError),
}

/// Result of a mutation: the saved event and a fresh read of its day.
#[derive(Debug, Clone, PartialEq)]
pub struct DayReload {
    pub event: Event,
    pub date: NaiveDate,
    pub events: Vec<Event>,
}

enum Backend<'a> {
    Cloud(&'a str),
    Local,
}

/// Routes user-owned events to the local store or the cloud, and overlays
/// subscribed events on every read.
pub struct EventRepository {
    store: Arc<dyn EventStore>,
    remote: Arc<dyn RemoteEventService>,
    subscriptions: Arc<SubscriptionManager>,
    offset: FixedOffset,
}

impl EventRepository {
    pub fn new(
        store: Arc<dyn EventStore>,
        remote: Arc<dyn RemoteEventService>,
        subscriptions: Arc<SubscriptionManager>,
        offset: FixedOffset,
    ) -> Self {
        Self {
            store,
            remote,
            subscriptions,
            offset,
        }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    fn backend<'a>(&self, session: &'a Session) -> Backend<'a> {
        match session.bearer() {
            Some(token) if session.uses_cloud() => Backend::Cloud(token),
            _ => Backend::Local,
        }
    }

    async fn user_events(&self, session: &Session) -> Result<Vec<Event>, RepositoryError> {
        match self.backend(session) {
            Backend::Cloud(token) => match self.remote.list_events(token).await {
                Ok(events) => Ok(events),
                Err(e) => {
                    tracing::warn!("Cloud events unavailable, showing none: {}", e);
                    Ok(Vec::new())
                }
            },
            Backend::Local => Ok(self.store.list()?),
        }
    }

    fn overlay(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Event>, RepositoryError> {
        let mut events = self.subscriptions.visible_events(from, to)?;
        events.retain(Event::is_read_only);
        Ok(events)
    }

    pub async fn get_all_events(&self, session: &Session) -> Result<Vec<Event>, RepositoryError> {
        let mut events = self.user_events(session).await?;
        events.extend(self.overlay(DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MAX_UTC)?);
        Ok(events)
    }

    /// User-owned events with cloud failures surfaced instead of read as empty.
    pub async fn owned_events(&self, session: &Session) -> Result<Vec<Event>, RepositoryError> {
        let mut events = match self.backend(session) {
            Backend::Cloud(token) => self.remote.list_events(token).await?,
            Backend::Local => self.store.list()?,
        };
        events.retain(|event| !event.is_read_only());
        Ok(events)
    }

    pub async fn get_events_for_date(
        &self,
        session: &Session,
        date: NaiveDate,
    ) -> Result<Vec<Event>, RepositoryError> {
        let mut events = self.user_events(session).await?;
        events.retain(|event| !event.is_read_only() && event.occurs_on(date, self.offset));
        events.sort_by_key(|event| event.start);

        let (from, to) = day_bounds(date, self.offset);
        events.extend(self.overlay(from, to)?);
        Ok(events)
    }

    pub async fn create_event(
        &self,
        session: &Session,
        event: &Event,
    ) -> Result<DayReload, RepositoryError> {
        event.validate()?;
        reject_read_only(event)?;

        let saved = match self.backend(session) {
            Backend::Cloud(token) => self.remote.create_event(token, event).await?,
            Backend::Local => self.store.insert(event)?,
        };
        tracing::info!("Created event {:?}: {}", saved.id, saved.title);

        self.reload(session, saved).await
    }

    pub async fn update_event(
        &self,
        session: &Session,
        event: &Event,
    ) -> Result<DayReload, RepositoryError> {
        event.validate()?;
        let id = event.require_id()?;
        reject_read_only(event)?;

        match self.backend(session) {
            Backend::Cloud(token) => self.remote.update_event(token, event).await?,
            Backend::Local => self.store.update(event)?,
        }
        tracing::info!("Updated event {}", id);

        self.reload(session, event.clone()).await
    }

    pub async fn delete_event(
        &self,
        session: &Session,
        event: &Event,
    ) -> Result<DayReload, RepositoryError> {
        let id = event.require_id()?;
        reject_read_only(event)?;

        match self.backend(session) {
            Backend::Cloud(token) => self.remote.delete_event(token, id).await?,
            Backend::Local => self.store.delete(id)?,
        }
        tracing::info!("Deleted event {}", id);

        self.reload(session, event.clone()).await
    }

    async fn reload(&self, session: &Session, event: Event) -> Result<DayReload, RepositoryError> {
        let date = event.start.with_timezone(&self.offset).date_naive();
        let events = self.get_events_for_date(session, date).await?;
        Ok(DayReload { event, date, events })
    }
}

fn reject_read_only(event: &Event) -> Result<(), RepositoryError> {
    if event.is_read_only() {
        return Err(RepositoryError::ReadOnly);
    }
    Ok(())
}
