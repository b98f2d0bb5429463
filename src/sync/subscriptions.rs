use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use thiserror::Error;

use crate::calendar::{Event, Subscription};
use crate::storage::event_store::StoreError;
use crate::storage::subscription_store::SubscriptionStore;
use crate::sync::api::{ApiError, FeedFetcher};
use crate::sync::ics::{parse_feed, IcsError};

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Feed request failed: {0}")]
    Api(#[from] ApiError),
    #[error("Feed parse failed: {0}")]
    Parse(#[from] IcsError),
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
    #[error("Unknown subscription: {0}")]
    UnknownSubscription(i64),
}

#[derive(Debug, Default, PartialEq)]
pub struct SyncReport {
    pub synced: Vec<(i64, usize)>,
    pub failed: Vec<(i64, String)>,
}

pub struct SubscriptionManager {
    store: Arc<dyn SubscriptionStore>,
    fetcher: Arc<dyn FeedFetcher>,
    offset: FixedOffset,
}

impl SubscriptionManager {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        fetcher: Arc<dyn FeedFetcher>,
        offset: FixedOffset,
    ) -> Self {
        Self {
            store,
            fetcher,
            offset,
        }
    }

    pub fn list(&self) -> Result<Vec<Subscription>, StoreError> {
        self.store.list_subscriptions()
    }

    pub fn add(&self, name: &str, source: &str) -> Result<Subscription, StoreError> {
        let subscription = self.store.insert_subscription(name, source)?;
        tracing::info!("Subscribed to {} ({})", subscription.name, subscription.source);
        Ok(subscription)
    }

    pub fn remove(&self, id: i64) -> Result<(), FeedError> {
        if !self.store.delete_subscription(id)? {
            return Err(FeedError::UnknownSubscription(id));
        }
        tracing::info!("Removed subscription {}", id);
        Ok(())
    }

    pub fn set_enabled(&self, id: i64, enabled: bool) -> Result<(), FeedError> {
        if !self.store.set_subscription_enabled(id, enabled)? {
            return Err(FeedError::UnknownSubscription(id));
        }
        Ok(())
    }

    /// Fetch the feed and replace every event previously materialized for it.
    pub async fn sync(&self, id: i64) -> Result<usize, FeedError> {
        let subscription = self
            .store
            .list_subscriptions()?
            .into_iter()
            .find(|s| s.id == id)
            .ok_or(FeedError::UnknownSubscription(id))?;

        let payload = self.fetcher.fetch_feed(&subscription.feed_location()).await?;
        let events = parse_feed(&payload.ics, self.offset)?;

        if let Some(expected) = payload.events_count
            && expected != events.len()
        {
            tracing::warn!(
                "Feed {} announced {} events but {} were parsed",
                subscription.name,
                expected,
                events.len()
            );
        }

        let stored = self.store.replace_subscription_events(id, &events)?;
        tracing::info!("Synced {} events from {}", stored, subscription.name);
        Ok(stored)
    }

    /// Sync every enabled subscription. A failing feed does not stop the others.
    pub async fn sync_all(&self) -> Result<SyncReport, StoreError> {
        let mut report = SyncReport::default();

        for subscription in self.store.list_subscriptions()? {
            if !subscription.enabled {
                continue;
            }
            match self.sync(subscription.id).await {
                Ok(count) => report.synced.push((subscription.id, count)),
                Err(e) => {
                    tracing::warn!("Failed to sync {}: {}", subscription.name, e);
                    report.failed.push((subscription.id, e.to_string()));
                }
            }
        }

        Ok(report)
    }

    pub fn visible_events(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Event>, StoreError> {
        self.store.subscription_events(from, to)
    }
}
