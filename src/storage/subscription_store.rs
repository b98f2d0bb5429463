use chrono::{DateTime, Utc};
use rusqlite::Result as SqliteResult;

use crate::calendar::{Event, Subscription};
use crate::storage::event_store::{insert_row, EventRow, SqliteStore, StoreError, EVENT_COLUMNS};

/// Subscriptions and the events materialized from their feeds.
pub trait SubscriptionStore: Send + Sync {
    fn list_subscriptions(&self) -> Result<Vec<Subscription>, StoreError>;
    fn insert_subscription(&self, name: &str, source: &str) -> Result<Subscription, StoreError>;
    /// Returns `false` when no subscription has that id.
    fn set_subscription_enabled(&self, id: i64, enabled: bool) -> Result<bool, StoreError>;
    /// Removes the subscription together with its events.
    fn delete_subscription(&self, id: i64) -> Result<bool, StoreError>;
    /// Drops every event previously materialized for `id` and stores `events` in their place.
    fn replace_subscription_events(&self, id: i64, events: &[Event]) -> Result<usize, StoreError>;
    /// Events of enabled subscriptions starting in `[from, to)`.
    fn subscription_events(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Event>, StoreError>;
}

impl SubscriptionStore for SqliteStore {
    fn list_subscriptions(&self) -> Result<Vec<Subscription>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, name, source, enabled FROM subscriptions ORDER BY id")?;
        let subscriptions = stmt
            .query_map([], |row| {
                Ok(Subscription {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    source: row.get(2)?,
                    enabled: row.get(3)?,
                })
            })?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(subscriptions)
    }

    fn insert_subscription(&self, name: &str, source: &str) -> Result<Subscription, StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO subscriptions (name, source, enabled) VALUES (?1, ?2, 1)",
            rusqlite::params![name, source],
        )?;
        Ok(Subscription {
            id: conn.last_insert_rowid(),
            name: name.to_string(),
            source: source.to_string(),
            enabled: true,
        })
    }

    fn set_subscription_enabled(&self, id: i64, enabled: bool) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE subscriptions SET enabled = ?1 WHERE id = ?2",
            rusqlite::params![enabled, id],
        )?;
        Ok(changed > 0)
    }

    fn delete_subscription(&self, id: i64) -> Result<bool, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM events WHERE subscription_id = ?1", [id])?;
        let removed = tx.execute("DELETE FROM subscriptions WHERE id = ?1", [id])?;
        tx.commit()?;
        Ok(removed > 0)
    }

    fn replace_subscription_events(&self, id: i64, events: &[Event]) -> Result<usize, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM events WHERE subscription_id = ?1", [id])?;
        for event in events {
            let mut owned = event.clone();
            owned.subscription_id = Some(id);
            insert_row(&tx, &owned)?;
        }
        tx.commit()?;
        Ok(events.len())
    }

    fn subscription_events(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Event>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM events
             WHERE subscription_id IN (SELECT id FROM subscriptions WHERE enabled = 1)
               AND start_time >= ?1 AND start_time < ?2
             ORDER BY start_time ASC"
        ))?;
        let rows = stmt
            .query_map(
                rusqlite::params![from.timestamp_millis(), to.timestamp_millis()],
                EventRow::from_row,
            )?
            .collect::<SqliteResult<Vec<_>>>()?;
        rows.into_iter().map(EventRow::into_event).collect()
    }
}
