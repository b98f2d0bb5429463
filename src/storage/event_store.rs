use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Result as SqliteResult, Row};
use thiserror::Error;

use crate::calendar::{Event, Location};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),
    #[error("Failed to create database directory: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Event not found: {0}")]
    NotFound(i64),
    #[error("Event has not been saved yet")]
    MissingId,
    #[error("Corrupt row {0}: timestamp out of range")]
    CorruptRow(i64),
    #[error("Database connection lock poisoned")]
    Poisoned,
}

/// Local table of user-owned events.
#[cfg_attr(test, mockall::automock)]
pub trait EventStore: Send + Sync {
    fn list(&self) -> Result<Vec<Event>, StoreError>;
    fn insert(&self, event: &Event) -> Result<Event, StoreError>;
    fn update(&self, event: &Event) -> Result<(), StoreError>;
    fn delete(&self, id: i64) -> Result<(), StoreError>;
}

pub(crate) const EVENT_COLUMNS: &str = "id, title, description, start_time, end_time, \
     reminder_minutes, subscription_id, location_name, latitude, longitude";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let store = Self::new(Connection::open(path)?);
        store.initialize()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let store = Self::new(Connection::open_in_memory()?);
        store.initialize()?;
        Ok(store)
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        let conn = self.conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                description TEXT,
                start_time INTEGER NOT NULL,
                end_time INTEGER,
                reminder_minutes INTEGER NOT NULL DEFAULT 0,
                subscription_id INTEGER,
                location_name TEXT,
                latitude REAL,
                longitude REAL,
                created_at INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS subscriptions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                source TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_events_subscription ON events (subscription_id, start_time)",
            [],
        )?;

        Ok(())
    }

    pub fn table_exists(&self, table_name: &str) -> bool {
        let Ok(conn) = self.conn() else { return false };
        let result: SqliteResult<i32> = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
            [table_name],
            |row| row.get(0),
        );
        result.unwrap_or(0) > 0
    }
}

impl EventStore for SqliteStore {
    fn list(&self) -> Result<Vec<Event>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE subscription_id IS NULL ORDER BY start_time ASC"
        ))?;
        let rows = stmt
            .query_map([], EventRow::from_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        rows.into_iter().map(EventRow::into_event).collect()
    }

    fn insert(&self, event: &Event) -> Result<Event, StoreError> {
        let conn = self.conn()?;
        insert_row(&conn, event)?;
        let mut saved = event.clone();
        saved.id = Some(conn.last_insert_rowid());
        tracing::debug!("Inserted local event {:?}: {}", saved.id, saved.title);
        Ok(saved)
    }

    fn update(&self, event: &Event) -> Result<(), StoreError> {
        let id = event.id.ok_or(StoreError::MissingId)?;
        let (location_name, latitude, longitude) = location_columns(event);
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE events SET title = ?1, description = ?2, start_time = ?3, end_time = ?4,
                 reminder_minutes = ?5, location_name = ?6, latitude = ?7, longitude = ?8
             WHERE id = ?9 AND subscription_id IS NULL",
            rusqlite::params![
                &event.title,
                &event.description,
                event.start.timestamp_millis(),
                event.end.map(|end| end.timestamp_millis()),
                event.reminder_minutes,
                location_name,
                latitude,
                longitude,
                id,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    fn delete(&self, id: i64) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "DELETE FROM events WHERE id = ?1 AND subscription_id IS NULL",
            [id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }
}

pub(crate) fn insert_row(conn: &Connection, event: &Event) -> Result<(), StoreError> {
    let (location_name, latitude, longitude) = location_columns(event);
    conn.execute(
        "INSERT INTO events (title, description, start_time, end_time, reminder_minutes,
             subscription_id, location_name, latitude, longitude, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        rusqlite::params![
            &event.title,
            &event.description,
            event.start.timestamp_millis(),
            event.end.map(|end| end.timestamp_millis()),
            event.reminder_minutes,
            event.subscription_id,
            location_name,
            latitude,
            longitude,
            Utc::now().timestamp_millis(),
        ],
    )?;
    Ok(())
}

fn location_columns(event: &Event) -> (Option<&str>, Option<f64>, Option<f64>) {
    match &event.location {
        Some(location) => (
            Some(location.name.as_str()),
            Some(location.latitude),
            Some(location.longitude),
        ),
        None => (None, None, None),
    }
}

pub(crate) struct EventRow {
    id: i64,
    title: String,
    description: Option<String>,
    start_ms: i64,
    end_ms: Option<i64>,
    reminder_minutes: u32,
    subscription_id: Option<i64>,
    location_name: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
}

impl EventRow {
    pub(crate) fn from_row(row: &Row<'_>) -> SqliteResult<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            start_ms: row.get(3)?,
            end_ms: row.get(4)?,
            reminder_minutes: row.get(5)?,
            subscription_id: row.get(6)?,
            location_name: row.get(7)?,
            latitude: row.get(8)?,
            longitude: row.get(9)?,
        })
    }

    pub(crate) fn into_event(self) -> Result<Event, StoreError> {
        let start = DateTime::from_timestamp_millis(self.start_ms)
            .ok_or(StoreError::CorruptRow(self.id))?;
        let end = match self.end_ms {
            Some(ms) => Some(DateTime::from_timestamp_millis(ms).ok_or(StoreError::CorruptRow(self.id))?),
            None => None,
        };
        let location = self.location_name.map(|name| Location {
            name,
            latitude: self.latitude.unwrap_or_default(),
            longitude: self.longitude.unwrap_or_default(),
        });

        Ok(Event {
            id: Some(self.id),
            title: self.title,
            description: self.description,
            start,
            end,
            reminder_minutes: self.reminder_minutes,
            location,
            subscription_id: self.subscription_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn create_test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    fn create_test_event(title: &str, hour: u32) -> Event {
        Event::new(title, Utc.with_ymd_and_hms(2025, 11, 10, hour, 0, 0).unwrap())
    }

    #[test]
    fn creates_database_schema() {
        let store = create_test_store();

        assert!(store.table_exists("events"));
        assert!(store.table_exists("subscriptions"));
    }

    #[test]
    fn insert_assigns_an_identifier() {
        let store = create_test_store();

        let saved = store.insert(&create_test_event("Standup", 9)).unwrap();

        assert!(saved.id.is_some());
        assert_eq!(store.list().unwrap(), vec![saved]);
    }

    #[test]
    fn round_trips_all_columns() {
        let store = create_test_store();
        let event = create_test_event("Dinner", 18)
            .with_description("Booked for four")
            .with_end(Utc.with_ymd_and_hms(2025, 11, 10, 20, 0, 0).unwrap())
            .with_reminder(30)
            .with_location(Location {
                name: "Riverside".to_string(),
                latitude: 28.68,
                longitude: 115.89,
            });

        let saved = store.insert(&event).unwrap();

        assert_eq!(store.list().unwrap()[0], saved);
    }

    #[test]
    fn lists_in_start_order() {
        let store = create_test_store();
        store.insert(&create_test_event("Late", 17)).unwrap();
        store.insert(&create_test_event("Early", 8)).unwrap();

        let titles: Vec<String> = store.list().unwrap().into_iter().map(|e| e.title).collect();

        assert_eq!(titles, vec!["Early", "Late"]);
    }

    #[test]
    fn updates_existing_event() {
        let store = create_test_store();
        let mut saved = store.insert(&create_test_event("Original", 9)).unwrap();

        saved.title = "Updated".to_string();
        store.update(&saved).unwrap();

        assert_eq!(store.list().unwrap()[0].title, "Updated");
    }

    #[test]
    fn updating_missing_event_is_not_found() {
        let store = create_test_store();

        let result = store.update(&create_test_event("Ghost", 9).with_id(42));

        assert!(matches!(result, Err(StoreError::NotFound(42))));
    }

    #[test]
    fn deletes_event() {
        let store = create_test_store();
        let saved = store.insert(&create_test_event("To Delete", 9)).unwrap();

        store.delete(saved.id.unwrap()).unwrap();

        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn delete_of_missing_event_is_not_found() {
        let store = create_test_store();
        let saved = store.insert(&create_test_event("Once", 9)).unwrap();
        store.delete(saved.id.unwrap()).unwrap();

        assert!(matches!(store.delete(42), Err(StoreError::NotFound(42))));
        assert!(matches!(
            store.delete(saved.id.unwrap()),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn list_excludes_subscription_rows() {
        let store = create_test_store();
        {
            let conn = store.conn().unwrap();
            insert_row(&conn, &create_test_event("Holiday", 0).with_subscription(1)).unwrap();
        }
        store.insert(&create_test_event("Mine", 9)).unwrap();

        let events = store.list().unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].title, "Mine");
    }

    #[test]
    fn opens_database_file_and_creates_parent_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("ralendar.db");

        let store = SqliteStore::open(&path).unwrap();
        store.insert(&create_test_event("Persisted", 9)).unwrap();
        drop(store);

        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(reopened.list().unwrap().len(), 1);
    }
}
