use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Event title must not be empty")]
    EmptyTitle,
    #[error("Event has no identifier")]
    MissingId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Assigned by whichever store owns the event; `None` until saved.
    pub id: Option<i64>,
    pub title: String,
    pub description: Option<String>,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    /// Minutes before `start` to notify. Zero disables the reminder.
    pub reminder_minutes: u32,
    pub location: Option<Location>,
    /// Set on events materialized from a subscribed feed. Such events are read-only.
    pub subscription_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl Event {
    pub fn new(title: impl Into<String>, start: DateTime<Utc>) -> Self {
        Self {
            id: None,
            title: title.into(),
            description: None,
            start,
            end: None,
            reminder_minutes: 0,
            location: None,
            subscription_id: None,
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_end(mut self, end: DateTime<Utc>) -> Self {
        self.end = Some(end);
        self
    }

    pub fn with_reminder(mut self, minutes: u32) -> Self {
        self.reminder_minutes = minutes;
        self
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_subscription(mut self, subscription_id: i64) -> Self {
        self.subscription_id = Some(subscription_id);
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::EmptyTitle);
        }
        Ok(())
    }

    pub fn require_id(&self) -> Result<i64, ValidationError> {
        self.id.ok_or(ValidationError::MissingId)
    }

    pub fn is_read_only(&self) -> bool {
        self.subscription_id.is_some()
    }

    pub fn reminder_fire_time(&self) -> Option<DateTime<Utc>> {
        if self.reminder_minutes == 0 {
            return None;
        }
        Some(self.start - Duration::minutes(i64::from(self.reminder_minutes)))
    }

    pub fn occurs_on(&self, date: NaiveDate, offset: FixedOffset) -> bool {
        self.start.with_timezone(&offset).date_naive() == date
    }

    pub fn starts_within(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> bool {
        self.start >= from && self.start < to
    }
}

/// UTC instants bounding `date` as seen in `offset`, half-open.
pub fn day_bounds(date: NaiveDate, offset: FixedOffset) -> (DateTime<Utc>, DateTime<Utc>) {
    let from = date.and_time(NaiveTime::MIN).and_utc()
        - Duration::seconds(i64::from(offset.local_minus_utc()));
    (from, from + Duration::days(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn new_event_is_user_owned_without_reminder() {
        let event = Event::new("Standup", at(2025, 11, 10, 9, 0));

        assert!(!event.is_read_only());
        assert_eq!(event.reminder_fire_time(), None);
    }

    #[test]
    fn empty_title_fails_validation() {
        let event = Event::new("   ", at(2025, 11, 10, 9, 0));

        assert_eq!(event.validate(), Err(ValidationError::EmptyTitle));
    }

    #[test]
    fn reminder_fires_offset_minutes_before_start() {
        let event = Event::new("Standup", at(2025, 11, 10, 9, 0)).with_reminder(15);

        assert_eq!(event.reminder_fire_time(), Some(at(2025, 11, 10, 8, 45)));
    }

    #[test]
    fn subscription_events_are_read_only() {
        let event = Event::new("National Day", at(2025, 10, 1, 0, 0)).with_subscription(3);

        assert!(event.is_read_only());
    }

    #[test]
    fn occurs_on_uses_the_given_offset() {
        let event = Event::new("Late call", at(2025, 11, 10, 20, 0));
        let beijing = FixedOffset::east_opt(8 * 3600).unwrap();

        assert!(event.occurs_on(date(2025, 11, 10), FixedOffset::east_opt(0).unwrap()));
        assert!(event.occurs_on(date(2025, 11, 11), beijing));
    }

    #[test]
    fn day_bounds_shift_by_offset() {
        let beijing = FixedOffset::east_opt(8 * 3600).unwrap();

        let (from, to) = day_bounds(date(2025, 11, 10), beijing);

        assert_eq!(from, at(2025, 11, 9, 16, 0));
        assert_eq!(to, at(2025, 11, 10, 16, 0));
    }

    #[test]
    fn starts_within_is_half_open() {
        let (from, to) = (at(2025, 11, 10, 0, 0), at(2025, 11, 11, 0, 0));

        assert!(Event::new("a", from).starts_within(from, to));
        assert!(!Event::new("b", to).starts_within(from, to));
    }
}
