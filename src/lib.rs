pub mod calendar;
pub mod reminder;
pub mod service;
pub mod storage;
pub mod sync;

pub use calendar::{Event, Location, Subscription};
pub use service::{CalendarService, ServiceOutcome};
