pub mod api;
pub mod auth;
pub mod ics;
pub mod repository;
pub mod subscriptions;

pub use api::{ApiError, BackendClient, DayHolidays, Holiday, HolidayList, LunarDate, ParsedEvent};
pub use auth::{AuthError, LoginFlow, LoginState};
pub use repository::{DayReload, EventRepository, RepositoryError};
pub use subscriptions::{FeedError, SubscriptionManager, SyncReport};
