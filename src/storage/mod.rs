pub mod config;
pub mod event_store;
pub mod session;
pub mod subscription_store;

pub use config::Config;
pub use event_store::{EventStore, SqliteStore, StoreError};
pub use session::{Session, SessionStore, UserProfile};
pub use subscription_store::SubscriptionStore;
