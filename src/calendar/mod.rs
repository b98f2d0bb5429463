pub mod event;
pub mod subscription;

pub use event::{day_bounds, Event, Location, ValidationError};
pub use subscription::{FeedLocation, Subscription};
