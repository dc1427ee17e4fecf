//! Domain layer for feedsync.
//!
//! Holds the stream data model and the traits of the collaborators the
//! session engine talks to: the content store, the request manager and the
//! scheduler.

pub mod clock;
pub mod config;
pub mod error;
pub mod request;
pub mod scheduler;
pub mod store;
pub mod stream;

// Re-export common types
pub use clock::{Clock, FakeClock, SystemClock};
pub use config::FeedConfig;
pub use error::FeedError;
