//! # Observability subscribers.
//!
//! [`Subscribe`] is the extension point for reacting to supervisor [`Event`](crate::Event)s
//! (logging, metrics, alerting). [`SubscriberSet`] fans events out to every
//! subscriber without ever blocking the supervisor loop.
//!
//! ```text
//! event loop / scheduler ── publish ──► Bus ──► listener ──► SubscriberSet
//!                                                              ├──► [queue] ──► LogWriter
//!                                                              └──► [queue] ──► custom ...
//! ```

mod embedded;
mod subscriber;
mod subscriber_set;

#[cfg(feature = "logging")]
pub use embedded::LogWriter;
pub use subscriber::Subscribe;
pub use subscriber_set::SubscriberSet;
