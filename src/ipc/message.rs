use serde::Serialize;
use serde::de::DeserializeOwned;

/// A typed message that can cross the process boundary.
///
/// `KIND` routes the message to handlers; it must be unique per message type
/// within an application. `Reply` is what a request/reply handler answers
/// (use `()` for notifications).
///
/// ```rust
/// use serde::{Deserialize, Serialize};
/// use procvisor::Message;
///
/// #[derive(Serialize, Deserialize)]
/// struct Ping { n: u32 }
///
/// impl Message for Ping {
///     const KIND: &'static str = "ping";
///     type Reply = u32;
/// }
/// ```
pub trait Message: Serialize + DeserializeOwned + Send + 'static {
    /// Routing key.
    const KIND: &'static str;
    /// Reply produced by the responding handler.
    type Reply: Serialize + DeserializeOwned + Send + 'static;
}
