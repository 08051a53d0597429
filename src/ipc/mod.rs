//! # Cross-process message bus.
//!
//! [`MessageBus`] carries typed [`Message`]s between the supervisor and its
//! workers over byte-stream pipes, with request/reply ([`MessageBus::dispatch`])
//! and publish/subscribe ([`MessageBus::publish`]) semantics.
//!
//! ```text
//!  worker process                               supervisor process
//! ┌───────────────────────┐   stdout (frames)   ┌──────────────────────────────┐
//! │ WorkerClient          │ ──────────────────► │ reader task ──► handlers     │
//! │  └─ MessageBus        │                     │      (per peer)     │        │
//! │     upstream = parent │ ◄────────────────── │ writer task ◄── replies      │
//! └───────────────────────┘   stdin (frames)    └──────────────────────────────┘
//! ```
//!
//! ## Rules
//! - Each dispatch resolves its [`Pending`] exactly once: a reply or an [`IpcError`](crate::IpcError).
//! - `dispatch` needs exactly one handler: locally, or (with none locally) on the upstream peer.
//! - Frames sent over one link arrive in send order; nothing is ordered across links.
//! - A lost peer rejects all of its pending results with `PeerLost`; [`MessageBus::close`]
//!   rejects everything with `Closed`.

mod bus;
mod frame;
mod lifecycle;
mod message;
mod pending;

pub(crate) use bus::DEFAULT_MAX_FRAME_LENGTH;

pub use bus::{MessageBus, PeerId, Subscription};
pub use frame::{Frame, Outcome};
pub use lifecycle::{Handshake, HandshakeAck, LifecycleEvent};
pub use message::Message;
pub use pending::Pending;
