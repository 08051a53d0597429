//! Wire frames.
//!
//! Each frame is one JSON document inside a `u32` big-endian length prefix
//! (`tokio_util::codec::LengthDelimitedCodec`).
//!
//! ```text
//! {"type":"request","id":3,"kind":"handshake","payload":{...}}
//! {"type":"reply","id":3,"outcome":{"status":"ok","body":{...}}}
//! {"type":"publish","kind":"lifecycle","payload":{"event":"process_blocked","pid":42}}
//! {"type":"hosts","kinds":["echo","handshake"]}
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::IpcError;

/// One unit on an IPC link.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Request expecting exactly one [`Frame::Reply`] with the same `id`.
    Request {
        id: u64,
        kind: String,
        payload: Value,
    },
    /// Terminal outcome of a request.
    Reply { id: u64, outcome: Outcome },
    /// Fire-and-forget notification fanned out to every subscriber of `kind`.
    Publish { kind: String, payload: Value },
    /// Every kind the sender has request handlers for; replaces the previous set.
    Hosts { kinds: Vec<String> },
}

/// Result carried by a [`Frame::Reply`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "body", rename_all = "snake_case")]
pub enum Outcome {
    Ok(Value),
    Err(String),
}

impl Frame {
    /// Encodes the frame body (without the length prefix).
    pub fn encode(&self) -> Result<Bytes, IpcError> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| IpcError::Serialize {
                kind: self.label().to_string(),
                reason: e.to_string(),
            })
    }

    /// Decodes a frame body.
    pub fn decode(body: &[u8]) -> Result<Self, IpcError> {
        serde_json::from_slice(body).map_err(|e| IpcError::Deserialize {
            kind: "frame".to_string(),
            reason: e.to_string(),
        })
    }

    fn label(&self) -> &str {
        match self {
            Frame::Request { kind, .. } | Frame::Publish { kind, .. } => kind,
            Frame::Reply { .. } => "reply",
            Frame::Hosts { .. } => "hosts",
        }
    }
}
