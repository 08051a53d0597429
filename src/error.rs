//! Error types used by the procvisor runtime, its message bus and workers.
//!
//! - [`RuntimeError`] — errors raised by the supervisor itself (boot, shutdown, control).
//! - [`IpcError`] — failures of a single [`MessageBus`](crate::MessageBus) dispatch.
//! - [`SpawnError`] — a [`Launcher`](crate::Launcher) could not create a process.
//! - [`ServiceError`] — lookups against a [`ServiceContainer`](crate::ServiceContainer).
//!
//! Each type provides `as_label()` (stable snake_case label for logs/metrics).
//! Only configuration and fatal spawn errors escalate to process termination;
//! everything else is contained at its origin.

use std::time::Duration;
use thiserror::Error;

use crate::ipc::PeerId;

/// Exit code used when a process stops because of a configuration error (`EX_CONFIG`).
pub const EXIT_CONFIG: i32 = 78;

/// # Errors produced by the supervisor runtime.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// Missing or invalid worker/job/service definition detected at boot.
    #[error("configuration error: {reason}")]
    Configuration {
        /// What is wrong with the configuration.
        reason: String,
    },

    /// A worker could not be spawned after the configured number of attempts.
    #[error("cannot spawn worker {worker:?} after {attempts} attempt(s): {reason}")]
    Fatal {
        /// Worker name.
        worker: String,
        /// How many spawn attempts were made.
        attempts: u32,
        /// Last spawn failure.
        reason: String,
    },

    /// A worker was spawned but never became ready; the whole boot was rolled back.
    #[error("boot aborted: worker {worker:?} {reason}")]
    BootAborted {
        /// Worker name.
        worker: String,
        /// Why the worker did not become ready.
        reason: String,
    },

    /// Shutdown grace period was exceeded; remaining workers were killed.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}; forcing termination")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Workers that did not exit in time.
        stuck: Vec<String>,
    },

    /// A control request referenced a worker that is not registered.
    #[error("unknown worker {name:?}")]
    UnknownWorker {
        /// Requested worker name.
        name: String,
    },

    /// The supervisor is shutting down and no longer accepts control requests.
    #[error("supervisor is shutting down")]
    ShuttingDown,

    /// The supervisor event loop has exited.
    #[error("supervisor event loop is closed")]
    Closed,
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use procvisor::RuntimeError;
    /// use std::time::Duration;
    ///
    /// let err = RuntimeError::GraceExceeded { grace: Duration::from_secs(5), stuck: vec![] };
    /// assert_eq!(err.as_label(), "runtime_grace_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::Configuration { .. } => "runtime_configuration",
            RuntimeError::Fatal { .. } => "runtime_fatal_spawn",
            RuntimeError::BootAborted { .. } => "runtime_boot_aborted",
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
            RuntimeError::UnknownWorker { .. } => "runtime_unknown_worker",
            RuntimeError::ShuttingDown => "runtime_shutting_down",
            RuntimeError::Closed => "runtime_closed",
        }
    }

    /// Process exit code a supervisor binary should use for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            RuntimeError::Configuration { .. } => EXIT_CONFIG,
            _ => 1,
        }
    }

    pub(crate) fn configuration(reason: impl Into<String>) -> Self {
        RuntimeError::Configuration {
            reason: reason.into(),
        }
    }
}

/// # Errors produced by a single message bus dispatch.
///
/// An `IpcError` rejects exactly one pending result and never crashes the supervisor.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum IpcError {
    /// The message or its reply could not be encoded.
    #[error("cannot encode {kind:?}: {reason}")]
    Serialize {
        /// Message kind.
        kind: String,
        /// Encoder error.
        reason: String,
    },

    /// The message or its reply could not be decoded.
    #[error("cannot decode {kind:?}: {reason}")]
    Deserialize {
        /// Message kind.
        kind: String,
        /// Decoder error.
        reason: String,
    },

    /// No handler is registered for this kind (locally or upstream).
    #[error("no handler registered for {kind:?}")]
    NoHandler {
        /// Message kind.
        kind: String,
    },

    /// More than one handler is registered; request/reply needs exactly one.
    #[error("{count} handlers registered for {kind:?}; request/reply needs exactly one")]
    AmbiguousHandler {
        /// Message kind.
        kind: String,
        /// Number of registered handlers.
        count: usize,
    },

    /// The peer process went away before replying.
    #[error("peer {peer} lost before replying")]
    PeerLost {
        /// The lost peer.
        peer: PeerId,
    },

    /// The target peer is not attached to this bus.
    #[error("unknown peer {peer}")]
    UnknownPeer {
        /// Requested peer.
        peer: PeerId,
    },

    /// The responding handler returned an error.
    #[error("handler failed: {message}")]
    Remote {
        /// Error text produced by the handler.
        message: String,
    },

    /// The transport refused the frame (oversized or writer gone).
    #[error("transport error: {reason}")]
    Io {
        /// What went wrong on the wire.
        reason: String,
    },

    /// The bus was closed while the request was pending.
    #[error("message bus closed")]
    Closed,

    /// The responder dropped the request without producing an outcome.
    #[error("request canceled")]
    Canceled,
}

impl IpcError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            IpcError::Serialize { .. } => "ipc_serialize",
            IpcError::Deserialize { .. } => "ipc_deserialize",
            IpcError::NoHandler { .. } => "ipc_no_handler",
            IpcError::AmbiguousHandler { .. } => "ipc_ambiguous_handler",
            IpcError::PeerLost { .. } => "ipc_peer_lost",
            IpcError::UnknownPeer { .. } => "ipc_unknown_peer",
            IpcError::Remote { .. } => "ipc_remote",
            IpcError::Io { .. } => "ipc_io",
            IpcError::Closed => "ipc_closed",
            IpcError::Canceled => "ipc_canceled",
        }
    }
}

/// # Errors produced while creating a worker process.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SpawnError {
    /// The OS refused to create the process.
    #[error("failed to spawn {command:?}: {source}")]
    Io {
        /// Program that was being started.
        command: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The process was created but a stdio pipe was not captured.
    #[error("spawned {command:?} without a {pipe} pipe")]
    MissingPipe {
        /// Program that was started.
        command: String,
        /// Which pipe is missing.
        pipe: &'static str,
    },

    /// A launcher declined to start the process.
    #[error("launch rejected: {reason}")]
    Rejected {
        /// Launcher-provided reason.
        reason: String,
    },
}

impl SpawnError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            SpawnError::Io { .. } => "spawn_io",
            SpawnError::MissingPipe { .. } => "spawn_missing_pipe",
            SpawnError::Rejected { .. } => "spawn_rejected",
        }
    }
}

/// # Errors produced by service container lookups.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// No service is registered under this identifier.
    #[error("service not found: {id}")]
    ServiceNotFound {
        /// Requested identifier.
        id: String,
    },

    /// No parameter is registered under this name.
    #[error("parameter not found: {name}")]
    ParameterNotFound {
        /// Requested parameter.
        name: String,
    },

    /// The service exists but has a different type.
    #[error("service {id} has an unexpected type")]
    TypeMismatch {
        /// Requested identifier.
        id: String,
    },

    /// A parameter value could not be represented as JSON.
    #[error("parameter {name} cannot be stored: {reason}")]
    InvalidParameter {
        /// Parameter being set.
        name: String,
        /// Serializer error.
        reason: String,
    },
}

impl From<ServiceError> for RuntimeError {
    fn from(err: ServiceError) -> Self {
        RuntimeError::configuration(err.to_string())
    }
}
