//! Error types for the request orchestrator.
//!
//! # Design
//! `Cancelled` gets a dedicated variant because callers need to tell "I
//! cancelled this" apart from "the network failed". Every other per-task
//! failure reported by the transport lands in `Transport` with the raw
//! `TransportFailure` so nothing is lost in translation.
//!
//! `RegistryError` never reaches an application callback: an event for a
//! task nobody registered has no request to notify, so it is logged and
//! dropped at the bridge.

use std::fmt;

use thiserror::Error;

use crate::transport::TaskId;

/// Coarse classification of a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The task was cancelled, either directly or by session invalidation.
    Cancelled,
    TimedOut,
    /// DNS, connect or TLS failure.
    Connection,
    /// Local I/O failure (reading an upload source, writing a download).
    Io,
    Protocol,
    Other,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Cancelled => "cancelled",
            FailureKind::TimedOut => "timed out",
            FailureKind::Connection => "connection",
            FailureKind::Io => "io",
            FailureKind::Protocol => "protocol",
            FailureKind::Other => "other",
        };
        f.write_str(name)
    }
}

/// A failure reported verbatim by the transport in a completion event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct TransportFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl TransportFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(FailureKind::Cancelled, "task was cancelled")
    }

    pub fn is_cancellation(&self) -> bool {
        self.kind == FailureKind::Cancelled
    }
}

impl From<std::io::Error> for TransportFailure {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::TimedOut => FailureKind::TimedOut,
            _ => FailureKind::Io,
        };
        TransportFailure::new(kind, err.to_string())
    }
}

/// Errors surfaced by `RequestService`, either synchronously from a
/// submission call or through a task's failure path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// The task was cancelled before it completed.
    #[error("request was cancelled")]
    Cancelled,

    /// The transport reported a network, TLS or local I/O failure.
    #[error("transport failure: {0}")]
    Transport(TransportFailure),

    /// The configuration could not be turned into a session.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// A shape-specific submission received a request of another shape.
    #[error("expected a {expected} request, got a {found} request")]
    PayloadMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// The transport completed the task without ever delivering a response.
    #[error("task completed without a response")]
    MissingResponse,

    /// The transport does not provide the requested capability.
    #[error("{0} is not supported by this transport")]
    Unsupported(&'static str),

    /// No tokio runtime was available to run the callback bridge.
    #[error("no tokio runtime available")]
    RuntimeUnavailable,
}

impl ServiceError {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ServiceError::Cancelled)
    }
}

impl From<TransportFailure> for ServiceError {
    fn from(failure: TransportFailure) -> Self {
        if failure.is_cancellation() {
            ServiceError::Cancelled
        } else {
            ServiceError::Transport(failure)
        }
    }
}

/// Inconsistencies detected inside the task registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("task {0} is already registered")]
    DuplicateTask(TaskId),

    #[error("event for unknown task {0}")]
    UnknownTask(TaskId),
}
