//! Ferrite error types.
//!
//! One error enum is shared by every layer so that pattern violations,
//! transport failures and queue limits reach the caller with a single type.

use crate::endpoint::EndpointError;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Main error type for Ferrite operations
#[derive(Error, Debug)]
pub enum Error {
    /// A frame or message on the wire violated the framing rules.
    ///
    /// Raised by the codec; the offending connection is dropped.
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// The call is not allowed in the socket's current pattern state
    /// (e.g. a second REQ send before the reply arrived).
    #[error("State error: {0}")]
    State(String),

    /// The peer could not be reached (retries exhausted or peer lost).
    #[error("Peer unreachable: {0}")]
    Unreachable(String),

    /// A blocking operation was aborted by a concurrent close.
    #[error("Operation cancelled")]
    Cancelled,

    /// A queue or resource limit was hit.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// No message arrived before the receive timeout elapsed.
    #[error("Operation timed out after {0:?}")]
    TimedOut(Duration),

    /// The socket was closed before this call.
    #[error("Socket closed")]
    Closed,

    /// The owning context has been terminated.
    #[error("Context terminated")]
    Terminated,

    /// The message cannot be sent as-is (e.g. it has no frames).
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Endpoint parsing or binding error
    #[error(transparent)]
    Endpoint(#[from] EndpointError),

    /// IO error during socket operations
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Result type alias for Ferrite operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a malformed frame error with a message
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedFrame(msg.into())
    }

    /// Create a pattern state error with a message
    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }

    /// Create an unreachable error naming the peer
    pub fn unreachable(peer: impl Into<String>) -> Self {
        Self::Unreachable(peer.into())
    }

    /// Create a resource exhausted error with a message
    pub fn exhausted(msg: impl Into<String>) -> Self {
        Self::ResourceExhausted(msg.into())
    }

    /// Check if retrying the same call later may succeed.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            ),
            Self::TimedOut(_) | Self::ResourceExhausted(_) => true,
            _ => false,
        }
    }

    /// Check if this error means the socket can no longer be used.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Cancelled | Self::Terminated)
    }
}
