//! Lifecycle events a socket reports about its connections.
//!
//! `Socket::monitor` hands out the receiving end of an unbounded channel;
//! the reactor pushes a [`SocketEvent`] at each transition and never blocks
//! doing so. Dropping the receiver simply turns reporting off.

use crate::endpoint::Endpoint;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    Bound(Endpoint),
    BindFailed { endpoint: Endpoint, reason: String },
    /// An incoming connection; the endpoint is the remote address when known.
    Accepted(Endpoint),
    /// Greeting exchanged, the peer is now usable.
    Connected(Endpoint),
    ConnectRetried {
        endpoint: Endpoint,
        attempt: u32,
        delay: Duration,
    },
    Disconnected(Endpoint),
    /// Retries for this endpoint are exhausted; nothing more is scheduled.
    Unreachable { endpoint: Endpoint, attempts: u32 },
    HandshakeFailed { endpoint: Endpoint, reason: String },
    /// Last event of a socket.
    Closed,
}

impl fmt::Display for SocketEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use SocketEvent::*;
        match self {
            Bound(ep) => write!(f, "bound {ep}"),
            BindFailed { endpoint, reason } => write!(f, "bind {endpoint}: {reason}"),
            Accepted(ep) => write!(f, "accepted {ep}"),
            Connected(ep) => write!(f, "connected {ep}"),
            ConnectRetried { endpoint, attempt, delay } => {
                write!(f, "retry #{attempt} of {endpoint} in {delay:?}")
            }
            Disconnected(ep) => write!(f, "disconnected {ep}"),
            Unreachable { endpoint, attempts } => {
                write!(f, "gave up on {endpoint} after {attempts} attempts")
            }
            HandshakeFailed { endpoint, reason } => write!(f, "greeting from {endpoint}: {reason}"),
            Closed => f.write_str("closed"),
        }
    }
}

pub type SocketMonitor = flume::Receiver<SocketEvent>;

pub type SocketEventSender = flume::Sender<SocketEvent>;

#[must_use]
pub fn create_monitor() -> (SocketEventSender, SocketMonitor) {
    flume::unbounded()
}
