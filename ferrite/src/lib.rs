//! # Ferrite
//!
//! Message-oriented sockets with ZeroMQ-style patterns over in-process,
//! IPC and TCP transports.
//!
//! ## Architecture
//!
//! - **`ferrite-core`**: messages, endpoints, options, socket types,
//!   reconnect backoff, subscription matching and the inproc registry
//! - **`ferrite-wire`**: the sans-IO frame codec and control commands
//! - **`ferrite`**: reactor threads, pattern routing and the blocking API
//!   (this crate)
//!
//! Each [`Context`] runs one or more reactor threads (`mio` poll loops).
//! A [`Socket`] belongs to one reactor; application threads exchange
//! messages with it through bounded queues and never touch the network
//! directly.
//!
//! ## Patterns
//!
//! | Socket | Peers | Behaviour |
//! |--------|-------|-----------|
//! | REQ | REP, ROUTER | strict send/recv alternation, round-robin |
//! | REP | REQ, DEALER | replies go back to the requester |
//! | PUB | SUB | fan-out with prefix filtering, drops when full |
//! | SUB | PUB | receives matching topics |
//! | PUSH | PULL | round-robin load balancing |
//! | PULL | PUSH | fair-queued intake |
//! | DEALER | REP, DEALER, ROUTER | async round-robin / fair-queue |
//! | ROUTER | REQ, DEALER, ROUTER | identity-addressed routing |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ferrite::prelude::*;
//!
//! # fn main() -> ferrite::Result<()> {
//! let ctx = Context::new()?;
//!
//! let publisher = ctx.socket(SocketType::Pub)?;
//! let endpoint = publisher.bind("tcp://127.0.0.1:0")?;
//!
//! let subscriber = ctx.socket(SocketType::Sub)?;
//! subscriber.connect(&endpoint.to_string())?;
//! subscriber.subscribe("weather.")?;
//!
//! publisher.send(Message::new().push_str("weather.oslo").push_str("-3C"))?;
//! # Ok(())
//! # }
//! ```
//!
//! Logging goes through `tracing`; see [`dev_tracing::init_tracing`].

#![deny(unsafe_code)]
#![warn(clippy::all)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]

mod context;
mod driver;
mod pattern;
mod pipe;
mod poller;
mod queue;
mod reactor;
mod socket;
mod transport;

pub mod dev_tracing;

pub use bytes::Bytes;
pub use context::{Context, ContextOptions};
pub use ferrite_core::endpoint::{Endpoint, EndpointError};
pub use ferrite_core::error::{Error, Result};
pub use ferrite_core::message::Message;
pub use ferrite_core::monitor::{SocketEvent, SocketMonitor};
pub use ferrite_core::options::SocketOptions;
pub use ferrite_core::socket_type::SocketType;
pub use poller::{PollEvents, Poller};
pub use queue::{SocketState, SocketStats};
pub use socket::Socket;

/// Everything needed for typical use.
pub mod prelude {
    pub use crate::{
        Bytes, Context, ContextOptions, Endpoint, Error, Message, PollEvents, Poller, Result,
        Socket, SocketEvent, SocketOptions, SocketState, SocketType,
    };
}
