//! Transport-independent pieces of ferrite.
//!
//! Nothing in this crate owns a thread or a poller. The `ferrite` crate
//! drives these types from its reactor:
//!
//! | module | role |
//! |--------|------|
//! | [`message`] | multipart [`Message`](message::Message) |
//! | [`endpoint`] | `tcp://`, `ipc://` and `inproc://` addresses |
//! | [`socket_type`] | the eight patterns and their pairing rules |
//! | [`options`] | per-socket limits and timeouts |
//! | [`reconnect`] | connect retry schedule |
//! | [`subscription`] | topic prefix filters |
//! | [`inproc`] | per-context registry of in-process listeners |
//! | [`tcp`], `ipc` | stream setup helpers |
//! | [`monitor`] | lifecycle event channel |
//! | [`error`] | the shared [`Error`](error::Error) |

#![deny(unsafe_code)]
#![allow(clippy::cast_possible_truncation, clippy::module_name_repetitions)]

pub mod endpoint;
pub mod error;
pub mod inproc;
pub mod message;
pub mod monitor;
pub mod options;
pub mod reconnect;
pub mod socket_type;
pub mod subscription;
pub mod tcp;

#[cfg(unix)]
pub mod ipc;

pub mod prelude {
    pub use crate::endpoint::Endpoint;
    pub use crate::error::{Error, Result};
    pub use crate::message::Message;
    pub use crate::options::SocketOptions;
    pub use crate::socket_type::SocketType;
}
