//! # Ferrite Wire
//!
//! Sans-IO framing for Ferrite connections.
//!
//! - [`codec`]: `[flags][varint length][payload]` frames, restartable decoding
//! - [`multipart`]: assembling data frames into whole messages under limits
//! - [`command`]: greeting and subscription control commands
//!
//! Nothing in this crate touches a socket; the runtime feeds bytes in and
//! writes the produced chunks out.
//!
//! ```rust
//! use ferrite_core::message::Message;
//! use ferrite_wire::codec::{decode_message, encode};
//!
//! let msg = Message::new().push_str("hello").push_str("world");
//! let wire = encode(&msg);
//! assert_eq!(decode_message(&wire, 1024).unwrap(), msg);
//! ```

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod codec;
pub mod command;
pub mod multipart;

pub use codec::{Frame, FrameDecoder, WireError};
pub use command::Command;
pub use multipart::MultipartBuffer;
