//! Control commands carried in COMMAND frames.
//!
//! The first payload byte selects the command:
//!
//! | kind   | body                                   |
//! |--------|----------------------------------------|
//! | `0x00` | unsubscribe: topic prefix              |
//! | `0x01` | subscribe: topic prefix                |
//! | `0x7F` | hello: version, socket type, identity  |

use crate::codec::{Frame, Result, WireError};
use bytes::{BufMut, Bytes, BytesMut};
use ferrite_core::socket_type::SocketType;

pub const CMD_UNSUBSCRIBE: u8 = 0x00;
pub const CMD_SUBSCRIBE: u8 = 0x01;
pub const CMD_HELLO: u8 = 0x7F;

/// Greeting version understood by this implementation.
pub const PROTOCOL_VERSION: u8 = 1;

/// Longest identity a peer may announce.
pub const MAX_IDENTITY_LEN: usize = 255;

/// A parsed control command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// First frame on every connection, in both directions.
    Hello {
        socket_type: SocketType,
        /// Empty when the peer has no routing identity.
        identity: Bytes,
    },
    Subscribe(Bytes),
    Unsubscribe(Bytes),
}

impl Command {
    /// Serialize the command body (without frame header).
    pub fn to_payload(&self) -> Bytes {
        match self {
            Self::Hello {
                socket_type,
                identity,
            } => {
                let mut out = BytesMut::with_capacity(3 + identity.len());
                out.put_u8(CMD_HELLO);
                out.put_u8(PROTOCOL_VERSION);
                out.put_u8(*socket_type as u8);
                out.extend_from_slice(identity);
                out.freeze()
            }
            Self::Subscribe(prefix) => with_kind(CMD_SUBSCRIBE, prefix),
            Self::Unsubscribe(prefix) => with_kind(CMD_UNSUBSCRIBE, prefix),
        }
    }

    /// Wrap the command in a COMMAND frame.
    pub fn to_frame(&self) -> Frame {
        Frame::command(self.to_payload())
    }

    /// Encode the command as a ready-to-write wire chunk.
    pub fn encode(&self) -> Bytes {
        let frame = self.to_frame();
        let mut out = BytesMut::with_capacity(frame.encoded_len());
        frame.encode_into(&mut out);
        out.freeze()
    }

    /// Parse a COMMAND frame body. Prefixes are zero-copy slices of `payload`.
    ///
    /// # Errors
    ///
    /// Empty payload, unknown kind, wrong greeting version, unknown socket
    /// type or an oversized identity.
    pub fn parse(payload: &Bytes) -> Result<Self> {
        let Some(&kind) = payload.first() else {
            return Err(WireError::InvalidCommand("empty command"));
        };
        match kind {
            CMD_SUBSCRIBE => Ok(Self::Subscribe(payload.slice(1..))),
            CMD_UNSUBSCRIBE => Ok(Self::Unsubscribe(payload.slice(1..))),
            CMD_HELLO => {
                if payload.len() < 3 {
                    return Err(WireError::InvalidCommand("short hello"));
                }
                if payload[1] != PROTOCOL_VERSION {
                    return Err(WireError::InvalidCommand("unsupported hello version"));
                }
                let socket_type = SocketType::from_u8(payload[2])
                    .ok_or(WireError::InvalidCommand("unknown socket type"))?;
                let identity = payload.slice(3..);
                if identity.len() > MAX_IDENTITY_LEN {
                    return Err(WireError::InvalidCommand("identity too long"));
                }
                Ok(Self::Hello {
                    socket_type,
                    identity,
                })
            }
            other => Err(WireError::UnknownCommand(other)),
        }
    }
}

fn with_kind(kind: u8, body: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(1 + body.len());
    out.put_u8(kind);
    out.extend_from_slice(body);
    out.freeze()
}
