//! Frame codec.
//!
//! Every frame on the wire is:
//!
//! ```text
//! +-------+----------------------+-----------+
//! | flags | length (LEB128 u64)  | payload   |
//! +-------+----------------------+-----------+
//!   1 B     1-10 B                 length B
//! ```
//!
//! Flag bit 0 is MORE (another frame of the same message follows) and bit 2
//! marks a COMMAND frame. Every other bit is reserved and must be zero.
//!
//! Decoding is restartable: [`decode`] and [`FrameDecoder`] only yield
//! complete frames and leave a partial tail untouched, so a stream may be fed
//! in arbitrary chunks.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use ferrite_core::message::Message;
use thiserror::Error;

/// Another frame of the same message follows.
pub const FLAG_MORE: u8 = 0x01;
/// Frame carries a control command instead of application data.
pub const FLAG_COMMAND: u8 = 0x04;
const RESERVED_MASK: u8 = !(FLAG_MORE | FLAG_COMMAND);

/// Longest valid LEB128 encoding of a `u64`.
pub const MAX_VARINT_LEN: usize = 10;

/// Wire-level protocol errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("reserved flag bits set: {0:#04x}")]
    ReservedBits(u8),

    #[error("frame length varint overflows u64")]
    VarintOverflow,

    #[error("declared frame length {declared} exceeds limit {max}")]
    FrameTooLarge { declared: u64, max: usize },

    #[error("message truncated: {missing} bytes missing")]
    Truncated { missing: usize },

    #[error("last frame has MORE set")]
    TrailingMore,

    #[error("unexpected command frame inside a message")]
    UnexpectedCommand,

    #[error("message has more than {max} frames")]
    TooManyFrames { max: usize },

    #[error("message exceeds {max} bytes")]
    MessageTooLarge { max: usize },

    #[error("invalid command: {0}")]
    InvalidCommand(&'static str),

    #[error("unknown command kind {0:#04x}")]
    UnknownCommand(u8),
}

/// Result type alias for wire operations
pub type Result<T> = std::result::Result<T, WireError>;

impl From<WireError> for ferrite_core::error::Error {
    fn from(err: WireError) -> Self {
        Self::MalformedFrame(err.to_string())
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub flags: u8,
    pub payload: Bytes,
}

impl Frame {
    /// Create a data frame
    pub const fn data(payload: Bytes, more: bool) -> Self {
        let flags = if more { FLAG_MORE } else { 0 };
        Self { flags, payload }
    }

    /// Create a command frame
    pub const fn command(payload: Bytes) -> Self {
        Self {
            flags: FLAG_COMMAND,
            payload,
        }
    }

    #[inline]
    pub const fn more(&self) -> bool {
        (self.flags & FLAG_MORE) != 0
    }

    #[inline]
    pub const fn is_command(&self) -> bool {
        (self.flags & FLAG_COMMAND) != 0
    }

    /// Bytes this frame occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        1 + varint_len(self.payload.len() as u64) + self.payload.len()
    }

    /// Append this frame to `dst`.
    pub fn encode_into(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        dst.put_u8(self.flags);
        put_varint(self.payload.len() as u64, dst);
        dst.extend_from_slice(&self.payload);
    }
}

/// Number of bytes `value` takes as a LEB128 varint.
pub const fn varint_len(mut value: u64) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

/// Append `value` as an unsigned LEB128 varint.
pub fn put_varint(mut value: u64, dst: &mut BytesMut) {
    while value >= 0x80 {
        dst.put_u8((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    dst.put_u8(value as u8);
}

/// Read a varint from the front of `buf`.
///
/// Returns `Ok(None)` when more bytes are needed.
fn read_varint(buf: &[u8]) -> Result<Option<(u64, usize)>> {
    let mut value: u64 = 0;
    for (i, &byte) in buf.iter().enumerate() {
        if i == MAX_VARINT_LEN - 1 && byte > 0x01 {
            // Tenth byte may only contribute the top bit of a u64.
            return Err(WireError::VarintOverflow);
        }
        value |= u64::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
    }
    Ok(None)
}

/// Parsed frame header: flags, payload length, header length.
struct Header {
    flags: u8,
    body_len: usize,
    header_len: usize,
}

fn parse_header(buf: &[u8], max_frame: usize) -> Result<Option<Header>> {
    let Some(&flags) = buf.first() else {
        return Ok(None);
    };
    if flags & RESERVED_MASK != 0 {
        return Err(WireError::ReservedBits(flags));
    }
    let Some((declared, varint_bytes)) = read_varint(&buf[1..])? else {
        return Ok(None);
    };
    if declared > max_frame as u64 {
        return Err(WireError::FrameTooLarge {
            declared,
            max: max_frame,
        });
    }
    Ok(Some(Header {
        flags,
        body_len: declared as usize,
        header_len: 1 + varint_bytes,
    }))
}

/// Append every frame of `msg` to `dst`, setting MORE on all but the last.
pub fn encode_into(msg: &Message, dst: &mut BytesMut) {
    let frames = msg.frames();
    let last = frames.len().saturating_sub(1);
    for (i, payload) in frames.iter().enumerate() {
        dst.reserve(1 + MAX_VARINT_LEN + payload.len());
        dst.put_u8(if i < last { FLAG_MORE } else { 0 });
        put_varint(payload.len() as u64, dst);
        dst.extend_from_slice(payload);
    }
}

/// Encode a whole message into a fresh buffer.
pub fn encode(msg: &Message) -> Bytes {
    let mut out = BytesMut::with_capacity(msg.byte_len() + msg.len() * 2);
    encode_into(msg, &mut out);
    out.freeze()
}

/// Decode every complete frame at the front of `buf`.
///
/// Returns the frames and the number of bytes they consumed. A partial
/// trailing frame is left for the next call. Payloads are zero-copy slices of
/// `buf`.
///
/// # Errors
///
/// Reserved bits, an overlong varint or a declared length above `max_frame`.
pub fn decode(buf: &Bytes, max_frame: usize) -> Result<(Vec<Frame>, usize)> {
    let mut frames = Vec::new();
    let mut pos = 0;
    while let Some(header) = parse_header(&buf[pos..], max_frame)? {
        let start = pos + header.header_len;
        let end = start + header.body_len;
        if end > buf.len() {
            break;
        }
        frames.push(Frame {
            flags: header.flags,
            payload: buf.slice(start..end),
        });
        pos = end;
    }
    Ok((frames, pos))
}

/// Strictly decode exactly one message occupying all of `bytes`.
///
/// # Errors
///
/// Any framing violation, trailing partial data, a final frame with MORE
/// set, or a command frame in the middle of the data.
pub fn decode_message(bytes: &Bytes, max_frame: usize) -> Result<Message> {
    let (frames, consumed) = decode(bytes, max_frame)?;
    if consumed < bytes.len() {
        let missing = match parse_header(&bytes[consumed..], max_frame)? {
            Some(h) => consumed + h.header_len + h.body_len - bytes.len(),
            None => 1,
        };
        return Err(WireError::Truncated { missing });
    }
    if frames.iter().any(Frame::is_command) {
        return Err(WireError::UnexpectedCommand);
    }
    match frames.last() {
        None => Err(WireError::Truncated { missing: 1 }),
        Some(last) if last.more() => Err(WireError::TrailingMore),
        Some(_) => Ok(frames.into_iter().map(|f| f.payload).collect()),
    }
}

/// Stateful, restartable frame decoder.
///
/// Chunks are appended with [`FrameDecoder::feed`]; complete frames are
/// split off the front of the internal buffer without copying.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    max_frame: usize,
}

impl FrameDecoder {
    #[must_use]
    pub fn new(max_frame: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_frame,
        }
    }

    /// Append freshly read bytes.
    pub fn feed(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pop the next complete frame, if one is buffered.
    ///
    /// # Errors
    ///
    /// A framing violation. The stream cannot be resynchronised afterwards.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(header) = parse_header(&self.buf, self.max_frame)? else {
            return Ok(None);
        };
        let total = header.header_len + header.body_len;
        if self.buf.len() < total {
            self.buf.reserve(total - self.buf.len());
            return Ok(None);
        }
        self.buf.advance(header.header_len);
        let payload = self.buf.split_to(header.body_len).freeze();
        Ok(Some(Frame {
            flags: header.flags,
            payload,
        }))
    }

    /// Bytes buffered but not yet returned as frames.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Drop any partial state.
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}
