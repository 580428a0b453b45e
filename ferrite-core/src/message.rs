//! Multipart messages.
//!
//! Frames of one [`Message`] travel as a unit: a receiver sees all of them,
//! in order, or none.

use bytes::Bytes;
use std::{slice, vec};

/// An ordered list of frames.
///
/// ```
/// use ferrite_core::message::Message;
///
/// let reply = Message::new().push("peer-3").push_empty().push_str("ok");
/// assert_eq!(reply.len(), 3);
/// assert_eq!(reply.byte_len(), 8);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    frames: Vec<Bytes>,
}

impl Message {
    #[must_use]
    pub const fn new() -> Self {
        Self::from_frames(Vec::new())
    }

    #[must_use]
    pub const fn from_frames(frames: Vec<Bytes>) -> Self {
        Self { frames }
    }

    #[must_use]
    pub fn with_capacity(frames: usize) -> Self {
        Self::from_frames(Vec::with_capacity(frames))
    }

    #[must_use]
    pub fn push(mut self, frame: impl Into<Bytes>) -> Self {
        self.append(frame);
        self
    }

    /// Copies `text` into a new frame.
    #[must_use]
    pub fn push_str(self, text: &str) -> Self {
        self.push(Bytes::copy_from_slice(text.as_bytes()))
    }

    /// Adds a zero-length delimiter frame.
    #[must_use]
    pub fn push_empty(self) -> Self {
        self.push(Bytes::new())
    }

    /// Adds `value` as four big-endian bytes.
    #[must_use]
    pub fn push_u32(self, value: u32) -> Self {
        self.push(value.to_be_bytes().to_vec())
    }

    /// Adds `value` as eight big-endian bytes.
    #[must_use]
    pub fn push_u64(self, value: u64) -> Self {
        self.push(value.to_be_bytes().to_vec())
    }

    pub fn append(&mut self, frame: impl Into<Bytes>) {
        self.frames.push(frame.into());
    }

    /// Puts `frame` in front, as routing envelopes do.
    pub fn prepend(&mut self, frame: impl Into<Bytes>) {
        self.frames.insert(0, frame.into());
    }

    pub fn pop_front(&mut self) -> Option<Bytes> {
        (!self.frames.is_empty()).then(|| self.frames.remove(0))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Sum of frame lengths.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.frames.iter().map(Bytes::len).sum()
    }

    /// The frame subscriptions match against.
    #[must_use]
    pub fn first(&self) -> Option<&Bytes> {
        self.frames.first()
    }

    #[must_use]
    pub fn frames(&self) -> &[Bytes] {
        &self.frames
    }

    #[must_use]
    pub fn into_frames(self) -> Vec<Bytes> {
        self.frames
    }

    pub fn iter(&self) -> slice::Iter<'_, Bytes> {
        self.frames.iter()
    }
}

impl From<Vec<Bytes>> for Message {
    fn from(frames: Vec<Bytes>) -> Self {
        Self::from_frames(frames)
    }
}

impl From<Message> for Vec<Bytes> {
    fn from(msg: Message) -> Self {
        msg.frames
    }
}

/// Single-frame messages from anything `Bytes` can be built from.
macro_rules! single_frame_from {
    ($($ty:ty => $conv:expr),* $(,)?) => {
        $(
            impl From<$ty> for Message {
                fn from(value: $ty) -> Self {
                    let conv: fn($ty) -> Bytes = $conv;
                    Self::from_frames(vec![conv(value)])
                }
            }
        )*
    };
}

single_frame_from! {
    Bytes => |b| b,
    String => Bytes::from,
    Vec<u8> => Bytes::from,
    &str => |s| Bytes::copy_from_slice(s.as_bytes()),
    &[u8] => Bytes::copy_from_slice,
}

impl<const N: usize> From<&[u8; N]> for Message {
    fn from(data: &[u8; N]) -> Self {
        Self::from(&data[..])
    }
}

impl<'a> IntoIterator for &'a Message {
    type Item = &'a Bytes;
    type IntoIter = slice::Iter<'a, Bytes>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl IntoIterator for Message {
    type Item = Bytes;
    type IntoIter = vec::IntoIter<Bytes>;

    fn into_iter(self) -> Self::IntoIter {
        self.frames.into_iter()
    }
}

impl FromIterator<Bytes> for Message {
    fn from_iter<I: IntoIterator<Item = Bytes>>(iter: I) -> Self {
        Self::from_frames(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_push_and_pop() {
        let mut msg = Message::from("payload");
        msg.prepend(Bytes::new());
        msg.prepend("client-9");

        let envelope: Vec<_> = std::iter::from_fn(|| {
            let frame = msg.pop_front()?;
            (!frame.is_empty()).then_some(frame)
        })
        .collect();
        assert_eq!(envelope, [Bytes::from_static(b"client-9")]);
        assert_eq!(msg.frames(), [Bytes::from_static(b"payload")]);

        msg.pop_front();
        assert_eq!(msg.pop_front(), None);
        assert!(msg.is_empty());
    }

    #[test]
    fn numeric_frames_are_big_endian() {
        let msg = Message::new().push_u32(0x0102_0304).push_u64(1);
        assert_eq!(msg.frames()[0].as_ref(), [1, 2, 3, 4]);
        assert_eq!(msg.frames()[1].as_ref(), [0, 0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(msg.byte_len(), 12);
    }

    #[test]
    fn conversions_make_one_frame() {
        let expected = Bytes::from_static(b"abc");
        for msg in [
            Message::from("abc"),
            Message::from(String::from("abc")),
            Message::from(b"abc"),
            Message::from(b"abc".to_vec()),
            Message::from(expected.clone()),
        ] {
            assert_eq!(msg.first(), Some(&expected));
            assert_eq!(msg.len(), 1);
        }
    }

    #[test]
    fn iterates_in_order() {
        let msg: Message = ["x", "y", "z"].into_iter().map(Bytes::from).collect();
        let joined: Vec<u8> = msg.iter().flat_map(|f| f.iter().copied()).collect();
        assert_eq!(joined, b"xyz");
        assert_eq!(Vec::<Bytes>::from(msg).len(), 3);
    }
}
