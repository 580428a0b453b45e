//! Reassembly of multipart messages from data frames.

use crate::codec::{Frame, Result, WireError};
use bytes::Bytes;
use ferrite_core::message::Message;

/// Per-connection accumulator for the frames of one message.
///
/// Frames pile up until one arrives without `MORE`. Exceeding either limit
/// throws away what was collected so far and reports the violation; the
/// caller is expected to drop the connection.
#[derive(Debug)]
pub struct MultipartBuffer {
    pending: Vec<Bytes>,
    pending_bytes: usize,
    frame_limit: usize,
    byte_limit: usize,
}

impl MultipartBuffer {
    pub fn new(max_frames: usize, max_bytes: usize) -> Self {
        Self {
            pending: Vec::new(),
            pending_bytes: 0,
            frame_limit: max_frames.max(1),
            byte_limit: max_bytes,
        }
    }

    /// Adds `frame`, returning the finished message when it was the last one.
    pub fn push_frame(&mut self, frame: Frame) -> Result<Option<Message>> {
        let violation = if self.pending.len() >= self.frame_limit {
            Some(WireError::TooManyFrames { max: self.frame_limit })
        } else if self.pending_bytes + frame.payload.len() > self.byte_limit {
            Some(WireError::MessageTooLarge { max: self.byte_limit })
        } else {
            None
        };
        if let Some(err) = violation {
            self.reset();
            return Err(err);
        }

        let last = !frame.more();
        self.pending_bytes += frame.payload.len();
        self.pending.push(frame.payload);
        if !last {
            return Ok(None);
        }
        self.pending_bytes = 0;
        Ok(Some(Message::from_frames(std::mem::take(&mut self.pending))))
    }

    pub fn in_progress(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn reset(&mut self) {
        self.pending.clear();
        self.pending_bytes = 0;
    }
}
