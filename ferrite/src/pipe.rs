//! One connection as seen by a socket: transport, framing state and the
//! bounded queue of encoded messages waiting to be written.

use crate::pattern::PipeId;
use crate::transport::{Connection, RecvOutcome, SendOutcome};
use bytes::Bytes;
use ferrite_core::endpoint::Endpoint;
use ferrite_core::message::Message;
use ferrite_core::options::SocketOptions;
use ferrite_core::socket_type::SocketType;
use ferrite_wire::codec::FrameDecoder;
use ferrite_wire::command::Command;
use ferrite_wire::multipart::MultipartBuffer;
use mio::Token;
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::io::{self, IoSlice};
use std::time::Instant;

/// Largest number of chunks gathered into one vectored write.
const MAX_GATHER: usize = 32;

/// How a pipe came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    /// Created by `connect`; reconnects when lost.
    Initiator,
    /// Accepted on a bound endpoint.
    Acceptor,
}

#[derive(Debug)]
struct Chunk {
    bytes: Bytes,
    control: bool,
}

/// Bounded queue of encoded messages for one pipe.
///
/// Control chunks (greeting, subscriptions) bypass the bound and are never
/// evicted. A chunk that is partially written stays at the front until it
/// is complete.
#[derive(Debug)]
pub(crate) struct OutQueue {
    chunks: VecDeque<Chunk>,
    /// Bytes of the front chunk already written.
    offset: usize,
    data_len: usize,
    capacity: usize,
}

impl OutQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            offset: 0,
            data_len: 0,
            capacity: capacity.max(1),
        }
    }

    pub(crate) fn has_room(&self) -> bool {
        self.data_len < self.capacity
    }

    /// Queued data messages (control chunks excluded).
    pub(crate) fn data_len(&self) -> usize {
        self.data_len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub(crate) fn push(&mut self, bytes: Bytes) {
        self.data_len += 1;
        self.chunks.push_back(Chunk {
            bytes,
            control: false,
        });
    }

    pub(crate) fn push_control(&mut self, bytes: Bytes) {
        self.chunks.push_back(Chunk {
            bytes,
            control: true,
        });
    }

    /// Push, evicting the oldest unsent data chunk when full.
    ///
    /// Returns `true` if a chunk was evicted.
    pub(crate) fn push_evicting(&mut self, bytes: Bytes) -> bool {
        let mut evicted = false;
        if self.data_len >= self.capacity {
            let skip = usize::from(self.offset > 0);
            let victim = self
                .chunks
                .iter()
                .enumerate()
                .skip(skip)
                .find(|(_, c)| !c.control)
                .map(|(i, _)| i);
            if let Some(i) = victim {
                self.chunks.remove(i);
                self.data_len -= 1;
                evicted = true;
            }
        }
        self.push(bytes);
        evicted
    }

    /// Unwritten remainder of the front chunk.
    fn front(&self) -> Option<Bytes> {
        self.chunks.front().map(|c| c.bytes.slice(self.offset..))
    }

    /// Mark `n` bytes as written, across chunk boundaries.
    fn advance(&mut self, mut n: usize) {
        while n > 0 {
            let Some(front) = self.chunks.front() else {
                return;
            };
            let remaining = front.bytes.len() - self.offset;
            if n < remaining {
                self.offset += n;
                return;
            }
            n -= remaining;
            self.pop_front();
        }
    }

    fn pop_front(&mut self) {
        if let Some(chunk) = self.chunks.pop_front() {
            if !chunk.control {
                self.data_len -= 1;
            }
        }
        self.offset = 0;
    }

    /// Drop everything, returning the number of data messages lost.
    pub(crate) fn clear(&mut self) -> u64 {
        let lost = self.data_len as u64;
        self.chunks.clear();
        self.offset = 0;
        self.data_len = 0;
        lost
    }
}

pub(crate) struct Pipe {
    pub id: PipeId,
    pub conn: Connection,
    /// Registered poll token; `None` for inproc pipes.
    pub token: Option<Token>,
    pub endpoint: Endpoint,
    pub role: Role,
    /// Connector that owns this pipe (initiators only).
    pub connector: Option<u64>,
    pub decoder: FrameDecoder,
    pub multipart: MultipartBuffer,
    pub out: OutQueue,
    /// Peer greeting received and accepted.
    pub greeted: bool,
    pub peer_type: Option<SocketType>,
    /// Identity announced in the peer's greeting.
    pub peer_identity: Bytes,
    /// Identity a ROUTER uses for this pipe.
    pub routing_id: Bytes,
    pub handshake_deadline: Option<Instant>,
    /// Stream connect still in progress.
    pub connecting: bool,
    /// Readable edge seen and not yet drained to `WouldBlock`.
    pub read_ready: bool,
    /// Reading paused because the socket's inbound queue is full.
    pub stalled: bool,
    /// Complete message waiting for room in the inbound queue.
    pub held: Option<Message>,
}

impl Pipe {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: PipeId,
        conn: Connection,
        endpoint: Endpoint,
        role: Role,
        connector: Option<u64>,
        connecting: bool,
        options: &SocketOptions,
        hello: &Command,
        now: Instant,
    ) -> Self {
        let mut out = OutQueue::new(options.send_hwm);
        out.push_control(hello.encode());
        Self {
            id,
            conn,
            token: None,
            endpoint,
            role,
            connector,
            decoder: FrameDecoder::new(options.max_frame_size),
            multipart: MultipartBuffer::new(options.max_frames, options.message_byte_limit()),
            out,
            greeted: false,
            peer_type: None,
            peer_identity: Bytes::new(),
            routing_id: Bytes::new(),
            handshake_deadline: (!options.handshake_timeout.is_zero())
                .then(|| now + options.handshake_timeout),
            connecting,
            read_ready: true,
            stalled: false,
            held: None,
        }
    }

    /// Ready for routing and has room for another message.
    pub(crate) fn accepts(&self) -> bool {
        self.greeted && self.out.has_room()
    }

    pub(crate) fn enqueue(&mut self, chunk: Bytes) {
        self.out.push(chunk);
    }

    pub(crate) fn enqueue_evicting(&mut self, chunk: Bytes) -> bool {
        self.out.push_evicting(chunk)
    }

    pub(crate) fn enqueue_control(&mut self, chunk: Bytes) {
        self.out.push_control(chunk);
    }

    /// Whether the read path should run this iteration.
    pub(crate) fn wants_read(&self) -> bool {
        !self.connecting && !self.stalled && (self.read_ready || self.conn.is_inproc())
    }

    /// Write queued chunks until the transport pushes back.
    pub(crate) fn flush(&mut self) -> io::Result<()> {
        if self.connecting {
            return Ok(());
        }
        if self.conn.is_inproc() {
            while let Some(chunk) = self.out.front() {
                match self.conn.send(&chunk)? {
                    SendOutcome::Sent(n) => self.out.advance(n),
                    SendOutcome::WouldBlock => break,
                }
            }
            return Ok(());
        }
        while !self.out.is_empty() {
            let outcome = {
                let mut slices: SmallVec<[IoSlice<'_>; MAX_GATHER]> = SmallVec::new();
                for (i, chunk) in self.out.chunks.iter().take(MAX_GATHER).enumerate() {
                    let skip = if i == 0 { self.out.offset } else { 0 };
                    slices.push(IoSlice::new(&chunk.bytes[skip..]));
                }
                self.conn.send_vectored(&slices)?
            };
            match outcome {
                SendOutcome::Sent(n) => self.out.advance(n),
                SendOutcome::WouldBlock => break,
            }
        }
        Ok(())
    }

    /// Pull one read's worth of bytes into the decoder.
    pub(crate) fn read(&mut self, scratch: &mut [u8]) -> io::Result<RecvOutcome> {
        let outcome = self.conn.receive(&mut self.decoder, scratch)?;
        if outcome == RecvOutcome::WouldBlock {
            self.read_ready = false;
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(tag: u8) -> Bytes {
        Bytes::from(vec![tag; 4])
    }

    #[test]
    fn test_ring_keeps_last_k() {
        let mut ring = OutQueue::new(3);
        let mut evicted = 0;
        for tag in 0..10u8 {
            if ring.push_evicting(chunk(tag)) {
                evicted += 1;
            }
        }
        assert_eq!(evicted, 7);
        assert_eq!(ring.data_len(), 3);
        let kept: Vec<u8> = ring.chunks.iter().map(|c| c.bytes[0]).collect();
        assert_eq!(kept, vec![7, 8, 9]);
    }

    #[test]
    fn test_eviction_spares_partial_and_control() {
        let mut ring = OutQueue::new(2);
        ring.push_control(Bytes::from_static(b"hello"));
        ring.push(chunk(1));
        ring.push(chunk(2));

        // Control chunk half written: it must stay at the front.
        ring.advance(2);
        assert!(ring.push_evicting(chunk(3)));
        let kept: Vec<u8> = ring.chunks.iter().map(|c| c.bytes[0]).collect();
        assert_eq!(kept, vec![b'h', 2, 3]);
        assert_eq!(ring.front().unwrap(), Bytes::from_static(b"llo"));
    }

    #[test]
    fn test_partially_written_data_survives() {
        let mut ring = OutQueue::new(2);
        ring.push(chunk(1));
        ring.push(chunk(2));
        ring.advance(1);

        assert!(ring.push_evicting(chunk(3)));
        let kept: Vec<u8> = ring.chunks.iter().map(|c| c.bytes[0]).collect();
        assert_eq!(kept, vec![1, 3]);
    }

    #[test]
    fn test_advance_across_chunks() {
        let mut queue = OutQueue::new(4);
        queue.push(chunk(1));
        queue.push(chunk(2));
        queue.push_control(chunk(3));

        queue.advance(6);
        assert_eq!(queue.data_len(), 1);
        assert_eq!(queue.front().unwrap().len(), 2);

        queue.advance(6);
        assert!(queue.is_empty());
        assert_eq!(queue.data_len(), 0);
    }

    #[test]
    fn test_clear_counts_data_only() {
        let mut queue = OutQueue::new(4);
        queue.push_control(chunk(0));
        queue.push(chunk(1));
        queue.push(chunk(2));
        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
    }
}
