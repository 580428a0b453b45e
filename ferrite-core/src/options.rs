//! Per-socket tunables.
//!
//! [`SocketOptions`] is a plain value: build it with the `with_*` methods,
//! hand it to `Context::socket_with_options`, and the reactor copies what it
//! needs. Timeouts use `Option<Duration>` throughout: `None` waits forever and
//! `Some(Duration::ZERO)` never waits.

use bytes::Bytes;
use std::io;
use std::time::Duration;

/// Largest frame length a decoder accepts unless configured otherwise.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

const DEFAULT_HWM: usize = 1000;
const DEFAULT_LINGER: Duration = Duration::from_secs(30);
const DEFAULT_HANDSHAKE: Duration = Duration::from_secs(30);
const DEFAULT_RECONNECT: Duration = Duration::from_millis(100);

/// Longest routing identity a peer may announce.
pub const MAX_ROUTING_ID_LEN: usize = 255;

/// Knobs for one socket.
///
/// ```
/// use ferrite_core::options::SocketOptions;
/// use std::time::Duration;
///
/// let opts = SocketOptions::new()
///     .with_send_hwm(64)
///     .with_recv_timeout(Duration::from_millis(250))
///     .with_linger(None);
/// assert_eq!(opts.send_hwm, 64);
/// assert_eq!(opts.effective_linger(), None);
/// ```
#[derive(Debug, Clone)]
pub struct SocketOptions {
    /// How long `recv` waits for a message before reporting `TimedOut`.
    pub recv_timeout: Option<Duration>,
    /// How long `send` waits for queue room before reporting `ResourceExhausted`.
    pub send_timeout: Option<Duration>,
    /// Deadline for a fresh connection's greeting. Zero turns the check off.
    pub handshake_timeout: Duration,
    /// Flush window after close. `None` and zero both drop pending output.
    pub linger: Option<Duration>,
    /// First reconnect delay.
    pub reconnect_ivl: Duration,
    /// Cap for the doubling reconnect delay; zero keeps the delay flat.
    pub reconnect_ivl_max: Duration,
    /// Random spread applied to each reconnect delay, as a fraction.
    pub reconnect_jitter: f64,
    /// Consecutive failed connects tolerated per endpoint before `Unreachable`.
    pub reconnect_max_attempts: Option<u32>,
    /// Inbound queue bound, in messages.
    pub recv_hwm: usize,
    /// Outbound bound, in messages. Applies to the socket queue and to every
    /// per-connection queue, so it doubles as the PUB ring size.
    pub send_hwm: usize,
    /// Frames declaring more bytes than this are malformed.
    pub max_frame_size: usize,
    /// Total byte bound for an assembled multipart message.
    pub max_msg_size: Option<usize>,
    /// Frame count bound for an assembled multipart message.
    pub max_frames: usize,
    /// Chunk size for stream reads.
    pub read_buffer_size: usize,
    /// Identity sent in the greeting so a ROUTER can address this socket.
    pub routing_id: Option<Bytes>,
    /// `SO_KEEPALIVE` idle time; `None` leaves the OS setting alone.
    pub tcp_keepalive: Option<Duration>,
    /// Accept backlog for TCP listeners.
    pub backlog: i32,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            recv_timeout: None,
            send_timeout: None,
            handshake_timeout: DEFAULT_HANDSHAKE,
            linger: Some(DEFAULT_LINGER),
            reconnect_ivl: DEFAULT_RECONNECT,
            reconnect_ivl_max: Duration::ZERO,
            reconnect_jitter: 0.1,
            reconnect_max_attempts: None,
            recv_hwm: DEFAULT_HWM,
            send_hwm: DEFAULT_HWM,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_msg_size: None,
            max_frames: 1024,
            read_buffer_size: 8 * 1024,
            routing_id: None,
            tcp_keepalive: None,
            backlog: 128,
        }
    }
}

impl SocketOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// `Duration::ZERO` makes `recv` return `TimedOut` instead of waiting.
    ///
    /// ```
    /// use ferrite_core::options::SocketOptions;
    /// use std::time::Duration;
    ///
    /// assert!(SocketOptions::new()
    ///     .with_recv_timeout(Duration::ZERO)
    ///     .is_recv_nonblocking());
    /// ```
    pub fn with_recv_timeout(mut self, timeout: Duration) -> Self {
        self.recv_timeout = Some(timeout);
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = Some(timeout);
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_linger(mut self, linger: Option<Duration>) -> Self {
        self.linger = linger;
        self
    }

    pub fn with_reconnect_ivl(mut self, ivl: Duration) -> Self {
        self.reconnect_ivl = ivl;
        self
    }

    pub fn with_reconnect_ivl_max(mut self, max: Duration) -> Self {
        self.reconnect_ivl_max = max;
        self
    }

    /// Values outside `0.0..=1.0` are clamped.
    pub fn with_reconnect_jitter(mut self, jitter: f64) -> Self {
        self.reconnect_jitter = jitter.clamp(0.0, 1.0);
        self
    }

    pub fn with_reconnect_max_attempts(mut self, attempts: Option<u32>) -> Self {
        self.reconnect_max_attempts = attempts;
        self
    }

    /// A mark of zero is raised to one.
    pub fn with_recv_hwm(mut self, hwm: usize) -> Self {
        self.recv_hwm = hwm.max(1);
        self
    }

    /// A mark of zero is raised to one.
    pub fn with_send_hwm(mut self, hwm: usize) -> Self {
        self.send_hwm = hwm.max(1);
        self
    }

    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    pub fn with_max_msg_size(mut self, size: Option<usize>) -> Self {
        self.max_msg_size = size;
        self
    }

    pub fn with_max_frames(mut self, frames: usize) -> Self {
        self.max_frames = frames.max(1);
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(64);
        self
    }

    /// The identity is checked by [`validate_routing_id`](Self::validate_routing_id)
    /// when the socket is created, not here.
    pub fn with_routing_id(mut self, id: Bytes) -> Self {
        self.routing_id = Some(id);
        self
    }

    pub fn with_tcp_keepalive(mut self, idle: Option<Duration>) -> Self {
        self.tcp_keepalive = idle;
        self
    }

    pub fn with_backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn is_recv_nonblocking(&self) -> bool {
        self.recv_timeout == Some(Duration::ZERO)
    }

    pub fn is_send_nonblocking(&self) -> bool {
        self.send_timeout == Some(Duration::ZERO)
    }

    /// The flush window to honour on close, or `None` to drop output at once.
    pub fn effective_linger(&self) -> Option<Duration> {
        self.linger.filter(|d| !d.is_zero())
    }

    pub fn message_byte_limit(&self) -> usize {
        self.max_msg_size.unwrap_or(usize::MAX)
    }

    /// Accepts 1 to 255 bytes whose first byte is not `0x00`; a leading zero
    /// marks identities a ROUTER made up itself.
    pub fn validate_routing_id(id: &[u8]) -> io::Result<()> {
        let problem = match id {
            [] => "empty routing identity".to_owned(),
            [0, ..] => "routing identity may not begin with 0x00".to_owned(),
            _ if id.len() > MAX_ROUTING_ID_LEN => {
                format!("routing identity is {} bytes, limit is {MAX_ROUTING_ID_LEN}", id.len())
            }
            _ => return Ok(()),
        };
        Err(io::Error::new(io::ErrorKind::InvalidInput, problem))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_block_and_linger() {
        let opts = SocketOptions::new();
        assert_eq!(opts.recv_timeout, None);
        assert_eq!(opts.send_timeout, None);
        assert_eq!(opts.linger, Some(Duration::from_secs(30)));
        assert_eq!((opts.recv_hwm, opts.send_hwm), (1000, 1000));
        assert_eq!(opts.reconnect_max_attempts, None);
        assert!(!opts.is_recv_nonblocking() && !opts.is_send_nonblocking());
    }

    #[test]
    fn builders_normalise_out_of_range_input() {
        let opts = SocketOptions::new()
            .with_send_hwm(0)
            .with_recv_hwm(0)
            .with_max_frames(0)
            .with_read_buffer_size(1)
            .with_reconnect_jitter(-2.0);
        assert_eq!(opts.send_hwm, 1);
        assert_eq!(opts.recv_hwm, 1);
        assert_eq!(opts.max_frames, 1);
        assert_eq!(opts.read_buffer_size, 64);
        assert_eq!(opts.reconnect_jitter, 0.0);
    }

    #[test]
    fn zero_timeouts_mean_never_wait() {
        let opts = SocketOptions::new()
            .with_send_timeout(Duration::ZERO)
            .with_recv_timeout(Duration::from_millis(1));
        assert!(opts.is_send_nonblocking());
        assert!(!opts.is_recv_nonblocking());
    }

    #[test]
    fn zero_linger_discards() {
        let with = |linger| SocketOptions::new().with_linger(linger).effective_linger();
        assert_eq!(with(None), None);
        assert_eq!(with(Some(Duration::ZERO)), None);
        assert_eq!(with(Some(Duration::from_millis(50))), Some(Duration::from_millis(50)));
    }

    #[test]
    fn message_limit_defaults_to_unbounded() {
        assert_eq!(SocketOptions::new().message_byte_limit(), usize::MAX);
        assert_eq!(SocketOptions::new().with_max_msg_size(Some(10)).message_byte_limit(), 10);
    }

    #[test]
    fn routing_identity_rules() {
        for ok in [&b"worker-7"[..], &[0xFF; MAX_ROUTING_ID_LEN][..]] {
            assert!(SocketOptions::validate_routing_id(ok).is_ok());
        }
        for bad in [&b""[..], &b"\x00abc"[..], &[b'x'; MAX_ROUTING_ID_LEN + 1][..]] {
            let err = SocketOptions::validate_routing_id(bad).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        }
    }
}
