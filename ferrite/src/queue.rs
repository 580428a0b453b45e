//! State shared between a socket handle and the reactor that drives it.
//!
//! Application threads only ever touch [`Shared`]: they push outbound
//! messages, pop inbound ones and block on the two condition variables.
//! Everything else (connections, routing tables, filters) stays on the
//! reactor thread.

use crate::pattern::{Lockstep, PipeId};
use crate::poller::PollSignal;
use bytes::Bytes;
use ferrite_core::endpoint::Endpoint;
use ferrite_core::error::Error;
use ferrite_core::message::Message;
use ferrite_core::options::SocketOptions;
use ferrite_core::socket_type::SocketType;
use parking_lot::{Condvar, Mutex, MutexGuard};
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub(crate) type SocketId = u64;

/// Lifecycle of a socket as seen by the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    /// No connections and nothing being connected.
    Idle,
    /// Connect requested but no peer has completed the greeting yet.
    Connecting,
    /// At least one peer is ready for routing.
    Ready,
    /// Closed by the application; queued messages are being flushed.
    Draining,
    /// All resources released.
    Closed,
}

impl fmt::Display for SocketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Draining => "draining",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Snapshot of a socket's message counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SocketStats {
    /// Messages handed to at least one connection.
    pub sent: u64,
    /// Messages returned by `recv`.
    pub received: u64,
    /// Messages evicted by a full subscriber queue.
    pub dropped: u64,
    /// Messages lost because their connection closed or linger expired.
    pub discarded: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    sent: AtomicU64,
    received: AtomicU64,
    dropped: AtomicU64,
    discarded: AtomicU64,
}

impl Counters {
    pub(crate) fn add_sent(&self, n: u64) {
        self.sent.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_received(&self, n: u64) {
        self.received.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_dropped(&self, n: u64) {
        self.dropped.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_discarded(&self, n: u64) {
        if n > 0 {
            self.discarded.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub(crate) fn snapshot(&self) -> SocketStats {
        SocketStats {
            sent: self.sent.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

/// A message waiting to be routed by the reactor.
#[derive(Debug)]
pub(crate) struct Outgoing {
    pub msg: Message,
    /// Fixed destination (REP replies); `None` lets the pattern choose.
    pub route: Option<PipeId>,
}

impl Outgoing {
    pub(crate) fn new(msg: Message) -> Self {
        Self { msg, route: None }
    }
}

/// A message accepted by the pattern engine, waiting for `recv`.
#[derive(Debug)]
pub(crate) struct Delivery {
    pub pipe: PipeId,
    /// Routing envelope stripped by REP; empty elsewhere.
    pub envelope: Vec<Bytes>,
    pub msg: Message,
}

pub(crate) struct Queues {
    pub outbound: VecDeque<Outgoing>,
    pub inbound: VecDeque<Delivery>,
    pub lockstep: Lockstep,
    /// Error to hand to the next `recv` (REQ peer lost).
    pub pending_error: Option<Error>,
    pub closed: bool,
    pub state: SocketState,
    /// A `Pump` command is already on its way to the reactor.
    pub pump_requested: bool,
    /// The reactor stopped reading because `inbound` hit `recv_hwm`.
    pub reader_stalled: bool,
    pub send_hwm: usize,
    pub recv_hwm: usize,
    pub send_timeout: Option<Duration>,
    pub recv_timeout: Option<Duration>,
    pub linger: Option<Duration>,
    pub last_endpoint: Option<Endpoint>,
    watchers: SmallVec<[Arc<PollSignal>; 2]>,
}

impl Queues {
    pub(crate) fn has_send_room(&self) -> bool {
        self.outbound.len() < self.send_hwm
    }

    pub(crate) fn has_recv_room(&self) -> bool {
        self.inbound.len() < self.recv_hwm
    }

    /// Mark a pump as requested; returns `true` if the caller must send it.
    pub(crate) fn request_pump(&mut self) -> bool {
        !std::mem::replace(&mut self.pump_requested, true)
    }

    fn signal_watchers(&self) {
        for watcher in &self.watchers {
            watcher.notify();
        }
    }
}

pub(crate) struct Shared {
    pub id: SocketId,
    pub socket_type: SocketType,
    queues: Mutex<Queues>,
    readable: Condvar,
    writable: Condvar,
    pub stats: Counters,
}

impl Shared {
    pub(crate) fn new(id: SocketId, socket_type: SocketType, options: &SocketOptions) -> Self {
        Self {
            id,
            socket_type,
            queues: Mutex::new(Queues {
                outbound: VecDeque::new(),
                inbound: VecDeque::new(),
                lockstep: Lockstep::for_type(socket_type),
                pending_error: None,
                closed: false,
                state: SocketState::Idle,
                pump_requested: false,
                reader_stalled: false,
                send_hwm: options.send_hwm,
                recv_hwm: options.recv_hwm,
                send_timeout: options.send_timeout,
                recv_timeout: options.recv_timeout,
                linger: options.linger,
                last_endpoint: None,
                watchers: SmallVec::new(),
            }),
            readable: Condvar::new(),
            writable: Condvar::new(),
            stats: Counters::default(),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Queues> {
        self.queues.lock()
    }

    /// Wake `recv` waiters and pollers after `inbound` or the error changed.
    pub(crate) fn notify_readable(&self, queues: &Queues) {
        self.readable.notify_all();
        queues.signal_watchers();
    }

    /// Wake `send` waiters and pollers after `outbound` shrank.
    pub(crate) fn notify_writable(&self, queues: &Queues) {
        self.writable.notify_all();
        queues.signal_watchers();
    }

    /// Block until notified for reading. Returns `false` on timeout.
    pub(crate) fn wait_readable(
        &self,
        guard: &mut MutexGuard<'_, Queues>,
        deadline: Option<Instant>,
    ) -> bool {
        wait(&self.readable, guard, deadline)
    }

    /// Block until notified for writing. Returns `false` on timeout.
    pub(crate) fn wait_writable(
        &self,
        guard: &mut MutexGuard<'_, Queues>,
        deadline: Option<Instant>,
    ) -> bool {
        wait(&self.writable, guard, deadline)
    }

    /// Flag the socket closed and wake every blocked caller.
    ///
    /// Returns the linger to apply, or `None` if it was already closed.
    pub(crate) fn mark_closed(&self) -> Option<Option<Duration>> {
        let mut queues = self.lock();
        if queues.closed {
            return None;
        }
        queues.closed = true;
        queues.inbound.clear();
        self.readable.notify_all();
        self.writable.notify_all();
        queues.signal_watchers();
        Some(queues.linger)
    }

    pub(crate) fn set_state(&self, state: SocketState) {
        let mut queues = self.lock();
        if queues.state != state {
            queues.state = state;
            queues.signal_watchers();
        }
    }

    pub(crate) fn add_watcher(&self, signal: Arc<PollSignal>) {
        self.lock().watchers.push(signal);
    }

    pub(crate) fn remove_watcher(&self, signal: &Arc<PollSignal>) {
        self.lock().watchers.retain(|w| !Arc::ptr_eq(w, signal));
    }
}

fn wait(cond: &Condvar, guard: &mut MutexGuard<'_, Queues>, deadline: Option<Instant>) -> bool {
    match deadline {
        None => {
            cond.wait(guard);
            true
        }
        Some(deadline) => !cond.wait_until(guard, deadline).timed_out(),
    }
}

impl fmt::Debug for Shared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("id", &self.id)
            .field("socket_type", &self.socket_type)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_pump_requested_once() {
        let shared = Shared::new(1, SocketType::Push, &SocketOptions::default());
        let mut q = shared.lock();
        assert!(q.request_pump());
        assert!(!q.request_pump());
        q.pump_requested = false;
        assert!(q.request_pump());
    }

    #[test]
    fn test_close_wakes_waiter() {
        let shared = Arc::new(Shared::new(2, SocketType::Pull, &SocketOptions::default()));
        let waiter = {
            let shared = shared.clone();
            thread::spawn(move || {
                let mut q = shared.lock();
                while !q.closed {
                    shared.wait_readable(&mut q, None);
                }
            })
        };

        thread::sleep(Duration::from_millis(20));
        assert_eq!(shared.mark_closed(), Some(Some(Duration::from_secs(30))));
        assert_eq!(shared.mark_closed(), None);
        waiter.join().unwrap();
    }

    #[test]
    fn test_wait_times_out() {
        let shared = Shared::new(3, SocketType::Pull, &SocketOptions::default());
        let mut q = shared.lock();
        let deadline = Instant::now() + Duration::from_millis(10);
        while shared.wait_readable(&mut q, Some(deadline)) {}
        assert!(Instant::now() >= deadline);
    }

    #[test]
    fn test_counters() {
        let counters = Counters::default();
        counters.add_sent(2);
        counters.add_dropped(1);
        counters.add_discarded(0);
        let stats = counters.snapshot();
        assert_eq!(stats.sent, 2);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.discarded, 0);
    }
}
