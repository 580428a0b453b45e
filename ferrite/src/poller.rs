//! Readiness polling across several sockets.
//!
//! A [`Poller`] borrows the sockets it watches and parks the calling thread
//! on a shared [`PollSignal`] that every registered socket bumps whenever its
//! queues change.

use crate::socket::Socket;
use ferrite_core::error::Result;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Set of readiness conditions.
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct PollEvents(u8);

impl PollEvents {
    /// A message (or a pending error) can be received without blocking.
    pub const POLLIN: Self = Self(0b01);
    /// A message can be sent without blocking.
    pub const POLLOUT: Self = Self(0b10);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for PollEvents {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for PollEvents {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for PollEvents {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl fmt::Debug for PollEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.contains(Self::POLLIN), self.contains(Self::POLLOUT)) {
            (true, true) => f.write_str("POLLIN | POLLOUT"),
            (true, false) => f.write_str("POLLIN"),
            (false, true) => f.write_str("POLLOUT"),
            (false, false) => f.write_str("(empty)"),
        }
    }
}

/// Generation counter that sockets bump on every queue change.
#[derive(Default)]
pub(crate) struct PollSignal {
    generation: Mutex<u64>,
    changed: Condvar,
}

impl PollSignal {
    pub(crate) fn notify(&self) {
        *self.generation.lock() += 1;
        self.changed.notify_all();
    }

    fn generation(&self) -> u64 {
        *self.generation.lock()
    }

    /// Wait until the generation moves past `seen`. Returns `false` on
    /// timeout.
    fn wait_past(&self, seen: u64, deadline: Option<Instant>) -> bool {
        let mut generation = self.generation.lock();
        while *generation == seen {
            match deadline {
                None => self.changed.wait(&mut generation),
                Some(deadline) => {
                    if self.changed.wait_until(&mut generation, deadline).timed_out() {
                        return *generation != seen;
                    }
                }
            }
        }
        true
    }
}

/// Waits for readiness on a set of sockets.
///
/// ```no_run
/// use ferrite::{Context, PollEvents, Poller, SocketType};
///
/// # fn main() -> ferrite::Result<()> {
/// let ctx = Context::new()?;
/// let pull = ctx.socket(SocketType::Pull)?;
/// pull.bind("inproc://jobs")?;
///
/// let mut poller = Poller::new();
/// poller.register(&pull, PollEvents::POLLIN);
/// for (socket, events) in poller.poll(Some(std::time::Duration::from_millis(100)))? {
///     if events.contains(PollEvents::POLLIN) {
///         let _job = socket.recv()?;
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct Poller<'a> {
    items: Vec<(&'a Socket, PollEvents)>,
    signal: Arc<PollSignal>,
}

impl<'a> Poller<'a> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            signal: Arc::new(PollSignal::default()),
        }
    }

    /// Watch `socket` for `interest`. Registering again replaces the
    /// interest set.
    pub fn register(&mut self, socket: &'a Socket, interest: PollEvents) {
        if let Some(item) = self.items.iter_mut().find(|(s, _)| s.id() == socket.id()) {
            item.1 = interest;
            return;
        }
        socket.shared().add_watcher(Arc::clone(&self.signal));
        self.items.push((socket, interest));
    }

    /// Stop watching `socket`. Returns `false` if it was not registered.
    pub fn unregister(&mut self, socket: &Socket) -> bool {
        let Some(pos) = self.items.iter().position(|(s, _)| s.id() == socket.id()) else {
            return false;
        };
        let (removed, _) = self.items.remove(pos);
        removed.shared().remove_watcher(&self.signal);
        true
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Block until at least one socket is ready or `timeout` elapses.
    ///
    /// `None` waits indefinitely; `Some(Duration::ZERO)` only checks. On
    /// timeout the returned list is empty. A closed socket in the set is an
    /// error.
    pub fn poll(&self, timeout: Option<Duration>) -> Result<Vec<(&'a Socket, PollEvents)>> {
        if self.items.is_empty() {
            return Ok(Vec::new());
        }
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let seen = self.signal.generation();
            let mut ready = Vec::new();
            for (socket, interest) in &self.items {
                let events = socket.readiness()? & *interest;
                if !events.is_empty() {
                    ready.push((*socket, events));
                }
            }
            if !ready.is_empty() || !self.signal.wait_past(seen, deadline) {
                return Ok(ready);
            }
        }
    }
}

impl Default for Poller<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Poller<'_> {
    fn drop(&mut self) {
        for (socket, _) in &self.items {
            socket.shared().remove_watcher(&self.signal);
        }
    }
}
