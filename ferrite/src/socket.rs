//! Application-facing socket handle.
//!
//! A [`Socket`] is a thin front for the queues it shares with its reactor.
//! `send` and `recv` only touch those queues; connection management is
//! forwarded to the reactor as commands.

use crate::poller::{PollEvents, Poller};
use crate::queue::{Shared, SocketState, SocketStats};
use crate::reactor::{Command, ReactorHandle};
use bytes::Bytes;
use ferrite_core::endpoint::Endpoint;
use ferrite_core::error::{Error, Result};
use ferrite_core::message::Message;
use ferrite_core::monitor::{create_monitor, SocketMonitor};
use ferrite_core::socket_type::SocketType;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

/// A messaging socket of one [`SocketType`].
///
/// Created by [`Context::socket`](crate::Context::socket). All methods take
/// `&self`; a socket may be shared between threads, although concurrent
/// `recv` callers on a REQ or REP socket race for the lockstep.
///
/// Dropping a socket closes it with its configured linger.
pub struct Socket {
    shared: Arc<Shared>,
    reactor: ReactorHandle,
}

impl Socket {
    pub(crate) fn new(shared: Arc<Shared>, reactor: ReactorHandle) -> Self {
        Self { shared, reactor }
    }

    pub(crate) fn shared(&self) -> &Shared {
        &self.shared
    }

    /// Context-unique socket id.
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn socket_type(&self) -> SocketType {
        self.shared.socket_type
    }

    fn ensure_open(&self) -> Result<()> {
        if self.shared.lock().closed {
            return Err(Error::Closed);
        }
        Ok(())
    }

    /// Listen on `endpoint` and return the resolved address (with the real
    /// port for `tcp://host:0`).
    pub fn bind(&self, endpoint: &str) -> Result<Endpoint> {
        let endpoint = Endpoint::parse(endpoint)?;
        self.ensure_open()?;
        let socket = self.id();
        self.reactor.request(|reply| Command::Bind {
            socket,
            endpoint,
            reply,
        })
    }

    pub fn unbind(&self, endpoint: &str) -> Result<()> {
        let endpoint = Endpoint::parse(endpoint)?;
        self.ensure_open()?;
        let socket = self.id();
        self.reactor.request(|reply| Command::Unbind {
            socket,
            endpoint,
            reply,
        })
    }

    /// Start connecting to `endpoint`.
    ///
    /// Returns once the attempt is scheduled; the connection itself is
    /// established (and re-established) in the background. Messages sent
    /// before it completes are queued.
    pub fn connect(&self, endpoint: &str) -> Result<()> {
        let endpoint = Endpoint::parse(endpoint)?;
        self.ensure_open()?;
        let socket = self.id();
        self.reactor.request(|reply| Command::Connect {
            socket,
            endpoint,
            reply,
        })
    }

    pub fn disconnect(&self, endpoint: &str) -> Result<()> {
        let endpoint = Endpoint::parse(endpoint)?;
        self.ensure_open()?;
        let socket = self.id();
        self.reactor.request(|reply| Command::Disconnect {
            socket,
            endpoint,
            reply,
        })
    }

    /// Send using the socket's send timeout.
    pub fn send(&self, msg: impl Into<Message>) -> Result<()> {
        let timeout = self.shared.lock().send_timeout;
        self.send_timeout(msg, timeout)
    }

    /// Queue `msg` for delivery.
    ///
    /// `None` blocks until there is room, `Some(Duration::ZERO)` fails
    /// immediately with [`Error::ResourceExhausted`] when the queue is full.
    /// PUB sockets never block: full subscribers lose their oldest messages
    /// instead.
    pub fn send_timeout(&self, msg: impl Into<Message>, timeout: Option<Duration>) -> Result<()> {
        let msg = msg.into();
        if msg.is_empty() {
            return Err(Error::InvalidMessage("message has no frames".into()));
        }
        let ty = self.socket_type();
        if !ty.can_send() {
            return Err(Error::state(format!("{ty} sockets cannot send")));
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        let mut q = self.shared.lock();
        if q.closed {
            return Err(Error::Closed);
        }
        loop {
            q.lockstep.check_send()?;
            if ty == SocketType::Pub || q.has_send_room() {
                break;
            }
            let woke = self.shared.wait_writable(&mut q, deadline);
            if q.closed {
                return Err(Error::Cancelled);
            }
            if !woke && !q.has_send_room() {
                return Err(Error::exhausted("send queue full"));
            }
        }

        let out = q.lockstep.commit_send(msg);
        q.outbound.push_back(out);
        let wake = q.request_pump();
        drop(q);
        if wake {
            self.reactor.send(Command::Pump(self.id()))?;
        }
        Ok(())
    }

    /// Receive using the socket's receive timeout.
    pub fn recv(&self) -> Result<Message> {
        let timeout = self.shared.lock().recv_timeout;
        self.recv_timeout(timeout)
    }

    /// Receive the next message.
    ///
    /// `None` blocks until one arrives; on expiry the call fails with
    /// [`Error::TimedOut`]. A REQ socket whose peer was lost mid-request
    /// reports [`Error::Unreachable`] here and may send again.
    pub fn recv_timeout(&self, timeout: Option<Duration>) -> Result<Message> {
        let ty = self.socket_type();
        if !ty.can_recv() {
            return Err(Error::state(format!("{ty} sockets cannot receive")));
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        let mut q = self.shared.lock();
        if q.closed {
            return Err(Error::Closed);
        }
        loop {
            if let Some(err) = q.pending_error.take() {
                q.lockstep.reset();
                return Err(err);
            }
            q.lockstep.check_recv()?;
            if let Some(delivery) = q.inbound.pop_front() {
                let msg = q.lockstep.accept(delivery);
                let wake = if q.reader_stalled {
                    q.reader_stalled = false;
                    q.request_pump()
                } else {
                    false
                };
                drop(q);
                self.shared.stats.add_received(1);
                if wake {
                    trace!(socket = self.id(), "[SOCKET] resuming stalled reader");
                    self.reactor.send(Command::Pump(self.id()))?;
                }
                return Ok(msg);
            }
            let woke = self.shared.wait_readable(&mut q, deadline);
            if q.closed {
                return Err(Error::Cancelled);
            }
            if !woke && q.inbound.is_empty() && q.pending_error.is_none() {
                return Err(Error::TimedOut(timeout.unwrap_or_default()));
            }
        }
    }

    /// Receive without blocking. `Ok(None)` when nothing is queued.
    pub fn try_recv(&self) -> Result<Option<Message>> {
        match self.recv_timeout(Some(Duration::ZERO)) {
            Ok(msg) => Ok(Some(msg)),
            Err(Error::TimedOut(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Add a topic prefix filter (SUB only). The empty prefix matches
    /// everything.
    pub fn subscribe(&self, prefix: impl Into<Bytes>) -> Result<()> {
        self.require_sub()?;
        let socket = self.id();
        self.reactor.send(Command::Subscribe {
            socket,
            prefix: prefix.into(),
        })
    }

    pub fn unsubscribe(&self, prefix: impl Into<Bytes>) -> Result<()> {
        self.require_sub()?;
        let socket = self.id();
        self.reactor.send(Command::Unsubscribe {
            socket,
            prefix: prefix.into(),
        })
    }

    fn require_sub(&self) -> Result<()> {
        if self.socket_type() != SocketType::Sub {
            return Err(Error::state(format!(
                "{} sockets do not filter topics",
                self.socket_type()
            )));
        }
        self.ensure_open()
    }

    /// Wait for this socket alone to become ready for `interest`.
    pub fn poll(&self, interest: PollEvents, timeout: Option<Duration>) -> Result<PollEvents> {
        let mut poller = Poller::new();
        poller.register(self, interest);
        Ok(poller
            .poll(timeout)?
            .first()
            .map_or(PollEvents::empty(), |(_, events)| *events))
    }

    /// Current readiness, as reported to pollers.
    pub(crate) fn readiness(&self) -> Result<PollEvents> {
        let ty = self.socket_type();
        let q = self.shared.lock();
        if q.closed {
            return Err(Error::Closed);
        }
        let mut events = PollEvents::empty();
        if ty.can_recv()
            && (q.pending_error.is_some()
                || (!q.inbound.is_empty() && q.lockstep.check_recv().is_ok()))
        {
            events |= PollEvents::POLLIN;
        }
        if ty.can_send()
            && q.lockstep.check_send().is_ok()
            && (ty == SocketType::Pub || q.has_send_room())
        {
            events |= PollEvents::POLLOUT;
        }
        Ok(events)
    }

    /// Subscribe to lifecycle events. A new call replaces the previous
    /// monitor.
    pub fn monitor(&self) -> Result<SocketMonitor> {
        self.ensure_open()?;
        let (events, monitor) = create_monitor();
        let socket = self.id();
        self.reactor.send(Command::Monitor { socket, events })?;
        Ok(monitor)
    }

    pub fn stats(&self) -> SocketStats {
        self.shared.stats.snapshot()
    }

    pub fn state(&self) -> SocketState {
        self.shared.lock().state
    }

    /// The endpoint of the most recent successful `bind` or `connect`.
    pub fn last_endpoint(&self) -> Option<Endpoint> {
        self.shared.lock().last_endpoint.clone()
    }

    /// Grace period for queued messages at close. `None` or zero discards
    /// them at once.
    pub fn set_linger(&self, linger: Option<Duration>) {
        self.shared.lock().linger = linger;
    }

    pub fn set_send_timeout(&self, timeout: Option<Duration>) {
        self.shared.lock().send_timeout = timeout;
    }

    pub fn set_recv_timeout(&self, timeout: Option<Duration>) {
        self.shared.lock().recv_timeout = timeout;
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Close the socket without waiting.
    ///
    /// Blocked `send`/`recv` callers fail with [`Error::Cancelled`]; later
    /// calls fail with [`Error::Closed`]. Queued messages keep flushing in
    /// the background for up to the linger period.
    pub fn close(&self) {
        if let Some(linger) = self.shared.mark_closed() {
            trace!(socket = self.id(), ?linger, "[SOCKET] close requested");
            let socket = self.id();
            // The reactor is gone after terminate; nothing left to flush.
            let _ = self.reactor.send(Command::Close { socket, linger });
        }
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("id", &self.id())
            .field("type", &self.socket_type())
            .field("state", &self.state())
            .finish()
    }
}
