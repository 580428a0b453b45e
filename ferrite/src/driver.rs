//! Reactor-side state of one socket.
//!
//! A [`SocketDriver`] owns everything the application never touches
//! directly: listeners, connectors with their backoff, pipes and the pattern
//! engine. The reactor calls into it for readiness events, control commands
//! and once per loop iteration to move data.

use crate::pattern::{Engine, PipeId, Pipes, Route};
use crate::pipe::{Pipe, Role};
use crate::queue::{Shared, SocketState};
use crate::reactor::{Readiness, TokenTable};
use crate::transport::{Connection, Listener, RecvOutcome};
use bytes::Bytes;
use ferrite_core::endpoint::{Endpoint, EndpointError};
use ferrite_core::error::{Error, Result};
use ferrite_core::inproc::{InprocRegistry, Notify};
use ferrite_core::message::Message;
use ferrite_core::monitor::{SocketEvent, SocketEventSender};
use ferrite_core::options::SocketOptions;
use ferrite_core::reconnect::{Backoff, ReconnectError};
use ferrite_wire::command::Command;
use hashbrown::HashMap;
use mio::{Registry, Token};
use smallvec::SmallVec;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Reads performed on one pipe per iteration before yielding to others.
const READ_BUDGET: usize = 16;

/// Route/flush rounds per iteration while the socket queue keeps draining.
const PUMP_ROUNDS: usize = 4;

/// Reactor resources borrowed for the duration of one call.
pub(crate) struct IoCtx<'a> {
    pub registry: &'a Registry,
    pub tokens: &'a mut TokenTable,
    pub inproc: &'a InprocRegistry,
    pub notify: &'a Notify,
    pub scratch: &'a mut [u8],
    pub now: Instant,
}

/// Whether the socket still needs its reactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Progress {
    Running,
    Finished,
}

/// Why a pipe is being torn down.
#[derive(Debug)]
enum PipeFailure {
    /// Peer closed the connection.
    Closed,
    /// Local `disconnect` or socket shutdown.
    Local,
    Io(io::Error),
    Protocol(String),
    Handshake(String),
}

impl fmt::Display for PipeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => f.write_str("closed by peer"),
            Self::Local => f.write_str("closed locally"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Protocol(reason) => write!(f, "protocol error: {reason}"),
            Self::Handshake(reason) => write!(f, "handshake failed: {reason}"),
        }
    }
}

struct Connector {
    endpoint: Endpoint,
    backoff: Backoff,
    pipe: Option<PipeId>,
    /// Retry budget spent; no further attempts.
    exhausted: bool,
}

struct Bound {
    endpoint: Endpoint,
    listener: Listener,
    token: Option<Token>,
}

struct Drain {
    /// `None` once messages have been discarded.
    deadline: Option<Instant>,
}

pub(crate) struct SocketDriver {
    shared: Arc<Shared>,
    options: SocketOptions,
    engine: Engine,
    hello: Command,
    pipes: Pipes,
    listeners: HashMap<u64, Bound>,
    connectors: HashMap<u64, Connector>,
    monitor: Option<SocketEventSender>,
    drain: Option<Drain>,
}

impl SocketDriver {
    pub(crate) fn new(shared: Arc<Shared>, options: SocketOptions) -> Self {
        let hello = Command::Hello {
            socket_type: shared.socket_type,
            identity: options.routing_id.clone().unwrap_or_default(),
        };
        Self {
            engine: Engine::new(shared.socket_type),
            shared,
            options,
            hello,
            pipes: Pipes::new(),
            listeners: HashMap::new(),
            connectors: HashMap::new(),
            monitor: None,
            drain: None,
        }
    }

    fn id(&self) -> u64 {
        self.shared.id
    }

    fn emit(&mut self, event: SocketEvent) {
        if let Some(monitor) = &self.monitor {
            if monitor.send(event).is_err() {
                self.monitor = None;
            }
        }
    }

    pub(crate) fn set_monitor(&mut self, events: SocketEventSender) {
        self.monitor = Some(events);
    }

    // ---- control commands -------------------------------------------------

    pub(crate) fn bind(&mut self, endpoint: Endpoint, io: &mut IoCtx<'_>) -> Result<Endpoint> {
        if self.drain.is_some() {
            return Err(Error::Closed);
        }
        let (mut listener, resolved) =
            match Listener::bind(&endpoint, &self.options, io.inproc, io.notify) {
                Ok(bound) => bound,
                Err(e) => {
                    debug!(socket = self.id(), %endpoint, error = %e, "[SOCKET] bind failed");
                    self.emit(SocketEvent::BindFailed {
                        endpoint,
                        reason: e.to_string(),
                    });
                    return Err(e);
                }
            };

        let id = io.tokens.next_id();
        let mut token = None;
        if !listener.is_inproc() {
            let t = io.tokens.register(self.id(), id);
            if let Err(e) = listener.register(io.registry, t) {
                io.tokens.release(t);
                listener.close(io.registry, io.inproc);
                return Err(e.into());
            }
            token = Some(t);
        }

        debug!(socket = self.id(), endpoint = %resolved, "[SOCKET] bound");
        self.listeners.insert(
            id,
            Bound {
                endpoint: resolved.clone(),
                listener,
                token,
            },
        );
        self.shared.lock().last_endpoint = Some(resolved.clone());
        self.emit(SocketEvent::Bound(resolved.clone()));
        Ok(resolved)
    }

    pub(crate) fn unbind(&mut self, endpoint: &Endpoint, io: &mut IoCtx<'_>) -> Result<()> {
        let id = self
            .listeners
            .iter()
            .find(|(_, b)| &b.endpoint == endpoint)
            .map(|(id, _)| *id)
            .ok_or_else(|| EndpointError::NotBound(endpoint.to_string()))?;
        if let Some(bound) = self.listeners.remove(&id) {
            close_listener(bound, io);
        }
        debug!(socket = self.id(), %endpoint, "[SOCKET] unbound");
        Ok(())
    }

    pub(crate) fn connect(&mut self, endpoint: Endpoint, io: &mut IoCtx<'_>) -> Result<()> {
        if self.drain.is_some() {
            return Err(Error::Closed);
        }
        let id = io.tokens.next_id();
        self.connectors.insert(
            id,
            Connector {
                endpoint: endpoint.clone(),
                backoff: Backoff::new(&self.options),
                pipe: None,
                exhausted: false,
            },
        );
        debug!(socket = self.id(), %endpoint, "[SOCKET] connecting");
        self.shared.lock().last_endpoint = Some(endpoint);
        self.attempt_connect(id, io);
        Ok(())
    }

    pub(crate) fn disconnect(&mut self, endpoint: &Endpoint, io: &mut IoCtx<'_>) -> Result<()> {
        let id = self
            .connectors
            .iter()
            .find(|(_, c)| &c.endpoint == endpoint)
            .map(|(id, _)| *id)
            .ok_or_else(|| EndpointError::NotBound(endpoint.to_string()))?;
        if let Some(pipe) = self.connectors.remove(&id).and_then(|c| c.pipe) {
            self.fail_pipe(pipe, PipeFailure::Local, io);
        }
        debug!(socket = self.id(), %endpoint, "[SOCKET] disconnected");
        Ok(())
    }

    pub(crate) fn subscribe(&mut self, prefix: Bytes) {
        self.engine.subscribe(prefix, &mut self.pipes);
    }

    pub(crate) fn unsubscribe(&mut self, prefix: Bytes) {
        self.engine.unsubscribe(prefix, &mut self.pipes);
    }

    /// Stop accepting work and start flushing. `None` or zero linger
    /// discards everything immediately.
    pub(crate) fn begin_close(&mut self, linger: Option<Duration>, io: &mut IoCtx<'_>) {
        if self.drain.is_some() {
            return;
        }
        debug!(socket = self.id(), ?linger, "[SOCKET] closing");
        for (_, bound) in self.listeners.drain() {
            close_listener(bound, io);
        }
        let deadline = linger.filter(|d| !d.is_zero()).map(|d| io.now + d);
        self.drain = Some(Drain { deadline });
        if deadline.is_none() {
            self.discard_all();
        }
    }

    /// Tear everything down without flushing (reactor shutdown).
    pub(crate) fn force_close(&mut self, io: &mut IoCtx<'_>) {
        self.discard_all();
        self.finish(io);
    }

    // ---- readiness --------------------------------------------------------

    pub(crate) fn on_event(&mut self, id: u64, ready: Readiness, io: &mut IoCtx<'_>) {
        if self.listeners.contains_key(&id) {
            self.accept_all(id, io);
            return;
        }
        let Some(pipe) = self.pipes.get_mut(&id) else {
            return;
        };
        if pipe.connecting && (ready.writable || ready.closed || ready.error) {
            match pipe.conn.finish_connect() {
                Ok(true) => {
                    pipe.connecting = false;
                    if let Err(e) = pipe.conn.configure(&self.options) {
                        debug!(pipe = id, error = %e, "[SOCKET] stream tuning failed");
                    }
                    trace!(pipe = id, endpoint = %pipe.endpoint, "[SOCKET] transport connected");
                }
                Ok(false) => {}
                Err(e) => {
                    self.fail_pipe(id, PipeFailure::Io(e), io);
                    return;
                }
            }
        }
        if ready.readable || ready.closed || ready.error {
            pipe.read_ready = true;
        }
    }

    fn accept_all(&mut self, listener: u64, io: &mut IoCtx<'_>) {
        loop {
            let accepted = match self.listeners.get(&listener) {
                Some(bound) => bound.listener.accept(),
                None => return,
            };
            match accepted {
                Ok(Some((conn, peer))) => {
                    let id = io.tokens.next_id();
                    let pipe = Pipe::new(
                        id,
                        conn,
                        peer.clone(),
                        Role::Acceptor,
                        None,
                        false,
                        &self.options,
                        &self.hello,
                        io.now,
                    );
                    if let Err(e) = pipe.conn.configure(&self.options) {
                        debug!(pipe = id, error = %e, "[SOCKET] stream tuning failed");
                    }
                    match self.install_pipe(pipe, io) {
                        Ok(()) => {
                            debug!(socket = self.id(), pipe = id, %peer, "[SOCKET] accepted");
                            self.emit(SocketEvent::Accepted(peer));
                        }
                        Err(e) => debug!(error = %e, "[SOCKET] failed to register accepted pipe"),
                    }
                }
                Ok(None) => return,
                Err(e) => {
                    debug!(socket = self.id(), error = %e, "[SOCKET] accept failed");
                    return;
                }
            }
        }
    }

    // ---- connections ------------------------------------------------------

    fn install_pipe(&mut self, mut pipe: Pipe, io: &mut IoCtx<'_>) -> io::Result<()> {
        if !pipe.conn.is_inproc() {
            let token = io.tokens.register(self.id(), pipe.id);
            if let Err(e) = pipe.conn.register(io.registry, token) {
                io.tokens.release(token);
                return Err(e);
            }
            pipe.token = Some(token);
        }
        self.pipes.insert(pipe.id, pipe);
        Ok(())
    }

    fn attempt_connect(&mut self, connector: u64, io: &mut IoCtx<'_>) {
        let Some(endpoint) = self.connectors.get(&connector).map(|c| c.endpoint.clone()) else {
            return;
        };
        let conn = match Connection::connect(&endpoint, io.inproc, io.notify) {
            Ok(conn) => conn,
            Err(e) => {
                trace!(socket = self.id(), %endpoint, error = %e, "[SOCKET] connect attempt failed");
                self.connection_failed(connector, io);
                return;
            }
        };

        let id = io.tokens.next_id();
        let connecting = !conn.is_inproc();
        let pipe = Pipe::new(
            id,
            conn,
            endpoint,
            Role::Initiator,
            Some(connector),
            connecting,
            &self.options,
            &self.hello,
            io.now,
        );
        match self.install_pipe(pipe, io) {
            Ok(()) => {
                if let Some(c) = self.connectors.get_mut(&connector) {
                    c.pipe = Some(id);
                }
            }
            Err(e) => {
                debug!(socket = self.id(), error = %e, "[SOCKET] failed to register pipe");
                self.connection_failed(connector, io);
            }
        }
    }

    /// Schedule the next attempt for `connector`, or give up.
    fn connection_failed(&mut self, connector: u64, io: &mut IoCtx<'_>) {
        let Some(c) = self.connectors.get_mut(&connector) else {
            return;
        };
        c.pipe = None;
        let endpoint = c.endpoint.clone();
        match c.backoff.schedule(io.now) {
            Ok(delay) => {
                let attempt = c.backoff.attempt();
                trace!(socket = self.id(), %endpoint, attempt, ?delay, "[SOCKET] reconnect scheduled");
                self.emit(SocketEvent::ConnectRetried {
                    endpoint,
                    attempt,
                    delay,
                });
            }
            Err(ReconnectError::MaxAttemptsReached { attempts }) => {
                c.exhausted = true;
                warn!(socket = self.id(), %endpoint, attempts, "[SOCKET] peer unreachable, giving up");
                self.emit(SocketEvent::Unreachable { endpoint, attempts });
                self.fail_stranded_request();
            }
        }
    }

    /// A REQ request that can no longer reach any peer fails with
    /// `Unreachable` instead of waiting forever.
    fn fail_stranded_request(&mut self) {
        if !self.engine.lacks_request_peer()
            || !self.pipes.is_empty()
            || !self.listeners.is_empty()
            || self.connectors.is_empty()
            || self.connectors.values().any(|c| !c.exhausted)
        {
            return;
        }
        let mut q = self.shared.lock();
        if q.lockstep.is_awaiting_reply() && !q.outbound.is_empty() {
            let lost = q.outbound.len() as u64;
            q.outbound.clear();
            q.pending_error = Some(Error::unreachable("no peer reachable for request"));
            self.shared.stats.add_discarded(lost);
            self.shared.notify_readable(&q);
            self.shared.notify_writable(&q);
        }
    }

    fn fail_pipe(&mut self, id: PipeId, failure: PipeFailure, io: &mut IoCtx<'_>) {
        let Some(mut pipe) = self.pipes.remove(&id) else {
            return;
        };
        if let Some(token) = pipe.token.take() {
            if let Err(e) = pipe.conn.deregister(io.registry) {
                trace!(pipe = id, error = %e, "[SOCKET] deregister failed");
            }
            io.tokens.release(token);
        }
        self.shared.stats.add_discarded(pipe.out.clear());
        pipe.multipart.reset();

        match &failure {
            PipeFailure::Closed | PipeFailure::Local => {
                debug!(socket = self.id(), pipe = id, endpoint = %pipe.endpoint, "[SOCKET] pipe {failure}");
            }
            PipeFailure::Handshake(reason) => {
                debug!(socket = self.id(), pipe = id, endpoint = %pipe.endpoint, %reason, "[SOCKET] handshake failed");
                self.emit(SocketEvent::HandshakeFailed {
                    endpoint: pipe.endpoint.clone(),
                    reason: reason.clone(),
                });
            }
            PipeFailure::Io(_) | PipeFailure::Protocol(_) => {
                debug!(socket = self.id(), pipe = id, endpoint = %pipe.endpoint, "[SOCKET] pipe dropped: {failure}");
            }
        }

        if pipe.greeted {
            if let Some(err) = self.engine.detach(id) {
                let mut q = self.shared.lock();
                q.pending_error = Some(err);
                self.shared.notify_readable(&q);
            }
            self.emit(SocketEvent::Disconnected(pipe.endpoint.clone()));
        }

        if let Some(connector) = pipe.connector {
            self.connection_failed(connector, io);
        }
    }

    // ---- inbound ----------------------------------------------------------

    fn read_pipes(&mut self, io: &mut IoCtx<'_>) {
        let ids: SmallVec<[PipeId; 16]> = self
            .pipes
            .iter()
            .filter(|(_, p)| p.wants_read())
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            let Some(mut pipe) = self.pipes.remove(&id) else {
                continue;
            };
            let result = self.read_pipe(&mut pipe, io);
            self.pipes.insert(id, pipe);
            if let Err(failure) = result {
                self.fail_pipe(id, failure, io);
            }
        }
    }

    fn read_pipe(&mut self, pipe: &mut Pipe, io: &mut IoCtx<'_>) -> std::result::Result<(), PipeFailure> {
        let limit = self.options.read_buffer_size.min(io.scratch.len());
        for _ in 0..READ_BUDGET {
            self.process_frames(pipe)?;
            if pipe.stalled {
                return Ok(());
            }
            match pipe.read(&mut io.scratch[..limit]) {
                Ok(RecvOutcome::Data(_)) => pipe.read_ready = true,
                Ok(RecvOutcome::WouldBlock) => return Ok(()),
                Ok(RecvOutcome::Closed) => {
                    self.process_frames(pipe)?;
                    return Err(PipeFailure::Closed);
                }
                Err(e) if ferrite_core::tcp::is_disconnect(&e) => return Err(PipeFailure::Closed),
                Err(e) => return Err(PipeFailure::Io(e)),
            }
        }
        self.process_frames(pipe)
    }

    fn process_frames(&mut self, pipe: &mut Pipe) -> std::result::Result<(), PipeFailure> {
        loop {
            if let Some(msg) = pipe.held.take() {
                if !self.deliver(pipe, msg) {
                    return Ok(());
                }
            }
            let frame = match pipe.decoder.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => return Ok(()),
                Err(e) => return Err(PipeFailure::Protocol(e.to_string())),
            };

            if frame.is_command() {
                if pipe.multipart.in_progress() {
                    return Err(PipeFailure::Protocol(
                        "command frame inside a multipart message".into(),
                    ));
                }
                let cmd = Command::parse(&frame.payload)
                    .map_err(|e| PipeFailure::Protocol(e.to_string()))?;
                self.on_command(pipe, cmd)?;
                continue;
            }

            if !pipe.greeted {
                return Err(PipeFailure::Handshake("data before greeting".into()));
            }
            match pipe.multipart.push_frame(frame) {
                Ok(Some(msg)) => {
                    if !self.deliver(pipe, msg) {
                        return Ok(());
                    }
                }
                Ok(None) => {}
                Err(e) => return Err(PipeFailure::Protocol(e.to_string())),
            }
        }
    }

    fn on_command(&mut self, pipe: &mut Pipe, cmd: Command) -> std::result::Result<(), PipeFailure> {
        match cmd {
            Command::Hello {
                socket_type,
                identity,
            } => {
                if pipe.greeted {
                    return Err(PipeFailure::Protocol("duplicate greeting".into()));
                }
                if !self.shared.socket_type.is_compatible(socket_type) {
                    return Err(PipeFailure::Handshake(format!(
                        "{} cannot talk to {socket_type}",
                        self.shared.socket_type
                    )));
                }
                pipe.greeted = true;
                pipe.peer_type = Some(socket_type);
                pipe.peer_identity = identity;
                pipe.handshake_deadline = None;
                self.engine.attach(pipe);
                if self.drain.is_none() {
                    self.shared.set_state(SocketState::Ready);
                }
                if let Some(c) = pipe.connector.and_then(|id| self.connectors.get_mut(&id)) {
                    c.backoff.reset();
                    c.exhausted = false;
                }
                debug!(socket = self.id(), pipe = pipe.id, peer = %socket_type, "[SOCKET] greeting complete");
                if pipe.role == Role::Initiator {
                    self.emit(SocketEvent::Connected(pipe.endpoint.clone()));
                }
                Ok(())
            }
            other => {
                if !pipe.greeted {
                    return Err(PipeFailure::Handshake("command before greeting".into()));
                }
                self.engine.command(pipe.id, other);
                Ok(())
            }
        }
    }

    /// Queue a complete message for the application. Returns `false` and
    /// parks the message on the pipe when the inbound queue is full.
    fn deliver(&mut self, pipe: &mut Pipe, msg: Message) -> bool {
        let mut q = self.shared.lock();
        if q.closed {
            return true;
        }
        if !q.has_recv_room() {
            trace!(socket = self.id(), pipe = pipe.id, "[SOCKET] inbound queue full, pausing reads");
            pipe.held = Some(msg);
            pipe.stalled = true;
            q.reader_stalled = true;
            return false;
        }
        if let Some(delivery) = self.engine.deliver(pipe.id, msg) {
            q.inbound.push_back(delivery);
            self.shared.notify_readable(&q);
        }
        true
    }

    // ---- outbound ---------------------------------------------------------

    /// Move queued messages into pipes. Returns `true` if progress was made
    /// and messages remain.
    fn route_outbound(&mut self) -> bool {
        let mut q = self.shared.lock();
        let mut moved = false;
        while let Some(out) = q.outbound.pop_front() {
            match self.engine.route(out, &mut self.pipes, &self.shared.stats) {
                Route::Sent | Route::Dropped => moved = true,
                Route::Blocked(out) => {
                    q.outbound.push_front(out);
                    break;
                }
            }
        }
        if moved {
            self.shared.notify_writable(&q);
        }
        moved && !q.outbound.is_empty()
    }

    fn flush_pipes(&mut self, io: &mut IoCtx<'_>) {
        let mut failed: SmallVec<[(PipeId, io::Error); 4]> = SmallVec::new();
        for (id, pipe) in &mut self.pipes {
            if let Err(e) = pipe.flush() {
                failed.push((*id, e));
            }
        }
        for (id, e) in failed {
            let failure = if ferrite_core::tcp::is_disconnect(&e) {
                PipeFailure::Closed
            } else {
                PipeFailure::Io(e)
            };
            self.fail_pipe(id, failure, io);
        }
    }

    /// Acknowledge pump requests and resume pipes paused on a full inbound
    /// queue once the application has made room. Anything the application
    /// changes after this point raises a fresh pump.
    fn take_wakeups(&mut self) {
        let resume = {
            let mut q = self.shared.lock();
            q.pump_requested = false;
            !q.reader_stalled
        };
        if !resume {
            return;
        }
        for pipe in self.pipes.values_mut().filter(|p| p.stalled) {
            pipe.stalled = false;
            pipe.read_ready = true;
        }
    }

    // ---- per-iteration work -----------------------------------------------

    /// Accept inproc peers, read, route, write, and report whether the
    /// socket is done.
    pub(crate) fn service(&mut self, io: &mut IoCtx<'_>) -> Progress {
        let inproc_listeners: SmallVec<[u64; 4]> = self
            .listeners
            .iter()
            .filter(|(_, b)| b.listener.is_inproc())
            .map(|(id, _)| *id)
            .collect();
        for id in inproc_listeners {
            self.accept_all(id, io);
        }

        self.take_wakeups();
        self.read_pipes(io);
        for _ in 0..PUMP_ROUNDS {
            let more = self.route_outbound();
            self.flush_pipes(io);
            if !more {
                break;
            }
        }
        self.fail_stranded_request();
        self.refresh_state();
        self.check_drained(io)
    }

    pub(crate) fn fire_timers(&mut self, io: &mut IoCtx<'_>) {
        let now = io.now;
        let due: SmallVec<[u64; 4]> = self
            .connectors
            .iter_mut()
            .filter_map(|(id, c)| c.backoff.take_due(now).then_some(*id))
            .collect();
        for id in due {
            self.attempt_connect(id, io);
        }

        let expired: SmallVec<[PipeId; 4]> = self
            .pipes
            .iter()
            .filter(|(_, p)| p.handshake_deadline.is_some_and(|d| d <= now))
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            self.fail_pipe(id, PipeFailure::Handshake("greeting timed out".into()), io);
        }
    }

    /// Earliest instant this socket needs the reactor to wake up.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        let connectors = self.connectors.values().filter_map(|c| c.backoff.deadline());
        let handshakes = self.pipes.values().filter_map(|p| p.handshake_deadline);
        let drain = self.drain.as_ref().and_then(|d| d.deadline);
        connectors.chain(handshakes).chain(drain).min()
    }

    /// A pipe still has unread input and must be serviced without waiting.
    pub(crate) fn is_busy(&self) -> bool {
        self.pipes.values().any(|p| p.wants_read() && p.read_ready)
    }

    fn refresh_state(&self) {
        let state = if self.drain.is_some() {
            SocketState::Draining
        } else if self.pipes.values().any(|p| p.greeted) {
            SocketState::Ready
        } else if self.connectors.values().any(|c| !c.exhausted) {
            SocketState::Connecting
        } else {
            SocketState::Idle
        };
        self.shared.set_state(state);
    }

    fn discard_all(&mut self) {
        let queued = {
            let mut q = self.shared.lock();
            let n = q.outbound.len() as u64;
            q.outbound.clear();
            self.shared.notify_writable(&q);
            n
        };
        let in_pipes: u64 = self.pipes.values_mut().map(|p| p.out.clear()).sum();
        self.shared.stats.add_discarded(queued + in_pipes);
        if let Some(drain) = &mut self.drain {
            drain.deadline = None;
        }
    }

    fn check_drained(&mut self, io: &mut IoCtx<'_>) -> Progress {
        let Some(drain) = &self.drain else {
            return Progress::Running;
        };
        let pending = !self.shared.lock().outbound.is_empty()
            || self.pipes.values().any(|p| p.out.data_len() > 0);
        if pending {
            match drain.deadline {
                Some(deadline) if deadline > io.now => return Progress::Running,
                _ => {
                    debug!(socket = self.id(), "[SOCKET] linger expired, discarding");
                    self.discard_all();
                }
            }
        }
        self.finish(io);
        Progress::Finished
    }

    fn finish(&mut self, io: &mut IoCtx<'_>) {
        for (_, bound) in self.listeners.drain() {
            close_listener(bound, io);
        }
        for (_, mut pipe) in self.pipes.drain() {
            if let Some(token) = pipe.token.take() {
                let _ = pipe.conn.deregister(io.registry);
                io.tokens.release(token);
            }
        }
        self.connectors.clear();
        self.shared.set_state(SocketState::Closed);
        self.emit(SocketEvent::Closed);
        debug!(socket = self.id(), stats = ?self.shared.stats.snapshot(), "[SOCKET] closed");
    }
}

fn close_listener(bound: Bound, io: &mut IoCtx<'_>) {
    if let Some(token) = bound.token {
        io.tokens.release(token);
    }
    bound.listener.close(io.registry, io.inproc);
}
