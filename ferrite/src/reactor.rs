//! I/O reactor: one `mio` poll loop per thread.
//!
//! Sockets are pinned to a reactor for their whole life. Application threads
//! talk to it through a command channel paired with a [`Waker`]; the reactor
//! owns every connection, listener and routing table of its sockets.

use crate::driver::{IoCtx, Progress, SocketDriver};
use crate::queue::{Shared, SocketId};
use bytes::Bytes;
use ferrite_core::endpoint::Endpoint;
use ferrite_core::error::{Error, Result};
use ferrite_core::inproc::{InprocRegistry, Notify};
use ferrite_core::monitor::SocketEventSender;
use ferrite_core::options::SocketOptions;
use flume::{Receiver, Sender, TryRecvError};
use hashbrown::HashMap;
use mio::event::Event;
use mio::{Events, Poll, Token, Waker};
use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

const WAKER: Token = Token(usize::MAX);
const EVENT_CAPACITY: usize = 1024;
const SCRATCH_SIZE: usize = 64 * 1024;

/// Requests from application threads.
pub(crate) enum Command {
    AddSocket {
        shared: Arc<Shared>,
        options: SocketOptions,
    },
    Bind {
        socket: SocketId,
        endpoint: Endpoint,
        reply: Sender<Result<Endpoint>>,
    },
    Unbind {
        socket: SocketId,
        endpoint: Endpoint,
        reply: Sender<Result<()>>,
    },
    Connect {
        socket: SocketId,
        endpoint: Endpoint,
        reply: Sender<Result<()>>,
    },
    Disconnect {
        socket: SocketId,
        endpoint: Endpoint,
        reply: Sender<Result<()>>,
    },
    Subscribe {
        socket: SocketId,
        prefix: Bytes,
    },
    Unsubscribe {
        socket: SocketId,
        prefix: Bytes,
    },
    Monitor {
        socket: SocketId,
        events: SocketEventSender,
    },
    /// Wake-up only: queues changed and need servicing.
    Pump(SocketId),
    Close {
        socket: SocketId,
        linger: Option<Duration>,
    },
    Shutdown,
}

/// Sending half of a reactor's control plane.
#[derive(Clone)]
pub(crate) struct ReactorHandle {
    commands: Sender<Command>,
    waker: Arc<Waker>,
}

impl ReactorHandle {
    pub(crate) fn send(&self, cmd: Command) -> Result<()> {
        self.commands.send(cmd).map_err(|_| Error::Terminated)?;
        self.waker.wake()?;
        Ok(())
    }

    /// Send a command and block for its reply.
    pub(crate) fn request<T>(&self, build: impl FnOnce(Sender<Result<T>>) -> Command) -> Result<T> {
        let (tx, rx) = flume::bounded(1);
        self.send(build(tx))?;
        rx.recv().map_err(|_| Error::Terminated)?
    }
}

/// Readiness reported by `mio` for one token.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Readiness {
    pub readable: bool,
    pub writable: bool,
    pub closed: bool,
    pub error: bool,
}

impl From<&Event> for Readiness {
    fn from(event: &Event) -> Self {
        Self {
            readable: event.is_readable(),
            writable: event.is_writable(),
            closed: event.is_read_closed() || event.is_write_closed(),
            error: event.is_error(),
        }
    }
}

/// Maps poll tokens back to the socket and object that own them.
#[derive(Debug)]
pub(crate) struct TokenTable {
    next: u64,
    owners: HashMap<Token, (SocketId, u64)>,
}

impl Default for TokenTable {
    fn default() -> Self {
        Self {
            next: 1,
            owners: HashMap::new(),
        }
    }
}

impl TokenTable {
    /// Allocate an id for a listener, connector or pipe.
    pub(crate) fn next_id(&mut self) -> u64 {
        let id = self.next;
        self.next += 1;
        id
    }

    pub(crate) fn register(&mut self, socket: SocketId, id: u64) -> Token {
        let token = Token(id as usize);
        self.owners.insert(token, (socket, id));
        token
    }

    pub(crate) fn release(&mut self, token: Token) {
        self.owners.remove(&token);
    }

    pub(crate) fn owner(&self, token: Token) -> Option<(SocketId, u64)> {
        self.owners.get(&token).copied()
    }
}

#[derive(Default)]
struct LiveState {
    sockets: HashMap<SocketId, Arc<Shared>>,
    terminated: bool,
}

/// Sockets of a context that have not finished closing.
#[derive(Default)]
pub(crate) struct LiveSockets {
    state: Mutex<LiveState>,
    emptied: Condvar,
}

impl LiveSockets {
    /// Track a new socket. Fails once termination has started or the
    /// context is at capacity.
    pub(crate) fn insert(&self, shared: Arc<Shared>, max: usize) -> Result<()> {
        let mut state = self.state.lock();
        if state.terminated {
            return Err(Error::Terminated);
        }
        if state.sockets.len() >= max {
            return Err(Error::exhausted(format!("socket limit of {max} reached")));
        }
        state.sockets.insert(shared.id, shared);
        Ok(())
    }

    pub(crate) fn remove(&self, id: SocketId) {
        let mut state = self.state.lock();
        state.sockets.remove(&id);
        if state.sockets.is_empty() {
            self.emptied.notify_all();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().sockets.len()
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.state.lock().terminated
    }

    /// Flip to terminated and return the sockets to close, or `None` if
    /// termination already started.
    pub(crate) fn begin_terminate(&self) -> Option<Vec<Arc<Shared>>> {
        let mut state = self.state.lock();
        if state.terminated {
            return None;
        }
        state.terminated = true;
        Some(state.sockets.values().cloned().collect())
    }

    pub(crate) fn wait_empty(&self) {
        let mut state = self.state.lock();
        while !state.sockets.is_empty() {
            self.emptied.wait(&mut state);
        }
    }
}

struct Reactor {
    index: usize,
    poll: Poll,
    events: Events,
    ready: Vec<(Token, Readiness)>,
    commands: Receiver<Command>,
    sockets: HashMap<SocketId, SocketDriver>,
    tokens: TokenTable,
    inproc: Arc<InprocRegistry>,
    notify: Notify,
    scratch: Vec<u8>,
    live: Arc<LiveSockets>,
}

/// Start reactor thread `index`.
pub(crate) fn spawn(
    index: usize,
    inproc: Arc<InprocRegistry>,
    live: Arc<LiveSockets>,
) -> io::Result<(ReactorHandle, JoinHandle<()>)> {
    let poll = Poll::new()?;
    let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);
    let (tx, rx) = flume::unbounded();

    let inproc_waker = Arc::clone(&waker);
    let notify: Notify = Arc::new(move || {
        let _ = inproc_waker.wake();
    });

    let reactor = Reactor {
        index,
        poll,
        events: Events::with_capacity(EVENT_CAPACITY),
        ready: Vec::with_capacity(EVENT_CAPACITY),
        commands: rx,
        sockets: HashMap::new(),
        tokens: TokenTable::default(),
        inproc,
        notify,
        scratch: vec![0; SCRATCH_SIZE],
        live,
    };
    let thread = thread::Builder::new()
        .name(format!("ferrite-io-{index}"))
        .spawn(move || reactor.run())?;
    Ok((
        ReactorHandle {
            commands: tx,
            waker,
        },
        thread,
    ))
}

/// Split the reactor into the driver map and the context drivers borrow.
macro_rules! io_ctx {
    ($reactor:expr, $now:expr) => {{
        let Reactor {
            poll,
            sockets,
            tokens,
            inproc,
            notify,
            scratch,
            ..
        } = &mut *$reactor;
        (
            sockets,
            IoCtx {
                registry: poll.registry(),
                tokens,
                inproc: &**inproc,
                notify: &*notify,
                scratch: &mut scratch[..],
                now: $now,
            },
        )
    }};
}

impl Reactor {
    fn run(mut self) {
        debug!(reactor = self.index, "[REACTOR] started");
        loop {
            let timeout = self.poll_timeout();
            if let Err(e) = self.poll.poll(&mut self.events, timeout) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                warn!(reactor = self.index, error = %e, "[REACTOR] poll failed");
                break;
            }

            let now = Instant::now();
            let mut ready = std::mem::take(&mut self.ready);
            ready.extend(
                self.events
                    .iter()
                    .filter(|e| e.token() != WAKER)
                    .map(|e| (e.token(), Readiness::from(e))),
            );
            for (token, readiness) in ready.drain(..) {
                self.dispatch(token, readiness, now);
            }
            self.ready = ready;

            if !self.drain_commands(now) {
                break;
            }
            self.service(Instant::now());
        }
        self.shutdown();
        debug!(reactor = self.index, "[REACTOR] stopped");
    }

    fn poll_timeout(&self) -> Option<Duration> {
        if self.sockets.values().any(SocketDriver::is_busy) {
            return Some(Duration::ZERO);
        }
        let now = Instant::now();
        self.sockets
            .values()
            .filter_map(SocketDriver::next_deadline)
            .min()
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    fn dispatch(&mut self, token: Token, readiness: Readiness, now: Instant) {
        let Some((socket, id)) = self.tokens.owner(token) else {
            trace!(?token, "[REACTOR] event for released token");
            return;
        };
        let (sockets, mut io) = io_ctx!(self, now);
        if let Some(driver) = sockets.get_mut(&socket) {
            driver.on_event(id, readiness, &mut io);
        }
    }

    /// Apply queued commands. Returns `false` on shutdown.
    fn drain_commands(&mut self, now: Instant) -> bool {
        loop {
            let cmd = match self.commands.try_recv() {
                Ok(cmd) => cmd,
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            };
            if let Command::Shutdown = cmd {
                return false;
            }
            self.apply(cmd, now);
        }
    }

    fn apply(&mut self, cmd: Command, now: Instant) {
        let index = self.index;
        let (sockets, mut io) = io_ctx!(self, now);
        match cmd {
            Command::AddSocket { shared, options } => {
                let id = shared.id;
                let closed = {
                    let q = shared.lock();
                    q.closed.then_some(q.linger)
                };
                let mut driver = SocketDriver::new(shared, options);
                if let Some(linger) = closed {
                    driver.begin_close(linger, &mut io);
                }
                trace!(reactor = index, socket = id, "[REACTOR] socket added");
                sockets.insert(id, driver);
            }
            Command::Bind {
                socket,
                endpoint,
                reply,
            } => {
                let result = match sockets.get_mut(&socket) {
                    Some(driver) => driver.bind(endpoint, &mut io),
                    None => Err(Error::Closed),
                };
                let _ = reply.send(result);
            }
            Command::Unbind {
                socket,
                endpoint,
                reply,
            } => {
                let result = match sockets.get_mut(&socket) {
                    Some(driver) => driver.unbind(&endpoint, &mut io),
                    None => Err(Error::Closed),
                };
                let _ = reply.send(result);
            }
            Command::Connect {
                socket,
                endpoint,
                reply,
            } => {
                let result = match sockets.get_mut(&socket) {
                    Some(driver) => driver.connect(endpoint, &mut io),
                    None => Err(Error::Closed),
                };
                let _ = reply.send(result);
            }
            Command::Disconnect {
                socket,
                endpoint,
                reply,
            } => {
                let result = match sockets.get_mut(&socket) {
                    Some(driver) => driver.disconnect(&endpoint, &mut io),
                    None => Err(Error::Closed),
                };
                let _ = reply.send(result);
            }
            Command::Subscribe { socket, prefix } => {
                if let Some(driver) = sockets.get_mut(&socket) {
                    driver.subscribe(prefix);
                }
            }
            Command::Unsubscribe { socket, prefix } => {
                if let Some(driver) = sockets.get_mut(&socket) {
                    driver.unsubscribe(prefix);
                }
            }
            Command::Monitor { socket, events } => {
                if let Some(driver) = sockets.get_mut(&socket) {
                    driver.set_monitor(events);
                }
            }
            Command::Pump(_) => {}
            Command::Close { socket, linger } => {
                if let Some(driver) = sockets.get_mut(&socket) {
                    driver.begin_close(linger, &mut io);
                }
            }
            Command::Shutdown => {}
        }
    }

    fn service(&mut self, now: Instant) {
        let live = Arc::clone(&self.live);
        let (sockets, mut io) = io_ctx!(self, now);
        let mut finished: SmallVec<[SocketId; 4]> = SmallVec::new();
        for (id, driver) in sockets.iter_mut() {
            driver.fire_timers(&mut io);
            if driver.service(&mut io) == Progress::Finished {
                finished.push(*id);
            }
        }
        for id in finished {
            sockets.remove(&id);
            live.remove(id);
        }
    }

    fn shutdown(&mut self) {
        let live = Arc::clone(&self.live);
        let (sockets, mut io) = io_ctx!(self, Instant::now());
        for (id, mut driver) in sockets.drain() {
            driver.force_close(&mut io);
            live.remove(id);
        }
    }
}
