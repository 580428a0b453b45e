//! Context: the owner of reactor threads and the inproc namespace.

use crate::queue::Shared;
use crate::reactor::{self, Command, LiveSockets, ReactorHandle};
use crate::socket::Socket;
use ferrite_core::error::{Error, Result};
use ferrite_core::inproc::InprocRegistry;
use ferrite_core::options::SocketOptions;
use ferrite_core::socket_type::SocketType;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, warn};

/// Context-wide settings.
#[derive(Debug, Clone)]
pub struct ContextOptions {
    /// Number of reactor threads. Sockets are spread across them.
    pub io_threads: usize,
    /// Upper bound on simultaneously open sockets.
    pub max_sockets: usize,
    /// Chunks buffered per direction of an inproc connection.
    pub inproc_capacity: usize,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            io_threads: 1,
            max_sockets: 1023,
            inproc_capacity: 1000,
        }
    }
}

impl ContextOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_io_threads(mut self, threads: usize) -> Self {
        self.io_threads = threads.max(1);
        self
    }

    pub fn with_max_sockets(mut self, max: usize) -> Self {
        self.max_sockets = max;
        self
    }

    pub fn with_inproc_capacity(mut self, capacity: usize) -> Self {
        self.inproc_capacity = capacity.max(1);
        self
    }
}

struct ContextInner {
    options: ContextOptions,
    reactors: Vec<ReactorHandle>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    live: Arc<LiveSockets>,
    next_id: AtomicU64,
    handles: AtomicUsize,
}

/// Socket factory and owner of the I/O threads.
///
/// Cloning is cheap and shares the same reactors and inproc namespace.
/// Dropping the last clone terminates the context.
///
/// ```no_run
/// use ferrite::{Context, SocketType};
///
/// # fn main() -> ferrite::Result<()> {
/// let ctx = Context::new()?;
/// let rep = ctx.socket(SocketType::Rep)?;
/// rep.bind("inproc://echo")?;
///
/// let req = ctx.socket(SocketType::Req)?;
/// req.connect("inproc://echo")?;
/// req.send("ping")?;
///
/// let request = rep.recv()?;
/// rep.send(request)?;
/// assert_eq!(req.recv()?.first().map(|f| &f[..]), Some(&b"ping"[..]));
/// # Ok(())
/// # }
/// ```
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    pub fn new() -> Result<Self> {
        Self::with_options(ContextOptions::default())
    }

    pub fn with_options(options: ContextOptions) -> Result<Self> {
        let inproc = Arc::new(InprocRegistry::new(options.inproc_capacity));
        let live = Arc::new(LiveSockets::default());
        let threads = options.io_threads.max(1);

        let mut reactors = Vec::with_capacity(threads);
        let mut joins = Vec::with_capacity(threads);
        for index in 0..threads {
            match reactor::spawn(index, Arc::clone(&inproc), Arc::clone(&live)) {
                Ok((handle, join)) => {
                    reactors.push(handle);
                    joins.push(join);
                }
                Err(e) => {
                    for handle in &reactors {
                        let _ = handle.send(Command::Shutdown);
                    }
                    for join in joins {
                        let _ = join.join();
                    }
                    return Err(e.into());
                }
            }
        }
        debug!(io_threads = threads, "[CONTEXT] created");

        Ok(Self {
            inner: Arc::new(ContextInner {
                options,
                reactors,
                threads: Mutex::new(joins),
                live,
                next_id: AtomicU64::new(1),
                handles: AtomicUsize::new(1),
            }),
        })
    }

    pub fn options(&self) -> &ContextOptions {
        &self.inner.options
    }

    /// Create a socket with default options.
    pub fn socket(&self, socket_type: SocketType) -> Result<Socket> {
        self.socket_with_options(socket_type, SocketOptions::default())
    }

    pub fn socket_with_options(
        &self,
        socket_type: SocketType,
        options: SocketOptions,
    ) -> Result<Socket> {
        if let Some(id) = &options.routing_id {
            SocketOptions::validate_routing_id(id)?;
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::new(Shared::new(id, socket_type, &options));
        self.inner
            .live
            .insert(Arc::clone(&shared), self.inner.options.max_sockets)?;

        let reactor = self.reactor_for(id).clone();
        let registered = reactor.send(Command::AddSocket {
            shared: Arc::clone(&shared),
            options,
        });
        if let Err(e) = registered {
            self.inner.live.remove(id);
            return Err(e);
        }
        debug!(socket = id, %socket_type, "[CONTEXT] socket created");
        Ok(Socket::new(shared, reactor))
    }

    fn reactor_for(&self, id: u64) -> &ReactorHandle {
        let reactors = &self.inner.reactors;
        &reactors[(id as usize) % reactors.len()]
    }

    /// Number of sockets not yet fully closed.
    pub fn socket_count(&self) -> usize {
        self.inner.live.len()
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.live.is_terminated()
    }

    /// Close every socket, wait for each to flush or hit its linger, then
    /// stop the reactors.
    ///
    /// Blocked calls on this context's sockets fail with
    /// [`Error::Cancelled`]; new sockets fail with [`Error::Terminated`].
    /// Calling it again is a no-op.
    pub fn terminate(&self) {
        let Some(sockets) = self.inner.live.begin_terminate() else {
            return;
        };
        debug!(sockets = sockets.len(), "[CONTEXT] terminating");
        for shared in sockets {
            if let Some(linger) = shared.mark_closed() {
                let sent = self.reactor_for(shared.id).send(Command::Close {
                    socket: shared.id,
                    linger,
                });
                if sent.is_err() {
                    self.inner.live.remove(shared.id);
                }
            }
        }
        self.inner.live.wait_empty();

        for reactor in &self.inner.reactors {
            if let Err(e) = reactor.send(Command::Shutdown) {
                if !matches!(e, Error::Terminated) {
                    warn!(error = %e, "[CONTEXT] failed to stop reactor");
                }
            }
        }
        for join in self.inner.threads.lock().drain(..) {
            if join.join().is_err() {
                warn!("[CONTEXT] reactor thread panicked");
            }
        }
        debug!("[CONTEXT] terminated");
    }
}

impl Clone for Context {
    fn clone(&self) -> Self {
        self.inner.handles.fetch_add(1, Ordering::Relaxed);
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        if self.inner.handles.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.terminate();
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("options", &self.inner.options)
            .field("sockets", &self.socket_count())
            .field("terminated", &self.is_terminated())
            .finish()
    }
}
