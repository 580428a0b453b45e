//! In-process transport plumbing.
//!
//! The inproc transport connects sockets living in the same context through
//! bounded in-memory channels, without TCP/IP overhead.
//!
//! # Features
//!
//! - **Zero-copy**: encoded chunks are handed over as refcounted `Bytes`
//! - **Thread-safe**: the registry is a `DashMap` shared by all reactors
//! - **Wake-aware**: every send (and every drop) runs the peer's notify hook,
//!   so a reactor parked in `poll` notices new data or a closed peer
//!
//! # Usage
//!
//! ```rust
//! use ferrite_core::inproc::{InprocRegistry, InprocRecv, InprocSend};
//! use bytes::Bytes;
//! use std::sync::Arc;
//!
//! let registry = InprocRegistry::new(16);
//! let listener = registry.bind("jobs", Arc::new(|| {})).unwrap();
//! let client = registry.connect("jobs", Arc::new(|| {})).unwrap();
//! let server = listener.accept().unwrap();
//!
//! assert!(matches!(client.try_send(Bytes::from("hi")), InprocSend::Sent));
//! assert!(matches!(server.try_recv(), InprocRecv::Data(_)));
//! ```

use crate::endpoint::EndpointError;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use flume::{Receiver, Sender, TryRecvError, TrySendError};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Hook invoked to wake the reactor owning the other end of a pipe.
pub type Notify = Arc<dyn Fn() + Send + Sync>;

/// Outcome of a non-blocking pipe send.
#[derive(Debug)]
pub enum InprocSend {
    Sent,
    /// Pipe is at capacity; the chunk is handed back.
    Full(Bytes),
    Disconnected,
}

/// Outcome of a non-blocking pipe receive.
#[derive(Debug)]
pub enum InprocRecv {
    Data(Bytes),
    Empty,
    Disconnected,
}

/// One end of a bidirectional in-process connection.
pub struct InprocPipe {
    tx: Sender<Bytes>,
    rx: Receiver<Bytes>,
    notify_peer: Notify,
}

impl InprocPipe {
    /// Try to hand a chunk to the peer.
    pub fn try_send(&self, chunk: Bytes) -> InprocSend {
        match self.tx.try_send(chunk) {
            Ok(()) => {
                (self.notify_peer)();
                InprocSend::Sent
            }
            Err(TrySendError::Full(chunk)) => InprocSend::Full(chunk),
            Err(TrySendError::Disconnected(_)) => InprocSend::Disconnected,
        }
    }

    /// Try to take the next chunk sent by the peer.
    pub fn try_recv(&self) -> InprocRecv {
        match self.rx.try_recv() {
            Ok(chunk) => {
                // Freed capacity may unblock the peer's writer.
                (self.notify_peer)();
                InprocRecv::Data(chunk)
            }
            Err(TryRecvError::Empty) => InprocRecv::Empty,
            Err(TryRecvError::Disconnected) => InprocRecv::Disconnected,
        }
    }

    /// Whether the peer can currently accept another chunk.
    pub fn has_capacity(&self) -> bool {
        !self.tx.is_full()
    }
}

impl Drop for InprocPipe {
    fn drop(&mut self) {
        // Let the peer observe the disconnect on its next cycle.
        (self.notify_peer)();
    }
}

impl fmt::Debug for InprocPipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InprocPipe")
            .field("queued_out", &self.tx.len())
            .field("queued_in", &self.rx.len())
            .finish()
    }
}

/// Accepting side of a bound inproc name.
#[derive(Debug)]
pub struct InprocListener {
    name: String,
    incoming: Receiver<InprocPipe>,
}

impl InprocListener {
    /// Take the next pending connection, if any.
    pub fn accept(&self) -> Option<InprocPipe> {
        self.incoming.try_recv().ok()
    }

    /// Bound name (without the `inproc://` prefix).
    pub fn name(&self) -> &str {
        &self.name
    }
}

struct Binding {
    connect_tx: Sender<InprocPipe>,
    notify: Notify,
}

/// Registry of bound inproc names, shared by every reactor of a context.
pub struct InprocRegistry {
    endpoints: DashMap<String, Binding>,
    capacity: usize,
}

impl InprocRegistry {
    /// Create a registry whose pipes buffer up to `capacity` chunks per direction.
    pub fn new(capacity: usize) -> Self {
        Self {
            endpoints: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Bind a name. `notify` wakes the reactor that owns the listener.
    ///
    /// # Errors
    ///
    /// Returns `AddrInUse` if the name is already bound.
    pub fn bind(&self, name: &str, notify: Notify) -> Result<InprocListener, EndpointError> {
        let (connect_tx, incoming) = flume::unbounded();
        match self.endpoints.entry(name.to_string()) {
            Entry::Occupied(_) => Err(EndpointError::AddrInUse(format!("inproc://{name}"))),
            Entry::Vacant(slot) => {
                slot.insert(Binding { connect_tx, notify });
                debug!(name, "[INPROC] bound");
                Ok(InprocListener {
                    name: name.to_string(),
                    incoming,
                })
            }
        }
    }

    /// Connect to a bound name. `notify` wakes the connecting reactor.
    ///
    /// # Errors
    ///
    /// Returns `NotBound` if nothing is bound under `name`.
    pub fn connect(&self, name: &str, notify: Notify) -> Result<InprocPipe, EndpointError> {
        let (connect_tx, listener_notify) = match self.endpoints.get(name) {
            Some(binding) => (binding.connect_tx.clone(), binding.notify.clone()),
            None => return Err(EndpointError::NotBound(format!("inproc://{name}"))),
        };

        let (to_listener, from_connector) = flume::bounded(self.capacity);
        let (to_connector, from_listener) = flume::bounded(self.capacity);

        let accepted = InprocPipe {
            tx: to_connector,
            rx: from_connector,
            notify_peer: notify,
        };
        if connect_tx.send(accepted).is_err() {
            self.endpoints.remove(name);
            return Err(EndpointError::NotBound(format!("inproc://{name}")));
        }
        listener_notify();

        Ok(InprocPipe {
            tx: to_listener,
            rx: from_listener,
            notify_peer: listener_notify,
        })
    }

    /// Remove a bound name. Returns `false` if it was not bound.
    pub fn unbind(&self, name: &str) -> bool {
        self.endpoints.remove(name).is_some()
    }

    /// List all currently bound names.
    pub fn names(&self) -> Vec<String> {
        self.endpoints.iter().map(|entry| entry.key().clone()).collect()
    }
}

impl fmt::Debug for InprocRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InprocRegistry")
            .field("names", &self.names())
            .field("capacity", &self.capacity)
            .finish()
    }
}
