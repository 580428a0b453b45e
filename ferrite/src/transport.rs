//! Transport layer: one surface over TCP, IPC and inproc carriers.
//!
//! Stream transports are non-blocking `mio` sockets registered with the
//! reactor's poll. Inproc pipes are not registered anywhere; the reactor
//! services them every iteration and their peers wake it through the
//! registry's notify hook.

use bytes::Bytes;
use ferrite_core::endpoint::{Endpoint, EndpointError};
use ferrite_core::error::{Error, Result};
use ferrite_core::inproc::{InprocListener, InprocPipe, InprocRecv, InprocRegistry, InprocSend, Notify};
use ferrite_core::options::SocketOptions;
use ferrite_core::tcp;
use ferrite_wire::codec::FrameDecoder;
use mio::net::{TcpListener, TcpStream};
#[cfg(unix)]
use mio::net::{UnixListener, UnixStream};
use mio::{Interest, Registry, Token};
use std::io::{self, IoSlice, Read, Write};
#[cfg(unix)]
use std::path::PathBuf;

/// Result of a non-blocking write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SendOutcome {
    Sent(usize),
    WouldBlock,
}

/// Result of a non-blocking read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RecvOutcome {
    /// Bytes fed to the decoder.
    Data(usize),
    WouldBlock,
    /// Orderly shutdown by the peer.
    Closed,
}

/// A live (or still connecting) transport channel.
#[derive(Debug)]
pub(crate) enum Connection {
    Tcp(TcpStream),
    #[cfg(unix)]
    Ipc(UnixStream),
    Inproc(InprocPipe),
}

impl Connection {
    /// Start connecting to `endpoint`. Stream connects complete later; the
    /// reactor learns the outcome from a writable event.
    pub(crate) fn connect(
        endpoint: &Endpoint,
        inproc: &InprocRegistry,
        notify: &Notify,
    ) -> Result<Self> {
        match endpoint {
            Endpoint::Tcp(addr) => Ok(Self::Tcp(TcpStream::connect(*addr)?)),
            #[cfg(unix)]
            Endpoint::Ipc(path) => Ok(Self::Ipc(UnixStream::connect(path)?)),
            Endpoint::Inproc(name) => Ok(Self::Inproc(inproc.connect(name, notify.clone())?)),
        }
    }

    pub(crate) fn is_inproc(&self) -> bool {
        matches!(self, Self::Inproc(_))
    }

    pub(crate) fn register(&mut self, registry: &Registry, token: Token) -> io::Result<()> {
        let interest = Interest::READABLE | Interest::WRITABLE;
        match self {
            Self::Tcp(stream) => registry.register(stream, token, interest),
            #[cfg(unix)]
            Self::Ipc(stream) => registry.register(stream, token, interest),
            Self::Inproc(_) => Ok(()),
        }
    }

    pub(crate) fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => registry.deregister(stream),
            #[cfg(unix)]
            Self::Ipc(stream) => registry.deregister(stream),
            Self::Inproc(_) => Ok(()),
        }
    }

    /// Check a pending stream connect after a writable or error event.
    ///
    /// `Ok(true)` once established, `Ok(false)` while still in progress.
    pub(crate) fn finish_connect(&self) -> io::Result<bool> {
        let peer = match self {
            Self::Tcp(stream) => {
                if let Some(err) = stream.take_error()? {
                    return Err(err);
                }
                stream.peer_addr().map(|_| ())
            }
            #[cfg(unix)]
            Self::Ipc(stream) => {
                if let Some(err) = stream.take_error()? {
                    return Err(err);
                }
                stream.peer_addr().map(|_| ())
            }
            Self::Inproc(_) => Ok(()),
        };
        match peer {
            Ok(()) => Ok(true),
            Err(e) if matches!(e.kind(), io::ErrorKind::NotConnected | io::ErrorKind::WouldBlock) => {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Apply stream tuning once connected.
    pub(crate) fn configure(&self, options: &SocketOptions) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => tcp::configure_stream(stream, options.tcp_keepalive),
            _ => Ok(()),
        }
    }

    /// Write one chunk.
    pub(crate) fn send(&mut self, chunk: &Bytes) -> io::Result<SendOutcome> {
        match self {
            Self::Tcp(stream) => write_stream(stream, &[IoSlice::new(chunk)]),
            #[cfg(unix)]
            Self::Ipc(stream) => write_stream(stream, &[IoSlice::new(chunk)]),
            Self::Inproc(pipe) => match pipe.try_send(chunk.clone()) {
                InprocSend::Sent => Ok(SendOutcome::Sent(chunk.len())),
                InprocSend::Full(_) => Ok(SendOutcome::WouldBlock),
                InprocSend::Disconnected => Err(io::ErrorKind::BrokenPipe.into()),
            },
        }
    }

    /// Gathered write for stream transports.
    pub(crate) fn send_vectored(&mut self, slices: &[IoSlice<'_>]) -> io::Result<SendOutcome> {
        match self {
            Self::Tcp(stream) => write_stream(stream, slices),
            #[cfg(unix)]
            Self::Ipc(stream) => write_stream(stream, slices),
            Self::Inproc(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "inproc pipes carry whole chunks",
            )),
        }
    }

    /// Read what is available into `decoder`.
    pub(crate) fn receive(
        &mut self,
        decoder: &mut FrameDecoder,
        scratch: &mut [u8],
    ) -> io::Result<RecvOutcome> {
        match self {
            Self::Tcp(stream) => read_stream(stream, decoder, scratch),
            #[cfg(unix)]
            Self::Ipc(stream) => read_stream(stream, decoder, scratch),
            Self::Inproc(pipe) => Ok(match pipe.try_recv() {
                InprocRecv::Data(chunk) => {
                    decoder.feed(&chunk);
                    RecvOutcome::Data(chunk.len())
                }
                InprocRecv::Empty => RecvOutcome::WouldBlock,
                InprocRecv::Disconnected => RecvOutcome::Closed,
            }),
        }
    }
}

fn write_stream<W: Write>(stream: &mut W, slices: &[IoSlice<'_>]) -> io::Result<SendOutcome> {
    loop {
        match stream.write_vectored(slices) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => return Ok(SendOutcome::Sent(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(SendOutcome::WouldBlock),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

fn read_stream<R: Read>(
    stream: &mut R,
    decoder: &mut FrameDecoder,
    scratch: &mut [u8],
) -> io::Result<RecvOutcome> {
    loop {
        match stream.read(scratch) {
            Ok(0) => return Ok(RecvOutcome::Closed),
            Ok(n) => {
                decoder.feed(&scratch[..n]);
                return Ok(RecvOutcome::Data(n));
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(RecvOutcome::WouldBlock),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

/// A bound endpoint accepting connections.
#[derive(Debug)]
pub(crate) enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Ipc {
        listener: UnixListener,
        path: PathBuf,
    },
    Inproc(InprocListener),
}

impl Listener {
    /// Bind `endpoint`, returning the listener and the resolved endpoint
    /// (ephemeral TCP ports filled in).
    pub(crate) fn bind(
        endpoint: &Endpoint,
        options: &SocketOptions,
        inproc: &InprocRegistry,
        notify: &Notify,
    ) -> Result<(Self, Endpoint)> {
        let in_use = |e: io::Error| -> Error {
            if e.kind() == io::ErrorKind::AddrInUse {
                EndpointError::AddrInUse(endpoint.to_string()).into()
            } else {
                e.into()
            }
        };
        match endpoint {
            Endpoint::Tcp(addr) => {
                let std_listener = tcp::bind_listener(*addr, options.backlog).map_err(in_use)?;
                let local = std_listener.local_addr()?;
                Ok((
                    Self::Tcp(TcpListener::from_std(std_listener)),
                    Endpoint::Tcp(local),
                ))
            }
            #[cfg(unix)]
            Endpoint::Ipc(path) => {
                let std_listener = ferrite_core::ipc::bind_listener(path).map_err(in_use)?;
                Ok((
                    Self::Ipc {
                        listener: UnixListener::from_std(std_listener),
                        path: path.clone(),
                    },
                    endpoint.clone(),
                ))
            }
            Endpoint::Inproc(name) => {
                let listener = inproc.bind(name, notify.clone())?;
                Ok((Self::Inproc(listener), endpoint.clone()))
            }
        }
    }

    pub(crate) fn register(&mut self, registry: &Registry, token: Token) -> io::Result<()> {
        match self {
            Self::Tcp(listener) => registry.register(listener, token, Interest::READABLE),
            #[cfg(unix)]
            Self::Ipc { listener, .. } => registry.register(listener, token, Interest::READABLE),
            Self::Inproc(_) => Ok(()),
        }
    }

    pub(crate) fn is_inproc(&self) -> bool {
        matches!(self, Self::Inproc(_))
    }

    /// Accept one pending connection, if any.
    pub(crate) fn accept(&self) -> io::Result<Option<(Connection, Endpoint)>> {
        let accepted = match self {
            Self::Tcp(listener) => listener
                .accept()
                .map(|(stream, addr)| (Connection::Tcp(stream), Endpoint::Tcp(addr))),
            #[cfg(unix)]
            Self::Ipc { listener, path } => listener
                .accept()
                .map(|(stream, _)| (Connection::Ipc(stream), Endpoint::Ipc(path.clone()))),
            Self::Inproc(listener) => {
                return Ok(listener.accept().map(|pipe| {
                    (
                        Connection::Inproc(pipe),
                        Endpoint::Inproc(listener.name().to_string()),
                    )
                }));
            }
        };
        match accepted {
            Ok(pair) => Ok(Some(pair)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Stop listening and release the endpoint.
    pub(crate) fn close(mut self, registry: &Registry, inproc: &InprocRegistry) {
        let result = match &mut self {
            Self::Tcp(listener) => registry.deregister(listener),
            #[cfg(unix)]
            Self::Ipc { listener, .. } => registry.deregister(listener),
            Self::Inproc(listener) => {
                inproc.unbind(listener.name());
                Ok(())
            }
        };
        if let Err(e) = result {
            tracing::debug!(error = %e, "[LISTENER] deregister failed");
        }
        #[cfg(unix)]
        if let Self::Ipc { path, .. } = &self {
            ferrite_core::ipc::cleanup(path);
        }
    }
}
