//! `transport://address` strings.
//!
//! Three transports are understood: `tcp://host:port`, `ipc://path` (Unix
//! only) and `inproc://name`. A TCP host of `*` means every interface and
//! host names are resolved once, at parse time.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs};
#[cfg(unix)]
use std::path::PathBuf;
use std::str::FromStr;

/// A parsed address a socket can bind or connect to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Tcp(SocketAddr),
    /// Filesystem path of a Unix domain socket.
    #[cfg(unix)]
    Ipc(PathBuf),
    /// Name in the context's in-process registry.
    Inproc(String),
}

/// Why an endpoint string was refused, or why binding/unbinding it failed.
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error("unsupported transport in {0:?}; use tcp://, ipc:// or inproc://")]
    UnknownTransport(String),

    #[error("cannot resolve tcp address {0:?}")]
    BadTcpAddress(String),

    #[error("inproc endpoint needs a name")]
    EmptyInprocName,

    #[error("ipc endpoint needs a path")]
    EmptyIpcPath,

    #[error("ipc transport is unix-only")]
    IpcUnsupported,

    #[error("{0} is already bound")]
    AddrInUse(String),

    #[error("{0} is not bound by this socket")]
    NotBound(String),
}

impl Endpoint {
    /// ```
    /// use ferrite_core::endpoint::Endpoint;
    ///
    /// let ep = Endpoint::parse("tcp://*:5555").unwrap();
    /// assert_eq!(ep.to_string(), "tcp://0.0.0.0:5555");
    /// assert_eq!(Endpoint::parse("inproc://jobs").unwrap().transport(), "inproc");
    /// ```
    pub fn parse(s: &str) -> Result<Self, EndpointError> {
        s.parse()
    }

    /// The part before `://`.
    pub fn transport(&self) -> &'static str {
        match self {
            Endpoint::Tcp(_) => "tcp",
            #[cfg(unix)]
            Endpoint::Ipc(_) => "ipc",
            Endpoint::Inproc(_) => "inproc",
        }
    }
}

fn resolve_tcp(address: &str) -> Result<SocketAddr, EndpointError> {
    let bad = || EndpointError::BadTcpAddress(address.to_owned());

    if let Some(port) = address.strip_prefix("*:") {
        let port: u16 = port.parse().map_err(|_| bad())?;
        return Ok((Ipv4Addr::UNSPECIFIED, port).into());
    }
    if let Ok(literal) = address.parse() {
        return Ok(literal);
    }
    // `to_socket_addrs` on a bare host would try a lookup without a port.
    if !address.contains(':') {
        return Err(bad());
    }
    address
        .to_socket_addrs()
        .ok()
        .and_then(|mut found| found.next())
        .ok_or_else(bad)
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || EndpointError::UnknownTransport(s.to_owned());
        let (transport, rest) = s.split_once("://").ok_or_else(unknown)?;

        match transport {
            "tcp" => resolve_tcp(rest).map(Endpoint::Tcp),
            "inproc" if rest.is_empty() => Err(EndpointError::EmptyInprocName),
            "inproc" => Ok(Endpoint::Inproc(rest.to_owned())),
            #[cfg(unix)]
            "ipc" if rest.is_empty() => Err(EndpointError::EmptyIpcPath),
            #[cfg(unix)]
            "ipc" => Ok(Endpoint::Ipc(PathBuf::from(rest))),
            #[cfg(not(unix))]
            "ipc" => Err(EndpointError::IpcUnsupported),
            _ => Err(unknown()),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://", self.transport())?;
        match self {
            Endpoint::Tcp(addr) => fmt::Display::fmt(addr, f),
            #[cfg(unix)]
            Endpoint::Ipc(path) => fmt::Display::fmt(&path.display(), f),
            Endpoint::Inproc(name) => f.write_str(name),
        }
    }
}
