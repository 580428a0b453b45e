//! TCP helpers shared by the reactors.
//!
//! Listener construction and per-stream tuning go through `socket2` so the
//! options the runtime cares about (`SO_REUSEADDR`, backlog, `TCP_NODELAY`,
//! keepalive) are set the same way on every platform.

use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};
use std::io;
use std::net::{SocketAddr, TcpListener};
use std::time::Duration;

/// Create a non-blocking TCP listener bound to `addr`.
///
/// `SO_REUSEADDR` is enabled on Unix so a restarted process can rebind a port
/// still in `TIME_WAIT`. Port `0` picks an ephemeral port; query the result
/// with [`TcpListener::local_addr`].
///
/// # Errors
///
/// Returns the OS error if the socket cannot be created, bound or put into
/// listening mode (`AddrInUse` in particular).
pub fn bind_listener(addr: SocketAddr, backlog: i32) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    #[cfg(unix)]
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog.max(1))?;
    Ok(socket.into())
}

/// Apply latency and liveness options to a connected stream.
///
/// Disables Nagle's algorithm and, when `keepalive` is set, enables TCP
/// keepalive with that idle time.
///
/// # Errors
///
/// Returns an error if a socket option cannot be set.
pub fn configure_stream<S>(stream: &S, keepalive: Option<Duration>) -> io::Result<()>
where
    for<'s> SockRef<'s>: From<&'s S>,
{
    let sock = SockRef::from(stream);
    sock.set_nodelay(true)?;
    if let Some(idle) = keepalive {
        let params = TcpKeepalive::new().with_time(idle);
        sock.set_tcp_keepalive(&params)?;
    }
    Ok(())
}

/// Whether an I/O error means the peer is gone rather than a transient hiccup.
pub fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::NotConnected
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpStream;

    #[test]
    fn test_bind_ephemeral_port() {
        let listener = bind_listener("127.0.0.1:0".parse().unwrap(), 16).unwrap();
        let addr = listener.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
    }

    #[test]
    fn test_bind_conflict() {
        let listener = bind_listener("127.0.0.1:0".parse().unwrap(), 16).unwrap();
        let addr = listener.local_addr().unwrap();
        let err = bind_listener(addr, 16).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AddrInUse);
    }

    #[test]
    fn test_configure_stream() {
        let listener = bind_listener("127.0.0.1:0".parse().unwrap(), 16).unwrap();
        let addr = listener.local_addr().unwrap();
        let stream = TcpStream::connect(addr).unwrap();

        configure_stream(&stream, Some(Duration::from_secs(30))).unwrap();
        assert!(stream.nodelay().unwrap());
    }

    #[test]
    fn test_is_disconnect() {
        assert!(is_disconnect(&io::Error::from(io::ErrorKind::ConnectionReset)));
        assert!(is_disconnect(&io::Error::from(io::ErrorKind::BrokenPipe)));
        assert!(!is_disconnect(&io::Error::from(io::ErrorKind::WouldBlock)));
    }
}
