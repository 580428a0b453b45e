use ferrite::{
    Context, ContextOptions, Endpoint, EndpointError, Error, SocketEvent, SocketOptions, SocketState,
    SocketType,
};
use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(5);

/// Plain TCP client to a bound ferrite socket; it never sends a greeting.
fn raw_client(endpoint: &Endpoint) -> TcpStream {
    let Endpoint::Tcp(addr) = endpoint else {
        panic!("expected a tcp endpoint, got {endpoint}");
    };
    TcpStream::connect(addr).unwrap()
}

/// Reads until the peer hangs up; panics if it is still open after `WAIT`.
fn assert_hung_up(stream: &mut TcpStream) {
    stream.set_read_timeout(Some(WAIT)).unwrap();
    let mut buf = [0u8; 256];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => return,
            Ok(_) => {}
            Err(e) if matches!(e.kind(), ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted) => {
                return
            }
            Err(e) => panic!("connection still open: {e}"),
        }
    }
}

fn unused_tcp() -> String {
    format!("tcp://127.0.0.1:{}", portpicker::pick_unused_port().expect("no free port"))
}

#[test]
fn test_terminate_with_zero_linger_is_prompt() {
    let ctx = Context::new().unwrap();
    let push = ctx
        .socket_with_options(
            SocketType::Push,
            SocketOptions::new().with_linger(Some(Duration::ZERO)),
        )
        .unwrap();
    push.connect(&unused_tcp()).unwrap();
    push.send("never delivered").unwrap();

    let start = Instant::now();
    ctx.terminate();
    assert!(start.elapsed() < Duration::from_secs(1), "took {:?}", start.elapsed());
    assert_eq!(push.stats().discarded, 1);
}

#[test]
fn test_terminate_waits_for_linger() {
    let linger = Duration::from_millis(300);
    let ctx = Context::new().unwrap();
    let push = ctx
        .socket_with_options(SocketType::Push, SocketOptions::new().with_linger(Some(linger)))
        .unwrap();
    push.connect(&unused_tcp()).unwrap();
    push.send("never delivered").unwrap();

    let start = Instant::now();
    ctx.terminate();
    let elapsed = start.elapsed();
    assert!(elapsed >= linger, "returned after {elapsed:?}");
    assert!(elapsed < WAIT, "returned after {elapsed:?}");
    assert_eq!(push.stats().discarded, 1);
}

#[test]
fn test_linger_flushes_to_late_peer() {
    let ctx = Context::new().unwrap();
    let push = ctx.socket(SocketType::Push).unwrap();
    push.connect("inproc://slow-start").unwrap();
    push.send("survives close").unwrap();
    push.close();

    let pull = ctx.socket(SocketType::Pull).unwrap();
    pull.bind("inproc://slow-start").unwrap();
    let msg = pull.recv_timeout(Some(WAIT)).unwrap();
    assert_eq!(&msg.frames()[0][..], b"survives close");
}

#[test]
fn test_close_cancels_blocked_recv() {
    let ctx = Context::new().unwrap();
    let pull = Arc::new(ctx.socket(SocketType::Pull).unwrap());

    let waiter = {
        let pull = Arc::clone(&pull);
        thread::spawn(move || pull.recv())
    };
    thread::sleep(Duration::from_millis(50));
    pull.close();

    let result = waiter.join().unwrap();
    assert!(matches!(result, Err(Error::Cancelled)), "got {result:?}");
    assert!(matches!(pull.recv(), Err(Error::Closed)));
    assert!(matches!(pull.bind("inproc://x"), Err(Error::Closed)));
}

#[test]
fn test_terminate_cancels_blocked_send() {
    let ctx = Context::new().unwrap();
    let push = Arc::new(
        ctx.socket_with_options(
            SocketType::Push,
            SocketOptions::new()
                .with_send_hwm(1)
                .with_linger(Some(Duration::ZERO)),
        )
        .unwrap(),
    );
    push.send("fills the queue").unwrap();

    let waiter = {
        let push = Arc::clone(&push);
        thread::spawn(move || push.send("blocks"))
    };
    thread::sleep(Duration::from_millis(50));
    ctx.terminate();

    let result = waiter.join().unwrap();
    assert!(matches!(result, Err(Error::Cancelled)), "got {result:?}");
    assert_eq!(push.state(), SocketState::Closed);
}

#[test]
fn test_terminated_context_refuses_sockets() {
    let ctx = Context::new().unwrap();
    ctx.terminate();
    ctx.terminate();
    assert!(ctx.is_terminated());
    assert!(matches!(ctx.socket(SocketType::Req), Err(Error::Terminated)));
}

#[test]
fn test_socket_limit() {
    let ctx = Context::with_options(ContextOptions::new().with_max_sockets(2)).unwrap();
    let _a = ctx.socket(SocketType::Pub).unwrap();
    let _b = ctx.socket(SocketType::Pub).unwrap();
    assert!(matches!(
        ctx.socket(SocketType::Pub),
        Err(Error::ResourceExhausted(_))
    ));
}

#[test]
fn test_bind_conflicts_and_unbind() {
    let ctx = Context::new().unwrap();
    let first = ctx.socket(SocketType::Pull).unwrap();
    let second = ctx.socket(SocketType::Pull).unwrap();
    first.bind("inproc://taken").unwrap();

    assert!(matches!(
        second.bind("inproc://taken"),
        Err(Error::Endpoint(EndpointError::AddrInUse(_)))
    ));
    assert!(matches!(
        second.unbind("inproc://taken"),
        Err(Error::Endpoint(EndpointError::NotBound(_)))
    ));

    first.unbind("inproc://taken").unwrap();
    second.bind("inproc://taken").unwrap();
}

#[test]
fn test_tcp_port_conflict() {
    let ctx = Context::new().unwrap();
    let first = ctx.socket(SocketType::Rep).unwrap();
    let endpoint = first.bind("tcp://127.0.0.1:0").unwrap().to_string();
    let second = ctx.socket(SocketType::Rep).unwrap();
    assert!(second.bind(&endpoint).is_err());
}

#[test]
fn test_invalid_endpoint() {
    let ctx = Context::new().unwrap();
    let socket = ctx.socket(SocketType::Req).unwrap();
    assert!(matches!(socket.connect("udp://1.2.3.4:5"), Err(Error::Endpoint(_))));
}

#[test]
fn test_monitor_reports_lifecycle() {
    let ctx = Context::new().unwrap();
    let rep = ctx.socket(SocketType::Rep).unwrap();
    let monitor = rep.monitor().unwrap();
    let endpoint = rep.bind("tcp://127.0.0.1:0").unwrap();
    assert_eq!(monitor.recv_timeout(WAIT).unwrap(), SocketEvent::Bound(endpoint.clone()));
    assert_eq!(rep.last_endpoint(), Some(endpoint.clone()));

    let req = ctx.socket(SocketType::Req).unwrap();
    req.connect(&endpoint.to_string()).unwrap();
    assert!(matches!(monitor.recv_timeout(WAIT).unwrap(), SocketEvent::Accepted(_)));

    rep.close();
    loop {
        if monitor.recv_timeout(WAIT).unwrap() == SocketEvent::Closed {
            break;
        }
    }
}

#[test]
fn test_incompatible_peer_fails_handshake() {
    let ctx = Context::new().unwrap();
    let pull = ctx.socket(SocketType::Pull).unwrap();
    let monitor = pull.monitor().unwrap();
    pull.bind("inproc://strict").unwrap();

    let publisher = ctx.socket(SocketType::Pub).unwrap();
    publisher.connect("inproc://strict").unwrap();

    loop {
        match monitor.recv_timeout(WAIT).unwrap() {
            SocketEvent::HandshakeFailed { .. } => break,
            SocketEvent::Connected(_) => panic!("PUB and PULL must not pair"),
            _ => {}
        }
    }
    assert_ne!(pull.state(), SocketState::Ready);
}

#[test]
fn test_state_transitions() {
    let ctx = Context::new().unwrap();
    let pull = ctx.socket(SocketType::Pull).unwrap();
    assert_eq!(pull.state(), SocketState::Idle);
    pull.bind("inproc://states").unwrap();

    let push = ctx.socket(SocketType::Push).unwrap();
    push.connect("inproc://states").unwrap();
    push.send("go").unwrap();
    pull.recv_timeout(Some(WAIT)).unwrap();
    assert_eq!(pull.state(), SocketState::Ready);

    drop(push);
    drop(pull);
    ctx.terminate();
    assert_eq!(ctx.socket_count(), 0);
}

#[test]
fn test_unreachable_after_retry_budget() {
    let ctx = Context::new().unwrap();
    let req = ctx
        .socket_with_options(
            SocketType::Req,
            SocketOptions::new()
                .with_reconnect_ivl(Duration::from_millis(10))
                .with_reconnect_max_attempts(Some(2))
                .with_linger(Some(Duration::ZERO)),
        )
        .unwrap();
    let monitor = req.monitor().unwrap();
    req.connect(&unused_tcp()).unwrap();
    req.send("anyone?").unwrap();

    let err = req.recv_timeout(Some(WAIT)).unwrap_err();
    assert!(matches!(err, Error::Unreachable(_)), "got {err:?}");
    assert!(monitor
        .try_iter()
        .any(|event| matches!(event, SocketEvent::Unreachable { .. })));
}

#[test]
fn test_silent_peer_dropped_after_handshake_timeout() {
    let ctx = Context::new().unwrap();
    let pull = ctx
        .socket_with_options(
            SocketType::Pull,
            SocketOptions::new().with_handshake_timeout(Duration::from_millis(200)),
        )
        .unwrap();
    let monitor = pull.monitor().unwrap();
    let endpoint = pull.bind("tcp://127.0.0.1:0").unwrap();

    let mut silent = raw_client(&endpoint);
    assert_hung_up(&mut silent);

    loop {
        match monitor.recv_timeout(WAIT).unwrap() {
            SocketEvent::HandshakeFailed { reason, .. } => {
                assert!(reason.contains("timed out"), "{reason}");
                break;
            }
            SocketEvent::Connected(_) => panic!("peer never greeted"),
            _ => {}
        }
    }
}

#[test]
fn test_zero_handshake_timeout_waits_forever() {
    let ctx = Context::new().unwrap();
    let pull = ctx
        .socket_with_options(
            SocketType::Pull,
            SocketOptions::new().with_handshake_timeout(Duration::ZERO),
        )
        .unwrap();
    let monitor = pull.monitor().unwrap();
    let endpoint = pull.bind("tcp://127.0.0.1:0").unwrap();

    let mut silent = raw_client(&endpoint);
    silent.set_read_timeout(Some(Duration::from_millis(300))).unwrap();
    let mut buf = [0u8; 256];
    loop {
        match silent.read(&mut buf) {
            Ok(0) => panic!("connection dropped without a handshake timeout"),
            Ok(_) => {}
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => break,
            Err(e) => panic!("connection failed: {e}"),
        }
    }
    assert!(!monitor
        .try_iter()
        .any(|event| matches!(event, SocketEvent::HandshakeFailed { .. })));
}

#[test]
fn test_zero_handshake_timeout_carries_messages() {
    let ctx = Context::new().unwrap();
    let opts = SocketOptions::new().with_handshake_timeout(Duration::ZERO);
    let pull = ctx.socket_with_options(SocketType::Pull, opts.clone()).unwrap();
    pull.bind("inproc://no-greeting-deadline").unwrap();

    let push = ctx.socket_with_options(SocketType::Push, opts).unwrap();
    let monitor = push.monitor().unwrap();
    push.connect("inproc://no-greeting-deadline").unwrap();
    push.send("hello").unwrap();

    let msg = pull.recv_timeout(Some(WAIT)).unwrap();
    assert_eq!(msg.frames()[0].as_ref(), b"hello");
    assert!(!monitor
        .try_iter()
        .any(|event| matches!(event, SocketEvent::HandshakeFailed { .. })));
}

#[test]
fn test_malformed_frame_drops_only_that_connection() {
    let ctx = Context::new().unwrap();
    let pull = ctx
        .socket_with_options(SocketType::Pull, SocketOptions::new().with_max_frame_size(16))
        .unwrap();
    let endpoint = pull.bind("tcp://127.0.0.1:0").unwrap();

    // Data frame declaring 255 bytes, over the 16 byte ceiling.
    let mut rogue = raw_client(&endpoint);
    rogue.write_all(&[0x00, 0xFF, 0x01]).unwrap();
    assert_hung_up(&mut rogue);
    assert!(matches!(pull.try_recv(), Ok(None)));

    let push = ctx.socket(SocketType::Push).unwrap();
    push.connect(&endpoint.to_string()).unwrap();
    push.send("well formed").unwrap();
    let msg = pull.recv_timeout(Some(WAIT)).unwrap();
    assert_eq!(msg.frames()[0].as_ref(), b"well formed");
}
