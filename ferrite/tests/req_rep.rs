use ferrite::{Context, Error, Message, SocketOptions, SocketType};
use std::time::Duration;

const WAIT: Option<Duration> = Some(Duration::from_secs(5));

fn text(msg: &Message) -> Vec<&str> {
    msg.iter()
        .map(|f| std::str::from_utf8(f).unwrap_or("<binary>"))
        .collect()
}

#[test]
fn test_req_rep_inproc_roundtrip() {
    ferrite::dev_tracing::init_tracing();
    let ctx = Context::new().unwrap();
    let rep = ctx.socket(SocketType::Rep).unwrap();
    rep.bind("inproc://echo").unwrap();
    let req = ctx.socket(SocketType::Req).unwrap();
    req.connect("inproc://echo").unwrap();

    for i in 0..10 {
        req.send(Message::new().push_str("ping").push_u32(i)).unwrap();
        let request = rep.recv_timeout(WAIT).unwrap();
        assert_eq!(request.len(), 2);
        assert_eq!(&request.frames()[0][..], b"ping");
        rep.send(Message::new().push_str("pong").push(request.frames()[1].clone()))
            .unwrap();
        let reply = req.recv_timeout(WAIT).unwrap();
        assert_eq!(text(&reply)[0], "pong");
        assert_eq!(reply.frames()[1], request.frames()[1]);
    }

    assert_eq!(req.stats().sent, 10);
    assert_eq!(req.stats().received, 10);
}

#[test]
fn test_req_rep_tcp_roundtrip() {
    let ctx = Context::new().unwrap();
    let rep = ctx.socket(SocketType::Rep).unwrap();
    let endpoint = rep.bind("tcp://127.0.0.1:0").unwrap();
    let req = ctx.socket(SocketType::Req).unwrap();
    req.connect(&endpoint.to_string()).unwrap();

    req.send("hello").unwrap();
    let request = rep.recv_timeout(WAIT).unwrap();
    assert_eq!(text(&request), ["hello"]);
    rep.send("world").unwrap();
    assert_eq!(text(&req.recv_timeout(WAIT).unwrap()), ["world"]);
}

#[test]
fn test_req_second_send_is_state_error() {
    let ctx = Context::new().unwrap();
    let req = ctx.socket(SocketType::Req).unwrap();
    req.set_linger(Some(Duration::ZERO));
    req.connect("inproc://nobody-home").unwrap();

    req.send("first").unwrap();
    let err = req.send("second").unwrap_err();
    assert!(matches!(err, Error::State(_)), "got {err:?}");
}

#[test]
fn test_req_recv_before_send_is_state_error() {
    let ctx = Context::new().unwrap();
    let req = ctx.socket(SocketType::Req).unwrap();
    assert!(matches!(req.recv_timeout(WAIT), Err(Error::State(_))));
}

#[test]
fn test_rep_send_without_request_is_state_error() {
    let ctx = Context::new().unwrap();
    let rep = ctx.socket(SocketType::Rep).unwrap();
    assert!(matches!(rep.send("unsolicited"), Err(Error::State(_))));
}

#[test]
fn test_empty_message_rejected() {
    let ctx = Context::new().unwrap();
    let req = ctx.socket(SocketType::Req).unwrap();
    assert!(matches!(req.send(Message::new()), Err(Error::InvalidMessage(_))));
}

#[test]
fn test_req_round_robins_across_reps() {
    let ctx = Context::new().unwrap();
    let rep_a = ctx.socket(SocketType::Rep).unwrap();
    rep_a.bind("inproc://rr-a").unwrap();
    let rep_b = ctx.socket(SocketType::Rep).unwrap();
    rep_b.bind("inproc://rr-b").unwrap();

    let req = ctx.socket(SocketType::Req).unwrap();
    let monitor = req.monitor().unwrap();
    req.connect("inproc://rr-a").unwrap();
    req.connect("inproc://rr-b").unwrap();

    let mut connected = 0;
    while connected < 2 {
        if let ferrite::SocketEvent::Connected(_) = monitor.recv_timeout(WAIT.unwrap()).unwrap() {
            connected += 1;
        }
    }

    let mut served = [0usize; 2];
    for _ in 0..6 {
        req.send("job").unwrap();
        let mut answered = false;
        while !answered {
            for (i, rep) in [&rep_a, &rep_b].into_iter().enumerate() {
                if rep.try_recv().unwrap().is_some() {
                    rep.send("done").unwrap();
                    served[i] += 1;
                    answered = true;
                }
            }
        }
        req.recv_timeout(WAIT).unwrap();
    }
    assert_eq!(served, [3, 3]);
}

#[test]
fn test_req_reports_lost_peer_and_recovers() {
    let ctx = Context::new().unwrap();
    let rep = ctx
        .socket_with_options(
            SocketType::Rep,
            SocketOptions::new().with_linger(Some(Duration::ZERO)),
        )
        .unwrap();
    rep.bind("inproc://flaky").unwrap();
    let req = ctx.socket(SocketType::Req).unwrap();
    req.set_linger(Some(Duration::ZERO));
    req.connect("inproc://flaky").unwrap();

    req.send("will never be answered").unwrap();
    rep.recv_timeout(WAIT).unwrap();
    drop(rep);

    let err = req.recv_timeout(WAIT).unwrap_err();
    assert!(matches!(err, Error::Unreachable(_)), "got {err:?}");

    // The lockstep is reset, so a new request is allowed.
    req.send("retry").unwrap();
}

#[test]
fn test_req_to_router_envelope() {
    let ctx = Context::new().unwrap();
    let router = ctx.socket(SocketType::Router).unwrap();
    router.bind("inproc://broker").unwrap();
    let req = ctx
        .socket_with_options(
            SocketType::Req,
            SocketOptions::new().with_routing_id("client-7".into()),
        )
        .unwrap();
    req.connect("inproc://broker").unwrap();

    req.send("question").unwrap();
    let request = router.recv_timeout(WAIT).unwrap();
    assert_eq!(text(&request), ["client-7", "", "question"]);

    router
        .send(Message::new().push_str("client-7").push_empty().push_str("answer"))
        .unwrap();
    assert_eq!(text(&req.recv_timeout(WAIT).unwrap()), ["answer"]);
}

#[test]
fn test_dealer_to_rep_envelope() {
    let ctx = Context::new().unwrap();
    let rep = ctx.socket(SocketType::Rep).unwrap();
    rep.bind("inproc://worker").unwrap();
    let dealer = ctx.socket(SocketType::Dealer).unwrap();
    dealer.connect("inproc://worker").unwrap();

    dealer.send(Message::new().push_empty().push_str("task")).unwrap();
    assert_eq!(text(&rep.recv_timeout(WAIT).unwrap()), ["task"]);
    rep.send("result").unwrap();
    assert_eq!(text(&dealer.recv_timeout(WAIT).unwrap()), ["", "result"]);
}
