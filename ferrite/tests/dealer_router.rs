use ferrite::{Context, Message, SocketEvent, SocketOptions, SocketType};
use std::time::Duration;

const WAIT: Option<Duration> = Some(Duration::from_secs(5));

#[test]
fn test_router_uses_announced_identity() {
    let ctx = Context::new().unwrap();
    let router = ctx.socket(SocketType::Router).unwrap();
    let endpoint = router.bind("tcp://127.0.0.1:0").unwrap().to_string();

    let dealer = ctx
        .socket_with_options(
            SocketType::Dealer,
            SocketOptions::new().with_routing_id("CLIENT_A".into()),
        )
        .unwrap();
    dealer.connect(&endpoint).unwrap();

    dealer.send("Hello").unwrap();
    let msg = router.recv_timeout(WAIT).unwrap();
    assert_eq!(&msg.frames()[0][..], b"CLIENT_A");
    assert_eq!(&msg.frames()[1][..], b"Hello");

    router
        .send(Message::new().push(msg.frames()[0].clone()).push_str("World"))
        .unwrap();
    let reply = dealer.recv_timeout(WAIT).unwrap();
    assert_eq!(reply.len(), 1);
    assert_eq!(&reply.frames()[0][..], b"World");
}

#[test]
fn test_router_generates_identity_for_anonymous_peers() {
    let ctx = Context::new().unwrap();
    let router = ctx.socket(SocketType::Router).unwrap();
    router.bind("inproc://anon").unwrap();

    let dealers: Vec<_> = (0..2)
        .map(|_| {
            let dealer = ctx.socket(SocketType::Dealer).unwrap();
            dealer.connect("inproc://anon").unwrap();
            dealer
        })
        .collect();
    for (i, dealer) in dealers.iter().enumerate() {
        dealer.send(Message::new().push_u32(i as u32)).unwrap();
    }

    let mut identities = Vec::new();
    for _ in 0..2 {
        let msg = router.recv_timeout(WAIT).unwrap();
        let identity = msg.frames()[0].clone();
        assert_eq!(identity.len(), 5);
        assert_eq!(identity[0], 0);
        router
            .send(Message::new().push(identity.clone()).push(msg.frames()[1].clone()))
            .unwrap();
        identities.push(identity);
    }
    assert_ne!(identities[0], identities[1]);

    // Each dealer gets back exactly what it sent.
    for (i, dealer) in dealers.iter().enumerate() {
        let echoed = dealer.recv_timeout(WAIT).unwrap();
        assert_eq!(&echoed.frames()[0][..], &(i as u32).to_be_bytes());
    }
}

#[test]
fn test_router_drops_unknown_identity() {
    let ctx = Context::new().unwrap();
    let router = ctx.socket(SocketType::Router).unwrap();
    router.bind("inproc://lost").unwrap();

    router
        .send(Message::new().push_str("nobody").push_str("hello?"))
        .unwrap();
    // Dropped silently: nothing to count, nothing blocked.
    router
        .send_timeout(
            Message::new().push_str("nobody").push_str("again"),
            Some(Duration::ZERO),
        )
        .unwrap();
}

#[test]
fn test_dealer_to_dealer_is_asynchronous() {
    let ctx = Context::new().unwrap();
    let left = ctx.socket(SocketType::Dealer).unwrap();
    left.bind("inproc://peer").unwrap();
    let right = ctx.socket(SocketType::Dealer).unwrap();
    let monitor = right.monitor().unwrap();
    right.connect("inproc://peer").unwrap();
    while !matches!(
        monitor.recv_timeout(WAIT.unwrap()).unwrap(),
        SocketEvent::Connected(_)
    ) {}

    // No lockstep: several sends in a row in both directions.
    for i in 0..3u32 {
        left.send(Message::new().push_u32(i)).unwrap();
        right.send(Message::new().push_u32(i + 100)).unwrap();
    }
    for i in 0..3u32 {
        assert_eq!(&right.recv_timeout(WAIT).unwrap().frames()[0][..], &i.to_be_bytes());
        assert_eq!(
            &left.recv_timeout(WAIT).unwrap().frames()[0][..],
            &(i + 100).to_be_bytes()
        );
    }
}

#[test]
fn test_router_to_router_by_identity() {
    let ctx = Context::new().unwrap();
    let hub = ctx
        .socket_with_options(SocketType::Router, SocketOptions::new().with_routing_id("hub".into()))
        .unwrap();
    hub.bind("inproc://mesh").unwrap();
    let node = ctx
        .socket_with_options(SocketType::Router, SocketOptions::new().with_routing_id("node".into()))
        .unwrap();
    let monitor = node.monitor().unwrap();
    node.connect("inproc://mesh").unwrap();
    while !matches!(
        monitor.recv_timeout(WAIT.unwrap()).unwrap(),
        SocketEvent::Connected(_)
    ) {}

    node.send(Message::new().push_str("hub").push_str("hi hub")).unwrap();
    let msg = hub.recv_timeout(WAIT).unwrap();
    assert_eq!(&msg.frames()[0][..], b"node");
    assert_eq!(&msg.frames()[1][..], b"hi hub");
}
