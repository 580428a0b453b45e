//! Messages per second through the public `Socket` API.
//!
//! Measures PUSH/PULL streaming and REQ/REP round trips over inproc and
//! TCP through the public API. Connection setup happens once per
//! benchmark; each iteration moves `BATCH` messages.

use bytes::Bytes;
use criterion::measurement::WallTime;
use criterion::{
    black_box, criterion_group, criterion_main, BenchmarkGroup, BenchmarkId, Criterion, Throughput,
};
use ferrite::{Context, Message, Socket, SocketType};
use std::time::Duration;

const PAYLOAD_SIZES: &[usize] = &[64, 1024, 16384];
const BATCH: usize = 10_000;
const TRANSPORTS: &[&str] = &["inproc://bench", "tcp://127.0.0.1:0"];

fn pair(ctx: &Context, server: SocketType, client: SocketType, endpoint: &str) -> (Socket, Socket) {
    let server = ctx.socket(server).unwrap();
    let bound = server.bind(endpoint).unwrap().to_string();
    let client = ctx.socket(client).unwrap();
    client.connect(&bound).unwrap();
    (server, client)
}

fn tune(group: &mut BenchmarkGroup<'_, WallTime>) {
    group.warm_up_time(Duration::from_secs(1));
    group.measurement_time(Duration::from_secs(6));
    group.sample_size(20);
}

fn transport_name(endpoint: &str) -> &str {
    endpoint.split("://").next().unwrap_or(endpoint)
}

fn push_pull_throughput(c: &mut Criterion) {
    ferrite::dev_tracing::init_tracing();
    let mut group = c.benchmark_group("throughput/push_pull");
    tune(&mut group);

    for &endpoint in TRANSPORTS {
        let ctx = Context::new().unwrap();
        let (pull, push) = pair(&ctx, SocketType::Pull, SocketType::Push, endpoint);

        for &size in PAYLOAD_SIZES {
            group.throughput(Throughput::Bytes(size as u64 * BATCH as u64));
            let id = BenchmarkId::new(transport_name(endpoint), size);
            group.bench_with_input(id, &size, |b, &size| {
                let payload = Bytes::from(vec![0xA5; size]);
                b.iter(|| {
                    std::thread::scope(|s| {
                        s.spawn(|| {
                            for _ in 0..BATCH {
                                push.send(black_box(payload.clone())).unwrap();
                            }
                        });
                        for _ in 0..BATCH {
                            black_box(pull.recv().unwrap());
                        }
                    });
                });
            });
        }
    }
    group.finish();
}

fn req_rep_round_trips(c: &mut Criterion) {
    let mut group = c.benchmark_group("throughput/req_rep");
    tune(&mut group);

    for &endpoint in TRANSPORTS {
        let ctx = Context::new().unwrap();
        let endpoint = endpoint.replace("bench", "bench-rr");
        let (rep, req) = pair(&ctx, SocketType::Rep, SocketType::Req, &endpoint);

        group.throughput(Throughput::Elements(BATCH as u64));
        group.bench_function(transport_name(&endpoint), |b| {
            let payload = Message::from(Bytes::from_static(&[7u8; 64]));
            b.iter(|| {
                std::thread::scope(|s| {
                    s.spawn(|| {
                        for _ in 0..BATCH {
                            let request = rep.recv().unwrap();
                            rep.send(request).unwrap();
                        }
                    });
                    for _ in 0..BATCH {
                        req.send(black_box(payload.clone())).unwrap();
                        black_box(req.recv().unwrap());
                    }
                });
            });
        });
    }
    group.finish();
}

criterion_group!(benches, push_pull_throughput, req_rep_round_trips);
criterion_main!(benches);
