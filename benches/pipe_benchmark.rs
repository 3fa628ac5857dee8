/*!
 * Pipe Benchmarks
 *
 * Throughput and latency of plain pipes and welded chains
 */

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use pipechain::{weld, Pipe};
use std::time::Duration;

const CHUNK: usize = 1024;

fn bench_alloc_free(c: &mut Criterion) {
    c.bench_function("alloc_free", |b| {
        b.iter(|| {
            let pipe = Pipe::new(black_box(4096), 1);
            pipe.alice.free();
            pipe.bob.free();
        });
    });
}

fn bench_single_direction(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_direction");
    group.throughput(Throughput::Bytes(CHUNK as u64));

    let pipe = Pipe::new(4 * CHUNK, 1);
    let data = vec![0xa5u8; CHUNK];
    let mut buf = vec![0u8; CHUNK];

    group.bench_function("send_receive_1k", |b| {
        b.iter(|| {
            pipe.alice.send(black_box(&data), None);
            pipe.bob.receive(black_box(&mut buf), None);
        });
    });

    group.finish();
}

fn bench_round_trip(c: &mut Criterion) {
    let pipe = Pipe::new(64, 1);
    let mut buf = [0u8; 8];

    c.bench_function("round_trip_8b", |b| {
        b.iter(|| {
            pipe.alice.send(black_box(b"12345678"), None);
            pipe.bob.receive(&mut buf, None);
            pipe.bob.send(black_box(&buf), None);
            pipe.alice.receive(&mut buf, None);
        });
    });
}

fn bench_welded_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("welded_chain");
    group.throughput(Throughput::Bytes(CHUNK as u64));

    let p = Pipe::new(4 * CHUNK, 1);
    let q = Pipe::new(4 * CHUNK, 1);
    weld(&p.bob, &q.alice);

    let data = vec![0x5au8; CHUNK];
    let mut buf = vec![0u8; CHUNK];

    group.bench_function("through_one_joint_1k", |b| {
        b.iter(|| {
            p.alice.send(black_box(&data), None);
            q.bob.receive(black_box(&mut buf), None);
        });
    });

    group.finish();
}

fn bench_timeout_expiry(c: &mut Criterion) {
    let pipe = Pipe::new(64, 64);
    let mut buf = [0u8; 8];

    c.bench_function("receive_zero_timeout_empty", |b| {
        b.iter(|| pipe.bob.receive(black_box(&mut buf), Some(Duration::ZERO)));
    });
}

criterion_group!(
    benches,
    bench_alloc_free,
    bench_single_direction,
    bench_round_trip,
    bench_welded_chain,
    bench_timeout_expiry
);
criterion_main!(benches);
