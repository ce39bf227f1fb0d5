//! Benchmarks for the outbound text path
//!
//! Covers pagination of realistic messages, slicing pages into send-text
//! payloads and chunking a burst transfer.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use lenslink::burst::ChunkEncoder;
use lenslink::config::PaginatorConfig;
use lenslink::protocol::{ScreenStatus, SendTextBuilder};
use lenslink::text::TextPaginator;
use std::hint::black_box;

const SHORT: &str = "Turn left in 200 m onto Harbour Street";

fn long_message() -> String {
    "The quick brown fox jumps over the lazy dog while the glasses keep both lenses in sync. "
        .repeat(12)
}

fn bench_paginate(c: &mut Criterion) {
    let paginator = TextPaginator::new(&PaginatorConfig::default());
    let long = long_message();

    let mut group = c.benchmark_group("paginate");
    for (name, text) in [("short", SHORT), ("long", long.as_str())] {
        group.throughput(Throughput::Bytes(text.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(name), text, |b, text| {
            b.iter(|| black_box(paginator.paginate(black_box(text))))
        });
    }
    group.finish();
}

fn bench_send_text_frames(c: &mut Criterion) {
    let paginator = TextPaginator::new(&PaginatorConfig::default());
    let builder = SendTextBuilder::new();
    let pagination = paginator.paginate(&long_message());

    c.bench_function("send_text_frames_mtu_498", |b| {
        b.iter(|| {
            let chunks = pagination.to_byte_arrays(black_box(486));
            let total = chunks.len();
            let frames: Vec<Vec<u8>> = chunks
                .iter()
                .enumerate()
                .map(|(page, chunk)| builder.build(page, total, ScreenStatus::TextShow, chunk))
                .collect();
            black_box(frames)
        })
    });
}

fn bench_burst_chunking(c: &mut Criterion) {
    let encoder = ChunkEncoder::new(180);
    let mut group = c.benchmark_group("burst_chunking");

    for size in [180usize, 4_096, 64 * 1024] {
        let payload = vec![0xA5u8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            b.iter(|| black_box(encoder.encode(0x01, black_box(payload))))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_paginate, bench_send_text_frames, bench_burst_chunking);
criterion_main!(benches);
