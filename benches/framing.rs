//! Benchmark datagram framing and hand-off throughput.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;
use udp_pcm_streamer::audio::buffer::{AudioChunk, HandoffBuffer};
use udp_pcm_streamer::audio::tone::ToneGenerator;
use udp_pcm_streamer::codec::{encode, encode_headerless, PacketDecoder};
use udp_pcm_streamer::protocol::Framing;

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    for samples in [160usize, 320, 960] {
        let block = ToneGenerator::new(440.0, 16000).next_block(samples);
        group.bench_with_input(BenchmarkId::new("headered", samples), &block, |b, block| {
            b.iter(|| encode(black_box(7), black_box(1120), black_box(block)))
        });
        group.bench_with_input(BenchmarkId::new("headerless", samples), &block, |b, block| {
            b.iter(|| encode_headerless(black_box(block)))
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    for samples in [160usize, 320, 960] {
        let block = ToneGenerator::new(440.0, 16000).next_block(samples);
        let Ok(datagram) = encode(7, 1120, &block) else {
            continue;
        };
        let decoder = PacketDecoder::new(Framing::Headered);
        group.bench_with_input(BenchmarkId::new("headered", samples), &datagram, |b, datagram| {
            b.iter(|| decoder.decode(black_box(datagram)))
        });
    }
    group.finish();
}

fn bench_handoff(c: &mut Criterion) {
    let block = ToneGenerator::new(440.0, 16000).next_block(320);
    let pcm: Vec<u8> = block.iter().flat_map(|s| s.to_le_bytes()).collect();
    let chunk = AudioChunk::new(pcm.into(), Some(0));

    c.bench_function("handoff_push_pop", |b| {
        let buffer = HandoffBuffer::new(100);
        b.iter(|| {
            buffer.push(black_box(chunk.clone()));
            buffer.pop_timeout(Duration::ZERO)
        })
    });

    c.bench_function("handoff_push_full", |b| {
        let buffer = HandoffBuffer::new(4);
        for _ in 0..4 {
            buffer.push(chunk.clone());
        }
        b.iter(|| buffer.push(black_box(chunk.clone())))
    });
}

criterion_group!(benches, bench_encode, bench_decode, bench_handoff);
criterion_main!(benches);
