//! Benchmarks for stream decode throughput
//!
//! Measures both wire formats over synthetic streams:
//! - Legacy fixed-word decode, all channels enabled
//! - Plus packet decode across a representative packet mix
//!
//! Platform: Cross-platform (synthetic data, CI-safe)

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use hdstream::{MemorySink, StreamDecoder, StreamHeader};
use std::hint::black_box;

/// One full legacy cycle for the all-channels mask.
fn legacy_cycle(v5: u16, i5: u32, v12: u16, i12: u32) -> Vec<u8> {
    let mut bytes = Vec::new();
    for word in [v5, (i5 / 4096) as u16, (i5 % 4096) as u16, v12, (i12 / 4096) as u16,
        (i12 % 4096) as u16]
    {
        bytes.extend_from_slice(&word.to_le_bytes());
    }
    bytes
}

fn legacy_stream(cycles: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(cycles * 12);
    for i in 0..cycles {
        data.extend(legacy_cycle(
            1000 + (i % 32) as u16,
            500 + (i % 100) as u32,
            12_000,
            200 + (i % 50) as u32,
        ));
    }
    data
}

fn swap(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for pair in data.chunks(2) {
        out.push(pair[1]);
        out.push(pair[0]);
    }
    out
}

/// Plus stream mixing absolute, delta and repeat packets.
fn plus_stream(groups: usize) -> Vec<u8> {
    let mut normalized = Vec::new();
    for i in 0..groups {
        // absolute
        let v5 = (1000 + (i % 16)) as u32;
        let w5 = (v5 & 0x7FFF) << 1;
        normalized.extend([4, 0, (w5 >> 8) as u8, w5 as u8, 0, 1, 0xF4, 0x5D, 0xC0, 0, 0, 0xC8]);
        // delta (+1 on each field, length nibble 10)
        normalized.extend([12, 0, 0xA0, 0x05, 0x01, 0x00, 0x40, 0x10]);
        // repeat x4 plus a blank pad
        normalized.extend([14, 0, 4]);
        normalized.extend([8, 1, 0]);
    }
    swap(&normalized)
}

fn legacy_header() -> StreamHeader {
    StreamHeader::parse_legacy(&[1, 0, 0x0F, 4]).expect("valid legacy header")
}

fn plus_header() -> StreamHeader {
    let mut block = vec![0u8; 20];
    block[0] = 2;
    block[10] = 1;
    block[12] = 4;
    block[18] = 4;
    StreamHeader::parse_plus(&block).expect("valid Plus header")
}

fn bench_legacy_decode(c: &mut Criterion) {
    let data = legacy_stream(10_000);

    let mut group = c.benchmark_group("legacy_decode");
    group.throughput(Throughput::Bytes(data.len() as u64));

    group.bench_function("full_buffer", |b| {
        b.iter(|| {
            let mut decoder = StreamDecoder::for_header(&legacy_header(), 3).unwrap();
            let mut sink = MemorySink::new();
            decoder.decode(black_box(&data), &mut sink).unwrap();
            sink
        })
    });

    group.bench_function("chunked_512", |b| {
        b.iter(|| {
            let mut decoder = StreamDecoder::for_header(&legacy_header(), 3).unwrap();
            let mut sink = MemorySink::new();
            for chunk in data.chunks(512) {
                decoder.decode(black_box(chunk), &mut sink).unwrap();
            }
            sink
        })
    });

    group.finish();
}

fn bench_plus_decode(c: &mut Criterion) {
    let data = plus_stream(5_000);

    let mut group = c.benchmark_group("plus_decode");
    group.throughput(Throughput::Bytes(data.len() as u64));

    group.bench_function("full_buffer", |b| {
        b.iter(|| {
            let mut decoder = StreamDecoder::for_header(&plus_header(), 3).unwrap();
            let mut sink = MemorySink::new();
            decoder.decode(black_box(&data), &mut sink).unwrap();
            sink
        })
    });

    group.bench_function("chunked_512", |b| {
        b.iter(|| {
            let mut decoder = StreamDecoder::for_header(&plus_header(), 3).unwrap();
            let mut sink = MemorySink::new();
            for chunk in data.chunks(512) {
                decoder.decode(black_box(chunk), &mut sink).unwrap();
            }
            sink
        })
    });

    group.finish();
}

criterion_group!(benches, bench_legacy_decode, bench_plus_decode);
criterion_main!(benches);
