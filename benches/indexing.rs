//! Benchmarks for oggindex.
//!
//! Measures Rice coding of difference streams and a full rewrite of a
//! synthetic video file.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::io::Cursor;

use oggindex::ogg::PageWriter;
use oggindex::rice;
use oggindex::{IndexConfig, Rewriter};

/// Pseudo-random non-negative differences
fn generate_diffs(count: usize, seed: u64) -> Vec<i64> {
    let mut diffs = Vec::with_capacity(count);
    let mut state = seed;
    for _ in 0..count {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        diffs.push((state % 2048) as i64);
    }
    diffs
}

/// A minimal identification header: 15 fps, granule shift 6
fn theora_ident() -> Vec<u8> {
    let mut h = vec![0u8; 42];
    h[0] = 0x80;
    h[1..7].copy_from_slice(b"theora");
    h[22..26].copy_from_slice(&15u32.to_be_bytes());
    h[26..30].copy_from_slice(&1u32.to_be_bytes());
    h[41] = 6 << 5;
    h
}

fn secondary_header(kind: u8) -> Vec<u8> {
    let mut h = vec![kind];
    h.extend_from_slice(b"theora");
    h
}

/// A single-track video file with the given frame count
fn generate_video_file(frames: usize) -> Vec<u8> {
    let shift = 6u8;
    let mut writer = PageWriter::new(1);
    let mut pages = Vec::new();
    pages.extend(writer.add_packet(&theora_ident(), 0, true, false));
    pages.extend(writer.flush());
    pages.extend(writer.add_packet(&secondary_header(0x81), 0, false, false));
    pages.extend(writer.add_packet(&secondary_header(0x82), 0, false, false));
    pages.extend(writer.flush());

    let mut key = 0usize;
    for frame in 0..frames {
        let is_key = frame % 30 == 0;
        if is_key {
            key = frame;
        }
        let body = vec![if is_key { 0x00u8 } else { 0x40u8 }; 160];
        let granulepos = ((key as i64) << shift) | (frame - key) as i64;
        pages.extend(writer.add_packet(&body, granulepos, false, frame == frames - 1));
        if frame % 25 == 24 || frame == frames - 1 {
            pages.extend(writer.flush());
        }
    }

    let mut out = Vec::new();
    for page in pages {
        out.extend(page.serialize());
    }
    out
}

fn bench_rice(c: &mut Criterion) {
    let mut group = c.benchmark_group("rice");
    for &count in &[1_000usize, 100_000] {
        let offsets = generate_diffs(count, 0x9e3779b9);
        let granules = generate_diffs(count, 0x85ebca6b);
        let k_off = rice::optimal_parameter(&offsets);
        let k_gp = rice::optimal_parameter(&granules);
        let encoded = rice::encode_alternating(&offsets, &granules, k_off, k_gp);

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("encode_alternating", count), &count, |b, _| {
            b.iter(|| rice::encode_alternating(&offsets, &granules, k_off, k_gp));
        });
        group.bench_with_input(BenchmarkId::new("decode_alternating", count), &count, |b, _| {
            b.iter(|| rice::decode_alternating(&encoded, count, k_off, k_gp).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("optimal_parameter", count), &count, |b, _| {
            b.iter(|| rice::optimal_parameter(&offsets));
        });
    }
    group.finish();
}

fn bench_rewrite(c: &mut Criterion) {
    let mut group = c.benchmark_group("rewrite");
    for &frames in &[300usize, 3_000] {
        let file = generate_video_file(frames);
        group.throughput(Throughput::Bytes(file.len() as u64));
        group.bench_with_input(BenchmarkId::new("video", frames), &frames, |b, _| {
            b.iter(|| {
                let mut out = Vec::with_capacity(file.len() + 1024);
                Rewriter::new(IndexConfig::default())
                    .rewrite(Cursor::new(&file), &mut out)
                    .unwrap();
                out
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_rice, bench_rewrite);
criterion_main!(benches);
