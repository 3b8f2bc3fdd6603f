//! Benchmarks for the stream bridges.

use std::io::Cursor;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use ollama_relay::config::Granularity;
use ollama_relay::upstream::ndjson::NdjsonDecoder;
use ollama_relay::upstream::process::read_fragments;

fn ndjson_body(objects: usize) -> Vec<u8> {
    (0..objects)
        .map(|i| {
            format!(
                "{{\"model\":\"llama3.2\",\"created_at\":\"2024-01-01T00:00:00Z\",\"response\":\"tok{i} \",\"done\":false}}\n"
            )
        })
        .collect::<String>()
        .into_bytes()
}

fn bench_ndjson_decoder(c: &mut Criterion) {
    let body = ndjson_body(2_000);

    c.bench_function("ndjson_2k_objects_one_per_chunk", |b| {
        let lines: Vec<&[u8]> = body.split_inclusive(|&b| b == b'\n').collect();
        b.iter(|| {
            let mut decoder = NdjsonDecoder::new(1024 * 1024);
            let mut n = 0;
            for line in &lines {
                n += decoder.push(black_box(line)).len();
            }
            n
        })
    });

    c.bench_function("ndjson_2k_objects_64b_chunks", |b| {
        b.iter(|| {
            let mut decoder = NdjsonDecoder::new(1024 * 1024);
            let mut n = 0;
            for chunk in body.chunks(64) {
                n += decoder.push(black_box(chunk)).len();
            }
            n + decoder.finish().len()
        })
    });
}

fn bench_char_reader(c: &mut Criterion) {
    let text = "The quick brown fox jumps over the lazy dog. Ünïcödé ✓\n".repeat(500);

    for (name, granularity) in [
        ("stdout_char_fragments", Granularity::Char),
        ("stdout_word_fragments", Granularity::Word),
    ] {
        c.bench_function(name, |b| {
            b.iter(|| {
                let mut bytes = 0;
                read_fragments(Cursor::new(black_box(text.as_bytes())), granularity, |f| {
                    bytes += f.len();
                    true
                });
                bytes
            })
        });
    }
}

criterion_group!(benches, bench_ndjson_decoder, bench_char_reader);
criterion_main!(benches);
