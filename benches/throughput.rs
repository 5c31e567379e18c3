//! Throughput benchmarks for batch and streaming processing

use bytes::Bytes;
use chunkflow::{
    collect_stream, create_transform_stage, process_in_chunks, run_pipeline, ChunkOptions,
    PipelineOptions, Stage, TransformOptions,
};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use futures::stream;
use std::hint::black_box;
use std::time::Duration;
use tokio::runtime::Runtime;

fn generate_test_data(size: usize) -> Vec<u8> {
    let pattern = b"Lorem ipsum dolor sit amet, consectetur adipiscing elit. ";
    let mut data = Vec::with_capacity(size);
    while data.len() < size {
        data.extend_from_slice(pattern);
    }
    data.truncate(size);
    data
}

fn checksum(data: &[u8]) -> u64 {
    data.iter().fold(0u64, |acc, &b| acc.rotate_left(5) ^ b as u64)
}

/// Batch mode across concurrency limits
fn batch_concurrency(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let data = Bytes::from(generate_test_data(8 * 1024 * 1024));

    let mut group = c.benchmark_group("batch_concurrency");
    group.throughput(Throughput::Bytes(data.len() as u64));
    group.measurement_time(Duration::from_secs(10));

    for concurrency in [1, 2, 4, 8] {
        group.bench_with_input(
            BenchmarkId::from_parameter(concurrency),
            &concurrency,
            |b, &concurrency| {
                b.iter(|| {
                    rt.block_on(async {
                        let outcomes = process_in_chunks(
                            data.clone(),
                            |chunk, _| async move { Ok::<_, String>(checksum(&chunk)) },
                            ChunkOptions::default()
                                .with_chunk_size(256 * 1024)
                                .with_concurrency(concurrency),
                        )
                        .await
                        .unwrap();
                        black_box(outcomes)
                    })
                });
            },
        );
    }

    group.finish();
}

/// Streaming pipeline across unit sizes
fn pipeline_unit_size(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let total = 4 * 1024 * 1024;

    let mut group = c.benchmark_group("pipeline_unit_size");
    group.throughput(Throughput::Bytes(total as u64));

    for unit_size in [4 * 1024, 64 * 1024, 512 * 1024] {
        let units: Vec<Bytes> = generate_test_data(total)
            .chunks(unit_size)
            .map(Bytes::copy_from_slice)
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(unit_size), &units, |b, units| {
            b.iter(|| {
                rt.block_on(async {
                    let (sink, collected) = collect_stream();
                    let stats = run_pipeline(
                        vec![
                            Stage::bytes_source(stream::iter(units.clone())),
                            create_transform_stage(
                                |data: Bytes, _: usize| async move {
                                    Ok::<_, String>(Bytes::from(data.to_ascii_uppercase()))
                                },
                                TransformOptions::default(),
                            )
                            .unwrap(),
                            Stage::sink(sink),
                        ],
                        PipelineOptions::default(),
                    )
                    .await
                    .unwrap();
                    black_box((stats, collected.len()))
                })
            });
        });
    }

    group.finish();
}

criterion_group!(benches, batch_concurrency, pipeline_unit_size);
criterion_main!(benches);
