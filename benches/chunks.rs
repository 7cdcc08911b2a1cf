//! Chunk write and read throughput benchmarks.
//!
//! Writes go through the append-mode fast path (partial index cache);
//! reads exercise the binary search plus a positional payload read.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use gsd::{ElementType, GsdFile, OpenMode};
use tempfile::tempdir;

const COLUMNS: u32 = 3;
const ELEM_SIZE: usize = 4;

fn bench_write_chunk(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_chunk");

    for rows in [64u64, 1024, 16384] {
        let payload = rows as usize * COLUMNS as usize * ELEM_SIZE;
        group.throughput(Throughput::Bytes(payload as u64));
        group.bench_with_input(BenchmarkId::from_parameter(rows), &rows, |b, &rows| {
            let dir = tempdir().unwrap();
            let path = dir.path().join("bench.gsd");
            let mut gsd =
                GsdFile::create_and_open(&path, "bench", "s", 1, OpenMode::Append, false).unwrap();
            let data = vec![1u8; payload];

            b.iter(|| {
                gsd.write_chunk(
                    "particles/position",
                    ElementType::Float,
                    rows,
                    COLUMNS,
                    0,
                    black_box(&data),
                )
                .unwrap();
                gsd.end_frame().unwrap();
            });
        });
    }

    group.finish();
}

fn bench_find_and_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("find_and_read");

    for frames in [128u64, 4096] {
        group.bench_with_input(
            BenchmarkId::new("random_frame", frames),
            &frames,
            |b, &frames| {
                let dir = tempdir().unwrap();
                let path = dir.path().join("bench.gsd");
                let mut gsd =
                    GsdFile::create_and_open(&path, "bench", "s", 1, OpenMode::ReadWrite, false)
                        .unwrap();
                let data = vec![1u8; 1024 * ELEM_SIZE];
                for _ in 0..frames {
                    gsd.write_chunk(
                        "particles/position",
                        ElementType::Float,
                        1024,
                        1,
                        0,
                        &data,
                    )
                    .unwrap();
                    gsd.end_frame().unwrap();
                }
                gsd.close().unwrap();

                let gsd = GsdFile::open(&path, OpenMode::ReadOnly).unwrap();
                let mut buf = vec![0u8; data.len()];
                let mut frame = 0u64;
                b.iter(|| {
                    // stride through frames to defeat any locality
                    frame = (frame + 61) % frames;
                    let entry = gsd
                        .find_chunk(black_box(frame), "particles/position")
                        .unwrap();
                    gsd.read_chunk(&mut buf, &entry).unwrap();
                    black_box(&buf);
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_write_chunk, bench_find_and_read);
criterion_main!(benches);
