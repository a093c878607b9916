//! Block allocation, write and read throughput under the fixed-size block
//! manager (spec C1).

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sampling_rtree::block::{AccessMode, BlockManager};

fn allocate_and_free(c: &mut Criterion) {
    let mut group = c.benchmark_group("block_manager/allocate_and_free");
    for block_size in [1024usize, 4096, 16384] {
        group.throughput(Throughput::Bytes(block_size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(block_size), &block_size, |b, &block_size| {
            let dir = tempfile::tempdir().unwrap();
            let bm = BlockManager::create(dir.path().join("idx"), block_size).unwrap();
            b.iter(|| {
                let bid = bm.allocate(1).unwrap();
                bm.free(bid, 1).unwrap();
            });
        });
    }
    group.finish();
}

fn write_then_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("block_manager/write_then_read");
    let block_size = 8192usize;
    let dir = tempfile::tempdir().unwrap();
    let bm = BlockManager::create(dir.path().join("idx"), block_size).unwrap();
    let bid = bm.allocate(1).unwrap();

    group.throughput(Throughput::Bytes(block_size as u64));
    group.bench_function("write", |b| {
        b.iter(|| {
            let mut h = bm.get(bid, AccessMode::WRITE).unwrap();
            let buf = h.buf_mut();
            buf[0] = black_box(buf[0].wrapping_add(1));
        });
    });
    group.bench_function("read", |b| {
        b.iter(|| {
            let h = bm.get(bid, AccessMode::READ).unwrap();
            black_box(h.buf()[0]);
        });
    });
    group.finish();
}

criterion_group!(benches, allocate_and_free, write_then_read);
criterion_main!(benches);
