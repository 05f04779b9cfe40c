//! Heap microbenchmarks.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use slotmalloc::{Config, Heap};
use std::hint::black_box;

fn bench_alloc_free_cycle(c: &mut Criterion) {
    let sizes: &[usize] = &[16, 64, 256, 1024, 4096, 32768, 200_000];
    let mut group = c.benchmark_group("alloc_free_cycle");
    let shared = Heap::new(Config::DEFAULT);
    let single = Heap::new(Config {
        single_threaded: true,
        ..Config::DEFAULT
    });

    for &size in sizes {
        group.bench_with_input(BenchmarkId::new("threaded", size), &size, |b, &sz| {
            b.iter(|| unsafe {
                let p = shared.allocate(black_box(sz)).unwrap();
                shared.deallocate(black_box(p.as_ptr()));
            });
        });
        group.bench_with_input(BenchmarkId::new("single", size), &size, |b, &sz| {
            b.iter(|| unsafe {
                let p = single.allocate(black_box(sz)).unwrap();
                single.deallocate(black_box(p.as_ptr()));
            });
        });
        group.bench_with_input(BenchmarkId::new("system", size), &size, |b, &sz| {
            b.iter(|| {
                let v = vec![0u8; sz];
                black_box(v);
            });
        });
    }
    group.finish();
}

fn bench_alloc_burst(c: &mut Criterion) {
    let mut group = c.benchmark_group("alloc_burst");
    let heap = Heap::new(Config::DEFAULT);

    group.bench_function("1000x64B", |b| {
        let mut ptrs = Vec::with_capacity(1000);
        b.iter(|| {
            ptrs.extend((0..1000).map(|_| heap.allocate(64).unwrap()));
            for p in ptrs.drain(..) {
                unsafe { heap.deallocate(p.as_ptr()) };
            }
        });
    });

    group.finish();
}

fn bench_realloc_grow(c: &mut Criterion) {
    let heap = Heap::new(Config::DEFAULT);
    c.bench_function("realloc_grow_16_to_1024", |b| {
        b.iter(|| unsafe {
            let mut p = heap.allocate(16).unwrap();
            for &size in black_box(&[32usize, 64, 128, 256, 512, 1024]) {
                p = heap.reallocate(p.as_ptr(), size).unwrap();
            }
            heap.deallocate(p.as_ptr());
        });
    });
}

fn bench_calloc(c: &mut Criterion) {
    let mut group = c.benchmark_group("calloc_free");
    let heap = Heap::new(Config::DEFAULT);
    for &size in &[64usize, 4096, 200_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &sz| {
            b.iter(|| unsafe {
                let p = heap.allocate_zeroed(1, black_box(sz)).unwrap();
                heap.deallocate(p.as_ptr());
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_alloc_free_cycle, bench_alloc_burst, bench_realloc_grow, bench_calloc);
criterion_main!(benches);
