//! Allocator churn benchmarks

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use ndb_common::config::ArenaConfig;
use ndb_common::consts::DEFAULT_GROUP_PAGES;
use ndb_malloc::{PageAllocator, PageArena};
use std::hint::black_box;

/// Alloc/release pairs of one size against a mostly free allocator
fn bench_alloc_release(c: &mut Criterion) {
    let mut group = c.benchmark_group("alloc_release");
    for pages in [1u32, 8, 64, 1024] {
        let mut alloc = PageAllocator::new(DEFAULT_GROUP_PAGES).unwrap();
        alloc.init(1 << 16).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(pages), &pages, |b, &pages| {
            b.iter(|| {
                let run = alloc.alloc(black_box(pages)).unwrap();
                alloc.release(run).unwrap();
            });
        });
    }
    group.finish();
}

/// Mixed sizes held in a window, the pattern of send buffer turnover
fn bench_windowed_churn(c: &mut Criterion) {
    let mut alloc = PageAllocator::new(DEFAULT_GROUP_PAGES).unwrap();
    alloc.init(1 << 14).unwrap();
    let mut window = std::collections::VecDeque::new();
    let mut i = 0u32;

    c.bench_function("windowed_churn", |b| {
        b.iter(|| {
            if window.len() >= 64 {
                if let Some(run) = window.pop_front() {
                    alloc.release(run).unwrap();
                }
            }
            i = i.wrapping_mul(1_103_515_245).wrapping_add(12345);
            let run = alloc.alloc(1 + (i >> 16) % 32).unwrap();
            window.push_back(black_box(run));
        });
    });
}

/// Locked arena path including PageBuffer drop
fn bench_arena_buffer(c: &mut Criterion) {
    let arena = PageArena::new(&ArenaConfig::with_pages(32768, 256, 256)).unwrap();
    c.bench_function("arena_buffer_4_pages", |b| {
        b.iter(|| {
            let buf = arena.alloc(black_box(4)).unwrap();
            black_box(buf.len());
        });
    });
}

criterion_group!(
    benches,
    bench_alloc_release,
    bench_windowed_churn,
    bench_arena_buffer
);
criterion_main!(benches);
