//! Rating engine cost per corner and per incident, at the default and a large window.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use srtrack::types::IncidentKind;
use srtrack::{RatingConfig, RatingEngine};
use std::hint::black_box;

fn engine(window_capacity: usize) -> RatingEngine {
    let mut engine = RatingEngine::new(RatingConfig { window_capacity, ..RatingConfig::default() });
    for _ in 0..window_capacity {
        engine.register_clean_corner();
    }
    engine
}

fn bench_corners(c: &mut Criterion) {
    let mut group = c.benchmark_group("rating_engine");
    for capacity in [100usize, 1000] {
        group.bench_with_input(BenchmarkId::new("clean_corner", capacity), &capacity, |b, &n| {
            let mut engine = engine(n);
            b.iter(|| {
                engine.register_clean_corner();
                black_box(engine.current_rating())
            })
        });
        group.bench_with_input(
            BenchmarkId::new("incident_then_corner", capacity),
            &capacity,
            |b, &n| {
                let mut engine = engine(n);
                b.iter(|| {
                    engine.register_incident(IncidentKind::OffTrack, IncidentKind::OffTrack.weight());
                    engine.register_clean_corner();
                    black_box(engine.current_rating())
                })
            },
        );
    }
    group.bench_function("snapshot", |b| {
        let engine = engine(100);
        b.iter(|| black_box(engine.snapshot(None)))
    });
    group.finish();
}

criterion_group!(benches, bench_corners);
criterion_main!(benches);
