//! Decode and session-tracking throughput.
//!
//! The game sends up to 60 Hz per packet kind across eight kinds, so the hot path has to
//! stay well under a millisecond per datagram.

use chrono::Utc;
use criterion::{BatchSize, Criterion, Throughput, criterion_group, criterion_main};
use srtrack::test_utils::{PacketBuilder, clean_race, wing_damage};
use srtrack::{Decoder, SessionConfig, SessionManager};
use std::hint::black_box;

fn bench_decode(c: &mut Criterion) {
    let builder = PacketBuilder::new(0xbeef);
    let decoder = Decoder::new(None);
    let lap = builder.lap_data(10.0, 0, 1234.5, 1, false);
    let status = builder.car_status(10.0, 0, wing_damage(12));
    let session = builder.session(10.0, 10, 11, 5793);

    let mut group = c.benchmark_group("decode");
    for (name, buf) in [("lap_data", &lap), ("car_status", &status), ("session", &session)] {
        group.throughput(Throughput::Bytes(buf.len() as u64));
        group.bench_function(name, |b| b.iter(|| black_box(decoder.decode(black_box(buf)))));
    }
    group.bench_function("rejects_foreign", |b| {
        let junk = vec![0xa5u8; 512];
        b.iter(|| black_box(decoder.decode(black_box(&junk)).is_err()))
    });
    group.finish();
}

fn bench_session_tracking(c: &mut Criterion) {
    let builder = PacketBuilder::new(0xbeef);
    let decoder = Decoder::new(None);
    let frames: Vec<_> = clean_race(&builder, 3)
        .iter()
        .map(|buf| decoder.decode(buf).expect("valid datagram"))
        .collect();

    let mut group = c.benchmark_group("session_manager");
    group.throughput(Throughput::Elements(frames.len() as u64));
    group.bench_function("three_lap_race", |b| {
        b.iter_batched(
            || SessionManager::new(SessionConfig::default()),
            |mut manager| {
                let now = Utc::now();
                let mut events = 0;
                for frame in &frames {
                    events += manager.on_frame(frame, now).len();
                }
                black_box(events)
            },
            BatchSize::SmallInput,
        )
    });
    group.finish();
}

criterion_group!(benches, bench_decode, bench_session_tracking);
criterion_main!(benches);
