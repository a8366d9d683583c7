//! Performance benchmarks for the PEX credit regulator.
//!
//! Run with: `cargo bench`
//! Or for specific bench: `cargo bench --bench regulator_bench`

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use pexcredit::speed::{SpeedMode, UniformSpeed};
use pexcredit::{
    CreditConfigBuilder, CreditStateTable, PauseScope, PexCreditChip, PexCreditRegulator,
    PipeLayout, PortId,
};

// ============================================================================
// Helpers
// ============================================================================

fn regulator(ports: usize) -> PexCreditRegulator {
    let mut regulator = PexCreditRegulator::new(0, PipeLayout::new(ports, 8).unwrap()).unwrap();
    regulator.init(
        Arc::new(UniformSpeed(SpeedMode::Speed400G)),
        Arc::new(CreditStateTable::new(1, ports)),
    );
    regulator
}

// ============================================================================
// Regulator Benchmarks
// ============================================================================

fn bench_idle_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("idle_tick");

    for ports in [8usize, 72, 256].iter() {
        group.throughput(Throughput::Elements(*ports as u64));
        group.bench_with_input(BenchmarkId::new("ports", ports), ports, |b, &ports| {
            let mut regulator = regulator(ports);
            b.iter(|| black_box(regulator.tick().unwrap()));
        });
    }

    group.finish();
}

fn bench_loaded_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("loaded_tick");

    for events in [16usize, 128, 1024].iter() {
        group.throughput(Throughput::Elements(*events as u64 * 2));
        group.bench_with_input(BenchmarkId::new("events", events), events, |b, &events| {
            let mut regulator = regulator(72);
            // Keep every port well below its 400G ceiling
            for i in 0..events {
                regulator.submit_dequeue((i % 72) as PortId, (i % 8) as u8).unwrap();
            }
            regulator.tick().unwrap();

            b.iter(|| {
                for i in 0..events {
                    let (port, priority) = ((i % 72) as PortId, (i % 8) as u8);
                    regulator.submit_dequeue(port, priority).unwrap();
                    regulator.submit_return(port, priority).unwrap();
                }
                black_box(regulator.tick().unwrap())
            });
        });
    }

    group.finish();
}

// ============================================================================
// Chip Benchmarks
// ============================================================================

fn bench_chip_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("chip_step");

    for pipes in [1usize, 4, 8].iter() {
        group.throughput(Throughput::Elements(*pipes as u64));
        group.bench_with_input(BenchmarkId::new("pipes", pipes), pipes, |b, &pipes| {
            let config = CreditConfigBuilder::new()
                .layout(pipes, 72, 8)
                .default_speed(SpeedMode::Speed100G)
                .pause(PauseScope::Global)
                .build()
                .unwrap();
            let mut chip = PexCreditChip::from_config(&config).unwrap();
            b.iter(|| black_box(chip.step().unwrap()));
        });
    }

    group.finish();
}

// ============================================================================
// Criterion Groups
// ============================================================================

criterion_group!(benches, bench_idle_tick, bench_loaded_tick, bench_chip_step);

criterion_main!(benches);
