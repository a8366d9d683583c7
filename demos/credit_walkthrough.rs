//! PEX Credit Walkthrough
//!
//! A small two-pipe chip where a greedy scheduler fills ports up to their
//! credit ceilings and a PEX model retires credits after a fixed latency.
//!
//! The walkthrough showcases:
//! - Speed-dependent ceilings (a 400G port next to 100G and 25G ports)
//! - Ports flipping between available and exhausted
//! - A PFC pause on one priority freeing a port's credit budget
//! - Statistics export
//!
//! Run with: `cargo run --example credit_walkthrough`

use std::collections::VecDeque;

use pexcredit::{
    CreditConfigBuilder, PauseHandle, PexCreditChip, PfcMask, PipeIndex, PortId, SpeedMode,
};

// ============================================================================
// Scenario Configuration
// ============================================================================

const PIPES: usize = 2;
const PORTS: usize = 4;
const PRIORITIES: usize = 8;
const PEX_LATENCY: usize = 6; // ticks from dequeue to credit return
const DEQUEUES_PER_TICK: usize = 2; // per port
const TICKS: u64 = 40;
const PAUSE_AT: u64 = 20;
const PAUSED_PRIORITY: u8 = 0;

// ============================================================================
// PEX model
// ============================================================================

/// Retires every dequeued packet `PEX_LATENCY` ticks later.
struct PexModel {
    in_flight: VecDeque<Vec<(PipeIndex, PortId, u8)>>,
}

impl PexModel {
    fn new() -> Self {
        Self {
            in_flight: (0..PEX_LATENCY).map(|_| Vec::new()).collect(),
        }
    }

    fn accept(&mut self, pipe: PipeIndex, port: PortId, priority: u8) {
        if let Some(last) = self.in_flight.back_mut() {
            last.push((pipe, port, priority));
        }
    }

    fn retire(&mut self) -> Vec<(PipeIndex, PortId, u8)> {
        let done = self.in_flight.pop_front().unwrap_or_default();
        self.in_flight.push_back(Vec::new());
        done
    }
}

fn main() {
    pexcredit::init_logging("info");

    let config = CreditConfigBuilder::new()
        .layout(PIPES, PORTS, PRIORITIES)
        .default_speed(SpeedMode::Speed100G)
        .port_speed(0, 0, SpeedMode::Speed400G)
        .port_speed(1, 3, SpeedMode::Speed25G)
        .pause(pexcredit::PauseScope::Global)
        .ticks(TICKS)
        .build()
        .expect("valid walkthrough config");
    let mut chip = PexCreditChip::from_config(&config).expect("chip builds");
    let mut pex = PexModel::new();

    println!("=== PEX Credit Walkthrough ===");
    for pipe in 0..PIPES as PipeIndex {
        let regulator = chip.pipe(pipe).expect("pipe exists");
        let limits: Vec<u32> = (0..PORTS as PortId)
            .map(|port| regulator.credit_limit(port).expect("port exists"))
            .collect();
        println!("pipe {} ceilings: {:?}", pipe, limits);
    }
    println!();

    // Publish initial availability
    chip.step().expect("first tick");

    for tick in 1..TICKS {
        if tick == PAUSE_AT {
            if let Some(PauseHandle::Global(mask)) = chip.pause_handle(0) {
                mask.set(PfcMask::NONE.with(PAUSED_PRIORITY));
                println!("-- tick {}: pausing priority {} on pipe 0 --", tick, PAUSED_PRIORITY);
            }
        }

        for (pipe, port, priority) in pex.retire() {
            chip.pipe(pipe)
                .expect("pipe exists")
                .submit_return(port, priority)
                .expect("valid return");
        }

        // Greedy scheduler: only dequeue into room that is left this tick
        for pipe in 0..PIPES as PipeIndex {
            let regulator = chip.pipe(pipe).expect("pipe exists");
            for port in 0..PORTS as PortId {
                if !chip.credit_available(pipe, port) {
                    continue;
                }
                let limit = regulator.credit_limit(port).expect("port exists") as u64;
                let room = limit.saturating_sub(regulator.port_in_use(port).expect("port exists"));
                let priority = (tick % PRIORITIES as u64) as u8;
                for _ in 0..room.min(DEQUEUES_PER_TICK as u64) {
                    regulator.submit_dequeue(port, priority).expect("valid dequeue");
                    pex.accept(pipe, port, priority);
                }
            }
        }

        chip.step().expect("credit accounting stays consistent");

        let row: Vec<String> = (0..PIPES as PipeIndex)
            .map(|pipe| {
                chip.state()
                    .snapshot(pipe)
                    .iter()
                    .map(|&available| if available { '+' } else { '.' })
                    .collect()
            })
            .collect();
        println!("tick {:>3}  {}", tick, row.join("  "));
    }

    println!();
    let stats = chip.stats().with_name("credit walkthrough");
    print!("{}", stats.summary());
}
