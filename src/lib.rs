//! # PEX Credit Regulator
//!
//! Credit-based backpressure between a switch's per-port egress scheduler
//! and its packet extraction (PEX) stage, for cycle-driven chip models.
//!
//! Every packet the scheduler dequeues toward PEX takes one credit on its
//! (port, priority); PEX gives the credit back when it retires the packet.
//! Once per tick the regulator sums each port's outstanding credits over the
//! priorities that are not flow-control paused, compares the sum with a
//! ceiling derived from the port's speed, and publishes whether the port may
//! dequeue more.
//!
//! ## Design Principles
//!
//! - **Flat ledger**: one counter per (port, priority), indexed
//!   `port * priorities_per_port + priority`.
//! - **Tick-driven**: `tick()` drains all dequeues, then all returns,
//!   refreshes pause state, and republishes every port from scratch.
//! - **Injected collaborators**: port speeds and the availability sink are
//!   traits handed to `init()`.
//! - **Per-pipe isolation**: each pipe has its own regulator; the `chip`
//!   module ticks them together.
//!
//! ## Features
//!
//! - `parallel` - Tick pipes concurrently using rayon
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use pexcredit::{CreditStateSink, CreditStateTable, PexCreditRegulator, PipeLayout};
//! use pexcredit::speed::{SpeedMode, UniformSpeed};
//!
//! let mut regulator = PexCreditRegulator::new(0, PipeLayout::new(4, 8).unwrap()).unwrap();
//! let state = Arc::new(CreditStateTable::new(1, 4));
//! regulator.init(Arc::new(UniformSpeed(SpeedMode::Speed100G)), state.clone());
//!
//! for _ in 0..8 {
//!     regulator.submit_dequeue(0, 0).unwrap();
//! }
//! regulator.tick().unwrap();
//! assert!(!state.credit_available(0, 0));
//!
//! regulator.submit_return(0, 0).unwrap();
//! regulator.tick().unwrap();
//! assert!(state.credit_available(0, 0));
//! ```
//!
//! ## Configuration-Driven Setup
//!
//! ```rust,ignore
//! use pexcredit::{CreditConfig, PexCreditChip};
//!
//! let config = CreditConfig::from_yaml_file("chip.yaml")?;
//! let mut chip = PexCreditChip::from_config(&config)?;
//! if let Some(stats) = chip.run_configured(&config) {
//!     print!("{}", stats.summary());
//! }
//! ```

pub mod types;
pub mod error;
pub mod event;
pub mod speed;
pub mod ledger;
pub mod intake;
pub mod pfc;
pub mod availability;
pub mod regulator;
pub mod chip;
pub mod config;
pub mod stats;

// Re-export commonly used types
pub use types::{PipeIndex, PipeLayout, PortId, Priority, Tick};
pub use error::{CreditError, CreditResult};
pub use event::{CreditEvent, CreditEventKind, DequeueEvent, ReturnEvent};
pub use speed::{CreditLimitPolicy, PortSpeedProvider, PortSpeedTable, SpeedMode};
pub use ledger::{CreditLedger, UnderflowPolicy};
pub use intake::{EventIntake, IntakeSender};
pub use pfc::{NoPause, PauseStateProvider, PfcGate, PfcMask, PortPauseTable, SharedPauseMask};
pub use availability::{CreditStateSink, CreditStateTable, PortAvailability};
pub use regulator::{PexCreditRegulator, TickReport};
pub use chip::{PauseHandle, PexCreditChip};
pub use config::{ConfigError, CreditConfig, CreditConfigBuilder, PauseScope};
pub use stats::{ChipStats, RegulatorStats, Timer};

/// Initialize the tracing subscriber for logging.
///
/// Call this at the start of your program to enable logging. `RUST_LOG`
/// overrides `level` when set. Does nothing if a global subscriber is
/// already installed.
///
/// # Example
///
/// ```rust,ignore
/// pexcredit::init_logging("debug");
/// ```
pub fn init_logging(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init()
        .ok();
}
