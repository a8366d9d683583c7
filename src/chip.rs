//! Chip-level driver: one credit regulator per pipe.
//!
//! The chip owns a regulator per pipe plus the collaborators they share: a
//! port speed table and an availability table. Each `step()` ticks every pipe
//! exactly once. Pipes never share ledgers or queues, so with the `parallel`
//! feature they are ticked concurrently using rayon.
//!
//! # Feature Flag
//!
//! ```toml
//! [dependencies]
//! pexcredit = { version = "0.1", features = ["parallel"] }
//! ```

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use std::sync::Arc;

use crate::availability::{CreditStateSink, CreditStateTable};
use crate::config::{CreditConfig, PauseScope};
use crate::error::{CreditError, CreditResult};
use crate::pfc::{NoPause, PauseStateProvider, PortPauseTable, SharedPauseMask};
use crate::regulator::{PexCreditRegulator, TickReport};
use crate::speed::{PortSpeedProvider, PortSpeedTable};
use crate::stats::{ChipStats, Timer};
use crate::types::{PipeIndex, PortId, Tick};

/// Producer-side pause handle of one pipe.
#[derive(Clone, Debug)]
pub enum PauseHandle {
    Global(SharedPauseMask),
    PerPort(PortPauseTable),
}

/// All pipes of a chip.
pub struct PexCreditChip {
    pipes: Vec<PexCreditRegulator>,
    pause: Vec<Option<PauseHandle>>,
    speeds: Arc<PortSpeedTable>,
    state: Arc<CreditStateTable>,
    current_tick: Tick,
    /// Number of worker threads (0 = auto)
    #[cfg_attr(not(feature = "parallel"), allow(dead_code))]
    num_threads: usize,
}

impl PexCreditChip {
    /// Builds and initializes every pipe described by `config`.
    pub fn from_config(config: &CreditConfig) -> CreditResult<Self> {
        let layout = config.layout.pipe_layout();
        layout.validate()?;
        let pipe_count = config.layout.pipes;

        let speeds = Arc::new(PortSpeedTable::new(
            pipe_count,
            layout.ports_per_pipe,
            config.port_speeds.default_mode,
        ));
        for o in &config.port_speeds.overrides {
            if o.pipe as usize >= pipe_count {
                return Err(CreditError::PipeOutOfRange {
                    pipe: o.pipe,
                    pipes: pipe_count,
                });
            }
            if !speeds.set_port_speed(o.pipe, o.port, o.mode) {
                return Err(CreditError::PortOutOfRange {
                    port: o.port,
                    ports: layout.ports_per_pipe,
                });
            }
        }
        let state = Arc::new(CreditStateTable::new(pipe_count, layout.ports_per_pipe));

        let mut pipes = Vec::with_capacity(pipe_count);
        let mut pause = Vec::with_capacity(pipe_count);
        for index in 0..pipe_count {
            let (handle, provider) = match config.pause {
                PauseScope::None => (None, Box::new(NoPause) as Box<dyn PauseStateProvider>),
                PauseScope::Global => {
                    let mask = SharedPauseMask::new();
                    (
                        Some(PauseHandle::Global(mask.clone())),
                        Box::new(mask) as Box<dyn PauseStateProvider>,
                    )
                }
                PauseScope::PerPort => {
                    let table = PortPauseTable::new(layout.ports_per_pipe);
                    (
                        Some(PauseHandle::PerPort(table.clone())),
                        Box::new(table) as Box<dyn PauseStateProvider>,
                    )
                }
            };

            let mut regulator = PexCreditRegulator::new(index as PipeIndex, layout)?
                .with_limit_policy(config.credit_limits)
                .with_underflow_policy(config.underflow)
                .with_pause_provider(provider);
            regulator.init(
                Arc::clone(&speeds) as Arc<dyn PortSpeedProvider>,
                Arc::clone(&state) as Arc<dyn CreditStateSink>,
            );
            pipes.push(regulator);
            pause.push(handle);
        }

        tracing::info!(
            pipes = pipe_count,
            ports_per_pipe = layout.ports_per_pipe,
            priorities_per_port = layout.priorities_per_port,
            pause = ?config.pause,
            underflow = ?config.underflow,
            "pex credit chip built"
        );

        Ok(Self {
            pipes,
            pause,
            speeds,
            state,
            current_tick: 0,
            num_threads: 0,
        })
    }

    /// Sets the number of worker threads.
    ///
    /// Pass 0 for automatic detection. Only used with the `parallel` feature.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.num_threads = threads;
        self
    }

    pub fn pipe_count(&self) -> usize {
        self.pipes.len()
    }

    pub fn pipe(&self, index: PipeIndex) -> Option<&PexCreditRegulator> {
        self.pipes.get(index as usize)
    }

    pub fn pipe_mut(&mut self, index: PipeIndex) -> Option<&mut PexCreditRegulator> {
        self.pipes.get_mut(index as usize)
    }

    /// Pause producer for `pipe`, absent when pause is disabled.
    pub fn pause_handle(&self, pipe: PipeIndex) -> Option<&PauseHandle> {
        self.pause.get(pipe as usize).and_then(Option::as_ref)
    }

    pub fn speeds(&self) -> &Arc<PortSpeedTable> {
        &self.speeds
    }

    pub fn state(&self) -> &Arc<CreditStateTable> {
        &self.state
    }

    /// Published flag for `port` of `pipe` after the last step.
    pub fn credit_available(&self, pipe: PipeIndex, port: PortId) -> bool {
        self.state.credit_available(pipe, port)
    }

    pub fn current_tick(&self) -> Tick {
        self.current_tick
    }

    /// Ticks every pipe once.
    ///
    /// Every pipe runs its tick even if another fails; the first error in
    /// pipe order is returned and the chip tick does not advance. Pipes are
    /// ticked concurrently with the `parallel` feature.
    pub fn step(&mut self) -> CreditResult<Vec<TickReport>> {
        #[cfg(not(feature = "parallel"))]
        let results: Vec<CreditResult<TickReport>> = self
            .pipes
            .iter_mut()
            .map(PexCreditRegulator::tick)
            .collect();

        #[cfg(feature = "parallel")]
        let results: Vec<CreditResult<TickReport>> = self
            .pipes
            .par_iter_mut()
            .map(PexCreditRegulator::tick)
            .collect();

        let reports = results.into_iter().collect::<CreditResult<Vec<_>>>()?;
        self.current_tick += 1;
        Ok(reports)
    }

    /// Runs `ticks` steps, aborting on the first credit error.
    ///
    /// # Panics
    ///
    /// Panics with the offending pipe, port, priority and tick when any pipe
    /// fails, mirroring a fatal model assertion.
    pub fn run(&mut self, ticks: u64) {
        #[cfg(feature = "parallel")]
        if self.num_threads > 0 {
            rayon::ThreadPoolBuilder::new()
                .num_threads(self.num_threads)
                .build_global()
                .ok(); // Ignore if already configured
        }

        for _ in 0..ticks {
            if let Err(err) = self.step() {
                tracing::error!(tick = self.current_tick + 1, error = %err, "pex credit chip step failed");
                panic!("pex credit chip: {}", err);
            }
        }
    }

    /// Runs `ticks` steps and returns timed statistics.
    pub fn run_timed(&mut self, name: &str, ticks: u64) -> ChipStats {
        let mut stats = ChipStats::new().with_name(name);
        stats.record_start();
        let timer = Timer::start();

        self.run(ticks);

        stats.record_end();
        self.fill_stats(&mut stats);
        stats.compute_timing(timer.elapsed_ms());
        stats
    }

    /// Runs the tick count of `config.simulation` at its log level.
    ///
    /// Returns timed statistics when `collect_stats` is set.
    ///
    /// # Panics
    ///
    /// Panics on the first credit error, like [`PexCreditChip::run`].
    pub fn run_configured(&mut self, config: &CreditConfig) -> Option<ChipStats> {
        let sim = &config.simulation;
        crate::init_logging(&sim.log_level);

        if sim.collect_stats {
            Some(self.run_timed("pexcredit", sim.ticks))
        } else {
            self.run(sim.ticks);
            None
        }
    }

    /// Statistics snapshot without timing.
    pub fn stats(&self) -> ChipStats {
        let mut stats = ChipStats::new();
        self.fill_stats(&mut stats);
        stats
    }

    fn fill_stats(&self, stats: &mut ChipStats) {
        stats.final_tick = self.current_tick;
        for regulator in &self.pipes {
            stats.pipes.insert(regulator.pipe(), regulator.stats().clone());
        }
    }

    pub fn export_stats(&self) -> serde_json::Value {
        let pipes: Vec<serde_json::Value> =
            self.pipes.iter().map(PexCreditRegulator::export_stats).collect();
        serde_json::json!({
            "chip": {
                "current_tick": self.current_tick,
                "pipe_count": self.pipes.len(),
            },
            "pipes": pipes,
        })
    }
}

impl std::fmt::Debug for PexCreditChip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PexCreditChip")
            .field("pipes", &self.pipes.len())
            .field("current_tick", &self.current_tick)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CreditConfigBuilder, PortSpeedOverride};
    use crate::speed::SpeedMode;

    fn chip(pause: PauseScope) -> PexCreditChip {
        let config = CreditConfigBuilder::new()
            .layout(2, 4, 8)
            .default_speed(SpeedMode::Speed100G)
            .port_speed(1, 0, SpeedMode::Speed400G)
            .pause(pause)
            .build()
            .unwrap();
        PexCreditChip::from_config(&config).unwrap()
    }

    #[test]
    fn test_chip_creation() {
        let chip = chip(PauseScope::None);
        assert_eq!(chip.pipe_count(), 2);
        assert_eq!(chip.current_tick(), 0);
        assert!(chip.pipe(0).unwrap().is_initialized());
        assert!(chip.pipe(2).is_none());
        assert!(chip.pause_handle(0).is_none());
        assert_eq!(chip.pipe(1).unwrap().credit_limit(0).unwrap(), 32);
        assert_eq!(chip.pipe(0).unwrap().credit_limit(0).unwrap(), 8);
    }

    #[test]
    fn test_override_for_missing_pipe_names_the_pipe() {
        let mut config = CreditConfigBuilder::new().layout(2, 4, 8).build().unwrap();
        config.port_speeds.overrides.push(PortSpeedOverride {
            pipe: 5,
            port: 1,
            mode: SpeedMode::Speed400G,
        });
        assert_eq!(
            PexCreditChip::from_config(&config).unwrap_err(),
            CreditError::PipeOutOfRange { pipe: 5, pipes: 2 }
        );

        config.port_speeds.overrides[0].pipe = 1;
        config.port_speeds.overrides[0].port = 4;
        assert_eq!(
            PexCreditChip::from_config(&config).unwrap_err(),
            CreditError::PortOutOfRange { port: 4, ports: 4 }
        );
    }

    #[test]
    fn test_step_ticks_every_pipe() {
        let mut chip = chip(PauseScope::None);
        let reports = chip.step().unwrap();
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.tick == 1));
        assert_eq!(chip.current_tick(), 1);
        assert!(chip.credit_available(0, 3));
        assert!(chip.credit_available(1, 3));
    }

    #[test]
    fn test_pipes_are_isolated() {
        let mut chip = chip(PauseScope::None);
        for _ in 0..8 {
            chip.pipe(0).unwrap().submit_dequeue(1, 0).unwrap();
        }
        chip.step().unwrap();
        assert!(!chip.credit_available(0, 1));
        assert!(chip.credit_available(1, 1));
        assert_eq!(chip.pipe(1).unwrap().port_in_use(1).unwrap(), 0);
    }

    #[test]
    fn test_pause_handles_per_scope() {
        let chip_global = chip(PauseScope::Global);
        assert!(matches!(
            chip_global.pause_handle(1),
            Some(PauseHandle::Global(_))
        ));
        let chip_port = chip(PauseScope::PerPort);
        assert!(matches!(
            chip_port.pause_handle(0),
            Some(PauseHandle::PerPort(_))
        ));
    }

    #[test]
    fn test_step_error_does_not_advance() {
        let mut chip = chip(PauseScope::None);
        for _ in 0..9 {
            chip.pipe(0).unwrap().submit_dequeue(0, 0).unwrap();
        }
        assert!(matches!(
            chip.step(),
            Err(CreditError::CreditOverflow { pipe: 0, .. })
        ));
        assert_eq!(chip.current_tick(), 0);

        // The healthy pipe still ran its tick
        assert_eq!(chip.pipe(0).unwrap().current_tick(), 0);
        assert_eq!(chip.pipe(1).unwrap().current_tick(), 1);
        assert!(chip.credit_available(1, 0));
    }

    #[test]
    fn test_step_ticks_pipes_after_a_failing_one() {
        let mut chip = chip(PauseScope::None);
        for _ in 0..9 {
            chip.pipe(0).unwrap().submit_dequeue(2, 1).unwrap();
            chip.pipe(1).unwrap().submit_dequeue(2, 1).unwrap();
        }
        chip.pipe(1).unwrap().submit_dequeue(3, 0).unwrap();

        // Both pipes fail; the error of the lower pipe wins
        assert!(matches!(
            chip.step(),
            Err(CreditError::CreditOverflow { pipe: 0, port: 2, .. })
        ));
        assert_eq!(chip.pipe(0).unwrap().port_in_use(2).unwrap(), 8);
        assert_eq!(chip.pipe(1).unwrap().port_in_use(2).unwrap(), 8);
        assert_eq!(chip.pipe(1).unwrap().pending_dequeues(), 2);
    }

    #[test]
    #[should_panic(expected = "credit overflow")]
    fn test_run_aborts_on_overflow() {
        let mut chip = chip(PauseScope::None);
        for _ in 0..9 {
            chip.pipe(0).unwrap().submit_dequeue(0, 0).unwrap();
        }
        chip.run(1);
    }

    #[test]
    fn test_run_configured() {
        let config = CreditConfigBuilder::new()
            .layout(1, 4, 8)
            .ticks(5)
            .log_level("warn")
            .collect_stats(true)
            .build()
            .unwrap();
        let mut chip = PexCreditChip::from_config(&config).unwrap();
        let stats = chip.run_configured(&config).unwrap();
        assert_eq!(stats.final_tick, 5);
        assert_eq!(stats.metadata.name, "pexcredit");

        let config = CreditConfigBuilder::new()
            .layout(1, 4, 8)
            .ticks(3)
            .collect_stats(false)
            .build()
            .unwrap();
        let mut chip = PexCreditChip::from_config(&config).unwrap();
        assert!(chip.run_configured(&config).is_none());
        assert_eq!(chip.current_tick(), 3);
    }

    #[test]
    fn test_run_timed_stats() {
        let mut chip = chip(PauseScope::None);
        chip.pipe(1).unwrap().submit_dequeue(0, 2).unwrap();
        let stats = chip.run_timed("smoke", 10);

        assert_eq!(stats.final_tick, 10);
        assert_eq!(stats.pipes.len(), 2);
        assert_eq!(stats.pipes[&1].dequeues_applied, 1);
        assert_eq!(stats.pipes[&0].ticks, 10);
        assert_eq!(stats.metadata.name, "smoke");

        let json = chip.export_stats();
        assert_eq!(json["chip"]["current_tick"], 10);
        assert_eq!(json["pipes"][1]["dequeues_applied"], 1);
    }
}
