//! Per-pipe PEX credit regulator.
//!
//! Tracks how many packets each (port, priority) has in flight between the
//! egress scheduler and packet extraction, and publishes once per tick
//! whether each port may dequeue more.
//!
//! # Tick sequence
//!
//! 1. Check that the speed provider and state sink were injected.
//! 2. Drain every pending dequeue event into the ledger (+1 each).
//! 3. Drain every pending return event out of the ledger (-1 each).
//! 4. Refresh the PFC pause masks.
//! 5. Recompute and publish availability for every port.
//!
//! All increments of a tick land before any decrement, so a port sitting at
//! its ceiling with a dequeue and a return in the same tick overflows.

use std::sync::Arc;

use crate::availability::{port_availability, AvailabilityPublisher, CreditStateSink, PortAvailability};
use crate::error::{CreditError, CreditResult};
use crate::event::{CreditEvent, CreditEventKind};
use crate::intake::{EventIntake, IntakeSender};
use crate::ledger::{CreditLedger, ReturnOutcome, UnderflowPolicy};
use crate::pfc::{NoPause, PauseStateProvider, PfcGate, PfcMask};
use crate::speed::{CreditLimitPolicy, PortSpeedProvider};
use crate::stats::RegulatorStats;
use crate::types::{PipeIndex, PipeLayout, PortId, Priority, Tick};

/// What one tick did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Tick number just completed, starting at 1
    pub tick: Tick,
    pub dequeues_applied: usize,
    pub returns_applied: usize,
    pub available_ports: usize,
    pub exhausted_ports: usize,
}

struct Collaborators {
    speeds: Arc<dyn PortSpeedProvider>,
    sink: Arc<dyn CreditStateSink>,
}

/// Credit regulator for one pipe.
///
/// Owns its ledger, intake queues and pause gate. Nothing is shared with
/// other pipes except the injected speed provider and state sink.
pub struct PexCreditRegulator {
    pipe: PipeIndex,
    layout: PipeLayout,
    policy: CreditLimitPolicy,
    ledger: CreditLedger,
    dequeues: EventIntake,
    returns: EventIntake,
    pfc: PfcGate,
    publisher: AvailabilityPublisher,
    collaborators: Option<Collaborators>,
    current_tick: Tick,
    stats: RegulatorStats,
}

impl PexCreditRegulator {
    /// Creates a regulator for `pipe` with the default ceilings, wrapping
    /// underflow and no pause source.
    pub fn new(pipe: PipeIndex, layout: PipeLayout) -> CreditResult<Self> {
        layout.validate()?;
        Ok(Self {
            pipe,
            layout,
            policy: CreditLimitPolicy::default(),
            ledger: CreditLedger::new(pipe, layout, UnderflowPolicy::default()),
            dequeues: EventIntake::new(CreditEventKind::Dequeue, layout),
            returns: EventIntake::new(CreditEventKind::Return, layout),
            pfc: PfcGate::new(layout.ports_per_pipe, Box::new(NoPause)),
            publisher: AvailabilityPublisher::new(pipe),
            collaborators: None,
            current_tick: 0,
            stats: RegulatorStats::default(),
        })
    }

    /// Overrides the speed-tier ceilings.
    pub fn with_limit_policy(mut self, policy: CreditLimitPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets how credit returns without outstanding credit are handled.
    ///
    /// Must be called before any event is applied; the ledger is rebuilt.
    pub fn with_underflow_policy(mut self, underflow: UnderflowPolicy) -> Self {
        self.ledger = CreditLedger::new(self.pipe, self.layout, underflow);
        self
    }

    /// Installs the source of pause state.
    pub fn with_pause_provider(mut self, provider: Box<dyn PauseStateProvider>) -> Self {
        self.pfc.set_provider(provider);
        self
    }

    /// Injects the speed provider and availability sink.
    pub fn init(&mut self, speeds: Arc<dyn PortSpeedProvider>, sink: Arc<dyn CreditStateSink>) {
        tracing::info!(
            pipe = self.pipe,
            ports = self.layout.ports_per_pipe,
            priorities = self.layout.priorities_per_port,
            "pex credit regulator initialized"
        );
        self.collaborators = Some(Collaborators { speeds, sink });
    }

    pub fn is_initialized(&self) -> bool {
        self.collaborators.is_some()
    }

    /// Queues "the scheduler handed one packet of `priority` on `port` toward PEX".
    pub fn submit_dequeue(&self, port: PortId, priority: Priority) -> CreditResult<()> {
        self.dequeues.push(CreditEvent::new(port, priority))
    }

    /// Queues "PEX retired the credit of one packet of `priority` on `port`".
    pub fn submit_return(&self, port: PortId, priority: Priority) -> CreditResult<()> {
        self.returns.push(CreditEvent::new(port, priority))
    }

    /// Handle for a scheduler running elsewhere to submit dequeues.
    pub fn dequeue_sender(&self) -> IntakeSender {
        self.dequeues.sender()
    }

    /// Handle for a PEX model running elsewhere to submit returns.
    pub fn return_sender(&self) -> IntakeSender {
        self.returns.sender()
    }

    fn collaborators(&self) -> CreditResult<&Collaborators> {
        self.collaborators
            .as_ref()
            .ok_or(CreditError::NotInitialized { pipe: self.pipe })
    }

    /// Ceiling for `port` at its current speed.
    pub fn credit_limit(&self, port: PortId) -> CreditResult<u32> {
        self.layout.check_port(port)?;
        let speeds = &self.collaborators()?.speeds;
        Ok(self.policy.limit(speeds.port_speed_mode(self.pipe, port)))
    }

    /// Advances one cycle.
    ///
    /// On error the tick is abandoned where it failed: the offending event
    /// and those queued behind it stay pending and nothing is published.
    pub fn tick(&mut self) -> CreditResult<TickReport> {
        let Collaborators { speeds, sink } = self.collaborators()?;
        let (speeds, sink) = (Arc::clone(speeds), Arc::clone(sink));

        let tick = self.current_tick + 1;
        let pipe = self.pipe;
        let policy = self.policy;
        let limit = |port: PortId| policy.limit(speeds.port_speed_mode(pipe, port));

        // Counted per event; a failed drain keeps what it already applied.
        let ledger = &mut self.ledger;
        let stats = &mut self.stats;
        let dequeues_applied = self.dequeues.drain(|event| {
            let count = ledger.increment(event.port, event.priority, limit(event.port), tick)?;
            stats.dequeues_applied += 1;
            tracing::trace!(pipe, tick, %event, count, "credit taken");
            Ok(())
        })?;

        let returns_applied = self.returns.drain(|event| {
            let outcome = ledger.decrement(event.port, event.priority, tick)?;
            stats.returns_applied += 1;
            match outcome {
                ReturnOutcome::Returned(count) => {
                    tracing::trace!(pipe, tick, %event, count, "credit returned");
                }
                ReturnOutcome::Underflowed(_) => stats.underflows += 1,
            }
            Ok(())
        })?;

        self.pfc.refresh(pipe, tick);

        let pfc = &self.pfc;
        let summary =
            self.publisher
                .publish_all(&self.ledger, sink.as_ref(), &limit, |port| pfc.mask(port))?;

        for port in self.layout.ports() {
            let in_use = self.ledger.port_in_use(port)?;
            self.stats.peak_port_in_use = self.stats.peak_port_in_use.max(in_use);
        }

        self.current_tick = tick;
        self.stats.ticks += 1;
        self.stats.exhausted_port_ticks += summary.exhausted as u64;

        tracing::debug!(
            pipe,
            tick,
            dequeues_applied,
            returns_applied,
            exhausted = summary.exhausted,
            "pex credit tick"
        );

        Ok(TickReport {
            tick,
            dequeues_applied,
            returns_applied,
            available_ports: summary.available,
            exhausted_ports: summary.exhausted,
        })
    }

    /// Advances one cycle, aborting the simulation on any credit error.
    ///
    /// # Panics
    ///
    /// Panics with the offending pipe, port, priority and tick when the tick
    /// fails, mirroring a fatal model assertion.
    pub fn tick_or_abort(&mut self) -> TickReport {
        match self.tick() {
            Ok(report) => report,
            Err(err) => {
                tracing::error!(pipe = self.pipe, error = %err, "pex credit tick failed");
                panic!("pex credit regulator: {}", err);
            }
        }
    }

    /// Availability of `port` from the current ledger and pause state.
    pub fn compute_availability(&self, port: PortId) -> CreditResult<bool> {
        let state = port_availability(
            &self.ledger,
            port,
            self.pfc.mask(port),
            self.credit_limit(port)?,
        )?;
        Ok(state == PortAvailability::Available)
    }

    /// Outstanding credits for one (port, priority).
    pub fn outstanding(&self, port: PortId, priority: Priority) -> CreditResult<u32> {
        self.ledger.get(port, priority)
    }

    /// Outstanding credits summed over every priority of `port`.
    pub fn port_in_use(&self, port: PortId) -> CreditResult<u64> {
        self.ledger.port_in_use(port)
    }

    /// Pause mask applied to `port` at the last tick.
    pub fn pause_mask(&self, port: PortId) -> PfcMask {
        self.pfc.mask(port)
    }

    /// Administrative reset of one port's counters, e.g. on port down.
    ///
    /// Queued events for the port are not touched.
    pub fn clear_port(&mut self, port: PortId) -> CreditResult<()> {
        tracing::info!(pipe = self.pipe, port, "clearing port credits");
        self.ledger.clear_port(port)
    }

    pub fn pending_dequeues(&self) -> usize {
        self.dequeues.pending()
    }

    pub fn pending_returns(&self) -> usize {
        self.returns.pending()
    }

    pub fn pipe(&self) -> PipeIndex {
        self.pipe
    }

    pub fn layout(&self) -> PipeLayout {
        self.layout
    }

    pub fn current_tick(&self) -> Tick {
        self.current_tick
    }

    pub fn ledger(&self) -> &CreditLedger {
        &self.ledger
    }

    pub fn stats(&self) -> &RegulatorStats {
        &self.stats
    }

    pub fn export_stats(&self) -> serde_json::Value {
        serde_json::json!({
            "pipe": self.pipe,
            "current_tick": self.current_tick,
            "ticks": self.stats.ticks,
            "dequeues_applied": self.stats.dequeues_applied,
            "returns_applied": self.stats.returns_applied,
            "underflows": self.stats.underflows,
            "exhausted_port_ticks": self.stats.exhausted_port_ticks,
            "peak_port_in_use": self.stats.peak_port_in_use,
            "pending_dequeues": self.pending_dequeues(),
            "pending_returns": self.pending_returns(),
            "paused_ports": self.pfc.paused_ports(),
        })
    }
}

impl std::fmt::Debug for PexCreditRegulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PexCreditRegulator")
            .field("pipe", &self.pipe)
            .field("layout", &self.layout)
            .field("current_tick", &self.current_tick)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::availability::CreditStateTable;
    use crate::pfc::SharedPauseMask;
    use crate::speed::{PortSpeedTable, SpeedMode, UniformSpeed};

    fn regulator(mode: SpeedMode) -> (PexCreditRegulator, Arc<CreditStateTable>) {
        let mut reg = PexCreditRegulator::new(0, PipeLayout::new(4, 8).unwrap()).unwrap();
        let table = Arc::new(CreditStateTable::new(1, 4));
        reg.init(Arc::new(UniformSpeed(mode)), table.clone());
        (reg, table)
    }

    #[test]
    fn test_tick_before_init_fails() {
        let mut reg = PexCreditRegulator::new(3, PipeLayout::new(4, 8).unwrap()).unwrap();
        assert_eq!(reg.tick(), Err(CreditError::NotInitialized { pipe: 3 }));
        assert!(reg.credit_limit(0).is_err());
        assert_eq!(reg.current_tick(), 0);
    }

    #[test]
    #[should_panic(expected = "used before init")]
    fn test_tick_or_abort_before_init_panics() {
        let mut reg = PexCreditRegulator::new(0, PipeLayout::new(4, 8).unwrap()).unwrap();
        reg.tick_or_abort();
    }

    #[test]
    fn test_empty_tick_publishes_all_available() {
        let (mut reg, table) = regulator(SpeedMode::Speed100G);
        let report = reg.tick().unwrap();
        assert_eq!(report.tick, 1);
        assert_eq!(report.available_ports, 4);
        assert_eq!(report.exhausted_ports, 0);
        assert_eq!(table.snapshot(0), vec![true; 4]);
    }

    #[test]
    fn test_submissions_apply_on_next_tick() {
        let (mut reg, _table) = regulator(SpeedMode::Speed100G);
        reg.submit_dequeue(1, 2).unwrap();
        reg.submit_dequeue(1, 2).unwrap();
        assert_eq!(reg.outstanding(1, 2).unwrap(), 0);
        assert_eq!(reg.pending_dequeues(), 2);

        let report = reg.tick().unwrap();
        assert_eq!(report.dequeues_applied, 2);
        assert_eq!(reg.outstanding(1, 2).unwrap(), 2);
        assert_eq!(reg.pending_dequeues(), 0);
    }

    #[test]
    fn test_credit_limit_follows_speed_changes() {
        let mut reg = PexCreditRegulator::new(0, PipeLayout::new(4, 8).unwrap()).unwrap();
        let speeds = Arc::new(PortSpeedTable::new(1, 4, SpeedMode::Speed10G));
        reg.init(speeds.clone(), Arc::new(CreditStateTable::new(1, 4)));

        assert_eq!(reg.credit_limit(2).unwrap(), 4);
        speeds.set_port_speed(0, 2, SpeedMode::Speed400G);
        assert_eq!(reg.credit_limit(2).unwrap(), 32);
        assert!(matches!(
            reg.credit_limit(4),
            Err(CreditError::PortOutOfRange { .. })
        ));
    }

    #[test]
    fn test_custom_limit_policy() {
        let mut reg = PexCreditRegulator::new(0, PipeLayout::new(2, 8).unwrap())
            .unwrap()
            .with_limit_policy(CreditLimitPolicy {
                tier_100g: 2,
                ..CreditLimitPolicy::default()
            });
        reg.init(
            Arc::new(UniformSpeed(SpeedMode::Speed100G)),
            Arc::new(CreditStateTable::new(1, 2)),
        );
        reg.submit_dequeue(0, 0).unwrap();
        reg.submit_dequeue(0, 0).unwrap();
        reg.tick().unwrap();
        assert!(!reg.compute_availability(0).unwrap());
    }

    #[test]
    fn test_overflow_leaves_tick_unpublished() {
        let (mut reg, table) = regulator(SpeedMode::Speed25G);
        for _ in 0..5 {
            reg.submit_dequeue(0, 0).unwrap();
        }
        let err = reg.tick().unwrap_err();
        assert!(matches!(
            err,
            CreditError::CreditOverflow {
                port: 0,
                in_use: 5,
                limit: 4,
                tick: 1,
                ..
            }
        ));
        assert_eq!(reg.outstanding(0, 0).unwrap(), 4);
        assert_eq!(reg.pending_dequeues(), 1);
        assert_eq!(reg.current_tick(), 0);
        assert_eq!(table.snapshot(0), vec![false; 4]);
    }

    #[test]
    fn test_failed_dequeue_drain_still_counted() {
        let (mut reg, _table) = regulator(SpeedMode::Speed25G);
        for _ in 0..5 {
            reg.submit_dequeue(1, 2).unwrap();
        }
        assert!(reg.tick().is_err());

        assert_eq!(reg.stats().dequeues_applied, 4);
        assert_eq!(reg.stats().dequeues_applied, reg.port_in_use(1).unwrap());
        assert_eq!(reg.export_stats()["dequeues_applied"], 4);
    }

    #[test]
    fn test_failed_return_drain_still_counted() {
        let mut reg = PexCreditRegulator::new(0, PipeLayout::new(4, 8).unwrap())
            .unwrap()
            .with_underflow_policy(UnderflowPolicy::Reject);
        reg.init(
            Arc::new(UniformSpeed(SpeedMode::Speed100G)),
            Arc::new(CreditStateTable::new(1, 4)),
        );
        reg.submit_dequeue(1, 0).unwrap();
        reg.submit_dequeue(1, 0).unwrap();
        reg.tick().unwrap();

        for _ in 0..3 {
            reg.submit_return(1, 0).unwrap();
        }
        assert!(matches!(
            reg.tick(),
            Err(CreditError::CreditUnderflow { port: 1, priority: 0, tick: 2, .. })
        ));
        assert_eq!(reg.stats().returns_applied, 2);
        assert_eq!(reg.stats().net_outstanding(), 0);
        assert_eq!(reg.port_in_use(1).unwrap(), 0);
        assert_eq!(reg.pending_returns(), 1);
    }

    #[test]
    fn test_reject_underflow_policy() {
        let mut reg = PexCreditRegulator::new(0, PipeLayout::new(4, 8).unwrap())
            .unwrap()
            .with_underflow_policy(UnderflowPolicy::Reject);
        reg.init(
            Arc::new(UniformSpeed(SpeedMode::Speed100G)),
            Arc::new(CreditStateTable::new(1, 4)),
        );
        reg.submit_return(2, 6).unwrap();
        assert!(matches!(
            reg.tick(),
            Err(CreditError::CreditUnderflow { port: 2, priority: 6, .. })
        ));
    }

    #[test]
    fn test_wrapped_underflow_is_counted() {
        let (mut reg, table) = regulator(SpeedMode::Speed100G);
        reg.submit_return(3, 0).unwrap();
        reg.tick().unwrap();

        assert_eq!(reg.stats().underflows, 1);
        assert_eq!(reg.outstanding(3, 0).unwrap(), u32::MAX);
        assert!(!table.credit_available(0, 3));
    }

    #[test]
    fn test_shared_pause_mask() {
        let shared = SharedPauseMask::new();
        let mut reg = PexCreditRegulator::new(0, PipeLayout::new(4, 8).unwrap())
            .unwrap()
            .with_pause_provider(Box::new(shared.clone()));
        reg.init(
            Arc::new(UniformSpeed(SpeedMode::Speed100G)),
            Arc::new(CreditStateTable::new(1, 4)),
        );

        shared.pause(5);
        reg.tick().unwrap();
        assert!(reg.pause_mask(0).is_paused(5));
        assert!(reg.pause_mask(3).is_paused(5));
    }

    #[test]
    fn test_clear_port() {
        let (mut reg, table) = regulator(SpeedMode::Speed100G);
        for _ in 0..8 {
            reg.submit_dequeue(2, 1).unwrap();
        }
        reg.tick().unwrap();
        assert!(!table.credit_available(0, 2));

        reg.clear_port(2).unwrap();
        reg.tick().unwrap();
        assert!(table.credit_available(0, 2));
        assert_eq!(reg.port_in_use(2).unwrap(), 0);
    }

    #[test]
    fn test_export_stats() {
        let (mut reg, _table) = regulator(SpeedMode::Speed100G);
        reg.submit_dequeue(0, 0).unwrap();
        reg.tick().unwrap();
        reg.submit_return(0, 0).unwrap();
        reg.submit_dequeue(1, 0).unwrap();
        reg.tick().unwrap();

        let stats = reg.export_stats();
        assert_eq!(stats["current_tick"], 2);
        assert_eq!(stats["ticks"], 2);
        assert_eq!(stats["dequeues_applied"], 2);
        assert_eq!(stats["returns_applied"], 1);
        assert_eq!(stats["peak_port_in_use"], 1);
        assert_eq!(reg.stats().net_outstanding(), 1);
    }
}
