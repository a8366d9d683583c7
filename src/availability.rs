//! Per-port credit availability and where it gets published.
//!
//! Availability is level-triggered: every tick recomputes every port from the
//! ledger and the pause masks, with no memory of the previous result.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::CreditResult;
use crate::ledger::CreditLedger;
use crate::pfc::PfcMask;
use crate::types::{PipeIndex, PortId};

/// Observable credit state of a port.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortAvailability {
    /// The scheduler may dequeue toward PEX
    Available,
    /// Every credit of the port is outstanding
    Exhausted,
}

impl PortAvailability {
    pub fn is_available(self) -> bool {
        self == PortAvailability::Available
    }
}

impl From<bool> for PortAvailability {
    fn from(available: bool) -> Self {
        if available {
            PortAvailability::Available
        } else {
            PortAvailability::Exhausted
        }
    }
}

/// Availability of one port.
///
/// Credits of every non-paused priority are summed and compared once against
/// the port's ceiling. There is no per-priority pool.
pub fn port_availability(
    ledger: &CreditLedger,
    port: PortId,
    paused: PfcMask,
    ceiling: u32,
) -> CreditResult<PortAvailability> {
    let used = ledger.port_in_use_unpaused(port, paused)?;
    Ok((used < ceiling as u64).into())
}

/// Destination of the published availability flags.
pub trait CreditStateSink: Send + Sync {
    /// Records whether `port` of `pipe` may dequeue toward PEX.
    fn set_credit_available(&self, pipe: PipeIndex, port: PortId, available: bool);

    /// Flag written by the most recent completed tick.
    fn credit_available(&self, pipe: PipeIndex, port: PortId) -> bool;
}

/// Availability flags for every port of every pipe.
///
/// Ports start out unavailable until their pipe's first tick publishes.
#[derive(Debug)]
pub struct CreditStateTable {
    ports_per_pipe: usize,
    flags: RwLock<Vec<bool>>,
}

impl CreditStateTable {
    pub fn new(pipes: usize, ports_per_pipe: usize) -> Self {
        Self {
            ports_per_pipe,
            flags: RwLock::new(vec![false; pipes * ports_per_pipe]),
        }
    }

    fn index(&self, pipe: PipeIndex, port: PortId) -> Option<usize> {
        let port = port as usize;
        (port < self.ports_per_pipe).then(|| pipe as usize * self.ports_per_pipe + port)
    }

    /// Number of ports currently flagged available in `pipe`.
    pub fn available_ports(&self, pipe: PipeIndex) -> usize {
        let start = pipe as usize * self.ports_per_pipe;
        let flags = self.flags.read();
        flags
            .get(start..start + self.ports_per_pipe)
            .map(|s| s.iter().filter(|&&f| f).count())
            .unwrap_or(0)
    }

    /// Copy of the flags for one pipe, in port order.
    pub fn snapshot(&self, pipe: PipeIndex) -> Vec<bool> {
        let start = pipe as usize * self.ports_per_pipe;
        let flags = self.flags.read();
        flags
            .get(start..start + self.ports_per_pipe)
            .map(|s| s.to_vec())
            .unwrap_or_default()
    }
}

impl CreditStateSink for CreditStateTable {
    fn set_credit_available(&self, pipe: PipeIndex, port: PortId, available: bool) {
        let mut flags = self.flags.write();
        match self.index(pipe, port) {
            Some(idx) if idx < flags.len() => flags[idx] = available,
            _ => tracing::warn!(pipe, port, "availability published for unknown port"),
        }
    }

    fn credit_available(&self, pipe: PipeIndex, port: PortId) -> bool {
        self.index(pipe, port)
            .and_then(|idx| self.flags.read().get(idx).copied())
            .unwrap_or(false)
    }
}

/// Counts from one publication pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PublishSummary {
    pub available: usize,
    pub exhausted: usize,
}

/// Writes the availability of every port of a pipe to a sink.
#[derive(Debug, Clone, Copy)]
pub struct AvailabilityPublisher {
    pipe: PipeIndex,
}

impl AvailabilityPublisher {
    pub fn new(pipe: PipeIndex) -> Self {
        Self { pipe }
    }

    /// Recomputes and publishes every port, in port order.
    ///
    /// `ceiling` and `mask` are consulted per port so speed and pause changes
    /// apply immediately.
    pub fn publish_all<C, M>(
        &self,
        ledger: &CreditLedger,
        sink: &dyn CreditStateSink,
        mut ceiling: C,
        mut mask: M,
    ) -> CreditResult<PublishSummary>
    where
        C: FnMut(PortId) -> u32,
        M: FnMut(PortId) -> PfcMask,
    {
        let mut summary = PublishSummary::default();
        for port in ledger.layout().ports() {
            let state = port_availability(ledger, port, mask(port), ceiling(port))?;
            sink.set_credit_available(self.pipe, port, state.is_available());
            match state {
                PortAvailability::Available => summary.available += 1,
                PortAvailability::Exhausted => summary.exhausted += 1,
            }
        }
        Ok(summary)
    }
}
