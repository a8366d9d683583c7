//! Outstanding-credit ledger.
//!
//! One counter per (port, priority), stored flat and indexed through
//! [`PipeLayout::slot`]. Only the intake drains inside the regulator mutate
//! it; everything else gets read access.

use serde::{Deserialize, Serialize};

use crate::error::{CreditError, CreditResult};
use crate::pfc::PfcMask;
use crate::types::{PipeIndex, PipeLayout, PortId, Priority, Tick};

/// What to do with a credit return that has no outstanding credit behind it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnderflowPolicy {
    /// Wrap the unsigned counter, as the hardware model does.
    #[default]
    Wrap,
    /// Refuse the return with `CreditError::CreditUnderflow`.
    Reject,
    /// Leave the counter at zero.
    Saturate,
}

/// Result of applying one credit return.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReturnOutcome {
    /// Counter decremented normally
    Returned(u32),
    /// Counter was already zero and was handled per the underflow policy
    Underflowed(u32),
}

/// Flat array of outstanding credits for one pipe.
#[derive(Clone, Debug)]
pub struct CreditLedger {
    pipe: PipeIndex,
    layout: PipeLayout,
    counts: Vec<u32>,
    underflow: UnderflowPolicy,
}

impl CreditLedger {
    /// Creates a zeroed ledger.
    pub fn new(pipe: PipeIndex, layout: PipeLayout, underflow: UnderflowPolicy) -> Self {
        Self {
            pipe,
            layout,
            counts: vec![0; layout.slot_count()],
            underflow,
        }
    }

    /// Ports and priorities this ledger covers.
    pub fn layout(&self) -> PipeLayout {
        self.layout
    }

    /// How returns against a zero counter are handled.
    pub fn underflow_policy(&self) -> UnderflowPolicy {
        self.underflow
    }

    /// Outstanding credits for one (port, priority).
    pub fn get(&self, port: PortId, priority: Priority) -> CreditResult<u32> {
        Ok(self.counts[self.layout.slot(port, priority)?])
    }

    /// Sum of outstanding credits over every priority of `port`.
    pub fn port_in_use(&self, port: PortId) -> CreditResult<u64> {
        let range = self.layout.port_slots(port)?;
        Ok(self.counts[range].iter().map(|&c| c as u64).sum())
    }

    /// Sum over the priorities of `port` whose bit is clear in `paused`.
    pub fn port_in_use_unpaused(&self, port: PortId, paused: PfcMask) -> CreditResult<u64> {
        let range = self.layout.port_slots(port)?;
        Ok(self.counts[range]
            .iter()
            .enumerate()
            .filter(|(priority, _)| !paused.is_paused(*priority as Priority))
            .map(|(_, &c)| c as u64)
            .sum())
    }

    /// Takes one credit for `(port, priority)`.
    ///
    /// The port total after the increment, across all priorities, must not
    /// exceed `limit`. On violation nothing is changed.
    pub(crate) fn increment(
        &mut self,
        port: PortId,
        priority: Priority,
        limit: u32,
        tick: Tick,
    ) -> CreditResult<u32> {
        let slot = self.layout.slot(port, priority)?;
        let in_use = self.port_in_use(port)? + 1;
        if in_use > limit as u64 {
            return Err(CreditError::CreditOverflow {
                pipe: self.pipe,
                port,
                priority,
                in_use,
                limit,
                tick,
            });
        }
        self.counts[slot] += 1;
        Ok(self.counts[slot])
    }

    /// Returns one credit for `(port, priority)`.
    pub(crate) fn decrement(
        &mut self,
        port: PortId,
        priority: Priority,
        tick: Tick,
    ) -> CreditResult<ReturnOutcome> {
        let slot = self.layout.slot(port, priority)?;
        let count = self.counts[slot];
        if count > 0 {
            self.counts[slot] = count - 1;
            return Ok(ReturnOutcome::Returned(count - 1));
        }

        match self.underflow {
            UnderflowPolicy::Wrap => {
                self.counts[slot] = count.wrapping_sub(1);
                tracing::warn!(
                    pipe = self.pipe,
                    port,
                    priority,
                    tick,
                    "credit return without outstanding credit, counter wrapped"
                );
                Ok(ReturnOutcome::Underflowed(self.counts[slot]))
            }
            UnderflowPolicy::Saturate => {
                tracing::warn!(
                    pipe = self.pipe,
                    port,
                    priority,
                    tick,
                    "credit return without outstanding credit, ignored"
                );
                Ok(ReturnOutcome::Underflowed(0))
            }
            UnderflowPolicy::Reject => Err(CreditError::CreditUnderflow {
                pipe: self.pipe,
                port,
                priority,
                tick,
            }),
        }
    }

    /// Zeroes every priority of `port`.
    pub(crate) fn clear_port(&mut self, port: PortId) -> CreditResult<()> {
        let range = self.layout.port_slots(port)?;
        self.counts[range].fill(0);
        Ok(())
    }

    /// Read-only view of the raw counters in slot order.
    pub fn counts(&self) -> &[u32] {
        &self.counts
    }
}
