//! Priority flow control gate.
//!
//! The gate keeps one pause mask per port and refreshes all of them once per
//! tick from a [`PauseStateProvider`]. A paused priority is left out of the
//! port's credit-in-use sum when availability is computed.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::types::{PipeIndex, PortId, Priority, Tick};

/// Pause bitmask: bit `i` set means priority `i` is paused.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PfcMask(u32);

impl PfcMask {
    /// No priority paused.
    pub const NONE: PfcMask = PfcMask(0);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Whether `priority` is paused. Priorities beyond the mask width never are.
    pub fn is_paused(self, priority: Priority) -> bool {
        (priority as u32) < u32::BITS && self.0 & (1 << priority) != 0
    }

    /// Copy of the mask with `priority` paused.
    #[must_use]
    pub fn with(self, priority: Priority) -> Self {
        if (priority as u32) < u32::BITS {
            Self(self.0 | (1 << priority))
        } else {
            self
        }
    }

    /// Copy of the mask with `priority` resumed.
    #[must_use]
    pub fn without(self, priority: Priority) -> Self {
        if (priority as u32) < u32::BITS {
            Self(self.0 & !(1 << priority))
        } else {
            self
        }
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for PfcMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PfcMask({:#010b})", self.0)
    }
}

/// Where pause state comes from.
///
/// Called once per port per tick, in port order, during the gate refresh.
pub trait PauseStateProvider: Send {
    /// Pause mask `port` should observe for `tick`.
    fn pause_mask(&mut self, pipe: PipeIndex, port: PortId, tick: Tick) -> PfcMask;
}

/// Pause detection not wired in: every priority is always running.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoPause;

impl PauseStateProvider for NoPause {
    fn pause_mask(&mut self, _pipe: PipeIndex, _port: PortId, _tick: Tick) -> PfcMask {
        PfcMask::NONE
    }
}

/// One mask applied to every port.
///
/// Clones share the mask, so a producer can hold one clone and flip bits
/// between ticks while the gate reads through another.
#[derive(Clone, Debug, Default)]
pub struct SharedPauseMask {
    mask: Arc<RwLock<PfcMask>>,
}

impl SharedPauseMask {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, mask: PfcMask) {
        *self.mask.write() = mask;
    }

    pub fn pause(&self, priority: Priority) {
        let mut mask = self.mask.write();
        *mask = mask.with(priority);
    }

    pub fn resume(&self, priority: Priority) {
        let mut mask = self.mask.write();
        *mask = mask.without(priority);
    }

    pub fn get(&self) -> PfcMask {
        *self.mask.read()
    }
}

impl PauseStateProvider for SharedPauseMask {
    fn pause_mask(&mut self, _pipe: PipeIndex, _port: PortId, _tick: Tick) -> PfcMask {
        self.get()
    }
}

/// Independent mask per port of one pipe. Clones share the table.
#[derive(Clone, Debug)]
pub struct PortPauseTable {
    masks: Arc<RwLock<Vec<PfcMask>>>,
}

impl PortPauseTable {
    pub fn new(ports: usize) -> Self {
        Self {
            masks: Arc::new(RwLock::new(vec![PfcMask::NONE; ports])),
        }
    }

    /// Sets the mask of one port. Returns `false` if the port is unknown.
    pub fn set(&self, port: PortId, mask: PfcMask) -> bool {
        match self.masks.write().get_mut(port as usize) {
            Some(slot) => {
                *slot = mask;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, port: PortId) -> PfcMask {
        self.masks
            .read()
            .get(port as usize)
            .copied()
            .unwrap_or(PfcMask::NONE)
    }
}

impl PauseStateProvider for PortPauseTable {
    fn pause_mask(&mut self, _pipe: PipeIndex, port: PortId, _tick: Tick) -> PfcMask {
        self.get(port)
    }
}

/// Per-port pause state as seen by the availability computation.
pub struct PfcGate {
    masks: Vec<PfcMask>,
    provider: Box<dyn PauseStateProvider>,
}

impl PfcGate {
    /// Gate for `ports` ports, initially all-clear.
    pub fn new(ports: usize, provider: Box<dyn PauseStateProvider>) -> Self {
        Self {
            masks: vec![PfcMask::NONE; ports],
            provider,
        }
    }

    /// Replaces the pause source. Masks keep their last value until the next refresh.
    pub fn set_provider(&mut self, provider: Box<dyn PauseStateProvider>) {
        self.provider = provider;
    }

    /// Pulls a fresh mask for every port.
    pub fn refresh(&mut self, pipe: PipeIndex, tick: Tick) {
        for (port, mask) in self.masks.iter_mut().enumerate() {
            *mask = self.provider.pause_mask(pipe, port as PortId, tick);
        }
    }

    /// Mask last pulled for `port`.
    pub fn mask(&self, port: PortId) -> PfcMask {
        self.masks
            .get(port as usize)
            .copied()
            .unwrap_or(PfcMask::NONE)
    }

    /// Ports with at least one paused priority.
    pub fn paused_ports(&self) -> usize {
        self.masks.iter().filter(|m| !m.is_empty()).count()
    }
}

impl fmt::Debug for PfcGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PfcGate")
            .field("paused_ports", &self.paused_ports())
            .finish()
    }
}
