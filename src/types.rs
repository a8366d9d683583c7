//! Core type definitions for the credit regulator.
//!
//! Ports and priorities are addressed through a flat slot index
//! (`port * priorities_per_port + priority`) so every per-(port, priority)
//! table in the crate is a contiguous `Vec`.

use serde::{Deserialize, Serialize};

use crate::error::{CreditError, CreditResult};

/// Simulation cycle counter.
///
/// Incremented once per call to the regulator's `tick()`.
pub type Tick = u64;

/// Port number local to one pipe.
pub type PortId = u16;

/// Priority (class of service) index within a port.
pub type Priority = u8;

/// Index of a pipe within the chip.
pub type PipeIndex = u32;

/// Number of ports in one pipe unless configured otherwise.
pub const DEFAULT_PORTS_PER_PIPE: usize = 72;

/// Number of priorities per port unless configured otherwise.
pub const DEFAULT_PRIORITIES_PER_PORT: usize = 8;

/// Widest priority set a pause mask can describe.
pub const MAX_PRIORITIES_PER_PORT: usize = 32;

/// Shape of one pipe: how many ports, and how many priorities each port has.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipeLayout {
    /// Ports in the pipe
    pub ports_per_pipe: usize,
    /// Priorities per port
    pub priorities_per_port: usize,
}

impl PipeLayout {
    /// Creates a layout, rejecting empty or over-wide shapes.
    pub fn new(ports_per_pipe: usize, priorities_per_port: usize) -> CreditResult<Self> {
        let layout = Self {
            ports_per_pipe,
            priorities_per_port,
        };
        layout.validate()?;
        Ok(layout)
    }

    /// Checks that the layout can be indexed and masked.
    pub fn validate(&self) -> CreditResult<()> {
        if self.ports_per_pipe == 0 {
            return Err(CreditError::InvalidLayout(
                "ports_per_pipe must be non-zero".to_string(),
            ));
        }
        if self.ports_per_pipe > PortId::MAX as usize + 1 {
            return Err(CreditError::InvalidLayout(format!(
                "ports_per_pipe {} does not fit a port id",
                self.ports_per_pipe
            )));
        }
        if self.priorities_per_port == 0 || self.priorities_per_port > MAX_PRIORITIES_PER_PORT {
            return Err(CreditError::InvalidLayout(format!(
                "priorities_per_port must be in 1..={}, got {}",
                MAX_PRIORITIES_PER_PORT, self.priorities_per_port
            )));
        }
        Ok(())
    }

    /// Total number of (port, priority) slots.
    pub fn slot_count(&self) -> usize {
        self.ports_per_pipe * self.priorities_per_port
    }

    /// Checks that `port` belongs to this pipe.
    pub fn check_port(&self, port: PortId) -> CreditResult<()> {
        if (port as usize) < self.ports_per_pipe {
            Ok(())
        } else {
            Err(CreditError::PortOutOfRange {
                port,
                ports: self.ports_per_pipe,
            })
        }
    }

    /// Flat slot index for `(port, priority)`.
    pub fn slot(&self, port: PortId, priority: Priority) -> CreditResult<usize> {
        self.check_port(port)?;
        if (priority as usize) >= self.priorities_per_port {
            return Err(CreditError::PriorityOutOfRange {
                priority,
                priorities: self.priorities_per_port,
            });
        }
        Ok(port as usize * self.priorities_per_port + priority as usize)
    }

    /// Slot range covering every priority of `port`.
    pub fn port_slots(&self, port: PortId) -> CreditResult<std::ops::Range<usize>> {
        self.check_port(port)?;
        let start = port as usize * self.priorities_per_port;
        Ok(start..start + self.priorities_per_port)
    }

    /// Iterates every port id in the pipe.
    pub fn ports(&self) -> impl Iterator<Item = PortId> {
        (0..self.ports_per_pipe).map(|p| p as PortId)
    }
}

impl Default for PipeLayout {
    fn default() -> Self {
        Self {
            ports_per_pipe: DEFAULT_PORTS_PER_PIPE,
            priorities_per_port: DEFAULT_PRIORITIES_PER_PORT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_index() {
        let layout = PipeLayout::new(4, 8).unwrap();
        assert_eq!(layout.slot(0, 0).unwrap(), 0);
        assert_eq!(layout.slot(0, 7).unwrap(), 7);
        assert_eq!(layout.slot(1, 0).unwrap(), 8);
        assert_eq!(layout.slot(3, 5).unwrap(), 29);
        assert_eq!(layout.slot_count(), 32);
    }

    #[test]
    fn test_slot_bounds() {
        let layout = PipeLayout::new(4, 8).unwrap();
        assert_eq!(
            layout.slot(4, 0),
            Err(CreditError::PortOutOfRange { port: 4, ports: 4 })
        );
        assert_eq!(
            layout.slot(0, 8),
            Err(CreditError::PriorityOutOfRange {
                priority: 8,
                priorities: 8
            })
        );
    }

    #[test]
    fn test_port_slots() {
        let layout = PipeLayout::new(4, 8).unwrap();
        assert_eq!(layout.port_slots(2).unwrap(), 16..24);
        assert!(layout.port_slots(9).is_err());
    }

    #[test]
    fn test_invalid_layouts() {
        assert!(PipeLayout::new(0, 8).is_err());
        assert!(PipeLayout::new(4, 0).is_err());
        assert!(PipeLayout::new(4, 33).is_err());
        assert!(PipeLayout::new(4, 32).is_ok());
    }

    #[test]
    fn test_default_layout() {
        let layout = PipeLayout::default();
        assert_eq!(layout.ports_per_pipe, 72);
        assert_eq!(layout.priorities_per_port, 8);
        assert_eq!(layout.ports().count(), 72);
    }
}
