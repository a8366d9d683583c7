//! Port speed tiers and the credit ceiling derived from them.
//!
//! The ceiling for a port is never cached: every lookup goes back to the
//! [`PortSpeedProvider`], so a renegotiated speed takes effect on the next
//! tick.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::types::{PipeIndex, PortId};

/// Negotiated speed of a port.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpeedMode {
    #[serde(rename = "1g")]
    Speed1G,
    #[serde(rename = "10g")]
    Speed10G,
    #[serde(rename = "25g")]
    Speed25G,
    #[serde(rename = "40g")]
    Speed40G,
    #[serde(rename = "50g")]
    Speed50G,
    #[serde(rename = "100g")]
    Speed100G,
    #[serde(rename = "200g")]
    Speed200G,
    #[serde(rename = "400g")]
    Speed400G,
    /// Port down or speed not (yet) negotiated
    #[default]
    #[serde(rename = "unknown")]
    Unknown,
}

impl SpeedMode {
    /// Maps a line rate in Gb/s to its mode; unlisted rates are `Unknown`.
    pub fn from_gbps(gbps: u32) -> Self {
        match gbps {
            1 => SpeedMode::Speed1G,
            10 => SpeedMode::Speed10G,
            25 => SpeedMode::Speed25G,
            40 => SpeedMode::Speed40G,
            50 => SpeedMode::Speed50G,
            100 => SpeedMode::Speed100G,
            200 => SpeedMode::Speed200G,
            400 => SpeedMode::Speed400G,
            _ => SpeedMode::Unknown,
        }
    }
}

/// Credit ceilings per speed tier.
///
/// Only the three high tiers get their own ceiling; every other mode,
/// including `Unknown`, falls through to `default_limit`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditLimitPolicy {
    #[serde(default = "default_tier_400g")]
    pub tier_400g: u32,
    #[serde(default = "default_tier_200g")]
    pub tier_200g: u32,
    #[serde(default = "default_tier_100g")]
    pub tier_100g: u32,
    #[serde(default = "default_lower_tiers", rename = "default")]
    pub default_limit: u32,
}

fn default_tier_400g() -> u32 {
    32
}

fn default_tier_200g() -> u32 {
    16
}

fn default_tier_100g() -> u32 {
    8
}

fn default_lower_tiers() -> u32 {
    4
}

impl CreditLimitPolicy {
    /// Maximum outstanding PEX credits for a port running at `mode`.
    pub fn limit(&self, mode: SpeedMode) -> u32 {
        match mode {
            SpeedMode::Speed400G => self.tier_400g,
            SpeedMode::Speed200G => self.tier_200g,
            SpeedMode::Speed100G => self.tier_100g,
            _ => self.default_limit,
        }
    }
}

impl Default for CreditLimitPolicy {
    fn default() -> Self {
        Self {
            tier_400g: default_tier_400g(),
            tier_200g: default_tier_200g(),
            tier_100g: default_tier_100g(),
            default_limit: default_lower_tiers(),
        }
    }
}

/// Source of the current speed mode of each port.
///
/// Implementations must be cheap to query; the regulator asks once per port
/// per tick and once per applied dequeue.
pub trait PortSpeedProvider: Send + Sync {
    /// Current speed mode of `port` in `pipe`.
    fn port_speed_mode(&self, pipe: PipeIndex, port: PortId) -> SpeedMode;
}

/// In-memory speed table covering every port of every pipe.
///
/// Ports without an explicit entry report the table's default mode.
#[derive(Debug)]
pub struct PortSpeedTable {
    ports_per_pipe: usize,
    default_mode: SpeedMode,
    modes: RwLock<Vec<Option<SpeedMode>>>,
}

impl PortSpeedTable {
    /// Creates a table where every port reports `default_mode`.
    pub fn new(pipes: usize, ports_per_pipe: usize, default_mode: SpeedMode) -> Self {
        Self {
            ports_per_pipe,
            default_mode,
            modes: RwLock::new(vec![None; pipes * ports_per_pipe]),
        }
    }

    fn index(&self, pipe: PipeIndex, port: PortId) -> Option<usize> {
        let port = port as usize;
        if port >= self.ports_per_pipe {
            return None;
        }
        let idx = pipe as usize * self.ports_per_pipe + port;
        (idx < self.modes.read().len()).then_some(idx)
    }

    /// Records a (re)negotiated speed. Returns `false` if the port is unknown.
    pub fn set_port_speed(&self, pipe: PipeIndex, port: PortId, mode: SpeedMode) -> bool {
        match self.index(pipe, port) {
            Some(idx) => {
                self.modes.write()[idx] = Some(mode);
                tracing::debug!(pipe, port, ?mode, "port speed updated");
                true
            }
            None => false,
        }
    }

    /// Forgets any explicit speed for the port, reverting to the default.
    pub fn clear_port_speed(&self, pipe: PipeIndex, port: PortId) {
        if let Some(idx) = self.index(pipe, port) {
            self.modes.write()[idx] = None;
        }
    }

    /// Mode reported for ports without an explicit entry.
    pub fn default_mode(&self) -> SpeedMode {
        self.default_mode
    }
}

impl PortSpeedProvider for PortSpeedTable {
    fn port_speed_mode(&self, pipe: PipeIndex, port: PortId) -> SpeedMode {
        self.index(pipe, port)
            .and_then(|idx| self.modes.read()[idx])
            .unwrap_or(self.default_mode)
    }
}

/// Every port of every pipe runs at the same mode.
#[derive(Clone, Copy, Debug)]
pub struct UniformSpeed(pub SpeedMode);

impl PortSpeedProvider for UniformSpeed {
    fn port_speed_mode(&self, _pipe: PipeIndex, _port: PortId) -> SpeedMode {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_mapping() {
        let policy = CreditLimitPolicy::default();
        assert_eq!(policy.limit(SpeedMode::Speed400G), 32);
        assert_eq!(policy.limit(SpeedMode::Speed200G), 16);
        assert_eq!(policy.limit(SpeedMode::Speed100G), 8);
    }

    #[test]
    fn test_lower_and_unknown_tiers_get_default() {
        let policy = CreditLimitPolicy::default();
        for mode in [
            SpeedMode::Speed1G,
            SpeedMode::Speed10G,
            SpeedMode::Speed25G,
            SpeedMode::Speed40G,
            SpeedMode::Speed50G,
            SpeedMode::Unknown,
        ] {
            assert_eq!(policy.limit(mode), 4, "{:?}", mode);
        }
        assert_eq!(policy.limit(SpeedMode::from_gbps(800)), 4);
    }

    #[test]
    fn test_custom_policy() {
        let policy = CreditLimitPolicy {
            tier_100g: 12,
            default_limit: 2,
            ..CreditLimitPolicy::default()
        };
        assert_eq!(policy.limit(SpeedMode::Speed100G), 12);
        assert_eq!(policy.limit(SpeedMode::Speed25G), 2);
        assert_eq!(policy.limit(SpeedMode::Speed400G), 32);
    }

    #[test]
    fn test_speed_table_defaults_and_overrides() {
        let table = PortSpeedTable::new(2, 4, SpeedMode::Speed100G);
        assert_eq!(table.port_speed_mode(0, 0), SpeedMode::Speed100G);

        assert!(table.set_port_speed(1, 3, SpeedMode::Speed400G));
        assert_eq!(table.port_speed_mode(1, 3), SpeedMode::Speed400G);
        assert_eq!(table.port_speed_mode(0, 3), SpeedMode::Speed100G);

        table.clear_port_speed(1, 3);
        assert_eq!(table.port_speed_mode(1, 3), SpeedMode::Speed100G);
    }

    #[test]
    fn test_speed_table_out_of_range() {
        let table = PortSpeedTable::new(1, 4, SpeedMode::Speed25G);
        assert!(!table.set_port_speed(0, 4, SpeedMode::Speed400G));
        assert!(!table.set_port_speed(1, 0, SpeedMode::Speed400G));
        assert_eq!(table.port_speed_mode(5, 0), SpeedMode::Speed25G);
    }

    #[test]
    fn test_speed_mode_serde_names() {
        let mode: SpeedMode = serde_json::from_str("\"400g\"").unwrap();
        assert_eq!(mode, SpeedMode::Speed400G);
        assert_eq!(serde_json::to_string(&SpeedMode::Unknown).unwrap(), "\"unknown\"");
    }
}
