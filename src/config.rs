//! Configuration for a chip of credit regulators.
//!
//! Supports YAML and JSON files.
//!
//! # Configuration File Structure
//!
//! ```yaml
//! simulation:
//!   ticks: 1000
//!   log_level: info
//!
//! layout:
//!   pipes: 4
//!   ports_per_pipe: 72
//!   priorities_per_port: 8
//!
//! credit_limits:
//!   tier_400g: 32
//!   tier_200g: 16
//!   tier_100g: 8
//!   default: 4
//!
//! underflow: wrap
//! pause: global
//!
//! port_speeds:
//!   default_mode: 100g
//!   overrides:
//!     - pipe: 0
//!       port: 4
//!       mode: 400g
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

use crate::ledger::UnderflowPolicy;
use crate::speed::{CreditLimitPolicy, SpeedMode};
use crate::types::{
    PipeIndex, PipeLayout, PortId, DEFAULT_PORTS_PER_PIPE, DEFAULT_PRIORITIES_PER_PORT,
};

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown file format: {0}")]
    UnknownFormat(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Run parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimulationParams {
    /// Ticks to run when driven by `PexCreditChip::run_configured`
    #[serde(default = "default_ticks")]
    pub ticks: u64,

    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Whether to collect wall-clock statistics
    #[serde(default)]
    pub collect_stats: bool,
}

fn default_ticks() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            ticks: default_ticks(),
            log_level: default_log_level(),
            collect_stats: false,
        }
    }
}

/// Chip shape.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LayoutConfig {
    #[serde(default = "default_pipes")]
    pub pipes: usize,

    #[serde(default = "default_ports_per_pipe")]
    pub ports_per_pipe: usize,

    #[serde(default = "default_priorities_per_port")]
    pub priorities_per_port: usize,
}

fn default_pipes() -> usize {
    1
}

fn default_ports_per_pipe() -> usize {
    DEFAULT_PORTS_PER_PIPE
}

fn default_priorities_per_port() -> usize {
    DEFAULT_PRIORITIES_PER_PORT
}

impl LayoutConfig {
    /// Per-pipe layout.
    pub fn pipe_layout(&self) -> PipeLayout {
        PipeLayout {
            ports_per_pipe: self.ports_per_pipe,
            priorities_per_port: self.priorities_per_port,
        }
    }
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            pipes: default_pipes(),
            ports_per_pipe: default_ports_per_pipe(),
            priorities_per_port: default_priorities_per_port(),
        }
    }
}

/// Where each regulator gets its pause masks from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseScope {
    /// Pause detection absent, nothing is ever paused
    #[default]
    None,
    /// One mask shared by every port of a pipe
    Global,
    /// One mask per port
    PerPort,
}

/// Explicit speed for one port.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpeedOverride {
    pub pipe: PipeIndex,
    pub port: PortId,
    pub mode: SpeedMode,
}

/// Port speeds at start of simulation.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PortSpeedConfig {
    #[serde(default)]
    pub default_mode: SpeedMode,

    #[serde(default)]
    pub overrides: Vec<PortSpeedOverride>,
}

/// Complete configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CreditConfig {
    #[serde(default)]
    pub simulation: SimulationParams,

    #[serde(default)]
    pub layout: LayoutConfig,

    #[serde(default)]
    pub credit_limits: CreditLimitPolicy,

    #[serde(default)]
    pub underflow: UnderflowPolicy,

    #[serde(default)]
    pub pause: PauseScope,

    #[serde(default)]
    pub port_speeds: PortSpeedConfig,
}

impl CreditConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> ConfigResult<Self> {
        let config: CreditConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let config: CreditConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a file, auto-detecting format.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        match ext.to_lowercase().as_str() {
            "yaml" | "yml" => Self::from_yaml_file(path),
            "json" => Self::from_json_file(path),
            _ => Err(ConfigError::UnknownFormat(ext.to_string())),
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let layout = &self.layout;
        if layout.pipes == 0 {
            return Err(ConfigError::Validation("layout.pipes must be non-zero".to_string()));
        }
        layout
            .pipe_layout()
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        let limits = &self.credit_limits;
        for (tier, limit) in [
            ("tier_400g", limits.tier_400g),
            ("tier_200g", limits.tier_200g),
            ("tier_100g", limits.tier_100g),
            ("default", limits.default_limit),
        ] {
            if limit == 0 {
                return Err(ConfigError::Validation(format!(
                    "credit_limits.{} must be non-zero",
                    tier
                )));
            }
        }

        let mut seen = HashSet::new();
        for o in &self.port_speeds.overrides {
            if o.pipe as usize >= layout.pipes {
                return Err(ConfigError::Validation(format!(
                    "speed override references non-existent pipe {}",
                    o.pipe
                )));
            }
            if o.port as usize >= layout.ports_per_pipe {
                return Err(ConfigError::Validation(format!(
                    "speed override references non-existent port {} on pipe {}",
                    o.port, o.pipe
                )));
            }
            if !seen.insert((o.pipe, o.port)) {
                return Err(ConfigError::Validation(format!(
                    "duplicate speed override for pipe {} port {}",
                    o.pipe, o.port
                )));
            }
        }

        Ok(())
    }

    pub fn to_yaml_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        std::fs::write(path, self.to_yaml()?)?;
        Ok(())
    }

    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn to_yaml(&self) -> ConfigResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn to_json(&self) -> ConfigResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Builder for creating a `CreditConfig` programmatically.
#[derive(Default)]
pub struct CreditConfigBuilder {
    config: CreditConfig,
}

impl CreditConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ticks(mut self, ticks: u64) -> Self {
        self.config.simulation.ticks = ticks;
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.simulation.log_level = level.into();
        self
    }

    pub fn collect_stats(mut self, enable: bool) -> Self {
        self.config.simulation.collect_stats = enable;
        self
    }

    pub fn layout(mut self, pipes: usize, ports_per_pipe: usize, priorities_per_port: usize) -> Self {
        self.config.layout = LayoutConfig {
            pipes,
            ports_per_pipe,
            priorities_per_port,
        };
        self
    }

    pub fn credit_limits(mut self, limits: CreditLimitPolicy) -> Self {
        self.config.credit_limits = limits;
        self
    }

    pub fn underflow(mut self, policy: UnderflowPolicy) -> Self {
        self.config.underflow = policy;
        self
    }

    pub fn pause(mut self, scope: PauseScope) -> Self {
        self.config.pause = scope;
        self
    }

    pub fn default_speed(mut self, mode: SpeedMode) -> Self {
        self.config.port_speeds.default_mode = mode;
        self
    }

    pub fn port_speed(mut self, pipe: PipeIndex, port: PortId, mode: SpeedMode) -> Self {
        self.config
            .port_speeds
            .overrides
            .push(PortSpeedOverride { pipe, port, mode });
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> ConfigResult<CreditConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
