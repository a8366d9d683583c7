//! Statistics collection and export.
//!
//! Each regulator keeps its own [`RegulatorStats`]; [`ChipStats`] rolls the
//! pipes up and exports JSON, CSV or a readable summary.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use crate::types::{PipeIndex, Tick};

/// Counters kept by one pipe's regulator.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegulatorStats {
    /// Completed ticks
    pub ticks: u64,
    /// Dequeue events applied to the ledger
    pub dequeues_applied: u64,
    /// Return events applied to the ledger
    pub returns_applied: u64,
    /// Returns that found no outstanding credit
    pub underflows: u64,
    /// Sum over ticks of ports published as exhausted
    pub exhausted_port_ticks: u64,
    /// Highest per-port in-use count seen at publication
    pub peak_port_in_use: u64,
}

impl RegulatorStats {
    /// Credits currently outstanding according to the event counts.
    ///
    /// Diverges from the ledger only when underflows were wrapped or saturated.
    pub fn net_outstanding(&self) -> i64 {
        self.dequeues_applied as i64 - self.returns_applied as i64
    }
}

/// Metadata about a run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RunMetadata {
    pub name: String,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub version: String,
}

/// Wall-clock performance of a run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TimingStats {
    pub total_wall_time_ms: f64,
    pub ticks_per_second: f64,
}

/// Statistics for every pipe of a chip.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChipStats {
    pub metadata: RunMetadata,
    /// Tick reached by the chip
    pub final_tick: Tick,
    pub pipes: BTreeMap<PipeIndex, RegulatorStats>,
    pub timing: TimingStats,
}

impl ChipStats {
    pub fn new() -> Self {
        Self {
            metadata: RunMetadata {
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..RunMetadata::default()
            },
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.metadata.name = name.into();
        self
    }

    pub fn record_start(&mut self) {
        self.metadata.start_time = Some(unix_now());
    }

    pub fn record_end(&mut self) {
        self.metadata.end_time = Some(unix_now());
    }

    /// Derives throughput from the wall-clock duration of the run.
    pub fn compute_timing(&mut self, wall_time_ms: f64) {
        self.timing.total_wall_time_ms = wall_time_ms;
        if wall_time_ms > 0.0 {
            self.timing.ticks_per_second = self.final_tick as f64 / (wall_time_ms / 1000.0);
        }
    }

    /// Sum of every pipe's counters.
    pub fn totals(&self) -> RegulatorStats {
        self.pipes.values().fold(RegulatorStats::default(), |mut acc, s| {
            acc.ticks += s.ticks;
            acc.dequeues_applied += s.dequeues_applied;
            acc.returns_applied += s.returns_applied;
            acc.underflows += s.underflows;
            acc.exhausted_port_ticks += s.exhausted_port_ticks;
            acc.peak_port_in_use = acc.peak_port_in_use.max(s.peak_port_in_use);
            acc
        })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let json = self
            .to_json()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }

    /// Chip-wide totals as `metric,value` rows.
    pub fn to_csv(&self) -> String {
        let totals = self.totals();
        let mut csv = String::new();

        csv.push_str("metric,value\n");
        csv.push_str(&format!("final_tick,{}\n", self.final_tick));
        csv.push_str(&format!("pipes,{}\n", self.pipes.len()));
        csv.push_str(&format!("dequeues_applied,{}\n", totals.dequeues_applied));
        csv.push_str(&format!("returns_applied,{}\n", totals.returns_applied));
        csv.push_str(&format!("underflows,{}\n", totals.underflows));
        csv.push_str(&format!("exhausted_port_ticks,{}\n", totals.exhausted_port_ticks));
        csv.push_str(&format!("peak_port_in_use,{}\n", totals.peak_port_in_use));
        csv.push_str(&format!("wall_time_ms,{:.2}\n", self.timing.total_wall_time_ms));
        csv.push_str(&format!("ticks_per_second,{:.2}\n", self.timing.ticks_per_second));

        csv
    }

    /// One row per pipe.
    pub fn pipes_to_csv(&self) -> String {
        let mut csv = String::new();
        csv.push_str("pipe,ticks,dequeues_applied,returns_applied,underflows,exhausted_port_ticks,peak_port_in_use\n");
        for (pipe, s) in &self.pipes {
            csv.push_str(&format!(
                "{},{},{},{},{},{},{}\n",
                pipe,
                s.ticks,
                s.dequeues_applied,
                s.returns_applied,
                s.underflows,
                s.exhausted_port_ticks,
                s.peak_port_in_use,
            ));
        }
        csv
    }

    pub fn to_csv_file<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        std::fs::write(path, self.to_csv())
    }

    pub fn write_summary<W: Write>(&self, mut w: W) -> std::io::Result<()> {
        writeln!(w, "=== PEX Credit Statistics ===")?;
        writeln!(w)?;

        if !self.metadata.name.is_empty() {
            writeln!(w, "Name: {}", self.metadata.name)?;
        }
        if let Some(ref start) = self.metadata.start_time {
            writeln!(w, "Started: {}", start)?;
        }
        if let Some(ref end) = self.metadata.end_time {
            writeln!(w, "Ended: {}", end)?;
        }
        writeln!(w, "Final tick: {}", self.final_tick)?;
        writeln!(w, "Wall time: {:.2} ms", self.timing.total_wall_time_ms)?;
        writeln!(w, "Ticks/sec: {:.2}", self.timing.ticks_per_second)?;
        writeln!(w)?;

        writeln!(w, "--- Pipes ---")?;
        for (pipe, s) in &self.pipes {
            writeln!(w, "Pipe {}:", pipe)?;
            writeln!(w, "  Dequeues: {}, Returns: {}", s.dequeues_applied, s.returns_applied)?;
            writeln!(w, "  Exhausted port-ticks: {}", s.exhausted_port_ticks)?;
            writeln!(w, "  Peak port in-use: {}", s.peak_port_in_use)?;
            if s.underflows > 0 {
                writeln!(w, "  Underflows: {}", s.underflows)?;
            }
        }

        Ok(())
    }

    pub fn summary(&self) -> String {
        let mut buf = Vec::new();
        // Writing into a Vec cannot fail
        let _ = self.write_summary(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    }
}

/// A simple timer for measuring wall-clock time.
#[derive(Debug)]
pub struct Timer {
    start: std::time::Instant,
}

impl Timer {
    pub fn start() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::start()
    }
}

fn unix_now() -> String {
    let duration = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}s", duration.as_secs())
}
