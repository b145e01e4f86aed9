//! Common utilities for acceptance tests.
//!
//! Provides helpers for:
//! - Building a bench whose hardware can be inspected from the test
//! - Writing temporary configuration files
//! - Checking run summaries against acceptance criteria

#![allow(dead_code)] // Not every suite uses every helper

use oc_common::BenchConfig;
use oc_runtime::{MemorySink, RunSummary, SimulatedPll, SimulatedRegister, StressBench};
use std::io::Write;
use tempfile::NamedTempFile;

/// A bench plus handles on its simulated hardware.
pub struct Rig {
    pub bench: StressBench,
    pub register: SimulatedRegister,
    pub pll: SimulatedPll,
    pub reports: MemorySink,
}

/// Configuration with a light workload so runs finish quickly.
pub fn quick_config(round_limit: u64) -> BenchConfig {
    let mut config = BenchConfig::default();
    config.workload.iterations = 500;
    config.round_limit = round_limit;
    config
}

/// Build a simulated bench that records reports instead of printing them.
pub fn rig(config: BenchConfig) -> Rig {
    rig_with_register(config, SimulatedRegister::default())
}

/// Same as [`rig`] with a caller-provided register word.
pub fn rig_with_register(config: BenchConfig, register: SimulatedRegister) -> Rig {
    let pll = SimulatedPll::default();
    let reports = MemorySink::new();
    let recorder = reports.clone();

    let bench = StressBench::builder()
        .register(register.clone())
        .clock_source(pll.clone())
        .simulated_collaborators()
        .config(config)
        .telemetry(move || Box::new(recorder.clone()))
        .build();

    Rig {
        bench,
        register,
        pll,
        reports,
    }
}

/// Write `content` to a temporary TOML file.
pub fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create temp config");
    file.write_all(content.as_bytes()).expect("write temp config");
    file
}

/// Acceptance criteria for a bounded run.
pub struct RunCriteria {
    /// Rounds that must complete.
    pub rounds: u64,
    /// Minimum rounds each unit must contribute.
    pub min_rounds_per_unit: u64,
}

impl RunCriteria {
    /// Criteria for a run with `rounds` rounds where both units take part.
    pub fn shared(rounds: u64) -> Self {
        Self {
            rounds,
            min_rounds_per_unit: 0,
        }
    }

    /// Check a summary against the criteria.
    pub fn check(&self, summary: &RunSummary) -> bool {
        summary.rounds == self.rounds
            && summary.primary_rounds + summary.secondary_rounds == self.rounds
            && summary.primary_rounds >= self.min_rounds_per_unit
            && summary.secondary_rounds >= self.min_rounds_per_unit
            && summary.metrics.total_rounds == self.rounds
    }
}
