//! Subcommand bodies.
//!
//! Each command writes its results to the given writer; logs go to stderr.

use anyhow::{bail, Context, Result};
use oc_runtime::{RunSummary, StressBench, VoltageLevel};
use std::fmt::Write as _;
use std::io::Write;
use tracing::info;

/// Set the core voltage.
pub fn voltage(bench: &mut StressBench, volts: f64, out: &mut impl Write) -> Result<()> {
    if !bench.set_voltage(volts) {
        let levels: Vec<String> = VoltageLevel::ALL.iter().map(ToString::to_string).collect();
        bail!(
            "{volts}V is not a supported voltage, choose one of {}",
            levels.join(", ")
        );
    }

    match bench.voltage_level() {
        Some(level) => writeln!(
            out,
            "Voltage set to {level} (VSEL {:#06b}, register {:#010x})",
            level.code(),
            bench.register_value()
        )?,
        None => writeln!(out, "Voltage register now {:#010x}", bench.register_value())?,
    }
    Ok(())
}

/// Bounded stress run.
pub fn run(bench: &StressBench, mhz: u32, json: bool, out: &mut impl Write) -> Result<()> {
    let summary = bench
        .run(mhz)
        .with_context(|| format!("Stress run at {mhz}MHz failed"))?;

    if json {
        serde_json::to_writer_pretty(&mut *out, &summary).context("Failed to encode summary")?;
        writeln!(out)?;
    } else {
        write!(out, "{}", format_summary(&summary))?;
    }
    Ok(())
}

/// Soak run; only comes back with the error that ended it.
pub fn soak(bench: &StressBench, mhz: u32) -> Result<()> {
    info!(mhz, "Soak run started, stop with Ctrl-C or a reset");
    match bench.run_non_stop(mhz) {
        Err(e) => Err(e).with_context(|| format!("Soak run at {mhz}MHz stopped")),
        Ok(never) => match never {},
    }
}

/// Print every valid frequency up to `limit` as it is found.
pub fn find_clocks(bench: &StressBench, limit: u32, out: &mut impl Write) -> Result<()> {
    let mut found = 0_u32;
    for freq in bench.find_valid_clocks(limit) {
        writeln!(out, "{} MHz is valid", freq.mhz())?;
        found += 1;
    }
    info!(limit, found, "Frequency search finished");
    Ok(())
}

/// Human-readable run summary.
pub fn format_summary(summary: &RunSummary) -> String {
    let mut text = String::new();
    let _ = writeln!(
        text,
        "Stress run at {}MHz: {} rounds (unit 0: {}, unit 1: {})",
        summary.frequency_mhz, summary.rounds, summary.primary_rounds, summary.secondary_rounds
    );

    let metrics = &summary.metrics;
    if let (Some(min), Some(mean), Some(max)) = (metrics.min_ms, metrics.mean_ms, metrics.max_ms) {
        let _ = writeln!(
            text,
            "Round time: min {min} ms, mean {mean} ms, max {max} ms, jitter {} ms",
            max - min
        );
    }

    if !summary.percentiles_ms.is_empty() {
        let parts: Vec<String> = summary
            .percentiles_ms
            .iter()
            .map(|(p, ms)| format!("p{p}: {ms} ms"))
            .collect();
        let _ = writeln!(text, "{}", parts.join(", "));
    }
    text
}
