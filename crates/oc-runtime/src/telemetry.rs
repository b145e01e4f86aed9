//! Per-round reports.
//!
//! Sinks are only ever called with the round counter lock held, so a sink
//! never sees two reports concurrently and writes whole reports at a time.

use oc_common::state::Unit;
use serde::Serialize;
use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::warn;

/// Outcome of one completed stress round.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundReport {
    /// Value of the round counter after this round.
    pub round: u64,
    /// Time spent in the workload at the elevated frequency.
    pub elapsed_ms: u64,
    /// Unit that ran the round.
    pub unit: Unit,
    /// Frequency in effect when the report was produced.
    pub frequency_mhz: u32,
    /// Die temperature in °C.
    pub temperature_c: f32,
}

impl fmt::Display for RoundReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Round: {}, time used: {} ms, done by unit {}.",
            self.round,
            self.elapsed_ms,
            self.unit.id()
        )?;
        write!(
            f,
            "Current frequency: {}MHz Temperature: {:.2}",
            self.frequency_mhz, self.temperature_c
        )
    }
}

/// Destination for round reports.
pub trait TelemetrySink: Send {
    /// Record one report.
    fn emit(&mut self, report: &RoundReport);
}

/// Renders reports as text lines on any writer.
#[derive(Debug)]
pub struct WriterSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> WriterSink<W> {
    /// Wrap a writer.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Unwrap the writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> TelemetrySink for WriterSink<W> {
    fn emit(&mut self, report: &RoundReport) {
        let result = writeln!(self.writer, "{report}").and_then(|()| self.writer.flush());
        if let Err(e) = result {
            warn!(round = report.round, error = %e, "Failed to write round report");
        }
    }
}

/// Reports printed to standard output.
pub type ConsoleSink = WriterSink<io::Stdout>;

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new(io::stdout())
    }
}

/// Keeps every report in memory; clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    reports: Arc<Mutex<Vec<RoundReport>>>,
}

impl MemorySink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the reports recorded so far.
    #[must_use]
    pub fn reports(&self) -> Vec<RoundReport> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of reports recorded so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.reports.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TelemetrySink for MemorySink {
    fn emit(&mut self, report: &RoundReport) {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(report.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(round: u64, unit: Unit) -> RoundReport {
        RoundReport {
            round,
            elapsed_ms: 812,
            unit,
            frequency_mhz: 125,
            temperature_c: 31.456,
        }
    }

    #[test]
    fn test_report_format() {
        let text = report(7, Unit::Secondary).to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            [
                "Round: 7, time used: 812 ms, done by unit 1.",
                "Current frequency: 125MHz Temperature: 31.46",
            ]
        );
    }

    #[test]
    fn test_writer_sink() {
        let mut sink = WriterSink::new(Vec::new());
        sink.emit(&report(1, Unit::Primary));
        sink.emit(&report(2, Unit::Secondary));

        let text = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(text.lines().count(), 4);
        assert!(text.starts_with("Round: 1, time used: 812 ms, done by unit 0.\n"));
    }

    #[test]
    fn test_memory_sink_shared() {
        let sink = MemorySink::new();
        let mut writer = sink.clone();
        assert!(sink.is_empty());

        writer.emit(&report(1, Unit::Primary));
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.reports()[0].unit, Unit::Primary);
    }

    #[test]
    fn test_report_serializes() {
        let json = serde_json::to_value(report(3, Unit::Secondary)).unwrap();
        assert_eq!(json["round"], 3);
        assert_eq!(json["unit"], "secondary");
    }
}
