//! Clock subsystem that logs which thread applied which frequency.

use oc_runtime::{ClockError, ClockSource, FrequencyHz, SimulatedPll};
use std::sync::{Arc, Mutex};
use std::thread;

/// One successful apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Apply {
    pub thread: String,
    pub mhz: u32,
}

/// Wraps a [`SimulatedPll`], recording applies and optionally failing
/// every apply after the first `fail_after`.
#[derive(Clone)]
pub struct RecordingClock {
    pll: SimulatedPll,
    log: Arc<Mutex<Vec<Apply>>>,
    fail_after: Option<usize>,
}

impl RecordingClock {
    pub fn new() -> Self {
        Self {
            pll: SimulatedPll::default(),
            log: Arc::new(Mutex::new(Vec::new())),
            fail_after: None,
        }
    }

    pub fn failing_after(applies: usize) -> Self {
        Self {
            fail_after: Some(applies),
            ..Self::new()
        }
    }

    pub fn applies(&self) -> Vec<Apply> {
        self.log.lock().unwrap().clone()
    }

    /// Applied frequencies for one thread, in order.
    pub fn applies_on(&self, thread: &str) -> Vec<u32> {
        self.applies()
            .into_iter()
            .filter(|a| a.thread == thread)
            .map(|a| a.mhz)
            .collect()
    }
}

impl ClockSource for RecordingClock {
    fn current(&self) -> FrequencyHz {
        self.pll.current()
    }

    fn apply(&mut self, freq: FrequencyHz) -> Result<(), ClockError> {
        let mut log = self.log.lock().unwrap();
        if self.fail_after.is_some_and(|limit| log.len() >= limit) {
            return Err(ClockError::Hardware("PLL failed to lock".into()));
        }
        self.pll.apply(freq)?;
        log.push(Apply {
            thread: thread::current().name().unwrap_or("unnamed").to_string(),
            mhz: freq.mhz(),
        });
        Ok(())
    }
}
