//! System clock control.
//!
//! [`FrequencyController`] owns the clock subsystem behind a single mutex
//! (the frequency lock), so transitions requested by the two execution
//! units can never interleave. Validity is established by trying each
//! frequency on the subsystem; there is no static frequency table.

use oc_common::error::{OcError, OcResult};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, error, trace};

/// Operator inputs at or above this are assumed to be in the wrong unit.
pub const MAX_OPERATOR_MHZ: u32 = 1000;

/// Frequency the chip boots at and returns to between stress intervals.
pub const DEFAULT_BASELINE_MHZ: u32 = 125;

const HZ_PER_MHZ: u32 = 1_000_000;

/// A positive clock frequency in Hz.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct FrequencyHz(u32);

impl FrequencyHz {
    /// Wrap a raw Hz value; zero is rejected.
    #[must_use]
    pub const fn new(hz: u32) -> Option<Self> {
        if hz == 0 {
            None
        } else {
            Some(Self(hz))
        }
    }

    /// Convert whole MHz to Hz; `None` for zero or on overflow.
    #[must_use]
    pub fn from_mhz(mhz: u32) -> Option<Self> {
        mhz.checked_mul(HZ_PER_MHZ).and_then(Self::new)
    }

    /// Convert an operator-supplied MHz value, applying the input range checks.
    ///
    /// # Errors
    ///
    /// Returns [`OcError::InvalidFrequency`] for zero, and for values of
    /// [`MAX_OPERATOR_MHZ`] or more, which are almost always Hz or kHz typed
    /// by mistake.
    pub fn from_operator_mhz(mhz: u32) -> OcResult<Self> {
        if mhz >= MAX_OPERATOR_MHZ {
            return Err(OcError::invalid_frequency(
                mhz,
                "the unit used is MHz, please try again",
            ));
        }
        Self::from_mhz(mhz)
            .ok_or_else(|| OcError::invalid_frequency(mhz, "the input must be positive"))
    }

    /// Value in Hz.
    #[must_use]
    pub fn hz(self) -> u32 {
        self.0
    }

    /// Value in whole MHz, truncated.
    #[must_use]
    pub fn mhz(self) -> u32 {
        self.0 / HZ_PER_MHZ
    }

    /// Value in whole kHz, truncated.
    #[must_use]
    pub fn khz(self) -> u32 {
        self.0 / 1000
    }
}

impl fmt::Display for FrequencyHz {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}MHz", self.mhz())
    }
}

/// Failure reported by a clock subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClockError {
    /// No divider configuration produces the frequency.
    #[error("{0} cannot be produced by the system PLL")]
    Unachievable(FrequencyHz),
    /// The subsystem failed for another reason.
    #[error("clock hardware failure: {0}")]
    Hardware(String),
}

/// A clock subsystem that can report and change the system frequency.
pub trait ClockSource: Send {
    /// Frequency currently in effect.
    fn current(&self) -> FrequencyHz;

    /// Switch to `freq`. On error the previous frequency stays in effect.
    fn apply(&mut self, freq: FrequencyHz) -> Result<(), ClockError>;
}

/// Divider settings for the system PLL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PllParams {
    /// Feedback divider.
    pub fbdiv: u32,
    /// VCO frequency in kHz.
    pub vco_khz: u32,
    /// First post divider.
    pub postdiv1: u32,
    /// Second post divider (never larger than the first).
    pub postdiv2: u32,
}

#[derive(Debug)]
struct PllState {
    current_hz: AtomicU32,
    applies: AtomicU64,
}

/// Clock subsystem modelled on the RP2040 system PLL with a 12 MHz crystal.
///
/// Clones share state, so a test can keep one handle while the controller
/// owns another.
#[derive(Debug, Clone)]
pub struct SimulatedPll {
    state: Arc<PllState>,
}

impl SimulatedPll {
    const XOSC_KHZ: u32 = 12_000;
    const VCO_MIN_KHZ: u32 = 750_000;
    const VCO_MAX_KHZ: u32 = 1_600_000;
    const FBDIV_RANGE: std::ops::RangeInclusive<u32> = 16..=320;

    /// Start at `initial`.
    #[must_use]
    pub fn new(initial: FrequencyHz) -> Self {
        Self {
            state: Arc::new(PllState {
                current_hz: AtomicU32::new(initial.hz()),
                applies: AtomicU64::new(0),
            }),
        }
    }

    /// Search for dividers giving exactly `khz`, preferring the highest VCO.
    #[must_use]
    pub fn pll_params(khz: u32) -> Option<PllParams> {
        for fbdiv in Self::FBDIV_RANGE.rev() {
            let vco_khz = fbdiv * Self::XOSC_KHZ;
            if !(Self::VCO_MIN_KHZ..=Self::VCO_MAX_KHZ).contains(&vco_khz) {
                continue;
            }
            for postdiv1 in (1..=7).rev() {
                for postdiv2 in (1..=postdiv1).rev() {
                    let div = postdiv1 * postdiv2;
                    if vco_khz % div == 0 && vco_khz / div == khz {
                        return Some(PllParams {
                            fbdiv,
                            vco_khz,
                            postdiv1,
                            postdiv2,
                        });
                    }
                }
            }
        }
        None
    }

    /// Number of successful applies since creation.
    #[must_use]
    pub fn apply_count(&self) -> u64 {
        self.state.applies.load(Ordering::Acquire)
    }
}

impl Default for SimulatedPll {
    fn default() -> Self {
        Self::new(FrequencyHz(DEFAULT_BASELINE_MHZ * HZ_PER_MHZ))
    }
}

impl ClockSource for SimulatedPll {
    fn current(&self) -> FrequencyHz {
        FrequencyHz(self.state.current_hz.load(Ordering::Acquire))
    }

    fn apply(&mut self, freq: FrequencyHz) -> Result<(), ClockError> {
        let params = Self::pll_params(freq.khz()).ok_or(ClockError::Unachievable(freq))?;
        trace!(
            %freq,
            fbdiv = params.fbdiv,
            postdiv1 = params.postdiv1,
            postdiv2 = params.postdiv2,
            "PLL reconfigured"
        );
        self.state.current_hz.store(freq.hz(), Ordering::Release);
        self.state.applies.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

/// Serialized access to the clock subsystem.
pub struct FrequencyController {
    source: Mutex<Box<dyn ClockSource>>,
}

impl fmt::Debug for FrequencyController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrequencyController")
            .field("current", &self.current())
            .finish()
    }
}

impl FrequencyController {
    /// Take ownership of a clock subsystem.
    pub fn new(source: impl ClockSource + 'static) -> Self {
        Self::from_boxed(Box::new(source))
    }

    /// Take ownership of an already boxed clock subsystem.
    #[must_use]
    pub fn from_boxed(source: Box<dyn ClockSource>) -> Self {
        Self {
            source: Mutex::new(source),
        }
    }

    // Applies are all-or-nothing, so a panic while holding the lock cannot
    // leave the source half-configured.
    fn lock(&self) -> MutexGuard<'_, Box<dyn ClockSource>> {
        self.source.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Frequency currently in effect.
    pub fn current(&self) -> FrequencyHz {
        self.lock().current()
    }

    /// Apply `freq` under the frequency lock.
    ///
    /// # Errors
    ///
    /// Returns [`OcError::Clock`] if the subsystem refuses the frequency.
    pub fn change_frequency(&self, freq: FrequencyHz) -> OcResult<()> {
        let mut source = self.lock();
        source
            .apply(freq)
            .map_err(|e| OcError::Clock(e.to_string()))?;
        debug!(%freq, "Frequency changed");
        Ok(())
    }

    /// Check whether the subsystem accepts `freq`.
    ///
    /// Applies `freq` and, if it was accepted, restores the previous
    /// frequency before releasing the lock. A frequency only counts as valid
    /// when that restore also succeeds, so `true` always leaves the live
    /// frequency as it was.
    pub fn is_valid(&self, freq: FrequencyHz) -> bool {
        let mut source = self.lock();
        let previous = source.current();

        if let Err(e) = source.apply(freq) {
            trace!(%freq, error = %e, "Frequency rejected");
            return false;
        }

        if previous != freq {
            if let Err(e) = source.apply(previous) {
                error!(%freq, %previous, error = %e, "Could not restore frequency after check");
                return false;
            }
        }
        true
    }

    /// Check `freq`, converting a rejection into an error.
    ///
    /// # Errors
    ///
    /// Returns [`OcError::InvalidFrequency`] if the check fails.
    pub fn validate(&self, freq: FrequencyHz) -> OcResult<()> {
        if self.is_valid(freq) {
            Ok(())
        } else {
            Err(OcError::invalid_frequency(
                freq.mhz(),
                "rejected by the clock subsystem",
            ))
        }
    }

    /// Lazily check every whole MHz in `[1, limit_mhz]`, yielding the valid
    /// ones in ascending order.
    pub fn find_supported_frequencies(&self, limit_mhz: u32) -> SupportedFrequencies<'_> {
        SupportedFrequencies {
            controller: self,
            next_mhz: 1,
            limit_mhz,
        }
    }
}

/// Iterator returned by [`FrequencyController::find_supported_frequencies`].
#[derive(Debug, Clone)]
pub struct SupportedFrequencies<'a> {
    controller: &'a FrequencyController,
    next_mhz: u32,
    limit_mhz: u32,
}

impl Iterator for SupportedFrequencies<'_> {
    type Item = FrequencyHz;

    fn next(&mut self) -> Option<FrequencyHz> {
        while self.next_mhz <= self.limit_mhz {
            let mhz = self.next_mhz;
            self.next_mhz += 1;

            // Everything past the first overflow overflows too
            let Some(freq) = FrequencyHz::from_mhz(mhz) else {
                self.next_mhz = self.limit_mhz.saturating_add(1);
                return None;
            };
            if self.controller.is_valid(freq) {
                return Some(freq);
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.limit_mhz.saturating_add(1).saturating_sub(self.next_mhz);
        (0, usize::try_from(remaining).ok())
    }
}
