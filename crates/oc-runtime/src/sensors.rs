//! Die temperature and liveness indicator collaborators.

use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;

/// ADC reference voltage.
const ADC_VREF: f32 = 3.3;

/// Temperature sensor output at 27 °C, in volts.
const SENSOR_V27: f32 = 0.706;

/// Temperature sensor slope, in volts per °C.
const SENSOR_SLOPE: f32 = 0.001_721;

/// Convert a 16-bit scaled ADC sample of the on-die sensor to °C.
///
/// The sensor is uncalibrated; expect several degrees of offset.
#[must_use]
pub fn adc_to_celsius(raw: u16) -> f32 {
    let volts = f32::from(raw) * ADC_VREF / f32::from(u16::MAX);
    27.0 - (volts - SENSOR_V27) / SENSOR_SLOPE
}

/// Source of die temperature readings.
pub trait TemperatureSensor: Send + Sync {
    /// Current temperature in °C.
    fn read_celsius(&self) -> f32;
}

/// Sensor returning a settable raw ADC sample.
#[derive(Debug, Clone)]
pub struct SimulatedThermometer {
    raw: Arc<AtomicU16>,
}

impl SimulatedThermometer {
    /// Raw sample corresponding to roughly 27 °C.
    pub const ROOM_TEMPERATURE_RAW: u16 = 14_021;

    /// Create a sensor reporting `raw`.
    #[must_use]
    pub fn new(raw: u16) -> Self {
        Self {
            raw: Arc::new(AtomicU16::new(raw)),
        }
    }

    /// Replace the raw sample seen by all clones.
    pub fn set_raw(&self, raw: u16) {
        self.raw.store(raw, Ordering::Release);
    }
}

impl Default for SimulatedThermometer {
    fn default() -> Self {
        Self::new(Self::ROOM_TEMPERATURE_RAW)
    }
}

impl TemperatureSensor for SimulatedThermometer {
    fn read_celsius(&self) -> f32 {
        adc_to_celsius(self.raw.load(Ordering::Acquire))
    }
}

/// Visible heartbeat, such as an LED, toggled while a workload runs.
pub trait LivenessIndicator: Send + Sync {
    /// Flip the indicator.
    fn toggle(&self);
}

/// Indicator that records its level and toggle count.
#[derive(Debug, Clone, Default)]
pub struct SimulatedLed {
    lit: Arc<AtomicBool>,
    toggles: Arc<AtomicU64>,
}

impl SimulatedLed {
    /// Create an indicator that starts off.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the indicator is currently on.
    #[must_use]
    pub fn is_lit(&self) -> bool {
        self.lit.load(Ordering::Acquire)
    }

    /// Toggles performed through any clone.
    #[must_use]
    pub fn toggle_count(&self) -> u64 {
        self.toggles.load(Ordering::Acquire)
    }
}

impl LivenessIndicator for SimulatedLed {
    fn toggle(&self) {
        self.lit.fetch_xor(true, Ordering::AcqRel);
        self.toggles.fetch_add(1, Ordering::AcqRel);
    }
}
