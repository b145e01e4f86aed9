//! Configuration structures for the stress bench.
//!
//! Supports TOML deserialization with defaults that match the RP2040
//! reset state, so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Physical address of the `VREG_AND_CHIP_RESET` block on the RP2040.
pub const VREG_AND_CHIP_RESET_BASE: u64 = 0x4006_4000;

/// Top-level bench configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// Frequency restored after every stress interval, in MHz.
    pub baseline_mhz: u32,

    /// Bounded runs stop once this many rounds have been admitted.
    pub round_limit: u64,

    /// Workload sizing.
    pub workload: WorkloadConfig,

    /// Voltage register backend.
    pub register: RegisterConfig,

    /// Execution unit placement.
    pub units: UnitConfig,

    /// Round timing statistics.
    pub metrics: MetricsConfig,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            baseline_mhz: 125,
            round_limit: 100,
            workload: WorkloadConfig::default(),
            register: RegisterConfig::default(),
            units: UnitConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

/// Workload sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    /// Multiplications performed per round.
    pub iterations: u32,

    /// Minimum time between liveness indicator toggles.
    #[serde(with = "humantime_serde")]
    pub blink_interval: Duration,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            iterations: 100_000,
            blink_interval: Duration::from_millis(500),
        }
    }
}

/// Supported register backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RegisterBackend {
    /// In-memory register word.
    #[default]
    Simulated,
    /// Physical register mapped through `/dev/mem`.
    DevMem,
}

/// Voltage register configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegisterConfig {
    /// Backend used for register reads and writes.
    pub backend: RegisterBackend,

    /// Physical address of the voltage regulator control word.
    pub address: u64,

    /// Device node used by the `devmem` backend.
    pub device: PathBuf,
}

impl Default for RegisterConfig {
    fn default() -> Self {
        Self {
            backend: RegisterBackend::Simulated,
            address: VREG_AND_CHIP_RESET_BASE,
            device: PathBuf::from("/dev/mem"),
        }
    }
}

/// Placement of the two execution units.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitConfig {
    /// Pin each unit to its own CPU core.
    pub pin_cores: bool,

    /// Core for the primary unit.
    pub primary_core: usize,

    /// Core for the secondary unit.
    pub secondary_core: usize,
}

impl Default for UnitConfig {
    fn default() -> Self {
        Self {
            pin_cores: false,
            primary_core: 0,
            secondary_core: 1,
        }
    }
}

/// Round timing statistics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Size of the round duration ring buffer.
    pub histogram_size: usize,

    /// Percentiles reported in the run summary.
    pub percentiles: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            histogram_size: 1_000,
            percentiles: vec![50.0, 90.0, 99.0],
        }
    }
}

impl BenchConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    /// Serialize configuration to TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BenchConfig::default();
        assert_eq!(config.baseline_mhz, 125);
        assert_eq!(config.round_limit, 100);
        assert_eq!(config.register.address, 0x4006_4000);
        assert_eq!(config.workload.blink_interval, Duration::from_millis(500));
        assert!(!config.units.pin_cores);
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = BenchConfig::from_toml("").unwrap();
        assert_eq!(config.baseline_mhz, 125);
        assert_eq!(config.register.backend, RegisterBackend::Simulated);
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
            baseline_mhz = 133
            round_limit = 10

            [workload]
            iterations = 500
            blink_interval = "250ms"

            [register]
            backend = "devmem"
            address = 0x40064000

            [units]
            pin_cores = true
            secondary_core = 3
        "#;

        let config = BenchConfig::from_toml(toml).unwrap();
        assert_eq!(config.baseline_mhz, 133);
        assert_eq!(config.round_limit, 10);
        assert_eq!(config.workload.iterations, 500);
        assert_eq!(config.workload.blink_interval, Duration::from_millis(250));
        assert_eq!(config.register.backend, RegisterBackend::DevMem);
        assert!(config.units.pin_cores);
        assert_eq!(config.units.primary_core, 0);
        assert_eq!(config.units.secondary_core, 3);
    }

    #[test]
    fn test_roundtrip_toml() {
        let config = BenchConfig::default();
        let toml = config.to_toml().unwrap();
        let parsed = BenchConfig::from_toml(&toml).unwrap();
        assert_eq!(config.workload.blink_interval, parsed.workload.blink_interval);
        assert_eq!(config.metrics.percentiles, parsed.metrics.percentiles);
    }

    #[test]
    fn test_backend_names() {
        let backend: RegisterBackend = serde_json::from_str("\"devmem\"").unwrap();
        assert_eq!(backend, RegisterBackend::DevMem);

        let backend: RegisterBackend = serde_json::from_str("\"simulated\"").unwrap();
        assert_eq!(backend, RegisterBackend::Simulated);
    }

    #[test]
    fn test_bad_duration_rejected() {
        let toml = r#"
            [workload]
            blink_interval = "soon"
        "#;
        assert!(BenchConfig::from_toml(toml).is_err());
    }
}
