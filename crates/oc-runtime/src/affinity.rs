//! Core placement for the execution units.
//!
//! On the RP2040 each unit owns one of the two cores. On a host the same
//! split is approximated by pinning each unit's thread to its own CPU.

use oc_common::config::UnitConfig;
use oc_common::error::OcResult;
use oc_common::state::Unit;
use tracing::warn;

/// Core configured for `unit`, or `None` when pinning is disabled.
#[must_use]
pub fn core_for(config: &UnitConfig, unit: Unit) -> Option<usize> {
    if !config.pin_cores {
        return None;
    }
    Some(match unit {
        Unit::Primary => config.primary_core,
        Unit::Secondary => config.secondary_core,
    })
}

/// Pin the calling thread to `core`.
///
/// Returns the core actually applied; `None` when no pinning was requested
/// or the kernel rejected a core that does not exist.
///
/// # Errors
///
/// Returns [`OcError::Config`] for an out-of-range index or an unexpected
/// `sched_setaffinity` failure.
#[cfg(target_os = "linux")]
pub fn pin_current_thread(unit: Unit, core: Option<usize>) -> OcResult<Option<usize>> {
    use nix::sched::{sched_setaffinity, CpuSet};
    use nix::unistd::Pid;
    use oc_common::error::OcError;
    use tracing::{debug, info};

    let Some(core) = core else {
        debug!(%unit, "No core affinity configured");
        return Ok(None);
    };

    let mut cpu_set = CpuSet::new();
    cpu_set
        .set(core)
        .map_err(|e| OcError::Config(format!("Invalid CPU index {core}: {e}")))?;

    match sched_setaffinity(Pid::from_raw(0), &cpu_set) {
        Ok(()) => {
            info!(%unit, core, "Unit pinned");
            Ok(Some(core))
        }
        Err(nix::errno::Errno::EINVAL) => {
            warn!(%unit, core, "Invalid CPU - core may not exist, running unpinned");
            Ok(None)
        }
        Err(e) => Err(OcError::Config(format!("sched_setaffinity failed: {e}"))),
    }
}

/// Pinning is a no-op on this platform.
#[cfg(not(target_os = "linux"))]
pub fn pin_current_thread(unit: Unit, core: Option<usize>) -> OcResult<Option<usize>> {
    if core.is_some() {
        warn!(%unit, "CPU affinity not available on this platform");
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_for_disabled() {
        let config = UnitConfig::default();
        assert_eq!(core_for(&config, Unit::Primary), None);
        assert_eq!(core_for(&config, Unit::Secondary), None);
    }

    #[test]
    fn test_core_for_enabled() {
        let config = UnitConfig {
            pin_cores: true,
            primary_core: 2,
            secondary_core: 5,
        };
        assert_eq!(core_for(&config, Unit::Primary), Some(2));
        assert_eq!(core_for(&config, Unit::Secondary), Some(5));
    }

    #[test]
    fn test_pin_none() {
        assert_eq!(pin_current_thread(Unit::Primary, None).unwrap(), None);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_pin_out_of_range_core() {
        assert!(pin_current_thread(Unit::Primary, Some(1 << 20)).is_err());
    }
}
