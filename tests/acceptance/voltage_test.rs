//! Voltage register acceptance tests.

use super::common::{quick_config, rig, rig_with_register};
use oc_common::OcError;
use oc_runtime::{SimulatedRegister, VoltageLevel, VOLTAGE_TOLERANCE};

/// Every supported level lands in VSEL and leaves the other bits alone.
#[test]
fn test_all_levels_preserve_other_bits() {
    let background = 0xdead_be0f_u32 | 0x0000_1003;
    for level in VoltageLevel::ALL {
        let mut rig = rig_with_register(quick_config(1), SimulatedRegister::new(background));
        assert!(rig.bench.set_voltage(level.volts()), "{level} rejected");

        let word = rig.register.value();
        assert_eq!((word >> 4) & 0xf, u32::from(level.code()));
        assert_eq!(word & !0xf0, background & !0xf0);
        assert_eq!(rig.bench.voltage_level(), Some(level));
    }
}

#[test]
fn test_near_levels_within_tolerance() {
    let mut rig = rig(quick_config(1));

    assert!(rig.bench.set_voltage(1.00));
    assert_eq!(rig.register.value() & 0xf0, 0b1001 << 4);

    assert!(rig.bench.set_voltage(1.2));
    assert!(rig.bench.set_voltage(0.997));
    assert_eq!(rig.register.value() & 0xf0, 0b1001 << 4);

    assert!(rig.bench.set_voltage(1.25 + VOLTAGE_TOLERANCE / 2.0));
    assert!(!rig.bench.set_voltage(1.2545));
}

#[test]
fn test_rejected_voltage_leaves_register_untouched() {
    let mut rig = rig(quick_config(1));
    let before = rig.register.value();

    for volt in [1.03, 0.5, 1.35, -1.10, f64::NAN] {
        assert!(!rig.bench.set_voltage(volt));
    }
    assert_eq!(rig.register.value(), before);
    assert_eq!(rig.register.write_count(), 0);

    assert!(matches!(
        rig.bench.apply_voltage(1.03),
        Err(OcError::InvalidVoltage { .. })
    ));
}
