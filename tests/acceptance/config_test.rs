//! Configuration file acceptance tests.

use super::common::{rig, write_config};
use oc_common::{BenchConfig, RegisterBackend};
use std::time::Duration;

#[test]
fn test_config_file_drives_the_bench() {
    let file = write_config(
        r#"
round_limit = 5
baseline_mhz = 133

[workload]
iterations = 200
blink_interval = "250ms"

[register]
backend = "simulated"
"#,
    );
    let config = BenchConfig::from_file(file.path()).unwrap();
    assert_eq!(config.workload.blink_interval, Duration::from_millis(250));
    assert_eq!(config.register.backend, RegisterBackend::Simulated);

    let rig = rig(config);
    let summary = rig.bench.run(250).unwrap();
    assert_eq!(summary.rounds, 5);
    assert_eq!(rig.bench.frequency().mhz(), 133);
}

#[test]
fn test_empty_config_file_uses_defaults() {
    let file = write_config("");
    let config = BenchConfig::from_file(file.path()).unwrap();
    assert_eq!(config.round_limit, 100);
    assert_eq!(config.baseline_mhz, 125);
    assert_eq!(config.register.address, 0x4006_4000);
}

#[test]
fn test_malformed_config_file_fails() {
    let file = write_config("round_limit = \"many\"");
    assert!(BenchConfig::from_file(file.path()).is_err());
}
