//! Bounded run acceptance tests.

use super::common::{quick_config, rig, RunCriteria};
use oc_common::{OcError, Unit};

#[test]
fn test_default_run_completes_one_hundred_rounds() {
    let rig = rig(quick_config(100));
    let summary = rig.bench.run(250).unwrap();

    assert!(RunCriteria::shared(100).check(&summary), "{summary:?}");
    assert_eq!(rig.reports.len(), 100);
    assert_eq!(rig.bench.frequency().mhz(), 125);
}

#[test]
fn test_rounds_are_numbered_in_report_order() {
    let rig = rig(quick_config(40));
    rig.bench.run(133).unwrap();

    let reports = rig.reports.reports();
    let rounds: Vec<u64> = reports.iter().map(|r| r.round).collect();
    assert_eq!(rounds, (1..=40).collect::<Vec<_>>());

    let primary = reports.iter().filter(|r| r.unit == Unit::Primary).count();
    let secondary = reports.iter().filter(|r| r.unit == Unit::Secondary).count();
    assert_eq!(primary + secondary, 40);
}

#[test]
fn test_consecutive_runs_start_from_zero() {
    let rig = rig(quick_config(10));
    rig.bench.run(133).unwrap();
    let second = rig.bench.run(250).unwrap();

    assert_eq!(second.rounds, 10);
    let reports = rig.reports.reports();
    assert_eq!(reports.len(), 20);
    assert_eq!(reports[10].round, 1);
}

#[test]
fn test_invalid_frequency_runs_nothing() {
    let rig = rig(quick_config(100));

    for mhz in [0, 7, 999, 1000] {
        let err = rig.bench.run(mhz).unwrap_err();
        assert!(matches!(err, OcError::InvalidFrequency { mhz: m, .. } if m == mhz));
    }
    assert!(rig.reports.is_empty());
    assert_eq!(rig.bench.frequency().mhz(), 125);
}

#[test]
fn test_summary_serializes() {
    let rig = rig(quick_config(8));
    let summary = rig.bench.run(200).unwrap();

    let json = serde_json::to_value(&summary).unwrap();
    assert_eq!(json["rounds"], 8);
    assert_eq!(json["frequency_mhz"], 200);
    assert_eq!(json["admitted"], 10);
    assert_eq!(json["metrics"]["total_rounds"], 8);
}
