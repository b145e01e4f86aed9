//! Soak and frequency discovery acceptance tests.

use super::common::{quick_config, rig};
use oc_runtime::FrequencyHz;
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn test_find_valid_clocks_is_ascending_and_valid() {
    let rig = rig(quick_config(1));
    let found: Vec<u32> = rig.bench.find_valid_clocks(300).map(FrequencyHz::mhz).collect();

    assert!(!found.is_empty());
    assert!(found.windows(2).all(|w| w[0] < w[1]));
    assert!(found.iter().all(|&mhz| (1..=300).contains(&mhz)));
    for mhz in [48, 125, 133, 250] {
        assert!(found.contains(&mhz), "{mhz} MHz missing");
    }

    // Probing leaves the live frequency alone
    assert_eq!(rig.bench.frequency().mhz(), 125);
}

#[test]
fn test_find_valid_clocks_restarts() {
    let rig = rig(quick_config(1));
    let search = rig.bench.find_valid_clocks(60);
    let first: Vec<FrequencyHz> = search.clone().collect();
    let second: Vec<FrequencyHz> = search.collect();
    assert_eq!(first, second);
}

/// Soak for a minute and check the rounds stay contiguous.
#[test]
#[ignore = "Soak test - takes 1 minute"]
fn test_soak_one_minute() {
    let rig = rig(quick_config(100));
    let reports = rig.reports.clone();

    thread::spawn(move || {
        let _ = rig.bench.run_non_stop(250);
    });

    let start = Instant::now();
    while start.elapsed() < Duration::from_secs(60) {
        thread::sleep(Duration::from_secs(1));
    }

    let seen = reports.reports();
    assert!(seen.len() > 100, "only {} rounds in a minute", seen.len());
    for (i, report) in seen.iter().enumerate() {
        assert_eq!(report.round, i as u64 + 1);
    }
}
