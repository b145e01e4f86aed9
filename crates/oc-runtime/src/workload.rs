//! CPU-bound stress bodies run by each execution unit.

use crate::sensors::LivenessIndicator;
use oc_common::state::Unit;
use oc_common::time::MonotonicClock;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

/// One round's worth of CPU-bound work.
pub trait Workload: Send {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Execute one round.
    fn run(&mut self);
}

fn multiply_random(rng: &mut StdRng) -> f64 {
    rng.gen::<f64>() * rng.gen::<f64>()
}

/// Multiplies pairs of random floats.
#[derive(Debug)]
pub struct VanillaWorkload {
    iterations: u32,
    rng: StdRng,
}

impl VanillaWorkload {
    /// Create a workload seeded from OS entropy.
    #[must_use]
    pub fn new(iterations: u32) -> Self {
        Self {
            iterations,
            rng: StdRng::from_entropy(),
        }
    }

    /// Create a workload with a fixed seed.
    #[must_use]
    pub fn seeded(iterations: u32, seed: u64) -> Self {
        Self {
            iterations,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Workload for VanillaWorkload {
    fn name(&self) -> &'static str {
        "vanilla"
    }

    fn run(&mut self) {
        for _ in 0..self.iterations {
            black_box(multiply_random(&mut self.rng));
        }
    }
}

/// The vanilla body plus a liveness blink paced by the monotonic clock.
///
/// The last toggle time is kept across rounds, so the blink rate does not
/// depend on round length.
pub struct BlinkWorkload {
    iterations: u32,
    rng: StdRng,
    indicator: Arc<dyn LivenessIndicator>,
    clock: Arc<dyn MonotonicClock>,
    interval_ms: u64,
    last_toggle_ms: u64,
}

impl std::fmt::Debug for BlinkWorkload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlinkWorkload")
            .field("iterations", &self.iterations)
            .field("interval_ms", &self.interval_ms)
            .field("last_toggle_ms", &self.last_toggle_ms)
            .finish_non_exhaustive()
    }
}

impl BlinkWorkload {
    /// Create a blinking workload.
    pub fn new(
        iterations: u32,
        indicator: Arc<dyn LivenessIndicator>,
        clock: Arc<dyn MonotonicClock>,
        interval: Duration,
    ) -> Self {
        let last_toggle_ms = clock.ticks_ms();
        Self {
            iterations,
            rng: StdRng::from_entropy(),
            indicator,
            clock,
            interval_ms: u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
            last_toggle_ms,
        }
    }
}

impl Workload for BlinkWorkload {
    fn name(&self) -> &'static str {
        "blink"
    }

    fn run(&mut self) {
        for _ in 0..self.iterations {
            black_box(multiply_random(&mut self.rng));

            let now = self.clock.ticks_ms();
            if now.saturating_sub(self.last_toggle_ms) >= self.interval_ms {
                self.indicator.toggle();
                self.last_toggle_ms = self.clock.ticks_ms();
            }
        }
    }
}

/// Builds a fresh workload for a unit at the start of each run.
pub trait WorkloadFactory: Send + Sync {
    /// Workload for `unit`.
    fn build(&self, unit: Unit) -> Box<dyn Workload>;
}

impl<F> WorkloadFactory for F
where
    F: Fn(Unit) -> Box<dyn Workload> + Send + Sync,
{
    fn build(&self, unit: Unit) -> Box<dyn Workload> {
        self(unit)
    }
}

/// Vanilla body on the primary, blinking body on the secondary.
pub struct DefaultWorkloads {
    iterations: u32,
    blink_interval: Duration,
    indicator: Arc<dyn LivenessIndicator>,
    clock: Arc<dyn MonotonicClock>,
}

impl DefaultWorkloads {
    /// Create the factory.
    pub fn new(
        iterations: u32,
        blink_interval: Duration,
        indicator: Arc<dyn LivenessIndicator>,
        clock: Arc<dyn MonotonicClock>,
    ) -> Self {
        Self {
            iterations,
            blink_interval,
            indicator,
            clock,
        }
    }
}

impl WorkloadFactory for DefaultWorkloads {
    fn build(&self, unit: Unit) -> Box<dyn Workload> {
        match unit {
            Unit::Primary => Box::new(VanillaWorkload::new(self.iterations)),
            Unit::Secondary => Box::new(BlinkWorkload::new(
                self.iterations,
                Arc::clone(&self.indicator),
                Arc::clone(&self.clock),
                self.blink_interval,
            )),
        }
    }
}
