//! Dual-unit stress coordination.
//!
//! A run uses exactly two execution units: the caller's thread (primary)
//! and one spawned thread (secondary). Each round a unit:
//!
//! 1. Takes an admission ticket under the round counter lock
//! 2. Switches to the elevated frequency (frequency lock)
//! 3. Runs its workload and measures it with the monotonic clock
//! 4. Switches back to the baseline frequency (frequency lock)
//! 5. Bumps the round counter and emits the report, all under the round
//!    counter lock
//!
//! Lock order is round counter → frequency; the frequency lock is never
//! held while taking the round counter lock.

use crate::affinity::{core_for, pin_current_thread};
use crate::clock::{FrequencyController, FrequencyHz, DEFAULT_BASELINE_MHZ};
use crate::latch::{termination_latch, LatchHolder};
use crate::sensors::TemperatureSensor;
use crate::telemetry::{ConsoleSink, RoundReport, TelemetrySink};
use crate::workload::{Workload, WorkloadFactory};
use oc_common::config::UnitConfig;
use oc_common::error::{OcError, OcResult};
use oc_common::metrics::{MetricsSnapshot, RoundMetrics};
use oc_common::state::{Unit, UnitState, UnitStateMachine};
use oc_common::time::{MonotonicClock, SystemClock};
use serde::Serialize;
use static_assertions::assert_impl_all;
use std::convert::Infallible;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use tracing::{debug, error, info, trace, warn};

/// How many rounds a run admits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundBudget {
    /// Stop once the admission counter exceeds the limit.
    Bounded(u64),
    /// Never stop on round count.
    Unbounded,
}

/// Round bookkeeping guarded by the round counter lock.
struct Ledger {
    admitted: u64,
    completed: u64,
    per_unit: [u64; 2],
    aborted: bool,
    metrics: RoundMetrics,
    sink: Box<dyn TelemetrySink>,
}

/// State shared by both units for the duration of one run.
pub struct SyncContext {
    ledger: Mutex<Ledger>,
    clock: Arc<FrequencyController>,
    thermometer: Arc<dyn TemperatureSensor>,
    ticks: Arc<dyn MonotonicClock>,
    elevated: FrequencyHz,
    baseline: FrequencyHz,
    budget: RoundBudget,
}

assert_impl_all!(SyncContext: Send, Sync);

impl SyncContext {
    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take an admission ticket; `false` means the unit must stop.
    fn admit(&self) -> bool {
        let mut ledger = self.ledger();
        if ledger.aborted {
            return false;
        }
        ledger.admitted = ledger.admitted.saturating_add(1);
        match self.budget {
            RoundBudget::Bounded(limit) => ledger.admitted <= limit,
            RoundBudget::Unbounded => true,
        }
    }

    /// Make both units stop at their next admission check.
    fn abort(&self) {
        self.ledger().aborted = true;
    }

    /// Run one elevated-frequency interval and report it.
    fn stress_round(&self, unit: Unit, workload: &mut dyn Workload) -> OcResult<RoundReport> {
        self.clock.change_frequency(self.elevated)?;
        let elevation = BaselineRestore::new(&self.clock, self.baseline);
        debug!(
            %unit,
            freq = %self.elevated,
            workload = workload.name(),
            "Stress interval started (OC)"
        );

        let start = self.ticks.ticks_ms();
        workload.run();
        let elapsed_ms = self.ticks.ticks_since(start);

        elevation.restore()?;

        let mut ledger = self.ledger();
        ledger.completed += 1;
        ledger.per_unit[usize::from(unit.id())] += 1;
        ledger.metrics.record_ms(elapsed_ms);

        let report = RoundReport {
            round: ledger.completed,
            elapsed_ms,
            unit,
            frequency_mhz: self.clock.current().mhz(),
            temperature_c: self.thermometer.read_celsius(),
        };
        ledger.sink.emit(&report);
        trace!(%unit, round = report.round, elapsed_ms, "Round complete");

        Ok(report)
    }

    /// Rounds completed so far.
    pub fn completed_rounds(&self) -> u64 {
        self.ledger().completed
    }

    /// Admission tickets handed out so far, including the refused ones.
    pub fn admitted_rounds(&self) -> u64 {
        self.ledger().admitted
    }
}

/// Puts the baseline frequency back when an elevated interval ends,
/// including by unwinding out of the workload.
struct BaselineRestore<'a> {
    clock: &'a FrequencyController,
    baseline: FrequencyHz,
    restored: bool,
}

impl<'a> BaselineRestore<'a> {
    fn new(clock: &'a FrequencyController, baseline: FrequencyHz) -> Self {
        Self {
            clock,
            baseline,
            restored: false,
        }
    }

    fn restore(mut self) -> OcResult<()> {
        self.restored = true;
        self.clock.change_frequency(self.baseline)
    }
}

impl Drop for BaselineRestore<'_> {
    fn drop(&mut self) {
        if self.restored {
            return;
        }
        warn!(freq = %self.baseline, "Interval interrupted, restoring baseline frequency");
        if let Err(e) = self.clock.change_frequency(self.baseline) {
            error!(error = %e, "Could not restore baseline frequency");
        }
    }
}

/// Stops the run if the owning unit unwinds.
struct AbortOnUnwind<'a>(&'a SyncContext);

impl Drop for AbortOnUnwind<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            error!("Unit panicked, aborting run");
            self.0.abort();
        }
    }
}

/// Drive one unit until it is refused admission or a round fails.
fn run_unit(
    ctx: &SyncContext,
    workload: &mut dyn Workload,
    sm: &mut UnitStateMachine,
) -> OcResult<()> {
    loop {
        if !ctx.admit() {
            sm.transition(UnitState::Terminating)?;
            return Ok(());
        }
        sm.transition(UnitState::Running)?;

        if let Err(e) = ctx.stress_round(sm.unit(), workload) {
            error!(unit = %sm.unit(), error = %e, "Stress round failed, aborting run");
            ctx.abort();
            sm.wind_down();
            return Err(e);
        }
    }
}

/// Body of the secondary unit's thread.
///
/// The latch holder arrives already taken (INIT) and is released only on
/// the way out (EXIT), or by unwinding if the unit panics.
fn secondary_main(
    ctx: &SyncContext,
    mut workload: Box<dyn Workload>,
    holder: LatchHolder,
    core: Option<usize>,
) -> OcResult<u64> {
    let _abort_on_unwind = AbortOnUnwind(ctx);
    let mut sm = UnitStateMachine::new(Unit::Secondary);
    debug!("Secondary unit started");

    let result = pin_current_thread(Unit::Secondary, core)
        .and_then(|_| run_unit(ctx, workload.as_mut(), &mut sm));
    if result.is_err() {
        ctx.abort();
    }

    sm.wind_down();
    let exit = sm.transition(UnitState::Exit);
    holder.release();
    debug!(rounds = sm.rounds_entered(), "Secondary unit exited");

    result.and(exit).map(|()| sm.rounds_entered())
}

/// Outcome of a bounded run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Elevated frequency under test.
    pub frequency_mhz: u32,
    /// Rounds completed by both units together.
    pub rounds: u64,
    /// Rounds completed by the primary unit.
    pub primary_rounds: u64,
    /// Rounds completed by the secondary unit.
    pub secondary_rounds: u64,
    /// Admission tickets handed out, including the two refusals.
    pub admitted: u64,
    /// Round duration statistics.
    pub metrics: MetricsSnapshot,
    /// Requested percentiles of round duration, in milliseconds.
    pub percentiles_ms: Vec<(f64, u64)>,
}

/// Per-run state handed from the coordinator to the unit driver.
struct RunParts {
    ctx: Arc<SyncContext>,
    workloads: Arc<dyn WorkloadFactory>,
    units: UnitConfig,
    percentiles: Vec<f64>,
}

/// Runs the stress protocol on a primary and a secondary unit.
pub struct DualUnitCoordinator {
    clock: Arc<FrequencyController>,
    thermometer: Arc<dyn TemperatureSensor>,
    ticks: Arc<dyn MonotonicClock>,
    sink: Box<dyn TelemetrySink>,
    workloads: Arc<dyn WorkloadFactory>,
    units: UnitConfig,
    elevated: FrequencyHz,
    baseline: FrequencyHz,
    histogram_size: usize,
    percentiles: Vec<f64>,
}

impl DualUnitCoordinator {
    /// Start configuring a coordinator for `elevated` on `clock`.
    pub fn builder(
        clock: Arc<FrequencyController>,
        elevated: FrequencyHz,
    ) -> CoordinatorBuilder {
        CoordinatorBuilder::new(clock, elevated)
    }

    fn into_context(self, budget: RoundBudget) -> RunParts {
        let ctx = SyncContext {
            ledger: Mutex::new(Ledger {
                admitted: 0,
                completed: 0,
                per_unit: [0; 2],
                aborted: false,
                metrics: RoundMetrics::new(self.histogram_size),
                sink: self.sink,
            }),
            clock: self.clock,
            thermometer: self.thermometer,
            ticks: self.ticks,
            elevated: self.elevated,
            baseline: self.baseline,
            budget,
        };
        RunParts {
            ctx: Arc::new(ctx),
            workloads: self.workloads,
            units: self.units,
            percentiles: self.percentiles,
        }
    }

    /// Run until `limit` rounds have completed across both units.
    ///
    /// Blocks until both units have finished; the primary never returns
    /// while the secondary can still touch the clock.
    ///
    /// # Errors
    ///
    /// Returns the first unit failure, or [`OcError::Fault`] if the
    /// secondary could not be spawned or panicked.
    pub fn run_bounded(self, limit: u64) -> OcResult<RunSummary> {
        let elevated = self.elevated;
        info!(freq = %elevated, limit, "Starting bounded stress run");

        let RunParts {
            ctx,
            workloads,
            units,
            percentiles,
        } = self.into_context(RoundBudget::Bounded(limit));
        run_units(&ctx, workloads.as_ref(), &units)?;

        let ledger = ctx.ledger();
        let summary = RunSummary {
            frequency_mhz: elevated.mhz(),
            rounds: ledger.completed,
            primary_rounds: ledger.per_unit[usize::from(Unit::Primary.id())],
            secondary_rounds: ledger.per_unit[usize::from(Unit::Secondary.id())],
            admitted: ledger.admitted,
            metrics: ledger.metrics.snapshot(),
            percentiles_ms: ledger
                .metrics
                .percentiles(&percentiles)
                .into_iter()
                .map(|(p, d)| (p, u64::try_from(d.as_millis()).unwrap_or(u64::MAX)))
                .collect(),
        };

        info!(
            rounds = summary.rounds,
            primary = summary.primary_rounds,
            secondary = summary.secondary_rounds,
            mean_ms = summary.metrics.mean_ms.unwrap_or(0),
            max_ms = summary.metrics.max_ms.unwrap_or(0),
            "Bounded stress run complete"
        );
        Ok(summary)
    }

    /// Run forever on both units.
    ///
    /// Only returns if a round fails or the secondary cannot be started.
    ///
    /// # Errors
    ///
    /// Returns the failure that ended the soak.
    pub fn run_unbounded(self) -> OcResult<Infallible> {
        info!(freq = %self.elevated, "Starting soak run");

        let RunParts {
            ctx,
            workloads,
            units,
            ..
        } = self.into_context(RoundBudget::Unbounded);
        run_units(&ctx, workloads.as_ref(), &units)?;

        Err(OcError::Fault(format!(
            "soak run stopped after {} rounds without a failure",
            ctx.completed_rounds()
        )))
    }
}

/// Spawn the secondary, drive the primary, then wait for the secondary.
fn run_units(
    ctx: &Arc<SyncContext>,
    workloads: &dyn WorkloadFactory,
    units: &UnitConfig,
) -> OcResult<()> {
    let (holder, waiter) = termination_latch();
    let secondary_workload = workloads.build(Unit::Secondary);
    let secondary_core = core_for(units, Unit::Secondary);
    let secondary_ctx = Arc::clone(ctx);

    let handle = thread::Builder::new()
        .name("oc-secondary".into())
        .spawn(move || secondary_main(&secondary_ctx, secondary_workload, holder, secondary_core))
        .map_err(|e| OcError::Fault(format!("Failed to spawn secondary unit: {e}")))?;

    let mut sm = UnitStateMachine::new(Unit::Primary);
    let mut primary_workload = workloads.build(Unit::Primary);
    let primary_core = core_for(units, Unit::Primary);

    // The latch wait below must run even if the primary's workload panics
    let primary_result = panic::catch_unwind(AssertUnwindSafe(|| {
        pin_current_thread(Unit::Primary, primary_core)
            .and_then(|_| run_unit(ctx, primary_workload.as_mut(), &mut sm))
    }))
    .unwrap_or_else(|_| {
        error!("Primary unit panicked, aborting run");
        Err(OcError::Fault("primary unit panicked".into()))
    });
    if primary_result.is_err() {
        ctx.abort();
    }
    sm.wind_down();

    waiter.wait();
    let secondary_result = handle.join().unwrap_or_else(|_| {
        warn!("Secondary unit panicked");
        Err(OcError::Fault("secondary unit panicked".into()))
    });
    sm.transition(UnitState::Exit)?;

    debug!(
        primary_rounds = sm.rounds_entered(),
        secondary_ok = secondary_result.is_ok(),
        "Both units finished"
    );
    primary_result?;
    secondary_result.map(|_| ())
}

/// Builder for [`DualUnitCoordinator`].
pub struct CoordinatorBuilder {
    clock: Arc<FrequencyController>,
    elevated: FrequencyHz,
    baseline: Option<FrequencyHz>,
    thermometer: Option<Arc<dyn TemperatureSensor>>,
    ticks: Option<Arc<dyn MonotonicClock>>,
    sink: Option<Box<dyn TelemetrySink>>,
    workloads: Option<Arc<dyn WorkloadFactory>>,
    units: UnitConfig,
    histogram_size: usize,
    percentiles: Vec<f64>,
}

impl CoordinatorBuilder {
    /// Create a builder with console telemetry and the system clock.
    pub fn new(clock: Arc<FrequencyController>, elevated: FrequencyHz) -> Self {
        Self {
            clock,
            elevated,
            baseline: None,
            thermometer: None,
            ticks: None,
            sink: None,
            workloads: None,
            units: UnitConfig::default(),
            histogram_size: 1_000,
            percentiles: vec![50.0, 90.0, 99.0],
        }
    }

    /// Frequency restored after every interval (default 125 MHz).
    #[must_use]
    pub fn baseline(mut self, baseline: FrequencyHz) -> Self {
        self.baseline = Some(baseline);
        self
    }

    /// Temperature source for reports.
    #[must_use]
    pub fn thermometer(mut self, thermometer: Arc<dyn TemperatureSensor>) -> Self {
        self.thermometer = Some(thermometer);
        self
    }

    /// Clock used to time rounds.
    #[must_use]
    pub fn ticks(mut self, ticks: Arc<dyn MonotonicClock>) -> Self {
        self.ticks = Some(ticks);
        self
    }

    /// Destination for round reports.
    #[must_use]
    pub fn sink(mut self, sink: Box<dyn TelemetrySink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Factory for the per-unit workloads.
    #[must_use]
    pub fn workloads(mut self, workloads: Arc<dyn WorkloadFactory>) -> Self {
        self.workloads = Some(workloads);
        self
    }

    /// Core placement.
    #[must_use]
    pub fn units(mut self, units: UnitConfig) -> Self {
        self.units = units;
        self
    }

    /// Ring buffer size and reported percentiles for round durations.
    #[must_use]
    pub fn metrics(mut self, histogram_size: usize, percentiles: Vec<f64>) -> Self {
        self.histogram_size = histogram_size;
        self.percentiles = percentiles;
        self
    }

    /// Build the coordinator.
    ///
    /// # Errors
    ///
    /// Returns [`OcError::MissingCollaborator`] if no workload factory or
    /// temperature sensor was supplied.
    pub fn build(self) -> OcResult<DualUnitCoordinator> {
        let workloads = self
            .workloads
            .ok_or_else(|| OcError::MissingCollaborator("workload factory".into()))?;
        let thermometer = self
            .thermometer
            .ok_or_else(|| OcError::MissingCollaborator("temperature sensor".into()))?;
        let baseline = match self.baseline {
            Some(baseline) => baseline,
            None => FrequencyHz::from_mhz(DEFAULT_BASELINE_MHZ)
                .ok_or_else(|| OcError::Config("invalid default baseline".into()))?,
        };

        Ok(DualUnitCoordinator {
            clock: self.clock,
            thermometer,
            ticks: self.ticks.unwrap_or_else(|| Arc::new(SystemClock::new())),
            sink: self.sink.unwrap_or_else(|| Box::new(ConsoleSink::default())),
            workloads,
            units: self.units,
            elevated: self.elevated,
            baseline,
            histogram_size: self.histogram_size,
            percentiles: self.percentiles,
        })
    }
}
