//! Operator entry points: voltage changes and the three run modes.

use crate::clock::{
    ClockSource, FrequencyController, FrequencyHz, SimulatedPll, SupportedFrequencies,
};
use crate::coordinator::{DualUnitCoordinator, RunSummary};
use crate::devmem::DevMemRegister;
use crate::register::{RegisterAccess, SimulatedRegister, VoltageLevel, VoltageRegister};
use crate::sensors::{SimulatedLed, SimulatedThermometer, TemperatureSensor};
use crate::telemetry::{ConsoleSink, TelemetrySink};
use crate::workload::{DefaultWorkloads, WorkloadFactory};
use oc_common::config::{BenchConfig, RegisterBackend};
use oc_common::error::{OcError, OcResult};
use oc_common::time::{MonotonicClock, SystemClock};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{error, info, warn};

type SinkFactory = Arc<dyn Fn() -> Box<dyn TelemetrySink> + Send + Sync>;

/// A voltage register, a clock, and the collaborators needed to stress it.
pub struct StressBench {
    config: BenchConfig,
    register: VoltageRegister<Box<dyn RegisterAccess>>,
    clock: Arc<FrequencyController>,
    workloads: Option<Arc<dyn WorkloadFactory>>,
    thermometer: Option<Arc<dyn TemperatureSensor>>,
    ticks: Arc<dyn MonotonicClock>,
    telemetry: SinkFactory,
}

impl StressBench {
    /// Start assembling a bench.
    pub fn builder() -> StressBenchBuilder {
        StressBenchBuilder::new()
    }

    /// Bench with the configured register backend and simulated
    /// clock, sensor, and indicator.
    ///
    /// # Errors
    ///
    /// Returns [`OcError::Register`] if the `devmem` backend cannot be
    /// opened.
    pub fn from_config(config: BenchConfig) -> OcResult<Self> {
        let builder = match config.register.backend {
            RegisterBackend::Simulated => Self::builder().register(SimulatedRegister::default()),
            RegisterBackend::DevMem => Self::builder().register(DevMemRegister::open(
                &config.register.device,
                config.register.address,
            )?),
        };
        Ok(builder.simulated_collaborators().config(config).build())
    }

    /// Fully simulated bench.
    pub fn simulated(config: BenchConfig) -> Self {
        Self::builder()
            .simulated_collaborators()
            .config(config)
            .build()
    }

    /// Set the core voltage; logs and returns `false` on rejection.
    pub fn set_voltage(&mut self, volt: f64) -> bool {
        self.register.set_voltage(volt)
    }

    /// Set the core voltage, returning the level applied.
    ///
    /// # Errors
    ///
    /// Returns [`OcError::InvalidVoltage`] if `volt` matches no level.
    pub fn apply_voltage(&mut self, volt: f64) -> OcResult<VoltageLevel> {
        self.register.apply(volt)
    }

    /// Level currently encoded in the register.
    pub fn voltage_level(&self) -> Option<VoltageLevel> {
        self.register.current_level()
    }

    /// Raw register word.
    pub fn register_value(&self) -> u32 {
        self.register.raw()
    }

    /// Frequency currently in effect.
    pub fn frequency(&self) -> FrequencyHz {
        self.clock.current()
    }

    /// Active configuration.
    pub fn config(&self) -> &BenchConfig {
        &self.config
    }

    fn coordinator(&self, mhz: u32) -> OcResult<DualUnitCoordinator> {
        let workloads = self
            .workloads
            .clone()
            .ok_or_else(|| OcError::MissingCollaborator("workload factory".into()))?;
        let thermometer = self
            .thermometer
            .clone()
            .ok_or_else(|| OcError::MissingCollaborator("temperature sensor".into()))?;

        let elevated = FrequencyHz::from_operator_mhz(mhz)?;
        let baseline = FrequencyHz::from_mhz(self.config.baseline_mhz).ok_or_else(|| {
            OcError::Config(format!("invalid baseline frequency {}MHz", self.config.baseline_mhz))
        })?;
        self.clock.validate(elevated)?;
        self.clock.validate(baseline)?;

        DualUnitCoordinator::builder(Arc::clone(&self.clock), elevated)
            .baseline(baseline)
            .thermometer(thermometer)
            .ticks(Arc::clone(&self.ticks))
            .sink((self.telemetry)())
            .workloads(workloads)
            .units(self.config.units.clone())
            .metrics(
                self.config.metrics.histogram_size,
                self.config.metrics.percentiles.clone(),
            )
            .build()
    }

    fn prepare(&self, mhz: u32) -> OcResult<DualUnitCoordinator> {
        self.coordinator(mhz).map_err(|e| {
            error!(mhz, error = %e, "Cannot start stress run");
            e
        })
    }

    /// Stress `mhz` for the configured number of rounds across both units.
    ///
    /// Nothing is spawned if the frequency is rejected.
    ///
    /// # Errors
    ///
    /// Returns [`OcError::InvalidFrequency`] or
    /// [`OcError::MissingCollaborator`] before the run starts, or the
    /// failure that ended it.
    pub fn run(&self, mhz: u32) -> OcResult<RunSummary> {
        let coordinator = self.prepare(mhz)?;
        coordinator.run_bounded(self.config.round_limit)
    }

    /// Stress `mhz` until something fails.
    ///
    /// # Errors
    ///
    /// Same start-up errors as [`StressBench::run`], then whatever ends the
    /// soak.
    pub fn run_non_stop(&self, mhz: u32) -> OcResult<Infallible> {
        let coordinator = self.prepare(mhz)?;
        coordinator.run_unbounded()
    }

    /// Frequencies in `[1, limit_mhz]` MHz that the clock accepts.
    pub fn find_valid_clocks(&self, limit_mhz: u32) -> SupportedFrequencies<'_> {
        info!(limit_mhz, "Searching for valid clock frequencies");
        self.clock.find_supported_frequencies(limit_mhz)
    }
}

/// Builder for [`StressBench`].
pub struct StressBenchBuilder {
    config: BenchConfig,
    register: Option<Box<dyn RegisterAccess>>,
    clock: Option<Box<dyn ClockSource>>,
    workloads: Option<Arc<dyn WorkloadFactory>>,
    thermometer: Option<Arc<dyn TemperatureSensor>>,
    ticks: Option<Arc<dyn MonotonicClock>>,
    telemetry: Option<SinkFactory>,
    simulated: bool,
}

impl Default for StressBenchBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl StressBenchBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self {
            config: BenchConfig::default(),
            register: None,
            clock: None,
            workloads: None,
            thermometer: None,
            ticks: None,
            telemetry: None,
            simulated: false,
        }
    }

    /// Set the bench configuration.
    pub fn config(mut self, config: BenchConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the register backend.
    pub fn register(mut self, register: impl RegisterAccess + 'static) -> Self {
        self.register = Some(Box::new(register));
        self
    }

    /// Set the clock subsystem.
    pub fn clock_source(mut self, source: impl ClockSource + 'static) -> Self {
        self.clock = Some(Box::new(source));
        self
    }

    /// Set the workload factory.
    pub fn workloads(mut self, workloads: Arc<dyn WorkloadFactory>) -> Self {
        self.workloads = Some(workloads);
        self
    }

    /// Set the temperature sensor.
    pub fn thermometer(mut self, thermometer: Arc<dyn TemperatureSensor>) -> Self {
        self.thermometer = Some(thermometer);
        self
    }

    /// Set the clock used to time rounds and pace the blink.
    pub fn ticks(mut self, ticks: Arc<dyn MonotonicClock>) -> Self {
        self.ticks = Some(ticks);
        self
    }

    /// Set how each run obtains its report sink.
    pub fn telemetry<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn TelemetrySink> + Send + Sync + 'static,
    {
        self.telemetry = Some(Arc::new(factory));
        self
    }

    /// Fall back to simulated workloads and sensor instead of running
    /// without them. The workloads are sized from the configuration the
    /// bench is built with.
    pub fn simulated_collaborators(mut self) -> Self {
        self.simulated = true;
        self
    }

    /// Build the bench. Missing backends default to simulated ones.
    pub fn build(self) -> StressBench {
        let register = self.register.unwrap_or_else(|| {
            warn!("No register backend supplied, using a simulated register");
            Box::new(SimulatedRegister::default())
        });
        let clock = self
            .clock
            .unwrap_or_else(|| Box::new(SimulatedPll::default()));
        let ticks = self
            .ticks
            .unwrap_or_else(|| -> Arc<dyn MonotonicClock> { Arc::new(SystemClock::new()) });

        let mut workloads = self.workloads;
        let mut thermometer = self.thermometer;
        if self.simulated {
            let sizing = &self.config.workload;
            workloads.get_or_insert_with(|| -> Arc<dyn WorkloadFactory> {
                Arc::new(DefaultWorkloads::new(
                    sizing.iterations,
                    sizing.blink_interval,
                    Arc::new(SimulatedLed::new()),
                    ticks.clone(),
                ))
            });
            thermometer.get_or_insert_with(|| -> Arc<dyn TemperatureSensor> {
                Arc::new(SimulatedThermometer::default())
            });
        }

        StressBench {
            config: self.config,
            register: VoltageRegister::new(register),
            clock: Arc::new(FrequencyController::from_boxed(clock)),
            workloads,
            thermometer,
            ticks,
            telemetry: self.telemetry.unwrap_or_else(|| {
                Arc::new(|| -> Box<dyn TelemetrySink> { Box::new(ConsoleSink::default()) })
            }),
        }
    }
}
