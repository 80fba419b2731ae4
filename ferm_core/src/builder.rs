//! Type-state builder for `Chamber` and generic `build_chamber` constructor.
//!
//! The builder enforces at compile time that the bus and both relays are
//! provided before `build()` is available. `try_build()` is always available
//! for dynamic checks.

use std::marker::PhantomData;
use std::sync::Arc;

use ferm_traits::clock::{Clock, MonotonicClock};
use ferm_traits::{OneWire, Relay};

use crate::chamber::Chamber;
use crate::config::{FridgeCfg, PidCfg, ProgramState, SensorCfg};
use crate::error::{BuildError, Result};
use crate::persistence::ControllerState;
use crate::pid::Pid;
use crate::probe::ProbeBus;
use crate::snapshot::SnapshotPublisher;
use crate::thermal::ThermalStateMachine;

// ── Type-state markers ───────────────────────────────────────────────────────

pub struct Missing;
pub struct Set;

/// Builder for `Chamber`. All fields are validated on `build()`.
pub struct ChamberBuilder<B, C, H> {
    bus: Option<Box<dyn OneWire>>,
    cooler: Option<Box<dyn Relay>>,
    heater: Option<Box<dyn Relay>>,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
    sensors: Option<SensorCfg>,
    main_pid: Option<PidCfg>,
    heat_pid: Option<PidCfg>,
    fridge: Option<FridgeCfg>,
    program: Option<ProgramState>,
    restore: Option<ControllerState>,
    _b: PhantomData<B>,
    _c: PhantomData<C>,
    _h: PhantomData<H>,
}

impl Default for ChamberBuilder<Missing, Missing, Missing> {
    fn default() -> Self {
        Self {
            bus: None,
            cooler: None,
            heater: None,
            clock: None,
            sensors: None,
            main_pid: None,
            heat_pid: None,
            fridge: None,
            program: None,
            restore: None,
            _b: PhantomData,
            _c: PhantomData,
            _h: PhantomData,
        }
    }
}

impl Chamber {
    /// Start building a Chamber.
    pub fn builder() -> ChamberBuilder<Missing, Missing, Missing> {
        ChamberBuilder::default()
    }
}

/// Validate configuration and construct a `Chamber`.
///
/// Single source of truth for validation, used by both
/// `ChamberBuilder::try_build()` and `build_chamber()`.
#[allow(clippy::too_many_arguments)]
fn validate_and_build<W: OneWire, C: Relay, H: Relay>(
    bus: W,
    cooler: C,
    heater: H,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
    sensors: SensorCfg,
    main_cfg: PidCfg,
    heat_cfg: PidCfg,
    fridge: FridgeCfg,
    program: ProgramState,
    restore: Option<ControllerState>,
) -> Result<Chamber<W, C, H>> {
    // ── Validation ───────────────────────────────────────────────────────────
    let invalid = |msg: &'static str| Err(eyre::Report::new(BuildError::InvalidConfig(msg)));
    if !(sensors.sample_hz.is_finite() && sensors.sample_hz > 0.0) {
        return invalid("sample_hz must be > 0");
    }
    if sensors.beer_index == sensors.fridge_index {
        return invalid("beer and fridge probes must differ");
    }
    if !(fridge.idle_diff_c.is_finite() && fridge.idle_diff_c > 0.0) {
        return invalid("idle_diff_c must be > 0");
    }
    if fridge.cool_min_on_ms > fridge.cool_max_on_ms {
        return invalid("cool_min_on must not exceed cool_max_on");
    }
    if fridge.heat_window_ms == 0 {
        return invalid("heat_window_ms must be >= 1");
    }
    if !(fridge.estimator_gain > 0.0 && fridge.estimator_gain <= 1.0) {
        return invalid("estimator_gain must be in (0, 1]");
    }
    if main_cfg.limits.is_none() {
        return invalid("main pid needs output limits");
    }
    if !program.setpoint_c.is_finite() {
        return invalid("setpoint must be finite");
    }

    // ── Construct ────────────────────────────────────────────────────────────
    let clock = clock.unwrap_or_else(|| Arc::new(MonotonicClock::new()));
    let bus = ProbeBus::new(bus, clock, &sensors);
    let boot_ms = bus.now_ms();
    let main_pid = Pid::from_cfg(&main_cfg, (0.0, 30.0));
    let heat_pid = Pid::from_cfg(&heat_cfg, (0.0, fridge.heat_window_ms as f64));
    let (publisher, _rx) = SnapshotPublisher::new();

    let mut chamber = Chamber {
        bus,
        cooler,
        heater,
        sensors,
        program,
        main_pid,
        heat_pid,
        thermal: ThermalStateMachine::new(fridge, boot_ms),
        beer: None,
        fridge: None,
        publisher,
        cooler_on: None,
        heater_on: None,
        fault: false,
    };
    if let Some(state) = restore {
        chamber.restore(&state);
    }
    Ok(chamber)
}

impl<B, C, H> ChamberBuilder<B, C, H> {
    /// Fallible build available in any type-state; returns detailed error for missing pieces.
    pub fn try_build(self) -> Result<Chamber> {
        let bus = self
            .bus
            .ok_or_else(|| eyre::Report::new(BuildError::MissingBus))?;
        let cooler = self
            .cooler
            .ok_or_else(|| eyre::Report::new(BuildError::MissingCooler))?;
        let heater = self
            .heater
            .ok_or_else(|| eyre::Report::new(BuildError::MissingHeater))?;

        validate_and_build(
            bus,
            cooler,
            heater,
            self.clock,
            self.sensors.unwrap_or_default(),
            self.main_pid.unwrap_or_else(PidCfg::main_default),
            self.heat_pid.unwrap_or_else(PidCfg::heat_default),
            self.fridge.unwrap_or_default(),
            self.program.unwrap_or_default(),
            self.restore,
        )
    }
}

/// Chainable setters that do not affect type-state.
impl<B, C, H> ChamberBuilder<B, C, H> {
    pub fn with_sensors(mut self, sensors: SensorCfg) -> Self {
        self.sensors = Some(sensors);
        self
    }
    pub fn with_main_pid(mut self, cfg: PidCfg) -> Self {
        self.main_pid = Some(cfg);
        self
    }
    pub fn with_heat_pid(mut self, cfg: PidCfg) -> Self {
        self.heat_pid = Some(cfg);
        self
    }
    pub fn with_fridge(mut self, fridge: FridgeCfg) -> Self {
        self.fridge = Some(fridge);
        self
    }
    pub fn with_program(mut self, program: ProgramState) -> Self {
        self.program = Some(program);
        self
    }
    /// Take every section from a loaded TOML config.
    pub fn with_config(self, cfg: &ferm_config::Config) -> Self {
        self.with_sensors(SensorCfg::from(&cfg.sensors))
            .with_main_pid(PidCfg::from(&cfg.main_pid))
            .with_heat_pid(PidCfg::from(&cfg.heat_pid))
            .with_fridge(FridgeCfg::from(&cfg.fridge))
            .with_program(ProgramState::from(&cfg.program))
    }
    /// Apply a persisted record over the configured values.
    pub fn with_restored_state(mut self, state: ControllerState) -> Self {
        self.restore = Some(state);
        self
    }
    /// Provide a custom clock implementation; defaults to `MonotonicClock` when not provided.
    pub fn with_clock(mut self, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        self.clock = Some(clock);
        self
    }
}

// Setters that advance type-state
impl<C, H> ChamberBuilder<Missing, C, H> {
    pub fn with_bus(self, bus: impl OneWire + 'static) -> ChamberBuilder<Set, C, H> {
        ChamberBuilder {
            bus: Some(Box::new(bus)),
            cooler: self.cooler,
            heater: self.heater,
            clock: self.clock,
            sensors: self.sensors,
            main_pid: self.main_pid,
            heat_pid: self.heat_pid,
            fridge: self.fridge,
            program: self.program,
            restore: self.restore,
            _b: PhantomData,
            _c: PhantomData,
            _h: PhantomData,
        }
    }
}

impl<B, H> ChamberBuilder<B, Missing, H> {
    pub fn with_cooler(self, cooler: impl Relay + 'static) -> ChamberBuilder<B, Set, H> {
        ChamberBuilder {
            bus: self.bus,
            cooler: Some(Box::new(cooler)),
            heater: self.heater,
            clock: self.clock,
            sensors: self.sensors,
            main_pid: self.main_pid,
            heat_pid: self.heat_pid,
            fridge: self.fridge,
            program: self.program,
            restore: self.restore,
            _b: PhantomData,
            _c: PhantomData,
            _h: PhantomData,
        }
    }
}

impl<B, C> ChamberBuilder<B, C, Missing> {
    pub fn with_heater(self, heater: impl Relay + 'static) -> ChamberBuilder<B, C, Set> {
        ChamberBuilder {
            bus: self.bus,
            cooler: self.cooler,
            heater: Some(Box::new(heater)),
            clock: self.clock,
            sensors: self.sensors,
            main_pid: self.main_pid,
            heat_pid: self.heat_pid,
            fridge: self.fridge,
            program: self.program,
            restore: self.restore,
            _b: PhantomData,
            _c: PhantomData,
            _h: PhantomData,
        }
    }
}

impl ChamberBuilder<Set, Set, Set> {
    /// Validate and build the Chamber. Only available once bus, cooler and heater are set.
    pub fn build(self) -> Result<Chamber> {
        self.try_build()
    }
}

/// Build a statically-dispatched `Chamber` from concrete parts.
///
/// Delegates to the shared `validate_and_build`.
#[allow(clippy::too_many_arguments)]
pub fn build_chamber<W, C, H>(
    bus: W,
    cooler: C,
    heater: H,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
    sensors: SensorCfg,
    main_pid: PidCfg,
    heat_pid: PidCfg,
    fridge: FridgeCfg,
    program: ProgramState,
) -> Result<Chamber<W, C, H>>
where
    W: OneWire,
    C: Relay,
    H: Relay,
{
    validate_and_build(
        bus, cooler, heater, clock, sensors, main_pid, heat_pid, fridge, program, None,
    )
}
