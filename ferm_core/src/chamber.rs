//! The chamber control cycle.
//!
//! One `step()` runs, in order: conversion scheduling, probe reads, the
//! primary PID (beer to fridge-air target), the secondary PID (fridge air to
//! heater duty), the thermal state machine, and relay writes. Everything runs
//! on the caller's thread; other contexts observe through snapshots.

use eyre::WrapErr;
use ferm_traits::onewire::Rom;
use ferm_traits::{BoxError, OneWire, Relay};

use crate::config::{ProgramState, SensorCfg};
use crate::error::{ChamberError, Result};
use crate::hw_error::map_hw_error;
use crate::persistence::{ControllerState, Tunings};
use crate::pid::{Mode, Pid};
use crate::probe::{Probe, ProbeBus, format_rom};
use crate::snapshot::{ChamberSnapshot, SnapshotPublisher};
use crate::status::CycleStatus;
use crate::thermal::{FridgeState, ThermalInputs, ThermalStateMachine};

fn relay_err(e: BoxError, which: &'static str) -> eyre::Report {
    eyre::Report::new(map_hw_error(&*e)).wrap_err(which)
}

/// Chamber over a bus `W`, cooler relay `C` and heater relay `H`.
/// The builder produces the boxed form.
pub struct Chamber<W = Box<dyn OneWire>, C = Box<dyn Relay>, H = Box<dyn Relay>>
where
    W: OneWire,
    C: Relay,
    H: Relay,
{
    pub(crate) bus: ProbeBus<W>,
    pub(crate) cooler: C,
    pub(crate) heater: H,
    pub(crate) sensors: SensorCfg,
    pub(crate) program: ProgramState,
    pub(crate) main_pid: Pid,
    pub(crate) heat_pid: Pid,
    pub(crate) thermal: ThermalStateMachine,
    pub(crate) beer: Option<Probe>,
    pub(crate) fridge: Option<Probe>,
    pub(crate) publisher: SnapshotPublisher,
    pub(crate) cooler_on: Option<bool>,
    pub(crate) heater_on: Option<bool>,
    pub(crate) fault: bool,
}

impl<W: OneWire, C: Relay, H: Relay> core::fmt::Debug for Chamber<W, C, H> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Chamber")
            .field("state", &self.thermal.state())
            .field("setpoint_c", &self.program.setpoint_c)
            .field("fault", &self.fault)
            .finish()
    }
}

impl<W: OneWire, C: Relay, H: Relay> Chamber<W, C, H> {
    /// Discover probes, take first readings, put both relays in a known
    /// (off) state and engage the primary loop per the program flags.
    pub fn begin(&mut self) -> Result<Vec<Rom>> {
        self.write_relays(false, false)?;
        let roms = self.bus.discover().wrap_err("discovering probes")?;
        let need = self.sensors.beer_index.max(self.sensors.fridge_index) + 1;
        if roms.len() < need {
            return Err(eyre::Report::new(ChamberError::HardwareFault(format!(
                "expected at least {need} probes, found {}",
                roms.len()
            ))));
        }
        let mut beer = Probe::new(roms[self.sensors.beer_index]);
        let mut fridge = Probe::new(roms[self.sensors.fridge_index]);
        beer.init(&mut self.bus).wrap_err("initialising beer probe")?;
        fridge.init(&mut self.bus).wrap_err("initialising fridge probe")?;
        tracing::info!(
            beer = %format_rom(beer.address()),
            fridge = %format_rom(fridge.address()),
            beer_c = beer.filtered(),
            fridge_c = fridge.filtered(),
            "probes ready"
        );

        let main_mode = if self.program.main_auto {
            Mode::Automatic
        } else {
            Mode::Manual
        };
        self.main_pid.set_mode(main_mode, beer.filtered());
        // heat loop stays manual until HEAT; its output (0 or restored) seeds the start
        self.heat_pid.set_mode(Mode::Manual, fridge.filtered());
        self.thermal.request_hold(!self.program.main_auto);
        self.beer = Some(beer);
        self.fridge = Some(fridge);
        Ok(roms)
    }

    /// Run one control cycle. Call it often (at least a few times per
    /// sample period); it only does real work on the sample tick.
    pub fn step(&mut self) -> Result<CycleStatus> {
        let (Some(beer), Some(fridge)) = (self.beer.as_mut(), self.fridge.as_mut()) else {
            return Err(eyre::Report::new(ChamberError::State(
                "step() before begin()".into(),
            )));
        };

        self.bus.start_conv().wrap_err("starting conversion")?;
        if !self.bus.is_ready().wrap_err("waiting for conversion")? {
            let now = self.bus.now_ms();
            let heater = self.thermal.heater_on(now, self.heat_pid.output());
            let cooler = self.thermal.compressor_on();
            self.write_relays(cooler, heater)?;
            return Ok(CycleStatus::Waiting);
        }
        let now = self.bus.now_ms();

        let beer_ok = read_probe(beer, &mut self.bus, "beer");
        let fridge_ok = read_probe(fridge, &mut self.bus, "fridge");
        let limit = self.sensors.max_stale_cycles;
        let fault = limit > 0 && (beer.stale_cycles() >= limit || fridge.stale_cycles() >= limit);
        if fault != self.fault {
            if fault {
                tracing::warn!(
                    beer_stale = beer.stale_cycles(),
                    fridge_stale = fridge.stale_cycles(),
                    "sensor fault raised"
                );
            } else {
                tracing::info!("sensor fault cleared");
            }
            self.fault = fault;
        }

        let setpoint = self.program.setpoint_c;
        if beer.is_initialized() {
            self.main_pid.compute(beer.filtered(), setpoint, now);
        }
        if fridge_ok && fridge.is_initialized() {
            self.heat_pid
                .compute(fridge.filtered(), self.main_pid.output(), now);
        }

        let inputs = ThermalInputs {
            now_ms: now,
            setpoint_c: setpoint,
            beer_c: beer_ok.then_some(beer.filtered()),
            peak: beer_ok && beer.peak_detect(),
            fault,
        };
        let transition = self.thermal.update(&inputs);

        if self.thermal.entered(FridgeState::Heat) && self.program.heat_auto {
            self.heat_pid.set_mode(Mode::Automatic, fridge.filtered());
            if fridge_ok {
                self.heat_pid
                    .compute(fridge.filtered(), self.main_pid.output(), now);
            }
        } else if self.thermal.left(FridgeState::Heat) {
            self.heat_pid.set_mode(Mode::Manual, fridge.filtered());
            self.heat_pid.set_manual_output(0.0);
        }

        let cooler = self.thermal.compressor_on();
        let heater = self.thermal.heater_on(now, self.heat_pid.output());
        self.write_relays(cooler, heater)?;

        let snap = self.snapshot_at(now);
        tracing::debug!(
            state = %snap.state,
            beer_c = snap.beer_filtered_c,
            fridge_c = snap.fridge_filtered_c,
            target_c = snap.fridge_target_c,
            heat_duty_ms = snap.heat_duty_ms,
            offset_ms = snap.conversion_offset_ms,
            "control cycle"
        );
        self.publisher.publish(snap);

        Ok(match transition {
            Some(t) => CycleStatus::Transition(t),
            None if !(beer_ok && fridge_ok) => CycleStatus::Held,
            None => CycleStatus::Running,
        })
    }

    fn write_relays(&mut self, cooler: bool, heater: bool) -> Result<()> {
        if self.cooler_on != Some(cooler) {
            self.cooler
                .set(cooler)
                .map_err(|e| relay_err(e, "switching cooler"))?;
            self.cooler_on = Some(cooler);
        }
        if self.heater_on != Some(heater) {
            self.heater
                .set(heater)
                .map_err(|e| relay_err(e, "switching heater"))?;
            self.heater_on = Some(heater);
        }
        Ok(())
    }

    /// Switch both relays off (best-effort on each).
    pub fn shutdown(&mut self) -> Result<()> {
        let c = self.cooler.set(false);
        let h = self.heater.set(false);
        self.cooler_on = Some(false);
        self.heater_on = Some(false);
        c.map_err(|e| relay_err(e, "switching cooler off"))?;
        h.map_err(|e| relay_err(e, "switching heater off"))?;
        tracing::info!("relays off");
        Ok(())
    }

    pub fn set_setpoint(&mut self, setpoint_c: f64) -> bool {
        if !setpoint_c.is_finite() {
            return false;
        }
        self.program.setpoint_c = setpoint_c;
        true
    }

    pub fn setpoint(&self) -> f64 {
        self.program.setpoint_c
    }

    /// Switch the primary loop. Manual latches a hold on the state machine
    /// (applied at the next permitted boundary); automatic releases it.
    pub fn set_main_mode(&mut self, mode: Mode) {
        let input = self.beer.as_ref().map_or(0.0, Probe::filtered);
        self.main_pid.set_mode(mode, input);
        self.program.main_auto = mode == Mode::Automatic;
        self.thermal.request_hold(mode == Mode::Manual);
    }

    pub fn set_heat_auto(&mut self, on: bool) {
        self.program.heat_auto = on;
    }

    /// Snapshot of the persisted fields.
    pub fn controller_state(&self) -> ControllerState {
        ControllerState {
            main_auto: self.program.main_auto,
            heat_auto: self.program.heat_auto,
            unit: self.program.unit,
            profile_enabled: self.program.profile_enabled,
            logging_enabled: self.program.logging_enabled,
            main_tunings: Tunings {
                kp: self.main_pid.kp(),
                ki: self.main_pid.ki(),
                kd: self.main_pid.kd(),
            },
            main_output: self.main_pid.output(),
            heat_tunings: Tunings {
                kp: self.heat_pid.kp(),
                ki: self.heat_pid.ki(),
                kd: self.heat_pid.kd(),
            },
            heat_output: self.heat_pid.output(),
            setpoint_c: self.program.setpoint_c,
            peak_estimator: self.thermal.peak_estimator(),
        }
    }

    /// Apply a persisted record. Call before `begin()`; rejected fields are logged and skipped.
    pub fn restore(&mut self, s: &ControllerState) {
        self.program.main_auto = s.main_auto;
        self.program.heat_auto = s.heat_auto;
        self.program.unit = s.unit;
        self.program.profile_enabled = s.profile_enabled;
        self.program.logging_enabled = s.logging_enabled;
        if !self.set_setpoint(s.setpoint_c) {
            tracing::warn!(setpoint = s.setpoint_c, "restored setpoint rejected");
        }
        let t = s.main_tunings;
        if !self.main_pid.set_tunings(t.kp, t.ki, t.kd) {
            tracing::warn!("restored main tunings rejected");
        }
        let t = s.heat_tunings;
        if !self.heat_pid.set_tunings(t.kp, t.ki, t.kd) {
            tracing::warn!("restored heat tunings rejected");
        }
        // outputs seed bumpless transfer when the loops engage
        self.main_pid.set_manual_output(s.main_output);
        self.heat_pid.set_manual_output(s.heat_output);
        if !self.thermal.set_peak_estimator(s.peak_estimator) {
            tracing::warn!(value = s.peak_estimator, "restored peak estimator rejected");
        }
    }

    pub fn snapshot(&self) -> ChamberSnapshot {
        self.snapshot_at(self.bus.now_ms())
    }

    fn snapshot_at(&self, now: u64) -> ChamberSnapshot {
        let (beer_c, beer_f) = self
            .beer
            .as_ref()
            .map_or((f64::NAN, f64::NAN), |p| (p.temperature(), p.filtered()));
        let (fridge_c, fridge_f) = self
            .fridge
            .as_ref()
            .map_or((f64::NAN, f64::NAN), |p| (p.temperature(), p.filtered()));
        ChamberSnapshot {
            at_ms: now,
            state: self.thermal.state(),
            last_reason: self.thermal.last_transition().map(|t| t.reason),
            setpoint_c: self.program.setpoint_c,
            beer_c,
            beer_filtered_c: beer_f,
            fridge_c,
            fridge_filtered_c: fridge_f,
            fridge_target_c: self.main_pid.output(),
            heat_duty_ms: self.heat_pid.output(),
            compressor: self.cooler_on.unwrap_or(false),
            heater: self.heater_on.unwrap_or(false),
            peak_estimator: self.thermal.peak_estimator(),
            conversion_offset_ms: self.bus.conversion_offset_ms(),
            fault: self.fault,
            hold: self.thermal.hold_requested(),
        }
    }

    /// Receiver for per-cycle snapshots (newest only).
    pub fn subscribe(&self) -> crossbeam_channel::Receiver<ChamberSnapshot> {
        self.publisher.subscribe()
    }

    pub fn thermal(&self) -> &ThermalStateMachine {
        &self.thermal
    }

    pub fn thermal_mut(&mut self) -> &mut ThermalStateMachine {
        &mut self.thermal
    }

    pub fn main_pid(&self) -> &Pid {
        &self.main_pid
    }

    pub fn main_pid_mut(&mut self) -> &mut Pid {
        &mut self.main_pid
    }

    pub fn heat_pid(&self) -> &Pid {
        &self.heat_pid
    }

    pub fn beer_probe(&self) -> Option<&Probe> {
        self.beer.as_ref()
    }

    pub fn fridge_probe(&self) -> Option<&Probe> {
        self.fridge.as_ref()
    }

    pub fn bus(&self) -> &ProbeBus<W> {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut ProbeBus<W> {
        &mut self.bus
    }

    pub fn program(&self) -> &ProgramState {
        &self.program
    }

    pub fn now_ms(&self) -> u64 {
        self.bus.now_ms()
    }

    pub fn fault(&self) -> bool {
        self.fault
    }
}

/// Read one probe, folding bus errors into a rejected reading.
fn read_probe<W: OneWire>(probe: &mut Probe, bus: &mut ProbeBus<W>, name: &'static str) -> bool {
    match probe.update(bus) {
        Ok(ok) => ok,
        Err(e) => {
            tracing::warn!(probe = name, error = %e, "probe read failed");
            false
        }
    }
}
