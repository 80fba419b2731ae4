//! Simulated chamber runs and bus self-check.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use eyre::WrapErr;
use ferm_core::probe::{ProbeBus, format_rom};
use ferm_core::{
    Chamber, ChamberSnapshot, CycleStatus, FileStore, SensorCfg, StateStore,
    StoreError, TempUnit, Transition,
};
use ferm_hardware::{SimProbe, SimulatedBus, SimulatedRelay, ThermalPlant};
use ferm_traits::{Clock, ManualClock, MonotonicClock};
use serde_json::json;

/// Control step cadence; several steps per sample period.
const STEP_MS: u64 = 100;
/// Bytes reserved for the persisted record.
pub const STORE_CAPACITY: usize = 64;

/// Simulated bus with every configured probe slot populated.
struct SimRig {
    bus: SimulatedBus,
    beer: SimProbe,
    air: SimProbe,
}

fn sim_rig(sensors: &ferm_config::Sensors, clock: Arc<dyn Clock + Send + Sync>, ambient_c: f64) -> SimRig {
    let mut bus = SimulatedBus::new(clock);
    let slots = sensors.beer_index.max(sensors.fridge_index) + 1;
    let probes: Vec<SimProbe> = (0..slots)
        .map(|i| bus.attach_probe(0x00F0_0D00 + i as u64, ambient_c))
        .collect();
    SimRig {
        bus,
        beer: probes[sensors.beer_index].clone(),
        air: probes[sensors.fridge_index].clone(),
    }
}

#[derive(Debug)]
pub struct RunSummary {
    pub simulated_s: f64,
    pub transitions: usize,
    pub interrupted: bool,
    pub saved: bool,
    pub last: ChamberSnapshot,
    pub unit: TempUnit,
}

impl RunSummary {
    pub fn print(&self, json: bool) {
        let s = &self.last;
        let u = self.unit;
        if json {
            println!(
                "{}",
                json!({
                    "event": "summary",
                    "simulated_s": self.simulated_s,
                    "transitions": self.transitions,
                    "interrupted": self.interrupted,
                    "state": s.state.as_str(),
                    "unit": u.symbol(),
                    "setpoint": u.from_celsius(s.setpoint_c),
                    "beer": u.from_celsius(s.beer_filtered_c),
                    "fridge": u.from_celsius(s.fridge_filtered_c),
                    "peak_estimator": s.peak_estimator,
                    "fault": s.fault,
                    "saved": self.saved,
                })
            );
        } else {
            let note = if self.interrupted { " (interrupted)" } else { "" };
            println!(
                "ran {:.0} s{note}: {} transitions, now {}",
                self.simulated_s, self.transitions, s.state
            );
            println!(
                "beer {:.2} {sym}, fridge {:.2} {sym}, setpoint {:.2} {sym}, peak estimator {:.3}",
                u.from_celsius(s.beer_filtered_c),
                u.from_celsius(s.fridge_filtered_c),
                u.from_celsius(s.setpoint_c),
                s.peak_estimator,
                sym = u.symbol(),
            );
            if self.saved {
                println!("controller state saved");
            }
        }
    }
}

fn print_transition(t: &Transition, snap: &ChamberSnapshot, unit: TempUnit, json: bool) {
    let beer = unit.from_celsius(snap.beer_filtered_c);
    if json {
        println!(
            "{}",
            json!({
                "event": "transition",
                "at_s": t.at_ms as f64 / 1000.0,
                "from": t.from.as_str(),
                "to": t.to.as_str(),
                "reason": t.reason.as_str(),
                "beer": beer,
                "unit": unit.symbol(),
            })
        );
    } else {
        println!(
            "[{:>8.1} s] {} -> {} ({}), beer {beer:.2} {}",
            t.at_ms as f64 / 1000.0,
            t.from,
            t.to,
            t.reason,
            unit.symbol()
        );
    }
}

/// Open the persisted record and load it, treating an erased store as "nothing saved".
fn open_store(cfg: &ferm_config::Config) -> eyre::Result<(StateStore<FileStore>, Option<ferm_core::ControllerState>)> {
    let path = &cfg.persistence.path;
    let store = StateStore::new(
        FileStore::open(path, STORE_CAPACITY).wrap_err_with(|| format!("opening state store {path}"))?,
    );
    let restored = match store.load() {
        Ok(s) => {
            tracing::info!(path = %path, setpoint_c = s.setpoint_c, "restored controller state");
            Some(s)
        }
        Err(StoreError::VersionMismatch { found, .. }) => {
            tracing::info!(found, "no stored controller state; using config");
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, "stored controller state rejected; using config");
            None
        }
    };
    Ok((store, restored))
}

pub fn run_chamber(
    cfg: &ferm_config::Config,
    seconds: u64,
    setpoint_c: Option<f64>,
    ambient_c: f64,
    speedup: bool,
    shutdown: &AtomicBool,
    json: bool,
) -> eyre::Result<RunSummary> {
    let manual = speedup.then(ManualClock::new);
    let clock: Arc<dyn Clock + Send + Sync> = match &manual {
        Some(m) => Arc::new(m.clone()),
        None => Arc::new(MonotonicClock::new()),
    };

    let rig = sim_rig(&cfg.sensors, clock.clone(), ambient_c);
    let cooler = SimulatedRelay::new("cooler");
    let heater = SimulatedRelay::new("heater");
    let mut plant = ThermalPlant::new(ambient_c, rig.beer, rig.air, cooler.handle(), heater.handle());

    let (mut store, restored) = open_store(cfg)?;
    let mut builder = Chamber::builder()
        .with_bus(rig.bus)
        .with_cooler(cooler)
        .with_heater(heater)
        .with_clock(clock.clone())
        .with_config(cfg);
    if let Some(state) = restored {
        builder = builder.with_restored_state(state);
    }
    let mut chamber = builder.build().wrap_err("building chamber")?;
    if let Some(sp) = setpoint_c
        && !chamber.set_setpoint(sp)
    {
        eyre::bail!("setpoint must be a finite temperature");
    }

    let roms = chamber.begin().wrap_err("starting chamber")?;
    tracing::info!(
        probes = roms.len(),
        setpoint_c = chamber.setpoint(),
        speedup,
        "chamber started"
    );

    let unit = chamber.program().unit;
    let start_ms = chamber.now_ms();
    let end_ms = start_ms + seconds.saturating_mul(1000);
    let mut last_ms = start_ms;
    let mut transitions = 0usize;
    let mut interrupted = false;
    let mut result = Ok(());

    while chamber.now_ms() < end_ms {
        if shutdown.load(Ordering::SeqCst) {
            interrupted = true;
            break;
        }
        match &manual {
            Some(m) => m.advance_ms(STEP_MS),
            None => clock.sleep(Duration::from_millis(STEP_MS)),
        }
        let now = chamber.now_ms();
        plant.step((now - last_ms) as f64 / 1000.0);
        last_ms = now;

        match chamber.step() {
            Ok(CycleStatus::Transition(t)) => {
                transitions += 1;
                print_transition(&t, &chamber.snapshot(), unit, json);
            }
            Ok(_) => {}
            Err(e) => {
                result = Err(e);
                break;
            }
        }
    }

    // relays off before anything else can fail
    chamber.shutdown().wrap_err("switching relays off")?;
    result?;

    let saved = store
        .save(&chamber.controller_state())
        .wrap_err("saving controller state")?;
    let last = chamber.snapshot();
    tracing::info!(state = %last.state, transitions, saved, "run finished");
    Ok(RunSummary {
        simulated_s: (chamber.now_ms() - start_ms) as f64 / 1000.0,
        transitions,
        interrupted,
        saved,
        last,
        unit,
    })
}

/// Enumerate the bus and list probe addresses with their first reading.
pub fn self_check(cfg: &ferm_config::Config, json: bool) -> eyre::Result<()> {
    let clock: Arc<dyn Clock + Send + Sync> = Arc::new(ManualClock::new());
    let rig = sim_rig(&cfg.sensors, clock.clone(), 20.0);
    let sensors = SensorCfg::from(&cfg.sensors);
    let mut bus = ProbeBus::new(rig.bus, clock, &sensors);
    let roms = bus.discover().wrap_err("discovering probes")?;
    let need = sensors.beer_index.max(sensors.fridge_index) + 1;
    if roms.len() < need {
        eyre::bail!(ferm_core::ChamberError::HardwareFault(format!(
            "expected at least {need} probes, found {}",
            roms.len()
        )));
    }

    let role = |i: usize| {
        if i == sensors.beer_index {
            "beer"
        } else if i == sensors.fridge_index {
            "fridge"
        } else {
            "unused"
        }
    };
    let relays = check_relays(&cfg.relays)?;
    if json {
        let probes: Vec<_> = roms
            .iter()
            .enumerate()
            .map(|(i, r)| json!({ "index": i, "rom": format_rom(r), "role": role(i) }))
            .collect();
        println!(
            "{}",
            json!({ "event": "self_check", "ok": true, "probes": probes, "relays": relays })
        );
    } else {
        for (i, r) in roms.iter().enumerate() {
            println!("probe {i}: {} ({})", format_rom(r), role(i));
        }
        println!("relays: {relays}");
        println!("OK");
    }
    Ok(())
}

#[cfg(all(feature = "hardware", target_os = "linux"))]
fn check_relays(r: &ferm_config::Relays) -> eyre::Result<&'static str> {
    use ferm_traits::Relay;

    let mut cooler = ferm_hardware::gpio::GpioRelay::new(r.cooler_pin, r.active_low)
        .wrap_err("open cooler relay")?;
    let mut heater = ferm_hardware::gpio::GpioRelay::new(r.heater_pin, r.active_low)
        .wrap_err("open heater relay")?;
    cooler
        .set(false)
        .map_err(|e| eyre::eyre!("cooler relay: {e}"))?;
    heater
        .set(false)
        .map_err(|e| eyre::eyre!("heater relay: {e}"))?;
    tracing::info!(cooler_pin = r.cooler_pin, heater_pin = r.heater_pin, "gpio relays ready");
    Ok("gpio")
}

#[cfg(not(all(feature = "hardware", target_os = "linux")))]
fn check_relays(_r: &ferm_config::Relays) -> eyre::Result<&'static str> {
    Ok("simulated")
}

