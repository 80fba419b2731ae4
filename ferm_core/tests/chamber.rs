//! Whole-chamber cycles on the simulated bus and relays.

use std::sync::Arc;

use ferm_core::{
    BuildError, Chamber, ChamberError, CycleStatus, FileStore, FridgeState, Mode, ProgramState,
    SensorCfg, StateStore, Transition, TransitionReason, build_chamber,
};
use ferm_hardware::{RelayHandle, SimProbe, SimulatedBus, SimulatedRelay};
use ferm_traits::{Clock, ManualClock};
use rstest::rstest;

const SP: f64 = 18.0;

struct Bench {
    clock: ManualClock,
    beer: SimProbe,
    air: SimProbe,
    cooler: RelayHandle,
    heater: RelayHandle,
    chamber: Chamber,
}

fn program() -> ProgramState {
    ProgramState {
        setpoint_c: SP,
        ..ProgramState::default()
    }
}

fn bench(beer_c: f64, air_c: f64) -> Bench {
    let clock = ManualClock::new();
    let shared: Arc<dyn Clock + Send + Sync> = Arc::new(clock.clone());
    let mut sim = SimulatedBus::new(shared.clone());
    let beer = sim.attach_probe(1, beer_c);
    let air = sim.attach_probe(2, air_c);
    let cooler = SimulatedRelay::new("cooler");
    let heater = SimulatedRelay::new("heater");
    let (cooler_h, heater_h) = (cooler.handle(), heater.handle());
    let chamber = Chamber::builder()
        .with_bus(sim)
        .with_cooler(cooler)
        .with_heater(heater)
        .with_clock(shared)
        .with_program(program())
        .build()
        .unwrap();
    Bench {
        clock,
        beer,
        air,
        cooler: cooler_h,
        heater: heater_h,
        chamber,
    }
}

fn started(beer_c: f64, air_c: f64) -> Bench {
    let mut b = bench(beer_c, air_c);
    b.chamber.begin().unwrap();
    b
}

/// Step every 100 ms for `secs` of simulated time; returns the transitions seen.
fn run_for(b: &mut Bench, secs: u64) -> Vec<Transition> {
    let end = b.chamber.now_ms() + secs * 1_000;
    let mut seen = Vec::new();
    while b.chamber.now_ms() < end {
        b.clock.advance_ms(100);
        if let CycleStatus::Transition(t) = b.chamber.step().unwrap() {
            seen.push(t);
        }
    }
    seen
}

#[test]
fn builder_reports_missing_parts() {
    let err = Chamber::builder().try_build().unwrap_err();
    assert_eq!(err.downcast_ref::<BuildError>(), Some(&BuildError::MissingBus));

    let clock = ManualClock::new();
    let sim = || SimulatedBus::new(Arc::new(clock.clone()));
    let err = Chamber::builder().with_bus(sim()).try_build().unwrap_err();
    assert_eq!(err.downcast_ref::<BuildError>(), Some(&BuildError::MissingCooler));

    let err = Chamber::builder()
        .with_bus(sim())
        .with_cooler(SimulatedRelay::new("cooler"))
        .try_build()
        .unwrap_err();
    assert_eq!(err.downcast_ref::<BuildError>(), Some(&BuildError::MissingHeater));
}

#[test]
fn builder_rejects_shared_probe_index() {
    let clock = ManualClock::new();
    let err = Chamber::builder()
        .with_bus(SimulatedBus::new(Arc::new(clock)))
        .with_cooler(SimulatedRelay::new("cooler"))
        .with_heater(SimulatedRelay::new("heater"))
        .with_sensors(SensorCfg {
            fridge_index: 0,
            ..SensorCfg::default()
        })
        .build()
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<BuildError>(),
        Some(BuildError::InvalidConfig(_))
    ));
}

#[test]
fn step_before_begin_is_an_error() {
    let mut b = bench(20.0, 20.0);
    let err = b.chamber.step().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ChamberError>(),
        Some(ChamberError::State(_))
    ));
}

#[test]
fn begin_needs_both_probes() {
    let clock = ManualClock::new();
    let shared: Arc<dyn Clock + Send + Sync> = Arc::new(clock.clone());
    let mut sim = SimulatedBus::new(shared.clone());
    sim.attach_probe(1, 20.0);
    let mut chamber = build_chamber(
        sim,
        SimulatedRelay::new("cooler"),
        SimulatedRelay::new("heater"),
        Some(shared),
        SensorCfg::default(),
        ferm_core::PidCfg::main_default(),
        ferm_core::PidCfg::heat_default(),
        ferm_core::FridgeCfg::default(),
        program(),
    )
    .unwrap();
    let err = chamber.begin().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ChamberError>(),
        Some(ChamberError::HardwareFault(_))
    ));
}

#[test]
fn begin_seeds_probes_and_releases_relays() {
    let mut b = bench(20.0, 5.0);
    let roms = b.chamber.begin().unwrap();
    assert_eq!(roms.len(), 2);
    assert_eq!(b.chamber.beer_probe().unwrap().filtered(), 20.0);
    assert_eq!(b.chamber.fridge_probe().unwrap().filtered(), 5.0);
    assert!(!b.cooler.is_on());
    assert!(!b.heater.is_on());
    assert_eq!(b.chamber.main_pid().mode(), Mode::Automatic);
    assert_eq!(b.chamber.heat_pid().mode(), Mode::Manual);
}

#[test]
fn warm_beer_cools_then_idles_in_dead_band() {
    let mut b = started(20.0, 20.0);
    let seen = run_for(&mut b, 310);
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].to, FridgeState::Cool);
    assert_eq!(seen[0].reason, TransitionReason::DemandCool);
    assert!(seen[0].at_ms >= 300_000);
    assert!(b.cooler.is_on());
    assert!(!b.heater.is_on());

    b.beer.set_temperature(SP);
    b.air.set_temperature(SP);
    let seen = run_for(&mut b, 300);
    let exit = seen.first().expect("cool exit");
    assert_eq!(exit.to, FridgeState::Idle);
    assert_eq!(exit.reason, TransitionReason::DeadBand);
    assert!(exit.at_ms - 300_000 >= 120_000);
    assert!(!b.cooler.is_on());
    assert_eq!(b.cooler.switch_count(), 2);
    assert!(b.chamber.thermal().peak_estimate() > 0.0);
}

#[test]
fn cold_beer_heats_with_time_proportioned_output() {
    let mut b = started(16.0, 16.0);
    let seen = run_for(&mut b, 310);
    let t = seen.last().expect("heat entry");
    assert_eq!((t.to, t.reason), (FridgeState::Heat, TransitionReason::DemandHeat));
    assert_eq!(b.chamber.heat_pid().mode(), Mode::Automatic);
    assert!(b.chamber.heat_pid().output() > 0.0);
    assert!(b.heater.is_on());
    assert!(!b.cooler.is_on());

    b.beer.set_temperature(SP);
    let seen = run_for(&mut b, 200);
    let t = seen.first().expect("heat exit");
    assert_eq!((t.to, t.reason), (FridgeState::Idle, TransitionReason::DeadBand));
    assert_eq!(b.chamber.heat_pid().mode(), Mode::Manual);
    assert_eq!(b.chamber.heat_pid().output(), 0.0);
    assert!(!b.heater.is_on());
}

#[test]
fn lost_beer_probe_faults_the_compressor_off() {
    let mut b = started(20.0, 20.0);
    run_for(&mut b, 310);
    assert_eq!(b.chamber.thermal().state(), FridgeState::Cool);

    b.beer.set_present(false);
    let seen = run_for(&mut b, 40);
    let t = seen.first().expect("fault exit");
    assert_eq!(t.reason, TransitionReason::Fault);
    assert!(b.chamber.fault());
    assert!(!b.cooler.is_on());
    assert!(b.chamber.snapshot().fault);

    b.beer.set_present(true);
    run_for(&mut b, 5);
    assert!(!b.chamber.fault());
}

/// Step until the next sample tick and return its status.
fn next_sample(b: &mut Bench) -> CycleStatus {
    loop {
        b.clock.advance_ms(100);
        let status = b.chamber.step().unwrap();
        if status != CycleStatus::Waiting {
            return status;
        }
    }
}

#[test]
fn rejected_fridge_read_skips_the_heat_loop() {
    let mut b = started(16.0, 16.0);
    run_for(&mut b, 310);
    assert_eq!(b.chamber.thermal().state(), FridgeState::Heat);
    let output = b.chamber.heat_pid().output();
    let filtered = b.chamber.fridge_probe().unwrap().filtered();

    b.air.set_temperature(30.0);
    b.air.corrupt_next_reads(1);
    assert_eq!(next_sample(&mut b), CycleStatus::Held);
    assert_eq!(b.chamber.heat_pid().output(), output);
    assert_eq!(b.chamber.fridge_probe().unwrap().filtered(), filtered);
    assert_eq!(b.chamber.thermal().state(), FridgeState::Heat);
    assert!(!b.chamber.fault());

    assert_eq!(next_sample(&mut b), CycleStatus::Running);
}

#[test]
fn manual_main_mode_holds_after_min_on() {
    let mut b = started(22.0, 22.0);
    run_for(&mut b, 310);
    b.chamber.set_main_mode(Mode::Manual);
    let seen = run_for(&mut b, 150);
    let t = seen.first().expect("hold exit");
    assert_eq!(t.reason, TransitionReason::Hold);
    assert!(b.chamber.snapshot().hold);
    assert!(run_for(&mut b, 400).is_empty());
}

#[test]
fn snapshots_carry_the_newest_cycle() {
    let mut b = started(20.0, 20.0);
    let rx = b.chamber.subscribe();
    run_for(&mut b, 310);
    let snaps: Vec<_> = rx.try_iter().collect();
    assert_eq!(snaps.len(), 1);
    let s = &snaps[0];
    assert_eq!(s.state, FridgeState::Cool);
    assert!(s.compressor);
    assert_eq!(s.setpoint_c, SP);
    assert_eq!(s.last_reason, Some(TransitionReason::DemandCool));
    assert!((1..=1_000).contains(&s.conversion_offset_ms));
}

#[rstest]
#[case(10.0)]
#[case(21.5)]
fn setpoint_changes_are_applied(#[case] sp: f64) {
    let mut b = started(18.0, 18.0);
    assert!(b.chamber.set_setpoint(sp));
    assert!(!b.chamber.set_setpoint(f64::NAN));
    assert_eq!(b.chamber.setpoint(), sp);
    let seen = run_for(&mut b, 310);
    let expected = if sp < 18.0 {
        FridgeState::Cool
    } else {
        FridgeState::Heat
    };
    assert_eq!(seen.last().map(|t| t.to), Some(expected));
}

#[test]
fn controller_state_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("ferm.bin");

    let mut b = started(20.0, 20.0);
    b.chamber.set_setpoint(19.5);
    b.chamber.set_heat_auto(false);
    assert!(b.chamber.thermal_mut().set_peak_estimator(2.5));
    let state = b.chamber.controller_state();

    let mut store = StateStore::new(FileStore::open(&path, 64).unwrap());
    assert!(store.save(&state).unwrap());
    assert!(!store.save(&state).unwrap(), "unchanged record must not be rewritten");
    drop(store);

    let store = StateStore::new(FileStore::open(&path, 64).unwrap());
    let loaded = store.load().unwrap();
    assert_eq!(loaded.setpoint_c, 19.5);
    assert!(!loaded.heat_auto);
    assert!(loaded.main_auto);
    assert_eq!(loaded.peak_estimator, 2.5);
    assert!((loaded.main_tunings.ki - state.main_tunings.ki).abs() < 1e-6);

    let clock = ManualClock::new();
    let mut sim = SimulatedBus::new(Arc::new(clock.clone()));
    sim.attach_probe(1, 20.0);
    sim.attach_probe(2, 20.0);
    let restored = Chamber::builder()
        .with_bus(sim)
        .with_cooler(SimulatedRelay::new("cooler"))
        .with_heater(SimulatedRelay::new("heater"))
        .with_clock(Arc::new(clock))
        .with_restored_state(loaded)
        .build()
        .unwrap();
    assert_eq!(restored.setpoint(), 19.5);
    assert!(!restored.program().heat_auto);
    assert_eq!(restored.thermal().peak_estimator(), 2.5);
}

#[test]
fn erased_store_reports_version_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(FileStore::open(dir.path().join("none.bin"), 64).unwrap());
    let err = store.load().unwrap_err();
    assert!(matches!(err, ferm_core::StoreError::VersionMismatch { .. }));
}

#[test]
fn restored_heat_output_seeds_the_heat_loop() {
    let donor = bench(20.0, 20.0);
    let mut state = donor.chamber.controller_state();
    state.heat_output = 120_000.0;

    let clock = ManualClock::new();
    let mut sim = SimulatedBus::new(Arc::new(clock.clone()));
    sim.attach_probe(1, 20.0);
    sim.attach_probe(2, 20.0);
    let heater = SimulatedRelay::new("heater");
    let heater_h = heater.handle();
    let mut chamber = Chamber::builder()
        .with_bus(sim)
        .with_cooler(SimulatedRelay::new("cooler"))
        .with_heater(heater)
        .with_clock(Arc::new(clock))
        .with_restored_state(state)
        .build()
        .unwrap();
    chamber.begin().unwrap();
    assert_eq!(chamber.heat_pid().mode(), Mode::Manual);
    assert_eq!(chamber.heat_pid().output(), 120_000.0);
    assert_eq!(chamber.controller_state().heat_output, 120_000.0);
    // idle: a held duty never drives the heater
    assert!(!heater_h.is_on());
}
