//! `ferm state`: show the persisted controller record.

use eyre::WrapErr;
use ferm_core::{ControllerState, FileStore, StateStore};
use serde_json::json;

use crate::run::STORE_CAPACITY;

pub fn show_state(cfg: &ferm_config::Config, json: bool) -> eyre::Result<()> {
    let path = &cfg.persistence.path;
    let store = StateStore::new(
        FileStore::open(path, STORE_CAPACITY)
            .wrap_err_with(|| format!("opening state store {path}"))?,
    );
    let s = store
        .load()
        .wrap_err_with(|| format!("loading controller state from {path}"))?;
    if json {
        println!("{}", state_json(&s));
    } else {
        print_state(&s);
    }
    Ok(())
}

fn state_json(s: &ControllerState) -> serde_json::Value {
    let u = s.unit;
    json!({
        "main_auto": s.main_auto,
        "heat_auto": s.heat_auto,
        "unit": u.symbol(),
        "profile_enabled": s.profile_enabled,
        "logging_enabled": s.logging_enabled,
        "setpoint_c": s.setpoint_c,
        "setpoint": u.from_celsius(s.setpoint_c),
        "main_pid": { "kp": s.main_tunings.kp, "ki": s.main_tunings.ki, "kd": s.main_tunings.kd, "output": s.main_output },
        "heat_pid": { "kp": s.heat_tunings.kp, "ki": s.heat_tunings.ki, "kd": s.heat_tunings.kd, "output": s.heat_output },
        "peak_estimator": s.peak_estimator,
    })
}

fn print_state(s: &ControllerState) {
    let on = |b: bool| if b { "auto" } else { "manual" };
    let u = s.unit;
    println!(
        "setpoint        {:.2} {}",
        u.from_celsius(s.setpoint_c),
        u.symbol()
    );
    println!(
        "main loop       {} kp={} ki={} kd={} output={:.2}",
        on(s.main_auto),
        s.main_tunings.kp,
        s.main_tunings.ki,
        s.main_tunings.kd,
        s.main_output
    );
    println!(
        "heat loop       {} kp={} ki={} kd={} output={:.0}",
        on(s.heat_auto),
        s.heat_tunings.kp,
        s.heat_tunings.ki,
        s.heat_tunings.kd,
        s.heat_output
    );
    println!("peak estimator  {:.3} degC/h", s.peak_estimator);
    println!(
        "profile={} logging={}",
        s.profile_enabled, s.logging_enabled
    );
}
