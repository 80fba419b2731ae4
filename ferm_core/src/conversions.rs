//! `From` implementations bridging `ferm_config` types to `ferm_core` types.

use crate::config::{FridgeCfg, PidCfg, ProgramState, SensorCfg};
use crate::pid::{Direction, OutputType};
use crate::units::TempUnit;
use crate::util::secs_to_ms;

// ── SensorCfg ────────────────────────────────────────────────────────────────

impl From<&ferm_config::Sensors> for SensorCfg {
    fn from(c: &ferm_config::Sensors) -> Self {
        Self {
            sample_hz: c.sample_hz,
            initial_offset_ms: c.initial_offset_ms,
            max_polls: c.max_polls,
            max_stale_cycles: c.max_stale_cycles,
            beer_index: c.beer_index,
            fridge_index: c.fridge_index,
        }
    }
}

// ── PidCfg ───────────────────────────────────────────────────────────────────

impl From<ferm_config::Direction> for Direction {
    fn from(d: ferm_config::Direction) -> Self {
        match d {
            ferm_config::Direction::Direct => Direction::Direct,
            ferm_config::Direction::Reverse => Direction::Reverse,
        }
    }
}

impl From<&ferm_config::Pid> for PidCfg {
    fn from(c: &ferm_config::Pid) -> Self {
        Self {
            kp: c.kp,
            ki: c.ki,
            kd: c.kd,
            sample_ms: c.sample_ms,
            direction: c.direction.into(),
            limits: c.output_min.zip(c.output_max),
            output_type: if c.filtered {
                OutputType::Filtered
            } else {
                OutputType::Raw
            },
            filter_constant: c.filter_constant,
        }
    }
}

// ── FridgeCfg ────────────────────────────────────────────────────────────────

impl From<&ferm_config::Fridge> for FridgeCfg {
    fn from(c: &ferm_config::Fridge) -> Self {
        Self {
            idle_diff_c: c.idle_diff_c,
            peak_diff_c: c.peak_diff_c,
            cool_min_off_ms: secs_to_ms(c.cool_min_off_s),
            cool_min_on_ms: secs_to_ms(c.cool_min_on_s),
            cool_max_on_ms: secs_to_ms(c.cool_max_on_s),
            peak_max_time_ms: secs_to_ms(c.peak_max_time_s),
            peak_max_wait_ms: secs_to_ms(c.peak_max_wait_s),
            heat_min_off_ms: secs_to_ms(c.heat_min_off_s),
            heat_window_ms: c.heat_window_ms,
            peak_estimator: c.peak_estimator,
            estimator_gain: c.estimator_gain,
        }
    }
}

// ── ProgramState ─────────────────────────────────────────────────────────────

impl From<ferm_config::Unit> for TempUnit {
    fn from(u: ferm_config::Unit) -> Self {
        match u {
            ferm_config::Unit::Celsius => TempUnit::Celsius,
            ferm_config::Unit::Fahrenheit => TempUnit::Fahrenheit,
        }
    }
}

impl From<&ferm_config::Program> for ProgramState {
    fn from(c: &ferm_config::Program) -> Self {
        Self {
            main_auto: c.main_auto,
            heat_auto: c.heat_auto,
            unit: c.unit.into(),
            setpoint_c: c.setpoint_c,
            profile_enabled: c.profile_enabled,
            logging_enabled: c.logging_enabled,
        }
    }
}
