//! Runtime configuration for the chamber.
//!
//! These are separate from the TOML-deserialized config in `ferm_config`;
//! see `conversions` for the bridge. Durations are milliseconds, temperatures Celsius.

use crate::pid::{Direction, OutputType};
use crate::units::TempUnit;

/// Probe bus timing and probe assignment.
#[derive(Debug, Clone)]
pub struct SensorCfg {
    /// Sample rate shared by every probe on the bus.
    pub sample_hz: f64,
    /// Starting conversion lead time.
    pub initial_offset_ms: u64,
    /// Bound on the post-conversion completion poll.
    pub max_polls: u32,
    /// Consecutive failed reads that raise a sensor fault (0 disables).
    pub max_stale_cycles: u32,
    pub beer_index: usize,
    pub fridge_index: usize,
}

impl Default for SensorCfg {
    fn default() -> Self {
        Self {
            sample_hz: 1.0,
            initial_offset_ms: 350,
            max_polls: 2000,
            max_stale_cycles: 30,
            beer_index: 0,
            fridge_index: 1,
        }
    }
}

/// One PID loop.
#[derive(Debug, Clone)]
pub struct PidCfg {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub sample_ms: u64,
    pub direction: Direction,
    /// `None` lets the owner pick the range (the heat loop uses the heat window).
    pub limits: Option<(f64, f64)>,
    pub output_type: OutputType,
    pub filter_constant: f64,
}

impl PidCfg {
    /// Primary loop: beer temperature to fridge air target.
    pub fn main_default() -> Self {
        Self {
            kp: 10.0,
            ki: 0.005,
            kd: 50.0,
            sample_ms: 1000,
            direction: Direction::Direct,
            limits: Some((0.0, 30.0)),
            output_type: OutputType::Raw,
            filter_constant: 10.0,
        }
    }

    /// Secondary loop: fridge air to heater on-time within the heat window.
    pub fn heat_default() -> Self {
        Self {
            kp: 60_000.0,
            ki: 60.0,
            kd: 0.0,
            sample_ms: 1000,
            direction: Direction::Direct,
            limits: None,
            output_type: OutputType::Raw,
            filter_constant: 10.0,
        }
    }
}

/// Thermal state machine limits.
#[derive(Debug, Clone)]
pub struct FridgeCfg {
    /// Dead-band around the setpoint.
    pub idle_diff_c: f64,
    /// Peak prediction errors at or below this leave the estimator alone.
    pub peak_diff_c: f64,
    pub cool_min_off_ms: u64,
    pub cool_min_on_ms: u64,
    pub cool_max_on_ms: u64,
    /// Compressor run time beyond which overshoot is assumed not to grow.
    pub peak_max_time_ms: u64,
    /// Longest wait for the post-cooling peak.
    pub peak_max_wait_ms: u64,
    pub heat_min_off_ms: u64,
    pub heat_window_ms: u64,
    /// Initial overshoot gain, degC per hour of compressor run.
    pub peak_estimator: f64,
    /// Fraction of the prediction error corrected per cycle.
    pub estimator_gain: f64,
}

impl Default for FridgeCfg {
    fn default() -> Self {
        Self {
            idle_diff_c: 0.2778,
            peak_diff_c: 0.5556,
            cool_min_off_ms: 300_000,
            cool_min_on_ms: 120_000,
            cool_max_on_ms: 2_700_000,
            peak_max_time_ms: 1_200_000,
            peak_max_wait_ms: 1_800_000,
            heat_min_off_ms: 300_000,
            heat_window_ms: 300_000,
            peak_estimator: 1.0,
            estimator_gain: 0.5,
        }
    }
}

/// Operating flags and setpoint, constructed once and handed to the chamber.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgramState {
    pub main_auto: bool,
    pub heat_auto: bool,
    pub unit: TempUnit,
    pub setpoint_c: f64,
    pub profile_enabled: bool,
    pub logging_enabled: bool,
}

impl Default for ProgramState {
    fn default() -> Self {
        Self {
            main_auto: true,
            heat_auto: true,
            unit: TempUnit::Fahrenheit,
            setpoint_c: 18.0,
            profile_enabled: false,
            logging_enabled: false,
        }
    }
}
