#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema for the fermentation chamber controller.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - Every section is optional; missing keys fall back to the stock tuning
//!   of a chest-freezer chamber with a small heater.
//! - Temperatures are Celsius throughout; `program.unit` only selects the
//!   presentation unit.
use serde::Deserialize;
use serde::de::Deserializer;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Sensors {
    /// Probe sample rate (Hz)
    pub sample_hz: f64,
    /// Starting conversion lead time in milliseconds
    pub initial_offset_ms: u64,
    /// Upper bound on completion polls per sample
    pub max_polls: u32,
    /// Consecutive failed reads before a probe is declared faulty (0 disables)
    pub max_stale_cycles: u32,
    /// Discovery order of the beer probe
    pub beer_index: usize,
    /// Discovery order of the fridge air probe
    pub fridge_index: usize,
}

impl Default for Sensors {
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

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Direct,
    Reverse,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pid {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub sample_ms: u64,
    pub direction: Direction,
    /// Output range. Absent for the heat loop, whose range is the heat window.
    pub output_min: Option<f64>,
    pub output_max: Option<f64>,
    /// Apply the first-order output lag
    pub filtered: bool,
    pub filter_constant: f64,
}

impl Pid {
    pub fn main_default() -> Self {
        Self {
            kp: 10.0,
            ki: 0.005,
            kd: 50.0,
            sample_ms: 1000,
            direction: Direction::Direct,
            output_min: Some(0.0),
            output_max: Some(30.0),
            filtered: false,
            filter_constant: 10.0,
        }
    }

    pub fn heat_default() -> Self {
        Self {
            kp: 60_000.0,
            ki: 60.0,
            kd: 0.0,
            sample_ms: 1000,
            direction: Direction::Direct,
            output_min: None,
            output_max: None,
            filtered: false,
            filter_constant: 10.0,
        }
    }

    fn validate(&self, section: &str) -> eyre::Result<()> {
        for (name, v) in [("kp", self.kp), ("ki", self.ki), ("kd", self.kd)] {
            if !v.is_finite() || v < 0.0 {
                eyre::bail!("{section}.{name} must be a finite value >= 0");
            }
        }
        if self.sample_ms == 0 {
            eyre::bail!("{section}.sample_ms must be >= 1");
        }
        if let (Some(lo), Some(hi)) = (self.output_min, self.output_max)
            && (!lo.is_finite() || !hi.is_finite() || lo >= hi)
        {
            eyre::bail!("{section}.output_min must be < output_max");
        }
        if self.filter_constant.is_nan() || self.filter_constant <= 0.0 {
            eyre::bail!("{section}.filter_constant must be > 0");
        }
        Ok(())
    }
}

/// A `[*_pid]` table as written; absent keys keep the loop's own defaults.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PidToml {
    kp: Option<f64>,
    ki: Option<f64>,
    kd: Option<f64>,
    sample_ms: Option<u64>,
    direction: Option<Direction>,
    output_min: Option<f64>,
    output_max: Option<f64>,
    filtered: Option<bool>,
    filter_constant: Option<f64>,
}

impl PidToml {
    fn over(self, base: Pid) -> Pid {
        Pid {
            kp: self.kp.unwrap_or(base.kp),
            ki: self.ki.unwrap_or(base.ki),
            kd: self.kd.unwrap_or(base.kd),
            sample_ms: self.sample_ms.unwrap_or(base.sample_ms),
            direction: self.direction.unwrap_or(base.direction),
            output_min: self.output_min.or(base.output_min),
            output_max: self.output_max.or(base.output_max),
            filtered: self.filtered.unwrap_or(base.filtered),
            filter_constant: self.filter_constant.unwrap_or(base.filter_constant),
        }
    }
}

fn de_main_pid<'de, D>(deserializer: D) -> Result<Pid, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(PidToml::deserialize(deserializer)?.over(Pid::main_default()))
}

fn de_heat_pid<'de, D>(deserializer: D) -> Result<Pid, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(PidToml::deserialize(deserializer)?.over(Pid::heat_default()))
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Fridge {
    /// Dead-band around the setpoint (degC)
    pub idle_diff_c: f64,
    /// Peak prediction errors below this do not retune the estimator (degC)
    pub peak_diff_c: f64,
    pub cool_min_off_s: u64,
    pub cool_min_on_s: u64,
    pub cool_max_on_s: u64,
    /// Run time beyond which overshoot stops growing
    pub peak_max_time_s: u64,
    /// How long to watch for the post-cooling peak
    pub peak_max_wait_s: u64,
    pub heat_min_off_s: u64,
    pub heat_window_ms: u64,
    /// Initial overshoot gain (degC per hour of compressor run)
    pub peak_estimator: f64,
    /// Fraction of the per-hour prediction error applied per correction
    pub estimator_gain: f64,
}

impl Default for Fridge {
    fn default() -> Self {
        Self {
            idle_diff_c: 0.2778,
            peak_diff_c: 0.5556,
            cool_min_off_s: 300,
            cool_min_on_s: 120,
            cool_max_on_s: 2700,
            peak_max_time_s: 1200,
            peak_max_wait_s: 1800,
            heat_min_off_s: 300,
            heat_window_ms: 300_000,
            peak_estimator: 1.0,
            estimator_gain: 0.5,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    Celsius,
    #[default]
    Fahrenheit,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Program {
    pub main_auto: bool,
    pub heat_auto: bool,
    pub unit: Unit,
    pub setpoint_c: f64,
    pub profile_enabled: bool,
    pub logging_enabled: bool,
}

impl Default for Program {
    fn default() -> Self {
        Self {
            main_auto: true,
            heat_auto: true,
            unit: Unit::Fahrenheit,
            setpoint_c: 18.0,
            profile_enabled: false,
            logging_enabled: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Persistence {
    pub path: String,
}

impl Default for Persistence {
    fn default() -> Self {
        Self {
            path: "var/ferm_state.bin".into(),
        }
    }
}

/// Relay outputs (BCM numbering), used with the `hardware` feature.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Relays {
    pub cooler_pin: u8,
    pub heater_pin: u8,
    /// Relay boards that energize on a low output.
    pub active_low: bool,
}

impl Default for Relays {
    fn default() -> Self {
        Self {
            cooler_pin: 17,
            heater_pin: 27,
            active_low: true,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub sensors: Sensors,
    #[serde(default = "Pid::main_default", deserialize_with = "de_main_pid")]
    pub main_pid: Pid,
    #[serde(default = "Pid::heat_default", deserialize_with = "de_heat_pid")]
    pub heat_pid: Pid,
    pub fridge: Fridge,
    pub program: Program,
    pub relays: Relays,
    pub persistence: Persistence,
    pub logging: Logging,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sensors: Sensors::default(),
            main_pid: Pid::main_default(),
            heat_pid: Pid::heat_default(),
            fridge: Fridge::default(),
            program: Program::default(),
            relays: Relays::default(),
            persistence: Persistence::default(),
            logging: Logging::default(),
        }
    }
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// Read and parse a config file, then validate it.
pub fn load_file(path: &std::path::Path) -> eyre::Result<Config> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| eyre::eyre!("read config {}: {}", path.display(), e))?;
    let cfg = load_toml(&text).map_err(|e| eyre::eyre!("parse config {}: {}", path.display(), e))?;
    cfg.validate()?;
    Ok(cfg)
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Sensors
        let s = &self.sensors;
        if !(s.sample_hz > 0.0 && s.sample_hz <= 10.0) {
            eyre::bail!("sensors.sample_hz must be in (0.0, 10.0]");
        }
        let period_ms = 1000.0 / s.sample_hz;
        if s.initial_offset_ms == 0 || s.initial_offset_ms as f64 > period_ms {
            eyre::bail!("sensors.initial_offset_ms must be in [1, sample period]");
        }
        if s.max_polls == 0 {
            eyre::bail!("sensors.max_polls must be >= 1");
        }
        if s.beer_index == s.fridge_index {
            eyre::bail!("sensors.beer_index and sensors.fridge_index must differ");
        }

        // Controllers
        self.main_pid.validate("main_pid")?;
        self.heat_pid.validate("heat_pid")?;
        if self.main_pid.output_min.is_none() || self.main_pid.output_max.is_none() {
            eyre::bail!("main_pid.output_min and main_pid.output_max are required");
        }

        // Fridge
        let f = &self.fridge;
        if f.idle_diff_c.is_nan() || f.idle_diff_c <= 0.0 {
            eyre::bail!("fridge.idle_diff_c must be > 0");
        }
        if f.peak_diff_c < 0.0 {
            eyre::bail!("fridge.peak_diff_c must be >= 0");
        }
        if f.cool_min_on_s > f.cool_max_on_s {
            eyre::bail!("fridge.cool_min_on_s must be <= fridge.cool_max_on_s");
        }
        if f.cool_max_on_s == 0 {
            eyre::bail!("fridge.cool_max_on_s must be >= 1");
        }
        if f.heat_window_ms == 0 {
            eyre::bail!("fridge.heat_window_ms must be >= 1");
        }
        if f.peak_max_wait_s == 0 {
            eyre::bail!("fridge.peak_max_wait_s must be >= 1");
        }
        if !(f.peak_estimator.is_finite() && f.peak_estimator >= 0.0) {
            eyre::bail!("fridge.peak_estimator must be >= 0");
        }
        if !(f.estimator_gain > 0.0 && f.estimator_gain <= 1.0) {
            eyre::bail!("fridge.estimator_gain must be in (0.0, 1.0]");
        }

        // Program
        if !(-10.0..=50.0).contains(&self.program.setpoint_c) {
            eyre::bail!("program.setpoint_c must be in [-10, 50] degC");
        }
        if let (Some(lo), Some(hi)) = (self.main_pid.output_min, self.main_pid.output_max)
            && !(lo..=hi).contains(&self.program.setpoint_c)
        {
            eyre::bail!("program.setpoint_c must lie within main_pid output limits");
        }

        // Relays
        let r = &self.relays;
        if r.cooler_pin == r.heater_pin {
            eyre::bail!("relays.cooler_pin and relays.heater_pin must differ");
        }
        if r.cooler_pin > 27 || r.heater_pin > 27 {
            eyre::bail!("relays pins must be BCM GPIO numbers in [0, 27]");
        }

        // Persistence
        if self.persistence.path.trim().is_empty() {
            eyre::bail!("persistence.path must not be empty");
        }

        // Logging
        if let Some(r) = self.logging.rotation.as_deref()
            && !matches!(r, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never|daily|hourly");
        }

        Ok(())
    }
}
