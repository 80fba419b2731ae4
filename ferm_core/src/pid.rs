//! Discrete PID controller with anti-windup, bumpless transfer and a
//! long-horizon derivative.
//!
//! The controller owns its output. Process variable and setpoint are passed
//! to every `compute()` call; nothing is linked by reference.
//!
//! Gains are held in two forms: the display form set by the user and the
//! internal form scaled by the sample period and signed by the direction.
//! `internal = f(display, sample period, direction)` holds after every setter.

use crate::config::PidCfg;

/// Slots in the downsampled process-variable trace.
pub const HISTORY_LEN: usize = 30;
/// Computes per history push.
pub const HISTORY_DECIMATION: u32 = 10;
/// Time base (seconds) the derivative slope is expressed over.
pub const DERIVATIVE_BASE_S: f64 = 300.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Manual,
    Automatic,
}

/// Action direction. Direct: more output raises the process variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Direct,
    Reverse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputType {
    #[default]
    Raw,
    /// First-order lag on the clamped output.
    Filtered,
}

#[derive(Debug, Clone)]
pub struct Pid {
    kp: f64,
    ki: f64,
    kd: f64,
    disp_kp: f64,
    disp_ki: f64,
    disp_kd: f64,

    p_term: f64,
    i_term: f64,
    d_term: f64,
    history: [f64; HISTORY_LEN],
    decimation: u32,

    output: f64,
    last_output: f64,
    out_min: f64,
    out_max: f64,
    filter_constant: f64,
    sample_ms: u64,
    last_compute_ms: Option<u64>,

    mode: Mode,
    direction: Direction,
    output_type: OutputType,
}

impl Pid {
    /// New controller in manual mode with output limits `[0, 255]` and a 100 ms period.
    /// Negative gains are rejected and leave all gains at zero.
    pub fn new(kp: f64, ki: f64, kd: f64, direction: Direction) -> Self {
        let mut pid = Self {
            kp: 0.0,
            ki: 0.0,
            kd: 0.0,
            disp_kp: 0.0,
            disp_ki: 0.0,
            disp_kd: 0.0,
            p_term: 0.0,
            i_term: 0.0,
            d_term: 0.0,
            history: [0.0; HISTORY_LEN],
            decimation: 0,
            output: 0.0,
            last_output: 0.0,
            out_min: 0.0,
            out_max: 255.0,
            filter_constant: 10.0,
            sample_ms: 100,
            last_compute_ms: None,
            mode: Mode::Manual,
            direction,
            output_type: OutputType::Raw,
        };
        pid.set_tunings(kp, ki, kd);
        pid
    }

    /// Controller configured from `cfg`; `default_limits` applies when the config carries none.
    pub fn from_cfg(cfg: &PidCfg, default_limits: (f64, f64)) -> Self {
        let mut pid = Self::new(0.0, 0.0, 0.0, cfg.direction);
        let (lo, hi) = cfg.limits.unwrap_or(default_limits);
        if !pid.set_output_limits(lo, hi) {
            tracing::warn!(lo, hi, "invalid pid output limits ignored");
        }
        if !pid.set_sample_time(cfg.sample_ms) {
            tracing::warn!(sample_ms = cfg.sample_ms, "invalid pid sample time ignored");
        }
        if !pid.set_tunings(cfg.kp, cfg.ki, cfg.kd) {
            tracing::warn!(kp = cfg.kp, ki = cfg.ki, kd = cfg.kd, "invalid pid tunings ignored");
        }
        pid.set_output_type(cfg.output_type);
        if !pid.set_filter_constant(cfg.filter_constant) {
            tracing::warn!(constant = cfg.filter_constant, "invalid pid filter constant ignored");
        }
        pid
    }

    /// Run one control step if in automatic mode and a full sample period has
    /// elapsed since the last one (the first call always runs).
    /// Returns true when a new output was computed.
    pub fn compute(&mut self, input: f64, setpoint: f64, now_ms: u64) -> bool {
        if self.mode == Mode::Manual {
            return false;
        }
        if let Some(last) = self.last_compute_ms
            && now_ms.saturating_sub(last) < self.sample_ms
        {
            return false;
        }

        self.decimation += 1;
        if self.decimation >= HISTORY_DECIMATION {
            self.history.rotate_right(1);
            self.history[0] = input;
            self.decimation = 0;
        }

        let error = setpoint - input;
        self.i_term = (self.i_term + self.ki * error).clamp(self.out_min, self.out_max);
        let d_input = (self.history[0] - self.history[HISTORY_LEN - 1]) / DERIVATIVE_BASE_S;
        self.p_term = self.kp * error;
        self.d_term = -self.kd * d_input;

        let mut output = (self.p_term + self.i_term + self.d_term).clamp(self.out_min, self.out_max);
        if self.output_type == OutputType::Filtered {
            let alpha = (self.sample_ms as f64 / 1000.0 / self.filter_constant).min(1.0);
            output = self.last_output + alpha * (output - self.last_output);
        }

        self.output = output;
        self.last_output = output;
        self.last_compute_ms = Some(now_ms);
        true
    }

    /// Set display gains. Negative or non-finite values are rejected and the
    /// previous tunings stay in effect.
    pub fn set_tunings(&mut self, kp: f64, ki: f64, kd: f64) -> bool {
        let valid = |g: f64| g.is_finite() && g >= 0.0;
        if !(valid(kp) && valid(ki) && valid(kd)) {
            return false;
        }
        self.disp_kp = kp;
        self.disp_ki = ki;
        self.disp_kd = kd;
        self.rescale_gains();
        true
    }

    /// Change the compute period. Zero is rejected. Internal `ki`/`kd` are
    /// rescaled so the continuous-time behaviour is preserved.
    pub fn set_sample_time(&mut self, ms: u64) -> bool {
        if ms == 0 {
            return false;
        }
        let ratio = ms as f64 / self.sample_ms as f64;
        self.ki *= ratio;
        self.kd /= ratio;
        self.sample_ms = ms;
        true
    }

    /// Rejects `min >= max`. In automatic mode the output and integral are
    /// re-clamped into the new range immediately.
    pub fn set_output_limits(&mut self, min: f64, max: f64) -> bool {
        if !(min.is_finite() && max.is_finite()) || min >= max {
            return false;
        }
        self.out_min = min;
        self.out_max = max;
        if self.mode == Mode::Automatic {
            self.output = self.output.clamp(min, max);
            self.last_output = self.last_output.clamp(min, max);
            self.i_term = self.i_term.clamp(min, max);
        }
        true
    }

    /// Switch mode. Manual to automatic seeds the integral from the current
    /// output and the history from `input`.
    pub fn set_mode(&mut self, mode: Mode, input: f64) {
        if mode == Mode::Automatic && self.mode == Mode::Manual {
            self.initialize(input);
        }
        self.mode = mode;
    }

    /// Write the output while in manual mode. Ignored in automatic mode.
    pub fn set_manual_output(&mut self, value: f64) -> bool {
        if self.mode == Mode::Automatic || !value.is_finite() {
            return false;
        }
        self.output = value.clamp(self.out_min, self.out_max);
        true
    }

    pub fn set_direction(&mut self, direction: Direction) {
        if direction != self.direction {
            self.direction = direction;
            self.rescale_gains();
        }
    }

    pub fn set_output_type(&mut self, output_type: OutputType) {
        self.output_type = output_type;
    }

    /// Lag constant of the filtered output, in seconds. Non-positive values are rejected.
    pub fn set_filter_constant(&mut self, constant: f64) -> bool {
        if !(constant.is_finite() && constant > 0.0) {
            return false;
        }
        self.filter_constant = constant;
        true
    }

    /// Flatten the derivative trace at `input`.
    pub fn init_history(&mut self, input: f64) {
        self.history = [input; HISTORY_LEN];
        self.decimation = 0;
    }

    fn initialize(&mut self, input: f64) {
        self.init_history(input);
        self.output = self.output.clamp(self.out_min, self.out_max);
        self.i_term = self.output;
        self.last_output = self.output;
        self.last_compute_ms = None;
    }

    fn rescale_gains(&mut self) {
        let secs = self.sample_ms as f64 / 1000.0;
        let sign = match self.direction {
            Direction::Direct => 1.0,
            Direction::Reverse => -1.0,
        };
        self.kp = sign * self.disp_kp;
        self.ki = sign * self.disp_ki * secs;
        self.kd = sign * self.disp_kd / secs;
    }

    pub fn output(&self) -> f64 {
        self.output
    }
    pub fn kp(&self) -> f64 {
        self.disp_kp
    }
    pub fn ki(&self) -> f64 {
        self.disp_ki
    }
    pub fn kd(&self) -> f64 {
        self.disp_kd
    }
    /// Internal gains `(kp, ki, kd)` after period scaling and direction.
    pub fn internal_gains(&self) -> (f64, f64, f64) {
        (self.kp, self.ki, self.kd)
    }
    pub fn p_term(&self) -> f64 {
        self.p_term
    }
    pub fn i_term(&self) -> f64 {
        self.i_term
    }
    pub fn d_term(&self) -> f64 {
        self.d_term
    }
    pub fn mode(&self) -> Mode {
        self.mode
    }
    pub fn direction(&self) -> Direction {
        self.direction
    }
    pub fn output_type(&self) -> OutputType {
        self.output_type
    }
    pub fn filter_constant(&self) -> f64 {
        self.filter_constant
    }
    pub fn sample_ms(&self) -> u64 {
        self.sample_ms
    }
    pub fn output_limits(&self) -> (f64, f64) {
        (self.out_min, self.out_max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auto_pid(kp: f64, ki: f64, kd: f64) -> Pid {
        let mut pid = Pid::new(kp, ki, kd, Direction::Direct);
        assert!(pid.set_sample_time(1000));
        assert!(pid.set_output_limits(0.0, 30.0));
        pid.set_mode(Mode::Automatic, 20.0);
        pid
    }

    #[test]
    fn manual_mode_never_computes() {
        let mut pid = Pid::new(1.0, 0.0, 0.0, Direction::Direct);
        assert!(!pid.compute(10.0, 20.0, 0));
        assert_eq!(pid.output(), 0.0);
    }

    #[test]
    fn compute_waits_a_full_sample_period() {
        let mut pid = auto_pid(1.0, 0.0, 0.0);
        assert!(pid.compute(18.0, 20.0, 0));
        assert!(!pid.compute(18.0, 20.0, 999));
        assert!(pid.compute(18.0, 20.0, 1000));
        assert_eq!(pid.output(), 2.0);
    }

    #[test]
    fn negative_tunings_are_no_ops() {
        let mut pid = Pid::new(2.0, 1.0, 0.5, Direction::Direct);
        assert!(!pid.set_tunings(-1.0, 1.0, 1.0));
        assert!(!pid.set_tunings(1.0, f64::NAN, 1.0));
        assert_eq!((pid.kp(), pid.ki(), pid.kd()), (2.0, 1.0, 0.5));
    }

    #[test]
    fn sample_time_rescales_internal_gains() {
        let mut pid = Pid::new(1.0, 2.0, 3.0, Direction::Direct);
        // default period 100 ms
        let (_, ki, kd) = pid.internal_gains();
        assert!((ki - 0.2).abs() < 1e-12);
        assert!((kd - 30.0).abs() < 1e-12);
        assert!(pid.set_sample_time(1000));
        let (_, ki, kd) = pid.internal_gains();
        assert!((ki - 2.0).abs() < 1e-12);
        assert!((kd - 3.0).abs() < 1e-12);
        assert!(!pid.set_sample_time(0));
        assert_eq!(pid.sample_ms(), 1000);
    }

    #[test]
    fn reverse_direction_negates_internal_gains_only() {
        let mut pid = Pid::new(1.0, 2.0, 3.0, Direction::Reverse);
        let (kp, ki, kd) = pid.internal_gains();
        assert!(kp < 0.0 && ki < 0.0 && kd < 0.0);
        assert_eq!(pid.kp(), 1.0);
        pid.set_direction(Direction::Direct);
        let (kp, _, _) = pid.internal_gains();
        assert!(kp > 0.0);
    }

    #[test]
    fn direction_flip_in_auto_is_immediate() {
        let mut pid = auto_pid(1.0, 0.0, 0.0);
        pid.set_direction(Direction::Reverse);
        // error = -2 with reverse action -> positive output
        assert!(pid.compute(22.0, 20.0, 0));
        assert_eq!(pid.output(), 2.0);
    }

    #[test]
    fn invalid_limits_are_rejected() {
        let mut pid = auto_pid(1.0, 0.0, 0.0);
        assert!(!pid.set_output_limits(5.0, 5.0));
        assert!(!pid.set_output_limits(6.0, 5.0));
        assert_eq!(pid.output_limits(), (0.0, 30.0));
    }

    #[test]
    fn tightening_limits_in_auto_reclamps_output_and_integral() {
        let mut pid = auto_pid(0.0, 10.0, 0.0);
        for t in 0..5 {
            pid.compute(10.0, 20.0, t * 1000);
        }
        assert_eq!(pid.i_term(), 30.0);
        assert!(pid.set_output_limits(0.0, 12.0));
        assert_eq!(pid.output(), 12.0);
        assert_eq!(pid.i_term(), 12.0);
    }

    #[test]
    fn integral_saturates_at_output_limits() {
        let mut pid = auto_pid(0.0, 1.0, 0.0);
        for t in 0..100 {
            pid.compute(0.0, 25.0, t * 1000);
            assert!(pid.i_term() <= 30.0);
        }
        assert_eq!(pid.output(), 30.0);
        // recovers as soon as the error changes sign
        pid.compute(30.0, 25.0, 100_000);
        assert!(pid.output() < 30.0);
    }

    #[test]
    fn manual_to_auto_is_bumpless() {
        let mut pid = Pid::new(0.0, 0.01, 0.0, Direction::Direct);
        pid.set_sample_time(1000);
        pid.set_output_limits(0.0, 30.0);
        assert!(pid.set_manual_output(12.5));
        pid.set_mode(Mode::Automatic, 18.0);
        assert_eq!(pid.i_term(), 12.5);
        pid.compute(18.0, 18.0, 5_000);
        assert_eq!(pid.output(), 12.5);
    }

    #[test]
    fn manual_output_is_ignored_in_auto() {
        let mut pid = auto_pid(1.0, 0.0, 0.0);
        assert!(!pid.set_manual_output(3.0));
    }

    #[test]
    fn derivative_uses_the_decimated_trace() {
        let mut pid = auto_pid(0.0, 0.0, 300.0);
        // nine computes: no history push yet, so no derivative
        for t in 0..9 {
            pid.compute(21.0, 20.0, t * 1000);
        }
        assert_eq!(pid.d_term(), 0.0);
        // tenth push: history[0] = 21, history[29] = 20 -> slope 1/300 per s
        pid.compute(21.0, 20.0, 9_000);
        assert!((pid.d_term() - -1.0).abs() < 1e-12);
    }

    #[test]
    fn filtered_output_lags_the_raw_output() {
        let mut pid = auto_pid(10.0, 0.0, 0.0);
        pid.set_output_type(OutputType::Filtered);
        assert!(pid.set_filter_constant(10.0));
        pid.compute(18.0, 20.0, 0);
        // raw 20, alpha = 1/10
        assert!((pid.output() - 2.0).abs() < 1e-12);
        pid.compute(18.0, 20.0, 1000);
        assert!((pid.output() - 3.8).abs() < 1e-12);
        assert!(!pid.set_filter_constant(0.0));
    }
}
