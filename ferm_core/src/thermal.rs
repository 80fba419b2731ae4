//! IDLE / COOL / HEAT state machine with compressor protection and an
//! online overshoot estimator.
//!
//! Error convention: `error = setpoint - beer`. Cooling demand is
//! `error < -idle_diff`, heating demand is `error > idle_diff`.
//!
//! Dwell rules:
//! - COOL lasts at least `cool_min_on` and at most `cool_max_on`; only a
//!   sensor fault ends it early.
//! - COOL cannot restart until `cool_min_off` after the last COOL ended,
//!   HEAT until `heat_min_off` after the last HEAT ended.
//! - A rejected beer reading holds the current state; the `cool_max_on`
//!   limit and faults are still enforced.
//!
//! Overshoot: while cooling, the beer keeps falling after the compressor
//! stops. The expected overshoot is `peak_estimator * run_hours`, with the
//! run time capped at `peak_max_time`. COOL exits that much early. After the
//! exit the lowest beer temperature is tracked until the filter reports a
//! negative peak (or `peak_max_wait` passes); the estimator is then moved
//! by `estimator_gain * (actual - estimate) / run_hours` if the miss
//! exceeds `peak_diff`.

use crate::config::FridgeCfg;

/// Upper bound on the overshoot gain (degC per hour).
pub const MAX_PEAK_ESTIMATOR: f64 = 50.0;
const MS_PER_HOUR: f64 = 3_600_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FridgeState {
    #[default]
    Idle,
    Cool,
    Heat,
}

impl FridgeState {
    pub fn as_str(self) -> &'static str {
        match self {
            FridgeState::Idle => "idle",
            FridgeState::Cool => "cool",
            FridgeState::Heat => "heat",
        }
    }
}

impl core::fmt::Display for FridgeState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a transition happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionReason {
    /// Beer above the dead-band.
    DemandCool,
    /// Beer below the dead-band.
    DemandHeat,
    /// Error closed to within the dead-band.
    DeadBand,
    /// Forced exit after `cool_max_on`.
    MaxOnTime,
    /// Sensor fault aborted the cycle.
    Fault,
    /// A latched hold request was applied.
    Hold,
}

impl TransitionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            TransitionReason::DemandCool => "demand_cool",
            TransitionReason::DemandHeat => "demand_heat",
            TransitionReason::DeadBand => "dead_band",
            TransitionReason::MaxOnTime => "max_on_time",
            TransitionReason::Fault => "fault",
            TransitionReason::Hold => "hold",
        }
    }
}

impl core::fmt::Display for TransitionReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition {
    pub from: FridgeState,
    pub to: FridgeState,
    pub reason: TransitionReason,
    pub at_ms: u64,
}

/// Per-cycle inputs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThermalInputs {
    pub now_ms: u64,
    pub setpoint_c: f64,
    /// Filtered beer temperature; `None` when this cycle's read was rejected.
    pub beer_c: Option<f64>,
    /// Negative peak reported by the beer filter.
    pub peak: bool,
    /// A probe has been stale long enough to be treated as failed.
    pub fault: bool,
}

/// Overshoot observation after a COOL period.
#[derive(Debug, Clone, Copy, PartialEq)]
struct PeakWatch {
    stop_ms: u64,
    stop_c: f64,
    min_c: f64,
    run_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ThermalStateMachine {
    cfg: FridgeCfg,
    state: FridgeState,
    previous: FridgeState,
    start_ms: u64,
    stop_ms: u64,
    heat_start_ms: u64,
    heat_stop_ms: u64,
    window_start_ms: u64,
    peak_estimator: f64,
    peak_estimate: f64,
    watch: Option<PeakWatch>,
    hold: bool,
    last_beer_c: Option<f64>,
    last_transition: Option<Transition>,
}

impl ThermalStateMachine {
    /// Start in IDLE. Both off-timers begin at `boot_ms`, so the compressor is
    /// protected across restarts.
    pub fn new(cfg: FridgeCfg, boot_ms: u64) -> Self {
        let peak_estimator = cfg.peak_estimator.clamp(0.0, MAX_PEAK_ESTIMATOR);
        Self {
            cfg,
            state: FridgeState::Idle,
            previous: FridgeState::Idle,
            start_ms: boot_ms,
            stop_ms: boot_ms,
            heat_start_ms: boot_ms,
            heat_stop_ms: boot_ms,
            window_start_ms: boot_ms,
            peak_estimator,
            peak_estimate: 0.0,
            watch: None,
            hold: false,
            last_beer_c: None,
            last_transition: None,
        }
    }

    /// Evaluate one control cycle.
    pub fn update(&mut self, inp: &ThermalInputs) -> Option<Transition> {
        let before = self.state;
        if let Some(b) = inp.beer_c {
            self.last_beer_c = Some(b);
        }
        self.watch_peak(inp);

        let next = match self.state {
            FridgeState::Idle => self.from_idle(inp),
            FridgeState::Cool => self.from_cool(inp),
            FridgeState::Heat => self.from_heat(inp),
        };
        let transition = next.map(|(to, reason)| self.apply(to, reason, inp.now_ms));

        self.previous = before;
        transition
    }

    fn from_idle(&self, inp: &ThermalInputs) -> Option<(FridgeState, TransitionReason)> {
        if inp.fault || self.hold {
            return None;
        }
        let error = inp.setpoint_c - inp.beer_c?;
        let now = inp.now_ms;
        if error < -self.cfg.idle_diff_c
            && now.saturating_sub(self.stop_ms) >= self.cfg.cool_min_off_ms
        {
            return Some((FridgeState::Cool, TransitionReason::DemandCool));
        }
        if error > self.cfg.idle_diff_c
            && now.saturating_sub(self.heat_stop_ms) >= self.cfg.heat_min_off_ms
        {
            return Some((FridgeState::Heat, TransitionReason::DemandHeat));
        }
        None
    }

    fn from_cool(&self, inp: &ThermalInputs) -> Option<(FridgeState, TransitionReason)> {
        if inp.fault {
            return Some((FridgeState::Idle, TransitionReason::Fault));
        }
        let elapsed = inp.now_ms.saturating_sub(self.start_ms);
        if elapsed >= self.cfg.cool_max_on_ms {
            return Some((FridgeState::Idle, TransitionReason::MaxOnTime));
        }
        if elapsed < self.cfg.cool_min_on_ms {
            return None;
        }
        if self.hold {
            return Some((FridgeState::Idle, TransitionReason::Hold));
        }
        let error = inp.setpoint_c - inp.beer_c?;
        if error + self.overshoot_for(elapsed) >= -self.cfg.idle_diff_c {
            return Some((FridgeState::Idle, TransitionReason::DeadBand));
        }
        None
    }

    fn from_heat(&mut self, inp: &ThermalInputs) -> Option<(FridgeState, TransitionReason)> {
        if inp.fault {
            return Some((FridgeState::Idle, TransitionReason::Fault));
        }
        let window = self.cfg.heat_window_ms.max(1);
        let mut boundary = false;
        while inp.now_ms.saturating_sub(self.window_start_ms) >= window {
            self.window_start_ms += window;
            boundary = true;
        }
        let closed = inp
            .beer_c
            .is_some_and(|b| inp.setpoint_c - b <= self.cfg.idle_diff_c);
        if closed {
            return Some((FridgeState::Idle, TransitionReason::DeadBand));
        }
        // a latched hold waits for the end of the current heat window
        (self.hold && boundary).then_some((FridgeState::Idle, TransitionReason::Hold))
    }

    fn apply(&mut self, to: FridgeState, reason: TransitionReason, now: u64) -> Transition {
        let from = self.state;
        match (from, to) {
            (_, FridgeState::Cool) => {
                self.start_ms = now;
                // a new cycle makes the pending observation meaningless
                self.watch = None;
            }
            (FridgeState::Cool, _) => {
                self.stop_ms = now;
                let run_ms = now.saturating_sub(self.start_ms);
                self.peak_estimate = self.overshoot_for(run_ms);
                self.watch = match (reason, self.last_beer_c) {
                    (TransitionReason::Fault, _) | (_, None) => None,
                    (_, Some(c)) => Some(PeakWatch {
                        stop_ms: now,
                        stop_c: c,
                        min_c: c,
                        run_ms,
                    }),
                };
            }
            _ => {}
        }
        match (from, to) {
            (_, FridgeState::Heat) => {
                self.heat_start_ms = now;
                self.window_start_ms = now;
            }
            (FridgeState::Heat, _) => self.heat_stop_ms = now,
            _ => {}
        }
        self.state = to;
        let t = Transition {
            from,
            to,
            reason,
            at_ms: now,
        };
        tracing::info!(
            from = %from,
            to = %to,
            reason = %reason,
            at_ms = now,
            peak_estimate = self.peak_estimate,
            "fridge state transition"
        );
        self.last_transition = Some(t);
        t
    }

    fn watch_peak(&mut self, inp: &ThermalInputs) {
        let Some(mut w) = self.watch else {
            return;
        };
        if let Some(b) = inp.beer_c {
            w.min_c = w.min_c.min(b);
        }
        let waited = inp.now_ms.saturating_sub(w.stop_ms);
        let peak = inp.peak && inp.beer_c.is_some();
        if peak || waited >= self.cfg.peak_max_wait_ms {
            self.watch = None;
            self.tune_estimator(&w, peak);
        } else {
            self.watch = Some(w);
        }
    }

    fn tune_estimator(&mut self, w: &PeakWatch, detected: bool) {
        let actual = w.stop_c - w.min_c;
        let error = actual - self.peak_estimate;
        let run_h = w.run_ms.min(self.cfg.peak_max_time_ms) as f64 / MS_PER_HOUR;
        if error.abs() <= self.cfg.peak_diff_c || run_h <= 0.0 {
            tracing::debug!(actual, estimate = self.peak_estimate, detected, "peak within tolerance");
            return;
        }
        let old = self.peak_estimator;
        self.peak_estimator = (old + self.cfg.estimator_gain * error / run_h)
            .clamp(0.0, MAX_PEAK_ESTIMATOR);
        tracing::info!(
            actual,
            estimate = self.peak_estimate,
            detected,
            old,
            new = self.peak_estimator,
            "peak estimator tuned"
        );
    }

    /// Expected overshoot for a compressor run of `run_ms`.
    fn overshoot_for(&self, run_ms: u64) -> f64 {
        self.peak_estimator * run_ms.min(self.cfg.peak_max_time_ms) as f64 / MS_PER_HOUR
    }

    /// Latch (or clear) a hold. Applied at the next permitted boundary:
    /// COOL once `cool_min_on` is met, HEAT at the end of the current heat
    /// window. No new cycles start while held.
    pub fn request_hold(&mut self, hold: bool) {
        if hold != self.hold {
            tracing::info!(hold, state = %self.state, "hold request latched");
        }
        self.hold = hold;
    }

    pub fn hold_requested(&self) -> bool {
        self.hold
    }

    pub fn compressor_on(&self) -> bool {
        self.state == FridgeState::Cool
    }

    /// Time-proportioned heater: on for the first `duty_ms` of each window.
    pub fn heater_on(&self, now_ms: u64, duty_ms: f64) -> bool {
        if self.state != FridgeState::Heat {
            return false;
        }
        let window = self.cfg.heat_window_ms.max(1);
        let pos = now_ms.saturating_sub(self.window_start_ms) % window;
        (pos as f64) < duty_ms
    }

    pub fn state(&self) -> FridgeState {
        self.state
    }

    /// State as of the start of the latest evaluation.
    pub fn previous_state(&self) -> FridgeState {
        self.previous
    }

    /// The latest evaluation moved into `s`.
    pub fn entered(&self, s: FridgeState) -> bool {
        self.state == s && self.previous != s
    }

    /// The latest evaluation moved out of `s`.
    pub fn left(&self, s: FridgeState) -> bool {
        self.previous == s && self.state != s
    }

    /// Start of the current or most recent COOL period.
    pub fn start_ms(&self) -> u64 {
        self.start_ms
    }

    /// End of the most recent COOL period.
    pub fn stop_ms(&self) -> u64 {
        self.stop_ms
    }

    pub fn heat_start_ms(&self) -> u64 {
        self.heat_start_ms
    }

    pub fn heat_stop_ms(&self) -> u64 {
        self.heat_stop_ms
    }

    pub fn peak_estimator(&self) -> f64 {
        self.peak_estimator
    }

    /// Restore a persisted gain. Negative or non-finite values are rejected.
    pub fn set_peak_estimator(&mut self, v: f64) -> bool {
        if !(v.is_finite() && v >= 0.0) {
            return false;
        }
        self.peak_estimator = v.min(MAX_PEAK_ESTIMATOR);
        true
    }

    /// Overshoot predicted at the last COOL exit.
    pub fn peak_estimate(&self) -> f64 {
        self.peak_estimate
    }

    /// A post-cooling peak is being watched for.
    pub fn awaiting_peak(&self) -> bool {
        self.watch.is_some()
    }

    pub fn last_transition(&self) -> Option<Transition> {
        self.last_transition
    }

    pub fn config(&self) -> &FridgeCfg {
        &self.cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SP: f64 = 18.0;

    fn inputs(now_s: u64, beer: f64) -> ThermalInputs {
        ThermalInputs {
            now_ms: now_s * 1000,
            setpoint_c: SP,
            beer_c: Some(beer),
            peak: false,
            fault: false,
        }
    }

    #[test]
    fn compressor_respects_min_off_after_boot() {
        let mut sm = ThermalStateMachine::new(FridgeCfg::default(), 0);
        assert!(sm.update(&inputs(10, SP + 2.0)).is_none());
        let t = sm.update(&inputs(300, SP + 2.0)).expect("cool");
        assert_eq!(t.reason, TransitionReason::DemandCool);
        assert!(sm.compressor_on());
        assert!(sm.entered(FridgeState::Cool));
    }

    #[test]
    fn rejected_reading_holds_state() {
        let mut sm = ThermalStateMachine::new(FridgeCfg::default(), 0);
        let mut i = inputs(400, SP + 2.0);
        i.beer_c = None;
        assert!(sm.update(&i).is_none());
        assert_eq!(sm.state(), FridgeState::Idle);
    }

    #[test]
    fn max_on_is_enforced_without_valid_readings() {
        let mut sm = ThermalStateMachine::new(FridgeCfg::default(), 0);
        sm.update(&inputs(400, SP + 2.0)).expect("cool");
        let mut i = inputs(400 + 2700, SP + 2.0);
        i.beer_c = None;
        let t = sm.update(&i).expect("forced exit");
        assert_eq!(t.reason, TransitionReason::MaxOnTime);
    }

    #[test]
    fn fault_aborts_cool_inside_min_on() {
        let mut sm = ThermalStateMachine::new(FridgeCfg::default(), 0);
        sm.update(&inputs(400, SP + 2.0)).expect("cool");
        let mut i = inputs(410, SP + 2.0);
        i.fault = true;
        let t = sm.update(&i).expect("abort");
        assert_eq!(t.reason, TransitionReason::Fault);
        assert!(!sm.awaiting_peak());
    }

    #[test]
    fn heat_window_duty() {
        let mut sm = ThermalStateMachine::new(FridgeCfg::default(), 0);
        let t = sm.update(&inputs(400, SP - 1.0)).expect("heat");
        assert_eq!(t.to, FridgeState::Heat);
        let start = 400_000;
        assert!(sm.heater_on(start, 60_000.0));
        assert!(sm.heater_on(start + 59_999, 60_000.0));
        assert!(!sm.heater_on(start + 60_000, 60_000.0));
        assert!(sm.heater_on(start + 300_000, 60_000.0));
        assert!(!sm.heater_on(start, 0.0));
    }

    #[test]
    fn heat_min_off_blocks_reentry() {
        let mut sm = ThermalStateMachine::new(FridgeCfg::default(), 0);
        sm.update(&inputs(400, SP - 1.0)).expect("heat");
        let t = sm.update(&inputs(500, SP)).expect("idle");
        assert_eq!(t.reason, TransitionReason::DeadBand);
        assert!(sm.update(&inputs(700, SP - 1.0)).is_none());
        assert_eq!(sm.update(&inputs(800, SP - 1.0)).map(|t| t.to), Some(FridgeState::Heat));
    }

    #[test]
    fn hold_is_applied_at_the_heat_window_boundary() {
        let mut sm = ThermalStateMachine::new(FridgeCfg::default(), 0);
        sm.update(&inputs(400, SP - 1.0)).expect("heat");
        sm.request_hold(true);
        assert!(sm.update(&inputs(500, SP - 1.0)).is_none());
        let t = sm.update(&inputs(700, SP - 1.0)).expect("boundary");
        assert_eq!(t.reason, TransitionReason::Hold);
        // no new cycle while held
        assert!(sm.update(&inputs(2000, SP - 1.0)).is_none());
        sm.request_hold(false);
        assert!(sm.update(&inputs(2001, SP - 1.0)).is_some());
    }

    #[test]
    fn held_heat_still_exits_when_the_dead_band_closes() {
        let mut sm = ThermalStateMachine::new(FridgeCfg::default(), 0);
        sm.update(&inputs(400, SP - 1.0)).expect("heat");
        assert_eq!(sm.heat_start_ms(), 400_000);
        sm.request_hold(true);
        let t = sm.update(&inputs(450, SP + 1.0)).expect("dead-band exit");
        assert_eq!((t.to, t.reason), (FridgeState::Idle, TransitionReason::DeadBand));
        assert!(!sm.heater_on(450_000, 300_000.0));
        assert_eq!(sm.heat_stop_ms(), 450_000);
    }

    #[test]
    fn hold_waits_for_cool_min_on() {
        let mut sm = ThermalStateMachine::new(FridgeCfg::default(), 0);
        sm.update(&inputs(400, SP + 2.0)).expect("cool");
        sm.request_hold(true);
        assert!(sm.update(&inputs(450, SP + 2.0)).is_none());
        let t = sm.update(&inputs(520, SP + 2.0)).expect("hold");
        assert_eq!(t.reason, TransitionReason::Hold);
    }

    #[test]
    fn estimator_learns_from_underestimated_overshoot() {
        let cfg = FridgeCfg::default();
        let mut sm = ThermalStateMachine::new(cfg, 0);
        sm.update(&inputs(400, SP + 2.0)).expect("cool");
        // 20 min run, exit once within the dead-band
        let t = sm.update(&inputs(400 + 1200, SP + 0.1)).expect("exit");
        assert_eq!(t.reason, TransitionReason::DeadBand);
        let estimate = sm.peak_estimate();
        assert!((estimate - 1.0 / 3.0).abs() < 1e-9);
        assert!(sm.awaiting_peak());
        // beer keeps falling 1.5 degC below the stop temperature
        sm.update(&inputs(1700, SP - 1.4));
        let mut i = inputs(1701, SP - 1.3);
        i.peak = true;
        sm.update(&i);
        assert!(!sm.awaiting_peak());
        // error = 1.5 - 1/3; gain 0.5 over 1/3 h
        let expected = 1.0 + 0.5 * (1.5 - 1.0 / 3.0) * 3.0;
        assert!((sm.peak_estimator() - expected).abs() < 1e-9);
    }

    #[test]
    fn small_prediction_error_leaves_estimator() {
        let mut sm = ThermalStateMachine::new(FridgeCfg::default(), 0);
        sm.update(&inputs(400, SP + 2.0)).expect("cool");
        sm.update(&inputs(1600, SP + 0.1)).expect("exit");
        let mut i = inputs(1700, SP - 0.2);
        i.peak = true;
        sm.update(&i);
        assert_eq!(sm.peak_estimator(), 1.0);
    }

    #[test]
    fn estimator_never_goes_negative() {
        let mut sm = ThermalStateMachine::new(FridgeCfg::default(), 0);
        assert!(sm.set_peak_estimator(3.0));
        sm.update(&inputs(400, SP + 2.0)).expect("cool");
        // predicted overshoot of 1 degC lets COOL end 0.5 degC above setpoint
        sm.update(&inputs(1600, SP + 0.5)).expect("exit early on estimate");
        // beer rises right after the stop: actual overshoot 0
        let mut i = inputs(1601, SP + 0.6);
        i.peak = true;
        sm.update(&i);
        assert!(sm.peak_estimator() >= 0.0);
        assert!(sm.peak_estimator() < 3.0);
        assert!(!sm.set_peak_estimator(-1.0));
    }

    #[test]
    fn peak_watch_times_out() {
        let mut sm = ThermalStateMachine::new(FridgeCfg::default(), 0);
        sm.update(&inputs(400, SP + 2.0)).expect("cool");
        sm.update(&inputs(1600, SP + 0.1)).expect("exit");
        assert!(sm.awaiting_peak());
        sm.update(&inputs(1600 + 1799, SP - 1.0));
        assert!(sm.awaiting_peak());
        sm.update(&inputs(1600 + 1800, SP - 1.0));
        assert!(!sm.awaiting_peak());
    }

    #[test]
    fn previous_state_tracks_the_prior_evaluation() {
        let mut sm = ThermalStateMachine::new(FridgeCfg::default(), 0);
        sm.update(&inputs(400, SP + 2.0));
        assert_eq!(sm.previous_state(), FridgeState::Idle);
        assert!(sm.entered(FridgeState::Cool));
        sm.update(&inputs(401, SP + 2.0));
        assert_eq!(sm.previous_state(), FridgeState::Cool);
        assert!(!sm.entered(FridgeState::Cool));
    }
}
