//! Fixed 4th-order Butterworth low-pass for ~1 Hz probe sampling.
//!
//! The coefficients are a design constant; they are not derived at runtime.
//! DC gain is unity: `8 / FILTER_GAIN == 1 - (A1 + A2 + A3)`.

/// Input normalization.
pub const FILTER_GAIN: f64 = 1.092_799_972e3;
/// Feedback on the output three samples back.
pub const A1: f64 = 0.660_048_952_6;
/// Feedback on the output two samples back.
pub const A2: f64 = -2.253_398_256_3;
/// Feedback on the previous output.
pub const A3: f64 = 2.586_028_659_2;

/// Depth of the raw and filtered histories.
pub const DEPTH: usize = 4;

/// Most-recent-first raw and filtered histories of one probe.
#[derive(Debug, Clone, Default)]
pub struct Butterworth {
    raw: [f64; DEPTH],
    out: [f64; DEPTH],
}

impl Butterworth {
    /// Fill every slot with `value` so the filter starts settled.
    pub fn seed(&mut self, value: f64) {
        self.raw = [value; DEPTH];
        self.out = [value; DEPTH];
    }

    /// Shift in a new raw reading and return the new filtered value.
    pub fn push(&mut self, value: f64) -> f64 {
        self.raw.rotate_right(1);
        self.raw[0] = value;
        self.out.rotate_right(1);
        let r = &self.raw;
        let y = &self.out;
        self.out[0] = (r[3] + r[0] + 3.0 * (r[2] + r[1])) / FILTER_GAIN
            + A1 * y[3]
            + A2 * y[2]
            + A3 * y[1];
        self.out[0]
    }

    /// Latest raw reading.
    pub fn raw(&self) -> f64 {
        self.raw[0]
    }

    /// Current best estimate.
    pub fn value(&self) -> f64 {
        self.out[0]
    }

    pub fn history(&self) -> &[f64; DEPTH] {
        &self.out
    }

    /// Local minimum two samples old: `out[0] > out[1] <= out[2]`.
    pub fn negative_peak(&self) -> bool {
        self.out[0] > self.out[1] && self.out[1] <= self.out[2]
    }
}
