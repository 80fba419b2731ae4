//! Common time/period helpers for ferm_core.

/// Number of milliseconds in one second.
pub const MILLIS_PER_SEC: u64 = 1_000;

/// Sample period in milliseconds for a rate in Hz.
/// - Non-positive or non-finite rates fall back to 1 Hz.
/// - Ensures result is at least 1 millisecond.
#[inline]
pub fn period_ms(hz: f64) -> u64 {
    let hz = if hz.is_finite() && hz > 0.0 { hz } else { 1.0 };
    ((MILLIS_PER_SEC as f64 / hz).round() as u64).max(1)
}

#[inline]
pub fn secs_to_ms(s: u64) -> u64 {
    s.saturating_mul(MILLIS_PER_SEC)
}
