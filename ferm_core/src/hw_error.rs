//! Maps `Box<dyn Error>` from trait boundaries to typed `ChamberError`.
//!
//! The traits in `ferm_traits` use `Box<dyn Error + Send + Sync>`; this module
//! converts those to our typed error enum, with an optional feature-gated path
//! for `ferm_hardware::HwError` downcasting.

use crate::error::ChamberError;

/// Map a trait-boundary error to a typed `ChamberError`.
///
/// Attempts to downcast known hardware error types first, then falls back
/// to string-based heuristics.
pub fn map_hw_error(e: &(dyn std::error::Error + 'static)) -> ChamberError {
    #[cfg(feature = "hardware-errors")]
    {
        use ferm_hardware::error::HwError;
        if let Some(hw) = e.downcast_ref::<HwError>() {
            return match hw {
                HwError::Timeout => ChamberError::Timeout,
                HwError::NoDevice => ChamberError::HardwareFault(hw.to_string()),
                other => ChamberError::Hardware(other.to_string()),
            };
        }
    }

    let s = e.to_string();
    if s.to_lowercase().contains("timeout") {
        ChamberError::Timeout
    } else {
        ChamberError::Hardware(s)
    }
}
