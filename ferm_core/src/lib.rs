#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Core thermal control logic (hardware-agnostic).
//!
//! All hardware interactions go through `ferm_traits::OneWire` and
//! `ferm_traits::Relay`; time comes from `ferm_traits::Clock`.
//!
//! ## Architecture
//!
//! - **Sensing**: shared bus timing and CRC-checked probe reads (`probe`),
//!   4th-order Butterworth smoothing and negative-peak detection (`filter`)
//! - **Control**: PID with anti-windup and bumpless transfer (`pid`), used
//!   twice in cascade: beer to fridge-air target, fridge air to heater duty
//! - **Actuation**: IDLE/COOL/HEAT machine with compressor dwell protection,
//!   time-proportioned heating and an adaptive overshoot estimator (`thermal`)
//! - **Orchestration**: one control cycle per `Chamber::step()` (`chamber`)
//! - **Persistence**: versioned write-if-different record (`persistence`)
//!
//! All control math is Celsius; `units` converts for presentation.

pub mod builder;
pub mod chamber;
pub mod config;
pub mod conversions;
pub mod error;
pub mod filter;
pub mod hw_error;
pub mod persistence;
pub mod pid;
pub mod probe;
pub mod snapshot;
pub mod status;
pub mod thermal;
pub mod units;
pub mod util;

pub use builder::{ChamberBuilder, Missing, Set, build_chamber};
pub use chamber::Chamber;
pub use config::{FridgeCfg, PidCfg, ProgramState, SensorCfg};
pub use error::{BuildError, ChamberError, Report, Result, StoreError};
pub use persistence::{ByteStore, ControllerState, FileStore, MemoryStore, StateStore, Tunings};
pub use pid::{Direction, Mode, OutputType, Pid};
pub use probe::{Probe, ProbeBus};
pub use snapshot::{ChamberSnapshot, SnapshotPublisher};
pub use status::CycleStatus;
pub use thermal::{FridgeState, ThermalInputs, ThermalStateMachine, Transition, TransitionReason};
pub use units::{TempUnit, to_celsius, to_fahrenheit};
