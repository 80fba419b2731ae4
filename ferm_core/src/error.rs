use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ChamberError {
    #[error("hardware error: {0}")]
    Hardware(String),
    #[error("hardware fault: {0}")]
    HardwareFault(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("timeout waiting for sensor")]
    Timeout,
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("invalid state: {0}")]
    State(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("missing one-wire bus")]
    MissingBus,
    #[error("missing cooler relay")]
    MissingCooler,
    #[error("missing heater relay")]
    MissingHeater,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

/// Failures of the persisted controller record.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("stored record version {found} does not match expected {expected}")]
    VersionMismatch { found: u16, expected: u16 },
    #[error("record field `{0}` out of range")]
    OutOfRange(&'static str),
    #[error("storage io: {0}")]
    Io(String),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
