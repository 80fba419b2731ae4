use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("one-wire bus error: {0}")]
    Bus(String),
    #[error("no device answered on the bus")]
    NoDevice,
    #[error("bus timeout")]
    Timeout,
    #[error("gpio error: {0}")]
    Gpio(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HwError>;
