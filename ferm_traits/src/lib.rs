pub mod clock;
pub mod onewire;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use onewire::OneWire;

/// Error type used at every hardware trait boundary.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A single binary actuator (compressor relay, heater relay).
pub trait Relay {
    fn set(&mut self, on: bool) -> Result<(), BoxError>;
}

impl<R: Relay + ?Sized> Relay for Box<R> {
    fn set(&mut self, on: bool) -> Result<(), BoxError> {
        (**self).set(on)
    }
}
