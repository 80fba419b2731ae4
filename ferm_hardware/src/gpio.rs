//! Relay outputs on Raspberry Pi GPIO.

use rppal::gpio::{Gpio, OutputPin};

use ferm_traits::{BoxError, Relay};

use crate::error::{HwError, Result};

pub struct GpioRelay {
    pin: OutputPin,
    active_low: bool,
}

impl GpioRelay {
    pub fn new(pin: u8, active_low: bool) -> Result<Self> {
        let gpio = Gpio::new().map_err(|e| HwError::Gpio(format!("open gpio: {e}")))?;
        let mut pin = gpio
            .get(pin)
            .map_err(|e| HwError::Gpio(format!("open relay pin {pin}: {e}")))?
            .into_output();
        // De-energized at start-up.
        if active_low {
            pin.set_high();
        } else {
            pin.set_low();
        }
        Ok(Self { pin, active_low })
    }
}

impl Relay for GpioRelay {
    fn set(&mut self, on: bool) -> std::result::Result<(), BoxError> {
        if on != self.active_low {
            self.pin.set_high();
        } else {
            self.pin.set_low();
        }
        tracing::trace!(pin = self.pin.pin(), on, "relay write");
        Ok(())
    }
}
