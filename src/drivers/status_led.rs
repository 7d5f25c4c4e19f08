//! Single-colour status LED.
//!
//! Any `embedded_hal::digital::OutputPin` will do: the on-board LED on
//! the device, a mock pin in tests. Pin errors are logged once and
//! otherwise ignored; the LED is never worth failing a cycle over.

use embedded_hal::digital::{OutputPin, PinState};
use log::warn;

pub struct StatusLed<P> {
    pin: P,
    lit: bool,
    fault_logged: bool,
}

impl<P: OutputPin> StatusLed<P> {
    pub fn new(mut pin: P) -> Self {
        let _ = pin.set_low();
        Self {
            pin,
            lit: false,
            fault_logged: false,
        }
    }

    pub fn set(&mut self, on: bool) {
        if self.pin.set_state(PinState::from(on)).is_err() {
            if !self.fault_logged {
                warn!("LED: pin write failed");
                self.fault_logged = true;
            }
            return;
        }
        self.lit = on;
    }

    pub fn off(&mut self) {
        self.set(false);
    }

    pub fn is_lit(&self) -> bool {
        self.lit
    }

    pub fn release(self) -> P {
        self.pin
    }
}
