//! MAX31855 K-type thermocouple amplifier over SPI.
//!
//! The chip streams one 32-bit frame per chip-select cycle, MSB first:
//!
//! ```text
//!  31            18  17  16  15          4   3   2    1    0
//! ┌────────────────┬───┬───┬──────────────┬───┬────┬────┬────┐
//! │ TC temp (14b)  │ R │ F │ CJ temp (12b)│ R │SCV │SCG │ OC │
//! └────────────────┴───┴───┴──────────────┴───┴────┴────┴────┘
//!   0.25 °C/LSB         │   0.0625 °C/LSB
//!                     summary fault
//! ```
//!
//! `R` bits always read 0 on a healthy bus. Decoding is a pure function
//! ([`interpret`]) so it can be tested without hardware.

use embedded_hal::spi::{Error as _, SpiDevice};
use log::{debug, warn};

use crate::app::reading::Reading;
use crate::error::SensorFault;

/// Lowest plausible bean temperature.
pub const MIN_VALID_C: f32 = -50.0;
/// Highest plausible bean temperature.
pub const MAX_VALID_C: f32 = 600.0;

const TC_LSB_C: f32 = 0.25;
const CJ_LSB_C: f32 = 0.0625;

const BIT_OC: u32 = 1 << 0;
const BIT_SCG: u32 = 1 << 1;
const BIT_SCV: u32 = 1 << 2;
const BIT_RESERVED_LOW: u32 = 1 << 3;
const BIT_FAULT: u32 = 1 << 16;
const BIT_RESERVED_HIGH: u32 = 1 << 17;

/// One raw 32-bit frame as clocked out of the chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawFrame(pub u32);

impl RawFrame {
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self(u32::from_be_bytes(bytes))
    }

    /// Build a fault-free frame carrying `celsius` (rounded to 0.25 °C).
    pub fn from_celsius(celsius: f32) -> Self {
        let counts = (celsius / TC_LSB_C).round() as i32;
        Self(((counts as u32) & 0x3FFF) << 18)
    }

    /// Thermocouple temperature (sign-extended 14-bit, 0.25 °C/LSB).
    pub fn thermocouple_celsius(self) -> f32 {
        let counts = (self.0 as i32) >> 18;
        counts as f32 * TC_LSB_C
    }

    /// Cold-junction (die) temperature (sign-extended 12-bit, 0.0625 °C/LSB).
    pub fn internal_celsius(self) -> f32 {
        let counts = ((self.0 << 16) as i32) >> 20;
        counts as f32 * CJ_LSB_C
    }

    pub const fn open_circuit(self) -> bool {
        self.0 & BIT_OC != 0
    }

    pub const fn short_circuit(self) -> bool {
        self.0 & (BIT_SCG | BIT_SCV) != 0
    }

    /// Reserved bits set, or the summary bit without a specific cause.
    pub const fn malformed(self) -> bool {
        if self.0 & (BIT_RESERVED_HIGH | BIT_RESERVED_LOW) != 0 {
            return true;
        }
        self.0 & BIT_FAULT != 0 && self.0 & (BIT_OC | BIT_SCG | BIT_SCV) == 0
    }
}

/// Classify a bus result into a [`Reading`]. First match wins:
/// bus error, open circuit, short circuit, out of range, valid.
pub fn interpret(frame: Result<RawFrame, SensorFault>, timestamp: f64) -> Reading {
    let frame = match frame {
        Ok(f) if !f.malformed() => f,
        Ok(_) | Err(_) => return Reading::faulted(SensorFault::BusError, timestamp),
    };
    if frame.open_circuit() {
        return Reading::faulted(SensorFault::OpenCircuit, timestamp);
    }
    if frame.short_circuit() {
        return Reading::faulted(SensorFault::ShortCircuit, timestamp);
    }
    let celsius = frame.thermocouple_celsius();
    if !(MIN_VALID_C..=MAX_VALID_C).contains(&celsius) {
        return Reading::faulted(SensorFault::OutOfRange, timestamp);
    }
    Reading::valid(celsius, timestamp)
}

/// MAX31855 driver. Owns its SPI device (bus + chip select).
pub struct Max31855<SPI> {
    spi: SPI,
}

impl<SPI: SpiDevice> Max31855<SPI> {
    pub fn new(spi: SPI) -> Self {
        Self { spi }
    }

    /// Clock one frame out of the chip.
    pub fn read_raw(&mut self) -> Result<RawFrame, SensorFault> {
        let mut buf = [0u8; 4];
        match self.spi.read(&mut buf) {
            Ok(()) => Ok(RawFrame::from_bytes(buf)),
            Err(e) => {
                warn!("Sensor: SPI read failed ({:?})", e.kind());
                Err(SensorFault::BusError)
            }
        }
    }

    /// Read and classify one sample.
    pub fn read(&mut self, timestamp: f64) -> Reading {
        let frame = self.read_raw();
        if let Ok(f) = frame {
            debug!(
                "Sensor: frame {:#010x}, TC {:.2} °C, CJ {:.4} °C",
                f.0,
                f.thermocouple_celsius(),
                f.internal_celsius()
            );
        }
        interpret(frame, timestamp)
    }
}
