//! Sensor drivers.
//!
//! The monitor has a single probe: a K-type thermocouple in the bean
//! mass, digitised by a MAX31855 on the SPI bus.

pub mod thermocouple;

pub use thermocouple::{Max31855, RawFrame, interpret};
