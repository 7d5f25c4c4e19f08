//! Value types that flow from the sensor to the sinks.
//!
//! A [`Reading`] is produced once per poll cycle and never mutated;
//! a [`DeviceStatus`] is emitted on state transitions and, while the
//! sensor is faulted, at a reduced rate.

use serde::Serialize;

use crate::config::truncated;
use crate::error::SensorFault;

/// Temperature unit for single-value outputs (console line, push server).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TempUnit {
    #[default]
    Celsius,
    Fahrenheit,
}

impl TempUnit {
    pub const fn symbol(self) -> char {
        match self {
            Self::Celsius => 'C',
            Self::Fahrenheit => 'F',
        }
    }

    /// Parse `C` / `F` (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "C" | "c" => Some(Self::Celsius),
            "F" | "f" => Some(Self::Fahrenheit),
            _ => None,
        }
    }
}

pub fn fahrenheit_from_celsius(c: f32) -> f32 {
    c * 9.0 / 5.0 + 32.0
}

pub fn celsius_from_fahrenheit(f: f32) -> f32 {
    (f - 32.0) * 5.0 / 9.0
}

/// One thermocouple sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub temperature_celsius: f32,
    pub temperature_fahrenheit: f32,
    /// Seconds since boot.
    pub timestamp: f64,
    pub is_valid: bool,
    pub fault: Option<SensorFault>,
}

impl Reading {
    /// A good sample. Fahrenheit is derived here and nowhere else.
    pub fn valid(celsius: f32, timestamp: f64) -> Self {
        Self {
            temperature_celsius: celsius,
            temperature_fahrenheit: fahrenheit_from_celsius(celsius),
            timestamp,
            is_valid: true,
            fault: None,
        }
    }

    /// A faulted sample. The temperature fields carry NaN so they can
    /// never be mistaken for data.
    pub fn faulted(fault: SensorFault, timestamp: f64) -> Self {
        Self {
            temperature_celsius: f32::NAN,
            temperature_fahrenheit: f32::NAN,
            timestamp,
            is_valid: false,
            fault: Some(fault),
        }
    }

    /// Temperature in the requested unit.
    pub fn in_unit(&self, unit: TempUnit) -> f32 {
        match unit {
            TempUnit::Celsius => self.temperature_celsius,
            TempUnit::Fahrenheit => self.temperature_fahrenheit,
        }
    }
}

/// Coarse health of the monitor as seen by downstream consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    Good,
    Fault,
    Disconnected,
}

impl DeviceState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Good => "good",
            Self::Fault => "fault",
            Self::Disconnected => "disconnected",
        }
    }
}

/// Status event published alongside readings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceStatus {
    pub device_id: heapless::String<32>,
    pub state: DeviceState,
    pub timestamp: f64,
    /// Short machine-readable cause (`"open_circuit"`, `"shutdown"`, …).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
}

impl DeviceStatus {
    pub fn new(device_id: &str, state: DeviceState, timestamp: f64) -> Self {
        Self {
            device_id: truncated(device_id),
            state,
            timestamp,
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: &'static str) -> Self {
        self.reason = Some(reason);
        self
    }
}
