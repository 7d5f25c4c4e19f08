//! Console sink: human-readable lines on the local serial console.

use std::io::Write;

use log::debug;

use crate::app::ports::{LinkStatus, SinkLifecycle, SinkPort};
use crate::app::reading::{DeviceStatus, Reading, TempUnit};
use crate::error::{InitError, SinkError};

pub struct ConsoleSink<W = std::io::Stdout> {
    out: W,
    unit: TempUnit,
    lifecycle: SinkLifecycle,
    lines: u32,
}

impl ConsoleSink {
    pub fn stdout(unit: TempUnit) -> Self {
        Self::new(std::io::stdout(), unit)
    }
}

impl<W: Write> ConsoleSink<W> {
    pub fn new(out: W, unit: TempUnit) -> Self {
        Self {
            out,
            unit,
            lifecycle: SinkLifecycle::Uninitialized,
            lines: 0,
        }
    }

    pub fn lines_written(&self) -> u32 {
        self.lines
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_line(&mut self, line: &str) -> Result<(), SinkError> {
        if self.lifecycle != SinkLifecycle::Active {
            return Err(SinkError::NotConnected);
        }
        writeln!(self.out, "{line}")
            .and_then(|()| self.out.flush())
            .map_err(|_| SinkError::WriteFailed)?;
        self.lines = self.lines.wrapping_add(1);
        debug!("Console: {}", line);
        Ok(())
    }
}

/// `✓ Temp: 150.5°C (302.9°F)`, preferred unit first.
pub fn format_reading(reading: &Reading, unit: TempUnit) -> String {
    if !reading.is_valid {
        return match reading.fault {
            Some(fault) => format!("⚠ ERROR: Invalid temperature reading ({})", fault.as_str()),
            None => "⚠ ERROR: Invalid temperature reading".to_string(),
        };
    }
    let (primary, secondary) = match unit {
        TempUnit::Celsius => (TempUnit::Celsius, TempUnit::Fahrenheit),
        TempUnit::Fahrenheit => (TempUnit::Fahrenheit, TempUnit::Celsius),
    };
    format!(
        "✓ Temp: {:.1}°{} ({:.1}°{})",
        reading.in_unit(primary),
        primary.symbol(),
        reading.in_unit(secondary),
        secondary.symbol()
    )
}

pub fn format_status(status: &DeviceStatus) -> String {
    let mut line = format!(
        "Status: device_id: {}, state: {}, timestamp: {:.1}",
        status.device_id,
        status.state.as_str(),
        status.timestamp
    );
    if let Some(reason) = status.reason {
        line.push_str(", reason: ");
        line.push_str(reason);
    }
    line
}

impl<W: Write> SinkPort for ConsoleSink<W> {
    fn name(&self) -> &'static str {
        "console"
    }

    fn requires_network(&self) -> bool {
        false
    }

    fn lifecycle(&self) -> SinkLifecycle {
        self.lifecycle
    }

    fn initialize(&mut self, _link: Option<&dyn LinkStatus>) -> Result<(), InitError> {
        if self.lifecycle != SinkLifecycle::Uninitialized {
            return Err(InitError::InvalidLifecycle);
        }
        self.lifecycle = SinkLifecycle::Active;
        Ok(())
    }

    fn output_reading(&mut self, reading: &Reading) -> Result<(), SinkError> {
        let line = format_reading(reading, self.unit);
        self.write_line(&line)
    }

    fn output_status(&mut self, status: &DeviceStatus) -> Result<(), SinkError> {
        let line = format_status(status);
        self.write_line(&line)
    }

    fn cleanup(&mut self) {
        if self.lifecycle == SinkLifecycle::CleanedUp {
            return;
        }
        let _ = self.out.flush();
        self.lifecycle = SinkLifecycle::CleanedUp;
    }
}
