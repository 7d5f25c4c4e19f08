//! Error taxonomy for the roast monitor.
//!
//! Each subsystem has its own small `Copy` enum so the controller can
//! match on exact causes; [`StartupError`] funnels the fatal ones into a
//! single type for the bootstrap path.
//!
//! | Type           | Raised by        | Fatal? |
//! |----------------|------------------|--------|
//! | `SensorFault`  | thermocouple     | no, absorbed per cycle |
//! | `LinkError`    | `NetworkLink`    | no, cycle degraded |
//! | `SinkError`    | output sinks     | no, reading dropped |
//! | `InitError`    | sink `initialize`| yes |
//! | `ConfigError`  | settings loader  | yes |

use core::fmt;

use crate::app::ports::BrokerError;

// ---------------------------------------------------------------------------
// Sensor faults
// ---------------------------------------------------------------------------

/// Why a thermocouple reading is not usable.
///
/// Variants are listed in classification priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorFault {
    /// The SPI transaction failed or the frame is malformed.
    BusError,
    /// Thermocouple input is open (probe unplugged or broken).
    OpenCircuit,
    /// Thermocouple shorted to GND or to VCC.
    ShortCircuit,
    /// Converted value is outside the plausible bean-temperature band.
    OutOfRange,
}

impl SensorFault {
    /// Stable lowercase tag used in logs and status payloads.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BusError => "bus_error",
            Self::OpenCircuit => "open_circuit",
            Self::ShortCircuit => "short_circuit",
            Self::OutOfRange => "out_of_range",
        }
    }
}

impl fmt::Display for SensorFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BusError => write!(f, "SPI bus error"),
            Self::OpenCircuit => write!(f, "thermocouple open circuit"),
            Self::ShortCircuit => write!(f, "thermocouple short circuit"),
            Self::OutOfRange => write!(f, "reading out of range"),
        }
    }
}

// ---------------------------------------------------------------------------
// Network link
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    /// Every attempt of this `ensure_connected()` call failed.
    Unavailable { attempts: u32 },
    /// No SSID has been configured.
    NoCredentials,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable { attempts } => {
                write!(f, "link unavailable after {attempts} attempts")
            }
            Self::NoCredentials => write!(f, "no WiFi credentials configured"),
        }
    }
}

// ---------------------------------------------------------------------------
// Output sinks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkError {
    /// The remote session dropped; a reconnect may fix it.
    Disconnected,
    /// The destination rejected or failed the write.
    WriteFailed,
    /// The sink was used before `initialize()` succeeded.
    NotConnected,
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "sink disconnected"),
            Self::WriteFailed => write!(f, "sink write failed"),
            Self::NotConnected => write!(f, "sink not connected"),
        }
    }
}

/// A sink could not be brought up. Always fatal at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitError {
    /// The sink needs the network but no connected link was supplied.
    NetworkRequired,
    /// The broker session could not be established.
    Broker(BrokerError),
    /// The push server could not bind its listening socket.
    Bind,
    /// The remote session was started but never came up.
    NotReady(SinkError),
    /// `initialize()` was called twice, or after `cleanup()`.
    InvalidLifecycle,
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NetworkRequired => write!(f, "sink requires a connected network link"),
            Self::Broker(e) => write!(f, "broker: {e}"),
            Self::Bind => write!(f, "could not bind push-server socket"),
            Self::NotReady(e) => write!(f, "session did not come up ({e})"),
            Self::InvalidLifecycle => write!(f, "sink initialised out of order"),
        }
    }
}

impl From<BrokerError> for InitError {
    fn from(e: BrokerError) -> Self {
        Self::Broker(e)
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// `output_mode` is not one of `console`, `broker`, `push_server`.
    UnknownOutputMode,
    /// `preferred_unit` is not `C` or `F`.
    UnknownUnit,
    /// `read_interval_seconds` is not a finite number > 0.
    InvalidInterval,
    /// A field required by the selected mode is absent.
    MissingField(&'static str),
    /// A field is present but fails range/format validation.
    InvalidField(&'static str),
    /// The settings document is not valid JSON for [`RawSettings`](crate::config::RawSettings).
    Parse,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownOutputMode => {
                write!(f, "unknown output_mode (expected console, broker or push_server)")
            }
            Self::UnknownUnit => write!(f, "unknown preferred_unit (expected C or F)"),
            Self::InvalidInterval => write!(f, "read_interval_seconds must be > 0"),
            Self::MissingField(name) => write!(f, "missing required setting '{name}'"),
            Self::InvalidField(name) => write!(f, "invalid value for setting '{name}'"),
            Self::Parse => write!(f, "settings document could not be parsed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Startup
// ---------------------------------------------------------------------------

/// Anything that stops the controller from reaching `running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupError {
    Config(ConfigError),
    Link(LinkError),
    Init(InitError),
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Link(e) => write!(f, "network: {e}"),
            Self::Init(e) => write!(f, "sink init: {e}"),
        }
    }
}

impl From<ConfigError> for StartupError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<LinkError> for StartupError {
    fn from(e: LinkError) -> Self {
        Self::Link(e)
    }
}

impl From<InitError> for StartupError {
    fn from(e: InitError) -> Self {
        Self::Init(e)
    }
}

impl core::error::Error for StartupError {}
