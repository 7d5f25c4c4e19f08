//! Port traits: the hexagonal boundary between domain logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ RoastController (domain)
//! ```
//!
//! Driven adapters (clock, radio, broker session, output sinks) implement
//! these traits. The [`RoastController`](super::controller::RoastController)
//! and [`NetworkLink`](crate::network::NetworkLink) consume them via
//! generics, so the domain core never touches hardware directly.
//!
//! The thermocouple bus and the status LED use the `embedded-hal` 1.0
//! traits (`SpiDevice`, `OutputPin`) directly instead of a local port.

use core::fmt;
use core::future::Future;
use core::task::Poll;

use crate::config::BrokerConfig;
use crate::error::{InitError, SinkError};

use super::reading::{DeviceStatus, Reading};

// ───────────────────────────────────────────────────────────────
// Time port (driven adapter: system timer → domain)
// ───────────────────────────────────────────────────────────────

/// Monotonic clock plus a cooperative wait.
///
/// Every wait in the core goes through [`sleep_until`](Self::sleep_until)
/// so tests can substitute a virtual clock and never block.
pub trait TimePort {
    /// Milliseconds since boot (monotonic).
    fn uptime_ms(&self) -> u64;

    /// Suspend the caller until `uptime_ms() >= deadline_ms`.
    fn sleep_until(&self, deadline_ms: u64) -> impl Future<Output = ()>;

    /// Suspend the caller for `ms` milliseconds.
    fn sleep_ms(&self, ms: u64) -> impl Future<Output = ()> {
        self.sleep_until(self.uptime_ms().saturating_add(ms))
    }

    /// Seconds since boot, as stamped on readings. Kept in `f64` so the
    /// stamp stays millisecond-exact for the life of the device.
    fn uptime_secs(&self) -> f64 {
        self.uptime_ms() as f64 / 1000.0
    }
}

// ───────────────────────────────────────────────────────────────
// Radio port (driven adapter: WiFi driver ↔ NetworkLink)
// ───────────────────────────────────────────────────────────────

/// Why a single association attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioError {
    /// The AP was not seen. Also the radio's false report on the very
    /// first attempt after power-on.
    NetworkNotFound,
    /// The AP rejected the credentials.
    AuthFailed,
    /// Associated but DHCP never produced an address.
    NoIpAddress,
    /// The driver itself returned an error.
    Driver,
}

impl fmt::Display for RadioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NetworkNotFound => write!(f, "network not found"),
            Self::AuthFailed => write!(f, "authentication failed"),
            Self::NoIpAddress => write!(f, "no IP address"),
            Self::Driver => write!(f, "radio driver error"),
        }
    }
}

/// The wireless radio as seen by [`NetworkLink`](crate::network::NetworkLink).
///
/// `associate` blocks for one attempt only; retry policy lives in the link.
pub trait RadioPort {
    fn associate(&mut self, ssid: &str, password: &str) -> Result<(), RadioError>;
    fn is_associated(&self) -> bool;
    fn disassociate(&mut self);
    /// Signal strength of the current AP in dBm.
    fn rssi(&self) -> Option<i8>;
}

/// Read-only view of the link handed to sinks.
pub trait LinkStatus {
    fn is_connected(&self) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Broker session port (driven adapter: MQTT client)
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerError {
    /// TCP connect or MQTT CONNECT failed.
    Unreachable,
    /// The broker refused the session (bad credentials, client id clash).
    Rejected,
    /// The session dropped; publishes cannot proceed until reopened.
    SessionLost,
    /// The client failed to enqueue or send the publish.
    PublishFailed,
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreachable => write!(f, "broker unreachable"),
            Self::Rejected => write!(f, "broker rejected session"),
            Self::SessionLost => write!(f, "broker session lost"),
            Self::PublishFailed => write!(f, "publish failed"),
        }
    }
}

/// A message-broker session (MQTT 3.1.1, QoS 0).
pub trait BrokerSession {
    /// Start a session. It may still be waiting for the broker's
    /// acknowledgement when this returns; see [`poll_open`](Self::poll_open).
    fn open(&mut self, config: &BrokerConfig, client_id: &str) -> Result<(), BrokerError>;

    /// Progress of the last `open()`. Sessions that finish connecting
    /// inside `open()` are settled at once.
    fn poll_open(&mut self) -> Poll<Result<(), BrokerError>> {
        Poll::Ready(if self.is_open() {
            Ok(())
        } else {
            Err(BrokerError::SessionLost)
        })
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), BrokerError>;
    fn is_open(&self) -> bool;
    fn close(&mut self);
}

// ───────────────────────────────────────────────────────────────
// Output sink port (domain → destination)
// ───────────────────────────────────────────────────────────────

/// Where a sink is in its life.
///
/// `Uninitialized → Active ⇄ Degraded → CleanedUp`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkLifecycle {
    Uninitialized,
    Active,
    Degraded,
    CleanedUp,
}

/// Common contract of the console, broker and push-server outputs.
///
/// `cleanup()` must be idempotent; only the controller calls it.
pub trait SinkPort {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    fn requires_network(&self) -> bool;

    fn lifecycle(&self) -> SinkLifecycle;

    fn initialize(&mut self, link: Option<&dyn LinkStatus>) -> Result<(), InitError>;

    fn output_reading(&mut self, reading: &Reading) -> Result<(), SinkError>;

    fn output_status(&mut self, status: &DeviceStatus) -> Result<(), SinkError>;

    /// Re-establish any remote session after the link came back.
    fn recover(&mut self, _link: &dyn LinkStatus) -> Result<(), SinkError> {
        Ok(())
    }

    /// Whether a remote session started by `initialize` or `recover` is
    /// up. The controller waits on `Pending` in short slices.
    fn poll_ready(&mut self) -> Poll<Result<(), SinkError>> {
        Poll::Ready(Ok(()))
    }

    /// Housekeeping between cycles (accept clients, answer pings).
    fn poll(&mut self) {}

    fn cleanup(&mut self);
}
