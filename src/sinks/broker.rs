//! Broker sink: publishes readings and status events over MQTT.
//!
//! Topic layout (one device per prefix level):
//!
//! ```text
//! <prefix>/<device_id>/temperature   reading payload, one per cycle
//! <prefix>/<device_id>/status        DeviceStatus JSON, on transitions
//! ```
//!
//! The session announces `online` right after it opens and `offline`
//! from `cleanup()`. A publish that fails because the session dropped is
//! reported as [`SinkError::Disconnected`] so the controller can bring
//! the link back and call [`recover`](SinkPort::recover).

use core::task::Poll;

use log::{debug, info, warn};
use serde::Serialize;

use crate::app::ports::{BrokerError, BrokerSession, LinkStatus, SinkLifecycle, SinkPort};
use crate::app::reading::{DeviceState, DeviceStatus, Reading};
use crate::config::{BrokerConfig, truncated};
use crate::error::{InitError, SinkError};

pub const CLIENT_ID: &str = "icl_roast_monitor_pico_w";

pub fn temperature_topic(prefix: &str, device_id: &str) -> String {
    format!("{}/{}/temperature", prefix, device_id)
}

pub fn status_topic(prefix: &str, device_id: &str) -> String {
    format!("{}/{}/status", prefix, device_id)
}

#[derive(Serialize)]
struct TemperaturePayload<'a> {
    temperature_c: f32,
    temperature_f: f32,
    timestamp: f64,
    device_id: &'a str,
    status: &'static str,
    is_valid: bool,
}

fn round2(x: f32) -> f32 {
    (x * 100.0).round() / 100.0
}

/// JSON body for the temperature topic.
pub fn reading_payload(reading: &Reading, device_id: &str) -> Result<String, SinkError> {
    let payload = TemperaturePayload {
        temperature_c: round2(reading.temperature_celsius),
        temperature_f: round2(reading.temperature_fahrenheit),
        timestamp: (reading.timestamp * 100.0).round() / 100.0,
        device_id,
        status: if reading.is_valid { "good" } else { "fault" },
        is_valid: reading.is_valid,
    };
    serde_json::to_string(&payload).map_err(|_| SinkError::WriteFailed)
}

pub struct BrokerSink<S> {
    session: S,
    config: BrokerConfig,
    device_id: heapless::String<32>,
    temperature_topic: String,
    status_topic: String,
    lifecycle: SinkLifecycle,
    /// Timestamp of the last thing we published; stamps online/offline.
    last_timestamp: f64,
    sent: u32,
    /// "online" still owed for the session opened last.
    announce_online: bool,
}

impl<S: BrokerSession> BrokerSink<S> {
    pub fn new(session: S, config: BrokerConfig, device_id: &str) -> Self {
        let id = truncated(device_id);
        Self {
            temperature_topic: temperature_topic(&config.topic_prefix, device_id),
            status_topic: status_topic(&config.topic_prefix, device_id),
            session,
            config,
            device_id: id,
            lifecycle: SinkLifecycle::Uninitialized,
            last_timestamp: 0.0,
            sent: 0,
            announce_online: false,
        }
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }

    pub fn temperature_topic(&self) -> &str {
        &self.temperature_topic
    }

    pub fn status_topic(&self) -> &str {
        &self.status_topic
    }

    /// Readings published since power-on.
    pub fn sent(&self) -> u32 {
        self.sent
    }

    fn publish(&mut self, topic_is_status: bool, payload: &str) -> Result<(), SinkError> {
        if !matches!(self.lifecycle, SinkLifecycle::Active | SinkLifecycle::Degraded) {
            return Err(SinkError::NotConnected);
        }
        let topic = if topic_is_status {
            &self.status_topic
        } else {
            &self.temperature_topic
        };
        debug!("MQTT: {} <- {}", topic, payload);
        match self.session.publish(topic, payload.as_bytes()) {
            Ok(()) => {
                self.lifecycle = SinkLifecycle::Active;
                Ok(())
            }
            Err(BrokerError::SessionLost | BrokerError::Unreachable) => {
                warn!("MQTT: session lost");
                self.lifecycle = SinkLifecycle::Degraded;
                Err(SinkError::Disconnected)
            }
            Err(e) => {
                warn!("MQTT: publish failed: {}", e);
                Err(SinkError::WriteFailed)
            }
        }
    }

    /// Announce "online" once per session, as soon as it is up.
    fn announce_if_open(&mut self) {
        if self.announce_online && self.session.is_open() {
            self.announce_online = false;
            info!("MQTT: session established");
            self.publish_lifecycle(DeviceState::Good, "online");
        }
    }

    fn publish_lifecycle(&mut self, state: DeviceState, reason: &'static str) {
        let status = DeviceStatus::new(&self.device_id, state, self.last_timestamp).with_reason(reason);
        if let Ok(json) = serde_json::to_string(&status) {
            if let Err(e) = self.publish(true, &json) {
                warn!("MQTT: could not announce '{}': {}", reason, e);
            }
        }
    }
}

impl<S: BrokerSession> SinkPort for BrokerSink<S> {
    fn name(&self) -> &'static str {
        "broker"
    }

    fn requires_network(&self) -> bool {
        true
    }

    fn lifecycle(&self) -> SinkLifecycle {
        self.lifecycle
    }

    fn initialize(&mut self, link: Option<&dyn LinkStatus>) -> Result<(), InitError> {
        if self.lifecycle != SinkLifecycle::Uninitialized {
            return Err(InitError::InvalidLifecycle);
        }
        if !link.is_some_and(|l| l.is_connected()) {
            return Err(InitError::NetworkRequired);
        }
        self.session.open(&self.config, CLIENT_ID)?;
        self.lifecycle = SinkLifecycle::Active;
        self.announce_online = true;
        info!("MQTT: publishing to {}", self.temperature_topic);
        self.announce_if_open();
        Ok(())
    }

    fn output_reading(&mut self, reading: &Reading) -> Result<(), SinkError> {
        let json = reading_payload(reading, &self.device_id)?;
        self.publish(false, &json)?;
        self.last_timestamp = reading.timestamp;
        self.sent = self.sent.wrapping_add(1);
        debug!("MQTT: reading #{} sent", self.sent);
        Ok(())
    }

    fn output_status(&mut self, status: &DeviceStatus) -> Result<(), SinkError> {
        let json = serde_json::to_string(status).map_err(|_| SinkError::WriteFailed)?;
        self.publish(true, &json)?;
        self.last_timestamp = status.timestamp;
        Ok(())
    }

    fn recover(&mut self, link: &dyn LinkStatus) -> Result<(), SinkError> {
        if !matches!(self.lifecycle, SinkLifecycle::Active | SinkLifecycle::Degraded) {
            return Err(SinkError::NotConnected);
        }
        if !link.is_connected() {
            return Err(SinkError::Disconnected);
        }
        if self.session.is_open() && self.lifecycle == SinkLifecycle::Active {
            return Ok(());
        }
        self.session.close();
        self.session.open(&self.config, CLIENT_ID).map_err(|e| {
            warn!("MQTT: reconnect failed: {}", e);
            SinkError::Disconnected
        })?;
        self.lifecycle = SinkLifecycle::Active;
        self.announce_online = true;
        info!("MQTT: session reopened");
        self.announce_if_open();
        Ok(())
    }

    fn poll_ready(&mut self) -> Poll<Result<(), SinkError>> {
        if !matches!(self.lifecycle, SinkLifecycle::Active | SinkLifecycle::Degraded) {
            return Poll::Ready(Err(SinkError::NotConnected));
        }
        match self.session.poll_open() {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(())) => {
                self.announce_if_open();
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(e)) => {
                warn!("MQTT: session did not come up: {}", e);
                self.lifecycle = SinkLifecycle::Degraded;
                Poll::Ready(Err(SinkError::Disconnected))
            }
        }
    }

    fn cleanup(&mut self) {
        if self.lifecycle == SinkLifecycle::CleanedUp {
            return;
        }
        if self.lifecycle != SinkLifecycle::Uninitialized && self.session.is_open() {
            self.publish_lifecycle(DeviceState::Disconnected, "offline");
        }
        self.session.close();
        self.lifecycle = SinkLifecycle::CleanedUp;
        info!("MQTT: sink closed after {} readings", self.sent);
    }
}
