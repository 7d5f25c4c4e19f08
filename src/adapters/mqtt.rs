//! MQTT broker session.
//!
//! Implements [`BrokerSession`] (MQTT 3.1.1, QoS 0, no retain).
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: `esp_idf_svc::mqtt::client::EspMqttClient`.
//!   The client runs its own task; connection state is tracked from the
//!   event callback through an atomic flag. `open()` returns as soon as
//!   the client is started and `poll_open()` reports the CONNACK, so the
//!   caller waits cooperatively instead of parking the main task.
//! - **all other targets**: an in-memory session that logs publishes.

use core::task::Poll;

use log::info;

use crate::app::ports::{BrokerError, BrokerSession};
use crate::config::BrokerConfig;

#[cfg(target_os = "espidf")]
use std::sync::Arc;
#[cfg(target_os = "espidf")]
use std::sync::atomic::{AtomicBool, Ordering};
#[cfg(target_os = "espidf")]
use std::time::{Duration, Instant};

#[cfg(target_os = "espidf")]
use esp_idf_svc::mqtt::client::{EspMqttClient, EventPayload, MqttClientConfiguration, QoS};

/// How long a started session may wait for CONNACK.
#[cfg(target_os = "espidf")]
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct MqttSession {
    #[cfg(target_os = "espidf")]
    client: Option<EspMqttClient<'static>>,
    #[cfg(target_os = "espidf")]
    connected: Arc<AtomicBool>,
    #[cfg(target_os = "espidf")]
    opened_at: Option<Instant>,

    #[cfg(not(target_os = "espidf"))]
    sim_open: bool,

    published: u32,
}

impl Default for MqttSession {
    fn default() -> Self {
        Self::new()
    }
}

impl MqttSession {
    pub fn new() -> Self {
        Self {
            #[cfg(target_os = "espidf")]
            client: None,
            #[cfg(target_os = "espidf")]
            connected: Arc::new(AtomicBool::new(false)),
            #[cfg(target_os = "espidf")]
            opened_at: None,
            #[cfg(not(target_os = "espidf"))]
            sim_open: false,
            published: 0,
        }
    }

    /// Messages handed to the client since power-on.
    pub fn published(&self) -> u32 {
        self.published
    }

    // ── Platform-specific ─────────────────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_open(&mut self, config: &BrokerConfig, client_id: &str) -> Result<(), BrokerError> {
        self.client = None;
        self.connected.store(false, Ordering::Release);

        let url = format!("mqtt://{}:{}", config.host, config.port);
        let conf = MqttClientConfiguration {
            client_id: Some(client_id),
            keep_alive_interval: Some(Duration::from_secs(u64::from(config.keep_alive_secs))),
            username: config.username.as_deref(),
            password: config.password.as_deref(),
            ..Default::default()
        };

        let flag = Arc::clone(&self.connected);
        let client = EspMqttClient::new_cb(&url, &conf, move |event| match event.payload() {
            EventPayload::Connected(_) => flag.store(true, Ordering::Release),
            EventPayload::Disconnected => flag.store(false, Ordering::Release),
            _ => {}
        })
        .map_err(|e| {
            log::warn!("MQTT(espidf): client init failed: {}", e);
            BrokerError::Unreachable
        })?;
        self.client = Some(client);
        self.opened_at = Some(Instant::now());
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_poll_open(&mut self) -> Poll<Result<(), BrokerError>> {
        if self.client.is_none() {
            return Poll::Ready(Err(BrokerError::SessionLost));
        }
        if self.connected.load(Ordering::Acquire) {
            self.opened_at = None;
            return Poll::Ready(Ok(()));
        }
        if self.opened_at.is_some_and(|t| t.elapsed() >= CONNECT_TIMEOUT) {
            log::warn!("MQTT(espidf): no CONNACK within {:?}", CONNECT_TIMEOUT);
            self.platform_close();
            return Poll::Ready(Err(BrokerError::Unreachable));
        }
        if self.opened_at.is_none() {
            // Was up once and dropped since.
            return Poll::Ready(Err(BrokerError::SessionLost));
        }
        Poll::Pending
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_poll_open(&mut self) -> Poll<Result<(), BrokerError>> {
        Poll::Ready(if self.sim_open {
            Ok(())
        } else {
            Err(BrokerError::SessionLost)
        })
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_open(&mut self, config: &BrokerConfig, client_id: &str) -> Result<(), BrokerError> {
        info!(
            "MQTT(sim): session to {}:{} as '{}'",
            config.host, config.port, client_id
        );
        self.sim_open = true;
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(BrokerError::SessionLost);
        }
        let client = self.client.as_mut().ok_or(BrokerError::SessionLost)?;
        client
            .enqueue(topic, QoS::AtMostOnce, false, payload)
            .map(|_| ())
            .map_err(|e| {
                log::warn!("MQTT(espidf): enqueue failed: {}", e);
                BrokerError::PublishFailed
            })
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
        if !self.sim_open {
            return Err(BrokerError::SessionLost);
        }
        log::debug!("MQTT(sim): {} <- {} bytes", topic, payload.len());
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_is_open(&self) -> bool {
        self.client.is_some() && self.connected.load(Ordering::Acquire)
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_is_open(&self) -> bool {
        self.sim_open
    }

    #[cfg(target_os = "espidf")]
    fn platform_close(&mut self) {
        // Dropping the client stops its task and closes the socket.
        self.client = None;
        self.opened_at = None;
        self.connected.store(false, Ordering::Release);
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_close(&mut self) {
        self.sim_open = false;
    }
}

impl BrokerSession for MqttSession {
    fn open(&mut self, config: &BrokerConfig, client_id: &str) -> Result<(), BrokerError> {
        info!("MQTT: connecting to {}:{}", config.host, config.port);
        self.platform_open(config, client_id)
    }

    fn poll_open(&mut self) -> Poll<Result<(), BrokerError>> {
        self.platform_poll_open()
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
        self.platform_publish(topic, payload)?;
        self.published = self.published.wrapping_add(1);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.platform_is_open()
    }

    fn close(&mut self) {
        if self.platform_is_open() {
            info!("MQTT: closing session");
        }
        self.platform_close();
    }
}
