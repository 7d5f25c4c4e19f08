//! Firmware configuration.
//!
//! The settings document (`settings.json`, baked into the image) is parsed
//! into [`RawSettings`] and validated once at startup into the immutable
//! [`Configuration`] that is passed to the controller. Nothing re-reads
//! settings at runtime.

use core::net::{IpAddr, Ipv4Addr};

use serde::Deserialize;

use crate::app::reading::TempUnit;
use crate::error::ConfigError;
use crate::network::BackoffPolicy;

/// Default MQTT port (plain TCP, no TLS).
pub const DEFAULT_BROKER_PORT: u16 = 1883;
/// Default topic prefix; topics become `<prefix>/<device_id>/…`.
pub const DEFAULT_TOPIC_PREFIX: &str = "icl/roast_monitor";
/// Port Artisan is configured to dial (`ws://<ip>:8765`).
pub const DEFAULT_PUSH_PORT: u16 = 8765;
pub const DEFAULT_READ_INTERVAL_SECS: f32 = 1.0;
pub const DEFAULT_FAULT_STATUS_EVERY: u32 = 10;

// ───────────────────────────────────────────────────────────────
// Output mode
// ───────────────────────────────────────────────────────────────

/// Which output sink this run uses. Exactly one per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Console,
    Broker,
    PushServer,
}

impl OutputMode {
    /// Accepts the canonical names plus the legacy `mqtt` / `artisan`.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.trim() {
            "console" => Ok(Self::Console),
            "broker" | "mqtt" => Ok(Self::Broker),
            "push_server" | "artisan" => Ok(Self::PushServer),
            _ => Err(ConfigError::UnknownOutputMode),
        }
    }

    pub const fn requires_network(self) -> bool {
        !matches!(self, Self::Console)
    }
}

// ───────────────────────────────────────────────────────────────
// Sub-configs
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WifiConfig {
    pub ssid: heapless::String<32>,
    pub password: heapless::String<64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub host: heapless::String<64>,
    pub port: u16,
    pub username: Option<heapless::String<32>>,
    pub password: Option<heapless::String<64>>,
    /// Topic prefix without trailing slash.
    pub topic_prefix: heapless::String<64>,
    pub keep_alive_secs: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushServerConfig {
    pub host: IpAddr,
    pub port: u16,
}

impl Default for PushServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PUSH_PORT,
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Configuration
// ───────────────────────────────────────────────────────────────

/// Validated, immutable process configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
    pub output_mode: OutputMode,
    pub read_interval_secs: f32,
    pub preferred_unit: TempUnit,
    pub debug: bool,
    pub device_id: heapless::String<32>,
    /// Present whenever `output_mode` needs the network.
    pub wifi: Option<WifiConfig>,
    /// Present whenever `output_mode` is `Broker`.
    pub broker: Option<BrokerConfig>,
    pub push_server: PushServerConfig,
    /// While the sensor is faulted, emit a fault status every N cycles.
    pub fault_status_every_n_cycles: u32,
    pub link_policy: BackoffPolicy,
}

impl Configuration {
    /// Parse and validate a JSON settings document.
    pub fn from_json(json: &str, fallback_device_id: &str) -> Result<Self, ConfigError> {
        let raw: RawSettings = serde_json::from_str(json).map_err(|_| ConfigError::Parse)?;
        raw.into_config(fallback_device_id)
    }

    /// Read period in whole milliseconds (at least 1).
    pub fn read_interval_ms(&self) -> u64 {
        ((self.read_interval_secs * 1000.0).round() as u64).max(1)
    }

    /// A console-mode configuration with defaults everywhere.
    pub fn console(device_id: &str) -> Self {
        Self {
            output_mode: OutputMode::Console,
            read_interval_secs: DEFAULT_READ_INTERVAL_SECS,
            preferred_unit: TempUnit::Celsius,
            debug: false,
            device_id: truncated(device_id),
            wifi: None,
            broker: None,
            push_server: PushServerConfig::default(),
            fault_status_every_n_cycles: DEFAULT_FAULT_STATUS_EVERY,
            link_policy: BackoffPolicy::default(),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Raw settings document
// ───────────────────────────────────────────────────────────────

/// Serde image of `settings.json`. Every field is optional here;
/// [`into_config`](Self::into_config) decides what is required.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawSettings {
    pub output_mode: Option<String>,
    pub read_interval_seconds: Option<f32>,
    pub preferred_unit: Option<String>,
    pub debug: Option<bool>,
    pub device_id: Option<String>,
    pub wifi_ssid: Option<String>,
    pub wifi_password: Option<String>,
    pub mqtt_broker: Option<String>,
    pub mqtt_port: Option<u16>,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_topic_prefix: Option<String>,
    pub mqtt_keep_alive_secs: Option<u16>,
    pub push_host: Option<String>,
    pub push_port: Option<u16>,
    pub fault_status_every_n_cycles: Option<u32>,
}

impl RawSettings {
    pub fn into_config(self, fallback_device_id: &str) -> Result<Configuration, ConfigError> {
        let output_mode = OutputMode::parse(
            self.output_mode
                .as_deref()
                .ok_or(ConfigError::MissingField("output_mode"))?,
        )?;

        let read_interval_secs = self
            .read_interval_seconds
            .unwrap_or(DEFAULT_READ_INTERVAL_SECS);
        if !read_interval_secs.is_finite() || read_interval_secs <= 0.0 {
            return Err(ConfigError::InvalidInterval);
        }

        let preferred_unit = match self.preferred_unit.as_deref() {
            Some(u) => TempUnit::parse(u).ok_or(ConfigError::UnknownUnit)?,
            None => TempUnit::Celsius,
        };

        let device_id = bounded::<32>(
            self.device_id.as_deref().unwrap_or(fallback_device_id),
            "device_id",
        )?;
        validate_topic_level(&device_id, "device_id")?;

        let wifi = if output_mode.requires_network() {
            let ssid = self
                .wifi_ssid
                .as_deref()
                .ok_or(ConfigError::MissingField("wifi_ssid"))?;
            let password = self.wifi_password.as_deref().unwrap_or("");
            validate_ssid(ssid)?;
            validate_password(password)?;
            Some(WifiConfig {
                ssid: bounded(ssid, "wifi_ssid")?,
                password: bounded(password, "wifi_password")?,
            })
        } else {
            None
        };

        let broker = if output_mode == OutputMode::Broker {
            let host = self
                .mqtt_broker
                .as_deref()
                .filter(|h| !h.trim().is_empty())
                .ok_or(ConfigError::MissingField("mqtt_broker"))?;
            let port = self.mqtt_port.unwrap_or(DEFAULT_BROKER_PORT);
            if port == 0 {
                return Err(ConfigError::InvalidField("mqtt_port"));
            }
            let prefix = self
                .mqtt_topic_prefix
                .as_deref()
                .unwrap_or(DEFAULT_TOPIC_PREFIX)
                .trim_end_matches('/');
            if prefix.is_empty() || prefix.contains(['+', '#']) {
                return Err(ConfigError::InvalidField("mqtt_topic_prefix"));
            }
            let username = self
                .mqtt_username
                .as_deref()
                .filter(|u| !u.is_empty())
                .map(|u| bounded(u, "mqtt_username"))
                .transpose()?;
            let password = self
                .mqtt_password
                .as_deref()
                .filter(|p| !p.is_empty())
                .map(|p| bounded(p, "mqtt_password"))
                .transpose()?;
            Some(BrokerConfig {
                host: bounded(host.trim(), "mqtt_broker")?,
                port,
                username,
                password,
                topic_prefix: bounded(prefix, "mqtt_topic_prefix")?,
                keep_alive_secs: self.mqtt_keep_alive_secs.unwrap_or(60),
            })
        } else {
            None
        };

        let mut push_server = PushServerConfig::default();
        if let Some(host) = self.push_host.as_deref() {
            push_server.host = host
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidField("push_host"))?;
        }
        if let Some(port) = self.push_port {
            push_server.port = port;
        }

        let fault_status_every_n_cycles = self
            .fault_status_every_n_cycles
            .unwrap_or(DEFAULT_FAULT_STATUS_EVERY);
        if fault_status_every_n_cycles == 0 {
            return Err(ConfigError::InvalidField("fault_status_every_n_cycles"));
        }

        Ok(Configuration {
            output_mode,
            read_interval_secs,
            preferred_unit,
            debug: self.debug.unwrap_or(false),
            device_id,
            wifi,
            broker,
            push_server,
            fault_status_every_n_cycles,
            link_policy: BackoffPolicy::default(),
        })
    }
}

// ───────────────────────────────────────────────────────────────
// Validation
// ───────────────────────────────────────────────────────────────

fn is_printable_ascii(s: &str) -> bool {
    s.bytes().all(|b| (0x20..=0x7E).contains(&b))
}

fn validate_ssid(ssid: &str) -> Result<(), ConfigError> {
    if ssid.is_empty() || ssid.len() > 32 || !is_printable_ascii(ssid) {
        return Err(ConfigError::InvalidField("wifi_ssid"));
    }
    Ok(())
}

/// Empty means an open network; WPA2 needs 8-64 bytes.
fn validate_password(password: &str) -> Result<(), ConfigError> {
    if password.is_empty() {
        return Ok(());
    }
    if password.len() < 8 || password.len() > 64 {
        return Err(ConfigError::InvalidField("wifi_password"));
    }
    Ok(())
}

/// A single MQTT topic level: non-empty, no separators or wildcards.
fn validate_topic_level(s: &str, field: &'static str) -> Result<(), ConfigError> {
    if s.is_empty() || s.contains(['/', '+', '#']) || !is_printable_ascii(s) {
        return Err(ConfigError::InvalidField(field));
    }
    Ok(())
}

/// Copy as much of `s` as fits in `N` bytes, cutting only at a char
/// boundary.
pub fn truncated<const N: usize>(s: &str) -> heapless::String<N> {
    let mut out = heapless::String::new();
    for c in s.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}

fn bounded<const N: usize>(s: &str, field: &'static str) -> Result<heapless::String<N>, ConfigError> {
    let mut out = heapless::String::new();
    out.push_str(s).map_err(|_| ConfigError::InvalidField(field))?;
    Ok(out)
}
