//! WiFi station-mode radio.
//!
//! Implements [`RadioPort`]: one association attempt per call. Retry
//! and backoff belong to [`NetworkLink`](crate::network::NetworkLink).
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: `esp_idf_svc::wifi::BlockingWifi`.
//! - **all other targets**: a simulation that reproduces the cold-boot
//!   quirk (the first attempt reports "network not found").

use log::{info, warn};

use crate::app::ports::{RadioError, RadioPort};

#[cfg(target_os = "espidf")]
use esp_idf_svc::wifi::{AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi};

pub struct WifiRadio {
    #[cfg(target_os = "espidf")]
    wifi: BlockingWifi<EspWifi<'static>>,

    #[cfg(not(target_os = "espidf"))]
    sim_attempts: u32,
    #[cfg(not(target_os = "espidf"))]
    sim_associated: bool,
}

impl WifiRadio {
    #[cfg(target_os = "espidf")]
    pub fn new(wifi: BlockingWifi<EspWifi<'static>>) -> Self {
        Self { wifi }
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn new() -> Self {
        Self {
            sim_attempts: 0,
            sim_associated: false,
        }
    }

    /// Simulation: pretend the AP went away.
    #[cfg(not(target_os = "espidf"))]
    pub fn sim_drop_link(&mut self) {
        self.sim_associated = false;
    }

    // ── Platform-specific ─────────────────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_associate(&mut self, ssid: &str, password: &str) -> Result<(), RadioError> {
        let auth_method = if password.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };
        let config = Configuration::Client(ClientConfiguration {
            ssid: ssid.try_into().map_err(|_| RadioError::Driver)?,
            password: password.try_into().map_err(|_| RadioError::Driver)?,
            auth_method,
            ..Default::default()
        });
        self.wifi
            .set_configuration(&config)
            .map_err(|_| RadioError::Driver)?;
        if !self.wifi.is_started().unwrap_or(false) {
            self.wifi.start().map_err(|_| RadioError::Driver)?;
        }
        self.wifi.connect().map_err(|e| {
            warn!("WiFi(espidf): connect failed: {}", e);
            RadioError::NetworkNotFound
        })?;
        self.wifi.wait_netif_up().map_err(|_| RadioError::NoIpAddress)?;
        if let Ok(ip) = self.wifi.wifi().sta_netif().get_ip_info() {
            info!("WiFi(espidf): IP address {}", ip.ip);
        }
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_associate(&mut self, ssid: &str, _password: &str) -> Result<(), RadioError> {
        self.sim_attempts = self.sim_attempts.wrapping_add(1);
        if self.sim_attempts == 1 {
            warn!("WiFi(sim): first attempt after boot, reporting network not found");
            return Err(RadioError::NetworkNotFound);
        }
        info!("WiFi(sim): associated with '{}' (attempt {})", ssid, self.sim_attempts);
        self.sim_associated = true;
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_is_associated(&self) -> bool {
        self.wifi.is_connected().unwrap_or(false)
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_is_associated(&self) -> bool {
        self.sim_associated
    }

    #[cfg(target_os = "espidf")]
    fn platform_disassociate(&mut self) {
        let _ = self.wifi.disconnect();
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_disassociate(&mut self) {
        self.sim_associated = false;
    }

    #[cfg(target_os = "espidf")]
    fn platform_rssi(&self) -> Option<i8> {
        let mut ap: esp_idf_svc::sys::wifi_ap_record_t = unsafe { core::mem::zeroed() };
        let rc = unsafe { esp_idf_svc::sys::esp_wifi_sta_get_ap_info(&mut ap) };
        (rc == esp_idf_svc::sys::ESP_OK).then_some(ap.rssi)
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_rssi(&self) -> Option<i8> {
        if !self.sim_associated {
            return None;
        }
        let wobble = (self.sim_attempts % 8) as i8 - 4;
        Some(-61_i8.saturating_add(wobble))
    }
}

#[cfg(not(target_os = "espidf"))]
impl Default for WifiRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl RadioPort for WifiRadio {
    fn associate(&mut self, ssid: &str, password: &str) -> Result<(), RadioError> {
        self.platform_associate(ssid, password)
    }

    fn is_associated(&self) -> bool {
        self.platform_is_associated()
    }

    fn disassociate(&mut self) {
        self.platform_disassociate();
    }

    fn rssi(&self) -> Option<i8> {
        self.platform_rssi()
    }
}
