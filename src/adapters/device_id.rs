//! Device identity derived from the factory MAC address.
//!
//! Produces a stable id of the form `pico-xxyyzz` (last 3 bytes of the
//! 6-byte MAC, lowercase hex). It is used when `device_id` is absent
//! from the settings and ends up in MQTT topics, so it only contains
//! characters valid in a topic level.

use core::fmt::Write;

/// `pico-xxyyzz` is 11 bytes.
pub type DeviceIdString = heapless::String<16>;

pub type MacAddress = [u8; 6];

/// Read the factory MAC address from eFuse.
#[cfg(target_os = "espidf")]
pub fn read_mac() -> MacAddress {
    let mut mac: MacAddress = [0u8; 6];
    unsafe {
        esp_idf_svc::sys::esp_efuse_mac_get_default(mac.as_mut_ptr());
    }
    mac
}

/// Simulation: a fixed, locally administered MAC.
#[cfg(not(target_os = "espidf"))]
pub fn read_mac() -> MacAddress {
    [0x02, 0x00, 0x00, 0x1C, 0x0F, 0xEE]
}

pub fn device_id(mac: &MacAddress) -> DeviceIdString {
    let mut id = DeviceIdString::new();
    let _ = write!(id, "pico-{:02x}{:02x}{:02x}", mac[3], mac[4], mac[5]);
    id
}

/// Id of the board we are running on.
pub fn local_device_id() -> DeviceIdString {
    device_id(&read_mac())
}
