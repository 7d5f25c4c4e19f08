//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter      | Implements     | Connects to                 |
//! |--------------|----------------|-----------------------------|
//! | `wifi`       | RadioPort      | ESP-IDF WiFi STA            |
//! | `mqtt`       | BrokerSession  | ESP-IDF MQTT client         |
//! | `tcp_server` | (push server)  | lwIP / host `std::net`      |
//! | `time`       | TimePort       | ESP32 high-resolution timer |
//! | `device_id`  |                | eFuse factory MAC           |

pub mod device_id;
pub mod mqtt;
pub mod tcp_server;
pub mod time;
pub mod wifi;
