//! Roast monitor firmware library.
//!
//! Exposes the pure-logic modules for integration testing. All
//! ESP-IDF-specific code is guarded by `#[cfg(target_os = "espidf")]`
//! within each module; on the host the adapters run as simulations.

#![deny(unused_must_use)]

pub mod app;
pub mod config;
pub mod error;
pub mod indicator;
pub mod network;
pub mod pins;

pub mod adapters;
pub mod drivers;
pub mod sensors;
pub mod sinks;
