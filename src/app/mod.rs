//! Application core: domain logic with no direct I/O.
//!
//! Readings, status events, the port traits, and the
//! [`RoastController`](controller::RoastController) that ties them
//! together. All interaction with hardware and the network happens
//! through the traits in [`ports`].

pub mod controller;
pub mod ports;
pub mod reading;
