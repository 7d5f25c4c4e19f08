//! Output drivers: the status LED and the blink patterns it plays.

pub mod led_patterns;
pub mod status_led;
