//! Monotonic clock adapter.
//!
//! - **`target_os = "espidf"`**: `esp_timer_get_time()`, the ESP-IDF
//!   high-resolution timer (microsecond precision, monotonic).
//! - **`not(target_os = "espidf")`**: `std::time::Instant` for host runs.
//!
//! Waits are `async_io_mini::Timer`s so the executor can run other work
//! (the push server's accept loop) while the controller sleeps.

use core::future::Future;
use core::time::Duration;

use async_io_mini::Timer;

use crate::app::ports::TimePort;

pub struct SystemClock {
    #[cfg(not(target_os = "espidf"))]
    start: std::time::Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            #[cfg(not(target_os = "espidf"))]
            start: std::time::Instant::now(),
        }
    }

    /// Microseconds since boot.
    #[cfg(target_os = "espidf")]
    pub fn uptime_us(&self) -> u64 {
        (unsafe { esp_idf_svc::sys::esp_timer_get_time() }) as u64
    }

    /// Microseconds since this clock was created.
    #[cfg(not(target_os = "espidf"))]
    pub fn uptime_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }
}

impl TimePort for SystemClock {
    fn uptime_ms(&self) -> u64 {
        self.uptime_us() / 1_000
    }

    fn sleep_until(&self, deadline_ms: u64) -> impl Future<Output = ()> {
        let remaining = deadline_ms.saturating_sub(self.uptime_ms());
        async move {
            if remaining > 0 {
                Timer::after(Duration::from_millis(remaining)).await;
            }
        }
    }
}
