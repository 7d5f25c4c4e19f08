//! Wireless link supervision.
//!
//! [`NetworkLink`] owns the link state and the retry policy; the radio
//! itself sits behind [`RadioPort`] and only knows how to make one
//! association attempt.
//!
//! ```text
//!  Disconnected ──ensure_connected──▶ Connecting ──ok──▶ Connected
//!        ▲                              │    ▲              │
//!        │        fail (first attempt)  ▼    │ retry        │ refresh()
//!        │                         ColdBootRetry            │ sees drop
//!        └──────── fail (backoff) ─────────────────────────-┘
//! ```
//!
//! The very first association after power-on can report "network not
//! found" while the AP is present. That failure gets one quick retry
//! that does not count against the attempt budget.
//!
//! The last few state transitions are kept for diagnostics
//! ([`NetworkLink::recent_states`]).

use heapless::Deque;
use log::{debug, info, warn};

use crate::app::ports::{LinkStatus, RadioPort, TimePort};
use crate::config::truncated;
use crate::error::LinkError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    ColdBootRetry,
}

/// Capped exponential backoff between association attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial_ms: u64,
    pub max_ms: u64,
    /// Attempts per `ensure_connected()` call before giving up.
    pub max_attempts: u32,
    /// Fixed wait before the cold-boot retry.
    pub cold_boot_delay_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_ms: 1_000,
            max_ms: 30_000,
            max_attempts: 5,
            cold_boot_delay_ms: 250,
        }
    }
}

/// Transitions remembered by [`NetworkLink::recent_states`].
pub const STATE_HISTORY: usize = 8;

pub struct NetworkLink<R> {
    radio: R,
    state: LinkState,
    policy: BackoffPolicy,
    ssid: heapless::String<32>,
    password: heapless::String<64>,
    backoff_ms: u64,
    cold_boot_pending: bool,
    /// Association attempts since power-on, cold-boot retry included.
    total_attempts: u32,
    last_rssi: Option<i8>,
    history: Deque<LinkState, STATE_HISTORY>,
}

impl<R: RadioPort> NetworkLink<R> {
    pub fn new(radio: R, ssid: &str, password: &str, policy: BackoffPolicy) -> Self {
        Self {
            radio,
            state: LinkState::Disconnected,
            policy,
            ssid: truncated(ssid),
            password: truncated(password),
            backoff_ms: policy.initial_ms,
            cold_boot_pending: true,
            total_attempts: 0,
            last_rssi: None,
            history: Deque::new(),
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// States entered most recently, oldest first.
    pub fn recent_states(&self) -> impl Iterator<Item = LinkState> + '_ {
        self.history.iter().copied()
    }

    fn set_state(&mut self, next: LinkState) {
        if next == self.state {
            return;
        }
        debug!("WiFi: {:?} -> {:?}", self.state, next);
        self.state = next;
        if self.history.is_full() {
            self.history.pop_front();
        }
        let _ = self.history.push_back(next);
    }

    pub fn total_attempts(&self) -> u32 {
        self.total_attempts
    }

    /// Delay that will be used after the next ordinary failure.
    pub fn current_backoff_ms(&self) -> u64 {
        self.backoff_ms
    }

    /// Signal strength recorded at the last successful association.
    pub fn rssi(&self) -> Option<i8> {
        self.last_rssi
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    /// Bring the link up, or confirm it is already up.
    ///
    /// Returns [`LinkError::Unavailable`] after `max_attempts` ordinary
    /// failures within this call. Every wait goes through `clock`.
    pub async fn ensure_connected<T: TimePort>(&mut self, clock: &T) -> Result<(), LinkError> {
        if self.ssid.is_empty() {
            return Err(LinkError::NoCredentials);
        }
        if self.state == LinkState::Connected && self.radio.is_associated() {
            return Ok(());
        }

        let mut failures: u32 = 0;
        loop {
            self.set_state(LinkState::Connecting);
            self.total_attempts = self.total_attempts.saturating_add(1);
            info!("WiFi: connecting to '{}'", self.ssid);

            let first_after_boot = core::mem::replace(&mut self.cold_boot_pending, false);
            match self.radio.associate(&self.ssid, &self.password) {
                Ok(()) => {
                    self.set_state(LinkState::Connected);
                    self.backoff_ms = self.policy.initial_ms;
                    self.last_rssi = self.radio.rssi();
                    match self.last_rssi {
                        Some(rssi) => info!("WiFi: connected (RSSI {} dBm)", rssi),
                        None => info!("WiFi: connected"),
                    }
                    return Ok(());
                }
                Err(e) if first_after_boot => {
                    warn!("WiFi: first attempt after boot failed ({}), retrying", e);
                    self.set_state(LinkState::ColdBootRetry);
                    clock.sleep_ms(self.policy.cold_boot_delay_ms).await;
                }
                Err(e) => {
                    failures += 1;
                    self.set_state(LinkState::Disconnected);
                    if failures >= self.policy.max_attempts {
                        warn!("WiFi: giving up after {} attempts ({})", failures, e);
                        return Err(LinkError::Unavailable { attempts: failures });
                    }
                    warn!(
                        "WiFi: attempt {} failed ({}), retrying in {} ms",
                        failures, e, self.backoff_ms
                    );
                    clock.sleep_ms(self.backoff_ms).await;
                    self.backoff_ms = (self.backoff_ms * 2).min(self.policy.max_ms);
                }
            }
        }
    }

    /// Re-check the radio. Returns `true` when a drop was detected.
    pub fn refresh(&mut self) -> bool {
        if self.state == LinkState::Connected && !self.radio.is_associated() {
            warn!("WiFi: connection lost");
            self.set_state(LinkState::Disconnected);
            self.last_rssi = None;
            return true;
        }
        if self.state == LinkState::Connected {
            self.last_rssi = self.radio.rssi().or(self.last_rssi);
            debug!("WiFi: link ok (RSSI {:?})", self.last_rssi);
        }
        false
    }

    pub fn disconnect(&mut self) {
        if self.state != LinkState::Disconnected {
            self.radio.disassociate();
            info!("WiFi: disconnected");
        }
        self.set_state(LinkState::Disconnected);
        self.last_rssi = None;
    }
}

impl<R: RadioPort> LinkStatus for NetworkLink<R> {
    fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }
}
