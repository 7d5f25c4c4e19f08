//! Roast controller: the read / publish cycle.
//!
//! ```text
//!  Starting ──▶ ConnectingNetwork ──▶ Running ⇄ Degraded ──▶ Stopped
//!      │              (network sinks)                          ▲
//!      └──────────── fatal init error ─────────────────────────┘
//! ```
//!
//! One reading is in flight at a time. Each cycle:
//!
//! 1. Re-check the link (network sinks only) and bring it back if it
//!    dropped. If that fails the cycle is skipped and the controller is
//!    `Degraded`.
//! 2. Read the thermocouple.
//! 3. Valid reading: hand it to the sink. A dropped session gets one
//!    reconnect-and-retry; any remaining error drops the reading.
//! 4. Faulted reading: fault pattern, and a fault status on the first
//!    faulted cycle and every `fault_status_every_n_cycles` after that.
//! 5. Wait for the next tick. Ticks are scheduled on absolute time so
//!    the period does not drift with the work done in a cycle.
//!
//! While waiting, the controller wakes every [`WAIT_SLICE_MS`] to let
//! the sink do housekeeping (the push server accepts clients here) and
//! to advance the LED pattern.

use core::task::Poll;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiDevice;
use log::{debug, error, info, warn};

use crate::config::Configuration;
use crate::error::{InitError, LinkError, SensorFault, SinkError, StartupError};
use crate::indicator::{Condition, StatusIndicator};
use crate::network::NetworkLink;
use crate::sensors::thermocouple::Max31855;

use super::ports::{LinkStatus, RadioPort, SinkPort, TimePort};
use super::reading::{DeviceState, DeviceStatus, Reading};

/// External stop request for [`RoastController::run`].
pub type StopSignal = Signal<CriticalSectionRawMutex, ()>;

/// Longest uninterrupted sleep inside a wait.
pub const WAIT_SLICE_MS: u64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Starting,
    ConnectingNetwork,
    Running,
    Degraded,
    Stopped,
}

/// What one cycle did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CycleOutcome {
    /// The reading reached the sink.
    Sent(Reading),
    /// The reading was valid but the sink refused it; it was dropped.
    DispatchFailed(SinkError),
    /// The sensor reported a fault; nothing was dispatched.
    SensorFault(SensorFault),
    /// The link could not be restored; the cycle was skipped.
    LinkDown(LinkError),
}

pub struct RoastController<S, R, SPI, P, T> {
    sink: S,
    link: Option<NetworkLink<R>>,
    sensor: Max31855<SPI>,
    indicator: StatusIndicator<P>,
    clock: T,
    state: ControllerState,
    device_id: heapless::String<32>,
    interval_ms: u64,
    fault_status_every: u32,
    cycles: u64,
    /// Faulted cycles since the last good reading.
    fault_streak: u32,
    /// Failed reads or dispatches since the last successful dispatch.
    consecutive_errors: u32,
    reported: Option<DeviceState>,
}

impl<S, R, SPI, P, T> RoastController<S, R, SPI, P, T>
where
    S: SinkPort,
    R: RadioPort,
    SPI: SpiDevice,
    P: OutputPin,
    T: TimePort,
{
    pub fn new(
        config: &Configuration,
        sink: S,
        link: Option<NetworkLink<R>>,
        sensor: Max31855<SPI>,
        indicator: StatusIndicator<P>,
        clock: T,
    ) -> Self {
        Self {
            sink,
            link,
            sensor,
            indicator,
            clock,
            state: ControllerState::Starting,
            device_id: config.device_id.clone(),
            interval_ms: config.read_interval_ms(),
            fault_status_every: config.fault_status_every_n_cycles.max(1),
            cycles: 0,
            fault_streak: 0,
            consecutive_errors: 0,
            reported: None,
        }
    }

    // ── Accessors ─────────────────────────────────────────────

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn link(&self) -> Option<&NetworkLink<R>> {
        self.link.as_ref()
    }

    pub fn link_mut(&mut self) -> Option<&mut NetworkLink<R>> {
        self.link.as_mut()
    }

    pub fn indicator(&self) -> &StatusIndicator<P> {
        &self.indicator
    }

    pub fn clock(&self) -> &T {
        &self.clock
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    // ── Startup ───────────────────────────────────────────────

    /// Bring up the link (if the sink needs one) and initialise the sink.
    ///
    /// An unreachable network is retried until it comes up or `stop`
    /// fires. Sink initialisation failures are fatal: the sink is
    /// cleaned up, the fault pattern is shown and the error returned.
    pub async fn start(&mut self, stop: &StopSignal) -> Result<(), StartupError> {
        if self.state != ControllerState::Starting {
            return Err(StartupError::Init(InitError::InvalidLifecycle));
        }
        info!("Controller: starting ({} sink)", self.sink.name());
        self.indicator.show(Condition::Connecting, self.clock.uptime_ms());

        let result = if self.sink.requires_network() {
            self.state = ControllerState::ConnectingNetwork;
            if !self.connect_until_up(stop).await {
                info!("Controller: stop requested during startup");
                self.shutdown();
                return Ok(());
            }
            let link = self.link.as_ref().map(|l| l as &dyn LinkStatus);
            self.sink.initialize(link)
        } else {
            self.sink.initialize(None)
        };
        let result = match result {
            Ok(()) => self.sink_ready().await.map_err(InitError::NotReady),
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            let e = StartupError::from(e);
            error!("Controller: startup failed: {}", e);
            self.shutdown();
            self.indicator.show(Condition::Fault, self.clock.uptime_ms());
            return Err(e);
        }

        let now = self.clock.uptime_ms();
        if self.sink.requires_network() {
            self.indicator.show(Condition::JustConnected, now);
        } else {
            self.indicator.show(Condition::Idle, now);
        }
        self.state = ControllerState::Running;
        info!("Controller: running, one reading every {} ms", self.interval_ms);
        Ok(())
    }

    /// Returns `false` if `stop` fired first.
    async fn connect_until_up(&mut self, stop: &StopSignal) -> bool {
        loop {
            let Some(link) = self.link.as_mut() else {
                // No credentials configured; the sink will refuse to start.
                return true;
            };
            match link.ensure_connected(&self.clock).await {
                Ok(()) => return true,
                Err(LinkError::NoCredentials) => return true,
                Err(e) => {
                    warn!("Controller: network not up yet ({}), retrying", e);
                    let pause = link.current_backoff_ms();
                    let deadline = self.clock.uptime_ms().saturating_add(pause);
                    if self.wait_until(deadline, stop).await {
                        return false;
                    }
                }
            }
        }
    }

    // ── Main loop ─────────────────────────────────────────────

    /// Run cycles until `stop` fires, then shut down.
    pub async fn run(&mut self, stop: &StopSignal) {
        if self.state == ControllerState::Stopped {
            return;
        }
        self.emit_status(DeviceState::Good, Some("starting"));

        let mut next_tick = self.clock.uptime_ms();
        loop {
            if stop.signaled() {
                break;
            }
            self.run_cycle().await;

            next_tick = next_tick.saturating_add(self.interval_ms);
            let now = self.clock.uptime_ms();
            if now >= next_tick.saturating_add(self.interval_ms) {
                let missed = (now - next_tick) / self.interval_ms + 1;
                warn!("Controller: fell behind, skipping {} tick(s)", missed);
                next_tick += missed * self.interval_ms;
            }
            if self.wait_until(next_tick, stop).await {
                break;
            }
        }

        info!("Controller: stop requested");
        self.shutdown();
    }

    /// One read / dispatch cycle.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        self.cycles = self.cycles.wrapping_add(1);

        if let Err(e) = self.check_link().await {
            return CycleOutcome::LinkDown(e);
        }

        let reading = self.sensor.read(self.clock.uptime_secs());
        match reading.fault {
            None => self.handle_valid(reading).await,
            Some(fault) => self.handle_fault(reading, fault),
        }
    }

    async fn check_link(&mut self) -> Result<(), LinkError> {
        if !self.sink.requires_network() {
            return Ok(());
        }
        let Some(link) = self.link.as_mut() else {
            return Ok(());
        };
        if link.refresh() {
            self.indicator.show(Condition::Connecting, self.clock.uptime_ms());
        }
        if link.is_connected() {
            return Ok(());
        }

        self.indicator.show(Condition::Connecting, self.clock.uptime_ms());
        match link.ensure_connected(&self.clock).await {
            Ok(()) => {
                self.indicator.show(Condition::JustConnected, self.clock.uptime_ms());
                let recovered = match self.sink.recover(&*link) {
                    Ok(()) => self.sink_ready().await,
                    Err(e) => Err(e),
                };
                if let Err(e) = recovered {
                    warn!("Controller: sink did not recover: {}", e);
                }
                if self.state == ControllerState::Degraded {
                    info!("Controller: network restored");
                    self.state = ControllerState::Running;
                }
                Ok(())
            }
            Err(e) => {
                if self.state != ControllerState::Degraded {
                    warn!("Controller: network unavailable ({}), degraded", e);
                }
                self.state = ControllerState::Degraded;
                self.reported = Some(DeviceState::Disconnected);
                self.note_error();
                self.indicator.show(Condition::Fault, self.clock.uptime_ms());
                Err(e)
            }
        }
    }

    async fn handle_valid(&mut self, reading: Reading) -> CycleOutcome {
        if self.fault_streak > 0 {
            info!("Controller: sensor recovered after {} faulted cycles", self.fault_streak);
            self.fault_streak = 0;
        }
        match self.dispatch(&reading).await {
            Ok(()) => {
                self.indicator.show(Condition::DataSent, self.clock.uptime_ms());
                self.consecutive_errors = 0;
                if self.reported != Some(DeviceState::Good) {
                    self.emit_status(DeviceState::Good, Some("recovered"));
                }
                debug!(
                    "Controller: {:.2} °C sent (cycle {})",
                    reading.temperature_celsius, self.cycles
                );
                CycleOutcome::Sent(reading)
            }
            Err(e) => {
                warn!("Controller: reading dropped: {}", e);
                self.indicator.show(Condition::Fault, self.clock.uptime_ms());
                self.note_error();
                CycleOutcome::DispatchFailed(e)
            }
        }
    }

    fn handle_fault(&mut self, reading: Reading, fault: SensorFault) -> CycleOutcome {
        warn!("Sensor: {}", fault);
        self.indicator.show(Condition::Fault, self.clock.uptime_ms());
        self.note_error();
        if self.fault_streak % self.fault_status_every == 0 {
            let status = DeviceStatus::new(&self.device_id, DeviceState::Fault, reading.timestamp)
                .with_reason(fault.as_str());
            match self.sink.output_status(&status) {
                Ok(()) => self.reported = Some(DeviceState::Fault),
                Err(e) => debug!("Controller: fault status not delivered: {}", e),
            }
        }
        self.fault_streak = self.fault_streak.saturating_add(1);
        CycleOutcome::SensorFault(fault)
    }

    /// Output a reading; a dropped session gets one reconnect and retry.
    async fn dispatch(&mut self, reading: &Reading) -> Result<(), SinkError> {
        match self.sink.output_reading(reading) {
            Err(SinkError::Disconnected) => {}
            other => return other,
        }
        let Some(link) = self.link.as_mut() else {
            return Err(SinkError::Disconnected);
        };
        info!("Controller: sink disconnected, reconnecting once");
        link.refresh();
        link.ensure_connected(&self.clock)
            .await
            .map_err(|_| SinkError::Disconnected)?;
        self.sink.recover(&*link)?;
        self.sink_ready().await?;
        self.sink.output_reading(reading)
    }

    /// Wait for a remote session to come up, keeping the LED alive.
    /// The sink bounds the wait with its own connect timeout.
    async fn sink_ready(&mut self) -> Result<(), SinkError> {
        loop {
            match self.sink.poll_ready() {
                Poll::Ready(result) => return result,
                Poll::Pending => {
                    let now = self.clock.uptime_ms();
                    self.indicator.tick(now);
                    self.clock.sleep_until(now.saturating_add(WAIT_SLICE_MS)).await;
                }
            }
        }
    }

    fn note_error(&mut self) {
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        if self.consecutive_errors > 1 {
            warn!("Controller: {} consecutive errors", self.consecutive_errors);
        }
    }

    fn emit_status(&mut self, state: DeviceState, reason: Option<&'static str>) {
        let mut status = DeviceStatus::new(&self.device_id, state, self.clock.uptime_secs());
        if let Some(reason) = reason {
            status = status.with_reason(reason);
        }
        match self.sink.output_status(&status) {
            Ok(()) => self.reported = Some(state),
            Err(e) => debug!("Controller: status '{}' not delivered: {}", state.as_str(), e),
        }
    }

    /// Sleep until `deadline_ms` in short slices, servicing the sink and
    /// the LED. Returns `true` if `stop` fired.
    async fn wait_until(&mut self, deadline_ms: u64, stop: &StopSignal) -> bool {
        loop {
            self.sink.poll();
            let now = self.clock.uptime_ms();
            self.indicator.tick(now);
            if stop.signaled() {
                return true;
            }
            if now >= deadline_ms {
                return false;
            }
            let slice_end = deadline_ms.min(now.saturating_add(WAIT_SLICE_MS));
            self.clock.sleep_until(slice_end).await;
        }
    }

    // ── Shutdown ──────────────────────────────────────────────

    /// Announce shutdown, release the sink and drop the link. Runs once.
    pub fn shutdown(&mut self) {
        if self.state == ControllerState::Stopped {
            return;
        }
        if matches!(self.state, ControllerState::Running | ControllerState::Degraded) {
            self.emit_status(DeviceState::Disconnected, Some("shutdown"));
        }
        self.sink.cleanup();
        if let Some(link) = self.link.as_mut() {
            link.disconnect();
        }
        self.indicator.show(Condition::Idle, self.clock.uptime_ms());
        self.state = ControllerState::Stopped;
        info!("Controller: stopped after {} cycles", self.cycles);
    }

    /// Keep the fault pattern playing until `stop` fires. Used after a
    /// fatal startup error, when no sink is available to report it.
    pub async fn hold_fault(&mut self, stop: &StopSignal) {
        self.indicator.show(Condition::Fault, self.clock.uptime_ms());
        loop {
            let now = self.clock.uptime_ms();
            self.indicator.tick(now);
            if stop.signaled() {
                return;
            }
            self.clock.sleep_until(now.saturating_add(WAIT_SLICE_MS)).await;
        }
    }
}
