//! Output sinks: where readings go.
//!
//! Exactly one sink is active per run, chosen by `output_mode`:
//!
//! | Mode          | Sink              | Needs network |
//! |---------------|-------------------|---------------|
//! | `console`     | [`ConsoleSink`]   | no            |
//! | `broker`      | [`BrokerSink`]    | yes           |
//! | `push_server` | [`PushServerSink`]| yes           |
//!
//! The set is closed, so [`OutputSink`] is a plain enum that forwards
//! each [`SinkPort`] call to its variant.

pub mod broker;
pub mod console;
pub mod push_server;
pub mod websocket;

pub use broker::BrokerSink;
pub use console::ConsoleSink;
pub use push_server::PushServerSink;

use core::task::Poll;

use crate::app::ports::{BrokerSession, LinkStatus, SinkLifecycle, SinkPort};
use crate::app::reading::{DeviceStatus, Reading};
use crate::config::{Configuration, OutputMode};
use crate::error::{ConfigError, InitError, SinkError};

pub enum OutputSink<B> {
    Console(ConsoleSink),
    Broker(BrokerSink<B>),
    PushServer(PushServerSink),
}

impl<B: BrokerSession> OutputSink<B> {
    /// Build the sink for `config.output_mode`. `session` is only used
    /// in broker mode.
    pub fn from_config(config: &Configuration, session: B) -> Result<Self, ConfigError> {
        Ok(match config.output_mode {
            OutputMode::Console => Self::Console(ConsoleSink::stdout(config.preferred_unit)),
            OutputMode::Broker => {
                let broker = config
                    .broker
                    .clone()
                    .ok_or(ConfigError::MissingField("mqtt_broker"))?;
                Self::Broker(BrokerSink::new(session, broker, &config.device_id))
            }
            OutputMode::PushServer => {
                Self::PushServer(PushServerSink::new(config.push_server, config.preferred_unit))
            }
        })
    }
}

macro_rules! dispatch {
    ($self:ident, $sink:ident => $body:expr) => {
        match $self {
            OutputSink::Console($sink) => $body,
            OutputSink::Broker($sink) => $body,
            OutputSink::PushServer($sink) => $body,
        }
    };
}

impl<B: BrokerSession> SinkPort for OutputSink<B> {
    fn name(&self) -> &'static str {
        dispatch!(self, s => s.name())
    }

    fn requires_network(&self) -> bool {
        dispatch!(self, s => s.requires_network())
    }

    fn lifecycle(&self) -> SinkLifecycle {
        dispatch!(self, s => s.lifecycle())
    }

    fn initialize(&mut self, link: Option<&dyn LinkStatus>) -> Result<(), InitError> {
        dispatch!(self, s => s.initialize(link))
    }

    fn output_reading(&mut self, reading: &Reading) -> Result<(), SinkError> {
        dispatch!(self, s => s.output_reading(reading))
    }

    fn output_status(&mut self, status: &DeviceStatus) -> Result<(), SinkError> {
        dispatch!(self, s => s.output_status(status))
    }

    fn recover(&mut self, link: &dyn LinkStatus) -> Result<(), SinkError> {
        dispatch!(self, s => s.recover(link))
    }

    fn poll_ready(&mut self) -> Poll<Result<(), SinkError>> {
        dispatch!(self, s => s.poll_ready())
    }

    fn poll(&mut self) {
        dispatch!(self, s => s.poll())
    }

    fn cleanup(&mut self) {
        dispatch!(self, s => s.cleanup())
    }
}
