//! Push server: streams readings to a roast-profiling client (Artisan)
//! over a WebSocket.
//!
//! One client at a time. Every valid reading is pushed as a single text
//! frame:
//!
//! ```json
//! {"id": 7, "data": {"temp1": 201.25, "temp2": 0.0}}
//! ```
//!
//! `id` is a sequence that starts at 1 and advances only when a frame
//! was committed to the client. With no client attached a reading is
//! dropped and the call still succeeds.
//!
//! Writes never block. Whatever the socket does not take stays queued
//! and is flushed from `poll()`, so a frame always reaches the client
//! whole. While a queued tail is pending, new readings are dropped with
//! `WriteFailed` rather than interleaved. The client may also poll: a text frame with
//! a JSON `id` is answered at once with the latest reading under that
//! id, outside the push sequence.

use std::net::SocketAddr;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::adapters::tcp_server::{TcpServer, TransportError};
use crate::app::ports::{LinkStatus, SinkLifecycle, SinkPort};
use crate::app::reading::{DeviceStatus, Reading, TempUnit};
use crate::config::PushServerConfig;
use crate::error::{InitError, SinkError};

use super::websocket::{self, HandshakeError, MAX_FRAME_PAYLOAD, MAX_HANDSHAKE_LEN, Opcode};

const READ_CHUNK: usize = 512;
const MAX_INBOX: usize = MAX_HANDSHAKE_LEN + MAX_FRAME_PAYLOAD;
/// Queued outbound bytes beyond which a client that stopped reading is
/// dropped.
const MAX_BACKLOG: usize = 16 * 1024;

#[derive(Serialize)]
struct PushData {
    temp1: f32,
    temp2: f32,
}

#[derive(Serialize)]
struct PushFrame {
    id: u64,
    data: PushData,
}

#[derive(Deserialize)]
struct ClientRequest {
    #[serde(default)]
    id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    NoClient,
    Handshaking,
    Open,
}

pub struct PushServerSink {
    server: TcpServer,
    unit: TempUnit,
    lifecycle: SinkLifecycle,
    phase: Phase,
    inbox: Vec<u8>,
    /// Encoded bytes the socket has not taken yet.
    out: Vec<u8>,
    next_id: u64,
    /// Last valid reading, used to answer client requests.
    latest: Option<Reading>,
    messages_this_client: u32,
}

impl PushServerSink {
    pub fn new(config: PushServerConfig, unit: TempUnit) -> Self {
        Self {
            server: TcpServer::new(SocketAddr::new(config.host, config.port)),
            unit,
            lifecycle: SinkLifecycle::Uninitialized,
            phase: Phase::NoClient,
            inbox: Vec::new(),
            out: Vec::new(),
            next_id: 1,
            latest: None,
            messages_this_client: 0,
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.local_addr()
    }

    /// A client has completed the WebSocket handshake.
    pub fn has_client(&self) -> bool {
        self.phase == Phase::Open
    }

    pub fn clients_served(&self) -> u32 {
        self.server.clients_served()
    }

    /// Outbound bytes still waiting for the client to read.
    pub fn pending_bytes(&self) -> usize {
        self.out.len()
    }

    /// Sequence id the next pushed frame will carry.
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    fn drop_client(&mut self, why: &str) {
        info!(
            "Push: client #{} gone ({}), {} messages",
            self.server.clients_served(),
            why,
            self.messages_this_client
        );
        self.server.disconnect();
        self.phase = Phase::NoClient;
        self.inbox.clear();
        self.out.clear();
        self.messages_this_client = 0;
    }

    /// Pull whatever the client has sent into the inbox.
    fn fill_inbox(&mut self) -> Result<(), TransportError> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let n = self.server.read(&mut chunk)?;
            if n == 0 {
                return Ok(());
            }
            self.inbox.extend_from_slice(&chunk[..n]);
            if self.inbox.len() > MAX_INBOX {
                return Err(TransportError::Io);
            }
        }
    }

    /// Hand queued bytes to the socket. Whatever it does not take stays
    /// at the front of the queue.
    fn flush(&mut self) -> Result<(), TransportError> {
        if self.out.is_empty() {
            return Ok(());
        }
        let n = self.server.write(&self.out)?;
        self.out.drain(..n);
        Ok(())
    }

    /// Queue one whole frame behind anything still pending, then flush.
    fn send_frame(&mut self, opcode: Opcode, payload: &[u8]) -> Result<(), TransportError> {
        if self.out.len() > MAX_BACKLOG {
            return Err(TransportError::Io);
        }
        websocket::encode_frame(opcode, payload, &mut self.out);
        self.flush()
    }

    fn temp_for_client(&self) -> f32 {
        self.latest.map_or(0.0, |r| r.in_unit(self.unit))
    }

    fn frame_json(id: u64, temp1: f32) -> Result<String, SinkError> {
        let frame = PushFrame {
            id,
            data: PushData { temp1, temp2: 0.0 },
        };
        serde_json::to_string(&frame).map_err(|_| SinkError::WriteFailed)
    }

    fn try_handshake(&mut self) {
        let response = match websocket::parse_upgrade_request(&self.inbox) {
            Ok(key) => websocket::upgrade_response(key),
            Err(HandshakeError::Incomplete) => return,
            Err(e) => {
                warn!("Push: bad handshake: {}", e);
                self.drop_client("handshake rejected");
                return;
            }
        };
        let end = websocket::find_header_end(&self.inbox).unwrap_or(self.inbox.len());
        self.inbox.drain(..end);
        self.out.extend_from_slice(response.as_bytes());
        if self.flush().is_err() {
            self.drop_client("handshake write failed");
            return;
        }
        self.phase = Phase::Open;
        info!("Push: client #{} handshake complete", self.server.clients_served());
    }

    fn service_frames(&mut self) {
        while self.phase == Phase::Open {
            let (frame, used) = match websocket::decode_frame(&self.inbox) {
                Ok(Some(decoded)) => decoded,
                Ok(None) => return,
                Err(e) => {
                    warn!("Push: {}", e);
                    let _ = self.send_frame(Opcode::Close, &[]);
                    self.drop_client("protocol error");
                    return;
                }
            };
            self.inbox.drain(..used);
            self.messages_this_client = self.messages_this_client.saturating_add(1);

            match frame.opcode {
                Opcode::Ping => {
                    debug!("Push: ping");
                    if self.send_frame(Opcode::Pong, &frame.payload).is_err() {
                        self.drop_client("pong failed");
                    }
                }
                Opcode::Close => {
                    info!("Push: close frame received");
                    let _ = self.send_frame(Opcode::Close, &[]);
                    self.drop_client("closed by client");
                }
                Opcode::Text => self.answer_request(&frame.payload),
                Opcode::Pong | Opcode::Binary | Opcode::Continuation => {}
            }
        }
    }

    fn answer_request(&mut self, payload: &[u8]) {
        let request: ClientRequest = match serde_json::from_slice(payload) {
            Ok(r) => r,
            Err(_) => {
                warn!("Push: unparseable client request ({} bytes)", payload.len());
                return;
            }
        };
        debug!("Push: request id {}", request.id);
        let Ok(json) = Self::frame_json(request.id, self.temp_for_client()) else {
            return;
        };
        if self.send_frame(Opcode::Text, json.as_bytes()).is_err() {
            self.drop_client("reply failed");
        }
    }
}

impl SinkPort for PushServerSink {
    fn name(&self) -> &'static str {
        "push_server"
    }

    fn requires_network(&self) -> bool {
        true
    }

    fn lifecycle(&self) -> SinkLifecycle {
        self.lifecycle
    }

    fn initialize(&mut self, link: Option<&dyn LinkStatus>) -> Result<(), InitError> {
        if self.lifecycle != SinkLifecycle::Uninitialized {
            return Err(InitError::InvalidLifecycle);
        }
        if !link.is_some_and(|l| l.is_connected()) {
            return Err(InitError::NetworkRequired);
        }
        self.server.bind().map_err(|_| InitError::Bind)?;
        self.lifecycle = SinkLifecycle::Active;
        if let Some(addr) = self.server.local_addr() {
            info!("Push: waiting for a client on ws://{}", addr);
        }
        Ok(())
    }

    fn output_reading(&mut self, reading: &Reading) -> Result<(), SinkError> {
        if !matches!(self.lifecycle, SinkLifecycle::Active | SinkLifecycle::Degraded) {
            return Err(SinkError::NotConnected);
        }
        if reading.is_valid {
            self.latest = Some(*reading);
        }
        if self.phase != Phase::Open {
            return Ok(());
        }

        if let Err(e) = self.flush() {
            warn!("Push: send failed: {}", e);
            self.lifecycle = SinkLifecycle::Degraded;
            self.drop_client("write failed");
            return Err(SinkError::WriteFailed);
        }
        if !self.out.is_empty() {
            warn!("Push: client behind by {} bytes, reading dropped", self.out.len());
            self.lifecycle = SinkLifecycle::Degraded;
            return Err(SinkError::WriteFailed);
        }

        let temp1 = reading.in_unit(self.unit);
        let json = Self::frame_json(self.next_id, temp1)?;
        match self.send_frame(Opcode::Text, json.as_bytes()) {
            Ok(()) => {
                debug!("Push: {}", json);
                self.next_id += 1;
                self.lifecycle = SinkLifecycle::Active;
                Ok(())
            }
            Err(e) => {
                warn!("Push: send failed: {}", e);
                self.lifecycle = SinkLifecycle::Degraded;
                self.drop_client("write failed");
                Err(SinkError::WriteFailed)
            }
        }
    }

    fn output_status(&mut self, status: &DeviceStatus) -> Result<(), SinkError> {
        // The wire format has no status message.
        debug!("Push: status {} ({:?})", status.state.as_str(), status.reason);
        Ok(())
    }

    fn poll(&mut self) {
        if !matches!(self.lifecycle, SinkLifecycle::Active | SinkLifecycle::Degraded) {
            return;
        }
        if self.phase == Phase::NoClient {
            if !self.server.accept() {
                return;
            }
            self.phase = Phase::Handshaking;
            self.inbox.clear();
            self.out.clear();
            self.messages_this_client = 0;
        }
        if self.flush().is_err() {
            self.drop_client("write failed");
            return;
        }
        match self.fill_inbox() {
            Ok(()) => {}
            Err(TransportError::NotConnected) => {
                self.drop_client("disconnected");
                return;
            }
            Err(_) => {
                self.drop_client("read error");
                return;
            }
        }
        if self.phase == Phase::Handshaking {
            self.try_handshake();
        }
        self.service_frames();
    }

    fn cleanup(&mut self) {
        if self.lifecycle == SinkLifecycle::CleanedUp {
            return;
        }
        if self.phase == Phase::Open {
            let _ = self.send_frame(Opcode::Close, &[]);
        }
        self.server.close();
        self.phase = Phase::NoClient;
        self.inbox = Vec::new();
        self.out = Vec::new();
        self.lifecycle = SinkLifecycle::CleanedUp;
        info!("Push: server stopped");
    }
}
