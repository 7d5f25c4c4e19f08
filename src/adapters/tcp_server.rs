//! Single-client TCP server.
//!
//! The byte channel under the push server. It binds a non-blocking
//! listener and holds at most one client socket at a time; a second
//! client waits in the backlog until the first one leaves.
//!
//! ESP-IDF ships a `std` with lwIP-backed `std::net`, so the same code
//! runs on the device and on the host.
//!
//! ## Connection model
//!
//! 1. `bind()` opens the listener (non-blocking).
//! 2. `accept()` polls for a client; on success the state becomes
//!    `Connected`.
//! 3. `read()` never blocks: `Ok(0)` means no data yet.
//! 4. `write()` never blocks either: it reports how many bytes the
//!    socket took, which may be fewer than offered.
//! 5. `disconnect()` drops the client and returns to `Listening`.

use core::fmt;
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};

use log::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// The listener could not be opened.
    Bind,
    /// Socket I/O failed; the client has been dropped.
    Io,
    /// No client is connected.
    NotConnected,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bind => write!(f, "could not bind listener"),
            Self::Io => write!(f, "socket I/O error"),
            Self::NotConnected => write!(f, "no client connected"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Closed,
    Listening,
    Connected,
}

pub struct TcpServer {
    addr: SocketAddr,
    state: ServerState,
    listener: Option<TcpListener>,
    stream: Option<TcpStream>,
    clients_served: u32,
}

impl TcpServer {
    /// A server for `addr`. Nothing is bound until [`bind`](Self::bind).
    /// Port 0 lets the OS pick; see [`local_addr`](Self::local_addr).
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            state: ServerState::Closed,
            listener: None,
            stream: None,
            clients_served: 0,
        }
    }

    pub fn bind(&mut self) -> Result<(), TransportError> {
        let listener = TcpListener::bind(self.addr).map_err(|e| {
            warn!("TCP: bind {} failed: {}", self.addr, e);
            TransportError::Bind
        })?;
        listener
            .set_nonblocking(true)
            .map_err(|_| TransportError::Bind)?;
        if let Ok(local) = listener.local_addr() {
            info!("TCP: listening on {}", local);
        }
        self.listener = Some(listener);
        self.state = ServerState::Listening;
        Ok(())
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn clients_served(&self) -> u32 {
        self.clients_served
    }

    /// The bound address, once listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Poll for a client. Returns `true` when one was just accepted.
    pub fn accept(&mut self) -> bool {
        if self.state != ServerState::Listening {
            return false;
        }
        let Some(listener) = self.listener.as_ref() else {
            return false;
        };
        match listener.accept() {
            Ok((stream, addr)) => {
                if stream.set_nonblocking(true).is_err() {
                    warn!("TCP: could not make client socket non-blocking");
                    return false;
                }
                let _ = stream.set_nodelay(true);
                info!("TCP: client connected from {}", addr);
                self.stream = Some(stream);
                self.state = ServerState::Connected;
                self.clients_served = self.clients_served.saturating_add(1);
                true
            }
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => false,
            Err(e) => {
                warn!("TCP: accept error: {}", e);
                false
            }
        }
    }

    /// Non-blocking read. `Ok(0)` means nothing pending; EOF drops the
    /// client and reports `NotConnected`.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        match stream.read(buf) {
            Ok(0) => {
                info!("TCP: client closed the connection");
                self.drop_client();
                Err(TransportError::NotConnected)
            }
            Ok(n) => Ok(n),
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => Ok(0),
            Err(ref e) if e.kind() == ErrorKind::Interrupted => Ok(0),
            Err(e) => {
                warn!("TCP: read error: {}", e);
                self.drop_client();
                Err(TransportError::Io)
            }
        }
    }

    /// Non-blocking write. Returns how many leading bytes of `data` the
    /// socket accepted; the caller keeps the rest. A hard error drops the
    /// client.
    pub fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        let mut written = 0;
        while written < data.len() {
            match stream.write(&data[written..]) {
                Ok(0) => {
                    self.drop_client();
                    return Err(TransportError::Io);
                }
                Ok(n) => written += n,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => {}
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("TCP: write error: {}", e);
                    self.drop_client();
                    return Err(TransportError::Io);
                }
            }
        }
        Ok(written)
    }

    /// Drop the current client and go back to listening.
    pub fn disconnect(&mut self) {
        if self.stream.is_some() {
            info!("TCP: client disconnected");
        }
        self.drop_client();
    }

    /// Drop the client and the listener.
    pub fn close(&mut self) {
        self.stream = None;
        self.listener = None;
        self.state = ServerState::Closed;
    }

    fn drop_client(&mut self) {
        if let Some(s) = self.stream.take() {
            let _ = s.shutdown(std::net::Shutdown::Both);
        }
        if self.listener.is_some() {
            self.state = ServerState::Listening;
        }
    }
}
