//! Minimal RFC 6455 server side: opening handshake and frame codec.
//!
//! Just enough WebSocket for one roast-logging client: text frames out,
//! and ping/pong/close plus the occasional text request in. Fragmented
//! messages and extensions are not negotiated.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |            (16/64)            |
//! |N|V|V|V|       |S|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |                 Masking key (client frames only)              |
//! +---------------------------------------------------------------+
//! ```

use core::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

/// Magic value appended to the client key before hashing.
pub const ACCEPT_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Largest handshake request we buffer.
pub const MAX_HANDSHAKE_LEN: usize = 2048;

/// Largest inbound frame payload we accept.
pub const MAX_FRAME_PAYLOAD: usize = 4096;

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeError {
    /// The header block has not fully arrived yet.
    Incomplete,
    /// The request exceeds [`MAX_HANDSHAKE_LEN`].
    TooLarge,
    /// Not a `GET` request line.
    NotGet,
    /// No `Upgrade: websocket` header.
    NotUpgrade,
    /// No `Sec-WebSocket-Key` header.
    MissingKey,
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Incomplete => write!(f, "handshake incomplete"),
            Self::TooLarge => write!(f, "handshake request too large"),
            Self::NotGet => write!(f, "handshake is not a GET request"),
            Self::NotUpgrade => write!(f, "missing 'Upgrade: websocket' header"),
            Self::MissingKey => write!(f, "missing Sec-WebSocket-Key header"),
        }
    }
}

/// `Sec-WebSocket-Accept` value for a client key.
pub fn accept_key(client_key: &str) -> String {
    let mut sha = sha1_smol::Sha1::new();
    sha.update(client_key.trim().as_bytes());
    sha.update(ACCEPT_GUID.as_bytes());
    STANDARD.encode(sha.digest().bytes())
}

/// Extract the client key from a complete upgrade request.
pub fn parse_upgrade_request(request: &[u8]) -> Result<&str, HandshakeError> {
    let Some(end) = find_header_end(request) else {
        return Err(if request.len() > MAX_HANDSHAKE_LEN {
            HandshakeError::TooLarge
        } else {
            HandshakeError::Incomplete
        });
    };
    let head = core::str::from_utf8(&request[..end]).map_err(|_| HandshakeError::NotGet)?;
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or("");
    if !request_line.starts_with("GET ") {
        return Err(HandshakeError::NotGet);
    }

    let mut upgrade = false;
    let mut key = None;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        let value = value.trim();
        if name.eq_ignore_ascii_case("upgrade") && value.eq_ignore_ascii_case("websocket") {
            upgrade = true;
        } else if name.eq_ignore_ascii_case("sec-websocket-key") && !value.is_empty() {
            key = Some(value);
        }
    }
    if !upgrade {
        return Err(HandshakeError::NotUpgrade);
    }
    key.ok_or(HandshakeError::MissingKey)
}

/// The `101 Switching Protocols` response for `client_key`.
pub fn upgrade_response(client_key: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        accept_key(client_key)
    )
}

/// Byte offset just past the blank line ending the header block.
pub fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    const fn bits(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
        }
    }

    const fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0x0 => Some(Self::Continuation),
            0x1 => Some(Self::Text),
            0x2 => Some(Self::Binary),
            0x8 => Some(Self::Close),
            0x9 => Some(Self::Ping),
            0xA => Some(Self::Pong),
            _ => None,
        }
    }

    pub const fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Reserved opcode, RSV bits set, or an oversized control frame.
    Protocol,
    /// Client frames must be masked.
    Unmasked,
    /// Payload exceeds [`MAX_FRAME_PAYLOAD`].
    TooLarge,
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Protocol => write!(f, "websocket protocol violation"),
            Self::Unmasked => write!(f, "unmasked client frame"),
            Self::TooLarge => write!(f, "frame payload too large"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

/// Append an unmasked, final server frame to `out`.
pub fn encode_frame(opcode: Opcode, payload: &[u8], out: &mut Vec<u8>) {
    out.push(0x80 | opcode.bits());
    let len = payload.len();
    if len < 126 {
        out.push(len as u8);
    } else if let Ok(len16) = u16::try_from(len) {
        out.push(126);
        out.extend_from_slice(&len16.to_be_bytes());
    } else {
        out.push(127);
        out.extend_from_slice(&(len as u64).to_be_bytes());
    }
    out.extend_from_slice(payload);
}

/// Decode one masked client frame from the front of `buf`.
///
/// `Ok(None)` means more bytes are needed. On success returns the frame
/// and the number of bytes consumed.
pub fn decode_frame(buf: &[u8]) -> Result<Option<(Frame, usize)>, FrameError> {
    if buf.len() < 2 {
        return Ok(None);
    }
    let fin = buf[0] & 0x80 != 0;
    if buf[0] & 0x70 != 0 {
        return Err(FrameError::Protocol);
    }
    let opcode = Opcode::from_bits(buf[0] & 0x0F).ok_or(FrameError::Protocol)?;
    if buf[1] & 0x80 == 0 {
        return Err(FrameError::Unmasked);
    }

    let mut pos = 2;
    let len = match buf[1] & 0x7F {
        126 => {
            let Some(b) = buf.get(2..4) else { return Ok(None) };
            pos = 4;
            u64::from(u16::from_be_bytes([b[0], b[1]]))
        }
        127 => {
            let Some(b) = buf.get(2..10) else { return Ok(None) };
            pos = 10;
            let mut be = [0u8; 8];
            be.copy_from_slice(b);
            u64::from_be_bytes(be)
        }
        n => u64::from(n),
    };
    if opcode.is_control() && (len > 125 || !fin) {
        return Err(FrameError::Protocol);
    }
    let len = usize::try_from(len).map_err(|_| FrameError::TooLarge)?;
    if len > MAX_FRAME_PAYLOAD {
        return Err(FrameError::TooLarge);
    }

    let Some(mask) = buf.get(pos..pos + 4) else {
        return Ok(None);
    };
    let mask = [mask[0], mask[1], mask[2], mask[3]];
    pos += 4;
    let Some(body) = buf.get(pos..pos + len) else {
        return Ok(None);
    };
    let payload = body
        .iter()
        .enumerate()
        .map(|(i, b)| b ^ mask[i % 4])
        .collect();

    Ok(Some((Frame { fin, opcode, payload }, pos + len)))
}
