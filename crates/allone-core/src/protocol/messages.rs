//! Typed request and reply messages carried inside frames.
//!
//! A request and the reply to it share the same command code, so decoding is
//! direction-aware: [`Request::from_frame`] interprets a payload the way the
//! bridge does, [`Reply::from_frame`] the way this controller does.
//!
//! Payload layouts (`id` = identifier as reported, `rid` = identifier
//! reversed, `pad` = six ASCII spaces):
//!
//! ```text
//! discover request   (empty)
//! discover reply     0x00 id pad rid pad model[..6] trailer
//! subscribe request  id pad rid pad
//! subscribe reply    id pad reserved[5] state
//! enter-learn        id pad 0x01 0x00 0x00 0x00 0x00 0x00
//! learn reply        id pad header[6] code
//! emit               id pad 0x65 0x00 0x00 0x00 packet_id[2] code
//! emit ack           id ...
//! ```

use std::fmt;

use crate::domain::device::{DeviceKind, Identifier, IDENTIFIER_LEN};
use crate::protocol::codec::{decode_frame, Frame, ProtocolError};

// ── Protocol constants ────────────────────────────────────────────────────────

/// UDP port every bridge listens on.
pub const PROTOCOL_PORT: u16 = 10000;

/// Six ASCII spaces padding the identifier in most payloads.
pub const PADDING: [u8; 6] = [0x20; 6];

/// Flags following the identifier in an enter-learn request.
pub const LEARN_MODE_FLAGS: [u8; 6] = [0x01, 0x00, 0x00, 0x00, 0x00, 0x00];

/// Flags following the identifier in an emit request.
pub const EMIT_FLAGS: [u8; 4] = [0x65, 0x00, 0x00, 0x00];

/// Offset of the captured code inside a learn reply payload
/// (identifier + padding + 6 header bytes).
pub const LEARN_CODE_OFFSET: usize = IDENTIFIER_LEN + PADDING.len() + LEARN_MODE_FLAGS.len();

/// Length of the model field in a discovery reply.
pub const MODEL_LEN: usize = 6;

const ID_PAD: usize = IDENTIFIER_LEN + PADDING.len();
const DISCOVER_MODEL_OFFSET: usize = 1 + 2 * ID_PAD;
const SUBSCRIBE_RESERVED: usize = 5;

// ── Command codes ─────────────────────────────────────────────────────────────

/// The 2-byte command code of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandCode {
    /// `qa` – discovery request and reply.
    Discover,
    /// `cl` – subscription handshake.
    Subscribe,
    /// `dc` – power control (sockets); never sent by this controller.
    Control,
    /// `sf` – unsolicited state-change notification.
    SocketEvent,
    /// `ls` – enter learn mode / captured code.
    Learn,
    /// `ic` – emit an infrared code / emit acknowledgement.
    Emit,
    /// Anything else, kept so newer firmware does not break decoding.
    Unknown(u16),
}

impl CommandCode {
    pub const fn to_u16(self) -> u16 {
        match self {
            CommandCode::Discover => 0x7161,
            CommandCode::Subscribe => 0x636c,
            CommandCode::Control => 0x6463,
            CommandCode::SocketEvent => 0x7366,
            CommandCode::Learn => 0x6c73,
            CommandCode::Emit => 0x6963,
            CommandCode::Unknown(code) => code,
        }
    }

    pub const fn from_u16(value: u16) -> Self {
        match value {
            0x7161 => CommandCode::Discover,
            0x636c => CommandCode::Subscribe,
            0x6463 => CommandCode::Control,
            0x7366 => CommandCode::SocketEvent,
            0x6c73 => CommandCode::Learn,
            0x6963 => CommandCode::Emit,
            other => CommandCode::Unknown(other),
        }
    }
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandCode::Discover => f.write_str("discover"),
            CommandCode::Subscribe => f.write_str("subscribe"),
            CommandCode::Control => f.write_str("control"),
            CommandCode::SocketEvent => f.write_str("socket-event"),
            CommandCode::Learn => f.write_str("learn"),
            CommandCode::Emit => f.write_str("emit"),
            CommandCode::Unknown(code) => write!(f, "unknown(0x{code:04X})"),
        }
    }
}

// ── Requests (controller → bridge) ────────────────────────────────────────────

/// Every request this controller sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Discover,
    Subscribe { identifier: Identifier },
    EnterLearn { identifier: Identifier },
    Emit {
        identifier: Identifier,
        packet_id: u16,
        code: Vec<u8>,
    },
}

impl Request {
    pub fn command(&self) -> CommandCode {
        match self {
            Request::Discover => CommandCode::Discover,
            Request::Subscribe { .. } => CommandCode::Subscribe,
            Request::EnterLearn { .. } => CommandCode::Learn,
            Request::Emit { .. } => CommandCode::Emit,
        }
    }

    pub fn to_frame(&self) -> Frame {
        let mut payload = Vec::new();
        match self {
            Request::Discover => {}
            Request::Subscribe { identifier } => {
                push_id_pad(&mut payload, identifier);
                push_id_pad(&mut payload, &identifier.reversed());
            }
            Request::EnterLearn { identifier } => {
                push_id_pad(&mut payload, identifier);
                payload.extend_from_slice(&LEARN_MODE_FLAGS);
            }
            Request::Emit {
                identifier,
                packet_id,
                code,
            } => {
                push_id_pad(&mut payload, identifier);
                payload.extend_from_slice(&EMIT_FLAGS);
                payload.extend_from_slice(&packet_id.to_be_bytes());
                payload.extend_from_slice(code);
            }
        }
        Frame::new(self.command(), payload)
    }

    /// Encodes this request into a complete frame.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::FrameTooLarge`] for an oversized emit code.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        self.to_frame().encode()
    }

    /// Interprets a frame the way a bridge would.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedPayload`] when the payload is too
    /// short, the reversed identifier does not match, or the command code is
    /// not a request this controller sends.
    pub fn from_frame(frame: &Frame) -> Result<Self, ProtocolError> {
        let p = &frame.payload;
        match frame.command {
            CommandCode::Discover => Ok(Request::Discover),
            CommandCode::Subscribe => {
                require_len(p, 2 * ID_PAD, frame.command)?;
                let identifier = read_identifier(p, 0, frame.command)?;
                check_reversed(p, ID_PAD, &identifier, frame.command)?;
                Ok(Request::Subscribe { identifier })
            }
            CommandCode::Learn => {
                require_len(p, ID_PAD, frame.command)?;
                let identifier = read_identifier(p, 0, frame.command)?;
                Ok(Request::EnterLearn { identifier })
            }
            CommandCode::Emit => {
                let code_offset = ID_PAD + EMIT_FLAGS.len() + 2;
                require_len(p, code_offset, frame.command)?;
                let identifier = read_identifier(p, 0, frame.command)?;
                let id_off = ID_PAD + EMIT_FLAGS.len();
                let packet_id = u16::from_be_bytes([p[id_off], p[id_off + 1]]);
                Ok(Request::Emit {
                    identifier,
                    packet_id,
                    code: p[code_offset..].to_vec(),
                })
            }
            other => Err(malformed(other, "not a controller request")),
        }
    }

    /// Decodes a datagram as a request.
    ///
    /// # Errors
    ///
    /// Propagates frame-level and payload-level [`ProtocolError`]s.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Self::from_frame(&decode_frame(bytes)?)
    }
}

// ── Replies (bridge → controller) ─────────────────────────────────────────────

/// Reply to a broadcast discovery request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoverReply {
    pub identifier: Identifier,
    /// Model string such as `IRD005`; may be shorter than six bytes on
    /// truncated replies.
    pub model: Vec<u8>,
    /// Firmware-specific bytes after the model (clock, power state).
    pub trailer: Vec<u8>,
}

impl DiscoverReply {
    pub fn kind(&self) -> DeviceKind {
        DeviceKind::from_model(&self.model)
    }
}

/// Reply to a subscription request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeReply {
    pub identifier: Identifier,
    /// Last payload byte; the bridge's current power state.
    pub state: u8,
}

/// Reply to an enter-learn request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LearnReply {
    /// Learn mode is active but nothing has been captured yet.
    Waiting { identifier: Identifier },
    /// The bridge captured a code from a remote.
    Captured { identifier: Identifier, code: Vec<u8> },
}

impl LearnReply {
    pub fn identifier(&self) -> Identifier {
        match self {
            LearnReply::Waiting { identifier } | LearnReply::Captured { identifier, .. } => {
                *identifier
            }
        }
    }
}

/// Acknowledgement of an emit request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmitAck {
    pub identifier: Identifier,
}

/// Every reply a bridge can send, keyed by command code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Discover(DiscoverReply),
    Subscribe(SubscribeReply),
    Learn(LearnReply),
    EmitAck(EmitAck),
    /// Frames this controller does not interpret (control, socket events,
    /// unknown codes).  The payload is left opaque.
    Other(Frame),
}

impl Reply {
    pub fn command(&self) -> CommandCode {
        match self {
            Reply::Discover(_) => CommandCode::Discover,
            Reply::Subscribe(_) => CommandCode::Subscribe,
            Reply::Learn(_) => CommandCode::Learn,
            Reply::EmitAck(_) => CommandCode::Emit,
            Reply::Other(frame) => frame.command,
        }
    }

    pub fn to_frame(&self) -> Frame {
        let mut payload = Vec::new();
        match self {
            Reply::Discover(m) => {
                payload.push(0x00);
                push_id_pad(&mut payload, &m.identifier);
                push_id_pad(&mut payload, &m.identifier.reversed());
                payload.extend_from_slice(&m.model);
                payload.extend_from_slice(&m.trailer);
            }
            Reply::Subscribe(m) => {
                push_id_pad(&mut payload, &m.identifier);
                payload.extend_from_slice(&[0u8; SUBSCRIBE_RESERVED]);
                payload.push(m.state);
            }
            Reply::Learn(LearnReply::Waiting { identifier }) => {
                push_id_pad(&mut payload, identifier);
                payload.extend_from_slice(&LEARN_MODE_FLAGS);
            }
            Reply::Learn(LearnReply::Captured { identifier, code }) => {
                push_id_pad(&mut payload, identifier);
                payload.extend_from_slice(&LEARN_MODE_FLAGS);
                payload.extend_from_slice(code);
            }
            Reply::EmitAck(m) => {
                push_id_pad(&mut payload, &m.identifier);
            }
            Reply::Other(frame) => return frame.clone(),
        }
        Frame::new(self.command(), payload)
    }

    /// Encodes this reply into a complete frame.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::FrameTooLarge`] for an oversized payload.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        self.to_frame().encode()
    }

    /// Interprets a frame received from a bridge.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedPayload`] when a known reply kind has
    /// a payload too short to carry its fields, or a discovery reply's
    /// reversed identifier disagrees with its identifier.
    pub fn from_frame(frame: Frame) -> Result<Self, ProtocolError> {
        let command = frame.command;
        let p = &frame.payload;
        match command {
            CommandCode::Discover => {
                require_len(p, DISCOVER_MODEL_OFFSET, command)?;
                let identifier = read_identifier(p, 1, command)?;
                check_reversed(p, 1 + ID_PAD, &identifier, command)?;
                let model_end = p.len().min(DISCOVER_MODEL_OFFSET + MODEL_LEN);
                Ok(Reply::Discover(DiscoverReply {
                    identifier,
                    model: p[DISCOVER_MODEL_OFFSET..model_end].to_vec(),
                    trailer: p[model_end..].to_vec(),
                }))
            }
            CommandCode::Subscribe => {
                require_len(p, ID_PAD + 1, command)?;
                let identifier = read_identifier(p, 0, command)?;
                let state = p[p.len() - 1];
                Ok(Reply::Subscribe(SubscribeReply { identifier, state }))
            }
            CommandCode::Learn => {
                require_len(p, ID_PAD, command)?;
                let identifier = read_identifier(p, 0, command)?;
                if p.len() <= LEARN_CODE_OFFSET {
                    Ok(Reply::Learn(LearnReply::Waiting { identifier }))
                } else {
                    Ok(Reply::Learn(LearnReply::Captured {
                        identifier,
                        code: p[LEARN_CODE_OFFSET..].to_vec(),
                    }))
                }
            }
            CommandCode::Emit => {
                let identifier = read_identifier(p, 0, command)?;
                Ok(Reply::EmitAck(EmitAck { identifier }))
            }
            _ => Ok(Reply::Other(frame)),
        }
    }

    /// Decodes a datagram as a reply.
    ///
    /// # Errors
    ///
    /// Propagates frame-level and payload-level [`ProtocolError`]s.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Self::from_frame(decode_frame(bytes)?)
    }

    /// The bridge identifier this reply speaks for, if it carries one.
    pub fn identifier(&self) -> Option<Identifier> {
        match self {
            Reply::Discover(m) => Some(m.identifier),
            Reply::Subscribe(m) => Some(m.identifier),
            Reply::Learn(m) => Some(m.identifier()),
            Reply::EmitAck(m) => Some(m.identifier),
            Reply::Other(_) => None,
        }
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn push_id_pad(buf: &mut Vec<u8>, identifier: &Identifier) {
    buf.extend_from_slice(identifier.as_bytes());
    buf.extend_from_slice(&PADDING);
}

fn malformed(command: CommandCode, reason: impl Into<String>) -> ProtocolError {
    ProtocolError::MalformedPayload {
        command,
        reason: reason.into(),
    }
}

fn require_len(p: &[u8], min: usize, command: CommandCode) -> Result<(), ProtocolError> {
    if p.len() < min {
        return Err(malformed(
            command,
            format!("need at least {min} payload bytes, got {}", p.len()),
        ));
    }
    Ok(())
}

fn read_identifier(p: &[u8], offset: usize, command: CommandCode) -> Result<Identifier, ProtocolError> {
    p.get(offset..)
        .and_then(Identifier::from_slice)
        .ok_or_else(|| malformed(command, "payload too short for identifier"))
}

fn check_reversed(
    p: &[u8],
    offset: usize,
    identifier: &Identifier,
    command: CommandCode,
) -> Result<(), ProtocolError> {
    let reversed = read_identifier(p, offset, command)?;
    if reversed != identifier.reversed() {
        return Err(malformed(
            command,
            format!("reversed identifier {reversed} does not match {identifier}"),
        ));
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
