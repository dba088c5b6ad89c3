//! Binary codec for Allone bridge frames.
//!
//! # Wire format
//!
//! Every UDP datagram exchanged with a bridge is exactly one frame:
//!
//! ```text
//! ┌──────────────┬──────────────┬──────────────┬─────────────────────┐
//! │ magic (2 B)  │ length (2 B) │ command (2 B)│ payload (N B)       │
//! │ 0x68 0x64    │ big-endian   │ ASCII pair   │ command-specific    │
//! └──────────────┴──────────────┴──────────────┴─────────────────────┘
//! ```
//!
//! - **magic** is the ASCII text `hd`.  Anything else on the port is not a
//!   bridge frame.
//! - **length** is the *total* frame size, header included, as a big-endian
//!   `u16`.  An empty discovery request is therefore `68 64 00 06 71 61`.
//! - **command** is two ASCII letters (`qa`, `cl`, `dc`, `sf`, `ls`, `ic`)
//!   read as one big-endian `u16`; see [`CommandCode`].
//!
//! # Integrity
//!
//! There is no checksum.  UDP delivers whole datagrams or nothing, so the
//! only check the codec can make is that the declared length equals the
//! datagram size.  Truncated datagrams, concatenated datagrams and foreign
//! traffic that happens to start with `hd` all fail that check.
//!
//! This module only splits header from payload.  Turning the payload into a
//! typed request or reply is the job of [`messages`](crate::protocol::messages).

use thiserror::Error;

use crate::protocol::messages::CommandCode;

/// Marker opening every frame.
pub const MAGIC: [u8; 2] = [0x68, 0x64];

/// Size of the fixed frame header: magic (2) + length (2) + command (2).
pub const HEADER_SIZE: usize = 6;

/// Largest frame the 16-bit length field can describe.
pub const MAX_FRAME_SIZE: usize = u16::MAX as usize;

/// Errors that can occur during frame encoding or decoding.
///
/// Every decode variant means the datagram is a malformed frame: the engine
/// logs and drops it, it never reaches a caller.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The byte slice is shorter than the fixed header.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The first two bytes are not the frame marker.
    #[error("bad magic marker: {0:02X?}")]
    BadMagic([u8; 2]),

    /// The length field disagrees with the actual datagram size.
    #[error("frame length mismatch: header says {declared}, datagram is {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    /// The frame would not fit the 16-bit length field.
    #[error("frame too large: {0} bytes exceeds the 65535-byte limit")]
    FrameTooLarge(usize),

    /// The payload could not be parsed for its command code.
    #[error("malformed {command} payload: {reason}")]
    MalformedPayload { command: CommandCode, reason: String },
}

/// A single protocol message with its payload still opaque.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Which command this frame carries.  Unrecognised codes survive as
    /// [`CommandCode::Unknown`].
    pub command: CommandCode,
    /// Everything after the 6-byte header.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Wraps an already-built payload.
    pub fn new(command: CommandCode, payload: Vec<u8>) -> Self {
        Self { command, payload }
    }

    /// Total size of this frame on the wire.
    pub fn wire_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Encodes this frame.  See [`encode_frame`].
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::FrameTooLarge`] if the payload does not fit.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode_frame(self.command, &self.payload)
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a command code and payload into a complete frame.
///
/// # Errors
///
/// Returns [`ProtocolError::FrameTooLarge`] if header plus payload exceed
/// [`MAX_FRAME_SIZE`].
///
/// # Examples
///
/// ```rust
/// use allone_core::protocol::{decode_frame, encode_frame, CommandCode};
///
/// let bytes = encode_frame(CommandCode::Discover, &[]).unwrap();
/// assert_eq!(bytes, vec![0x68, 0x64, 0x00, 0x06, 0x71, 0x61]);
/// let frame = decode_frame(&bytes).unwrap();
/// assert_eq!(frame.command, CommandCode::Discover);
/// ```
pub fn encode_frame(command: CommandCode, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let total = HEADER_SIZE + payload.len();
    if total > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(total));
    }

    // The size check above guarantees the cast cannot truncate.
    let mut buf = Vec::with_capacity(total);
    buf.extend_from_slice(&MAGIC);
    buf.extend_from_slice(&(total as u16).to_be_bytes());
    buf.extend_from_slice(&command.to_u16().to_be_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Decodes one datagram into a [`Frame`].
///
/// Unknown command codes decode successfully as [`CommandCode::Unknown`] so
/// callers can skip frames from newer firmware without treating them as
/// garbage.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the datagram is shorter than the header, the
/// marker is wrong, or the length field disagrees with the datagram size.
pub fn decode_frame(bytes: &[u8]) -> Result<Frame, ProtocolError> {
    if bytes.len() < HEADER_SIZE {
        return Err(ProtocolError::InsufficientData {
            needed: HEADER_SIZE,
            available: bytes.len(),
        });
    }

    let magic = [bytes[0], bytes[1]];
    if magic != MAGIC {
        return Err(ProtocolError::BadMagic(magic));
    }

    let declared = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
    if declared != bytes.len() {
        return Err(ProtocolError::LengthMismatch {
            declared,
            actual: bytes.len(),
        });
    }

    let command = CommandCode::from_u16(u16::from_be_bytes([bytes[4], bytes[5]]));
    Ok(Frame {
        command,
        payload: bytes[HEADER_SIZE..].to_vec(),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_discover_matches_known_bytes() {
        // Arrange / Act
        let bytes = encode_frame(CommandCode::Discover, &[]).unwrap();

        // Assert
        assert_eq!(bytes, [0x68, 0x64, 0x00, 0x06, 0x71, 0x61]);
    }

    #[test]
    fn test_length_field_covers_whole_frame() {
        let bytes = encode_frame(CommandCode::Emit, &[0xAA; 40]).unwrap();
        let declared = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
        assert_eq!(declared, bytes.len());
        assert_eq!(declared, 46);
    }

    #[test]
    fn test_decode_recovers_command_and_payload() {
        // Arrange
        let payload = vec![1, 2, 3, 4, 5];
        let bytes = encode_frame(CommandCode::Learn, &payload).unwrap();

        // Act
        let frame = decode_frame(&bytes).unwrap();

        // Assert
        assert_eq!(frame.command, CommandCode::Learn);
        assert_eq!(frame.payload, payload);
        assert_eq!(frame.wire_len(), bytes.len());
    }

    #[test]
    fn test_decode_empty_input_is_insufficient_data() {
        assert_eq!(
            decode_frame(&[]),
            Err(ProtocolError::InsufficientData {
                needed: HEADER_SIZE,
                available: 0
            })
        );
    }

    #[test]
    fn test_decode_every_short_prefix_fails() {
        let bytes = encode_frame(CommandCode::Subscribe, &[9; 24]).unwrap();
        for len in 0..HEADER_SIZE {
            assert!(
                matches!(
                    decode_frame(&bytes[..len]),
                    Err(ProtocolError::InsufficientData { .. })
                ),
                "prefix of {len} bytes must be rejected"
            );
        }
    }

    #[test]
    fn test_decode_bad_magic_is_rejected() {
        let mut bytes = encode_frame(CommandCode::Discover, &[]).unwrap();
        bytes[0] = 0x00;
        assert_eq!(decode_frame(&bytes), Err(ProtocolError::BadMagic([0x00, 0x64])));
    }

    #[test]
    fn test_decode_truncated_frame_is_length_mismatch() {
        let bytes = encode_frame(CommandCode::Emit, &[0u8; 10]).unwrap();
        let result = decode_frame(&bytes[..bytes.len() - 1]);
        assert_eq!(
            result,
            Err(ProtocolError::LengthMismatch {
                declared: 16,
                actual: 15
            })
        );
    }

    #[test]
    fn test_decode_trailing_bytes_is_length_mismatch() {
        let mut bytes = encode_frame(CommandCode::Emit, &[0u8; 10]).unwrap();
        bytes.push(0xFF);
        assert!(matches!(
            decode_frame(&bytes),
            Err(ProtocolError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_decode_unknown_command_keeps_payload_opaque() {
        // Arrange: a frame with a command code this codec does not know.
        let bytes = [0x68, 0x64, 0x00, 0x08, 0xBE, 0xEF, 0x01, 0x02];

        // Act
        let frame = decode_frame(&bytes).unwrap();

        // Assert
        assert_eq!(frame.command, CommandCode::Unknown(0xBEEF));
        assert_eq!(frame.payload, vec![0x01, 0x02]);
    }

    #[test]
    fn test_encode_oversized_payload_fails() {
        let payload = vec![0u8; MAX_FRAME_SIZE];
        assert_eq!(
            encode_frame(CommandCode::Emit, &payload),
            Err(ProtocolError::FrameTooLarge(MAX_FRAME_SIZE + HEADER_SIZE))
        );
    }

    #[test]
    fn test_encode_largest_payload_succeeds() {
        let payload = vec![0u8; MAX_FRAME_SIZE - HEADER_SIZE];
        let bytes = encode_frame(CommandCode::Emit, &payload).unwrap();
        assert_eq!(bytes.len(), MAX_FRAME_SIZE);
        assert_eq!(decode_frame(&bytes).unwrap().payload.len(), payload.len());
    }

    #[test]
    fn test_frame_encode_method_matches_free_function() {
        let frame = Frame::new(CommandCode::Control, vec![7, 7]);
        assert_eq!(
            frame.encode().unwrap(),
            encode_frame(CommandCode::Control, &[7, 7]).unwrap()
        );
    }
}
