//! Bridge identity as reported during discovery.

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};
use thiserror::Error;

/// Length of a bridge hardware identifier (the bridge's MAC address).
pub const IDENTIFIER_LEN: usize = 6;

/// Error returned when parsing an [`Identifier`] from its hex form.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentifierParseError {
    #[error("identifier must be {expected} hex digits, got {actual}")]
    WrongLength { expected: usize, actual: usize },
    #[error("invalid hex digit in identifier: {0:?}")]
    InvalidDigit(String),
}

/// Hardware identifier of a bridge, used as the subscription key.
///
/// Stored in the byte order the bridge reports it in discovery replies.  Some
/// request payloads carry it reversed; see [`Identifier::reversed`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Identifier([u8; IDENTIFIER_LEN]);

impl Identifier {
    pub const fn new(bytes: [u8; IDENTIFIER_LEN]) -> Self {
        Self(bytes)
    }

    /// Reads an identifier from the first [`IDENTIFIER_LEN`] bytes of `bytes`.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let head = bytes.get(..IDENTIFIER_LEN)?;
        let mut id = [0u8; IDENTIFIER_LEN];
        id.copy_from_slice(head);
        Some(Self(id))
    }

    pub fn as_bytes(&self) -> &[u8; IDENTIFIER_LEN] {
        &self.0
    }

    /// The position-dependent encoding used inside subscribe requests and
    /// discovery replies.  Applying it twice yields the original identifier.
    pub fn reversed(&self) -> Self {
        let mut bytes = self.0;
        bytes.reverse();
        Self(bytes)
    }

    /// `true` for the all-zero identifier sent by unconfigured ("ghost")
    /// devices.
    pub fn is_unset(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identifier({self})")
    }
}

impl FromStr for Identifier {
    type Err = IdentifierParseError;

    /// Parses 12 hex digits, optionally separated by `:` or `-`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: String = s.chars().filter(|c| *c != ':' && *c != '-').collect();
        if digits.len() != IDENTIFIER_LEN * 2 {
            return Err(IdentifierParseError::WrongLength {
                expected: IDENTIFIER_LEN * 2,
                actual: digits.len(),
            });
        }
        if !digits.is_ascii() {
            return Err(IdentifierParseError::InvalidDigit(s.to_string()));
        }
        let mut bytes = [0u8; IDENTIFIER_LEN];
        for (i, byte) in bytes.iter_mut().enumerate() {
            let pair = &digits[i * 2..i * 2 + 2];
            *byte = u8::from_str_radix(pair, 16)
                .map_err(|_| IdentifierParseError::InvalidDigit(pair.to_string()))?;
        }
        Ok(Self(bytes))
    }
}

impl Serialize for Identifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// What a bridge says it is in its discovery reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// Allone infrared bridge (model string starting with `IRD`).
    Infrared,
    /// Smart socket (model string starting with `SOC`).  Cannot learn or emit.
    Socket,
    Unknown,
}

impl DeviceKind {
    /// Classifies a device from the model field of its discovery reply.
    pub fn from_model(model: &[u8]) -> Self {
        if model.starts_with(b"IRD") {
            DeviceKind::Infrared
        } else if model.starts_with(b"SOC") {
            DeviceKind::Socket
        } else {
            DeviceKind::Unknown
        }
    }

    /// Whether learn and emit requests may be sent to this kind of device.
    /// Unknown kinds are given the benefit of the doubt.
    pub fn supports_infrared(self) -> bool {
        !matches!(self, DeviceKind::Socket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: Identifier = Identifier::new([0xAC, 0xCF, 0x23, 0x01, 0x02, 0x03]);

    #[test]
    fn test_reversed_reverses_byte_order() {
        assert_eq!(ID.reversed().as_bytes(), &[0x03, 0x02, 0x01, 0x23, 0xCF, 0xAC]);
    }

    #[test]
    fn test_reversed_twice_is_identity() {
        assert_eq!(ID.reversed().reversed(), ID);
    }

    #[test]
    fn test_display_is_lowercase_hex() {
        assert_eq!(ID.to_string(), "accf23010203");
    }

    #[test]
    fn test_parse_accepts_plain_and_colon_forms() {
        assert_eq!("accf23010203".parse::<Identifier>().unwrap(), ID);
        assert_eq!("AC:CF:23:01:02:03".parse::<Identifier>().unwrap(), ID);
    }

    #[test]
    fn test_parse_rejects_wrong_length() {
        assert_eq!(
            "accf23".parse::<Identifier>(),
            Err(IdentifierParseError::WrongLength {
                expected: 12,
                actual: 6
            })
        );
    }

    #[test]
    fn test_parse_rejects_non_hex() {
        assert!(matches!(
            "zzcf23010203".parse::<Identifier>(),
            Err(IdentifierParseError::InvalidDigit(_))
        ));
    }

    #[test]
    fn test_from_slice_requires_six_bytes() {
        assert!(Identifier::from_slice(&[1, 2, 3]).is_none());
        assert_eq!(
            Identifier::from_slice(&[0xAC, 0xCF, 0x23, 0x01, 0x02, 0x03, 0xFF]),
            Some(ID)
        );
    }

    #[test]
    fn test_is_unset_only_for_all_zero() {
        assert!(Identifier::new([0; 6]).is_unset());
        assert!(!ID.is_unset());
    }

    #[test]
    fn test_device_kind_from_model() {
        assert_eq!(DeviceKind::from_model(b"IRD005"), DeviceKind::Infrared);
        assert_eq!(DeviceKind::from_model(b"SOC002"), DeviceKind::Socket);
        assert_eq!(DeviceKind::from_model(b""), DeviceKind::Unknown);
    }

    #[test]
    fn test_only_sockets_refuse_infrared() {
        assert!(DeviceKind::Infrared.supports_infrared());
        assert!(DeviceKind::Unknown.supports_infrared());
        assert!(!DeviceKind::Socket.supports_infrared());
    }
}
