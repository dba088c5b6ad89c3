//! # allone-core
//!
//! Shared library for the Allone bridge controller containing the UDP wire
//! protocol codec and the domain types that travel through it.
//!
//! This crate has zero dependencies on OS APIs or network sockets; the
//! `allone-bridge` crate owns every socket and every timer.
//!
//! # Architecture overview
//!
//! An Allone bridge is a small network appliance with an infrared LED and an
//! infrared receiver.  It speaks a binary protocol over UDP port 10000:
//!
//! - **`protocol`** – How bytes travel over the network.  Every datagram is a
//!   frame with a 6-byte header (magic, length, command code) followed by a
//!   command-specific payload.  The payload is decoded into a typed
//!   [`Request`] or [`Reply`] variant keyed by the command code.
//!
//! - **`domain`** – The values the engine reasons about: the bridge's hardware
//!   [`Identifier`], its [`DeviceKind`], and the caller-chosen
//!   [`IrCodeName`] under which a learned code is stored.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `allone_core::Identifier` instead of `allone_core::domain::device::Identifier`.
pub use domain::device::{DeviceKind, Identifier, IdentifierParseError, IDENTIFIER_LEN};
pub use domain::ir_code::{parse_name_list, IrCode, IrCodeName, IrCodeNameError};
pub use protocol::codec::{decode_frame, encode_frame, Frame, ProtocolError};
pub use protocol::messages::{CommandCode, Reply, Request};
