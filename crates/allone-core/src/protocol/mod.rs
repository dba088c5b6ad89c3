//! Protocol module containing the frame codec, typed messages and the packet
//! id counter.

pub mod codec;
pub mod messages;
pub mod sequence;

pub use codec::{decode_frame, encode_frame, Frame, ProtocolError};
pub use messages::*;
pub use sequence::PacketIdCounter;
