//! Engine error type.
//!
//! Malformed or foreign datagrams never appear here: the receive loops log and
//! drop them.  Every variant below is a structured failure the caller can
//! render and retry.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use allone_core::{DeviceKind, IrCodeNameError, ProtocolError};
use thiserror::Error;

use crate::application::ports::StoreError;

/// Error type for `discover`, `learn` and `send`.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The requested address is not a known bridge, even after discovery.
    #[error("no bridge known at {0}")]
    DeviceNotFound(IpAddr),

    /// No address was given and discovery found no bridge.
    #[error("no bridge found on the network")]
    NoDevices,

    #[error("subscription to {address} failed: {reason}")]
    SubscriptionFailed { address: SocketAddr, reason: String },

    /// Another learn session or send batch holds the device.
    #[error("bridge {0} is busy with another operation")]
    DeviceBusy(SocketAddr),

    #[error("no code captured by {address} within {waited:?}")]
    LearnTimeout { address: SocketAddr, waited: Duration },

    #[error("{address} did not acknowledge {command}")]
    SendTimeout { address: SocketAddr, command: String },

    /// One or more names in a batch have no stored code.  Nothing was sent.
    #[error("unknown command(s): {}", .0.join(", "))]
    CommandNotFound(Vec<String>),

    /// Every known bridge was tried and none accepted the batch.
    #[error("no bridge accepted the batch: {}", .0.join("; "))]
    NoDeviceAccepted(Vec<String>),

    #[error("bridge {address} is a {kind:?} device and cannot handle infrared")]
    UnsupportedDevice { address: SocketAddr, kind: DeviceKind },

    #[error(transparent)]
    InvalidName(#[from] IrCodeNameError),

    #[error("command store error: {0}")]
    Store(#[from] StoreError),

    /// A request could not be encoded (oversized stored code).
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
}
