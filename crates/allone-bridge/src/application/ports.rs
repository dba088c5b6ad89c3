//! Abstractions the engine depends on.
//!
//! - [`Transport`] / [`Link`] – datagram I/O.  Every engine operation opens
//!   its own [`Link`], so concurrent operations never read each other's
//!   replies.
//! - [`CommandStore`] – the external store mapping a code name to its raw
//!   bytes.

use std::io;
use std::net::SocketAddr;

use allone_core::IrCodeName;
use async_trait::async_trait;
use thiserror::Error;

/// What a [`Link`] will be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPurpose {
    /// Broadcast a discovery request and listen for replies from any bridge.
    Discovery,
    /// Unicast exchange with a single bridge.
    Unicast,
}

/// Opens datagram endpoints.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Opens a fresh endpoint for one operation.
    async fn open(&self, purpose: LinkPurpose) -> io::Result<Box<dyn Link>>;
}

/// One datagram endpoint, owned by a single operation.
///
/// `recv_from` may wait forever; callers bound it with a deadline.
#[async_trait]
pub trait Link: Send {
    async fn send_to(&mut self, datagram: &[u8], target: SocketAddr) -> io::Result<()>;
    async fn recv_from(&mut self) -> io::Result<(Vec<u8>, SocketAddr)>;
}

/// Error type for command store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error accessing command {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("command store unavailable: {0}")]
    Unavailable(String),
}

/// Storage for learned codes, keyed by name.
///
/// Names are validated before they reach the store.
#[cfg_attr(test, mockall::automock)]
pub trait CommandStore: Send + Sync {
    /// Returns the raw bytes stored under `name`, or `None` if absent.
    fn get(&self, name: &IrCodeName) -> Result<Option<Vec<u8>>, StoreError>;

    /// Stores `raw` under `name`, replacing any previous code.
    fn put(&self, name: &IrCodeName, raw: &[u8]) -> Result<(), StoreError>;

    /// Names available for `device`.  Stores that do not scope codes per
    /// device return every name for any argument.
    fn list_names(&self, device: Option<SocketAddr>) -> Result<Vec<String>, StoreError>;
}
