//! Device registry: the engine's in-memory table of known bridges.
//!
//! Entries are keyed by hardware [`Identifier`], not by address: a bridge
//! that re-acquires a different DHCP lease keeps its single entry and only
//! its address changes.  The table is never persisted; after a restart
//! discovery rebuilds it and every device starts unsubscribed.
//!
//! # Device lifecycle
//!
//! ```text
//! discovery reply ──► upsert (subscribed = false)
//!                        │
//!          ensure_subscribed ──► subscribed = true, last_seen refreshed
//!                        │
//!   bridge forgot session / address changed ──► subscribed = false
//! ```
//!
//! The registry is stored behind an async `RwLock` ([`SharedRegistry`]) so
//! discovery and subscription updates are serialized while readers always get
//! a consistent snapshot.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use allone_core::{DeviceKind, Identifier};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;

/// Error type for registry lookups.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("device not found: {0}")]
    NotFound(IpAddr),
}

/// One known bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Device {
    pub address: SocketAddr,
    pub identifier: Identifier,
    pub kind: DeviceKind,
    /// `true` only after a subscription handshake completed with this
    /// process.  Mutated exclusively by the subscription manager.
    pub subscribed: bool,
    /// Most recent successful exchange.
    #[serde(serialize_with = "serialize_unix_secs")]
    pub last_seen: SystemTime,
}

fn serialize_unix_secs<S: serde::Serializer>(t: &SystemTime, s: S) -> Result<S::Ok, S::Error> {
    let secs = t
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    s.serialize_u64(secs)
}

/// Registry shared between concurrent engine operations.
pub type SharedRegistry = Arc<RwLock<DeviceRegistry>>;

/// In-memory table of known bridges, in first-seen order.
///
/// A `Vec` keeps the order devices were first discovered, which is the order
/// the dispatcher tries them in when no address is given.  Bridge counts on a
/// LAN are small, so linear lookups are fine.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Vec<Device>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedRegistry {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Registers or refreshes a device and returns the stored entry.
    ///
    /// - Same identifier, same address: `last_seen` and `kind` refresh,
    ///   subscription state is kept.
    /// - Same identifier, new address: the address is updated in place and
    ///   the subscription is dropped.
    /// - Any other entry already holding `address` under a different
    ///   identifier is removed; the hardware at that address was replaced.
    pub fn upsert(&mut self, address: SocketAddr, identifier: Identifier, kind: DeviceKind) -> Device {
        let now = SystemTime::now();
        self.devices
            .retain(|d| d.address != address || d.identifier == identifier);

        if let Some(device) = self.devices.iter_mut().find(|d| d.identifier == identifier) {
            if device.address != address {
                device.address = address;
                device.subscribed = false;
            }
            if kind != DeviceKind::Unknown {
                device.kind = kind;
            }
            device.last_seen = now;
            return device.clone();
        }

        let device = Device {
            address,
            identifier,
            kind,
            subscribed: false,
            last_seen: now,
        };
        self.devices.push(device.clone());
        device
    }

    /// Looks a device up by IP address.  The protocol port is fixed, so the
    /// IP alone identifies the endpoint.
    pub fn get(&self, ip: IpAddr) -> Result<Device, RegistryError> {
        self.devices
            .iter()
            .find(|d| d.address.ip() == ip)
            .cloned()
            .ok_or(RegistryError::NotFound(ip))
    }

    pub fn find_by_identifier(&self, identifier: Identifier) -> Option<Device> {
        self.devices
            .iter()
            .find(|d| d.identifier == identifier)
            .cloned()
    }

    /// Snapshot of every known device in first-seen order.
    pub fn list(&self) -> Vec<Device> {
        self.devices.clone()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Records the outcome of a subscription exchange.
    pub(crate) fn set_subscribed(&mut self, identifier: Identifier, subscribed: bool) {
        if let Some(device) = self.devices.iter_mut().find(|d| d.identifier == identifier) {
            device.subscribed = subscribed;
            if subscribed {
                device.last_seen = SystemTime::now();
            }
        }
    }

    /// Refreshes `last_seen` after a successful learn or emit exchange.
    pub(crate) fn touch(&mut self, identifier: Identifier) {
        if let Some(device) = self.devices.iter_mut().find(|d| d.identifier == identifier) {
            device.last_seen = SystemTime::now();
        }
    }
}
