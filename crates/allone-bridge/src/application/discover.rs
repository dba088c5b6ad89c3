//! Discovery service: broadcast a discovery frame and refresh the registry.
//!
//! # How discovery works
//!
//! 1. A discovery request (an empty `qa` frame) is broadcast to the subnet on
//!    the fixed protocol port.
//! 2. Every bridge answers with a unicast discovery reply carrying its
//!    hardware identifier (forwards and reversed) and its model string.
//! 3. For the whole listen window each valid reply upserts the registry.
//!    Duplicate replies collapse in the upsert; garbage and our own broadcast
//!    echo fail to decode and are dropped.
//! 4. The registry snapshot at the end of the window is the result.  Zero
//!    replies is a valid, empty result, not an error.
//!
//! Discovery links all bind the same listen port, so rounds never overlap:
//! a round started while another is running waits for it to finish.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use allone_core::{Reply, Request};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::application::error::EngineError;
use crate::application::exchange::{recv_matching, send_request};
use crate::application::ports::{LinkPurpose, Transport};
use crate::application::registry::{Device, SharedRegistry};

/// Broadcasts discovery requests and records the bridges that answer.
pub struct DiscoveryService {
    transport: Arc<dyn Transport>,
    registry: SharedRegistry,
    broadcast: SocketAddr,
    /// Held for the duration of one round.
    round: Mutex<()>,
}

impl DiscoveryService {
    pub fn new(transport: Arc<dyn Transport>, registry: SharedRegistry, broadcast: SocketAddr) -> Self {
        Self {
            transport,
            registry,
            broadcast,
            round: Mutex::new(()),
        }
    }

    /// Runs one discovery round lasting `window`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Transport`] if the broadcast socket cannot be
    /// opened or the request cannot be sent.
    pub async fn discover(&self, window: Duration) -> Result<Vec<Device>, EngineError> {
        let _round = self.round.lock().await;
        let mut link = self.transport.open(LinkPurpose::Discovery).await?;
        send_request(link.as_mut(), &Request::Discover, self.broadcast).await?;
        debug!("discovery broadcast to {}, listening for {window:?}", self.broadcast);

        let deadline = Instant::now() + window;
        let mut replies = 0usize;
        loop {
            let next = recv_matching(link.as_mut(), deadline, |reply, src| match reply {
                Reply::Discover(m) => Some((m, src)),
                _ => None,
            })
            .await?;

            let Some((reply, src)) = next else { break };
            if reply.identifier.is_unset() {
                debug!("skipping ghost discovery reply from {src}");
                continue;
            }
            replies += 1;
            let kind = reply.kind();
            let device = self
                .registry
                .write()
                .await
                .upsert(src, reply.identifier, kind);
            debug!(
                "discovered {} at {} ({:?})",
                device.identifier, device.address, device.kind
            );
        }

        let devices = self.registry.read().await.list();
        info!(
            "discovery finished: {replies} replies, {} known devices",
            devices.len()
        );
        Ok(devices)
    }
}
