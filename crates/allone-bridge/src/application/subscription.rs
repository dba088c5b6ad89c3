//! Subscription manager.
//!
//! A bridge ignores learn and emit requests from a controller that has not
//! subscribed to it.  The subscription is short-lived on the bridge side and
//! never persisted here, so the engine re-subscribes opportunistically:
//!
//! - [`SubscriptionManager::ensure_subscribed`] is called before every learn
//!   or emit batch and is a no-op when the registry already marks the device
//!   as subscribed.
//! - [`SubscriptionManager::invalidate`] is called when an exchange shows the
//!   bridge forgot the session; the next operation subscribes again.
//!
//! This module is the only writer of `Device::subscribed`.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use allone_core::{Identifier, Reply, Request};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::application::error::EngineError;
use crate::application::exchange::{recv_matching, send_request};
use crate::application::ports::Link;
use crate::application::registry::{Device, SharedRegistry};

/// Performs and tracks subscription handshakes.
pub struct SubscriptionManager {
    registry: SharedRegistry,
    timeout: Duration,
    /// Bridges misbehave when subscribed to more often than this.
    min_interval: Duration,
    last_attempt: Mutex<HashMap<Identifier, Instant>>,
}

impl SubscriptionManager {
    pub fn new(registry: SharedRegistry, timeout: Duration, min_interval: Duration) -> Self {
        Self {
            registry,
            timeout,
            min_interval,
            last_attempt: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribes to `device` over `link` unless the registry says it already
    /// is.  Returns the up-to-date registry entry.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::SubscriptionFailed`] if no subscribe reply
    /// arrives from the device within the timeout, or the reply speaks for a
    /// different identifier.
    pub async fn ensure_subscribed(
        &self,
        link: &mut dyn Link,
        device: &Device,
    ) -> Result<Device, EngineError> {
        let current = self
            .registry
            .read()
            .await
            .find_by_identifier(device.identifier)
            .unwrap_or_else(|| device.clone());
        if current.subscribed {
            return Ok(current);
        }

        self.pace(current.identifier).await;
        send_request(
            link,
            &Request::Subscribe {
                identifier: current.identifier,
            },
            current.address,
        )
        .await?;

        let deadline = Instant::now() + self.timeout;
        let address = current.address;
        let reply = recv_matching(link, deadline, |reply, src| match reply {
            Reply::Subscribe(m) if src.ip() == address.ip() => Some(m),
            _ => None,
        })
        .await?;

        let reply = match reply {
            Some(reply) => reply,
            None => {
                warn!("no subscribe reply from {address} within {:?}", self.timeout);
                return Err(EngineError::SubscriptionFailed {
                    address,
                    reason: format!("no reply within {:?}", self.timeout),
                });
            }
        };
        if reply.identifier != current.identifier {
            warn!(
                "{address} answered subscription for {} instead of {}",
                reply.identifier, current.identifier
            );
            return Err(EngineError::SubscriptionFailed {
                address,
                reason: format!("bridge answered for identifier {}", reply.identifier),
            });
        }

        let mut registry = self.registry.write().await;
        registry.set_subscribed(current.identifier, true);
        info!("subscribed to {} at {address} (state 0x{:02x})", current.identifier, reply.state);
        Ok(registry
            .find_by_identifier(current.identifier)
            .unwrap_or(Device {
                subscribed: true,
                ..current
            }))
    }

    /// Marks `identifier` as needing a fresh handshake.
    pub async fn invalidate(&self, identifier: Identifier) {
        debug!("invalidating subscription for {identifier}");
        self.registry.write().await.set_subscribed(identifier, false);
    }

    /// Sleeps until at least `min_interval` has passed since the previous
    /// attempt for this device, then records the new attempt.
    async fn pace(&self, identifier: Identifier) {
        let wait = {
            let attempts = self
                .last_attempt
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            attempts
                .get(&identifier)
                .map(|last| self.min_interval.saturating_sub(last.elapsed()))
                .unwrap_or_default()
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
        self.last_attempt
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(identifier, Instant::now());
    }
}
