//! Command dispatcher: ordered, acknowledged emission of stored codes.
//!
//! # Batch rules
//!
//! 1. Every name is resolved through the [`CommandStore`] before anything is
//!    sent.  One missing name fails the whole batch with
//!    [`EngineError::CommandNotFound`] and zero frames go out.
//! 2. The device is subscribed once per batch, not once per command.
//! 3. Codes are emitted strictly in the caller's order.  Each emit waits for
//!    its acknowledgement (or the ack timeout) before the next one is sent,
//!    and consecutive emits are spaced out.
//! 4. Under [`AckPolicy::Required`] a missing ack earns that command exactly
//!    one retry with the same packet id; a second miss fails the batch with
//!    [`EngineError::SendTimeout`].  Under [`AckPolicy::BestEffort`] a missing
//!    ack counts as delivered, for firmware that never acks.
//! 5. Acks carry nothing but the bridge identifier, so the batch keeps track
//!    of emits still owed an ack.  A late ack settles the oldest owed emit
//!    first and only counts for the current command once nothing earlier is
//!    outstanding.  An owed emit older than [`OWED_ACK_HORIZON`] ack timeouts
//!    is written off as lost.
//!
//! The whole batch holds the device guard, so a learn session or another
//! batch never interleaves with it.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use allone_core::protocol::PacketIdCounter;
use allone_core::{IrCode, IrCodeName, Reply, Request};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::application::error::EngineError;
use crate::application::exchange::{recv_matching, send_request};
use crate::application::guard::DeviceGuards;
use crate::application::ports::{CommandStore, Link, LinkPurpose, Transport};
use crate::application::registry::{Device, SharedRegistry};
use crate::application::subscription::SubscriptionManager;

/// How many ack timeouts an unanswered emit may still be acked within.
pub const OWED_ACK_HORIZON: u32 = 4;

/// How a missing emit acknowledgement is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckPolicy {
    /// Retry once, then fail the batch.
    #[default]
    Required,
    /// Treat the timeout as delivery.
    BestEffort,
}

/// Tunables for [`CommandDispatcher`].
#[derive(Debug, Clone, Copy)]
pub struct DispatchSettings {
    pub ack_timeout: Duration,
    /// Pause between consecutive emits in one batch.
    pub spacing: Duration,
    pub ack_policy: AckPolicy,
}

/// Emits stored codes to bridges.
pub struct CommandDispatcher {
    transport: Arc<dyn Transport>,
    store: Arc<dyn CommandStore>,
    registry: SharedRegistry,
    subscriptions: Arc<SubscriptionManager>,
    guards: Arc<DeviceGuards>,
    packet_ids: PacketIdCounter,
    settings: DispatchSettings,
}

impl CommandDispatcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn CommandStore>,
        registry: SharedRegistry,
        subscriptions: Arc<SubscriptionManager>,
        guards: Arc<DeviceGuards>,
        packet_ids: PacketIdCounter,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            transport,
            store,
            registry,
            subscriptions,
            guards,
            packet_ids,
            settings,
        }
    }

    /// Looks every name up in the store.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::CommandNotFound`] listing every missing name, or
    /// [`EngineError::Store`] if the store itself fails.
    pub fn resolve(&self, names: &[IrCodeName]) -> Result<Vec<IrCode>, EngineError> {
        let mut codes = Vec::with_capacity(names.len());
        let mut missing = Vec::new();
        for name in names {
            match self.store.get(name)? {
                Some(raw) => codes.push(IrCode {
                    name: name.clone(),
                    raw,
                }),
                None => missing.push(name.to_string()),
            }
        }
        if !missing.is_empty() {
            return Err(EngineError::CommandNotFound(missing));
        }
        Ok(codes)
    }

    /// Emits `codes` to `device` in order.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnsupportedDevice`], [`EngineError::SubscriptionFailed`]
    /// or [`EngineError::SendTimeout`]; transport failures pass through.
    pub async fn send(&self, device: &Device, codes: &[IrCode]) -> Result<(), EngineError> {
        if !device.kind.supports_infrared() {
            return Err(EngineError::UnsupportedDevice {
                address: device.address,
                kind: device.kind,
            });
        }

        let _lease = self.guards.acquire(device.identifier).await;
        let mut link = self.transport.open(LinkPurpose::Unicast).await?;
        let device = self
            .subscriptions
            .ensure_subscribed(link.as_mut(), device)
            .await?;

        let mut owed = OwedAcks::new(self.settings.ack_timeout * OWED_ACK_HORIZON);
        for (index, code) in codes.iter().enumerate() {
            if index > 0 && !self.settings.spacing.is_zero() {
                tokio::time::sleep(self.settings.spacing).await;
            }
            self.emit(link.as_mut(), &device, code, &mut owed).await?;
        }

        self.registry.write().await.touch(device.identifier);
        info!("sent {} command(s) to {}", codes.len(), device.address);
        Ok(())
    }

    /// Tries `devices` one at a time, in order, until one accepts the batch.
    ///
    /// Much slower than [`send`](Self::send) with a known device: every
    /// failing bridge costs its full subscribe or ack timeouts.
    ///
    /// # Errors
    ///
    /// [`EngineError::NoDevices`] for an empty list, otherwise
    /// [`EngineError::NoDeviceAccepted`] carrying one line per failed device.
    pub async fn send_to_any(
        &self,
        devices: &[Device],
        codes: &[IrCode],
    ) -> Result<Device, EngineError> {
        if devices.is_empty() {
            return Err(EngineError::NoDevices);
        }

        let mut failures = Vec::with_capacity(devices.len());
        for device in devices {
            match self.send(device, codes).await {
                Ok(()) => return Ok(device.clone()),
                Err(e) => {
                    debug!("{} did not accept the batch: {e}", device.address);
                    failures.push(format!("{}: {e}", device.address));
                }
            }
        }
        warn!("no bridge accepted the batch");
        Err(EngineError::NoDeviceAccepted(failures))
    }

    /// `owed` holds earlier emits on this link whose acks have not arrived.
    async fn emit(
        &self,
        link: &mut dyn Link,
        device: &Device,
        code: &IrCode,
        owed: &mut OwedAcks,
    ) -> Result<(), EngineError> {
        let request = Request::Emit {
            identifier: device.identifier,
            packet_id: self.packet_ids.next(),
            code: code.raw.clone(),
        };
        let attempts = match self.settings.ack_policy {
            AckPolicy::Required => 2,
            AckPolicy::BestEffort => 1,
        };

        let mut sent_at = Vec::with_capacity(attempts);
        for attempt in 1..=attempts {
            sent_at.push(Instant::now());
            send_request(link, &request, device.address).await?;
            if self.wait_for_ack(link, device, owed).await? {
                debug!("{} acknowledged {}", device.address, code.name);
                // The ack answers the first attempt; later ones may still be acked.
                sent_at.remove(0);
                owed.extend(sent_at);
                return Ok(());
            }
            if attempt < attempts {
                debug!("no ack for {} from {}, retrying", code.name, device.address);
            }
        }
        owed.extend(sent_at);

        match self.settings.ack_policy {
            AckPolicy::BestEffort => {
                debug!("no ack for {}, assuming delivered", code.name);
                Ok(())
            }
            AckPolicy::Required => {
                warn!("{} did not acknowledge {}", device.address, code.name);
                self.subscriptions.invalidate(device.identifier).await;
                Err(EngineError::SendTimeout {
                    address: device.address,
                    command: code.name.to_string(),
                })
            }
        }
    }

    /// Waits for an ack that belongs to the emit just sent.
    ///
    /// Acks arriving while `owed` is non-zero answer earlier emits and only
    /// pay that debt down.
    async fn wait_for_ack(
        &self,
        link: &mut dyn Link,
        device: &Device,
        owed: &mut OwedAcks,
    ) -> Result<bool, EngineError> {
        let deadline = Instant::now() + self.settings.ack_timeout;
        let address = device.address;
        let identifier = device.identifier;
        loop {
            let ack = recv_matching(link, deadline, |reply, src| match reply {
                Reply::EmitAck(ack) if src.ip() == address.ip() && ack.identifier == identifier => {
                    Some(())
                }
                _ => None,
            })
            .await?;
            if ack.is_none() {
                return Ok(false);
            }
            if !owed.settle(Instant::now()) {
                return Ok(true);
            }
            debug!("late ack from {address} settled an earlier emit ({} still owed)", owed.len());
        }
    }
}

/// Send times of emits on one link that are still waiting for their ack.
#[derive(Debug)]
pub(crate) struct OwedAcks {
    sent: VecDeque<Instant>,
    horizon: Duration,
}

impl OwedAcks {
    pub(crate) fn new(horizon: Duration) -> Self {
        Self {
            sent: VecDeque::new(),
            horizon,
        }
    }

    pub(crate) fn extend(&mut self, sent: impl IntoIterator<Item = Instant>) {
        self.sent.extend(sent);
    }

    pub(crate) fn len(&self) -> usize {
        self.sent.len()
    }

    /// Credits an incoming ack to the oldest owed emit still within the
    /// horizon.  Returns `false` when nothing is owed.
    pub(crate) fn settle(&mut self, now: Instant) -> bool {
        while let Some(&oldest) = self.sent.front() {
            if now.saturating_duration_since(oldest) <= self.horizon {
                break;
            }
            self.sent.pop_front();
        }
        self.sent.pop_front().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{MockCommandStore, StoreError};
    use crate::application::registry::DeviceRegistry;
    use async_trait::async_trait;
    use std::io;
    use std::net::SocketAddr;

    /// Transport whose links must never be opened.
    struct UnreachableTransport;

    #[async_trait]
    impl Transport for UnreachableTransport {
        async fn open(&self, _purpose: LinkPurpose) -> io::Result<Box<dyn Link>> {
            Err(io::Error::new(io::ErrorKind::Other, "no network in this test"))
        }
    }

    fn dispatcher(store: MockCommandStore) -> CommandDispatcher {
        let registry = DeviceRegistry::shared();
        let subscriptions = Arc::new(SubscriptionManager::new(
            Arc::clone(&registry),
            Duration::from_millis(10),
            Duration::ZERO,
        ));
        CommandDispatcher::new(
            Arc::new(UnreachableTransport),
            Arc::new(store),
            registry,
            subscriptions,
            Arc::new(DeviceGuards::new()),
            PacketIdCounter::new(),
            DispatchSettings {
                ack_timeout: Duration::from_millis(10),
                spacing: Duration::ZERO,
                ack_policy: AckPolicy::Required,
            },
        )
    }

    fn names(list: &[&str]) -> Vec<IrCodeName> {
        list.iter().map(|n| IrCodeName::parse(n).unwrap()).collect()
    }

    #[test]
    fn test_resolve_returns_codes_in_request_order() {
        // Arrange
        let mut store = MockCommandStore::new();
        store
            .expect_get()
            .returning(|name| Ok(Some(name.as_str().as_bytes().to_vec())));
        let dispatcher = dispatcher(store);

        // Act
        let codes = dispatcher.resolve(&names(&["y.ir", "x.ir"])).unwrap();

        // Assert
        assert_eq!(codes[0].raw, b"y.ir");
        assert_eq!(codes[1].raw, b"x.ir");
    }

    #[test]
    fn test_resolve_reports_every_missing_name() {
        // Arrange
        let mut store = MockCommandStore::new();
        store.expect_get().returning(|name| {
            Ok((name.as_str() == "a.ir").then(|| vec![0x01]))
        });
        let dispatcher = dispatcher(store);

        // Act
        let err = dispatcher
            .resolve(&names(&["a.ir", "missing.ir", "gone.ir"]))
            .unwrap_err();

        // Assert
        match err {
            EngineError::CommandNotFound(missing) => {
                assert_eq!(missing, vec!["missing.ir".to_string(), "gone.ir".to_string()]);
            }
            other => panic!("expected CommandNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_resolve_propagates_store_failure() {
        let mut store = MockCommandStore::new();
        store
            .expect_get()
            .returning(|_| Err(StoreError::Unavailable("offline".into())));
        let dispatcher = dispatcher(store);

        let err = dispatcher.resolve(&names(&["a.ir"])).unwrap_err();

        assert!(matches!(err, EngineError::Store(_)));
    }

    #[test]
    fn test_owed_acks_settle_oldest_first() {
        // Arrange
        let start = Instant::now();
        let mut owed = OwedAcks::new(Duration::from_millis(100));
        owed.extend([start, start + Duration::from_millis(10)]);

        // Act / Assert: two late acks pay off two owed emits, a third is fresh.
        assert!(owed.settle(start + Duration::from_millis(20)));
        assert_eq!(owed.len(), 1);
        assert!(owed.settle(start + Duration::from_millis(30)));
        assert!(!owed.settle(start + Duration::from_millis(40)));
    }

    #[test]
    fn test_owed_acks_write_off_emits_past_the_horizon() {
        let start = Instant::now();
        let mut owed = OwedAcks::new(Duration::from_millis(100));
        owed.extend([start]);

        assert!(!owed.settle(start + Duration::from_millis(150)));
        assert_eq!(owed.len(), 0);
    }

    #[tokio::test]
    async fn test_send_to_any_with_no_devices_is_no_devices() {
        let dispatcher = dispatcher(MockCommandStore::new());
        let err = dispatcher.send_to_any(&[], &[]).await.unwrap_err();
        assert!(matches!(err, EngineError::NoDevices));
    }

    #[tokio::test]
    async fn test_send_rejects_socket_devices_without_opening_a_link() {
        // Arrange
        let dispatcher = dispatcher(MockCommandStore::new());
        let device = Device {
            address: SocketAddr::from(([10, 0, 0, 9], 10000)),
            identifier: allone_core::Identifier::new([1, 1, 1, 1, 1, 1]),
            kind: allone_core::DeviceKind::Socket,
            subscribed: false,
            last_seen: std::time::SystemTime::now(),
        };

        // Act
        let err = dispatcher.send(&device, &[]).await.unwrap_err();

        // Assert
        assert!(matches!(err, EngineError::UnsupportedDevice { .. }));
    }

    #[tokio::test]
    async fn test_send_to_any_aggregates_each_failure() {
        // Arrange: the transport refuses, so every device fails.
        let dispatcher = dispatcher(MockCommandStore::new());
        let device = |last: u8| Device {
            address: SocketAddr::from(([10, 0, 0, last], 10000)),
            identifier: allone_core::Identifier::new([last; 6]),
            kind: allone_core::DeviceKind::Infrared,
            subscribed: false,
            last_seen: std::time::SystemTime::now(),
        };

        // Act
        let err = dispatcher
            .send_to_any(&[device(1), device(2)], &[])
            .await
            .unwrap_err();

        // Assert
        match err {
            EngineError::NoDeviceAccepted(failures) => {
                assert_eq!(failures.len(), 2);
                assert!(failures[0].starts_with("10.0.0.1:10000"));
                assert!(failures[1].starts_with("10.0.0.2:10000"));
            }
            other => panic!("expected NoDeviceAccepted, got {other:?}"),
        }
    }
}
