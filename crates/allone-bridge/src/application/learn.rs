//! Learning session: put a bridge into learn mode and wait for a captured code.
//!
//! # State machine
//!
//! ```text
//! Idle ──enter-learn sent──► Entered ──code received──► Captured ──► Done
//!                               │
//!                               └──window elapsed──► TimedOut
//! ```
//!
//! At most one session runs per device.  A second `learn` against a device
//! whose guard is held fails immediately with [`EngineError::DeviceBusy`]
//! instead of queueing, because bridges only handle one learn correctly.
//!
//! Learn replies that say "nothing captured yet" keep the session waiting.
//! Replies from any other address, or for another identifier, are ignored.
//!
//! If the bridge does not answer the enter-learn request at all it has most
//! likely dropped our subscription; the session re-subscribes and sends the
//! request once more before settling in to wait.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use allone_core::protocol::{LearnReply, Reply, Request};
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::application::error::EngineError;
use crate::application::exchange::{recv_matching, send_request};
use crate::application::guard::{DeviceGuards, DeviceLease};
use crate::application::ports::{Link, LinkPurpose, Transport};
use crate::application::registry::{Device, SharedRegistry};
use crate::application::subscription::SubscriptionManager;

/// Progress of the most recent learn session on a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LearnState {
    Idle,
    /// Enter-learn was sent; waiting for a code.
    Entered,
    Captured,
    Done,
    TimedOut,
}

impl LearnState {
    /// Whether the session has ended, successfully or not.
    pub fn is_terminal(self) -> bool {
        matches!(self, LearnState::Done | LearnState::TimedOut)
    }
}

impl fmt::Display for LearnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LearnState::Idle => "idle",
            LearnState::Entered => "entered",
            LearnState::Captured => "captured",
            LearnState::Done => "done",
            LearnState::TimedOut => "timed out",
        };
        f.write_str(s)
    }
}

/// Runs learn sessions against bridges.
pub struct LearningSession {
    transport: Arc<dyn Transport>,
    registry: SharedRegistry,
    subscriptions: Arc<SubscriptionManager>,
    guards: Arc<DeviceGuards>,
    ack_timeout: Duration,
}

impl LearningSession {
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: SharedRegistry,
        subscriptions: Arc<SubscriptionManager>,
        guards: Arc<DeviceGuards>,
        ack_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            registry,
            subscriptions,
            guards,
            ack_timeout,
        }
    }

    /// Learns one code from `device`, waiting at most `window` for a capture.
    ///
    /// Returns the raw code bytes; persisting them is up to the caller.
    ///
    /// # Errors
    ///
    /// - [`EngineError::DeviceBusy`] if another session or send batch holds
    ///   the device.
    /// - [`EngineError::UnsupportedDevice`] for devices without infrared.
    /// - [`EngineError::SubscriptionFailed`] unchanged from the handshake.
    /// - [`EngineError::LearnTimeout`] if no code arrives within `window`.
    pub async fn learn(&self, device: &Device, window: Duration) -> Result<Vec<u8>, EngineError> {
        let lease = self
            .guards
            .try_acquire(device.identifier)
            .ok_or(EngineError::DeviceBusy(device.address))?;

        if !device.kind.supports_infrared() {
            return Err(EngineError::UnsupportedDevice {
                address: device.address,
                kind: device.kind,
            });
        }

        let span = info_span!("learn", session = %Uuid::new_v4(), device = %device.address);
        self.run(&lease, device, window).instrument(span).await
    }

    async fn run(
        &self,
        lease: &DeviceLease,
        device: &Device,
        window: Duration,
    ) -> Result<Vec<u8>, EngineError> {
        lease.set_learn_state(LearnState::Idle);
        let mut link = self.transport.open(LinkPurpose::Unicast).await?;
        let device = self
            .subscriptions
            .ensure_subscribed(link.as_mut(), device)
            .await?;

        let deadline = Instant::now() + window;
        enter_learn(link.as_mut(), &device).await?;
        lease.set_learn_state(LearnState::Entered);
        info!("learn mode requested, waiting up to {window:?} for a code");

        let ack_deadline = deadline.min(Instant::now() + self.ack_timeout);
        match next_learn_reply(link.as_mut(), &device, ack_deadline).await? {
            Some(LearnReply::Captured { code, .. }) => {
                return self.captured(lease, &device, code).await;
            }
            Some(LearnReply::Waiting { .. }) => debug!("bridge acknowledged learn mode"),
            None => {
                warn!("learn mode not acknowledged, re-subscribing and retrying");
                self.subscriptions.invalidate(device.identifier).await;
                self.subscriptions
                    .ensure_subscribed(link.as_mut(), &device)
                    .await?;
                enter_learn(link.as_mut(), &device).await?;
            }
        }

        loop {
            match next_learn_reply(link.as_mut(), &device, deadline).await? {
                Some(LearnReply::Captured { code, .. }) => {
                    return self.captured(lease, &device, code).await;
                }
                Some(LearnReply::Waiting { .. }) => debug!("no code captured yet"),
                None => {
                    lease.set_learn_state(LearnState::TimedOut);
                    warn!("no code captured within {window:?}");
                    return Err(EngineError::LearnTimeout {
                        address: device.address,
                        waited: window,
                    });
                }
            }
        }
    }

    async fn captured(
        &self,
        lease: &DeviceLease,
        device: &Device,
        code: Vec<u8>,
    ) -> Result<Vec<u8>, EngineError> {
        lease.set_learn_state(LearnState::Captured);
        self.registry.write().await.touch(device.identifier);
        info!("captured {} byte code", code.len());
        lease.set_learn_state(LearnState::Done);
        Ok(code)
    }
}

async fn enter_learn(link: &mut dyn Link, device: &Device) -> Result<(), EngineError> {
    let request = Request::EnterLearn {
        identifier: device.identifier,
    };
    send_request(link, &request, device.address).await
}

/// Next learn reply from `device` itself, or `None` at the deadline.
async fn next_learn_reply(
    link: &mut dyn Link,
    device: &Device,
    deadline: Instant,
) -> Result<Option<LearnReply>, EngineError> {
    let address = device.address;
    let identifier = device.identifier;
    recv_matching(link, deadline, |reply, src| match reply {
        Reply::Learn(m) if src.ip() == address.ip() && m.identifier() == identifier => Some(m),
        _ => None,
    })
    .await
}
