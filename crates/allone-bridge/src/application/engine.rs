//! The engine facade: `discover`, `learn` and `send`.
//!
//! [`BridgeEngine`] wires the registry, discovery, subscriptions, learning
//! and dispatch together over one [`Transport`] and one [`CommandStore`].
//! Every call runs on the caller's task; the engine has no background loop.
//!
//! # Resolving the target device
//!
//! - An explicit IP that is not in the registry triggers one discovery round;
//!   if the bridge still is not known the call fails with
//!   [`EngineError::DeviceNotFound`].
//! - `learn` without an IP uses the first known bridge, discovering first if
//!   the registry is empty.
//! - `send` without an IP tries every known bridge in registry order.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use allone_core::protocol::{PacketIdCounter, PROTOCOL_PORT};
use allone_core::{parse_name_list, IrCode, IrCodeName};
use serde::Serialize;
use tracing::{debug, info};

use crate::application::discover::DiscoveryService;
use crate::application::dispatch::{AckPolicy, CommandDispatcher, DispatchSettings};
use crate::application::error::EngineError;
use crate::application::guard::DeviceGuards;
use crate::application::learn::{LearnState, LearningSession};
use crate::application::ports::{CommandStore, Transport};
use crate::application::registry::{Device, DeviceRegistry, SharedRegistry};
use crate::application::subscription::SubscriptionManager;

/// Timing and addressing parameters for the engine.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Where discovery requests are broadcast.
    pub broadcast: SocketAddr,
    pub discovery_window: Duration,
    pub subscribe_timeout: Duration,
    /// Minimum gap between two subscription attempts to the same bridge.
    pub subscribe_min_interval: Duration,
    pub learn_timeout: Duration,
    /// How long to wait for the bridge to confirm learn mode before
    /// re-subscribing.
    pub learn_ack_timeout: Duration,
    pub emit_ack_timeout: Duration,
    pub emit_spacing: Duration,
    pub ack_policy: AckPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            broadcast: SocketAddr::from(([255, 255, 255, 255], PROTOCOL_PORT)),
            discovery_window: Duration::from_secs(3),
            subscribe_timeout: Duration::from_millis(1500),
            subscribe_min_interval: Duration::from_millis(100),
            learn_timeout: Duration::from_secs(15),
            learn_ack_timeout: Duration::from_secs(1),
            emit_ack_timeout: Duration::from_millis(500),
            emit_spacing: Duration::from_millis(100),
            ack_policy: AckPolicy::Required,
        }
    }
}

/// Result of [`BridgeEngine::discover`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Discovery {
    pub devices: Vec<Device>,
    /// Stored command names, one list per device in `devices` order.  With no
    /// devices this holds a single list of every stored name.
    pub commands: Vec<Vec<String>>,
}

/// Result of a successful [`BridgeEngine::send`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SendReport {
    /// The bridge that accepted the batch.
    pub device: Device,
    pub commands: Vec<String>,
}

/// Allone bridge protocol engine.
pub struct BridgeEngine {
    settings: EngineSettings,
    registry: SharedRegistry,
    store: Arc<dyn CommandStore>,
    guards: Arc<DeviceGuards>,
    discovery: DiscoveryService,
    learning: LearningSession,
    dispatcher: CommandDispatcher,
}

impl BridgeEngine {
    pub fn new(
        settings: EngineSettings,
        transport: Arc<dyn Transport>,
        store: Arc<dyn CommandStore>,
    ) -> Self {
        let registry = DeviceRegistry::shared();
        let guards = Arc::new(DeviceGuards::new());
        let subscriptions = Arc::new(SubscriptionManager::new(
            Arc::clone(&registry),
            settings.subscribe_timeout,
            settings.subscribe_min_interval,
        ));
        let discovery = DiscoveryService::new(
            Arc::clone(&transport),
            Arc::clone(&registry),
            settings.broadcast,
        );
        let learning = LearningSession::new(
            Arc::clone(&transport),
            Arc::clone(&registry),
            Arc::clone(&subscriptions),
            Arc::clone(&guards),
            settings.learn_ack_timeout,
        );
        let dispatcher = CommandDispatcher::new(
            transport,
            Arc::clone(&store),
            Arc::clone(&registry),
            subscriptions,
            Arc::clone(&guards),
            PacketIdCounter::starting_at(clock_seed()),
            DispatchSettings {
                ack_timeout: settings.emit_ack_timeout,
                spacing: settings.emit_spacing,
                ack_policy: settings.ack_policy,
            },
        );

        Self {
            settings,
            registry,
            store,
            guards,
            discovery,
            learning,
            dispatcher,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// The registry shared by every component of this engine.
    pub fn registry(&self) -> SharedRegistry {
        Arc::clone(&self.registry)
    }

    /// Snapshot of the known bridges.
    pub async fn devices(&self) -> Vec<Device> {
        self.registry.read().await.list()
    }

    /// State of the most recent learn session on the bridge at `ip`, or
    /// `None` if no bridge is known there.
    pub async fn learn_state(&self, ip: IpAddr) -> Option<LearnState> {
        let device = self.registry.read().await.get(ip).ok()?;
        Some(self.guards.learn_state(device.identifier))
    }

    /// Runs one discovery round and lists the stored commands per device.
    ///
    /// Finding no bridge is not an error.
    ///
    /// # Errors
    ///
    /// Transport failures opening the broadcast socket and command store
    /// failures.
    pub async fn discover(&self) -> Result<Discovery, EngineError> {
        let devices = self.discovery.discover(self.settings.discovery_window).await?;
        let commands = if devices.is_empty() {
            vec![self.store.list_names(None)?]
        } else {
            devices
                .iter()
                .map(|d| self.store.list_names(Some(d.address)))
                .collect::<Result<Vec<_>, _>>()?
        };
        Ok(Discovery { devices, commands })
    }

    /// Learns a code from the bridge at `ip` (or the first known bridge) and
    /// stores it under `name`.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidName`] before any network traffic; otherwise any
    /// error of [`LearningSession::learn`], device resolution, or the store.
    pub async fn learn(&self, ip: Option<IpAddr>, name: &str) -> Result<IrCode, EngineError> {
        let name = IrCodeName::parse(name)?;
        let device = match ip {
            Some(ip) => self.resolve_device(ip).await?,
            None => self.first_device().await?,
        };

        info!("learning {name} from {}", device.address);
        let raw = self
            .learning
            .learn(&device, self.settings.learn_timeout)
            .await?;
        self.store.put(&name, &raw)?;
        Ok(IrCode { name, raw })
    }

    /// Sends the comma-separated `names` in order to the bridge at `ip`, or to
    /// the first known bridge that accepts them.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidName`] and [`EngineError::CommandNotFound`]
    /// before any network traffic; otherwise dispatch or device resolution
    /// errors.
    pub async fn send(&self, ip: Option<IpAddr>, names: &str) -> Result<SendReport, EngineError> {
        let names = parse_name_list(names)?;
        let codes = self.dispatcher.resolve(&names)?;
        let commands: Vec<String> = names.iter().map(ToString::to_string).collect();

        let device = match ip {
            Some(ip) => {
                let device = self.resolve_device(ip).await?;
                self.dispatcher.send(&device, &codes).await?;
                device
            }
            None => {
                let mut devices = self.devices().await;
                if devices.is_empty() {
                    devices = self.discovery.discover(self.settings.discovery_window).await?;
                }
                debug!("no address given, trying {} bridge(s)", devices.len());
                self.dispatcher.send_to_any(&devices, &codes).await?
            }
        };

        Ok(SendReport { device, commands })
    }

    async fn resolve_device(&self, ip: IpAddr) -> Result<Device, EngineError> {
        if let Ok(device) = self.registry.read().await.get(ip) {
            return Ok(device);
        }
        debug!("{ip} not in registry, running discovery");
        self.discovery.discover(self.settings.discovery_window).await?;
        self.registry
            .read()
            .await
            .get(ip)
            .map_err(|_| EngineError::DeviceNotFound(ip))
    }

    async fn first_device(&self) -> Result<Device, EngineError> {
        let mut devices = self.devices().await;
        if devices.is_empty() {
            devices = self.discovery.discover(self.settings.discovery_window).await?;
        }
        devices.into_iter().next().ok_or(EngineError::NoDevices)
    }
}

/// Low 16 bits of the current time, so packet ids differ across restarts.
fn clock_seed() -> u16 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| (d.as_millis() & 0xFFFF) as u16)
        .unwrap_or(0)
}
