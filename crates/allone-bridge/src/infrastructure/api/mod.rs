//! Response rendering for the outer layer (HTTP server or CLI).
//!
//! The engine never speaks HTTP.  These handlers call [`BridgeEngine`] and
//! fold every outcome, success or failure, into a uniform serialisable shape:
//!
//! - `learn` / `send`: `{ "cmd": ..., "success": bool, "error": string | null }`
//! - `discover`: `{ "success": bool, "devices": [...], "commands": [[...]],
//!   "error": string | null }`
//!
//! A caller can always read `success` without inspecting an error type.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::application::registry::Device;
use crate::application::BridgeEngine;

// ── Data Transfer Objects ─────────────────────────────────────────────────────

/// One bridge as shown to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDto {
    pub ip: String,
    pub identifier: String,
    pub kind: String,
    pub subscribed: bool,
}

impl From<&Device> for DeviceDto {
    fn from(d: &Device) -> Self {
        Self {
            ip: d.address.ip().to_string(),
            identifier: d.identifier.to_string(),
            kind: format!("{:?}", d.kind).to_lowercase(),
            subscribed: d.subscribed,
        }
    }
}

/// Outcome of a `learn` or `send` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResponse {
    /// What was attempted: the learned name, or a description of the batch.
    pub cmd: String,
    pub success: bool,
    pub error: Option<String>,
}

impl CommandResponse {
    pub fn ok(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            success: true,
            error: None,
        }
    }

    pub fn err(cmd: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            success: false,
            error: Some(msg.into()),
        }
    }
}

/// Outcome of a `discover` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoverResponse {
    pub success: bool,
    pub devices: Vec<DeviceDto>,
    /// Stored command names per device, in `devices` order.
    pub commands: Vec<Vec<String>>,
    pub error: Option<String>,
}

// ── Handlers ──────────────────────────────────────────────────────────────────

/// Runs discovery.  Zero bridges is a success with an empty device list.
pub async fn discover(engine: &BridgeEngine) -> DiscoverResponse {
    match engine.discover().await {
        Ok(found) => DiscoverResponse {
            success: true,
            devices: found.devices.iter().map(DeviceDto::from).collect(),
            commands: found.commands,
            error: None,
        },
        Err(e) => {
            warn!("discover failed: {e}");
            DiscoverResponse {
                success: false,
                devices: Vec::new(),
                commands: Vec::new(),
                error: Some(e.to_string()),
            }
        }
    }
}

/// Learns `name` from the bridge at `ip` (or the first known bridge).
pub async fn learn(engine: &BridgeEngine, ip: Option<IpAddr>, name: &str) -> CommandResponse {
    match engine.learn(ip, name).await {
        Ok(code) => CommandResponse::ok(code.name.to_string()),
        Err(e) => {
            warn!("learn {name} failed: {e}");
            CommandResponse::err(name, e.to_string())
        }
    }
}

/// Sends the comma-separated `names` to the bridge at `ip` (or any bridge).
pub async fn send(engine: &BridgeEngine, ip: Option<IpAddr>, names: &str) -> CommandResponse {
    match engine.send(ip, names).await {
        Ok(report) => CommandResponse::ok(format!(
            "{} -> {}",
            report.commands.join(","),
            report.device.address.ip()
        )),
        Err(e) => {
            warn!("send {names} failed: {e}");
            let target = ip.map_or_else(|| "any bridge".to_string(), |ip| ip.to_string());
            CommandResponse::err(format!("{names} -> {target}"), e.to_string())
        }
    }
}

/// Serialises a response as compact JSON.
///
/// # Errors
///
/// Only if `value`'s `Serialize` impl fails, which the types here never do.
pub fn to_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(value)
}
