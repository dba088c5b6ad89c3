//! Application layer: the bridge protocol engine.
//!
//! Everything here talks to the network and to code storage only through the
//! traits in [`ports`], so the whole engine runs unchanged against real UDP
//! sockets or an in-memory emulated bridge.
//!
//! # Sub-modules
//!
//! - **`registry`**     – In-memory table of known bridges.
//! - **`discover`**     – Broadcast discovery and registry refresh.
//! - **`subscription`** – The handshake a bridge requires before it accepts
//!   learn or emit requests.
//! - **`guard`**        – Per-device exclusive guard shared by learning and
//!   dispatch.
//! - **`learn`**        – The learn-mode state machine.
//! - **`dispatch`**     – Ordered, acknowledged emission of stored codes.
//! - **`engine`**       – The facade the HTTP layer (or the CLI) calls:
//!   `discover`, `learn`, `send`.

pub mod discover;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod guard;
pub mod learn;
pub mod ports;
pub mod registry;
pub mod subscription;

mod exchange;

pub use dispatch::AckPolicy;
pub use engine::{BridgeEngine, Discovery, EngineSettings, SendReport};
pub use error::EngineError;
