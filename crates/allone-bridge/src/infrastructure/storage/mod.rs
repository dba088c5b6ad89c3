//! Storage infrastructure: configuration file and learned-code persistence.
//!
//! - **`config`** – Reads the TOML configuration file and converts it into the
//!   engine's typed settings.
//! - **`command_store`** – Implementations of the engine's `CommandStore`
//!   port: one file per learned code in a directory, or an in-memory map.

pub mod command_store;
pub mod config;
