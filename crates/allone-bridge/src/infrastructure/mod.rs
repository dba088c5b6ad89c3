//! Infrastructure layer: OS-facing adapters.
//!
//! Contains the UDP socket transport, file-system storage (configuration and
//! learned codes), and the JSON response rendering handed to the HTTP layer.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `allone_core`, but MUST NOT be imported by the `application` layer.

pub mod api;
pub mod network;
pub mod storage;
