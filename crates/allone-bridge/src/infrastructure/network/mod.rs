//! Network infrastructure.
//!
//! - **`udp`** – [`udp::UdpTransport`], the production implementation of the
//!   engine's `Transport` port on top of `tokio::net::UdpSocket`.

pub mod udp;
