//! Request/reply plumbing shared by discovery, subscription, learning and
//! dispatch.
//!
//! Every wait is bounded by an explicit deadline.  Datagrams that fail to
//! decode, or decode into a reply the caller is not waiting for, are logged at
//! `debug` and dropped: a LAN carries plenty of unrelated broadcast traffic.

use std::io;
use std::net::SocketAddr;

use allone_core::{Reply, Request};
use tokio::time::{timeout_at, Instant};
use tracing::debug;

use crate::application::error::EngineError;
use crate::application::ports::Link;

/// Encodes `request` and sends it to `target`.
pub(crate) async fn send_request(
    link: &mut dyn Link,
    request: &Request,
    target: SocketAddr,
) -> Result<(), EngineError> {
    let bytes = request.encode()?;
    debug!("sending {} ({} bytes) to {target}", request.command(), bytes.len());
    link.send_to(&bytes, target).await?;
    Ok(())
}

/// Waits until `deadline` for the first reply `select` accepts.
///
/// Returns `Ok(None)` when the deadline passes first.
pub(crate) async fn recv_matching<T, F>(
    link: &mut dyn Link,
    deadline: Instant,
    mut select: F,
) -> Result<Option<T>, EngineError>
where
    F: FnMut(Reply, SocketAddr) -> Option<T>,
{
    loop {
        let (bytes, src) = match timeout_at(deadline, link.recv_from()).await {
            Err(_elapsed) => return Ok(None),
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) if is_transient_error(&e) => {
                debug!("transient receive error: {e}");
                continue;
            }
            Ok(Err(e)) => return Err(e.into()),
        };

        let reply = match Reply::decode(&bytes) {
            Ok(reply) => reply,
            Err(e) => {
                debug!("dropping malformed datagram from {src}: {e}");
                continue;
            }
        };

        let command = reply.command();
        match select(reply, src) {
            Some(value) => return Ok(Some(value)),
            None => debug!("ignoring unrelated {command} frame from {src}"),
        }
    }
}

/// Returns `true` for receive errors that say nothing about the exchange in
/// progress (ICMP port-unreachable from an earlier send, interrupted calls).
fn is_transient_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::Interrupted
    )
}
