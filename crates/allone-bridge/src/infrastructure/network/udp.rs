//! UDP transport over tokio sockets.
//!
//! Every [`Link`] is a freshly bound socket owned by one engine operation, so
//! two concurrent operations never read each other's replies.
//!
//! - Discovery links bind the listen port (bridges answer broadcasts on the
//!   protocol port, 10000, by default) with `SO_BROADCAST` enabled.
//! - Unicast links bind an ephemeral port; bridges reply to the source port
//!   of the request.
//!
//! Datagrams larger than [`RECV_BUFFER_SIZE`] are truncated by the OS and
//! then rejected by the frame codec's length check.

use std::io;
use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tracing::debug;

use crate::application::ports::{Link, LinkPurpose, Transport};

/// Receive buffer per datagram.  Learned codes are well under this.
pub const RECV_BUFFER_SIZE: usize = 2048;

/// Opens real UDP sockets.
#[derive(Debug, Clone)]
pub struct UdpTransport {
    bind_address: IpAddr,
    listen_port: u16,
}

impl UdpTransport {
    /// `listen_port` is used for discovery links only; `0` picks an
    /// ephemeral port there too.
    pub fn new(bind_address: IpAddr, listen_port: u16) -> Self {
        Self {
            bind_address,
            listen_port,
        }
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn open(&self, purpose: LinkPurpose) -> io::Result<Box<dyn Link>> {
        let port = match purpose {
            LinkPurpose::Discovery => self.listen_port,
            LinkPurpose::Unicast => 0,
        };
        let socket = UdpSocket::bind(SocketAddr::new(self.bind_address, port)).await?;
        if purpose == LinkPurpose::Discovery {
            socket.set_broadcast(true)?;
        }
        debug!("opened {purpose:?} link on {}", socket.local_addr()?);
        Ok(Box::new(UdpLink::new(socket)))
    }
}

/// One bound UDP socket.
#[derive(Debug)]
pub struct UdpLink {
    socket: UdpSocket,
    buf: Vec<u8>,
}

impl UdpLink {
    pub fn new(socket: UdpSocket) -> Self {
        Self {
            socket,
            buf: vec![0u8; RECV_BUFFER_SIZE],
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

#[async_trait]
impl Link for UdpLink {
    async fn send_to(&mut self, datagram: &[u8], target: SocketAddr) -> io::Result<()> {
        let sent = self.socket.send_to(datagram, target).await?;
        if sent != datagram.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short send to {target}: {sent} of {} bytes", datagram.len()),
            ));
        }
        Ok(())
    }

    async fn recv_from(&mut self) -> io::Result<(Vec<u8>, SocketAddr)> {
        let (len, src) = self.socket.recv_from(&mut self.buf).await?;
        Ok((self.buf[..len].to_vec(), src))
    }
}
