//! Multicast datagram source.
//!
//! Wraps the UDP socket behind a bounded-blocking `next_datagram` so the
//! run loop can observe a shutdown request between receive attempts. A
//! timeout is not an error; a socket-level failure is, and the supervisor
//! decides what to do with it.
use anyhow::{Context, Result};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Duration;
use tracing::info;

use crate::config::MulticastConfig;

/// Minimum receive buffer; BSE sizes its datagrams well under 2000 bytes.
const MIN_BUFFER: usize = 2000;

pub struct FeedReceiver {
    socket: UdpSocket,
    group: Ipv4Addr,
    buf: Vec<u8>,
}

impl FeedReceiver {
    /// Bind the port, join the multicast group and bound the receive call.
    /// Failures here are fatal to startup.
    pub fn join(config: &MulticastConfig, buffer_size: usize, timeout: Duration) -> Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, config.port))
            .with_context(|| format!("binding UDP port {}", config.port))?;
        socket
            .join_multicast_v4(&config.ip, &Ipv4Addr::UNSPECIFIED)
            .with_context(|| format!("joining multicast group {}", config.ip))?;
        socket
            .set_read_timeout(Some(timeout))
            .context("setting receive timeout")?;
        info!(group = %config.ip, port = config.port, "joined multicast group");
        Ok(FeedReceiver {
            socket,
            group: config.ip,
            buf: vec![0u8; buffer_size.max(MIN_BUFFER)],
        })
    }

    /// Receive one complete datagram, blocking for at most the configured
    /// timeout. `Ok(None)` means nothing arrived within the bound.
    pub fn next_datagram(&mut self) -> io::Result<Option<(Vec<u8>, SocketAddr)>> {
        match self.socket.recv_from(&mut self.buf) {
            Ok((len, source)) => Ok(Some((self.buf[..len].to_vec(), source))),
            Err(err)
                if matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
            {
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Drop group membership; called on the way out of the run loop.
    pub fn leave(&self) {
        let _ = self
            .socket
            .leave_multicast_v4(&self.group, &Ipv4Addr::UNSPECIFIED);
        info!(group = %self.group, "left multicast group");
    }
}
