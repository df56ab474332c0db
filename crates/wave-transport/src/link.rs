//! Datagram endpoints bound to a multicast group.
//!
//! [`LinkBinder`] is the seam between the transport and the network:
//! [`UdpMulticastBinder`] for real sockets, [`MemoryHub`](crate::MemoryHub)
//! for in-process tests.
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use crate::TransportError;

/// DSCP Expedited Forwarding, for voice.
pub const DSCP_EF: u32 = 46;

/// Socket options applied when joining a group.
#[derive(Debug, Clone)]
pub struct LinkOptions {
    pub interface: Ipv4Addr,
    pub ttl: u32,
    pub loopback: bool,
    /// DSCP code point for outbound traffic, if any.
    pub dscp: Option<u32>,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            interface: Ipv4Addr::UNSPECIFIED,
            ttl: 1,
            loopback: true,
            dscp: None,
        }
    }
}

/// A joined multicast group: send to the group, receive from it.
#[async_trait]
pub trait Datagram: Send + Sync + 'static {
    /// Send one datagram to the group. Best-effort.
    async fn send(&self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Receive one datagram into `buf`; returns length and source address.
    async fn recv(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), TransportError>;

    /// The group this endpoint is joined to.
    fn group(&self) -> SocketAddrV4;
}

/// Binds group endpoints.
#[async_trait]
pub trait LinkBinder: Send + Sync + 'static {
    async fn bind(
        &self,
        group: SocketAddrV4,
        options: &LinkOptions,
    ) -> Result<Arc<dyn Datagram>, TransportError>;
}

/// Production binder: socket2 for multicast setup, tokio for I/O.
#[derive(Debug, Clone, Copy, Default)]
pub struct UdpMulticastBinder;

#[async_trait]
impl LinkBinder for UdpMulticastBinder {
    async fn bind(
        &self,
        group: SocketAddrV4,
        options: &LinkOptions,
    ) -> Result<Arc<dyn Datagram>, TransportError> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|source| TransportError::Bind { group, source })?;

        // Several local processes may share the group port
        socket
            .set_reuse_address(true)
            .map_err(|source| TransportError::Bind { group, source })?;
        #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
        if let Err(e) = socket.set_reuse_port(true) {
            tracing::warn!(%group, error = %e, "SO_REUSEPORT unavailable");
        }
        socket
            .set_nonblocking(true)
            .map_err(|source| TransportError::Bind { group, source })?;

        let local = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, group.port());
        socket
            .bind(&local.into())
            .map_err(|source| TransportError::Bind { group, source })?;

        socket
            .join_multicast_v4(group.ip(), &options.interface)
            .map_err(|source| TransportError::JoinGroup { group, source })?;
        socket.set_multicast_ttl_v4(options.ttl)?;
        socket.set_multicast_loop_v4(options.loopback)?;
        if !options.interface.is_unspecified() {
            socket.set_multicast_if_v4(&options.interface)?;
        }

        if let Some(dscp) = options.dscp {
            // ToS byte carries DSCP in its upper six bits
            if let Err(e) = socket.set_tos(dscp << 2) {
                tracing::warn!(%group, dscp, error = %e, "failed to set DSCP");
            }
        }

        let socket = UdpSocket::from_std(socket.into())?;
        tracing::debug!(%group, "joined multicast group");
        Ok(Arc::new(UdpDatagram { socket, group }))
    }
}

struct UdpDatagram {
    socket: UdpSocket,
    group: SocketAddrV4,
}

#[async_trait]
impl Datagram for UdpDatagram {
    async fn send(&self, bytes: &[u8]) -> Result<(), TransportError> {
        self.socket.send_to(bytes, self.group).await?;
        Ok(())
    }

    async fn recv(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), TransportError> {
        Ok(self.socket.recv_from(buf).await?)
    }

    fn group(&self) -> SocketAddrV4 {
        self.group
    }
}

impl Drop for UdpDatagram {
    fn drop(&mut self) {
        // Closing the socket leaves the group; this is only for the log
        tracing::debug!(group = %self.group, "left multicast group");
    }
}
