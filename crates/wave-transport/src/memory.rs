//! In-process multicast segment.
//!
//! Every endpoint bound to the same group on the same hub receives what
//! any member sends, like a shared layer-2 link. Lets several nodes run
//! in one process, which is how the integration tests drive the mesh.
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::link::{Datagram, LinkBinder, LinkOptions};
use crate::TransportError;

type Delivery = (Vec<u8>, SocketAddr);

struct Member {
    addr: SocketAddr,
    loopback: bool,
    tx: mpsc::UnboundedSender<Delivery>,
}

/// Shared in-memory link. Clones refer to the same segment.
#[derive(Clone, Default)]
pub struct MemoryHub {
    groups: Arc<Mutex<HashMap<SocketAddrV4, Vec<Member>>>>,
    next_port: Arc<AtomicU16>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live endpoints currently joined to `group`.
    pub async fn members(&self, group: SocketAddrV4) -> usize {
        let mut groups = self.groups.lock().await;
        match groups.get_mut(&group) {
            Some(members) => {
                members.retain(|m| !m.tx.is_closed());
                members.len()
            }
            None => 0,
        }
    }
}

impl std::fmt::Debug for MemoryHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryHub").finish_non_exhaustive()
    }
}

#[async_trait]
impl LinkBinder for MemoryHub {
    async fn bind(
        &self,
        group: SocketAddrV4,
        options: &LinkOptions,
    ) -> Result<Arc<dyn Datagram>, TransportError> {
        let port = self.next_port.fetch_add(1, Ordering::Relaxed).wrapping_add(40_000);
        let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port));
        let (tx, rx) = mpsc::unbounded_channel();

        self.groups.lock().await.entry(group).or_default().push(Member {
            addr,
            loopback: options.loopback,
            tx,
        });

        Ok(Arc::new(MemoryDatagram {
            hub: self.clone(),
            group,
            addr,
            rx: Mutex::new(rx),
        }))
    }
}

struct MemoryDatagram {
    hub: MemoryHub,
    group: SocketAddrV4,
    addr: SocketAddr,
    rx: Mutex<mpsc::UnboundedReceiver<Delivery>>,
}

#[async_trait]
impl Datagram for MemoryDatagram {
    async fn send(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut groups = self.hub.groups.lock().await;
        let Some(members) = groups.get_mut(&self.group) else {
            return Ok(());
        };
        members.retain(|m| !m.tx.is_closed());
        for member in members.iter() {
            if member.addr == self.addr && !member.loopback {
                continue;
            }
            let _ = member.tx.send((bytes.to_vec(), self.addr));
        }
        Ok(())
    }

    async fn recv(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), TransportError> {
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some((bytes, from)) => {
                // Truncate like a real UDP socket would
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                Ok((n, from))
            }
            None => Err(TransportError::NotRunning),
        }
    }

    fn group(&self) -> SocketAddrV4 {
        self.group
    }
}
