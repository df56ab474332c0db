use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use wave_transport::{CryptoProvider, Datagram, Identity, LinkBinder, LinkOptions, SecureTransport, TransportError};

use crate::error::ProtocolError;
use crate::types::{unix_ms, ChannelId};

use super::repository::ChannelRepository;
use super::table::{DiscoveryTable, SuppressionSet, Upsert};
use super::types::{
    Announcer, BeaconConfig, BeaconKind, BeaconMessage, ChannelMetadata, DiscoveredChannel, DiscoveryEvent,
};

/// Largest beacon datagram we read.
const RECV_BUF_LEN: usize = 64 * 1024;

/// Channel discovery over its own multicast group.
///
/// Announces every locally joined channel periodically, keeps a
/// time-bounded table of channels announced by peers, and propagates
/// deletions. Deleted channels go into a suppression set that is checked
/// before any announce is admitted, so late or duplicated announces never
/// resurrect them.
pub struct DiscoveryBeacon {
    shared: Arc<Shared>,
    running: Mutex<Option<Running>>,
}

struct Shared {
    binder: Arc<dyn LinkBinder>,
    crypto: Arc<dyn CryptoProvider>,
    repository: Arc<dyn ChannelRepository>,
    group: SocketAddrV4,
    options: LinkOptions,
    config: BeaconConfig,
    suppressed: SuppressionSet,
    table: DiscoveryTable,
    events: mpsc::Sender<DiscoveryEvent>,
    session: RwLock<Option<Arc<Session>>>,
    epoch: Instant,
}

/// Identity and link of a started beacon.
struct Session {
    identity: Identity,
    name: String,
    link: Arc<dyn Datagram>,
}

struct Running {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Drop for Running {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl DiscoveryBeacon {
    pub fn new(
        binder: Arc<dyn LinkBinder>,
        crypto: Arc<dyn CryptoProvider>,
        repository: Arc<dyn ChannelRepository>,
        group: SocketAddrV4,
        options: LinkOptions,
        config: BeaconConfig,
    ) -> (Self, mpsc::Receiver<DiscoveryEvent>) {
        let (events, rx) = mpsc::channel(config.event_buffer.max(1));
        let beacon = Self {
            shared: Arc::new(Shared {
                binder,
                crypto,
                repository,
                group,
                options,
                config,
                suppressed: SuppressionSet::new(),
                table: DiscoveryTable::new(),
                events,
                session: RwLock::new(None),
                epoch: Instant::now(),
            }),
            running: Mutex::new(None),
        };
        (beacon, rx)
    }

    /// Share the transport's binder, crypto provider and socket settings.
    pub fn for_transport(
        transport: &SecureTransport,
        repository: Arc<dyn ChannelRepository>,
        config: BeaconConfig,
    ) -> (Self, mpsc::Receiver<DiscoveryEvent>) {
        let transport_config = transport.config();
        Self::new(
            transport.binder(),
            transport.crypto(),
            repository,
            transport_config.discovery_group,
            transport_config.link_options(),
            config,
        )
    }

    /// Join the discovery group and spawn the receive, announce and sweep
    /// loops. Idempotent.
    pub async fn start(&self, identity: Identity, name: impl Into<String>) -> Result<(), ProtocolError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Ok(());
        }
        let shared = &self.shared;
        let link = shared.binder.bind(shared.group, &shared.options).await?;
        let session = Arc::new(Session {
            identity,
            name: name.into(),
            link: link.clone(),
        });
        *shared.session.write().await = Some(session.clone());

        let cancel = CancellationToken::new();
        let tasks = vec![
            tokio::spawn(recv_loop(link, shared.clone(), cancel.clone())),
            tokio::spawn(announce_loop(shared.clone(), cancel.clone())),
            tokio::spawn(sweep_loop(shared.clone(), cancel.clone())),
        ];
        info!(
            id = %session.identity.public(),
            name = %session.name,
            group = %shared.group,
            "discovery beacon started"
        );
        *running = Some(Running { cancel, tasks });
        Ok(())
    }

    /// Stop all loops and leave the group. Idempotent.
    pub async fn stop(&self) {
        let Some(mut running) = self.running.lock().await.take() else {
            return;
        };
        running.cancel.cancel();
        for task in std::mem::take(&mut running.tasks) {
            let _ = task.await;
        }
        self.shared.session.write().await.take();
        info!(group = %self.shared.group, "discovery beacon stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Signed, best-effort announce of one channel.
    pub async fn announce_channel(&self, channel_id: &ChannelId, metadata: &ChannelMetadata) -> Result<(), ProtocolError> {
        let session = self.shared.session().await?;
        if self.is_suppressed(channel_id).await {
            debug!(channel = %channel_id, "not announcing a deleted channel");
            return Ok(());
        }
        self.shared
            .send(&session, BeaconKind::Announce(metadata.clone()), channel_id)
            .await
    }

    pub async fn request_join_channel(&self, channel_id: &ChannelId) -> Result<(), ProtocolError> {
        let session = self.shared.session().await?;
        self.shared.send(&session, BeaconKind::Join, channel_id).await
    }

    /// Suppress the channel, broadcast the deletion a few times, then drop
    /// it from the table and the repository.
    pub async fn announce_channel_deleted(&self, channel_id: &ChannelId) -> Result<(), ProtocolError> {
        let session = self.shared.session().await?;
        self.shared.suppress(channel_id);

        let repeats = self.shared.config.delete_repeat_count.max(1);
        let delay = Duration::from_millis(self.shared.config.delete_repeat_delay_ms);
        for i in 0..repeats {
            if i > 0 {
                tokio::time::sleep(delay).await;
            }
            if let Err(e) = self.shared.send(&session, BeaconKind::Delete, channel_id).await {
                debug!(channel = %channel_id, error = %e, "delete notification not sent");
            }
        }
        self.shared.repository.delete_channel(channel_id).await;
        info!(channel = %channel_id, repeats, "channel deleted");
        Ok(())
    }

    /// Local-only deletion: suppress and forget, no network I/O.
    pub async fn clear_discovered_channel(&self, channel_id: &ChannelId) {
        self.shared.suppress(channel_id);
    }

    /// Channels currently known from peers, by name.
    pub async fn discovered_channels(&self) -> Vec<DiscoveredChannel> {
        self.shared.table.list()
    }

    pub async fn is_suppressed(&self, channel_id: &ChannelId) -> bool {
        self.shared.suppressed.contains(channel_id)
    }

    /// Process one received beacon datagram.
    pub async fn handle_datagram(&self, bytes: &[u8], from: SocketAddr) {
        self.shared.handle_datagram(bytes, from).await;
    }
}

impl std::fmt::Debug for DiscoveryBeacon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryBeacon")
            .field("group", &self.shared.group)
            .finish_non_exhaustive()
    }
}

impl Shared {
    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    async fn session(&self) -> Result<Arc<Session>, ProtocolError> {
        self.session
            .read()
            .await
            .clone()
            .ok_or(ProtocolError::BeaconNotRunning)
    }

    async fn send(&self, session: &Session, kind: BeaconKind, channel_id: &ChannelId) -> Result<(), ProtocolError> {
        let kind_name = kind.name();
        let mut msg = BeaconMessage::new(
            kind,
            channel_id.clone(),
            session.identity.public(),
            session.name.clone(),
            unix_ms(),
        );
        msg.sign(self.crypto.as_ref(), &session.identity)?;
        session.link.send(&msg.to_bytes()?).await?;
        trace!(channel = %channel_id, kind = kind_name, "beacon sent");
        Ok(())
    }

    /// Suppress first, then forget: an announce racing with this call is
    /// either rejected by the set or removed right after.
    fn suppress(&self, channel_id: &ChannelId) -> bool {
        let newly = self.suppressed.suppress(channel_id.clone());
        self.table.remove(channel_id);
        newly
    }

    /// Record an announce unless the channel is suppressed. The set is
    /// re-checked after the upsert so a concurrent `suppress` always wins.
    fn admit(&self, channel: DiscoveredChannel) -> Option<Upsert> {
        if self.suppressed.contains(&channel.channel_id) {
            return None;
        }
        let channel_id = channel.channel_id.clone();
        let outcome = self.table.upsert(channel);
        if self.suppressed.contains(&channel_id) {
            self.table.remove(&channel_id);
            return None;
        }
        Some(outcome)
    }

    fn emit(&self, event: DiscoveryEvent) {
        if let Err(e) = self.events.try_send(event) {
            debug!(error = %e, "discovery event dropped");
        }
    }

    async fn announce_joined(&self) {
        let Ok(session) = self.session().await else {
            return;
        };
        for joined in self.repository.joined_channels().await {
            if self.suppressed.contains(&joined.id) {
                continue;
            }
            if let Err(e) = self
                .send(&session, BeaconKind::Announce(joined.metadata), &joined.id)
                .await
            {
                debug!(channel = %joined.id, error = %e, "periodic announce failed");
            }
        }
    }

    async fn sweep(&self) {
        let expired = self.table.sweep(self.now_ms(), self.config.stale_timeout_ms);
        for channel_id in expired {
            debug!(channel = %channel_id, "discovered channel expired");
            self.emit(DiscoveryEvent::ChannelExpired { channel_id });
        }
    }

    async fn handle_datagram(&self, bytes: &[u8], from: SocketAddr) {
        let msg = match BeaconMessage::from_bytes(bytes) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(%from, error = %e, "dropping malformed beacon");
                return;
            }
        };

        let local = self.session.read().await.as_ref().map(|s| s.identity.public());
        if local == Some(msg.sender) {
            return;
        }
        if !msg.is_timestamp_valid(unix_ms()) {
            debug!(%from, sender = %msg.sender, timestamp = msg.timestamp, "dropping beacon with bad timestamp");
            return;
        }
        match msg.verify(self.crypto.as_ref()) {
            Ok(true) => {}
            Ok(false) if self.config.accept_unsigned => {}
            Ok(false) => {
                debug!(%from, sender = %msg.sender, "dropping unsigned beacon");
                return;
            }
            Err(e) => {
                debug!(%from, sender = %msg.sender, error = %e, "dropping beacon");
                return;
            }
        }

        let BeaconMessage {
            kind,
            channel_id,
            sender,
            sender_name,
            ..
        } = msg;
        match kind {
            BeaconKind::Announce(metadata) => {
                let channel = DiscoveredChannel {
                    channel_id: channel_id.clone(),
                    metadata,
                    announcer: Announcer {
                        identity: sender,
                        name: sender_name,
                        address: from,
                    },
                    last_seen: self.now_ms(),
                };
                match self.admit(channel.clone()) {
                    None => trace!(channel = %channel_id, "ignoring announce for deleted channel"),
                    Some(Upsert::New) => {
                        debug!(channel = %channel_id, name = %channel.metadata.name, "channel discovered");
                        self.emit(DiscoveryEvent::ChannelDiscovered(channel));
                    }
                    Some(Upsert::Changed) => self.emit(DiscoveryEvent::ChannelUpdated(channel)),
                    Some(Upsert::Refreshed) => {}
                }
            }
            BeaconKind::Delete => {
                if !self.suppress(&channel_id) {
                    return;
                }
                self.repository.delete_channel(&channel_id).await;
                info!(channel = %channel_id, %sender, "channel deleted by peer");
                self.emit(DiscoveryEvent::ChannelDeleted { channel_id, sender });
            }
            BeaconKind::Join => {
                if self.suppressed.contains(&channel_id) {
                    return;
                }
                if self.repository.is_joined(&channel_id).await {
                    debug!(channel = %channel_id, %sender, "join requested");
                    self.emit(DiscoveryEvent::JoinRequested {
                        channel_id,
                        sender,
                        sender_name,
                    });
                }
            }
        }
    }
}

async fn recv_loop(link: Arc<dyn Datagram>, shared: Arc<Shared>, cancel: CancellationToken) {
    let mut buf = vec![0u8; RECV_BUF_LEN];
    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            r = link.recv(&mut buf) => r,
        };
        match received {
            Ok((n, from)) => shared.handle_datagram(&buf[..n], from).await,
            Err(TransportError::NotRunning) => break,
            Err(e) => {
                warn!(error = %e, "beacon receive error");
                tokio::task::yield_now().await;
            }
        }
    }
    debug!("beacon receive loop exited");
}

async fn announce_loop(shared: Arc<Shared>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(Duration::from_millis(shared.config.announce_interval_ms.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => shared.announce_joined().await,
        }
    }
}

async fn sweep_loop(shared: Arc<Shared>, cancel: CancellationToken) {
    let period = Duration::from_millis(shared.config.sweep_interval_ms.max(1));
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => shared.sweep().await,
        }
    }
}
