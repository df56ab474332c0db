use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::crypto::{ChannelKey, CryptoProvider, MeshCrypto};
use crate::frame::{self, AudioPacket, ControlPacket, Frame, Lane};
use crate::link::{Datagram, LinkBinder, LinkOptions, UdpMulticastBinder, DSCP_EF};
use crate::stats::{DropReason, StatsSnapshot, TransportStats};
use crate::{ChannelId, Identity, PeerIdentity, TransportConfig, TransportError};

/// Receive buffer; larger than any datagram we accept.
const RECV_BUF_LEN: usize = 64 * 1024;

/// Signed and encrypted multicast transport with an audio and a control lane.
///
/// `send_*` never fail loudly: they return `false` and log at debug. The
/// receive path drops anything that does not decrypt under the active
/// channel key or whose signature does not match the claimed sender.
///
/// One channel key is active at a time; packets for any other channel
/// fail decryption and are dropped.
pub struct SecureTransport {
    shared: Arc<Shared>,
    binder: Arc<dyn LinkBinder>,
    running: Mutex<Option<Running>>,
}

struct Shared {
    identity: Identity,
    config: TransportConfig,
    crypto: Arc<dyn CryptoProvider>,
    stats: TransportStats,
    active: RwLock<Option<(ChannelId, ChannelKey)>>,
    audio_tx: broadcast::Sender<AudioPacket>,
    control_tx: broadcast::Sender<ControlPacket>,
}

struct Running {
    audio: Arc<dyn Datagram>,
    control: Arc<dyn Datagram>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Drop for Running {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl SecureTransport {
    /// Create a transport on real multicast sockets. Nothing is bound until
    /// [`start`](Self::start).
    pub fn new(identity: Identity, config: TransportConfig) -> Self {
        let crypto: Arc<dyn CryptoProvider> =
            Arc::new(MeshCrypto::with_network_secret(&config.network_secret));
        let capacity = config.recv_buffer.max(1);
        let (audio_tx, _) = broadcast::channel(capacity);
        let (control_tx, _) = broadcast::channel(capacity);

        Self {
            shared: Arc::new(Shared {
                identity,
                config,
                crypto,
                stats: TransportStats::default(),
                active: RwLock::new(None),
                audio_tx,
                control_tx,
            }),
            binder: Arc::new(UdpMulticastBinder),
            running: Mutex::new(None),
        }
    }

    /// Replace the link binder (e.g. a [`MemoryHub`](crate::MemoryHub)).
    pub fn with_binder(mut self, binder: impl LinkBinder) -> Self {
        self.binder = Arc::new(binder);
        self
    }

    /// Replace the crypto provider.
    pub fn with_crypto(mut self, crypto: Arc<dyn CryptoProvider>) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.crypto = crypto;
        }
        self
    }

    /// This node's public identity.
    pub fn id(&self) -> PeerIdentity {
        self.shared.identity.public()
    }

    pub fn identity(&self) -> &Identity {
        &self.shared.identity
    }

    pub fn config(&self) -> &TransportConfig {
        &self.shared.config
    }

    pub fn crypto(&self) -> Arc<dyn CryptoProvider> {
        self.shared.crypto.clone()
    }

    /// The binder lanes are bound with; the discovery beacon shares it.
    pub fn binder(&self) -> Arc<dyn LinkBinder> {
        self.binder.clone()
    }

    /// Join both lane groups and spawn the receive loops. Idempotent.
    pub async fn start(&self) -> Result<(), TransportError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Ok(());
        }
        let config = &self.shared.config;
        config.validate()?;

        let control_opts = config.link_options();
        let audio_opts = LinkOptions {
            dscp: config.dscp_voice.then_some(DSCP_EF),
            ..control_opts.clone()
        };

        let audio = self.binder.bind(config.audio_group, &audio_opts).await?;
        let control = self.binder.bind(config.control_group, &control_opts).await?;

        let cancel = CancellationToken::new();
        let tasks = vec![
            tokio::spawn(recv_loop(
                Lane::Audio,
                audio.clone(),
                self.shared.clone(),
                cancel.clone(),
            )),
            tokio::spawn(recv_loop(
                Lane::Control,
                control.clone(),
                self.shared.clone(),
                cancel.clone(),
            )),
        ];

        tracing::info!(
            id = %self.id(),
            audio = %config.audio_group,
            control = %config.control_group,
            "transport started"
        );
        *running = Some(Running {
            audio,
            control,
            cancel,
            tasks,
        });
        Ok(())
    }

    /// Cancel the receive loops and leave both groups. Idempotent.
    pub async fn stop(&self) {
        let Some(mut running) = self.running.lock().await.take() else {
            return;
        };
        running.cancel.cancel();
        for task in std::mem::take(&mut running.tasks) {
            let _ = task.await;
        }
        tracing::info!(id = %self.id(), "transport stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Install the key for `channel` (or clear it). Rotates on every change.
    pub async fn set_active_channel(&self, channel: Option<ChannelId>) {
        let next = channel.map(|c| {
            let key = self.shared.crypto.derive_channel_key(&c);
            (c, key)
        });
        let mut active = self.shared.active.write().await;
        let changed = active.as_ref().map(|(c, _)| c) != next.as_ref().map(|(c, _)| c);
        if changed {
            tracing::debug!(
                channel = ?next.as_ref().map(|(c, _)| c),
                "active channel key rotated"
            );
        }
        *active = next;
    }

    pub async fn active_channel(&self) -> Option<ChannelId> {
        self.shared.active.read().await.as_ref().map(|(c, _)| c.clone())
    }

    /// Stream of authenticated audio packets.
    pub fn audio_packets(&self) -> broadcast::Receiver<AudioPacket> {
        self.shared.audio_tx.subscribe()
    }

    /// Stream of authenticated control packets.
    pub fn control_packets(&self) -> broadcast::Receiver<ControlPacket> {
        self.shared.control_tx.subscribe()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Frame, seal and send one audio packet. `false` on any failure.
    pub async fn send_audio(
        &self,
        channel: &ChannelId,
        payload: &[u8],
        sequence: u32,
        timestamp: u64,
    ) -> bool {
        let frame = frame::encode_audio(channel, &self.id(), sequence, timestamp, payload);
        self.send_frame(Lane::Audio, channel, &frame).await
    }

    /// Frame, seal and send one control packet. `false` on any failure.
    pub async fn send_control(&self, channel: &ChannelId, payload: &[u8]) -> bool {
        let frame = frame::encode_control(channel, &self.id(), payload);
        self.send_frame(Lane::Control, channel, &frame).await
    }

    async fn send_frame(&self, lane: Lane, channel: &ChannelId, frame: &[u8]) -> bool {
        match self.try_send_frame(lane, channel, frame).await {
            Ok(()) => {
                self.shared.stats.record_sent(lane);
                true
            }
            Err(e) => {
                match e {
                    TransportError::DatagramTooLarge { .. } => {
                        self.shared.stats.record_drop(DropReason::Oversize)
                    }
                    TransportError::Io(_) => self.shared.stats.record_send_error(),
                    _ => {}
                }
                tracing::debug!(%lane, %channel, error = %e, "send failed");
                false
            }
        }
    }

    async fn try_send_frame(
        &self,
        lane: Lane,
        channel: &ChannelId,
        frame: &[u8],
    ) -> Result<(), TransportError> {
        let socket = {
            let running = self.running.lock().await;
            let running = running.as_ref().ok_or(TransportError::NotRunning)?;
            match lane {
                Lane::Audio => running.audio.clone(),
                Lane::Control => running.control.clone(),
            }
        };

        let max = self.shared.config.max_datagram_size;
        let size = frame::sealed_len(frame.len());
        if size > max {
            return Err(TransportError::DatagramTooLarge { size, max });
        }

        let sealed = {
            let active = self.shared.active.read().await;
            let (active_channel, key) = active.as_ref().ok_or(TransportError::NoActiveChannel)?;
            if active_channel != channel {
                return Err(TransportError::NoActiveChannel);
            }
            frame::seal(
                self.shared.crypto.as_ref(),
                &self.shared.identity,
                key,
                frame,
            )?
        };

        socket.send(&sealed).await
    }
}

impl std::fmt::Debug for SecureTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureTransport")
            .field("id", &self.id())
            .finish_non_exhaustive()
    }
}

async fn recv_loop(
    lane: Lane,
    socket: Arc<dyn Datagram>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; RECV_BUF_LEN];
    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            r = socket.recv(&mut buf) => r,
        };
        match received {
            Ok((n, from)) => shared.handle_datagram(lane, &buf[..n], from).await,
            Err(TransportError::NotRunning) => break,
            Err(e) => {
                tracing::debug!(%lane, error = %e, "receive error");
                tokio::task::yield_now().await;
            }
        }
    }
    tracing::debug!(%lane, "receive loop exited");
}

impl Shared {
    async fn handle_datagram(&self, lane: Lane, datagram: &[u8], from: SocketAddr) {
        let opened = {
            let active = self.active.read().await;
            let Some((channel, key)) = active.as_ref() else {
                tracing::debug!(%lane, %from, "dropped: no active channel");
                self.stats.record_drop(DropReason::Decrypt);
                return;
            };
            frame::open(self.crypto.as_ref(), key, lane, datagram)
                .and_then(|f| {
                    if f.channel() == channel {
                        Ok(f)
                    } else {
                        Err(TransportError::MalformedFrame {
                            reason: "channel id does not match key",
                        })
                    }
                })
        };

        let parsed = match opened {
            Ok(parsed) => parsed,
            Err(e) => {
                let reason = match e {
                    TransportError::InvalidSignature => DropReason::Signature,
                    TransportError::MalformedFrame { .. } => DropReason::Malformed,
                    _ => DropReason::Decrypt,
                };
                tracing::debug!(%lane, %from, error = %e, "dropped inbound datagram");
                self.stats.record_drop(reason);
                return;
            }
        };

        if parsed.sender() == self.identity.public() {
            self.stats.record_drop(DropReason::SelfOriginated);
            return;
        }

        self.stats.record_received(lane);
        // No subscribers is fine: best-effort delivery
        match parsed {
            Frame::Audio(p) => {
                let _ = self.audio_tx.send(p);
            }
            Frame::Control(p) => {
                let _ = self.control_tx.send(p);
            }
        }
    }
}
