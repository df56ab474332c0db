use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use wave_protocol::{
    ChannelId, ChannelRepository, DiscoveryBeacon, DiscoveryEvent, FloorEvent, FloorHandle, FloorRuntime,
    InMemoryChannelRepository, PeerIdentity,
};
use wave_transport::{Identity, SecureTransport};

use crate::command::{Command, HELP};
use crate::config::{ChannelEntry, NodeConfig};

/// A running node: transport, discovery beacon and floor runtime.
pub struct Session {
    local: PeerIdentity,
    transport: Arc<SecureTransport>,
    beacon: DiscoveryBeacon,
    repository: Arc<InMemoryChannelRepository>,
    floor: FloorHandle,
    /// Joined channels by name.
    channels: BTreeMap<String, ChannelId>,
    current: Option<String>,
}

pub struct Streams {
    pub floor: mpsc::Receiver<FloorEvent>,
    pub discovery: mpsc::Receiver<DiscoveryEvent>,
}

impl Session {
    pub async fn start(config: &NodeConfig, identity: Identity) -> anyhow::Result<(Self, Streams)> {
        Self::start_on(config, SecureTransport::new(identity, config.transport.clone())).await
    }

    /// Start on an already configured, not yet started transport.
    pub async fn start_on(config: &NodeConfig, transport: SecureTransport) -> anyhow::Result<(Self, Streams)> {
        let name = config.display_name();
        let identity = transport.identity().clone();
        let transport = Arc::new(transport);
        transport.start().await.context("transport start failed")?;

        let repository = Arc::new(InMemoryChannelRepository::new());
        let (beacon, discovery) = DiscoveryBeacon::for_transport(&transport, repository.clone(), config.beacon.clone());
        beacon.start(identity, name.clone()).await.context("discovery beacon start failed")?;

        let (floor, floor_events) = FloorRuntime::spawn(transport.clone(), config.runtime.clone());
        info!(id = %transport.id(), %name, "node started");

        let session = Self {
            local: transport.id(),
            transport,
            beacon,
            repository,
            floor,
            channels: BTreeMap::new(),
            current: None,
        };
        Ok((
            session,
            Streams {
                floor: floor_events,
                discovery,
            },
        ))
    }

    pub async fn join(&mut self, entry: &ChannelEntry) -> anyhow::Result<()> {
        let id = entry.channel_id()?;
        self.floor.join_channel(id.clone()).await?;
        self.repository.upsert_channel(id.clone(), entry.metadata(self.local)).await;
        self.beacon.announce_channel(&id, &entry.metadata(self.local)).await?;
        self.channels.insert(entry.name.clone(), id);
        self.current.get_or_insert_with(|| entry.name.clone());
        println!("joined {}", entry.name);
        Ok(())
    }

    pub async fn become_arbiter_everywhere(&self) -> anyhow::Result<()> {
        for id in self.channels.values() {
            self.floor.become_arbiter(id).await?;
        }
        Ok(())
    }

    /// Run until `quit`, end of input or Ctrl+C.
    pub async fn run(mut self, mut streams: Streams) -> anyhow::Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        println!("type 'help' for commands");
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else { break };
                    if line.trim().is_empty() {
                        continue;
                    }
                    match line.parse::<Command>() {
                        Ok(Command::Quit) => break,
                        Ok(command) => {
                            if let Err(e) = self.execute(command).await {
                                println!("error: {e:#}");
                            }
                        }
                        Err(e) => println!("{e}"),
                    }
                }
                Some(event) = streams.floor.recv() => print_floor_event(&self.channels, &event),
                Some(event) = streams.discovery.recv() => self.on_discovery(event).await,
                _ = tokio::signal::ctrl_c() => {
                    eprintln!("\nCtrl+C received, shutting down...");
                    break;
                }
            }
        }
        self.shutdown().await;
        Ok(())
    }

    async fn execute(&mut self, command: Command) -> anyhow::Result<()> {
        match command {
            Command::Talk { channel, priority } => {
                let id = self.resolve(channel.as_deref())?;
                let request = self.floor.request_floor(&id, priority).await?;
                println!("requested floor ({priority}) as {request}");
            }
            Command::Release(channel) => self.floor.release_floor(&self.resolve(channel.as_deref())?).await?,
            Command::Cancel(channel) => self.floor.cancel_request(&self.resolve(channel.as_deref())?).await?,
            Command::Arbiter(channel) => self.floor.become_arbiter(&self.resolve(channel.as_deref())?).await?,
            Command::Resign(channel) => self.floor.resign_arbiter(&self.resolve(channel.as_deref())?).await?,
            Command::Elect(channel) => self.floor.start_election(&self.resolve(channel.as_deref())?).await?,
            Command::Status(channel) => {
                let id = self.resolve(channel.as_deref())?;
                let state = self.floor.floor_state(&id).await?;
                let holder = self.floor.floor_holder(&id).await?;
                let arbitration = self.floor.arbitration_state(&id).await?;
                println!(
                    "floor={state:?} holder={} role={:?} primary={} queue={} healthy={}",
                    describe(holder, self.local),
                    arbitration.role,
                    describe(arbitration.primary, self.local),
                    arbitration.queue_size,
                    arbitration.healthy,
                );
            }
            Command::Use(name) => {
                self.resolve(Some(&name))?;
                self.current = Some(name);
            }
            Command::Join(name) => self.join(&ChannelEntry::named(&name)).await?,
            Command::Leave(name) => self.leave(&name).await?,
            Command::Delete(name) => {
                let id = self.resolve(Some(&name))?;
                self.beacon.announce_channel_deleted(&id).await?;
                self.forget(&name, &id).await?;
                println!("deleted {name}");
            }
            Command::Channels => {
                for (name, id) in &self.channels {
                    let marker = if self.current.as_deref() == Some(name) { "*" } else { " " };
                    println!("{marker} {name} ({id})");
                }
            }
            Command::Discovered => {
                for found in self.beacon.discovered_channels().await {
                    println!(
                        "  {} ({}) by {} at {} [{}]",
                        found.metadata.name,
                        found.channel_id,
                        found.announcer.name,
                        found.announcer.address,
                        found.metadata.priority,
                    );
                }
            }
            Command::Help => println!("{HELP}"),
            Command::Quit => {}
        }
        Ok(())
    }

    /// Leave locally and stop admitting peer announces for the channel.
    pub async fn leave(&mut self, name: &str) -> anyhow::Result<()> {
        let id = self.resolve(Some(name))?;
        self.forget(name, &id).await?;
        self.repository.delete_channel(&id).await;
        self.beacon.clear_discovered_channel(&id).await;
        println!("left {name}");
        Ok(())
    }

    async fn on_discovery(&mut self, event: DiscoveryEvent) {
        match &event {
            DiscoveryEvent::ChannelDiscovered(found) => println!(
                "[discovery] found {} ({}) from {}",
                found.metadata.name, found.channel_id, found.announcer.name
            ),
            DiscoveryEvent::ChannelUpdated(found) => {
                println!("[discovery] updated {} ({})", found.metadata.name, found.channel_id)
            }
            DiscoveryEvent::ChannelExpired { channel_id } => println!("[discovery] expired {channel_id}"),
            DiscoveryEvent::JoinRequested {
                channel_id,
                sender_name,
                ..
            } => println!("[discovery] {sender_name} wants to join {channel_id}"),
            DiscoveryEvent::ChannelDeleted { channel_id, sender } => {
                println!("[discovery] {channel_id} deleted by {sender}");
                let joined = self
                    .channels
                    .iter()
                    .find(|(_, id)| *id == channel_id)
                    .map(|(name, id)| (name.clone(), id.clone()));
                if let Some((name, id)) = joined {
                    if let Err(e) = self.forget(&name, &id).await {
                        warn!(channel = %id, error = %e, "leaving deleted channel failed");
                    }
                }
            }
        }
    }

    async fn forget(&mut self, name: &str, id: &ChannelId) -> anyhow::Result<()> {
        self.channels.remove(name);
        if self.current.as_deref() == Some(name) {
            self.current = self.channels.keys().next().cloned();
        }
        self.floor.leave_channel(id).await?;
        Ok(())
    }

    fn resolve(&self, name: Option<&str>) -> anyhow::Result<ChannelId> {
        let name = name
            .or(self.current.as_deref())
            .context("no channel joined")?;
        self.channels
            .get(name)
            .cloned()
            .with_context(|| format!("not joined to '{name}'"))
    }

    async fn shutdown(self) {
        debug!("shutting down");
        self.floor.shutdown().await;
        self.beacon.stop().await;
        self.transport.stop().await;
        let stats = self.transport.stats();
        info!(?stats, "node stopped");
    }
}

fn describe(peer: Option<PeerIdentity>, local: PeerIdentity) -> String {
    match peer {
        Some(p) if p == local => "me".to_string(),
        Some(p) => format!("{p:?}"),
        None => "-".to_string(),
    }
}

fn channel_name(channels: &BTreeMap<String, ChannelId>, id: &ChannelId) -> String {
    channels
        .iter()
        .find(|(_, known)| *known == id)
        .map(|(name, _)| name.clone())
        .unwrap_or_else(|| id.to_string())
}

fn print_floor_event(channels: &BTreeMap<String, ChannelId>, event: &FloorEvent) {
    let channel = channel_name(channels, event.channel());
    match event {
        FloorEvent::StateChanged { state, .. } => println!("[{channel}] floor {state:?}"),
        FloorEvent::Granted { duration_ms, .. } => {
            println!("[{channel}] >>> you have the floor ({}s)", duration_ms / 1000)
        }
        FloorEvent::Denied { reason, .. } => println!("[{channel}] denied: {reason}"),
        FloorEvent::Queued { position, total, .. } => println!("[{channel}] queued {position}/{total}"),
        FloorEvent::Revoked { reason, .. } => println!("[{channel}] <<< floor revoked: {reason}"),
        FloorEvent::RequestTimedOut { .. } => println!("[{channel}] request timed out"),
        FloorEvent::HolderChanged { holder, .. } => match holder {
            Some(h) => println!("[{channel}] {h:?} is talking"),
            None => println!("[{channel}] floor free"),
        },
        FloorEvent::RoleChanged { role, .. } => println!("[{channel}] role {role:?}"),
        FloorEvent::PrimaryChanged { primary, .. } => match primary {
            Some(p) => println!("[{channel}] arbiter {p:?}"),
            None => println!("[{channel}] no arbiter"),
        },
        FloorEvent::ChannelUnreachable { reason, .. } => println!("[{channel}] unreachable: {reason}"),
    }
}
