//! Integration tests: discovery beacons on one in-memory segment.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use wave_protocol::{
    unix_ms, BeaconConfig, BeaconKind, BeaconMessage, ChannelId, ChannelMetadata, ChannelRepository,
    DiscoveryBeacon, DiscoveryEvent, InMemoryChannelRepository, Priority,
};
use wave_transport::{Identity, LinkOptions, MemoryHub, MeshCrypto, DEFAULT_DISCOVERY_GROUP};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_env_filter("warn").try_init();
}

fn beacon(
    hub: &MemoryHub,
    repo: Arc<InMemoryChannelRepository>,
    config: BeaconConfig,
) -> (DiscoveryBeacon, mpsc::Receiver<DiscoveryEvent>) {
    DiscoveryBeacon::new(
        Arc::new(hub.clone()),
        Arc::new(MeshCrypto::new()),
        repo,
        DEFAULT_DISCOVERY_GROUP,
        LinkOptions::default(),
        config,
    )
}

fn metadata(identity: &Identity, name: &str) -> ChannelMetadata {
    ChannelMetadata {
        name: name.into(),
        description: "field team".into(),
        priority: Priority::Normal,
        member_count: 3,
        creator_key: identity.public(),
    }
}

fn signed(identity: &Identity, kind: BeaconKind, channel: &ChannelId, timestamp: u64) -> Vec<u8> {
    let mut msg = BeaconMessage::new(kind, channel.clone(), identity.public(), "remote", timestamp);
    msg.sign(&MeshCrypto::new(), identity).unwrap();
    msg.to_bytes().unwrap()
}

async fn next_event(rx: &mut mpsc::Receiver<DiscoveryEvent>) -> DiscoveryEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out")
        .expect("channel closed")
}

fn from() -> SocketAddr {
    "10.0.0.7:5006".parse().unwrap()
}

#[tokio::test]
async fn announce_then_delete_across_nodes() {
    init_tracing();
    let hub = MemoryHub::new();
    let channel = ChannelId::random();
    let alice = Identity::from_seed(&[1; 32]);
    let bob = Identity::from_seed(&[2; 32]);

    let alice_repo = Arc::new(InMemoryChannelRepository::new());
    alice_repo
        .upsert_channel(channel.clone(), metadata(&alice, "rescue"))
        .await;
    let bob_repo = Arc::new(InMemoryChannelRepository::new());
    bob_repo.upsert_channel(channel.clone(), metadata(&alice, "rescue")).await;

    let (a, _a_events) = beacon(&hub, alice_repo.clone(), BeaconConfig::default());
    let (b, mut b_events) = beacon(&hub, bob_repo.clone(), BeaconConfig::default());
    b.start(bob.clone(), "bob").await.unwrap();
    a.start(alice.clone(), "alice").await.unwrap();

    // First announce tick fires immediately
    match next_event(&mut b_events).await {
        DiscoveryEvent::ChannelDiscovered(found) => {
            assert_eq!(found.channel_id, channel);
            assert_eq!(found.metadata.name, "rescue");
            assert_eq!(found.announcer.identity, alice.public());
            assert_eq!(found.announcer.name, "alice");
        }
        other => panic!("expected discovery, got {other:?}"),
    }

    a.announce_channel_deleted(&channel).await.unwrap();
    assert!(a.is_suppressed(&channel).await);
    assert!(!alice_repo.is_joined(&channel).await);

    match next_event(&mut b_events).await {
        DiscoveryEvent::ChannelDeleted { channel_id, sender } => {
            assert_eq!(channel_id, channel);
            assert_eq!(sender, alice.public());
        }
        other => panic!("expected deletion, got {other:?}"),
    }
    assert!(b.is_suppressed(&channel).await);
    assert!(b.discovered_channels().await.is_empty());
    assert!(!bob_repo.is_joined(&channel).await);

    // Announcing a deleted channel is a silent no-op
    a.announce_channel(&channel, &metadata(&alice, "rescue")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(b_events.try_recv().is_err());

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn local_delete_ignores_later_announce() {
    init_tracing();
    let hub = MemoryHub::new();
    let config = BeaconConfig {
        delete_repeat_delay_ms: 1,
        ..BeaconConfig::default()
    };
    let (a, mut events) = beacon(&hub, Arc::new(InMemoryChannelRepository::new()), config);
    a.start(Identity::from_seed(&[1; 32]), "alice").await.unwrap();
    let remote = Identity::from_seed(&[7; 32]);
    let channel = ChannelId::random();
    let announce = || signed(&remote, BeaconKind::Announce(metadata(&remote, "ops")), &channel, unix_ms());

    a.handle_datagram(&announce(), from()).await;
    assert!(matches!(events.try_recv(), Ok(DiscoveryEvent::ChannelDiscovered(_))));

    a.announce_channel_deleted(&channel).await.unwrap();
    assert!(a.discovered_channels().await.is_empty());

    a.handle_datagram(&announce(), from()).await;
    a.handle_datagram(&announce(), from()).await;
    assert!(events.try_recv().is_err());
    assert!(a.discovered_channels().await.is_empty());

    a.stop().await;
}

#[tokio::test]
async fn cleared_channel_ignores_later_announce() {
    let hub = MemoryHub::new();
    let (a, mut events) = beacon(&hub, Arc::new(InMemoryChannelRepository::new()), BeaconConfig::default());
    let remote = Identity::from_seed(&[7; 32]);
    let channel = ChannelId::random();

    a.clear_discovered_channel(&channel).await;
    a.handle_datagram(
        &signed(&remote, BeaconKind::Announce(metadata(&remote, "ops")), &channel, unix_ms()),
        from(),
    )
    .await;
    assert!(events.try_recv().is_err());
    assert!(a.discovered_channels().await.is_empty());
}

#[tokio::test]
async fn delete_before_announce_suppresses_late_announce() {
    init_tracing();
    let hub = MemoryHub::new();
    let (b, mut events) = beacon(&hub, Arc::new(InMemoryChannelRepository::new()), BeaconConfig::default());
    let remote = Identity::from_seed(&[7; 32]);
    let channel = ChannelId::random();
    let now = unix_ms();

    // Delivered out of order: the delete (sent later) arrives first
    let announce = signed(&remote, BeaconKind::Announce(metadata(&remote, "ops")), &channel, now - 1_000);
    let delete = signed(&remote, BeaconKind::Delete, &channel, now);
    b.handle_datagram(&delete, from()).await;
    b.handle_datagram(&announce, from()).await;
    b.handle_datagram(&announce, from()).await;

    assert!(matches!(
        events.try_recv(),
        Ok(DiscoveryEvent::ChannelDeleted { .. })
    ));
    assert!(events.try_recv().is_err());
    assert!(b.discovered_channels().await.is_empty());

    // Join requests for a deleted channel are ignored too
    b.handle_datagram(&signed(&remote, BeaconKind::Join, &channel, now), from()).await;
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn unsigned_accepted_only_when_configured() {
    init_tracing();
    let hub = MemoryHub::new();
    let config = BeaconConfig {
        accept_unsigned: true,
        ..BeaconConfig::default()
    };
    let (b, mut events) = beacon(&hub, Arc::new(InMemoryChannelRepository::new()), config);
    let remote = Identity::from_seed(&[7; 32]);
    let channel = ChannelId::random();

    let unsigned = BeaconMessage::new(
        BeaconKind::Announce(metadata(&remote, "legacy")),
        channel.clone(),
        remote.public(),
        "legacy-node",
        unix_ms(),
    );
    b.handle_datagram(&unsigned.to_bytes().unwrap(), from()).await;
    assert!(matches!(events.try_recv(), Ok(DiscoveryEvent::ChannelDiscovered(_))));

    // A present but wrong signature is still rejected
    let mut forged = unsigned.clone();
    forged.signature = Some("AAAA".into());
    forged.channel_id = ChannelId::random();
    b.handle_datagram(&forged.to_bytes().unwrap(), from()).await;
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn stale_timestamps_dropped() {
    init_tracing();
    let hub = MemoryHub::new();
    let (b, mut events) = beacon(&hub, Arc::new(InMemoryChannelRepository::new()), BeaconConfig::default());
    let remote = Identity::from_seed(&[7; 32]);
    let channel = ChannelId::random();
    let now = unix_ms();

    let old = signed(&remote, BeaconKind::Announce(metadata(&remote, "old")), &channel, now - 2 * 60 * 60 * 1000);
    let future = signed(&remote, BeaconKind::Announce(metadata(&remote, "new")), &channel, now + 10 * 60 * 1000);
    b.handle_datagram(&old, from()).await;
    b.handle_datagram(&future, from()).await;
    assert!(events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn unrefreshed_channels_expire() {
    init_tracing();
    let hub = MemoryHub::new();
    let config = BeaconConfig {
        stale_timeout_ms: 1_000,
        sweep_interval_ms: 500,
        ..BeaconConfig::default()
    };
    let (b, mut events) = beacon(&hub, Arc::new(InMemoryChannelRepository::new()), config);
    b.start(Identity::from_seed(&[3; 32]), "observer").await.unwrap();
    let remote = Identity::from_seed(&[7; 32]);
    let channel = ChannelId::random();

    b.handle_datagram(
        &signed(&remote, BeaconKind::Announce(metadata(&remote, "ops")), &channel, unix_ms()),
        from(),
    )
    .await;
    assert!(matches!(events.recv().await, Some(DiscoveryEvent::ChannelDiscovered(_))));

    tokio::time::sleep(Duration::from_millis(1_600)).await;
    assert!(matches!(
        events.recv().await,
        Some(DiscoveryEvent::ChannelExpired { channel_id }) if channel_id == channel
    ));
    assert!(b.discovered_channels().await.is_empty());
    // Expiry is not deletion
    assert!(!b.is_suppressed(&channel).await);
    b.stop().await;
}
