//! Integration tests: several transports on one in-memory segment.

use std::time::Duration;

use wave_transport::{ChannelId, Identity, MemoryHub, SecureTransport, TransportConfig};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_env_filter("warn").try_init();
}

fn transport(hub: &MemoryHub, seed: u8, secret: &str) -> SecureTransport {
    SecureTransport::new(
        Identity::from_seed(&[seed; 32]),
        TransportConfig::new().network_secret(secret),
    )
    .with_binder(hub.clone())
}

#[tokio::test]
async fn audio_reaches_every_peer_on_the_channel() {
    init_tracing();
    let hub = MemoryHub::new();
    let channel = ChannelId::random();
    let nodes: Vec<_> = (1..=3).map(|i| transport(&hub, i, "mesh")).collect();
    for n in &nodes {
        n.start().await.unwrap();
        n.set_active_channel(Some(channel.clone())).await;
    }
    let mut rx_b = nodes[1].audio_packets();
    let mut rx_c = nodes[2].audio_packets();

    assert!(nodes[0].send_audio(&channel, b"opus-frame", 17, 123_456).await);

    for rx in [&mut rx_b, &mut rx_c] {
        let p = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out")
            .unwrap();
        assert_eq!(p.sender, nodes[0].id());
        assert_eq!(p.sequence, 17);
        assert_eq!(p.timestamp, 123_456);
        assert_eq!(&p.payload[..], b"opus-frame");
    }

    for n in &nodes {
        n.stop().await;
    }
}

#[tokio::test]
async fn other_channel_traffic_is_dropped() {
    init_tracing();
    let hub = MemoryHub::new();
    let a = transport(&hub, 1, "mesh");
    let b = transport(&hub, 2, "mesh");
    let alpha = ChannelId::from_bytes(b"alpha".to_vec()).unwrap();
    let bravo = ChannelId::from_bytes(b"bravo".to_vec()).unwrap();

    a.start().await.unwrap();
    b.start().await.unwrap();
    a.set_active_channel(Some(alpha.clone())).await;
    b.set_active_channel(Some(bravo)).await;
    let mut rx = b.control_packets();

    assert!(a.send_control(&alpha, &[8]).await);
    let got = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
    assert!(got.is_err(), "packet for another channel must not surface");

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(b.stats().dropped_decrypt, 1);

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn network_secret_partitions_the_mesh() {
    init_tracing();
    let hub = MemoryHub::new();
    let a = transport(&hub, 1, "team-red");
    let b = transport(&hub, 2, "team-blue");
    let channel = ChannelId::from_bytes(b"shared-name".to_vec()).unwrap();
    for t in [&a, &b] {
        t.start().await.unwrap();
        t.set_active_channel(Some(channel.clone())).await;
    }
    let mut rx = b.control_packets();

    assert!(a.send_control(&channel, &[8]).await);
    assert!(tokio::time::timeout(Duration::from_millis(100), rx.recv())
        .await
        .is_err());

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn key_rotation_follows_active_channel() {
    init_tracing();
    let hub = MemoryHub::new();
    let a = transport(&hub, 1, "");
    let b = transport(&hub, 2, "");
    let first = ChannelId::from_bytes(b"first".to_vec()).unwrap();
    let second = ChannelId::from_bytes(b"second".to_vec()).unwrap();
    for t in [&a, &b] {
        t.start().await.unwrap();
        t.set_active_channel(Some(first.clone())).await;
    }
    let mut rx = b.control_packets();

    // Switching the sender only: the receiver still holds the old key
    a.set_active_channel(Some(second.clone())).await;
    assert!(!a.send_control(&first, &[1]).await);
    assert!(a.send_control(&second, &[2]).await);
    assert!(tokio::time::timeout(Duration::from_millis(100), rx.recv())
        .await
        .is_err());

    b.set_active_channel(Some(second.clone())).await;
    assert!(a.send_control(&second, &[3]).await);
    let p = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&p.payload[..], &[3]);
    assert_eq!(p.channel, second);

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn restart_after_stop() {
    init_tracing();
    let hub = MemoryHub::new();
    let a = transport(&hub, 1, "");
    let b = transport(&hub, 2, "");
    let channel = ChannelId::random();
    for t in [&a, &b] {
        t.start().await.unwrap();
        t.set_active_channel(Some(channel.clone())).await;
    }

    a.stop().await;
    a.stop().await;
    assert!(!a.send_control(&channel, &[1]).await);

    a.start().await.unwrap();
    let mut rx = b.control_packets();
    assert!(a.send_control(&channel, &[4]).await);
    let p = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&p.payload[..], &[4]);

    a.stop().await;
    b.stop().await;
}
