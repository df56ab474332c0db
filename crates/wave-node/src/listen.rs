use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use wave_protocol::{DiscoveryBeacon, DiscoveryEvent, InMemoryChannelRepository};
use wave_transport::{Identity, SecureTransport};

use crate::config::NodeConfig;

/// Watch the discovery group for `seconds`, then print what was seen.
pub async fn run(config: &NodeConfig, identity: Identity, seconds: u64) -> anyhow::Result<()> {
    let transport = SecureTransport::new(identity.clone(), config.transport.clone());
    let (beacon, mut events) = DiscoveryBeacon::for_transport(
        &transport,
        Arc::new(InMemoryChannelRepository::new()),
        config.beacon.clone(),
    );
    beacon
        .start(identity, config.display_name())
        .await
        .context("discovery beacon start failed")?;
    eprintln!("Listening for channel announcements for {seconds}s...");

    let deadline = tokio::time::sleep(Duration::from_secs(seconds));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\nCtrl+C received, stopping...");
                break;
            }
            Some(event) = events.recv() => match event {
                DiscoveryEvent::ChannelDiscovered(found) => {
                    eprintln!("  + {} from {} ({})", found.metadata.name, found.announcer.name, found.announcer.address)
                }
                DiscoveryEvent::ChannelDeleted { channel_id, sender } => {
                    eprintln!("  - {channel_id} deleted by {sender:?}")
                }
                DiscoveryEvent::ChannelExpired { channel_id } => eprintln!("  ~ {channel_id} expired"),
                _ => {}
            },
        }
    }

    let found = beacon.discovered_channels().await;
    beacon.stop().await;

    println!("{} channel(s):", found.len());
    for channel in found {
        println!(
            "{}\t{}\t{}\t{} members\t{}",
            channel.channel_id,
            channel.metadata.name,
            channel.metadata.priority,
            channel.metadata.member_count,
            channel.announcer.name,
        );
    }
    Ok(())
}
