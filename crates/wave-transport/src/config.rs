use std::net::{Ipv4Addr, SocketAddrV4};

use serde::Deserialize;

use crate::link::LinkOptions;

/// Audio lane group. Port 5004 is the RTP port of the radio firmware.
pub const DEFAULT_AUDIO_GROUP: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(239, 255, 77, 1), 5004);

/// Control lane group (floor control, arbitration).
pub const DEFAULT_CONTROL_GROUP: SocketAddrV4 =
    SocketAddrV4::new(Ipv4Addr::new(239, 255, 77, 2), 5005);

/// Channel discovery beacon group.
pub const DEFAULT_DISCOVERY_GROUP: SocketAddrV4 =
    SocketAddrV4::new(Ipv4Addr::new(239, 255, 77, 3), 5006);

/// Largest datagram we put on the wire (MTU-safe on the mesh radios).
pub const DEFAULT_MAX_DATAGRAM_SIZE: usize = 1400;

/// Configuration for a [`SecureTransport`](crate::SecureTransport).
///
/// All fields have sensible defaults. Use the builder pattern:
///
/// ```rust
/// use wave_transport::TransportConfig;
///
/// let config = TransportConfig::new()
///     .max_datagram_size(1200)
///     .recv_buffer(512);
/// ```
///
/// Also deserializable (every field optional) so nodes can load it from a
/// config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransportConfig {
    /// Multicast group + port of the audio lane.
    pub audio_group: SocketAddrV4,
    /// Multicast group + port of the control lane.
    pub control_group: SocketAddrV4,
    /// Multicast group + port of the discovery beacon.
    pub discovery_group: SocketAddrV4,
    /// Local interface used to join groups.
    pub interface: Ipv4Addr,
    /// Multicast TTL (hops). Mesh radios bridge at layer 2, so 1 is enough.
    pub multicast_ttl: u32,
    /// Receive our own multicast traffic (filtered by identity afterwards).
    pub multicast_loop: bool,
    /// Mark audio traffic DSCP EF (46).
    pub dscp_voice: bool,
    /// Maximum outbound datagram size in bytes.
    pub max_datagram_size: usize,
    /// Capacity of each lane's packet stream.
    pub recv_buffer: usize,
    /// Shared network secret mixed into every channel key. Empty = none.
    pub network_secret: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportConfig {
    /// Create a new config with defaults.
    ///
    /// If the `WAVE_NETWORK_SECRET` environment variable is set, it is used
    /// as the network secret. This can be overridden with
    /// [`.network_secret()`](Self::network_secret).
    pub fn new() -> Self {
        let network_secret = std::env::var("WAVE_NETWORK_SECRET").unwrap_or_default();

        Self {
            audio_group: DEFAULT_AUDIO_GROUP,
            control_group: DEFAULT_CONTROL_GROUP,
            discovery_group: DEFAULT_DISCOVERY_GROUP,
            interface: Ipv4Addr::UNSPECIFIED,
            multicast_ttl: 1,
            multicast_loop: true,
            dscp_voice: true,
            max_datagram_size: DEFAULT_MAX_DATAGRAM_SIZE,
            recv_buffer: 256,
            network_secret,
        }
    }

    /// Set the audio lane group.
    pub fn audio_group(mut self, group: SocketAddrV4) -> Self {
        self.audio_group = group;
        self
    }

    /// Set the control lane group.
    pub fn control_group(mut self, group: SocketAddrV4) -> Self {
        self.control_group = group;
        self
    }

    /// Set the discovery beacon group.
    pub fn discovery_group(mut self, group: SocketAddrV4) -> Self {
        self.discovery_group = group;
        self
    }

    /// Join groups on a specific interface (default: any).
    pub fn interface(mut self, interface: Ipv4Addr) -> Self {
        self.interface = interface;
        self
    }

    /// Set the multicast TTL (default: 1).
    pub fn multicast_ttl(mut self, ttl: u32) -> Self {
        self.multicast_ttl = ttl;
        self
    }

    /// Enable or disable DSCP EF marking on the audio lane (default: on).
    pub fn dscp_voice(mut self, enabled: bool) -> Self {
        self.dscp_voice = enabled;
        self
    }

    /// Set maximum outbound datagram size (default: 1400 bytes).
    pub fn max_datagram_size(mut self, bytes: usize) -> Self {
        self.max_datagram_size = bytes;
        self
    }

    /// Set the capacity of each lane's packet stream (default: 256).
    pub fn recv_buffer(mut self, capacity: usize) -> Self {
        self.recv_buffer = capacity;
        self
    }

    /// Set the shared network secret used when deriving channel keys.
    pub fn network_secret(mut self, secret: impl Into<String>) -> Self {
        self.network_secret = secret.into();
        self
    }

    /// Socket options shared by every group this config binds.
    pub fn link_options(&self) -> LinkOptions {
        LinkOptions {
            interface: self.interface,
            ttl: self.multicast_ttl,
            loopback: self.multicast_loop,
            dscp: None,
        }
    }

    /// Check values that would otherwise fail later at bind/send time.
    pub fn validate(&self) -> Result<(), crate::TransportError> {
        for group in [self.audio_group, self.control_group, self.discovery_group] {
            if !group.ip().is_multicast() {
                return Err(crate::TransportError::Config(format!(
                    "{group} is not a multicast address"
                )));
            }
        }
        if self.recv_buffer == 0 {
            return Err(crate::TransportError::Config("recv_buffer must be > 0".into()));
        }
        if self.max_datagram_size < crate::frame::MIN_DATAGRAM_LEN {
            return Err(crate::TransportError::Config(format!(
                "max_datagram_size {} is below the minimum sealed packet size",
                self.max_datagram_size
            )));
        }
        Ok(())
    }
}
