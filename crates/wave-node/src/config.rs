use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;
use tracing::warn;
use wave_protocol::{BeaconConfig, ChannelId, ChannelMetadata, PeerIdentity, Priority, RuntimeConfig};
use wave_transport::{Identity, TransportConfig};

/// Node configuration file (TOML). Every section is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeConfig {
    /// File holding the hex Ed25519 seed. Missing = ephemeral identity.
    pub identity_file: Option<PathBuf>,
    /// Name shown to peers in discovery beacons.
    pub name: Option<String>,
    pub transport: TransportConfig,
    pub runtime: RuntimeConfig,
    pub beacon: BeaconConfig,
    pub channels: Vec<ChannelEntry>,
}

/// A channel joined at startup.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelEntry {
    pub name: String,
    /// Base64 channel id. Defaults to the UTF-8 bytes of `name`.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
}

impl ChannelEntry {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            id: None,
            description: String::new(),
            priority: Priority::Normal,
        }
    }

    pub fn channel_id(&self) -> anyhow::Result<ChannelId> {
        match &self.id {
            Some(b64) => ChannelId::from_base64(b64).with_context(|| format!("invalid channel id '{b64}'")),
            None => ChannelId::from_bytes(self.name.as_bytes().to_vec())
                .with_context(|| format!("invalid channel name '{}'", self.name)),
        }
    }

    pub fn metadata(&self, creator: PeerIdentity) -> ChannelMetadata {
        ChannelMetadata {
            name: self.name.clone(),
            description: self.description.clone(),
            priority: self.priority,
            member_count: 1,
            creator_key: creator,
        }
    }
}

impl NodeConfig {
    /// Read and parse a config file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Identity from `identity_file`, or a fresh one if none is configured.
    pub fn identity(&self) -> anyhow::Result<Identity> {
        match &self.identity_file {
            Some(path) => load_identity(path),
            None => {
                warn!("no identity_file configured, using an ephemeral identity");
                Ok(Identity::generate())
            }
        }
    }

    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| "wave-node".to_string())
    }
}

pub fn load_identity(path: &Path) -> anyhow::Result<Identity> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("failed to read identity {}", path.display()))?;
    Identity::from_hex_seed(contents.trim()).with_context(|| format!("invalid identity in {}", path.display()))
}

pub fn write_identity(path: &Path, identity: &Identity) -> anyhow::Result<()> {
    if path.exists() {
        anyhow::bail!("{} already exists", path.display());
    }
    fs::write(path, format!("{}\n", identity.to_hex_seed()))
        .with_context(|| format!("failed to write {}", path.display()))
}
