// Copyright (c) 2024 Botho Foundation

//! Configuration for the gossip daemon.
//!
//! Deserializable from a TOML file via `serde`, overridable field-by-field
//! from the CLI, and buildable programmatically for tests via
//! [`GossipConfigBuilder`].

use crate::ids::NodeId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Identifies the chain this daemon's nodes must agree on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainHash(pub [u8; 32]);

impl Default for ChainHash {
    fn default() -> Self {
        // bitcoin mainnet genesis block hash, double-sha256'd, as the
        // external protocol defines "chain_hash".
        ChainHash([
            0x6f, 0xe2, 0x8c, 0x0a, 0xb6, 0xf1, 0xb3, 0x72, 0xc1, 0xa6, 0xa2, 0x46, 0xae, 0x63,
            0xf7, 0x4f, 0x93, 0x1e, 0x83, 0x65, 0xe1, 0x5a, 0x08, 0x9c, 0x68, 0xd6, 0x19, 0x00,
            0x00, 0x00, 0x00, 0x00,
        ])
    }
}

/// Configuration for the gossip engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipConfig {
    /// Chain this daemon's peers must agree on.
    #[serde(default)]
    pub chain_hash: ChainHash,

    /// This node's own id, used to recognize locally-owned channels.
    pub local_node_id: NodeId,

    /// Feature bits advertised in our own node_announcement.
    #[serde(default)]
    pub globalfeatures: Vec<u8>,

    /// 3-byte RGB color for our node_announcement.
    #[serde(default)]
    pub rgb: [u8; 3],

    /// 32-byte alias for our node_announcement.
    #[serde(default)]
    pub alias: [u8; 32],

    /// Addresses we announce ourselves as reachable on.
    #[serde(default)]
    pub announceable_addresses: Vec<crate::codec::WireAddress>,

    /// Milliseconds between broadcast-log flush attempts per peer.
    #[serde(default = "default_broadcast_interval_msec")]
    pub broadcast_interval_msec: u64,

    /// Seconds between re-issuing updates for locally owned channels.
    #[serde(default = "default_update_channel_interval_secs")]
    pub update_channel_interval_secs: u64,

    /// Maximum number of dropped-on-overflow channel-range blocks retained
    /// for operator visibility.
    #[serde(default = "default_max_tracked_range_drops")]
    pub max_tracked_range_drops: usize,
}

fn default_broadcast_interval_msec() -> u64 {
    1000
}

fn default_update_channel_interval_secs() -> u64 {
    3600
}

fn default_max_tracked_range_drops() -> usize {
    64
}

impl GossipConfig {
    /// `prune_timeout = 2 * update_channel_interval`, per the refresh/prune
    /// timer contract. Not independently configurable.
    pub fn prune_timeout(&self) -> Duration {
        Duration::from_secs(self.update_channel_interval_secs * 2)
    }

    pub fn update_channel_interval(&self) -> Duration {
        Duration::from_secs(self.update_channel_interval_secs)
    }

    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.broadcast_interval_msec)
    }

    /// Keepalive/prune refresh timer period: `prune_timeout / 4`.
    pub fn refresh_interval(&self) -> Duration {
        self.prune_timeout() / 4
    }

    pub fn with_local_node_id(node_id: NodeId) -> Self {
        Self {
            chain_hash: ChainHash::default(),
            local_node_id: node_id,
            globalfeatures: Vec::new(),
            rgb: [0; 3],
            alias: [0; 32],
            announceable_addresses: Vec::new(),
            broadcast_interval_msec: default_broadcast_interval_msec(),
            update_channel_interval_secs: default_update_channel_interval_secs(),
            max_tracked_range_drops: default_max_tracked_range_drops(),
        }
    }
}

/// Builder for [`GossipConfig`], mirroring the field-by-field construction
/// pattern used for programmatic/test configuration elsewhere in the
/// codebase.
#[derive(Debug, Default)]
pub struct GossipConfigBuilder {
    local_node_id: Option<NodeId>,
    chain_hash: Option<ChainHash>,
    broadcast_interval_msec: Option<u64>,
    update_channel_interval_secs: Option<u64>,
    alias: Option<[u8; 32]>,
    rgb: Option<[u8; 3]>,
    announceable_addresses: Vec<crate::codec::WireAddress>,
}

impl GossipConfigBuilder {
    pub fn new(local_node_id: NodeId) -> Self {
        Self {
            local_node_id: Some(local_node_id),
            ..Default::default()
        }
    }

    pub fn chain_hash(mut self, hash: ChainHash) -> Self {
        self.chain_hash = Some(hash);
        self
    }

    pub fn broadcast_interval_msec(mut self, msec: u64) -> Self {
        self.broadcast_interval_msec = Some(msec);
        self
    }

    pub fn update_channel_interval_secs(mut self, secs: u64) -> Self {
        self.update_channel_interval_secs = Some(secs);
        self
    }

    pub fn alias(mut self, alias: [u8; 32]) -> Self {
        self.alias = Some(alias);
        self
    }

    pub fn rgb(mut self, rgb: [u8; 3]) -> Self {
        self.rgb = Some(rgb);
        self
    }

    pub fn announceable_address(mut self, addr: crate::codec::WireAddress) -> Self {
        self.announceable_addresses.push(addr);
        self
    }

    pub fn build(self) -> GossipConfig {
        let node_id = self.local_node_id.expect("local_node_id is required");
        let mut config = GossipConfig::with_local_node_id(node_id);
        if let Some(h) = self.chain_hash {
            config.chain_hash = h;
        }
        if let Some(v) = self.broadcast_interval_msec {
            config.broadcast_interval_msec = v;
        }
        if let Some(v) = self.update_channel_interval_secs {
            config.update_channel_interval_secs = v;
        }
        if let Some(v) = self.alias {
            config.alias = v;
        }
        if let Some(v) = self.rgb {
            config.rgb = v;
        }
        config.announceable_addresses = self.announceable_addresses;
        config
    }
}

/// CLI overrides layered on top of a config file, per the configuration
/// surface: flags parsed with `clap` take precedence over file values.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct ConfigOverrides {
    #[arg(long)]
    pub broadcast_interval_msec: Option<u64>,

    #[arg(long)]
    pub update_channel_interval_secs: Option<u64>,
}

impl ConfigOverrides {
    pub fn apply(&self, config: &mut GossipConfig) {
        if let Some(v) = self.broadcast_interval_msec {
            config.broadcast_interval_msec = v;
        }
        if let Some(v) = self.update_channel_interval_secs {
            config.update_channel_interval_secs = v;
        }
    }
}
