// Copyright (c) 2024 Botho Foundation

//! Local-channel update path: keepalives, disable/enable re-announcement,
//! and the node_announcement re-emission this node's signer produces.

use super::signer::{
    SignChannelUpdateRequest, SignNodeAnnouncementRequest, SignerClient,
};
use crate::codec::{ChannelUpdate, NodeAnnouncement};
use crate::config::GossipConfig;
use crate::error::FatalError;
use crate::graph::Graph;
use crate::ids::ShortChannelId;

/// Tracks what this node last announced about itself, to implement the
/// order-sensitive redundancy check: re-announce only when something
/// actually changed, never just because the timer fired.
pub struct LocalChannelManager {
    last_node_announcement: Option<NodeAnnouncement>,
}

impl LocalChannelManager {
    pub fn new() -> Self {
        LocalChannelManager {
            last_node_announcement: None,
        }
    }

    /// Build, sign, and ingest a fresh `channel_update` for `(scid, dir)`
    /// carrying `disabled`/fee parameters unchanged except timestamp.
    /// Ingestion of a locally produced update must succeed; failure here
    /// is promoted to a fatal error per the local-update contract.
    pub async fn emit_update(
        &mut self,
        graph: &mut Graph,
        signer: &mut dyn SignerClient,
        scid: ShortChannelId,
        dir: u8,
        chain_hash: [u8; 32],
        now: u32,
    ) -> Result<(), FatalError> {
        let channel = graph
            .get_channel(&scid)
            .ok_or(FatalError::Invariant("local channel missing from graph"))?;
        let half = &channel.half[dir as usize];
        let prior_ts = half.last_timestamp;
        let timestamp = (prior_ts + 1).max(now as i64) as u32;

        let mut unsigned = ChannelUpdate {
            signature: [0; 64],
            chain_hash,
            short_channel_id: scid,
            timestamp,
            message_flags: half.message_flags,
            channel_flags: half.channel_flags,
            cltv_expiry_delta: half.cltv_delta,
            htlc_minimum_msat: half.htlc_min_msat,
            fee_base_msat: half.base_fee_msat,
            fee_proportional_millionths: half.proportional_fee_ppm,
            htlc_maximum_msat: if half.htlc_max_msat == u64::MAX {
                None
            } else {
                Some(half.htlc_max_msat)
            },
        };
        if unsigned.htlc_maximum_msat.is_some() {
            unsigned.message_flags |= crate::codec::MSGFLAG_OPTION_HTLC_MAX;
        }

        let signature = signer
            .sign_channel_update(SignChannelUpdateRequest {
                unsigned: unsigned.clone(),
            })
            .await?;
        unsigned.signature = signature;

        graph
            .ingest_local_update(&unsigned)
            .map_err(FatalError::LocalIngestionRejected)
    }

    /// Called lazily from the `get_update` control path and from the
    /// periodic refresh sweep: if the stored disabled bit disagrees with
    /// the channel's `local_disabled` flag, emit a fresh update; otherwise
    /// no-op.
    pub async fn maybe_update_local_channel(
        &mut self,
        graph: &mut Graph,
        signer: &mut dyn SignerClient,
        scid: ShortChannelId,
        dir: u8,
        chain_hash: [u8; 32],
        now: u32,
    ) -> Result<bool, FatalError> {
        let channel = graph
            .get_channel(&scid)
            .ok_or(FatalError::Invariant("local channel missing from graph"))?;
        let half = &channel.half[dir as usize];
        let wants_disabled = channel.local_disabled;
        if half.is_disabled() == wants_disabled {
            return Ok(false);
        }
        let mut next_flags = half.channel_flags;
        if wants_disabled {
            next_flags |= crate::codec::CHANFLAG_DISABLED;
        } else {
            next_flags &= !crate::codec::CHANFLAG_DISABLED;
        }
        let prior_ts = half.last_timestamp;
        let timestamp = (prior_ts + 1).max(now as i64) as u32;
        let mut unsigned = ChannelUpdate {
            signature: [0; 64],
            chain_hash,
            short_channel_id: scid,
            timestamp,
            message_flags: half.message_flags,
            channel_flags: next_flags,
            cltv_expiry_delta: half.cltv_delta,
            htlc_minimum_msat: half.htlc_min_msat,
            fee_base_msat: half.base_fee_msat,
            fee_proportional_millionths: half.proportional_fee_ppm,
            htlc_maximum_msat: if half.htlc_max_msat == u64::MAX {
                None
            } else {
                Some(half.htlc_max_msat)
            },
        };
        let signature = signer
            .sign_channel_update(SignChannelUpdateRequest {
                unsigned: unsigned.clone(),
            })
            .await?;
        unsigned.signature = signature;
        graph
            .ingest_local_update(&unsigned)
            .map_err(FatalError::LocalIngestionRejected)?;
        Ok(true)
    }

    /// Keepalive/prune refresh sweep: re-issue an update (unchanged
    /// parameters, fresh timestamp) for every defined, enabled half-channel
    /// owned by this node whose last update predates
    /// `now - prune_timeout/2`.
    pub async fn keepalive_sweep(
        &mut self,
        graph: &mut Graph,
        signer: &mut dyn SignerClient,
        local_node_id: crate::ids::NodeId,
        config: &GossipConfig,
        now: u32,
    ) -> Result<usize, FatalError> {
        let stale_before = now as i64 - config.prune_timeout().as_secs() as i64 / 2;
        let Some(node) = graph.get_node(&local_node_id) else {
            return Ok(0);
        };
        let candidates: Vec<(ShortChannelId, u8)> = node
            .channels
            .iter()
            .filter_map(|scid| {
                let channel = graph.get_channel(scid)?;
                let dir = channel.half_for(&local_node_id)?;
                let half = &channel.half[dir];
                if half.is_enabled() && half.last_timestamp < stale_before {
                    Some((*scid, dir as u8))
                } else {
                    None
                }
            })
            .collect();
        let count = candidates.len();
        for (scid, dir) in candidates {
            self.emit_update(graph, signer, scid, dir, config.chain_hash.0, now)
                .await?;
        }
        Ok(count)
    }

    /// Re-emit our node_announcement if at least one local channel is
    /// publicly announced and something about our identity has changed
    /// since the last announcement we sent — comparing addresses
    /// order-sensitively, never normalized.
    pub async fn maybe_emit_node_announcement(
        &mut self,
        graph: &mut Graph,
        signer: &mut dyn SignerClient,
        local_node_id: crate::ids::NodeId,
        config: &GossipConfig,
        now: u32,
    ) -> Result<bool, FatalError> {
        let Some(node) = graph.get_node(&local_node_id) else {
            return Ok(false);
        };
        let has_public_channel = node
            .channels
            .iter()
            .filter_map(|scid| graph.get_channel(scid))
            .any(|c| c.is_publicly_announced());
        if !has_public_channel {
            return Ok(false);
        }

        let redundant = match &self.last_node_announcement {
            None => false,
            Some(prev) => {
                prev.addresses == config.announceable_addresses
                    && prev.alias == config.alias
                    && prev.rgb_color == config.rgb
                    && prev.features == config.globalfeatures
            }
        };
        if redundant {
            return Ok(false);
        }

        let prior_ts = self
            .last_node_announcement
            .as_ref()
            .map(|a| a.timestamp as i64)
            .unwrap_or(-1);
        let timestamp = (prior_ts + 1).max(now as i64) as u32;

        let mut unsigned = NodeAnnouncement {
            signature: [0; 64],
            features: config.globalfeatures.clone(),
            timestamp,
            node_id: local_node_id,
            rgb_color: config.rgb,
            alias: config.alias,
            addresses: config.announceable_addresses.clone(),
        };
        let signature = signer
            .sign_node_announcement(SignNodeAnnouncementRequest {
                unsigned: unsigned.clone(),
            })
            .await?;
        unsigned.signature = signature;

        let raw = crate::codec::Message::NodeAnnouncement(unsigned.clone()).encode();
        graph
            .ingest_node_announcement(&unsigned, raw)
            .map_err(FatalError::LocalIngestionRejected)?;
        self.last_node_announcement = Some(unsigned);
        Ok(true)
    }
}

impl Default for LocalChannelManager {
    fn default() -> Self {
        Self::new()
    }
}
