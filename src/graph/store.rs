// Copyright (c) 2024 Botho Foundation

//! Channels, nodes, and the three typed ingestion entry points peers and
//! the controller use to mutate the graph.
//!
//! Grounded on the shape of a peer/announcement store (insert with
//! signature verification, freshness check, upsert-or-reject) but adapted
//! from a `RwLock`-guarded shared store to a single-owner structure: the
//! concurrency model here has exactly one task (the controller) holding
//! the graph, so no interior mutability is needed.

use super::{BroadcastLog, SENTINEL_INDEX};
use crate::codec::{
    ChannelAnnouncement, ChannelUpdate, Message, NodeAnnouncement, WireAddress,
    CHANFLAG_DISABLED,
};
use crate::error::{GraphError, GraphResult};
use crate::ids::{NodeId, ShortChannelId};
use crate::sig;
use std::collections::HashMap;

/// One direction of a channel.
#[derive(Debug, Clone, Default)]
pub struct HalfChannel {
    pub last_timestamp: i64,
    pub message_flags: u8,
    pub channel_flags: u8,
    pub cltv_delta: u16,
    pub htlc_min_msat: u64,
    pub htlc_max_msat: u64,
    pub base_fee_msat: u32,
    pub proportional_fee_ppm: u32,
    pub raw_update: Option<Vec<u8>>,
}

impl HalfChannel {
    pub fn is_defined(&self) -> bool {
        self.last_timestamp >= 0
    }

    pub fn is_disabled(&self) -> bool {
        self.channel_flags & CHANFLAG_DISABLED != 0
    }

    pub fn is_enabled(&self) -> bool {
        self.is_defined() && !self.is_disabled()
    }

    fn new_undefined() -> Self {
        HalfChannel {
            last_timestamp: -1,
            ..Default::default()
        }
    }

    fn apply(&mut self, update: &ChannelUpdate, raw: Vec<u8>) {
        self.last_timestamp = update.timestamp as i64;
        self.message_flags = update.message_flags;
        self.channel_flags = update.channel_flags;
        self.cltv_delta = update.cltv_expiry_delta;
        self.htlc_min_msat = update.htlc_minimum_msat;
        self.htlc_max_msat = update.htlc_maximum_msat.unwrap_or(u64::MAX);
        self.base_fee_msat = update.fee_base_msat;
        self.proportional_fee_ppm = update.fee_proportional_millionths;
        self.raw_update = Some(raw);
    }
}

#[derive(Debug, Clone)]
pub struct Channel {
    pub scid: ShortChannelId,
    pub node_id: [NodeId; 2],
    pub satoshis: u64,
    pub half: [HalfChannel; 2],
    pub local_disabled: bool,
    pub raw_announcement: Option<Vec<u8>>,
}

impl Channel {
    pub fn half_for(&self, node: &NodeId) -> Option<usize> {
        if &self.node_id[0] == node {
            Some(0)
        } else if &self.node_id[1] == node {
            Some(1)
        } else {
            None
        }
    }

    pub fn other_end(&self, node: &NodeId) -> Option<NodeId> {
        match self.half_for(node)? {
            0 => Some(self.node_id[1]),
            _ => Some(self.node_id[0]),
        }
    }

    pub fn is_publicly_announced(&self) -> bool {
        self.raw_announcement.is_some()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Node {
    pub id: NodeId,
    pub last_timestamp: i64,
    pub alias: [u8; 32],
    pub rgb: [u8; 3],
    pub globalfeatures: Vec<u8>,
    pub addresses: Vec<WireAddress>,
    pub raw_announcement: Option<Vec<u8>>,
    pub channels: Vec<ShortChannelId>,
}

impl Node {
    fn bare(id: NodeId) -> Self {
        Node {
            id,
            last_timestamp: -1,
            ..Default::default()
        }
    }

    pub fn has_announcement(&self) -> bool {
        self.last_timestamp >= 0
    }
}

/// A `channel_announcement` that has passed signature checks but is
/// waiting for the funding transaction's output to be resolved on-chain.
#[derive(Debug, Clone)]
pub struct PendingAnnouncement {
    pub msg: ChannelAnnouncement,
    pub raw: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct Graph {
    nodes: HashMap<NodeId, Node>,
    channels: HashMap<ShortChannelId, Channel>,
    pending: HashMap<ShortChannelId, PendingAnnouncement>,
    log: BroadcastLog,
}

impl Graph {
    pub fn new() -> Self {
        Graph::default()
    }

    pub fn broadcast_log(&self) -> &BroadcastLog {
        &self.log
    }

    pub fn next_broadcast_index(&self) -> u64 {
        self.log.next_index()
    }

    pub fn sentinel_index(&self) -> u64 {
        SENTINEL_INDEX
    }

    pub fn get_channel(&self, scid: &ShortChannelId) -> Option<&Channel> {
        self.channels.get(scid)
    }

    pub fn get_node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn contains_channel(&self, scid: &ShortChannelId) -> bool {
        self.channels.contains_key(scid)
    }

    /// Every node id currently in the graph, for `getnodes`.
    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.keys()
    }

    /// Every channel currently in the graph, for `getchannels`.
    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    /// Validate a peer-sourced `channel_announcement`. On success the
    /// announcement is held pending until the caller resolves the funding
    /// output via [`Graph::resolve_pending`].
    pub fn ingest_channel_announcement(
        &mut self,
        msg: &ChannelAnnouncement,
        raw: Vec<u8>,
    ) -> GraphResult<Option<ShortChannelId>> {
        if self.channels.contains_key(&msg.short_channel_id)
            || self.pending.contains_key(&msg.short_channel_id)
        {
            return Err(GraphError::DuplicateChannel(msg.short_channel_id));
        }
        let signing_bytes = msg.signing_bytes();
        if !sig::verify(&msg.node_id_1, &signing_bytes, &msg.node_signature_1)
            || !sig::verify(&msg.node_id_2, &signing_bytes, &msg.node_signature_2)
            || !sig::verify(&msg.bitcoin_key_1, &signing_bytes, &msg.bitcoin_signature_1)
            || !sig::verify(&msg.bitcoin_key_2, &signing_bytes, &msg.bitcoin_signature_2)
        {
            return Err(GraphError::InvalidSignature("channel_announcement"));
        }
        let scid = msg.short_channel_id;
        self.pending.insert(
            scid,
            PendingAnnouncement {
                msg: msg.clone(),
                raw,
            },
        );
        Ok(Some(scid))
    }

    /// Complete a pending announcement once the controller has confirmed
    /// the funding output on-chain. `channel_announcement` itself carries
    /// no timestamp, so it is appended to the broadcast log at timestamp
    /// 0: it always matches `ts_min=0` (the default filter) and is only
    /// excluded by a peer that has narrowed `ts_min` above zero, mirroring
    /// how implementations treat announcements as always-current facts
    /// rather than time-windowed updates.
    pub fn resolve_pending(&mut self, scid: ShortChannelId, satoshis: u64) -> GraphResult<()> {
        let pending = self
            .pending
            .remove(&scid)
            .ok_or(GraphError::UnknownChannel(scid))?;
        let channel = Channel {
            scid,
            node_id: [pending.msg.node_id_1, pending.msg.node_id_2],
            satoshis,
            half: [HalfChannel::new_undefined(), HalfChannel::new_undefined()],
            local_disabled: false,
            raw_announcement: Some(pending.raw.clone()),
        };
        for node_id in channel.node_id {
            let node = self
                .nodes
                .entry(node_id)
                .or_insert_with(|| Node::bare(node_id));
            node.channels.push(scid);
        }
        self.channels.insert(scid, channel);
        self.log.append(0, pending.raw);
        Ok(())
    }

    /// Abandon a pending announcement whose funding output failed to
    /// confirm as claimed.
    pub fn reject_pending(&mut self, scid: &ShortChannelId) -> GraphResult<()> {
        self.pending
            .remove(scid)
            .map(|_| ())
            .ok_or(GraphError::UnknownChannel(*scid))
    }

    /// Validate and apply a `node_announcement`.
    pub fn ingest_node_announcement(
        &mut self,
        msg: &NodeAnnouncement,
        raw: Vec<u8>,
    ) -> GraphResult<()> {
        if !sig::verify(&msg.node_id, &msg.signing_bytes(), &msg.signature) {
            return Err(GraphError::InvalidSignature("node_announcement"));
        }
        let node = self
            .nodes
            .entry(msg.node_id)
            .or_insert_with(|| Node::bare(msg.node_id));
        if node.has_announcement() && msg.timestamp as i64 <= node.last_timestamp {
            return Err(GraphError::StaleTimestamp {
                got: msg.timestamp,
                prior: node.last_timestamp,
            });
        }
        node.last_timestamp = msg.timestamp as i64;
        node.alias = msg.alias;
        node.rgb = msg.rgb_color;
        node.globalfeatures = msg.features.clone();
        node.addresses = msg.addresses.clone();
        node.raw_announcement = Some(raw.clone());
        self.log.append(msg.timestamp, raw);
        Ok(())
    }

    /// Validate and apply a `channel_update`, appending it to the
    /// broadcast log on success.
    pub fn ingest_channel_update(&mut self, msg: &ChannelUpdate, raw: Vec<u8>) -> GraphResult<()> {
        let dir = msg.direction() as usize;
        let channel = self
            .channels
            .get(&msg.short_channel_id)
            .ok_or(GraphError::UnknownChannel(msg.short_channel_id))?;
        let signer = channel.node_id[dir];
        let prior = channel.half[dir].last_timestamp;
        if !sig::verify(&signer, &msg.signing_bytes(), &msg.signature) {
            return Err(GraphError::InvalidSignature("channel_update"));
        }
        if prior >= 0 && msg.timestamp as i64 <= prior {
            return Err(GraphError::StaleTimestamp {
                got: msg.timestamp,
                prior,
            });
        }
        let channel = self.channels.get_mut(&msg.short_channel_id).unwrap();
        channel.half[dir].apply(msg, raw.clone());
        self.log.append(msg.timestamp, raw);
        Ok(())
    }

    /// Re-encode and re-insert a locally produced, already-signed update.
    /// Ingestion of a self-produced update must never fail; callers treat
    /// an error here as a fatal invariant violation (see
    /// [`crate::error::FatalError::LocalIngestionRejected`]).
    pub fn ingest_local_update(&mut self, msg: &ChannelUpdate) -> GraphResult<()> {
        let raw = Message::ChannelUpdate(msg.clone()).encode();
        self.ingest_channel_update(msg, raw)
    }

    /// Mark every channel touching `node` as locally disabled: called when
    /// a peer disconnects, per the peer-destruction contract. Does not
    /// remove the channel from the graph.
    pub fn disable_channels_touching(&mut self, node: &NodeId) {
        if let Some(n) = self.nodes.get(node) {
            for scid in n.channels.clone() {
                if let Some(c) = self.channels.get_mut(&scid) {
                    c.local_disabled = true;
                }
            }
        }
    }

    /// Mark channels as locally disabled when both halves have gone stale
    /// past `prune_timeout`, without removing them (deletion is driven
    /// only by a confirmed `outpoint_spent`).
    pub fn prune_stale(&mut self, now: i64, prune_timeout_secs: i64) {
        for channel in self.channels.values_mut() {
            let both_stale = channel.half.iter().all(|h| {
                !h.is_defined() || h.last_timestamp < now - prune_timeout_secs
            });
            if both_stale {
                channel.local_disabled = true;
            }
        }
    }

    /// Mark a single channel locally disabled, e.g. after a reported
    /// routing failure or an explicit `markchannelunroutable` from the
    /// parent. Does not remove the channel or touch its peer's half.
    pub fn mark_channel_unroutable(&mut self, scid: &ShortChannelId) {
        if let Some(c) = self.channels.get_mut(scid) {
            c.local_disabled = true;
        }
    }

    /// Remove a channel whose funding output has been spent.
    pub fn remove_channel(&mut self, scid: &ShortChannelId) -> Option<Channel> {
        let channel = self.channels.remove(scid)?;
        for node_id in channel.node_id {
            if let Some(node) = self.nodes.get_mut(&node_id) {
                node.channels.retain(|s| s != scid);
            }
        }
        Some(channel)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// All channels whose scid falls in `[first_block, first_block+num_blocks)`,
    /// sorted by scid, for channel-range query servicing.
    pub fn channels_in_block_range(
        &self,
        first_block: u32,
        num_blocks: u32,
    ) -> Vec<ShortChannelId> {
        let end = first_block.saturating_add(num_blocks);
        let mut out: Vec<ShortChannelId> = self
            .channels
            .keys()
            .copied()
            .filter(|s| s.block() >= first_block && s.block() < end)
            .collect();
        out.sort_unstable();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{ChannelAnnouncement, ChannelUpdate, MSGFLAG_OPTION_HTLC_MAX};
    use secp256k1::{PublicKey, Secp256k1, SecretKey, SignOnly};
    use sha2::{Digest, Sha256};

    fn double_sha256(data: &[u8]) -> [u8; 32] {
        let first = Sha256::digest(data);
        Sha256::digest(first).into()
    }

    fn sign(sk: &SecretKey, body: &[u8]) -> [u8; 64] {
        let ctx: Secp256k1<SignOnly> = Secp256k1::signing_only();
        let digest = double_sha256(body);
        let msg = secp256k1::Message::from_slice(&digest).unwrap();
        ctx.sign_ecdsa(&msg, sk).serialize_compact()
    }

    fn keypair(seed: u8) -> (SecretKey, NodeId) {
        let ctx: Secp256k1<SignOnly> = Secp256k1::signing_only();
        let sk = SecretKey::from_slice(&[seed; 32]).unwrap();
        let pk = PublicKey::from_secret_key(&ctx, &sk);
        (sk, NodeId(pk.serialize()))
    }

    fn announce(
        scid: ShortChannelId,
        n1: (&SecretKey, NodeId),
        n2: (&SecretKey, NodeId),
        b1: (&SecretKey, NodeId),
        b2: (&SecretKey, NodeId),
    ) -> ChannelAnnouncement {
        let mut msg = ChannelAnnouncement {
            node_signature_1: [0; 64],
            node_signature_2: [0; 64],
            bitcoin_signature_1: [0; 64],
            bitcoin_signature_2: [0; 64],
            features: vec![],
            chain_hash: [0; 32],
            short_channel_id: scid,
            node_id_1: n1.1,
            node_id_2: n2.1,
            bitcoin_key_1: b1.1,
            bitcoin_key_2: b2.1,
        };
        let body = msg.signing_bytes();
        msg.node_signature_1 = sign(n1.0, &body);
        msg.node_signature_2 = sign(n2.0, &body);
        msg.bitcoin_signature_1 = sign(b1.0, &body);
        msg.bitcoin_signature_2 = sign(b2.0, &body);
        msg
    }

    #[test]
    fn full_channel_lifecycle() {
        let mut graph = Graph::new();
        let scid = ShortChannelId::new(700_000, 1, 0);
        let (sk1, n1) = keypair(1);
        let (sk2, n2) = keypair(2);
        let msg = announce(scid, (&sk1, n1), (&sk2, n2), (&sk1, n1), (&sk2, n2));
        let raw = Message::ChannelAnnouncement(msg.clone()).encode();

        graph.ingest_channel_announcement(&msg, raw).unwrap();
        assert!(!graph.contains_channel(&scid));

        graph.resolve_pending(scid, 100_000).unwrap();
        assert!(graph.contains_channel(&scid));
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.broadcast_log().len(), 1);

        let mut update = ChannelUpdate {
            signature: [0; 64],
            chain_hash: [0; 32],
            short_channel_id: scid,
            timestamp: 1000,
            message_flags: 0,
            channel_flags: 0,
            cltv_expiry_delta: 40,
            htlc_minimum_msat: 1,
            fee_base_msat: 1,
            fee_proportional_millionths: 1,
            htlc_maximum_msat: None,
        };
        update.signature = sign(&sk1, &update.signing_bytes());
        let update_raw = Message::ChannelUpdate(update.clone()).encode();
        graph.ingest_channel_update(&update, update_raw).unwrap();
        assert_eq!(graph.broadcast_log().len(), 2);

        let channel = graph.get_channel(&scid).unwrap();
        assert!(channel.half[0].is_defined());
        assert!(!channel.half[1].is_defined());
    }

    #[test]
    fn duplicate_channel_announcement_rejected() {
        let mut graph = Graph::new();
        let scid = ShortChannelId::new(1, 1, 0);
        let (sk1, n1) = keypair(3);
        let (sk2, n2) = keypair(4);
        let msg = announce(scid, (&sk1, n1), (&sk2, n2), (&sk1, n1), (&sk2, n2));
        let raw = Message::ChannelAnnouncement(msg.clone()).encode();
        graph.ingest_channel_announcement(&msg, raw.clone()).unwrap();
        let err = graph.ingest_channel_announcement(&msg, raw).unwrap_err();
        assert!(matches!(err, GraphError::DuplicateChannel(_)));
    }

    #[test]
    fn stale_channel_update_rejected() {
        let mut graph = Graph::new();
        let scid = ShortChannelId::new(2, 1, 0);
        let (sk1, n1) = keypair(5);
        let (sk2, n2) = keypair(6);
        let msg = announce(scid, (&sk1, n1), (&sk2, n2), (&sk1, n1), (&sk2, n2));
        let raw = Message::ChannelAnnouncement(msg.clone()).encode();
        graph.ingest_channel_announcement(&msg, raw).unwrap();
        graph.resolve_pending(scid, 1).unwrap();

        let mut update = ChannelUpdate {
            signature: [0; 64],
            chain_hash: [0; 32],
            short_channel_id: scid,
            timestamp: 100,
            message_flags: MSGFLAG_OPTION_HTLC_MAX,
            channel_flags: 0,
            cltv_expiry_delta: 1,
            htlc_minimum_msat: 0,
            fee_base_msat: 0,
            fee_proportional_millionths: 0,
            htlc_maximum_msat: Some(1),
        };
        update.signature = sign(&sk1, &update.signing_bytes());
        let raw = Message::ChannelUpdate(update.clone()).encode();
        graph.ingest_channel_update(&update, raw).unwrap();

        update.timestamp = 50;
        update.signature = sign(&sk1, &update.signing_bytes());
        let raw = Message::ChannelUpdate(update.clone()).encode();
        let err = graph.ingest_channel_update(&update, raw).unwrap_err();
        assert!(matches!(err, GraphError::StaleTimestamp { .. }));
    }

    #[test]
    fn disabling_peer_channels_does_not_remove_them() {
        let mut graph = Graph::new();
        let scid = ShortChannelId::new(3, 1, 0);
        let (sk1, n1) = keypair(7);
        let (sk2, n2) = keypair(8);
        let msg = announce(scid, (&sk1, n1), (&sk2, n2), (&sk1, n1), (&sk2, n2));
        let raw = Message::ChannelAnnouncement(msg.clone()).encode();
        graph.ingest_channel_announcement(&msg, raw).unwrap();
        graph.resolve_pending(scid, 1).unwrap();

        graph.disable_channels_touching(&n1);
        assert!(graph.get_channel(&scid).unwrap().local_disabled);
        assert!(graph.contains_channel(&scid));
    }
}
