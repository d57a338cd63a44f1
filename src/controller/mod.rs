// Copyright (c) 2024 Botho Foundation

//! Owns the peer table, the graph, and the timers that drive the
//! broadcast/keepalive/prune sweeps. This is the single task that ever
//! mutates the graph; everything else reaches it through the channels
//! defined in [`connection_daemon`] and [`signer`].

pub mod connection_daemon;
pub mod local_channel;
pub mod parent;
pub mod signer;

use crate::codec::Message;
use crate::config::GossipConfig;
use crate::error::{ErrorTier, PeerFault};
use crate::graph::Graph;
use crate::ids::{NodeId, ShortChannelId};
use crate::peer::{PeerFeatures, PeerSession};
use connection_daemon::{new_peer_channels, NewPeerRequest, PeerLink};
use local_channel::LocalChannelManager;
use parent::{ParentReply, ParentRequest, RouteFinder};
use signer::SignerClient;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

struct PeerEntry {
    session: PeerSession,
    link: PeerLink,
}

/// Ties the graph, the peer table, the local-channel manager, and the
/// signer/parent control surfaces into the single task that drives the
/// gossip engine.
pub struct DaemonController {
    graph: Graph,
    config: GossipConfig,
    local_mgr: LocalChannelManager,
    peers: HashMap<NodeId, PeerEntry>,
    /// Channel-range overflow drops retained for operator visibility,
    /// aggregated across all peers (see the overflow-accounting
    /// expansion in the configuration surface).
    dropped_range_blocks: Vec<(NodeId, u32)>,
}

impl DaemonController {
    pub fn new(config: GossipConfig) -> Self {
        DaemonController {
            graph: Graph::new(),
            config,
            local_mgr: LocalChannelManager::new(),
            peers: HashMap::new(),
            dropped_range_blocks: Vec::new(),
        }
    }

    /// Read-only access to the graph, for control-channel queries.
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Number of currently admitted peers.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Admit a newly connected peer, transactionally replacing any prior
    /// session for the same node id so there is never a window where both
    /// sessions' outbound queues are live.
    pub fn admit_peer(&mut self, req: NewPeerRequest) -> mpsc::UnboundedReceiver<Message> {
        if self.peers.remove(&req.node_id).is_some() {
            debug!(peer = %req.node_id, "evicting prior session for re-announced peer");
            self.graph.disable_channels_touching(&req.node_id);
        }
        let session = PeerSession::new(
            req.node_id,
            self.config.chain_hash.0,
            req.features,
            self.graph.next_broadcast_index(),
            self.config.max_tracked_range_drops,
            self.config.broadcast_interval_msec,
        );
        let (link, outbound_rx) = new_peer_channels(req.node_id, req.features);
        self.peers.insert(req.node_id, PeerEntry { session, link });
        debug!(peer = %req.node_id, "peer admitted");
        outbound_rx
    }

    /// Tear down a peer's session: disables (but does not remove) every
    /// channel touching it.
    pub fn evict_peer(&mut self, node_id: &NodeId) {
        if self.peers.remove(node_id).is_some() {
            self.graph.disable_channels_touching(node_id);
            debug!(peer = %node_id, "peer evicted");
        }
    }

    fn send(&self, node_id: &NodeId, msg: Message) {
        if let Some(entry) = self.peers.get(node_id) {
            let _ = entry.link.outbound_tx.send(msg);
        }
    }

    /// Feed one decoded wire message from `node_id` through its session.
    /// Disconnect-tier faults evict the peer after the wire error is
    /// flushed; soft-drop-tier graph rejections are surfaced back to the
    /// peer as a wire error without disconnecting.
    pub async fn handle_peer_message(
        &mut self,
        node_id: NodeId,
        msg: Message,
        signer: &mut dyn SignerClient,
    ) {
        trace!(peer = %node_id, ty = msg.type_tag(), "inbound message");

        if let Message::ChannelAnnouncement(ann) = &msg {
            let raw = msg.encode();
            match self.graph.ingest_channel_announcement(ann, raw) {
                Ok(Some(_scid)) => {
                    // Funding-output confirmation is an external
                    // collaborator call (txout lookup over the parent
                    // channel); the caller resolves it via
                    // `confirm_channel_funding`/`reject_channel_funding`.
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(peer = %node_id, error = %e, "channel_announcement rejected");
                    self.send(
                        &node_id,
                        crate::peer::PeerSession::fault_to_wire_error(&PeerFault::Graph(e)),
                    );
                }
            }
            return;
        }

        let Some(entry) = self.peers.get_mut(&node_id) else {
            return;
        };
        match entry.session.on_message(msg, &mut self.graph) {
            Ok(effect) => {
                for reply in effect.replies {
                    self.send(&node_id, reply);
                }
                if effect.graph_update_accepted {
                    let _ = self
                        .local_mgr
                        .maybe_emit_node_announcement(
                            &mut self.graph,
                            signer,
                            self.config.local_node_id,
                            &self.config,
                            now_secs(),
                        )
                        .await;
                }
            }
            Err(fault) => self.handle_fault(node_id, fault),
        }
    }

    fn handle_fault(&mut self, node_id: NodeId, fault: PeerFault) {
        match fault.tier() {
            ErrorTier::Disconnect => {
                warn!(peer = %node_id, error = %fault, "disconnecting peer");
                let wire_error = crate::peer::PeerSession::fault_to_wire_error(&fault);
                self.send(&node_id, wire_error);
                self.evict_peer(&node_id);
            }
            ErrorTier::SoftDrop => {
                if let PeerFault::Graph(_) = &fault {
                    let wire_error = crate::peer::PeerSession::fault_to_wire_error(&fault);
                    self.send(&node_id, wire_error);
                }
                warn!(peer = %node_id, error = %fault, "soft drop");
            }
            ErrorTier::Fatal => unreachable!("PeerFault never carries a fatal tier"),
        }
    }

    /// Complete a pending `channel_announcement` once the funding output
    /// has been confirmed, fanning the announcement out to every peer.
    pub fn confirm_channel_funding(
        &mut self,
        scid: ShortChannelId,
        satoshis: u64,
    ) -> Result<(), crate::error::GraphError> {
        self.graph.resolve_pending(scid, satoshis)
    }

    pub fn reject_channel_funding(
        &mut self,
        scid: &ShortChannelId,
    ) -> Result<(), crate::error::GraphError> {
        self.graph.reject_pending(scid)
    }

    /// Dispatch one control command from the parent process to its graph
    /// or peer-table primitive.
    pub async fn handle_parent_request(
        &mut self,
        req: ParentRequest,
        signer: &mut dyn SignerClient,
        route_finder: &dyn RouteFinder,
    ) -> ParentReply {
        match req {
            ParentRequest::Init => ParentReply::Ack,
            ParentRequest::GetNodes => {
                ParentReply::Nodes(self.graph.node_ids().copied().collect())
            }
            ParentRequest::GetChannels => {
                ParentReply::Channels(parent::channel_summaries(self.graph.channels()))
            }
            ParentRequest::GetRoute {
                src,
                dst,
                amount_msat,
                risk_factor,
                final_cltv,
                fuzz_percent,
                seed,
            } => {
                let hops = route_finder.find_route(
                    &src,
                    &dst,
                    amount_msat,
                    risk_factor,
                    final_cltv,
                    fuzz_percent,
                    seed,
                );
                ParentReply::Route(hops.unwrap_or_default())
            }
            ParentRequest::GetChannelPeer { scid } => {
                let peer = self
                    .graph
                    .get_channel(&scid)
                    .and_then(|c| c.other_end(&self.config.local_node_id));
                ParentReply::ChannelPeer(peer)
            }
            ParentRequest::GetIncomingChannels { node } => {
                let channels = self
                    .graph
                    .get_node(&node)
                    .map(|n| n.channels.clone())
                    .unwrap_or_default();
                ParentReply::IncomingChannels(channels)
            }
            ParentRequest::Ping { node } => {
                if let Some(entry) = self.peers.get_mut(&node) {
                    entry.session.note_ping_sent();
                    let _ = entry.link.outbound_tx.send(Message::Ping(crate::codec::Ping {
                        num_pong_bytes: 0,
                        ignored: vec![],
                    }));
                }
                ParentReply::Pong
            }
            ParentRequest::GetTxoutReply { scid, satoshis } => {
                match satoshis {
                    Some(sats) => {
                        if let Err(e) = self.confirm_channel_funding(scid, sats) {
                            warn!(%scid, error = %e, "confirming channel funding failed");
                        }
                    }
                    None => {
                        if let Err(e) = self.reject_channel_funding(&scid) {
                            warn!(%scid, error = %e, "rejecting channel funding failed");
                        }
                    }
                }
                ParentReply::Ack
            }
            ParentRequest::RoutingFailure { scid } => {
                // A single failed payment attempt doesn't warrant deleting
                // the channel, only skipping it in our own future route
                // selection until it proves live again.
                self.graph.mark_channel_unroutable(&scid);
                ParentReply::Ack
            }
            ParentRequest::MarkChannelUnroutable { scid } => {
                self.graph.mark_channel_unroutable(&scid);
                ParentReply::Ack
            }
            ParentRequest::OutpointSpent { scid } => {
                self.graph.remove_channel(&scid);
                ParentReply::Ack
            }
            ParentRequest::LocalChannelClose { scid } => {
                if let Some(dir) = self
                    .graph
                    .get_channel(&scid)
                    .and_then(|c| c.half_for(&self.config.local_node_id))
                {
                    self.graph.mark_channel_unroutable(&scid);
                    let _ = self
                        .local_mgr
                        .maybe_update_local_channel(
                            &mut self.graph,
                            signer,
                            scid,
                            dir as u8,
                            self.config.chain_hash.0,
                            now_secs(),
                        )
                        .await;
                }
                ParentReply::Ack
            }
            ParentRequest::GetUpdate { scid, dir } => {
                match self
                    .local_mgr
                    .maybe_update_local_channel(
                        &mut self.graph,
                        signer,
                        scid,
                        dir,
                        self.config.chain_hash.0,
                        now_secs(),
                    )
                    .await
                {
                    Ok(emitted) => ParentReply::UpdateEmitted(emitted),
                    Err(e) => {
                        warn!(%scid, error = %e, "get_update reconciliation failed");
                        ParentReply::UpdateEmitted(false)
                    }
                }
            }
            ParentRequest::GetAddrs => {
                ParentReply::Addrs(self.config.announceable_addresses.clone())
            }
        }
    }

    /// Drain every peer's outbound pump once. In the real event loop this
    /// is invoked from each peer's per-connection flush timer; tests and
    /// the integration harness call it directly to force a fan-out tick.
    /// Broadcast-log fan-out is paced by `broadcast_interval_msec`: each
    /// peer emits at most one log entry per tick, so a peer with a large
    /// backlog is drained over several ticks rather than all at once.
    /// Scid-query and range-query replies are unaffected and still drain
    /// to completion within a single call.
    pub fn pump_all(&mut self) {
        let now = now_millis();
        for entry in self.peers.values_mut() {
            while let Some(msg) = entry.session.pump(&self.graph, now) {
                let _ = entry.link.outbound_tx.send(msg);
            }
        }
    }

    /// Run the keepalive/prune refresh sweep for all locally owned
    /// channels, then re-check whether our own node_announcement needs
    /// re-emission.
    pub async fn run_refresh_sweep(&mut self, signer: &mut dyn SignerClient) {
        let now = now_secs();
        match self
            .local_mgr
            .keepalive_sweep(
                &mut self.graph,
                signer,
                self.config.local_node_id,
                &self.config,
                now,
            )
            .await
        {
            Ok(count) if count > 0 => debug!(count, "keepalive sweep reissued updates"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "keepalive sweep failed"),
        }
        self.graph
            .prune_stale(now as i64, self.config.prune_timeout().as_secs() as i64);
        let _ = self
            .local_mgr
            .maybe_emit_node_announcement(
                &mut self.graph,
                signer,
                self.config.local_node_id,
                &self.config,
                now,
            )
            .await;
    }

    /// Overflow blocks dropped from channel-range replies, most recently
    /// collected by [`Self::collect_range_drops`].
    pub fn dropped_range_blocks(&self) -> &[(NodeId, u32)] {
        &self.dropped_range_blocks
    }

    /// Collect per-peer overflow drops recorded since the last call,
    /// appending them to the controller-wide ledger.
    pub fn collect_range_drops(&mut self) {
        for (node_id, entry) in self.peers.iter() {
            for block in entry.session.dropped_range_blocks() {
                self.dropped_range_blocks.push((*node_id, *block));
            }
        }
    }
}

fn now_secs() -> u32 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
