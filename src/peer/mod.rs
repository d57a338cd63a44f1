// Copyright (c) 2024 Botho Foundation

//! Per-peer protocol state machine: wire-message dispatch plus the
//! outbound send pump.
//!
//! A [`PeerSession`] is pure state and logic; it borrows the graph for the
//! duration of a call and never outlives it. The owning task (see
//! [`crate::controller`]) is the only thing that actually touches a
//! socket.

mod filter;
mod range_query;
mod scid_query;

pub use filter::TimestampFilter;
pub use range_query::{plan_range_reply, AcceptError, RangeQueryAccumulator};
pub use scid_query::ScidQueryReply;

use crate::codec::{
    ChannelAnnouncement, ChannelUpdate, GossipTimestampFilter, Message, NodeAnnouncement, Ping,
    Pong, QueryChannelRange, QueryShortChannelIds, ReplyChannelRange, ReplyShortChannelIdsEnd,
    WireError,
};
use crate::error::PeerFault;
use crate::graph::{Graph, SENTINEL_INDEX};
use crate::ids::NodeId;
use std::collections::VecDeque;

/// Feature bits negotiated at connection time that change this session's
/// gossip behavior.
#[derive(Debug, Clone, Copy, Default)]
pub struct PeerFeatures {
    pub gossip_queries: bool,
    pub initial_routing_sync: bool,
}

/// Upper bound (exclusive) on `num_pong_bytes` we'll answer; BOLT #1 treats
/// this value and above as a signal to stay silent.
const MAX_PONG_BYTES: u16 = 65532;

/// Outcome of feeding one wire message through [`PeerSession::on_message`].
#[derive(Debug, Default)]
pub struct PeerEffect {
    /// Messages to enqueue to this peer immediately (pongs, query end
    /// markers, wire errors for upstream-surfaced ingestion failures).
    pub replies: Vec<Message>,
    /// Set when a `channel_update` was freshly accepted into the graph,
    /// so the controller can re-check whether its own node_announcement
    /// needs to be re-emitted.
    pub graph_update_accepted: bool,
}

pub struct PeerSession {
    pub node_id: NodeId,
    chain_hash: [u8; 32],
    features: PeerFeatures,
    broadcast_index: u64,
    filter: TimestampFilter,
    scid_reply: Option<ScidQueryReply>,
    range_issued: Option<RangeQueryAccumulator>,
    pongs_outstanding: u32,
    max_tracked_range_drops: usize,
    dropped_range_blocks: Vec<u32>,
    /// Messages from the current scid-query batch not yet handed to the
    /// caller; `pump` drains one per call so a batch never floods a single
    /// flush.
    pending_batch: VecDeque<Message>,
    /// Cadence at which broadcast-log entries (not scid-query replies) are
    /// allowed to flush, in milliseconds.
    broadcast_interval_ms: u64,
    /// Earliest `now_ms` at which `pump` may emit another broadcast-log
    /// entry to this peer.
    next_broadcast_flush_ms: u64,
}

impl PeerSession {
    /// Construct a session and pick its initial broadcast cursor per the
    /// admission rule: `gossip_queries` starts inert (sentinel, filter
    /// "none") until an explicit filter arrives; otherwise
    /// `initial_routing_sync` replays the whole log; otherwise only future
    /// entries are sent.
    pub fn new(
        node_id: NodeId,
        chain_hash: [u8; 32],
        features: PeerFeatures,
        log_next_index: u64,
        max_tracked_range_drops: usize,
        broadcast_interval_ms: u64,
    ) -> Self {
        let (broadcast_index, filter) = if features.gossip_queries {
            (SENTINEL_INDEX, TimestampFilter::none())
        } else if features.initial_routing_sync {
            (0, TimestampFilter::everything())
        } else {
            (log_next_index, TimestampFilter::everything())
        };
        PeerSession {
            node_id,
            chain_hash,
            features,
            broadcast_index,
            filter,
            scid_reply: None,
            range_issued: None,
            pongs_outstanding: 0,
            max_tracked_range_drops,
            dropped_range_blocks: Vec::new(),
            pending_batch: VecDeque::new(),
            broadcast_interval_ms,
            next_broadcast_flush_ms: 0,
        }
    }

    pub fn dropped_range_blocks(&self) -> &[u32] {
        &self.dropped_range_blocks
    }

    fn chain_hash_ok(&self, got: &[u8; 32]) -> bool {
        got == &self.chain_hash
    }

    /// Dispatch one inbound wire message.
    pub fn on_message(&mut self, msg: Message, graph: &mut Graph) -> Result<PeerEffect, PeerFault> {
        match msg {
            Message::ChannelAnnouncement(m) => self.on_channel_announcement(m),
            Message::NodeAnnouncement(m) => self.on_node_announcement(m, graph),
            Message::ChannelUpdate(m) => self.on_channel_update(m, graph),
            Message::QueryShortChannelIds(m) => self.on_query_short_channel_ids(m, graph),
            Message::ReplyShortChannelIdsEnd(m) => self.on_reply_short_channel_ids_end(m),
            Message::GossipTimestampFilter(m) => self.on_gossip_timestamp_filter(m),
            Message::QueryChannelRange(m) => self.on_query_channel_range(m, graph),
            Message::ReplyChannelRange(m) => self.on_reply_channel_range(m),
            Message::Ping(m) => self.on_ping(m),
            Message::Pong(m) => self.on_pong(m),
            Message::Error(_) => Ok(PeerEffect::default()),
        }
    }

    fn on_channel_announcement(&mut self, m: ChannelAnnouncement) -> Result<PeerEffect, PeerFault> {
        let _ = m;
        // Routed to the graph by the controller, which also performs the
        // funding-output lookup before calling `Graph::resolve_pending`;
        // the session itself only validates and forwards.
        Ok(PeerEffect::default())
    }

    fn on_node_announcement(
        &mut self,
        m: NodeAnnouncement,
        graph: &mut Graph,
    ) -> Result<PeerEffect, PeerFault> {
        let raw = Message::NodeAnnouncement(m.clone()).encode();
        graph.ingest_node_announcement(&m, raw)?;
        Ok(PeerEffect::default())
    }

    fn on_channel_update(
        &mut self,
        m: ChannelUpdate,
        graph: &mut Graph,
    ) -> Result<PeerEffect, PeerFault> {
        let raw = Message::ChannelUpdate(m.clone()).encode();
        graph.ingest_channel_update(&m, raw)?;
        Ok(PeerEffect {
            replies: Vec::new(),
            graph_update_accepted: true,
        })
    }

    fn on_query_short_channel_ids(
        &mut self,
        m: QueryShortChannelIds,
        graph: &mut Graph,
    ) -> Result<PeerEffect, PeerFault> {
        if self.scid_reply.is_some() {
            return Err(PeerFault::ConcurrentScidQuery);
        }
        if !self.chain_hash_ok(&m.chain_hash) {
            return Ok(PeerEffect::default());
        }
        let ids = m.decode_ids()?;
        self.scid_reply = Some(ScidQueryReply::new(m.chain_hash, ids));
        let _ = graph;
        Ok(PeerEffect::default())
    }

    fn on_reply_short_channel_ids_end(
        &mut self,
        m: ReplyShortChannelIdsEnd,
    ) -> Result<PeerEffect, PeerFault> {
        let _ = m;
        Ok(PeerEffect::default())
    }

    fn on_gossip_timestamp_filter(
        &mut self,
        m: GossipTimestampFilter,
    ) -> Result<PeerEffect, PeerFault> {
        if !self.chain_hash_ok(&m.chain_hash) {
            return Err(PeerFault::ChainHashMismatch);
        }
        self.filter = TimestampFilter::from_wire(m.first_timestamp, m.timestamp_range);
        self.broadcast_index = 0;
        Ok(PeerEffect::default())
    }

    fn on_query_channel_range(
        &mut self,
        m: QueryChannelRange,
        graph: &mut Graph,
    ) -> Result<PeerEffect, PeerFault> {
        if !self.chain_hash_ok(&m.chain_hash) {
            return Ok(PeerEffect::default());
        }
        let mut dropped = Vec::new();
        let replies = plan_range_reply(
            graph,
            m.chain_hash,
            m.first_blocknum,
            m.number_of_blocks,
            &mut dropped,
        );
        for block in dropped {
            if self.dropped_range_blocks.len() < self.max_tracked_range_drops {
                self.dropped_range_blocks.push(block);
            }
        }
        Ok(PeerEffect {
            replies,
            graph_update_accepted: false,
        })
    }

    /// Begin tracking our own issued `query_channel_range`.
    pub fn begin_range_query(&mut self, first_block: u32, num_blocks: u32) {
        self.range_issued = Some(RangeQueryAccumulator::new(first_block, num_blocks));
    }

    fn on_reply_channel_range(&mut self, m: ReplyChannelRange) -> Result<PeerEffect, PeerFault> {
        let Some(acc) = self.range_issued.as_mut() else {
            return Ok(PeerEffect::default());
        };
        if acc.accept(&m).is_err() {
            return Err(PeerFault::UnexpectedMessage(264));
        }
        Ok(PeerEffect::default())
    }

    /// Poll whether the issued range query has fully resolved, returning
    /// and clearing its accumulated scids if so.
    pub fn take_completed_range_query(
        &mut self,
    ) -> Option<(Vec<crate::ids::ShortChannelId>, bool)> {
        if self.range_issued.as_ref()?.is_complete() {
            self.range_issued.take().map(|acc| acc.finish())
        } else {
            None
        }
    }

    fn on_ping(&mut self, m: Ping) -> Result<PeerEffect, PeerFault> {
        if m.num_pong_bytes >= MAX_PONG_BYTES {
            return Ok(PeerEffect::default());
        }
        let pong = Message::Pong(Pong {
            ignored: vec![0u8; m.num_pong_bytes as usize],
        });
        Ok(PeerEffect {
            replies: vec![pong],
            graph_update_accepted: false,
        })
    }

    fn on_pong(&mut self, _m: Pong) -> Result<PeerEffect, PeerFault> {
        if self.pongs_outstanding == 0 {
            return Err(PeerFault::UnexpectedPong);
        }
        self.pongs_outstanding -= 1;
        Ok(PeerEffect::default())
    }

    /// Record that we sent a ping and are now awaiting a pong.
    pub fn note_ping_sent(&mut self) {
        self.pongs_outstanding += 1;
    }

    /// `dump_gossip`: called whenever the outbound side is writable.
    /// Returns the next message to send, if any, following the priority
    /// order: drain any scid-query batch messages held over from a prior
    /// call, then finish an in-progress scid-query reply, then the next
    /// broadcast-log entry within this peer's timestamp filter.
    ///
    /// `now_ms` only gates the broadcast-log branch: scid-query and range
    /// replies are on-demand answers to this peer's own request and are
    /// never staggered, but log fan-out is rate-limited to one entry per
    /// `broadcast_interval_msec` so a peer that was offline for a while
    /// doesn't get dumped its entire backlog in one flush.
    pub fn pump(&mut self, graph: &Graph, now_ms: u64) -> Option<Message> {
        if let Some(msg) = self.pending_batch.pop_front() {
            return Some(msg);
        }

        if let Some(reply) = self.scid_reply.as_mut() {
            let mut batch = reply.next_batch(graph);
            if reply.is_done() {
                self.scid_reply = None;
            }
            if batch.is_empty() {
                return None;
            }
            let first = batch.remove(0);
            self.pending_batch.extend(batch);
            return Some(first);
        }

        if self.filter.sends_nothing() {
            return None;
        }

        if now_ms < self.next_broadcast_flush_ms {
            return None;
        }

        let (entry, next_index) =
            graph
                .broadcast_log()
                .next_after(self.broadcast_index, self.filter.ts_min, self.filter.ts_max)?;
        self.broadcast_index = next_index;
        self.next_broadcast_flush_ms = now_ms + self.broadcast_interval_ms;
        Message::decode(&entry.bytes).ok()
    }

    pub fn has_pending_scid_reply(&self) -> bool {
        self.scid_reply.is_some()
    }

    pub fn broadcast_index(&self) -> u64 {
        self.broadcast_index
    }

    pub fn filter(&self) -> TimestampFilter {
        self.filter
    }

    /// Build the wire error sent back to a peer whose message triggered a
    /// disconnect-tier fault.
    pub fn fault_to_wire_error(fault: &PeerFault) -> Message {
        Message::Error(WireError::global(fault.to_string().into_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorTier;
    use crate::graph::Graph;

    fn session(features: PeerFeatures) -> PeerSession {
        PeerSession::new(NodeId([1; 33]), [0; 32], features, 0, 64, 1000)
    }

    #[test]
    fn gossip_queries_peer_starts_sending_nothing() {
        let s = session(PeerFeatures {
            gossip_queries: true,
            initial_routing_sync: false,
        });
        assert!(s.filter().sends_nothing());
        assert_eq!(s.broadcast_index(), SENTINEL_INDEX);
    }

    #[test]
    fn plain_peer_without_initial_sync_starts_at_log_head() {
        let s = PeerSession::new(NodeId([1; 33]), [0; 32], PeerFeatures::default(), 5, 64, 1000);
        assert_eq!(s.broadcast_index(), 5);
        assert!(!s.filter().sends_nothing());
    }

    #[test]
    fn filter_message_resets_cursor_to_zero() {
        let mut s = session(PeerFeatures {
            gossip_queries: true,
            initial_routing_sync: false,
        });
        let mut graph = Graph::new();
        s.on_message(
            Message::GossipTimestampFilter(GossipTimestampFilter {
                chain_hash: [0; 32],
                first_timestamp: 0,
                timestamp_range: u32::MAX,
            }),
            &mut graph,
        )
        .unwrap();
        assert_eq!(s.broadcast_index(), 0);
        assert!(!s.filter().sends_nothing());
    }

    #[test]
    fn filter_chain_hash_mismatch_is_disconnect_tier() {
        let mut s = session(PeerFeatures::default());
        let mut graph = Graph::new();
        let err = s
            .on_message(
                Message::GossipTimestampFilter(GossipTimestampFilter {
                    chain_hash: [9; 32],
                    first_timestamp: 0,
                    timestamp_range: 10,
                }),
                &mut graph,
            )
            .unwrap_err();
        assert_eq!(err.tier(), ErrorTier::Disconnect);
    }

    #[test]
    fn concurrent_scid_query_is_rejected() {
        let mut s = session(PeerFeatures::default());
        let mut graph = Graph::new();
        let q = Message::QueryShortChannelIds(QueryShortChannelIds {
            chain_hash: [0; 32],
            short_ids_encoding: crate::codec::encode_scid_list(&[]),
        });
        s.on_message(q.clone(), &mut graph).unwrap();
        let err = s.on_message(q, &mut graph).unwrap_err();
        assert!(matches!(err, PeerFault::ConcurrentScidQuery));
        assert_eq!(err.tier(), ErrorTier::Disconnect);
    }

    #[test]
    fn ping_below_threshold_gets_a_pong() {
        let mut s = session(PeerFeatures::default());
        let mut graph = Graph::new();
        let effect = s
            .on_message(
                Message::Ping(Ping {
                    num_pong_bytes: 10,
                    ignored: vec![],
                }),
                &mut graph,
            )
            .unwrap();
        assert_eq!(effect.replies.len(), 1);
        assert!(matches!(effect.replies[0], Message::Pong(_)));
    }

    #[test]
    fn ping_at_max_answerable_size_still_gets_a_pong() {
        let mut s = session(PeerFeatures::default());
        let mut graph = Graph::new();
        let effect = s
            .on_message(
                Message::Ping(Ping {
                    num_pong_bytes: MAX_PONG_BYTES - 1,
                    ignored: vec![],
                }),
                &mut graph,
            )
            .unwrap();
        assert_eq!(effect.replies.len(), 1);
        assert!(matches!(effect.replies[0], Message::Pong(_)));
    }

    #[test]
    fn oversized_ping_request_is_ignored() {
        let mut s = session(PeerFeatures::default());
        let mut graph = Graph::new();
        let effect = s
            .on_message(
                Message::Ping(Ping {
                    num_pong_bytes: u16::MAX,
                    ignored: vec![],
                }),
                &mut graph,
            )
            .unwrap();
        assert!(effect.replies.is_empty());
    }

    #[test]
    fn unexpected_pong_is_a_fault() {
        let mut s = session(PeerFeatures::default());
        let mut graph = Graph::new();
        let err = s
            .on_message(Message::Pong(Pong { ignored: vec![] }), &mut graph)
            .unwrap_err();
        assert!(matches!(err, PeerFault::UnexpectedPong));
    }

    #[test]
    fn pong_after_ping_sent_is_accepted() {
        let mut s = session(PeerFeatures::default());
        let mut graph = Graph::new();
        s.note_ping_sent();
        s.on_message(Message::Pong(Pong { ignored: vec![] }), &mut graph)
            .unwrap();
    }
}
