// Copyright (c) 2024 Botho Foundation

//! Reply side of `query_short_channel_ids`: one batch per pump call so
//! progress interleaves with other outbound work instead of dumping the
//! whole reply at once.

use crate::codec::{Message, ReplyShortChannelIdsEnd};
use crate::graph::Graph;
use crate::ids::{NodeId, ShortChannelId};

#[derive(Debug)]
enum Phase {
    Channels,
    Nodes,
    Done,
}

/// In-progress reply to a single `query_short_channel_ids`. At most one of
/// these may exist per peer at a time (the peer-to-peer contract forbids a
/// second concurrent query).
#[derive(Debug)]
pub struct ScidQueryReply {
    chain_hash: [u8; 32],
    scids: Vec<ShortChannelId>,
    idx: usize,
    pending_nodes: Vec<NodeId>,
    node_idx: usize,
    phase: Phase,
}

impl ScidQueryReply {
    pub fn new(chain_hash: [u8; 32], scids: Vec<ShortChannelId>) -> Self {
        ScidQueryReply {
            chain_hash,
            scids,
            idx: 0,
            pending_nodes: Vec::new(),
            node_idx: 0,
            phase: Phase::Channels,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self.phase, Phase::Done)
    }

    /// Produce the next logical batch: a `channel_announcement` plus both
    /// of its `channel_update`s, or one `node_announcement`, or the
    /// terminating `reply_short_channel_ids_end`.
    pub fn next_batch(&mut self, graph: &Graph) -> Vec<Message> {
        match self.phase {
            Phase::Channels => self.next_channel_batch(graph),
            Phase::Nodes => self.next_node_batch(graph),
            Phase::Done => Vec::new(),
        }
    }

    fn next_channel_batch(&mut self, graph: &Graph) -> Vec<Message> {
        while self.idx < self.scids.len() {
            let scid = self.scids[self.idx];
            self.idx += 1;
            let Some(channel) = graph.get_channel(&scid) else {
                continue;
            };
            let Some(raw_announcement) = &channel.raw_announcement else {
                continue;
            };
            let mut out = vec![
                Message::decode(raw_announcement).expect("cached announcement is well-formed")
            ];
            for half in &channel.half {
                if let Some(raw_update) = &half.raw_update {
                    out.push(
                        Message::decode(raw_update).expect("cached update is well-formed"),
                    );
                }
            }
            self.pending_nodes.extend_from_slice(&channel.node_id);
            return out;
        }
        self.pending_nodes.sort_unstable();
        self.pending_nodes.dedup();
        self.phase = Phase::Nodes;
        self.next_node_batch(graph)
    }

    fn next_node_batch(&mut self, graph: &Graph) -> Vec<Message> {
        while self.node_idx < self.pending_nodes.len() {
            let node_id = self.pending_nodes[self.node_idx];
            self.node_idx += 1;
            if let Some(node) = graph.get_node(&node_id) {
                if let Some(raw) = &node.raw_announcement {
                    return vec![Message::decode(raw).expect("cached node announcement is well-formed")];
                }
            }
        }
        self.phase = Phase::Done;
        vec![Message::ReplyShortChannelIdsEnd(ReplyShortChannelIdsEnd {
            chain_hash: self.chain_hash,
            complete: true,
        })]
    }
}
