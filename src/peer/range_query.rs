// Copyright (c) 2024 Botho Foundation

//! Both ends of `query_channel_range`: the chunking algorithm used to
//! reply to a peer's query, and the accumulator used when this node is the
//! one asking.

use crate::codec::{encode_scid_list, decode_scid_list, Message, ReplyChannelRange};
use crate::graph::Graph;
use crate::ids::ShortChannelId;

/// Replies must fit in this many bytes once framed; header_overhead covers
/// the 2-byte type tag, 32-byte chain hash, two 4-byte block fields, the
/// complete byte, and the 2-byte encoding-length prefix.
const MAX_MESSAGE_BYTES: usize = 65535;
const HEADER_OVERHEAD: usize = 2 + 32 + 4 + 4 + 1 + 2;
const MAX_ENCODED_SCIDS_BYTES: usize = MAX_MESSAGE_BYTES - HEADER_OVERHEAD;

/// Produce one or more `reply_channel_range` records whose block ranges
/// partition `[first_block, first_block+num_blocks)` exactly, each fitting
/// the scid-list size budget. Recurses by bisecting the block range when a
/// single record would overflow; a single block that still overflows on
/// its own is logged and dropped by the caller (see `dropped_blocks`).
pub fn plan_range_reply(
    graph: &Graph,
    chain_hash: [u8; 32],
    first_block: u32,
    num_blocks: u32,
    dropped_blocks: &mut Vec<u32>,
) -> Vec<Message> {
    let mut out = Vec::new();
    plan_recursive(
        graph,
        chain_hash,
        first_block,
        num_blocks,
        dropped_blocks,
        &mut out,
    );
    out
}

fn plan_recursive(
    graph: &Graph,
    chain_hash: [u8; 32],
    first_block: u32,
    num_blocks: u32,
    dropped_blocks: &mut Vec<u32>,
    out: &mut Vec<Message>,
) {
    if num_blocks == 0 {
        return;
    }
    let scids = graph.channels_in_block_range(first_block, num_blocks);
    let encoded = encode_scid_list(&scids);
    if encoded.len() <= MAX_ENCODED_SCIDS_BYTES || num_blocks == 1 {
        if encoded.len() > MAX_ENCODED_SCIDS_BYTES {
            dropped_blocks.push(first_block);
            return;
        }
        out.push(Message::ReplyChannelRange(ReplyChannelRange {
            chain_hash,
            first_blocknum: first_block,
            number_of_blocks: num_blocks,
            complete: true,
            short_ids_encoding: encoded,
        }));
        return;
    }
    let left_blocks = num_blocks / 2;
    let right_blocks = num_blocks - left_blocks;
    plan_recursive(
        graph,
        chain_hash,
        first_block,
        left_blocks,
        dropped_blocks,
        out,
    );
    plan_recursive(
        graph,
        chain_hash,
        first_block + left_blocks,
        right_blocks,
        dropped_blocks,
        out,
    );
}

/// Tracks replies to a `query_channel_range` this node issued. `covered` is
/// a per-block bitmap guarding against overlapping or out-of-range
/// replies.
#[derive(Debug)]
pub struct RangeQueryAccumulator {
    first_block: u32,
    covered: Vec<bool>,
    scids: Vec<ShortChannelId>,
    complete: bool,
}

#[derive(Debug, PartialEq, Eq)]
pub enum AcceptError {
    OutOfRequestedRange,
    Overlap,
}

impl RangeQueryAccumulator {
    pub fn new(first_block: u32, num_blocks: u32) -> Self {
        RangeQueryAccumulator {
            first_block,
            covered: vec![false; num_blocks as usize],
            scids: Vec::new(),
            complete: true,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.covered.iter().all(|b| *b)
    }

    /// Fold one `reply_channel_range` into the accumulator.
    pub fn accept(&mut self, reply: &ReplyChannelRange) -> Result<(), AcceptError> {
        let start = reply
            .first_blocknum
            .checked_sub(self.first_block)
            .ok_or(AcceptError::OutOfRequestedRange)? as usize;
        let end = start
            .checked_add(reply.number_of_blocks as usize)
            .ok_or(AcceptError::OutOfRequestedRange)?;
        if end > self.covered.len() {
            return Err(AcceptError::OutOfRequestedRange);
        }
        if self.covered[start..end].iter().any(|b| *b) {
            return Err(AcceptError::Overlap);
        }
        for slot in &mut self.covered[start..end] {
            *slot = true;
        }
        if !reply.complete {
            self.complete = false;
        }
        let ids = decode_scid_list(&reply.short_ids_encoding)
            .map_err(|_| AcceptError::OutOfRequestedRange)?;
        self.scids.extend(ids);
        Ok(())
    }

    /// Consume the accumulator once `is_complete()`, returning the
    /// collected scids and whether every contributing reply claimed
    /// completeness.
    pub fn finish(self) -> (Vec<ShortChannelId>, bool) {
        (self.scids, self.complete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;

    #[test]
    fn empty_graph_yields_one_empty_record() {
        let graph = Graph::new();
        let mut dropped = Vec::new();
        let out = plan_range_reply(&graph, [0; 32], 700_000, 100, &mut dropped);
        assert_eq!(out.len(), 1);
        assert!(dropped.is_empty());
        if let Message::ReplyChannelRange(r) = &out[0] {
            assert_eq!(r.first_blocknum, 700_000);
            assert_eq!(r.number_of_blocks, 100);
            assert!(r.decode_ids().unwrap().is_empty());
        } else {
            panic!("wrong variant");
        }
    }

    #[test]
    fn accumulator_rejects_overlap() {
        let mut acc = RangeQueryAccumulator::new(700_000, 100);
        let reply = ReplyChannelRange {
            chain_hash: [0; 32],
            first_blocknum: 700_000,
            number_of_blocks: 50,
            complete: true,
            short_ids_encoding: encode_scid_list(&[]),
        };
        acc.accept(&reply).unwrap();
        assert_eq!(acc.accept(&reply), Err(AcceptError::Overlap));
    }

    #[test]
    fn accumulator_completes_when_bitmap_fills() {
        let mut acc = RangeQueryAccumulator::new(700_000, 100);
        acc.accept(&ReplyChannelRange {
            chain_hash: [0; 32],
            first_blocknum: 700_000,
            number_of_blocks: 60,
            complete: true,
            short_ids_encoding: encode_scid_list(&[]),
        })
        .unwrap();
        assert!(!acc.is_complete());
        acc.accept(&ReplyChannelRange {
            chain_hash: [0; 32],
            first_blocknum: 700_060,
            number_of_blocks: 40,
            complete: true,
            short_ids_encoding: encode_scid_list(&[ShortChannelId::new(700_070, 0, 0)]),
        })
        .unwrap();
        assert!(acc.is_complete());
        let (scids, complete) = acc.finish();
        assert_eq!(scids.len(), 1);
        assert!(complete);
    }

    #[test]
    fn accumulator_rejects_reply_outside_requested_range() {
        let mut acc = RangeQueryAccumulator::new(700_000, 10);
        let reply = ReplyChannelRange {
            chain_hash: [0; 32],
            first_blocknum: 699_000,
            number_of_blocks: 5,
            complete: true,
            short_ids_encoding: encode_scid_list(&[]),
        };
        assert_eq!(acc.accept(&reply), Err(AcceptError::OutOfRequestedRange));
    }
}
