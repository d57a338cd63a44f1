// Copyright (c) 2024 Botho Foundation

//! The wire messages this engine speaks, plus their type tags.
//!
//! Every message is framed as a 2-byte big-endian type tag followed by the
//! type's fields; [`Message::encode`]/[`Message::decode`] handle the tag.

use super::scid_list::{decode_scid_list, encode_scid_list};
use super::{decode_addresses, encode_addresses, write_u16, write_u32, write_u64, DecodeError};
use super::{Reader, WireAddress, Writer};
use crate::ids::{NodeId, ShortChannelId};

pub const TYPE_ERROR: u16 = 17;
pub const TYPE_PING: u16 = 18;
pub const TYPE_PONG: u16 = 19;
pub const TYPE_CHANNEL_ANNOUNCEMENT: u16 = 256;
pub const TYPE_NODE_ANNOUNCEMENT: u16 = 257;
pub const TYPE_CHANNEL_UPDATE: u16 = 258;
pub const TYPE_QUERY_SHORT_CHANNEL_IDS: u16 = 261;
pub const TYPE_REPLY_SHORT_CHANNEL_IDS_END: u16 = 262;
pub const TYPE_QUERY_CHANNEL_RANGE: u16 = 263;
pub const TYPE_REPLY_CHANNEL_RANGE: u16 = 264;
pub const TYPE_GOSSIP_TIMESTAMP_FILTER: u16 = 265;

/// Message-flags bit indicating `htlc_maximum_msat` is present.
pub const MSGFLAG_OPTION_HTLC_MAX: u8 = 0x01;
/// Channel-flags bit indicating the direction this half refers to.
pub const CHANFLAG_DIRECTION: u8 = 0x01;
/// Channel-flags bit indicating the half is disabled.
pub const CHANFLAG_DISABLED: u8 = 0x02;

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelAnnouncement {
    pub node_signature_1: [u8; 64],
    pub node_signature_2: [u8; 64],
    pub bitcoin_signature_1: [u8; 64],
    pub bitcoin_signature_2: [u8; 64],
    pub features: Vec<u8>,
    pub chain_hash: [u8; 32],
    pub short_channel_id: ShortChannelId,
    pub node_id_1: NodeId,
    pub node_id_2: NodeId,
    pub bitcoin_key_1: NodeId,
    pub bitcoin_key_2: NodeId,
}

impl ChannelAnnouncement {
    /// Bytes covered by the four signatures: everything but the
    /// signatures themselves.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut w = Writer::new();
        write_u16(&mut w, self.features.len() as u16);
        w.extend_from_slice(&self.features);
        w.extend_from_slice(&self.chain_hash);
        write_u64(&mut w, self.short_channel_id.to_u64());
        w.extend_from_slice(self.node_id_1.as_bytes());
        w.extend_from_slice(self.node_id_2.as_bytes());
        w.extend_from_slice(self.bitcoin_key_1.as_bytes());
        w.extend_from_slice(self.bitcoin_key_2.as_bytes());
        w
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeAnnouncement {
    pub signature: [u8; 64],
    pub features: Vec<u8>,
    pub timestamp: u32,
    pub node_id: NodeId,
    pub rgb_color: [u8; 3],
    pub alias: [u8; 32],
    pub addresses: Vec<WireAddress>,
}

impl NodeAnnouncement {
    /// Bytes covered by `signature`: everything but the signature itself.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut w = Writer::new();
        write_u16(&mut w, self.features.len() as u16);
        w.extend_from_slice(&self.features);
        write_u32(&mut w, self.timestamp);
        w.extend_from_slice(self.node_id.as_bytes());
        w.extend_from_slice(&self.rgb_color);
        w.extend_from_slice(&self.alias);
        w.extend_from_slice(&encode_addresses(&self.addresses));
        w
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelUpdate {
    pub signature: [u8; 64],
    pub chain_hash: [u8; 32],
    pub short_channel_id: ShortChannelId,
    pub timestamp: u32,
    pub message_flags: u8,
    pub channel_flags: u8,
    pub cltv_expiry_delta: u16,
    pub htlc_minimum_msat: u64,
    pub fee_base_msat: u32,
    pub fee_proportional_millionths: u32,
    pub htlc_maximum_msat: Option<u64>,
}

impl ChannelUpdate {
    pub fn direction(&self) -> u8 {
        self.channel_flags & CHANFLAG_DIRECTION
    }

    pub fn disabled(&self) -> bool {
        self.channel_flags & CHANFLAG_DISABLED != 0
    }

    /// Bytes covered by `signature`: everything but the signature itself.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.extend_from_slice(&self.chain_hash);
        write_u64(&mut w, self.short_channel_id.to_u64());
        write_u32(&mut w, self.timestamp);
        w.push(self.message_flags);
        w.push(self.channel_flags);
        write_u16(&mut w, self.cltv_expiry_delta);
        write_u64(&mut w, self.htlc_minimum_msat);
        write_u32(&mut w, self.fee_base_msat);
        write_u32(&mut w, self.fee_proportional_millionths);
        if self.message_flags & MSGFLAG_OPTION_HTLC_MAX != 0 {
            write_u64(&mut w, self.htlc_maximum_msat.unwrap_or(0));
        }
        w
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryShortChannelIds {
    pub chain_hash: [u8; 32],
    pub short_ids_encoding: Vec<u8>,
}

impl QueryShortChannelIds {
    pub fn decode_ids(&self) -> Result<Vec<ShortChannelId>, DecodeError> {
        decode_scid_list(&self.short_ids_encoding)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplyShortChannelIdsEnd {
    pub chain_hash: [u8; 32],
    pub complete: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryChannelRange {
    pub chain_hash: [u8; 32],
    pub first_blocknum: u32,
    pub number_of_blocks: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplyChannelRange {
    pub chain_hash: [u8; 32],
    pub first_blocknum: u32,
    pub number_of_blocks: u32,
    pub complete: bool,
    pub short_ids_encoding: Vec<u8>,
}

impl ReplyChannelRange {
    pub fn decode_ids(&self) -> Result<Vec<ShortChannelId>, DecodeError> {
        decode_scid_list(&self.short_ids_encoding)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GossipTimestampFilter {
    pub chain_hash: [u8; 32],
    pub first_timestamp: u32,
    pub timestamp_range: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ping {
    pub num_pong_bytes: u16,
    pub ignored: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pong {
    pub ignored: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WireError {
    pub channel_id: [u8; 32],
    pub data: Vec<u8>,
}

impl WireError {
    /// A connection-wide error (as opposed to one scoped to a channel) is
    /// conventionally sent with an all-zero channel id.
    pub fn global(data: impl Into<Vec<u8>>) -> Self {
        WireError {
            channel_id: [0u8; 32],
            data: data.into(),
        }
    }
}

/// Any wire message this engine understands. Messages outside this set are
/// a protocol error at the caller (they never reach `decode` as a variant).
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    ChannelAnnouncement(ChannelAnnouncement),
    NodeAnnouncement(NodeAnnouncement),
    ChannelUpdate(ChannelUpdate),
    QueryShortChannelIds(QueryShortChannelIds),
    ReplyShortChannelIdsEnd(ReplyShortChannelIdsEnd),
    QueryChannelRange(QueryChannelRange),
    ReplyChannelRange(ReplyChannelRange),
    GossipTimestampFilter(GossipTimestampFilter),
    Ping(Ping),
    Pong(Pong),
    Error(WireError),
}

impl Message {
    pub fn type_tag(&self) -> u16 {
        match self {
            Message::ChannelAnnouncement(_) => TYPE_CHANNEL_ANNOUNCEMENT,
            Message::NodeAnnouncement(_) => TYPE_NODE_ANNOUNCEMENT,
            Message::ChannelUpdate(_) => TYPE_CHANNEL_UPDATE,
            Message::QueryShortChannelIds(_) => TYPE_QUERY_SHORT_CHANNEL_IDS,
            Message::ReplyShortChannelIdsEnd(_) => TYPE_REPLY_SHORT_CHANNEL_IDS_END,
            Message::QueryChannelRange(_) => TYPE_QUERY_CHANNEL_RANGE,
            Message::ReplyChannelRange(_) => TYPE_REPLY_CHANNEL_RANGE,
            Message::GossipTimestampFilter(_) => TYPE_GOSSIP_TIMESTAMP_FILTER,
            Message::Ping(_) => TYPE_PING,
            Message::Pong(_) => TYPE_PONG,
            Message::Error(_) => TYPE_ERROR,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        write_u16(&mut w, self.type_tag());
        match self {
            Message::ChannelAnnouncement(m) => {
                w.extend_from_slice(&m.node_signature_1);
                w.extend_from_slice(&m.node_signature_2);
                w.extend_from_slice(&m.bitcoin_signature_1);
                w.extend_from_slice(&m.bitcoin_signature_2);
                write_u16(&mut w, m.features.len() as u16);
                w.extend_from_slice(&m.features);
                w.extend_from_slice(&m.chain_hash);
                write_u64(&mut w, m.short_channel_id.to_u64());
                w.extend_from_slice(m.node_id_1.as_bytes());
                w.extend_from_slice(m.node_id_2.as_bytes());
                w.extend_from_slice(m.bitcoin_key_1.as_bytes());
                w.extend_from_slice(m.bitcoin_key_2.as_bytes());
            }
            Message::NodeAnnouncement(m) => {
                w.extend_from_slice(&m.signature);
                write_u16(&mut w, m.features.len() as u16);
                w.extend_from_slice(&m.features);
                write_u32(&mut w, m.timestamp);
                w.extend_from_slice(m.node_id.as_bytes());
                w.extend_from_slice(&m.rgb_color);
                w.extend_from_slice(&m.alias);
                w.extend_from_slice(&encode_addresses(&m.addresses));
            }
            Message::ChannelUpdate(m) => {
                w.extend_from_slice(&m.signature);
                w.extend_from_slice(&m.chain_hash);
                write_u64(&mut w, m.short_channel_id.to_u64());
                write_u32(&mut w, m.timestamp);
                w.push(m.message_flags);
                w.push(m.channel_flags);
                write_u16(&mut w, m.cltv_expiry_delta);
                write_u64(&mut w, m.htlc_minimum_msat);
                write_u32(&mut w, m.fee_base_msat);
                write_u32(&mut w, m.fee_proportional_millionths);
                if m.message_flags & MSGFLAG_OPTION_HTLC_MAX != 0 {
                    write_u64(&mut w, m.htlc_maximum_msat.unwrap_or(0));
                }
            }
            Message::QueryShortChannelIds(m) => {
                w.extend_from_slice(&m.chain_hash);
                write_u16(&mut w, m.short_ids_encoding.len() as u16);
                w.extend_from_slice(&m.short_ids_encoding);
            }
            Message::ReplyShortChannelIdsEnd(m) => {
                w.extend_from_slice(&m.chain_hash);
                w.push(m.complete as u8);
            }
            Message::QueryChannelRange(m) => {
                w.extend_from_slice(&m.chain_hash);
                write_u32(&mut w, m.first_blocknum);
                write_u32(&mut w, m.number_of_blocks);
            }
            Message::ReplyChannelRange(m) => {
                w.extend_from_slice(&m.chain_hash);
                write_u32(&mut w, m.first_blocknum);
                write_u32(&mut w, m.number_of_blocks);
                w.push(m.complete as u8);
                write_u16(&mut w, m.short_ids_encoding.len() as u16);
                w.extend_from_slice(&m.short_ids_encoding);
            }
            Message::GossipTimestampFilter(m) => {
                w.extend_from_slice(&m.chain_hash);
                write_u32(&mut w, m.first_timestamp);
                write_u32(&mut w, m.timestamp_range);
            }
            Message::Ping(m) => {
                write_u16(&mut w, m.num_pong_bytes);
                write_u16(&mut w, m.ignored.len() as u16);
                w.extend_from_slice(&m.ignored);
            }
            Message::Pong(m) => {
                write_u16(&mut w, m.ignored.len() as u16);
                w.extend_from_slice(&m.ignored);
            }
            Message::Error(m) => {
                w.extend_from_slice(&m.channel_id);
                write_u16(&mut w, m.data.len() as u16);
                w.extend_from_slice(&m.data);
            }
        }
        w
    }

    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(buf);
        let ty = r.u16("message type")?;
        let msg = match ty {
            TYPE_CHANNEL_ANNOUNCEMENT => {
                let node_signature_1 = r.array64("node_signature_1")?;
                let node_signature_2 = r.array64("node_signature_2")?;
                let bitcoin_signature_1 = r.array64("bitcoin_signature_1")?;
                let bitcoin_signature_2 = r.array64("bitcoin_signature_2")?;
                let flen = r.u16("features length")? as usize;
                let features = r.bytes(flen, "features")?.to_vec();
                let chain_hash = r.array32("chain_hash")?;
                let short_channel_id = ShortChannelId::from_u64(r.u64("short_channel_id")?);
                let node_id_1 = NodeId(r.array33("node_id_1")?);
                let node_id_2 = NodeId(r.array33("node_id_2")?);
                let bitcoin_key_1 = NodeId(r.array33("bitcoin_key_1")?);
                let bitcoin_key_2 = NodeId(r.array33("bitcoin_key_2")?);
                Message::ChannelAnnouncement(ChannelAnnouncement {
                    node_signature_1,
                    node_signature_2,
                    bitcoin_signature_1,
                    bitcoin_signature_2,
                    features,
                    chain_hash,
                    short_channel_id,
                    node_id_1,
                    node_id_2,
                    bitcoin_key_1,
                    bitcoin_key_2,
                })
            }
            TYPE_NODE_ANNOUNCEMENT => {
                let signature = r.array64("signature")?;
                let flen = r.u16("features length")? as usize;
                let features = r.bytes(flen, "features")?.to_vec();
                let timestamp = r.u32("timestamp")?;
                let node_id = NodeId(r.array33("node_id")?);
                let rgb_color = r.bytes(3, "rgb_color")?.try_into().unwrap();
                let alias = r.array32("alias")?;
                let addresses = decode_addresses(&mut r)?;
                Message::NodeAnnouncement(NodeAnnouncement {
                    signature,
                    features,
                    timestamp,
                    node_id,
                    rgb_color,
                    alias,
                    addresses,
                })
            }
            TYPE_CHANNEL_UPDATE => {
                let signature = r.array64("signature")?;
                let chain_hash = r.array32("chain_hash")?;
                let short_channel_id = ShortChannelId::from_u64(r.u64("short_channel_id")?);
                let timestamp = r.u32("timestamp")?;
                let message_flags = r.u8("message_flags")?;
                let channel_flags = r.u8("channel_flags")?;
                let cltv_expiry_delta = r.u16("cltv_expiry_delta")?;
                let htlc_minimum_msat = r.u64("htlc_minimum_msat")?;
                let fee_base_msat = r.u32("fee_base_msat")?;
                let fee_proportional_millionths = r.u32("fee_proportional_millionths")?;
                let htlc_maximum_msat = if message_flags & MSGFLAG_OPTION_HTLC_MAX != 0 {
                    Some(r.u64("htlc_maximum_msat")?)
                } else {
                    None
                };
                Message::ChannelUpdate(ChannelUpdate {
                    signature,
                    chain_hash,
                    short_channel_id,
                    timestamp,
                    message_flags,
                    channel_flags,
                    cltv_expiry_delta,
                    htlc_minimum_msat,
                    fee_base_msat,
                    fee_proportional_millionths,
                    htlc_maximum_msat,
                })
            }
            TYPE_QUERY_SHORT_CHANNEL_IDS => {
                let chain_hash = r.array32("chain_hash")?;
                let elen = r.u16("encoding length")? as usize;
                let short_ids_encoding = r.bytes(elen, "short_ids_encoding")?.to_vec();
                Message::QueryShortChannelIds(QueryShortChannelIds {
                    chain_hash,
                    short_ids_encoding,
                })
            }
            TYPE_REPLY_SHORT_CHANNEL_IDS_END => {
                let chain_hash = r.array32("chain_hash")?;
                let complete = r.u8("complete")? != 0;
                Message::ReplyShortChannelIdsEnd(ReplyShortChannelIdsEnd {
                    chain_hash,
                    complete,
                })
            }
            TYPE_QUERY_CHANNEL_RANGE => {
                let chain_hash = r.array32("chain_hash")?;
                let first_blocknum = r.u32("first_blocknum")?;
                let number_of_blocks = r.u32("number_of_blocks")?;
                Message::QueryChannelRange(QueryChannelRange {
                    chain_hash,
                    first_blocknum,
                    number_of_blocks,
                })
            }
            TYPE_REPLY_CHANNEL_RANGE => {
                let chain_hash = r.array32("chain_hash")?;
                let first_blocknum = r.u32("first_blocknum")?;
                let number_of_blocks = r.u32("number_of_blocks")?;
                let complete = r.u8("complete")? != 0;
                let elen = r.u16("encoding length")? as usize;
                let short_ids_encoding = r.bytes(elen, "short_ids_encoding")?.to_vec();
                Message::ReplyChannelRange(ReplyChannelRange {
                    chain_hash,
                    first_blocknum,
                    number_of_blocks,
                    complete,
                    short_ids_encoding,
                })
            }
            TYPE_GOSSIP_TIMESTAMP_FILTER => {
                let chain_hash = r.array32("chain_hash")?;
                let first_timestamp = r.u32("first_timestamp")?;
                let timestamp_range = r.u32("timestamp_range")?;
                Message::GossipTimestampFilter(GossipTimestampFilter {
                    chain_hash,
                    first_timestamp,
                    timestamp_range,
                })
            }
            TYPE_PING => {
                let num_pong_bytes = r.u16("num_pong_bytes")?;
                let ilen = r.u16("ignored length")? as usize;
                let ignored = r.bytes(ilen, "ignored")?.to_vec();
                Message::Ping(Ping {
                    num_pong_bytes,
                    ignored,
                })
            }
            TYPE_PONG => {
                let ilen = r.u16("ignored length")? as usize;
                let ignored = r.bytes(ilen, "ignored")?.to_vec();
                Message::Pong(Pong { ignored })
            }
            TYPE_ERROR => {
                let channel_id = r.array32("channel_id")?;
                let dlen = r.u16("data length")? as usize;
                let data = r.bytes(dlen, "data")?.to_vec();
                Message::Error(WireError { channel_id, data })
            }
            other => return Err(DecodeError::UnknownMessageType(other)),
        };
        if !r.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(msg)
    }
}
