// Copyright (c) 2024 Botho Foundation

//! Control commands accepted from the parent process over its
//! length-prefixed channel (fd 0). The parent protocol's wire framing is
//! an external collaborator; this module only defines the request/reply
//! shapes the controller dispatches on.

use crate::codec::WireAddress;
use crate::graph::Channel;
use crate::ids::{NodeId, ShortChannelId};

#[derive(Debug, Clone)]
pub enum ParentRequest {
    Init,
    GetNodes,
    GetChannels,
    GetRoute {
        src: NodeId,
        dst: NodeId,
        amount_msat: u64,
        risk_factor: u32,
        final_cltv: u16,
        fuzz_percent: u8,
        seed: [u8; 32],
    },
    GetChannelPeer {
        scid: ShortChannelId,
    },
    GetIncomingChannels {
        node: NodeId,
    },
    Ping {
        node: NodeId,
    },
    GetTxoutReply {
        scid: ShortChannelId,
        satoshis: Option<u64>,
    },
    RoutingFailure {
        scid: ShortChannelId,
    },
    MarkChannelUnroutable {
        scid: ShortChannelId,
    },
    OutpointSpent {
        scid: ShortChannelId,
    },
    LocalChannelClose {
        scid: ShortChannelId,
    },
    /// Lazily reconcile one of our own channel halves against its
    /// `local_disabled` flag, emitting a fresh `channel_update` if they've
    /// drifted apart.
    GetUpdate {
        scid: ShortChannelId,
        dir: u8,
    },
    /// Our own announceable addresses, as carried in `node_announcement`.
    GetAddrs,
}

#[derive(Debug, Clone)]
pub enum ParentReply {
    Ack,
    Nodes(Vec<NodeId>),
    Channels(Vec<ShortChannelId>),
    Route(Vec<RouteHop>),
    ChannelPeer(Option<NodeId>),
    IncomingChannels(Vec<ShortChannelId>),
    Pong,
    UpdateEmitted(bool),
    Addrs(Vec<WireAddress>),
}

#[derive(Debug, Clone)]
pub struct RouteHop {
    pub node: NodeId,
    pub scid: ShortChannelId,
    pub amount_msat: u64,
    pub cltv_expiry: u32,
}

/// Route computation is an external collaborator: a black box called with
/// the parameters above and returning a hop list or `None` if no route is
/// found. This signature is the boundary the controller dispatches
/// `GetRoute` through.
pub trait RouteFinder {
    fn find_route(
        &self,
        src: &NodeId,
        dst: &NodeId,
        amount_msat: u64,
        risk_factor: u32,
        final_cltv: u16,
        fuzz_percent: u8,
        seed: [u8; 32],
    ) -> Option<Vec<RouteHop>>;
}

/// Build the `getchannels` summary list, mirroring the field set an
/// operator-facing RPC would expose.
pub fn channel_summaries<'a>(channels: impl Iterator<Item = &'a Channel>) -> Vec<ShortChannelId> {
    channels.map(|c| c.scid).collect()
}
