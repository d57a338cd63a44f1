// Copyright (c) 2024 Botho Foundation

//! Error types for the gossip engine.
//!
//! Errors are split into the tiers the daemon acts on: graph-ingestion
//! rejections, per-peer protocol faults, and fatal conditions that end the
//! process. Callers switch on [`ErrorTier`] rather than matching message
//! strings.

use displaydoc::Display;
use thiserror::Error;

/// How a fault should be handled by the peer session or controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorTier {
    /// Send a wire `error` to the peer and close the socket.
    Disconnect,
    /// Log and otherwise ignore; the connection stays open.
    SoftDrop,
    /// Fatal to the whole daemon; the process must exit.
    Fatal,
}

/// Errors raised by routing-graph ingestion.
#[derive(Debug, Display, Error)]
pub enum GraphError {
    /// signature over {0} does not verify
    InvalidSignature(&'static str),
    /// timestamp {got} is not greater than the prior value {prior}
    StaleTimestamp { got: u32, prior: i64 },
    /// channel {0:?} is unknown
    UnknownChannel(crate::ids::ShortChannelId),
    /// node {0:?} is unknown
    UnknownNode(crate::ids::NodeId),
    /// channel {0:?} funding output is not yet resolved
    FundingUnresolved(crate::ids::ShortChannelId),
    /// channel {0:?} funding output does not match the announcement
    FundingMismatch(crate::ids::ShortChannelId),
    /// channel {0:?} is already present
    DuplicateChannel(crate::ids::ShortChannelId),
}

impl GraphError {
    pub fn tier(&self) -> ErrorTier {
        ErrorTier::SoftDrop
    }
}

/// Faults a peer session can encounter while driving the protocol.
#[derive(Debug, Display, Error)]
pub enum PeerFault {
    /// wire decode failed: {0}
    Decode(#[from] crate::codec::DecodeError),
    /// chain hash mismatch on a stateful command
    ChainHashMismatch,
    /// a short-channel-id query is already outstanding on this connection
    ConcurrentScidQuery,
    /// a channel-range query is already outstanding on this connection
    ConcurrentRangeQuery,
    /// received pong with no outstanding ping
    UnexpectedPong,
    /// peer sent an unsupported or out-of-order message type {0}
    UnexpectedMessage(u16),
    /// graph rejected the message: {0}
    Graph(#[from] GraphError),
}

impl PeerFault {
    /// Tier this fault resolves to. Graph faults from peer-sourced messages
    /// are upstream-surfaced (sent back as a wire error) rather than
    /// disconnecting, everything else at this layer is a hard protocol
    /// violation.
    pub fn tier(&self) -> ErrorTier {
        match self {
            PeerFault::Graph(_) => ErrorTier::SoftDrop,
            _ => ErrorTier::Disconnect,
        }
    }
}

/// Conditions that terminate the daemon process.
#[derive(Debug, Display, Error)]
pub enum FatalError {
    /// signer channel failed: {0}
    SignerIo(String),
    /// parent control channel closed
    ParentGone,
    /// local update was rejected by graph ingestion: {0}
    LocalIngestionRejected(GraphError),
    /// unknown short-channel-id list encoding tag {0}
    UnknownEncodingTag(u8),
    /// internal invariant violated: {0}
    Invariant(&'static str),
}

pub type GraphResult<T> = Result<T, GraphError>;
pub type PeerResult<T> = Result<T, PeerFault>;
