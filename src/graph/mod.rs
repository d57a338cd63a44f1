// Copyright (c) 2024 Botho Foundation

//! The in-memory routing graph: channels, nodes, and the broadcast log
//! that threads gossip out to connected peers.
//!
//! The graph has a single owner (the daemon controller, see
//! [`crate::controller`]); peers never hold a reference into it, only
//! [`crate::ids::NodeId`]/[`crate::ids::ShortChannelId`] keys. All mutation
//! goes through the three ingestion entry points on [`Graph`].

mod broadcast_log;
mod store;

pub use broadcast_log::{BroadcastEntry, BroadcastLog, SENTINEL_INDEX};
pub use store::{Channel, Graph, HalfChannel, Node, PendingAnnouncement};
