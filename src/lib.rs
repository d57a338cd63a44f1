// Copyright (c) 2024 Botho Foundation

//! Gossip peer protocol engine for a payment-channel network daemon.
//!
//! This crate implements the per-peer wire protocol state machine, the
//! staggered broadcast engine, and the channel-range/short-channel-id query
//! paths that sit between a routing graph and a set of connected peers.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                        DaemonController                       │
//! ├───────────────────┬───────────────────────┬───────────────────┤
//! │   Graph + Store    │   PeerSession (xN)    │  Signer / parent  │
//! │   (single owner)    │   (codec + pump)      │  control channels │
//! └───────────────────┴───────────────────────┴───────────────────┘
//! ```
//!
//! Peers never mutate the graph directly: every ingestion goes through
//! [`graph::Graph`]'s typed entry points, and the result is fanned out to all
//! connected peers through the [`graph::BroadcastLog`].
//!
//! # Usage
//!
//! ```ignore
//! use pcn_gossipd::{config::GossipConfig, controller::DaemonController};
//!
//! let config = GossipConfig::with_local_node_id(local_node_id);
//! let mut controller = DaemonController::new(config);
//! let rx = controller.admit_peer(new_peer_request);
//! controller.handle_peer_message(peer_id, msg, &mut signer).await;
//! ```

#![warn(missing_docs)]

pub mod codec;
pub mod config;
pub mod controller;
pub mod error;
pub mod graph;
pub mod ids;
pub mod peer;
pub mod sig;

pub use config::{ChainHash, GossipConfig, GossipConfigBuilder};
pub use error::{ErrorTier, FatalError, GraphError, PeerFault};
pub use ids::{NodeId, ShortChannelId};
