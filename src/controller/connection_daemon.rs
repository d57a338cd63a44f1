// Copyright (c) 2024 Botho Foundation

//! The handoff boundary with the connection daemon: it owns the noise
//! handshake and the raw socket, and forwards already-decrypted,
//! length-prefixed messages to us. What we see is just decoded
//! [`Message`]s in and out; the socketpair itself is an external
//! collaborator.

use crate::codec::Message;
use crate::ids::NodeId;
use crate::peer::PeerFeatures;
use tokio::sync::mpsc;

/// One connected peer's link to its connection-daemon-owned socket.
pub struct PeerLink {
    pub node_id: NodeId,
    pub features: PeerFeatures,
    /// Controller pushes outbound wire messages here; the connection
    /// daemon drains it and writes them to the peer's socket.
    pub outbound_tx: mpsc::UnboundedSender<Message>,
}

/// Request from the connection daemon announcing a newly accepted or
/// dialed peer connection.
pub struct NewPeerRequest {
    pub node_id: NodeId,
    pub features: PeerFeatures,
}

/// One inbound event from any connected peer, multiplexed onto a single
/// channel the controller selects on.
pub enum PeerInboundEvent {
    Message { node_id: NodeId, msg: Message },
    Closed { node_id: NodeId },
}

/// Construct the channel pair for a newly admitted peer: returns the
/// `PeerLink` the controller keeps (to push outbound traffic) and the
/// receiver the connection-daemon-facing task drains.
pub fn new_peer_channels(
    node_id: NodeId,
    features: PeerFeatures,
) -> (PeerLink, mpsc::UnboundedReceiver<Message>) {
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    (
        PeerLink {
            node_id,
            features,
            outbound_tx,
        },
        outbound_rx,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn outbound_messages_reach_the_receiver() {
        let (link, mut rx) = new_peer_channels(NodeId([0; 33]), PeerFeatures::default());
        link.outbound_tx
            .send(Message::Pong(crate::codec::Pong { ignored: vec![] }))
            .unwrap();
        assert!(rx.recv().await.is_some());
    }
}
