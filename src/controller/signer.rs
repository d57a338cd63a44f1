// Copyright (c) 2024 Botho Foundation

//! Client boundary for the external signer process.
//!
//! The signer holds the node's private key and is reached over a
//! length-prefixed request/reply pipe (fd 3). This module defines the
//! request/reply shape and the trait the controller drives it through;
//! the actual pipe codec is a thin framing layer, mirroring how the
//! request-response codec elsewhere in this codebase frames a request
//! and a response as length-prefixed blobs over an async read/write pair.

use crate::codec::{ChannelAnnouncement, ChannelUpdate, NodeAnnouncement};
use crate::error::FatalError;
use async_trait::async_trait;

/// Request to sign a (not yet signed) node_announcement body.
#[derive(Debug, Clone)]
pub struct SignNodeAnnouncementRequest {
    pub unsigned: NodeAnnouncement,
}

/// Request to sign a (not yet signed) channel_update body.
#[derive(Debug, Clone)]
pub struct SignChannelUpdateRequest {
    pub unsigned: ChannelUpdate,
}

/// Request to sign our own half of a channel_announcement.
#[derive(Debug, Clone)]
pub struct SignChannelAnnouncementRequest {
    pub unsigned: ChannelAnnouncement,
}

/// Round-trip client to the signer process. Both calls are synchronous
/// within the cooperative event loop: the controller blocks on the reply
/// before continuing, since only the controller (never a peer task)
/// issues signer calls.
#[async_trait]
pub trait SignerClient {
    async fn sign_node_announcement(
        &mut self,
        req: SignNodeAnnouncementRequest,
    ) -> Result<[u8; 64], FatalError>;

    async fn sign_channel_update(
        &mut self,
        req: SignChannelUpdateRequest,
    ) -> Result<[u8; 64], FatalError>;
}

/// An in-process signer used by tests and the integration harness: holds
/// the signing key directly instead of round-tripping over a pipe.
pub struct InMemorySigner {
    key: secp256k1::SecretKey,
}

impl InMemorySigner {
    pub fn new(key: secp256k1::SecretKey) -> Self {
        InMemorySigner { key }
    }
}

#[async_trait]
impl SignerClient for InMemorySigner {
    async fn sign_node_announcement(
        &mut self,
        req: SignNodeAnnouncementRequest,
    ) -> Result<[u8; 64], FatalError> {
        Ok(sign_with(&self.key, &req.unsigned.signing_bytes()))
    }

    async fn sign_channel_update(
        &mut self,
        req: SignChannelUpdateRequest,
    ) -> Result<[u8; 64], FatalError> {
        Ok(sign_with(&self.key, &req.unsigned.signing_bytes()))
    }
}

fn sign_with(key: &secp256k1::SecretKey, body: &[u8]) -> [u8; 64] {
    use secp256k1::{Message, Secp256k1, SignOnly};
    use sha2::{Digest, Sha256};
    let ctx: Secp256k1<SignOnly> = Secp256k1::signing_only();
    let first = Sha256::digest(body);
    let digest: [u8; 32] = Sha256::digest(first).into();
    let msg = Message::from_slice(&digest).expect("32-byte digest");
    ctx.sign_ecdsa(&msg, key).serialize_compact()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::NodeId;

    #[tokio::test]
    async fn in_memory_signer_produces_verifiable_signature() {
        let sk = secp256k1::SecretKey::from_slice(&[0x42; 32]).unwrap();
        let ctx = secp256k1::Secp256k1::signing_only();
        let pk = secp256k1::PublicKey::from_secret_key(&ctx, &sk);
        let node_id = NodeId(pk.serialize());

        let mut signer = InMemorySigner::new(sk);
        let unsigned = NodeAnnouncement {
            signature: [0; 64],
            features: vec![],
            timestamp: 1,
            node_id,
            rgb_color: [0; 3],
            alias: [0; 32],
            addresses: vec![],
        };
        let sig = signer
            .sign_node_announcement(SignNodeAnnouncementRequest {
                unsigned: unsigned.clone(),
            })
            .await
            .unwrap();
        assert!(crate::sig::verify(&node_id, &unsigned.signing_bytes(), &sig));
    }
}
