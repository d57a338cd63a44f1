// Copyright (c) 2024 Botho Foundation

//! Signature verification for gossip messages.
//!
//! Announcements and updates are signed over the double-SHA256 of their
//! message body (the same digest scheme the external protocol uses for
//! transaction and message signing), verified with `secp256k1` against the
//! claimed node id.

use crate::ids::NodeId;
use secp256k1::ecdsa::Signature;
use secp256k1::{Message, PublicKey, Secp256k1, VerifyOnly};
use sha2::{Digest, Sha256};

fn double_sha256(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    second.into()
}

/// Verify a 64-byte compact-encoded ECDSA signature over `signing_bytes`,
/// claimed to be produced by `signer`.
pub fn verify(signer: &NodeId, signing_bytes: &[u8], signature: &[u8; 64]) -> bool {
    let ctx: Secp256k1<VerifyOnly> = Secp256k1::verification_only();
    let Ok(pubkey) = PublicKey::from_slice(signer.as_bytes()) else {
        return false;
    };
    let Ok(sig) = Signature::from_compact(signature) else {
        return false;
    };
    let digest = double_sha256(signing_bytes);
    let Ok(msg) = Message::from_slice(&digest) else {
        return false;
    };
    ctx.verify_ecdsa(&msg, &sig, &pubkey).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use secp256k1::{SecretKey, SignOnly};

    fn keypair() -> (SecretKey, NodeId) {
        let ctx: Secp256k1<SignOnly> = Secp256k1::signing_only();
        let sk = SecretKey::from_slice(&[0x11; 32]).unwrap();
        let pk = PublicKey::from_secret_key(&ctx, &sk);
        (sk, NodeId(pk.serialize()))
    }

    #[test]
    fn sign_and_verify_roundtrip() {
        let (sk, node_id) = keypair();
        let ctx: Secp256k1<SignOnly> = Secp256k1::signing_only();
        let body = b"hello gossip";
        let digest = double_sha256(body);
        let msg = Message::from_slice(&digest).unwrap();
        let sig = ctx.sign_ecdsa(&msg, &sk);
        assert!(verify(&node_id, body, &sig.serialize_compact()));
    }

    #[test]
    fn tampered_body_fails_verification() {
        let (sk, node_id) = keypair();
        let ctx: Secp256k1<SignOnly> = Secp256k1::signing_only();
        let digest = double_sha256(b"hello gossip");
        let msg = Message::from_slice(&digest).unwrap();
        let sig = ctx.sign_ecdsa(&msg, &sk);
        assert!(!verify(&node_id, b"goodbye gossip", &sig.serialize_compact()));
    }
}
