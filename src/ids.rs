// Copyright (c) 2024 Botho Foundation

//! Identifiers used throughout the graph: node public keys and short channel
//! ids packed as `(block, tx_index, output)`.

use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;
use std::fmt;

/// A 33-byte compressed public key identifying a node.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(#[serde(with = "BigArray")] pub [u8; 33]);

impl NodeId {
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 33] = bytes.try_into().ok()?;
        Some(NodeId(arr))
    }

    pub fn as_bytes(&self) -> &[u8; 33] {
        &self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        NodeId([0u8; 33])
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", hex::encode(self.0))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// `(block:24, tx_index:24, output:16)` packed into a `u64`, matching the
/// external protocol's on-the-wire ordering: integer order is equivalent to
/// lexicographic `(block, tx_index, output)` order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ShortChannelId(pub u64);

impl ShortChannelId {
    pub fn new(block: u32, tx_index: u32, output: u16) -> Self {
        debug_assert!(block <= 0x00FF_FFFF);
        debug_assert!(tx_index <= 0x00FF_FFFF);
        let packed = ((block as u64) << 40) | ((tx_index as u64) << 16) | (output as u64);
        ShortChannelId(packed)
    }

    pub fn block(self) -> u32 {
        ((self.0 >> 40) & 0x00FF_FFFF) as u32
    }

    pub fn tx_index(self) -> u32 {
        ((self.0 >> 16) & 0x00FF_FFFF) as u32
    }

    pub fn output(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }

    pub fn to_u64(self) -> u64 {
        self.0
    }

    pub fn from_u64(v: u64) -> Self {
        ShortChannelId(v)
    }
}

impl fmt::Debug for ShortChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.block(), self.tx_index(), self.output())
    }
}

impl fmt::Display for ShortChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scid_roundtrip() {
        let s = ShortChannelId::new(700_000, 42, 1);
        assert_eq!(s.block(), 700_000);
        assert_eq!(s.tx_index(), 42);
        assert_eq!(s.output(), 1);
    }

    #[test]
    fn scid_integer_order_matches_tuple_order() {
        let a = ShortChannelId::new(100, 0, 0);
        let b = ShortChannelId::new(100, 0, 1);
        let c = ShortChannelId::new(101, 0, 0);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn node_id_debug_is_hex() {
        let n = NodeId([0u8; 33]);
        assert!(format!("{n:?}").contains("00000000"));
    }
}
