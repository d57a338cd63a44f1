// Copyright (c) 2024 Botho Foundation

//! Short-channel-id list encoding: a one-byte tag followed by either the
//! raw concatenated 8-byte ids or a zlib stream of the same bytes.

use super::{io_to_zlib_err, DecodeError};
use crate::ids::ShortChannelId;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

const TAG_UNCOMPRESSED: u8 = 0x00;
const TAG_ZLIB: u8 = 0x01;

/// Encode `scids` as a tagged list. Tries zlib first; falls back to the
/// uncompressed encoding whenever zlib does not come out smaller,
/// including the tag byte in the comparison.
pub fn encode_scid_list(scids: &[ShortChannelId]) -> Vec<u8> {
    let mut raw = Vec::with_capacity(scids.len() * 8);
    for s in scids {
        raw.extend_from_slice(&s.to_u64().to_be_bytes());
    }

    let mut compressed = Vec::new();
    let zlib_ok = (|| -> std::io::Result<()> {
        let mut enc = ZlibEncoder::new(&mut compressed, Compression::default());
        enc.write_all(&raw)?;
        enc.finish()?;
        Ok(())
    })()
    .is_ok();

    if zlib_ok && compressed.len() + 1 < raw.len() + 1 {
        let mut out = Vec::with_capacity(compressed.len() + 1);
        out.push(TAG_ZLIB);
        out.extend_from_slice(&compressed);
        out
    } else {
        let mut out = Vec::with_capacity(raw.len() + 1);
        out.push(TAG_UNCOMPRESSED);
        out.extend_from_slice(&raw);
        out
    }
}

/// Decode a tagged scid list, accepting both the uncompressed and zlib
/// tags and rejecting any other tag value.
pub fn decode_scid_list(buf: &[u8]) -> Result<Vec<ShortChannelId>, DecodeError> {
    if buf.is_empty() {
        return Err(DecodeError::Eof("scid list tag"));
    }
    let (tag, payload) = (buf[0], &buf[1..]);
    let raw: Vec<u8> = match tag {
        TAG_UNCOMPRESSED => payload.to_vec(),
        TAG_ZLIB => {
            let mut dec = ZlibDecoder::new(payload);
            let mut out = Vec::new();
            dec.read_to_end(&mut out).map_err(io_to_zlib_err)?;
            out
        }
        other => return Err(DecodeError::UnknownEncodingTag(other)),
    };
    if raw.len() % 8 != 0 {
        return Err(DecodeError::LengthOverflow(raw.len()));
    }
    Ok(raw
        .chunks_exact(8)
        .map(|c| {
            let mut a = [0u8; 8];
            a.copy_from_slice(c);
            ShortChannelId::from_u64(u64::from_be_bytes(a))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_uncompressed_and_zlib() {
        let scids: Vec<ShortChannelId> = (0..2000)
            .map(|i| ShortChannelId::new(700_000 + i / 10, i % 10, 0))
            .collect();
        let encoded = encode_scid_list(&scids);
        let decoded = decode_scid_list(&encoded).unwrap();
        assert_eq!(decoded, scids);
    }

    #[test]
    fn small_incompressible_list_falls_back_to_uncompressed() {
        // A handful of essentially-random-looking scids does not compress
        // well enough to beat the one-byte-tag overhead at this size.
        let scids = vec![
            ShortChannelId::new(0x0010_0203, 0x0040_0506, 0x0708),
            ShortChannelId::new(0x00FF_EE11, 0x0022_3344, 0x5566),
            ShortChannelId::new(0x0077_8899, 0x00AA_BBCC, 0xDDEE),
            ShortChannelId::new(0x0099_1122, 0x0033_4455, 0x6677),
            ShortChannelId::new(0x0011_2233, 0x0044_5566, 0x7788),
            ShortChannelId::new(0x00AA_1122, 0x00BB_3344, 0xCC55),
            ShortChannelId::new(0x0066_7788, 0x0099_AABB, 0xCCDD),
            ShortChannelId::new(0x0012_3456, 0x0078_9ABC, 0xDEF0),
        ];
        let encoded = encode_scid_list(&scids);
        assert_eq!(encoded[0], TAG_UNCOMPRESSED);
        assert_eq!(encoded.len(), 1 + scids.len() * 8);
    }

    #[test]
    fn unknown_tag_rejected() {
        let err = decode_scid_list(&[0xFF, 0, 0, 0, 0, 0, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownEncodingTag(0xFF)));
    }

    #[test]
    fn empty_list_encodes_to_tag_only() {
        let encoded = encode_scid_list(&[]);
        assert_eq!(encoded, vec![TAG_UNCOMPRESSED]);
        assert!(decode_scid_list(&encoded).unwrap().is_empty());
    }
}
