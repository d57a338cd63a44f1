// Copyright (c) 2024 Botho Foundation

//! Bit-exact wire encode/decode for the gossip messages this engine speaks.
//!
//! Every function here is pure: no I/O, no graph access. Multi-byte
//! integers are big-endian; variable-length fields are length-prefixed
//! where the wire format requires it.

mod messages;
mod scid_list;

pub use messages::*;
pub use scid_list::{decode_scid_list, encode_scid_list};

use displaydoc::Display;
use std::io;
use thiserror::Error;

/// Failure decoding a wire message or one of its fields.
#[derive(Debug, Display, Error)]
pub enum DecodeError {
    /// unexpected end of buffer while reading {0}
    Eof(&'static str),
    /// trailing bytes after a fully parsed message
    TrailingBytes,
    /// unknown wire message type {0}
    UnknownMessageType(u16),
    /// unknown short-channel-id list encoding tag {0}
    UnknownEncodingTag(u8),
    /// zlib stream did not decompress: {0}
    Zlib(String),
    /// declared length {0} exceeds the remaining buffer
    LengthOverflow(usize),
    /// hostname length {0} exceeds the 255-byte limit
    HostnameTooLong(usize),
    /// hostname is not valid utf8
    HostnameNotUtf8,
}

pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn take(&mut self, n: usize, what: &'static str) -> Result<&'a [u8], DecodeError> {
        if self.pos + n > self.buf.len() {
            return Err(DecodeError::Eof(what));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn u8(&mut self, what: &'static str) -> Result<u8, DecodeError> {
        Ok(self.take(1, what)?[0])
    }

    pub fn u16(&mut self, what: &'static str) -> Result<u16, DecodeError> {
        let b = self.take(2, what)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self, what: &'static str) -> Result<u32, DecodeError> {
        let b = self.take(4, what)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u64(&mut self, what: &'static str) -> Result<u64, DecodeError> {
        let b = self.take(8, what)?;
        Ok(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    pub fn bytes(&mut self, n: usize, what: &'static str) -> Result<&'a [u8], DecodeError> {
        self.take(n, what)
    }

    pub fn array33(&mut self, what: &'static str) -> Result<[u8; 33], DecodeError> {
        let b = self.take(33, what)?;
        let mut out = [0u8; 33];
        out.copy_from_slice(b);
        Ok(out)
    }

    pub fn array32(&mut self, what: &'static str) -> Result<[u8; 32], DecodeError> {
        let b = self.take(32, what)?;
        let mut out = [0u8; 32];
        out.copy_from_slice(b);
        Ok(out)
    }

    pub fn array64(&mut self, what: &'static str) -> Result<[u8; 64], DecodeError> {
        let b = self.take(64, what)?;
        let mut out = [0u8; 64];
        out.copy_from_slice(b);
        Ok(out)
    }
}

/// Writable byte sink matching the `Reader` above; `Vec<u8>` implements
/// `Write` directly so this just holds naming conventions for the encoders.
pub(crate) type Writer = Vec<u8>;

pub(crate) fn write_u16(w: &mut Writer, v: u16) {
    w.extend_from_slice(&v.to_be_bytes());
}

pub(crate) fn write_u32(w: &mut Writer, v: u32) {
    w.extend_from_slice(&v.to_be_bytes());
}

pub(crate) fn write_u64(w: &mut Writer, v: u64) {
    w.extend_from_slice(&v.to_be_bytes());
}

/// One announced network address for a node, per the address-list wire
/// format: a type byte followed by the variant's fixed fields.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum WireAddress {
    Ipv4 { addr: [u8; 4], port: u16 },
    Ipv6 { addr: [u8; 16], port: u16 },
    TorV3 {
        #[serde(with = "serde_big_array::BigArray")]
        pubkey: [u8; 35],
        port: u16,
    },
    DnsHostname { hostname: String, port: u16 },
}

impl WireAddress {
    fn type_byte(&self) -> u8 {
        match self {
            WireAddress::Ipv4 { .. } => 1,
            WireAddress::Ipv6 { .. } => 2,
            WireAddress::TorV3 { .. } => 4,
            WireAddress::DnsHostname { .. } => 5,
        }
    }

    fn encode(&self, w: &mut Writer) {
        w.push(self.type_byte());
        match self {
            WireAddress::Ipv4 { addr, port } => {
                w.extend_from_slice(addr);
                write_u16(w, *port);
            }
            WireAddress::Ipv6 { addr, port } => {
                w.extend_from_slice(addr);
                write_u16(w, *port);
            }
            WireAddress::TorV3 { pubkey, port } => {
                w.extend_from_slice(pubkey);
                write_u16(w, *port);
            }
            WireAddress::DnsHostname { hostname, port } => {
                w.push(hostname.len() as u8);
                w.extend_from_slice(hostname.as_bytes());
                write_u16(w, *port);
            }
        }
    }

    /// Parse one address. Unknown type bytes are a per-address soft
    /// failure: the caller skips the address rather than aborting the
    /// whole list, per the lenient address-list parsing contract.
    fn decode(r: &mut Reader) -> Result<Option<Self>, DecodeError> {
        let ty = r.u8("address type")?;
        match ty {
            1 => {
                let addr = r.bytes(4, "ipv4 addr")?.try_into().unwrap();
                let port = r.u16("ipv4 port")?;
                Ok(Some(WireAddress::Ipv4 { addr, port }))
            }
            2 => {
                let addr = r.bytes(16, "ipv6 addr")?.try_into().unwrap();
                let port = r.u16("ipv6 port")?;
                Ok(Some(WireAddress::Ipv6 { addr, port }))
            }
            4 => {
                let pubkey = r.bytes(35, "torv3 pubkey")?.try_into().unwrap();
                let port = r.u16("torv3 port")?;
                Ok(Some(WireAddress::TorV3 { pubkey, port }))
            }
            5 => {
                let len = r.u8("hostname length")? as usize;
                let raw = r.bytes(len, "hostname")?;
                let hostname = std::str::from_utf8(raw)
                    .map_err(|_| DecodeError::HostnameNotUtf8)?
                    .to_string();
                let port = r.u16("hostname port")?;
                Ok(Some(WireAddress::DnsHostname { hostname, port }))
            }
            _ => {
                // Unknown type: we can't know its length, so treat the
                // rest of the address list as unparsable and stop here
                // rather than guessing a skip length.
                Ok(None)
            }
        }
    }
}

/// Encode a list of addresses, length-prefixed by total encoded byte count
/// (a `u16`), matching how `node_announcement` carries its address list.
pub fn encode_addresses(addrs: &[WireAddress]) -> Vec<u8> {
    let mut body = Vec::new();
    for a in addrs {
        a.encode(&mut body);
    }
    let mut out = Vec::with_capacity(2 + body.len());
    write_u16(&mut out, body.len() as u16);
    out.extend_from_slice(&body);
    out
}

/// Decode a length-prefixed address list leniently: stop at the first
/// unrecognized type byte instead of failing the whole announcement.
pub fn decode_addresses(r: &mut Reader) -> Result<Vec<WireAddress>, DecodeError> {
    let len = r.u16("address list length")? as usize;
    let raw = r.bytes(len, "address list")?;
    let mut inner = Reader::new(raw);
    let mut out = Vec::new();
    while !inner.is_empty() {
        match WireAddress::decode(&mut inner)? {
            Some(addr) => out.push(addr),
            None => break,
        }
    }
    Ok(out)
}

pub(crate) fn io_to_zlib_err(e: io::Error) -> DecodeError {
    DecodeError::Zlib(e.to_string())
}
