//! Canonical byte encoding for signed payloads.
//!
//! A deterministic, length-prefixed, big-endian encoder. It is NOT a general
//! serialization format: it exists solely so that every party produces the
//! exact same bytes for signing and hashing.
//!
//! Rules:
//! - `u8`/`u32`/`u64` are fixed-width big-endian.
//! - Fixed-length fields (UUID=16, device_id=32, hash=32, signature=64,
//!   nonce=24, public_key=32) are written raw with no prefix; the widths are
//!   enforced by the Rust types.
//! - Variable bytes and strings carry a `u32` byte-length prefix.
//! - Bool is a single 0x00 or 0x01 byte.
//! - Maps keyed by device_id are written as a `u32` entry count followed by
//!   entries in ascending byte-lexicographic order of the device_id.

use uuid::Uuid;

/// Accumulates the canonical encoding of one signed payload.
#[derive(Debug, Default)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Consume the encoder and return the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    /// Variable-length bytes: u32 length prefix, then the bytes.
    pub fn put_bytes(&mut self, b: &[u8]) {
        self.put_u32(b.len() as u32);
        self.buf.extend_from_slice(b);
    }

    /// String: u32 byte length, then UTF-8 bytes.
    pub fn put_str(&mut self, s: &str) {
        self.put_u32(s.len() as u32);
        self.buf.extend_from_slice(s.as_bytes());
    }

    pub fn put_bool(&mut self, v: bool) {
        self.buf.push(v as u8);
    }

    pub fn put_uuid(&mut self, id: &Uuid) {
        self.buf.extend_from_slice(id.as_bytes());
    }

    pub fn put_device_id(&mut self, id: &[u8; 32]) {
        self.buf.extend_from_slice(id);
    }

    pub fn put_hash(&mut self, hash: &[u8; 32]) {
        self.buf.extend_from_slice(hash);
    }

    pub fn put_signature(&mut self, sig: &[u8; 64]) {
        self.buf.extend_from_slice(sig);
    }

    pub fn put_nonce(&mut self, nonce: &[u8; 24]) {
        self.buf.extend_from_slice(nonce);
    }

    pub fn put_public_key(&mut self, key: &[u8; 32]) {
        self.buf.extend_from_slice(key);
    }

    /// Sorted `device_id -> u64` map. Entries are sorted here; callers may
    /// pass them in any order.
    pub fn put_counter_map(&mut self, mut entries: Vec<([u8; 32], u64)>) {
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        self.put_u32(entries.len() as u32);
        for (device_id, counter) in entries {
            self.put_device_id(&device_id);
            self.put_u64(counter);
        }
    }

    /// Sorted `device_id -> hash` map.
    pub fn put_hash_map(&mut self, mut entries: Vec<([u8; 32], [u8; 32])>) {
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        self.put_u32(entries.len() as u32);
        for (device_id, hash) in entries {
            self.put_device_id(&device_id);
            self.put_hash(&hash);
        }
    }
}
