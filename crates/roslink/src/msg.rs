// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 roslink contributors

//! The typed-message seam and little-endian wire helpers.
//!
//! Field-by-field layout code for user message types is produced by an
//! external schema generator; the middleware only needs the contract that
//! generated code fulfils: a type name, a schema checksum, and
//! serialize/deserialize into opaque byte buffers. The action protocol
//! envelopes in [`crate::action`] implement the same trait by hand, exactly
//! as the generator would emit them.
//!
//! All integers on the wire are little-endian. Strings are a 4-byte length
//! followed by UTF-8 bytes. Timestamps are two consecutive `u32` values
//! (seconds, nanoseconds).

use crate::error::{Error, Result};

/// Contract between generated message code and the middleware.
///
/// `md5sum()` is the schema checksum exchanged during the connection
/// handshake; two peers with different checksums for the same topic never
/// complete the handshake. Names and checksums are owned strings so that
/// wrapper types (the action envelopes) can derive theirs from the wrapped
/// type's.
pub trait Message: Send + Sync + 'static {
    /// Fully qualified type name, e.g. `nav_msgs/Odometry`.
    fn data_type() -> String
    where
        Self: Sized;

    /// Checksum of the message schema.
    fn md5sum() -> String
    where
        Self: Sized;

    /// Full plain-text schema definition, sent in the responder header.
    fn message_definition() -> String
    where
        Self: Sized,
    {
        String::new()
    }

    /// Append the serialized form of `self` to `buf`.
    fn serialize(&self, buf: &mut Vec<u8>);

    /// Decode one message from `bytes`, consuming the whole buffer.
    fn deserialize(bytes: &[u8]) -> Result<Self>
    where
        Self: Sized;
}

/// Serialize a message into a fresh buffer.
pub fn to_bytes<M: Message>(msg: &M) -> Vec<u8> {
    let mut buf = Vec::new();
    msg.serialize(&mut buf);
    buf
}

// ============================================================================
// Wire writer
// ============================================================================

/// Append-only little-endian field writer.
pub struct WireWriter<'a> {
    buf: &'a mut Vec<u8>,
}

impl<'a> WireWriter<'a> {
    /// Wrap a buffer for appending.
    pub fn new(buf: &'a mut Vec<u8>) -> Self {
        Self { buf }
    }

    /// Write a `u8`.
    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    /// Write a `u32`, little-endian.
    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Write a length-prefixed UTF-8 string.
    pub fn put_string(&mut self, s: &str) {
        self.put_u32(s.len() as u32);
        self.buf.extend_from_slice(s.as_bytes());
    }

    /// Write a length-prefixed opaque byte blob.
    pub fn put_bytes(&mut self, b: &[u8]) {
        self.put_u32(b.len() as u32);
        self.buf.extend_from_slice(b);
    }
}

// ============================================================================
// Wire reader
// ============================================================================

/// Cursor-style little-endian field reader.
pub struct WireReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    /// Wrap a byte buffer for reading from the start.
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::Decode(format!(
                "buffer truncated: need {} bytes, have {}",
                n,
                self.remaining()
            )));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Read a `u8`.
    pub fn get_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    /// Read a `u32`, little-endian.
    pub fn get_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn get_string(&mut self) -> Result<String> {
        let len = self.get_u32()? as usize;
        let b = self.take(len)?;
        String::from_utf8(b.to_vec()).map_err(|e| Error::Decode(format!("invalid UTF-8: {}", e)))
    }

    /// Read a length-prefixed opaque byte blob.
    pub fn get_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.get_u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    /// Consume everything left in the buffer.
    pub fn get_rest(&mut self) -> &'a [u8] {
        let rest = &self.bytes[self.pos..];
        self.pos = self.bytes.len();
        rest
    }
}
