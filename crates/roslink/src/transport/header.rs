// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 roslink contributors

//! Handshake header block exchanged when a link is established.
//!
//! A header is a set of `key=value` text fields:
//!
//! ```text
//! +----------------+--------------------------------------+
//! | Total (4B LE)  | fields                               |
//! +----------------+--------------------------------------+
//!                  | Len (4B LE) | "key=value" UTF-8 | ...
//! ```
//!
//! The requester sends `topic`, `md5sum`, `callerid`, `type` and
//! `tcp_nodelay`; the responder answers with `type`, `md5sum`,
//! `message_definition`, `callerid` and `latching` - or a single `error`
//! field describing why the handshake was refused. A missing required field
//! or an `error` reply is terminal for the link attempt: schema and identity
//! mismatches do not heal with time, so they are never retried.

use std::collections::BTreeMap;

use crate::config::MAX_HEADER_SIZE;
use crate::error::{Error, Result};

/// Fields a requester header must carry.
pub const REQUIRED_FIELDS: &[&str] = &["topic", "md5sum", "type", "callerid"];

/// Parsed `key=value` header fields.
///
/// Backed by an ordered map so encoding is deterministic.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionHeader {
    fields: BTreeMap<String, String>,
}

impl ConnectionHeader {
    /// Empty header.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a field, replacing any previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Look up a field.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Field count.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True when no fields are present.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Build the single-field error reply the responder sends before
    /// closing a refused connection.
    pub fn error_reply(message: &str) -> Self {
        let mut header = Self::new();
        header.insert("error", message);
        header
    }

    /// Encode the field block, including the leading total length.
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        for (key, value) in &self.fields {
            let field_len = (key.len() + 1 + value.len()) as u32;
            body.extend_from_slice(&field_len.to_le_bytes());
            body.extend_from_slice(key.as_bytes());
            body.push(b'=');
            body.extend_from_slice(value.as_bytes());
        }

        let mut block = Vec::with_capacity(4 + body.len());
        block.extend_from_slice(&(body.len() as u32).to_le_bytes());
        block.extend_from_slice(&body);
        block
    }

    /// Parse a field block (without the leading total length, which the
    /// transport has already consumed to size the read).
    pub fn parse(body: &[u8]) -> Result<Self> {
        let mut fields = BTreeMap::new();
        let mut pos = 0usize;

        while pos < body.len() {
            if body.len() - pos < 4 {
                return Err(Error::Header("truncated field length".into()));
            }
            let len =
                u32::from_le_bytes([body[pos], body[pos + 1], body[pos + 2], body[pos + 3]])
                    as usize;
            pos += 4;

            if len == 0 || body.len() - pos < len {
                return Err(Error::Header(format!(
                    "field length {} exceeds remaining header bytes {}",
                    len,
                    body.len() - pos
                )));
            }

            let field = std::str::from_utf8(&body[pos..pos + len])
                .map_err(|_| Error::Header("header field is not valid UTF-8".into()))?;
            pos += len;

            let (key, value) = field
                .split_once('=')
                .ok_or_else(|| Error::Header(format!("field without '=': {}", field)))?;
            fields.insert(key.to_string(), value.to_string());
        }

        Ok(Self { fields })
    }

    /// Validate the declared total length of an incoming header block.
    pub fn check_total_length(len: usize) -> Result<()> {
        if len > MAX_HEADER_SIZE {
            return Err(Error::Header(format!(
                "header block of {} bytes exceeds limit of {}",
                len, MAX_HEADER_SIZE
            )));
        }
        Ok(())
    }

    /// Reject a header that is missing any of the given fields, or that
    /// carries an `error` field (the peer refusing the handshake).
    pub fn require(&self, required: &[&str]) -> Result<()> {
        if let Some(message) = self.get("error") {
            return Err(Error::Header(format!("peer refused connection: {}", message)));
        }
        for key in required {
            if self.get(key).is_none() {
                return Err(Error::Header(format!(
                    "header is missing required field [{}]",
                    key
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
