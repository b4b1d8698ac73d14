// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 roslink contributors

//! Length-prefix framing for messages on a peer byte stream.
//!
//! TCP carries no message boundaries, so after the handshake every message
//! travels as:
//!
//! ```text
//! +----------------+-------------------+
//! | Length (4B LE) | Payload bytes     |
//! +----------------+-------------------+
//! ```
//!
//! The length field is a 32-bit little-endian integer counting payload
//! bytes only. A declared length above [`MAX_MESSAGE_SIZE`] is a protocol
//! violation: the connection is aborted before a single payload byte is
//! read.
//!
//! The codec keeps partial-read state, so it works on sockets with read
//! timeouts: a `WouldBlock`/`TimedOut` read returns `Ok(None)` and the next
//! call resumes where the previous one stopped.

use std::io::{self, Read};

use crate::config::{FRAME_HEADER_SIZE, MAX_MESSAGE_SIZE};

/// Incremental decoder for length-prefixed frames.
#[derive(Debug)]
pub struct FrameCodec {
    /// Current read state
    state: ReadState,

    /// Buffer holding the partially read header or body
    buffer: Vec<u8>,

    /// Frames decoded since creation
    frames_decoded: u64,

    /// Payload bytes decoded since creation
    bytes_decoded: u64,
}

#[derive(Debug, Clone, Copy)]
enum ReadState {
    /// Reading the 4-byte length prefix
    ReadingLength { bytes_read: usize },

    /// Reading the payload
    ReadingBody {
        expected_len: usize,
        bytes_read: usize,
    },
}

impl Default for ReadState {
    fn default() -> Self {
        ReadState::ReadingLength { bytes_read: 0 }
    }
}

impl FrameCodec {
    /// Create a codec in its initial state.
    pub fn new() -> Self {
        Self {
            state: ReadState::default(),
            buffer: vec![0u8; FRAME_HEADER_SIZE],
            frames_decoded: 0,
            bytes_decoded: 0,
        }
    }

    /// Frames successfully decoded.
    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    /// Payload bytes successfully decoded.
    pub fn bytes_decoded(&self) -> u64 {
        self.bytes_decoded
    }

    /// True while a frame is partially read.
    pub fn is_partial(&self) -> bool {
        match self.state {
            ReadState::ReadingLength { bytes_read } => bytes_read > 0,
            ReadState::ReadingBody { .. } => true,
        }
    }

    /// Frame a payload: `[length: u32 LE][payload]`.
    pub fn encode(payload: &[u8]) -> Vec<u8> {
        let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
        Self::encode_into(payload, &mut frame);
        frame
    }

    /// Append `[length: u32 LE][payload]` to an existing buffer.
    pub fn encode_into(payload: &[u8], buf: &mut Vec<u8>) {
        buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(payload);
    }

    /// Try to decode one complete frame from the reader.
    ///
    /// Returns:
    /// - `Ok(Some(payload))` - a complete frame was decoded
    /// - `Ok(None)` - the read would block; call again when readable
    /// - `Err(e)` - I/O error, EOF, or protocol violation
    ///
    /// An oversized declared length returns `ErrorKind::InvalidData` without
    /// reading any payload byte.
    pub fn decode<R: Read + ?Sized>(&mut self, reader: &mut R) -> io::Result<Option<Vec<u8>>> {
        loop {
            match self.state {
                ReadState::ReadingLength { bytes_read } => {
                    match reader.read(&mut self.buffer[bytes_read..FRAME_HEADER_SIZE]) {
                        Ok(0) => {
                            let msg = if bytes_read == 0 {
                                "connection closed"
                            } else {
                                "connection closed mid frame header"
                            };
                            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, msg));
                        }
                        Ok(n) => {
                            let total = bytes_read + n;
                            if total < FRAME_HEADER_SIZE {
                                self.state = ReadState::ReadingLength { bytes_read: total };
                                continue;
                            }

                            let len = u32::from_le_bytes([
                                self.buffer[0],
                                self.buffer[1],
                                self.buffer[2],
                                self.buffer[3],
                            ]) as usize;

                            if len > MAX_MESSAGE_SIZE {
                                self.state = ReadState::default();
                                return Err(io::Error::new(
                                    io::ErrorKind::InvalidData,
                                    format!(
                                        "frame length {} exceeds protocol limit of {}",
                                        len, MAX_MESSAGE_SIZE
                                    ),
                                ));
                            }

                            if len == 0 {
                                self.frames_decoded += 1;
                                self.state = ReadState::default();
                                return Ok(Some(Vec::new()));
                            }

                            self.buffer.resize(len, 0);
                            self.state = ReadState::ReadingBody {
                                expected_len: len,
                                bytes_read: 0,
                            };
                        }
                        Err(e)
                            if e.kind() == io::ErrorKind::WouldBlock
                                || e.kind() == io::ErrorKind::TimedOut =>
                        {
                            self.state = ReadState::ReadingLength { bytes_read };
                            return Ok(None);
                        }
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => return Err(e),
                    }
                }

                ReadState::ReadingBody {
                    expected_len,
                    bytes_read,
                } => {
                    match reader.read(&mut self.buffer[bytes_read..expected_len]) {
                        Ok(0) => {
                            return Err(io::Error::new(
                                io::ErrorKind::UnexpectedEof,
                                "connection closed mid frame body",
                            ));
                        }
                        Ok(n) => {
                            let total = bytes_read + n;
                            if total < expected_len {
                                self.state = ReadState::ReadingBody {
                                    expected_len,
                                    bytes_read: total,
                                };
                                continue;
                            }

                            let payload = self.buffer[..expected_len].to_vec();
                            self.frames_decoded += 1;
                            self.bytes_decoded += expected_len as u64;

                            self.buffer.resize(FRAME_HEADER_SIZE, 0);
                            self.state = ReadState::default();

                            return Ok(Some(payload));
                        }
                        Err(e)
                            if e.kind() == io::ErrorKind::WouldBlock
                                || e.kind() == io::ErrorKind::TimedOut =>
                        {
                            self.state = ReadState::ReadingBody {
                                expected_len,
                                bytes_read,
                            };
                            return Ok(None);
                        }
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
