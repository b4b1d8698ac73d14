// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 roslink contributors

//! One live byte stream to a peer.
//!
//! A [`Connection`] wraps a connected TCP stream with the framing codec and
//! the header-block read/write used during the handshake. It is owned
//! exclusively by the link that created it and dies with that link's
//! current attempt; reconnection builds a fresh `Connection`.
//!
//! All reads run against a socket read timeout of
//! [`crate::config::POLL_INTERVAL`], so loops that read through a
//! `Connection` observe cancellation at that granularity without any
//! dedicated poller thread.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Instant;

use crate::config::{CONNECT_TIMEOUT, HANDSHAKE_TIMEOUT, POLL_INTERVAL, WRITE_TIMEOUT};
use crate::error::{Error, Result};

use super::frame::FrameCodec;
use super::header::ConnectionHeader;

/// A connected peer stream plus framing state.
pub struct Connection {
    stream: TcpStream,
    codec: FrameCodec,
    remote_addr: SocketAddr,
}

impl Connection {
    /// Open an outbound connection.
    ///
    /// Resolution failures and refused/timed-out connects are transient
    /// I/O errors: the caller's retry policy decides what happens next.
    pub fn connect(host: &str, port: u16) -> Result<Self> {
        let addr = (host, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no address for {}:{}", host, port),
            )))?;

        let stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)?;
        Self::from_stream(stream, addr)
    }

    /// Wrap an already-connected stream (the accept path).
    pub fn from_stream(stream: TcpStream, remote_addr: SocketAddr) -> Result<Self> {
        // Timeouts, not non-blocking mode: some platforms leak the
        // listener's non-blocking flag into accepted sockets
        stream.set_nonblocking(false)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(POLL_INTERVAL))?;
        stream.set_write_timeout(Some(WRITE_TIMEOUT))?;
        Ok(Self {
            stream,
            codec: FrameCodec::new(),
            remote_addr,
        })
    }

    /// Peer address.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Clone the underlying socket handle so another thread can abort
    /// in-flight reads via `shutdown`.
    pub fn try_clone_stream(&self) -> io::Result<TcpStream> {
        self.stream.try_clone()
    }

    // ========================================================================
    // Header block I/O
    // ========================================================================

    /// Write a complete header block.
    pub fn write_header(&mut self, header: &ConnectionHeader) -> Result<()> {
        self.stream.write_all(&header.encode())?;
        Ok(())
    }

    /// Read a complete header block.
    ///
    /// Blocks (in [`POLL_INTERVAL`] slices) until the block arrives, the
    /// handshake deadline passes, or `cancelled` reports disposal.
    pub fn read_header(&mut self, cancelled: &dyn Fn() -> bool) -> Result<ConnectionHeader> {
        let deadline = Instant::now() + HANDSHAKE_TIMEOUT;

        let mut len_buf = [0u8; 4];
        self.read_exact_abortable(&mut len_buf, cancelled, deadline)?;
        let total = u32::from_le_bytes(len_buf) as usize;
        ConnectionHeader::check_total_length(total)?;

        let mut body = vec![0u8; total];
        self.read_exact_abortable(&mut body, cancelled, deadline)?;
        ConnectionHeader::parse(&body)
    }

    fn read_exact_abortable(
        &mut self,
        buf: &mut [u8],
        cancelled: &dyn Fn() -> bool,
        deadline: Instant,
    ) -> Result<()> {
        let mut filled = 0usize;
        while filled < buf.len() {
            match self.stream.read(&mut buf[filled..]) {
                Ok(0) => {
                    return Err(Error::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed during handshake",
                    )))
                }
                Ok(n) => filled += n,
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    if cancelled() {
                        return Err(Error::Shutdown);
                    }
                    if Instant::now() >= deadline {
                        return Err(Error::Io(io::Error::new(
                            io::ErrorKind::TimedOut,
                            "handshake timed out",
                        )));
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(Error::Io(e)),
            }
        }
        Ok(())
    }

    // ========================================================================
    // Frame I/O
    // ========================================================================

    /// Write one framed message; returns bytes put on the wire.
    pub fn send_frame(&mut self, payload: &[u8]) -> io::Result<usize> {
        let frame = FrameCodec::encode(payload);
        self.stream.write_all(&frame)?;
        Ok(frame.len())
    }

    /// Try to read one framed message.
    ///
    /// `Ok(None)` means the socket's read timeout elapsed mid-wait; the
    /// caller should check cancellation and call again.
    pub fn recv_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        self.codec.decode(&mut self.stream)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("remote_addr", &self.remote_addr)
            .field("mid_frame", &self.codec.is_partial())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    fn pair() -> (Connection, Connection) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let client = thread::spawn(move || TcpStream::connect(addr).unwrap());
        let (server_stream, peer) = listener.accept().unwrap();
        let client_stream = client.join().unwrap();

        (
            Connection::from_stream(client_stream, addr).unwrap(),
            Connection::from_stream(server_stream, peer).unwrap(),
        )
    }

    #[test]
    fn test_header_handshake_over_socket() {
        let (mut a, mut b) = pair();

        let mut header = ConnectionHeader::new();
        header
            .insert("topic", "odom")
            .insert("md5sum", "abc123")
            .insert("type", "nav_msgs/Odometry")
            .insert("callerid", "/talker")
            .insert("tcp_nodelay", "1");

        a.write_header(&header).unwrap();
        let received = b.read_header(&|| false).unwrap();
        assert_eq!(received, header);
    }

    #[test]
    fn test_frame_roundtrip_over_socket() {
        let (mut a, mut b) = pair();

        let sent = a.send_frame(b"payload bytes").unwrap();
        assert_eq!(sent, 4 + 13);

        let got = loop {
            if let Some(p) = b.recv_frame().unwrap() {
                break p;
            }
        };
        assert_eq!(got, b"payload bytes");
    }

    #[test]
    fn test_read_header_observes_cancellation() {
        let (_a, mut b) = pair();
        // Peer never writes; cancellation must abort the read promptly.
        let start = Instant::now();
        let err = b.read_header(&|| true).unwrap_err();
        assert!(matches!(err, Error::Shutdown));
        assert!(start.elapsed() < HANDSHAKE_TIMEOUT);
    }

    #[test]
    fn test_connect_to_refused_port_is_io_error() {
        // Bind-then-drop to obtain a port with no listener.
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let err = Connection::connect("127.0.0.1", port).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
