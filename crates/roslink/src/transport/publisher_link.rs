// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 roslink contributors

//! Outbound link: connects to a publisher and reads messages from it.
//!
//! One link per resolved publisher address, owned by the subscription.
//! Each link runs a supervised loop for its whole life:
//!
//! ```text
//! connect -> write requester header -> read responder header
//!         -> read frames until error or disposal
//! ```
//!
//! Any I/O failure tears the current connection down and retries after the
//! current `retry_delay`, which starts at [`BASE_RETRY_DELAY`], doubles on
//! each consecutive failure up to [`MAX_RETRY_DELAY`], and resets to the
//! base as soon as one message is processed. A handshake-header failure is
//! different: it means a permanent schema/identity mismatch, so the loop
//! exits without any retry.

use parking_lot::Mutex;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::{BASE_RETRY_DELAY, MAX_RETRY_DELAY};
use crate::error::{Error, Result};
use crate::node::subscription::Subscription;
use crate::sync::ShutdownToken;

use super::connection::Connection;
use super::header::ConnectionHeader;
use super::metrics::LinkMetrics;

/// Next delay after a failed attempt: double, capped.
pub(crate) fn next_retry_delay(current: Duration) -> Duration {
    (current * 2).min(MAX_RETRY_DELAY)
}

/// Subscriber-side peer link with reconnect supervision.
pub struct PublisherLink {
    subscription: Weak<Subscription>,
    host: String,
    port: u16,
    caller_id: String,
    /// Set by `dispose`; the loop exits without further retries.
    dropping: AtomicBool,
    /// Cancels backoff waits promptly.
    token: ShutdownToken,
    /// True between a completed handshake and the connection's teardown.
    connected: AtomicBool,
    metrics: Arc<LinkMetrics>,
    retry_delay: Mutex<Duration>,
    /// Socket of the in-flight connection, kept to abort blocking reads.
    current_stream: Mutex<Option<TcpStream>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl PublisherLink {
    /// Create the link and start its supervised receive loop.
    pub fn spawn(
        subscription: &Arc<Subscription>,
        host: impl Into<String>,
        port: u16,
        caller_id: impl Into<String>,
    ) -> Arc<Self> {
        let link = Arc::new(Self {
            subscription: Arc::downgrade(subscription),
            host: host.into(),
            port,
            caller_id: caller_id.into(),
            dropping: AtomicBool::new(false),
            token: ShutdownToken::new(),
            connected: AtomicBool::new(false),
            metrics: Arc::new(LinkMetrics::new()),
            retry_delay: Mutex::new(BASE_RETRY_DELAY),
            current_stream: Mutex::new(None),
            thread: Mutex::new(None),
        });

        let runner = Arc::clone(&link);
        #[allow(clippy::expect_used)] // thread spawn failure is unrecoverable
        let handle = std::thread::Builder::new()
            .name(format!("roslink-pub-link-{}", link.host))
            .spawn(move || runner.run())
            .expect("failed to spawn publisher link thread");
        *link.thread.lock() = Some(handle);

        link
    }

    /// Target host.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Target port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Handshake completed and connection still up?
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Transfer counters owned by this link.
    pub fn metrics(&self) -> &Arc<LinkMetrics> {
        &self.metrics
    }

    /// Current backoff delay; grows while the peer stays unreachable.
    pub fn retry_delay(&self) -> Duration {
        *self.retry_delay.lock()
    }

    fn cancelled(&self) -> bool {
        self.dropping.load(Ordering::Acquire) || self.token.is_triggered()
    }

    /// Stop the loop and abort any in-flight connect/read.
    pub fn dispose(&self) {
        self.dropping.store(true, Ordering::Release);
        self.token.trigger();
        if let Some(stream) = self.current_stream.lock().take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    // ========================================================================
    // Supervised loop
    // ========================================================================

    fn run(self: Arc<Self>) {
        loop {
            if self.cancelled() {
                break;
            }

            match self.handle_connection() {
                // Clean exit: disposal observed inside the connection
                Ok(()) => break,
                Err(Error::Shutdown) => break,
                Err(Error::Header(msg)) => {
                    // Permanent mismatch; retrying cannot fix it
                    crate::error!(
                        "header error on link to {}:{}: {}",
                        self.host,
                        self.port,
                        msg
                    );
                    break;
                }
                Err(e) => {
                    self.metrics.record_connect_failure();
                    if self.cancelled() {
                        break;
                    }
                    crate::debug!(
                        "link to {}:{} failed ({}), retrying",
                        self.host,
                        self.port,
                        e
                    );

                    let delay = {
                        let mut retry = self.retry_delay.lock();
                        let current = *retry;
                        *retry = next_retry_delay(current);
                        current
                    };
                    if self.token.wait_timeout(delay) {
                        break;
                    }
                }
            }
        }
        self.connected.store(false, Ordering::Release);
        crate::debug!("link to {}:{} terminated", self.host, self.port);
    }

    /// One connection attempt: handshake, then read frames until failure
    /// or cancellation.
    fn handle_connection(&self) -> Result<()> {
        let subscription = self.subscription.upgrade().ok_or(Error::Shutdown)?;

        let mut conn = Connection::connect(&self.host, self.port)?;
        *self.current_stream.lock() = conn.try_clone_stream().ok();

        let result = self.handshake_and_receive(&mut conn, &subscription);

        self.connected.store(false, Ordering::Release);
        *self.current_stream.lock() = None;
        result
    }

    fn handshake_and_receive(
        &self,
        conn: &mut Connection,
        subscription: &Arc<Subscription>,
    ) -> Result<()> {
        let mut request = ConnectionHeader::new();
        request
            .insert("topic", subscription.name())
            .insert("md5sum", subscription.md5sum())
            .insert("type", subscription.data_type())
            .insert("callerid", &self.caller_id)
            .insert("tcp_nodelay", "1");
        conn.write_header(&request)?;

        let cancelled = || self.cancelled();
        let reply = conn.read_header(&cancelled)?;
        reply.require(&["md5sum", "type"])?;

        let peer_md5 = reply.get("md5sum").unwrap_or("");
        let ours = subscription.md5sum();
        if peer_md5 != ours && peer_md5 != "*" && ours != "*" {
            return Err(Error::Header(format!(
                "schema checksum mismatch on [{}]: ours [{}], publisher sent [{}]",
                subscription.name(),
                ours,
                peer_md5
            )));
        }

        self.connected.store(true, Ordering::Release);
        crate::debug!(
            "link to {}:{} established for [{}]",
            self.host,
            self.port,
            subscription.name()
        );

        loop {
            if self.cancelled() {
                return Ok(());
            }

            match conn.recv_frame() {
                Ok(Some(payload)) => {
                    self.metrics.record_message_received(payload.len());
                    let dropped = subscription.handle_message(payload);
                    for _ in 0..dropped {
                        self.metrics.record_drop();
                    }
                    // Peer is healthy again; forget accumulated backoff
                    *self.retry_delay.lock() = BASE_RETRY_DELAY;
                }
                // Read timeout tick; loop to observe cancellation
                Ok(None) => {}
                Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                    // Oversized frame: the connection is unusable, but the
                    // peer itself may recover, so this feeds the backoff
                    // path rather than killing the link.
                    return Err(Error::Protocol(e.to_string()));
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
