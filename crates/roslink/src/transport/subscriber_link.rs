// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 roslink contributors

//! Inbound link: serves one connected subscriber of a local publication.
//!
//! Created per accepted connection after the node's listener has read the
//! requester header. The responder side of the handshake validates that the
//! requested topic exists and the schema checksums match; a refused
//! handshake answers with an `error=` header before closing so the peer
//! learns why. No reconnect logic lives here - whether to come back is the
//! remote subscriber's decision.
//!
//! After the handshake the link is a pure send loop draining its bounded
//! outbox; when the subscriber cannot keep up, the oldest buffered message
//! is dropped, because ultra-stale messages are worse than a gap.

use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

use crate::config::POLL_INTERVAL;
use crate::error::{Error, Result};
use crate::node::publication::Publication;
use crate::node::topic_registry::TopicRegistry;
use crate::sync::ShutdownToken;

use super::connection::Connection;
use super::header::{ConnectionHeader, REQUIRED_FIELDS};
use super::metrics::LinkMetrics;
use super::outbox::{Outbox, PushOutcome};

/// Publisher-side peer link feeding one subscriber.
pub struct SubscriberLink {
    topic: String,
    /// Caller id the subscriber identified itself with.
    destination_caller_id: String,
    publication: Weak<Publication>,
    outbox: Arc<Outbox>,
    metrics: Arc<LinkMetrics>,
    token: ShutdownToken,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl SubscriberLink {
    /// Perform the responder handshake and start the send loop.
    ///
    /// On refusal the peer receives an `error=` header and the error is
    /// returned to the accept path for logging.
    pub fn handshake(
        mut conn: Connection,
        header: &ConnectionHeader,
        registry: &TopicRegistry,
        caller_id: &str,
    ) -> Result<Arc<Self>> {
        if let Err(e) = header.require(REQUIRED_FIELDS) {
            let _ = conn.write_header(&ConnectionHeader::error_reply(&e.to_string()));
            return Err(e);
        }

        // require() guarantees the fields below are present
        let topic = header.get("topic").unwrap_or_default().to_string();
        let destination_caller_id = header.get("callerid").unwrap_or_default().to_string();

        let Some(publication) = registry.lookup_publication(&topic) else {
            let message = format!(
                "received a connection for a nonexistent topic [{}] from [{}] [{}]",
                topic,
                conn.remote_addr(),
                destination_caller_id
            );
            let _ = conn.write_header(&ConnectionHeader::error_reply(&message));
            return Err(Error::TopicNotFound(topic));
        };

        if let Err(message) = publication.validate_header(header) {
            let _ = conn.write_header(&ConnectionHeader::error_reply(&message));
            return Err(Error::Header(message));
        }

        let mut reply = ConnectionHeader::new();
        reply
            .insert("type", publication.data_type())
            .insert("md5sum", publication.md5sum())
            .insert("message_definition", publication.message_definition())
            .insert("callerid", caller_id)
            .insert("latching", if publication.latch() { "1" } else { "0" });
        conn.write_header(&reply)?;

        let link = Arc::new(Self {
            topic,
            destination_caller_id,
            publication: Arc::downgrade(&publication),
            outbox: Arc::new(Outbox::new(publication.queue_depth())),
            metrics: Arc::new(LinkMetrics::new()),
            token: ShutdownToken::new(),
            thread: Mutex::new(None),
        });

        publication.add_link(&link);

        let runner = Arc::clone(&link);
        #[allow(clippy::expect_used)] // thread spawn failure is unrecoverable
        let handle = std::thread::Builder::new()
            .name(format!("roslink-sub-link-{}", link.topic))
            .spawn(move || runner.send_loop(conn))
            .expect("failed to spawn subscriber link thread");
        *link.thread.lock() = Some(handle);

        crate::debug!(
            "subscriber link for [{}] serving [{}]",
            link.topic,
            link.destination_caller_id
        );
        Ok(link)
    }

    /// Topic this link serves.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Caller id of the remote subscriber.
    pub fn destination_caller_id(&self) -> &str {
        &self.destination_caller_id
    }

    /// Transfer counters owned by this link.
    pub fn metrics(&self) -> &Arc<LinkMetrics> {
        &self.metrics
    }

    /// Queue serialized bytes for this subscriber, dropping the oldest
    /// buffered message when the outbox is full.
    pub fn enqueue(&self, bytes: Vec<u8>) {
        if self.outbox.push(bytes) == PushOutcome::DroppedOldest {
            self.metrics.record_drop();
        }
    }

    /// Stop the send loop; buffered messages are abandoned.
    pub fn dispose(&self) {
        self.token.trigger();
        self.outbox.close();
        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    fn send_loop(self: Arc<Self>, mut conn: Connection) {
        loop {
            if self.token.is_triggered() {
                break;
            }
            match self.outbox.pop_timeout(POLL_INTERVAL) {
                Some(bytes) => match conn.send_frame(&bytes) {
                    Ok(wire_bytes) => self.metrics.record_message_sent(wire_bytes),
                    Err(e) => {
                        crate::debug!(
                            "send to subscriber [{}] of [{}] failed: {}",
                            self.destination_caller_id,
                            self.topic,
                            e
                        );
                        break;
                    }
                },
                None => {
                    if self.outbox.is_closed() {
                        break;
                    }
                }
            }
        }

        if let Some(publication) = self.publication.upgrade() {
            publication.remove_link(&self);
        }
        crate::debug!(
            "subscriber link for [{}] serving [{}] closed",
            self.topic,
            self.destination_caller_id
        );
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::frame::FrameCodec;
    use std::io::Read;
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    fn socket_pair() -> (Connection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = thread::spawn(move || TcpStream::connect(addr).unwrap());
        let (server_stream, peer) = listener.accept().unwrap();
        let client_stream = client.join().unwrap();
        (
            Connection::from_stream(server_stream, peer).unwrap(),
            client_stream,
        )
    }

    fn registry_with_publication() -> (TopicRegistry, Arc<Publication>) {
        let registry = TopicRegistry::new();
        let publication = Arc::new(Publication::new(
            "/odom",
            "nav_msgs/Odometry",
            "abc123",
            "definition text",
            4,
            false,
        ));
        registry.insert_publication(&publication);
        (registry, publication)
    }

    fn requester_header() -> ConnectionHeader {
        let mut h = ConnectionHeader::new();
        h.insert("topic", "/odom")
            .insert("md5sum", "abc123")
            .insert("type", "nav_msgs/Odometry")
            .insert("callerid", "/listener")
            .insert("tcp_nodelay", "1");
        h
    }

    fn read_header_block(stream: &mut TcpStream) -> ConnectionHeader {
        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).unwrap();
        let mut body = vec![0u8; u32::from_le_bytes(len_buf) as usize];
        stream.read_exact(&mut body).unwrap();
        ConnectionHeader::parse(&body).unwrap()
    }

    #[test]
    fn test_handshake_and_delivery() {
        let (conn, mut peer) = socket_pair();
        let (registry, publication) = registry_with_publication();

        let link =
            SubscriberLink::handshake(conn, &requester_header(), &registry, "/talker").unwrap();

        let reply = read_header_block(&mut peer);
        assert_eq!(reply.get("md5sum"), Some("abc123"));
        assert_eq!(reply.get("callerid"), Some("/talker"));
        assert_eq!(reply.get("latching"), Some("0"));

        assert_eq!(publication.subscriber_count(), 1);

        publication.publish(b"hello subscriber".to_vec()).unwrap();

        let mut codec = FrameCodec::new();
        let payload = loop {
            if let Some(p) = codec.decode(&mut peer).unwrap() {
                break p;
            }
        };
        assert_eq!(payload, b"hello subscriber");

        // The counter is bumped right after the write; give it a moment
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        while link.metrics().snapshot().messages_sent == 0 && std::time::Instant::now() < deadline
        {
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(link.metrics().snapshot().messages_sent, 1);

        link.dispose();
    }

    #[test]
    fn test_unknown_topic_gets_error_header() {
        let (conn, mut peer) = socket_pair();
        let registry = TopicRegistry::new();

        let err = SubscriberLink::handshake(conn, &requester_header(), &registry, "/talker");
        assert!(matches!(err, Err(Error::TopicNotFound(_))));

        let reply = read_header_block(&mut peer);
        assert!(reply.get("error").unwrap().contains("nonexistent topic"));
    }

    #[test]
    fn test_md5_mismatch_gets_error_header() {
        let (conn, mut peer) = socket_pair();
        let (registry, _publication) = registry_with_publication();

        let mut header = requester_header();
        header.insert("md5sum", "zzz999");

        let err = SubscriberLink::handshake(conn, &header, &registry, "/talker");
        assert!(matches!(err, Err(Error::Header(_))));

        let reply = read_header_block(&mut peer);
        assert!(reply.get("error").unwrap().contains("md5sum"));
    }

    #[test]
    fn test_latched_publication_replays_to_new_link() {
        let (conn, mut peer) = socket_pair();
        let registry = TopicRegistry::new();
        let publication = Arc::new(Publication::new(
            "/map",
            "nav_msgs/OccupancyGrid",
            "fff000",
            "",
            4,
            true,
        ));
        registry.insert_publication(&publication);

        // Published before anyone connects
        publication.publish(b"the map".to_vec()).unwrap();

        let mut header = requester_header();
        header.insert("topic", "/map");
        header.insert("md5sum", "fff000");
        header.insert("type", "nav_msgs/OccupancyGrid");

        let link = SubscriberLink::handshake(conn, &header, &registry, "/talker").unwrap();

        let reply = read_header_block(&mut peer);
        assert_eq!(reply.get("latching"), Some("1"));

        let mut codec = FrameCodec::new();
        let payload = loop {
            if let Some(p) = codec.decode(&mut peer).unwrap() {
                break p;
            }
        };
        assert_eq!(payload, b"the map");

        link.dispose();
    }

    #[test]
    fn test_overflow_counts_drops() {
        let (conn, _peer) = socket_pair();
        let (registry, publication) = registry_with_publication();
        let link =
            SubscriberLink::handshake(conn, &requester_header(), &registry, "/talker").unwrap();

        // The peer never reads, so the send loop wedges in the kernel
        // buffer after a couple of large frames while the producer keeps
        // pushing into a 4-slot outbox: drop-oldest must kick in.
        let big = vec![0x42u8; 256 * 1024];
        for _ in 0..50 {
            publication.publish(big.clone()).unwrap();
        }

        let snapshot = link.metrics().snapshot();
        assert!(snapshot.drops > 0, "expected drop-oldest overflow");

        link.dispose();
    }
}
