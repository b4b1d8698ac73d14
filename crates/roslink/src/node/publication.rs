// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 roslink contributors

//! Local registration of being a publisher of a topic.
//!
//! A [`Publication`] owns the inbound links serving its subscribers. A
//! publish serializes once and fans the bytes out to every link's outbox;
//! slow subscribers lose their oldest buffered messages, they never slow
//! the publisher or their sibling links down.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::transport::header::ConnectionHeader;
use crate::transport::subscriber_link::SubscriberLink;

/// Publisher-side topic registration and link fan-out.
pub struct Publication {
    name: String,
    data_type: String,
    md5sum: String,
    message_definition: String,
    latch: bool,
    queue_depth: usize,
    links: Mutex<Vec<Arc<SubscriberLink>>>,
    /// Most recent message, kept only when latching.
    latched: Mutex<Option<Vec<u8>>>,
    dropping: AtomicBool,
}

impl Publication {
    /// Create a publication record.
    pub fn new(
        name: impl Into<String>,
        data_type: impl Into<String>,
        md5sum: impl Into<String>,
        message_definition: impl Into<String>,
        queue_depth: usize,
        latch: bool,
    ) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            md5sum: md5sum.into(),
            message_definition: message_definition.into(),
            latch,
            queue_depth,
            links: Mutex::new(Vec::new()),
            latched: Mutex::new(None),
            dropping: AtomicBool::new(false),
        }
    }

    /// Topic name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Message type name.
    pub fn data_type(&self) -> &str {
        &self.data_type
    }

    /// Schema checksum.
    pub fn md5sum(&self) -> &str {
        &self.md5sum
    }

    /// Plain-text schema definition for the responder header.
    pub fn message_definition(&self) -> &str {
        &self.message_definition
    }

    /// Does this publication re-deliver its last message to new links?
    pub fn latch(&self) -> bool {
        self.latch
    }

    /// Outbox capacity given to each subscriber link.
    pub fn queue_depth(&self) -> usize {
        self.queue_depth
    }

    /// Number of connected subscriber links.
    pub fn subscriber_count(&self) -> usize {
        self.links.lock().len()
    }

    /// Validate an inbound requester header against this publication.
    ///
    /// Returns the refusal message to send back on mismatch. `*` on either
    /// side matches anything, as wildcard subscribers do.
    pub fn validate_header(&self, header: &ConnectionHeader) -> std::result::Result<(), String> {
        let caller_id = header.get("callerid").unwrap_or("unknown");

        let md5 = header.get("md5sum").unwrap_or("");
        if md5 != self.md5sum && md5 != "*" && self.md5sum != "*" {
            return Err(format!(
                "client [{}] wants topic [{}] to have md5sum [{}], but ours is [{}]",
                caller_id, self.name, md5, self.md5sum
            ));
        }

        let data_type = header.get("type").unwrap_or("");
        if data_type != self.data_type && data_type != "*" && self.data_type != "*" {
            return Err(format!(
                "client [{}] wants topic [{}] to be of type [{}], but ours is [{}]",
                caller_id, self.name, data_type, self.data_type
            ));
        }

        Ok(())
    }

    /// Queue serialized bytes on every subscriber link.
    pub fn publish(&self, bytes: Vec<u8>) -> Result<()> {
        if self.dropping.load(Ordering::Acquire) {
            return Err(Error::Shutdown);
        }

        if self.latch {
            *self.latched.lock() = Some(bytes.clone());
        }

        let links = self.links.lock();
        for link in links.iter() {
            link.enqueue(bytes.clone());
        }
        Ok(())
    }

    /// Attach a freshly handshaken subscriber link. A latched publication
    /// immediately queues its last message for the newcomer.
    pub fn add_link(&self, link: &Arc<SubscriberLink>) {
        if let Some(last) = self.latched.lock().clone() {
            link.enqueue(last);
        }
        self.links.lock().push(Arc::clone(link));
    }

    /// Detach a link (its send loop exited or the subscriber went away).
    pub fn remove_link(&self, target: &Arc<SubscriberLink>) {
        self.links
            .lock()
            .retain(|link| !Arc::ptr_eq(link, target));
    }

    /// Last latched message, if any (test observability).
    #[cfg(test)]
    pub fn latched_message(&self) -> Option<Vec<u8>> {
        self.latched.lock().clone()
    }

    /// Tear down every link and refuse further publishes.
    pub fn shutdown(&self) {
        self.dropping.store(true, Ordering::Release);
        let links = std::mem::take(&mut *self.links.lock());
        for link in links {
            link.dispose();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn publication() -> Publication {
        Publication::new(
            "/odom",
            "nav_msgs/Odometry",
            "abc123",
            "",
            8,
            false,
        )
    }

    fn requester(md5: &str, data_type: &str) -> ConnectionHeader {
        let mut h = ConnectionHeader::new();
        h.insert("topic", "/odom")
            .insert("md5sum", md5)
            .insert("type", data_type)
            .insert("callerid", "/listener");
        h
    }

    #[test]
    fn test_validate_header_accepts_match() {
        let p = publication();
        assert!(p.validate_header(&requester("abc123", "nav_msgs/Odometry")).is_ok());
    }

    #[test]
    fn test_validate_header_accepts_wildcard() {
        let p = publication();
        assert!(p.validate_header(&requester("*", "*")).is_ok());
    }

    #[test]
    fn test_validate_header_rejects_md5_mismatch() {
        let p = publication();
        let err = p
            .validate_header(&requester("different", "nav_msgs/Odometry"))
            .unwrap_err();
        assert!(err.contains("md5sum"));
    }

    #[test]
    fn test_validate_header_rejects_type_mismatch() {
        let p = publication();
        let err = p
            .validate_header(&requester("abc123", "std_msgs/String"))
            .unwrap_err();
        assert!(err.contains("type"));
    }

    #[test]
    fn test_publish_after_shutdown_fails() {
        let p = publication();
        p.shutdown();
        assert!(matches!(p.publish(vec![1, 2, 3]), Err(Error::Shutdown)));
    }
}
