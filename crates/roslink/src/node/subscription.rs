// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 roslink contributors

//! Local registration of being a subscriber of a topic.
//!
//! A [`Subscription`] owns the outbound links pulling from each resolved
//! publisher and the bounded deque of messages awaiting dispatch. Inbound
//! payloads are queued here and a callback record is pushed onto the node's
//! callback queue under this subscription's owner id; the record pops one
//! payload and runs the user callback on the dispatch worker, never on the
//! link's receive loop.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::callback_queue::{CallResult, CallbackQueue};
use crate::transport::metrics::LinkMetricsSnapshot;
use crate::transport::publisher_link::PublisherLink;

/// Subscriber-side topic registration: links in, callbacks out.
pub struct Subscription {
    /// Owner id grouping this subscription's callbacks in the queue.
    id: u64,
    name: String,
    data_type: String,
    md5sum: String,
    queue_depth: usize,
    queue: Arc<CallbackQueue>,
    /// Messages received but not yet dispatched; bounded drop-oldest.
    pending: Mutex<VecDeque<Vec<u8>>>,
    /// Messages discarded because the pending deque was full.
    drops: AtomicU64,
    /// Deserializes and runs the user callback.
    handler: Box<dyn Fn(Vec<u8>) + Send + Sync>,
    links: Mutex<Vec<Arc<PublisherLink>>>,
    dropping: AtomicBool,
}

impl Subscription {
    /// Create a subscription record.
    pub fn new(
        id: u64,
        name: impl Into<String>,
        data_type: impl Into<String>,
        md5sum: impl Into<String>,
        queue_depth: usize,
        queue: Arc<CallbackQueue>,
        handler: Box<dyn Fn(Vec<u8>) + Send + Sync>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            data_type: data_type.into(),
            md5sum: md5sum.into(),
            queue_depth: queue_depth.max(1),
            queue,
            pending: Mutex::new(VecDeque::new()),
            drops: AtomicU64::new(0),
            handler,
            links: Mutex::new(Vec::new()),
            dropping: AtomicBool::new(false),
        }
    }

    /// Owner id in the callback queue.
    pub fn id(&self) -> u64 {
        self.id
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

    /// Messages dropped by the bounded dispatch deque.
    pub fn drops(&self) -> u64 {
        self.drops.load(Ordering::Relaxed)
    }

    /// True once [`Subscription::shutdown`] has run.
    pub fn is_dropping(&self) -> bool {
        self.dropping.load(Ordering::Acquire)
    }

    /// Queue an inbound payload for dispatch; called from a link's receive
    /// loop. Returns how many older messages were discarded to make room.
    pub fn handle_message(self: &Arc<Self>, payload: Vec<u8>) -> usize {
        if self.is_dropping() {
            return 0;
        }

        let dropped = {
            let mut pending = self.pending.lock();
            let dropped = if pending.len() >= self.queue_depth {
                pending.pop_front();
                self.drops.fetch_add(1, Ordering::Relaxed);
                1
            } else {
                0
            };
            pending.push_back(payload);
            dropped
        };

        let me = Arc::clone(self);
        self.queue.add_callback(
            move || {
                if me.is_dropping() {
                    return CallResult::Invalid;
                }
                // The matching payload may have been displaced by overflow;
                // the record for the displaced message then consumes this
                // one and the tail record finds the deque empty.
                let Some(payload) = me.pending.lock().pop_front() else {
                    return CallResult::Invalid;
                };
                (me.handler)(payload);
                CallResult::Success
            },
            self.id,
        );

        dropped
    }

    /// Attach an outbound link to a resolved publisher.
    pub fn add_link(&self, link: Arc<PublisherLink>) {
        self.links.lock().push(link);
    }

    /// Addresses already linked, to avoid duplicate links on re-lookup.
    pub fn has_link_to(&self, host: &str, port: u16) -> bool {
        self.links
            .lock()
            .iter()
            .any(|l| l.host() == host && l.port() == port)
    }

    /// Per-link transfer counters.
    pub fn link_stats(&self) -> Vec<LinkMetricsSnapshot> {
        self.links
            .lock()
            .iter()
            .map(|l| l.metrics().snapshot())
            .collect()
    }

    /// True while at least one link has a completed handshake.
    pub fn is_connected(&self) -> bool {
        self.links.lock().iter().any(|l| l.is_connected())
    }

    /// Tear down all links, suppress pending callbacks, and evict this
    /// subscription's call-guard from the queue.
    pub fn shutdown(&self) {
        self.dropping.store(true, Ordering::Release);
        let links = std::mem::take(&mut *self.links.lock());
        for link in links {
            link.dispose();
        }
        self.pending.lock().clear();
        self.queue.evict_owner(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn subscription(
        depth: usize,
        queue: &Arc<CallbackQueue>,
        seen: &Arc<Mutex<Vec<Vec<u8>>>>,
    ) -> Arc<Subscription> {
        let seen = Arc::clone(seen);
        Arc::new(Subscription::new(
            1,
            "/odom",
            "nav_msgs/Odometry",
            "abc123",
            depth,
            Arc::clone(queue),
            Box::new(move |payload| seen.lock().push(payload)),
        ))
    }

    #[test]
    fn test_messages_dispatch_in_order() {
        let queue = Arc::new(CallbackQueue::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sub = subscription(8, &queue, &seen);

        sub.handle_message(vec![1]);
        sub.handle_message(vec![2]);
        sub.handle_message(vec![3]);
        queue.call_available(Duration::ZERO);

        assert_eq!(*seen.lock(), vec![vec![1], vec![2], vec![3]]);
    }

    #[test]
    fn test_overflow_drops_oldest_and_counts() {
        let queue = Arc::new(CallbackQueue::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sub = subscription(2, &queue, &seen);

        assert_eq!(sub.handle_message(vec![1]), 0);
        assert_eq!(sub.handle_message(vec![2]), 0);
        assert_eq!(sub.handle_message(vec![3]), 1);
        assert_eq!(sub.drops(), 1);

        queue.call_available(Duration::ZERO);
        // Oldest message was displaced; the rest arrive in order
        assert_eq!(*seen.lock(), vec![vec![2], vec![3]]);
    }

    #[test]
    fn test_shutdown_suppresses_pending_callbacks() {
        let queue = Arc::new(CallbackQueue::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sub = subscription(8, &queue, &seen);

        sub.handle_message(vec![1]);
        sub.shutdown();
        queue.call_available(Duration::ZERO);

        assert!(seen.lock().is_empty());
        assert_eq!(sub.handle_message(vec![2]), 0);
    }
}
