// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 roslink contributors

//! The node: entry point and owner of all per-process-instance state.
//!
//! A [`Node`] owns its topic registry, callback queue, transport listener
//! and shutdown token as explicit instances - there are no process-wide
//! tables, so any number of nodes coexist in one process, which is exactly
//! how the integration tests run a publisher node against a subscriber
//! node.
//!
//! ## Quick start
//!
//! ```ignore
//! use roslink::{Node, StaticMaster};
//! use std::sync::Arc;
//!
//! let master = Arc::new(StaticMaster::new());
//! let talker = Node::builder("/talker").master(master.clone()).build()?;
//! let listener = Node::builder("/listener").master(master).build()?;
//!
//! let publisher = talker.advertise::<Pose>("/pose", 50, false)?;
//! let _sub = listener.subscribe::<Pose>("/pose", 50, |pose| {
//!     println!("got {:?}", pose);
//! })?;
//!
//! publisher.publish(&Pose { x: 1.0, y: 2.0 })?;
//! ```

pub mod publication;
pub mod subscription;
pub mod topic_registry;

use parking_lot::Mutex;
use std::marker::PhantomData;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::callback_queue::CallbackQueue;
use crate::config::{NodeConfig, POLL_INTERVAL};
use crate::error::{Error, Result};
use crate::master::{MasterClient, TopicInfo};
use crate::msg::{to_bytes, Message};
use crate::sync::ShutdownToken;
use crate::transport::connection::Connection;
use crate::transport::metrics::LinkMetricsSnapshot;
use crate::transport::publisher_link::PublisherLink;
use crate::transport::subscriber_link::SubscriberLink;

pub use publication::Publication;
pub use subscription::Subscription;
pub use topic_registry::TopicRegistry;

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`Node`].
pub struct NodeBuilder {
    name: String,
    master: Option<Arc<dyn MasterClient>>,
    config: NodeConfig,
}

impl NodeBuilder {
    /// Start building a node with the given caller id.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            master: None,
            config: NodeConfig::default(),
        }
    }

    /// Registry the node registers with and resolves peers through.
    pub fn master(mut self, master: Arc<dyn MasterClient>) -> Self {
        self.master = Some(master);
        self
    }

    /// Override the default configuration.
    pub fn config(mut self, config: NodeConfig) -> Self {
        self.config = config;
        self
    }

    /// Bind the listener, start the accept loop and the callback worker.
    pub fn build(self) -> Result<Arc<Node>> {
        let master = self
            .master
            .ok_or_else(|| Error::InvalidState("node built without a master client".into()))?;

        let bind_addr: SocketAddr = self.config.bind_addr.parse().map_err(|_| {
            Error::InvalidState(format!("invalid bind address [{}]", self.config.bind_addr))
        })?;

        let socket = socket2::Socket::new(
            socket2::Domain::for_address(bind_addr),
            socket2::Type::STREAM,
            Some(socket2::Protocol::TCP),
        )?;
        socket.set_reuse_address(true)?;
        socket.bind(&bind_addr.into())?;
        socket.listen(128)?;
        let listener: TcpListener = socket.into();
        listener.set_nonblocking(true)?;
        let listen_addr = listener.local_addr()?;

        let token = ShutdownToken::new();
        let queue = Arc::new(CallbackQueue::new());
        let registry = Arc::new(TopicRegistry::new());

        let node = Arc::new(Node {
            name: self.name,
            config: self.config,
            master,
            registry: Arc::clone(&registry),
            queue: Arc::clone(&queue),
            token: token.clone(),
            listen_addr,
            next_owner: AtomicU64::new(1),
            threads: Mutex::new(Vec::new()),
            shut: AtomicBool::new(false),
        });

        let worker = queue.spawn_worker(token.clone());

        let accept_registry = registry;
        let accept_name = node.name.clone();
        let accept_token = token;
        #[allow(clippy::expect_used)] // thread spawn failure is unrecoverable
        let acceptor = std::thread::Builder::new()
            .name("roslink-accept".to_string())
            .spawn(move || {
                Node::accept_loop(&listener, &accept_registry, &accept_name, &accept_token);
            })
            .expect("failed to spawn accept loop thread");

        node.threads.lock().extend([worker, acceptor]);

        crate::info!("node [{}] listening on {}", node.name, listen_addr);
        Ok(node)
    }
}

// ============================================================================
// Node
// ============================================================================

/// One bus participant: registry client, transport endpoint, dispatcher.
pub struct Node {
    name: String,
    config: NodeConfig,
    master: Arc<dyn MasterClient>,
    registry: Arc<TopicRegistry>,
    queue: Arc<CallbackQueue>,
    token: ShutdownToken,
    listen_addr: SocketAddr,
    next_owner: AtomicU64,
    threads: Mutex<Vec<JoinHandle<()>>>,
    shut: AtomicBool,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("listen_addr", &self.listen_addr)
            .finish_non_exhaustive()
    }
}

impl Node {
    /// Start building a node with the given caller id.
    pub fn builder(name: impl Into<String>) -> NodeBuilder {
        NodeBuilder::new(name)
    }

    /// Caller id of this node.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Address the transport listener is bound to; this is what peers get
    /// from the registry.
    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    /// Configuration this node was built with.
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Shared cancellation signal of this node.
    pub fn shutdown_token(&self) -> ShutdownToken {
        self.token.clone()
    }

    /// The node's callback dispatch queue.
    pub fn callback_queue(&self) -> &Arc<CallbackQueue> {
        &self.queue
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shut.load(Ordering::Acquire) || self.token.is_triggered() {
            return Err(Error::Shutdown);
        }
        Ok(())
    }

    // ========================================================================
    // Advertise / subscribe
    // ========================================================================

    /// Advertise a topic; returns the typed publish handle.
    ///
    /// `latch` re-delivers the most recent message to late subscribers.
    pub fn advertise<M: Message>(
        &self,
        topic: &str,
        queue_depth: usize,
        latch: bool,
    ) -> Result<Publisher<M>> {
        self.ensure_running()?;

        let publication = Arc::new(Publication::new(
            topic,
            M::data_type(),
            M::md5sum(),
            M::message_definition(),
            queue_depth.max(1),
            latch,
        ));
        self.registry.register_publication(&publication)?;

        let info = TopicInfo {
            name: topic.to_string(),
            data_type: M::data_type(),
            md5sum: M::md5sum(),
        };
        if let Err(e) = self
            .master
            .register_publisher(&self.name, &info, self.listen_addr)
        {
            self.registry.remove_publication(topic);
            return Err(e);
        }

        crate::debug!("node [{}] advertised [{}]", self.name, topic);
        Ok(Publisher {
            publication,
            _marker: PhantomData,
        })
    }

    /// Subscribe to a topic; `callback` runs on the node's dispatch worker
    /// for every decoded message, never on a link's receive loop.
    pub fn subscribe<M, F>(&self, topic: &str, queue_depth: usize, callback: F) -> Result<Subscriber<M>>
    where
        M: Message,
        F: Fn(M) + Send + Sync + 'static,
    {
        self.ensure_running()?;

        let id = self.next_owner.fetch_add(1, Ordering::Relaxed);
        let topic_name = topic.to_string();
        let handler = Box::new(move |payload: Vec<u8>| match M::deserialize(&payload) {
            Ok(message) => callback(message),
            Err(e) => {
                crate::warn!("dropping undecodable message on [{}]: {}", topic_name, e);
            }
        });

        let subscription = Arc::new(Subscription::new(
            id,
            topic,
            M::data_type(),
            M::md5sum(),
            queue_depth.max(1),
            Arc::clone(&self.queue),
            handler,
        ));
        self.registry.register_subscription(&subscription);

        let info = TopicInfo {
            name: topic.to_string(),
            data_type: M::data_type(),
            md5sum: M::md5sum(),
        };
        let addrs = match self.master.register_subscriber(&self.name, &info) {
            Ok(addrs) => addrs,
            Err(e) => {
                self.registry.remove_subscription(id);
                subscription.shutdown();
                return Err(e);
            }
        };
        for addr in addrs {
            self.link_subscription(&subscription, addr);
        }

        crate::debug!("node [{}] subscribed to [{}]", self.name, topic);
        Ok(Subscriber {
            subscription,
            master: Arc::clone(&self.master),
            registry: Arc::clone(&self.registry),
            caller_id: self.name.clone(),
            _marker: PhantomData,
        })
    }

    fn link_subscription(&self, subscription: &Arc<Subscription>, addr: SocketAddr) {
        if subscription.has_link_to(&addr.ip().to_string(), addr.port()) {
            return;
        }
        let link = PublisherLink::spawn(
            subscription,
            addr.ip().to_string(),
            addr.port(),
            self.name.clone(),
        );
        subscription.add_link(link);
    }

    // ========================================================================
    // Accept loop
    // ========================================================================

    fn accept_loop(
        listener: &TcpListener,
        registry: &Arc<TopicRegistry>,
        name: &str,
        token: &ShutdownToken,
    ) {
        loop {
            if token.is_triggered() {
                break;
            }
            match listener.accept() {
                Ok((stream, peer)) => {
                    let registry = Arc::clone(registry);
                    let name = name.to_string();
                    let token = token.clone();
                    let spawned = std::thread::Builder::new()
                        .name("roslink-handshake".to_string())
                        .spawn(move || {
                            Self::serve_incoming(stream, peer, &registry, &name, &token);
                        });
                    if let Err(e) = spawned {
                        crate::error!("failed to spawn handshake thread: {}", e);
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    token.wait_timeout(POLL_INTERVAL);
                }
                Err(e) => {
                    crate::warn!("accept failed: {}", e);
                    token.wait_timeout(POLL_INTERVAL);
                }
            }
        }
        crate::debug!("node [{}] accept loop exiting", name);
    }

    fn serve_incoming(
        stream: std::net::TcpStream,
        peer: SocketAddr,
        registry: &Arc<TopicRegistry>,
        name: &str,
        token: &ShutdownToken,
    ) {
        let mut conn = match Connection::from_stream(stream, peer) {
            Ok(conn) => conn,
            Err(e) => {
                crate::debug!("failed to set up connection from {}: {}", peer, e);
                return;
            }
        };

        let cancelled = || token.is_triggered();
        match conn.read_header(&cancelled) {
            Ok(header) => {
                if let Err(e) = SubscriberLink::handshake(conn, &header, registry, name) {
                    crate::warn!("refused subscriber connection from {}: {}", peer, e);
                }
            }
            Err(e) => {
                crate::debug!("failed to read header from {}: {}", peer, e);
            }
        }
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Stop every supervised loop, tear down links, unregister from the
    /// master. Idempotent.
    pub fn shutdown(&self) {
        if self.shut.swap(true, Ordering::AcqRel) {
            return;
        }
        crate::info!("node [{}] shutting down", self.name);

        for topic in self.registry.published_topics() {
            let _ = self
                .master
                .unregister_publisher(&self.name, &topic, self.listen_addr);
        }
        for topic in self.registry.subscribed_topics() {
            let _ = self.master.unregister_subscriber(&self.name, &topic);
        }

        self.token.trigger();
        self.registry.shutdown_all();
        self.queue.disable();

        let threads = std::mem::take(&mut *self.threads.lock());
        for handle in threads {
            let _ = handle.join();
        }
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ============================================================================
// Typed handles
// ============================================================================

/// Typed publish handle; clones share the same publication.
pub struct Publisher<M: Message> {
    publication: Arc<Publication>,
    _marker: PhantomData<fn(M)>,
}

impl<M: Message> Clone for Publisher<M> {
    fn clone(&self) -> Self {
        Self {
            publication: Arc::clone(&self.publication),
            _marker: PhantomData,
        }
    }
}

impl<M: Message> Publisher<M> {
    /// Wrap an existing publication (crate-internal and test wiring).
    pub(crate) fn from_publication(publication: Arc<Publication>) -> Self {
        Self {
            publication,
            _marker: PhantomData,
        }
    }

    /// Serialize once and queue the bytes on every subscriber link.
    pub fn publish(&self, message: &M) -> Result<()> {
        self.publication.publish(to_bytes(message))
    }

    /// Topic name.
    pub fn topic(&self) -> &str {
        self.publication.name()
    }

    /// Number of connected subscriber links.
    pub fn subscriber_count(&self) -> usize {
        self.publication.subscriber_count()
    }
}

/// Typed subscribe handle; dropping it tears the subscription down.
pub struct Subscriber<M: Message> {
    subscription: Arc<Subscription>,
    master: Arc<dyn MasterClient>,
    registry: Arc<TopicRegistry>,
    caller_id: String,
    _marker: PhantomData<fn(M)>,
}

impl<M: Message> Subscriber<M> {
    /// Topic name.
    pub fn topic(&self) -> &str {
        self.subscription.name()
    }

    /// True while at least one link has a completed handshake.
    pub fn is_connected(&self) -> bool {
        self.subscription.is_connected()
    }

    /// Per-link transfer counters.
    pub fn link_stats(&self) -> Vec<LinkMetricsSnapshot> {
        self.subscription.link_stats()
    }

    /// Messages dropped by the bounded dispatch deque.
    pub fn drops(&self) -> u64 {
        self.subscription.drops()
    }

    /// Re-resolve the topic and open links to any new publishers.
    /// Returns the number of links added.
    pub fn refresh(&self) -> Result<usize> {
        let addrs = self.master.lookup_publishers(self.subscription.name())?;
        let mut added = 0;
        for addr in addrs {
            if self
                .subscription
                .has_link_to(&addr.ip().to_string(), addr.port())
            {
                continue;
            }
            let link = PublisherLink::spawn(
                &self.subscription,
                addr.ip().to_string(),
                addr.port(),
                self.caller_id.clone(),
            );
            self.subscription.add_link(link);
            added += 1;
        }
        Ok(added)
    }

    /// Tear down links, suppress queued callbacks, unregister. Idempotent.
    pub fn shutdown(&self) {
        if self.subscription.is_dropping() {
            return;
        }
        let _ = self
            .master
            .unregister_subscriber(&self.caller_id, self.subscription.name());
        self.registry.remove_subscription(self.subscription.id());
        self.subscription.shutdown();
    }
}

impl<M: Message> Drop for Subscriber<M> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::master::StaticMaster;
    use crate::msg::{WireReader, WireWriter};

    #[derive(Clone, Debug, PartialEq, Eq)]
    struct Ping(u32);

    impl Message for Ping {
        fn data_type() -> String {
            "test_msgs/Ping".to_string()
        }
        fn md5sum() -> String {
            "p1n6".to_string()
        }
        fn serialize(&self, buf: &mut Vec<u8>) {
            WireWriter::new(buf).put_u32(self.0);
        }
        fn deserialize(bytes: &[u8]) -> Result<Self> {
            Ok(Self(WireReader::new(bytes).get_u32()?))
        }
    }

    fn node(name: &str) -> Arc<Node> {
        Node::builder(name)
            .master(Arc::new(StaticMaster::new()))
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_without_master_fails() {
        let err = NodeBuilder::new("/orphan").build().unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[test]
    fn test_node_binds_ephemeral_listener() {
        let n = node("/test_node");
        assert_ne!(n.listen_addr().port(), 0);
        n.shutdown();
    }

    #[test]
    fn test_advertise_registers_with_master() {
        let master = Arc::new(StaticMaster::new());
        let n = Node::builder("/talker")
            .master(Arc::<StaticMaster>::clone(&master))
            .build()
            .unwrap();

        let _publisher = n.advertise::<Ping>("/ping", 10, false).unwrap();
        assert_eq!(master.publisher_count("/ping"), 1);

        n.shutdown();
        assert_eq!(master.publisher_count("/ping"), 0);
    }

    #[test]
    fn test_double_advertise_rejected() {
        let n = node("/talker");
        let _first = n.advertise::<Ping>("/ping", 10, false).unwrap();
        assert!(n.advertise::<Ping>("/ping", 10, false).is_err());
        n.shutdown();
    }

    #[test]
    fn test_operations_fail_after_shutdown() {
        let n = node("/short_lived");
        n.shutdown();
        assert!(matches!(
            n.advertise::<Ping>("/ping", 10, false),
            Err(Error::Shutdown)
        ));
        assert!(matches!(
            n.subscribe::<Ping, _>("/ping", 10, |_| {}),
            Err(Error::Shutdown)
        ));
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let n = node("/twice");
        n.shutdown();
        n.shutdown();
    }

    #[test]
    fn test_subscriber_drop_unregisters() {
        let master = Arc::new(StaticMaster::new());
        let n = Node::builder("/listener")
            .master(Arc::<StaticMaster>::clone(&master))
            .build()
            .unwrap();

        let subscriber = n.subscribe::<Ping, _>("/ping", 10, |_| {}).unwrap();
        drop(subscriber);

        // The owner's guard is gone from the queue as well
        assert!(n.callback_queue().is_empty());
        n.shutdown();
    }
}
