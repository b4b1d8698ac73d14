// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 roslink contributors

//! The master registry contract.
//!
//! Discovery is delegated to an external registry reached over a generic
//! RPC transport; the middleware consumes only the request/response
//! contract below. A node advertises its transport listener address per
//! published topic and resolves a subscribed topic name to the candidate
//! peer addresses it should open links to.
//!
//! [`StaticMaster`] is an in-process, table-backed implementation used by
//! tests and single-process deployments; production deployments plug in an
//! RPC-backed client instead.

use dashmap::DashMap;
use std::net::SocketAddr;

use crate::error::{Error, Result};

/// Topic identity as exchanged with the registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopicInfo {
    /// Topic name, e.g. `/odom`
    pub name: String,
    /// Message type name, e.g. `nav_msgs/Odometry`
    pub data_type: String,
    /// Schema checksum
    pub md5sum: String,
}

/// Request/response contract of the external peer registry.
pub trait MasterClient: Send + Sync {
    /// Advertise `caller_id` as a publisher of `topic`, reachable at `addr`.
    fn register_publisher(&self, caller_id: &str, topic: &TopicInfo, addr: SocketAddr)
        -> Result<()>;

    /// Withdraw a publisher registration.
    fn unregister_publisher(&self, caller_id: &str, topic: &str, addr: SocketAddr) -> Result<()>;

    /// Register `caller_id` as a subscriber of `topic`; returns the
    /// currently known publisher addresses for the topic.
    fn register_subscriber(&self, caller_id: &str, topic: &TopicInfo) -> Result<Vec<SocketAddr>>;

    /// Withdraw a subscriber registration.
    fn unregister_subscriber(&self, caller_id: &str, topic: &str) -> Result<()>;

    /// Resolve a topic name to candidate publisher addresses.
    fn lookup_publishers(&self, topic: &str) -> Result<Vec<SocketAddr>>;
}

// ============================================================================
// In-process registry
// ============================================================================

#[derive(Clone, Debug)]
struct Registration {
    caller_id: String,
    addr: SocketAddr,
}

/// Table-backed [`MasterClient`] for tests and single-process setups.
///
/// Multiple nodes in one process share an `Arc<StaticMaster>`; nothing here
/// is process-global.
#[derive(Debug, Default)]
pub struct StaticMaster {
    publishers: DashMap<String, Vec<Registration>>,
    subscribers: DashMap<String, Vec<String>>,
}

impl StaticMaster {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered publishers for a topic.
    pub fn publisher_count(&self, topic: &str) -> usize {
        self.publishers.get(topic).map_or(0, |regs| regs.len())
    }
}

impl MasterClient for StaticMaster {
    fn register_publisher(
        &self,
        caller_id: &str,
        topic: &TopicInfo,
        addr: SocketAddr,
    ) -> Result<()> {
        let mut regs = self.publishers.entry(topic.name.clone()).or_default();
        if regs.iter().any(|r| r.caller_id == caller_id && r.addr == addr) {
            return Err(Error::Master(format!(
                "publisher [{}] already registered for [{}]",
                caller_id, topic.name
            )));
        }
        regs.push(Registration {
            caller_id: caller_id.to_string(),
            addr,
        });
        Ok(())
    }

    fn unregister_publisher(&self, caller_id: &str, topic: &str, addr: SocketAddr) -> Result<()> {
        if let Some(mut regs) = self.publishers.get_mut(topic) {
            regs.retain(|r| !(r.caller_id == caller_id && r.addr == addr));
        }
        Ok(())
    }

    fn register_subscriber(&self, caller_id: &str, topic: &TopicInfo) -> Result<Vec<SocketAddr>> {
        self.subscribers
            .entry(topic.name.clone())
            .or_default()
            .push(caller_id.to_string());
        self.lookup_publishers(&topic.name)
    }

    fn unregister_subscriber(&self, caller_id: &str, topic: &str) -> Result<()> {
        if let Some(mut subs) = self.subscribers.get_mut(topic) {
            subs.retain(|c| c != caller_id);
        }
        Ok(())
    }

    fn lookup_publishers(&self, topic: &str) -> Result<Vec<SocketAddr>> {
        Ok(self
            .publishers
            .get(topic)
            .map(|regs| regs.iter().map(|r| r.addr).collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic() -> TopicInfo {
        TopicInfo {
            name: "/odom".into(),
            data_type: "nav_msgs/Odometry".into(),
            md5sum: "abc123".into(),
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let master = StaticMaster::new();
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();

        master.register_publisher("/talker", &topic(), addr).unwrap();
        assert_eq!(master.lookup_publishers("/odom").unwrap(), vec![addr]);
        assert!(master.lookup_publishers("/other").unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let master = StaticMaster::new();
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();

        master.register_publisher("/talker", &topic(), addr).unwrap();
        assert!(matches!(
            master.register_publisher("/talker", &topic(), addr),
            Err(Error::Master(_))
        ));
    }

    #[test]
    fn test_subscriber_sees_existing_publishers() {
        let master = StaticMaster::new();
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        master.register_publisher("/talker", &topic(), addr).unwrap();

        let addrs = master.register_subscriber("/listener", &topic()).unwrap();
        assert_eq!(addrs, vec![addr]);
    }

    #[test]
    fn test_unregister_publisher() {
        let master = StaticMaster::new();
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        master.register_publisher("/talker", &topic(), addr).unwrap();
        master.unregister_publisher("/talker", "/odom", addr).unwrap();
        assert!(master.lookup_publishers("/odom").unwrap().is_empty());
    }
}
