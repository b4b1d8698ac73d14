// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 roslink contributors

//! Per-node tables of live publications and subscriptions.
//!
//! Owned by the node that built it and passed by reference to whoever needs
//! lookups - never a process-wide singleton, so independent nodes coexist
//! in one process (and in one test).

use dashmap::DashMap;
use std::sync::Arc;

use crate::error::{Error, Result};

use super::publication::Publication;
use super::subscription::Subscription;

/// Live topic registrations of one node.
#[derive(Default)]
pub struct TopicRegistry {
    /// Topic name -> publication (the inbound-handshake lookup table)
    publications: DashMap<String, Arc<Publication>>,
    /// Owner id -> subscription
    subscriptions: DashMap<u64, Arc<Subscription>>,
}

impl TopicRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a publication; rejects a second publication of the same
    /// topic with a conflicting type.
    pub fn register_publication(&self, publication: &Arc<Publication>) -> Result<()> {
        if let Some(existing) = self.publications.get(publication.name()) {
            if existing.data_type() != publication.data_type() {
                return Err(Error::TypeMismatch {
                    topic: publication.name().to_string(),
                    registered: existing.data_type().to_string(),
                    requested: publication.data_type().to_string(),
                });
            }
            return Err(Error::InvalidState(format!(
                "topic [{}] is already advertised by this node",
                publication.name()
            )));
        }
        self.publications
            .insert(publication.name().to_string(), Arc::clone(publication));
        Ok(())
    }

    /// Insert without conflict checks (test helper and internal use).
    pub fn insert_publication(&self, publication: &Arc<Publication>) {
        self.publications
            .insert(publication.name().to_string(), Arc::clone(publication));
    }

    /// The lookup an inbound handshake performs.
    pub fn lookup_publication(&self, topic: &str) -> Option<Arc<Publication>> {
        self.publications.get(topic).map(|p| Arc::clone(&p))
    }

    /// Remove a publication, returning it for teardown.
    pub fn remove_publication(&self, topic: &str) -> Option<Arc<Publication>> {
        self.publications.remove(topic).map(|(_, p)| p)
    }

    /// Track a subscription by its owner id.
    pub fn register_subscription(&self, subscription: &Arc<Subscription>) {
        self.subscriptions
            .insert(subscription.id(), Arc::clone(subscription));
    }

    /// Remove a subscription, returning it for teardown.
    pub fn remove_subscription(&self, id: u64) -> Option<Arc<Subscription>> {
        self.subscriptions.remove(&id).map(|(_, s)| s)
    }

    /// Tear down everything this registry tracks.
    pub fn shutdown_all(&self) {
        for entry in self.subscriptions.iter() {
            entry.value().shutdown();
        }
        self.subscriptions.clear();
        for entry in self.publications.iter() {
            entry.value().shutdown();
        }
        self.publications.clear();
    }

    /// Currently advertised topic names.
    pub fn published_topics(&self) -> Vec<String> {
        self.publications
            .iter()
            .map(|e| e.key().clone())
            .collect()
    }

    /// Currently subscribed topic names.
    pub fn subscribed_topics(&self) -> Vec<String> {
        self.subscriptions
            .iter()
            .map(|e| e.value().name().to_string())
            .collect()
    }
}
