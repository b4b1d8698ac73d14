// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 roslink contributors

//! # roslink - robotics message bus client middleware
//!
//! A client middleware for a distributed publish/subscribe robotics
//! message bus: nodes discover each other through a master registry,
//! negotiate point-to-point streaming connections, exchange typed binary
//! messages, and coordinate long-running action requests on top of plain
//! topics.
//!
//! ## Quick Start
//!
//! ```ignore
//! use roslink::{Node, StaticMaster};
//! use std::sync::Arc;
//!
//! let master = Arc::new(StaticMaster::new());
//!
//! let talker = Node::builder("/talker").master(master.clone()).build()?;
//! let publisher = talker.advertise::<Pose>("/pose", 50, false)?;
//!
//! let listener = Node::builder("/listener").master(master).build()?;
//! let _sub = listener.subscribe::<Pose>("/pose", 50, |pose| {
//!     println!("x = {}", pose.x);
//! })?;
//!
//! publisher.publish(&Pose { x: 1.0, y: 2.0 })?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------------+
//! |                         Application Layer                          |
//! |      Node -> Publisher/Subscriber, ActionClient/ActionServer       |
//! +--------------------------------------------------------------------+
//! |                         Dispatch Layer                             |
//! |   CallbackQueue: FIFO per owner, owner call-guards, worker thread  |
//! +--------------------------------------------------------------------+
//! |                         Transport Layer                            |
//! |   PublisherLink / SubscriberLink | handshake | length-prefixed     |
//! |   frames | reconnect backoff | lossy outbox                        |
//! +--------------------------------------------------------------------+
//! |                         Discovery (external)                       |
//! |   MasterClient contract: register/lookup; StaticMaster in-process  |
//! +--------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Node`] | Bus participant, factory for all entities |
//! | [`Publisher`] / [`Subscriber`] | Typed topic endpoints |
//! | [`ActionClient`] / [`ActionServer`] | Goal/feedback/result protocol |
//! | [`CallbackQueue`] | Dispatch queue decoupling I/O from user code |
//! | [`Message`] | Seam implemented by generated message code |

/// Goal/feedback/result coordination built on plain topics.
pub mod action;
/// Dispatch queue decoupling network receipt from user callbacks.
pub mod callback_queue;
/// Protocol constants and per-instance configuration.
pub mod config;
/// Error type shared across the crate.
pub mod error;
/// Compile-time configurable logging (zero-cost when disabled).
pub mod logging;
/// Master registry contract (consumed, not implemented).
pub mod master;
/// Typed-message seam and wire helpers.
pub mod msg;
/// Node, typed endpoints, and per-node registries.
pub mod node;
/// Wake notification and shutdown signalling.
pub mod sync;
/// Peer-to-peer transport: framing, handshake, supervised links.
pub mod transport;

pub use action::{
    ActionClient, ActionServer, ClientGoalHandle, CommState, GoalId, GoalOutcome, GoalState,
    GoalStatus, ServerGoalHandle, Stamp,
};
pub use callback_queue::{CallResult, CallbackQueue, DrainResult};
pub use config::{ActionClientConfig, ActionServerConfig, NodeConfig};
pub use error::{Error, Result};
pub use master::{MasterClient, StaticMaster, TopicInfo};
pub use msg::Message;
pub use node::{Node, NodeBuilder, Publisher, Subscriber};
pub use sync::ShutdownToken;
pub use transport::{LinkMetrics, LinkMetricsSnapshot};

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
