// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 roslink contributors

//! Peer-to-peer transport: framing, handshake, and supervised links.
//!
//! # Architecture
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                     Subscription side                        |
//! |  PublisherLink (one per resolved publisher address)          |
//! |    connect -> handshake -> frame receive loop -> callbacks   |
//! |    reconnect with doubling backoff on transient I/O faults   |
//! +--------------------------------------------------------------+
//! |                     Publication side                         |
//! |  SubscriberLink (one per accepted subscriber connection)     |
//! |    responder handshake -> bounded lossy outbox -> send loop  |
//! |    no reconnect: the remote decides whether to come back     |
//! +--------------------------------------------------------------+
//! |  Connection: one live peer stream + framing codec            |
//! |  ConnectionHeader: key=value handshake block                 |
//! |  FrameCodec: [4-byte LE length][payload] framing             |
//! +--------------------------------------------------------------+
//! ```
//!
//! # Modules
//!
//! - `frame` - length-prefix framing codec
//! - `header` - handshake header block
//! - `connection` - one live peer byte stream
//! - `publisher_link` - outbound link with reconnect supervision
//! - `subscriber_link` - inbound link with lossy outbox
//! - `outbox` - bounded drop-oldest queue
//! - `metrics` - per-link transfer counters

pub mod connection;
pub mod frame;
pub mod header;
pub mod metrics;
pub mod outbox;
pub mod publisher_link;
pub mod subscriber_link;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::Connection;
pub use frame::FrameCodec;
pub use header::{ConnectionHeader, REQUIRED_FIELDS};
pub use metrics::{LinkMetrics, LinkMetricsSnapshot};
pub use outbox::{Outbox, PushOutcome};
pub use publisher_link::PublisherLink;
pub use subscriber_link::SubscriberLink;
