// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 roslink contributors

//! Global configuration - single source of truth.
//!
//! Two levels:
//!
//! - **Static**: wire-protocol constants shared by every link. These are
//!   protocol invariants, not tunables; changing them breaks interop with
//!   peers. **Never hardcode these values elsewhere!**
//! - **Dynamic**: [`NodeConfig`], [`ActionClientConfig`] and
//!   [`ActionServerConfig`] carry per-instance tunables with the bus's
//!   documented defaults. A parameter store, when present, is resolved by
//!   the embedding application before these structs are built.

use std::time::Duration;

// =======================================================================
// Wire protocol constants
// =======================================================================

/// Hard upper bound on a framed message payload, in bytes.
///
/// A frame whose declared length exceeds this aborts the connection as a
/// protocol violation before any payload byte is read. Protocol constant,
/// not user-configurable.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Size of the length prefix preceding every frame and header block.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Hard upper bound on a handshake header block, in bytes.
///
/// Headers are short `key=value` text; anything near this size is a
/// corrupted or hostile peer.
pub const MAX_HEADER_SIZE: usize = 1024 * 1024;

// =======================================================================
// Link supervision constants
// =======================================================================

/// First retry delay after an outbound connection failure.
pub const BASE_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Ceiling for the doubling retry delay.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Socket read timeout; also the cancellation observation granularity of
/// every supervised loop.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Upper bound on one outbound connection attempt.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Upper bound on one blocking socket write. A peer that stalls its
/// receive side longer than this loses the connection.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Upper bound on a complete header handshake, either direction.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Consecutive status arrays a goal may be absent from before the client
/// declares it lost on the server side.
pub const STATUS_MISSING_LIMIT: u32 = 5;

// =======================================================================
// Node configuration
// =======================================================================

/// Per-node tunables.
#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// Default depth of publish/subscribe message queues.
    pub queue_depth: usize,

    /// Address the node's transport listener binds to. Port 0 asks the OS
    /// for an ephemeral port; the bound address is what gets registered
    /// with the master.
    pub bind_addr: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            queue_depth: 50,
            bind_addr: "127.0.0.1:0".to_string(),
        }
    }
}

// =======================================================================
// Action configuration
// =======================================================================

/// Tunables for one action client instance.
#[derive(Clone, Debug)]
pub struct ActionClientConfig {
    /// How long to wait for the server to acknowledge a cancel before the
    /// goal is declared lost.
    pub cancel_ack_timeout: Duration,

    /// Queue depth for the five action topics.
    pub queue_depth: usize,
}

impl Default for ActionClientConfig {
    fn default() -> Self {
        Self {
            cancel_ack_timeout: Duration::from_secs(3),
            queue_depth: 50,
        }
    }
}

/// Tunables for one action server instance.
#[derive(Clone, Debug)]
pub struct ActionServerConfig {
    /// Frequency of the periodic status broadcast (which is also the
    /// garbage-collection tick).
    pub status_frequency_hz: f64,

    /// How long a terminal goal handle stays in the status table before the
    /// status tick prunes it.
    pub status_list_timeout: Duration,

    /// Queue depth for the five action topics.
    pub queue_depth: usize,
}

impl Default for ActionServerConfig {
    fn default() -> Self {
        Self {
            status_frequency_hz: 5.0,
            status_list_timeout: Duration::from_secs(5),
            queue_depth: 50,
        }
    }
}

impl ActionServerConfig {
    /// Interval between two status ticks.
    pub fn status_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.status_frequency_hz.max(0.001))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let node = NodeConfig::default();
        assert_eq!(node.queue_depth, 50);

        let client = ActionClientConfig::default();
        assert_eq!(client.cancel_ack_timeout, Duration::from_secs(3));

        let server = ActionServerConfig::default();
        assert_eq!(server.status_frequency_hz, 5.0);
        assert_eq!(server.status_list_timeout, Duration::from_secs(5));
        assert_eq!(server.status_interval(), Duration::from_millis(200));
    }

    #[test]
    fn test_retry_constants_sane() {
        assert!(BASE_RETRY_DELAY < MAX_RETRY_DELAY);
        assert!(MAX_RETRY_DELAY <= Duration::from_secs(5));
    }
}
