// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 roslink contributors

//! Goal/feedback/result coordination layered on plain topics.
//!
//! An action is a long-running request with intermediate feedback and an
//! explicit cancel path. Client and server exchange five topics suffixed
//! onto the action namespace:
//!
//! | topic      | direction        | payload                               |
//! |------------|------------------|---------------------------------------|
//! | `goal`     | client -> server | goal id + user goal payload           |
//! | `cancel`   | client -> server | goal id, or stamp-addressed matching  |
//! | `status`   | server -> client | periodic array of status records      |
//! | `feedback` | server -> client | goal id + intermediate payload        |
//! | `result`   | server -> client | goal id + final payload               |
//!
//! The client tracks each goal through a communication-state machine
//! ([`CommState`]) distinct from the server's status codes
//! ([`GoalState`]); the server tracks a goal table it broadcasts and
//! garbage-collects on one periodic tick. Neither half touches sockets -
//! everything rides on the node's pub/sub primitives.

pub mod client;
pub mod client_goal_handle;
pub mod msgs;
pub mod server;
pub mod server_goal_handle;

// ============================================================================
// Re-exports
// ============================================================================

pub use client::ActionClient;
pub use client_goal_handle::{ClientGoalHandle, CommState, GoalOutcome};
pub use msgs::{
    CancelRequest, FeedbackAction, GoalAction, GoalId, GoalState, GoalStatus, ResultAction, Stamp,
    StatusArray,
};
pub use server::ActionServer;
pub use server_goal_handle::ServerGoalHandle;

// ============================================================================
// Shared test message types
// ============================================================================
