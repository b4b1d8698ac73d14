// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 roslink contributors

//! Server-side view of one tracked goal.
//!
//! The acceptor moves a goal through its status codes with the `set_*`
//! methods. An operation that is illegal in the current status returns a
//! typed [`Error::InvalidState`] - never a panic and never a torn-down
//! connection, because a misbehaving action implementation is ordinary
//! misuse, not a protocol fault.
//!
//! Reaching a terminal status stamps the handle's destruction time; the
//! owning server's status tick prunes it once the retention window has
//! passed.

use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Instant;

use crate::error::{Error, Result};
use crate::msg::Message;

use super::msgs::{GoalId, GoalState, GoalStatus};
use super::server::ServerInner;

struct StatusRecord {
    state: GoalState,
    text: String,
}

/// One goal as the acceptor tracks it.
pub struct ServerGoalHandle<G, R, F>
where
    G: Message,
    R: Message,
    F: Message,
{
    goal_id: GoalId,
    /// Absent on placeholder handles created by a cancel that arrived
    /// before its goal.
    goal: Option<G>,
    status: Mutex<StatusRecord>,
    /// When the handle became eligible for garbage collection.
    destruction_time: Mutex<Option<Instant>>,
    server: Weak<ServerInner<G, R, F>>,
}

impl<G, R, F> ServerGoalHandle<G, R, F>
where
    G: Message,
    R: Message,
    F: Message,
{
    pub(crate) fn new(
        goal_id: GoalId,
        goal: Option<G>,
        state: GoalState,
        server: Weak<ServerInner<G, R, F>>,
    ) -> Self {
        Self {
            goal_id,
            goal,
            status: Mutex::new(StatusRecord {
                state,
                text: String::new(),
            }),
            destruction_time: Mutex::new(None),
            server,
        }
    }

    /// Identity of the tracked goal.
    pub fn goal_id(&self) -> &GoalId {
        &self.goal_id
    }

    /// The goal payload; `None` for placeholder handles.
    pub fn goal(&self) -> Option<&G> {
        self.goal.as_ref()
    }

    /// Current status record.
    pub fn status(&self) -> GoalStatus {
        let status = self.status.lock();
        GoalStatus {
            goal_id: self.goal_id.clone(),
            state: status.state,
            text: status.text.clone(),
        }
    }

    /// Current status code.
    pub fn state(&self) -> GoalState {
        self.status.lock().state
    }

    pub(crate) fn destruction_instant(&self) -> Option<Instant> {
        *self.destruction_time.lock()
    }

    pub(crate) fn mark_for_destruction(&self) {
        let mut destruction = self.destruction_time.lock();
        if destruction.is_none() {
            *destruction = Some(Instant::now());
        }
    }

    /// Move to `to` if currently in one of `from`; typed rejection
    /// otherwise.
    fn transition(&self, from: &[GoalState], to: GoalState, text: &str) -> Result<()> {
        {
            let mut status = self.status.lock();
            if !from.contains(&status.state) {
                return Err(Error::InvalidState(format!(
                    "goal [{}] cannot move from {} to {}",
                    self.goal_id.id, status.state, to
                )));
            }
            status.state = to;
            status.text = text.to_string();
        }
        if to.is_terminal() {
            self.mark_for_destruction();
        }
        Ok(())
    }

    // ========================================================================
    // Acceptor operations
    // ========================================================================

    /// Accept a pending goal for execution. A goal already being recalled
    /// moves to `Preempting` instead: the accept and the cancel crossed.
    pub fn set_accepted(&self, text: &str) -> Result<()> {
        let state = self.state();
        match state {
            GoalState::Pending => self.transition(&[GoalState::Pending], GoalState::Active, text)?,
            GoalState::Recalling => {
                self.transition(&[GoalState::Recalling], GoalState::Preempting, text)?;
            }
            other => {
                return Err(Error::InvalidState(format!(
                    "goal [{}] cannot be accepted from {}",
                    self.goal_id.id, other
                )))
            }
        }
        self.publish_status();
        Ok(())
    }

    /// Refuse a goal that never started executing.
    pub fn set_rejected(&self, result: Option<R>, text: &str) -> Result<()> {
        self.transition(
            &[GoalState::Pending, GoalState::Recalling],
            GoalState::Rejected,
            text,
        )?;
        self.publish_result(result);
        Ok(())
    }

    /// Confirm a cancel: a queued goal becomes `Recalled`, a running one
    /// `Preempted`.
    pub fn set_canceled(&self, result: Option<R>, text: &str) -> Result<()> {
        let state = self.state();
        match state {
            GoalState::Pending | GoalState::Recalling => self.transition(
                &[GoalState::Pending, GoalState::Recalling],
                GoalState::Recalled,
                text,
            )?,
            GoalState::Active | GoalState::Preempting => self.transition(
                &[GoalState::Active, GoalState::Preempting],
                GoalState::Preempted,
                text,
            )?,
            other => {
                return Err(Error::InvalidState(format!(
                    "goal [{}] cannot be canceled from {}",
                    self.goal_id.id, other
                )))
            }
        }
        self.publish_result(result);
        Ok(())
    }

    /// Report successful completion with the final result.
    pub fn set_succeeded(&self, result: Option<R>, text: &str) -> Result<()> {
        self.transition(
            &[GoalState::Active, GoalState::Preempting],
            GoalState::Succeeded,
            text,
        )?;
        self.publish_result(result);
        Ok(())
    }

    /// Report failure during execution.
    pub fn set_aborted(&self, result: Option<R>, text: &str) -> Result<()> {
        self.transition(
            &[GoalState::Active, GoalState::Preempting],
            GoalState::Aborted,
            text,
        )?;
        self.publish_result(result);
        Ok(())
    }

    /// Send intermediate feedback for this goal.
    pub fn publish_feedback(&self, feedback: F) -> Result<()> {
        match self.server.upgrade() {
            Some(server) => server.publish_feedback(self.status(), feedback),
            None => Err(Error::Shutdown),
        }
    }

    /// React to a cancel request: `true` when the goal moved into a
    /// cancelling state and the cancel callback should see it.
    pub(crate) fn set_cancel_requested(&self) -> bool {
        let mut status = self.status.lock();
        match status.state {
            GoalState::Pending => {
                status.state = GoalState::Recalling;
                true
            }
            GoalState::Active => {
                status.state = GoalState::Preempting;
                true
            }
            _ => false,
        }
    }

    /// Force a status (goal-arrived-after-cancel path).
    pub(crate) fn force_state(&self, state: GoalState, text: &str) {
        {
            let mut status = self.status.lock();
            status.state = state;
            status.text = text.to_string();
        }
        if state.is_terminal() {
            self.mark_for_destruction();
        }
    }

    fn publish_result(&self, result: Option<R>) {
        if let Some(server) = self.server.upgrade() {
            if let Err(e) = server.publish_result(self.status(), result) {
                crate::warn!("failed to publish result for goal [{}]: {}", self.goal_id.id, e);
            }
        }
    }

    fn publish_status(&self) {
        if let Some(server) = self.server.upgrade() {
            server.publish_status_and_gc();
        }
    }
}
