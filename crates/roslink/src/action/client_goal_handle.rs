// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 roslink contributors

//! Client-side view of one outstanding goal.
//!
//! Every goal tracks a communication state distinct from the
//! server-reported status code. Status messages drive the state through
//! chains of single transitions (a SUCCEEDED status seen while still
//! waiting for the goal ack walks `WaitingForGoalAck -> Active ->
//! WaitingForResult`); each hop fires the transition callback. Entry into
//! [`CommState::Done`] resolves the handle's single-assignment result slot
//! exactly once.

use parking_lot::{Condvar, Mutex};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::error::Result;
use crate::msg::Message;
use crate::node::Publisher;
use crate::sync::ShutdownToken;

use super::msgs::{CancelRequest, FeedbackAction, GoalAction, GoalState, GoalStatus, ResultAction};

// ============================================================================
// Communication state
// ============================================================================

/// Client-side lifecycle stage of a goal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommState {
    /// Goal sent, server has not yet listed it
    WaitingForGoalAck,
    /// Server queued the goal
    Pending,
    /// Server is executing the goal
    Active,
    /// Cancel sent, server has not yet confirmed it
    WaitingForCancelAck,
    /// Terminal status seen, result message not yet received
    WaitingForResult,
    /// Server is confirming a cancel of a queued goal
    Recalling,
    /// Server is confirming a cancel of a running goal
    Preempting,
    /// Terminal; the result slot is resolved
    Done,
}

impl CommState {
    /// Is `next` a legal single transition from `self`?
    ///
    /// Status-driven transitions follow the table; `WaitingForCancelAck`
    /// is additionally reachable from every state [`Self::cancel`] accepts.
    pub fn can_transition_to(self, next: CommState) -> bool {
        use CommState::*;
        match self {
            WaitingForGoalAck => matches!(
                next,
                Pending | Active | Recalling | Preempting | Done | WaitingForCancelAck
            ),
            Pending => matches!(
                next,
                Active | WaitingForResult | Recalling | Done | WaitingForCancelAck
            ),
            Active => matches!(
                next,
                WaitingForResult | Preempting | Done | WaitingForCancelAck
            ),
            Recalling => matches!(next, Preempting | WaitingForResult | Done),
            Preempting => matches!(next, WaitingForResult | Done),
            WaitingForCancelAck => {
                matches!(next, Recalling | Preempting | WaitingForResult | Done)
            }
            WaitingForResult => matches!(next, Done),
            Done => false,
        }
    }

    /// States from which `cancel()` does something.
    fn allows_cancel(self) -> bool {
        matches!(
            self,
            CommState::WaitingForGoalAck
                | CommState::Pending
                | CommState::Active
                | CommState::WaitingForCancelAck
        )
    }
}

impl std::fmt::Display for CommState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CommState::WaitingForGoalAck => "WAITING_FOR_GOAL_ACK",
            CommState::Pending => "PENDING",
            CommState::Active => "ACTIVE",
            CommState::WaitingForCancelAck => "WAITING_FOR_CANCEL_ACK",
            CommState::WaitingForResult => "WAITING_FOR_RESULT",
            CommState::Recalling => "RECALLING",
            CommState::Preempting => "PREEMPTING",
            CommState::Done => "DONE",
        };
        write!(f, "{}", s)
    }
}

/// Chain of transitions a status code triggers from a given state.
enum StatusReaction {
    Steps(&'static [CommState]),
    NoChange,
    Unexpected,
}

fn transitions_for(current: CommState, status: GoalState) -> StatusReaction {
    use CommState::*;
    use StatusReaction::*;

    if current == Done {
        // Late messages after a terminal verdict are absorbed
        return NoChange;
    }

    match status {
        GoalState::Pending => match current {
            WaitingForGoalAck => Steps(&[Pending]),
            Pending | WaitingForCancelAck | Recalling => NoChange,
            _ => Unexpected,
        },
        GoalState::Active => match current {
            WaitingForGoalAck | Pending => Steps(&[Active]),
            Recalling => Steps(&[Preempting]),
            Active | Preempting | WaitingForCancelAck => NoChange,
            _ => Unexpected,
        },
        GoalState::Rejected => match current {
            WaitingForGoalAck => Steps(&[Pending, WaitingForResult]),
            Pending | Recalling | WaitingForCancelAck => Steps(&[WaitingForResult]),
            WaitingForResult => NoChange,
            _ => Unexpected,
        },
        GoalState::Recalling => match current {
            WaitingForGoalAck => Steps(&[Pending, Recalling]),
            Pending | WaitingForCancelAck => Steps(&[Recalling]),
            Recalling => NoChange,
            _ => Unexpected,
        },
        GoalState::Recalled => match current {
            Pending | WaitingForCancelAck => Steps(&[Recalling, WaitingForResult]),
            Recalling => Steps(&[WaitingForResult]),
            WaitingForResult => NoChange,
            _ => Unexpected,
        },
        GoalState::Preempting => match current {
            WaitingForGoalAck | Pending => Steps(&[Active, Preempting]),
            Active | Recalling | WaitingForCancelAck => Steps(&[Preempting]),
            Preempting => NoChange,
            _ => Unexpected,
        },
        GoalState::Preempted => match current {
            WaitingForGoalAck | Pending => Steps(&[Active, Preempting, WaitingForResult]),
            Active | Recalling | WaitingForCancelAck => Steps(&[Preempting, WaitingForResult]),
            Preempting => Steps(&[WaitingForResult]),
            WaitingForResult => NoChange,
            _ => Unexpected,
        },
        GoalState::Succeeded | GoalState::Aborted => match current {
            WaitingForGoalAck | Pending => Steps(&[Active, WaitingForResult]),
            Active | Recalling | Preempting | WaitingForCancelAck => Steps(&[WaitingForResult]),
            WaitingForResult => NoChange,
            _ => Unexpected,
        },
        // Servers never report LOST; it is a client-side verdict
        GoalState::Lost => Unexpected,
    }
}

// ============================================================================
// Result slot
// ============================================================================

/// Terminal verdict of a goal, delivered exactly once.
#[derive(Debug)]
pub enum GoalOutcome<R> {
    /// Server reported SUCCEEDED; payload absent only for empty results
    Succeeded(Option<R>),
    /// Server reported PREEMPTED: the cancel won
    Cancelled,
    /// Any other server-reported terminal status, carried here
    Failed(GoalStatus),
    /// The server stopped responding; its true verdict is unknown
    Lost,
}

/// Single-assignment slot holding the goal outcome.
struct ResultSlot<R> {
    value: Mutex<Option<Arc<GoalOutcome<R>>>>,
    ready: Condvar,
}

impl<R> ResultSlot<R> {
    fn new() -> Self {
        Self {
            value: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    /// First resolution wins; later calls are ignored.
    fn resolve(&self, outcome: GoalOutcome<R>) -> bool {
        let mut value = self.value.lock();
        if value.is_some() {
            return false;
        }
        *value = Some(Arc::new(outcome));
        self.ready.notify_all();
        true
    }

    fn try_get(&self) -> Option<Arc<GoalOutcome<R>>> {
        self.value.lock().clone()
    }

    fn wait_timeout(&self, timeout: Duration) -> Option<Arc<GoalOutcome<R>>> {
        let deadline = std::time::Instant::now() + timeout;
        let mut value = self.value.lock();
        while value.is_none() {
            let now = std::time::Instant::now();
            if now >= deadline {
                break;
            }
            self.ready.wait_for(&mut value, deadline - now);
        }
        value.clone()
    }
}

// ============================================================================
// Goal handle
// ============================================================================

type TransitionCb<G, R, F> = Box<dyn Fn(&ClientGoalHandle<G, R, F>) + Send + Sync>;
type FeedbackCb<G, R, F> =
    Box<dyn Fn(&ClientGoalHandle<G, R, F>, &FeedbackAction<F>) + Send + Sync>;

// Callbacks are stored as Arc so an invocation can run without holding the
// slot's lock: a callback may itself call reset() on the handle.
type SharedTransitionCb<G, R, F> = Arc<dyn Fn(&ClientGoalHandle<G, R, F>) + Send + Sync>;
type SharedFeedbackCb<G, R, F> =
    Arc<dyn Fn(&ClientGoalHandle<G, R, F>, &FeedbackAction<F>) + Send + Sync>;

struct HandleState {
    state: CommState,
    latest_status: Option<GoalStatus>,
    active: bool,
    /// Consecutive status arrays this goal was absent from
    status_missing: u32,
}

/// One outstanding goal from the requester's view.
pub struct ClientGoalHandle<G, R, F>
where
    G: Message,
    R: Message,
    F: Message,
{
    goal: GoalAction<G>,
    gate: Mutex<HandleState>,
    latest_result: Mutex<Option<Arc<ResultAction<R>>>>,
    result_slot: ResultSlot<R>,
    transition_cb: Mutex<Option<SharedTransitionCb<G, R, F>>>,
    feedback_cb: Mutex<Option<SharedFeedbackCb<G, R, F>>>,
    goal_pub: Publisher<GoalAction<G>>,
    cancel_pub: Publisher<CancelRequest>,
    cancel_ack_timeout: Duration,
    token: ShutdownToken,
}

impl<G, R, F> ClientGoalHandle<G, R, F>
where
    G: Message,
    R: Message + Clone,
    F: Message,
{
    pub(crate) fn new(
        goal: GoalAction<G>,
        goal_pub: Publisher<GoalAction<G>>,
        cancel_pub: Publisher<CancelRequest>,
        cancel_ack_timeout: Duration,
        token: ShutdownToken,
        transition_cb: Option<TransitionCb<G, R, F>>,
        feedback_cb: Option<FeedbackCb<G, R, F>>,
    ) -> Self {
        Self {
            goal,
            gate: Mutex::new(HandleState {
                state: CommState::WaitingForGoalAck,
                latest_status: None,
                active: true,
                status_missing: 0,
            }),
            latest_result: Mutex::new(None),
            result_slot: ResultSlot::new(),
            transition_cb: Mutex::new(transition_cb.map(SharedTransitionCb::from)),
            feedback_cb: Mutex::new(feedback_cb.map(SharedFeedbackCb::from)),
            goal_pub,
            cancel_pub,
            cancel_ack_timeout,
            token,
        }
    }

    /// Goal id string.
    pub fn id(&self) -> &str {
        &self.goal.goal_id.id
    }

    /// The goal payload as sent.
    pub fn goal(&self) -> &G {
        &self.goal.goal
    }

    /// Full goal envelope, including id and stamp.
    pub fn goal_action(&self) -> &GoalAction<G> {
        &self.goal
    }

    /// Current communication state.
    pub fn comm_state(&self) -> CommState {
        self.gate.lock().state
    }

    /// Most recent server-reported status.
    pub fn latest_status(&self) -> Option<GoalStatus> {
        self.gate.lock().latest_status.clone()
    }

    /// Most recent result message, if one arrived.
    pub fn latest_result(&self) -> Option<Arc<ResultAction<R>>> {
        self.latest_result.lock().clone()
    }

    /// Handle still tracked by its client?
    pub fn is_active(&self) -> bool {
        self.gate.lock().active
    }

    /// Terminal verdict, if already delivered.
    pub fn try_outcome(&self) -> Option<Arc<GoalOutcome<R>>> {
        self.result_slot.try_get()
    }

    /// Block until the terminal verdict is delivered or `timeout` passes.
    pub fn wait_outcome(&self, timeout: Duration) -> Option<Arc<GoalOutcome<R>>> {
        self.result_slot.wait_timeout(timeout)
    }

    // ========================================================================
    // Requests
    // ========================================================================

    /// Request cancellation of this goal.
    ///
    /// A silent no-op when the goal is already terminating (`Recalling`,
    /// `Preempting`, `WaitingForResult`, `Done`): the cancel would change
    /// nothing the server is not already doing. Otherwise publishes the
    /// cancel, enters `WaitingForCancelAck`, and arms a watchdog: if the
    /// goal is still not `Done` after the cancel-ack timeout, the server
    /// is presumed gone and the goal is reported lost.
    pub fn cancel(self: &Arc<Self>) -> Result<()> {
        let state = {
            let gate = self.gate.lock();
            if !gate.active {
                crate::error!("cancel() on an inactive goal handle [{}]", self.id());
            }
            gate.state
        };

        if !state.allows_cancel() {
            crate::debug!(
                "cancel() for goal [{}] ignored in state {}",
                self.id(),
                state
            );
            return Ok(());
        }

        self.cancel_pub
            .publish(&CancelRequest::for_goal(self.id()))?;
        if state != CommState::WaitingForCancelAck {
            self.transition_to(CommState::WaitingForCancelAck);
        }

        self.spawn_cancel_watchdog();
        Ok(())
    }

    fn spawn_cancel_watchdog(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let token = self.token.clone();
        let timeout = self.cancel_ack_timeout;
        let spawned = std::thread::Builder::new()
            .name("roslink-cancel-watchdog".to_string())
            .spawn(move || {
                if token.wait_timeout(timeout) {
                    return; // shutdown raced the timer and won
                }
                if let Some(handle) = weak.upgrade() {
                    if handle.comm_state() != CommState::Done {
                        crate::warn!(
                            "no cancel acknowledgement for goal [{}]; assuming the action server is gone",
                            handle.id()
                        );
                        handle.process_lost();
                    }
                }
            });
        if let Err(e) = spawned {
            crate::error!("failed to spawn cancel watchdog: {}", e);
        }
    }

    /// Publish the original goal again (e.g. after a server restart).
    pub fn resend(&self) -> Result<()> {
        if !self.is_active() {
            crate::error!("resend() on an inactive goal handle [{}]", self.id());
        }
        self.goal_pub.publish(&self.goal)
    }

    /// Detach callbacks and deactivate; the handle no longer reacts to
    /// anything.
    pub fn reset(&self) {
        *self.transition_cb.lock() = None;
        *self.feedback_cb.lock() = None;
        self.gate.lock().active = false;
    }

    // ========================================================================
    // Message-driven updates (called by the owning client)
    // ========================================================================

    /// Apply one status record from a server status broadcast.
    pub(crate) fn update_status(self: &Arc<Self>, status: &GoalStatus) {
        let current = {
            let mut gate = self.gate.lock();
            gate.latest_status = Some(status.clone());
            gate.status_missing = 0;
            gate.state
        };

        match transitions_for(current, status.state) {
            StatusReaction::NoChange => {}
            StatusReaction::Unexpected => {
                crate::debug!(
                    "status {} for goal [{}] is unexpected in comm state {}",
                    status.state,
                    self.id(),
                    current
                );
            }
            StatusReaction::Steps(chain) => {
                for next in chain {
                    self.transition_to(*next);
                }
            }
        }
    }

    /// Record that a status broadcast did not mention this goal.
    ///
    /// Returns `true` when the absence streak exceeds `limit` and the goal
    /// should be processed as lost. Goals the server has not acked yet (or
    /// that are already done) are exempt - absence is only meaningful for
    /// goals the server used to report.
    pub(crate) fn note_status_absent(&self, limit: u32) -> bool {
        let mut gate = self.gate.lock();
        if matches!(gate.state, CommState::WaitingForGoalAck | CommState::Done) {
            return false;
        }
        gate.status_missing += 1;
        gate.status_missing >= limit
    }

    /// Apply the final result message.
    pub(crate) fn update_result(self: &Arc<Self>, result: ResultAction<R>) {
        if self.comm_state() == CommState::Done {
            crate::debug!("result for goal [{}] arrived after DONE", self.id());
            return;
        }

        let status = result.status.clone();
        *self.latest_result.lock() = Some(Arc::new(result));

        // Walk the state machine to WAITING_FOR_RESULT via the embedded
        // status, then the result itself completes the goal.
        self.update_status(&status);
        self.transition_to(CommState::Done);
    }

    /// Deliver a feedback message to the registered callback.
    pub(crate) fn fire_feedback(self: &Arc<Self>, feedback: &FeedbackAction<F>) {
        if !self.is_active() {
            return;
        }
        let cb = self.feedback_cb.lock().clone();
        if let Some(cb) = cb {
            cb(self, feedback);
        }
    }

    /// Declare this goal lost: the server stopped responding and its true
    /// verdict is unknown. Reported at most once.
    pub(crate) fn process_lost(self: &Arc<Self>) {
        {
            let mut gate = self.gate.lock();
            if gate.state == CommState::Done {
                return;
            }
            gate.latest_status = Some(GoalStatus {
                goal_id: self.goal.goal_id.clone(),
                state: GoalState::Lost,
                text: "the action server stopped reporting this goal".to_string(),
            });
        }
        self.transition_to(CommState::Done);
    }

    /// Perform one validated transition, resolving the outcome on entry
    /// into `Done`, then fire the transition callback.
    pub(crate) fn transition_to(self: &Arc<Self>, next: CommState) {
        let status_at_done = {
            let mut gate = self.gate.lock();
            if !gate.state.can_transition_to(next) {
                crate::debug!(
                    "illegal transition {} -> {} for goal [{}] skipped",
                    gate.state,
                    next,
                    self.id()
                );
                return;
            }
            crate::debug!("goal [{}]: {} -> {}", self.id(), gate.state, next);
            gate.state = next;
            gate.status_missing = 0;
            if next == CommState::Done {
                gate.latest_status.clone()
            } else {
                None
            }
        };

        if next == CommState::Done {
            self.resolve_outcome(status_at_done);
        }

        let cb = self.transition_cb.lock().clone();
        if let Some(cb) = cb {
            cb(self);
        }
    }

    fn resolve_outcome(&self, status: Option<GoalStatus>) {
        let outcome = match &status {
            Some(s) if s.state == GoalState::Succeeded => {
                let payload = self
                    .latest_result
                    .lock()
                    .as_ref()
                    .and_then(|r| r.result.clone());
                GoalOutcome::Succeeded(payload)
            }
            Some(s) if s.state == GoalState::Preempted => GoalOutcome::Cancelled,
            Some(s) if s.state == GoalState::Lost => GoalOutcome::Lost,
            Some(s) => GoalOutcome::Failed(s.clone()),
            // Done was entered without any server verdict
            None => GoalOutcome::Lost,
        };
        self.result_slot.resolve(outcome);
    }
}

// ============================================================================
// Tests
// ============================================================================
