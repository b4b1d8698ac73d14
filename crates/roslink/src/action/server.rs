// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 roslink contributors

//! Action server: accepts goals and drives them to a terminal status.
//!
//! Three publications (`status`, `feedback`, `result`) and two
//! subscriptions (`goal`, `cancel`) on the action namespace. The goal
//! table lives behind one lock; the periodic status tick takes a snapshot
//! of every status AND prunes expired terminal handles in the same locked
//! pass, so broadcast and garbage collection always observe the same
//! table.
//!
//! Cancellation quirks handled here:
//! - a cancel naming a goal the server has not seen yet creates a
//!   placeholder handle in `Recalling`, so the goal is recalled the moment
//!   it arrives;
//! - a cancel without a goal id addresses goals by stamp: everything at or
//!   before the given stamp, or everything the server knows when the
//!   cancel carries no stamp at all.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::config::ActionServerConfig;
use crate::error::Result;
use crate::msg::Message;
use crate::node::{Node, Publisher, Subscriber};
use crate::sync::ShutdownToken;

use super::msgs::{
    CancelRequest, FeedbackAction, GoalAction, GoalState, GoalStatus, ResultAction, Stamp,
    StatusArray,
};
use super::server_goal_handle::ServerGoalHandle;

type GoalCb<G, R, F> = Box<dyn Fn(Arc<ServerGoalHandle<G, R, F>>) + Send + Sync>;
type CancelCb<G, R, F> = Box<dyn Fn(Arc<ServerGoalHandle<G, R, F>>) + Send + Sync>;

/// Shared server state reachable from goal handles and subscriptions.
pub(crate) struct ServerInner<G, R, F>
where
    G: Message,
    R: Message,
    F: Message,
{
    started: AtomicBool,
    goals: Mutex<HashMap<String, Arc<ServerGoalHandle<G, R, F>>>>,
    goal_cb: Mutex<Option<GoalCb<G, R, F>>>,
    cancel_cb: Mutex<Option<CancelCb<G, R, F>>>,
    result_pub: Publisher<ResultAction<R>>,
    feedback_pub: Publisher<FeedbackAction<F>>,
    status_pub: Publisher<StatusArray>,
    config: ActionServerConfig,
    weak_self: Mutex<std::sync::Weak<Self>>,
}

impl<G, R, F> ServerInner<G, R, F>
where
    G: Message,
    R: Message,
    F: Message,
{
    fn weak(&self) -> std::sync::Weak<Self> {
        self.weak_self.lock().clone()
    }

    /// Broadcast every tracked status and prune handles whose terminal
    /// age exceeds the retention window - one atomic pass over the table.
    pub(crate) fn publish_status_and_gc(&self) {
        let statuses: Vec<GoalStatus> = {
            let mut goals = self.goals.lock();
            let snapshot = goals.values().map(|h| h.status()).collect();

            let retention = self.config.status_list_timeout;
            let now = std::time::Instant::now();
            goals.retain(|_, handle| match handle.destruction_instant() {
                Some(eligible_since) => now.duration_since(eligible_since) <= retention,
                None => true,
            });

            snapshot
        };

        let array = StatusArray {
            stamp: Stamp::now(),
            statuses,
        };
        if let Err(e) = self.status_pub.publish(&array) {
            crate::debug!("status broadcast failed: {}", e);
        }
    }

    /// Publish a result message, then refresh the status broadcast.
    pub(crate) fn publish_result(&self, status: GoalStatus, result: Option<R>) -> Result<()> {
        crate::debug!(
            "publishing result for goal [{}] in state {}",
            status.goal_id.id,
            status.state
        );
        self.result_pub.publish(&ResultAction {
            stamp: Stamp::now(),
            status,
            result,
        })?;
        self.publish_status_and_gc();
        Ok(())
    }

    /// Publish a feedback message for a tracked goal.
    pub(crate) fn publish_feedback(&self, status: GoalStatus, feedback: F) -> Result<()> {
        self.feedback_pub.publish(&FeedbackAction {
            stamp: Stamp::now(),
            status,
            feedback,
        })
    }

    fn on_goal(&self, action_goal: GoalAction<G>) {
        if !self.started.load(Ordering::Acquire) {
            return;
        }
        crate::debug!("received goal [{}]", action_goal.goal_id.id);

        enum Disposition<H> {
            Recalled(H),
            Fresh(H),
            Duplicate,
        }

        let disposition = {
            let mut goals = self.goals.lock();
            match goals.get(&action_goal.goal_id.id) {
                Some(existing) => {
                    // A cancel may have arrived before its goal; the
                    // placeholder recalls the goal on sight.
                    if existing.state() == GoalState::Recalling {
                        existing.force_state(GoalState::Recalled, "recalled before execution");
                        Disposition::Recalled(Arc::clone(existing))
                    } else {
                        Disposition::Duplicate
                    }
                }
                None => {
                    let handle = Arc::new(ServerGoalHandle::new(
                        action_goal.goal_id.clone(),
                        Some(action_goal.goal),
                        GoalState::Pending,
                        self.weak(),
                    ));
                    goals.insert(action_goal.goal_id.id.clone(), Arc::clone(&handle));
                    Disposition::Fresh(handle)
                }
            }
        };

        match disposition {
            Disposition::Recalled(handle) => {
                // Empty result: the goal never ran
                if let Err(e) = self.publish_result(handle.status(), None) {
                    crate::warn!("failed to publish recall result: {}", e);
                }
            }
            Disposition::Fresh(handle) => {
                if let Some(cb) = self.goal_cb.lock().as_ref() {
                    cb(handle);
                }
            }
            Disposition::Duplicate => {}
        }
    }

    fn on_cancel(&self, request: CancelRequest) {
        if !self.started.load(Ordering::Acquire) {
            return;
        }
        crate::debug!("received cancel request {:?}", request);

        let mut to_notify: Vec<Arc<ServerGoalHandle<G, R, F>>> = Vec::new();

        {
            let mut goals = self.goals.lock();
            match &request.id {
                // Stamp-addressed cancel: everything at or before the
                // cutoff, or everything when no cutoff is given.
                None => {
                    for handle in goals.values() {
                        let matches = match request.stamp {
                            Some(cutoff) => handle.goal_id().stamp <= cutoff,
                            None => true,
                        };
                        if matches && handle.set_cancel_requested() {
                            to_notify.push(Arc::clone(handle));
                        }
                    }
                }
                Some(id) => match goals.get(id) {
                    Some(handle) => {
                        if handle.set_cancel_requested() {
                            to_notify.push(Arc::clone(handle));
                        }
                    }
                    None => {
                        // Goal not seen yet: leave a recalling placeholder
                        // so its eventual arrival is recalled immediately.
                        let placeholder = Arc::new(ServerGoalHandle::new(
                            super::msgs::GoalId {
                                id: id.clone(),
                                stamp: request.stamp.unwrap_or_default(),
                            },
                            None,
                            GoalState::Recalling,
                            self.weak(),
                        ));
                        // Placeholders are GC-eligible from birth; one
                        // whose goal never shows up must not live forever.
                        placeholder.mark_for_destruction();
                        goals.insert(id.clone(), placeholder);
                    }
                },
            }
        }

        for handle in to_notify {
            if let Some(cb) = self.cancel_cb.lock().as_ref() {
                cb(handle);
            }
        }
    }
}

/// Acceptor half of the action protocol.
pub struct ActionServer<G, R, F>
where
    G: Message,
    R: Message,
    F: Message,
{
    action_name: String,
    inner: Arc<ServerInner<G, R, F>>,
    own: ShutdownToken,
    tick: Mutex<Option<JoinHandle<()>>>,
    _goal_sub: Subscriber<GoalAction<G>>,
    _cancel_sub: Subscriber<CancelRequest>,
}

impl<G, R, F> ActionServer<G, R, F>
where
    G: Message,
    R: Message,
    F: Message,
{
    /// Wire the five action topics onto `node` under `action_name` and
    /// start the status tick. Goals are refused until [`Self::start`].
    pub fn new(node: &Node, action_name: &str, config: ActionServerConfig) -> Result<Self> {
        let depth = config.queue_depth;
        let result_pub =
            node.advertise::<ResultAction<R>>(&format!("{}/result", action_name), depth, false)?;
        let feedback_pub = node
            .advertise::<FeedbackAction<F>>(&format!("{}/feedback", action_name), depth, false)?;
        let status_pub =
            node.advertise::<StatusArray>(&format!("{}/status", action_name), depth, false)?;

        let inner = Arc::new(ServerInner {
            started: AtomicBool::new(false),
            goals: Mutex::new(HashMap::new()),
            goal_cb: Mutex::new(None),
            cancel_cb: Mutex::new(None),
            result_pub,
            feedback_pub,
            status_pub,
            config: config.clone(),
            weak_self: Mutex::new(std::sync::Weak::new()),
        });
        *inner.weak_self.lock() = Arc::downgrade(&inner);

        let st = Arc::clone(&inner);
        let goal_sub = node.subscribe::<GoalAction<G>, _>(
            &format!("{}/goal", action_name),
            depth,
            move |goal| st.on_goal(goal),
        )?;

        let st = Arc::clone(&inner);
        let cancel_sub = node.subscribe::<CancelRequest, _>(
            &format!("{}/cancel", action_name),
            depth,
            move |request| st.on_cancel(request),
        )?;

        let own = ShutdownToken::new();
        let node_token = node.shutdown_token();
        let ticker = Arc::clone(&inner);
        let tick_token = own.clone();
        let interval = config.status_interval();
        #[allow(clippy::expect_used)] // thread spawn failure is unrecoverable
        let tick = std::thread::Builder::new()
            .name("roslink-action-status".to_string())
            .spawn(move || loop {
                if tick_token.wait_timeout(interval) || node_token.is_triggered() {
                    break;
                }
                if ticker.started.load(Ordering::Acquire) {
                    ticker.publish_status_and_gc();
                }
            })
            .expect("failed to spawn action status tick thread");

        Ok(Self {
            action_name: action_name.to_string(),
            inner,
            own,
            tick: Mutex::new(Some(tick)),
            _goal_sub: goal_sub,
            _cancel_sub: cancel_sub,
        })
    }

    /// Action namespace.
    pub fn action_name(&self) -> &str {
        &self.action_name
    }

    /// Callback invoked for every freshly accepted goal.
    pub fn register_goal_callback(
        &self,
        callback: impl Fn(Arc<ServerGoalHandle<G, R, F>>) + Send + Sync + 'static,
    ) {
        *self.inner.goal_cb.lock() = Some(Box::new(callback));
    }

    /// Callback invoked when a tracked goal moves into a cancelling state.
    pub fn register_cancel_callback(
        &self,
        callback: impl Fn(Arc<ServerGoalHandle<G, R, F>>) + Send + Sync + 'static,
    ) {
        *self.inner.cancel_cb.lock() = Some(Box::new(callback));
    }

    /// Begin accepting goals and broadcasting status.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.publish_status_and_gc();
        crate::info!("action server [{}] started", self.action_name);
    }

    /// Goals currently tracked (including terminal ones within the
    /// retention window).
    pub fn goal_count(&self) -> usize {
        self.inner.goals.lock().len()
    }

    /// Status of a tracked goal, if present.
    pub fn goal_status(&self, id: &str) -> Option<GoalStatus> {
        self.inner.goals.lock().get(id).map(|h| h.status())
    }

    /// Stop the status tick and refuse further goals. Idempotent.
    pub fn shutdown(&self) {
        self.inner.started.store(false, Ordering::Release);
        self.own.trigger();
        let tick = self.tick.lock().take();
        if let Some(tick) = tick {
            let _ = tick.join();
        }
    }
}

impl<G, R, F> Drop for ActionServer<G, R, F>
where
    G: Message,
    R: Message,
    F: Message,
{
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
    use crate::action::msgs::GoalId;
    use crate::action::testing::{TestFeedback, TestGoal, TestResult};
    use crate::error::Error;
    use crate::master::StaticMaster;
    use crate::node::Node;
    use std::time::Duration;

    type Server = ActionServer<TestGoal, TestResult, TestFeedback>;
    type Handle = ServerGoalHandle<TestGoal, TestResult, TestFeedback>;

    struct Fixture {
        _node: Arc<Node>,
        server: Server,
        accepted: Arc<Mutex<Vec<Arc<Handle>>>>,
        cancelled: Arc<Mutex<Vec<Arc<Handle>>>>,
    }

    fn fixture_with_config(config: ActionServerConfig) -> Fixture {
        let master = Arc::new(StaticMaster::new());
        let node = Node::builder("/action_server_test")
            .master(master)
            .build()
            .unwrap();

        let server = Server::new(&node, "/fib", config).unwrap();

        let accepted = Arc::new(Mutex::new(Vec::new()));
        let cancelled = Arc::new(Mutex::new(Vec::new()));

        let a = Arc::clone(&accepted);
        server.register_goal_callback(move |handle| a.lock().push(handle));
        let c = Arc::clone(&cancelled);
        server.register_cancel_callback(move |handle| c.lock().push(handle));

        server.start();
        Fixture {
            _node: node,
            server,
            accepted,
            cancelled,
        }
    }

    fn fixture() -> Fixture {
        fixture_with_config(ActionServerConfig::default())
    }

    fn goal(id: &str, sec: u32) -> GoalAction<TestGoal> {
        let stamp = Stamp { sec, nsec: 0 };
        GoalAction {
            stamp,
            goal_id: GoalId {
                id: id.to_string(),
                stamp,
            },
            goal: TestGoal(sec),
        }
    }

    #[test]
    fn test_goal_creates_pending_handle() {
        let f = fixture();
        f.server.inner.on_goal(goal("g1", 10));

        assert_eq!(f.server.goal_count(), 1);
        assert_eq!(
            f.server.goal_status("g1").unwrap().state,
            GoalState::Pending
        );
        assert_eq!(f.accepted.lock().len(), 1);
        assert_eq!(f.accepted.lock()[0].goal(), Some(&TestGoal(10)));
    }

    #[test]
    fn test_duplicate_goal_ignored() {
        let f = fixture();
        f.server.inner.on_goal(goal("g1", 10));
        f.server.inner.on_goal(goal("g1", 10));

        assert_eq!(f.server.goal_count(), 1);
        assert_eq!(f.accepted.lock().len(), 1);
    }

    #[test]
    fn test_goal_before_start_refused() {
        let master = Arc::new(StaticMaster::new());
        let node = Node::builder("/unstarted").master(master).build().unwrap();
        let server = Server::new(&node, "/fib", ActionServerConfig::default()).unwrap();

        server.inner.on_goal(goal("g1", 10));
        assert_eq!(server.goal_count(), 0);
    }

    #[test]
    fn test_cancel_before_goal_recalls_on_arrival() {
        let f = fixture();

        // Cancel names a goal the server has never seen
        f.server.inner.on_cancel(CancelRequest::for_goal("g9"));
        assert_eq!(
            f.server.goal_status("g9").unwrap().state,
            GoalState::Recalling
        );

        // When the goal finally arrives it is recalled, not accepted
        f.server.inner.on_goal(goal("g9", 10));
        assert_eq!(
            f.server.goal_status("g9").unwrap().state,
            GoalState::Recalled
        );
        assert!(f.accepted.lock().is_empty());
    }

    #[test]
    fn test_cancel_all_without_stamp() {
        let f = fixture();
        f.server.inner.on_goal(goal("g1", 10));
        f.server.inner.on_goal(goal("g2", 20));

        f.server.inner.on_cancel(CancelRequest::all());

        assert_eq!(
            f.server.goal_status("g1").unwrap().state,
            GoalState::Recalling
        );
        assert_eq!(
            f.server.goal_status("g2").unwrap().state,
            GoalState::Recalling
        );
        assert_eq!(f.cancelled.lock().len(), 2);
    }

    #[test]
    fn test_cancel_before_stamp_spares_newer_goals() {
        let f = fixture();
        f.server.inner.on_goal(goal("g1", 10));
        f.server.inner.on_goal(goal("g2", 20));

        f.server
            .inner
            .on_cancel(CancelRequest::before(Stamp { sec: 15, nsec: 0 }));

        assert_eq!(
            f.server.goal_status("g1").unwrap().state,
            GoalState::Recalling
        );
        assert_eq!(
            f.server.goal_status("g2").unwrap().state,
            GoalState::Pending
        );
        assert_eq!(f.cancelled.lock().len(), 1);
    }

    #[test]
    fn test_cancel_running_goal_preempts() {
        let f = fixture();
        f.server.inner.on_goal(goal("g1", 10));
        f.accepted.lock()[0].set_accepted("working").unwrap();

        f.server.inner.on_cancel(CancelRequest::for_goal("g1"));
        assert_eq!(
            f.server.goal_status("g1").unwrap().state,
            GoalState::Preempting
        );
    }

    #[test]
    fn test_accept_and_succeed() {
        let f = fixture();
        f.server.inner.on_goal(goal("g1", 10));

        let handle = f.accepted.lock()[0].clone();
        handle.set_accepted("executing").unwrap();
        assert_eq!(handle.state(), GoalState::Active);

        handle.set_succeeded(Some(TestResult(55)), "done").unwrap();
        assert_eq!(handle.state(), GoalState::Succeeded);
    }

    #[test]
    fn test_illegal_transition_is_typed_rejection() {
        let f = fixture();
        f.server.inner.on_goal(goal("g1", 10));
        let handle = f.accepted.lock()[0].clone();

        // Succeeding a goal that never started is acceptor misuse
        let err = handle.set_succeeded(None, "nope").unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        assert_eq!(handle.state(), GoalState::Pending);
    }

    #[test]
    fn test_accept_recalling_goal_preempts() {
        let f = fixture();
        f.server.inner.on_goal(goal("g1", 10));
        f.server.inner.on_cancel(CancelRequest::for_goal("g1"));

        let handle = f.accepted.lock()[0].clone();
        assert_eq!(handle.state(), GoalState::Recalling);
        handle.set_accepted("accept crossed the cancel").unwrap();
        assert_eq!(handle.state(), GoalState::Preempting);
    }

    #[test]
    fn test_status_tick_prunes_expired_terminal_goals() {
        let f = fixture_with_config(ActionServerConfig {
            status_list_timeout: Duration::from_millis(30),
            ..ActionServerConfig::default()
        });
        f.server.inner.on_goal(goal("g1", 10));

        let handle = f.accepted.lock()[0].clone();
        handle.set_accepted("go").unwrap();
        handle.set_succeeded(None, "done").unwrap();

        // Still within retention
        f.server.inner.publish_status_and_gc();
        assert_eq!(f.server.goal_count(), 1);

        std::thread::sleep(Duration::from_millis(60));
        f.server.inner.publish_status_and_gc();
        assert_eq!(f.server.goal_count(), 0);
    }

    #[test]
    fn test_non_terminal_goal_never_pruned() {
        let f = fixture_with_config(ActionServerConfig {
            status_list_timeout: Duration::from_millis(10),
            ..ActionServerConfig::default()
        });
        f.server.inner.on_goal(goal("g1", 10));

        std::thread::sleep(Duration::from_millis(40));
        f.server.inner.publish_status_and_gc();
        assert_eq!(f.server.goal_count(), 1);
    }
}
