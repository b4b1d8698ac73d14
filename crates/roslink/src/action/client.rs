// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 roslink contributors

//! Action client: sends goals and tracks them to their terminal verdict.
//!
//! Built entirely out of plain topics - two publications (`goal`,
//! `cancel`) and three subscriptions (`status`, `feedback`, `result`)
//! suffixed onto the action namespace. The client never touches sockets;
//! its callbacks arrive through the node's dispatch queue like anyone
//! else's.
//!
//! Loss detection is two-fold: a cancel that is never acknowledged within
//! the configured timeout declares the goal lost, and a goal that vanishes
//! from several consecutive status broadcasts after having been
//! acknowledged does the same.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{ActionClientConfig, STATUS_MISSING_LIMIT};
use crate::error::Result;
use crate::msg::Message;
use crate::node::{Node, Publisher, Subscriber};

use super::client_goal_handle::ClientGoalHandle;
use super::msgs::{
    CancelRequest, FeedbackAction, GoalAction, GoalId, ResultAction, Stamp, StatusArray,
};

type TransitionCb<G, R, F> = Box<dyn Fn(&ClientGoalHandle<G, R, F>) + Send + Sync>;
type FeedbackCb<G, R, F> =
    Box<dyn Fn(&ClientGoalHandle<G, R, F>, &FeedbackAction<F>) + Send + Sync>;

/// Shared routing state: the goal table plus what the subscriptions need.
struct ClientState<G, R, F>
where
    G: Message,
    R: Message + Clone,
    F: Message,
{
    goals: Mutex<HashMap<String, Arc<ClientGoalHandle<G, R, F>>>>,
    /// Set as soon as any status broadcast arrives: the server exists.
    server_seen: AtomicBool,
}

impl<G, R, F> ClientState<G, R, F>
where
    G: Message,
    R: Message + Clone,
    F: Message,
{
    fn on_status(&self, array: &StatusArray) {
        self.server_seen.store(true, Ordering::Release);

        let handles: Vec<Arc<ClientGoalHandle<G, R, F>>> =
            self.goals.lock().values().cloned().collect();

        for handle in handles {
            match array
                .statuses
                .iter()
                .find(|s| s.goal_id.id == handle.id())
            {
                Some(status) => handle.update_status(status),
                None => {
                    if handle.note_status_absent(STATUS_MISSING_LIMIT) {
                        crate::warn!(
                            "goal [{}] missing from {} consecutive status broadcasts; \
                             treating it as lost",
                            handle.id(),
                            STATUS_MISSING_LIMIT
                        );
                        handle.process_lost();
                    }
                }
            }
        }
    }

    fn on_feedback(&self, feedback: &FeedbackAction<F>) {
        let handle = self
            .goals
            .lock()
            .get(&feedback.status.goal_id.id)
            .cloned();
        // Feedback never changes state; only status broadcasts and the
        // result message drive transitions.
        if let Some(handle) = handle {
            handle.fire_feedback(feedback);
        }
    }

    fn on_result(&self, result: ResultAction<R>) {
        let handle = self.goals.lock().get(&result.status.goal_id.id).cloned();
        if let Some(handle) = handle {
            handle.update_result(result);
        }
    }
}

/// Requester half of the action protocol.
pub struct ActionClient<G, R, F>
where
    G: Message,
    R: Message + Clone,
    F: Message,
{
    action_name: String,
    caller_id: String,
    config: ActionClientConfig,
    goal_pub: Publisher<GoalAction<G>>,
    cancel_pub: Publisher<CancelRequest>,
    state: Arc<ClientState<G, R, F>>,
    seq: AtomicU64,
    token: crate::sync::ShutdownToken,
    _status_sub: Subscriber<StatusArray>,
    _feedback_sub: Subscriber<FeedbackAction<F>>,
    _result_sub: Subscriber<ResultAction<R>>,
}

impl<G, R, F> ActionClient<G, R, F>
where
    G: Message,
    R: Message + Clone,
    F: Message,
{
    /// Wire the five action topics onto `node` under `action_name`.
    pub fn new(node: &Node, action_name: &str, config: ActionClientConfig) -> Result<Self> {
        let depth = config.queue_depth;
        let goal_pub =
            node.advertise::<GoalAction<G>>(&format!("{}/goal", action_name), depth, false)?;
        let cancel_pub =
            node.advertise::<CancelRequest>(&format!("{}/cancel", action_name), depth, false)?;

        let state = Arc::new(ClientState {
            goals: Mutex::new(HashMap::new()),
            server_seen: AtomicBool::new(false),
        });

        let st = Arc::clone(&state);
        let status_sub = node.subscribe::<StatusArray, _>(
            &format!("{}/status", action_name),
            depth,
            move |array| st.on_status(&array),
        )?;

        let st = Arc::clone(&state);
        let feedback_sub = node.subscribe::<FeedbackAction<F>, _>(
            &format!("{}/feedback", action_name),
            depth,
            move |feedback| st.on_feedback(&feedback),
        )?;

        let st = Arc::clone(&state);
        let result_sub = node.subscribe::<ResultAction<R>, _>(
            &format!("{}/result", action_name),
            depth,
            move |result| st.on_result(result),
        )?;

        Ok(Self {
            action_name: action_name.to_string(),
            caller_id: node.name().to_string(),
            config,
            goal_pub,
            cancel_pub,
            state,
            seq: AtomicU64::new(0),
            token: node.shutdown_token(),
            _status_sub: status_sub,
            _feedback_sub: feedback_sub,
            _result_sub: result_sub,
        })
    }

    /// Action namespace.
    pub fn action_name(&self) -> &str {
        &self.action_name
    }

    /// Send a goal; the returned handle tracks it to its verdict.
    pub fn send_goal(
        &self,
        goal: G,
        transition_cb: Option<TransitionCb<G, R, F>>,
        feedback_cb: Option<FeedbackCb<G, R, F>>,
    ) -> Result<Arc<ClientGoalHandle<G, R, F>>> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let stamp = Stamp::now();
        let goal_id = GoalId {
            id: format!("{}-{}-{}.{}", self.caller_id, seq, stamp.sec, stamp.nsec),
            stamp,
        };

        let handle = Arc::new(ClientGoalHandle::new(
            GoalAction {
                stamp,
                goal_id: goal_id.clone(),
                goal,
            },
            self.goal_pub.clone(),
            self.cancel_pub.clone(),
            self.config.cancel_ack_timeout,
            self.token.clone(),
            transition_cb,
            feedback_cb,
        ));

        self.state
            .goals
            .lock()
            .insert(goal_id.id.clone(), Arc::clone(&handle));
        self.goal_pub.publish(handle.goal_action())?;

        crate::debug!("sent goal [{}] on [{}]", goal_id.id, self.action_name);
        Ok(handle)
    }

    /// Cancel every goal the server is tracking.
    pub fn cancel_all_goals(&self) -> Result<()> {
        self.cancel_pub.publish(&CancelRequest::all())
    }

    /// Cancel every goal stamped at or before `stamp`.
    pub fn cancel_goals_before(&self, stamp: Stamp) -> Result<()> {
        self.cancel_pub.publish(&CancelRequest::before(stamp))
    }

    /// Has any status broadcast been seen yet?
    pub fn server_seen(&self) -> bool {
        self.state.server_seen.load(Ordering::Acquire)
    }

    /// Wait until the server's status broadcasts show up.
    pub fn wait_for_server(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.server_seen() {
            if Instant::now() >= deadline || self.token.wait_timeout(Duration::from_millis(20)) {
                return self.server_seen();
            }
        }
        true
    }

    /// Outstanding (non-reset) goal handles.
    pub fn tracked_goals(&self) -> usize {
        self.state.goals.lock().len()
    }

    /// Deactivate every handle and drop the table. The subscriptions die
    /// with the client value itself.
    pub fn shutdown(&self) {
        let handles: Vec<_> = self.state.goals.lock().drain().map(|(_, h)| h).collect();
        for handle in handles {
            handle.reset();
        }
    }
}

impl<G, R, F> Drop for ActionClient<G, R, F>
where
    G: Message,
    R: Message + Clone,
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
    use crate::action::client_goal_handle::CommState;
    use crate::action::msgs::{GoalState, GoalStatus};
    use crate::action::testing::{TestFeedback, TestGoal, TestResult};
    use crate::action::GoalOutcome;
    use crate::master::StaticMaster;
    use crate::node::Node;

    type Client = ActionClient<TestGoal, TestResult, TestFeedback>;

    fn client() -> (Arc<Node>, Client) {
        let master = Arc::new(StaticMaster::new());
        let node = Node::builder("/client_test").master(master).build().unwrap();
        let client = Client::new(&node, "/fib", ActionClientConfig::default()).unwrap();
        (node, client)
    }

    fn array_with(statuses: Vec<GoalStatus>) -> StatusArray {
        StatusArray {
            stamp: Stamp::now(),
            statuses,
        }
    }

    #[test]
    fn test_goal_ids_are_unique() {
        let (_node, client) = client();
        let g1 = client.send_goal(TestGoal(1), None, None).unwrap();
        let g2 = client.send_goal(TestGoal(1), None, None).unwrap();
        assert_ne!(g1.id(), g2.id());
        assert_eq!(client.tracked_goals(), 2);
    }

    #[test]
    fn test_status_routing_by_goal_id() {
        let (_node, client) = client();
        let g1 = client.send_goal(TestGoal(1), None, None).unwrap();
        let g2 = client.send_goal(TestGoal(2), None, None).unwrap();

        client.state.on_status(&array_with(vec![GoalStatus::new(
            g1.goal_action().goal_id.clone(),
            GoalState::Active,
        )]));

        assert_eq!(g1.comm_state(), CommState::Active);
        // g2 was absent but not yet acked, so it merely stays waiting
        assert_eq!(g2.comm_state(), CommState::WaitingForGoalAck);
    }

    #[test]
    fn test_goal_absent_from_enough_broadcasts_is_lost() {
        let (_node, client) = client();
        let goal = client.send_goal(TestGoal(1), None, None).unwrap();

        // Server acks the goal once...
        client.state.on_status(&array_with(vec![GoalStatus::new(
            goal.goal_action().goal_id.clone(),
            GoalState::Active,
        )]));
        assert_eq!(goal.comm_state(), CommState::Active);

        // ...then keeps broadcasting without it
        for _ in 0..STATUS_MISSING_LIMIT {
            client.state.on_status(&array_with(vec![]));
        }

        assert_eq!(goal.comm_state(), CommState::Done);
        assert!(matches!(
            goal.try_outcome().unwrap().as_ref(),
            GoalOutcome::Lost
        ));
    }

    #[test]
    fn test_server_seen_flag() {
        let (_node, client) = client();
        assert!(!client.server_seen());
        client.state.on_status(&array_with(vec![]));
        assert!(client.server_seen());
    }

    #[test]
    fn test_shutdown_deactivates_handles() {
        let (_node, client) = client();
        let goal = client.send_goal(TestGoal(1), None, None).unwrap();
        client.shutdown();
        assert!(!goal.is_active());
        assert_eq!(client.tracked_goals(), 0);
    }
}
