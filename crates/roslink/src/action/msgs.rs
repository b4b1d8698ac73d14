// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 roslink contributors

//! Wire types of the action protocol.
//!
//! The five action topics carry envelope messages that wrap the
//! user-defined goal/feedback/result payloads with goal identity and
//! status. The envelopes implement [`Message`] by hand, deriving their
//! type names and checksums from the wrapped type's so both ends of a
//! topic agree without a code generator in the loop.

use crate::error::{Error, Result};
use crate::msg::{Message, WireReader, WireWriter};

// ============================================================================
// Time stamp
// ============================================================================

/// Wall-clock timestamp carried in goal ids and headers.
///
/// The all-zero stamp is reserved on the wire for "no timestamp"; decoded
/// optional stamps map it to `None` rather than treating the epoch as a
/// magic value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Stamp {
    /// Seconds since the UNIX epoch
    pub sec: u32,
    /// Nanoseconds within the second
    pub nsec: u32,
}

impl Stamp {
    /// Current wall-clock time.
    pub fn now() -> Self {
        let since_epoch = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            sec: since_epoch.as_secs() as u32,
            nsec: since_epoch.subsec_nanos(),
        }
    }

    /// The reserved "no timestamp" value.
    pub fn is_zero(self) -> bool {
        self.sec == 0 && self.nsec == 0
    }

    fn write(self, w: &mut WireWriter<'_>) {
        w.put_u32(self.sec);
        w.put_u32(self.nsec);
    }

    fn read(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            sec: r.get_u32()?,
            nsec: r.get_u32()?,
        })
    }
}

// ============================================================================
// Goal identity and status
// ============================================================================

/// Unique identity of one goal: id string plus creation stamp.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GoalId {
    /// Globally unique, time-stamped id string
    pub id: String,
    /// When the goal was created
    pub stamp: Stamp,
}

impl GoalId {
    fn write(&self, w: &mut WireWriter<'_>) {
        self.stamp.write(w);
        w.put_string(&self.id);
    }

    fn read(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            stamp: Stamp::read(r)?,
            id: r.get_string()?,
        })
    }
}

/// Server-reported status code of a goal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum GoalState {
    /// Accepted into the queue, not yet running
    Pending = 0,
    /// Currently executing
    Active = 1,
    /// Cancelled after it started executing
    Preempted = 2,
    /// Completed successfully
    Succeeded = 3,
    /// Failed during execution
    Aborted = 4,
    /// Refused without being executed
    Rejected = 5,
    /// Cancel requested while executing, not yet confirmed
    Preempting = 6,
    /// Cancel requested before execution, not yet confirmed
    Recalling = 7,
    /// Cancelled before it started executing
    Recalled = 8,
    /// Client-side verdict: the server stopped reporting this goal
    Lost = 9,
}

impl GoalState {
    /// No further status changes happen past these.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            GoalState::Preempted
                | GoalState::Succeeded
                | GoalState::Aborted
                | GoalState::Rejected
                | GoalState::Recalled
                | GoalState::Lost
        )
    }

    fn from_u8(v: u8) -> Result<Self> {
        Ok(match v {
            0 => GoalState::Pending,
            1 => GoalState::Active,
            2 => GoalState::Preempted,
            3 => GoalState::Succeeded,
            4 => GoalState::Aborted,
            5 => GoalState::Rejected,
            6 => GoalState::Preempting,
            7 => GoalState::Recalling,
            8 => GoalState::Recalled,
            9 => GoalState::Lost,
            other => return Err(Error::Decode(format!("unknown goal state code {}", other))),
        })
    }
}

impl std::fmt::Display for GoalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            GoalState::Pending => "PENDING",
            GoalState::Active => "ACTIVE",
            GoalState::Preempted => "PREEMPTED",
            GoalState::Succeeded => "SUCCEEDED",
            GoalState::Aborted => "ABORTED",
            GoalState::Rejected => "REJECTED",
            GoalState::Preempting => "PREEMPTING",
            GoalState::Recalling => "RECALLING",
            GoalState::Recalled => "RECALLED",
            GoalState::Lost => "LOST",
        };
        write!(f, "{}", s)
    }
}

/// One goal's status record as broadcast in the status array.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GoalStatus {
    /// Which goal this is about
    pub goal_id: GoalId,
    /// Current status code
    pub state: GoalState,
    /// Human-readable annotation from the server
    pub text: String,
}

impl GoalStatus {
    /// Status record for a goal in the given state with empty text.
    pub fn new(goal_id: GoalId, state: GoalState) -> Self {
        Self {
            goal_id,
            state,
            text: String::new(),
        }
    }

    fn write(&self, w: &mut WireWriter<'_>) {
        self.goal_id.write(w);
        w.put_u8(self.state as u8);
        w.put_string(&self.text);
    }

    fn read(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            goal_id: GoalId::read(r)?,
            state: GoalState::from_u8(r.get_u8()?)?,
            text: r.get_string()?,
        })
    }
}

// ============================================================================
// Status array (server -> client, periodic)
// ============================================================================

/// Periodic broadcast of the server's whole goal table.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatusArray {
    /// When the snapshot was taken
    pub stamp: Stamp,
    /// One record per tracked goal
    pub statuses: Vec<GoalStatus>,
}

impl Message for StatusArray {
    fn data_type() -> String {
        "actionlib_msgs/GoalStatusArray".to_string()
    }

    fn md5sum() -> String {
        "2cb8a7b9c8b06d9d4a537556ea441c45".to_string()
    }

    fn serialize(&self, buf: &mut Vec<u8>) {
        let mut w = WireWriter::new(buf);
        self.stamp.write(&mut w);
        w.put_u32(self.statuses.len() as u32);
        for status in &self.statuses {
            status.write(&mut w);
        }
    }

    fn deserialize(bytes: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(bytes);
        let stamp = Stamp::read(&mut r)?;
        let count = r.get_u32()? as usize;
        let mut statuses = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            statuses.push(GoalStatus::read(&mut r)?);
        }
        Ok(Self { stamp, statuses })
    }
}

// ============================================================================
// Cancel request (client -> server)
// ============================================================================

/// Cancel request for one goal or a stamped/unbounded set of goals.
///
/// `id: None` addresses goals by stamp instead of identity: every goal
/// stamped at or before `stamp`, or every goal the server knows when no
/// stamp is given. The zero id and zero stamp on the wire map to `None`
/// here - "absent" is modeled, not encoded as an epoch timestamp.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CancelRequest {
    /// Specific goal to cancel, or `None` for stamp-based matching
    pub id: Option<String>,
    /// Cutoff stamp for `id: None`, or the cancel's own stamp
    pub stamp: Option<Stamp>,
}

impl CancelRequest {
    /// Cancel exactly one goal.
    pub fn for_goal(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            stamp: None,
        }
    }

    /// Cancel everything the server is tracking.
    pub fn all() -> Self {
        Self::default()
    }

    /// Cancel every goal stamped at or before `stamp`.
    pub fn before(stamp: Stamp) -> Self {
        Self {
            id: None,
            stamp: Some(stamp),
        }
    }
}

impl Message for CancelRequest {
    fn data_type() -> String {
        "actionlib_msgs/GoalID".to_string()
    }

    fn md5sum() -> String {
        "6a16fdc7fb8d68f8ea163086a9bbcb85".to_string()
    }

    fn serialize(&self, buf: &mut Vec<u8>) {
        let mut w = WireWriter::new(buf);
        self.stamp.unwrap_or_default().write(&mut w);
        w.put_string(self.id.as_deref().unwrap_or(""));
    }

    fn deserialize(bytes: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(bytes);
        let stamp = Stamp::read(&mut r)?;
        let id = r.get_string()?;
        Ok(Self {
            id: if id.is_empty() { None } else { Some(id) },
            stamp: if stamp.is_zero() { None } else { Some(stamp) },
        })
    }
}

// ============================================================================
// Envelopes wrapping user payloads
// ============================================================================

/// Goal envelope (client -> server).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GoalAction<G> {
    /// Send time
    pub stamp: Stamp,
    /// Identity assigned by the client
    pub goal_id: GoalId,
    /// User-defined goal payload
    pub goal: G,
}

impl<G: Message> Message for GoalAction<G> {
    fn data_type() -> String {
        format!("{}ActionGoal", G::data_type())
    }

    fn md5sum() -> String {
        format!("goal:{}", G::md5sum())
    }

    fn serialize(&self, buf: &mut Vec<u8>) {
        let mut w = WireWriter::new(buf);
        self.stamp.write(&mut w);
        self.goal_id.write(&mut w);
        self.goal.serialize(buf);
    }

    fn deserialize(bytes: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(bytes);
        let stamp = Stamp::read(&mut r)?;
        let goal_id = GoalId::read(&mut r)?;
        let goal = G::deserialize(r.get_rest())?;
        Ok(Self {
            stamp,
            goal_id,
            goal,
        })
    }
}

/// Feedback envelope (server -> client).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeedbackAction<F> {
    /// Send time
    pub stamp: Stamp,
    /// Status of the goal the feedback belongs to
    pub status: GoalStatus,
    /// User-defined intermediate payload
    pub feedback: F,
}

impl<F: Message> Message for FeedbackAction<F> {
    fn data_type() -> String {
        format!("{}ActionFeedback", F::data_type())
    }

    fn md5sum() -> String {
        format!("feedback:{}", F::md5sum())
    }

    fn serialize(&self, buf: &mut Vec<u8>) {
        let mut w = WireWriter::new(buf);
        self.stamp.write(&mut w);
        self.status.write(&mut w);
        self.feedback.serialize(buf);
    }

    fn deserialize(bytes: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(bytes);
        let stamp = Stamp::read(&mut r)?;
        let status = GoalStatus::read(&mut r)?;
        let feedback = F::deserialize(r.get_rest())?;
        Ok(Self {
            stamp,
            status,
            feedback,
        })
    }
}

/// Result envelope (server -> client).
///
/// The result payload is optional: a recalled goal never produced one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResultAction<R> {
    /// Send time
    pub stamp: Stamp,
    /// Terminal (or terminal-bound) status of the goal
    pub status: GoalStatus,
    /// User-defined final payload, absent for empty results
    pub result: Option<R>,
}

impl<R: Message> Message for ResultAction<R> {
    fn data_type() -> String {
        format!("{}ActionResult", R::data_type())
    }

    fn md5sum() -> String {
        format!("result:{}", R::md5sum())
    }

    fn serialize(&self, buf: &mut Vec<u8>) {
        {
            let mut w = WireWriter::new(buf);
            self.stamp.write(&mut w);
            self.status.write(&mut w);
        }
        match &self.result {
            Some(result) => {
                buf.push(1);
                result.serialize(buf);
            }
            None => buf.push(0),
        }
    }

    fn deserialize(bytes: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(bytes);
        let stamp = Stamp::read(&mut r)?;
        let status = GoalStatus::read(&mut r)?;
        let result = match r.get_u8()? {
            0 => None,
            _ => Some(R::deserialize(r.get_rest())?),
        };
        Ok(Self {
            stamp,
            status,
            result,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq, Eq)]
    struct Count {
        value: u32,
    }

    impl Message for Count {
        fn data_type() -> String {
            "test_msgs/Count".to_string()
        }
        fn md5sum() -> String {
            "c0c0c0".to_string()
        }
        fn serialize(&self, buf: &mut Vec<u8>) {
            WireWriter::new(buf).put_u32(self.value);
        }
        fn deserialize(bytes: &[u8]) -> Result<Self> {
            Ok(Self {
                value: WireReader::new(bytes).get_u32()?,
            })
        }
    }

    fn goal_id(id: &str) -> GoalId {
        GoalId {
            id: id.to_string(),
            stamp: Stamp { sec: 100, nsec: 7 },
        }
    }

    #[test]
    fn test_stamp_ordering() {
        let early = Stamp { sec: 10, nsec: 0 };
        let later = Stamp { sec: 10, nsec: 1 };
        assert!(early < later);
        assert!(Stamp::default().is_zero());
        assert!(!Stamp::now().is_zero());
    }

    #[test]
    fn test_goal_state_codes() {
        assert_eq!(GoalState::Pending as u8, 0);
        assert_eq!(GoalState::Lost as u8, 9);
        assert_eq!(GoalState::from_u8(3).unwrap(), GoalState::Succeeded);
        assert!(GoalState::from_u8(42).is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(GoalState::Succeeded.is_terminal());
        assert!(GoalState::Recalled.is_terminal());
        assert!(GoalState::Lost.is_terminal());
        assert!(!GoalState::Pending.is_terminal());
        assert!(!GoalState::Preempting.is_terminal());
    }

    #[test]
    fn test_status_array_roundtrip() {
        let array = StatusArray {
            stamp: Stamp { sec: 55, nsec: 0 },
            statuses: vec![
                GoalStatus::new(goal_id("g1"), GoalState::Active),
                GoalStatus {
                    goal_id: goal_id("g2"),
                    state: GoalState::Recalling,
                    text: "cancel pending".to_string(),
                },
            ],
        };

        let bytes = crate::msg::to_bytes(&array);
        let decoded = StatusArray::deserialize(&bytes).unwrap();
        assert_eq!(decoded, array);
    }

    #[test]
    fn test_cancel_request_optional_mapping() {
        // Zero stamp and empty id on the wire decode to None
        let all = CancelRequest::all();
        let bytes = crate::msg::to_bytes(&all);
        let decoded = CancelRequest::deserialize(&bytes).unwrap();
        assert_eq!(decoded.id, None);
        assert_eq!(decoded.stamp, None);

        let one = CancelRequest::for_goal("g7");
        let decoded = CancelRequest::deserialize(&crate::msg::to_bytes(&one)).unwrap();
        assert_eq!(decoded.id.as_deref(), Some("g7"));

        let before = CancelRequest::before(Stamp { sec: 9, nsec: 1 });
        let decoded = CancelRequest::deserialize(&crate::msg::to_bytes(&before)).unwrap();
        assert_eq!(decoded.stamp, Some(Stamp { sec: 9, nsec: 1 }));
    }

    #[test]
    fn test_goal_action_roundtrip() {
        let goal = GoalAction {
            stamp: Stamp { sec: 1, nsec: 2 },
            goal_id: goal_id("g1"),
            goal: Count { value: 9 },
        };
        let decoded = GoalAction::<Count>::deserialize(&crate::msg::to_bytes(&goal)).unwrap();
        assert_eq!(decoded, goal);
        assert_eq!(
            GoalAction::<Count>::data_type(),
            "test_msgs/CountActionGoal"
        );
    }

    #[test]
    fn test_result_action_empty_result() {
        let result: ResultAction<Count> = ResultAction {
            stamp: Stamp::default(),
            status: GoalStatus::new(goal_id("g1"), GoalState::Recalled),
            result: None,
        };
        let decoded = ResultAction::<Count>::deserialize(&crate::msg::to_bytes(&result)).unwrap();
        assert_eq!(decoded.result, None);
        assert_eq!(decoded.status.state, GoalState::Recalled);
    }

    #[test]
    fn test_result_action_with_payload() {
        let result = ResultAction {
            stamp: Stamp::default(),
            status: GoalStatus::new(goal_id("g1"), GoalState::Succeeded),
            result: Some(Count { value: 123 }),
        };
        let decoded = ResultAction::<Count>::deserialize(&crate::msg::to_bytes(&result)).unwrap();
        assert_eq!(decoded.result, Some(Count { value: 123 }));
    }
}
