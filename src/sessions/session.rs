//! Chat session state.

use crate::messages::{DeliveryTarget, QueuedFragment};
use crate::values::{VariableValue, Variables};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Active,
    Completed,
    Abandoned,
    /// A human agent owns the conversation; the engine does not advance it.
    HandedOff,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Abandoned => "abandoned",
            Self::HandedOff => "handed_off",
        }
    }

    /// Completed and abandoned sessions never change again.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Completed | Self::Abandoned)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine-internal progress marker, independent of [`SessionStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    /// Created, entry step not rendered yet.
    #[default]
    Started,
    /// On a question step, waiting for a reply.
    AwaitingInput,
    /// On a pass-through step whose transitions did not resolve.
    Waiting,
    /// Reached a terminal step.
    Finished,
    /// Left the flow before a terminal step (hand-off or abandon).
    Interrupted,
}

/// A reply accepted by a question step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedResponse {
    pub step_id: String,
    pub variable: String,
    /// Reply as received.
    pub raw: String,
    /// Value stored in collected variables.
    pub value: VariableValue,
    pub received_at: DateTime<Utc>,
}

/// Runtime instance of a flow for one contact on one channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: String,
    pub contact_id: String,
    pub channel_id: String,
    pub flow_id: String,
    pub current_step_id: String,
    pub status: SessionStatus,
    pub flow_status: FlowStatus,
    /// Opaque key/value bag carried across steps.
    #[serde(default)]
    pub context: Variables,
    /// Values bound by question steps.
    #[serde(default)]
    pub collected_variables: Variables,
    /// Pending and delivered outbound fragments, oldest first.
    #[serde(default)]
    pub message_queue: Vec<QueuedFragment>,
    /// Absolute position of the next fragment to deliver.
    #[serde(default)]
    pub current_queue_position: usize,
    /// Consecutive failed attempts on the current step.
    #[serde(default)]
    pub attempt_count: u32,
    #[serde(default)]
    pub assigned_agent_id: Option<String>,
    #[serde(default)]
    pub assigned_at: Option<DateTime<Utc>>,
    /// Number of steps left behind so far.
    #[serde(default)]
    pub completed_steps: u32,
    #[serde(default)]
    pub responses: Vec<CapturedResponse>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
}

impl ChatSession {
    /// New active session positioned on `entry_step`.
    pub fn new(
        contact_id: impl Into<String>,
        channel_id: impl Into<String>,
        flow_id: impl Into<String>,
        entry_step: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            contact_id: contact_id.into(),
            channel_id: channel_id.into(),
            flow_id: flow_id.into(),
            current_step_id: entry_step.into(),
            status: SessionStatus::Active,
            flow_status: FlowStatus::Started,
            context: Variables::new(),
            collected_variables: Variables::new(),
            message_queue: Vec::new(),
            current_queue_position: 0,
            attempt_count: 0,
            assigned_agent_id: None,
            assigned_at: None,
            completed_steps: 0,
            responses: Vec::new(),
            created_at: now,
            last_activity_at: now,
            ended_at: None,
        }
    }

    /// Key used for per-conversation exclusion and lookup.
    pub fn conversation_key(&self) -> String {
        crate::messages::inbound::conversation_key(&self.contact_id, &self.channel_id)
    }

    /// Active or handed off: the session still owns the conversation.
    pub fn is_open(&self) -> bool {
        !self.status.is_final()
    }

    pub fn is_handed_off(&self) -> bool {
        self.status == SessionStatus::HandedOff
    }

    pub fn target(&self) -> DeliveryTarget {
        DeliveryTarget::new(&self.contact_id, &self.channel_id)
    }

    pub fn touch(&mut self) {
        self.last_activity_at = Utc::now();
    }

    /// Move to another step, counting the one left behind.
    ///
    /// Resets the attempt counter.
    pub fn move_to(&mut self, step_id: impl Into<String>) {
        self.current_step_id = step_id.into();
        self.completed_steps += 1;
        self.attempt_count = 0;
    }

    /// Close the session with a final status.
    pub fn finish(&mut self, status: SessionStatus, flow_status: FlowStatus) {
        self.status = status;
        self.flow_status = flow_status;
        self.ended_at = Some(Utc::now());
    }

    /// Share of the flow's steps already left behind, capped at 100.
    pub fn progress_percentage(&self, total_steps: usize) -> f64 {
        if total_steps == 0 {
            return 0.0;
        }
        let pct = f64::from(self.completed_steps) / total_steps as f64 * 100.0;
        (pct.min(100.0) * 100.0).round() / 100.0
    }

    /// Whether the session has been idle longer than `idle`.
    pub fn is_stale(&self, now: DateTime<Utc>, idle: Duration) -> bool {
        now.signed_duration_since(self.last_activity_at) > idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> ChatSession {
        ChatSession::new("+34600000000", "biz-1", "welcome", "ask_age")
    }

    #[test]
    fn test_new_session_defaults() {
        let s = session();
        assert_eq!(s.status, SessionStatus::Active);
        assert_eq!(s.flow_status, FlowStatus::Started);
        assert_eq!(s.attempt_count, 0);
        assert!(s.collected_variables.is_empty());
        assert_eq!(s.conversation_key(), "+34600000000@biz-1");
        assert!(Uuid::parse_str(&s.id).is_ok());
    }

    #[test]
    fn test_move_to_resets_attempts() {
        let mut s = session();
        s.attempt_count = 2;
        s.move_to("adult");
        assert_eq!(s.current_step_id, "adult");
        assert_eq!(s.attempt_count, 0);
        assert_eq!(s.completed_steps, 1);
    }

    #[test]
    fn test_progress_percentage() {
        let mut s = session();
        assert_eq!(s.progress_percentage(0), 0.0);
        s.completed_steps = 1;
        assert_eq!(s.progress_percentage(3), 33.33);
        s.completed_steps = 5;
        assert_eq!(s.progress_percentage(3), 100.0);
    }

    #[test]
    fn test_staleness() {
        let s = session();
        let now = s.last_activity_at + Duration::hours(25);
        assert!(s.is_stale(now, Duration::hours(24)));
        assert!(!s.is_stale(s.last_activity_at, Duration::hours(24)));
    }

    #[test]
    fn test_final_statuses() {
        let mut s = session();
        assert!(s.is_open());
        s.status = SessionStatus::HandedOff;
        assert!(s.is_open());
        s.finish(SessionStatus::Completed, FlowStatus::Finished);
        assert!(!s.is_open());
        assert!(s.ended_at.is_some());
    }

    #[test]
    fn test_serializes_camel_case() {
        let json = serde_json::to_value(session()).unwrap();
        assert!(json.get("currentQueuePosition").is_some());
        assert_eq!(json["status"], "active");
    }
}
