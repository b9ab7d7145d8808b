//! Outbound message types
//!
//! Normalized commands handed to the transport layer, and the per-fragment
//! delivery bookkeeping kept in a session's message queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a fragment carries, as far as the transport needs to know.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    /// Plain text message
    #[default]
    Text,
    /// Buttons or list reply prompt
    Interactive,
    /// Media reference (URL) with the content as caption
    Media,
    /// Pre-approved provider template, content is the template name
    Template,
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Interactive => write!(f, "interactive"),
            Self::Media => write!(f, "media"),
            Self::Template => write!(f, "template"),
        }
    }
}

/// A single rendered piece of outbound content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    pub content: String,
    #[serde(default)]
    pub kind: ContentKind,
}

impl Fragment {
    /// Create a text fragment
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            kind: ContentKind::Text,
        }
    }

    pub fn new(content: impl Into<String>, kind: ContentKind) -> Self {
        Self {
            content: content.into(),
            kind,
        }
    }
}

/// Who an outbound command is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeliveryTarget {
    /// Contact the session belongs to
    pub contact_id: String,
    /// Channel (business phone number) the session is bound to
    pub channel_id: String,
}

impl DeliveryTarget {
    pub fn new(contact_id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            contact_id: contact_id.into(),
            channel_id: channel_id.into(),
        }
    }
}

/// Ordered fragments produced by one inbound event for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundCommand {
    pub session_id: String,
    pub target: DeliveryTarget,
    pub fragments: Vec<Fragment>,
}

impl OutboundCommand {
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}

/// Delivery status of a queued fragment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Waiting at or behind the queue cursor
    #[default]
    Queued,
    /// Handed to the transport, outcome not yet known
    Sending,
    /// Transport confirmed delivery
    Sent,
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Sending => write!(f, "sending"),
            Self::Sent => write!(f, "sent"),
        }
    }
}

/// Entry in a session's message queue with status tracking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedFragment {
    /// Absolute position in the session queue
    pub position: usize,
    /// Step that produced the fragment
    pub step_id: String,
    pub fragment: Fragment,
    pub status: DeliveryStatus,
    /// Number of delivery attempts
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,
}

impl QueuedFragment {
    pub fn new(position: usize, step_id: impl Into<String>, fragment: Fragment) -> Self {
        Self {
            position,
            step_id: step_id.into(),
            fragment,
            status: DeliveryStatus::Queued,
            attempts: 0,
            last_error: None,
            enqueued_at: Utc::now(),
            delivered_at: None,
        }
    }

    /// Mark the fragment as handed to the transport
    pub fn mark_sending(&mut self) {
        self.status = DeliveryStatus::Sending;
        self.attempts += 1;
    }

    /// Mark the fragment as delivered
    pub fn mark_sent(&mut self) {
        self.status = DeliveryStatus::Sent;
        self.delivered_at = Some(Utc::now());
    }

    /// Reset to queued after a failed attempt, keeping the error.
    pub fn mark_retry(&mut self, error: impl Into<String>) {
        self.status = DeliveryStatus::Queued;
        self.last_error = Some(error.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_kind_defaults_to_text() {
        let fragment: Fragment = serde_json::from_str(r#"{"content": "hola"}"#).unwrap();
        assert_eq!(fragment, Fragment::text("hola"));
    }

    #[test]
    fn test_queued_fragment_lifecycle() {
        let mut queued = QueuedFragment::new(0, "welcome", Fragment::text("hi"));
        assert_eq!(queued.status, DeliveryStatus::Queued);

        queued.mark_sending();
        assert_eq!(queued.status, DeliveryStatus::Sending);
        assert_eq!(queued.attempts, 1);

        queued.mark_retry("timeout");
        assert_eq!(queued.status, DeliveryStatus::Queued);
        assert_eq!(queued.last_error.as_deref(), Some("timeout"));

        queued.mark_sending();
        queued.mark_sent();
        assert_eq!(queued.status, DeliveryStatus::Sent);
        assert_eq!(queued.attempts, 2);
        assert!(queued.delivered_at.is_some());
    }
}
