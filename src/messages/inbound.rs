//! Inbound message events.
//!
//! The webhook layer parses and authenticates provider payloads; the engine
//! only ever sees this normalized shape.

use serde::{Deserialize, Serialize};

/// A normalized inbound message from a contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Contact who sent the message
    pub contact_id: String,
    /// Channel (business phone number) the message arrived on
    pub channel_id: String,
    /// Message text (button replies carry their title here)
    #[serde(default)]
    pub text: String,
    /// Set when the message replies to a specific template or button send
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_ref: Option<String>,
}

impl InboundEvent {
    /// Create a new text event
    pub fn new(
        contact_id: impl Into<String>,
        channel_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            contact_id: contact_id.into(),
            channel_id: channel_id.into(),
            text: text.into(),
            correlation_ref: None,
        }
    }

    /// Attach the template/button reference this event replies to
    pub fn with_correlation(mut self, reference: impl Into<String>) -> Self {
        self.correlation_ref = Some(reference.into());
        self
    }

    /// Key used to serialize work for one conversation.
    pub fn conversation_key(&self) -> String {
        conversation_key(&self.contact_id, &self.channel_id)
    }
}

/// One contact on one channel has at most one open session.
pub fn conversation_key(contact_id: &str, channel_id: &str) -> String {
    format!("{}@{}", contact_id, channel_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correlation_is_optional_on_the_wire() {
        let event: InboundEvent =
            serde_json::from_str(r#"{"contact_id": "c1", "channel_id": "p1", "text": "hola"}"#)
                .unwrap();
        assert_eq!(event, InboundEvent::new("c1", "p1", "hola"));
        assert_eq!(event.conversation_key(), "c1@p1");
    }
}
