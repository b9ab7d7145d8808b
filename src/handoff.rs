//! Hand-off notifications
//!
//! When a session leaves automated control, whoever routes conversations to
//! human agents is told through a [`HandoffNotifier`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Why a session was handed off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffReason {
    /// The attempt ceiling was reached on one step.
    AttemptsExceeded,
    /// The flow reached a hand-off terminal step.
    TerminalStep,
    /// An operator or external system asked for it.
    Requested,
}

impl std::fmt::Display for HandoffReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AttemptsExceeded => write!(f, "attempts_exceeded"),
            Self::TerminalStep => write!(f, "terminal_step"),
            Self::Requested => write!(f, "requested"),
        }
    }
}

/// A session that now needs a human.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandoffNotice {
    pub session_id: String,
    pub contact_id: String,
    pub channel_id: String,
    pub flow_id: String,
    pub step_id: String,
    pub reason: HandoffReason,
    /// Agent assigned at hand-off time, if the caller named one.
    pub agent_id: Option<String>,
    pub at: DateTime<Utc>,
}

#[async_trait]
pub trait HandoffNotifier: Send + Sync {
    async fn notify(&self, notice: HandoffNotice);
}

pub type DynHandoffNotifier = Arc<dyn HandoffNotifier>;

/// Logs hand-offs and does nothing else.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogHandoffNotifier;

#[async_trait]
impl HandoffNotifier for LogHandoffNotifier {
    async fn notify(&self, notice: HandoffNotice) {
        info!(
            session_id = %notice.session_id,
            contact_id = %notice.contact_id,
            flow_id = %notice.flow_id,
            step_id = %notice.step_id,
            reason = %notice.reason,
            "session handed off to agent"
        );
    }
}

/// Forwards notices to a channel, e.g. an agent routing task.
#[derive(Debug, Clone)]
pub struct ChannelHandoffNotifier {
    tx: mpsc::Sender<HandoffNotice>,
}

impl ChannelHandoffNotifier {
    pub fn new(tx: mpsc::Sender<HandoffNotice>) -> Self {
        Self { tx }
    }

    /// Create a notifier and the receiving end.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<HandoffNotice>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl HandoffNotifier for ChannelHandoffNotifier {
    async fn notify(&self, notice: HandoffNotice) {
        let session_id = notice.session_id.clone();
        if self.tx.send(notice).await.is_err() {
            warn!(session_id = %session_id, "hand-off receiver dropped, notice lost");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notice() -> HandoffNotice {
        HandoffNotice {
            session_id: "s1".into(),
            contact_id: "c1".into(),
            channel_id: "ch1".into(),
            flow_id: "f1".into(),
            step_id: "ask".into(),
            reason: HandoffReason::AttemptsExceeded,
            agent_id: None,
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_channel_notifier_forwards() {
        let (notifier, mut rx) = ChannelHandoffNotifier::channel(4);
        notifier.notify(notice()).await;
        let received = rx.recv().await.unwrap();
        assert_eq!(received.session_id, "s1");
        assert_eq!(received.reason, HandoffReason::AttemptsExceeded);
    }

    #[tokio::test]
    async fn test_channel_notifier_survives_dropped_receiver() {
        let (notifier, rx) = ChannelHandoffNotifier::channel(1);
        drop(rx);
        notifier.notify(notice()).await;
    }

    #[test]
    fn test_reason_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&HandoffReason::TerminalStep).unwrap(),
            r#""terminal_step""#
        );
    }
}
