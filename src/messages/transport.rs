//! Transport seam
//!
//! The physical send (provider API calls, retries, rate limiting) lives
//! outside the engine. The engine only needs a per-fragment acknowledgement.

use super::outbound::{DeliveryTarget, Fragment};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::io::Write;
use std::sync::Arc;

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors reported by a transport for one fragment
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("Channel not connected: {0}")]
    NotConnected(String),

    #[error("Rate limited: retry after {0}s")]
    RateLimited(u64),

    #[error("Message send failed: {message}")]
    SendFailed { message: String, retryable: bool },
}

impl TransportError {
    /// Whether the transport expects a later attempt to succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NotConnected(_) | Self::RateLimited(_) => true,
            Self::SendFailed { retryable, .. } => *retryable,
        }
    }
}

/// Delivery acknowledgement for a single fragment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    /// Provider-side message id, when the transport has one
    pub message_id: Option<String>,
}

/// Outbound channel transport
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one fragment to the target and wait for the provider's answer.
    async fn send(
        &self,
        target: &DeliveryTarget,
        fragment: &Fragment,
    ) -> TransportResult<DeliveryReceipt>;
}

/// Type-erased transport for storage
pub type DynTransport = Arc<dyn Transport>;

/// Transport that prints fragments to stdout; used by the CLI simulator.
#[derive(Debug, Default)]
pub struct ConsoleTransport {
    lock: Mutex<()>,
}

impl ConsoleTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for ConsoleTransport {
    async fn send(
        &self,
        target: &DeliveryTarget,
        fragment: &Fragment,
    ) -> TransportResult<DeliveryReceipt> {
        let _guard = self.lock.lock();
        let mut out = std::io::stdout().lock();
        writeln!(
            out,
            "[{} -> {}] ({}) {}",
            target.channel_id, target.contact_id, fragment.kind, fragment.content
        )
        .map_err(|e| TransportError::SendFailed {
            message: e.to_string(),
            retryable: false,
        })?;
        Ok(DeliveryReceipt { message_id: None })
    }
}
