//! Storage collaborators
//!
//! The engine reads flow definitions and reads/writes sessions through these
//! traits. In-memory implementations back the CLI and the tests.

pub mod definitions;
pub mod sessions;

pub use definitions::{InMemoryDefinitionStore, LoadReport};
pub use sessions::InMemorySessionStore;

use crate::error::StoreError;
use crate::flows::FlowGraph;
use crate::sessions::ChatSession;
use async_trait::async_trait;
use std::sync::Arc;

pub type StoreResult<T> = Result<T, StoreError>;

/// Read access to validated flows.
#[async_trait]
pub trait DefinitionStore: Send + Sync {
    /// Look up a flow by id, active or not.
    async fn flow(&self, flow_id: &str) -> StoreResult<Option<Arc<FlowGraph>>>;

    /// Flows eligible for trigger matching.
    async fn active_flows(&self) -> StoreResult<Vec<Arc<FlowGraph>>>;
}

/// Session persistence.
///
/// At most one open session exists per conversation key; the engine keeps
/// that true by holding the conversation lock around find-then-save.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, session_id: &str) -> StoreResult<Option<ChatSession>>;

    /// The open (active or handed-off) session for a contact on a channel.
    async fn find_open(&self, contact_id: &str, channel_id: &str)
        -> StoreResult<Option<ChatSession>>;

    /// Insert or replace.
    async fn save(&self, session: &ChatSession) -> StoreResult<()>;

    async fn list_open(&self) -> StoreResult<Vec<ChatSession>>;

    /// Ids of sessions with undelivered fragments.
    async fn with_pending_delivery(&self) -> StoreResult<Vec<String>>;
}

pub type DynDefinitionStore = Arc<dyn DefinitionStore>;
pub type DynSessionStore = Arc<dyn SessionStore>;
