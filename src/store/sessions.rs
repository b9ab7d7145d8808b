//! In-memory session store.

use super::{SessionStore, StoreResult};
use crate::sessions::ChatSession;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Sessions keyed by id.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, ChatSession>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Every session for a contact on a channel, oldest first.
    pub fn history(&self, contact_id: &str, channel_id: &str) -> Vec<ChatSession> {
        let mut sessions: Vec<_> = self
            .sessions
            .read()
            .values()
            .filter(|s| s.contact_id == contact_id && s.channel_id == channel_id)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.created_at);
        sessions
    }

    /// Drop closed sessions with nothing left to deliver.
    pub fn purge_closed(&self) -> usize {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, s| s.is_open() || s.has_pending());
        before - sessions.len()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, session_id: &str) -> StoreResult<Option<ChatSession>> {
        Ok(self.sessions.read().get(session_id).cloned())
    }

    async fn find_open(
        &self,
        contact_id: &str,
        channel_id: &str,
    ) -> StoreResult<Option<ChatSession>> {
        Ok(self
            .sessions
            .read()
            .values()
            .filter(|s| s.is_open() && s.contact_id == contact_id && s.channel_id == channel_id)
            .max_by_key(|s| s.created_at)
            .cloned())
    }

    async fn save(&self, session: &ChatSession) -> StoreResult<()> {
        self.sessions
            .write()
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn list_open(&self) -> StoreResult<Vec<ChatSession>> {
        Ok(self
            .sessions
            .read()
            .values()
            .filter(|s| s.is_open())
            .cloned()
            .collect())
    }

    async fn with_pending_delivery(&self) -> StoreResult<Vec<String>> {
        let mut ids: Vec<_> = self
            .sessions
            .read()
            .values()
            .filter(|s| s.has_pending())
            .map(|s| (s.created_at, s.id.clone()))
            .collect();
        ids.sort();
        Ok(ids.into_iter().map(|(_, id)| id).collect())
    }
}
