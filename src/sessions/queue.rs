//! Delivery queue pacing on a session's message queue.
//!
//! Fragments get absolute positions when enqueued. The cursor
//! (`current_queue_position`) only moves on acknowledgement of the fragment
//! it points at, so at most one fragment per session is ever in flight and a
//! lost delivery outcome is replayed rather than skipped.

use super::session::ChatSession;
use crate::messages::{DeliveryStatus, Fragment, QueuedFragment};
use thiserror::Error;

/// Queue misuse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("acknowledged position {position} is ahead of the queue cursor {cursor}")]
    OutOfOrder { position: usize, cursor: usize },

    #[error("no fragment queued at position {0}")]
    NothingQueued(usize),
}

impl ChatSession {
    /// Append fragments produced by `step_id`, returning their positions.
    pub fn enqueue(&mut self, step_id: &str, fragments: Vec<Fragment>) -> Vec<usize> {
        let mut next = self.next_queue_position();
        fragments
            .into_iter()
            .map(|fragment| {
                let position = next;
                self.message_queue
                    .push(QueuedFragment::new(position, step_id, fragment));
                next += 1;
                position
            })
            .collect()
    }

    /// The fragment at the cursor, if any. Repeated calls return the same
    /// fragment until it is acknowledged.
    pub fn next_pending(&self) -> Option<&QueuedFragment> {
        self.queued_at(self.current_queue_position)
    }

    /// Mark the fragment at the cursor as handed to the transport.
    pub fn mark_in_flight(&mut self) -> Option<QueuedFragment> {
        let cursor = self.current_queue_position;
        let entry = self.queued_at_mut(cursor)?;
        entry.mark_sending();
        Some(entry.clone())
    }

    /// Confirm delivery of the fragment at `position`.
    ///
    /// Returns `Ok(true)` when the cursor advanced and `Ok(false)` when the
    /// position was already acknowledged, so a repeated confirmation is
    /// harmless.
    pub fn acknowledge(&mut self, position: usize) -> Result<bool, QueueError> {
        let cursor = self.current_queue_position;
        if position < cursor {
            return Ok(false);
        }
        if position > cursor {
            return Err(QueueError::OutOfOrder { position, cursor });
        }

        let entry = self
            .queued_at_mut(position)
            .ok_or(QueueError::NothingQueued(position))?;
        entry.mark_sent();
        self.current_queue_position += 1;
        Ok(true)
    }

    /// Record a failed delivery attempt. Never moves the cursor.
    pub fn record_failure(&mut self, position: usize, error: &str) {
        if let Some(entry) = self.queued_at_mut(position) {
            if entry.status != DeliveryStatus::Sent {
                entry.mark_retry(error);
            }
        }
    }

    /// Fragments at or after the cursor.
    pub fn pending_len(&self) -> usize {
        self.message_queue
            .iter()
            .filter(|entry| entry.position >= self.current_queue_position)
            .count()
    }

    pub fn has_pending(&self) -> bool {
        self.next_pending().is_some()
    }

    /// Drop delivered entries behind the cursor. Positions stay absolute.
    pub fn compact_queue(&mut self) -> usize {
        let cursor = self.current_queue_position;
        let before = self.message_queue.len();
        self.message_queue.retain(|entry| entry.position >= cursor);
        before - self.message_queue.len()
    }

    fn next_queue_position(&self) -> usize {
        self.message_queue
            .last()
            .map(|entry| entry.position + 1)
            .unwrap_or(self.current_queue_position)
    }

    fn queued_at(&self, position: usize) -> Option<&QueuedFragment> {
        self.message_queue.iter().find(|entry| entry.position == position)
    }

    fn queued_at_mut(&mut self, position: usize) -> Option<&mut QueuedFragment> {
        self.message_queue
            .iter_mut()
            .find(|entry| entry.position == position)
    }
}
