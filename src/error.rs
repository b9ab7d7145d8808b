//! Engine error types

use crate::messages::TransportError;
use crate::sessions::QueueError;
use thiserror::Error;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// A flow definition that cannot be executed.
///
/// Fatal to that flow only: it is excluded from matching until corrected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    #[error("flow '{flow}' has no entry step")]
    MissingEntryStep { flow: String },

    #[error("flow '{flow}' entry step '{step}' does not exist")]
    UnknownEntryStep { flow: String, step: String },

    #[error("flow '{flow}' defines step '{step}' more than once")]
    DuplicateStep { flow: String, step: String },

    #[error("flow '{flow}' transition from unknown step '{from}'")]
    UnknownTransitionSource { flow: String, from: String },

    #[error("flow '{flow}' transition {from} -> {to} targets an unknown step")]
    UnknownTransitionTarget {
        flow: String,
        from: String,
        to: String,
    },

    #[error("flow '{flow}' step '{step}' is not terminal and has no outgoing transition")]
    DeadEndStep { flow: String, step: String },

    #[error("flow '{flow}' question step '{step}' declares no input variable")]
    MissingInputCapture { flow: String, step: String },

    #[error("flow '{flow}' has an invalid trigger pattern '{pattern}': {reason}")]
    InvalidTriggerPattern {
        flow: String,
        pattern: String,
        reason: String,
    },

    #[error("flow '{flow}' step '{step}' has an invalid validation pattern: {reason}")]
    InvalidValidationPattern {
        flow: String,
        step: String,
        reason: String,
    },

    #[error("flow id '{flow}' is defined more than once")]
    DuplicateFlow { flow: String },

    #[error("flow '{flow}' is inactive")]
    Inactive { flow: String },
}

/// Errors from session or definition storage
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Engine-level errors
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Flow not found: {0}")]
    FlowNotFound(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Step '{step}' not found in flow '{flow}'")]
    UnknownStep { flow: String, step: String },

    #[error("Session {session} is {status}, operation requires {expected}")]
    InvalidSessionState {
        session: String,
        status: String,
        expected: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}
