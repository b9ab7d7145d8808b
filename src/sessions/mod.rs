//! Chat sessions: state, delivery queue, exclusion, and the state machine.

pub mod locks;
pub mod machine;
pub mod queue;
pub mod session;

pub use locks::{SessionGuard, SessionLocks};
pub use machine::{AdvanceOutcome, AdvanceResult, IgnoreReason, SessionMachine};
pub use queue::QueueError;
pub use session::{CapturedResponse, ChatSession, FlowStatus, SessionStatus};
