//! chatflow: conversational flow engine
//!
//! Matches inbound messages to flow definitions, drives a per-contact
//! session through the flow's step graph, collects variables, evaluates
//! branching conditions, and paces outbound content through a per-session
//! delivery queue.

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod flows;
pub mod handoff;
pub mod logging;
pub mod messages;
pub mod sessions;
pub mod store;
pub mod values;

pub use config::EngineConfig;
pub use engine::{DeliveryReport, EngineStats, FlowEngine, InboundOutcome};
pub use error::{DefinitionError, EngineError, EngineResult, StoreError};
