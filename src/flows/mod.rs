//! Flow definitions and the pure pieces of flow execution.
//!
//! A flow is a directed graph of steps joined by prioritized, conditional
//! transitions, started by triggers. Everything in this module is free of
//! I/O: the session state machine and the engine compose it.
//!
//! # Example definition file
//!
//! ```json5
//! {
//!   flows: [{
//!     id: "age_check",
//!     name: "Age check",
//!     entry_step: "ask_age",
//!     triggers: [{ type: "keyword", keywords: ["hola", "buenas"] }],
//!     steps: [
//!       {
//!         id: "ask_age",
//!         kind: "question",
//!         messages: [{ content: "Hola {name}, how old are you?" }],
//!         input: { variable: "edad", validation: { type: "number" } },
//!       },
//!       { id: "adult", kind: "terminal", messages: [{ content: "Welcome!" }] },
//!       { id: "minor", kind: "terminal", action: "hand_off" },
//!     ],
//!     transitions: [
//!       { from: "ask_age", to: "adult", priority: 1,
//!         condition: { type: "numeric_compare", variable: "edad", operator: ">=", value: 18 } },
//!       { from: "ask_age", to: "minor", priority: 2 },
//!     ],
//!   }],
//! }
//! ```

pub mod condition;
pub mod graph;
pub mod interpreter;
pub mod model;
pub mod resolver;
pub mod template;
pub mod trigger;

pub use condition::ConditionError;
pub use graph::FlowGraph;
pub use interpreter::{InputExpectation, InputRejection, RenderedStep};
pub use model::{
    CompareOp, Condition, DefinitionFile, FlowDefinition, FlowKind, FlowStep, FlowVariable,
    InputCapture, KeywordMatch, StepKind, StepMessage, StepTransition, TerminalAction, Trigger,
    TriggerMode, ValidationRule,
};
pub use resolver::Resolution;
pub use trigger::{FlowMatch, MatchReason, TriggerInput, TriggerKind, TriggerMatcher};
