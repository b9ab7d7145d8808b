//! Transition resolution
//!
//! Picks the next step for a session: outgoing transitions of the current
//! step are evaluated in ascending priority and the first match wins.

use super::condition;
use super::graph::FlowGraph;
use super::model::FlowStep;
use crate::values::Variables;
use tracing::debug;

/// Outcome of resolving a step's transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Move to `to` via the transition labelled `label`.
    Next { to: String, label: String },
    /// The step is terminal; nothing to evaluate.
    Terminal,
    /// No transition matched; stay on the current step.
    Unresolved,
}

/// Resolve the next step from `step` given the collected variables.
pub fn resolve(graph: &FlowGraph, step: &FlowStep, variables: &Variables) -> Resolution {
    if step.is_terminal() {
        return Resolution::Terminal;
    }

    let taken = graph
        .transitions_from(&step.id)
        .iter()
        .find(|transition| condition::matches(&transition.condition, variables));

    match taken {
        Some(transition) => {
            debug!(
                flow_id = %graph.id(),
                step_id = %step.id,
                transition = %transition.label(),
                to = %transition.to,
                "transition resolved"
            );
            Resolution::Next {
                to: transition.to.clone(),
                label: transition.label(),
            }
        }
        None => {
            debug!(flow_id = %graph.id(), step_id = %step.id, "no transition matched");
            Resolution::Unresolved
        }
    }
}
