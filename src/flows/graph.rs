//! Validated, indexed flows.
//!
//! A [`FlowDefinition`] is what authoring tools produce. A [`FlowGraph`] is
//! what the engine runs: every step reference resolved, transitions grouped
//! by source and ordered by priority, trigger patterns compiled.

use super::model::{
    FlowDefinition, FlowKind, FlowStep, StepKind, StepTransition, TriggerMode, ValidationRule,
};
use super::trigger::CompiledTrigger;
use crate::error::DefinitionError;
use crate::values::Variables;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::{HashMap, HashSet};

/// Executable form of a flow definition.
#[derive(Debug, Clone)]
pub struct FlowGraph {
    definition: FlowDefinition,
    entry_step: String,
    steps: HashMap<String, usize>,
    /// Outgoing transitions per source step, ascending priority.
    outgoing: HashMap<String, Vec<StepTransition>>,
    /// Compiled triggers, strongest kind first.
    triggers: Vec<CompiledTrigger>,
    /// Compiled `pattern` validation rules keyed by step id.
    input_patterns: HashMap<String, Regex>,
    defaults: Variables,
}

/// Everything a single validation pass produces.
struct Analysis {
    errors: Vec<DefinitionError>,
    triggers: Vec<CompiledTrigger>,
    input_patterns: HashMap<String, Regex>,
}

impl FlowGraph {
    /// Validate and index a definition.
    ///
    /// Returns the first problem found; use [`FlowGraph::validate`] to list
    /// all of them.
    pub fn build(definition: FlowDefinition) -> Result<Self, DefinitionError> {
        let analysis = analyze(&definition);
        if let Some(error) = analysis.errors.into_iter().next() {
            return Err(error);
        }

        // analyze() guarantees the entry step is present and known
        let entry_step = definition.entry_step.clone().unwrap_or_default();

        let steps = definition
            .steps
            .iter()
            .enumerate()
            .map(|(i, step)| (step.id.clone(), i))
            .collect();

        let mut outgoing: HashMap<String, Vec<StepTransition>> = HashMap::new();
        for transition in &definition.transitions {
            outgoing
                .entry(transition.from.clone())
                .or_default()
                .push(transition.clone());
        }
        // sort_by_key is stable: equal priorities keep declaration order
        for transitions in outgoing.values_mut() {
            transitions.sort_by_key(|t| t.priority);
        }

        let mut triggers = analysis.triggers;
        triggers.sort_by_key(|t| std::cmp::Reverse(t.kind()));

        let defaults = definition
            .variables
            .iter()
            .filter_map(|v| v.default.clone().map(|d| (v.name.clone(), d)))
            .collect();

        Ok(Self {
            definition,
            entry_step,
            steps,
            outgoing,
            triggers,
            input_patterns: analysis.input_patterns,
            defaults,
        })
    }

    /// List every problem with a definition.
    pub fn validate(definition: &FlowDefinition) -> Vec<DefinitionError> {
        analyze(definition).errors
    }

    pub fn id(&self) -> &str {
        &self.definition.id
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn kind(&self) -> FlowKind {
        self.definition.kind
    }

    pub fn trigger_mode(&self) -> TriggerMode {
        self.definition.trigger_mode
    }

    pub fn is_active(&self) -> bool {
        self.definition.is_active
    }

    pub fn is_default(&self) -> bool {
        self.definition.is_default
    }

    pub fn activated_at(&self) -> Option<DateTime<Utc>> {
        self.definition.activated_at
    }

    pub fn definition(&self) -> &FlowDefinition {
        &self.definition
    }

    pub fn entry_step_id(&self) -> &str {
        &self.entry_step
    }

    pub fn step(&self, step_id: &str) -> Option<&FlowStep> {
        self.steps
            .get(step_id)
            .and_then(|&i| self.definition.steps.get(i))
    }

    pub fn step_count(&self) -> usize {
        self.definition.steps.len()
    }

    /// Outgoing transitions of a step in evaluation order.
    pub fn transitions_from(&self, step_id: &str) -> &[StepTransition] {
        self.outgoing
            .get(step_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn triggers(&self) -> &[CompiledTrigger] {
        &self.triggers
    }

    pub fn input_pattern(&self, step_id: &str) -> Option<&Regex> {
        self.input_patterns.get(step_id)
    }

    /// Declared variable defaults.
    pub fn default_variables(&self) -> &Variables {
        &self.defaults
    }
}

fn analyze(def: &FlowDefinition) -> Analysis {
    let flow = def.id.clone();
    let mut errors = Vec::new();

    let mut known = HashSet::new();
    for step in &def.steps {
        if !known.insert(step.id.as_str()) {
            errors.push(DefinitionError::DuplicateStep {
                flow: flow.clone(),
                step: step.id.clone(),
            });
        }
    }

    match def.entry_step.as_deref() {
        None | Some("") => errors.push(DefinitionError::MissingEntryStep { flow: flow.clone() }),
        Some(entry) if !known.contains(entry) => {
            errors.push(DefinitionError::UnknownEntryStep {
                flow: flow.clone(),
                step: entry.to_string(),
            })
        }
        Some(_) => {}
    }

    let mut has_outgoing = HashSet::new();
    for transition in &def.transitions {
        if !known.contains(transition.from.as_str()) {
            errors.push(DefinitionError::UnknownTransitionSource {
                flow: flow.clone(),
                from: transition.from.clone(),
            });
            continue;
        }
        if !known.contains(transition.to.as_str()) {
            errors.push(DefinitionError::UnknownTransitionTarget {
                flow: flow.clone(),
                from: transition.from.clone(),
                to: transition.to.clone(),
            });
            continue;
        }
        has_outgoing.insert(transition.from.as_str());
    }

    let mut input_patterns = HashMap::new();
    for step in &def.steps {
        if step.kind != StepKind::Terminal && !has_outgoing.contains(step.id.as_str()) {
            errors.push(DefinitionError::DeadEndStep {
                flow: flow.clone(),
                step: step.id.clone(),
            });
        }

        if step.kind == StepKind::Question {
            match &step.input {
                None => errors.push(DefinitionError::MissingInputCapture {
                    flow: flow.clone(),
                    step: step.id.clone(),
                }),
                Some(capture) if capture.variable.trim().is_empty() => {
                    errors.push(DefinitionError::MissingInputCapture {
                        flow: flow.clone(),
                        step: step.id.clone(),
                    })
                }
                Some(_) => {}
            }
        }

        if let Some(ValidationRule::Pattern { pattern }) =
            step.input.as_ref().map(|capture| &capture.validation)
        {
            match Regex::new(pattern) {
                Ok(regex) => {
                    input_patterns.insert(step.id.clone(), regex);
                }
                Err(e) => errors.push(DefinitionError::InvalidValidationPattern {
                    flow: flow.clone(),
                    step: step.id.clone(),
                    reason: e.to_string(),
                }),
            }
        }
    }

    let mut triggers = Vec::with_capacity(def.triggers.len());
    for trigger in &def.triggers {
        match CompiledTrigger::compile(trigger, def.case_sensitive, &flow) {
            Ok(compiled) => triggers.push(compiled),
            Err(e) => errors.push(e),
        }
    }

    Analysis {
        errors,
        triggers,
        input_patterns,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flows::model::{
        CompareOp, Condition, FlowVariable, InputCapture, StepTransition, Trigger,
    };

    fn survey() -> FlowDefinition {
        FlowDefinition::new("survey", "Survey")
            .with_entry("ask")
            .with_trigger(Trigger::keywords(["survey"]))
            .with_step(FlowStep::question(
                "ask",
                "Rate us 1-5",
                InputCapture::new(
                    "score",
                    ValidationRule::Number {
                        min: Some(1.0),
                        max: Some(5.0),
                    },
                ),
            ))
            .with_step(FlowStep::terminal("thanks").with_message("Thanks!"))
            .with_step(FlowStep::terminal("sorry").with_message("Sorry to hear"))
            .with_transition(StepTransition::always("ask", "thanks").with_priority(10))
            .with_transition(
                StepTransition::new("ask", "sorry", Condition::compare("score", CompareOp::Lt, 3i64))
                    .with_priority(1),
            )
    }

    #[test]
    fn test_build_orders_transitions_by_priority() {
        let graph = FlowGraph::build(survey()).unwrap();
        let targets: Vec<&str> = graph
            .transitions_from("ask")
            .iter()
            .map(|t| t.to.as_str())
            .collect();
        assert_eq!(targets, vec!["sorry", "thanks"]);
        assert_eq!(graph.entry_step_id(), "ask");
        assert!(graph.transitions_from("thanks").is_empty());
    }

    #[test]
    fn test_missing_entry_step() {
        let mut def = survey();
        def.entry_step = None;
        assert_eq!(
            FlowGraph::build(def).unwrap_err(),
            DefinitionError::MissingEntryStep { flow: "survey".into() }
        );
    }

    #[test]
    fn test_unknown_transition_target() {
        let def = survey().with_transition(StepTransition::always("ask", "nowhere"));
        let errors = FlowGraph::validate(&def);
        assert!(errors.contains(&DefinitionError::UnknownTransitionTarget {
            flow: "survey".into(),
            from: "ask".into(),
            to: "nowhere".into(),
        }));
    }

    #[test]
    fn test_dead_end_and_missing_capture() {
        let def = FlowDefinition::new("broken", "Broken")
            .with_entry("hello")
            .with_step(FlowStep::message("hello", "hi"))
            .with_step(FlowStep {
                input: None,
                ..FlowStep::question("ask", "?", InputCapture::new("x", ValidationRule::Any))
            });

        let errors = FlowGraph::validate(&def);
        assert!(errors.contains(&DefinitionError::DeadEndStep {
            flow: "broken".into(),
            step: "hello".into(),
        }));
        assert!(errors.contains(&DefinitionError::MissingInputCapture {
            flow: "broken".into(),
            step: "ask".into(),
        }));
    }

    #[test]
    fn test_invalid_trigger_pattern() {
        let def = survey().with_trigger(Trigger::regex("(unclosed"));
        assert!(matches!(
            FlowGraph::build(def),
            Err(DefinitionError::InvalidTriggerPattern { .. })
        ));
    }

    #[test]
    fn test_default_variables() {
        let def = survey().with_variable(FlowVariable {
            name: "lang".into(),
            default: Some("es".into()),
            description: String::new(),
        });
        let graph = FlowGraph::build(def).unwrap();
        assert_eq!(graph.default_variables().get("lang").unwrap().as_text(), "es");
    }
}
