//! Flow definition types.
//!
//! Defines the serialized shape of flows, steps, transitions, and triggers as
//! authored by flow tooling. These types are plain data; validation and
//! indexing happen in [`crate::flows::graph`].

use crate::messages::ContentKind;
use crate::values::VariableValue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Definition file container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefinitionFile {
    #[serde(default = "default_version")]
    pub version: u32,
    /// List of flow definitions.
    #[serde(default)]
    pub flows: Vec<FlowDefinition>,
}

impl Default for DefinitionFile {
    fn default() -> Self {
        Self {
            version: default_version(),
            flows: Vec::new(),
        }
    }
}

fn default_version() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

/// A named conversation definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDefinition {
    /// Unique identifier for the flow.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Who starts the conversation.
    #[serde(default)]
    pub kind: FlowKind,
    /// How the trigger set combines.
    #[serde(default)]
    pub trigger_mode: TriggerMode,
    /// Whether keyword and regex triggers compare case-sensitively.
    #[serde(default)]
    pub case_sensitive: bool,
    /// Step a new session starts on. Only optional while authoring.
    #[serde(default)]
    pub entry_step: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// Fallback flow when no trigger matches.
    #[serde(default)]
    pub is_default: bool,
    /// When the flow was last activated; used to break trigger ties.
    #[serde(default)]
    pub activated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub triggers: Vec<Trigger>,
    #[serde(default)]
    pub steps: Vec<FlowStep>,
    #[serde(default)]
    pub transitions: Vec<StepTransition>,
    /// Declared variables and their defaults.
    #[serde(default)]
    pub variables: Vec<FlowVariable>,
}

impl FlowDefinition {
    /// Create an empty active flow.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            kind: FlowKind::default(),
            trigger_mode: TriggerMode::default(),
            case_sensitive: false,
            entry_step: None,
            is_active: true,
            is_default: false,
            activated_at: None,
            triggers: Vec::new(),
            steps: Vec::new(),
            transitions: Vec::new(),
            variables: Vec::new(),
        }
    }

    pub fn with_entry(mut self, step_id: impl Into<String>) -> Self {
        self.entry_step = Some(step_id.into());
        self
    }

    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.triggers.push(trigger);
        self
    }

    pub fn with_kind(mut self, kind: FlowKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_trigger_mode(mut self, mode: TriggerMode) -> Self {
        self.trigger_mode = mode;
        self
    }

    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    pub fn with_step(mut self, step: FlowStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_transition(mut self, transition: StepTransition) -> Self {
        self.transitions.push(transition);
        self
    }

    pub fn with_variable(mut self, variable: FlowVariable) -> Self {
        self.variables.push(variable);
        self
    }

    pub fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    pub fn activated_at(mut self, at: DateTime<Utc>) -> Self {
        self.activated_at = Some(at);
        self
    }
}

/// Direction of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    /// Started by a contact's message.
    #[default]
    Inbound,
    /// Started by a business-initiated send.
    Outbound,
    Hybrid,
}

/// Trigger combination mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    /// One matching trigger suffices.
    #[default]
    Any,
    /// Every trigger must match.
    All,
}

/// Rule matching an inbound event to a flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// Match on normalized keywords.
    Keyword {
        keywords: Vec<String>,
        #[serde(default)]
        match_type: KeywordMatch,
        /// Overrides the flow's case sensitivity.
        #[serde(default)]
        case_sensitive: Option<bool>,
    },
    /// Match via pattern search.
    Regex {
        pattern: String,
        #[serde(default)]
        case_sensitive: Option<bool>,
    },
    /// Match replies correlated to a specific template send.
    Template {
        /// Template name or id carried by the inbound correlation reference.
        template: String,
    },
}

impl Trigger {
    pub fn keywords<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Keyword {
            keywords: keywords.into_iter().map(Into::into).collect(),
            match_type: KeywordMatch::default(),
            case_sensitive: None,
        }
    }

    pub fn regex(pattern: impl Into<String>) -> Self {
        Self::Regex {
            pattern: pattern.into(),
            case_sensitive: None,
        }
    }

    pub fn template(template: impl Into<String>) -> Self {
        Self::Template {
            template: template.into(),
        }
    }
}

/// How a keyword is compared against inbound text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeywordMatch {
    /// Whole normalized text equals the keyword.
    Exact,
    /// Keyword appears as a whole word (or word sequence).
    #[default]
    Word,
    /// Keyword appears anywhere as a substring.
    Contains,
}

/// Kind of a flow step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Sends content and passes through.
    #[default]
    Message,
    /// Sends content and captures the next reply into a variable.
    Question,
    /// Branches on collected variables without sending anything.
    Condition,
    /// Ends the automated flow.
    Terminal,
}

/// What reaching a terminal step does to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalAction {
    #[default]
    Complete,
    /// Transfer the conversation to a human agent.
    HandOff,
}

/// A node in the flow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowStep {
    pub id: String,
    #[serde(default)]
    pub kind: StepKind,
    /// Content templates, sent in order.
    #[serde(default)]
    pub messages: Vec<StepMessage>,
    /// Required for question steps.
    #[serde(default)]
    pub input: Option<InputCapture>,
    /// Only meaningful for terminal steps.
    #[serde(default)]
    pub action: TerminalAction,
}

impl FlowStep {
    fn with_kind(id: impl Into<String>, kind: StepKind) -> Self {
        Self {
            id: id.into(),
            kind,
            messages: Vec::new(),
            input: None,
            action: TerminalAction::default(),
        }
    }

    pub fn message(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::with_kind(id, StepKind::Message).with_message(content)
    }

    pub fn question(
        id: impl Into<String>,
        content: impl Into<String>,
        input: InputCapture,
    ) -> Self {
        let mut step = Self::with_kind(id, StepKind::Question).with_message(content);
        step.input = Some(input);
        step
    }

    pub fn condition(id: impl Into<String>) -> Self {
        Self::with_kind(id, StepKind::Condition)
    }

    pub fn terminal(id: impl Into<String>) -> Self {
        Self::with_kind(id, StepKind::Terminal)
    }

    /// Append a text message template.
    pub fn with_message(mut self, content: impl Into<String>) -> Self {
        self.messages.push(StepMessage {
            content: content.into(),
            kind: ContentKind::Text,
        });
        self
    }

    pub fn with_action(mut self, action: TerminalAction) -> Self {
        self.action = action;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.kind == StepKind::Terminal
    }
}

/// A content template belonging to a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepMessage {
    /// Template with `{name}` placeholders.
    pub content: String,
    #[serde(default)]
    pub kind: ContentKind,
}

/// Which variable a question step binds and how the reply is validated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputCapture {
    pub variable: String,
    #[serde(default)]
    pub validation: ValidationRule,
    /// Sent before the step is re-rendered after an invalid reply.
    #[serde(default)]
    pub retry_message: Option<String>,
}

impl InputCapture {
    pub fn new(variable: impl Into<String>, validation: ValidationRule) -> Self {
        Self {
            variable: variable.into(),
            validation,
            retry_message: None,
        }
    }

    pub fn with_retry_message(mut self, message: impl Into<String>) -> Self {
        self.retry_message = Some(message.into());
        self
    }
}

/// Validation applied to a captured reply.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ValidationRule {
    /// Any non-empty reply.
    #[default]
    Any,
    Text {
        #[serde(default)]
        min_length: Option<usize>,
        #[serde(default)]
        max_length: Option<usize>,
    },
    /// Numeric reply, stored as a number.
    Number {
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
    Email,
    /// Reply must match the pattern.
    Pattern { pattern: String },
    /// Reply must be one of the options (case-insensitive); the option as
    /// written is stored.
    Options { options: Vec<String> },
}

/// A directed, prioritized edge between two steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepTransition {
    #[serde(default)]
    pub id: Option<String>,
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub condition: Condition,
    /// Lower evaluates first.
    #[serde(default)]
    pub priority: i32,
}

impl StepTransition {
    pub fn new(from: impl Into<String>, to: impl Into<String>, condition: Condition) -> Self {
        Self {
            id: None,
            from: from.into(),
            to: to.into(),
            condition,
            priority: 0,
        }
    }

    pub fn always(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::new(from, to, Condition::Always)
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Label used in logs.
    pub fn label(&self) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| format!("{}->{}", self.from, self.to))
    }
}

/// Condition guarding a transition.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    #[default]
    Always,
    /// Type-aware equality.
    Equals {
        variable: String,
        value: VariableValue,
    },
    NotEquals {
        variable: String,
        value: VariableValue,
    },
    /// Substring test on the variable's text.
    Contains { variable: String, value: String },
    /// Set membership with type-aware equality.
    OneOf {
        variable: String,
        values: Vec<VariableValue>,
    },
    /// Both operands must be numeric.
    NumericCompare {
        variable: String,
        operator: CompareOp,
        value: VariableValue,
    },
    /// Variable has been collected (and is not empty).
    Exists { variable: String },
}

impl Condition {
    pub fn equals(variable: impl Into<String>, value: impl Into<VariableValue>) -> Self {
        Self::Equals {
            variable: variable.into(),
            value: value.into(),
        }
    }

    pub fn compare(
        variable: impl Into<String>,
        operator: CompareOp,
        value: impl Into<VariableValue>,
    ) -> Self {
        Self::NumericCompare {
            variable: variable.into(),
            operator,
            value: value.into(),
        }
    }

    pub fn contains(variable: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Contains {
            variable: variable.into(),
            value: value.into(),
        }
    }

    /// Variable the condition reads, if any.
    pub fn variable(&self) -> Option<&str> {
        match self {
            Self::Always => None,
            Self::Equals { variable, .. }
            | Self::NotEquals { variable, .. }
            | Self::Contains { variable, .. }
            | Self::OneOf { variable, .. }
            | Self::NumericCompare { variable, .. }
            | Self::Exists { variable } => Some(variable),
        }
    }
}

/// Numeric comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    #[serde(rename = ">", alias = "gt")]
    Gt,
    #[serde(rename = ">=", alias = "gte")]
    Ge,
    #[serde(rename = "<", alias = "lt")]
    Lt,
    #[serde(rename = "<=", alias = "lte")]
    Le,
}

impl CompareOp {
    pub fn apply(self, left: f64, right: f64) -> bool {
        match self {
            Self::Gt => left > right,
            Self::Ge => left >= right,
            Self::Lt => left < right,
            Self::Le => left <= right,
        }
    }
}

impl std::fmt::Display for CompareOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let symbol = match self {
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
        };
        f.write_str(symbol)
    }
}

/// A variable declared by a flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowVariable {
    pub name: String,
    /// Seeded into collected variables when a session starts.
    #[serde(default)]
    pub default: Option<VariableValue>,
    #[serde(default)]
    pub description: String,
}
