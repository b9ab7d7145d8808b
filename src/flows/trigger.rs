//! Trigger matching
//!
//! Selects the flow an inbound event starts when the contact has no open
//! session. Each trigger kind carries only what it needs to match; the
//! selection across flows follows a fixed precedence so the outcome never
//! depends on store iteration order.

use super::graph::FlowGraph;
use super::model::{FlowKind, KeywordMatch, Trigger, TriggerMode};
use crate::error::DefinitionError;
use crate::messages::InboundEvent;
use regex::{Regex, RegexBuilder};
use std::cmp::{Ordering, Reverse};
use std::sync::Arc;
use tracing::debug;

/// What a trigger is matched against.
#[derive(Debug, Clone, Copy)]
pub struct TriggerInput<'a> {
    pub text: &'a str,
    pub correlation_ref: Option<&'a str>,
}

impl<'a> TriggerInput<'a> {
    pub fn text(text: &'a str) -> Self {
        Self {
            text,
            correlation_ref: None,
        }
    }
}

impl<'a> From<&'a InboundEvent> for TriggerInput<'a> {
    fn from(event: &'a InboundEvent) -> Self {
        Self {
            text: &event.text,
            correlation_ref: event.correlation_ref.as_deref(),
        }
    }
}

/// Trigger kinds ordered by specificity (weakest first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TriggerKind {
    Keyword,
    Regex,
    Template,
}

/// A trigger ready for matching.
#[derive(Debug, Clone)]
pub enum CompiledTrigger {
    Keyword {
        /// Normalized once at build time.
        keywords: Vec<String>,
        match_type: KeywordMatch,
        case_sensitive: bool,
    },
    Regex {
        regex: Regex,
    },
    Template {
        template: String,
    },
}

impl CompiledTrigger {
    /// Compile a trigger, inheriting the flow's case sensitivity unless the
    /// trigger overrides it.
    pub fn compile(
        trigger: &Trigger,
        flow_case_sensitive: bool,
        flow_id: &str,
    ) -> Result<Self, DefinitionError> {
        match trigger {
            Trigger::Keyword {
                keywords,
                match_type,
                case_sensitive,
            } => {
                let case_sensitive = case_sensitive.unwrap_or(flow_case_sensitive);
                let keywords = keywords
                    .iter()
                    .map(|k| normalize(k, case_sensitive))
                    .filter(|k| !k.is_empty())
                    .collect();
                Ok(Self::Keyword {
                    keywords,
                    match_type: *match_type,
                    case_sensitive,
                })
            }
            Trigger::Regex {
                pattern,
                case_sensitive,
            } => {
                let regex = RegexBuilder::new(pattern)
                    .case_insensitive(!case_sensitive.unwrap_or(flow_case_sensitive))
                    .build()
                    .map_err(|e| DefinitionError::InvalidTriggerPattern {
                        flow: flow_id.to_string(),
                        pattern: pattern.clone(),
                        reason: e.to_string(),
                    })?;
                Ok(Self::Regex { regex })
            }
            Trigger::Template { template } => Ok(Self::Template {
                template: template.trim().to_string(),
            }),
        }
    }

    pub fn kind(&self) -> TriggerKind {
        match self {
            Self::Keyword { .. } => TriggerKind::Keyword,
            Self::Regex { .. } => TriggerKind::Regex,
            Self::Template { .. } => TriggerKind::Template,
        }
    }

    /// Whether this trigger matches the input.
    pub fn matches(&self, input: &TriggerInput<'_>) -> bool {
        match self {
            Self::Keyword {
                keywords,
                match_type,
                case_sensitive,
            } => {
                let text = normalize(input.text, *case_sensitive);
                if text.is_empty() {
                    return false;
                }
                keywords
                    .iter()
                    .any(|keyword| keyword_matches(&text, keyword, *match_type))
            }
            Self::Regex { regex } => regex.is_match(input.text),
            Self::Template { template } => input
                .correlation_ref
                .map(|reference| reference.trim() == template)
                .unwrap_or(false),
        }
    }
}

/// Trim, collapse runs of whitespace, and lowercase unless case-sensitive.
fn normalize(text: &str, case_sensitive: bool) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if case_sensitive {
        collapsed
    } else {
        collapsed.to_lowercase()
    }
}

fn words(text: &str) -> Vec<&str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect()
}

fn keyword_matches(text: &str, keyword: &str, match_type: KeywordMatch) -> bool {
    match match_type {
        KeywordMatch::Exact => text == keyword,
        KeywordMatch::Contains => text.contains(keyword),
        KeywordMatch::Word => {
            let needle = words(keyword);
            if needle.is_empty() {
                return false;
            }
            let haystack = words(text);
            haystack
                .windows(needle.len())
                .any(|window| window == needle.as_slice())
        }
    }
}

/// Evaluate a flow's trigger set.
///
/// Returns the strongest trigger kind that matched, or `None` when the flow
/// does not match. A flow without triggers never matches. Outbound flows
/// only answer replies to a business-initiated send, so their keyword and
/// regex triggers are not consulted.
pub fn flow_matches(flow: &FlowGraph, input: &TriggerInput<'_>) -> Option<TriggerKind> {
    let triggers: Vec<&CompiledTrigger> = flow
        .triggers()
        .iter()
        .filter(|t| accepts_text(flow.kind()) || t.kind() == TriggerKind::Template)
        .collect();
    if triggers.is_empty() {
        return None;
    }

    match flow.trigger_mode() {
        // triggers are stored strongest first, so the first hit is the strongest
        TriggerMode::Any => triggers.iter().find(|t| t.matches(input)).map(|t| t.kind()),
        TriggerMode::All => {
            if triggers.iter().all(|t| t.matches(input)) {
                triggers.iter().map(|t| t.kind()).max()
            } else {
                None
            }
        }
    }
}

/// Whether a flow of this direction can start from free inbound text.
fn accepts_text(kind: FlowKind) -> bool {
    matches!(kind, FlowKind::Inbound | FlowKind::Hybrid)
}

/// Why a flow was selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchReason {
    Trigger(TriggerKind),
    /// No trigger matched; the flow is the configured default.
    Default,
}

/// Result of flow selection.
#[derive(Debug, Clone)]
pub struct FlowMatch {
    pub flow: Arc<FlowGraph>,
    pub reason: MatchReason,
}

/// Selects at most one flow for an inbound event.
///
/// Precedence among matching flows:
/// 1. strongest matching trigger kind (template, then regex, then keyword)
/// 2. `all`-mode flows before `any`-mode flows
/// 3. most recently activated flow (flows without an activation time last)
/// 4. smallest flow id
#[derive(Debug, Clone, Copy, Default)]
pub struct TriggerMatcher {
    use_default_flow: bool,
}

impl TriggerMatcher {
    pub fn new(use_default_flow: bool) -> Self {
        Self { use_default_flow }
    }

    pub fn select(&self, flows: &[Arc<FlowGraph>], input: &TriggerInput<'_>) -> Option<FlowMatch> {
        let best = flows
            .iter()
            .filter(|flow| flow.is_active())
            .filter_map(|flow| flow_matches(flow, input).map(|kind| (kind, flow)))
            .min_by(|(kind_a, a), (kind_b, b)| {
                Reverse(*kind_a)
                    .cmp(&Reverse(*kind_b))
                    .then_with(|| mode_rank(a).cmp(&mode_rank(b)))
                    .then_with(|| recency(a, b))
            });

        if let Some((kind, flow)) = best {
            debug!(flow_id = %flow.id(), kind = ?kind, "trigger matched");
            return Some(FlowMatch {
                flow: Arc::clone(flow),
                reason: MatchReason::Trigger(kind),
            });
        }

        if !self.use_default_flow {
            return None;
        }

        flows
            .iter()
            .filter(|flow| flow.is_active() && flow.is_default() && accepts_text(flow.kind()))
            .min_by(|a, b| recency(a, b))
            .map(|flow| {
                debug!(flow_id = %flow.id(), "no trigger matched, using default flow");
                FlowMatch {
                    flow: Arc::clone(flow),
                    reason: MatchReason::Default,
                }
            })
    }
}

fn mode_rank(flow: &FlowGraph) -> u8 {
    match flow.trigger_mode() {
        TriggerMode::All => 0,
        TriggerMode::Any => 1,
    }
}

/// Most recently activated first, then smallest id.
fn recency(a: &FlowGraph, b: &FlowGraph) -> Ordering {
    // Option orders None below Some, so reverse puts newest first and None last
    Reverse(a.activated_at())
        .cmp(&Reverse(b.activated_at()))
        .then_with(|| a.id().cmp(b.id()))
}
