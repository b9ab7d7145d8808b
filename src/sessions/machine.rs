//! Session state machine
//!
//! Pure over a `&mut ChatSession` and the session's `FlowGraph`: no I/O, no
//! locking. Callers hold the conversation's exclusion token and persist the
//! session afterwards.
//!
//! After a step is entered, `question` steps wait for a reply, `terminal`
//! steps close the session, and `message`/`condition` steps resolve their
//! transitions immediately and keep going, up to `max_chained_steps` per
//! event. A pass-through step that does not resolve leaves the session
//! waiting on it without counting an attempt.

use super::session::{CapturedResponse, ChatSession, FlowStatus, SessionStatus};
use crate::config::{AttemptPolicy, EngineConfig, ExceededAction};
use crate::error::{DefinitionError, EngineError, EngineResult};
use crate::flows::graph::FlowGraph;
use crate::flows::interpreter::{render_retry, render_step, validate_step_input};
use crate::flows::model::{FlowStep, StepKind, TerminalAction};
use crate::flows::resolver::{resolve, Resolution};
use crate::handoff::HandoffReason;
use crate::messages::{DeliveryTarget, Fragment, OutboundCommand};
use crate::values::Variables;
use chrono::Utc;
use tracing::{debug, info, warn};

/// Why an event did not touch the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// A human agent owns the conversation.
    HandedOff,
    /// The session is completed or abandoned.
    Closed,
}

/// What a state machine operation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvanceOutcome {
    Started,
    /// Moved from one step to another (possibly through pass-through steps).
    Advanced { from: String, to: String },
    /// The reply failed validation; the question was asked again.
    InputRejected { attempts: u32 },
    /// No transition matched; the session stays put.
    Unresolved { attempts: u32 },
    /// Reached a terminal step that completes the session.
    Completed,
    HandedOff { reason: HandoffReason },
    Abandoned,
    /// Returned from hand-off to automated control.
    Resumed,
    Ignored { reason: IgnoreReason },
}

/// Result of a state machine operation.
#[derive(Debug, Clone, PartialEq)]
pub struct AdvanceResult {
    pub outcome: AdvanceOutcome,
    /// Fragments produced by this operation, already enqueued on the session.
    pub fragments: Vec<Fragment>,
    pub status: SessionStatus,
    pub flow_status: FlowStatus,
    pub step_id: String,
    pub session_id: String,
    pub target: DeliveryTarget,
}

impl AdvanceResult {
    fn new(session: &ChatSession, outcome: AdvanceOutcome, fragments: Vec<Fragment>) -> Self {
        Self {
            outcome,
            fragments,
            status: session.status,
            flow_status: session.flow_status,
            step_id: session.current_step_id.clone(),
            session_id: session.id.clone(),
            target: session.target(),
        }
    }

    /// The fragments addressed to the session's contact.
    pub fn command(&self) -> OutboundCommand {
        OutboundCommand {
            session_id: self.session_id.clone(),
            target: self.target.clone(),
            fragments: self.fragments.clone(),
        }
    }
}

/// Where a step chain came to rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settled {
    AwaitingInput,
    Waiting,
    Completed,
    HandedOff,
}

/// Drives sessions through flow graphs.
#[derive(Debug, Clone, Copy)]
pub struct SessionMachine {
    policy: AttemptPolicy,
    max_chained_steps: usize,
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl SessionMachine {
    pub fn new(policy: AttemptPolicy, max_chained_steps: usize) -> Self {
        Self {
            policy,
            max_chained_steps: max_chained_steps.max(1),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.attempts, config.max_chained_steps)
    }

    pub fn policy(&self) -> AttemptPolicy {
        self.policy
    }

    /// Create a session on the flow's entry step and render it.
    pub fn start(
        &self,
        graph: &FlowGraph,
        contact_id: &str,
        channel_id: &str,
        context: Variables,
    ) -> EngineResult<(ChatSession, AdvanceResult)> {
        if !graph.is_active() {
            return Err(DefinitionError::Inactive {
                flow: graph.id().to_string(),
            }
            .into());
        }

        let mut session = ChatSession::new(contact_id, channel_id, graph.id(), graph.entry_step_id());
        session.context = context;
        session.collected_variables = graph.default_variables().clone();

        let mut fragments = Vec::new();
        let settled = self.enter(graph, &mut session, &mut fragments)?;
        let outcome = match settled {
            Settled::Completed => AdvanceOutcome::Completed,
            Settled::HandedOff => AdvanceOutcome::HandedOff {
                reason: HandoffReason::TerminalStep,
            },
            Settled::AwaitingInput | Settled::Waiting => AdvanceOutcome::Started,
        };

        info!(
            session_id = %session.id,
            contact_id = %session.contact_id,
            flow_id = %session.flow_id,
            step_id = %session.current_step_id,
            "session started"
        );
        let result = AdvanceResult::new(&session, outcome, fragments);
        Ok((session, result))
    }

    /// Apply one inbound reply to the session.
    pub fn advance(
        &self,
        graph: &FlowGraph,
        session: &mut ChatSession,
        reply: &str,
    ) -> EngineResult<AdvanceResult> {
        if session.is_handed_off() {
            debug!(session_id = %session.id, "session handed off, not advancing");
            return Ok(AdvanceResult::new(
                session,
                AdvanceOutcome::Ignored {
                    reason: IgnoreReason::HandedOff,
                },
                Vec::new(),
            ));
        }
        if !session.is_open() {
            return Ok(AdvanceResult::new(
                session,
                AdvanceOutcome::Ignored {
                    reason: IgnoreReason::Closed,
                },
                Vec::new(),
            ));
        }

        session.touch();
        let step = current_step(graph, session)?;
        let mut fragments = Vec::new();

        if step.kind == StepKind::Question {
            if let Some(validated) = validate_step_input(graph, step, reply) {
                match validated {
                    Ok(value) => {
                        if let Some(capture) = &step.input {
                            debug!(
                                session_id = %session.id,
                                step_id = %step.id,
                                variable = %capture.variable,
                                "input captured"
                            );
                            session.responses.push(CapturedResponse {
                                step_id: step.id.clone(),
                                variable: capture.variable.clone(),
                                raw: reply.to_string(),
                                value: value.clone(),
                                received_at: Utc::now(),
                            });
                            session.collected_variables.set(capture.variable.clone(), value);
                        }
                    }
                    Err(rejection) => {
                        session.attempt_count += 1;
                        debug!(
                            session_id = %session.id,
                            step_id = %step.id,
                            attempts = session.attempt_count,
                            reason = %rejection,
                            "input rejected"
                        );
                        if self.policy.is_exceeded(session.attempt_count) {
                            return Ok(self.escalate(session));
                        }
                        self.rerender(session, step, &mut fragments);
                        let attempts = session.attempt_count;
                        return Ok(AdvanceResult::new(
                            session,
                            AdvanceOutcome::InputRejected { attempts },
                            fragments,
                        ));
                    }
                }
            }
        }

        match resolve(graph, step, &session.collected_variables) {
            Resolution::Next { to, .. } => {
                let from = step.id.clone();
                session.move_to(to);
                let outcome = match self.enter(graph, session, &mut fragments)? {
                    Settled::Completed => AdvanceOutcome::Completed,
                    Settled::HandedOff => AdvanceOutcome::HandedOff {
                        reason: HandoffReason::TerminalStep,
                    },
                    Settled::AwaitingInput | Settled::Waiting => AdvanceOutcome::Advanced {
                        from,
                        to: session.current_step_id.clone(),
                    },
                };
                Ok(AdvanceResult::new(session, outcome, fragments))
            }
            Resolution::Terminal => {
                let outcome = match self.finish_terminal(session, step) {
                    Settled::HandedOff => AdvanceOutcome::HandedOff {
                        reason: HandoffReason::TerminalStep,
                    },
                    _ => AdvanceOutcome::Completed,
                };
                Ok(AdvanceResult::new(session, outcome, fragments))
            }
            Resolution::Unresolved => {
                session.attempt_count += 1;
                warn!(
                    session_id = %session.id,
                    flow_id = %session.flow_id,
                    step_id = %step.id,
                    attempts = session.attempt_count,
                    "no transition matched"
                );
                if self.policy.is_exceeded(session.attempt_count) {
                    return Ok(self.escalate(session));
                }
                if step.kind == StepKind::Question {
                    self.rerender(session, step, &mut fragments);
                } else {
                    session.flow_status = FlowStatus::Waiting;
                }
                let attempts = session.attempt_count;
                Ok(AdvanceResult::new(
                    session,
                    AdvanceOutcome::Unresolved { attempts },
                    fragments,
                ))
            }
        }
    }

    /// Transfer an active session to a human agent.
    pub fn handoff(
        &self,
        session: &mut ChatSession,
        agent_id: Option<String>,
    ) -> EngineResult<AdvanceResult> {
        require_status(session, SessionStatus::Active)?;
        mark_handed_off(session, FlowStatus::Interrupted);
        session.assigned_agent_id = agent_id;
        info!(
            session_id = %session.id,
            agent_id = ?session.assigned_agent_id,
            "session handed off on request"
        );
        Ok(AdvanceResult::new(
            session,
            AdvanceOutcome::HandedOff {
                reason: HandoffReason::Requested,
            },
            Vec::new(),
        ))
    }

    /// Return a handed-off session to automated control and re-render its
    /// current step.
    pub fn resume(
        &self,
        graph: &FlowGraph,
        session: &mut ChatSession,
    ) -> EngineResult<AdvanceResult> {
        require_status(session, SessionStatus::HandedOff)?;
        session.assigned_agent_id = None;
        session.assigned_at = None;
        session.attempt_count = 0;
        session.touch();

        // the flow already ran to its hand-off terminal step; nothing is left
        if current_step(graph, session)?.is_terminal() {
            session.finish(SessionStatus::Completed, FlowStatus::Finished);
            info!(
                session_id = %session.id,
                step_id = %session.current_step_id,
                "resumed at terminal step, session completed"
            );
            return Ok(AdvanceResult::new(
                session,
                AdvanceOutcome::Completed,
                Vec::new(),
            ));
        }

        session.status = SessionStatus::Active;
        info!(session_id = %session.id, step_id = %session.current_step_id, "session resumed");

        let mut fragments = Vec::new();
        let outcome = match self.enter(graph, session, &mut fragments)? {
            Settled::Completed => AdvanceOutcome::Completed,
            Settled::HandedOff => AdvanceOutcome::HandedOff {
                reason: HandoffReason::TerminalStep,
            },
            Settled::AwaitingInput | Settled::Waiting => AdvanceOutcome::Resumed,
        };
        Ok(AdvanceResult::new(session, outcome, fragments))
    }

    /// Close an open session without completing it.
    pub fn abandon(&self, session: &mut ChatSession) -> EngineResult<AdvanceResult> {
        if !session.is_open() {
            return Err(invalid_state(session, "active or handed_off"));
        }
        session.finish(SessionStatus::Abandoned, FlowStatus::Interrupted);
        info!(session_id = %session.id, flow_id = %session.flow_id, "session abandoned");
        Ok(AdvanceResult::new(
            session,
            AdvanceOutcome::Abandoned,
            Vec::new(),
        ))
    }

    /// Render the current step and follow pass-through steps.
    fn enter(
        &self,
        graph: &FlowGraph,
        session: &mut ChatSession,
        fragments: &mut Vec<Fragment>,
    ) -> EngineResult<Settled> {
        let mut chained = 0;
        loop {
            let step = current_step(graph, session)?;
            let rendered = render_step(step, &session.collected_variables, &session.context);
            session.enqueue(&step.id, rendered.fragments.clone());
            fragments.extend(rendered.fragments);

            match step.kind {
                StepKind::Question => {
                    session.flow_status = FlowStatus::AwaitingInput;
                    return Ok(Settled::AwaitingInput);
                }
                StepKind::Terminal => return Ok(self.finish_terminal(session, step)),
                StepKind::Message | StepKind::Condition => {
                    match resolve(graph, step, &session.collected_variables) {
                        Resolution::Next { to, .. } if chained < self.max_chained_steps => {
                            chained += 1;
                            session.move_to(to);
                        }
                        Resolution::Next { .. } => {
                            warn!(
                                session_id = %session.id,
                                step_id = %step.id,
                                limit = self.max_chained_steps,
                                "pass-through chain limit reached, waiting for next event"
                            );
                            session.flow_status = FlowStatus::Waiting;
                            return Ok(Settled::Waiting);
                        }
                        Resolution::Unresolved | Resolution::Terminal => {
                            session.flow_status = FlowStatus::Waiting;
                            return Ok(Settled::Waiting);
                        }
                    }
                }
            }
        }
    }

    fn finish_terminal(&self, session: &mut ChatSession, step: &FlowStep) -> Settled {
        match step.action {
            TerminalAction::Complete => {
                session.finish(SessionStatus::Completed, FlowStatus::Finished);
                info!(session_id = %session.id, step_id = %step.id, "session completed");
                Settled::Completed
            }
            TerminalAction::HandOff => {
                mark_handed_off(session, FlowStatus::Finished);
                info!(session_id = %session.id, step_id = %step.id, "flow ended in hand-off");
                Settled::HandedOff
            }
        }
    }

    fn rerender(&self, session: &mut ChatSession, step: &FlowStep, fragments: &mut Vec<Fragment>) {
        let rendered = render_retry(step, &session.collected_variables, &session.context);
        session.enqueue(&step.id, rendered.fragments.clone());
        fragments.extend(rendered.fragments);
        session.flow_status = FlowStatus::AwaitingInput;
    }

    /// Apply the attempt policy.
    fn escalate(&self, session: &mut ChatSession) -> AdvanceResult {
        warn!(
            session_id = %session.id,
            step_id = %session.current_step_id,
            attempts = session.attempt_count,
            ceiling = self.policy.ceiling,
            action = ?self.policy.on_exceeded,
            "attempt ceiling reached"
        );
        let outcome = match self.policy.on_exceeded {
            ExceededAction::HandOff => {
                mark_handed_off(session, FlowStatus::Interrupted);
                AdvanceOutcome::HandedOff {
                    reason: HandoffReason::AttemptsExceeded,
                }
            }
            ExceededAction::Abandon => {
                session.finish(SessionStatus::Abandoned, FlowStatus::Interrupted);
                AdvanceOutcome::Abandoned
            }
        };
        AdvanceResult::new(session, outcome, Vec::new())
    }
}

fn current_step<'g>(graph: &'g FlowGraph, session: &ChatSession) -> EngineResult<&'g FlowStep> {
    graph
        .step(&session.current_step_id)
        .ok_or_else(|| EngineError::UnknownStep {
            flow: graph.id().to_string(),
            step: session.current_step_id.clone(),
        })
}

fn mark_handed_off(session: &mut ChatSession, flow_status: FlowStatus) {
    session.status = SessionStatus::HandedOff;
    session.flow_status = flow_status;
    session.assigned_at = Some(Utc::now());
}

fn require_status(session: &ChatSession, expected: SessionStatus) -> EngineResult<()> {
    if session.status == expected {
        Ok(())
    } else {
        Err(invalid_state(session, expected.as_str()))
    }
}

fn invalid_state(session: &ChatSession, expected: &str) -> EngineError {
    EngineError::InvalidSessionState {
        session: session.id.clone(),
        status: session.status.to_string(),
        expected: expected.to_string(),
    }
}
