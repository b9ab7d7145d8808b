//! Flow engine
//!
//! Entry point for inbound events and session operations. Composes the
//! trigger matcher, the session state machine, and the delivery queue with
//! explicit collaborators: definition store, session store, transport, and
//! hand-off notifier.
//!
//! Every read-decide-persist sequence on a session runs under that
//! conversation's lock. Transport sends and hand-off notifications happen
//! after the lock is released.

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::flows::{FlowGraph, MatchReason, TriggerInput, TriggerMatcher};
use crate::handoff::{DynHandoffNotifier, HandoffNotice, HandoffReason, LogHandoffNotifier};
use crate::messages::{DynTransport, InboundEvent, OutboundCommand, TransportError};
use crate::sessions::{
    AdvanceOutcome, AdvanceResult, ChatSession, IgnoreReason, SessionGuard, SessionLocks,
    SessionMachine,
};
use crate::store::{DynDefinitionStore, DynSessionStore};
use crate::values::Variables;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Context key holding the text of the latest inbound message.
pub const LAST_MESSAGE_KEY: &str = "last_message";

/// What happened to an inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundOutcome {
    /// A trigger (or the default flow) started a new session.
    Started {
        session_id: String,
        flow_id: String,
        reason: MatchReason,
        result: AdvanceResult,
    },
    /// The event was applied to the contact's open session.
    Advanced {
        session_id: String,
        result: AdvanceResult,
    },
    /// The contact's session exists but does not accept events.
    Ignored {
        session_id: String,
        reason: IgnoreReason,
    },
    /// No open session and no flow matched.
    NoFlowMatched,
}

impl InboundOutcome {
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::Started { session_id, .. }
            | Self::Advanced { session_id, .. }
            | Self::Ignored { session_id, .. } => Some(session_id),
            Self::NoFlowMatched => None,
        }
    }

    pub fn result(&self) -> Option<&AdvanceResult> {
        match self {
            Self::Started { result, .. } | Self::Advanced { result, .. } => Some(result),
            _ => None,
        }
    }

    /// Outbound fragments this event produced, addressed to the contact.
    pub fn command(&self) -> Option<OutboundCommand> {
        self.result()
            .map(AdvanceResult::command)
            .filter(|command| !command.is_empty())
    }
}

/// Outcome of a delivery pass for one session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeliveryReport {
    pub session_id: String,
    pub delivered: usize,
    /// Another pass already owns this session's queue.
    pub busy: bool,
    /// Error that stopped the pass; the cursor did not move past it.
    pub error: Option<String>,
    pub remaining: usize,
}

/// Point-in-time engine counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub sessions_started: u64,
    pub sessions_completed: u64,
    pub sessions_handed_off: u64,
    pub sessions_abandoned: u64,
    pub sessions_resumed: u64,
    pub inputs_rejected: u64,
    pub unresolved_advances: u64,
    pub unmatched_events: u64,
    pub ignored_events: u64,
    pub fragments_delivered: u64,
    pub delivery_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    sessions_started: AtomicU64,
    sessions_completed: AtomicU64,
    sessions_handed_off: AtomicU64,
    sessions_abandoned: AtomicU64,
    sessions_resumed: AtomicU64,
    inputs_rejected: AtomicU64,
    unresolved_advances: AtomicU64,
    unmatched_events: AtomicU64,
    ignored_events: AtomicU64,
    fragments_delivered: AtomicU64,
    delivery_failures: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl Counters {
    fn snapshot(&self) -> EngineStats {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        EngineStats {
            sessions_started: get(&self.sessions_started),
            sessions_completed: get(&self.sessions_completed),
            sessions_handed_off: get(&self.sessions_handed_off),
            sessions_abandoned: get(&self.sessions_abandoned),
            sessions_resumed: get(&self.sessions_resumed),
            inputs_rejected: get(&self.inputs_rejected),
            unresolved_advances: get(&self.unresolved_advances),
            unmatched_events: get(&self.unmatched_events),
            ignored_events: get(&self.ignored_events),
            fragments_delivered: get(&self.fragments_delivered),
            delivery_failures: get(&self.delivery_failures),
        }
    }

    fn record(&self, outcome: &AdvanceOutcome) {
        match outcome {
            AdvanceOutcome::Started | AdvanceOutcome::Advanced { .. } => {}
            AdvanceOutcome::InputRejected { .. } => bump(&self.inputs_rejected),
            AdvanceOutcome::Unresolved { .. } => bump(&self.unresolved_advances),
            AdvanceOutcome::Completed => bump(&self.sessions_completed),
            AdvanceOutcome::HandedOff { reason } => {
                if *reason == HandoffReason::AttemptsExceeded {
                    bump(&self.unresolved_advances);
                }
                bump(&self.sessions_handed_off)
            }
            AdvanceOutcome::Abandoned => bump(&self.sessions_abandoned),
            AdvanceOutcome::Resumed => bump(&self.sessions_resumed),
            AdvanceOutcome::Ignored { .. } => bump(&self.ignored_events),
        }
    }
}

/// Work to do once the session lock is released.
#[derive(Debug, Default)]
struct AfterUnlock {
    notice: Option<HandoffNotice>,
    has_output: bool,
}

/// The conversational flow engine.
pub struct FlowEngine {
    config: EngineConfig,
    machine: SessionMachine,
    matcher: TriggerMatcher,
    definitions: DynDefinitionStore,
    sessions: DynSessionStore,
    transport: DynTransport,
    notifier: DynHandoffNotifier,
    /// State transitions, keyed by conversation.
    locks: SessionLocks,
    /// Delivery passes, keyed by session id.
    delivery_locks: SessionLocks,
    delivery_notify: Arc<Notify>,
    counters: Counters,
}

impl std::fmt::Debug for FlowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowEngine")
            .field("config", &self.config)
            .field("machine", &self.machine)
            .finish_non_exhaustive()
    }
}

impl FlowEngine {
    pub fn new(
        config: EngineConfig,
        definitions: DynDefinitionStore,
        sessions: DynSessionStore,
        transport: DynTransport,
    ) -> Self {
        Self {
            machine: SessionMachine::from_config(&config),
            matcher: TriggerMatcher::new(config.use_default_flow),
            config,
            definitions,
            sessions,
            transport,
            notifier: Arc::new(LogHandoffNotifier),
            locks: SessionLocks::new(),
            delivery_locks: SessionLocks::new(),
            delivery_notify: Arc::new(Notify::new()),
            counters: Counters::default(),
        }
    }

    /// Set the hand-off notifier.
    pub fn with_notifier(mut self, notifier: DynHandoffNotifier) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Signalled whenever fragments are enqueued.
    pub fn delivery_notify(&self) -> Arc<Notify> {
        Arc::clone(&self.delivery_notify)
    }

    pub fn stats(&self) -> EngineStats {
        self.counters.snapshot()
    }

    /// Process one inbound event.
    pub async fn handle_inbound(&self, event: &InboundEvent) -> EngineResult<InboundOutcome> {
        let key = event.conversation_key();
        let guard = self.locks.acquire(&key).await;

        let (outcome, after) = self.handle_locked(event).await?;

        drop(guard);
        self.run_after_unlock(after).await;
        Ok(outcome)
    }

    async fn handle_locked(
        &self,
        event: &InboundEvent,
    ) -> EngineResult<(InboundOutcome, AfterUnlock)> {
        if let Some(mut session) = self
            .sessions
            .find_open(&event.contact_id, &event.channel_id)
            .await?
        {
            if session.is_handed_off() {
                debug!(session_id = %session.id, "contact is with an agent, ignoring event");
                // the conversation is alive even though the engine stays out of it
                session.touch();
                self.sessions.save(&session).await?;
                bump(&self.counters.ignored_events);
                return Ok((
                    InboundOutcome::Ignored {
                        session_id: session.id,
                        reason: IgnoreReason::HandedOff,
                    },
                    AfterUnlock::default(),
                ));
            }

            let graph = self.definitions.flow(&session.flow_id).await?;
            match graph.filter(|g| g.step(&session.current_step_id).is_some()) {
                Some(graph) => {
                    session.context.set(LAST_MESSAGE_KEY, event.text.clone());
                    let result = self.machine.advance(&graph, &mut session, &event.text)?;
                    self.sessions.save(&session).await?;
                    let after = self.after_transition(&session, &result);
                    return Ok((
                        InboundOutcome::Advanced {
                            session_id: session.id,
                            result,
                        },
                        after,
                    ));
                }
                None => {
                    warn!(
                        session_id = %session.id,
                        flow_id = %session.flow_id,
                        step_id = %session.current_step_id,
                        "flow or current step no longer exists, abandoning session"
                    );
                    let result = self.machine.abandon(&mut session)?;
                    self.sessions.save(&session).await?;
                    self.counters.record(&result.outcome);
                }
            }
        }

        let flows = self.definitions.active_flows().await?;
        let Some(selected) = self.matcher.select(&flows, &TriggerInput::from(event)) else {
            debug!(contact_id = %event.contact_id, "no flow matched");
            bump(&self.counters.unmatched_events);
            return Ok((InboundOutcome::NoFlowMatched, AfterUnlock::default()));
        };

        let mut context = Variables::new();
        context.set(LAST_MESSAGE_KEY, event.text.clone());
        context.set("contact_id", event.contact_id.clone());
        context.set("channel_id", event.channel_id.clone());
        if let Some(reference) = &event.correlation_ref {
            context.set("correlation_ref", reference.clone());
        }

        let (session, result) = self.start_locked(
            &selected.flow,
            &event.contact_id,
            &event.channel_id,
            context,
        )?;
        self.sessions.save(&session).await?;
        let after = self.after_transition(&session, &result);

        Ok((
            InboundOutcome::Started {
                session_id: session.id,
                flow_id: selected.flow.id().to_string(),
                reason: selected.reason,
                result,
            },
            after,
        ))
    }

    /// Start a flow for a contact without an inbound trigger, e.g. after a
    /// business-initiated template send.
    pub async fn start_flow(
        &self,
        flow_id: &str,
        contact_id: &str,
        channel_id: &str,
        context: Variables,
    ) -> EngineResult<(String, AdvanceResult)> {
        let graph = self
            .definitions
            .flow(flow_id)
            .await?
            .ok_or_else(|| EngineError::FlowNotFound(flow_id.to_string()))?;

        let key = crate::messages::inbound::conversation_key(contact_id, channel_id);
        let guard = self.locks.acquire(&key).await;

        if let Some(existing) = self.sessions.find_open(contact_id, channel_id).await? {
            return Err(EngineError::InvalidSessionState {
                session: existing.id,
                status: existing.status.to_string(),
                expected: "no open session for the contact".to_string(),
            });
        }

        let (session, result) = self.start_locked(&graph, contact_id, channel_id, context)?;
        self.sessions.save(&session).await?;
        let after = self.after_transition(&session, &result);

        drop(guard);
        self.run_after_unlock(after).await;
        Ok((session.id, result))
    }

    fn start_locked(
        &self,
        graph: &FlowGraph,
        contact_id: &str,
        channel_id: &str,
        context: Variables,
    ) -> EngineResult<(ChatSession, AdvanceResult)> {
        let (session, result) = self.machine.start(graph, contact_id, channel_id, context)?;
        bump(&self.counters.sessions_started);
        Ok((session, result))
    }

    /// Hand an active session to a human agent.
    pub async fn handoff(
        &self,
        session_id: &str,
        agent_id: Option<String>,
    ) -> EngineResult<AdvanceResult> {
        let (guard, mut session) = self.lock_session(session_id).await?;
        let result = self.machine.handoff(&mut session, agent_id)?;
        self.sessions.save(&session).await?;
        let after = self.after_transition(&session, &result);
        drop(guard);
        self.run_after_unlock(after).await;
        Ok(result)
    }

    /// Return a handed-off session to automated control.
    pub async fn resume(&self, session_id: &str) -> EngineResult<AdvanceResult> {
        let (guard, mut session) = self.lock_session(session_id).await?;
        let graph = self
            .definitions
            .flow(&session.flow_id)
            .await?
            .ok_or_else(|| EngineError::FlowNotFound(session.flow_id.clone()))?;
        let result = self.machine.resume(&graph, &mut session)?;
        self.sessions.save(&session).await?;
        let after = self.after_transition(&session, &result);
        drop(guard);
        self.run_after_unlock(after).await;
        Ok(result)
    }

    /// Close an open session without completing it.
    pub async fn abandon(&self, session_id: &str) -> EngineResult<AdvanceResult> {
        let (guard, mut session) = self.lock_session(session_id).await?;
        let result = self.machine.abandon(&mut session)?;
        self.sessions.save(&session).await?;
        self.counters.record(&result.outcome);
        drop(guard);
        Ok(result)
    }

    /// Abandon open sessions idle longer than the configured threshold.
    ///
    /// Meant to be called by an external scheduler; returns the ids of the
    /// abandoned sessions.
    pub async fn sweep_stale(&self, now: DateTime<Utc>) -> EngineResult<Vec<String>> {
        let idle = self.config.stale_after();
        let candidates: Vec<_> = self
            .sessions
            .list_open()
            .await?
            .into_iter()
            .filter(|s| s.is_stale(now, idle))
            .map(|s| s.id)
            .collect();

        let mut abandoned = Vec::new();
        for session_id in candidates {
            let (_guard, mut session) = match self.lock_session(&session_id).await {
                Ok(locked) => locked,
                Err(EngineError::SessionNotFound(_)) => {
                    debug!(session_id = %session_id, "session vanished before sweep");
                    continue;
                }
                Err(e) => return Err(e),
            };
            // activity may have happened while waiting for the lock
            if !session.is_open() || !session.is_stale(now, idle) {
                continue;
            }
            let result = self.machine.abandon(&mut session)?;
            self.sessions.save(&session).await?;
            self.counters.record(&result.outcome);
            abandoned.push(session_id);
        }

        if !abandoned.is_empty() {
            info!(count = abandoned.len(), "abandoned stale sessions");
        }
        Ok(abandoned)
    }

    /// Deliver a session's queued fragments in order, one at a time.
    ///
    /// Stops at the first transport error without moving the cursor past the
    /// failed fragment.
    pub async fn deliver_pending(&self, session_id: &str) -> EngineResult<DeliveryReport> {
        let mut report = DeliveryReport {
            session_id: session_id.to_string(),
            ..DeliveryReport::default()
        };

        let Some(_delivery) = self.delivery_locks.try_acquire(session_id) else {
            report.busy = true;
            return Ok(report);
        };

        loop {
            let (entry, target) = {
                let (_guard, mut session) = self.lock_session(session_id).await?;
                let Some(entry) = session.mark_in_flight() else {
                    report.remaining = 0;
                    break;
                };
                self.sessions.save(&session).await?;
                (entry, session.target())
            };

            let sent = self.transport.send(&target, &entry.fragment).await;

            let (_guard, mut session) = self.lock_session(session_id).await?;
            match sent {
                Ok(receipt) => {
                    session.acknowledge(entry.position)?;
                    if !session.has_pending() {
                        session.compact_queue();
                    }
                    report.remaining = session.pending_len();
                    self.sessions.save(&session).await?;
                    report.delivered += 1;
                    bump(&self.counters.fragments_delivered);
                    debug!(
                        session_id = %session_id,
                        position = entry.position,
                        message_id = ?receipt.message_id,
                        "fragment delivered"
                    );
                }
                Err(e) => {
                    session.record_failure(entry.position, &e.to_string());
                    report.remaining = session.pending_len();
                    self.sessions.save(&session).await?;
                    bump(&self.counters.delivery_failures);
                    log_delivery_failure(session_id, entry.position, &e);
                    report.error = Some(e.to_string());
                    break;
                }
            }
        }

        Ok(report)
    }

    /// Run a delivery pass for every session with pending fragments.
    pub async fn deliver_all(&self) -> EngineResult<Vec<DeliveryReport>> {
        let ids = self.sessions.with_pending_delivery().await?;
        let passes = ids.iter().map(|id| self.deliver_pending(id));
        let mut reports = Vec::with_capacity(ids.len());
        for result in join_all(passes).await {
            match result {
                Ok(report) => reports.push(report),
                Err(e) => warn!(error = %e, "delivery pass failed"),
            }
        }
        Ok(reports)
    }

    /// Prune idle lock slots.
    pub fn prune_locks(&self) -> usize {
        self.locks.prune() + self.delivery_locks.prune()
    }

    /// Lock slots currently tracked, held or idle.
    pub fn lock_slots(&self) -> usize {
        self.locks.len() + self.delivery_locks.len()
    }

    async fn lock_session(&self, session_id: &str) -> EngineResult<(SessionGuard, ChatSession)> {
        let key = self
            .sessions
            .get(session_id)
            .await?
            .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))?
            .conversation_key();

        let guard = self.locks.acquire(&key).await;
        // re-read under the lock
        let session = self
            .sessions
            .get(session_id)
            .await?
            .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))?;
        Ok((guard, session))
    }

    fn after_transition(&self, session: &ChatSession, result: &AdvanceResult) -> AfterUnlock {
        self.counters.record(&result.outcome);

        let notice = match result.outcome {
            AdvanceOutcome::HandedOff { reason } => Some(HandoffNotice {
                session_id: session.id.clone(),
                contact_id: session.contact_id.clone(),
                channel_id: session.channel_id.clone(),
                flow_id: session.flow_id.clone(),
                step_id: session.current_step_id.clone(),
                reason,
                agent_id: session.assigned_agent_id.clone(),
                at: session.assigned_at.unwrap_or_else(Utc::now),
            }),
            _ => None,
        };

        AfterUnlock {
            notice,
            has_output: !result.fragments.is_empty(),
        }
    }

    async fn run_after_unlock(&self, after: AfterUnlock) {
        if after.has_output {
            self.delivery_notify.notify_one();
        }
        if let Some(notice) = after.notice {
            self.notifier.notify(notice).await;
        }
    }
}

fn log_delivery_failure(session_id: &str, position: usize, error: &TransportError) {
    if error.is_retryable() {
        debug!(session_id = %session_id, position, error = %error, "delivery failed, will retry");
    } else {
        warn!(session_id = %session_id, position, error = %error, "delivery failed");
    }
}
