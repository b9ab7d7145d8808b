//! End-to-end conversations through the public engine API.

use async_trait::async_trait;
use chatflow::config::{AttemptPolicy, EngineConfig, ExceededAction};
use chatflow::flows::{
    CompareOp, Condition, FlowDefinition, FlowStep, InputCapture, MatchReason, StepTransition,
    TerminalAction, Trigger, TriggerKind, ValidationRule,
};
use chatflow::handoff::{ChannelHandoffNotifier, HandoffReason};
use chatflow::messages::{
    DeliveryReceipt, DeliveryTarget, Fragment, InboundEvent, Transport, TransportResult,
};
use chatflow::sessions::{AdvanceOutcome, FlowStatus, IgnoreReason, SessionStatus};
use chatflow::store::{InMemoryDefinitionStore, InMemorySessionStore, SessionStore};
use chatflow::values::Variables;
use chatflow::{FlowEngine, InboundOutcome};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_test::assert_ok;

#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingTransport {
    fn texts(&self) -> Vec<String> {
        self.sent.lock().iter().map(|(_, text)| text.clone()).collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(
        &self,
        target: &DeliveryTarget,
        fragment: &Fragment,
    ) -> TransportResult<DeliveryReceipt> {
        self.sent
            .lock()
            .push((target.contact_id.clone(), fragment.content.clone()));
        Ok(DeliveryReceipt { message_id: None })
    }
}

struct Harness {
    engine: FlowEngine,
    definitions: Arc<InMemoryDefinitionStore>,
    sessions: Arc<InMemorySessionStore>,
    transport: Arc<RecordingTransport>,
}

fn harness(config: EngineConfig, flows: Vec<FlowDefinition>) -> Harness {
    let (definitions, report) = InMemoryDefinitionStore::from_definitions(flows);
    assert!(report.is_clean(), "rejected flows: {:?}", report.rejected);
    let sessions = Arc::new(InMemorySessionStore::new());
    let definitions = Arc::new(definitions);
    let transport = Arc::new(RecordingTransport::default());
    let engine = FlowEngine::new(
        config,
        definitions.clone(),
        sessions.clone(),
        transport.clone(),
    );
    Harness {
        engine,
        definitions,
        sessions,
        transport,
    }
}

fn age_flow() -> FlowDefinition {
    FlowDefinition::new("age_check", "Age check")
        .with_entry("ask_age")
        .with_trigger(Trigger::keywords(["hola"]))
        .with_step(FlowStep::question(
            "ask_age",
            "How old are you, {contact_id}?",
            InputCapture::new("edad", ValidationRule::Any),
        ))
        .with_step(FlowStep::terminal("adult").with_message("Welcome, you are {edad}."))
        .with_step(
            FlowStep::terminal("minor")
                .with_message("An agent will help you.")
                .with_action(TerminalAction::HandOff),
        )
        .with_transition(
            StepTransition::new(
                "ask_age",
                "adult",
                Condition::compare("edad", CompareOp::Ge, 18i64),
            )
            .with_priority(1),
        )
        .with_transition(
            StepTransition::new(
                "ask_age",
                "minor",
                Condition::compare("edad", CompareOp::Lt, 18i64),
            )
            .with_priority(2),
        )
}

async fn say(h: &Harness, contact: &str, text: &str) -> InboundOutcome {
    h.engine
        .handle_inbound(&InboundEvent::new(contact, "biz", text))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_non_numeric_age_is_retried_then_branches() {
    let h = harness(EngineConfig::default(), vec![age_flow()]);

    let started = say(&h, "ana", "Hola").await;
    let session_id = started.session_id().unwrap().to_string();
    assert!(matches!(
        started,
        InboundOutcome::Started {
            reason: MatchReason::Trigger(TriggerKind::Keyword),
            ..
        }
    ));

    let outcome = say(&h, "ana", "diez").await;
    assert_eq!(
        outcome.result().unwrap().outcome,
        AdvanceOutcome::Unresolved { attempts: 1 }
    );
    assert_eq!(outcome.result().unwrap().step_id, "ask_age");

    let outcome = say(&h, "ana", "20").await;
    assert_eq!(outcome.result().unwrap().outcome, AdvanceOutcome::Completed);

    let reports = h.engine.deliver_all().await.unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(
        h.transport.texts(),
        vec![
            "How old are you, ana?".to_string(),
            "How old are you, ana?".to_string(),
            "Welcome, you are 20.".to_string(),
        ]
    );

    let stored = h.sessions.get(&session_id).await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Completed);
    assert_eq!(stored.flow_status, FlowStatus::Finished);
    assert_eq!(stored.responses.len(), 2);
    assert!(stored.ended_at.is_some());
}

#[tokio::test]
async fn test_minor_is_handed_off_and_later_messages_are_ignored() {
    let (notifier, mut notices) = ChannelHandoffNotifier::channel(4);
    let mut h = harness(EngineConfig::default(), vec![age_flow()]);
    h.engine = h.engine.with_notifier(Arc::new(notifier));

    say(&h, "leo", "hola").await;
    let outcome = say(&h, "leo", "12").await;
    assert_eq!(
        outcome.result().unwrap().outcome,
        AdvanceOutcome::HandedOff {
            reason: HandoffReason::TerminalStep
        }
    );

    let notice = notices.recv().await.unwrap();
    assert_eq!(notice.contact_id, "leo");
    assert_eq!(notice.step_id, "minor");
    assert_eq!(notice.reason, HandoffReason::TerminalStep);

    let outcome = say(&h, "leo", "hola").await;
    assert!(matches!(
        outcome,
        InboundOutcome::Ignored {
            reason: IgnoreReason::HandedOff,
            ..
        }
    ));
    assert_eq!(h.sessions.len(), 1);
    assert_eq!(h.engine.stats().ignored_events, 1);
}

#[tokio::test]
async fn test_attempt_ceiling_hands_off() {
    let h = harness(EngineConfig::default(), vec![age_flow()]);
    say(&h, "max", "hola").await;

    assert_eq!(
        say(&h, "max", "no").await.result().unwrap().outcome,
        AdvanceOutcome::Unresolved { attempts: 1 }
    );
    assert_eq!(
        say(&h, "max", "no").await.result().unwrap().outcome,
        AdvanceOutcome::Unresolved { attempts: 2 }
    );
    let outcome = say(&h, "max", "no").await;
    let result = outcome.result().unwrap();
    assert_eq!(
        result.outcome,
        AdvanceOutcome::HandedOff {
            reason: HandoffReason::AttemptsExceeded
        }
    );
    assert_eq!(result.status, SessionStatus::HandedOff);
    assert_eq!(h.engine.stats().sessions_handed_off, 1);
}

#[tokio::test]
async fn test_attempt_ceiling_can_abandon() {
    let config = EngineConfig {
        attempts: AttemptPolicy {
            ceiling: 1,
            on_exceeded: ExceededAction::Abandon,
        },
        ..EngineConfig::default()
    };
    let h = harness(config, vec![age_flow()]);
    let session_id = say(&h, "eva", "hola").await.session_id().unwrap().to_string();

    let outcome = say(&h, "eva", "many").await;
    assert_eq!(outcome.result().unwrap().outcome, AdvanceOutcome::Abandoned);

    let stored = h.sessions.get(&session_id).await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Abandoned);

    // a closed session no longer captures the contact
    let outcome = say(&h, "eva", "hola").await;
    assert!(matches!(outcome, InboundOutcome::Started { .. }));
    assert_ne!(outcome.session_id(), Some(session_id.as_str()));
}

#[tokio::test]
async fn test_default_flow_catches_unmatched_messages() {
    let fallback = FlowDefinition::new("fallback", "Fallback")
        .with_entry("sorry")
        .as_default()
        .with_step(FlowStep::terminal("sorry").with_message("Sorry, I did not get \"{last_message}\"."));
    let h = harness(EngineConfig::default(), vec![age_flow(), fallback.clone()]);

    let outcome = say(&h, "zoe", "what?").await;
    match outcome {
        InboundOutcome::Started {
            flow_id,
            reason,
            result,
            ..
        } => {
            assert_eq!(flow_id, "fallback");
            assert_eq!(reason, MatchReason::Default);
            assert_eq!(result.outcome, AdvanceOutcome::Completed);
            assert_eq!(
                result.fragments[0].content,
                "Sorry, I did not get \"what?\"."
            );
        }
        other => panic!("expected Started, got {:?}", other),
    }

    let config = EngineConfig {
        use_default_flow: false,
        ..EngineConfig::default()
    };
    let h = harness(config, vec![age_flow(), fallback]);
    assert_eq!(say(&h, "zoe", "what?").await, InboundOutcome::NoFlowMatched);
}

#[tokio::test]
async fn test_template_reference_beats_keyword() {
    let promo = FlowDefinition::new("promo", "Promo reply")
        .with_entry("thanks")
        .with_trigger(Trigger::template("promo_march"))
        .with_step(FlowStep::terminal("thanks").with_message("Thanks for answering {correlation_ref}"));
    let h = harness(EngineConfig::default(), vec![age_flow(), promo]);

    let event = InboundEvent::new("ian", "biz", "hola, yes").with_correlation("promo_march");
    let outcome = h.engine.handle_inbound(&event).await.unwrap();
    match &outcome {
        InboundOutcome::Started { flow_id, reason, .. } => {
            assert_eq!(flow_id, "promo");
            assert_eq!(*reason, MatchReason::Trigger(TriggerKind::Template));
        }
        other => panic!("expected Started, got {:?}", other),
    }

    h.engine.deliver_all().await.unwrap();
    assert_eq!(h.transport.texts(), vec!["Thanks for answering promo_march"]);
}

#[tokio::test]
async fn test_messages_to_agent_keep_handed_off_session_fresh() {
    let config = EngineConfig::default();
    let idle = config.stale_after();
    let h = harness(config, vec![age_flow()]);
    say(&h, "lia", "hola").await;
    let outcome = say(&h, "lia", "9").await;
    let session_id = outcome.session_id().unwrap().to_string();
    let handed_off_at = h.sessions.get(&session_id).await.unwrap().unwrap().last_activity_at;

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert!(matches!(
        say(&h, "lia", "are you there?").await,
        InboundOutcome::Ignored {
            reason: IgnoreReason::HandedOff,
            ..
        }
    ));

    let stored = h.sessions.get(&session_id).await.unwrap().unwrap();
    assert!(stored.last_activity_at > handed_off_at);
    assert_eq!(stored.status, SessionStatus::HandedOff);

    // idle since the hand-off, but not since the last message
    let sweep_at = handed_off_at + idle + chrono::Duration::milliseconds(10);
    assert!(h.engine.sweep_stale(sweep_at).await.unwrap().is_empty());
    let stored = h.sessions.get(&session_id).await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::HandedOff);
}

#[tokio::test]
async fn test_session_on_removed_step_is_abandoned_and_rematched() {
    let h = harness(EngineConfig::default(), vec![age_flow()]);
    let old_id = say(&h, "noa", "hola").await.session_id().unwrap().to_string();

    let edited = FlowDefinition::new("age_check", "Age check")
        .with_entry("ask_years")
        .with_trigger(Trigger::keywords(["hola"]))
        .with_step(FlowStep::question(
            "ask_years",
            "Your age, please?",
            InputCapture::new("edad", ValidationRule::Any),
        ))
        .with_step(FlowStep::terminal("done").with_message("Thanks."))
        .with_transition(StepTransition::always("ask_years", "done"));
    assert_ok!(h.definitions.upsert(edited));

    let outcome = say(&h, "noa", "hola").await;
    match &outcome {
        InboundOutcome::Started {
            session_id, result, ..
        } => {
            assert_ne!(session_id, &old_id);
            assert_eq!(result.step_id, "ask_years");
        }
        other => panic!("expected Started, got {:?}", other),
    }

    let old = h.sessions.get(&old_id).await.unwrap().unwrap();
    assert_eq!(old.status, SessionStatus::Abandoned);
    assert_eq!(h.engine.stats().sessions_abandoned, 1);

    // the contact is not locked out
    let outcome = say(&h, "noa", "33").await;
    assert_eq!(outcome.result().unwrap().outcome, AdvanceOutcome::Completed);
}

#[tokio::test]
async fn test_stale_sessions_are_swept() {
    let h = harness(EngineConfig::default(), vec![age_flow()]);
    let session_id = say(&h, "old", "hola").await.session_id().unwrap().to_string();

    let now = chrono::Utc::now();
    assert!(h.engine.sweep_stale(now).await.unwrap().is_empty());

    let later = now + chrono::Duration::days(2);
    assert_eq!(h.engine.sweep_stale(later).await.unwrap(), vec![session_id.clone()]);

    let stored = h.sessions.get(&session_id).await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Abandoned);
    assert!(h.engine.sweep_stale(later).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_requested_handoff_then_resume_reasks_question() {
    let h = harness(EngineConfig::default(), vec![age_flow()]);
    let session_id = say(&h, "sam", "hola").await.session_id().unwrap().to_string();

    let result = h
        .engine
        .handoff(&session_id, Some("agent-7".into()))
        .await
        .unwrap();
    assert_eq!(
        result.outcome,
        AdvanceOutcome::HandedOff {
            reason: HandoffReason::Requested
        }
    );
    assert!(matches!(say(&h, "sam", "30").await, InboundOutcome::Ignored { .. }));

    let result = h.engine.resume(&session_id).await.unwrap();
    assert_eq!(result.outcome, AdvanceOutcome::Resumed);
    assert_eq!(result.step_id, "ask_age");
    assert_eq!(result.fragments.len(), 1);

    let outcome = say(&h, "sam", "30").await;
    assert_eq!(outcome.result().unwrap().outcome, AdvanceOutcome::Completed);

    // resume only applies to handed-off sessions
    assert!(h.engine.resume(&session_id).await.is_err());
}

#[tokio::test]
async fn test_start_flow_refuses_second_open_session() {
    let h = harness(EngineConfig::default(), vec![age_flow()]);
    let mut context = Variables::new();
    context.set("contact_id", "kim");

    let (session_id, result) = assert_ok!(
        h.engine
            .start_flow("age_check", "kim", "biz", context.clone())
            .await
    );
    assert_eq!(result.outcome, AdvanceOutcome::Started);
    assert_eq!(result.fragments[0].content, "How old are you, kim?");

    assert!(h
        .engine
        .start_flow("age_check", "kim", "biz", context)
        .await
        .is_err());

    // the inbound reply continues the business-started session
    let outcome = say(&h, "kim", "40").await;
    assert_eq!(outcome.session_id(), Some(session_id.as_str()));
    assert_eq!(outcome.result().unwrap().outcome, AdvanceOutcome::Completed);
}

#[tokio::test]
async fn test_concurrent_messages_from_one_contact_open_one_session() {
    let h = Arc::new(harness(EngineConfig::default(), vec![age_flow()]));

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let h = Arc::clone(&h);
            tokio::spawn(async move { say(&h, "busy", "hola").await })
        })
        .collect();

    let mut started = 0;
    for task in tasks {
        if matches!(task.await.unwrap(), InboundOutcome::Started { .. }) {
            started += 1;
        }
    }
    assert_eq!(started, 1);
    assert_eq!(h.sessions.len(), 1);
    assert_eq!(h.engine.stats().sessions_started, 1);
}

#[tokio::test]
async fn test_delivery_keeps_order_across_contacts() {
    let h = harness(EngineConfig::default(), vec![age_flow()]);
    say(&h, "a", "hola").await;
    say(&h, "b", "hola").await;
    say(&h, "a", "19").await;

    let reports = h.engine.deliver_all().await.unwrap();
    assert_eq!(reports.iter().map(|r| r.delivered).sum::<usize>(), 3);
    assert!(reports.iter().all(|r| r.remaining == 0 && r.error.is_none()));

    let sent = h.transport.sent.lock().clone();
    let for_a: Vec<_> = sent
        .iter()
        .filter(|(contact, _)| contact == "a")
        .map(|(_, text)| text.as_str())
        .collect();
    assert_eq!(for_a, vec!["How old are you, a?", "Welcome, you are 19."]);

    // nothing left to send
    assert!(h.engine.deliver_all().await.unwrap().is_empty());
}

#[test]
fn test_definitions_load_from_json5() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flows.json5");
    std::fs::write(
        &path,
        r#"{
            // comments are allowed
            flows: [
                { id: "hi", name: "Hi", entry_step: "bye",
                  triggers: [{ type: "keyword", keywords: ["hi"] }],
                  steps: [{ id: "bye", kind: "terminal", messages: [{ content: "Bye" }] }] },
                { id: "broken", name: "Broken", entry_step: "nowhere", steps: [] },
            ],
        }"#,
    )
    .unwrap();

    let (store, report) =
        tokio_test::block_on(InMemoryDefinitionStore::from_file(&path)).unwrap();
    assert_eq!(report.loaded, vec!["hi".to_string()]);
    assert_eq!(report.rejected.len(), 1);
    assert_eq!(report.rejected[0].0, "broken");
    assert_eq!(store.len(), 1);
}
