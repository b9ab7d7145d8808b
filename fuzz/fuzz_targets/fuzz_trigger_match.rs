#![no_main]

use libfuzzer_sys::fuzz_target;

use chatflow::flows::{FlowDefinition, FlowGraph, FlowStep, Trigger, TriggerInput, TriggerMatcher};
use std::sync::Arc;

fuzz_target!(|data: &str| {
    // First line is the keyword, the rest is the inbound text.
    let (keyword, text) = data.split_once('\n').unwrap_or((data, data));

    let definition = FlowDefinition::new("fuzz", "Fuzz")
        .with_entry("end")
        .with_trigger(Trigger::keywords([keyword]))
        .with_step(FlowStep::terminal("end"));
    let Ok(graph) = FlowGraph::build(definition) else {
        return;
    };

    let flows = vec![Arc::new(graph)];
    let _ = TriggerMatcher::new(true).select(&flows, &TriggerInput::text(text));
});
