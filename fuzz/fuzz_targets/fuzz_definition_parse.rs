#![no_main]

use libfuzzer_sys::fuzz_target;

use chatflow::store::definitions::parse_definitions;
use chatflow::store::InMemoryDefinitionStore;

fuzz_target!(|data: &str| {
    // Arbitrary definition files must parse or fail cleanly, and every
    // parsed flow must either build or be reported as rejected.
    let Ok(file) = parse_definitions(data) else {
        return;
    };
    let total = file.flows.len();
    let store = InMemoryDefinitionStore::new();
    let report = store.load(file.flows);
    assert!(report.loaded.len() + report.rejected.len() <= total);
});
