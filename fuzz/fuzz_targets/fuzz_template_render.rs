#![no_main]

use libfuzzer_sys::fuzz_target;

use chatflow::flows::template::render;
use chatflow::values::Variables;

fuzz_target!(|data: &str| {
    // Unbalanced braces and odd placeholder names must never panic, and
    // rendering must not loop on its own output.
    let mut variables = Variables::new();
    variables.set("name", "Ana {name}");
    variables.set("edad", 20i64);
    let context = Variables::new();

    let rendered = render(data, &variables, &context);
    assert!(rendered.unresolved.len() <= data.len());
});
