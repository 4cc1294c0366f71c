#![no_main]

use kiln_types::BuildTarget;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(target) = BuildTarget::parse(input) {
        // Anything that parses must round-trip through its canonical form.
        let reparsed = BuildTarget::parse(&target.canonical()).expect("canonical reparse");
        assert_eq!(reparsed, target);
    }
});
