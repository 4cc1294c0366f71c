#![no_main]

use kiln::args::{RawArgs, validate_args};
use kiln::description::Description;
use kiln::descriptions::PythonTestDescription;
use kiln_types::BuildTarget;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = serde_json::from_slice::<RawArgs>(data) else {
        return;
    };

    let description = PythonTestDescription;
    let target = BuildTarget::new("fuzz", "probe");
    let _ = validate_args(
        description.rule_type(),
        &target,
        &description.arg_specs(),
        &raw,
    );
});
