#![no_main]

use std::fs;

use kiln_state::SuccessDir;
use libfuzzer_sys::fuzz_target;
use tempfile::tempdir;

fuzz_target!(|data: &[u8]| {
    let td = match tempdir() {
        Ok(v) => v,
        Err(_) => return,
    };

    let markers = SuccessDir::new(td.path());
    if fs::write(td.path().join("classes.dex"), data).is_ok() {
        let _ = markers.recorded_hash("classes.dex");
        let _ = markers.entries();
    }
});
