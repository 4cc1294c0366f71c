#![no_main]

use std::fs;

use kiln::events::{EventLog, events_path};
use libfuzzer_sys::fuzz_target;
use tempfile::tempdir;

fuzz_target!(|data: &[u8]| {
    let td = match tempdir() {
        Ok(v) => v,
        Err(_) => return,
    };

    let path = events_path(td.path());
    if fs::write(&path, data).is_ok() {
        let _ = EventLog::load_from_file(&path);
    }
});
