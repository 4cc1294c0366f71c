#![no_main]

use std::fs;

use kiln::config::{config_path, load_config};
use libfuzzer_sys::fuzz_target;
use tempfile::tempdir;

fuzz_target!(|data: &[u8]| {
    let td = match tempdir() {
        Ok(v) => v,
        Err(_) => return,
    };

    if fs::write(config_path(td.path()), data).is_ok() {
        let _ = load_config(td.path());
    }
});
