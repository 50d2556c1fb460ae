#![no_main]

use std::path::Path;

use ctest::config::{Config, resolve_str};
use ctest::fixtures::FileNaming;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        // Any override that resolves must validate and classify names without panicking
        if let Ok(config) = resolve_str(&Config::default(), s, Path::new("fuzz.json")) {
            assert!(config.validate().is_ok());
            let _ = FileNaming::new(&config).classify("pos_01_in.txt");
        }
    }
});
