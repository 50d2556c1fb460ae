#![no_main]

use ctest::coverage::parse_summary;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Coverage tool output is decoded lossily before parsing
    let text = String::from_utf8_lossy(data);
    for file in parse_summary(&text) {
        assert!(file.lines_percent >= 0.0);
    }
});
