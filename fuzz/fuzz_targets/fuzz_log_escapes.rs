//! Fuzz target: log line cleanup before relay
//!
//! Stripping and truncation run on every relayed log line. They must never
//! panic and the result must fit the characteristic limit.
//!
//! cargo fuzz run fuzz_log_escapes

#![no_main]

use blectl::app::maintenance::{MAX_TEXT_VALUE_LEN, strip_log_escapes, truncate_utf8};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let line = String::from_utf8_lossy(data);
    let clean = strip_log_escapes(&line);
    let cut = truncate_utf8(&clean, MAX_TEXT_VALUE_LEN);

    assert!(cut.len() <= MAX_TEXT_VALUE_LEN);
    assert!(clean.starts_with(cut));
    assert!(clean.len() <= line.len());
});
