//! Fuzz target: `WifiSettings::decode`
//!
//! Stored preference bytes are untrusted after a firmware change. Decoding
//! must return a typed error or settings that encode back to the same
//! record.
//!
//! cargo fuzz run fuzz_wifi_record

#![no_main]

use blectl::app::wifi_settings::{RECORD_LEN, WifiSettings};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(settings) = WifiSettings::decode(data) else {
        return;
    };
    assert_eq!(data.len(), RECORD_LEN);
    assert!(!settings.ssid.is_empty());

    // Bytes after each field's terminator are not significant.
    let reencoded = settings.encode();
    assert_eq!(WifiSettings::decode(&reencoded), Ok(settings));
});
