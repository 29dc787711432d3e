//! Fuzz target: `parse_fan_payload`
//!
//! The first byte picks the fan traits; the rest is the client write.
//! The parser must never panic and must never yield a speed outside
//! `0..=speed_count`.
//!
//! cargo fuzz run fuzz_fan_payload

#![no_main]

use blectl::app::components::FanTraits;
use blectl::app::handler::parse_fan_payload;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((&selector, payload)) = data.split_first() else {
        return;
    };
    let traits = FanTraits {
        speed: selector & 0x01 != 0,
        speed_count: u16::from(selector >> 3).max(1),
        oscillation: selector & 0x02 != 0,
        direction: selector & 0x04 != 0,
    };

    let call = parse_fan_payload(payload, &traits);
    if let Some(speed) = call.speed {
        assert!(traits.speed, "speed parsed for a fan without speed");
        assert!(speed <= traits.speed_count, "speed out of range");
    }
    if call.oscillating.is_some() {
        assert!(traits.oscillation);
    }
    if call.direction.is_some() {
        assert!(traits.direction);
    }
});
