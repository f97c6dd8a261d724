#![no_main]

use libfuzzer_sys::fuzz_target;
use std::collections::VecDeque;
use std::time::Duration;
use timeshift_core::{DelayBuffer, ManualClock, Timestamp};

fuzz_target!(|data: &[u8]| {
    // Arbitrary store contents behind a zero delay: reads may fail on corrupt frames but must
    // never panic, and must eventually run dry.
    let clock = ManualClock::new(Timestamp::MAX);
    let store: VecDeque<u8> = data.iter().copied().collect();
    let mut buffer = DelayBuffer::with_clock(Duration::ZERO, store, clock);

    let mut dest = [0u8; 97];
    let mut quiet = 0;
    while quiet < 2 {
        match buffer.read(&mut dest) {
            Ok(0) => quiet += 1,
            Ok(_) => quiet = 0,
            Err(_) => quiet = 0,
        }
    }
});
