#![no_main]
use libfuzzer_sys::fuzz_target;
use pickle_engine::{DeOptions, Unpickler};

// Feeding the input byte by byte must not panic either.
fuzz_target!(|data: &[u8]| {
    let mut unpickler = Unpickler::new(DeOptions::new());
    for chunk in data.chunks(1) {
        unpickler.feed(chunk);
        if unpickler.poll().is_err() {
            return;
        }
    }
    unpickler.finish();
    let _ = unpickler.poll();
});
