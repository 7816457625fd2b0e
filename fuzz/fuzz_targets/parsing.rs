#![no_main]
use libfuzzer_sys::fuzz_target;
use pickle_engine::{value_from_slice, value_to_vec, DeOptions, SerOptions};

fuzz_target!(|data: &[u8]| {
    if let Ok(value) = value_from_slice(data, DeOptions::new().lenient_memo()) {
        // Whatever decodes must encode again, unless it nests too deeply.
        let _ = value_to_vec(&value, SerOptions::new().highest_protocol());
    }
});
