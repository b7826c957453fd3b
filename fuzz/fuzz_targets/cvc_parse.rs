#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = btok::cvc::peek_len(data, 4096);
    if let Ok(fields) = btok::cvc::parse(data) {
        // Anything that parses must satisfy the pure checks.
        fields.check().unwrap();
    }
});
