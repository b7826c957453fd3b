#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(cmd) = btok::ApduCmd::decode(data) {
        // Canonical inputs must round-trip exactly.
        assert_eq!(cmd.encode().unwrap(), data);
    }
    if let Ok(resp) = btok::ApduResp::decode(data) {
        assert_eq!(resp.encode().unwrap(), data);
    }
});
