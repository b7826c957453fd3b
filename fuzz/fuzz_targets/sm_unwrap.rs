#![no_main]

use btok::sm::{self, Role, SmState};
use libfuzzer_sys::fuzz_target;

#[path = "../../tests/common/mod.rs"]
mod common;
use common::{TestCipher, TestKdf};

static CIPHER: TestCipher = TestCipher;
static KDF: TestKdf = TestKdf;

fuzz_target!(|data: &[u8]| {
    let mut ct = SmState::start(&CIPHER, &KDF, &[0x42u8; 32], Role::CardTerminal);
    ct.ctr_inc();
    let _ = sm::unwrap_cmd(data, Some(&ct));

    let mut t = SmState::start(&CIPHER, &KDF, &[0x42u8; 32], Role::Terminal);
    t.ctr_inc();
    let _ = sm::unwrap_resp(data, Some(&t));
});
