//! Codec round-trips and tamper rejection.

mod common;

use btok::cvc::{self, Date};
use btok::prim::{Level, SigScheme};
use btok::sm::{self, Role, SmState};
use btok::{ApduCmd, ApduResp, Error};

use common::{SeedRng, TestCipher, TestKdf, TestScheme};
use proptest::prelude::*;

// ---------------------------------------------------------------------------
// APDU codec laws
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn cmd_decode_inverts_encode(
        cla in any::<u8>(),
        ins in any::<u8>(),
        p1 in any::<u8>(),
        p2 in any::<u8>(),
        cdf in proptest::collection::vec(any::<u8>(), 0..600),
        rdf_len in 0u32..=65536,
    ) {
        let cmd = ApduCmd::new(cla, ins, p1, p2, &cdf, rdf_len).unwrap();
        let enc = cmd.encode().unwrap();
        prop_assert_eq!(enc.len(), cmd.encoded_len());
        let back = ApduCmd::decode(&enc).unwrap();
        prop_assert_eq!(back, cmd);
    }

    #[test]
    fn resp_decode_inverts_encode(
        rdf in proptest::collection::vec(any::<u8>(), 0..600),
        sw1 in any::<u8>(),
        sw2 in any::<u8>(),
    ) {
        let resp = ApduResp::new(&rdf, sw1, sw2).unwrap();
        let enc = resp.encode().unwrap();
        prop_assert_eq!(enc.len(), resp.encoded_len());
        let back = ApduResp::decode(&enc).unwrap();
        prop_assert_eq!(back, resp);
    }
}

// ---------------------------------------------------------------------------
// CV certificates
// ---------------------------------------------------------------------------

#[test]
fn root_certificate_lifecycle() {
    let scheme = TestScheme::new(Level::L256);
    let mut rng = SeedRng(0xB10C_5EED);

    // Checkable only once a key is attached.
    let mut f = common::fields("BYCA00000000", "BYCA00000000", Vec::new());
    assert_eq!(f.check(), Err(Error::BadInput));
    let (sk, pk) = scheme.gen_keypair(&mut rng).unwrap();
    f.pubkey = pk;
    assert_eq!(f.check(), Ok(()));
    assert_eq!(f.level(), Some(Level::L256));

    // Short names keep the whole certificate under 365 octets.
    f.authority = "BYCA0000".into();
    f.holder = "BYCA0000".into();
    let der = cvc::wrap(&f, &sk, &scheme).unwrap();
    assert!(der.len() < 365);
    assert_eq!(der.len(), cvc::encoded_len(&f, Level::L256).unwrap());

    // Self-signed: verifies under its own embedded key.
    let back = cvc::unwrap(&der, &scheme, &f.pubkey).unwrap();
    assert_eq!(back, f);

    assert_eq!(cvc::matches(&der, &sk, &scheme), Ok(()));
    let (other_sk, _) = scheme.gen_keypair(&mut rng).unwrap();
    assert_eq!(cvc::matches(&der, &other_sk, &scheme), Err(Error::BadCert));
}

#[test]
fn wrap_derives_missing_pubkey() {
    let scheme = TestScheme::new(Level::L128);
    let mut rng = SeedRng(7);
    let (sk, pk) = scheme.gen_keypair(&mut rng).unwrap();
    let f = common::fields("BYCA0000", "TERMINAL", Vec::new());
    let der = cvc::wrap(&f, &sk, &scheme).unwrap();
    assert_eq!(cvc::parse(&der).unwrap().pubkey, pk);
}

#[test]
fn precertificate_chains_to_root() {
    let ca = TestScheme::new(Level::L256);
    let sub = TestScheme::new(Level::L192);
    let mut rng = SeedRng(42);

    let (root_der, root_sk, root) = common::self_signed(&ca, "BYCA0000", "BYCA0000", &mut rng);

    // Pre-certificate: self-signed at its own level.
    let (pre_der, _pre_sk, pre) = common::self_signed(&sub, "BYCA0000", "BYCA1000", &mut rng);
    let parsed = cvc::unwrap(&pre_der, &sub, &pre.pubkey).unwrap();
    assert_eq!(parsed.authority, root.holder);

    // Proper issuance under the root.
    let issued = cvc::issue(&pre, &root_der, &root_sk, &ca).unwrap();
    let validated = cvc::validate(&issued, &root, &ca, Some(&common::mid_window())).unwrap();
    assert_eq!(validated.holder, "BYCA1000");
    assert_eq!(
        cvc::validate_expected(&pre, &issued, &root, &ca, Some(&common::mid_window())),
        Ok(())
    );

    // Both validity bounds are enforced.
    assert_eq!(
        cvc::validate(&issued, &root, &ca, Some(&Date([0, 1, 0, 1, 0, 1]))),
        Err(Error::BadCert)
    );
    assert_eq!(
        cvc::validate(&issued, &root, &ca, Some(&Date([9, 9, 1, 2, 3, 1]))),
        Err(Error::BadCert)
    );
    // No date given: only the signature and name chain matter.
    assert!(cvc::validate(&issued, &root, &ca, None).is_ok());

    // Broken name chain refuses issuance.
    let mut stranger = pre.clone();
    stranger.authority = "BYCAXXXX".into();
    assert_eq!(
        cvc::issue(&stranger, &root_der, &root_sk, &ca),
        Err(Error::BadCert)
    );

    // A mismatched expectation is as bad as a mismatched signature.
    let mut wrong = pre.clone();
    wrong.hat_esign = [0x00; 2];
    assert_eq!(
        cvc::validate_expected(&wrong, &issued, &root, &ca, None),
        Err(Error::BadCert)
    );
}

#[test]
fn tampered_certificate_fails_closed() {
    let scheme = TestScheme::new(Level::L128);
    let mut rng = SeedRng(11);
    let (der, _, f) = common::self_signed(&scheme, "BYCA0000", "BYCA0000", &mut rng);

    for i in 0..der.len() {
        let mut bad = der.clone();
        bad[i] ^= 0x01;
        assert!(
            cvc::unwrap(&bad, &scheme, &f.pubkey).is_err(),
            "byte {} accepted after flip",
            i
        );
    }
}

#[test]
fn peek_len_reports_exact_or_nothing() {
    let scheme = TestScheme::new(Level::L256);
    let mut rng = SeedRng(3);
    let (der, _, _) = common::self_signed(&scheme, "BYCA0000", "BYCA0000", &mut rng);

    assert_eq!(cvc::peek_len(&der, usize::MAX), Some(der.len()));
    assert_eq!(cvc::peek_len(&der, der.len()), Some(der.len()));
    assert_eq!(cvc::peek_len(&der, der.len() - 1), None);
    assert_eq!(cvc::peek_len(&[], 100), None);
}

// ---------------------------------------------------------------------------
// Secure messaging
// ---------------------------------------------------------------------------

#[test]
fn plain_wrap_matches_iso_vector() {
    let cdf = hex::decode("54657374").unwrap();
    let cmd = ApduCmd::new(0x00, 0xA4, 0x04, 0x04, &cdf, 256).unwrap();
    let wire = hex::decode("00a40404045465737400").unwrap();
    assert_eq!(sm::wrap_cmd(&cmd, None).unwrap(), wire);
    assert_eq!(sm::unwrap_cmd(&wire, None).unwrap(), cmd);
}

fn sm_pair() -> (SmState<'static>, SmState<'static>) {
    static CIPHER: TestCipher = TestCipher;
    static KDF: TestKdf = TestKdf;
    let key = [0x5A; 32];
    (
        SmState::start(&CIPHER, &KDF, &key, Role::Terminal),
        SmState::start(&CIPHER, &KDF, &key, Role::CardTerminal),
    )
}

#[test]
fn sm_command_roundtrip() {
    let (mut t, mut ct) = sm_pair();
    let cmd = ApduCmd::new(0x00, 0xA4, 0x04, 0x04, b"Test", 256).unwrap();

    t.ctr_inc();
    let wire = sm::wrap_cmd(&cmd, Some(&t)).unwrap();
    assert_ne!(wire, cmd.encode().unwrap());

    ct.ctr_inc();
    let back = sm::unwrap_cmd(&wire, Some(&ct)).unwrap();
    assert_eq!(back, cmd);
}

#[test]
fn sm_response_roundtrip() {
    let (mut t, mut ct) = sm_pair();
    // Command consumed counter value 1 on both sides.
    t.ctr_inc();
    ct.ctr_inc();

    let resp = ApduResp::new(&[0xE0, 0x12, 0xC0, 0x04, 0x80, 0x10], 0x90, 0x00).unwrap();
    ct.ctr_inc();
    let wire = sm::wrap_resp(&resp, Some(&ct)).unwrap();
    // Trailer carries the real status word in the clear.
    assert_eq!(&wire[wire.len() - 2..], [0x90, 0x00]);

    t.ctr_inc();
    let back = sm::unwrap_resp(&wire, Some(&t)).unwrap();
    assert_eq!(back, resp);
}

#[test]
fn sm_empty_fields() {
    let (mut t, mut ct) = sm_pair();
    t.ctr_inc();
    ct.ctr_inc();

    // No command data, no expected response: MAC DO only.
    let cmd = ApduCmd::new(0x00, 0x20, 0x00, 0x01, &[], 0).unwrap();
    let wire = sm::wrap_cmd(&cmd, Some(&t)).unwrap();
    assert_eq!(sm::unwrap_cmd(&wire, Some(&ct)).unwrap(), cmd);

    t.ctr_inc();
    ct.ctr_inc();
    let resp = ApduResp::new(&[], 0x6A, 0x88).unwrap();
    let wire = sm::wrap_resp(&resp, Some(&ct)).unwrap();
    assert_eq!(sm::unwrap_resp(&wire, Some(&t)).unwrap(), resp);
}

#[test]
fn sm_bit_flips_rejected() {
    let (mut t, mut ct) = sm_pair();
    let cmd = ApduCmd::new(0x00, 0xA4, 0x04, 0x04, b"Test", 256).unwrap();
    t.ctr_inc();
    ct.ctr_inc();
    let wire = sm::wrap_cmd(&cmd, Some(&t)).unwrap();

    // Every octet except the unauthenticated outer Le trailer.
    for i in 0..wire.len() - 1 {
        for bit in 0..8 {
            let mut bad = wire.clone();
            bad[i] ^= 1 << bit;
            assert!(
                sm::unwrap_cmd(&bad, Some(&ct)).is_err(),
                "octet {} bit {} accepted after flip",
                i,
                bit
            );
        }
    }

    // Flipped MAC octet is specifically a MAC failure.
    let mut bad = wire.clone();
    let n = bad.len();
    bad[n - 2] ^= 0x01;
    assert_eq!(sm::unwrap_cmd(&bad, Some(&ct)), Err(Error::BadMac));
}

#[test]
fn sm_response_tamper_rejected() {
    let (mut t, mut ct) = sm_pair();
    t.ctr_inc();
    ct.ctr_inc();
    let resp = ApduResp::new(b"data!", 0x90, 0x00).unwrap();
    let wire = sm::wrap_resp(&resp, Some(&ct)).unwrap();

    for i in 0..wire.len() {
        let mut bad = wire.clone();
        bad[i] ^= 0x01;
        assert!(
            sm::unwrap_resp(&bad, Some(&t)).is_err(),
            "octet {} accepted after flip",
            i
        );
    }
    // The trailer is authenticated even though it travels in the clear.
    let mut bad = wire.clone();
    let n = bad.len();
    bad[n - 1] ^= 0x01;
    assert_eq!(sm::unwrap_resp(&bad, Some(&t)), Err(Error::BadMac));
}

#[test]
fn sm_counter_mismatch_is_mac_failure() {
    let (mut t, mut ct) = sm_pair();
    let cmd = ApduCmd::new(0x00, 0xB0, 0x00, 0x00, b"x", 16).unwrap();

    t.ctr_inc();
    let wire = sm::wrap_cmd(&cmd, Some(&t)).unwrap();
    // Peer skipped its increment.
    assert_eq!(sm::unwrap_cmd(&wire, Some(&ct)), Err(Error::BadMac));
    // One increment catches up, two overshoot.
    ct.ctr_inc();
    assert_eq!(sm::unwrap_cmd(&wire, Some(&ct)).unwrap(), cmd);
    ct.ctr_inc();
    assert_eq!(sm::unwrap_cmd(&wire, Some(&ct)), Err(Error::BadMac));
}

#[test]
fn sm_extended_le_in_do97() {
    let (mut t, mut ct) = sm_pair();
    t.ctr_inc();
    ct.ctr_inc();
    // Le = 65536 travels as two zero octets inside DO-97.
    let cmd = ApduCmd::new(0x00, 0xC0, 0x00, 0x00, &[], 65536).unwrap();
    let wire = sm::wrap_cmd(&cmd, Some(&t)).unwrap();
    let body_start = 5; // cla..p2, Lc
    assert_eq!(&wire[body_start..body_start + 4], [0x97, 0x02, 0x00, 0x00]);
    assert_eq!(sm::unwrap_cmd(&wire, Some(&ct)).unwrap(), cmd);
}
