//! Deterministic stand-in crypto suite for exercising the protocol layer.
//!
//! The signature scheme works in the multiplicative group mod the
//! Mersenne prime 2^127 - 1 with generator 2: "points" are group
//! elements, scalar multiplication is modular multiplication, so the
//! commutativity BAUTH needs (`dh(a, B) == dh(b, A)`) holds. Signatures
//! are recomputable from the public element because scalar -> element is
//! invertible here. None of this is secure; all of it is reproducible.

#![allow(dead_code)]

use btok::cvc::{self, CvcFields, Date};
use btok::prim::{CertValidator, Kdf, Level, SigScheme, SymCipher};
use btok::{Error, Result};

use hkdf::Hkdf;
use rand_core::{CryptoRng, RngCore};
use sha2::{Digest, Sha256};

const P: u128 = (1u128 << 127) - 1;
const G: u128 = 2;
/// Inverse of the generator: (P + 1) / 2.
const G_INV: u128 = 1u128 << 126;

fn mul_wide(a: u128, b: u128) -> (u128, u128) {
    let (a1, a0) = (a >> 64, a & u128::from(u64::MAX));
    let (b1, b0) = (b >> 64, b & u128::from(u64::MAX));
    let ll = a0 * b0;
    let (mid, mid_c) = (a0 * b1).overflowing_add(a1 * b0);
    let (lo, lo_c) = ll.overflowing_add(mid << 64);
    let hi = (a1 * b1)
        .wrapping_add(mid >> 64)
        .wrapping_add(u128::from(mid_c) << 64)
        .wrapping_add(u128::from(lo_c));
    (hi, lo)
}

fn mulmod(a: u128, b: u128) -> u128 {
    let (hi, lo) = mul_wide(a % P, b % P);
    // hi * 2^128 + lo, with 2^127 == 1 (mod P), folds to 2*hi + lo.
    let mut r = (lo & P) + (lo >> 127) + (hi << 1);
    while r >= P {
        r -= P;
    }
    r
}

fn read_scalar(bytes: &[u8]) -> Result<u128> {
    if bytes.len() < 16 {
        return Err(Error::BadParams);
    }
    let mut be = [0u8; 16];
    be.copy_from_slice(&bytes[..16]);
    Ok(u128::from_be_bytes(be) % P)
}

fn embed(value: u128, len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    out[..16].copy_from_slice(&value.to_be_bytes());
    out
}

pub struct TestScheme {
    level: Level,
}

impl TestScheme {
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    fn sign_with_scalar(&self, x: u128, msg: &[u8]) -> Vec<u8> {
        let mut h = Sha256::new();
        h.update(b"test-sig");
        h.update(x.to_be_bytes());
        h.update(msg);
        let prk = h.finalize();
        let mut sig = vec![0u8; self.level.sig_len()];
        Hkdf::<Sha256>::from_prk(&prk)
            .expect("prk is a full digest")
            .expand(b"sig", &mut sig)
            .expect("sig_len is well under the expand limit");
        sig
    }
}

impl SigScheme for TestScheme {
    fn level(&self) -> Level {
        self.level
    }

    fn gen_keypair(&self, rng: &mut dyn rand_core::CryptoRngCore) -> Result<(Vec<u8>, Vec<u8>)> {
        let mut raw = [0u8; 16];
        rng.try_fill_bytes(&mut raw).map_err(|_| Error::BadEntropy)?;
        // Uniform-enough scalar in [1, P-1].
        let x = u128::from_be_bytes(raw) % (P - 1) + 1;
        let sk = embed(x, self.level.private_key_len());
        let pk = embed(mulmod(G, x), self.level.public_key_len());
        Ok((sk, pk))
    }

    fn derive_pub(&self, sk: &[u8]) -> Result<Vec<u8>> {
        if sk.len() != self.level.private_key_len() {
            return Err(Error::BadParams);
        }
        let x = read_scalar(sk)?;
        Ok(embed(mulmod(G, x), self.level.public_key_len()))
    }

    fn sign(&self, sk: &[u8], msg: &[u8]) -> Result<Vec<u8>> {
        let x = read_scalar(sk)?;
        Ok(self.sign_with_scalar(x, msg))
    }

    fn verify(&self, pk: &[u8], msg: &[u8], sig: &[u8]) -> bool {
        let Ok(point) = read_scalar(pk) else {
            return false;
        };
        let x = mulmod(point, G_INV);
        sig == self.sign_with_scalar(x, msg).as_slice()
    }

    fn dh(&self, sk: &[u8], peer_pk: &[u8]) -> Result<Vec<u8>> {
        let x = read_scalar(sk)?;
        let y = read_scalar(peer_pk)?;
        let z = mulmod(x, y);
        let mut h = Sha256::new();
        h.update(b"test-dh");
        h.update(z.to_be_bytes());
        Ok(h.finalize().to_vec())
    }
}

pub struct TestCipher;

impl SymCipher for TestCipher {
    fn ctr(&self, key: &[u8; 32], iv: &[u8; 16], buf: &mut [u8]) {
        let mut block = 0u32;
        for chunk in buf.chunks_mut(32) {
            let mut h = Sha256::new();
            h.update(b"test-ctr");
            h.update(key);
            h.update(iv);
            h.update(block.to_be_bytes());
            let ks = h.finalize();
            for (b, k) in chunk.iter_mut().zip(ks) {
                *b ^= k;
            }
            block += 1;
        }
    }

    fn mac(&self, key: &[u8; 32], data: &[u8]) -> [u8; 8] {
        let mut h = Sha256::new();
        h.update(b"test-mac");
        h.update(key);
        h.update((data.len() as u64).to_be_bytes());
        h.update(data);
        let digest = h.finalize();
        let mut mac = [0u8; 8];
        mac.copy_from_slice(&digest[..8]);
        mac
    }
}

pub struct TestKdf;

impl Kdf for TestKdf {
    fn derive(&self, ikm: &[u8], salt: &[u8], info: &[u8], out: &mut [u8]) -> Result<()> {
        let salt = (!salt.is_empty()).then_some(salt);
        Hkdf::<Sha256>::new(salt, ikm)
            .expand(info, out)
            .map_err(|_| Error::BadInput)
    }
}

/// Deterministic xorshift RNG for reproducible keypairs.
pub struct SeedRng(pub u64);

impl RngCore for SeedRng {
    fn next_u32(&mut self) -> u32 {
        self.next_u64() as u32
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.0 | 1;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(8) {
            let bytes = self.next_u64().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> core::result::Result<(), rand_core::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

impl CryptoRng for SeedRng {}

/// Validates terminal certificates against a fixed trust anchor.
pub struct ChainValidator<'a> {
    pub scheme: &'a dyn SigScheme,
    pub parent: CvcFields,
    pub now: Date,
}

impl CertValidator for ChainValidator<'_> {
    fn validate(&self, cert: &[u8]) -> Result<CvcFields> {
        cvc::validate(cert, &self.parent, self.scheme, Some(&self.now))
    }
}

// ---------------------------------------------------------------------------
// Fixture builders
// ---------------------------------------------------------------------------

pub fn fields(authority: &str, holder: &str, pubkey: Vec<u8>) -> CvcFields {
    CvcFields {
        authority: authority.into(),
        holder: holder.into(),
        from: Date([2, 2, 0, 7, 0, 7]),
        until: Date([9, 9, 0, 7, 0, 7]),
        hat_eid: [0xEE; 5],
        hat_esign: [0x77; 2],
        pubkey,
    }
}

/// A date inside every fixture validity window.
pub fn mid_window() -> Date {
    Date([5, 0, 0, 1, 0, 1])
}

/// Self-signed certificate plus its private key.
pub fn self_signed(
    scheme: &dyn SigScheme,
    authority: &str,
    holder: &str,
    rng: &mut SeedRng,
) -> (Vec<u8>, Vec<u8>, CvcFields) {
    let (sk, pk) = scheme.gen_keypair(rng).unwrap();
    let f = fields(authority, holder, pk);
    let der = cvc::wrap(&f, &sk, scheme).unwrap();
    (der, sk, f)
}
