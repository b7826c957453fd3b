//! Capability traits for the consumed crypto primitives.
//!
//! The token layer implements no algorithms of its own: the signature
//! scheme (bign), the symmetric cipher/MAC (belt) and the KDF are supplied
//! by the caller through these traits. Dispatch is explicit; providers
//! shared between threads must be thread-safe themselves.

extern crate alloc;
use alloc::vec::Vec;

use rand_core::CryptoRngCore;

use crate::cvc::CvcFields;
use crate::error::Result;

/// Security level in bits, selecting the signature-scheme curve.
///
/// All key and signature sizes are derived from the level:
/// private scalar `bits/4` octets, public key `bits/2` octets
/// (two coordinates), signature `3*bits/8` octets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    L128,
    L192,
    L256,
}

impl Level {
    pub const fn bits(self) -> usize {
        match self {
            Self::L128 => 128,
            Self::L192 => 192,
            Self::L256 => 256,
        }
    }

    pub const fn private_key_len(self) -> usize {
        self.bits() / 4
    }

    pub const fn public_key_len(self) -> usize {
        self.bits() / 2
    }

    pub const fn sig_len(self) -> usize {
        3 * self.bits() / 8
    }

    /// Level whose public key occupies `n` octets, if any.
    pub fn from_public_len(n: usize) -> Option<Self> {
        match n {
            64 => Some(Self::L128),
            96 => Some(Self::L192),
            128 => Some(Self::L256),
            _ => None,
        }
    }
}

/// Signature scheme over an elliptic-curve group at a fixed [`Level`].
///
/// `dh` is the commutative point multiplication the key agreement is built
/// on: `dh(a, derive_pub(b)) == dh(b, derive_pub(a))` for valid scalars.
pub trait SigScheme {
    fn level(&self) -> Level;

    /// Generate `(private, public)` with the scalar drawn from `[1, q-1]`.
    ///
    /// Rejection sampling against the group order happens here; an RNG
    /// failure surfaces as [`Error::BadEntropy`](crate::Error::BadEntropy).
    fn gen_keypair(&self, rng: &mut dyn CryptoRngCore) -> Result<(Vec<u8>, Vec<u8>)>;

    /// Recompute the public key of a private scalar.
    fn derive_pub(&self, sk: &[u8]) -> Result<Vec<u8>>;

    fn sign(&self, sk: &[u8], msg: &[u8]) -> Result<Vec<u8>>;

    fn verify(&self, pk: &[u8], msg: &[u8], sig: &[u8]) -> bool;

    /// Multiply the peer's public point by the own private scalar.
    fn dh(&self, sk: &[u8], peer_pk: &[u8]) -> Result<Vec<u8>>;
}

/// Symmetric primitive pair used by secure messaging: a counter-mode
/// keystream (encrypt == decrypt) and an 8-octet MAC.
pub trait SymCipher {
    fn ctr(&self, key: &[u8; 32], iv: &[u8; 16], buf: &mut [u8]);

    fn mac(&self, key: &[u8; 32], data: &[u8]) -> [u8; 8];
}

/// Key derivation: fill `out` from `(ikm, salt, info)`.
pub trait Kdf {
    fn derive(&self, ikm: &[u8], salt: &[u8], info: &[u8], out: &mut [u8]) -> Result<()>;
}

/// How the card-terminal checks a terminal certificate received in-band.
///
/// Implementations typically run [`cvc::validate`](crate::cvc::validate)
/// against a trust anchor and a current date.
pub trait CertValidator {
    fn validate(&self, cert: &[u8]) -> Result<CvcFields>;
}
