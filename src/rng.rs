//! System entropy, as an optional outer facility.
//!
//! The protocol core only ever takes an injected `CryptoRngCore`; this
//! module is a convenience for callers that have no entropy source of
//! their own.

use crate::error::{Error, Result};

/// Operating-system RNG, usable wherever the core asks for a
/// `CryptoRngCore`.
pub use rand_core::OsRng as SystemRng;

/// Fill `buf` from the system entropy source.
pub fn fill(buf: &mut [u8]) -> Result<()> {
    getrandom::getrandom(buf).map_err(|_| Error::BadEntropy)
}
