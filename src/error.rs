//! Unified error type for the token interaction layer.

use core::fmt;

/// Caller-visible failure kinds.
///
/// Every operation returns one of these; nothing is retried internally and
/// any error leaves the affected state terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Length/range precondition violated, caught before any crypto.
    BadInput,
    /// Certificate malformed, chain mismatch, expired, or signature invalid.
    BadCert,
    /// SM container malformed: unexpected tag order, bad length octets.
    BadSm,
    /// MAC verification failure (SM data object or BAUTH confirmation).
    BadMac,
    /// SM cryptogram content indicator invalid.
    BadPadding,
    /// Operation called in the wrong state.
    BadLogic,
    /// The injected RNG failed.
    BadEntropy,
    /// Scheme parameters inconsistent with the certificate level.
    BadParams,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadInput => write!(f, "invalid input"),
            Self::BadCert => write!(f, "bad certificate"),
            Self::BadSm => write!(f, "malformed secure messaging container"),
            Self::BadMac => write!(f, "authentication failure"),
            Self::BadPadding => write!(f, "bad cryptogram padding"),
            Self::BadLogic => write!(f, "operation out of order"),
            Self::BadEntropy => write!(f, "entropy source failure"),
            Self::BadParams => write!(f, "inconsistent parameters"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

pub type Result<T> = core::result::Result<T, Error>;
