//! Hand-off from a finished BAUTH run to a secure-messaging session.

use crate::bauth::BauthState;
use crate::error::Result;
use crate::prim::{Kdf, SymCipher};
use crate::sm::SmState;

/// Turn a completed BAUTH state into this endpoint's SM state.
///
/// The BAUTH state is consumed: the session key moves straight into the
/// SM state and the intermediate copy is zeroized on the way out. The
/// role carries over, so a terminal ends up with a command-wrapping state
/// and a card-terminal with the mirror.
pub fn establish<'a>(
    bauth: BauthState<'_>,
    cipher: &'a dyn SymCipher,
    kdf: &'a dyn Kdf,
) -> Result<SmState<'a>> {
    let role = bauth.role();
    let key = bauth.derive_key()?;
    Ok(SmState::start(cipher, kdf, &key, role))
}
