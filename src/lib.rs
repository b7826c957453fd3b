//! # btok
//!
//! Token interaction layer of STB 34.101.79: secure messaging over
//! ISO 7816-4 APDUs and the BAUTH authenticated key agreement, with the
//! CV-certificate format that bootstraps trust between a terminal and a
//! card-terminal.
//!
//! The crypto primitives themselves (the belt cipher/MAC/KDF family and
//! the bign signature scheme) are *not* implemented here; callers supply
//! them through the traits in [`prim`]. The crate owns the protocol
//! logic: wire formats, state machines, transcripts and key schedules.
//!
//! ## Session flow
//!
//! ```text
//! T: BauthState::start ----M2---> already started: CT
//!    t_step3            <--M2---- ct_step2
//!    ----M3---------------------> ct_step4 --(kcb)--> M4
//!    t_step5            <--M4----
//!    session::establish           session::establish
//!    SmState (Terminal)           SmState (CardTerminal)
//! ```
//!
//! Afterwards every APDU goes through `sm::wrap_cmd` / `sm::unwrap_cmd`
//! and `sm::wrap_resp` / `sm::unwrap_resp`, with both ends advancing the
//! counter in lockstep.
//!
//! ## Security properties
//!
//! - MAC and confirmation comparisons are constant-time (`subtle`)
//! - key material, scalars and seeds are zeroized on drop (`zeroize`)
//! - every state machine fails closed: one error and the state is terminal
//! - no global state; entropy is injected by the caller

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(unsafe_code)]

extern crate alloc;

mod error;
mod tlv;

pub mod apdu;
pub mod bauth;
pub mod cvc;
pub mod prim;
pub mod rng;
pub mod session;
pub mod sm;

pub use apdu::{ApduCmd, ApduResp};
pub use bauth::{BauthSettings, BauthState};
pub use cvc::{CvcFields, Date};
pub use error::{Error, Result};
pub use prim::{CertValidator, Kdf, Level, SigScheme, SymCipher};
pub use sm::{Role, SmState};
