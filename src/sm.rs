//! Secure messaging: counter-keyed authenticated wrapping of APDUs.
//!
//! Commands travel as `[DO-87][DO-97] DO-8E`, responses as `[DO-87] DO-8E`;
//! the response status word rides the outer trailer but is authenticated
//! through a synthetic `99 02 sw1 sw2` in the MAC input. Cryptograms are
//! length-preserving counter-mode bodies behind the `02` content
//! indicator.
//!
//! Both endpoints advance the 16-octet counter in lockstep: [`SmState::ctr_inc`]
//! before every wrap and before the matching unwrap on the peer. A missed
//! increment shows up as [`Error::BadMac`] on the first data object.

extern crate alloc;
use alloc::vec::Vec;

use subtle::ConstantTimeEq;
use zeroize::ZeroizeOnDrop;

use crate::apdu::{ApduCmd, ApduResp};
use crate::error::{Error, Result};
use crate::prim::{Kdf, SymCipher};
use crate::tlv;

/// SM indicator bit in CLA.
pub const CLA_SM: u8 = 0x04;

const TAG_CRYPTOGRAM: u16 = 0x87;
const TAG_LE: u16 = 0x97;
const TAG_SW: u16 = 0x99;
const TAG_MAC: u16 = 0x8E;

/// Content indicator opening every DO-87 body.
const CRYPTOGRAM_INDICATOR: u8 = 0x02;

const LABEL_ENC: &[u8] = b"btok-v1|sm|enc";
const LABEL_MAC: &[u8] = b"btok-v1|sm|mac";

/// Endpoint role; fixes which directions a state may wrap and unwrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Terminal,
    CardTerminal,
}

/// One endpoint's secure-messaging session state.
///
/// Owns the 32-octet session key and the monotonic counter; both are
/// zeroized on drop. The state is deliberately not cloneable: each role
/// holds exactly one.
#[derive(ZeroizeOnDrop)]
pub struct SmState<'a> {
    #[zeroize(skip)]
    cipher: &'a dyn SymCipher,
    #[zeroize(skip)]
    kdf: &'a dyn Kdf,
    key: [u8; 32],
    ctr: [u8; 16],
    #[zeroize(skip)]
    role: Role,
}

impl<'a> SmState<'a> {
    /// Begin a session; the counter starts at zero.
    pub fn start(cipher: &'a dyn SymCipher, kdf: &'a dyn Kdf, key: &[u8; 32], role: Role) -> Self {
        Self {
            cipher,
            kdf,
            key: *key,
            ctr: [0u8; 16],
            role,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Advance the counter (big-endian increment, wrapping).
    pub fn ctr_inc(&mut self) {
        for b in self.ctr.iter_mut().rev() {
            let (v, carry) = b.overflowing_add(1);
            *b = v;
            if !carry {
                break;
            }
        }
    }

    /// Per-counter working key for the given label.
    fn derive(&self, label: &[u8]) -> Result<[u8; 32]> {
        let mut out = [0u8; 32];
        self.kdf.derive(&self.key, &self.ctr, label, &mut out)?;
        Ok(out)
    }

    fn apply_ctr(&self, key: &[u8; 32], buf: &mut [u8]) {
        self.cipher.ctr(key, &self.ctr, buf);
    }
}

/// Encoding of the expected-length octets inside DO-97.
fn le_body(rdf_len: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(2);
    if rdf_len <= 256 {
        out.push((rdf_len & 0xFF) as u8);
    } else {
        out.extend_from_slice(&((rdf_len & 0xFFFF) as u16).to_be_bytes());
    }
    out
}

fn le_decode(body: &[u8]) -> Result<u32> {
    match body.len() {
        1 => Ok(if body[0] == 0 { 256 } else { u32::from(body[0]) }),
        2 => {
            let v = u16::from_be_bytes([body[0], body[1]]);
            match v {
                0 => Ok(65536),
                1..=256 => Err(Error::BadSm),
                _ => Ok(u32::from(v)),
            }
        }
        _ => Err(Error::BadSm),
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Wrap a command for transmission.
///
/// Without a state this is the plain canonical encoding. With a state the
/// caller must be the terminal and must have advanced the counter first.
pub fn wrap_cmd(cmd: &ApduCmd, state: Option<&SmState<'_>>) -> Result<Vec<u8>> {
    let state = match state {
        None => return cmd.encode(),
        Some(s) => s,
    };
    if state.role != Role::Terminal {
        return Err(Error::BadLogic);
    }
    if cmd.cla & CLA_SM != 0 {
        return Err(Error::BadInput);
    }
    cmd.encode()?; // range validation before any crypto

    let cla = cmd.cla | CLA_SM;
    let mut dos = Vec::new();

    if !cmd.cdf.is_empty() {
        let mut body = Vec::with_capacity(1 + cmd.cdf.len());
        body.push(CRYPTOGRAM_INDICATOR);
        body.extend_from_slice(&cmd.cdf);
        let enc_key = state.derive(LABEL_ENC)?;
        state.apply_ctr(&enc_key, &mut body[1..]);
        tlv::write_do(&mut dos, TAG_CRYPTOGRAM, &body);
    }
    if cmd.rdf_len > 0 {
        tlv::write_do(&mut dos, TAG_LE, &le_body(cmd.rdf_len));
    }

    let mut mac_input = Vec::with_capacity(4 + 16 + dos.len());
    mac_input.extend_from_slice(&[cla, cmd.ins, cmd.p1, cmd.p2]);
    mac_input.extend_from_slice(&state.ctr);
    mac_input.extend_from_slice(&dos);
    let mac_key = state.derive(LABEL_MAC)?;
    let mac = state.cipher.mac(&mac_key, &mac_input);
    tlv::write_do(&mut dos, TAG_MAC, &mac);

    ApduCmd {
        cla,
        ins: cmd.ins,
        p1: cmd.p1,
        p2: cmd.p2,
        cdf: dos,
        rdf_len: 256,
    }
    .encode()
}

/// Unwrap a received command.
///
/// Verifies the MAC in constant time before any decryption, then checks
/// the content indicator and decrypts.
pub fn unwrap_cmd(data: &[u8], state: Option<&SmState<'_>>) -> Result<ApduCmd> {
    let state = match state {
        None => return ApduCmd::decode(data),
        Some(s) => s,
    };
    if state.role != Role::CardTerminal {
        return Err(Error::BadLogic);
    }
    let outer = ApduCmd::decode(data)?;
    if outer.cla & CLA_SM == 0 {
        return Err(Error::BadSm);
    }

    let mut r = tlv::Reader::new(&outer.cdf, Error::BadSm);
    let mut cryptogram: Option<&[u8]> = None;
    let mut le: Option<&[u8]> = None;
    let mut authed_end = 0;

    if r.peek_tag() == Some(TAG_CRYPTOGRAM) {
        cryptogram = Some(r.expect(TAG_CRYPTOGRAM)?);
        authed_end = r.pos();
    }
    if r.peek_tag() == Some(TAG_LE) {
        le = Some(r.expect(TAG_LE)?);
        authed_end = r.pos();
    }
    let mac = r.expect_exact(TAG_MAC, 8)?;
    if !r.done() {
        return Err(Error::BadSm);
    }

    let mut mac_input = Vec::with_capacity(4 + 16 + authed_end);
    mac_input.extend_from_slice(&[outer.cla, outer.ins, outer.p1, outer.p2]);
    mac_input.extend_from_slice(&state.ctr);
    mac_input.extend_from_slice(r.raw(0, authed_end));
    let mac_key = state.derive(LABEL_MAC)?;
    let expected = state.cipher.mac(&mac_key, &mac_input);
    if !bool::from(expected.ct_eq(mac)) {
        return Err(Error::BadMac);
    }

    let cdf = match cryptogram {
        None => Vec::new(),
        Some(body) => {
            if body.len() < 2 {
                return Err(Error::BadSm);
            }
            if !bool::from(body[0].ct_eq(&CRYPTOGRAM_INDICATOR)) {
                return Err(Error::BadPadding);
            }
            let mut pt = body[1..].to_vec();
            let enc_key = state.derive(LABEL_ENC)?;
            state.apply_ctr(&enc_key, &mut pt);
            pt
        }
    };
    let rdf_len = match le {
        None => 0,
        Some(body) => le_decode(body)?,
    };

    Ok(ApduCmd {
        cla: outer.cla & !CLA_SM,
        ins: outer.ins,
        p1: outer.p1,
        p2: outer.p2,
        cdf,
        rdf_len,
    })
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// MAC input for a response: counter, cryptogram DO, synthetic status DO.
fn resp_mac_input(state: &SmState<'_>, do87: &[u8], sw1: u8, sw2: u8) -> Vec<u8> {
    let mut input = Vec::with_capacity(16 + do87.len() + 4);
    input.extend_from_slice(&state.ctr);
    input.extend_from_slice(do87);
    input.extend_from_slice(&[(TAG_SW & 0xFF) as u8, 0x02, sw1, sw2]);
    input
}

/// Wrap a response for transmission; card-terminal side.
pub fn wrap_resp(resp: &ApduResp, state: Option<&SmState<'_>>) -> Result<Vec<u8>> {
    let state = match state {
        None => return resp.encode(),
        Some(s) => s,
    };
    if state.role != Role::CardTerminal {
        return Err(Error::BadLogic);
    }
    resp.encode()?; // range validation before any crypto

    let mut do87 = Vec::new();
    if !resp.rdf.is_empty() {
        let mut body = Vec::with_capacity(1 + resp.rdf.len());
        body.push(CRYPTOGRAM_INDICATOR);
        body.extend_from_slice(&resp.rdf);
        let enc_key = state.derive(LABEL_ENC)?;
        state.apply_ctr(&enc_key, &mut body[1..]);
        tlv::write_do(&mut do87, TAG_CRYPTOGRAM, &body);
    }

    let mac_key = state.derive(LABEL_MAC)?;
    let mac = state
        .cipher
        .mac(&mac_key, &resp_mac_input(state, &do87, resp.sw1, resp.sw2));

    let mut rdf = do87;
    tlv::write_do(&mut rdf, TAG_MAC, &mac);

    ApduResp {
        rdf,
        sw1: resp.sw1,
        sw2: resp.sw2,
    }
    .encode()
}

/// Unwrap a received response; terminal side.
///
/// The outer status word participates in the MAC, so a tampered trailer
/// fails exactly like a tampered cryptogram.
pub fn unwrap_resp(data: &[u8], state: Option<&SmState<'_>>) -> Result<ApduResp> {
    let state = match state {
        None => return ApduResp::decode(data),
        Some(s) => s,
    };
    if state.role != Role::Terminal {
        return Err(Error::BadLogic);
    }
    let outer = ApduResp::decode(data)?;

    let mut r = tlv::Reader::new(&outer.rdf, Error::BadSm);
    let mut cryptogram: Option<&[u8]> = None;
    let mut authed_end = 0;

    if r.peek_tag() == Some(TAG_CRYPTOGRAM) {
        cryptogram = Some(r.expect(TAG_CRYPTOGRAM)?);
        authed_end = r.pos();
    }
    let mac = r.expect_exact(TAG_MAC, 8)?;
    if !r.done() {
        return Err(Error::BadSm);
    }

    let mac_key = state.derive(LABEL_MAC)?;
    let expected = state.cipher.mac(
        &mac_key,
        &resp_mac_input(state, r.raw(0, authed_end), outer.sw1, outer.sw2),
    );
    if !bool::from(expected.ct_eq(mac)) {
        return Err(Error::BadMac);
    }

    let rdf = match cryptogram {
        None => Vec::new(),
        Some(body) => {
            if body.len() < 2 {
                return Err(Error::BadSm);
            }
            if !bool::from(body[0].ct_eq(&CRYPTOGRAM_INDICATOR)) {
                return Err(Error::BadPadding);
            }
            let mut pt = body[1..].to_vec();
            let enc_key = state.derive(LABEL_ENC)?;
            state.apply_ctr(&enc_key, &mut pt);
            pt
        }
    };

    Ok(ApduResp {
        rdf,
        sw1: outer.sw1,
        sw2: outer.sw2,
    })
}
