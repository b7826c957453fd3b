//! CV certificate codec: issuance, parsing and chain validation.
//!
//! Wire layout (definite-length BER-TLV, fixed field order):
//!
//! ```text
//! 7F21 L {                            -- CV certificate
//!   7F4E L {                          -- signed body
//!     5F29 01 00                      -- profile version
//!     42   L  authority               -- 8..12 printable octets
//!     7F49 L { 06 0A oid, 86 L Q }    -- scheme OID + public key
//!     5F20 L  holder
//!     7F4C L { 53 07 eid || esign }   -- effective authorization
//!     5F25 06 from                    -- YYMMDD, one digit per octet
//!     5F24 06 until
//!   }
//!   5F37 L signature                  -- over the whole 7F4E DO
//! }
//! ```
//!
//! The signature always uses the issuer's level; the subject key inside the
//! body may sit at a lower level. Any deviation from the canonical encoding
//! parses as [`Error::BadCert`].

extern crate alloc;
use alloc::string::String;
use alloc::vec::Vec;

use subtle::ConstantTimeEq;

use crate::error::{Error, Result};
use crate::prim::{Level, SigScheme};
use crate::tlv;

pub const NAME_MIN: usize = 8;
pub const NAME_MAX: usize = 12;
pub const HAT_EID_LEN: usize = 5;
pub const HAT_ESIGN_LEN: usize = 2;

/// Profile version carried in `5F29`.
pub const PROFILE_VERSION: u8 = 0;

const TAG_CERT: u16 = 0x7F21;
const TAG_BODY: u16 = 0x7F4E;
const TAG_VERSION: u16 = 0x5F29;
const TAG_AUTHORITY: u16 = 0x42;
const TAG_PUBKEY: u16 = 0x7F49;
const TAG_OID: u16 = 0x06;
const TAG_POINT: u16 = 0x86;
const TAG_HOLDER: u16 = 0x5F20;
const TAG_HAT: u16 = 0x7F4C;
const TAG_HAT_BITS: u16 = 0x53;
const TAG_FROM: u16 = 0x5F25;
const TAG_UNTIL: u16 = 0x5F24;
const TAG_SIG: u16 = 0x5F37;

/// `1.2.112.0.2.0.34.101.45.3` — the last arc selects the level.
const OID_PREFIX: [u8; 9] = [0x2A, 0x70, 0x00, 0x02, 0x00, 0x22, 0x65, 0x2D, 0x03];

/// Calendar date as six decimal digits `Y Y M M D D`, one per octet.
///
/// Ordering is lexicographic on the octets, which coincides with
/// chronological order within the century window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Date(pub [u8; 6]);

impl Date {
    pub fn new(digits: [u8; 6]) -> Result<Self> {
        let d = Self(digits);
        if !d.is_valid() {
            return Err(Error::BadInput);
        }
        Ok(d)
    }

    pub fn is_valid(&self) -> bool {
        let d = &self.0;
        if d.iter().any(|&x| x > 9) {
            return false;
        }
        let mm = d[2] * 10 + d[3];
        let dd = d[4] * 10 + d[5];
        (1..=12).contains(&mm) && (1..=31).contains(&dd)
    }
}

/// Parsed certificate fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CvcFields {
    pub authority: String,
    pub holder: String,
    pub from: Date,
    pub until: Date,
    pub hat_eid: [u8; HAT_EID_LEN],
    pub hat_esign: [u8; HAT_ESIGN_LEN],
    /// Empty until a key is attached, or 64/96/128 octets.
    pub pubkey: Vec<u8>,
}

impl CvcFields {
    /// Pure range/ordering validation; touches no crypto.
    ///
    /// A certificate is only checkable once it carries a public key, so an
    /// empty `pubkey` fails here even though it is a legal intermediate
    /// state while assembling fields for [`wrap`].
    pub fn check(&self) -> Result<()> {
        name_ok(&self.authority)?;
        name_ok(&self.holder)?;
        if !self.from.is_valid() || !self.until.is_valid() || self.from > self.until {
            return Err(Error::BadInput);
        }
        if self.level().is_none() {
            return Err(Error::BadInput);
        }
        Ok(())
    }

    /// Level implied by the public key size.
    pub fn level(&self) -> Option<Level> {
        Level::from_public_len(self.pubkey.len())
    }
}

fn name_ok(name: &str) -> Result<()> {
    let n = name.as_bytes();
    if !(NAME_MIN..=NAME_MAX).contains(&n.len()) {
        return Err(Error::BadInput);
    }
    if n.iter().any(|&b| !(0x20..=0x7E).contains(&b)) {
        return Err(Error::BadInput);
    }
    Ok(())
}

/// Constant-time byte equality; length mismatch is an immediate inequality.
fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

/// Name comparison: right-trim trailing NULs, then constant-time equality.
fn names_eq(a: &str, b: &str) -> bool {
    let trim = |s: &str| {
        let b = s.as_bytes();
        let end = b.iter().rposition(|&x| x != 0).map_or(0, |i| i + 1);
        b[..end].to_vec()
    };
    ct_eq(&trim(a), &trim(b))
}

fn oid_bytes(level: Level) -> [u8; 10] {
    let mut oid = [0u8; 10];
    oid[..9].copy_from_slice(&OID_PREFIX);
    oid[9] = match level {
        Level::L128 => 1,
        Level::L192 => 2,
        Level::L256 => 3,
    };
    oid
}

fn level_from_oid(oid: &[u8]) -> Result<Level> {
    if oid.len() != 10 || oid[..9] != OID_PREFIX {
        return Err(Error::BadCert);
    }
    match oid[9] {
        1 => Ok(Level::L128),
        2 => Ok(Level::L192),
        3 => Ok(Level::L256),
        _ => Err(Error::BadCert),
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

fn body_inner(fields: &CvcFields, level: Level) -> Vec<u8> {
    let mut out = Vec::new();
    tlv::write_do(&mut out, TAG_VERSION, &[PROFILE_VERSION]);
    tlv::write_do(&mut out, TAG_AUTHORITY, fields.authority.as_bytes());

    let mut pk = Vec::new();
    tlv::write_do(&mut pk, TAG_OID, &oid_bytes(level));
    tlv::write_do(&mut pk, TAG_POINT, &fields.pubkey);
    tlv::write_do(&mut out, TAG_PUBKEY, &pk);

    tlv::write_do(&mut out, TAG_HOLDER, fields.holder.as_bytes());

    let mut hat = Vec::new();
    let mut bits = [0u8; HAT_EID_LEN + HAT_ESIGN_LEN];
    bits[..HAT_EID_LEN].copy_from_slice(&fields.hat_eid);
    bits[HAT_EID_LEN..].copy_from_slice(&fields.hat_esign);
    tlv::write_do(&mut hat, TAG_HAT_BITS, &bits);
    tlv::write_do(&mut out, TAG_HAT, &hat);

    tlv::write_do(&mut out, TAG_FROM, &fields.from.0);
    tlv::write_do(&mut out, TAG_UNTIL, &fields.until.0);
    out
}

/// The complete `7F4E` DO that gets signed.
fn encode_tbs(fields: &CvcFields) -> Result<Vec<u8>> {
    fields.check()?;
    let level = fields.level().ok_or(Error::BadInput)?;
    let inner = body_inner(fields, level);
    let mut out = Vec::with_capacity(tlv::do_len(TAG_BODY, inner.len()));
    tlv::write_do(&mut out, TAG_BODY, &inner);
    Ok(out)
}

/// Exact size of `wrap(fields, ..)` output when signed at `signer` level.
pub fn encoded_len(fields: &CvcFields, signer: Level) -> Result<usize> {
    fields.check()?;
    let level = fields.level().ok_or(Error::BadInput)?;
    let pk_inner = tlv::do_len(TAG_OID, 10) + tlv::do_len(TAG_POINT, level.public_key_len());
    let hat_inner = tlv::do_len(TAG_HAT_BITS, HAT_EID_LEN + HAT_ESIGN_LEN);
    let body = tlv::do_len(TAG_VERSION, 1)
        + tlv::do_len(TAG_AUTHORITY, fields.authority.len())
        + tlv::do_len(TAG_PUBKEY, pk_inner)
        + tlv::do_len(TAG_HOLDER, fields.holder.len())
        + tlv::do_len(TAG_HAT, hat_inner)
        + tlv::do_len(TAG_FROM, 6)
        + tlv::do_len(TAG_UNTIL, 6);
    let signed = tlv::do_len(TAG_BODY, body) + tlv::do_len(TAG_SIG, signer.sig_len());
    Ok(tlv::do_len(TAG_CERT, signed))
}

/// Serialize and sign `fields` under `sk`.
///
/// When `fields.pubkey` is empty the subject key is derived from `sk`
/// first (the self-signed case); otherwise `sk` is the issuer key and may
/// belong to a different, higher level than the subject key.
pub fn wrap(fields: &CvcFields, sk: &[u8], scheme: &dyn SigScheme) -> Result<Vec<u8>> {
    if sk.len() != scheme.level().private_key_len() {
        return Err(Error::BadParams);
    }
    let mut filled;
    let fields = if fields.pubkey.is_empty() {
        filled = fields.clone();
        filled.pubkey = scheme.derive_pub(sk)?;
        &filled
    } else {
        fields
    };
    let subject = fields.level().ok_or(Error::BadInput)?;
    if subject.bits() > scheme.level().bits() {
        return Err(Error::BadParams);
    }

    let tbs = encode_tbs(fields)?;
    let sig = scheme.sign(sk, &tbs)?;
    if sig.len() != scheme.level().sig_len() {
        return Err(Error::BadParams);
    }

    let mut signed = Vec::with_capacity(tbs.len() + tlv::do_len(TAG_SIG, sig.len()));
    signed.extend_from_slice(&tbs);
    tlv::write_do(&mut signed, TAG_SIG, &sig);

    let mut out = Vec::with_capacity(tlv::do_len(TAG_CERT, signed.len()));
    tlv::write_do(&mut out, TAG_CERT, &signed);
    Ok(out)
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Total encoded length read off the outer TLV header.
///
/// `Some(n)` iff the header parses and the self-described length fits the
/// cap; `None` is the invalid sentinel.
pub fn peek_len(der: &[u8], cap: usize) -> Option<usize> {
    let mut r = tlv::Reader::new(der, Error::BadCert);
    if r.read_tag().ok()? != TAG_CERT {
        return None;
    }
    let len = r.read_len().ok()?;
    let total = r.pos().checked_add(len)?;
    if total > cap {
        return None;
    }
    Some(total)
}

struct Parts<'a> {
    fields: CvcFields,
    /// The raw `7F4E` DO the signature covers.
    tbs: &'a [u8],
    sig: &'a [u8],
}

fn parse_parts(der: &[u8]) -> Result<Parts<'_>> {
    let mut r = tlv::Reader::new(der, Error::BadCert);
    let signed = r.expect(TAG_CERT)?;
    if !r.done() {
        return Err(Error::BadCert);
    }

    let mut r = tlv::Reader::new(signed, Error::BadCert);
    let tbs_start = r.pos();
    let body = r.expect(TAG_BODY)?;
    let tbs = r.raw(tbs_start, r.pos());
    let sig = r.expect(TAG_SIG)?;
    if !r.done() {
        return Err(Error::BadCert);
    }

    let mut b = tlv::Reader::new(body, Error::BadCert);
    if b.expect_exact(TAG_VERSION, 1)? != [PROFILE_VERSION] {
        return Err(Error::BadCert);
    }
    let authority = read_name(&mut b, TAG_AUTHORITY)?;

    let pk = b.expect(TAG_PUBKEY)?;
    let mut p = tlv::Reader::new(pk, Error::BadCert);
    let level = level_from_oid(p.expect(TAG_OID)?)?;
    let pubkey = p.expect_exact(TAG_POINT, level.public_key_len())?;
    if !p.done() {
        return Err(Error::BadCert);
    }

    let holder = read_name(&mut b, TAG_HOLDER)?;

    let hat = b.expect(TAG_HAT)?;
    let mut h = tlv::Reader::new(hat, Error::BadCert);
    let bits = h.expect_exact(TAG_HAT_BITS, HAT_EID_LEN + HAT_ESIGN_LEN)?;
    if !h.done() {
        return Err(Error::BadCert);
    }

    let from = read_date(&mut b, TAG_FROM)?;
    let until = read_date(&mut b, TAG_UNTIL)?;
    if !b.done() {
        return Err(Error::BadCert);
    }

    // The signature is sized for the issuer's level, which may exceed the
    // subject's; the exact match is checked against the verifier key.
    if ![48, 72, 96].contains(&sig.len()) {
        return Err(Error::BadCert);
    }

    let mut hat_eid = [0u8; HAT_EID_LEN];
    let mut hat_esign = [0u8; HAT_ESIGN_LEN];
    hat_eid.copy_from_slice(&bits[..HAT_EID_LEN]);
    hat_esign.copy_from_slice(&bits[HAT_EID_LEN..]);

    let fields = CvcFields {
        authority,
        holder,
        from,
        until,
        hat_eid,
        hat_esign,
        pubkey: pubkey.to_vec(),
    };
    fields.check().map_err(|_| Error::BadCert)?;

    Ok(Parts { fields, tbs, sig })
}

fn read_name(r: &mut tlv::Reader<'_>, tag: u16) -> Result<String> {
    let raw = r.expect(tag)?;
    // Tolerate NUL padding from fixed-width writers.
    let end = raw.iter().rposition(|&x| x != 0).map_or(0, |i| i + 1);
    let name = core::str::from_utf8(&raw[..end]).map_err(|_| Error::BadCert)?;
    name_ok(name).map_err(|_| Error::BadCert)?;
    Ok(String::from(name))
}

fn read_date(r: &mut tlv::Reader<'_>, tag: u16) -> Result<Date> {
    let raw = r.expect_exact(tag, 6)?;
    let mut digits = [0u8; 6];
    digits.copy_from_slice(raw);
    Date::new(digits).map_err(|_| Error::BadCert)
}

/// Parse without signature verification.
///
/// Used to extract the subject key from a self-signed root or a
/// pre-certificate before any trust decision.
pub fn parse(der: &[u8]) -> Result<CvcFields> {
    Ok(parse_parts(der)?.fields)
}

/// Parse and verify the signature under `verifier_pk`.
pub fn unwrap(der: &[u8], scheme: &dyn SigScheme, verifier_pk: &[u8]) -> Result<CvcFields> {
    if verifier_pk.len() != scheme.level().public_key_len() {
        return Err(Error::BadParams);
    }
    let parts = parse_parts(der)?;
    if parts.sig.len() != scheme.level().sig_len() {
        return Err(Error::BadCert);
    }
    if !scheme.verify(verifier_pk, parts.tbs, parts.sig) {
        return Err(Error::BadCert);
    }
    Ok(parts.fields)
}

/// Check that `sk` corresponds to the public key embedded in `der`.
pub fn matches(der: &[u8], sk: &[u8], scheme: &dyn SigScheme) -> Result<()> {
    if sk.len() != scheme.level().private_key_len() {
        return Err(Error::BadParams);
    }
    let fields = parse(der)?;
    if fields.pubkey.len() != scheme.level().public_key_len() {
        return Err(Error::BadParams);
    }
    let derived = scheme.derive_pub(sk)?;
    if !ct_eq(&derived, &fields.pubkey) {
        return Err(Error::BadCert);
    }
    Ok(())
}

/// Issue `subject` under an issuer certificate and its private key.
///
/// Enforces the name chain (`subject.authority == issuer.holder`), the
/// level ordering (subject at most the issuer's level) and that
/// `issuer_sk` matches the issuer certificate before signing.
pub fn issue(
    subject: &CvcFields,
    issuer_cert: &[u8],
    issuer_sk: &[u8],
    scheme: &dyn SigScheme,
) -> Result<Vec<u8>> {
    matches(issuer_cert, issuer_sk, scheme)?;
    let issuer = parse(issuer_cert)?;
    if !names_eq(&subject.authority, &issuer.holder) {
        return Err(Error::BadCert);
    }
    wrap(subject, issuer_sk, scheme)
}

/// Verify `child` under a parent's fields.
///
/// Checks the signature, the name chain and, when `now` is given, that the
/// child's validity window contains it. Returns the parsed child.
pub fn validate(
    child: &[u8],
    parent: &CvcFields,
    scheme: &dyn SigScheme,
    now: Option<&Date>,
) -> Result<CvcFields> {
    let fields = unwrap(child, scheme, &parent.pubkey)?;
    if !names_eq(&fields.authority, &parent.holder) {
        return Err(Error::BadCert);
    }
    if let Some(now) = now {
        if *now < fields.from || *now > fields.until {
            return Err(Error::BadCert);
        }
    }
    Ok(fields)
}

/// Like [`validate`], additionally requiring the parsed child to equal the
/// expected fields.
pub fn validate_expected(
    expected: &CvcFields,
    child: &[u8],
    parent: &CvcFields,
    scheme: &dyn SigScheme,
    now: Option<&Date>,
) -> Result<()> {
    let fields = validate(child, parent, scheme, now)?;
    let same = names_eq(&fields.authority, &expected.authority)
        && names_eq(&fields.holder, &expected.holder)
        && fields.from == expected.from
        && fields.until == expected.until
        && fields.hat_eid == expected.hat_eid
        && fields.hat_esign == expected.hat_esign
        && ct_eq(&fields.pubkey, &expected.pubkey);
    if !same {
        return Err(Error::BadCert);
    }
    Ok(())
}
