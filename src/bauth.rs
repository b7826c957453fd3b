//! BAUTH: authenticated key agreement between terminal and card-terminal.
//!
//! Three messages travel on the wire:
//!
//! ```text
//! CT -> T   M2 = U_ct || mac2[8]
//! T  -> CT  M3 = U_t  || tag_t[8] || E(cert_t)     (cryptogram iff kca)
//! CT -> T   M4 = tag_ct[8]                         (iff kcb)
//! ```
//!
//! The seed feeding every derived key mixes the ephemeral-ephemeral
//! agreement with the static components that carry authentication: the
//! card-terminal key (always) and the terminal key (iff `kca`). The full
//! transcript salts the seed and the session key, so one flipped bit in
//! any message either trips a confirmation MAC or diverges the keys.
//!
//! Step order is enforced per role; any failure or out-of-order call
//! leaves the state terminal.

extern crate alloc;
use alloc::vec::Vec;

use rand_core::CryptoRngCore;
use subtle::ConstantTimeEq;
use zeroize::{ZeroizeOnDrop, Zeroizing};

use crate::cvc;
use crate::cvc::CvcFields;
use crate::error::{Error, Result};
use crate::prim::{CertValidator, Kdf, SigScheme, SymCipher};
use crate::sm::Role;

const LABEL_M2: &[u8] = b"btok-v1|bauth|m2";
const LABEL_CERT: &[u8] = b"btok-v1|bauth|cert";
const LABEL_SEED: &[u8] = b"btok-v1|bauth|seed";
const LABEL_TAG_T: &[u8] = b"btok-v1|bauth|tag-t";
const LABEL_TAG_CT: &[u8] = b"btok-v1|bauth|tag-ct";
const LABEL_KEY: &[u8] = b"btok-v1|bauth|key";
const LABEL_TRANSCRIPT: &[u8] = b"btok-v1|bauth|transcript";

const TAG_LEN: usize = 8;

/// Protocol options, fixed at [`BauthState::start`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BauthSettings {
    /// Authenticate the terminal to the card-terminal; the terminal
    /// certificate travels encrypted inside M3.
    pub kca: bool,
    /// Authenticate the card-terminal to the terminal; adds the M4
    /// confirmation.
    pub kcb: bool,
}

impl BauthSettings {
    fn byte(self) -> u8 {
        u8::from(self.kca) | (u8::from(self.kcb) << 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Started,
    AwaitM3,
    AwaitM4,
    Done,
    Failed,
}

/// One endpoint's protocol state.
///
/// Long-term and ephemeral scalars, the seed and the transcript are
/// zeroized on drop; the session key leaves only through
/// [`derive_key`](Self::derive_key), which consumes the state.
#[derive(ZeroizeOnDrop)]
pub struct BauthState<'a> {
    #[zeroize(skip)]
    scheme: &'a dyn SigScheme,
    #[zeroize(skip)]
    cipher: &'a dyn SymCipher,
    #[zeroize(skip)]
    kdf: &'a dyn Kdf,
    #[zeroize(skip)]
    role: Role,
    #[zeroize(skip)]
    settings: BauthSettings,
    d: Vec<u8>,
    own_cert: Vec<u8>,
    #[zeroize(skip)]
    ct_cert: CvcFields,
    u: Vec<u8>,
    big_u: Vec<u8>,
    transcript: Vec<u8>,
    seed: [u8; 32],
    #[zeroize(skip)]
    stage: Stage,
}

impl<'a> BauthState<'a> {
    /// Initialize one endpoint.
    ///
    /// The card-terminal passes its own certificate as `own_cert`; the
    /// terminal passes the card-terminal certificate as `peer_cert` (it is
    /// needed for M2 verification and the static agreement) and, when
    /// `kca`, its own certificate plus the matching private key.
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        scheme: &'a dyn SigScheme,
        cipher: &'a dyn SymCipher,
        kdf: &'a dyn Kdf,
        role: Role,
        settings: BauthSettings,
        d: &[u8],
        own_cert: &[u8],
        peer_cert: Option<&[u8]>,
        rng: &mut dyn CryptoRngCore,
    ) -> Result<Self> {
        let level = scheme.level();

        let ct_cert_der: Vec<u8>;
        let ct_cert = match role {
            Role::CardTerminal => {
                if d.len() != level.private_key_len() {
                    return Err(Error::BadParams);
                }
                ct_cert_der = own_cert.to_vec();
                let fields = cvc::parse(own_cert)?;
                let derived = scheme.derive_pub(d)?;
                if !bool::from(derived.ct_eq(&fields.pubkey)) {
                    return Err(Error::BadParams);
                }
                fields
            }
            Role::Terminal => {
                let peer = peer_cert.ok_or(Error::BadInput)?;
                ct_cert_der = peer.to_vec();
                let fields = cvc::parse(peer)?;
                if settings.kca {
                    if d.len() != level.private_key_len() {
                        return Err(Error::BadParams);
                    }
                    let own = cvc::parse(own_cert)?;
                    if own.level() != Some(level) {
                        return Err(Error::BadParams);
                    }
                    let derived = scheme.derive_pub(d)?;
                    if !bool::from(derived.ct_eq(&own.pubkey)) {
                        return Err(Error::BadParams);
                    }
                }
                fields
            }
        };
        if ct_cert.level() != Some(level) {
            return Err(Error::BadParams);
        }

        let (u, big_u) = scheme.gen_keypair(rng)?;

        let mut transcript = Vec::new();
        transcript.extend_from_slice(LABEL_TRANSCRIPT);
        transcript.push(settings.byte());
        transcript.extend_from_slice(&ct_cert_der);

        Ok(Self {
            scheme,
            cipher,
            kdf,
            role,
            settings,
            d: d.to_vec(),
            own_cert: own_cert.to_vec(),
            ct_cert,
            u,
            big_u,
            transcript,
            seed: [0u8; 32],
            stage: Stage::Started,
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    fn fail<T>(&mut self, e: Error) -> Result<T> {
        self.stage = Stage::Failed;
        Err(e)
    }

    fn kdf_fixed<const N: usize>(&self, ikm: &[u8], salt: &[u8], info: &[u8]) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        self.kdf.derive(ikm, salt, info, &mut out)?;
        Ok(out)
    }

    /// MAC key binding M2 to the card-terminal certificate.
    fn m2_key(&self) -> Result<[u8; 32]> {
        self.kdf_fixed(&self.ct_cert.pubkey, &[], LABEL_M2)
    }

    fn m2_mac(&self, key: &[u8; 32], u_ct: &[u8]) -> [u8; 8] {
        let mut input = Vec::with_capacity(self.transcript.len() + u_ct.len());
        input.extend_from_slice(&self.transcript);
        input.extend_from_slice(u_ct);
        self.cipher.mac(key, &input)
    }

    /// Card-terminal: produce M2.
    pub fn ct_step2(&mut self) -> Result<Vec<u8>> {
        if self.role != Role::CardTerminal || self.stage != Stage::Started {
            return self.fail(Error::BadLogic);
        }
        let key = match self.m2_key() {
            Ok(k) => k,
            Err(e) => return self.fail(e),
        };
        let mac2 = self.m2_mac(&key, &self.big_u);

        let mut m2 = Vec::with_capacity(self.big_u.len() + TAG_LEN);
        m2.extend_from_slice(&self.big_u);
        m2.extend_from_slice(&mac2);
        self.transcript.extend_from_slice(&m2);
        self.stage = Stage::AwaitM3;
        Ok(m2)
    }

    /// Terminal: consume M2, produce M3.
    pub fn t_step3(&mut self, m2: &[u8]) -> Result<Vec<u8>> {
        if self.role != Role::Terminal || self.stage != Stage::Started {
            return self.fail(Error::BadLogic);
        }
        let pub_len = self.scheme.level().public_key_len();
        if m2.len() != pub_len + TAG_LEN {
            return self.fail(Error::BadInput);
        }
        let (u_ct, mac2) = m2.split_at(pub_len);

        let key = match self.m2_key() {
            Ok(k) => k,
            Err(e) => return self.fail(e),
        };
        let expected = self.m2_mac(&key, u_ct);
        if !bool::from(expected.ct_eq(mac2)) {
            return self.fail(Error::BadMac);
        }
        self.transcript.extend_from_slice(m2);

        // Agreement components: ephemeral-ephemeral, then the static
        // card-terminal key, then (iff kca) the static terminal key.
        let ee = match self.scheme.dh(&self.u, u_ct) {
            Ok(v) => Zeroizing::new(v),
            Err(e) => return self.fail(e),
        };
        let act = match self.scheme.dh(&self.u, &self.ct_cert.pubkey) {
            Ok(v) => Zeroizing::new(v),
            Err(e) => return self.fail(e),
        };
        let at = if self.settings.kca {
            match self.scheme.dh(&self.d, u_ct) {
                Ok(v) => Zeroizing::new(v),
                Err(e) => return self.fail(e),
            }
        } else {
            Zeroizing::new(Vec::new())
        };

        let enc_cert = if self.settings.kca {
            let (key, iv) = match self.cert_stream_key(&ee, &act) {
                Ok(v) => v,
                Err(e) => return self.fail(e),
            };
            let mut cert = self.own_cert.clone();
            self.cipher.ctr(&key, &iv, &mut cert);
            cert
        } else {
            Vec::new()
        };

        match self.compute_seed(&ee, &act, &at) {
            Ok(()) => {}
            Err(e) => return self.fail(e),
        }

        let tag_key: [u8; 32] = match self.kdf_fixed(&self.seed, &[], LABEL_TAG_T) {
            Ok(k) => k,
            Err(e) => return self.fail(e),
        };
        let mut tag_input =
            Vec::with_capacity(self.transcript.len() + self.big_u.len() + enc_cert.len());
        tag_input.extend_from_slice(&self.transcript);
        tag_input.extend_from_slice(&self.big_u);
        tag_input.extend_from_slice(&enc_cert);
        let tag_t = self.cipher.mac(&tag_key, &tag_input);

        let mut m3 = Vec::with_capacity(self.big_u.len() + TAG_LEN + enc_cert.len());
        m3.extend_from_slice(&self.big_u);
        m3.extend_from_slice(&tag_t);
        m3.extend_from_slice(&enc_cert);
        self.transcript.extend_from_slice(&m3);

        self.stage = if self.settings.kcb {
            Stage::AwaitM4
        } else {
            Stage::Done
        };
        Ok(m3)
    }

    /// Card-terminal: consume M3; returns M4 iff `kcb`.
    ///
    /// When `kca`, the terminal certificate is decrypted out of M3 and
    /// handed to `validator` before its key enters the agreement.
    pub fn ct_step4(
        &mut self,
        m3: &[u8],
        validator: Option<&dyn CertValidator>,
    ) -> Result<Option<Vec<u8>>> {
        if self.role != Role::CardTerminal || self.stage != Stage::AwaitM3 {
            return self.fail(Error::BadLogic);
        }
        let pub_len = self.scheme.level().public_key_len();
        if m3.len() < pub_len + TAG_LEN {
            return self.fail(Error::BadInput);
        }
        let (u_t, rest) = m3.split_at(pub_len);
        let (tag_t, enc_cert) = rest.split_at(TAG_LEN);

        let ee = match self.scheme.dh(&self.u, u_t) {
            Ok(v) => Zeroizing::new(v),
            Err(e) => return self.fail(e),
        };
        let act = match self.scheme.dh(&self.d, u_t) {
            Ok(v) => Zeroizing::new(v),
            Err(e) => return self.fail(e),
        };

        let at = if self.settings.kca {
            let validator = match validator {
                Some(v) => v,
                None => return self.fail(Error::BadInput),
            };
            if enc_cert.is_empty() {
                return self.fail(Error::BadInput);
            }
            let (key, iv) = match self.cert_stream_key(&ee, &act) {
                Ok(v) => v,
                Err(e) => return self.fail(e),
            };
            let mut cert = enc_cert.to_vec();
            self.cipher.ctr(&key, &iv, &mut cert);
            let fields = match validator.validate(&cert) {
                Ok(f) => f,
                Err(e) => return self.fail(e),
            };
            if fields.level() != Some(self.scheme.level()) {
                return self.fail(Error::BadParams);
            }
            match self.scheme.dh(&self.u, &fields.pubkey) {
                Ok(v) => Zeroizing::new(v),
                Err(e) => return self.fail(e),
            }
        } else {
            if !enc_cert.is_empty() {
                return self.fail(Error::BadInput);
            }
            Zeroizing::new(Vec::new())
        };

        match self.compute_seed(&ee, &act, &at) {
            Ok(()) => {}
            Err(e) => return self.fail(e),
        }

        let tag_key: [u8; 32] = match self.kdf_fixed(&self.seed, &[], LABEL_TAG_T) {
            Ok(k) => k,
            Err(e) => return self.fail(e),
        };
        let mut tag_input = Vec::with_capacity(self.transcript.len() + m3.len() - TAG_LEN);
        tag_input.extend_from_slice(&self.transcript);
        tag_input.extend_from_slice(u_t);
        tag_input.extend_from_slice(enc_cert);
        let expected = self.cipher.mac(&tag_key, &tag_input);
        if !bool::from(expected.ct_eq(tag_t)) {
            return self.fail(Error::BadMac);
        }
        self.transcript.extend_from_slice(m3);

        let m4 = if self.settings.kcb {
            let ct_key: [u8; 32] = match self.kdf_fixed(&self.seed, &[], LABEL_TAG_CT) {
                Ok(k) => k,
                Err(e) => return self.fail(e),
            };
            let tag_ct = self.cipher.mac(&ct_key, &self.transcript);
            self.transcript.extend_from_slice(&tag_ct);
            Some(tag_ct.to_vec())
        } else {
            None
        };

        self.stage = Stage::Done;
        Ok(m4)
    }

    /// Terminal: consume M4; required iff `kcb`.
    pub fn t_step5(&mut self, m4: &[u8]) -> Result<()> {
        if self.role != Role::Terminal || self.stage != Stage::AwaitM4 {
            return self.fail(Error::BadLogic);
        }
        if m4.len() != TAG_LEN {
            return self.fail(Error::BadInput);
        }
        let ct_key: [u8; 32] = match self.kdf_fixed(&self.seed, &[], LABEL_TAG_CT) {
            Ok(k) => k,
            Err(e) => return self.fail(e),
        };
        let expected = self.cipher.mac(&ct_key, &self.transcript);
        if !bool::from(expected.ct_eq(m4)) {
            return self.fail(Error::BadMac);
        }
        self.transcript.extend_from_slice(m4);
        self.stage = Stage::Done;
        Ok(())
    }

    /// Extract the 32-octet session key; consumes the state.
    ///
    /// Only legal once the endpoint reached `Done` (after step 3 or 5 on
    /// the terminal, after step 4 on the card-terminal).
    pub fn derive_key(mut self) -> Result<Zeroizing<[u8; 32]>> {
        if self.stage != Stage::Done {
            self.stage = Stage::Failed;
            return Err(Error::BadLogic);
        }
        let mut info = Vec::with_capacity(LABEL_KEY.len() + self.transcript.len());
        info.extend_from_slice(LABEL_KEY);
        info.extend_from_slice(&self.transcript);
        let mut key = Zeroizing::new([0u8; 32]);
        self.kdf.derive(&self.seed, &[], &info, key.as_mut_slice())?;
        Ok(key)
    }

    fn compute_seed(&mut self, ee: &[u8], act: &[u8], at: &[u8]) -> Result<()> {
        let mut ikm = Zeroizing::new(Vec::with_capacity(ee.len() + act.len() + at.len()));
        ikm.extend_from_slice(ee);
        ikm.extend_from_slice(act);
        ikm.extend_from_slice(at);
        self.kdf
            .derive(&ikm, &self.transcript, LABEL_SEED, &mut self.seed)
    }

    /// Key and IV protecting the certificate cryptogram in M3, derived
    /// from the pre-seed components available before the terminal key is
    /// known.
    fn cert_stream_key(&self, ee: &[u8], act: &[u8]) -> Result<(Zeroizing<[u8; 32]>, [u8; 16])> {
        let mut pre = Zeroizing::new(Vec::with_capacity(ee.len() + act.len()));
        pre.extend_from_slice(ee);
        pre.extend_from_slice(act);
        let ck: Zeroizing<[u8; 48]> =
            Zeroizing::new(self.kdf_fixed(&pre, &self.transcript, LABEL_CERT)?);
        let mut key = Zeroizing::new([0u8; 32]);
        let mut iv = [0u8; 16];
        key.copy_from_slice(&ck[..32]);
        iv.copy_from_slice(&ck[32..]);
        Ok((key, iv))
    }
}
