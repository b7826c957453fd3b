//! ISO 7816-4 APDU model and wire codec.
//!
//! Command wire form:
//!   `cla ins p1 p2 [Lc cdf] [Le]`
//! Short form carries `Lc`/`Le` in one octet each and is used iff
//! `|cdf| <= 255` and `rdf_len <= 256` (`Le = 00` meaning 256). Extended
//! form prefixes the length block with a `00` marker octet and carries
//! two-octet lengths (`Le = 00 00` meaning 65536).
//!
//! Decoding accepts canonical encodings only: an extended-form APDU whose
//! lengths would fit the short form is rejected, as is any trailing or
//! missing octet.

extern crate alloc;
use alloc::vec::Vec;

use crate::error::{Error, Result};

/// Largest command data field.
pub const CDF_MAX: usize = 65535;

/// Largest expected-response length; this value means "all available".
pub const RDF_MAX: u32 = 65536;

/// Command APDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduCmd {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    pub cdf: Vec<u8>,
    /// Expected response length, `0..=65536`; 0 means no response data.
    pub rdf_len: u32,
}

/// Response APDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduResp {
    pub rdf: Vec<u8>,
    pub sw1: u8,
    pub sw2: u8,
}

impl ApduCmd {
    pub fn new(cla: u8, ins: u8, p1: u8, p2: u8, cdf: &[u8], rdf_len: u32) -> Result<Self> {
        let cmd = Self {
            cla,
            ins,
            p1,
            p2,
            cdf: cdf.to_vec(),
            rdf_len,
        };
        cmd.validate()?;
        Ok(cmd)
    }

    fn validate(&self) -> Result<()> {
        if self.cdf.len() > CDF_MAX || self.rdf_len > RDF_MAX {
            return Err(Error::BadInput);
        }
        Ok(())
    }

    fn short_form(&self) -> bool {
        self.cdf.len() <= 255 && self.rdf_len <= 256
    }

    /// Exact wire size of the canonical encoding.
    pub fn encoded_len(&self) -> usize {
        let mut n = 4;
        if self.short_form() {
            if !self.cdf.is_empty() {
                n += 1 + self.cdf.len();
            }
            if self.rdf_len > 0 {
                n += 1;
            }
        } else {
            if !self.cdf.is_empty() {
                n += 3 + self.cdf.len();
            }
            if self.rdf_len > 0 {
                n += if self.cdf.is_empty() { 3 } else { 2 };
            }
        }
        n
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        self.validate()?;
        let mut out = Vec::with_capacity(self.encoded_len());
        out.push(self.cla);
        out.push(self.ins);
        out.push(self.p1);
        out.push(self.p2);

        if self.short_form() {
            if !self.cdf.is_empty() {
                out.push(self.cdf.len() as u8);
                out.extend_from_slice(&self.cdf);
            }
            if self.rdf_len > 0 {
                // 256 wraps to 00.
                out.push((self.rdf_len & 0xFF) as u8);
            }
        } else {
            if !self.cdf.is_empty() {
                out.push(0x00);
                out.extend_from_slice(&(self.cdf.len() as u16).to_be_bytes());
                out.extend_from_slice(&self.cdf);
            }
            if self.rdf_len > 0 {
                if self.cdf.is_empty() {
                    out.push(0x00);
                }
                // 65536 wraps to 00 00.
                out.extend_from_slice(&((self.rdf_len & 0xFFFF) as u16).to_be_bytes());
            }
        }
        Ok(out)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::BadInput);
        }
        let (cla, ins, p1, p2) = (data[0], data[1], data[2], data[3]);
        let body = &data[4..];

        let (cdf, rdf_len) = if body.is_empty() {
            (&[][..], 0u32)
        } else if body[0] != 0 {
            Self::decode_short(body)?
        } else {
            Self::decode_marked(body)?
        };

        Ok(Self {
            cla,
            ins,
            p1,
            p2,
            cdf: cdf.to_vec(),
            rdf_len,
        })
    }

    /// Body starting with a nonzero octet: short `Le` alone, or short `Lc`.
    fn decode_short(body: &[u8]) -> Result<(&[u8], u32)> {
        if body.len() == 1 {
            return Ok((&[], u32::from(body[0])));
        }
        let lc = usize::from(body[0]);
        if body.len() == 1 + lc {
            Ok((&body[1..], 0))
        } else if body.len() == 1 + lc + 1 {
            let le = body[1 + lc];
            Ok((&body[1..1 + lc], le_short(le)))
        } else {
            Err(Error::BadInput)
        }
    }

    /// Body starting with `00`: short `Le = 256`, or the extended form.
    fn decode_marked(body: &[u8]) -> Result<(&[u8], u32)> {
        if body.len() == 1 {
            return Ok((&[], 256));
        }
        let (cdf, rdf_len) = if body.len() == 3 {
            let le = u16::from_be_bytes([body[1], body[2]]);
            (&[][..], le_ext(le))
        } else {
            let lc = usize::from(u16::from_be_bytes([body[1], body[2]]));
            // A zero-length data field is encoded by omitting Lc entirely.
            if lc == 0 {
                return Err(Error::BadInput);
            }
            if body.len() == 3 + lc {
                (&body[3..], 0)
            } else if body.len() == 3 + lc + 2 {
                let le = u16::from_be_bytes([body[3 + lc], body[3 + lc + 1]]);
                (&body[3..3 + lc], le_ext(le))
            } else {
                return Err(Error::BadInput);
            }
        };
        // Extended form is canonical only when the short form cannot hold it.
        if cdf.len() <= 255 && rdf_len <= 256 {
            return Err(Error::BadInput);
        }
        Ok((cdf, rdf_len))
    }
}

fn le_short(octet: u8) -> u32 {
    if octet == 0 {
        256
    } else {
        u32::from(octet)
    }
}

fn le_ext(word: u16) -> u32 {
    if word == 0 {
        65536
    } else {
        u32::from(word)
    }
}

impl ApduResp {
    pub fn new(rdf: &[u8], sw1: u8, sw2: u8) -> Result<Self> {
        if rdf.len() > RDF_MAX as usize {
            return Err(Error::BadInput);
        }
        Ok(Self {
            rdf: rdf.to_vec(),
            sw1,
            sw2,
        })
    }

    /// Status word as one value, `sw1 << 8 | sw2`.
    pub fn sw(&self) -> u16 {
        u16::from_be_bytes([self.sw1, self.sw2])
    }

    pub fn encoded_len(&self) -> usize {
        self.rdf.len() + 2
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.rdf.len() > RDF_MAX as usize {
            return Err(Error::BadInput);
        }
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(&self.rdf);
        out.push(self.sw1);
        out.push(self.sw2);
        Ok(out)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 2 || data.len() > RDF_MAX as usize + 2 {
            return Err(Error::BadInput);
        }
        let (rdf, sw) = data.split_at(data.len() - 2);
        Ok(Self {
            rdf: rdf.to_vec(),
            sw1: sw[0],
            sw2: sw[1],
        })
    }
}
