//! TLV Codec: encodes/decodes the Signed-Video SEI payload as a sequence of
//! `tag(1) | length(2, BE) | value` records.

use crate::error::Error;
use crate::gop::AuthenticityLevel;
use crate::hash::{Digest32, HASH_DIGEST_SIZE};

/// One-byte tag values. The exact byte assignment is an implementation
/// choice; fixed here to the values this crate uses on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    /// Always present: GOP index, `num_nalus_in_gop`, authenticity level.
    General,
    /// Recurrent: hardware id, firmware version, serial number, etc.
    ProductInfo,
    /// Recurrent: vendor-opaque TLV blob, echoed verbatim.
    ArbitraryData,
    /// Recurrent: the signer's public key.
    PublicKey,
    /// Always present at FRAME authenticity level: ordered per-frame hashes.
    HashList,
    /// Always present: signature over the GOP hash.
    Signature,
    /// Recurrent: signature-algorithm identifier for the `Verifier`.
    CryptoInfo,
    /// Recurrent: vendor-specific (Axis) attestation blob.
    VendorAxisCommunications,
    /// Unrecognised tag byte; skipped, never an error.
    Unknown(u8),
}

impl Tag {
    const GENERAL: u8 = 0x01;
    const PRODUCT_INFO: u8 = 0x02;
    const ARBITRARY_DATA: u8 = 0x03;
    const PUBLIC_KEY: u8 = 0x04;
    const HASH_LIST: u8 = 0x05;
    const SIGNATURE: u8 = 0x06;
    const CRYPTO_INFO: u8 = 0x07;
    const VENDOR_AXIS: u8 = 0x08;

    fn from_byte(b: u8) -> Tag {
        match b {
            Self::GENERAL => Tag::General,
            Self::PRODUCT_INFO => Tag::ProductInfo,
            Self::ARBITRARY_DATA => Tag::ArbitraryData,
            Self::PUBLIC_KEY => Tag::PublicKey,
            Self::HASH_LIST => Tag::HashList,
            Self::SIGNATURE => Tag::Signature,
            Self::CRYPTO_INFO => Tag::CryptoInfo,
            Self::VENDOR_AXIS => Tag::VendorAxisCommunications,
            other => Tag::Unknown(other),
        }
    }

    fn to_byte(self) -> u8 {
        match self {
            Tag::General => Self::GENERAL,
            Tag::ProductInfo => Self::PRODUCT_INFO,
            Tag::ArbitraryData => Self::ARBITRARY_DATA,
            Tag::PublicKey => Self::PUBLIC_KEY,
            Tag::HashList => Self::HASH_LIST,
            Tag::Signature => Self::SIGNATURE,
            Tag::CryptoInfo => Self::CRYPTO_INFO,
            Tag::VendorAxisCommunications => Self::VENDOR_AXIS,
            Tag::Unknown(b) => b,
        }
    }

    /// "Recurrent" tags are only emitted every R-th SEI.
    /// `General`, `HashList`, and `Signature` are always present.
    pub fn is_recurrent(self) -> bool {
        matches!(
            self,
            Tag::ProductInfo
                | Tag::ArbitraryData
                | Tag::PublicKey
                | Tag::CryptoInfo
                | Tag::VendorAxisCommunications
        )
    }
}

/// One decoded TLV record.
#[derive(Debug, Clone)]
pub struct TlvRecord {
    pub tag: Tag,
    pub value: Vec<u8>,
}

/// Whether the recurrent tag class should be emitted for the given GOP
/// counter: `(gop_counter + offset) mod r == 0`.
pub fn is_recurrence_anchor(gop_counter: u32, r: u32, offset: u32) -> bool {
    if r == 0 {
        return false;
    }
    (gop_counter.wrapping_add(offset)) % r == 0
}

/// Encode a sequence of TLV records back-to-back. `write_byte` tracks the
/// last two output bytes so `0x00 0x00 0x0{0,1,2,3}` never appears on the
/// wire unescaped — lengths must be computed over the *un-escaped* value
/// before this pass runs.
pub fn encode(records: &[TlvRecord]) -> Vec<u8> {
    let mut raw = Vec::new();
    for rec in records {
        raw.push(rec.tag.to_byte());
        let len = rec.value.len() as u16;
        raw.extend_from_slice(&len.to_be_bytes());
        raw.extend_from_slice(&rec.value);
    }
    apply_emulation_prevention(&raw)
}

fn apply_emulation_prevention(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len() + raw.len() / 64);
    let mut zeros = 0usize;
    for &b in raw {
        if zeros >= 2 && b <= 0x03 {
            out.push(0x03);
            zeros = 0;
        }
        out.push(b);
        if b == 0x00 {
            zeros += 1;
        } else {
            zeros = 0;
        }
    }
    out
}

/// Decode a TLV record sequence out of an already emulation-prevention
/// stripped SEI payload. Unknown tags are skipped by length; a length
/// that overruns the buffer is a `DecodingError`.
pub fn decode(data: &[u8]) -> Result<Vec<TlvRecord>, Error> {
    let mut out = Vec::new();
    let mut i = 0usize;
    while i < data.len() {
        if i + 3 > data.len() {
            return Err(Error::DecodingError(
                "truncated TLV header".to_string(),
            ));
        }
        let tag = Tag::from_byte(data[i]);
        let len = u16::from_be_bytes([data[i + 1], data[i + 2]]) as usize;
        i += 3;
        if i + len > data.len() {
            return Err(Error::DecodingError(format!(
                "TLV value overruns buffer: tag_byte={:?} len={len} remaining={}",
                data[i - 3],
                data.len() - i
            )));
        }
        let value = data[i..i + len].to_vec();
        i += len;
        out.push(TlvRecord { tag, value });
    }
    Ok(out)
}

/// Vendor Axis Communications TLV value, version 1:
/// `version(1) | cert_chain_len(1) | cert_chain(cert_chain_len, NUL-terminated ASCII)
///  | attestation_len(1) | attestation(attestation_len)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorAxisBlob {
    pub version: u8,
    /// NUL-terminated ASCII certificate chain, NUL included.
    pub cert_chain: Vec<u8>,
    pub attestation: Vec<u8>,
}

impl VendorAxisBlob {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(3 + self.cert_chain.len() + self.attestation.len());
        out.push(self.version);
        out.push(self.cert_chain.len() as u8);
        out.extend_from_slice(&self.cert_chain);
        out.push(self.attestation.len() as u8);
        out.extend_from_slice(&self.attestation);
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self, Error> {
        let mut i = 0usize;
        let version = *data
            .get(i)
            .ok_or_else(|| Error::DecodingError("vendor axis: missing version".into()))?;
        i += 1;
        if version != 1 {
            return Err(Error::IncompatibleVersion(format!(
                "vendor axis TLV version {version} unsupported"
            )));
        }
        let cert_len = *data
            .get(i)
            .ok_or_else(|| Error::DecodingError("vendor axis: missing cert_chain_len".into()))?
            as usize;
        i += 1;
        let cert_chain = data
            .get(i..i + cert_len)
            .ok_or_else(|| Error::DecodingError("vendor axis: cert_chain truncated".into()))?
            .to_vec();
        i += cert_len;
        let att_len = *data
            .get(i)
            .ok_or_else(|| Error::DecodingError("vendor axis: missing attestation_len".into()))?
            as usize;
        i += 1;
        let attestation = data
            .get(i..i + att_len)
            .ok_or_else(|| Error::DecodingError("vendor axis: attestation truncated".into()))?
            .to_vec();
        Ok(VendorAxisBlob {
            version,
            cert_chain,
            attestation,
        })
    }
}

/// `GENERAL` TLV value, always present: GOP index,
/// `num_nalus_in_gop`, the authenticity level the signer used for this GOP,
/// and (optionally) the signing-side library version string.
///
/// Layout: `gop_idx(4, BE) | num_nalus_in_gop(4, BE) | level(1) |
/// version_len(1) | version_bytes(version_len, UTF-8)`. `version_len == 0`
/// means no version string was transmitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneralInfo {
    pub gop_idx: u32,
    pub num_nalus_in_gop: u32,
    pub level: AuthenticityLevel,
    pub version_on_signing_side: Option<String>,
}

impl GeneralInfo {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(10);
        out.extend_from_slice(&self.gop_idx.to_be_bytes());
        out.extend_from_slice(&self.num_nalus_in_gop.to_be_bytes());
        out.push(match self.level {
            AuthenticityLevel::Gop => 0,
            AuthenticityLevel::Frame => 1,
        });
        match &self.version_on_signing_side {
            Some(v) => {
                out.push(v.len() as u8);
                out.extend_from_slice(v.as_bytes());
            }
            None => out.push(0),
        }
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self, Error> {
        if data.len() < 9 {
            return Err(Error::DecodingError("GENERAL TLV too short".to_string()));
        }
        let gop_idx = u32::from_be_bytes(data[0..4].try_into().unwrap());
        let num_nalus_in_gop = u32::from_be_bytes(data[4..8].try_into().unwrap());
        let level = match data[8] {
            0 => AuthenticityLevel::Gop,
            1 => AuthenticityLevel::Frame,
            other => {
                return Err(Error::DecodingError(format!(
                    "GENERAL TLV: unknown authenticity level byte {other}"
                )));
            }
        };
        let version_on_signing_side = match data.get(9) {
            None | Some(0) => None,
            Some(&len) => {
                let len = len as usize;
                let bytes = data
                    .get(10..10 + len)
                    .ok_or_else(|| Error::DecodingError("GENERAL TLV: version string truncated".to_string()))?;
                Some(
                    String::from_utf8(bytes.to_vec())
                        .map_err(|e| Error::DecodingError(format!("GENERAL TLV: version not utf8: {e}")))?,
                )
            }
        };
        Ok(GeneralInfo {
            gop_idx,
            num_nalus_in_gop,
            level,
            version_on_signing_side,
        })
    }
}

/// `HASH_LIST` TLV value: the GOP hash followed by zero or more per-frame
/// hashes, present only at FRAME authenticity level.
pub fn encode_hash_list_value(gop_hash: &Digest32, hash_list: Option<&[Digest32]>) -> Vec<u8> {
    let mut out = Vec::with_capacity(HASH_DIGEST_SIZE * (1 + hash_list.map_or(0, |l| l.len())));
    out.extend_from_slice(gop_hash);
    if let Some(list) = hash_list {
        for h in list {
            out.extend_from_slice(h);
        }
    }
    out
}

pub fn decode_hash_list_value(data: &[u8]) -> Result<(Digest32, Option<Vec<Digest32>>), Error> {
    if data.len() < HASH_DIGEST_SIZE {
        return Err(Error::DecodingError("HASH_LIST TLV too short".to_string()));
    }
    let gop_hash: Digest32 = data[..HASH_DIGEST_SIZE].try_into().unwrap();
    let rest = &data[HASH_DIGEST_SIZE..];
    if rest.is_empty() {
        return Ok((gop_hash, None));
    }
    if rest.len() % HASH_DIGEST_SIZE != 0 {
        return Err(Error::DecodingError(
            "HASH_LIST TLV: trailing bytes not a whole number of digests".to_string(),
        ));
    }
    let list = rest
        .chunks_exact(HASH_DIGEST_SIZE)
        .map(|c| c.try_into().unwrap())
        .collect();
    Ok((gop_hash, Some(list)))
}
