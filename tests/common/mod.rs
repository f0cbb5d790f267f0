//! Synthetic signer helper shared by the scenario and invariant test files:
//! builds Annex-B NAL units and matching signed-video SEIs the same way a
//! real signer would, so these tests exercise `Session` purely through its
//! public API.

#![allow(dead_code)]

use signed_video_validator::hash::{hash_nalu, GopHasher};
use signed_video_validator::nalu::{parse_nalu, SIGNED_VIDEO_UUID};
use signed_video_validator::tlv::{self, encode_hash_list_value, GeneralInfo, Tag, TlvRecord};
use signed_video_validator::{AuthenticityLevel, Codec};

pub fn annexb(body: &[u8]) -> Vec<u8> {
    let mut v = vec![0, 0, 0, 1];
    v.extend_from_slice(body);
    v
}

pub fn i_frame(first: bool) -> Vec<u8> {
    annexb(&[0x65, if first { 0x80 } else { 0x01 }])
}

pub fn p_frame(tag: u8) -> Vec<u8> {
    // `tag` only perturbs the payload so distinct P-frames hash differently;
    // it carries no semantic meaning for the slice header itself.
    annexb(&[0x61, tag])
}

/// Builds NAL units and matching signed-video SEIs for a synthetic stream,
/// tracking the GOP counter the way a real signer's pipeline would.
pub struct TestSigner {
    gop_idx: u32,
    level: AuthenticityLevel,
    public_key: Vec<u8>,
}

impl TestSigner {
    pub fn new(level: AuthenticityLevel) -> Self {
        TestSigner {
            gop_idx: 0,
            level,
            public_key: b"test-key-v1".to_vec(),
        }
    }

    pub fn gop_idx(&self) -> u32 {
        self.gop_idx
    }

    pub fn set_public_key(&mut self, key: Vec<u8>) {
        self.public_key = key;
    }

    /// Builds a signed-video SEI declaring `gop_nalus` (plus, if present,
    /// `chain_nalu`'s digest folded into the GOP hash without counting
    /// toward `num_nalus_in_gop`) as the closing GOP's content, using
    /// `EchoVerifier`'s "signature == digest" convention.
    pub fn sei(&mut self, gop_nalus: &[Vec<u8>], chain_nalu: Option<&[u8]>) -> Vec<u8> {
        self.sei_with_key(gop_nalus, chain_nalu, true)
    }

    /// Like `sei`, but the `PUBLIC_KEY` record is omitted when
    /// `include_key` is false (used to exercise the pending-public-key path).
    pub fn sei_with_key(&mut self, gop_nalus: &[Vec<u8>], chain_nalu: Option<&[u8]>, include_key: bool) -> Vec<u8> {
        let mut hasher = GopHasher::init();
        let mut hash_list = Vec::new();
        for nal in gop_nalus {
            let info = parse_nalu(nal, Codec::H264);
            let digest = hash_nalu(&info.hashable_data);
            hasher.update(&digest);
            hash_list.push(digest);
        }
        if let Some(chain) = chain_nalu {
            let info = parse_nalu(chain, Codec::H264);
            hasher.update(&hash_nalu(&info.hashable_data));
        }
        let gop_hash = hasher.finalize();

        let general = GeneralInfo {
            gop_idx: self.gop_idx,
            num_nalus_in_gop: gop_nalus.len() as u32,
            level: self.level,
            version_on_signing_side: None,
        };
        let hash_list_value = match self.level {
            AuthenticityLevel::Frame => encode_hash_list_value(&gop_hash, Some(&hash_list)),
            AuthenticityLevel::Gop => encode_hash_list_value(&gop_hash, None),
        };

        let mut records = vec![
            TlvRecord { tag: Tag::General, value: general.encode() },
            TlvRecord { tag: Tag::HashList, value: hash_list_value },
            TlvRecord { tag: Tag::Signature, value: gop_hash.to_vec() },
        ];
        if include_key {
            records.push(TlvRecord { tag: Tag::PublicKey, value: self.public_key.clone() });
        }
        let tlv_bytes = tlv::encode(&records);

        self.gop_idx += 1;

        let mut body = vec![0x06u8, 5, (16 + 1 + tlv_bytes.len()) as u8];
        body.extend_from_slice(&SIGNED_VIDEO_UUID);
        body.push(0x00); // reserved
        body.extend_from_slice(&tlv_bytes);
        body.push(0x80); // stop bit
        annexb(&body)
    }
}

/// Builds `n_closed_gops + 1` GOPs of `frames_per_gop` frames each (an
/// I-frame followed by P-frames), signing the first `n_closed_gops` of them
/// in order; the last GOP is left open (no SEI), exactly as a live capture
/// would look mid-GOP. `keys` is consulted by index, clamped to its last
/// entry, so a single key can be held constant or rotated partway through.
pub fn build_stream(n_closed_gops: usize, frames_per_gop: usize, keys: &[&[u8]]) -> Vec<Vec<u8>> {
    assert!(frames_per_gop >= 1);
    let mut signer = TestSigner::new(AuthenticityLevel::Gop);
    let gops: Vec<Vec<Vec<u8>>> = (0..=n_closed_gops)
        .map(|g| {
            let mut frames = vec![i_frame(true)];
            for k in 1..frames_per_gop {
                frames.push(p_frame((g * frames_per_gop + k) as u8));
            }
            frames
        })
        .collect();

    let mut stream = Vec::new();
    stream.extend(gops[0].iter().cloned());
    for g in 0..n_closed_gops {
        stream.push(gops[g + 1][0].clone());
        let key = keys[g.min(keys.len().saturating_sub(1))];
        signer.set_public_key(key.to_vec());
        stream.push(signer.sei(&gops[g], Some(&gops[g + 1][0])));
        stream.extend(gops[g + 1][1..].iter().cloned());
    }
    stream
}
