//! Frame source: turns a file on disk into an ordered sequence of bare NAL
//! units, so a caller (chiefly the `svv` binary) can feed them one at a time
//! into [`crate::Session::add_nalu_and_authenticate`].
//!
//! This is ambient CLI-input glue, not part of the authenticated core: the
//! `Session` itself never opens a file or understands containers — no
//! bundled demuxer is part of its contract.

use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;

use crate::error::Error;
use crate::mp4::{build_sample_offsets, parse_mp4, CodecConfig};
use crate::nalu::Codec;

/// An ordered sequence of NAL units pulled from one input file, already
/// stripped of container/length framing (but not of Annex-B start codes,
/// which [`crate::nalu::parse_nalu`] strips itself if present).
pub struct NaluSource {
    codec: Codec,
    nalus: std::vec::IntoIter<Vec<u8>>,
}

impl NaluSource {
    /// The codec this source was detected (MP4) or assumed (raw stream) to
    /// carry.
    pub fn codec(&self) -> Codec {
        self.codec
    }
}

impl Iterator for NaluSource {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        self.nalus.next()
    }
}

/// Load a source file into a [`NaluSource`]. MP4 containers are demuxed
/// per-sample and split on their `avcC`/`hvcC` length prefix, with the codec
/// taken from the container; anything else is treated as a raw Annex-B
/// elementary stream, split on start codes, assuming `default_codec`.
pub fn nalu_source_from_path(path: impl AsRef<Path>, default_codec: Codec) -> Result<NaluSource, Error> {
    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;

    if looks_like_mp4(&bytes) {
        nalu_source_from_mp4_bytes(&bytes)
    } else {
        Ok(nalu_source_from_annexb_bytes(&bytes, default_codec))
    }
}

fn looks_like_mp4(bytes: &[u8]) -> bool {
    const MARKERS: [&[u8]; 3] = [b"ftyp", b"moov", b"mdat"];
    bytes.len() >= 8 && MARKERS.contains(&&bytes[4..8])
}

fn nalu_source_from_mp4_bytes(bytes: &[u8]) -> Result<NaluSource, Error> {
    let mut cursor = Cursor::new(bytes);
    let mp4 = parse_mp4(&mut cursor)?;

    let track = mp4
        .tracks
        .iter()
        .max_by_key(|t| t.sample_sizes.len())
        .ok_or(Error::NoTracksFound)?;

    let (codec, nal_len_size) = match track.codec {
        CodecConfig::Avc { nal_len_size } => (Codec::H264, nal_len_size),
        CodecConfig::Hevc { nal_len_size } => (Codec::H265, nal_len_size),
        CodecConfig::Unknown => (Codec::H264, 4),
    };

    let sample_offsets = build_sample_offsets(track)?;
    let mut nalus = Vec::new();
    for (i, &offset) in sample_offsets.iter().enumerate() {
        let size = track.sample_sizes[i] as usize;
        let start = offset as usize;
        let sample = bytes
            .get(start..start + size)
            .ok_or(Error::Mp4InconsistentSampleTables {
                sample_sizes: track.sample_sizes.len(),
                sample_offsets: sample_offsets.len(),
                chunk_offsets: track.chunk_offsets.len(),
            })?;
        split_length_prefixed(sample, nal_len_size, &mut nalus);
    }

    Ok(NaluSource {
        codec,
        nalus: nalus.into_iter(),
    })
}

/// Split one length-prefixed MP4 sample (`avcC`/`hvcC` framing) into its
/// constituent NAL unit payloads.
fn split_length_prefixed(sample: &[u8], nal_len_size: usize, out: &mut Vec<Vec<u8>>) {
    let mut i = 0usize;
    while i + nal_len_size <= sample.len() {
        let mut len = 0usize;
        for &b in &sample[i..i + nal_len_size] {
            len = (len << 8) | b as usize;
        }
        i += nal_len_size;
        let end = (i + len).min(sample.len());
        if end <= i {
            break;
        }
        out.push(sample[i..end].to_vec());
        i = end;
    }
}

/// Split a raw Annex-B elementary stream on `00 00 01` / `00 00 00 01` start
/// codes. Each emitted NAL unit keeps its own start code, as
/// [`crate::nalu::parse_nalu`] expects.
fn nalu_source_from_annexb_bytes(bytes: &[u8], codec: Codec) -> NaluSource {
    let mut starts = Vec::new();
    let mut i = 0usize;
    while i + 3 <= bytes.len() {
        if bytes[i] == 0 && bytes[i + 1] == 0 && bytes[i + 2] == 1 {
            // A 4-byte start code is just a 3-byte one with an extra
            // leading zero; fold it into the same NAL unit's start code.
            let start = if i > 0 && bytes[i - 1] == 0 { i - 1 } else { i };
            starts.push(start);
            i += 3;
        } else {
            i += 1;
        }
    }

    let mut nalus = Vec::with_capacity(starts.len());
    for (idx, &start) in starts.iter().enumerate() {
        let end = starts.get(idx + 1).copied().unwrap_or(bytes.len());
        nalus.push(bytes[start..end].to_vec());
    }

    NaluSource {
        codec,
        nalus: nalus.into_iter(),
    }
}
