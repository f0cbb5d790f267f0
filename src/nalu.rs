//! NALU Parser: byte-exact scanner that locates NAL boundaries, classifies
//! NAL type, recognises the Signed-Video SEI by its UUID, and strips
//! H.26x emulation-prevention bytes from SEI payloads.

use tracing::trace;

/// Fixed 16-byte UUID identifying a Signed-Video user-data-unregistered SEI.
/// Any other UUID in a type-5 (H.264) / type-39/40 (H.265) SEI is still
/// `is_hashable`, just not `is_signed_video_sei` — that asymmetry is
/// deliberate.
pub const SIGNED_VIDEO_UUID: [u8; 16] = *b"SignedVideoSeiV1";

/// Codec family in use for the session. NAL header width and slice-type
/// encoding differ between the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    H264,
    H265,
}

/// High-level classification of a NAL unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NaluType {
    /// IDR / intra-coded primary slice.
    I,
    /// Inter-coded primary slice.
    P,
    /// Parameter set (VPS/SPS/PPS).
    Ps,
    /// Supplemental Enhancement Information.
    Sei,
    /// Recognised but not relevant to authentication (e.g. AUD, filler).
    Other,
    /// Could not be classified at all.
    Undefined,
}

/// Only meaningful when `nalu_type == Sei`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UuidType {
    NotApplicable,
    SignedVideo,
    Other,
}

/// Per-item parse validity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    Valid,
    Invalid,
    Error,
}

/// Parsed view of one NAL unit.
///
/// `hashable_data` already has emulation-prevention bytes removed and the
/// RBSP stop bit excluded, ready to feed the hash engine unchanged — the
/// parser never mutates caller memory; this is always a fresh copy.
#[derive(Debug, Clone)]
pub struct NaluInfo {
    pub nalu_type: NaluType,
    pub uuid_type: UuidType,
    pub validity: Validity,
    pub is_hashable: bool,
    pub is_primary_slice: bool,
    pub is_first_nalu_in_gop: bool,
    pub is_signed_video_sei: bool,
    /// Header + RBSP with emulation bytes removed, stop bit excluded.
    pub hashable_data: Vec<u8>,
    /// Present only for SEI units: the TLV payload following the UUID and
    /// reserved byte.
    pub tlv_data: Option<Vec<u8>>,
    pub reserved_byte: Option<u8>,
}

impl NaluInfo {
    /// Unparseable: no NAL header could be read at all.
    fn error(nalu_type: NaluType) -> Self {
        NaluInfo {
            nalu_type,
            uuid_type: UuidType::NotApplicable,
            validity: Validity::Error,
            is_hashable: false,
            is_primary_slice: false,
            is_first_nalu_in_gop: false,
            is_signed_video_sei: false,
            hashable_data: Vec::new(),
            tlv_data: None,
            reserved_byte: None,
        }
    }

    /// Recognisably invalid: the header classified fine but the body is
    /// truncated or otherwise malformed. The add-and-authenticate call
    /// still succeeds; only this item's own validity degrades.
    fn invalid(nalu_type: NaluType) -> Self {
        NaluInfo {
            nalu_type,
            uuid_type: UuidType::NotApplicable,
            validity: Validity::Invalid,
            is_hashable: false,
            is_primary_slice: false,
            is_first_nalu_in_gop: false,
            is_signed_video_sei: false,
            hashable_data: Vec::new(),
            tlv_data: None,
            reserved_byte: None,
        }
    }
}

/// Remove `0x00 0x00 0x03 -> 0x00 0x00` emulation-prevention sequences.
///
/// Operates on any RBSP, not just SEI payloads.
pub fn remove_emulation_prevention(rbsp: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(rbsp.len());
    let mut zeros = 0usize;
    let mut i = 0usize;
    while i < rbsp.len() {
        let b = rbsp[i];
        if zeros >= 2 && b == 0x03 {
            i += 1;
            zeros = 0;
            continue;
        }
        out.push(b);
        if b == 0x00 {
            zeros += 1;
        } else {
            zeros = 0;
        }
        i += 1;
    }
    out
}

/// Strip a trailing `rbsp_trailing_bits` stop byte (`0x80` after the last
/// real payload byte), if present, matching how `NaluInfo::hashable_data`
/// is defined to exclude the stop bit.
fn strip_stop_bit(mut data: Vec<u8>) -> Vec<u8> {
    if data.last() == Some(&0x80) {
        data.pop();
    }
    data
}

/// Locate the start of the NAL payload after an Annex-B start code
/// (`0x000001` or `0x00000001`). Returns `None` if `nal` has no start code
/// (i.e. the caller already stripped it, e.g. length-prefixed framing).
fn strip_annexb_start_code(nal: &[u8]) -> &[u8] {
    if nal.len() >= 4 && nal[0] == 0 && nal[1] == 0 && nal[2] == 0 && nal[3] == 1 {
        &nal[4..]
    } else if nal.len() >= 3 && nal[0] == 0 && nal[1] == 0 && nal[2] == 1 {
        &nal[3..]
    } else {
        nal
    }
}

/// Parse one already-delimited NAL unit (start code, if any, still attached;
/// length-prefixed callers pass the bytes after the length field).
///
/// `codec` selects 1-byte (H.264) vs 2-byte (H.265) NAL headers and the
/// slice/SEI type-number mappings.
pub fn parse_nalu(nal: &[u8], codec: Codec) -> NaluInfo {
    let payload = strip_annexb_start_code(nal);

    match codec {
        Codec::H264 => parse_h264(payload),
        Codec::H265 => parse_h265(payload),
    }
}

fn parse_h264(payload: &[u8]) -> NaluInfo {
    let Some(&header) = payload.first() else {
        return NaluInfo::error(NaluType::Undefined);
    };
    if header & 0x80 != 0 {
        // forbidden_zero_bit set: malformed header.
        return NaluInfo::error(NaluType::Undefined);
    }
    let nal_unit_type = header & 0x1F;
    trace!(nal_unit_type, "h264 nal header");

    match nal_unit_type {
        1 | 5 => build_slice(payload, 1, nal_unit_type == 5),
        7 | 8 => build_ps(payload, 1),
        6 => build_sei_h264(payload),
        9 | 10 | 11 | 12 => build_other(payload, 1),
        0 => NaluInfo::error(NaluType::Undefined),
        _ => build_other(payload, 1),
    }
}

fn parse_h265(payload: &[u8]) -> NaluInfo {
    if payload.len() < 2 {
        return NaluInfo::error(NaluType::Undefined);
    }
    let nal_unit_type = (payload[0] >> 1) & 0x3F;
    trace!(nal_unit_type, "h265 nal header");

    match nal_unit_type {
        // Trailing/IDR/CRA slice NAL types, RFC 7798 table.
        0..=21 => {
            let is_i = matches!(nal_unit_type, 16..=21 | 19 | 20);
            build_slice(payload, 2, is_i)
        }
        32 | 33 | 34 => build_ps(payload, 2), // VPS, SPS, PPS
        39 | 40 => build_sei_h265(payload, nal_unit_type),
        35 | 36 | 37 | 38 => build_other(payload, 2), // AUD, EOS, EOB, FD
        _ => build_other(payload, 2),
    }
}

fn build_slice(payload: &[u8], header_len: usize, is_i: bool) -> NaluInfo {
    if payload.len() <= header_len {
        return NaluInfo::invalid(if is_i { NaluType::I } else { NaluType::P });
    }
    let rbsp = remove_emulation_prevention(&payload[header_len..]);
    let is_first_nalu_in_gop = is_i && is_first_slice_in_picture(&rbsp);

    NaluInfo {
        nalu_type: if is_i { NaluType::I } else { NaluType::P },
        uuid_type: UuidType::NotApplicable,
        validity: Validity::Valid,
        is_hashable: true,
        is_primary_slice: true,
        is_first_nalu_in_gop,
        is_signed_video_sei: false,
        hashable_data: strip_stop_bit(combine(header_len, &rbsp, payload)),
        tlv_data: None,
        reserved_byte: None,
    }
}

/// `first_mb_in_slice` (H.264) / `first_slice_segment_in_pic_flag` (H.265)
/// is the slice header's very first syntax element, so a first-in-picture
/// slice always begins the RBSP with a zero `ue(v)`/flag — a single `0x00`
/// top bit. This is sufficient to tell first-in-picture slices apart
/// without a full slice-header parse, matching the h264-reader precedent
/// of reading only as much slice-header state as downstream logic needs.
fn is_first_slice_in_picture(rbsp: &[u8]) -> bool {
    match rbsp.first() {
        Some(&b) => b & 0x80 != 0,
        None => false,
    }
}

fn build_ps(payload: &[u8], header_len: usize) -> NaluInfo {
    let rbsp = if payload.len() > header_len {
        remove_emulation_prevention(&payload[header_len..])
    } else {
        Vec::new()
    };
    NaluInfo {
        nalu_type: NaluType::Ps,
        uuid_type: UuidType::NotApplicable,
        validity: Validity::Valid,
        is_hashable: true,
        is_primary_slice: false,
        is_first_nalu_in_gop: false,
        is_signed_video_sei: false,
        hashable_data: strip_stop_bit(combine(header_len, &rbsp, payload)),
        tlv_data: None,
        reserved_byte: None,
    }
}

fn build_other(payload: &[u8], header_len: usize) -> NaluInfo {
    let rbsp = if payload.len() > header_len {
        remove_emulation_prevention(&payload[header_len..])
    } else {
        Vec::new()
    };
    NaluInfo {
        nalu_type: NaluType::Other,
        uuid_type: UuidType::NotApplicable,
        validity: Validity::Valid,
        is_hashable: true,
        is_primary_slice: false,
        is_first_nalu_in_gop: false,
        is_signed_video_sei: false,
        hashable_data: strip_stop_bit(combine(header_len, &rbsp, payload)),
        tlv_data: None,
        reserved_byte: None,
    }
}

fn combine(header_len: usize, rbsp: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(header_len + rbsp.len());
    out.extend_from_slice(&payload[..header_len.min(payload.len())]);
    out.extend_from_slice(rbsp);
    out
}

fn build_sei_h264(payload: &[u8]) -> NaluInfo {
    build_sei(payload, 1)
}

fn build_sei_h265(payload: &[u8], _nal_unit_type: u8) -> NaluInfo {
    build_sei(payload, 2)
}

fn build_sei(payload: &[u8], header_len: usize) -> NaluInfo {
    if payload.len() <= header_len {
        return NaluInfo::invalid(NaluType::Sei);
    }
    let rbsp = remove_emulation_prevention(&payload[header_len..]);
    let rbsp = strip_stop_bit(rbsp);

    // user_data_unregistered payloads (payloadType == 5) begin with a
    // 16-byte UUID; locating it requires walking the FF-coded
    // payload_type/payload_size pair first.
    let Some((payload_type, sei_payload)) = first_sei_message(&rbsp) else {
        return NaluInfo::invalid(NaluType::Sei);
    };

    if payload_type != 5 || sei_payload.len() < 16 {
        // Recognised SEI, but not a user-data-unregistered message (or too
        // short to carry a UUID): hashable, not signed-video.
        return NaluInfo {
            nalu_type: NaluType::Sei,
            uuid_type: UuidType::NotApplicable,
            validity: Validity::Valid,
            is_hashable: true,
            is_primary_slice: false,
            is_first_nalu_in_gop: false,
            is_signed_video_sei: false,
            hashable_data: combine(header_len, &rbsp, payload),
            tlv_data: None,
            reserved_byte: None,
        };
    }

    let uuid = &sei_payload[..16];
    let is_signed_video = uuid == SIGNED_VIDEO_UUID;

    if is_signed_video {
        let rest = &sei_payload[16..];
        let (reserved_byte, tlv_data) = match rest.split_first() {
            Some((&r, tail)) => (Some(r), Some(tail.to_vec())),
            None => (None, None),
        };
        NaluInfo {
            nalu_type: NaluType::Sei,
            uuid_type: UuidType::SignedVideo,
            validity: Validity::Valid,
            // Signed-Video SEI is an input to, not an output of, the GOP
            // hash: not hashable.
            is_hashable: false,
            is_primary_slice: false,
            is_first_nalu_in_gop: false,
            is_signed_video_sei: true,
            hashable_data: Vec::new(),
            tlv_data,
            reserved_byte,
        }
    } else {
        NaluInfo {
            nalu_type: NaluType::Sei,
            uuid_type: UuidType::Other,
            validity: Validity::Valid,
            is_hashable: true,
            is_primary_slice: false,
            is_first_nalu_in_gop: false,
            is_signed_video_sei: false,
            hashable_data: combine(header_len, &rbsp, payload),
            tlv_data: None,
            reserved_byte: None,
        }
    }
}

/// Read the first `payload_type`/`payload_size` FF-coded pair and return the
/// type plus the payload slice, per ITU-T H.264 Annex D SEI message syntax.
fn first_sei_message(rbsp: &[u8]) -> Option<(u32, &[u8])> {
    let mut i = 0usize;
    let mut payload_type: u32 = 0;
    while *rbsp.get(i)? == 0xFF {
        payload_type += 255;
        i += 1;
    }
    payload_type += *rbsp.get(i)? as u32;
    i += 1;

    let mut payload_size: usize = 0;
    while *rbsp.get(i)? == 0xFF {
        payload_size += 255;
        i += 1;
    }
    payload_size += *rbsp.get(i)? as usize;
    i += 1;

    if i + payload_size > rbsp.len() {
        return None;
    }
    Some((payload_type, &rbsp[i..i + payload_size]))
}
