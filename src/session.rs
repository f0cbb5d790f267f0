//! Session: the public entry point tying the NALU parser, TLV codec, hash
//! engine, GOP state machine, validation engine, and authenticity reporter
//! together.

use std::collections::VecDeque;

use tracing::{debug, trace, warn};

use crate::error::Error;
use crate::gop::{
    AuthenticityLevel, DecodedGopSei, GopInfoDetected, GopScratch, PendingGopRing,
    PendingGopSnapshot, MAX_PENDING_GOPS,
};
use crate::hash::{hash_nalu, Digest32};
use crate::nalu::{parse_nalu, Codec, NaluInfo};
use crate::report::{AccumulatedValidation, Authenticity, AuthenticityReport, LatestValidation, ProductInfo};
use crate::tlv::{self, GeneralInfo, Tag, VendorAxisBlob};
use crate::validation::{NaluListItem, PendingList, ValidationStatus};
use crate::verifier::Verifier;

/// Default cap on a single NAL unit's size: a policy bound, not part of the
/// authenticity state machine, so a corrupt length prefix cannot force an
/// unbounded allocation.
pub const DEFAULT_MAX_NALU_LEN: usize = 8 * 1024 * 1024;

/// Constructor-time settings bundle, for callers that know everything up
/// front, realised as `Session::with_config`.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub codec: Codec,
    pub authenticity_level: AuthenticityLevel,
    pub recurrence_r: u32,
    pub recurrence_offset: u32,
    pub max_nalu_len: usize,
}

impl SessionConfig {
    pub fn new(codec: Codec) -> Self {
        SessionConfig {
            codec,
            authenticity_level: AuthenticityLevel::Gop,
            recurrence_r: 1,
            recurrence_offset: 0,
            max_nalu_len: DEFAULT_MAX_NALU_LEN,
        }
    }
}

/// One GOP that has structurally closed (its boundary NALU arrived) but has
/// not yet been matched to a decoded SEI.
struct ClosedGopRecord {
    gop_idx: u32,
    /// Pending-list indices of this GOP's own members, in arrival order.
    /// Does not include the next GOP's boundary item (tracked only via the
    /// chained-hash fold into `gop_hash`, see `GopScratch::add_chain_hash`).
    item_indices: Vec<usize>,
    gop_hash: Digest32,
    hash_list: Option<Vec<Digest32>>,
    num_nalus_in_gop: u32,
    info: GopInfoDetected,
}

/// The mutable state of one authenticity validation run. One session owns
/// one disjoint object graph; not `Sync`-shared without external
/// synchronisation.
pub struct Session {
    config: SessionConfig,
    started: bool,

    verifier: Option<Box<dyn Verifier>>,
    active_public_key: Option<Vec<u8>>,
    key_changed_pending: bool,

    pending: PendingList,
    scratch: GopScratch,
    current_gop_idx: u32,
    gop_info: GopInfoDetected,
    open_gop_item_indices: Vec<usize>,

    /// GOPs that closed but are awaiting a matching SEI (normal case: depth
    /// 0 or 1; depth grows when a SEI is late).
    awaiting_sei: VecDeque<ClosedGopRecord>,
    /// GOPs that decoded a SEI but could not be verified for lack of any
    /// public key at all.
    pending_ring: PendingGopRing,

    has_seen_any_sei_ever: bool,
    product_info: Option<ProductInfo>,
    version_on_signing_side: Option<String>,
    this_version: String,

    accumulated: AccumulatedValidation,
    /// Positions (within the closing GOP's declared NALU ordering) the
    /// validator never received, accumulated for the next report.
    pending_missing_positions: Vec<usize>,
    pending_missed_delta: i64,
}

impl Session {
    pub fn new(codec: Codec) -> Self {
        Self::with_config(SessionConfig::new(codec))
    }

    pub fn with_config(config: SessionConfig) -> Self {
        Session {
            config,
            started: false,
            verifier: None,
            active_public_key: None,
            key_changed_pending: false,
            pending: PendingList::new(),
            scratch: GopScratch::new(),
            current_gop_idx: 0,
            gop_info: GopInfoDetected::default(),
            open_gop_item_indices: Vec::new(),
            awaiting_sei: VecDeque::new(),
            pending_ring: PendingGopRing::new(),
            has_seen_any_sei_ever: false,
            product_info: None,
            version_on_signing_side: None,
            this_version: env!("CARGO_PKG_VERSION").to_string(),
            accumulated: AccumulatedValidation::default(),
            pending_missing_positions: Vec::new(),
            pending_missed_delta: 0,
        }
    }

    pub fn set_authenticity_level(&mut self, level: AuthenticityLevel) -> Result<(), Error> {
        self.config.authenticity_level = level;
        Ok(())
    }

    /// `r == 0` would make `is_recurrence_anchor` divide by zero, so it is
    /// rejected; changing it after NAL units have already been processed is
    /// rejected too (recurrence phase is a construction-time setting, per
    /// DESIGN.md's resolution of this Open Question).
    pub fn set_recurrence_interval_frames(&mut self, r: u32, offset: u32) -> Result<(), Error> {
        if r == 0 {
            return Err(Error::InvalidParameter(
                "recurrence interval must be nonzero".to_string(),
            ));
        }
        if self.started {
            return Err(Error::NotSupported(
                "recurrence interval cannot change after validation has started".to_string(),
            ));
        }
        self.config.recurrence_r = r;
        self.config.recurrence_offset = offset;
        Ok(())
    }

    pub fn set_verifier(&mut self, verifier: Box<dyn Verifier>) {
        self.verifier = Some(verifier);
    }

    /// Empties the pending list and clears all per-run state, preserving
    /// only `accumulated_validation`.
    pub fn reset(&mut self) {
        self.started = false;
        self.active_public_key = None;
        self.key_changed_pending = false;
        self.pending.reset();
        self.scratch = GopScratch::new();
        self.current_gop_idx = 0;
        self.gop_info = GopInfoDetected::default();
        self.open_gop_item_indices.clear();
        self.awaiting_sei.clear();
        self.pending_ring.clear();
        self.has_seen_any_sei_ever = false;
        self.product_info = None;
        self.version_on_signing_side = None;
        self.pending_missing_positions.clear();
        self.pending_missed_delta = 0;
    }

    pub fn add_nalu_and_authenticate(
        &mut self,
        bytes: &[u8],
    ) -> Result<Option<AuthenticityReport>, Error> {
        if bytes.is_empty() {
            return Err(Error::InvalidParameter("empty NAL unit".to_string()));
        }
        if bytes.len() > self.config.max_nalu_len {
            return Err(Error::Memory(format!(
                "NAL unit of {} bytes exceeds max_nalu_len {}",
                bytes.len(),
                self.config.max_nalu_len
            )));
        }
        self.started = true;

        let info = parse_nalu(bytes, self.config.codec);
        trace!(nalu_type = ?info.nalu_type, validity = ?info.validity, "parsed nalu");

        if info.is_signed_video_sei {
            self.handle_sei(info)?;
        } else if !info.is_hashable || !matches!(info.validity, crate::nalu::Validity::Valid) {
            self.push_unhashable(info);
        } else {
            self.handle_hashable_item(info);
        }

        Ok(self.build_report_if_ready())
    }

    fn push_unhashable(&mut self, info: NaluInfo) {
        let status = match info.validity {
            crate::nalu::Validity::Error => ValidationStatus::Error,
            crate::nalu::Validity::Invalid => ValidationStatus::Error,
            crate::nalu::Validity::Valid => ValidationStatus::Ignored,
        };
        let mut item = NaluListItem::new(info, [0u8; 32], self.current_gop_idx);
        item.mark(status);
        self.pending.push(item);
    }

    fn handle_hashable_item(&mut self, info: NaluInfo) {
        let digest = hash_nalu(&info.hashable_data);
        let is_first = info.is_first_nalu_in_gop;
        let is_primary = info.is_primary_slice;

        if is_first && self.started_first_gop() {
            self.close_current_gop(digest);
        }

        let gop_idx = self.current_gop_idx;
        let mut item = NaluListItem::new(info, digest, gop_idx);
        if is_first {
            item.second_hash = Some(digest);
            item.needs_second_verification = true;
        }
        let idx = self.pending.push(item);
        self.open_gop_item_indices.push(idx);
        self.scratch.add_nalu_hash(&digest);

        if is_first {
            self.gop_info.first_nalu_index = Some(idx);
            self.gop_info.num_primary_slices = 1;
        } else if is_primary {
            self.gop_info.num_primary_slices += 1;
        }
    }

    /// The very first GOP has no predecessor to close.
    fn started_first_gop(&self) -> bool {
        !self.open_gop_item_indices.is_empty() || self.current_gop_idx > 0
    }

    fn close_current_gop(&mut self, chain_digest: Digest32) {
        self.scratch.add_chain_hash(&chain_digest);

        let hash_list = self.scratch.hash_list().map(|l| l.to_vec());
        let num_nalus_in_gop = self.open_gop_item_indices.len() as u32;
        let old_scratch = std::mem::replace(&mut self.scratch, GopScratch::new());
        let gop_hash = old_scratch.finalize_hash();

        let record = ClosedGopRecord {
            gop_idx: self.current_gop_idx,
            item_indices: std::mem::take(&mut self.open_gop_item_indices),
            gop_hash,
            hash_list,
            num_nalus_in_gop,
            info: self.gop_info,
        };
        debug!(gop_idx = record.gop_idx, n = record.item_indices.len(), "gop closed");

        self.awaiting_sei.push_back(record);
        self.current_gop_idx += 1;
        self.gop_info = GopInfoDetected::default();

        self.resolve_stale_unsigned_gops();
    }

    /// Local recovery for a GOP whose SEI never arrived: once two further
    /// GOPs have closed behind it without its SEI showing up, give up
    /// waiting and resolve it from the content alone.
    fn resolve_stale_unsigned_gops(&mut self) {
        while self.awaiting_sei.len() > 2 {
            if let Some(stale) = self.awaiting_sei.pop_front() {
                warn!(gop_idx = stale.gop_idx, "gop closed with no signed-video SEI ever observed");
                let status = if self.has_seen_any_sei_ever {
                    ValidationStatus::NotOk
                } else {
                    ValidationStatus::Unknown
                };
                for &idx in &stale.item_indices {
                    if let Some(item) = self.pending.get_mut(idx) {
                        item.mark(status);
                    }
                }
            }
        }
    }

    fn handle_sei(&mut self, info: NaluInfo) -> Result<(), Error> {
        let idx = self.pending.push(NaluListItem::new(info.clone(), [0u8; 32], self.current_gop_idx));
        self.has_seen_any_sei_ever = true;

        let Some(tlv_data) = &info.tlv_data else {
            self.mark_single(idx, ValidationStatus::Error);
            return Ok(());
        };

        let records = match tlv::decode(tlv_data) {
            Ok(r) => r,
            Err(_) => {
                self.mark_single(idx, ValidationStatus::Error);
                return Ok(());
            }
        };

        let decoded = match decode_sei_records(&records) {
            Ok(d) => d,
            Err(_) => {
                self.mark_single(idx, ValidationStatus::Error);
                return Ok(());
            }
        };

        self.check_recurrence(&decoded);

        let gop_idx = decoded.gop_idx;
        let position = self
            .awaiting_sei
            .iter()
            .position(|r| r.gop_idx == gop_idx);

        let Some(position) = position else {
            // Already validated, evicted, or describes a GOP that has not
            // closed yet: nothing left to attach this SEI to.
            self.mark_single(idx, ValidationStatus::Ignored);
            return Ok(());
        };
        let record = self.awaiting_sei.remove(position).expect("position just located");

        self.mark_single(idx, ValidationStatus::Ok);
        self.validate_gop(record, decoded)
    }

    fn mark_single(&mut self, idx: usize, status: ValidationStatus) {
        if let Some(item) = self.pending.get_mut(idx) {
            item.mark(status);
        }
    }

    fn check_recurrence(&self, decoded: &DecodedGopSei) {
        if !tlv::is_recurrence_anchor(decoded.gop_idx, self.config.recurrence_r, self.config.recurrence_offset) {
            return;
        }
        if decoded.product_info.is_none() && self.product_info.is_none() {
            warn!(gop_idx = decoded.gop_idx, "recurrence anchor SEI carried no PRODUCT_INFO");
        }
    }

    fn validate_gop(&mut self, record: ClosedGopRecord, decoded: DecodedGopSei) -> Result<(), Error> {
        let has_any_key = decoded.public_key.is_some() || self.active_public_key.is_some();
        if !has_any_key {
            self.buffer_awaiting_public_key(record, decoded);
            return Ok(());
        }

        let verifier = self
            .verifier
            .as_ref()
            .ok_or_else(|| Error::NotSupported("no verifier configured".to_string()))?;

        let verify_key = decoded
            .public_key
            .clone()
            .or_else(|| self.active_public_key.clone())
            .expect("has_any_key checked above");

        // The signature covers the *declared* hash (what the signer says it
        // signed), never the locally recomputed one: that is what lets a
        // missing/tampered NALU be told apart from a forged signature below.
        let hash_matches = decoded.declared_gop_hash == record.gop_hash;
        let sig_ok = verifier.verify(&verify_key, &decoded.declared_gop_hash, &decoded.signature);

        if let Some(new_key) = &decoded.public_key {
            let is_change = matches!(&self.active_public_key, Some(active) if active != new_key);
            if is_change {
                self.key_changed_pending = true;
            }
            self.active_public_key = Some(new_key.clone());
        }

        self.apply_gop_verdict(&record, &decoded, sig_ok, hash_matches);
        Ok(())
    }

    fn buffer_awaiting_public_key(&mut self, record: ClosedGopRecord, decoded: DecodedGopSei) {
        let snapshot = PendingGopSnapshot {
            gop_idx: record.gop_idx,
            gop_hash: record.gop_hash,
            hash_list: record.hash_list,
            info: record.info,
            item_indices: record.item_indices,
            decoded,
        };
        if let Some(evicted) = self.pending_ring.push(snapshot) {
            warn!(
                gop_idx = evicted.gop_idx,
                ring_len = MAX_PENDING_GOPS,
                "pending-gop ring full, discarding oldest unverified gop"
            );
            for &idx in &evicted.item_indices {
                if let Some(item) = self.pending.get_mut(idx) {
                    item.mark(ValidationStatus::Unknown);
                }
            }
        }
    }

    /// Replays every GOP buffered in the pending-public-key ring, in FIFO
    /// order, once a verifier and a public key are both available. Exposed
    /// so a caller can force a catch-up pass (e.g. after `set_verifier`)
    /// without waiting for the next NAL unit to trigger it.
    pub fn drain_pending_public_key_gops(&mut self) -> Result<(), Error> {
        if self.active_public_key.is_none() || self.verifier.is_none() {
            return Ok(());
        }
        for snapshot in self.pending_ring.drain_in_order() {
            let record = ClosedGopRecord {
                gop_idx: snapshot.gop_idx,
                item_indices: snapshot.item_indices,
                gop_hash: snapshot.gop_hash,
                hash_list: snapshot.hash_list,
                num_nalus_in_gop: snapshot.decoded.num_nalus_in_gop,
                info: snapshot.info,
            };
            self.validate_gop(record, snapshot.decoded)?;
        }
        Ok(())
    }

    /// `sig_ok` gates everything: a signature that doesn't verify against the
    /// declared hash means nothing in this GOP's SEI can be trusted, at any
    /// granularity. `hash_matches` only decides the GOP-level bulk verdict
    /// once the signature itself checks out; at FRAME level the per-position
    /// diff runs regardless of `hash_matches`, since that is exactly what
    /// lets a missing NALU be told apart from a tampered one.
    fn apply_gop_verdict(&mut self, record: &ClosedGopRecord, decoded: &DecodedGopSei, sig_ok: bool, hash_matches: bool) {
        if let Some(info) = &decoded.product_info {
            self.product_info = Some(info.clone());
        }
        if decoded.version_on_signing_side.is_some() {
            self.version_on_signing_side.clone_from(&decoded.version_on_signing_side);
        }

        let expected = decoded.num_nalus_in_gop;
        let received = record.item_indices.len() as u32;
        self.pending_missed_delta += expected as i64 - received as i64;

        if !sig_ok {
            self.mark_bulk(record, false);
            return;
        }

        let use_frame = matches!(self.config.authenticity_level, AuthenticityLevel::Frame);
        if use_frame {
            if let Some(declared_list) = &decoded.declared_hash_list {
                self.mark_frame_level(record, declared_list);
                return;
            }
        }
        self.mark_bulk(record, hash_matches);
    }

    fn mark_bulk(&mut self, record: &ClosedGopRecord, authentic: bool) {
        let status = if authentic { ValidationStatus::Ok } else { ValidationStatus::NotOk };
        for &idx in &record.item_indices {
            if let Some(item) = self.pending.get_mut(idx) {
                item.mark(status);
                item.needs_second_verification = false;
            }
        }
    }

    /// Per-item comparison against the signer's declared hash list: a
    /// position present in `declared_list` with no matching item in arrival
    /// order is a hole (`missed`), never synthesised as a phantom item —
    /// only counted and positionally recorded.
    fn mark_frame_level(&mut self, record: &ClosedGopRecord, declared_list: &[Digest32]) {
        let actual: Vec<(usize, Digest32)> = record
            .item_indices
            .iter()
            .filter_map(|&idx| self.pending.get(idx).map(|item| (idx, item.hash)))
            .collect();

        let mut ai = 0usize;
        let mut di = 0usize;
        while di < declared_list.len() {
            if ai < actual.len() && actual[ai].1 == declared_list[di] {
                let (idx, _) = actual[ai];
                if let Some(item) = self.pending.get_mut(idx) {
                    item.mark(ValidationStatus::Ok);
                    item.needs_second_verification = false;
                }
                ai += 1;
            } else {
                self.pending_missing_positions.push(di);
            }
            di += 1;
        }
        while ai < actual.len() {
            let (idx, _) = actual[ai];
            if let Some(item) = self.pending.get_mut(idx) {
                item.mark(ValidationStatus::NotOk);
                item.needs_second_verification = false;
            }
            ai += 1;
        }
    }

    fn build_report_if_ready(&mut self) -> Option<AuthenticityReport> {
        let drained = self.pending.drain_settled();
        if drained.is_empty() {
            return None;
        }

        let validation_str: String = drained.iter().map(|i| i.validation_status.to_string()).collect();
        let list_of_invalid_nalus: Vec<usize> = drained
            .iter()
            .enumerate()
            .filter(|(_, i)| {
                matches!(i.validation_status, ValidationStatus::Error | ValidationStatus::NotOk)
            })
            .map(|(pos, _)| pos)
            .collect();
        let number_of_received_picture_nalus =
            drained.iter().filter(|i| i.counts_as_received_picture()).count() as u64;
        let has_missing = !self.pending_missing_positions.is_empty();
        let list_of_missing_nalus = std::mem::take(&mut self.pending_missing_positions);
        let missed_nalus = std::mem::replace(&mut self.pending_missed_delta, 0);
        let number_of_expected_picture_nalus =
            (number_of_received_picture_nalus as i64 + missed_nalus).max(0) as u64;

        let authenticity = if drained.iter().any(|i| i.validation_status == ValidationStatus::NotOk) {
            Authenticity::NotOk
        } else if has_missing {
            Authenticity::OkWithMissingInfo
        } else if drained.iter().any(|i| i.validation_status == ValidationStatus::Unknown) {
            if self.has_seen_any_sei_ever {
                Authenticity::SignaturePresent
            } else {
                Authenticity::NotSigned
            }
        } else {
            Authenticity::Ok
        };

        let latest = LatestValidation {
            authenticity,
            public_key_has_changed: std::mem::replace(&mut self.key_changed_pending, false),
            number_of_expected_picture_nalus,
            number_of_received_picture_nalus,
            number_of_pending_picture_nalus: self.pending.pending_count() as u64,
            list_of_missing_nalus,
            list_of_invalid_nalus,
            missed_nalus,
            validation_str,
        };
        self.accumulated.add_latest(&latest);

        Some(AuthenticityReport {
            latest_validation: latest,
            accumulated_validation: self.accumulated.clone(),
            product_info: self.product_info.clone(),
            version_on_signing_side: self.version_on_signing_side.clone(),
            this_version: self.this_version.clone(),
        })
    }
}

/// Pull every known tag out of one decoded SEI's TLV record set.
/// `GENERAL`, `HASH_LIST`, and `SIGNATURE` are mandatory; the rest are
/// recurrence-gated and simply absent on non-anchor SEIs.
fn decode_sei_records(records: &[tlv::TlvRecord]) -> Result<DecodedGopSei, Error> {
    let mut general: Option<GeneralInfo> = None;
    let mut hash_list: Option<(Digest32, Option<Vec<Digest32>>)> = None;
    let mut signature: Option<Vec<u8>> = None;
    let mut public_key: Option<Vec<u8>> = None;
    let mut product_info: Option<ProductInfo> = None;
    let mut crypto_info: Option<u8> = None;
    let mut vendor_axis: Option<VendorAxisBlob> = None;

    for record in records {
        match record.tag {
            Tag::General => general = Some(GeneralInfo::decode(&record.value)?),
            Tag::HashList => hash_list = Some(tlv::decode_hash_list_value(&record.value)?),
            Tag::Signature => signature = Some(record.value.clone()),
            Tag::PublicKey => public_key = Some(record.value.clone()),
            Tag::ProductInfo => product_info = Some(ProductInfo::decode(&record.value)?),
            Tag::CryptoInfo => crypto_info = record.value.first().copied(),
            Tag::VendorAxisCommunications => vendor_axis = Some(VendorAxisBlob::decode(&record.value)?),
            Tag::ArbitraryData | Tag::Unknown(_) => {}
        }
    }

    let general = general.ok_or_else(|| Error::DecodingError("SEI missing GENERAL record".to_string()))?;
    let (declared_gop_hash, declared_hash_list) =
        hash_list.ok_or_else(|| Error::DecodingError("SEI missing HASH_LIST record".to_string()))?;
    let signature = signature.ok_or_else(|| Error::DecodingError("SEI missing SIGNATURE record".to_string()))?;

    Ok(DecodedGopSei {
        gop_idx: general.gop_idx,
        num_nalus_in_gop: general.num_nalus_in_gop,
        declared_gop_hash,
        declared_hash_list,
        signature,
        public_key,
        product_info,
        crypto_info,
        vendor_axis,
        version_on_signing_side: general.version_on_signing_side,
    })
}
