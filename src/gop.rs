//! GOP State Machine: detects GOP boundaries, maintains the current GOP
//! hash and frame-level hash list, and tracks late-SEI / missing-key
//! bookkeeping.

use std::collections::{BTreeMap, VecDeque};

use crate::hash::{Digest32, GopHasher, MAX_HASH_LIST};
use crate::report::ProductInfo;
use crate::tlv::VendorAxisBlob;

/// Authenticity granularity in force for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthenticityLevel {
    /// Coarse verdict per GOP.
    Gop,
    /// Per-NALU verdict via a hash list.
    Frame,
}

/// One event driving the state machine per added NAL unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GopState {
    Collecting,
    AwaitingSei,
    ValidatingGop,
    AwaitingPublicKey,
}

/// Per-GOP scratch accumulated while NAL units of that GOP arrive.
#[derive(Debug)]
pub struct GopScratch {
    hasher: GopHasher,
    /// Per-frame hashes, capped at `MAX_HASH_LIST`; `None` once the cap was
    /// exceeded and the engine fell back from FRAME to GOP level for this
    /// GOP.
    hash_list: Option<Vec<Digest32>>,
    pub num_nalus_in_gop: u32,
    pub has_sei_in_gop: bool,
    pub validate_after_next_nalu: bool,
    pub no_gop_end_before_sei: bool,
    pub gop_transition_is_lost: bool,
}

impl GopScratch {
    pub fn new() -> Self {
        GopScratch {
            hasher: GopHasher::init(),
            hash_list: Some(Vec::new()),
            num_nalus_in_gop: 0,
            has_sei_in_gop: false,
            validate_after_next_nalu: false,
            no_gop_end_before_sei: false,
            gop_transition_is_lost: false,
        }
    }

    /// Feed one hashable NALU's digest into the running GOP hash and (if
    /// still under the cap) the per-frame hash list.
    pub fn add_nalu_hash(&mut self, digest: &Digest32) {
        self.hasher.update(digest);
        self.num_nalus_in_gop += 1;
        if let Some(list) = &mut self.hash_list {
            if list.len() >= MAX_HASH_LIST {
                self.hash_list = None;
            } else {
                list.push(*digest);
            }
        }
    }

    pub fn hash_list(&self) -> Option<&[Digest32]> {
        self.hash_list.as_deref()
    }

    /// Fold the chained-hash element (the next GOP's first NALU) into the
    /// running GOP hash without counting it as a member of this GOP: it
    /// belongs to the next GOP for counting/per-item purposes, but its
    /// digest is still part of this GOP's hash (chained hash).
    pub fn add_chain_hash(&mut self, digest: &Digest32) {
        self.hasher.update(digest);
    }

    pub fn finalize_hash(self) -> Digest32 {
        self.hasher.finalize()
    }
}

impl Default for GopScratch {
    fn default() -> Self {
        Self::new()
    }
}

/// What the validator believes about the current GOP purely from picture
/// observations.
#[derive(Debug, Clone, Copy, Default)]
pub struct GopInfoDetected {
    pub num_primary_slices: u32,
    /// Index into the pending list of this GOP's first NALU, if known.
    pub first_nalu_index: Option<usize>,
    /// Index into the pending list of the SEI that closed this GOP, once
    /// decoded.
    pub sei_index: Option<usize>,
}

/// Everything decoded out of one GOP's Signed-Video SEI TLV payload
/// Recurrent fields are `None` on SEIs where they were
/// not transmitted.
#[derive(Debug, Clone, Default)]
pub struct DecodedGopSei {
    pub gop_idx: u32,
    pub num_nalus_in_gop: u32,
    pub declared_gop_hash: Digest32,
    /// Per-frame hashes, present only when the signer ran at FRAME level
    /// for this GOP.
    pub declared_hash_list: Option<Vec<Digest32>>,
    pub signature: Vec<u8>,
    pub public_key: Option<Vec<u8>>,
    pub product_info: Option<ProductInfo>,
    pub crypto_info: Option<u8>,
    pub vendor_axis: Option<VendorAxisBlob>,
    pub version_on_signing_side: Option<String>,
}

/// A snapshot retained while awaiting the public key, so that once the key
/// arrives, buffered GOPs validate in order.
#[derive(Debug, Clone)]
pub struct PendingGopSnapshot {
    pub gop_idx: u32,
    pub gop_hash: Digest32,
    pub hash_list: Option<Vec<Digest32>>,
    pub info: GopInfoDetected,
    /// Indices into the session's pending list of every item belonging to
    /// this GOP, in arrival order (boundary item from the *next* GOP, if
    /// any, included last for the chained-hash re-check).
    pub item_indices: Vec<usize>,
    pub decoded: DecodedGopSei,
}

/// Hard upper bound on buffered GOPs awaiting a public key.
pub const MAX_PENDING_GOPS: usize = 120;

/// FIFO ring of snapshots keyed by `gop_idx`; oldest entries are evicted
/// (their items become `Unknown`) once the ring is full.
#[derive(Debug, Default)]
pub struct PendingGopRing {
    order: VecDeque<u32>,
    by_idx: BTreeMap<u32, PendingGopSnapshot>,
}

impl PendingGopRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a snapshot, evicting the oldest if the ring is full.
    /// Returns the evicted snapshot, if any.
    pub fn push(&mut self, snapshot: PendingGopSnapshot) -> Option<PendingGopSnapshot> {
        let mut evicted = None;
        if self.order.len() >= MAX_PENDING_GOPS {
            if let Some(oldest) = self.order.pop_front() {
                evicted = self.by_idx.remove(&oldest);
            }
        }
        self.order.push_back(snapshot.gop_idx);
        self.by_idx.insert(snapshot.gop_idx, snapshot);
        evicted
    }

    /// Drain all buffered snapshots in FIFO (gop_idx ascending arrival)
    /// order, for replay once a public key finally arrives.
    pub fn drain_in_order(&mut self) -> Vec<PendingGopSnapshot> {
        let mut out = Vec::with_capacity(self.order.len());
        while let Some(idx) = self.order.pop_front() {
            if let Some(snap) = self.by_idx.remove(&idx) {
                out.push(snap);
            }
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.by_idx.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_list_falls_back_past_cap() {
        let mut scratch = GopScratch::new();
        for i in 0..MAX_HASH_LIST {
            scratch.add_nalu_hash(&[i as u8; 32]);
        }
        assert!(scratch.hash_list().is_some());
        scratch.add_nalu_hash(&[0xFF; 32]);
        assert!(scratch.hash_list().is_none());
    }

    #[test]
    fn ring_evicts_oldest_when_full() {
        let mut ring = PendingGopRing::new();
        for i in 0..(MAX_PENDING_GOPS as u32 + 1) {
            let evicted = ring.push(PendingGopSnapshot {
                gop_idx: i,
                gop_hash: [0u8; 32],
                hash_list: None,
                info: GopInfoDetected::default(),
                item_indices: Vec::new(),
                decoded: DecodedGopSei::default(),
            });
            if i < MAX_PENDING_GOPS as u32 {
                assert!(evicted.is_none());
            } else {
                assert_eq!(evicted.unwrap().gop_idx, 0);
            }
        }
        assert_eq!(ring.len(), MAX_PENDING_GOPS);
    }

    #[test]
    fn drain_is_fifo() {
        let mut ring = PendingGopRing::new();
        for i in 0..5u32 {
            ring.push(PendingGopSnapshot {
                gop_idx: i,
                gop_hash: [0u8; 32],
                hash_list: None,
                info: GopInfoDetected::default(),
                item_indices: Vec::new(),
                decoded: DecodedGopSei::default(),
            });
        }
        let drained = ring.drain_in_order();
        let idxs: Vec<u32> = drained.iter().map(|s| s.gop_idx).collect();
        assert_eq!(idxs, vec![0, 1, 2, 3, 4]);
        assert!(ring.is_empty());
    }
}
