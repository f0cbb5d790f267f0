//! Validation Engine primitives: the per-item verdict, the append-only
//! pending list ("arena + indices" rather than a doubly-linked list), and
//! the NaluListItem type items in that list own.

use std::fmt;

use crate::hash::Digest32;
use crate::nalu::NaluInfo;

/// Per-item verdict. `Display` renders the single-character
/// status alphabet, which is itself part of the public API
/// (`AuthenticityReport::latest_validation::validation_str`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationStatus {
    Pending,
    Unknown,
    Ignored,
    Ok,
    NotOk,
    Missing,
    Error,
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = match self {
            ValidationStatus::Pending => 'P',
            ValidationStatus::Unknown => 'U',
            ValidationStatus::Ignored => '_',
            ValidationStatus::Ok => '.',
            ValidationStatus::NotOk => 'N',
            ValidationStatus::Missing => 'M',
            ValidationStatus::Error => 'E',
        };
        write!(f, "{c}")
    }
}

impl ValidationStatus {
    /// Whether this status has settled (i.e. the item is ready to be
    /// drained from the pending list head).
    pub fn is_final(self) -> bool {
        !matches!(self, ValidationStatus::Pending)
    }
}

/// One entry in the pending list.
///
/// `taken_ownership` from the abstract data model has no Rust counterpart:
/// this struct simply owns its `NaluInfo`, so ownership transfer is
/// expressed by move semantics rather than a flag.
#[derive(Debug)]
pub struct NaluListItem {
    pub info: NaluInfo,
    pub validation_status: ValidationStatus,
    pub hash: Digest32,
    /// Set for items that participate in two adjacent GOPs (chained hash)
    /// or need re-verification after a late SEI.
    pub second_hash: Option<Digest32>,
    /// SEIs only: decoding twice is forbidden.
    pub has_been_decoded: bool,
    /// First item of a new GOP: stays `Pending` until its chained hash
    /// against the *previous* GOP is checked.
    pub needs_second_verification: bool,
    /// Latches once an item fails verification; it cannot regress to `Ok`
    /// on a later re-verification pass.
    pub first_verification_not_authentic: bool,
    pub used_in_gop_hash: bool,
    /// Which GOP (by `gop_idx`) this item belongs to, for the backward/
    /// forward SEI-matching walk.
    pub gop_idx: u32,
}

impl NaluListItem {
    pub fn new(info: NaluInfo, hash: Digest32, gop_idx: u32) -> Self {
        let is_sei = info.is_signed_video_sei;
        NaluListItem {
            info,
            validation_status: ValidationStatus::Pending,
            hash,
            second_hash: None,
            has_been_decoded: false,
            needs_second_verification: false,
            first_verification_not_authentic: false,
            used_in_gop_hash: !is_sei,
            gop_idx,
        }
    }

    /// Apply a verdict, respecting the `NotOk`-never-regresses-to-`Ok` latch.
    pub fn mark(&mut self, status: ValidationStatus) {
        if self.first_verification_not_authentic && status == ValidationStatus::Ok {
            self.validation_status = ValidationStatus::NotOk;
            return;
        }
        if status == ValidationStatus::NotOk {
            self.first_verification_not_authentic = true;
        }
        self.validation_status = status;
    }

    /// A picture NALU counted toward `number_of_received_picture_nalus`:
    /// hashable and not the (never-hashable) signed-video SEI itself.
    pub fn counts_as_received_picture(&self) -> bool {
        self.info.is_hashable && !self.info.is_signed_video_sei
    }
}

/// Append-only arena of [`NaluListItem`]s with `head`/`tail` cursors, used
/// in place of a doubly-linked list. Items are appended strictly at the
/// tail; removal only at the head once a verdict is final.
#[derive(Debug, Default)]
pub struct PendingList {
    items: Vec<NaluListItem>,
    head: usize,
}

impl PendingList {
    pub fn new() -> Self {
        PendingList {
            items: Vec::new(),
            head: 0,
        }
    }

    pub fn push(&mut self, item: NaluListItem) -> usize {
        self.items.push(item);
        self.items.len() - 1
    }

    pub fn get(&self, index: usize) -> Option<&NaluListItem> {
        self.items.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut NaluListItem> {
        self.items.get_mut(index)
    }

    /// Indices currently in the window `[head, tail)`.
    pub fn live_range(&self) -> std::ops::Range<usize> {
        self.head..self.items.len()
    }

    pub fn tail_index(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty_live(&self) -> bool {
        self.head >= self.items.len()
    }

    /// Number of items still awaiting a final verdict.
    pub fn pending_count(&self) -> usize {
        self.live_range()
            .filter(|&i| self.items[i].validation_status == ValidationStatus::Pending)
            .count()
    }

    /// Drain every settled (non-`Pending`) item from the head, returning
    /// them in arrival order.
    ///
    /// Stops at the first `Pending` item so ordering is preserved — an
    /// item later in arrival order must never be reported before an
    /// earlier one still awaiting its verdict.
    pub fn drain_settled(&mut self) -> Vec<NaluListItem> {
        let mut out = Vec::new();
        while self.head < self.items.len()
            && self.items[self.head].validation_status != ValidationStatus::Pending
        {
            // Vec has no cheap remove-from-front; since this is an
            // append-only arena we instead swap the drained item out and
            // advance head, avoiding an O(n) shift per call.
            let placeholder = NaluListItem::new(
                crate::nalu::NaluInfo {
                    nalu_type: crate::nalu::NaluType::Undefined,
                    uuid_type: crate::nalu::UuidType::NotApplicable,
                    validity: crate::nalu::Validity::Error,
                    is_hashable: false,
                    is_primary_slice: false,
                    is_first_nalu_in_gop: false,
                    is_signed_video_sei: false,
                    hashable_data: Vec::new(),
                    tlv_data: None,
                    reserved_byte: None,
                },
                [0u8; 32],
                0,
            );
            let item = std::mem::replace(&mut self.items[self.head], placeholder);
            out.push(item);
            self.head += 1;
        }
        self.compact_if_worthwhile();
        out
    }

    /// Reclaim memory behind `head` once it grows large relative to the
    /// live window, keeping indices stable for everything still live.
    fn compact_if_worthwhile(&mut self) {
        if self.head > 4096 && self.head * 2 > self.items.len() {
            self.items.drain(0..self.head);
            self.head = 0;
        }
    }

    /// Walk backward from `before` (exclusive) to find the most recent
    /// item with `is_first_nalu_in_gop`, or the list head if none exists
    /// in the live window.
    pub fn find_gop_start_before(&self, before: usize) -> usize {
        let mut i = before;
        while i > self.head {
            i -= 1;
            if self.items[i].info.is_first_nalu_in_gop {
                return i;
            }
        }
        self.head
    }

    /// Empties the list, preserving nothing.
    pub fn reset(&mut self) {
        self.items.clear();
        self.head = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nalu::{NaluType, UuidType, Validity};

    fn dummy_item(is_first: bool) -> NaluListItem {
        let info = NaluInfo {
            nalu_type: NaluType::I,
            uuid_type: UuidType::NotApplicable,
            validity: Validity::Valid,
            is_hashable: true,
            is_primary_slice: true,
            is_first_nalu_in_gop: is_first,
            is_signed_video_sei: false,
            hashable_data: vec![1, 2, 3],
            tlv_data: None,
            reserved_byte: None,
        };
        NaluListItem::new(info, [0u8; 32], 0)
    }

    #[test]
    fn not_ok_latches_against_regression() {
        let mut item = dummy_item(false);
        item.mark(ValidationStatus::NotOk);
        item.mark(ValidationStatus::Ok);
        assert_eq!(item.validation_status, ValidationStatus::NotOk);
    }

    #[test]
    fn ok_without_prior_failure_applies() {
        let mut item = dummy_item(false);
        item.mark(ValidationStatus::Ok);
        assert_eq!(item.validation_status, ValidationStatus::Ok);
    }

    #[test]
    fn drain_settled_stops_at_first_pending() {
        let mut list = PendingList::new();
        let mut a = dummy_item(false);
        a.mark(ValidationStatus::Ok);
        list.push(a);
        list.push(dummy_item(false)); // stays Pending
        let mut c = dummy_item(false);
        c.mark(ValidationStatus::Ok);
        list.push(c);

        let drained = list.drain_settled();
        assert_eq!(drained.len(), 1);
        assert_eq!(list.pending_count(), 1);
    }

    #[test]
    fn find_gop_start_walks_backward() {
        let mut list = PendingList::new();
        list.push(dummy_item(true)); // index 0: GOP start
        list.push(dummy_item(false));
        list.push(dummy_item(false));
        let start = list.find_gop_start_before(3);
        assert_eq!(start, 0);
    }

    #[test]
    fn status_alphabet_renders_single_chars() {
        assert_eq!(ValidationStatus::Pending.to_string(), "P");
        assert_eq!(ValidationStatus::Unknown.to_string(), "U");
        assert_eq!(ValidationStatus::Ignored.to_string(), "_");
        assert_eq!(ValidationStatus::Ok.to_string(), ".");
        assert_eq!(ValidationStatus::NotOk.to_string(), "N");
        assert_eq!(ValidationStatus::Missing.to_string(), "M");
        assert_eq!(ValidationStatus::Error.to_string(), "E");
    }
}
