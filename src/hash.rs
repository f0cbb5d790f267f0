//! Hash Engine: a single fixed-output digest used throughout.

use sha2::{Digest, Sha256};

/// Fixed digest size in bytes (SHA-256).
pub const HASH_DIGEST_SIZE: usize = 32;

/// Upper bound on the per-frame hash list before the engine falls back from
/// FRAME to GOP authenticity level for that GOP.
pub const MAX_HASH_LIST: usize = 1024;

pub type Digest32 = [u8; HASH_DIGEST_SIZE];

/// Digest of one NAL unit's hashable data, after emulation-byte stripping.
pub fn hash_nalu(hashable_data: &[u8]) -> Digest32 {
    let mut hasher = Sha256::new();
    hasher.update(hashable_data);
    hasher.finalize().into()
}

/// Accumulates the ordered per-NALU hashes of a GOP into one GOP hash,
/// finalized at GOP boundary.
///
/// `init`/`update`/`finalize` wrap `sha2::Sha256` so the concrete algorithm
/// can move without touching call sites.
pub struct GopHasher {
    inner: Sha256,
}

impl GopHasher {
    pub fn init() -> Self {
        GopHasher {
            inner: Sha256::new(),
        }
    }

    /// Feed one NALU's already-computed per-NALU hash into the running GOP
    /// hash, in arrival order.
    pub fn update(&mut self, nalu_hash: &Digest32) {
        self.inner.update(nalu_hash);
    }

    pub fn finalize(self) -> Digest32 {
        self.inner.finalize().into()
    }
}

impl Default for GopHasher {
    fn default() -> Self {
        Self::init()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        let a = hash_nalu(b"hello");
        let b = hash_nalu(b"hello");
        assert_eq!(a, b);
    }

    #[test]
    fn different_input_different_hash() {
        let a = hash_nalu(b"hello");
        let b = hash_nalu(b"world");
        assert_ne!(a, b);
    }

    #[test]
    fn gop_hash_is_order_sensitive() {
        let h1 = hash_nalu(b"one");
        let h2 = hash_nalu(b"two");

        let mut a = GopHasher::init();
        a.update(&h1);
        a.update(&h2);

        let mut b = GopHasher::init();
        b.update(&h2);
        b.update(&h1);

        assert_ne!(a.finalize(), b.finalize());
    }

    #[test]
    fn gop_hash_matches_recomputation() {
        let h1 = hash_nalu(b"one");
        let h2 = hash_nalu(b"two");

        let mut a = GopHasher::init();
        a.update(&h1);
        a.update(&h2);
        let out_a = a.finalize();

        let mut b = GopHasher::init();
        b.update(&h1);
        b.update(&h2);
        let out_b = b.finalize();

        assert_eq!(out_a, out_b);
    }
}
