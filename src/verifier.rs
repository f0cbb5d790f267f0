//! Verifier: the abstract public-key-signature collaborator.
//!
//! The core owns neither key storage nor algorithm selection; it only
//! byte-compares keys to detect rotation. Concrete signature schemes are
//! out of scope — this crate ships the trait only.

/// Given a public key, the signed digest, and a signature, decide whether
/// the signature is authentic.
///
/// Implementations must be deterministic and side-effect-free: the same
/// three inputs must always produce the same answer, and calling `verify`
/// must not mutate session-external state.
pub trait Verifier: Send {
    fn verify(&self, public_key: &[u8], signed_digest: &[u8], signature: &[u8]) -> bool;
}

/// Test-only verifier that accepts every signature. Never use outside
/// tests/demos: it defeats the entire purpose of the `Verifier` boundary.
#[doc(hidden)]
pub struct AcceptAllVerifier;

impl Verifier for AcceptAllVerifier {
    fn verify(&self, _public_key: &[u8], _signed_digest: &[u8], _signature: &[u8]) -> bool {
        true
    }
}

/// Test-only verifier that rejects every signature.
#[doc(hidden)]
pub struct RejectAllVerifier;

impl Verifier for RejectAllVerifier {
    fn verify(&self, _public_key: &[u8], _signed_digest: &[u8], _signature: &[u8]) -> bool {
        false
    }
}

/// Test-only verifier driven by an exact-match table: `verify` returns true
/// iff `signature == signed_digest` (i.e. the "signature" is simply a copy
/// of the digest it signs). Lets tests build deterministic streams without
/// any real cryptography.
#[doc(hidden)]
pub struct EchoVerifier;

impl Verifier for EchoVerifier {
    fn verify(&self, _public_key: &[u8], signed_digest: &[u8], signature: &[u8]) -> bool {
        signed_digest == signature
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_all_always_true() {
        let v = AcceptAllVerifier;
        assert!(v.verify(b"key", b"digest", b"sig"));
    }

    #[test]
    fn reject_all_always_false() {
        let v = RejectAllVerifier;
        assert!(!v.verify(b"key", b"digest", b"sig"));
    }

    #[test]
    fn echo_verifier_matches_digest() {
        let v = EchoVerifier;
        assert!(v.verify(b"key", b"abc", b"abc"));
        assert!(!v.verify(b"key", b"abc", b"xyz"));
    }
}
