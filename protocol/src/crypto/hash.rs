//! # Hashing Utilities
//!
//! Two hash functions, each with one job:
//!
//! - **BLAKE3** (domain-separated) for invocation digests, the thing every
//!   authorizing signature covers.
//! - **SHA-256** for code references on upgrade proposals: the node hashes
//!   the artifact it is asked to propose.

use sha2::{Digest, Sha256};

/// Domain tag for call digests signed by authorizing principals.
pub const INVOCATION_CONTEXT: &str = "vouch 2026-01 escrow invocation v1";

/// SHA-256 of `data` as a fixed-size array.
///
/// # Example
///
/// ```
/// use vouch_protocol::crypto::sha256;
///
/// let digest = sha256(b"escrow-v2.wasm");
/// assert_eq!(digest.len(), 32);
/// ```
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let mut output = [0u8; 32];
    output.copy_from_slice(&hasher.finalize());
    output
}

/// Digest of an operation name plus its encoded arguments: BLAKE3 in
/// `derive_key` mode under [`INVOCATION_CONTEXT`], so it never collides
/// with a digest taken for another purpose. Each part is length-prefixed
/// so `("ab", "c")` and `("a", "bc")` hash differently.
pub fn invocation_digest(operation: &str, args: &[&[u8]]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key(INVOCATION_CONTEXT);
    for part in std::iter::once(operation.as_bytes()).chain(args.iter().copied()) {
        hasher.update(&(part.len() as u64).to_be_bytes());
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}
