//! # Cryptographic Primitives
//!
//! Thin, type-safe wrappers around audited implementations. Nothing here is
//! clever, and nothing here should become clever.
//!
//! - **Ed25519** for signatures: every authorized escrow call is backed by one.
//! - **BLAKE3** for invocation digests.
//! - **SHA-256** for code references in upgrade proposals.

pub mod hash;
pub mod keys;
pub mod signatures;

pub use hash::{invocation_digest, sha256};
pub use keys::{KeyError, VouchKeypair, VouchPublicKey, VouchSignature};
pub use signatures::{batch_verify, sign, verify, SignatureError};
