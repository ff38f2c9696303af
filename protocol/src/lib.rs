// Copyright (c) 2026 Vouch Contributors. MIT License.
// See LICENSE for details.

//! # Vouch Protocol: Host Primitives
//!
//! Everything the escrow engine consumes but does not own. The engine in
//! `vouch-contracts` is a pure state machine; this crate gives it a world to
//! run in:
//!
//! - **config**: Constants, deadline sentinels, and [`config::EscrowConfig`].
//! - **crypto**: Ed25519 keys and signatures, BLAKE3/SHA-256 digests.
//! - **identity**: [`identity::Principal`], the name of every account.
//! - **auth**: [`auth::AuthContext`]: who vouched for which call.
//! - **clock**: [`clock::Clock`]: monotonic Unix seconds.
//! - **ledger**: [`ledger::ValueTransfer`]: moving value, and undoing it.
//! - **storage**: [`storage::StateStore`]: atomic write sets over sled or memory.
//!
//! ## Design Philosophy
//!
//! 1. Every seam the engine touches is a trait, so tests can swap in a
//!    manual clock, a mock authorizer, or a ledger that calls back.
//! 2. Nothing here knows what an escrow is.
//! 3. If it touches money, it has tests. Plural.

pub mod auth;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod identity;
pub mod ledger;
pub mod storage;
