//! # Identity Module
//!
//! Who is who in an escrow instance. Every depositor, recipient, admin and
//! signer is a [`Principal`]. Principals backed by an Ed25519 key are the
//! key's hex encoding and can authorize calls with signatures; named
//! principals (`"vouch-escrow"`, `"treasury"`) identify system accounts and
//! can only be authorized by a trusted host context.

pub mod principal;

pub use principal::{Principal, PrincipalError};
