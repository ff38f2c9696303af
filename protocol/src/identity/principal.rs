//! Principal identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::config::MAX_PRINCIPAL_LEN;
use crate::crypto::VouchPublicKey;

/// Reasons a string is not an acceptable principal.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PrincipalError {
    #[error("principal is empty")]
    Empty,

    #[error("principal exceeds {MAX_PRINCIPAL_LEN} bytes")]
    TooLong,

    #[error("principal contains invalid character {0:?}")]
    InvalidCharacter(char),
}

/// An account identity.
///
/// Serialized as a bare string so records written with principals stay
/// readable by tools that know nothing about this type.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(String);

impl Principal {
    /// Principal for an Ed25519 public key: its lowercase hex encoding.
    pub fn from_public_key(pk: &VouchPublicKey) -> Self {
        Self(pk.to_hex())
    }

    /// A named system principal. No validation; use [`FromStr`] for
    /// untrusted input and [`is_valid`](Self::is_valid) before accepting
    /// one as a counterparty.
    pub fn named(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The public key behind this principal, if it is key-backed.
    pub fn public_key(&self) -> Option<VouchPublicKey> {
        if self.0.len() != 64 {
            return None;
        }
        VouchPublicKey::from_hex(&self.0).ok()
    }

    /// Structural validity: non-empty, bounded, and made of
    /// `[A-Za-z0-9._:-]`.
    pub fn is_valid(&self) -> bool {
        Self::check(&self.0).is_ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn check(s: &str) -> Result<(), PrincipalError> {
        if s.is_empty() {
            return Err(PrincipalError::Empty);
        }
        if s.len() > MAX_PRINCIPAL_LEN {
            return Err(PrincipalError::TooLong);
        }
        if let Some(bad) = s
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '-')))
        {
            return Err(PrincipalError::InvalidCharacter(bad));
        }
        Ok(())
    }
}

impl FromStr for Principal {
    type Err = PrincipalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::check(s)?;
        Ok(Self(s.to_string()))
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.len() == 64 {
            write!(f, "Principal({}..)", &self.0[..12])
        } else {
            write!(f, "Principal({})", self.0)
        }
    }
}
