//! Descriptive metadata attached to a bounty slot.
//!
//! Metadata ties a slot to the issue it pays for. It is bookkeeping only:
//! nothing in the escrow reads it, and it may be set before funds are
//! locked.

use serde::{Deserialize, Serialize};

use crate::error::EscrowError;

/// Longest accepted `bounty_type`, in bytes.
pub const MAX_BOUNTY_TYPE_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BountyMetadata {
    pub repo_id: u64,
    pub issue_id: u64,
    /// Free-form tag such as `bug` or `feature`.
    pub bounty_type: String,
}

impl BountyMetadata {
    pub fn validate(&self) -> Result<(), EscrowError> {
        if self.bounty_type.trim().is_empty() {
            return Err(EscrowError::InvalidMetadata("bounty type is empty".into()));
        }
        if self.bounty_type.len() > MAX_BOUNTY_TYPE_LEN {
            return Err(EscrowError::InvalidMetadata(format!(
                "bounty type longer than {MAX_BOUNTY_TYPE_LEN} bytes"
            )));
        }
        Ok(())
    }
}
