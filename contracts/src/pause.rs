//! Per-operation circuit breakers.
//!
//! The admin can stop new deposits, money leaving to recipients, or money
//! going back to depositors, each on its own. Queries, approvals and
//! governance calls are never paused.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::EscrowError;

/// A class of operations that can be paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PauseGate {
    /// `lock_funds`.
    Lock,
    /// Payouts, batch payouts, claims and scheduled releases.
    Release,
    /// `refund`.
    Refund,
}

impl fmt::Display for PauseGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PauseGate::Lock => "lock",
            PauseGate::Release => "release",
            PauseGate::Refund => "refund",
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PauseFlags {
    #[serde(default)]
    pub lock_paused: bool,
    #[serde(default)]
    pub release_paused: bool,
    #[serde(default)]
    pub refund_paused: bool,
}

impl PauseFlags {
    pub fn is_paused(&self, gate: PauseGate) -> bool {
        match gate {
            PauseGate::Lock => self.lock_paused,
            PauseGate::Release => self.release_paused,
            PauseGate::Refund => self.refund_paused,
        }
    }

    /// Fails with `Paused` if `gate` is closed.
    pub fn check(&self, gate: PauseGate) -> Result<(), EscrowError> {
        if self.is_paused(gate) {
            Err(EscrowError::Paused(gate))
        } else {
            Ok(())
        }
    }

    /// Apply the flags that are `Some`, leaving the others alone.
    pub fn set(&mut self, lock: Option<bool>, release: Option<bool>, refund: Option<bool>) {
        if let Some(v) = lock {
            self.lock_paused = v;
        }
        if let Some(v) = release {
            self.release_paused = v;
        }
        if let Some(v) = refund {
            self.refund_paused = v;
        }
    }
}
