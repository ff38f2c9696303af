//! # Reentrancy Guard
//!
//! One flag per escrow instance. Every mutating entry point enters the
//! guard before touching state and leaves it when the returned
//! [`EntryGuard`] drops, on success, on error, and on unwind alike.
//!
//! Because the flag is instance-wide, a callback fired from inside a payout
//! transfer cannot re-enter *any* mutating operation: not the same payout,
//! not a refund, not a claim.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::EscrowError;

#[derive(Debug, Default)]
pub struct ReentrancyGuard {
    entered: AtomicBool,
}

impl ReentrancyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails with `ReentrancyDetected` if a protected operation is running.
    pub fn check_not_entered(&self) -> Result<(), EscrowError> {
        if self.entered.load(Ordering::SeqCst) {
            Err(EscrowError::ReentrancyDetected)
        } else {
            Ok(())
        }
    }

    /// Set the flag and return a scope that clears it on drop.
    pub fn enter(&self) -> Result<EntryGuard<'_>, EscrowError> {
        self.entered
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| EscrowError::ReentrancyDetected)?;
        Ok(EntryGuard {
            flag: &self.entered,
        })
    }

    pub fn is_entered(&self) -> bool {
        self.entered.load(Ordering::SeqCst)
    }
}

/// An active protected scope.
#[must_use = "the guard is released as soon as this value is dropped"]
#[derive(Debug)]
pub struct EntryGuard<'a> {
    flag: &'a AtomicBool,
}

impl EntryGuard<'_> {
    /// Leave the protected scope explicitly.
    pub fn exit(self) {}
}

impl Drop for EntryGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}
