//! # Invariant Checker
//!
//! Post-conditions verified at the end of every mutating operation, before
//! anything is committed:
//!
//! 1. `remaining_amount <= total_amount`
//! 2. `Released | Refunded` implies `remaining_amount == 0`
//! 3. `PartiallyRefunded` implies `0 < remaining_amount < total_amount`
//! 4. `total_amount == remaining_amount + Σ payouts + Σ refunds`
//! 5. every payout's fee is below its amount, and the release fees in the
//!    fee history add up to the fees on the payouts
//!
//! A violation aborts the operation with `InvariantViolation`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::error::EscrowError;
use crate::escrow::{EscrowRecord, EscrowStatus};

#[derive(Debug)]
pub struct InvariantChecker {
    calls: AtomicU64,
    enforcing: AtomicBool,
}

impl Default for InvariantChecker {
    fn default() -> Self {
        Self {
            calls: AtomicU64::new(0),
            enforcing: AtomicBool::new(true),
        }
    }
}

impl InvariantChecker {
    pub fn new() -> Self {
        Self::default()
    }

    /// The first violated invariant, if any. Pure; does not count as a call.
    pub fn violation(record: &EscrowRecord) -> Option<String> {
        let id = record.bounty_id;
        if record.remaining_amount > record.total_amount {
            return Some(format!(
                "bounty {id}: remaining {} exceeds total {}",
                record.remaining_amount, record.total_amount
            ));
        }
        if record.status.is_terminal() && record.remaining_amount != 0 {
            return Some(format!(
                "bounty {id}: {} with {} remaining",
                record.status, record.remaining_amount
            ));
        }
        if record.status == EscrowStatus::PartiallyRefunded
            && !(record.remaining_amount > 0 && record.remaining_amount < record.total_amount)
        {
            return Some(format!(
                "bounty {id}: PartiallyRefunded with remaining {} of {}",
                record.remaining_amount, record.total_amount
            ));
        }
        let accounted = u128::from(record.remaining_amount)
            + record.total_paid_out()
            + record.total_refunded();
        if accounted != u128::from(record.total_amount) {
            return Some(format!(
                "bounty {id}: total {} but remaining + paid + refunded = {accounted}",
                record.total_amount
            ));
        }
        if let Some(p) = record.payout_history.iter().find(|p| p.fee >= p.amount) {
            return Some(format!(
                "bounty {id}: payout of {} carries fee {}",
                p.amount, p.fee
            ));
        }
        let payout_fees: u128 = record.payout_history.iter().map(|p| u128::from(p.fee)).sum();
        if payout_fees != record.total_release_fees() {
            return Some(format!(
                "bounty {id}: payouts carry {payout_fees} in fees but {} were recorded",
                record.total_release_fees()
            ));
        }
        None
    }

    /// `true` if all invariants hold.
    pub fn verify(record: &EscrowRecord) -> bool {
        Self::violation(record).is_none()
    }

    /// Count the call and fail on a violation, unless enforcement is off.
    pub fn check(&self, record: &EscrowRecord) -> Result<(), EscrowError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.enforcing.load(Ordering::SeqCst) {
            return Ok(());
        }
        match Self::violation(record) {
            Some(msg) => Err(EscrowError::InvariantViolation(msg)),
            None => Ok(()),
        }
    }

    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Turn enforcement off. Only exists in test builds, where it proves an
    /// invalid state would otherwise be reachable.
    #[cfg(test)]
    pub(crate) fn disable_for_tests(&self) {
        self.enforcing.store(false, Ordering::SeqCst);
    }
}
