//! # Payout Engine
//!
//! Validation and planning for money leaving the escrow toward recipients:
//! single payouts, batch payouts and time-based release schedules.
//!
//! Nothing in this module moves value. It produces a checked plan; the
//! contract applies the plan to the record, performs the transfers and
//! commits, or discards everything if any step fails.

use serde::{Deserialize, Serialize};

use vouch_protocol::config::MAX_BATCH_SIZE;
use vouch_protocol::identity::Principal;

use crate::error::EscrowError;

/// A validated batch: every amount positive, the sum fits in `u64` and in
/// what the escrow holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutPlan {
    pub entries: Vec<(Principal, u64)>,
    pub total: u64,
}

/// Reject recipients that are malformed or are the escrow itself.
pub fn validate_recipient(recipient: &Principal, escrow: &Principal) -> Result<(), EscrowError> {
    if !recipient.is_valid() || recipient == escrow {
        return Err(EscrowError::InvalidAddress(recipient.to_string()));
    }
    Ok(())
}

/// Validate a single payout against `remaining`.
pub fn plan_single(
    recipient: &Principal,
    amount: u64,
    remaining: u64,
    escrow: &Principal,
) -> Result<PayoutPlan, EscrowError> {
    validate_recipient(recipient, escrow)?;
    if amount == 0 {
        return Err(EscrowError::InvalidAmount);
    }
    if amount > remaining {
        return Err(EscrowError::InsufficientFunds {
            requested: amount,
            available: remaining,
        });
    }
    Ok(PayoutPlan {
        entries: vec![(recipient.clone(), amount)],
        total: amount,
    })
}

/// Validate a batch payout against `remaining`.
///
/// # Errors
///
/// Checked in this order: `EmptyBatch`, `LengthMismatch`,
/// `InvalidBatchSize`, then per entry `InvalidAddress` / `InvalidAmount`,
/// `Overflow` on the running sum, and finally `InsufficientFunds`.
pub fn plan_batch(
    recipients: &[Principal],
    amounts: &[u64],
    remaining: u64,
    escrow: &Principal,
) -> Result<PayoutPlan, EscrowError> {
    if recipients.is_empty() && amounts.is_empty() {
        return Err(EscrowError::EmptyBatch);
    }
    if recipients.len() != amounts.len() {
        return Err(EscrowError::LengthMismatch {
            recipients: recipients.len(),
            amounts: amounts.len(),
        });
    }
    if recipients.len() > MAX_BATCH_SIZE {
        return Err(EscrowError::InvalidBatchSize(recipients.len()));
    }

    let mut total: u64 = 0;
    for (recipient, amount) in recipients.iter().zip(amounts) {
        validate_recipient(recipient, escrow)?;
        if *amount == 0 {
            return Err(EscrowError::InvalidAmount);
        }
        total = total.checked_add(*amount).ok_or(EscrowError::Overflow)?;
    }
    if total > remaining {
        return Err(EscrowError::InsufficientFunds {
            requested: total,
            available: remaining,
        });
    }

    Ok(PayoutPlan {
        entries: recipients.iter().cloned().zip(amounts.iter().copied()).collect(),
        total,
    })
}

// ---------------------------------------------------------------------------
// Release Schedules
// ---------------------------------------------------------------------------

/// A payout that becomes executable at `release_timestamp`.
///
/// Schedules do not reserve funds. A due schedule that no longer fits in
/// the remainder fails the whole trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseSchedule {
    pub bounty_id: u64,
    /// Per-bounty id, starting at 1.
    pub schedule_id: u64,
    pub recipient: Principal,
    pub amount: u64,
    pub release_timestamp: u64,
    #[serde(default)]
    pub released: bool,
    #[serde(default)]
    pub released_at: Option<u64>,
}

impl ReleaseSchedule {
    pub fn is_due(&self, now: u64) -> bool {
        !self.released && now >= self.release_timestamp
    }
}

/// One executed schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseEntry {
    pub bounty_id: u64,
    pub schedule_id: u64,
    pub recipient: Principal,
    pub amount: u64,
    pub released_at: u64,
}

/// Validate a new schedule's recipient and amount.
pub fn validate_schedule(
    recipient: &Principal,
    amount: u64,
    escrow: &Principal,
) -> Result<(), EscrowError> {
    validate_recipient(recipient, escrow)?;
    if amount == 0 {
        return Err(EscrowError::InvalidAmount);
    }
    Ok(())
}
