//! # Escrow State Machine
//!
//! One [`EscrowRecord`] per bounty slot. The record is created by
//! `lock_funds`, mutated by payouts, refunds, claims and schedule triggers,
//! and never deleted.
//!
//! ```text
//!            payout (remaining → 0)
//!   Locked ─────────────────────────────► Released
//!     │  │                                   ▲
//!     │  └── refund (all) ──► Refunded       │ payout (remaining → 0)
//!     │                          ▲           │
//!     └── refund (part) ──► PartiallyRefunded┘
//!                             │  ▲
//!                             └──┘ refund (part)
//! ```
//!
//! `Released` and `Refunded` are terminal and distinct: every mutating call
//! against either fails with `FundsNotLocked`.

use serde::{Deserialize, Serialize};

use vouch_protocol::config::NEVER_REFUNDABLE;
use vouch_protocol::identity::Principal;

use crate::error::EscrowError;
use crate::fees::{FeeCharge, FeeEntry, FeeKind};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Lifecycle status of an escrow record. A slot with no record is
/// "non-existent" and is reported as `None` by queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EscrowStatus {
    /// Funds held, nothing refunded yet. Partial payouts keep this status.
    Locked,
    /// Everything paid out to recipients. Terminal.
    Released,
    /// Everything left went back to the depositor. Terminal.
    Refunded,
    /// Some funds went back to the depositor, some are still held.
    PartiallyRefunded,
}

impl EscrowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, EscrowStatus::Released | EscrowStatus::Refunded)
    }

    /// Statuses that accept payouts, refunds and claims.
    pub fn is_active(self) -> bool {
        matches!(self, EscrowStatus::Locked | EscrowStatus::PartiallyRefunded)
    }

    /// Whether `self → next` is an edge of the lifecycle graph.
    pub fn can_transition_to(self, next: EscrowStatus) -> bool {
        use EscrowStatus::*;
        matches!(
            (self, next),
            (Locked, Released)
                | (Locked, Refunded)
                | (Locked, PartiallyRefunded)
                | (PartiallyRefunded, Refunded)
                | (PartiallyRefunded, PartiallyRefunded)
                | (PartiallyRefunded, Released)
        )
    }
}

impl std::fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EscrowStatus::Locked => write!(f, "Locked"),
            EscrowStatus::Released => write!(f, "Released"),
            EscrowStatus::Refunded => write!(f, "Refunded"),
            EscrowStatus::PartiallyRefunded => write!(f, "PartiallyRefunded"),
        }
    }
}

/// How much of the remainder an approval lets the next refund return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RefundScope {
    /// Everything still held.
    Full,
    /// Exactly this amount.
    Partial(u64),
}

/// Whether a refund emptied the escrow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefundMode {
    Full,
    Partial,
}

/// An approval that lets a refund through before the deadline. Consumed by
/// the refund it enables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminApproval {
    /// The signer whose approval met the threshold.
    pub approver: Principal,
    pub scope: RefundScope,
    pub approved_at: u64,
    /// Proposal that produced this approval, if it came from the registry.
    #[serde(default)]
    pub proposal_id: Option<u64>,
}

/// An authorized, not yet executed claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingClaim {
    pub recipient: Principal,
    pub amount: u64,
    pub authorized_at: u64,
    /// Last second at which the claim can still be executed.
    pub expires_at: u64,
}

/// One payout. `amount` is what left the escrow; the recipient got
/// `amount - fee`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutEntry {
    pub recipient: Principal,
    pub amount: u64,
    pub timestamp: u64,
    #[serde(default)]
    pub fee: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundEntry {
    pub recipient: Principal,
    pub amount: u64,
    pub timestamp: u64,
    pub mode: RefundMode,
}

/// The escrow record for one bounty slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowRecord {
    pub bounty_id: u64,
    /// Who funded the escrow and receives refunds.
    pub depositor: Principal,
    pub total_amount: u64,
    pub remaining_amount: u64,
    pub status: EscrowStatus,
    /// Unix seconds. `0` = always refundable, `u64::MAX` = approval only.
    pub deadline: u64,
    /// Principal allowed to pay out besides the admin.
    #[serde(default)]
    pub authorized_claimant: Option<Principal>,
    #[serde(default)]
    pub pending_claim: Option<PendingClaim>,
    #[serde(default)]
    pub admin_approval: Option<AdminApproval>,
    #[serde(default)]
    pub refund_history: Vec<RefundEntry>,
    #[serde(default)]
    pub payout_history: Vec<PayoutEntry>,
    /// Fees taken on the deposit and on payouts.
    #[serde(default)]
    pub fee_history: Vec<FeeEntry>,
    pub created_at: u64,
    #[serde(default)]
    pub updated_at: u64,
}

impl EscrowRecord {
    /// A freshly locked record. An omitted deadline means "never without
    /// approval".
    pub fn new(
        bounty_id: u64,
        depositor: Principal,
        amount: u64,
        deadline: Option<u64>,
        authorized_claimant: Option<Principal>,
        now: u64,
    ) -> Self {
        Self {
            bounty_id,
            depositor,
            total_amount: amount,
            remaining_amount: amount,
            status: EscrowStatus::Locked,
            deadline: deadline.unwrap_or(NEVER_REFUNDABLE),
            authorized_claimant,
            pending_claim: None,
            admin_approval: None,
            refund_history: Vec::new(),
            payout_history: Vec::new(),
            fee_history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_pending_claim(&self) -> bool {
        self.pending_claim.is_some()
    }

    /// Fails with `FundsNotLocked` unless the record accepts mutations.
    pub fn ensure_active(&self) -> Result<(), EscrowError> {
        if self.status.is_active() {
            Ok(())
        } else {
            Err(EscrowError::FundsNotLocked(self.bounty_id))
        }
    }

    /// Move to `next`, or fail without touching the record.
    pub fn transition(&mut self, next: EscrowStatus) -> Result<(), EscrowError> {
        if !self.status.can_transition_to(next) {
            return Err(EscrowError::FundsNotLocked(self.bounty_id));
        }
        self.status = next;
        Ok(())
    }

    /// Pay `amount` to `recipient` out of the remainder.
    ///
    /// # Errors
    ///
    /// - `FundsNotLocked` if the record is terminal.
    /// - `InvalidAmount` for a zero amount.
    /// - `InsufficientFunds` if `amount` exceeds what is held.
    pub fn apply_payout(
        &mut self,
        recipient: &Principal,
        amount: u64,
        now: u64,
    ) -> Result<(), EscrowError> {
        self.apply_payout_with_fee(recipient, amount, None, now)
    }

    /// [`apply_payout`](Self::apply_payout), with `fee` taken out of
    /// `amount` on its way to the recipient.
    pub fn apply_payout_with_fee(
        &mut self,
        recipient: &Principal,
        amount: u64,
        fee: Option<&FeeCharge>,
        now: u64,
    ) -> Result<(), EscrowError> {
        self.ensure_active()?;
        let fee_amount = fee.map_or(0, |f| f.amount);
        if amount == 0 || fee_amount >= amount {
            return Err(EscrowError::InvalidAmount);
        }
        self.remaining_amount = self.remaining_amount.checked_sub(amount).ok_or(
            EscrowError::InsufficientFunds {
                requested: amount,
                available: self.remaining_amount,
            },
        )?;
        self.payout_history.push(PayoutEntry {
            recipient: recipient.clone(),
            amount,
            timestamp: now,
            fee: fee_amount,
        });
        if let Some(fee) = fee {
            self.record_fee(fee, now);
        }
        if self.remaining_amount == 0 {
            self.transition(EscrowStatus::Released)?;
            self.pending_claim = None;
            self.admin_approval = None;
        } else if let Some(claim) = self.pending_claim.as_mut() {
            // A claim never promises more than is still held.
            claim.amount = claim.amount.min(self.remaining_amount);
        }
        self.updated_at = now;
        Ok(())
    }

    /// Return `amount` to the depositor.
    ///
    /// Ends in `Refunded` when nothing is left, `PartiallyRefunded`
    /// otherwise. Consumes any recorded approval.
    pub fn apply_refund(&mut self, amount: u64, now: u64) -> Result<RefundMode, EscrowError> {
        self.ensure_active()?;
        if amount == 0 {
            return Err(EscrowError::InvalidAmount);
        }
        self.remaining_amount = self.remaining_amount.checked_sub(amount).ok_or(
            EscrowError::InsufficientFunds {
                requested: amount,
                available: self.remaining_amount,
            },
        )?;
        let mode = if self.remaining_amount == 0 {
            self.transition(EscrowStatus::Refunded)?;
            RefundMode::Full
        } else {
            self.transition(EscrowStatus::PartiallyRefunded)?;
            RefundMode::Partial
        };
        self.refund_history.push(RefundEntry {
            recipient: self.depositor.clone(),
            amount,
            timestamp: now,
            mode,
        });
        self.admin_approval = None;
        self.updated_at = now;
        Ok(mode)
    }

    /// Add `fee` to the fee history.
    pub fn record_fee(&mut self, fee: &FeeCharge, now: u64) {
        self.fee_history.push(FeeEntry {
            kind: fee.kind,
            recipient: fee.recipient.clone(),
            amount: fee.amount,
            timestamp: now,
        });
    }

    /// Sum of release fees in the fee history.
    pub fn total_release_fees(&self) -> u128 {
        self.fee_history
            .iter()
            .filter(|f| f.kind == FeeKind::Release)
            .map(|f| u128::from(f.amount))
            .sum()
    }

    /// Sum of all fees taken, lock fee included.
    pub fn total_fees(&self) -> u128 {
        self.fee_history.iter().map(|f| u128::from(f.amount)).sum()
    }

    /// Sum of all payouts, widened so a corrupted history cannot overflow.
    pub fn total_paid_out(&self) -> u128 {
        self.payout_history.iter().map(|p| u128::from(p.amount)).sum()
    }

    /// Sum of all refunds.
    pub fn total_refunded(&self) -> u128 {
        self.refund_history.iter().map(|r| u128::from(r.amount)).sum()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
