//! # Authorization Registry
//!
//! Tracks who may move funds out of a record:
//!
//! - The **payout authority** is the record's authorized claimant if one is
//!   set, and the instance admin always. It can pay out, batch pay out,
//!   schedule releases and trigger them.
//! - A **pending claim** names one recipient and an amount. The recipient
//!   can execute it themselves until it expires; the admin can cancel it.
//!   While a claim is pending, refunds are blocked.
//!
//! Authorizing a new claim replaces any earlier one: the last authorization
//! wins.

use vouch_protocol::identity::Principal;

use crate::error::EscrowError;
use crate::escrow::{EscrowRecord, PendingClaim};

/// Fails with `Unauthorized` unless `caller` is the admin or the record's
/// authorized claimant.
pub fn require_payout_authority(
    record: &EscrowRecord,
    admin: &Principal,
    caller: &Principal,
) -> Result<(), EscrowError> {
    if caller == admin || record.authorized_claimant.as_ref() == Some(caller) {
        Ok(())
    } else {
        Err(EscrowError::Unauthorized(format!(
            "{caller} may not release funds from bounty {}",
            record.bounty_id
        )))
    }
}

/// Fails with `Unauthorized` unless `caller` is the admin.
pub fn require_admin(admin: &Principal, caller: &Principal) -> Result<(), EscrowError> {
    if caller == admin {
        Ok(())
    } else {
        Err(EscrowError::Unauthorized(format!("{caller} is not the admin")))
    }
}

/// Record a claim for everything still held, executable until
/// `now + window`. The recipient also becomes the authorized claimant.
pub fn authorize_claim(
    record: &mut EscrowRecord,
    recipient: &Principal,
    now: u64,
    window: u64,
) -> Result<PendingClaim, EscrowError> {
    record.ensure_active()?;
    let claim = PendingClaim {
        recipient: recipient.clone(),
        amount: record.remaining_amount,
        authorized_at: now,
        expires_at: now.saturating_add(window),
    };
    record.pending_claim = Some(claim.clone());
    record.authorized_claimant = Some(recipient.clone());
    record.updated_at = now;
    Ok(claim)
}

/// Remove the pending claim, returning it.
pub fn cancel_claim(record: &mut EscrowRecord, now: u64) -> Result<PendingClaim, EscrowError> {
    record.ensure_active()?;
    let claim = record
        .pending_claim
        .take()
        .ok_or(EscrowError::NoPendingClaim(record.bounty_id))?;
    record.updated_at = now;
    Ok(claim)
}

/// Take the pending claim for execution by `caller`.
///
/// # Errors
///
/// - `NoPendingClaim` if nothing was authorized.
/// - `Unauthorized` if `caller` is not the claim's recipient.
/// - `ClaimExpired` once `now` is past the claim's expiry.
pub fn take_claim(
    record: &mut EscrowRecord,
    caller: &Principal,
    now: u64,
) -> Result<PendingClaim, EscrowError> {
    record.ensure_active()?;
    let claim = record
        .pending_claim
        .as_ref()
        .ok_or(EscrowError::NoPendingClaim(record.bounty_id))?;
    if &claim.recipient != caller {
        return Err(EscrowError::Unauthorized(format!(
            "{caller} is not the claimant of bounty {}",
            record.bounty_id
        )));
    }
    if now > claim.expires_at {
        return Err(EscrowError::ClaimExpired {
            expired_at: claim.expires_at,
        });
    }
    record
        .pending_claim
        .take()
        .ok_or(EscrowError::NoPendingClaim(record.bounty_id))
}
