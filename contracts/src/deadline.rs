//! Refund eligibility by deadline and approval.

use vouch_protocol::config::{ALWAYS_REFUNDABLE, NEVER_REFUNDABLE};

use crate::error::EscrowError;
use crate::escrow::AdminApproval;

/// Pure refund gate.
///
/// - `deadline == 0`: always allowed.
/// - `deadline == u64::MAX`: allowed only with an approval.
/// - otherwise: allowed once `now >= deadline`, or earlier with an approval.
pub fn refund_allowed(now: u64, deadline: u64, approval: Option<&AdminApproval>) -> bool {
    match deadline {
        ALWAYS_REFUNDABLE => true,
        NEVER_REFUNDABLE => approval.is_some(),
        _ => now >= deadline || approval.is_some(),
    }
}

/// [`refund_allowed`] as a `Result`.
pub fn check_refund_allowed(
    now: u64,
    deadline: u64,
    approval: Option<&AdminApproval>,
) -> Result<(), EscrowError> {
    if refund_allowed(now, deadline, approval) {
        Ok(())
    } else {
        Err(EscrowError::DeadlineNotPassed { now, deadline })
    }
}
