//! Escrow error taxonomy.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

use vouch_protocol::auth::AuthError;
use vouch_protocol::identity::Principal;
use vouch_protocol::ledger::TransferError;
use vouch_protocol::storage::DbError;

use crate::pause::PauseGate;

/// Coarse category of an [`EscrowError`], for logging and for callers that
/// only care whether to blame the input, the state, or the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    State,
    Validation,
    Resource,
    Authorization,
    Policy,
    Governance,
    Integrity,
    Host,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::State => "state",
            ErrorKind::Validation => "validation",
            ErrorKind::Resource => "resource",
            ErrorKind::Authorization => "authorization",
            ErrorKind::Policy => "policy",
            ErrorKind::Governance => "governance",
            ErrorKind::Integrity => "integrity",
            ErrorKind::Host => "host",
        };
        f.write_str(s)
    }
}

/// Everything an escrow operation can fail with.
///
/// Every failure aborts the whole operation; callers never have to clean
/// up after an `Err`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EscrowError {
    // -- State --------------------------------------------------------------
    /// A record already occupies this bounty slot, in any status.
    #[error("bounty {0} already exists")]
    BountyExists(u64),

    /// The record does not exist or is in a terminal state.
    #[error("funds for bounty {0} are not locked")]
    FundsNotLocked(u64),

    /// A claim is outstanding; refunds wait until it is executed or cancelled.
    #[error("bounty {0} has a pending claim")]
    ClaimPending(u64),

    #[error("bounty {0} has no pending claim")]
    NoPendingClaim(u64),

    // -- Validation ---------------------------------------------------------
    #[error("invalid amount")]
    InvalidAmount,

    #[error("batch is empty")]
    EmptyBatch,

    #[error("length mismatch: {recipients} recipients, {amounts} amounts")]
    LengthMismatch { recipients: usize, amounts: usize },

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("batch of {0} exceeds the maximum batch size")]
    InvalidBatchSize(usize),

    #[error("invalid approval configuration: {0}")]
    InvalidThreshold(String),

    #[error("fee rate {0} is out of range")]
    InvalidFeeRate(u32),

    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    // -- Resource -----------------------------------------------------------
    #[error("insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds { requested: u64, available: u64 },

    #[error("arithmetic overflow")]
    Overflow,

    // -- Authorization ------------------------------------------------------
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("reentrant call detected")]
    ReentrancyDetected,

    #[error("{0} is not an approval signer")]
    NotSigner(Principal),

    // -- Policy -------------------------------------------------------------
    #[error("refund deadline {deadline} has not passed (now {now})")]
    DeadlineNotPassed { now: u64, deadline: u64 },

    #[error("claim expired at {expired_at}")]
    ClaimExpired { expired_at: u64 },

    #[error("{0} operations are paused")]
    Paused(PauseGate),

    // -- Governance ---------------------------------------------------------
    #[error("escrow instance is not initialized")]
    NotInitialized,

    #[error("escrow instance is already initialized")]
    AlreadyInitialized,

    #[error("proposal {0} not found")]
    ProposalNotFound(u64),

    #[error("proposal {0} was already executed")]
    ProposalExecuted(u64),

    /// The proposal's subject is gone, e.g. a refund proposal whose bounty
    /// was settled.
    #[error("proposal {0} is closed")]
    ProposalClosed(u64),

    #[error("threshold not met: {approvals} of {threshold} approvals")]
    ThresholdNotMet { approvals: usize, threshold: u32 },

    #[error("invalid version: current {current}, target {target}")]
    InvalidVersion { current: u32, target: u32 },

    // -- Integrity ----------------------------------------------------------
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    // -- Host ---------------------------------------------------------------
    #[error("storage error: {0}")]
    Storage(String),

    #[error("transfer failed: {0}")]
    Transfer(#[from] TransferError),

    /// The operation failed and undoing its transfers failed too. Ledger
    /// balances may no longer match the escrow records.
    #[error("rollback failed: {failed} transfer(s) not reverted after: {cause}")]
    RollbackFailed { cause: String, failed: usize },
}

impl EscrowError {
    pub fn kind(&self) -> ErrorKind {
        use EscrowError::*;
        match self {
            BountyExists(_) | FundsNotLocked(_) | ClaimPending(_) | NoPendingClaim(_) => {
                ErrorKind::State
            }
            InvalidAmount
            | EmptyBatch
            | LengthMismatch { .. }
            | InvalidAddress(_)
            | InvalidBatchSize(_)
            | InvalidThreshold(_)
            | InvalidFeeRate(_)
            | InvalidMetadata(_) => ErrorKind::Validation,
            InsufficientFunds { .. } | Overflow => ErrorKind::Resource,
            Unauthorized(_) | ReentrancyDetected | NotSigner(_) => ErrorKind::Authorization,
            DeadlineNotPassed { .. } | ClaimExpired { .. } | Paused(_) => ErrorKind::Policy,
            NotInitialized
            | AlreadyInitialized
            | ProposalNotFound(_)
            | ProposalExecuted(_)
            | ProposalClosed(_)
            | ThresholdNotMet { .. }
            | InvalidVersion { .. } => ErrorKind::Governance,
            InvariantViolation(_) => ErrorKind::Integrity,
            Storage(_) | Transfer(_) | RollbackFailed { .. } => ErrorKind::Host,
        }
    }
}

impl From<AuthError> for EscrowError {
    fn from(e: AuthError) -> Self {
        EscrowError::Unauthorized(e.to_string())
    }
}

impl From<DbError> for EscrowError {
    fn from(e: DbError) -> Self {
        EscrowError::Storage(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(EscrowError::BountyExists(1).kind(), ErrorKind::State);
        assert_eq!(EscrowError::ClaimPending(1).kind(), ErrorKind::State);
        assert_eq!(EscrowError::EmptyBatch.kind(), ErrorKind::Validation);
        assert_eq!(
            EscrowError::InsufficientFunds { requested: 2, available: 1 }.kind(),
            ErrorKind::Resource
        );
        assert_eq!(EscrowError::ReentrancyDetected.kind(), ErrorKind::Authorization);
        assert_eq!(
            EscrowError::DeadlineNotPassed { now: 1, deadline: 2 }.kind(),
            ErrorKind::Policy
        );
        assert_eq!(EscrowError::Paused(PauseGate::Refund).kind(), ErrorKind::Policy);
        assert_eq!(EscrowError::InvalidFeeRate(10_001).kind(), ErrorKind::Validation);
        assert_eq!(
            EscrowError::InvariantViolation("x".into()).kind(),
            ErrorKind::Integrity
        );
    }

    #[test]
    fn host_errors_convert() {
        let e: EscrowError = TransferError::Rejected("nope".into()).into();
        assert_eq!(e.kind(), ErrorKind::Host);
        let e: EscrowError = AuthError::Missing(Principal::named("bob")).into();
        assert!(matches!(e, EscrowError::Unauthorized(_)));
    }
}
