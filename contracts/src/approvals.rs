//! # Approval Registry
//!
//! Multisig proposals for actions no single principal should take alone:
//! refunds before the deadline and replacing the contract code.
//!
//! A [`Proposal`] collects signer approvals in a set, so approving twice is
//! a no-op. Once `approvals >= threshold` it can be executed exactly once.
//!
//! Version bookkeeping lives here too. [`UpgradeState`] remembers the
//! current and previous code so an upgrade can be rolled back by proposing
//! the previous version again, and [`MigrationState`] records the last data
//! migration so re-running it is harmless.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use vouch_protocol::crypto::sha256;
use vouch_protocol::identity::Principal;

use crate::error::EscrowError;
use crate::escrow::RefundScope;

// ---------------------------------------------------------------------------
// Proposals
// ---------------------------------------------------------------------------

/// A reference to contract code: the version it reports and the SHA-256 of
/// the artifact, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeRef {
    pub version: u32,
    pub code_hash: String,
}

impl CodeRef {
    /// Reference the artifact `code` as `version`.
    pub fn for_artifact(version: u32, code: &[u8]) -> Self {
        Self {
            version,
            code_hash: hex::encode(sha256(code)),
        }
    }

    /// Fails with `InvalidAddress` unless `code_hash` is 32 bytes of hex.
    pub fn validate(&self) -> Result<(), EscrowError> {
        match hex::decode(&self.code_hash) {
            Ok(bytes) if bytes.len() == 32 => Ok(()),
            _ => Err(EscrowError::InvalidAddress(format!(
                "code hash {}",
                self.code_hash
            ))),
        }
    }
}

/// What a proposal does once executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProposalAction {
    /// Record a refund approval on a bounty.
    Refund { bounty_id: u64, scope: RefundScope },
    /// Switch the instance to different code.
    Upgrade { code: CodeRef },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: u64,
    pub action: ProposalAction,
    pub proposer: Principal,
    #[serde(default)]
    pub approvals: BTreeSet<Principal>,
    #[serde(default)]
    pub executed: bool,
    pub created_at: u64,
    #[serde(default)]
    pub executed_at: Option<u64>,
    /// Set when the proposal can no longer execute, without having run.
    #[serde(default)]
    pub closed_at: Option<u64>,
}

impl Proposal {
    pub fn new(id: u64, action: ProposalAction, proposer: Principal, now: u64) -> Self {
        Self {
            id,
            action,
            proposer,
            approvals: BTreeSet::new(),
            executed: false,
            created_at: now,
            executed_at: None,
            closed_at: None,
        }
    }

    /// Add `signer`'s approval. Returns `false` if it was already there.
    pub fn approve(&mut self, signer: &Principal) -> Result<bool, EscrowError> {
        self.ensure_open()?;
        Ok(self.approvals.insert(signer.clone()))
    }

    pub fn is_open(&self) -> bool {
        !self.executed && self.closed_at.is_none()
    }

    fn ensure_open(&self) -> Result<(), EscrowError> {
        if self.executed {
            Err(EscrowError::ProposalExecuted(self.id))
        } else if self.closed_at.is_some() {
            Err(EscrowError::ProposalClosed(self.id))
        } else {
            Ok(())
        }
    }

    pub fn can_execute(&self, threshold: u32) -> bool {
        self.is_open() && self.approvals.len() >= threshold as usize
    }

    /// Retire an open proposal. Returns `false` if it was already executed
    /// or closed.
    pub fn close(&mut self, now: u64) -> bool {
        if !self.is_open() {
            return false;
        }
        self.closed_at = Some(now);
        true
    }

    /// Consume the proposal.
    ///
    /// # Errors
    ///
    /// `ProposalExecuted` on the second call, `ProposalClosed` once closed,
    /// `ThresholdNotMet` if there are too few approvals.
    pub fn mark_executed(&mut self, threshold: u32, now: u64) -> Result<(), EscrowError> {
        self.ensure_open()?;
        if !self.can_execute(threshold) {
            return Err(EscrowError::ThresholdNotMet {
                approvals: self.approvals.len(),
                threshold,
            });
        }
        self.executed = true;
        self.executed_at = Some(now);
        Ok(())
    }

    /// True for an open refund proposal on `bounty_id` with this scope.
    pub fn is_open_refund(&self, bounty_id: u64, scope: RefundScope) -> bool {
        self.is_open()
            && self.action
                == ProposalAction::Refund {
                    bounty_id,
                    scope,
                }
    }
}

/// Result of a refund approval: where the proposal stands, and whether the
/// threshold was met so the approval is now on the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalOutcome {
    pub proposal_id: u64,
    pub approvals: usize,
    pub threshold: u32,
    pub recorded: bool,
}

// ---------------------------------------------------------------------------
// Version Bookkeeping
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeState {
    pub current_version: u32,
    #[serde(default)]
    pub previous_version: Option<u32>,
    #[serde(default)]
    pub code_hash: Option<String>,
    #[serde(default)]
    pub previous_code_hash: Option<String>,
    #[serde(default)]
    pub upgraded_at: Option<u64>,
}

impl UpgradeState {
    pub fn initial(version: u32) -> Self {
        Self {
            current_version: version,
            previous_version: None,
            code_hash: None,
            previous_code_hash: None,
            upgraded_at: None,
        }
    }

    /// Switch to `code`. Any version other than the current one is
    /// accepted, so proposing the previous version is a rollback.
    pub fn apply(&mut self, code: &CodeRef, now: u64) -> Result<(), EscrowError> {
        if code.version == self.current_version {
            return Err(EscrowError::InvalidVersion {
                current: self.current_version,
                target: code.version,
            });
        }
        self.previous_version = Some(self.current_version);
        self.previous_code_hash = self.code_hash.take();
        self.current_version = code.version;
        self.code_hash = Some(code.code_hash.clone());
        self.upgraded_at = Some(now);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationState {
    pub from_version: u32,
    pub to_version: u32,
    pub migrated_at: u64,
    pub migration_hash: String,
}

/// What `migrate` should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationPlan {
    /// A migration to `target` or beyond already ran.
    AlreadyApplied(MigrationState),
    /// Run it and record this state.
    Apply(MigrationState),
}

/// Decide a migration to `target` from the current version.
pub fn plan_migration(
    upgrade: &UpgradeState,
    last: Option<&MigrationState>,
    target: u32,
    migration_hash: &str,
    now: u64,
) -> Result<MigrationPlan, EscrowError> {
    if let Some(done) = last {
        if done.to_version >= target {
            return Ok(MigrationPlan::AlreadyApplied(done.clone()));
        }
    }
    if target <= upgrade.current_version {
        return Err(EscrowError::InvalidVersion {
            current: upgrade.current_version,
            target,
        });
    }
    Ok(MigrationPlan::Apply(MigrationState {
        from_version: upgrade.current_version,
        to_version: target,
        migrated_at: now,
        migration_hash: migration_hash.to_string(),
    }))
}
