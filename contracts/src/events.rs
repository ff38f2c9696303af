//! Events emitted by committed operations.
//!
//! Events are staged with the rest of an operation's writes and persisted
//! in the same batch, so a failed operation leaves no event behind.

use serde::{Deserialize, Serialize};

use vouch_protocol::identity::Principal;

use crate::escrow::{RefundMode, RefundScope};
use crate::fees::{FeeConfig, FeeKind};
use crate::metadata::BountyMetadata;
use crate::pause::PauseFlags;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum EscrowEvent {
    Initialized {
        admin: Principal,
        threshold: u32,
        version: u32,
    },
    FundsLocked {
        bounty_id: u64,
        depositor: Principal,
        amount: u64,
        deadline: u64,
    },
    FundsReleased {
        bounty_id: u64,
        recipient: Principal,
        amount: u64,
        remaining: u64,
    },
    BatchPayout {
        bounty_id: u64,
        recipients: usize,
        total: u64,
        remaining: u64,
    },
    FundsRefunded {
        bounty_id: u64,
        depositor: Principal,
        amount: u64,
        mode: RefundMode,
        remaining: u64,
    },
    RefundApproved {
        bounty_id: u64,
        approver: Principal,
        scope: RefundScope,
        proposal_id: u64,
    },
    ClaimAuthorized {
        bounty_id: u64,
        recipient: Principal,
        amount: u64,
        expires_at: u64,
    },
    ClaimExecuted {
        bounty_id: u64,
        recipient: Principal,
        amount: u64,
    },
    ClaimCancelled {
        bounty_id: u64,
        recipient: Principal,
    },
    ScheduleCreated {
        bounty_id: u64,
        schedule_id: u64,
        recipient: Principal,
        amount: u64,
        release_timestamp: u64,
    },
    ScheduleReleased {
        bounty_id: u64,
        schedule_id: u64,
        recipient: Principal,
        amount: u64,
    },
    ProposalCreated {
        proposal_id: u64,
        proposer: Principal,
    },
    ProposalApproved {
        proposal_id: u64,
        signer: Principal,
        approvals: usize,
    },
    /// A refund proposal retired because its bounty was settled.
    ProposalClosed {
        proposal_id: u64,
        bounty_id: u64,
    },
    UpgradeExecuted {
        proposal_id: u64,
        from_version: u32,
        to_version: u32,
    },
    Migrated {
        from_version: u32,
        to_version: u32,
        migration_hash: String,
    },
    PauseChanged {
        flags: PauseFlags,
    },
    FeeConfigUpdated {
        config: FeeConfig,
    },
    FeeCollected {
        bounty_id: u64,
        kind: FeeKind,
        recipient: Principal,
        amount: u64,
    },
    MetadataUpdated {
        bounty_id: u64,
        metadata: BountyMetadata,
    },
}

/// An event with its position in the instance's log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub seq: u64,
    pub timestamp: u64,
    pub event: EscrowEvent,
}

impl EscrowEvent {
    /// Short name for log lines.
    pub fn name(&self) -> &'static str {
        match self {
            EscrowEvent::Initialized { .. } => "initialized",
            EscrowEvent::FundsLocked { .. } => "funds_locked",
            EscrowEvent::FundsReleased { .. } => "funds_released",
            EscrowEvent::BatchPayout { .. } => "batch_payout",
            EscrowEvent::FundsRefunded { .. } => "funds_refunded",
            EscrowEvent::RefundApproved { .. } => "refund_approved",
            EscrowEvent::ClaimAuthorized { .. } => "claim_authorized",
            EscrowEvent::ClaimExecuted { .. } => "claim_executed",
            EscrowEvent::ClaimCancelled { .. } => "claim_cancelled",
            EscrowEvent::ScheduleCreated { .. } => "schedule_created",
            EscrowEvent::ScheduleReleased { .. } => "schedule_released",
            EscrowEvent::ProposalCreated { .. } => "proposal_created",
            EscrowEvent::ProposalApproved { .. } => "proposal_approved",
            EscrowEvent::ProposalClosed { .. } => "proposal_closed",
            EscrowEvent::UpgradeExecuted { .. } => "upgrade_executed",
            EscrowEvent::Migrated { .. } => "migrated",
            EscrowEvent::PauseChanged { .. } => "pause_changed",
            EscrowEvent::FeeConfigUpdated { .. } => "fee_config_updated",
            EscrowEvent::FeeCollected { .. } => "fee_collected",
            EscrowEvent::MetadataUpdated { .. } => "metadata_updated",
        }
    }
}
