//! Canonical [`Invocation`]s for every authorized escrow call.
//!
//! The contract builds these to ask its [`AuthContext`] for approval, and a
//! client builds the very same values to sign. Keeping both sides on one
//! set of functions is what makes a signature bind to its arguments.
//!
//! [`AuthContext`]: vouch_protocol::auth::AuthContext

use vouch_protocol::auth::Invocation;
use vouch_protocol::config::EscrowConfig;
use vouch_protocol::identity::Principal;

use crate::approvals::CodeRef;
use crate::fees::FeeUpdate;
use crate::metadata::BountyMetadata;

pub fn init(config: &EscrowConfig) -> Invocation {
    let encoded = serde_json::to_vec(config).unwrap_or_default();
    Invocation::new(&config.escrow_account, "init").arg_bytes(&encoded)
}

pub fn lock_funds(
    instance: &Principal,
    depositor: &Principal,
    bounty_id: u64,
    amount: u64,
    deadline: Option<u64>,
    claimant: Option<&Principal>,
) -> Invocation {
    Invocation::new(instance, "lock_funds")
        .arg_principal(depositor)
        .arg_u64(bounty_id)
        .arg_u64(amount)
        .arg_opt_u64(deadline)
        .arg_opt_principal(claimant)
}

pub fn single_payout(
    instance: &Principal,
    caller: &Principal,
    bounty_id: u64,
    recipient: &Principal,
    amount: u64,
) -> Invocation {
    Invocation::new(instance, "single_payout")
        .arg_principal(caller)
        .arg_u64(bounty_id)
        .arg_principal(recipient)
        .arg_u64(amount)
}

pub fn batch_payout(
    instance: &Principal,
    caller: &Principal,
    bounty_id: u64,
    recipients: &[Principal],
    amounts: &[u64],
) -> Invocation {
    let mut inv = Invocation::new(instance, "batch_payout")
        .arg_principal(caller)
        .arg_u64(bounty_id)
        .arg_u64(recipients.len() as u64);
    for recipient in recipients {
        inv = inv.arg_principal(recipient);
    }
    inv = inv.arg_u64(amounts.len() as u64);
    for amount in amounts {
        inv = inv.arg_u64(*amount);
    }
    inv
}

pub fn approve_refund(
    instance: &Principal,
    approver: &Principal,
    bounty_id: u64,
    amount: Option<u64>,
) -> Invocation {
    Invocation::new(instance, "approve_refund")
        .arg_principal(approver)
        .arg_u64(bounty_id)
        .arg_opt_u64(amount)
}

pub fn authorize_claim(
    instance: &Principal,
    caller: &Principal,
    bounty_id: u64,
    recipient: &Principal,
) -> Invocation {
    Invocation::new(instance, "authorize_claim")
        .arg_principal(caller)
        .arg_u64(bounty_id)
        .arg_principal(recipient)
}

pub fn claim(instance: &Principal, caller: &Principal, bounty_id: u64) -> Invocation {
    Invocation::new(instance, "claim")
        .arg_principal(caller)
        .arg_u64(bounty_id)
}

pub fn cancel_pending_claim(instance: &Principal, caller: &Principal, bounty_id: u64) -> Invocation {
    Invocation::new(instance, "cancel_pending_claim")
        .arg_principal(caller)
        .arg_u64(bounty_id)
}

pub fn create_release_schedule(
    instance: &Principal,
    caller: &Principal,
    bounty_id: u64,
    recipient: &Principal,
    amount: u64,
    release_timestamp: u64,
) -> Invocation {
    Invocation::new(instance, "create_release_schedule")
        .arg_principal(caller)
        .arg_u64(bounty_id)
        .arg_principal(recipient)
        .arg_u64(amount)
        .arg_u64(release_timestamp)
}

pub fn trigger_scheduled_releases(
    instance: &Principal,
    caller: &Principal,
    bounty_id: u64,
) -> Invocation {
    Invocation::new(instance, "trigger_scheduled_releases")
        .arg_principal(caller)
        .arg_u64(bounty_id)
}

pub fn propose_upgrade(instance: &Principal, proposer: &Principal, code: &CodeRef) -> Invocation {
    Invocation::new(instance, "propose_upgrade")
        .arg_principal(proposer)
        .arg_u64(u64::from(code.version))
        .arg_bytes(code.code_hash.as_bytes())
}

pub fn approve_upgrade(instance: &Principal, signer: &Principal, proposal_id: u64) -> Invocation {
    Invocation::new(instance, "approve_upgrade")
        .arg_principal(signer)
        .arg_u64(proposal_id)
}

pub fn execute_upgrade(instance: &Principal, caller: &Principal, proposal_id: u64) -> Invocation {
    Invocation::new(instance, "execute_upgrade")
        .arg_principal(caller)
        .arg_u64(proposal_id)
}

pub fn migrate(
    instance: &Principal,
    caller: &Principal,
    target_version: u32,
    migration_hash: &str,
) -> Invocation {
    Invocation::new(instance, "migrate")
        .arg_principal(caller)
        .arg_u64(u64::from(target_version))
        .arg_bytes(migration_hash.as_bytes())
}

pub fn set_paused(
    instance: &Principal,
    caller: &Principal,
    lock: Option<bool>,
    release: Option<bool>,
    refund: Option<bool>,
) -> Invocation {
    Invocation::new(instance, "set_paused")
        .arg_principal(caller)
        .arg_opt_u64(lock.map(u64::from))
        .arg_opt_u64(release.map(u64::from))
        .arg_opt_u64(refund.map(u64::from))
}

pub fn update_fee_config(instance: &Principal, caller: &Principal, update: &FeeUpdate) -> Invocation {
    Invocation::new(instance, "update_fee_config")
        .arg_principal(caller)
        .arg_opt_u64(update.lock_fee_rate.map(u64::from))
        .arg_opt_u64(update.release_fee_rate.map(u64::from))
        .arg_opt_principal(update.fee_recipient.as_ref())
        .arg_opt_u64(update.fee_enabled.map(u64::from))
}

pub fn update_metadata(
    instance: &Principal,
    caller: &Principal,
    bounty_id: u64,
    metadata: &BountyMetadata,
) -> Invocation {
    Invocation::new(instance, "update_metadata")
        .arg_principal(caller)
        .arg_u64(bounty_id)
        .arg_u64(metadata.repo_id)
        .arg_u64(metadata.issue_id)
        .arg_bytes(metadata.bounty_type.as_bytes())
}
