//! # Escrow Contract
//!
//! [`EscrowContract`] is the operation surface: it wires the state machine,
//! payout engine, authorization and approval registries, deadline policy,
//! invariant checker and reentrancy guard onto the host collaborators.
//!
//! Every mutating call runs through [`EscrowContract::execute`]:
//!
//! 1. take the instance execution lock (serializes threads, lets a
//!    same-thread callback through so the guard can reject it),
//! 2. enter the [`ReentrancyGuard`],
//! 3. run the body against a fresh [`Txn`],
//! 4. check invariants on every record the body touched,
//! 5. commit the write set as one batch.
//!
//! Any error on the way drops the `Txn`, which reverts transfers already
//! made and discards staged writes and events. The guard scope ends with
//! the call either way.

use parking_lot::ReentrantMutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

use vouch_protocol::auth::AuthContext;
use vouch_protocol::clock::Clock;
use vouch_protocol::config::{ConfigError, EscrowConfig, CONTRACT_VERSION};
use vouch_protocol::identity::Principal;
use vouch_protocol::ledger::ValueTransfer;
use vouch_protocol::storage::StateStore;

use crate::approvals::{
    plan_migration, ApprovalOutcome, CodeRef, MigrationPlan, MigrationState, Proposal,
    ProposalAction, UpgradeState,
};
use crate::authorization::{self, require_admin, require_payout_authority};
use crate::calls;
use crate::deadline::check_refund_allowed;
use crate::error::EscrowError;
use crate::escrow::{AdminApproval, EscrowRecord, PendingClaim, RefundScope};
use crate::events::EscrowEvent;
use crate::fees::{FeeCharge, FeeConfig, FeeUpdate};
use crate::invariants::InvariantChecker;
use crate::metadata::BountyMetadata;
use crate::pause::{PauseFlags, PauseGate};
use crate::payout::{
    plan_batch, plan_single, validate_recipient, validate_schedule, ReleaseEntry, ReleaseSchedule,
};
use crate::reentrancy::ReentrancyGuard;
use crate::state::{keys, Txn};

/// One escrow instance bound to its host collaborators.
pub struct EscrowContract {
    pub(crate) store: Arc<dyn StateStore>,
    ledger: Arc<dyn ValueTransfer>,
    clock: Arc<dyn Clock>,
    exec: ReentrantMutex<()>,
    guard: ReentrancyGuard,
    invariants: InvariantChecker,
    #[cfg(test)]
    faults: faults::Faults,
}

impl EscrowContract {
    pub fn new(
        store: Arc<dyn StateStore>,
        ledger: Arc<dyn ValueTransfer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            ledger,
            clock,
            exec: ReentrantMutex::new(()),
            guard: ReentrancyGuard::new(),
            invariants: InvariantChecker::new(),
            #[cfg(test)]
            faults: faults::Faults::default(),
        }
    }

    /// Current time as the contract sees it.
    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    pub(crate) fn guard(&self) -> &ReentrancyGuard {
        &self.guard
    }

    pub(crate) fn invariants(&self) -> &InvariantChecker {
        &self.invariants
    }

    // -----------------------------------------------------------------------
    // Transaction boundary
    // -----------------------------------------------------------------------

    fn execute<T, F>(&self, operation: &'static str, body: F) -> Result<T, EscrowError>
    where
        F: FnOnce(&mut Txn<'_>) -> Result<T, EscrowError>,
    {
        let _serial = self.exec.lock();
        match self.run(operation, body) {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!(operation, kind = %e.kind(), error = %e, "escrow operation rejected");
                Err(e)
            }
        }
    }

    fn run<T, F>(&self, operation: &'static str, body: F) -> Result<T, EscrowError>
    where
        F: FnOnce(&mut Txn<'_>) -> Result<T, EscrowError>,
    {
        let _entry = self.guard.enter()?;
        let mut txn = Txn::new(self.store.as_ref(), self.ledger.as_ref(), self.clock.now());
        let value = match self.stage(&mut txn, body) {
            Ok(value) => value,
            Err(e) => return Err(txn.rollback(e)),
        };

        let events = txn.commit()?;
        if events.is_empty() {
            debug!(operation, "escrow operation committed without events");
        }
        for logged in &events {
            info!(
                operation,
                seq = logged.seq,
                event = logged.event.name(),
                "escrow event"
            );
        }
        Ok(value)
    }

    /// Run the body, settle what it finished, and check invariants on
    /// every record it touched.
    fn stage<T, F>(&self, txn: &mut Txn<'_>, body: F) -> Result<T, EscrowError>
    where
        F: FnOnce(&mut Txn<'_>) -> Result<T, EscrowError>,
    {
        let value = body(txn)?;
        close_settled_refund_proposals(txn)?;
        for record in txn.staged_records() {
            self.invariants.check(record)?;
        }
        Ok(value)
    }

    // -----------------------------------------------------------------------
    // Setup
    // -----------------------------------------------------------------------

    /// Configure the instance. Runs once; the admin must authorize it.
    pub fn init(&self, auth: &dyn AuthContext, config: EscrowConfig) -> Result<(), EscrowError> {
        config.validate().map_err(config_error)?;
        self.execute("init", |txn| {
            if txn.get::<EscrowConfig>(keys::CONFIG)?.is_some() {
                return Err(EscrowError::AlreadyInitialized);
            }
            auth.require_auth(&config.admin, &calls::init(&config))?;

            txn.put(keys::CONFIG, &config)?;
            txn.put(keys::UPGRADE, &UpgradeState::initial(CONTRACT_VERSION))?;
            txn.emit(EscrowEvent::Initialized {
                admin: config.admin.clone(),
                threshold: config.threshold,
                version: CONTRACT_VERSION,
            });
            Ok(())
        })
    }

    // -----------------------------------------------------------------------
    // Funding
    // -----------------------------------------------------------------------

    /// Pull `amount` from `depositor` into a new record for `bounty_id`.
    ///
    /// An omitted `deadline` means the funds can only come back with an
    /// approval.
    pub fn lock_funds(
        &self,
        auth: &dyn AuthContext,
        depositor: &Principal,
        bounty_id: u64,
        amount: u64,
        deadline: Option<u64>,
        claimant: Option<Principal>,
    ) -> Result<EscrowRecord, EscrowError> {
        self.execute("lock_funds", |txn| {
            let config = txn.config()?;
            let escrow = &config.escrow_account;
            auth.require_auth(
                depositor,
                &calls::lock_funds(escrow, depositor, bounty_id, amount, deadline, claimant.as_ref()),
            )?;
            txn.ensure_unpaused(PauseGate::Lock)?;

            validate_recipient(depositor, escrow)?;
            if let Some(claimant) = &claimant {
                validate_recipient(claimant, escrow)?;
            }
            if amount == 0 {
                return Err(EscrowError::InvalidAmount);
            }
            if txn.record(bounty_id)?.is_some() {
                return Err(EscrowError::BountyExists(bounty_id));
            }

            let fee = txn.fee_config(&config.admin)?.lock_charge(amount);
            let held = amount
                .checked_sub(fee.as_ref().map_or(0, |f| f.amount))
                .filter(|held| *held > 0)
                .ok_or(EscrowError::InvalidAmount)?;

            let mut record = EscrowRecord::new(
                bounty_id,
                depositor.clone(),
                held,
                deadline,
                claimant,
                txn.now(),
            );
            txn.transfer(depositor, escrow, held)?;
            if let Some(fee) = fee {
                record.record_fee(&fee, txn.now());
                txn.transfer(depositor, &fee.recipient, fee.amount)?;
                emit_fee(txn, bounty_id, fee);
            }
            txn.emit(EscrowEvent::FundsLocked {
                bounty_id,
                depositor: depositor.clone(),
                amount: held,
                deadline: record.deadline,
            });
            txn.stage_record(record.clone());
            Ok(record)
        })
    }

    // -----------------------------------------------------------------------
    // Payouts
    // -----------------------------------------------------------------------

    pub fn single_payout(
        &self,
        auth: &dyn AuthContext,
        caller: &Principal,
        bounty_id: u64,
        recipient: &Principal,
        amount: u64,
    ) -> Result<EscrowRecord, EscrowError> {
        self.execute("single_payout", |txn| {
            let config = txn.config()?;
            let escrow = &config.escrow_account;
            auth.require_auth(
                caller,
                &calls::single_payout(escrow, caller, bounty_id, recipient, amount),
            )?;
            txn.ensure_unpaused(PauseGate::Release)?;

            let mut record = txn.existing_record(bounty_id)?;
            record.ensure_active()?;
            require_payout_authority(&record, &config.admin, caller)?;
            plan_single(recipient, amount, record.remaining_amount, escrow)?;

            let fee = txn.fee_config(&config.admin)?.release_charge(amount);
            record.apply_payout_with_fee(recipient, amount, fee.as_ref(), txn.now())?;
            self.inject_faults(&mut record);
            send_payout(txn, bounty_id, escrow, recipient, amount, fee)?;

            txn.emit(EscrowEvent::FundsReleased {
                bounty_id,
                recipient: recipient.clone(),
                amount,
                remaining: record.remaining_amount,
            });
            txn.stage_record(record.clone());
            Ok(record)
        })
    }

    /// Pay several recipients in one all-or-nothing step.
    pub fn batch_payout(
        &self,
        auth: &dyn AuthContext,
        caller: &Principal,
        bounty_id: u64,
        recipients: &[Principal],
        amounts: &[u64],
    ) -> Result<EscrowRecord, EscrowError> {
        self.execute("batch_payout", |txn| {
            let config = txn.config()?;
            let escrow = &config.escrow_account;
            auth.require_auth(
                caller,
                &calls::batch_payout(escrow, caller, bounty_id, recipients, amounts),
            )?;
            txn.ensure_unpaused(PauseGate::Release)?;

            let mut record = txn.existing_record(bounty_id)?;
            record.ensure_active()?;
            require_payout_authority(&record, &config.admin, caller)?;
            let plan = plan_batch(recipients, amounts, record.remaining_amount, escrow)?;

            let now = txn.now();
            let fees = txn.fee_config(&config.admin)?;
            let charges: Vec<Option<FeeCharge>> = plan
                .entries
                .iter()
                .map(|(_, amount)| fees.release_charge(*amount))
                .collect();
            for ((recipient, amount), fee) in plan.entries.iter().zip(&charges) {
                record.apply_payout_with_fee(recipient, *amount, fee.as_ref(), now)?;
            }
            for ((recipient, amount), fee) in plan.entries.iter().zip(charges) {
                send_payout(txn, bounty_id, escrow, recipient, *amount, fee)?;
            }

            txn.emit(EscrowEvent::BatchPayout {
                bounty_id,
                recipients: plan.entries.len(),
                total: plan.total,
                remaining: record.remaining_amount,
            });
            txn.stage_record(record.clone());
            Ok(record)
        })
    }

    // -----------------------------------------------------------------------
    // Refunds
    // -----------------------------------------------------------------------

    /// Return funds to the depositor.
    ///
    /// Anyone may trigger it; the money only ever goes to the depositor. A
    /// recorded approval decides the amount (its scope) and lets the refund
    /// through before the deadline. Without one, everything still held is
    /// refunded once the deadline policy allows.
    pub fn refund(&self, bounty_id: u64) -> Result<EscrowRecord, EscrowError> {
        self.execute("refund", |txn| {
            let config = txn.config()?;
            txn.ensure_unpaused(PauseGate::Refund)?;
            let mut record = txn.existing_record(bounty_id)?;
            record.ensure_active()?;
            if record.has_pending_claim() {
                return Err(EscrowError::ClaimPending(bounty_id));
            }
            check_refund_allowed(txn.now(), record.deadline, record.admin_approval.as_ref())?;

            let amount = match record.admin_approval.as_ref().map(|a| a.scope) {
                Some(RefundScope::Partial(amount)) => amount.min(record.remaining_amount),
                _ => record.remaining_amount,
            };
            let mode = record.apply_refund(amount, txn.now())?;
            let depositor = record.depositor.clone();
            txn.transfer(&config.escrow_account, &depositor, amount)?;

            txn.emit(EscrowEvent::FundsRefunded {
                bounty_id,
                depositor,
                amount,
                mode,
                remaining: record.remaining_amount,
            });
            txn.stage_record(record.clone());
            Ok(record)
        })
    }

    /// Add `approver`'s vote for a refund of `amount` (everything if
    /// `None`). Once the threshold is met the approval is recorded on the
    /// escrow; the next [`refund`](Self::refund) uses it. Never moves funds.
    pub fn approve_refund(
        &self,
        auth: &dyn AuthContext,
        approver: &Principal,
        bounty_id: u64,
        amount: Option<u64>,
    ) -> Result<ApprovalOutcome, EscrowError> {
        self.execute("approve_refund", |txn| {
            let config = txn.config()?;
            auth.require_auth(
                approver,
                &calls::approve_refund(&config.escrow_account, approver, bounty_id, amount),
            )?;
            if !config.is_signer(approver) {
                return Err(EscrowError::NotSigner(approver.clone()));
            }

            let mut record = txn.existing_record(bounty_id)?;
            record.ensure_active()?;
            let scope = match amount {
                None => RefundScope::Full,
                Some(a) if a == 0 || a > record.remaining_amount => {
                    return Err(EscrowError::InvalidAmount)
                }
                Some(a) => RefundScope::Partial(a),
            };

            let mut open = None;
            for id in txn.scan::<u64>(&keys::refund_proposal_prefix(bounty_id))? {
                if let Some(p) = txn.get::<Proposal>(&keys::proposal(id))? {
                    if p.is_open_refund(bounty_id, scope) {
                        open = Some(p);
                        break;
                    }
                }
            }
            let mut proposal = match open {
                Some(p) => p,
                None => {
                    let id = txn.next_id(keys::NEXT_PROPOSAL)?;
                    txn.put(&keys::refund_proposal(bounty_id, id), &id)?;
                    txn.emit(EscrowEvent::ProposalCreated {
                        proposal_id: id,
                        proposer: approver.clone(),
                    });
                    Proposal::new(
                        id,
                        ProposalAction::Refund { bounty_id, scope },
                        approver.clone(),
                        txn.now(),
                    )
                }
            };

            if proposal.approve(approver)? {
                txn.emit(EscrowEvent::ProposalApproved {
                    proposal_id: proposal.id,
                    signer: approver.clone(),
                    approvals: proposal.approvals.len(),
                });
            }

            let mut recorded = false;
            if proposal.can_execute(config.threshold) {
                proposal.mark_executed(config.threshold, txn.now())?;
                txn.remove(&keys::refund_proposal(bounty_id, proposal.id));
                record.admin_approval = Some(AdminApproval {
                    approver: approver.clone(),
                    scope,
                    approved_at: txn.now(),
                    proposal_id: Some(proposal.id),
                });
                record.updated_at = txn.now();
                txn.emit(EscrowEvent::RefundApproved {
                    bounty_id,
                    approver: approver.clone(),
                    scope,
                    proposal_id: proposal.id,
                });
                txn.stage_record(record);
                recorded = true;
            }

            txn.put(&keys::proposal(proposal.id), &proposal)?;
            Ok(ApprovalOutcome {
                proposal_id: proposal.id,
                approvals: proposal.approvals.len(),
                threshold: config.threshold,
                recorded,
            })
        })
    }

    // -----------------------------------------------------------------------
    // Claims
    // -----------------------------------------------------------------------

    /// Admin: let `recipient` claim everything still held, within the
    /// configured claim window. Replaces any earlier claim.
    pub fn authorize_claim(
        &self,
        auth: &dyn AuthContext,
        caller: &Principal,
        bounty_id: u64,
        recipient: &Principal,
    ) -> Result<PendingClaim, EscrowError> {
        self.execute("authorize_claim", |txn| {
            let config = txn.config()?;
            auth.require_auth(
                caller,
                &calls::authorize_claim(&config.escrow_account, caller, bounty_id, recipient),
            )?;
            require_admin(&config.admin, caller)?;
            validate_recipient(recipient, &config.escrow_account)?;

            let mut record = txn.existing_record(bounty_id)?;
            let claim = authorization::authorize_claim(
                &mut record,
                recipient,
                txn.now(),
                config.claim_window_secs,
            )?;
            txn.emit(EscrowEvent::ClaimAuthorized {
                bounty_id,
                recipient: recipient.clone(),
                amount: claim.amount,
                expires_at: claim.expires_at,
            });
            txn.stage_record(record);
            Ok(claim)
        })
    }

    /// Recipient: execute the pending claim.
    pub fn claim(
        &self,
        auth: &dyn AuthContext,
        caller: &Principal,
        bounty_id: u64,
    ) -> Result<EscrowRecord, EscrowError> {
        self.execute("claim", |txn| {
            let config = txn.config()?;
            auth.require_auth(caller, &calls::claim(&config.escrow_account, caller, bounty_id))?;
            txn.ensure_unpaused(PauseGate::Release)?;

            let mut record = txn.existing_record(bounty_id)?;
            let claim = authorization::take_claim(&mut record, caller, txn.now())?;
            // Payouts since authorization may have shrunk the remainder.
            let amount = claim.amount.min(record.remaining_amount);
            let fee = txn.fee_config(&config.admin)?.release_charge(amount);
            record.apply_payout_with_fee(&claim.recipient, amount, fee.as_ref(), txn.now())?;
            send_payout(txn, bounty_id, &config.escrow_account, &claim.recipient, amount, fee)?;

            txn.emit(EscrowEvent::ClaimExecuted {
                bounty_id,
                recipient: claim.recipient.clone(),
                amount,
            });
            txn.emit(EscrowEvent::FundsReleased {
                bounty_id,
                recipient: claim.recipient,
                amount,
                remaining: record.remaining_amount,
            });
            txn.stage_record(record.clone());
            Ok(record)
        })
    }

    /// Admin: drop the pending claim, unblocking refunds.
    pub fn cancel_pending_claim(
        &self,
        auth: &dyn AuthContext,
        caller: &Principal,
        bounty_id: u64,
    ) -> Result<PendingClaim, EscrowError> {
        self.execute("cancel_pending_claim", |txn| {
            let config = txn.config()?;
            auth.require_auth(
                caller,
                &calls::cancel_pending_claim(&config.escrow_account, caller, bounty_id),
            )?;
            require_admin(&config.admin, caller)?;

            let mut record = txn.existing_record(bounty_id)?;
            let claim = authorization::cancel_claim(&mut record, txn.now())?;
            txn.emit(EscrowEvent::ClaimCancelled {
                bounty_id,
                recipient: claim.recipient.clone(),
            });
            txn.stage_record(record);
            Ok(claim)
        })
    }

    // -----------------------------------------------------------------------
    // Release schedules
    // -----------------------------------------------------------------------

    pub fn create_release_schedule(
        &self,
        auth: &dyn AuthContext,
        caller: &Principal,
        bounty_id: u64,
        recipient: &Principal,
        amount: u64,
        release_timestamp: u64,
    ) -> Result<ReleaseSchedule, EscrowError> {
        self.execute("create_release_schedule", |txn| {
            let config = txn.config()?;
            let escrow = &config.escrow_account;
            auth.require_auth(
                caller,
                &calls::create_release_schedule(
                    escrow,
                    caller,
                    bounty_id,
                    recipient,
                    amount,
                    release_timestamp,
                ),
            )?;

            let record = txn.existing_record(bounty_id)?;
            record.ensure_active()?;
            require_payout_authority(&record, &config.admin, caller)?;
            validate_schedule(recipient, amount, escrow)?;
            if amount > record.remaining_amount {
                return Err(EscrowError::InsufficientFunds {
                    requested: amount,
                    available: record.remaining_amount,
                });
            }

            let schedule = ReleaseSchedule {
                bounty_id,
                schedule_id: txn.next_id(&keys::schedule_seq(bounty_id))?,
                recipient: recipient.clone(),
                amount,
                release_timestamp,
                released: false,
                released_at: None,
            };
            txn.put(&keys::schedule(bounty_id, schedule.schedule_id), &schedule)?;
            txn.emit(EscrowEvent::ScheduleCreated {
                bounty_id,
                schedule_id: schedule.schedule_id,
                recipient: recipient.clone(),
                amount,
                release_timestamp,
            });
            Ok(schedule)
        })
    }

    /// Execute every schedule of `bounty_id` that is due. All of them go
    /// out, or none do.
    pub fn trigger_scheduled_releases(
        &self,
        auth: &dyn AuthContext,
        caller: &Principal,
        bounty_id: u64,
    ) -> Result<Vec<ReleaseEntry>, EscrowError> {
        self.execute("trigger_scheduled_releases", |txn| {
            let config = txn.config()?;
            let escrow = &config.escrow_account;
            auth.require_auth(
                caller,
                &calls::trigger_scheduled_releases(escrow, caller, bounty_id),
            )?;
            txn.ensure_unpaused(PauseGate::Release)?;

            let mut record = txn.existing_record(bounty_id)?;
            record.ensure_active()?;
            require_payout_authority(&record, &config.admin, caller)?;

            let now = txn.now();
            let fees = txn.fee_config(&config.admin)?;
            let due: Vec<ReleaseSchedule> = txn
                .scan::<ReleaseSchedule>(&keys::schedule_prefix(bounty_id))?
                .into_iter()
                .filter(|s| s.is_due(now))
                .collect();

            let mut released = Vec::with_capacity(due.len());
            for mut schedule in due {
                if schedule.amount > record.remaining_amount {
                    return Err(EscrowError::InsufficientFunds {
                        requested: schedule.amount,
                        available: record.remaining_amount,
                    });
                }
                let fee = fees.release_charge(schedule.amount);
                record.apply_payout_with_fee(&schedule.recipient, schedule.amount, fee.as_ref(), now)?;
                send_payout(txn, bounty_id, escrow, &schedule.recipient, schedule.amount, fee)?;

                schedule.released = true;
                schedule.released_at = Some(now);
                txn.put(&keys::schedule(bounty_id, schedule.schedule_id), &schedule)?;

                let entry = ReleaseEntry {
                    bounty_id,
                    schedule_id: schedule.schedule_id,
                    recipient: schedule.recipient.clone(),
                    amount: schedule.amount,
                    released_at: now,
                };
                txn.put(&keys::release(bounty_id, schedule.schedule_id), &entry)?;
                txn.emit(EscrowEvent::ScheduleReleased {
                    bounty_id,
                    schedule_id: schedule.schedule_id,
                    recipient: schedule.recipient,
                    amount: schedule.amount,
                });
                released.push(entry);
            }

            if !released.is_empty() {
                txn.stage_record(record);
            }
            Ok(released)
        })
    }

    // -----------------------------------------------------------------------
    // Operator controls
    // -----------------------------------------------------------------------

    /// Admin: open or close the lock, release and refund gates. `None`
    /// leaves a gate as it is.
    pub fn set_paused(
        &self,
        auth: &dyn AuthContext,
        caller: &Principal,
        lock: Option<bool>,
        release: Option<bool>,
        refund: Option<bool>,
    ) -> Result<PauseFlags, EscrowError> {
        self.execute("set_paused", |txn| {
            let config = txn.config()?;
            auth.require_auth(
                caller,
                &calls::set_paused(&config.escrow_account, caller, lock, release, refund),
            )?;
            require_admin(&config.admin, caller)?;

            let mut flags = txn.pause_flags()?;
            flags.set(lock, release, refund);
            txn.put(keys::PAUSE, &flags)?;
            txn.emit(EscrowEvent::PauseChanged { flags });
            Ok(flags)
        })
    }

    /// Admin: change fee rates, the fee recipient, or switch fees on or
    /// off. Applies to deposits and payouts from the next call on.
    pub fn update_fee_config(
        &self,
        auth: &dyn AuthContext,
        caller: &Principal,
        update: FeeUpdate,
    ) -> Result<FeeConfig, EscrowError> {
        self.execute("update_fee_config", |txn| {
            let config = txn.config()?;
            auth.require_auth(
                caller,
                &calls::update_fee_config(&config.escrow_account, caller, &update),
            )?;
            require_admin(&config.admin, caller)?;
            if let Some(recipient) = &update.fee_recipient {
                validate_recipient(recipient, &config.escrow_account)?;
            }

            let fees = txn.fee_config(&config.admin)?.updated(&update)?;
            txn.put(keys::FEES, &fees)?;
            txn.emit(EscrowEvent::FeeConfigUpdated {
                config: fees.clone(),
            });
            Ok(fees)
        })
    }

    /// Admin: attach descriptive metadata to a bounty slot, replacing any
    /// earlier metadata. The slot need not be funded yet.
    pub fn update_metadata(
        &self,
        auth: &dyn AuthContext,
        caller: &Principal,
        bounty_id: u64,
        metadata: BountyMetadata,
    ) -> Result<BountyMetadata, EscrowError> {
        self.execute("update_metadata", |txn| {
            let config = txn.config()?;
            auth.require_auth(
                caller,
                &calls::update_metadata(&config.escrow_account, caller, bounty_id, &metadata),
            )?;
            require_admin(&config.admin, caller)?;
            metadata.validate()?;

            txn.put(&keys::metadata(bounty_id), &metadata)?;
            txn.emit(EscrowEvent::MetadataUpdated {
                bounty_id,
                metadata: metadata.clone(),
            });
            Ok(metadata)
        })
    }

    // -----------------------------------------------------------------------
    // Upgrades and migration
    // -----------------------------------------------------------------------

    /// Open an upgrade proposal. The admin or any signer may propose; only
    /// signer approvals count toward the threshold.
    pub fn propose_upgrade(
        &self,
        auth: &dyn AuthContext,
        proposer: &Principal,
        code: CodeRef,
    ) -> Result<u64, EscrowError> {
        self.execute("propose_upgrade", |txn| {
            let config = txn.config()?;
            auth.require_auth(
                proposer,
                &calls::propose_upgrade(&config.escrow_account, proposer, &code),
            )?;
            if proposer != &config.admin && !config.is_signer(proposer) {
                return Err(EscrowError::NotSigner(proposer.clone()));
            }
            code.validate()?;
            let upgrade = upgrade_state(txn)?;
            if code.version == upgrade.current_version {
                return Err(EscrowError::InvalidVersion {
                    current: upgrade.current_version,
                    target: code.version,
                });
            }

            let id = txn.next_id(keys::NEXT_PROPOSAL)?;
            let proposal = Proposal::new(
                id,
                ProposalAction::Upgrade { code },
                proposer.clone(),
                txn.now(),
            );
            txn.put(&keys::proposal(id), &proposal)?;
            txn.emit(EscrowEvent::ProposalCreated {
                proposal_id: id,
                proposer: proposer.clone(),
            });
            Ok(id)
        })
    }

    /// Add `signer`'s approval to an upgrade proposal. Returns the number
    /// of distinct approvals so far.
    pub fn approve_upgrade(
        &self,
        auth: &dyn AuthContext,
        signer: &Principal,
        proposal_id: u64,
    ) -> Result<usize, EscrowError> {
        self.execute("approve_upgrade", |txn| {
            let config = txn.config()?;
            auth.require_auth(
                signer,
                &calls::approve_upgrade(&config.escrow_account, signer, proposal_id),
            )?;
            if !config.is_signer(signer) {
                return Err(EscrowError::NotSigner(signer.clone()));
            }

            let mut proposal = upgrade_proposal(txn, proposal_id)?;
            if proposal.approve(signer)? {
                txn.emit(EscrowEvent::ProposalApproved {
                    proposal_id,
                    signer: signer.clone(),
                    approvals: proposal.approvals.len(),
                });
                txn.put(&keys::proposal(proposal_id), &proposal)?;
            }
            Ok(proposal.approvals.len())
        })
    }

    /// Switch to the proposal's code once the threshold is met. Single use.
    pub fn execute_upgrade(
        &self,
        auth: &dyn AuthContext,
        caller: &Principal,
        proposal_id: u64,
    ) -> Result<UpgradeState, EscrowError> {
        self.execute("execute_upgrade", |txn| {
            let config = txn.config()?;
            auth.require_auth(
                caller,
                &calls::execute_upgrade(&config.escrow_account, caller, proposal_id),
            )?;
            if caller != &config.admin && !config.is_signer(caller) {
                return Err(EscrowError::NotSigner(caller.clone()));
            }

            let mut proposal = upgrade_proposal(txn, proposal_id)?;
            let ProposalAction::Upgrade { code } = proposal.action.clone() else {
                return Err(EscrowError::ProposalNotFound(proposal_id));
            };
            proposal.mark_executed(config.threshold, txn.now())?;

            let mut upgrade = upgrade_state(txn)?;
            let from_version = upgrade.current_version;
            upgrade.apply(&code, txn.now())?;

            txn.put(&keys::proposal(proposal_id), &proposal)?;
            txn.put(keys::UPGRADE, &upgrade)?;
            txn.emit(EscrowEvent::UpgradeExecuted {
                proposal_id,
                from_version,
                to_version: upgrade.current_version,
            });
            Ok(upgrade)
        })
    }

    /// Admin: record a data migration to `target_version`. Re-running a
    /// migration that already reached the target is a no-op that returns
    /// the stored state.
    pub fn migrate(
        &self,
        auth: &dyn AuthContext,
        caller: &Principal,
        target_version: u32,
        migration_hash: &str,
    ) -> Result<MigrationState, EscrowError> {
        self.execute("migrate", |txn| {
            let config = txn.config()?;
            auth.require_auth(
                caller,
                &calls::migrate(&config.escrow_account, caller, target_version, migration_hash),
            )?;
            require_admin(&config.admin, caller)?;

            let mut upgrade = upgrade_state(txn)?;
            let last: Option<MigrationState> = txn.get(keys::MIGRATION)?;
            match plan_migration(&upgrade, last.as_ref(), target_version, migration_hash, txn.now())? {
                MigrationPlan::AlreadyApplied(done) => {
                    debug!(to_version = done.to_version, "migration already applied");
                    Ok(done)
                }
                MigrationPlan::Apply(state) => {
                    upgrade.previous_version = Some(upgrade.current_version);
                    upgrade.current_version = state.to_version;
                    txn.put(keys::UPGRADE, &upgrade)?;
                    txn.put(keys::MIGRATION, &state)?;
                    txn.emit(EscrowEvent::Migrated {
                        from_version: state.from_version,
                        to_version: state.to_version,
                        migration_hash: state.migration_hash.clone(),
                    });
                    Ok(state)
                }
            }
        })
    }
}

/// Stored upgrade state. Instances initialized before version bookkeeping
/// existed read as the built-in version.
fn upgrade_state(txn: &Txn<'_>) -> Result<UpgradeState, EscrowError> {
    Ok(txn
        .get(keys::UPGRADE)?
        .unwrap_or_else(|| UpgradeState::initial(CONTRACT_VERSION)))
}

/// Move a payout already applied to the record: the recipient gets
/// `amount` less the fee, and the fee goes to its recipient.
fn send_payout(
    txn: &mut Txn<'_>,
    bounty_id: u64,
    escrow: &Principal,
    recipient: &Principal,
    amount: u64,
    fee: Option<FeeCharge>,
) -> Result<(), EscrowError> {
    let net = amount
        .checked_sub(fee.as_ref().map_or(0, |f| f.amount))
        .ok_or(EscrowError::InvalidAmount)?;
    txn.transfer(escrow, recipient, net)?;
    if let Some(fee) = fee {
        txn.transfer(escrow, &fee.recipient, fee.amount)?;
        emit_fee(txn, bounty_id, fee);
    }
    Ok(())
}

fn emit_fee(txn: &mut Txn<'_>, bounty_id: u64, fee: FeeCharge) {
    txn.emit(EscrowEvent::FeeCollected {
        bounty_id,
        kind: fee.kind,
        recipient: fee.recipient,
        amount: fee.amount,
    });
}

/// Close the open refund proposals of every record this call settled. A
/// settled record can never be refunded, so their votes can never count.
fn close_settled_refund_proposals(txn: &mut Txn<'_>) -> Result<(), EscrowError> {
    let settled: Vec<u64> = txn
        .staged_records()
        .filter(|r| r.status.is_terminal())
        .map(|r| r.bounty_id)
        .collect();
    for bounty_id in settled {
        for id in txn.scan::<u64>(&keys::refund_proposal_prefix(bounty_id))? {
            txn.remove(&keys::refund_proposal(bounty_id, id));
            let Some(mut proposal) = txn.get::<Proposal>(&keys::proposal(id))? else {
                continue;
            };
            if proposal.close(txn.now()) {
                txn.put(&keys::proposal(id), &proposal)?;
                txn.emit(EscrowEvent::ProposalClosed {
                    proposal_id: id,
                    bounty_id,
                });
            }
        }
    }
    Ok(())
}

fn upgrade_proposal(txn: &Txn<'_>, proposal_id: u64) -> Result<Proposal, EscrowError> {
    match txn.get::<Proposal>(&keys::proposal(proposal_id))? {
        Some(p) if matches!(p.action, ProposalAction::Upgrade { .. }) => Ok(p),
        _ => Err(EscrowError::ProposalNotFound(proposal_id)),
    }
}

fn config_error(e: ConfigError) -> EscrowError {
    match e {
        ConfigError::InvalidPrincipal(p) => EscrowError::InvalidAddress(p),
        other => EscrowError::InvalidThreshold(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Fault injection
// ---------------------------------------------------------------------------

impl EscrowContract {
    #[cfg(not(test))]
    #[inline(always)]
    fn inject_faults(&self, _record: &mut EscrowRecord) {}

    #[cfg(test)]
    fn inject_faults(&self, record: &mut EscrowRecord) {
        self.faults.apply(record);
    }
}

#[cfg(test)]
mod faults {
    use std::sync::atomic::{AtomicBool, Ordering};

    use crate::escrow::EscrowRecord;

    /// Deliberate bugs, switched on by tests that need a broken contract.
    #[derive(Debug, Default)]
    pub(super) struct Faults {
        pub(super) forget_payout_history: AtomicBool,
    }

    impl Faults {
        pub(super) fn apply(&self, record: &mut EscrowRecord) {
            if self.forget_payout_history.load(Ordering::SeqCst) {
                record.payout_history.pop();
            }
        }
    }
}
