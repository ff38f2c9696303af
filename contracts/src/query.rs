//! Read-only views of an escrow instance.
//!
//! Queries read the committed store directly. They take no locks and never
//! write, so they are safe to call from anywhere, including from inside a
//! transfer callback.

use serde::{Deserialize, Serialize};

use vouch_protocol::config::{EscrowConfig, DEFAULT_QUERY_LIMIT};
use vouch_protocol::identity::Principal;
use vouch_protocol::storage::StoreExt;

use crate::approvals::{MigrationState, Proposal, UpgradeState};
use crate::contract::EscrowContract;
use crate::deadline::refund_allowed;
use crate::error::EscrowError;
use crate::escrow::{EscrowRecord, EscrowStatus, PayoutEntry, RefundEntry, RefundScope};
use crate::events::EventRecord;
use crate::fees::FeeConfig;
use crate::invariants::InvariantChecker;
use crate::metadata::BountyMetadata;
use crate::pause::PauseFlags;
use crate::payout::{ReleaseEntry, ReleaseSchedule};
use crate::state::keys;

/// Whether `refund` would go through right now, and why not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundEligibility {
    pub eligible: bool,
    pub now: u64,
    pub deadline: u64,
    pub deadline_passed: bool,
    pub has_approval: bool,
    pub claim_pending: bool,
    /// What the next refund would return.
    pub refundable_amount: u64,
}

/// Totals across every record of the instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateStats {
    pub total_locked: u128,
    pub total_remaining: u128,
    pub total_paid_out: u128,
    pub total_refunded: u128,
    /// Lock and release fees across all records.
    #[serde(default)]
    pub total_fees: u128,
    pub locked: usize,
    pub released: usize,
    pub refunded: usize,
    pub partially_refunded: usize,
    pub scheduled: usize,
    pub schedules_released: usize,
}

fn page<T>(items: Vec<T>, offset: usize, limit: usize) -> Vec<T> {
    let limit = if limit == 0 { DEFAULT_QUERY_LIMIT } else { limit };
    items.into_iter().skip(offset).take(limit).collect()
}

impl EscrowContract {
    fn load<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>, EscrowError> {
        Ok(self.store.get_json(key.as_bytes())?)
    }

    fn load_all<T: serde::de::DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>, EscrowError> {
        Ok(self.store.scan_json(prefix.as_bytes())?)
    }

    pub fn config(&self) -> Result<Option<EscrowConfig>, EscrowError> {
        self.load(keys::CONFIG)
    }

    // -- Records ------------------------------------------------------------

    /// `None` for a slot nobody locked funds in.
    pub fn get_status(&self, bounty_id: u64) -> Result<Option<EscrowStatus>, EscrowError> {
        Ok(self.get_info(bounty_id)?.map(|r| r.status))
    }

    pub fn get_info(&self, bounty_id: u64) -> Result<Option<EscrowRecord>, EscrowError> {
        self.load(&keys::escrow(bounty_id))
    }

    /// Every record of the instance, in bounty id order.
    pub fn list_bounties(&self) -> Result<Vec<EscrowRecord>, EscrowError> {
        self.load_all(keys::ESCROW_PREFIX)
    }

    pub fn get_refund_history(&self, bounty_id: u64) -> Result<Vec<RefundEntry>, EscrowError> {
        Ok(self
            .get_info(bounty_id)?
            .map(|r| r.refund_history)
            .unwrap_or_default())
    }

    pub fn get_payout_history(&self, bounty_id: u64) -> Result<Vec<PayoutEntry>, EscrowError> {
        Ok(self
            .get_info(bounty_id)?
            .map(|r| r.payout_history)
            .unwrap_or_default())
    }

    /// Payouts of `bounty_id` to `recipient`, oldest first. A `limit` of
    /// zero means the default page size.
    pub fn query_payouts_by_recipient(
        &self,
        bounty_id: u64,
        recipient: &Principal,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<PayoutEntry>, EscrowError> {
        let matching = self
            .get_payout_history(bounty_id)?
            .into_iter()
            .filter(|e| &e.recipient == recipient)
            .collect();
        Ok(page(matching, offset, limit))
    }

    /// Payouts of `bounty_id` between `min_amount` and `max_amount`,
    /// bounds included.
    pub fn query_payouts_by_amount(
        &self,
        bounty_id: u64,
        min_amount: u64,
        max_amount: u64,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<PayoutEntry>, EscrowError> {
        let matching = self
            .get_payout_history(bounty_id)?
            .into_iter()
            .filter(|e| (min_amount..=max_amount).contains(&e.amount))
            .collect();
        Ok(page(matching, offset, limit))
    }

    /// Payouts of `bounty_id` made between `from` and `to`, bounds included.
    pub fn query_payouts_by_timestamp(
        &self,
        bounty_id: u64,
        from: u64,
        to: u64,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<PayoutEntry>, EscrowError> {
        let matching = self
            .get_payout_history(bounty_id)?
            .into_iter()
            .filter(|e| (from..=to).contains(&e.timestamp))
            .collect();
        Ok(page(matching, offset, limit))
    }

    pub fn get_metadata(&self, bounty_id: u64) -> Result<Option<BountyMetadata>, EscrowError> {
        self.load(&keys::metadata(bounty_id))
    }

    /// Re-run the invariants against the stored record. `false` also for a
    /// missing record.
    pub fn verify_state(&self, bounty_id: u64) -> Result<bool, EscrowError> {
        Ok(self
            .get_info(bounty_id)?
            .map(|r| InvariantChecker::verify(&r))
            .unwrap_or(false))
    }

    pub fn get_refund_eligibility(
        &self,
        bounty_id: u64,
    ) -> Result<Option<RefundEligibility>, EscrowError> {
        let Some(record) = self.get_info(bounty_id)? else {
            return Ok(None);
        };
        let now = self.now();
        let approval = record.admin_approval.as_ref();
        let claim_pending = record.has_pending_claim();
        let active = record.status.is_active();
        let refundable_amount = if active {
            match approval.map(|a| a.scope) {
                Some(RefundScope::Partial(a)) => a.min(record.remaining_amount),
                _ => record.remaining_amount,
            }
        } else {
            0
        };
        Ok(Some(RefundEligibility {
            eligible: active && !claim_pending && refund_allowed(now, record.deadline, approval),
            now,
            deadline: record.deadline,
            deadline_passed: refund_allowed(now, record.deadline, None),
            has_approval: approval.is_some(),
            claim_pending,
            refundable_amount,
        }))
    }

    // -- Schedules ----------------------------------------------------------

    pub fn get_release_schedules(&self, bounty_id: u64) -> Result<Vec<ReleaseSchedule>, EscrowError> {
        self.load_all(&keys::schedule_prefix(bounty_id))
    }

    /// Schedules not yet released, due or not.
    pub fn get_pending_schedules(&self, bounty_id: u64) -> Result<Vec<ReleaseSchedule>, EscrowError> {
        Ok(self
            .get_release_schedules(bounty_id)?
            .into_iter()
            .filter(|s| !s.released)
            .collect())
    }

    pub fn get_due_schedules(&self, bounty_id: u64) -> Result<Vec<ReleaseSchedule>, EscrowError> {
        let now = self.now();
        Ok(self
            .get_release_schedules(bounty_id)?
            .into_iter()
            .filter(|s| s.is_due(now))
            .collect())
    }

    /// Released (`true`) or still pending (`false`) schedules, in id order.
    pub fn query_schedules_by_status(
        &self,
        bounty_id: u64,
        released: bool,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ReleaseSchedule>, EscrowError> {
        let matching = self
            .get_release_schedules(bounty_id)?
            .into_iter()
            .filter(|s| s.released == released)
            .collect();
        Ok(page(matching, offset, limit))
    }

    pub fn get_release_history(&self, bounty_id: u64) -> Result<Vec<ReleaseEntry>, EscrowError> {
        self.load_all(&keys::release_prefix(bounty_id))
    }

    // -- Instance-wide ------------------------------------------------------

    pub fn get_aggregate_stats(&self) -> Result<AggregateStats, EscrowError> {
        let mut stats = AggregateStats::default();
        for record in self.list_bounties()? {
            stats.total_locked += u128::from(record.total_amount);
            stats.total_remaining += u128::from(record.remaining_amount);
            stats.total_paid_out += record.total_paid_out();
            stats.total_refunded += record.total_refunded();
            stats.total_fees += record.total_fees();
            match record.status {
                EscrowStatus::Locked => stats.locked += 1,
                EscrowStatus::Released => stats.released += 1,
                EscrowStatus::Refunded => stats.refunded += 1,
                EscrowStatus::PartiallyRefunded => stats.partially_refunded += 1,
            }
            for schedule in self.get_release_schedules(record.bounty_id)? {
                stats.scheduled += 1;
                if schedule.released {
                    stats.schedules_released += 1;
                }
            }
        }
        Ok(stats)
    }

    /// Events in log order, starting at sequence number `offset + 1`.
    pub fn get_events(&self, offset: usize, limit: usize) -> Result<Vec<EventRecord>, EscrowError> {
        Ok(page(self.load_all(keys::EVENT_PREFIX)?, offset, limit))
    }

    // -- Operator controls --------------------------------------------------

    /// All gates open until the admin closes one.
    pub fn get_pause_flags(&self) -> Result<PauseFlags, EscrowError> {
        Ok(self.load(keys::PAUSE)?.unwrap_or_default())
    }

    /// The fee configuration in force, `None` before `init`.
    pub fn get_fee_config(&self) -> Result<Option<FeeConfig>, EscrowError> {
        let Some(config) = self.config()? else {
            return Ok(None);
        };
        Ok(Some(
            self.load(keys::FEES)?
                .unwrap_or_else(|| FeeConfig::disabled(config.admin)),
        ))
    }

    // -- Governance ---------------------------------------------------------

    pub fn get_upgrade_state(&self) -> Result<Option<UpgradeState>, EscrowError> {
        self.load(keys::UPGRADE)
    }

    /// Version of the running code, `None` before `init`.
    pub fn get_version(&self) -> Result<Option<u32>, EscrowError> {
        Ok(self.get_upgrade_state()?.map(|u| u.current_version))
    }

    pub fn get_previous_version(&self) -> Result<Option<u32>, EscrowError> {
        Ok(self.get_upgrade_state()?.and_then(|u| u.previous_version))
    }

    pub fn get_migration_state(&self) -> Result<Option<MigrationState>, EscrowError> {
        self.load(keys::MIGRATION)
    }

    pub fn get_proposal(&self, proposal_id: u64) -> Result<Option<Proposal>, EscrowError> {
        self.load(&keys::proposal(proposal_id))
    }

    // -- Diagnostics --------------------------------------------------------

    /// Whether a protected operation is running right now.
    pub fn reentrancy_entered(&self) -> bool {
        self.guard().is_entered()
    }

    /// How many times the invariant checker has run on this instance.
    pub fn invariant_call_count(&self) -> u64 {
        self.invariants().call_count()
    }
}
