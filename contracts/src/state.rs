//! Storage layout and the per-operation transaction.
//!
//! A [`Txn`] is the transaction boundary around one mutating call. Reads
//! see the store plus whatever the call has staged so far; writes, events
//! and transfer receipts accumulate in the `Txn`. [`Txn::commit`] persists
//! the write set as one atomic batch. [`Txn::rollback`] reverts its
//! transfers, newest first, so a failed call leaves neither state nor
//! balances behind; a revert the ledger refuses turns the failure into
//! [`EscrowError::RollbackFailed`]. Dropping an uncommitted `Txn` (a panic
//! in the body) rolls back the same way and can only log.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;

use vouch_protocol::config::EscrowConfig;
use vouch_protocol::identity::Principal;
use vouch_protocol::ledger::{TransferReceipt, ValueTransfer};
use vouch_protocol::storage::{decode, StateStore, StoreExt, WriteBatch};

use crate::error::EscrowError;
use crate::escrow::EscrowRecord;
use crate::events::{EscrowEvent, EventRecord};
use crate::fees::FeeConfig;
use crate::pause::{PauseFlags, PauseGate};

/// Key layout of the contract state keyspace. Numeric ids are zero-padded
/// to 20 digits (the width of `u64::MAX`) so prefix scans are numeric.
pub mod keys {
    pub const CONFIG: &str = "config";
    pub const UPGRADE: &str = "meta/upgrade";
    pub const MIGRATION: &str = "meta/migration";
    pub const NEXT_PROPOSAL: &str = "meta/next_proposal_id";
    pub const EVENT_SEQ: &str = "meta/event_seq";
    pub const PAUSE: &str = "meta/pause";
    pub const FEES: &str = "meta/fees";

    pub const ESCROW_PREFIX: &str = "escrow/";
    pub const PROPOSAL_PREFIX: &str = "proposal/";
    pub const EVENT_PREFIX: &str = "event/";

    pub fn escrow(bounty_id: u64) -> String {
        format!("{ESCROW_PREFIX}{bounty_id:020}")
    }

    pub fn schedule_prefix(bounty_id: u64) -> String {
        format!("schedule/{bounty_id:020}/")
    }

    pub fn schedule(bounty_id: u64, schedule_id: u64) -> String {
        format!("schedule/{bounty_id:020}/{schedule_id:020}")
    }

    pub fn schedule_seq(bounty_id: u64) -> String {
        format!("schedule_seq/{bounty_id:020}")
    }

    pub fn release_prefix(bounty_id: u64) -> String {
        format!("release/{bounty_id:020}/")
    }

    pub fn release(bounty_id: u64, schedule_id: u64) -> String {
        format!("release/{bounty_id:020}/{schedule_id:020}")
    }

    pub fn proposal(id: u64) -> String {
        format!("{PROPOSAL_PREFIX}{id:020}")
    }

    /// Open refund proposals of one bounty, keyed by proposal id.
    pub fn refund_proposal_prefix(bounty_id: u64) -> String {
        format!("refund_proposal/{bounty_id:020}/")
    }

    pub fn refund_proposal(bounty_id: u64, proposal_id: u64) -> String {
        format!("refund_proposal/{bounty_id:020}/{proposal_id:020}")
    }

    pub fn event(seq: u64) -> String {
        format!("{EVENT_PREFIX}{seq:020}")
    }

    pub fn metadata(bounty_id: u64) -> String {
        format!("metadata/{bounty_id:020}")
    }
}

pub(crate) struct Txn<'a> {
    store: &'a dyn StateStore,
    ledger: &'a dyn ValueTransfer,
    now: u64,
    batch: WriteBatch,
    records: BTreeMap<u64, EscrowRecord>,
    events: Vec<EscrowEvent>,
    receipts: Vec<TransferReceipt>,
    committed: bool,
}

impl<'a> Txn<'a> {
    pub(crate) fn new(store: &'a dyn StateStore, ledger: &'a dyn ValueTransfer, now: u64) -> Self {
        Self {
            store,
            ledger,
            now,
            batch: WriteBatch::new(),
            records: BTreeMap::new(),
            events: Vec::new(),
            receipts: Vec::new(),
            committed: false,
        }
    }

    pub(crate) fn now(&self) -> u64 {
        self.now
    }

    // -- Reads and writes ---------------------------------------------------

    pub(crate) fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, EscrowError> {
        match self.batch.staged(key.as_bytes()) {
            Some(Some(bytes)) => Ok(Some(decode(key.as_bytes(), bytes)?)),
            Some(None) => Ok(None),
            None => Ok(self.store.get_json(key.as_bytes())?),
        }
    }

    /// All values under `prefix`, staged writes included, in key order.
    pub(crate) fn scan<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>, EscrowError> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> =
            self.store.scan_prefix(prefix.as_bytes())?.into_iter().collect();
        for (key, value) in self.batch.iter() {
            if !key.starts_with(prefix.as_bytes()) {
                continue;
            }
            match value {
                Some(v) => {
                    merged.insert(key.to_vec(), v.to_vec());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        merged
            .iter()
            .map(|(k, v)| decode(k, v).map_err(EscrowError::from))
            .collect()
    }

    pub(crate) fn put<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), EscrowError> {
        self.batch.put_json(key, value)?;
        Ok(())
    }

    pub(crate) fn remove(&mut self, key: &str) {
        self.batch.remove(key);
    }

    pub(crate) fn config(&self) -> Result<EscrowConfig, EscrowError> {
        self.get(keys::CONFIG)?.ok_or(EscrowError::NotInitialized)
    }

    /// Stored fee configuration; fees are off until one is stored.
    pub(crate) fn fee_config(&self, admin: &Principal) -> Result<FeeConfig, EscrowError> {
        Ok(self
            .get(keys::FEES)?
            .unwrap_or_else(|| FeeConfig::disabled(admin.clone())))
    }

    pub(crate) fn pause_flags(&self) -> Result<PauseFlags, EscrowError> {
        Ok(self.get(keys::PAUSE)?.unwrap_or_default())
    }

    /// Fails with `Paused` if the admin closed `gate`.
    pub(crate) fn ensure_unpaused(&self, gate: PauseGate) -> Result<(), EscrowError> {
        self.pause_flags()?.check(gate)
    }

    /// Next value of a `u64` counter stored under `key`, starting at 1.
    pub(crate) fn next_id(&mut self, key: &str) -> Result<u64, EscrowError> {
        let current: u64 = self.get(key)?.unwrap_or(0);
        let next = current.checked_add(1).ok_or(EscrowError::Overflow)?;
        self.put(key, &next)?;
        Ok(next)
    }

    // -- Escrow records -----------------------------------------------------

    pub(crate) fn record(&self, bounty_id: u64) -> Result<Option<EscrowRecord>, EscrowError> {
        if let Some(staged) = self.records.get(&bounty_id) {
            return Ok(Some(staged.clone()));
        }
        self.get(&keys::escrow(bounty_id))
    }

    /// The record, or `FundsNotLocked` if the slot is empty.
    pub(crate) fn existing_record(&self, bounty_id: u64) -> Result<EscrowRecord, EscrowError> {
        self.record(bounty_id)?
            .ok_or(EscrowError::FundsNotLocked(bounty_id))
    }

    pub(crate) fn stage_record(&mut self, record: EscrowRecord) {
        self.records.insert(record.bounty_id, record);
    }

    /// Records this call changed. Invariants are checked on these before
    /// commit.
    pub(crate) fn staged_records(&self) -> impl Iterator<Item = &EscrowRecord> {
        self.records.values()
    }

    // -- Effects ------------------------------------------------------------

    pub(crate) fn emit(&mut self, event: EscrowEvent) {
        self.events.push(event);
    }

    pub(crate) fn transfer(
        &mut self,
        from: &Principal,
        to: &Principal,
        amount: u64,
    ) -> Result<(), EscrowError> {
        let receipt = self.ledger.transfer(from, to, amount)?;
        self.receipts.push(receipt);
        Ok(())
    }

    /// Persist everything staged as one batch and return the logged events.
    /// If the store refuses the batch, the transfers are rolled back.
    pub(crate) fn commit(mut self) -> Result<Vec<EventRecord>, EscrowError> {
        match self.persist() {
            Ok(logged) => {
                self.committed = true;
                Ok(logged)
            }
            Err(e) => Err(self.rollback(e)),
        }
    }

    /// Abandon the call: revert transfers, newest first, and drop staged
    /// writes. Returns `cause`, or `RollbackFailed` wrapping it if any
    /// transfer could not be reverted.
    pub(crate) fn rollback(mut self, cause: EscrowError) -> EscrowError {
        let failed = self.revert_transfers();
        if failed == 0 {
            cause
        } else {
            EscrowError::RollbackFailed {
                cause: cause.to_string(),
                failed,
            }
        }
    }

    fn persist(&mut self) -> Result<Vec<EventRecord>, EscrowError> {
        let records = std::mem::take(&mut self.records);
        for record in records.values() {
            self.batch.put_json(keys::escrow(record.bounty_id), record)?;
        }

        let mut logged = Vec::with_capacity(self.events.len());
        if !self.events.is_empty() {
            let mut seq: u64 = self.get(keys::EVENT_SEQ)?.unwrap_or(0);
            for event in std::mem::take(&mut self.events) {
                seq = seq.checked_add(1).ok_or(EscrowError::Overflow)?;
                let entry = EventRecord {
                    seq,
                    timestamp: self.now,
                    event,
                };
                self.batch.put_json(keys::event(seq), &entry)?;
                logged.push(entry);
            }
            self.batch.put_json(keys::EVENT_SEQ, &seq)?;
        }

        let batch = std::mem::take(&mut self.batch);
        self.store.apply(batch)?;
        Ok(logged)
    }

    /// Revert every recorded transfer and return how many the ledger
    /// refused.
    fn revert_transfers(&mut self) -> usize {
        if !self.receipts.is_empty() {
            tracing::debug!(transfers = self.receipts.len(), "rolling back transfers");
        }
        let mut failed = 0;
        while let Some(receipt) = self.receipts.pop() {
            if let Err(e) = self.ledger.revert(&receipt) {
                failed += 1;
                tracing::error!(
                    receipt = %receipt.id,
                    from = %receipt.from,
                    to = %receipt.to,
                    amount = receipt.amount,
                    error = %e,
                    "failed to revert transfer during rollback"
                );
            }
        }
        failed
    }
}

impl Drop for Txn<'_> {
    fn drop(&mut self) {
        if !self.committed && !self.receipts.is_empty() {
            let failed = self.revert_transfers();
            if failed > 0 {
                tracing::error!(failed, "uncommitted call left transfers in place");
            }
        }
    }
}
