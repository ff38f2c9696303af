//! # VouchDb: Persistent Storage Engine
//!
//! The on-disk home of an escrow instance, built on sled's embedded
//! key-value store.
//!
//! ## Tree Layout
//!
//! | Tree             | Key                   | Value                   |
//! |------------------|-----------------------|-------------------------|
//! | `contract_state` | `escrow/{id}` etc.    | `json(record)`          |
//! | `balances`       | principal (UTF-8)     | `u64` (8B BE)           |
//! | `metadata`       | key (UTF-8)           | `json(value)`           |
//!
//! ## Atomicity
//!
//! An escrow commit arrives as one [`WriteBatch`] and lands as one sled
//! `Batch` on `contract_state`: all of it or none of it. Balance transfers
//! run as a sled transaction over the two affected keys.

use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Batch, Db, Tree};
use std::path::Path;
use tracing::{debug, info};

use super::{decode, DbError, DbResult, StateStore, WriteBatch};
use crate::config::{TREE_BALANCES, TREE_CONTRACT_STATE, TREE_METADATA};
use crate::identity::Principal;
use crate::ledger::{settle, TransferError, TransferReceipt, ValueTransfer};

/// Persistent storage for one escrow instance and its ledger.
///
/// sled is thread-safe; `VouchDb` is cheap to clone and can be shared via
/// `Arc<VouchDb>` without extra locking.
#[derive(Debug, Clone)]
pub struct VouchDb {
    db: Db,
    contract_state: Tree,
    balances: Tree,
    metadata: Tree,
}

impl VouchDb {
    /// Open or create a database at the given filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let db = sled::open(path.as_ref())?;
        info!(path = %path.as_ref().display(), "opened vouch database");
        Self::from_db(db)
    }

    /// A database that lives in a temp location and vanishes on drop.
    pub fn open_temporary() -> DbResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> DbResult<Self> {
        let contract_state = db.open_tree(TREE_CONTRACT_STATE)?;
        let balances = db.open_tree(TREE_BALANCES)?;
        let metadata = db.open_tree(TREE_METADATA)?;
        Ok(Self {
            db,
            contract_state,
            balances,
            metadata,
        })
    }

    // -- Ledger operations --------------------------------------------------

    /// Credit `amount` to `account` out of nothing. Operator tooling only.
    pub fn mint(&self, account: &Principal, amount: u64) -> DbResult<u64> {
        let key = account.as_str().as_bytes();
        let current = read_balance(self.balances.get(key)?.as_deref(), account)?;
        let updated = current
            .checked_add(amount)
            .ok_or_else(|| DbError::Corrupt(format!("balance overflow for {account}")))?;
        self.balances.insert(key, &updated.to_be_bytes())?;
        info!(account = %account, amount, balance = updated, "minted");
        Ok(updated)
    }

    fn move_value(&self, from: &Principal, to: &Principal, amount: u64) -> Result<(), TransferError> {
        let from_key = from.as_str().as_bytes();
        let to_key = to.as_str().as_bytes();

        let result = self.balances.transaction(|tx| {
            let from_balance = read_balance(tx.get(from_key)?.as_deref(), from)
                .map_err(|e| ConflictableTransactionError::Abort(TransferError::Storage(e.to_string())))?;
            let to_balance = read_balance(tx.get(to_key)?.as_deref(), to)
                .map_err(|e| ConflictableTransactionError::Abort(TransferError::Storage(e.to_string())))?;
            let (debited, credited) = settle(from, from_balance, to, to_balance, amount)
                .map_err(ConflictableTransactionError::Abort)?;
            if from != to {
                tx.insert(from_key, &debited.to_be_bytes())?;
                tx.insert(to_key, &credited.to_be_bytes())?;
            }
            Ok(())
        });

        match result {
            Ok(()) => Ok(()),
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(TransferError::Storage(e.to_string())),
        }
    }

    // -- Metadata operations ------------------------------------------------

    pub fn put_meta<T: Serialize>(&self, key: &str, value: &T) -> DbResult<()> {
        let bytes = serde_json::to_vec(value).map_err(|e| DbError::Serialization(e.to_string()))?;
        self.metadata.insert(key.as_bytes(), bytes)?;
        Ok(())
    }

    pub fn get_meta<T: DeserializeOwned>(&self, key: &str) -> DbResult<Option<T>> {
        match self.metadata.get(key.as_bytes())? {
            Some(bytes) => decode(key.as_bytes(), &bytes).map(Some),
            None => Ok(None),
        }
    }

    // -- Utility operations -------------------------------------------------

    /// Number of keys in the contract state tree.
    pub fn state_entry_count(&self) -> usize {
        self.contract_state.len()
    }

    /// Block until all pending writes are durable.
    pub fn flush(&self) -> DbResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

fn read_balance(bytes: Option<&[u8]>, account: &Principal) -> DbResult<u64> {
    match bytes {
        None => Ok(0),
        Some(b) => {
            let arr: [u8; 8] = b
                .try_into()
                .map_err(|_| DbError::Corrupt(format!("balance of {account}")))?;
            Ok(u64::from_be_bytes(arr))
        }
    }
}

impl StateStore for VouchDb {
    fn get(&self, key: &[u8]) -> DbResult<Option<Vec<u8>>> {
        Ok(self.contract_state.get(key)?.map(|v| v.to_vec()))
    }

    fn scan_prefix(&self, prefix: &[u8]) -> DbResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.contract_state
            .scan_prefix(prefix)
            .map(|entry| {
                let (k, v) = entry?;
                Ok((k.to_vec(), v.to_vec()))
            })
            .collect()
    }

    fn apply(&self, batch: WriteBatch) -> DbResult<()> {
        let mut sled_batch = Batch::default();
        for (key, value) in batch.iter() {
            match value {
                Some(v) => sled_batch.insert(key, v),
                None => sled_batch.remove(key),
            }
        }
        self.contract_state.apply_batch(sled_batch)?;
        self.db.flush()?;
        debug!(writes = batch.len(), "applied state batch");
        Ok(())
    }
}

impl ValueTransfer for VouchDb {
    fn transfer(
        &self,
        from: &Principal,
        to: &Principal,
        amount: u64,
    ) -> Result<TransferReceipt, TransferError> {
        self.move_value(from, to, amount)?;
        Ok(TransferReceipt::new(from, to, amount))
    }

    fn revert(&self, receipt: &TransferReceipt) -> Result<(), TransferError> {
        self.move_value(&receipt.to, &receipt.from, receipt.amount)
    }

    fn balance(&self, account: &Principal) -> Result<u64, TransferError> {
        let bytes = self
            .balances
            .get(account.as_str().as_bytes())
            .map_err(|e| TransferError::Storage(e.to_string()))?;
        read_balance(bytes.as_deref(), account).map_err(|e| TransferError::Storage(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StoreExt;

    fn p(name: &str) -> Principal {
        Principal::named(name)
    }

    #[test]
    fn open_temporary_database() {
        let db = VouchDb::open_temporary().expect("should create temp db");
        assert_eq!(db.state_entry_count(), 0);
    }

    #[test]
    fn batch_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let db = VouchDb::open(dir.path()).unwrap();
            let mut batch = WriteBatch::new();
            batch.put_json("escrow/00000000000000000001", &500u64).unwrap();
            batch.put_json("meta/version", &2u32).unwrap();
            db.apply(batch).unwrap();
        }
        let db = VouchDb::open(dir.path()).unwrap();
        assert_eq!(
            db.get_json::<u64>(b"escrow/00000000000000000001").unwrap(),
            Some(500)
        );
        assert_eq!(db.get_json::<u32>(b"meta/version").unwrap(), Some(2));
    }

    #[test]
    fn batch_delete() {
        let db = VouchDb::open_temporary().unwrap();
        let mut batch = WriteBatch::new();
        batch.put("a", b"1".to_vec());
        db.apply(batch).unwrap();
        let mut batch = WriteBatch::new();
        batch.remove("a");
        db.apply(batch).unwrap();
        assert!(db.get(b"a").unwrap().is_none());
    }

    #[test]
    fn scan_prefix_in_key_order() {
        let db = VouchDb::open_temporary().unwrap();
        let mut batch = WriteBatch::new();
        batch.put_json("schedule/1/00000000000000000002", &2u64).unwrap();
        batch.put_json("schedule/1/00000000000000000001", &1u64).unwrap();
        batch.put_json("schedule/2/00000000000000000001", &9u64).unwrap();
        db.apply(batch).unwrap();
        assert_eq!(db.scan_json::<u64>(b"schedule/1/").unwrap(), vec![1, 2]);
    }

    #[test]
    fn ledger_transfer_and_revert() {
        let db = VouchDb::open_temporary().unwrap();
        db.mint(&p("alice"), 100).unwrap();
        let receipt = db.transfer(&p("alice"), &p("escrow"), 60).unwrap();
        assert_eq!(db.balance(&p("alice")).unwrap(), 40);
        assert_eq!(db.balance(&p("escrow")).unwrap(), 60);

        db.revert(&receipt).unwrap();
        assert_eq!(db.balance(&p("alice")).unwrap(), 100);
        assert_eq!(db.balance(&p("escrow")).unwrap(), 0);
    }

    #[test]
    fn ledger_overdraft_is_aborted() {
        let db = VouchDb::open_temporary().unwrap();
        db.mint(&p("alice"), 5).unwrap();
        let err = db.transfer(&p("alice"), &p("bob"), 6).unwrap_err();
        assert!(matches!(err, TransferError::InsufficientBalance { .. }));
        assert_eq!(db.balance(&p("alice")).unwrap(), 5);
        assert_eq!(db.balance(&p("bob")).unwrap(), 0);
    }

    #[test]
    fn metadata_roundtrip() {
        let db = VouchDb::open_temporary().unwrap();
        assert!(db.get_meta::<u64>("last_keeper_run").unwrap().is_none());
        db.put_meta("last_keeper_run", &1_700_000_000u64).unwrap();
        assert_eq!(
            db.get_meta::<u64>("last_keeper_run").unwrap(),
            Some(1_700_000_000)
        );
    }
}
