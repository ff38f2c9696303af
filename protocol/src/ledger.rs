//! # Value Transfer
//!
//! The escrow moves value only through [`ValueTransfer`]. Each successful
//! transfer yields a [`TransferReceipt`]; if the surrounding escrow
//! operation later fails, the escrow hands the receipts back to
//! [`ValueTransfer::revert`] in reverse order so no partial payout survives.
//!
//! [`InMemoryLedger`] is a plain balance map for tests and embeddings. The
//! node uses the sled-backed implementation on [`crate::storage::VouchDb`].

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

use crate::identity::Principal;

/// Transfer failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransferError {
    #[error("insufficient balance in {account}: needed {needed}, available {available}")]
    InsufficientBalance {
        account: Principal,
        needed: u64,
        available: u64,
    },

    #[error("balance overflow crediting {0}")]
    Overflow(Principal),

    /// The receiving side refused the transfer (hooked ledgers, callbacks).
    #[error("transfer rejected: {0}")]
    Rejected(String),

    #[error("ledger storage error: {0}")]
    Storage(String),
}

/// Proof that a transfer happened, sufficient to undo it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub id: Uuid,
    pub from: Principal,
    pub to: Principal,
    pub amount: u64,
}

impl TransferReceipt {
    pub fn new(from: &Principal, to: &Principal, amount: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            from: from.clone(),
            to: to.clone(),
            amount,
        }
    }
}

/// Host value-transfer capability.
pub trait ValueTransfer: Send + Sync {
    /// Move `amount` from `from` to `to` atomically.
    fn transfer(
        &self,
        from: &Principal,
        to: &Principal,
        amount: u64,
    ) -> Result<TransferReceipt, TransferError>;

    /// Undo a transfer previously returned by [`transfer`](Self::transfer).
    fn revert(&self, receipt: &TransferReceipt) -> Result<(), TransferError>;

    /// Current balance of `account`.
    fn balance(&self, account: &Principal) -> Result<u64, TransferError>;
}

/// Apply a debit/credit pair to two balances, or explain why not.
///
/// Shared by every ledger implementation so they agree on edge cases
/// (self-transfer, overflow, exact-balance spends).
pub fn settle(
    from: &Principal,
    from_balance: u64,
    to: &Principal,
    to_balance: u64,
    amount: u64,
) -> Result<(u64, u64), TransferError> {
    if from == to {
        if from_balance < amount {
            return Err(TransferError::InsufficientBalance {
                account: from.clone(),
                needed: amount,
                available: from_balance,
            });
        }
        return Ok((from_balance, to_balance));
    }
    let debited = from_balance
        .checked_sub(amount)
        .ok_or_else(|| TransferError::InsufficientBalance {
            account: from.clone(),
            needed: amount,
            available: from_balance,
        })?;
    let credited = to_balance
        .checked_add(amount)
        .ok_or_else(|| TransferError::Overflow(to.clone()))?;
    Ok((debited, credited))
}

/// A balance map behind a mutex.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    balances: Mutex<HashMap<Principal, u64>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create value out of thin air. Test setup and the node's `mint`
    /// command only; the escrow itself never mints.
    pub fn mint(&self, account: &Principal, amount: u64) -> Result<u64, TransferError> {
        let mut balances = self.balances.lock();
        let entry = balances.entry(account.clone()).or_insert(0);
        *entry = entry
            .checked_add(amount)
            .ok_or_else(|| TransferError::Overflow(account.clone()))?;
        Ok(*entry)
    }

    /// Sum of all balances. Conserved by every transfer and revert.
    pub fn total_supply(&self) -> u128 {
        self.balances.lock().values().map(|v| u128::from(*v)).sum()
    }

    fn move_value(&self, from: &Principal, to: &Principal, amount: u64) -> Result<(), TransferError> {
        let mut balances = self.balances.lock();
        let from_balance = balances.get(from).copied().unwrap_or(0);
        let to_balance = balances.get(to).copied().unwrap_or(0);
        let (debited, credited) = settle(from, from_balance, to, to_balance, amount)?;
        if from != to {
            balances.insert(from.clone(), debited);
            balances.insert(to.clone(), credited);
        }
        Ok(())
    }
}

impl ValueTransfer for InMemoryLedger {
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
        Ok(self.balances.lock().get(account).copied().unwrap_or(0))
    }
}
