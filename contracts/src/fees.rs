//! # Fees
//!
//! An instance can take a cut of value entering and leaving custody. Rates
//! are in basis points and capped at [`MAX_FEE_RATE`]:
//!
//! - the **lock fee** is taken from the deposit, so the record holds the
//!   deposit minus the fee;
//! - the **release fee** is taken from each payout, so the recipient gets
//!   the payout minus the fee.
//!
//! Refunds are never charged. Every fee taken is written to the record's
//! fee history and sent to the fee recipient in the same call. Fees are off
//! until the admin enables them.

use serde::{Deserialize, Serialize};

use vouch_protocol::identity::Principal;

use crate::error::EscrowError;

/// 100% in basis points.
pub const BASIS_POINTS: u32 = 10_000;

/// Highest rate either fee may be set to (50%).
pub const MAX_FEE_RATE: u32 = 5_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeConfig {
    /// Basis points taken from each deposit.
    pub lock_fee_rate: u32,
    /// Basis points taken from each payout.
    pub release_fee_rate: u32,
    pub fee_recipient: Principal,
    #[serde(default)]
    pub fee_enabled: bool,
}

/// A partial change to the [`FeeConfig`]. `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeUpdate {
    pub lock_fee_rate: Option<u32>,
    pub release_fee_rate: Option<u32>,
    pub fee_recipient: Option<Principal>,
    pub fee_enabled: Option<bool>,
}

/// Which movement a fee was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeeKind {
    Lock,
    Release,
}

/// A fee to send, computed before any funds move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeCharge {
    pub kind: FeeKind,
    pub recipient: Principal,
    pub amount: u64,
}

/// A fee taken on a record, kept in its history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeEntry {
    pub kind: FeeKind,
    pub recipient: Principal,
    pub amount: u64,
    pub timestamp: u64,
}

impl FeeConfig {
    /// Zero rates, switched off, paying `recipient` if ever enabled.
    pub fn disabled(recipient: Principal) -> Self {
        Self {
            lock_fee_rate: 0,
            release_fee_rate: 0,
            fee_recipient: recipient,
            fee_enabled: false,
        }
    }

    /// The configuration after `update`, validated.
    ///
    /// # Errors
    ///
    /// `InvalidFeeRate` for a rate above [`MAX_FEE_RATE`].
    pub fn updated(&self, update: &FeeUpdate) -> Result<Self, EscrowError> {
        let next = Self {
            lock_fee_rate: update.lock_fee_rate.unwrap_or(self.lock_fee_rate),
            release_fee_rate: update.release_fee_rate.unwrap_or(self.release_fee_rate),
            fee_recipient: update
                .fee_recipient
                .clone()
                .unwrap_or_else(|| self.fee_recipient.clone()),
            fee_enabled: update.fee_enabled.unwrap_or(self.fee_enabled),
        };
        next.validate()?;
        Ok(next)
    }

    pub fn validate(&self) -> Result<(), EscrowError> {
        for rate in [self.lock_fee_rate, self.release_fee_rate] {
            if rate > MAX_FEE_RATE {
                return Err(EscrowError::InvalidFeeRate(rate));
            }
        }
        Ok(())
    }

    /// The lock fee on a deposit of `amount`, if one is due.
    pub fn lock_charge(&self, amount: u64) -> Option<FeeCharge> {
        self.charge(FeeKind::Lock, self.lock_fee_rate, amount)
    }

    /// The release fee on a payout of `amount`, if one is due.
    pub fn release_charge(&self, amount: u64) -> Option<FeeCharge> {
        self.charge(FeeKind::Release, self.release_fee_rate, amount)
    }

    fn charge(&self, kind: FeeKind, rate: u32, amount: u64) -> Option<FeeCharge> {
        if !self.fee_enabled {
            return None;
        }
        let fee = fee_for(amount, rate);
        (fee > 0).then(|| FeeCharge {
            kind,
            recipient: self.fee_recipient.clone(),
            amount: fee,
        })
    }
}

/// `amount * rate / BASIS_POINTS`, rounded down. Never exceeds `amount`
/// for a rate within [`BASIS_POINTS`].
pub fn fee_for(amount: u64, rate: u32) -> u64 {
    let fee = u128::from(amount) * u128::from(rate) / u128::from(BASIS_POINTS);
    u64::try_from(fee).unwrap_or(amount).min(amount)
}
