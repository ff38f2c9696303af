//! # Escrow Configuration & Constants
//!
//! Every magic number in Vouch lives here. If you're hardcoding a constant
//! somewhere else, move it here and give it a doc comment.
//!
//! The second half of the file is [`EscrowConfig`], the per-instance
//! configuration an operator hands to `init`. It is plain serde data so it
//! can be loaded from a JSON file and persisted alongside the escrow state.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::identity::Principal;

// ---------------------------------------------------------------------------
// Contract Version
// ---------------------------------------------------------------------------

/// Version the escrow instance reports right after `init`. Bumped by
/// upgrades and migrations, never decremented except by a rollback upgrade.
pub const CONTRACT_VERSION: u32 = 1;

/// Crate version string, for `vouch-node version` and logs.
pub const PROTOCOL_VERSION: &str = "0.1.0";

// ---------------------------------------------------------------------------
// Deadline Sentinels
// ---------------------------------------------------------------------------

/// Deadline meaning "refund is always permitted". Compared by equality,
/// never reached through arithmetic.
pub const ALWAYS_REFUNDABLE: u64 = 0;

/// Deadline meaning "never refundable without an approval". This is also
/// what an omitted deadline resolves to at lock time.
pub const NEVER_REFUNDABLE: u64 = u64::MAX;

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

/// Upper bound on recipients in a single batch payout. Keeps a single call's
/// work (and the number of transfers to undo on failure) bounded.
pub const MAX_BATCH_SIZE: usize = 100;

/// Maximum number of signers on the approval registry.
pub const MAX_SIGNERS: usize = 32;

/// Default page size for history queries when the caller passes `limit = 0`.
pub const DEFAULT_QUERY_LIMIT: usize = 50;

// ---------------------------------------------------------------------------
// Timing
// ---------------------------------------------------------------------------

/// How long an authorized claim stays executable, in seconds. Seven days.
pub const DEFAULT_CLAIM_WINDOW_SECS: u64 = 7 * 24 * 60 * 60;

/// How often the node's keeper loop looks for due release schedules.
pub const KEEPER_INTERVAL_SECS: u64 = 5;

// ---------------------------------------------------------------------------
// Principals
// ---------------------------------------------------------------------------

/// Account name the escrow holds custody under unless configured otherwise.
pub const DEFAULT_ESCROW_ACCOUNT: &str = "vouch-escrow";

/// Longest accepted principal, in bytes.
pub const MAX_PRINCIPAL_LEN: usize = 128;

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// sled tree holding escrow records, schedules, proposals and metadata.
pub const TREE_CONTRACT_STATE: &str = "contract_state";

/// sled tree holding account balances for the built-in ledger.
pub const TREE_BALANCES: &str = "balances";

/// sled tree for node bookkeeping (tracked bounties, last keeper run).
pub const TREE_METADATA: &str = "metadata";

// ---------------------------------------------------------------------------
// EscrowConfig
// ---------------------------------------------------------------------------

/// Errors raised while loading or validating an [`EscrowConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid principal in config: {0}")]
    InvalidPrincipal(String),

    #[error("invalid approval threshold {threshold} for {signers} signers")]
    InvalidThreshold { threshold: u32, signers: usize },

    #[error("claim window must be greater than zero")]
    ZeroClaimWindow,
}

/// Per-instance escrow configuration.
///
/// `signers` and `threshold` drive the approval registry: refunds before the
/// deadline and code upgrades need `threshold` distinct signer approvals.
/// The admin is always allowed to propose; it only counts toward the
/// threshold if it is also listed as a signer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowConfig {
    /// Principal allowed to authorize claims, approve refunds and migrate.
    pub admin: Principal,

    /// Multisig signers for refund approvals and upgrades.
    #[serde(default)]
    pub signers: Vec<Principal>,

    /// Number of distinct signer approvals required to execute a proposal.
    #[serde(default = "default_threshold")]
    pub threshold: u32,

    /// Seconds a pending claim stays executable.
    #[serde(default = "default_claim_window")]
    pub claim_window_secs: u64,

    /// Account the escrow holds funds under.
    #[serde(default = "default_escrow_account")]
    pub escrow_account: Principal,
}

fn default_threshold() -> u32 {
    1
}

fn default_claim_window() -> u64 {
    DEFAULT_CLAIM_WINDOW_SECS
}

fn default_escrow_account() -> Principal {
    Principal::named(DEFAULT_ESCROW_ACCOUNT)
}

impl EscrowConfig {
    /// Single-admin configuration: the admin is the only signer and the
    /// threshold is one.
    pub fn single_admin(admin: Principal) -> Self {
        Self {
            signers: vec![admin.clone()],
            admin,
            threshold: 1,
            claim_window_secs: DEFAULT_CLAIM_WINDOW_SECS,
            escrow_account: default_escrow_account(),
        }
    }

    /// Load a configuration from a JSON file and validate it.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Parse a configuration from a JSON string and validate it.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: EscrowConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check principals, threshold and claim window.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::InvalidPrincipal`] for an empty or oversized principal,
    ///   or when the escrow account doubles as the admin.
    /// - [`ConfigError::InvalidThreshold`] when the threshold is zero or
    ///   exceeds the number of signers.
    /// - [`ConfigError::ZeroClaimWindow`] when claims could never be executed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for principal in std::iter::once(&self.admin)
            .chain(self.signers.iter())
            .chain(std::iter::once(&self.escrow_account))
        {
            if !principal.is_valid() {
                return Err(ConfigError::InvalidPrincipal(principal.to_string()));
            }
        }
        if self.escrow_account == self.admin {
            return Err(ConfigError::InvalidPrincipal(format!(
                "escrow account {} cannot be the admin",
                self.escrow_account
            )));
        }

        let mut unique = self.signers.clone();
        unique.sort();
        unique.dedup();
        if self.threshold == 0
            || self.threshold as usize > unique.len()
            || unique.len() > MAX_SIGNERS
        {
            return Err(ConfigError::InvalidThreshold {
                threshold: self.threshold,
                signers: unique.len(),
            });
        }

        if self.claim_window_secs == 0 {
            return Err(ConfigError::ZeroClaimWindow);
        }
        Ok(())
    }

    /// True if `principal` is one of the configured signers.
    pub fn is_signer(&self, principal: &Principal) -> bool {
        self.signers.iter().any(|s| s == principal)
    }
}
