//! # CLI Interface
//!
//! Command-line structure for `vouch-node`, built with `clap` derive. Every
//! escrow operation has a subcommand; calls are signed with the local key
//! file, so the signer is always the principal of that key.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use vouch_contracts::{BountyMetadata, CodeRef, FeeUpdate};
use vouch_protocol::identity::Principal;

use crate::logging::LogFormat;

/// Vouch escrow node.
///
/// Operates one escrow instance stored in a local sled database: lock
/// funds, pay them out, refund them, and run the keeper that releases
/// scheduled payments when they come due.
#[derive(Parser, Debug)]
#[command(
    name = "vouch-node",
    about = "Vouch escrow node",
    version,
    propagate_version = true
)]
pub struct VouchNodeCli {
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Directory holding the escrow database.
    #[arg(
        long,
        short = 'd',
        global = true,
        env = "VOUCH_DATA_DIR",
        default_value = "./vouch-data"
    )]
    pub data_dir: PathBuf,

    /// Hex-encoded Ed25519 secret key used to sign calls.
    ///
    /// Defaults to `vouch.key` inside the data directory.
    #[arg(long, short = 'k', global = true, env = "VOUCH_KEY_FILE")]
    pub key_file: Option<PathBuf>,

    /// Log output format: `pretty` or `json`.
    #[arg(long, global = true, env = "VOUCH_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}

impl GlobalArgs {
    pub fn key_path(&self) -> PathBuf {
        self.key_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join("vouch.key"))
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("db")
    }

    pub fn format(&self) -> LogFormat {
        LogFormat::from_str_lossy(&self.log_format)
    }
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate a fresh signing key and print its principal.
    Keygen(KeygenArgs),
    /// Initialize the escrow instance.
    Init(InitArgs),
    /// Credit an account on the local ledger.
    Mint(MintArgs),
    /// Lock funds from the key's account under a new bounty id.
    Lock(LockArgs),
    /// Pay part of a bounty to one recipient.
    Payout(PayoutArgs),
    /// Pay several recipients atomically.
    BatchPayout(BatchPayoutArgs),
    /// Return held funds to the depositor once refundable.
    Refund(BountyArgs),
    /// Approve an early refund, in full or for an amount.
    ApproveRefund(ApproveRefundArgs),
    /// Record a pending claim for the remaining amount.
    AuthorizeClaim(AuthorizeClaimArgs),
    /// Execute the pending claim naming the key's principal.
    Claim(BountyArgs),
    /// Cancel a pending claim.
    CancelClaim(BountyArgs),
    /// Create a timed release.
    Schedule(ScheduleArgs),
    /// Release every schedule that has come due.
    Trigger(BountyArgs),
    /// Pause or resume deposits, releases or refunds.
    Pause(PauseArgs),
    /// Change fee rates or the fee recipient.
    Fees(FeesArgs),
    /// Tag a bounty with the repository and issue it pays for.
    Metadata(MetadataArgs),
    /// Propose moving the instance to another code version.
    ProposeUpgrade(ProposeUpgradeArgs),
    /// Approve an upgrade proposal.
    ApproveUpgrade(ProposalArgs),
    /// Execute an upgrade proposal that met its threshold.
    ExecuteUpgrade(ProposalArgs),
    /// Record a data migration to a newer version.
    Migrate(MigrateArgs),
    /// Print a bounty record, or instance stats when no id is given.
    Info(InfoArgs),
    /// Print the event log.
    Events(EventsArgs),
    /// Run the release keeper until interrupted.
    Run(RunArgs),
    /// Print version information and exit.
    Version,
}

#[derive(Args, Debug)]
pub struct KeygenArgs {
    /// Overwrite an existing key file.
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct InitArgs {
    /// JSON escrow configuration. Without it, the key's principal becomes
    /// the single admin and signer.
    #[arg(long, short = 'c', env = "VOUCH_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct MintArgs {
    pub account: Principal,
    pub amount: u64,
}

#[derive(Args, Debug)]
pub struct LockArgs {
    pub bounty_id: u64,
    pub amount: u64,
    /// Unix seconds after which anyone may refund. 0 refunds at any time;
    /// omit it to require an approval.
    #[arg(long)]
    pub deadline: Option<u64>,
    /// Recipient allowed to request payouts alongside the admin.
    #[arg(long)]
    pub claimant: Option<Principal>,
}

#[derive(Args, Debug)]
pub struct PayoutArgs {
    pub bounty_id: u64,
    pub recipient: Principal,
    pub amount: u64,
}

#[derive(Args, Debug)]
pub struct BatchPayoutArgs {
    pub bounty_id: u64,
    /// `recipient=amount` pairs.
    #[arg(required = true, value_parser = parse_payout)]
    pub payouts: Vec<(Principal, u64)>,
}

#[derive(Args, Debug)]
pub struct BountyArgs {
    pub bounty_id: u64,
}

#[derive(Args, Debug)]
pub struct ApproveRefundArgs {
    pub bounty_id: u64,
    /// Approve only this amount; omit for the whole remainder.
    #[arg(long)]
    pub amount: Option<u64>,
}

#[derive(Args, Debug)]
pub struct AuthorizeClaimArgs {
    pub bounty_id: u64,
    pub recipient: Principal,
}

#[derive(Args, Debug)]
pub struct ScheduleArgs {
    pub bounty_id: u64,
    pub recipient: Principal,
    pub amount: u64,
    /// Unix seconds at which the release becomes due.
    pub release_at: u64,
}

/// Each flag left out keeps its current setting.
#[derive(Args, Debug)]
pub struct PauseArgs {
    #[arg(long)]
    pub lock: Option<bool>,
    #[arg(long)]
    pub release: Option<bool>,
    #[arg(long)]
    pub refund: Option<bool>,
}

#[derive(Args, Debug)]
pub struct FeesArgs {
    /// Basis points taken from each deposit.
    #[arg(long)]
    pub lock_rate: Option<u32>,
    /// Basis points taken from each payout.
    #[arg(long)]
    pub release_rate: Option<u32>,
    #[arg(long)]
    pub recipient: Option<Principal>,
    #[arg(long)]
    pub enabled: Option<bool>,
}

impl FeesArgs {
    pub fn update(&self) -> FeeUpdate {
        FeeUpdate {
            lock_fee_rate: self.lock_rate,
            release_fee_rate: self.release_rate,
            fee_recipient: self.recipient.clone(),
            fee_enabled: self.enabled,
        }
    }
}

#[derive(Args, Debug)]
pub struct MetadataArgs {
    pub bounty_id: u64,
    pub repo_id: u64,
    pub issue_id: u64,
    /// Free-form tag such as `bug` or `feature`.
    #[arg(long, default_value = "bug")]
    pub bounty_type: String,
}

impl MetadataArgs {
    pub fn metadata(&self) -> BountyMetadata {
        BountyMetadata {
            repo_id: self.repo_id,
            issue_id: self.issue_id,
            bounty_type: self.bounty_type.clone(),
        }
    }
}

#[derive(Args, Debug)]
pub struct ProposeUpgradeArgs {
    #[arg(id = "upgrade_version", value_name = "VERSION")]
    pub version: u32,
    /// Hex-encoded 32-byte hash of the new code.
    #[arg(required_unless_present = "code_file", conflicts_with = "code_file")]
    pub code_hash: Option<String>,
    /// Artifact of the new code; its SHA-256 becomes the code hash.
    #[arg(long)]
    pub code_file: Option<PathBuf>,
}

impl ProposeUpgradeArgs {
    /// The code reference to propose, hashing `--code-file` if given.
    pub fn code_ref(&self) -> anyhow::Result<CodeRef> {
        match (&self.code_file, &self.code_hash) {
            (Some(path), _) => {
                let code = std::fs::read(path)
                    .with_context(|| format!("failed to read code file {}", path.display()))?;
                Ok(CodeRef::for_artifact(self.version, &code))
            }
            (None, Some(hash)) => Ok(CodeRef {
                version: self.version,
                code_hash: hash.clone(),
            }),
            (None, None) => anyhow::bail!("either a code hash or --code-file is required"),
        }
    }
}

#[derive(Args, Debug)]
pub struct ProposalArgs {
    pub proposal_id: u64,
}

#[derive(Args, Debug)]
pub struct MigrateArgs {
    pub target_version: u32,
    pub migration_hash: String,
}

#[derive(Args, Debug)]
pub struct InfoArgs {
    pub bounty_id: Option<u64>,
}

#[derive(Args, Debug)]
pub struct EventsArgs {
    #[arg(long, default_value_t = 0)]
    pub offset: usize,
    /// Page size; 0 uses the protocol default.
    #[arg(long, default_value_t = 0)]
    pub limit: usize,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Seconds between keeper sweeps.
    #[arg(
        long,
        env = "VOUCH_KEEPER_INTERVAL",
        default_value_t = vouch_protocol::config::KEEPER_INTERVAL_SECS
    )]
    pub interval: u64,
}

fn parse_payout(raw: &str) -> Result<(Principal, u64), String> {
    let (who, amount) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected recipient=amount, got {raw:?}"))?;
    let who: Principal = who.parse().map_err(|e| format!("{e}"))?;
    let amount = amount
        .parse::<u64>()
        .map_err(|e| format!("bad amount {amount:?}: {e}"))?;
    Ok((who, amount))
}
