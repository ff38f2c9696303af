// Copyright (c) 2026 Vouch Contributors. MIT License.
// See LICENSE for details.

//! # Vouch Node
//!
//! Entry point for the `vouch-node` binary. Parses CLI arguments, opens the
//! local escrow database, and either runs one signed escrow call or starts
//! the release keeper.
//!
//! Every call is signed with the key file, so the acting principal is always
//! the key's principal. Results are printed to stdout as JSON; logs go to
//! stderr.

mod cli;
mod keeper;
mod logging;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

use vouch_contracts::{calls, EscrowContract};
use vouch_protocol::auth::SignedInvocation;
use vouch_protocol::clock::SystemClock;
use vouch_protocol::config::{EscrowConfig, CONTRACT_VERSION, PROTOCOL_VERSION};
use vouch_protocol::crypto::VouchKeypair;
use vouch_protocol::identity::Principal;
use vouch_protocol::storage::VouchDb;

use cli::{Commands, GlobalArgs, VouchNodeCli};
use keeper::Keeper;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = VouchNodeCli::parse();
    logging::init_logging(logging::DEFAULT_FILTER, cli.global.format());

    let global = cli.global;
    match cli.command {
        Commands::Keygen(args) => keygen(&global, args.force),
        Commands::Run(args) => run_keeper(&global, args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
        command => execute(&global, command),
    }
}

/// A database handle and the escrow contract running on it.
struct Node {
    db: VouchDb,
    contract: Arc<EscrowContract>,
}

impl Node {
    fn open(global: &GlobalArgs) -> Result<Self> {
        let db_path = global.db_path();
        std::fs::create_dir_all(&db_path)
            .with_context(|| format!("failed to create database directory {}", db_path.display()))?;
        let db = VouchDb::open(&db_path)
            .with_context(|| format!("failed to open database at {}", db_path.display()))?;
        let contract = Arc::new(EscrowContract::new(
            Arc::new(db.clone()),
            Arc::new(db.clone()),
            Arc::new(SystemClock::new()),
        ));
        Ok(Self { db, contract })
    }

    /// The account the escrow holds funds under, which also scopes every
    /// signed invocation.
    fn instance(&self) -> Result<Principal> {
        match self.contract.config()? {
            Some(config) => Ok(config.escrow_account),
            None => bail!("escrow is not initialized; run `vouch-node init` first"),
        }
    }
}

fn load_key(path: &Path) -> Result<VouchKeypair> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read key file {}", path.display()))?;
    VouchKeypair::from_hex(&raw)
        .with_context(|| format!("key file {} is not a valid secret key", path.display()))
}

fn emit<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Writes a fresh secret key to the key file.
fn keygen(global: &GlobalArgs, force: bool) -> Result<()> {
    let key_path = global.key_path();
    if key_path.exists() && !force {
        bail!(
            "key file {} already exists; pass --force to replace it",
            key_path.display()
        );
    }
    if let Some(parent) = key_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    let keypair = VouchKeypair::generate();
    std::fs::write(&key_path, keypair.secret_key_hex())
        .with_context(|| format!("failed to write key to {}", key_path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600))?;
    }

    let principal = keypair.principal();
    tracing::info!(principal = %principal, key_path = %key_path.display(), "key generated");
    emit(&serde_json::json!({
        "principal": principal,
        "key_file": key_path.display().to_string(),
    }))
}

/// Runs one escrow call signed with the local key.
fn execute(global: &GlobalArgs, command: Commands) -> Result<()> {
    let node = Node::open(global)?;
    let contract = &node.contract;

    match command {
        Commands::Init(args) => {
            let key = load_key(&global.key_path())?;
            let config = match &args.config {
                Some(path) => EscrowConfig::load(path)
                    .with_context(|| format!("failed to load config {}", path.display()))?,
                None => EscrowConfig::single_admin(key.principal()),
            };
            let auth = SignedInvocation::sign(&calls::init(&config), &[&key]);
            contract.init(&auth, config.clone())?;
            emit(&config)?;
        }
        Commands::Mint(args) => {
            let balance = node.db.mint(&args.account, args.amount)?;
            emit(&serde_json::json!({ "account": args.account, "balance": balance }))?;
        }
        Commands::Lock(args) => {
            let (key, instance) = (load_key(&global.key_path())?, node.instance()?);
            let me = key.principal();
            let call = calls::lock_funds(
                &instance,
                &me,
                args.bounty_id,
                args.amount,
                args.deadline,
                args.claimant.as_ref(),
            );
            let auth = SignedInvocation::sign(&call, &[&key]);
            emit(&contract.lock_funds(
                &auth,
                &me,
                args.bounty_id,
                args.amount,
                args.deadline,
                args.claimant,
            )?)?;
        }
        Commands::Payout(args) => {
            let (key, instance) = (load_key(&global.key_path())?, node.instance()?);
            let me = key.principal();
            let call =
                calls::single_payout(&instance, &me, args.bounty_id, &args.recipient, args.amount);
            let auth = SignedInvocation::sign(&call, &[&key]);
            emit(&contract.single_payout(&auth, &me, args.bounty_id, &args.recipient, args.amount)?)?;
        }
        Commands::BatchPayout(args) => {
            let (key, instance) = (load_key(&global.key_path())?, node.instance()?);
            let me = key.principal();
            let (recipients, amounts): (Vec<Principal>, Vec<u64>) =
                args.payouts.into_iter().unzip();
            let call = calls::batch_payout(&instance, &me, args.bounty_id, &recipients, &amounts);
            let auth = SignedInvocation::sign(&call, &[&key]);
            emit(&contract.batch_payout(&auth, &me, args.bounty_id, &recipients, &amounts)?)?;
        }
        Commands::Refund(args) => {
            emit(&contract.refund(args.bounty_id)?)?;
        }
        Commands::ApproveRefund(args) => {
            let (key, instance) = (load_key(&global.key_path())?, node.instance()?);
            let me = key.principal();
            let call = calls::approve_refund(&instance, &me, args.bounty_id, args.amount);
            let auth = SignedInvocation::sign(&call, &[&key]);
            emit(&contract.approve_refund(&auth, &me, args.bounty_id, args.amount)?)?;
        }
        Commands::AuthorizeClaim(args) => {
            let (key, instance) = (load_key(&global.key_path())?, node.instance()?);
            let me = key.principal();
            let call = calls::authorize_claim(&instance, &me, args.bounty_id, &args.recipient);
            let auth = SignedInvocation::sign(&call, &[&key]);
            emit(&contract.authorize_claim(&auth, &me, args.bounty_id, &args.recipient)?)?;
        }
        Commands::Claim(args) => {
            let (key, instance) = (load_key(&global.key_path())?, node.instance()?);
            let me = key.principal();
            let auth = SignedInvocation::sign(&calls::claim(&instance, &me, args.bounty_id), &[&key]);
            emit(&contract.claim(&auth, &me, args.bounty_id)?)?;
        }
        Commands::CancelClaim(args) => {
            let (key, instance) = (load_key(&global.key_path())?, node.instance()?);
            let me = key.principal();
            let call = calls::cancel_pending_claim(&instance, &me, args.bounty_id);
            let auth = SignedInvocation::sign(&call, &[&key]);
            emit(&contract.cancel_pending_claim(&auth, &me, args.bounty_id)?)?;
        }
        Commands::Schedule(args) => {
            let (key, instance) = (load_key(&global.key_path())?, node.instance()?);
            let me = key.principal();
            let call = calls::create_release_schedule(
                &instance,
                &me,
                args.bounty_id,
                &args.recipient,
                args.amount,
                args.release_at,
            );
            let auth = SignedInvocation::sign(&call, &[&key]);
            emit(&contract.create_release_schedule(
                &auth,
                &me,
                args.bounty_id,
                &args.recipient,
                args.amount,
                args.release_at,
            )?)?;
        }
        Commands::Trigger(args) => {
            let (key, instance) = (load_key(&global.key_path())?, node.instance()?);
            let me = key.principal();
            let call = calls::trigger_scheduled_releases(&instance, &me, args.bounty_id);
            let auth = SignedInvocation::sign(&call, &[&key]);
            emit(&contract.trigger_scheduled_releases(&auth, &me, args.bounty_id)?)?;
        }
        Commands::Pause(args) => {
            let (key, instance) = (load_key(&global.key_path())?, node.instance()?);
            let me = key.principal();
            let call = calls::set_paused(&instance, &me, args.lock, args.release, args.refund);
            let auth = SignedInvocation::sign(&call, &[&key]);
            emit(&contract.set_paused(&auth, &me, args.lock, args.release, args.refund)?)?;
        }
        Commands::Fees(args) => {
            let (key, instance) = (load_key(&global.key_path())?, node.instance()?);
            let me = key.principal();
            let update = args.update();
            let call = calls::update_fee_config(&instance, &me, &update);
            let auth = SignedInvocation::sign(&call, &[&key]);
            emit(&contract.update_fee_config(&auth, &me, update)?)?;
        }
        Commands::Metadata(args) => {
            let (key, instance) = (load_key(&global.key_path())?, node.instance()?);
            let me = key.principal();
            let metadata = args.metadata();
            let call = calls::update_metadata(&instance, &me, args.bounty_id, &metadata);
            let auth = SignedInvocation::sign(&call, &[&key]);
            emit(&contract.update_metadata(&auth, &me, args.bounty_id, metadata)?)?;
        }
        Commands::ProposeUpgrade(args) => {
            let (key, instance) = (load_key(&global.key_path())?, node.instance()?);
            let me = key.principal();
            let code = args.code_ref()?;
            let auth = SignedInvocation::sign(&calls::propose_upgrade(&instance, &me, &code), &[&key]);
            let proposal_id = contract.propose_upgrade(&auth, &me, code)?;
            emit(&serde_json::json!({ "proposal_id": proposal_id }))?;
        }
        Commands::ApproveUpgrade(args) => {
            let (key, instance) = (load_key(&global.key_path())?, node.instance()?);
            let me = key.principal();
            let call = calls::approve_upgrade(&instance, &me, args.proposal_id);
            let auth = SignedInvocation::sign(&call, &[&key]);
            let approvals = contract.approve_upgrade(&auth, &me, args.proposal_id)?;
            emit(&serde_json::json!({
                "proposal_id": args.proposal_id,
                "approvals": approvals,
            }))?;
        }
        Commands::ExecuteUpgrade(args) => {
            let (key, instance) = (load_key(&global.key_path())?, node.instance()?);
            let me = key.principal();
            let call = calls::execute_upgrade(&instance, &me, args.proposal_id);
            let auth = SignedInvocation::sign(&call, &[&key]);
            emit(&contract.execute_upgrade(&auth, &me, args.proposal_id)?)?;
        }
        Commands::Migrate(args) => {
            let (key, instance) = (load_key(&global.key_path())?, node.instance()?);
            let me = key.principal();
            let call = calls::migrate(&instance, &me, args.target_version, &args.migration_hash);
            let auth = SignedInvocation::sign(&call, &[&key]);
            emit(&contract.migrate(&auth, &me, args.target_version, &args.migration_hash)?)?;
        }
        Commands::Info(args) => match args.bounty_id {
            Some(id) => match contract.get_info(id)? {
                Some(record) => emit(&serde_json::json!({
                    "record": record,
                    "refund_eligibility": contract.get_refund_eligibility(id)?,
                    "schedules": contract.get_release_schedules(id)?,
                    "metadata": contract.get_metadata(id)?,
                }))?,
                None => bail!("bounty {id} not found"),
            },
            None => emit(&serde_json::json!({
                "config": contract.config()?,
                "pause": contract.get_pause_flags()?,
                "fees": contract.get_fee_config()?,
                "upgrade": contract.get_upgrade_state()?,
                "migration": contract.get_migration_state()?,
                "stats": contract.get_aggregate_stats()?,
            }))?,
        },
        Commands::Events(args) => {
            emit(&contract.get_events(args.offset, args.limit)?)?;
        }
        other => bail!("{other:?} is not an escrow call"),
    }

    node.db.flush()?;
    Ok(())
}

/// Runs the release keeper until SIGINT or SIGTERM.
async fn run_keeper(global: &GlobalArgs, args: cli::RunArgs) -> Result<()> {
    let node = Node::open(global)?;
    let key = load_key(&global.key_path())?;
    node.instance()?;

    let interval = Duration::from_secs(args.interval.max(1));
    tracing::info!(
        data_dir = %global.data_dir.display(),
        principal = %key.principal(),
        interval_secs = interval.as_secs(),
        "starting vouch-node keeper"
    );

    let keeper = Arc::new(Keeper::new(Arc::clone(&node.contract), node.db.clone(), key));
    keeper.run(interval, shutdown_signal()).await;

    node.db.flush()?;
    tracing::info!("vouch-node stopped");
    Ok(())
}

fn print_version() {
    println!("vouch-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol   {}", PROTOCOL_VERSION);
    println!("contract   v{}", CONTRACT_VERSION);
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
}
