//! # Release Keeper
//!
//! Scheduled releases only move when someone triggers them. The keeper is
//! that someone: on a fixed interval it walks every active bounty, and for
//! each one with due schedules submits a signed `trigger_scheduled_releases`
//! call with the node's key.
//!
//! A failed trigger (insufficient funds, an unauthorized key) is logged and
//! skipped. The bounty is retried on the next sweep.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use vouch_contracts::{calls, EscrowContract, EscrowError};
use vouch_protocol::auth::SignedInvocation;
use vouch_protocol::crypto::VouchKeypair;
use vouch_protocol::storage::VouchDb;

/// Metadata key for the most recent sweep.
pub const LAST_RUN_KEY: &str = "keeper/last_run";

/// Summary of one sweep, persisted under [`LAST_RUN_KEY`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeeperRun {
    pub finished_at: String,
    pub bounties_checked: usize,
    pub released: usize,
    pub failed: usize,
}

pub struct Keeper {
    contract: Arc<EscrowContract>,
    db: VouchDb,
    key: VouchKeypair,
}

impl Keeper {
    pub fn new(contract: Arc<EscrowContract>, db: VouchDb, key: VouchKeypair) -> Self {
        Self { contract, db, key }
    }

    /// One pass over the active bounties.
    pub fn sweep(&self) -> Result<KeeperRun, EscrowError> {
        let mut run = KeeperRun {
            finished_at: String::new(),
            bounties_checked: 0,
            released: 0,
            failed: 0,
        };

        let Some(config) = self.contract.config()? else {
            debug!("escrow not initialized, nothing to release");
            return Ok(run);
        };
        let caller = self.key.principal();

        for record in self.contract.list_bounties()? {
            if !record.status.is_active() {
                continue;
            }
            run.bounties_checked += 1;
            let bounty_id = record.bounty_id;
            if self.contract.get_due_schedules(bounty_id)?.is_empty() {
                continue;
            }

            let call =
                calls::trigger_scheduled_releases(&config.escrow_account, &caller, bounty_id);
            let auth = SignedInvocation::sign(&call, &[&self.key]);
            match self
                .contract
                .trigger_scheduled_releases(&auth, &caller, bounty_id)
            {
                Ok(entries) => {
                    info!(bounty_id, released = entries.len(), "keeper released schedules");
                    run.released += entries.len();
                }
                Err(e) => {
                    warn!(bounty_id, error = %e, "keeper trigger failed");
                    run.failed += 1;
                }
            }
        }

        run.finished_at = chrono::Utc::now().to_rfc3339();
        self.db.put_meta(LAST_RUN_KEY, &run)?;
        Ok(run)
    }

    /// Sweep every `interval` until `shutdown` resolves.
    ///
    /// Sweeps run on the blocking pool since sled calls block.
    pub async fn run<F>(self: Arc<Self>, interval: Duration, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let keeper = Arc::clone(&self);
                    match tokio::task::spawn_blocking(move || keeper.sweep()).await {
                        Ok(Ok(run)) => debug!(
                            checked = run.bounties_checked,
                            released = run.released,
                            failed = run.failed,
                            "keeper sweep done"
                        ),
                        Ok(Err(e)) => error!(error = %e, "keeper sweep failed"),
                        Err(e) => error!(error = %e, "keeper task panicked"),
                    }
                }
                _ = &mut shutdown => {
                    info!("keeper stopping");
                    break;
                }
            }
        }
    }
}
