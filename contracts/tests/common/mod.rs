//! Shared fixtures for the escrow integration tests.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::sync::Arc;

use vouch_contracts::{EscrowContract, EscrowRecord};
use vouch_protocol::auth::MockAuth;
use vouch_protocol::clock::ManualClock;
use vouch_protocol::config::EscrowConfig;
use vouch_protocol::identity::Principal;
use vouch_protocol::ledger::{InMemoryLedger, TransferError, TransferReceipt, ValueTransfer};
use vouch_protocol::storage::MemoryStore;

pub const START: u64 = 1_700_000_000;
pub const FUNDS: u64 = 1_000_000;

pub fn p(name: &str) -> Principal {
    Principal::named(name)
}

pub fn admin() -> Principal {
    p("admin")
}

pub fn depositor() -> Principal {
    p("dora")
}

pub fn escrow_account() -> Principal {
    p("vouch-escrow")
}

pub struct Harness {
    pub contract: Arc<EscrowContract>,
    pub ledger: Arc<InMemoryLedger>,
    pub clock: Arc<ManualClock>,
    pub auth: MockAuth,
}

impl Harness {
    pub fn balance(&self, who: &Principal) -> u64 {
        self.ledger.balance(who).unwrap()
    }

    pub fn record(&self, bounty_id: u64) -> EscrowRecord {
        self.contract.get_info(bounty_id).unwrap().unwrap()
    }

    /// Lock `amount` from the depositor under `bounty_id`.
    pub fn lock(&self, bounty_id: u64, amount: u64, deadline: Option<u64>) -> EscrowRecord {
        self.contract
            .lock_funds(&self.auth, &depositor(), bounty_id, amount, deadline, None)
            .unwrap()
    }
}

/// Single-admin instance with a funded depositor.
pub fn harness() -> Harness {
    harness_with(EscrowConfig::single_admin(admin()))
}

pub fn harness_with(config: EscrowConfig) -> Harness {
    let ledger = Arc::new(InMemoryLedger::new());
    ledger.mint(&depositor(), FUNDS).unwrap();
    harness_on(config, ledger)
}

/// Instance over a caller-supplied ledger (already funded as needed).
pub fn harness_on(config: EscrowConfig, ledger: Arc<InMemoryLedger>) -> Harness {
    let clock = Arc::new(ManualClock::at(START));
    let contract = Arc::new(EscrowContract::new(
        Arc::new(MemoryStore::new()),
        ledger.clone(),
        clock.clone(),
    ));
    let auth = MockAuth::all();
    contract.init(&auth, config).unwrap();
    Harness {
        contract,
        ledger,
        clock,
        auth,
    }
}

/// Three signers, two approvals needed. The admin is not a signer.
pub fn multisig_config() -> EscrowConfig {
    EscrowConfig {
        signers: vec![p("sig-a"), p("sig-b"), p("sig-c")],
        threshold: 2,
        ..EscrowConfig::single_admin(admin())
    }
}

// ---------------------------------------------------------------------------
// Hooked ledger
// ---------------------------------------------------------------------------

pub type TransferHook =
    Arc<dyn Fn(&Principal, &Principal, u64) -> Result<(), TransferError> + Send + Sync>;

/// An in-memory ledger that runs a callback before every transfer, the way
/// a recipient contract with a receive hook would.
#[derive(Default)]
pub struct HookedLedger {
    pub inner: InMemoryLedger,
    hook: Mutex<Option<TransferHook>>,
}

impl HookedLedger {
    pub fn set_hook(&self, hook: TransferHook) {
        *self.hook.lock() = Some(hook);
    }

    pub fn clear_hook(&self) {
        *self.hook.lock() = None;
    }
}

impl ValueTransfer for HookedLedger {
    fn transfer(
        &self,
        from: &Principal,
        to: &Principal,
        amount: u64,
    ) -> Result<TransferReceipt, TransferError> {
        // Clone out so the hook can call back into the ledger.
        let hook = self.hook.lock().clone();
        if let Some(hook) = hook {
            hook(from, to, amount)?;
        }
        self.inner.transfer(from, to, amount)
    }

    fn revert(&self, receipt: &TransferReceipt) -> Result<(), TransferError> {
        self.inner.revert(receipt)
    }

    fn balance(&self, account: &Principal) -> Result<u64, TransferError> {
        self.inner.balance(account)
    }
}

pub struct HookedHarness {
    pub contract: Arc<EscrowContract>,
    pub ledger: Arc<HookedLedger>,
    pub clock: Arc<ManualClock>,
    pub auth: MockAuth,
}

pub fn hooked_harness() -> HookedHarness {
    let ledger = Arc::new(HookedLedger::default());
    ledger.inner.mint(&depositor(), FUNDS).unwrap();
    let clock = Arc::new(ManualClock::at(START));
    let contract = Arc::new(EscrowContract::new(
        Arc::new(MemoryStore::new()),
        ledger.clone(),
        clock.clone(),
    ));
    let auth = MockAuth::all();
    contract
        .init(&auth, EscrowConfig::single_admin(admin()))
        .unwrap();
    HookedHarness {
        contract,
        ledger,
        clock,
        auth,
    }
}
