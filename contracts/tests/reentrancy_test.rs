//! Integration tests for reentrancy protection and call serialization.
//!
//! A hooked ledger calls back into the contract from inside a transfer, the
//! way a malicious recipient would. Separately, threads race payouts against
//! one escrow to check that exactly the affordable ones win.

mod common;

use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::thread;

use common::*;
use vouch_contracts::{EscrowContract, EscrowError};
use vouch_protocol::auth::MockAuth;
use vouch_protocol::identity::Principal;
use vouch_protocol::ledger::TransferError;

/// Install a hook that, when paying `attacker`, re-enters the contract via
/// `reenter` and records what the inner call returned. The outer transfer
/// fails if the inner call did.
fn arm<F>(h: &HookedHarness, reenter: F) -> Arc<Mutex<Vec<EscrowError>>>
where
    F: Fn(&EscrowContract) -> Result<(), EscrowError> + Send + Sync + 'static,
{
    let seen = Arc::new(Mutex::new(Vec::new()));
    let contract: Weak<EscrowContract> = Arc::downgrade(&h.contract);
    let log = seen.clone();
    h.ledger.set_hook(Arc::new(move |_: &Principal, to: &Principal, _: u64| {
        if to.as_str() != "attacker" {
            return Ok(());
        }
        let Some(contract) = contract.upgrade() else {
            return Ok(());
        };
        match reenter(&contract) {
            Ok(()) => Ok(()),
            Err(e) => {
                log.lock().push(e.clone());
                Err(TransferError::Rejected(e.to_string()))
            }
        }
    }));
    seen
}

// ---------------------------------------------------------------------------
// Reentrancy
// ---------------------------------------------------------------------------

#[test]
fn reentrant_payout_is_rejected_and_rolled_back() {
    let h = hooked_harness();
    h.contract
        .lock_funds(&h.auth, &depositor(), 1, 100, Some(0), None)
        .unwrap();
    let before = h.contract.get_info(1).unwrap().unwrap();

    let seen = arm(&h, |c| {
        c.single_payout(&MockAuth::all(), &admin(), 1, &p("attacker"), 10)
            .map(|_| ())
    });

    let err = h
        .contract
        .single_payout(&h.auth, &admin(), 1, &p("attacker"), 10)
        .unwrap_err();
    assert!(matches!(err, EscrowError::Transfer(TransferError::Rejected(_))));
    assert_eq!(seen.lock().as_slice(), &[EscrowError::ReentrancyDetected]);

    let after = h.contract.get_info(1).unwrap().unwrap();
    assert_eq!(
        serde_json::to_vec(&after).unwrap(),
        serde_json::to_vec(&before).unwrap()
    );
    assert!(!h.contract.reentrancy_entered());

    // An ordinary call afterwards goes through.
    h.ledger.clear_hook();
    let record = h
        .contract
        .single_payout(&h.auth, &admin(), 1, &p("alice"), 10)
        .unwrap();
    assert_eq!(record.remaining_amount, 90);
}

#[test]
fn cross_function_reentry_is_rejected() {
    let h = hooked_harness();
    h.contract
        .lock_funds(&h.auth, &depositor(), 1, 100, Some(0), None)
        .unwrap();
    let seen = arm(&h, |c| c.refund(1).map(|_| ()));

    assert!(h
        .contract
        .single_payout(&h.auth, &admin(), 1, &p("attacker"), 10)
        .is_err());
    assert_eq!(seen.lock().as_slice(), &[EscrowError::ReentrancyDetected]);
    assert_eq!(h.ledger.inner.total_supply(), u128::from(FUNDS));
    assert_eq!(h.contract.get_info(1).unwrap().unwrap().remaining_amount, 100);
}

#[test]
fn reentry_from_batch_and_schedules_is_rejected() {
    let h = hooked_harness();
    h.contract
        .lock_funds(&h.auth, &depositor(), 1, 100, None, None)
        .unwrap();
    h.contract
        .create_release_schedule(&h.auth, &admin(), 1, &p("attacker"), 10, START)
        .unwrap();
    let seen = arm(&h, |c| {
        c.batch_payout(&MockAuth::all(), &admin(), 1, &[p("attacker")], &[5])
            .map(|_| ())
    });

    assert!(h
        .contract
        .trigger_scheduled_releases(&h.auth, &admin(), 1)
        .is_err());
    assert_eq!(seen.lock().as_slice(), &[EscrowError::ReentrancyDetected]);
    assert_eq!(h.contract.get_pending_schedules(1).unwrap().len(), 1);
}

#[test]
fn queries_are_allowed_from_callbacks() {
    let h = hooked_harness();
    h.contract
        .lock_funds(&h.auth, &depositor(), 1, 100, Some(0), None)
        .unwrap();
    let seen = arm(&h, |c| {
        assert!(c.reentrancy_entered());
        // The callback sees committed state, not the in-flight payout.
        assert_eq!(c.get_info(1)?.map(|r| r.remaining_amount), Some(100));
        Ok(())
    });

    h.contract
        .single_payout(&h.auth, &admin(), 1, &p("attacker"), 10)
        .unwrap();
    assert!(seen.lock().is_empty());
    assert!(!h.contract.reentrancy_entered());
}

// ---------------------------------------------------------------------------
// Serialization across threads
// ---------------------------------------------------------------------------

#[test]
fn racing_payouts_apply_exactly_the_affordable_ones() {
    let h = harness();
    h.lock(1, 100, None);

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let contract = h.contract.clone();
            thread::spawn(move || {
                contract.single_payout(&MockAuth::all(), &admin(), 1, &p(&format!("r{i}")), 30)
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|t| t.join().unwrap()).collect();

    let wins = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(wins, 3);
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert_eq!(
            *err,
            EscrowError::InsufficientFunds {
                requested: 30,
                available: 10
            }
        );
    }
    assert_eq!(h.record(1).remaining_amount, 10);
    assert_eq!(h.balance(&escrow_account()), 10);
}

#[test]
fn racing_refund_and_payout_one_wins() {
    let h = harness();
    h.lock(1, 100, Some(0));

    let payer = {
        let contract = h.contract.clone();
        thread::spawn(move || {
            contract
                .single_payout(&MockAuth::all(), &admin(), 1, &p("alice"), 100)
                .map(|r| r.status)
        })
    };
    let refunder = {
        let contract = h.contract.clone();
        thread::spawn(move || contract.refund(1).map(|r| r.status))
    };
    let a = payer.join().unwrap();
    let b = refunder.join().unwrap();

    assert!(a.is_ok() ^ b.is_ok());
    let loser = if a.is_ok() { b } else { a };
    assert_eq!(loser.unwrap_err(), EscrowError::FundsNotLocked(1));
    assert!(h.contract.verify_state(1).unwrap());
}
