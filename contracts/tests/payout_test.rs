//! Integration tests for the payout engine.
//!
//! Sequential and batch payouts against one escrow, and the all-or-nothing
//! guarantee when a transfer fails halfway through a batch.

mod common;

use std::sync::Arc;

use common::*;
use vouch_contracts::{EscrowError, EscrowStatus};
use vouch_protocol::config::MAX_BATCH_SIZE;
use vouch_protocol::identity::Principal;
use vouch_protocol::ledger::{TransferError, ValueTransfer};

// ---------------------------------------------------------------------------
// Single payouts
// ---------------------------------------------------------------------------

#[test]
fn second_payout_exceeding_remainder_fails_cleanly() {
    let h = harness();
    h.lock(1, 100, None);

    let record = h
        .contract
        .single_payout(&h.auth, &admin(), 1, &p("alice"), 60)
        .unwrap();
    assert_eq!(record.remaining_amount, 40);

    let err = h
        .contract
        .single_payout(&h.auth, &admin(), 1, &p("bob"), 60)
        .unwrap_err();
    assert_eq!(
        err,
        EscrowError::InsufficientFunds {
            requested: 60,
            available: 40
        }
    );
    let record = h.record(1);
    assert_eq!(record.remaining_amount, 40);
    assert_eq!(record.status, EscrowStatus::Locked);
    assert_eq!(record.payout_history.len(), 1);
    assert_eq!(h.balance(&p("bob")), 0);
}

#[test]
fn zero_payout_rejected() {
    let h = harness();
    h.lock(1, 100, None);
    assert_eq!(
        h.contract
            .single_payout(&h.auth, &admin(), 1, &p("alice"), 0)
            .unwrap_err(),
        EscrowError::InvalidAmount
    );
}

#[test]
fn payout_to_escrow_account_rejected() {
    let h = harness();
    h.lock(1, 100, None);
    let err = h
        .contract
        .single_payout(&h.auth, &admin(), 1, &escrow_account(), 10)
        .unwrap_err();
    assert!(matches!(err, EscrowError::InvalidAddress(_)));
}

// ---------------------------------------------------------------------------
// Batch payouts
// ---------------------------------------------------------------------------

#[test]
fn batch_then_overdrawn_batch() {
    let h = harness();
    h.lock(1, 200, None);

    let record = h
        .contract
        .batch_payout(&h.auth, &admin(), 1, &[p("a"), p("b")], &[100, 50])
        .unwrap();
    assert_eq!(record.remaining_amount, 50);
    assert_eq!(h.balance(&p("a")), 100);
    assert_eq!(h.balance(&p("b")), 50);

    let err = h
        .contract
        .batch_payout(&h.auth, &admin(), 1, &[p("c"), p("d")], &[30, 30])
        .unwrap_err();
    assert_eq!(
        err,
        EscrowError::InsufficientFunds {
            requested: 60,
            available: 50
        }
    );
    assert_eq!(h.contract.get_payout_history(1).unwrap().len(), 2);
    assert_eq!(h.balance(&p("c")), 0);
}

#[test]
fn batch_exhausting_remainder_releases() {
    let h = harness();
    h.lock(1, 90, None);
    let record = h
        .contract
        .batch_payout(&h.auth, &admin(), 1, &[p("a"), p("b"), p("c")], &[30, 30, 30])
        .unwrap();
    assert_eq!(record.status, EscrowStatus::Released);
    assert!(h.contract.verify_state(1).unwrap());
}

#[test]
fn batch_shape_errors() {
    let h = harness();
    h.lock(1, 100, None);
    assert_eq!(
        h.contract
            .batch_payout(&h.auth, &admin(), 1, &[], &[])
            .unwrap_err(),
        EscrowError::EmptyBatch
    );
    assert_eq!(
        h.contract
            .batch_payout(&h.auth, &admin(), 1, &[p("a")], &[1, 2])
            .unwrap_err(),
        EscrowError::LengthMismatch {
            recipients: 1,
            amounts: 2
        }
    );
    assert_eq!(
        h.contract
            .batch_payout(&h.auth, &admin(), 1, &[p("a"), p("b")], &[1, 0])
            .unwrap_err(),
        EscrowError::InvalidAmount
    );
}

#[test]
fn batch_size_is_capped() {
    let h = harness();
    h.lock(1, 10_000, None);
    let n = MAX_BATCH_SIZE + 1;
    let recipients: Vec<Principal> = (0..n).map(|i| p(&format!("r{i}"))).collect();
    let err = h
        .contract
        .batch_payout(&h.auth, &admin(), 1, &recipients, &vec![1; n])
        .unwrap_err();
    assert_eq!(err, EscrowError::InvalidBatchSize(n));

    let record = h
        .contract
        .batch_payout(
            &h.auth,
            &admin(),
            1,
            &recipients[..MAX_BATCH_SIZE],
            &vec![1; MAX_BATCH_SIZE],
        )
        .unwrap();
    assert_eq!(record.payout_history.len(), MAX_BATCH_SIZE);
}

#[test]
fn failing_transfer_mid_batch_credits_nobody() {
    let h = hooked_harness();
    h.contract
        .lock_funds(&h.auth, &depositor(), 1, 300, None, None)
        .unwrap();
    h.ledger.set_hook(Arc::new(|_: &Principal, to: &Principal, _: u64| {
        if to.as_str() == "blackhole" {
            Err(TransferError::Rejected("recipient refuses funds".into()))
        } else {
            Ok(())
        }
    }));

    let err = h
        .contract
        .batch_payout(
            &h.auth,
            &admin(),
            1,
            &[p("a"), p("b"), p("blackhole")],
            &[100, 50, 25],
        )
        .unwrap_err();
    assert!(matches!(err, EscrowError::Transfer(TransferError::Rejected(_))));

    assert_eq!(h.ledger.balance(&p("a")).unwrap(), 0);
    assert_eq!(h.ledger.balance(&p("b")).unwrap(), 0);
    assert_eq!(h.ledger.balance(&escrow_account()).unwrap(), 300);
    let record = h.contract.get_info(1).unwrap().unwrap();
    assert_eq!(record.remaining_amount, 300);
    assert!(record.payout_history.is_empty());
}
