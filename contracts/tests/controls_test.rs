//! Integration tests for operator controls.
//!
//! Pause gates, lock and release fees, bounty metadata, and the filtered
//! history queries.

mod common;

use common::*;
use vouch_contracts::fees::MAX_FEE_RATE;
use vouch_contracts::{
    BountyMetadata, EscrowError, EscrowEvent, EscrowStatus, FeeKind, FeeUpdate, PauseFlags,
    PauseGate,
};

fn treasury() -> vouch_protocol::identity::Principal {
    p("treasury")
}

/// 2% on deposits, 5% on payouts, paid to the treasury.
fn enable_fees(h: &Harness) {
    h.contract
        .update_fee_config(
            &h.auth,
            &admin(),
            FeeUpdate {
                lock_fee_rate: Some(200),
                release_fee_rate: Some(500),
                fee_recipient: Some(treasury()),
                fee_enabled: Some(true),
            },
        )
        .unwrap();
}

// ---------------------------------------------------------------------------
// Pause gates
// ---------------------------------------------------------------------------

#[test]
fn gates_start_open() {
    let h = harness();
    let flags = h.contract.get_pause_flags().unwrap();
    assert!(!flags.lock_paused);
    assert!(!flags.release_paused);
    assert!(!flags.refund_paused);
}

#[test]
fn paused_lock_rejects_deposits_until_reopened() {
    let h = harness();
    h.lock(1, 100, Some(0));
    let flags = h
        .contract
        .set_paused(&h.auth, &admin(), Some(true), None, None)
        .unwrap();
    assert!(flags.lock_paused);

    let err = h
        .contract
        .lock_funds(&h.auth, &depositor(), 2, 100, Some(0), None)
        .unwrap_err();
    assert_eq!(err, EscrowError::Paused(PauseGate::Lock));
    assert_eq!(h.contract.get_info(2).unwrap(), None);
    assert_eq!(h.balance(&depositor()), FUNDS - 100);

    // Other gates are unaffected.
    h.contract
        .single_payout(&h.auth, &admin(), 1, &p("alice"), 10)
        .unwrap();

    h.contract
        .set_paused(&h.auth, &admin(), Some(false), None, None)
        .unwrap();
    h.lock(2, 100, Some(0));
}

#[test]
fn paused_release_stops_every_way_out_to_recipients() {
    let h = harness();
    h.lock(1, 100, Some(0));
    h.contract
        .create_release_schedule(&h.auth, &admin(), 1, &p("carol"), 10, START)
        .unwrap();
    h.contract
        .authorize_claim(&h.auth, &admin(), 1, &p("bob"))
        .unwrap();
    h.contract
        .set_paused(&h.auth, &admin(), None, Some(true), None)
        .unwrap();

    let paused = EscrowError::Paused(PauseGate::Release);
    assert_eq!(
        h.contract
            .single_payout(&h.auth, &admin(), 1, &p("alice"), 10)
            .unwrap_err(),
        paused
    );
    assert_eq!(
        h.contract
            .batch_payout(&h.auth, &admin(), 1, &[p("alice")], &[10])
            .unwrap_err(),
        paused
    );
    assert_eq!(h.contract.claim(&h.auth, &p("bob"), 1).unwrap_err(), paused);
    assert_eq!(
        h.contract
            .trigger_scheduled_releases(&h.auth, &admin(), 1)
            .unwrap_err(),
        paused
    );
    assert_eq!(h.record(1).remaining_amount, 100);

    h.contract
        .set_paused(&h.auth, &admin(), None, Some(false), None)
        .unwrap();
    assert_eq!(
        h.contract
            .claim(&h.auth, &p("bob"), 1)
            .unwrap()
            .status,
        EscrowStatus::Released
    );
}

#[test]
fn paused_refund_holds_funds() {
    let h = harness();
    h.lock(1, 100, Some(0));
    h.contract
        .set_paused(&h.auth, &admin(), None, None, Some(true))
        .unwrap();
    assert_eq!(
        h.contract.refund(1).unwrap_err(),
        EscrowError::Paused(PauseGate::Refund)
    );
    assert_eq!(h.balance(&escrow_account()), 100);

    h.contract
        .set_paused(&h.auth, &admin(), None, None, Some(false))
        .unwrap();
    assert_eq!(h.contract.refund(1).unwrap().status, EscrowStatus::Refunded);
}

#[test]
fn only_admin_pauses() {
    let h = harness();
    let err = h
        .contract
        .set_paused(&h.auth, &p("mallory"), Some(true), Some(true), Some(true))
        .unwrap_err();
    assert!(matches!(err, EscrowError::Unauthorized(_)));
    assert_eq!(h.contract.get_pause_flags().unwrap(), PauseFlags::default());
}

// ---------------------------------------------------------------------------
// Fees
// ---------------------------------------------------------------------------

#[test]
fn fees_start_disabled() {
    let h = harness();
    let fees = h.contract.get_fee_config().unwrap().unwrap();
    assert!(!fees.fee_enabled);
    assert_eq!(fees.fee_recipient, admin());

    h.lock(1, 1_000, Some(0));
    assert_eq!(h.record(1).total_amount, 1_000);
    assert!(h.record(1).fee_history.is_empty());
}

#[test]
fn lock_fee_comes_out_of_the_deposit() {
    let h = harness();
    enable_fees(&h);
    let record = h.lock(1, 1_000, Some(0));

    assert_eq!(record.total_amount, 980);
    assert_eq!(record.remaining_amount, 980);
    assert_eq!(record.fee_history.len(), 1);
    assert_eq!(record.fee_history[0].kind, FeeKind::Lock);
    assert_eq!(h.balance(&depositor()), FUNDS - 1_000);
    assert_eq!(h.balance(&escrow_account()), 980);
    assert_eq!(h.balance(&treasury()), 20);
    assert!(h.contract.verify_state(1).unwrap());
}

#[test]
fn release_fee_comes_out_of_each_payout() {
    let h = harness();
    enable_fees(&h);
    h.lock(1, 1_000, Some(0));

    let record = h
        .contract
        .single_payout(&h.auth, &admin(), 1, &p("alice"), 100)
        .unwrap();
    assert_eq!(record.remaining_amount, 880);
    assert_eq!(record.payout_history[0].amount, 100);
    assert_eq!(record.payout_history[0].fee, 5);
    assert_eq!(h.balance(&p("alice")), 95);

    h.contract
        .batch_payout(&h.auth, &admin(), 1, &[p("bob"), p("carol")], &[200, 100])
        .unwrap();
    assert_eq!(h.balance(&p("bob")), 190);
    assert_eq!(h.balance(&p("carol")), 95);
    assert_eq!(h.balance(&treasury()), 20 + 5 + 10 + 5);
    assert_eq!(h.balance(&escrow_account()), 580);
    assert_eq!(h.record(1).remaining_amount, 580);
    assert!(h.contract.verify_state(1).unwrap());

    // Refunds are not charged.
    h.contract.refund(1).unwrap();
    assert_eq!(h.balance(&depositor()), FUNDS - 1_000 + 580);
    assert_eq!(h.contract.get_aggregate_stats().unwrap().total_fees, 40);

    assert!(h
        .contract
        .get_events(0, 0)
        .unwrap()
        .iter()
        .any(|e| e.event
            == EscrowEvent::FeeCollected {
                bounty_id: 1,
                kind: FeeKind::Release,
                recipient: treasury(),
                amount: 10,
            }));
}

#[test]
fn claims_and_schedules_pay_release_fees() {
    let h = harness();
    enable_fees(&h);
    h.lock(1, 1_000, Some(0));
    h.contract
        .create_release_schedule(&h.auth, &admin(), 1, &p("carol"), 400, START)
        .unwrap();
    h.contract
        .trigger_scheduled_releases(&h.auth, &admin(), 1)
        .unwrap();
    assert_eq!(h.balance(&p("carol")), 380);

    h.contract
        .authorize_claim(&h.auth, &admin(), 1, &p("bob"))
        .unwrap();
    let record = h.contract.claim(&h.auth, &p("bob"), 1).unwrap();
    assert_eq!(record.status, EscrowStatus::Released);
    assert_eq!(h.balance(&p("bob")), 580 - 29);
    assert_eq!(h.balance(&escrow_account()), 0);
    assert_eq!(h.balance(&treasury()), 20 + 20 + 29);
    assert!(h.contract.verify_state(1).unwrap());
}

#[test]
fn fee_rates_are_validated() {
    let h = harness();
    let err = h
        .contract
        .update_fee_config(
            &h.auth,
            &admin(),
            FeeUpdate {
                lock_fee_rate: Some(MAX_FEE_RATE + 1),
                ..FeeUpdate::default()
            },
        )
        .unwrap_err();
    assert_eq!(err, EscrowError::InvalidFeeRate(MAX_FEE_RATE + 1));

    let err = h
        .contract
        .update_fee_config(
            &h.auth,
            &admin(),
            FeeUpdate {
                fee_recipient: Some(escrow_account()),
                ..FeeUpdate::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, EscrowError::InvalidAddress(_)));

    let fees = h.contract.get_fee_config().unwrap().unwrap();
    assert_eq!(fees.lock_fee_rate, 0);
    assert_eq!(fees.fee_recipient, admin());

    let fees = h
        .contract
        .update_fee_config(
            &h.auth,
            &admin(),
            FeeUpdate {
                release_fee_rate: Some(MAX_FEE_RATE),
                ..FeeUpdate::default()
            },
        )
        .unwrap();
    assert_eq!(fees.release_fee_rate, MAX_FEE_RATE);
    assert!(!fees.fee_enabled);
}

#[test]
fn only_admin_changes_fees() {
    let h = harness();
    let err = h
        .contract
        .update_fee_config(
            &h.auth,
            &p("mallory"),
            FeeUpdate {
                fee_enabled: Some(true),
                ..FeeUpdate::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, EscrowError::Unauthorized(_)));
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

fn metadata() -> BountyMetadata {
    BountyMetadata {
        repo_id: 12345,
        issue_id: 67890,
        bounty_type: "bug".into(),
    }
}

#[test]
fn metadata_is_stored_and_outlives_the_escrow() {
    let h = harness();
    assert_eq!(h.contract.get_metadata(1).unwrap(), None);

    // May be set before anything is locked.
    h.contract
        .update_metadata(&h.auth, &admin(), 1, metadata())
        .unwrap();
    h.lock(1, 100, Some(0));
    h.contract.refund(1).unwrap();
    assert_eq!(h.contract.get_metadata(1).unwrap(), Some(metadata()));

    let retagged = BountyMetadata {
        bounty_type: "feature".into(),
        ..metadata()
    };
    h.contract
        .update_metadata(&h.auth, &admin(), 1, retagged.clone())
        .unwrap();
    assert_eq!(h.contract.get_metadata(1).unwrap(), Some(retagged));
}

#[test]
fn metadata_is_admin_only_and_validated() {
    let h = harness();
    assert!(matches!(
        h.contract
            .update_metadata(&h.auth, &p("mallory"), 1, metadata())
            .unwrap_err(),
        EscrowError::Unauthorized(_)
    ));
    let blank = BountyMetadata {
        bounty_type: String::new(),
        ..metadata()
    };
    assert!(matches!(
        h.contract
            .update_metadata(&h.auth, &admin(), 1, blank)
            .unwrap_err(),
        EscrowError::InvalidMetadata(_)
    ));
    assert_eq!(h.contract.get_metadata(1).unwrap(), None);
}

// ---------------------------------------------------------------------------
// Filtered queries
// ---------------------------------------------------------------------------

fn three_payouts(h: &Harness) {
    h.lock(1, 1_000, Some(0));
    for (i, amount) in [100, 200, 300].into_iter().enumerate() {
        h.clock.set(START + 10 * i as u64);
        h.contract
            .single_payout(&h.auth, &admin(), 1, &p("alice"), amount)
            .unwrap();
    }
}

#[test]
fn payouts_filter_by_amount_inclusively() {
    let h = harness();
    three_payouts(&h);
    let hits = h
        .contract
        .query_payouts_by_amount(1, 200, 300, 0, 0)
        .unwrap();
    assert_eq!(
        hits.iter().map(|e| e.amount).collect::<Vec<_>>(),
        vec![200, 300]
    );
    assert!(h
        .contract
        .query_payouts_by_amount(1, 5_000, 9_999, 0, 0)
        .unwrap()
        .is_empty());
    let second_page = h
        .contract
        .query_payouts_by_amount(1, 0, u64::MAX, 1, 1)
        .unwrap();
    assert_eq!(second_page[0].amount, 200);
}

#[test]
fn payouts_filter_by_timestamp_inclusively() {
    let h = harness();
    three_payouts(&h);
    let hits = h
        .contract
        .query_payouts_by_timestamp(1, START + 10, START + 20, 0, 0)
        .unwrap();
    assert_eq!(
        hits.iter().map(|e| e.timestamp).collect::<Vec<_>>(),
        vec![START + 10, START + 20]
    );
    assert!(h
        .contract
        .query_payouts_by_timestamp(1, START + 21, u64::MAX, 0, 0)
        .unwrap()
        .is_empty());
}

#[test]
fn schedules_filter_by_status() {
    let h = harness();
    h.lock(1, 100, Some(0));
    h.contract
        .create_release_schedule(&h.auth, &admin(), 1, &p("alice"), 30, START)
        .unwrap();
    h.contract
        .create_release_schedule(&h.auth, &admin(), 1, &p("bob"), 20, START + 60)
        .unwrap();
    h.contract
        .trigger_scheduled_releases(&h.auth, &admin(), 1)
        .unwrap();

    let released = h
        .contract
        .query_schedules_by_status(1, true, 0, 0)
        .unwrap();
    assert_eq!(released.len(), 1);
    assert_eq!(released[0].recipient, p("alice"));

    let pending = h
        .contract
        .query_schedules_by_status(1, false, 0, 0)
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].recipient, p("bob"));
}
