//! Integration tests for the host primitives.
//!
//! These tests combine the pieces an escrow host is built from: a key file
//! on disk, a configuration file, signed invocations, and the sled-backed
//! database acting as both state store and ledger.
//!
//! Each test owns its temporary directory. No shared state between tests.

use vouch_protocol::auth::{AuthContext, Invocation, SignedInvocation};
use vouch_protocol::config::{ConfigError, EscrowConfig};
use vouch_protocol::crypto::VouchKeypair;
use vouch_protocol::identity::Principal;
use vouch_protocol::ledger::ValueTransfer;
use vouch_protocol::storage::{StateStore, StoreExt, VouchDb, WriteBatch};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

fn write(dir: &tempfile::TempDir, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, contents).expect("write fixture");
    path
}

// ---------------------------------------------------------------------------
// Keys and configuration
// ---------------------------------------------------------------------------

#[test]
fn key_file_roundtrip_preserves_principal() {
    let dir = tempfile::tempdir().unwrap();
    let kp = VouchKeypair::generate();
    let path = write(&dir, "node.key", &format!("{}\n", kp.secret_key_hex()));

    let raw = std::fs::read_to_string(path).unwrap();
    let loaded = VouchKeypair::from_hex(&raw).unwrap();
    assert_eq!(loaded.principal(), kp.principal());
}

#[test]
fn config_file_with_multisig() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(
        &dir,
        "escrow.json",
        r#"{
            "admin": "ops",
            "signers": ["sig-a", "sig-b", "sig-c"],
            "threshold": 2
        }"#,
    );
    let config = EscrowConfig::load(path).unwrap();
    assert_eq!(config.threshold, 2);
    assert!(config.is_signer(&Principal::named("sig-b")));
    assert!(!config.is_signer(&Principal::named("ops")));
    assert_eq!(config.escrow_account, Principal::named("vouch-escrow"));
}

#[test]
fn config_file_threshold_above_signers() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(
        &dir,
        "escrow.json",
        r#"{ "admin": "ops", "signers": ["a", "a"], "threshold": 2 }"#,
    );
    assert!(matches!(
        EscrowConfig::load(path),
        Err(ConfigError::InvalidThreshold {
            threshold: 2,
            signers: 1
        })
    ));
}

#[test]
fn missing_config_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        EscrowConfig::load(dir.path().join("nope.json")),
        Err(ConfigError::Io(_))
    ));
}

// ---------------------------------------------------------------------------
// Signed invocations
// ---------------------------------------------------------------------------

#[test]
fn cosigned_invocation_authorizes_each_signer() {
    let a = VouchKeypair::from_seed(&[7u8; 32]);
    let b = VouchKeypair::from_seed(&[8u8; 32]);
    let instance = Principal::named("vouch-escrow");
    let inv = Invocation::new(&instance, "approve_upgrade")
        .arg_principal(&a.principal())
        .arg_u64(1);

    let signed = SignedInvocation::sign(&inv, &[&a, &b]);
    assert!(signed.require_auth(&a.principal(), &inv).is_ok());
    assert!(signed.require_auth(&b.principal(), &inv).is_ok());
    assert!(signed
        .require_auth(&Principal::named("vouch-escrow"), &inv)
        .is_err());
    assert_eq!(signed.signers().len(), 2);
}

// ---------------------------------------------------------------------------
// Database as store and ledger
// ---------------------------------------------------------------------------

#[test]
fn state_and_balances_persist_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let alice = Principal::named("alice");
    let escrow = Principal::named("vouch-escrow");
    {
        let db = VouchDb::open(dir.path()).unwrap();
        db.mint(&alice, 1_000).unwrap();
        db.transfer(&alice, &escrow, 400).unwrap();

        let mut batch = WriteBatch::new();
        batch.put_json("escrow/00000000000000000001", &400u64).unwrap();
        db.apply(batch).unwrap();
        db.flush().unwrap();
    }

    let db = VouchDb::open(dir.path()).unwrap();
    assert_eq!(db.balance(&alice).unwrap(), 600);
    assert_eq!(db.balance(&escrow).unwrap(), 400);
    assert_eq!(
        db.get_json::<u64>(b"escrow/00000000000000000001").unwrap(),
        Some(400)
    );
}

#[test]
fn reverted_transfers_restore_both_sides() {
    let db = VouchDb::open_temporary().unwrap();
    let escrow = Principal::named("vouch-escrow");
    db.mint(&escrow, 300).unwrap();

    let receipts: Vec<_> = ["a", "b", "c"]
        .iter()
        .map(|r| db.transfer(&escrow, &Principal::named(*r), 100).unwrap())
        .collect();
    assert_eq!(db.balance(&escrow).unwrap(), 0);

    for receipt in receipts.iter().rev() {
        db.revert(receipt).unwrap();
    }
    assert_eq!(db.balance(&escrow).unwrap(), 300);
    assert_eq!(db.balance(&Principal::named("b")).unwrap(), 0);
}
