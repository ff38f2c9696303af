// Copyright (c) 2026 Vouch Contributors. MIT License.
// See LICENSE for details.

//! # Vouch Escrow Contracts
//!
//! The value-custody core of Vouch. An escrow instance holds funds per
//! bounty slot and lets them leave in exactly two directions: out to
//! recipients (payouts, claims, scheduled releases) or back to the
//! depositor (refunds). Everything in between is bookkeeping that has to
//! add up.
//!
//! - **Escrow state machine** ([`escrow`]): the record and its lifecycle.
//! - **Payout engine** ([`payout`]): single, batch and scheduled payouts.
//! - **Deadline policy** ([`deadline`]): when a refund may happen.
//! - **Authorization registry** ([`authorization`]): who may move funds,
//!   and pending claims.
//! - **Approval registry** ([`approvals`]): multisig refund approvals and
//!   code upgrades, plus version and migration bookkeeping.
//! - **Invariant checker** ([`invariants`]) and **reentrancy guard**
//!   ([`reentrancy`]): the two safety nets every mutating call passes
//!   through.
//! - **Operator controls**: per-operation pause flags ([`pause`]), lock and
//!   release fees ([`fees`]) and bounty metadata ([`metadata`]).
//!
//! [`EscrowContract`] ties these together on top of the host collaborators
//! from `vouch-protocol` (store, clock, authorization, value transfer).
//!
//! ## Design Principles
//!
//! 1. All monetary arithmetic is checked. Wrapping arithmetic and money do
//!    not mix.
//! 2. State transitions are explicit: enum variants, not boolean flags.
//! 3. Every call commits completely or not at all, transfers included.
//! 4. Every persisted type is serde JSON with defaults on optional fields,
//!    so old and new code can read each other's data.

pub mod approvals;
pub mod authorization;
pub mod calls;
pub mod contract;
pub mod deadline;
pub mod error;
pub mod escrow;
pub mod events;
pub mod fees;
pub mod invariants;
pub mod metadata;
pub mod pause;
pub mod payout;
pub mod query;
pub mod reentrancy;
pub mod state;

pub use approvals::{ApprovalOutcome, CodeRef, MigrationState, Proposal, ProposalAction, UpgradeState};
pub use contract::EscrowContract;
pub use error::{ErrorKind, EscrowError};
pub use escrow::{EscrowRecord, EscrowStatus, RefundMode, RefundScope};
pub use events::{EscrowEvent, EventRecord};
pub use fees::{FeeConfig, FeeEntry, FeeKind, FeeUpdate};
pub use metadata::BountyMetadata;
pub use pause::{PauseFlags, PauseGate};
pub use payout::{ReleaseEntry, ReleaseSchedule};
pub use query::{AggregateStats, RefundEligibility};
