//! Error types for the epoch and committee lifecycle engine.
//!
//! Every operation on the system state either fully succeeds or fails with a
//! `TidalError` and leaves all state untouched. Errors are synchronous and
//! non-retryable from inside the engine; retry policy belongs to the caller.

use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;
use thiserror::Error;

use crate::base::{EpochId, NodeId};

/// Standard result type, defaulting to `()` for operations that only signal
/// success or failure.
pub type TidalResult<T = ()> = Result<T, TidalError>;

#[derive(Eq, PartialEq, Clone, Debug, Serialize, Deserialize, Error, Hash, IntoStaticStr)]
pub enum TidalError {
    /// A reservation would push used capacity above the declared total for
    /// some epoch in its range. Nothing is applied.
    #[error(
        "storage capacity exceeded in epoch {epoch}: requested {requested}, available {available}"
    )]
    CapacityExceeded {
        epoch: EpochId,
        requested: u64,
        available: u64,
    },

    /// `advance_epoch` called while the current epoch is still syncing.
    #[error("cannot advance past epoch {epoch}: shard sync has not completed")]
    InvalidEpochTransition { epoch: EpochId },

    /// A sync confirmation referenced an epoch other than the current one.
    #[error(
        "sync confirmation for epoch {confirmation_epoch} does not match current epoch \
         {current_epoch}"
    )]
    SyncMismatch {
        current_epoch: EpochId,
        confirmation_epoch: EpochId,
    },

    /// A sync confirmation arrived after the epoch was already marked done.
    #[error("epoch {epoch} sync is already done")]
    EpochAlreadyDone { epoch: EpochId },

    /// The same node confirmed sync twice within one epoch.
    #[error("duplicate sync confirmation from node {node}")]
    DuplicateSyncConfirmation { node: NodeId },

    /// A sync confirmation came from a node holding no shards this epoch.
    #[error("node {node} holds no shards in the current committee")]
    NotACommitteeMember { node: NodeId },

    /// Committee computation attempted with zero total stake.
    #[error("no eligible stake to compute a committee")]
    NoEligibleStake,

    #[error("cannot add a pool that is already active or pending")]
    DuplicatePool,

    #[error("no pool registered for node {node}")]
    NotAPool { node: NodeId },

    #[error("pool removal already requested for node {node}")]
    PoolAlreadyRemoved { node: NodeId },

    #[error("no staking pool found for the given receipt")]
    StakingPoolNotFound,

    #[error("commission rate {rate} exceeds the maximum of {max} basis points")]
    CommissionRateTooHigh { rate: u64, max: u64 },

    #[error("payment of {payment} does not cover the storage cost of {cost}")]
    InsufficientPayment { payment: u64, cost: u64 },

    #[error("reservation spans {requested} epochs but the accounting horizon is {horizon}")]
    ReservationTooLong { requested: u32, horizon: u32 },

    #[error("invalid reservation operation: {reason}")]
    InvalidReservation { reason: String },

    #[error("invalid arguments: {reason}")]
    InvalidArguments { reason: String },

    #[error("invalid address")]
    InvalidAddress,

    #[error("failed to encode or decode system state: {0}")]
    StateSnapshotError(String),
}
