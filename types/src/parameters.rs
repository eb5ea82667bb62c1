use serde::{Deserialize, Serialize};

use crate::base::DROPS_PER_TIDE;

/// System-wide configuration, fixed at deployment and carried on the system
/// state record.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Eq, PartialEq, Hash)]
pub struct SystemParameters {
    /// The duration of an epoch, in milliseconds.
    pub epoch_duration_ms: u64,

    /// Total number of shards. Fixed for the lifetime of a deployment; only
    /// shard ownership changes across epochs.
    pub n_shards: u16,

    /// Number of future epochs tracked by the accounting ring. Reservations
    /// cannot extend past this horizon.
    pub accounting_horizon: u32,

    /// Fraction of shards (in basis points) whose owners must confirm sync
    /// before an epoch is marked done. Zero means the first valid
    /// confirmation completes the epoch.
    pub sync_quorum_bps: u64,

    /// Lower bound on pool stake required to enter the active set.
    pub min_pool_joining_stake: u64,

    /// Upper bound on pool commission rates, in basis points.
    pub max_commission_rate_bps: u64,
}

impl Default for SystemParameters {
    fn default() -> Self {
        Self {
            epoch_duration_ms: 151_200_000, // half of a 3.5-day cycle
            n_shards: 1000,
            accounting_horizon: 104,
            sync_quorum_bps: 0,
            min_pool_joining_stake: DROPS_PER_TIDE,
            max_commission_rate_bps: 10_000,
        }
    }
}
