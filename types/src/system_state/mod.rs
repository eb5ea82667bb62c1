use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::base::{EpochId, NodeId, TimestampMs};
use crate::committee::{compute_committee, Committee};
use crate::error::{TidalError, TidalResult};
use crate::events::Event;
use crate::parameters::SystemParameters;

use self::accounting::{FutureAccountingRecord, FutureAccountingRing};
use self::pool::{NodePool, StakeLedger};
use self::reservation::StorageReservation;
use self::staking::StakedTide;

pub mod accounting;
pub mod pool;
pub mod reservation;
pub mod staking;

#[cfg(test)]
#[path = "unit_tests/test_utils.rs"]
pub mod test_utils;

#[cfg(test)]
#[path = "unit_tests/accounting_tests.rs"]
mod accounting_tests;
#[cfg(test)]
#[path = "unit_tests/delegation_tests.rs"]
mod delegation_tests;
#[cfg(test)]
#[path = "unit_tests/epoch_tests.rs"]
mod epoch_tests;
#[cfg(test)]
#[path = "unit_tests/rewards_distribution_tests.rs"]
mod rewards_distribution_tests;

pub const BPS_DENOMINATOR: u64 = 10_000;

/// Progress of the current epoch's shard migration.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Eq, PartialEq, Hash)]
pub enum EpochStatus {
    /// Committee selected; nodes are migrating shard data.
    Syncing,
    /// Sync confirmed; the next epoch transition is legal.
    Done,
}

/// What an epoch transition produced: the vacated accounting record (already
/// settled) and the commission receipts auto-staked to operators.
#[derive(Debug, Clone)]
pub struct EpochAdvanceOutcome {
    pub vacated: FutureAccountingRecord,
    pub operator_rewards: BTreeMap<NodeId, StakedTide>,
}

/// The system state record: sole authority for epochs, committees, capacity,
/// and payments.
///
/// Every operation is a synchronous state transition that either fully
/// succeeds or fails leaving the record untouched. The record itself is not
/// synchronized; the hosting layer must serialize mutations (see the `node`
/// crate).
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SystemState {
    /// The current epoch number
    pub epoch: EpochId,

    pub status: EpochStatus,

    pub parameters: SystemParameters,

    /// Shard assignment for the current epoch
    pub committee: Committee,

    /// All node pools and the stake behind them
    pub ledger: StakeLedger,

    /// Per-epoch capacity and payment records within the horizon
    pub ring: FutureAccountingRing,

    pub epoch_start_timestamp_ms: TimestampMs,

    /// Nodes that confirmed sync for the current epoch
    pub sync_confirmations: BTreeSet<NodeId>,

    #[serde(skip, default)]
    events: Vec<Event>,
}

impl SystemState {
    /// Create the system at epoch 0 from founding pools that already carry
    /// their genesis stake.
    ///
    /// The genesis committee has no predecessor to migrate shards from, so
    /// epoch 0 starts `Done` and the first transition is immediately legal.
    pub fn create(
        pools: Vec<NodePool>,
        epoch_start_timestamp_ms: TimestampMs,
        parameters: SystemParameters,
    ) -> TidalResult<Self> {
        let mut ledger = StakeLedger::new(pools);
        for pool in &mut ledger.pools {
            pool.activate(0);
        }

        let committee = compute_committee(0, &ledger.stake_snapshot(), parameters.n_shards)?;

        let total_capacity = committee_capacity(&committee, &ledger);
        let price = committee_storage_price(&committee, &ledger);
        let ring = FutureAccountingRing::new(0, parameters.accounting_horizon, total_capacity, price);

        let mut state = Self {
            epoch: 0,
            status: EpochStatus::Done,
            parameters,
            committee,
            ledger,
            ring,
            epoch_start_timestamp_ms,
            sync_confirmations: BTreeSet::new(),
            events: Vec::new(),
        };

        state.events.push(Event::CommitteeSelected {
            epoch: 0,
            assignment: state.committee.assignment().clone(),
        });

        Ok(state)
    }

    // -----------------------------------------------------------------------
    // Epoch state machine
    // -----------------------------------------------------------------------

    /// Advance into the next epoch.
    ///
    /// Only legal once the current epoch is `Done`. Distributes the vacated
    /// epoch's escrowed payments against the outgoing committee, processes
    /// all pending stake-ledger changes, selects the next committee from the
    /// post-boundary stake, recycles the accounting ring slot, and re-enters
    /// `Syncing`. Fails without any state change if sync has not completed or
    /// if no stake remains to form a committee.
    pub fn advance_epoch(
        &mut self,
        epoch_start_timestamp_ms: TimestampMs,
    ) -> TidalResult<EpochAdvanceOutcome> {
        if self.status != EpochStatus::Done {
            return Err(TidalError::InvalidEpochTransition { epoch: self.epoch });
        }

        let new_epoch = self.epoch + 1;
        let released = self.ring.current().rewards_to_distribute;

        // Boundary processing runs on a scratch ledger so that a failed
        // committee computation leaves the system untouched.
        let mut ledger = self.ledger.clone();
        let (operator_rewards, distributed) = ledger.advance_epoch(
            new_epoch,
            &self.committee,
            released,
            self.parameters.min_pool_joining_stake,
        );

        let committee =
            compute_committee(new_epoch, &ledger.stake_snapshot(), self.parameters.n_shards)?;

        let new_capacity = committee_capacity(&committee, &ledger);
        let new_price = committee_storage_price(&committee, &ledger);

        let vacated = self.ring.advance(new_capacity, new_price);

        // Integer dust from the pro-rata split carries into the new epoch.
        let dust = released - distributed;
        if dust > 0 {
            self.ring.carry_rewards(dust);
        }

        self.ledger = ledger;
        self.epoch = new_epoch;
        self.epoch_start_timestamp_ms = epoch_start_timestamp_ms;
        self.status = EpochStatus::Syncing;
        self.sync_confirmations.clear();

        self.events.push(Event::CommitteeSelected {
            epoch: new_epoch,
            assignment: committee.assignment().clone(),
        });
        self.events.push(Event::EpochAdvanced { epoch: new_epoch });
        self.events.push(Event::RewardsReleased {
            epoch: vacated.epoch,
            amount: distributed,
        });

        info!(
            "Advanced to epoch {} with {} committee members; released {} drops for epoch {}",
            new_epoch,
            committee.num_members(),
            distributed,
            vacated.epoch
        );

        self.committee = committee;

        Ok(EpochAdvanceOutcome {
            vacated,
            operator_rewards,
        })
    }

    /// Record a node's confirmation that it finished migrating shard data
    /// for `epoch`.
    ///
    /// The confirmation must name the current epoch exactly, come from a
    /// committee member, and not repeat. The epoch flips to `Done` once
    /// confirmed shard weight reaches the configured quorum; with
    /// `sync_quorum_bps == 0` the first valid confirmation completes it.
    pub fn sync_done(&mut self, node: NodeId, epoch: EpochId) -> TidalResult {
        if epoch != self.epoch {
            return Err(TidalError::SyncMismatch {
                current_epoch: self.epoch,
                confirmation_epoch: epoch,
            });
        }
        if self.status == EpochStatus::Done {
            return Err(TidalError::EpochAlreadyDone { epoch });
        }
        if self.committee.shard_count(&node) == 0 {
            return Err(TidalError::NotACommitteeMember { node });
        }
        if !self.sync_confirmations.insert(node) {
            return Err(TidalError::DuplicateSyncConfirmation { node });
        }

        self.events.push(Event::SyncConfirmed { epoch, node });

        let confirmed_shards: u64 = self
            .sync_confirmations
            .iter()
            .map(|confirmed| self.committee.shard_count(confirmed) as u64)
            .sum();

        let quorum_bps = self.parameters.sync_quorum_bps;
        let reached = if quorum_bps == 0 {
            true
        } else {
            confirmed_shards * BPS_DENOMINATOR >= self.committee.n_shards() as u64 * quorum_bps
        };

        if reached {
            self.status = EpochStatus::Done;
            info!(
                "Epoch {} sync complete: {} of {} shards confirmed",
                epoch,
                confirmed_shards,
                self.committee.n_shards()
            );
        }

        Ok(())
    }

    // -----------------------------------------------------------------------
    // Storage accounting
    // -----------------------------------------------------------------------

    /// Reserve `storage_size` units for the next `epochs_ahead` epochs.
    ///
    /// Capacity is checked independently for every epoch in range and the
    /// whole reservation fails if any epoch cannot fit it. Returns the
    /// reservation and the unspent part of `payment`.
    pub fn reserve_space(
        &mut self,
        storage_size: u64,
        epochs_ahead: u32,
        payment: u64,
    ) -> TidalResult<(StorageReservation, u64)> {
        if storage_size == 0 {
            return Err(TidalError::InvalidArguments {
                reason: "cannot reserve zero storage".to_string(),
            });
        }

        let cost = self.ring.reservation_cost(storage_size, epochs_ahead)?;
        if payment < cost {
            return Err(TidalError::InsufficientPayment { payment, cost });
        }

        self.ring.reserve(storage_size, epochs_ahead)?;

        let reservation =
            StorageReservation::new(storage_size, self.epoch, self.epoch + epochs_ahead);

        Ok((reservation, payment - cost))
    }

    /// Surrender a reservation, freeing its capacity for the epochs that have
    /// not yet passed. Escrowed payments stay with their epochs.
    pub fn release_space(&mut self, reservation: StorageReservation) {
        self.ring.release(
            reservation.storage_size,
            reservation.start_epoch,
            reservation.end_epoch,
        );
    }

    // -----------------------------------------------------------------------
    // Stake ledger operations
    // -----------------------------------------------------------------------

    /// Register a new node pool, joining the active set at the next epoch
    /// boundary once it meets the minimum joining stake.
    pub fn request_add_pool(&mut self, pool: NodePool) -> TidalResult {
        let max_rate_bps = self.parameters.max_commission_rate_bps;
        if pool.commission_rate > max_rate_bps {
            return Err(TidalError::CommissionRateTooHigh {
                rate: pool.commission_rate,
                max: max_rate_bps,
            });
        }

        self.ledger.request_add_pool(pool)
    }

    /// Schedule a pool's departure at the next epoch boundary.
    pub fn request_remove_pool(&mut self, node_id: NodeId) -> TidalResult {
        self.ledger.request_remove_pool(node_id)
    }

    /// Delegate stake to a pool. The stake activates at the next epoch
    /// boundary and only then counts toward committee selection.
    pub fn request_add_stake(&mut self, node_id: NodeId, amount: u64) -> TidalResult<StakedTide> {
        if amount == 0 {
            return Err(TidalError::InvalidArguments {
                reason: "Stake amount cannot be 0!".to_string(),
            });
        }

        let current_epoch = self.epoch;
        let Some(pool) = self.ledger.find_pool_with_pending_mut(node_id) else {
            return Err(TidalError::NotAPool { node: node_id });
        };

        let staked_tide = pool.request_add_stake(amount, current_epoch);

        self.ledger
            .staking_pool_mappings
            .insert(staked_tide.pool_id, node_id);

        Ok(staked_tide)
    }

    /// Withdraw stake using its receipt, routed to the owning pool whether it
    /// is active, pending, or already departed.
    pub fn request_withdraw_stake(&mut self, staked_tide: StakedTide) -> TidalResult<u64> {
        let pool_id = staked_tide.pool_id;
        let current_epoch = self.epoch;

        if let Some(node_id) = self.ledger.staking_pool_mappings.get(&pool_id).cloned() {
            if let Some(pool) = self.ledger.find_pool_with_pending_mut(node_id) {
                return Ok(pool.request_withdraw_stake(staked_tide, current_epoch));
            }
        }

        if let Some(inactive_pool) = self.ledger.inactive_pools.get_mut(&pool_id) {
            return Ok(inactive_pool.request_withdraw_stake(staked_tide, current_epoch));
        }

        Err(TidalError::StakingPoolNotFound)
    }

    pub fn request_set_commission_rate(&mut self, node_id: NodeId, new_rate: u64) -> TidalResult {
        let max_rate_bps = self.parameters.max_commission_rate_bps;
        self.ledger
            .find_pool_mut(node_id)
            .ok_or(TidalError::NotAPool { node: node_id })?
            .request_set_commission_rate(new_rate, max_rate_bps)
    }

    pub fn request_set_storage_price(&mut self, node_id: NodeId, new_price: u64) -> TidalResult {
        self.ledger
            .find_pool_mut(node_id)
            .ok_or(TidalError::NotAPool { node: node_id })?
            .request_set_storage_price(new_price);
        Ok(())
    }

    pub fn request_set_capacity(&mut self, node_id: NodeId, new_capacity: u64) -> TidalResult {
        self.ledger
            .find_pool_mut(node_id)
            .ok_or(TidalError::NotAPool { node: node_id })?
            .request_set_capacity(new_capacity);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn epoch(&self) -> EpochId {
        self.epoch
    }

    pub fn epoch_status(&self) -> EpochStatus {
        self.status
    }

    pub fn epoch_start_timestamp_ms(&self) -> TimestampMs {
        self.epoch_start_timestamp_ms
    }

    pub fn epoch_duration_ms(&self) -> u64 {
        self.parameters.epoch_duration_ms
    }

    pub fn n_shards(&self) -> u16 {
        self.parameters.n_shards
    }

    pub fn committee(&self) -> &Committee {
        &self.committee
    }

    pub fn total_capacity_size(&self) -> u64 {
        self.ring.current().total_capacity_size
    }

    pub fn used_capacity_size(&self) -> u64 {
        self.ring.current().used_capacity_size
    }

    pub fn price_per_unit_size(&self) -> u64 {
        self.ring.current().price_per_unit_size
    }

    /// Drain the events produced since the last drain, in emission order.
    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    // -----------------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------------

    pub fn to_bytes(&self) -> TidalResult<Vec<u8>> {
        bcs::to_bytes(self).map_err(|err| TidalError::StateSnapshotError(err.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> TidalResult<Self> {
        bcs::from_bytes(bytes).map_err(|err| TidalError::StateSnapshotError(err.to_string()))
    }
}

/// Total capacity declared by the committee's pools.
fn committee_capacity(committee: &Committee, ledger: &StakeLedger) -> u64 {
    committee
        .node_ids()
        .filter_map(|node_id| ledger.find_pool(*node_id))
        .map(|pool| pool.capacity)
        .sum()
}

/// The storage price backed by a two-thirds shard quorum: the lowest price
/// such that members declaring at most that price together hold `2n/3 + 1`
/// shards.
fn committee_storage_price(committee: &Committee, ledger: &StakeLedger) -> u64 {
    let mut priced: Vec<(u64, u32)> = committee
        .members()
        .filter_map(|(node_id, shards)| {
            ledger
                .find_pool(*node_id)
                .map(|pool| (pool.storage_price, shards.len() as u32))
        })
        .collect();
    priced.sort_by_key(|(price, _)| *price);

    let quorum = 2 * committee.n_shards() as u32 / 3 + 1;
    let mut cumulative: u32 = 0;
    for (price, shards) in &priced {
        cumulative += shards;
        if cumulative >= quorum {
            return *price;
        }
    }

    priced.last().map(|(price, _)| *price).unwrap_or(0)
}
