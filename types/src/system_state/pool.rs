use std::collections::BTreeMap;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::base::{EpochId, NodeId, ObjectID, StakeUnit};
use crate::committee::Committee;
use crate::error::{TidalError, TidalResult};

use super::staking::{StakedTide, StakingPool};
use super::BPS_DENOMINATOR;

/// One storage-node operator: declared capacity and pricing, the commission
/// it takes on staker rewards, and the staking pool delegators pay into.
///
/// Capacity, price, and commission changes are staged into `next_epoch_*`
/// fields and only take effect at the epoch boundary, so mid-epoch accounting
/// always sees the values the committee was selected under.
#[derive(Debug, Serialize, Deserialize, Clone, Eq, PartialEq, Hash)]
pub struct NodePool {
    pub node_id: NodeId,

    /// Declared storage capacity limit, in units of size
    pub capacity: u64,

    /// Declared price per unit of size per epoch
    pub storage_price: u64,

    /// Operator commission on staker rewards, in basis points
    pub commission_rate: u64,

    pub next_epoch_capacity: u64,
    pub next_epoch_storage_price: u64,
    pub next_epoch_commission_rate: u64,

    pub staking_pool: StakingPool,
}

impl NodePool {
    pub fn new(
        node_id: NodeId,
        capacity: u64,
        storage_price: u64,
        commission_rate: u64,
        staking_pool_id: ObjectID,
    ) -> Self {
        Self {
            node_id,
            capacity,
            storage_price,
            commission_rate,
            next_epoch_capacity: capacity,
            next_epoch_storage_price: storage_price,
            next_epoch_commission_rate: commission_rate,
            staking_pool: StakingPool::new(staking_pool_id),
        }
    }

    /// Request to add stake, active from the next epoch.
    pub fn request_add_stake(&mut self, stake: u64, current_epoch: EpochId) -> StakedTide {
        assert!(stake > 0, "Stake amount must be positive");

        let activation_epoch = current_epoch + 1;

        let staked_tide = self.staking_pool.request_add_stake(stake, activation_epoch);

        // A pool that has not activated yet has no epoch boundary to wait for.
        if self.staking_pool.is_preactive() {
            self.staking_pool.process_pending_stake();
        }

        staked_tide
    }

    /// Add stake during genesis setup, active immediately.
    pub fn request_add_stake_at_genesis(&mut self, stake: u64) -> StakedTide {
        assert!(stake > 0, "Stake amount must be positive");

        let staked_tide = self.staking_pool.request_add_stake(stake, 0);
        self.staking_pool.process_pending_stake();

        staked_tide
    }

    pub fn request_withdraw_stake(&mut self, staked_tide: StakedTide, current_epoch: EpochId) -> u64 {
        self.staking_pool.request_withdraw_stake(staked_tide, current_epoch)
    }

    /// Credit staker rewards to the pool for auto-compounding.
    pub fn deposit_staker_rewards(&mut self, amount: u64) {
        if amount == 0 {
            return;
        }

        self.staking_pool.deposit_rewards(amount);
    }

    pub fn request_set_commission_rate(&mut self, new_rate: u64, max_rate_bps: u64) -> TidalResult {
        if new_rate > max_rate_bps {
            return Err(TidalError::CommissionRateTooHigh {
                rate: new_rate,
                max: max_rate_bps,
            });
        }

        self.next_epoch_commission_rate = new_rate;
        Ok(())
    }

    pub fn request_set_storage_price(&mut self, new_price: u64) {
        self.next_epoch_storage_price = new_price;
    }

    pub fn request_set_capacity(&mut self, new_capacity: u64) {
        self.next_epoch_capacity = new_capacity;
    }

    /// Activate this pool and record its initial exchange rate.
    pub fn activate(&mut self, activation_epoch: EpochId) {
        self.staking_pool.update_exchange_rate(activation_epoch);

        assert!(self.staking_pool.is_preactive(), "Pool is already active");
        assert!(
            !self.staking_pool.is_inactive(),
            "Cannot activate inactive pool"
        );

        self.staking_pool.activation_epoch = Some(activation_epoch);
    }

    pub fn deactivate(&mut self, deactivation_epoch: EpochId) {
        assert!(!self.staking_pool.is_inactive(), "Pool already inactive");

        self.staking_pool.deactivation_epoch = Some(deactivation_epoch);
    }

    fn effectuate_staged_params(&mut self) {
        self.commission_rate = self.next_epoch_commission_rate;
        self.storage_price = self.next_epoch_storage_price;
        self.capacity = self.next_epoch_capacity;
    }

    pub fn stake_amount(&self) -> StakeUnit {
        self.staking_pool.tide_balance
    }
}

/// The stake ledger: every node pool in the system and the stake behind it.
///
/// Pools join and leave through pending lists that are resolved at epoch
/// boundaries, mirroring how stake itself activates. Withdrawals keep working
/// after a pool leaves the active set, which is why departed pools are
/// retained in `inactive_pools`.
#[derive(Debug, Serialize, Deserialize, Clone, Eq, PartialEq)]
pub struct StakeLedger {
    /// The total stake across all active pools
    pub total_stake: StakeUnit,

    /// Pools eligible for committee selection
    pub pools: Vec<NodePool>,

    /// Pools that will join at the next epoch boundary
    pub pending_pools: Vec<NodePool>,

    /// Indices of pools leaving at the next epoch boundary
    pub pending_removals: Vec<usize>,

    /// Staking pool id -> operator, for routing withdrawals
    pub staking_pool_mappings: BTreeMap<ObjectID, NodeId>,

    /// Departed pools, kept so their stakers can still withdraw
    pub inactive_pools: BTreeMap<ObjectID, NodePool>,
}

impl StakeLedger {
    pub fn new(pools: Vec<NodePool>) -> Self {
        let total_stake = pools.iter().map(|pool| pool.stake_amount()).sum();

        let mut staking_pool_mappings = BTreeMap::new();
        for pool in &pools {
            staking_pool_mappings.insert(pool.staking_pool.id, pool.node_id);
        }

        Self {
            total_stake,
            pools,
            pending_pools: Vec::new(),
            pending_removals: Vec::new(),
            staking_pool_mappings,
            inactive_pools: BTreeMap::new(),
        }
    }

    pub fn request_add_pool(&mut self, pool: NodePool) -> TidalResult {
        let node_id = pool.node_id;

        if self.find_pool_with_pending_mut(node_id).is_some() {
            return Err(TidalError::DuplicatePool);
        }

        self.staking_pool_mappings
            .insert(pool.staking_pool.id, node_id);

        self.pending_pools.push(pool);

        Ok(())
    }

    pub fn request_remove_pool(&mut self, node_id: NodeId) -> TidalResult {
        if let Some((i, _)) = self
            .pools
            .iter()
            .find_position(|pool| node_id == pool.node_id)
        {
            if self.pending_removals.iter().any(|idx| *idx == i) {
                return Err(TidalError::PoolAlreadyRemoved { node: node_id });
            }
            self.pending_removals.push(i);
            return Ok(());
        }

        Err(TidalError::NotAPool { node: node_id })
    }

    pub fn find_pool(&self, node_id: NodeId) -> Option<&NodePool> {
        self.pools.iter().find(|pool| pool.node_id == node_id)
    }

    pub fn find_pool_mut(&mut self, node_id: NodeId) -> Option<&mut NodePool> {
        self.pools.iter_mut().find(|pool| pool.node_id == node_id)
    }

    pub fn find_pool_with_pending_mut(&mut self, node_id: NodeId) -> Option<&mut NodePool> {
        if let Some(i) = self.pools.iter().position(|pool| pool.node_id == node_id) {
            return self.pools.get_mut(i);
        }

        self.pending_pools
            .iter_mut()
            .find(|pool| pool.node_id == node_id)
    }

    pub fn is_active_pool(&self, node_id: NodeId) -> bool {
        self.find_pool(node_id).is_some()
    }

    /// Stake snapshot used as the committee allocator input.
    pub fn stake_snapshot(&self) -> BTreeMap<NodeId, StakeUnit> {
        self.pools
            .iter()
            .map(|pool| (pool.node_id, pool.stake_amount()))
            .collect()
    }

    /// Epoch-boundary processing. Rewards are distributed against the old
    /// committee before any pending stake rolls in, so newly activating stake
    /// never shares in rewards it did not earn. Returns the operator
    /// commission receipts and the amount actually distributed.
    pub fn advance_epoch(
        &mut self,
        new_epoch: EpochId,
        committee: &Committee,
        reward_pool: u64,
        min_joining_stake: u64,
    ) -> (BTreeMap<NodeId, StakedTide>, u64) {
        let (operator_rewards, distributed) =
            self.distribute_rewards(committee, reward_pool, new_epoch);

        self.effectuate_staged_params();

        self.process_active_pool_stakes(new_epoch);

        self.process_pending_pool_stakes();

        self.process_pending_removals(new_epoch);

        self.process_pool_admissions(new_epoch, min_joining_stake);

        self.total_stake = self.calculate_total_stake();

        (operator_rewards, distributed)
    }

    /// Split a released reward balance across the committee, pro rata by
    /// shards held. Each pool's share is divided between operator commission
    /// (auto-staked to the operator) and staker rewards deposited into the
    /// pool. Integer dust from the floor division is left for the caller.
    pub fn distribute_rewards(
        &mut self,
        committee: &Committee,
        total_rewards: u64,
        new_epoch: EpochId,
    ) -> (BTreeMap<NodeId, StakedTide>, u64) {
        let mut operator_rewards = BTreeMap::new();
        let mut distributed: u64 = 0;

        if total_rewards == 0 {
            return (operator_rewards, distributed);
        }

        let n_shards = committee.n_shards() as u128;

        for (node_id, shards) in committee.members() {
            // A pool that departed mid-epoch forfeits its share; the dust
            // carries forward with the rest.
            let Some(pool) = self.pools.iter_mut().find(|pool| pool.node_id == *node_id) else {
                continue;
            };

            let reward_amount =
                ((total_rewards as u128) * (shards.len() as u128) / n_shards) as u64;
            if reward_amount == 0 {
                continue;
            }

            let commission_amount =
                ((reward_amount as u128) * (pool.commission_rate as u128) / BPS_DENOMINATOR as u128)
                    as u64;
            let staker_reward = reward_amount - commission_amount;

            if commission_amount > 0 {
                let receipt = pool.request_add_stake(commission_amount, new_epoch - 1);
                operator_rewards.insert(*node_id, receipt);
            }

            pool.deposit_staker_rewards(staker_reward);

            distributed += reward_amount;
        }

        info!(
            "Distributed {} of {} reward drops across {} committee members",
            distributed,
            total_rewards,
            committee.num_members()
        );

        (operator_rewards, distributed)
    }

    pub fn calculate_total_stake(&self) -> StakeUnit {
        self.pools.iter().map(|pool| pool.stake_amount()).sum()
    }

    fn effectuate_staged_params(&mut self) {
        self.pools
            .iter_mut()
            .for_each(|pool| pool.effectuate_staged_params());
    }

    fn process_active_pool_stakes(&mut self, new_epoch: EpochId) {
        for pool in &mut self.pools {
            pool.staking_pool
                .process_pending_stakes_and_withdraws(new_epoch);
        }
    }

    fn process_pending_pool_stakes(&mut self) {
        for pool in &mut self.pending_pools {
            pool.staking_pool.process_pending_stake_withdraw();
            pool.staking_pool.process_pending_stake();
        }
    }

    fn process_pending_removals(&mut self, new_epoch: EpochId) {
        let mut removals = self.pending_removals.clone();
        removals.sort_unstable();

        for index in removals.into_iter().rev() {
            if index < self.pools.len() {
                let pool = self.pools.remove(index);
                self.process_pool_departure(pool, new_epoch);
            }
        }

        self.pending_removals.clear();
    }

    fn process_pool_admissions(&mut self, new_epoch: EpochId, min_joining_stake: u64) {
        let mut i = 0;
        while i < self.pending_pools.len() {
            if self.pending_pools[i].stake_amount() >= min_joining_stake {
                let mut pool = self.pending_pools.remove(i);
                pool.activate(new_epoch);
                info!(
                    "Pool {:?} joined the active set with stake {}",
                    pool.node_id,
                    pool.stake_amount()
                );
                self.pools.push(pool);
            } else {
                i += 1;
            }
        }
    }

    /// Move a departing pool to the inactive set, keeping its staking pool so
    /// withdrawals keep working.
    fn process_pool_departure(&mut self, pool: NodePool, new_epoch: EpochId) {
        let pool_id = pool.staking_pool.id;

        let mut inactive_pool = pool;
        inactive_pool.deactivate(new_epoch);

        info!("Pool {:?} left the active set", inactive_pool.node_id);

        self.inactive_pools.insert(pool_id, inactive_pool);
    }
}
