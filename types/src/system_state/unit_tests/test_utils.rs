use crate::base::{dbg_addr, NodeId, ObjectID, DROPS_PER_TIDE};
use crate::parameters::SystemParameters;
use crate::system_state::pool::NodePool;
use crate::system_state::staking::StakedTide;
use crate::system_state::{EpochAdvanceOutcome, EpochStatus, SystemState};

// Constants for testing
pub const TEST_CAPACITY: u64 = 1_000;
pub const TEST_PRICE: u64 = 2;
pub const TEST_COMMISSION_BPS: u64 = 1_000; // 10%

pub fn test_parameters(n_shards: u16) -> SystemParameters {
    SystemParameters {
        epoch_duration_ms: 42, // Doesn't matter what number we put here for tests
        n_shards,
        accounting_horizon: 4,
        sync_quorum_bps: 0,
        min_pool_joining_stake: DROPS_PER_TIDE,
        max_commission_rate_bps: 10_000,
    }
}

/// Create a test pool with the given genesis stake (in whole TIDE).
pub fn create_pool_for_testing(node_id: NodeId, stake_tide: u64) -> NodePool {
    create_pool_with_commission(node_id, stake_tide, TEST_COMMISSION_BPS)
}

pub fn create_pool_with_commission(
    node_id: NodeId,
    stake_tide: u64,
    commission_rate: u64,
) -> NodePool {
    let mut pool = NodePool::new(
        node_id,
        TEST_CAPACITY,
        TEST_PRICE,
        commission_rate,
        ObjectID::random(),
    );

    if stake_tide > 0 {
        pool.request_add_stake_at_genesis(stake_tide * DROPS_PER_TIDE);
    }

    pool
}

/// Create a system whose pools are `dbg_addr(1..)` with the given stakes
/// (in whole TIDE).
pub fn create_system_with_stakes(stakes: &[u64], n_shards: u16) -> SystemState {
    let pools = stakes
        .iter()
        .enumerate()
        .map(|(i, stake)| create_pool_for_testing(dbg_addr(i as u8 + 1), *stake))
        .collect();

    SystemState::create(pools, 1000, test_parameters(n_shards)).unwrap()
}

/// Confirm sync from the first committee member, completing the epoch under
/// the default single-confirmation policy.
pub fn confirm_sync(state: &mut SystemState) {
    let node = *state.committee().node_ids().next().unwrap();
    state.sync_done(node, state.epoch()).unwrap();
}

/// Drive the system into the next epoch, confirming sync first if needed.
pub fn advance_epoch_for_testing(state: &mut SystemState) -> EpochAdvanceOutcome {
    if state.epoch_status() == EpochStatus::Syncing {
        confirm_sync(state);
    }

    let timestamp = state.epoch_start_timestamp_ms() + state.epoch_duration_ms();
    state.advance_epoch(timestamp).unwrap()
}

pub fn stake_with(state: &mut SystemState, node_id: NodeId, amount_tide: u64) -> StakedTide {
    state
        .request_add_stake(node_id, amount_tide * DROPS_PER_TIDE)
        .unwrap()
}

pub fn unstake(state: &mut SystemState, staked_tide: StakedTide) -> u64 {
    state.request_withdraw_stake(staked_tide).unwrap()
}
