use crate::base::{dbg_addr, DROPS_PER_TIDE};
use crate::events::Event;
use crate::system_state::test_utils::*;
use crate::system_state::SystemState;

fn create_system_without_commission(stakes: &[u64], n_shards: u16) -> SystemState {
    let pools = stakes
        .iter()
        .enumerate()
        .map(|(i, stake)| create_pool_with_commission(dbg_addr(i as u8 + 1), *stake, 0))
        .collect();

    SystemState::create(pools, 1000, test_parameters(n_shards)).unwrap()
}

#[test]
fn test_rewards_follow_shard_weight() {
    let mut state = create_system_without_commission(&[4000, 2000, 1000], 10);

    let balances_before: Vec<u64> = (1..=3)
        .map(|i| state.ledger.find_pool(dbg_addr(i)).unwrap().stake_amount())
        .collect();

    // 700 units for one epoch at price 2 escrows 1400 for epoch 0.
    state.reserve_space(700, 1, 1_400).unwrap();
    let outcome = advance_epoch_for_testing(&mut state);

    assert_eq!(outcome.vacated.epoch, 0);
    assert_eq!(outcome.vacated.rewards_to_distribute, 1_400);

    // Shard counts are 6/3/1, so the release splits 840/420/140.
    let expected = [840u64, 420, 140];
    for (i, expected_reward) in expected.iter().enumerate() {
        let pool = state.ledger.find_pool(dbg_addr(i as u8 + 1)).unwrap();
        assert_eq!(
            pool.stake_amount() - balances_before[i],
            *expected_reward,
            "pool {} reward",
            i + 1
        );
        // Without commission the whole share goes to stakers.
        assert_eq!(pool.staking_pool.rewards_pool, *expected_reward);
    }

    assert!(outcome.operator_rewards.is_empty());
}

#[test]
fn test_commission_split() {
    let mut state = create_system_with_stakes(&[1000], 10);
    let balance_before = state.ledger.find_pool(dbg_addr(1)).unwrap().stake_amount();

    // One pool holds all 10 shards; 500 units at price 2 escrows 1000.
    state.reserve_space(500, 1, 1_000).unwrap();
    let outcome = advance_epoch_for_testing(&mut state);

    // 10% commission: 100 auto-staked to the operator, 900 to stakers.
    let receipt = &outcome.operator_rewards[&dbg_addr(1)];
    assert_eq!(receipt.principal, 100);
    assert_eq!(receipt.activation_epoch, 1);

    let pool = state.ledger.find_pool(dbg_addr(1)).unwrap();
    assert_eq!(pool.staking_pool.rewards_pool, 900);
    assert_eq!(pool.stake_amount() - balance_before, 1_000);
}

#[test]
fn test_release_happens_once() {
    let mut state = create_system_with_stakes(&[1000], 10);

    state.reserve_space(500, 1, 1_000).unwrap();
    let outcome = advance_epoch_for_testing(&mut state);
    assert_eq!(outcome.vacated.rewards_to_distribute, 1_000);

    // The released balance is gone from the ring; recycling left nothing
    // behind to release twice.
    assert_eq!(state.ring.record(1).rewards_to_distribute, 0);

    let outcome = advance_epoch_for_testing(&mut state);
    assert_eq!(outcome.vacated.epoch, 1);
    assert_eq!(outcome.vacated.rewards_to_distribute, 0);

    let events = state.take_events();
    let released: Vec<u64> = events
        .iter()
        .filter_map(|event| match event {
            Event::RewardsReleased { amount, .. } => Some(*amount),
            _ => None,
        })
        .collect();
    assert_eq!(released, vec![1_000, 0]);
}

#[test]
fn test_dust_carries_into_next_epoch() {
    let mut state = create_system_without_commission(&[700, 700, 700], 10);

    // Shard counts are 4/3/3. An escrow of 22 splits 8/6/6 and leaves 2.
    state.reserve_space(11, 1, 100).unwrap();
    let outcome = advance_epoch_for_testing(&mut state);

    assert_eq!(outcome.vacated.rewards_to_distribute, 22);

    let rewards: Vec<u64> = (1..=3)
        .map(|i| {
            state
                .ledger
                .find_pool(dbg_addr(i))
                .unwrap()
                .staking_pool
                .rewards_pool
        })
        .collect();
    assert_eq!(rewards, vec![8, 6, 6]);

    // The 2 leftover drops were carried into the new current epoch.
    assert_eq!(state.ring.record(1).rewards_to_distribute, 2);

    let events = state.take_events();
    assert!(events
        .iter()
        .any(|event| matches!(event, Event::RewardsReleased { epoch: 0, amount: 20 })));
}

#[test]
fn test_operator_commission_compounds_as_stake() {
    let mut state = create_system_with_stakes(&[1000], 10);

    state.reserve_space(500, 1, 1_000).unwrap();
    let outcome = advance_epoch_for_testing(&mut state);
    let receipt = outcome.operator_rewards[&dbg_addr(1)].clone();

    // The commission receipt is real stake: it can be withdrawn like any
    // other delegation once active.
    let withdrawn = state.request_withdraw_stake(receipt).unwrap();
    assert!(withdrawn >= 100);

    let pool = state.ledger.find_pool(dbg_addr(1)).unwrap();
    assert_eq!(
        pool.staking_pool.pending_total_tide_withdraw,
        withdrawn
    );
}

#[test]
fn test_no_rewards_no_movement() {
    let mut state = create_system_with_stakes(&[1000, 1000], 10);
    let balances_before: Vec<u64> = (1..=2)
        .map(|i| state.ledger.find_pool(dbg_addr(i)).unwrap().stake_amount())
        .collect();

    let outcome = advance_epoch_for_testing(&mut state);

    assert_eq!(outcome.vacated.rewards_to_distribute, 0);
    assert!(outcome.operator_rewards.is_empty());
    for (i, before) in balances_before.iter().enumerate() {
        let pool = state.ledger.find_pool(dbg_addr(i as u8 + 1)).unwrap();
        assert_eq!(pool.stake_amount(), *before);
        assert_eq!(pool.staking_pool.rewards_pool, 0);
    }

    // Stakes were one TIDE scale; sanity-check the unit constant was used.
    assert_eq!(balances_before[0], 1000 * DROPS_PER_TIDE);
}
