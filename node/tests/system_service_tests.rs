// Copyright (c) Tidal Contributors
// SPDX-License-Identifier: Apache-2.0

use node::{NodeError, SystemService};
use types::base::{dbg_addr, ObjectID, DROPS_PER_TIDE};
use types::error::TidalError;
use types::events::Event;
use types::parameters::SystemParameters;
use types::system_state::pool::NodePool;
use types::system_state::{EpochStatus, SystemState};

fn test_state(stakes: &[u64], n_shards: u16) -> SystemState {
    let pools = stakes
        .iter()
        .enumerate()
        .map(|(i, stake)| {
            let mut pool = NodePool::new(
                dbg_addr(i as u8 + 1),
                1_000, // capacity
                2,     // price per unit per epoch
                1_000, // 10% commission
                ObjectID::random(),
            );
            pool.request_add_stake_at_genesis(stake * DROPS_PER_TIDE);
            pool
        })
        .collect();

    let parameters = SystemParameters {
        epoch_duration_ms: 42,
        n_shards,
        accounting_horizon: 4,
        sync_quorum_bps: 0,
        min_pool_joining_stake: DROPS_PER_TIDE,
        max_commission_rate_bps: 10_000,
    };

    SystemState::create(pools, 1000, parameters).unwrap()
}

#[tokio::test]
async fn test_end_to_end_epoch_cycle() {
    let (handle, _join) = SystemService::spawn(test_state(&[4000, 2000, 1000], 10));
    let mut events = handle.subscribe();

    let committee = handle.committee().await.unwrap();
    assert_eq!(committee.shard_count(&dbg_addr(1)), 6);
    assert_eq!(committee.shard_count(&dbg_addr(2)), 3);
    assert_eq!(committee.shard_count(&dbg_addr(3)), 1);

    // Reserve 10 units for 3 epochs at price 2: cost 60 of the 100 paid.
    let (reservation, change) = handle.reserve_space(10, 3, 100).await.unwrap();
    assert_eq!(change, 40);
    assert_eq!(reservation.epochs(), 3);

    // Genesis epoch starts done; advance and run a full sync cycle.
    handle.advance_epoch(2000).await.unwrap();
    let (epoch, status) = handle.epoch_status().await.unwrap();
    assert_eq!(epoch, 1);
    assert_eq!(status, EpochStatus::Syncing);

    handle.sync_done(dbg_addr(1), 1).await.unwrap();
    let (_, status) = handle.epoch_status().await.unwrap();
    assert_eq!(status, EpochStatus::Done);

    let outcome = handle.advance_epoch(3000).await.unwrap();
    assert_eq!(outcome.vacated.epoch, 1);
    assert_eq!(outcome.vacated.rewards_to_distribute, 20);

    // The event stream followed along.
    let mut seen_sync_confirmed = false;
    let mut seen_rewards_released = false;
    while !(seen_sync_confirmed && seen_rewards_released) {
        match events.recv().await.unwrap() {
            Event::SyncConfirmed { epoch: 1, node } => {
                assert_eq!(node, dbg_addr(1));
                seen_sync_confirmed = true;
            }
            Event::RewardsReleased { epoch: 1, amount } => {
                assert_eq!(amount, 20);
                seen_rewards_released = true;
            }
            _ => {}
        }
    }
}

#[tokio::test]
async fn test_engine_errors_propagate_through_handle() {
    let (handle, _join) = SystemService::spawn(test_state(&[1000, 1000], 10));

    handle.advance_epoch(2000).await.unwrap();

    // Still syncing: the next advance must surface the engine error.
    let err = handle.advance_epoch(3000).await.unwrap_err();
    match err {
        NodeError::Engine(TidalError::InvalidEpochTransition { epoch }) => assert_eq!(epoch, 1),
        other => panic!("unexpected error: {other}"),
    }

    let err = handle.sync_done(dbg_addr(9), 1).await.unwrap_err();
    assert!(matches!(
        err,
        NodeError::Engine(TidalError::NotACommitteeMember { .. })
    ));
}

#[tokio::test]
async fn test_stake_and_pool_lifecycle_through_handle() {
    let (handle, _join) = SystemService::spawn(test_state(&[1000], 10));

    let pool = NodePool::new(dbg_addr(5), 1_000, 2, 0, ObjectID::random());
    handle.add_pool(pool).await.unwrap();

    let staked = handle
        .add_stake(dbg_addr(5), 3000 * DROPS_PER_TIDE)
        .await
        .unwrap();

    handle.advance_epoch(2000).await.unwrap();

    let committee = handle.committee().await.unwrap();
    assert!(committee.contains(&dbg_addr(5)));

    let withdrawn = handle.withdraw_stake(staked).await.unwrap();
    assert!(withdrawn >= 3000 * DROPS_PER_TIDE);

    handle.remove_pool(dbg_addr(5)).await.unwrap();
    handle.sync_done(dbg_addr(1), 1).await.unwrap();
    handle.advance_epoch(3000).await.unwrap();

    let committee = handle.committee().await.unwrap();
    assert!(!committee.contains(&dbg_addr(5)));
}

#[tokio::test]
async fn test_snapshot_roundtrip() {
    let (handle, _join) = SystemService::spawn(test_state(&[4000, 2000, 1000], 10));

    handle.reserve_space(10, 2, 100).await.unwrap();
    let bytes = handle.snapshot().await.unwrap();

    let restored = SystemState::from_bytes(&bytes).unwrap();
    assert_eq!(restored.epoch(), 0);
    assert_eq!(restored.used_capacity_size(), 10);
    assert_eq!(restored.committee(), &handle.committee().await.unwrap());
}
