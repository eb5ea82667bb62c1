use std::collections::BTreeMap;

use super::*;
use crate::base::{dbg_addr, NodeId, StakeUnit};
use crate::error::TidalError;

fn snapshot(stakes: &[(u8, StakeUnit)]) -> BTreeMap<NodeId, StakeUnit> {
    stakes
        .iter()
        .map(|(byte, stake)| (dbg_addr(*byte), *stake))
        .collect()
}

#[test]
fn test_stake_proportional_allocation() {
    // 4000/2000/1000 into 10 shards must land exactly on 6/3/1.
    let stakes = snapshot(&[(1, 4000), (2, 2000), (3, 1000)]);
    let counts = compute_assignment(&stakes, 10).unwrap();

    assert_eq!(counts[&dbg_addr(1)], 6);
    assert_eq!(counts[&dbg_addr(2)], 3);
    assert_eq!(counts[&dbg_addr(3)], 1);
}

#[test]
fn test_even_split() {
    let stakes = snapshot(&[(1, 1000), (2, 1000), (3, 1000)]);
    let counts = compute_assignment(&stakes, 6).unwrap();

    assert_eq!(counts.len(), 3);
    assert!(counts.values().all(|count| *count == 2));
}

#[test]
fn test_near_uniform_pools_all_represented() {
    let stakes: BTreeMap<NodeId, StakeUnit> = (0..20u8)
        .map(|i| (dbg_addr(i + 1), 1000 + i as u64))
        .collect();
    let counts = compute_assignment(&stakes, 100).unwrap();

    assert_eq!(counts.len(), 20);
    assert_eq!(counts.values().map(|c| *c as u32).sum::<u32>(), 100);
}

#[test]
fn test_single_pool_takes_all_shards() {
    let stakes = snapshot(&[(1, 123)]);
    let counts = compute_assignment(&stakes, 1000).unwrap();

    assert_eq!(counts.len(), 1);
    assert_eq!(counts[&dbg_addr(1)], 1000);
}

#[test]
fn test_zero_total_stake_rejected() {
    let stakes = snapshot(&[(1, 0), (2, 0)]);
    assert_eq!(
        compute_assignment(&stakes, 10),
        Err(TidalError::NoEligibleStake)
    );

    let empty = BTreeMap::new();
    assert_eq!(
        compute_assignment(&empty, 10),
        Err(TidalError::NoEligibleStake)
    );
}

#[test]
fn test_zero_stake_pool_excluded() {
    let stakes = snapshot(&[(1, 1000), (2, 0), (3, 1000)]);
    let counts = compute_assignment(&stakes, 10).unwrap();

    assert!(!counts.contains_key(&dbg_addr(2)));
    assert_eq!(counts.values().map(|c| *c as u32).sum::<u32>(), 10);
}

#[test]
fn test_remainder_tie_broken_by_node_id() {
    // Three equal pools into 10 shards: everyone gets 3, and the one
    // leftover shard goes to the lowest node id.
    let stakes = snapshot(&[(5, 700), (9, 700), (2, 700)]);
    let counts = compute_assignment(&stakes, 10).unwrap();

    assert_eq!(counts[&dbg_addr(2)], 4);
    assert_eq!(counts[&dbg_addr(5)], 3);
    assert_eq!(counts[&dbg_addr(9)], 3);
}

#[test]
fn test_assignment_is_deterministic() {
    let stakes = snapshot(&[(1, 317), (2, 91), (3, 4096), (4, 12), (5, 2048)]);

    let first = compute_committee(7, &stakes, 100).unwrap();
    let second = compute_committee(7, &stakes, 100).unwrap();

    assert_eq!(first, second);
}

#[test]
fn test_every_shard_owned_exactly_once() {
    let stakes = snapshot(&[(1, 13), (2, 7), (3, 101), (4, 55), (5, 1), (6, 999)]);
    let committee = compute_committee(0, &stakes, 100).unwrap();

    let mut total = 0u32;
    for (node, shards) in committee.members() {
        total += shards.len() as u32;
        for shard in shards {
            assert_eq!(committee.shard_owner(*shard), Some(node));
        }
    }
    assert_eq!(total, 100);

    for index in 0..100u16 {
        assert!(committee.shard_owner(ShardIndex::new(index)).is_some());
    }
}

#[test]
fn test_shard_ranges_contiguous_in_node_order() {
    let stakes = snapshot(&[(3, 1000), (1, 1000), (2, 1000)]);
    let committee = compute_committee(0, &stakes, 9).unwrap();

    // BTreeMap order is node-id order; ranges must be handed out in that
    // same order starting from shard 0.
    let mut expected_start = 0u16;
    for (_, shards) in committee.members() {
        assert_eq!(shards[0], ShardIndex::new(expected_start));
        let values: Vec<u16> = shards.iter().map(|s| s.0).collect();
        let contiguous: Vec<u16> =
            (expected_start..expected_start + shards.len() as u16).collect();
        assert_eq!(values, contiguous);
        expected_start += shards.len() as u16;
    }
}
