//! Semantic events emitted by state transitions.
//!
//! The engine performs no I/O of its own: events accumulate in a queue owned
//! by the system state and are drained by whichever layer hosts it (see the
//! `node` crate), which forwards them to storage nodes and indexers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::base::{EpochId, NodeId};
use crate::committee::ShardIndex;

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum Event {
    /// A committee was selected for `epoch`, with the full shard assignment.
    CommitteeSelected {
        epoch: EpochId,
        assignment: BTreeMap<NodeId, Vec<ShardIndex>>,
    },

    /// The system advanced into `epoch` and entered the sync phase.
    EpochAdvanced { epoch: EpochId },

    /// `node` confirmed that it finished migrating shard data for `epoch`.
    SyncConfirmed { epoch: EpochId, node: NodeId },

    /// The escrowed payments of a completed epoch were released to its
    /// committee.
    RewardsReleased { epoch: EpochId, amount: u64 },
}
