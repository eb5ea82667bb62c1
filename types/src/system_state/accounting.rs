//! Rolling capacity and payment ledger for future epochs.
//!
//! The ring holds one record per epoch inside the accounting horizon, indexed
//! by `epoch % horizon`. Advancing vacates the record of the epoch being left
//! behind and recycles its slot for the newly reachable epoch at the far end
//! of the horizon.

use serde::{Deserialize, Serialize};

use crate::base::EpochId;
use crate::error::{TidalError, TidalResult};

/// Capacity and payment state for a single future epoch.
#[derive(Debug, Serialize, Deserialize, Clone, Eq, PartialEq, Hash)]
pub struct FutureAccountingRecord {
    pub epoch: EpochId,

    /// Capacity reserved for this epoch so far, in units of size
    pub used_capacity_size: u64,

    /// Capacity ceiling declared by the committee covering this epoch
    pub total_capacity_size: u64,

    /// Price per unit of size for this epoch
    pub price_per_unit_size: u64,

    /// Payments escrowed for this epoch, released when it completes
    pub rewards_to_distribute: u64,
}

impl FutureAccountingRecord {
    fn fresh(epoch: EpochId, total_capacity_size: u64, price_per_unit_size: u64) -> Self {
        Self {
            epoch,
            used_capacity_size: 0,
            total_capacity_size,
            price_per_unit_size,
            rewards_to_distribute: 0,
        }
    }

    pub fn available_capacity(&self) -> u64 {
        self.total_capacity_size - self.used_capacity_size
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Eq, PartialEq)]
pub struct FutureAccountingRing {
    /// Epoch of the front (current) slot
    start_epoch: EpochId,
    records: Vec<FutureAccountingRecord>,
}

impl FutureAccountingRing {
    pub fn new(
        start_epoch: EpochId,
        horizon: u32,
        total_capacity_size: u64,
        price_per_unit_size: u64,
    ) -> Self {
        assert!(horizon > 0, "accounting horizon must be nonzero");

        let records = (0..horizon)
            .map(|ahead| {
                FutureAccountingRecord::fresh(
                    start_epoch + ahead,
                    total_capacity_size,
                    price_per_unit_size,
                )
            })
            .collect();

        Self {
            start_epoch,
            records,
        }
    }

    pub fn horizon(&self) -> u32 {
        self.records.len() as u32
    }

    pub fn start_epoch(&self) -> EpochId {
        self.start_epoch
    }

    fn slot(&self, epoch: EpochId) -> usize {
        (epoch % self.horizon()) as usize
    }

    fn in_horizon(&self, epoch: EpochId) -> bool {
        epoch >= self.start_epoch && epoch - self.start_epoch < self.horizon()
    }

    /// The record for `epoch`, which must lie within the horizon.
    pub fn record(&self, epoch: EpochId) -> &FutureAccountingRecord {
        assert!(self.in_horizon(epoch), "epoch {epoch} outside the horizon");
        &self.records[self.slot(epoch)]
    }

    fn record_mut(&mut self, epoch: EpochId) -> &mut FutureAccountingRecord {
        assert!(self.in_horizon(epoch), "epoch {epoch} outside the horizon");
        let slot = self.slot(epoch);
        &mut self.records[slot]
    }

    /// The record of the epoch currently in progress.
    pub fn current(&self) -> &FutureAccountingRecord {
        &self.records[self.slot(self.start_epoch)]
    }

    /// Total payment owed for holding `storage_size` units across the next
    /// `epochs_ahead` epochs, at each epoch's own price.
    pub fn reservation_cost(&self, storage_size: u64, epochs_ahead: u32) -> TidalResult<u64> {
        self.check_range(epochs_ahead)?;

        let mut cost: u128 = 0;
        for epoch in self.start_epoch..self.start_epoch + epochs_ahead {
            cost += (storage_size as u128) * (self.record(epoch).price_per_unit_size as u128);
        }

        u64::try_from(cost).map_err(|_| TidalError::InvalidArguments {
            reason: format!("reservation cost {cost} overflows"),
        })
    }

    /// Reserve `storage_size` units for the next `epochs_ahead` epochs.
    ///
    /// Every epoch in the range is checked before any is mutated; a
    /// reservation that does not fit some epoch fails whole, leaving the ring
    /// unchanged. On success each covered record's usage grows by
    /// `storage_size` and its escrow by `storage_size * price`. Returns the
    /// total cost accrued.
    pub fn reserve(&mut self, storage_size: u64, epochs_ahead: u32) -> TidalResult<u64> {
        let cost = self.reservation_cost(storage_size, epochs_ahead)?;

        for epoch in self.start_epoch..self.start_epoch + epochs_ahead {
            let record = self.record(epoch);
            if storage_size > record.available_capacity() {
                return Err(TidalError::CapacityExceeded {
                    epoch,
                    requested: storage_size,
                    available: record.available_capacity(),
                });
            }
        }

        for epoch in self.start_epoch..self.start_epoch + epochs_ahead {
            let record = self.record_mut(epoch);
            record.used_capacity_size += storage_size;
            record.rewards_to_distribute += storage_size * record.price_per_unit_size;
        }

        Ok(cost)
    }

    /// Free `storage_size` units for the epochs of `[from_epoch, to_epoch)`
    /// still inside the horizon. Escrowed payments are not clawed back.
    pub fn release(&mut self, storage_size: u64, from_epoch: EpochId, to_epoch: EpochId) {
        let from = from_epoch.max(self.start_epoch);
        let to = to_epoch.min(self.start_epoch + self.horizon());

        for epoch in from..to {
            let record = self.record_mut(epoch);
            record.used_capacity_size = record.used_capacity_size.saturating_sub(storage_size);
        }
    }

    /// Add a carried-over balance to the current epoch's escrow.
    pub fn carry_rewards(&mut self, amount: u64) {
        let start_epoch = self.start_epoch;
        self.record_mut(start_epoch).rewards_to_distribute += amount;
    }

    /// Advance one epoch: vacate and return the front record, and recycle its
    /// slot for the epoch now entering the horizon, with the capacity and
    /// price declared by the incoming committee.
    pub fn advance(
        &mut self,
        new_total_capacity_size: u64,
        new_price_per_unit_size: u64,
    ) -> FutureAccountingRecord {
        let slot = self.slot(self.start_epoch);
        let new_max_epoch = self.start_epoch + self.horizon();

        let vacated = std::mem::replace(
            &mut self.records[slot],
            FutureAccountingRecord::fresh(
                new_max_epoch,
                new_total_capacity_size,
                new_price_per_unit_size,
            ),
        );

        self.start_epoch += 1;

        vacated
    }

    fn check_range(&self, epochs_ahead: u32) -> TidalResult {
        if epochs_ahead == 0 {
            return Err(TidalError::InvalidArguments {
                reason: "reservation must cover at least one epoch".to_string(),
            });
        }
        if epochs_ahead > self.horizon() {
            return Err(TidalError::ReservationTooLong {
                requested: epochs_ahead,
                horizon: self.horizon(),
            });
        }
        Ok(())
    }
}
