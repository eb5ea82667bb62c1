use serde::{Deserialize, Serialize};

use crate::base::{EpochId, ObjectID};
use crate::error::{TidalError, TidalResult};

/// Purchased storage capacity: `storage_size` units over the epoch range
/// `[start_epoch, end_epoch)`.
///
/// Reservations are plain owned values. Whoever holds one can split it along
/// either axis, fuse compatible pieces back together, transfer it, or
/// surrender it to the system. The capacity it represents is accounted in the
/// future accounting ring, not here.
#[derive(Debug, Serialize, Deserialize, Clone, Eq, PartialEq, Hash)]
pub struct StorageReservation {
    pub id: ObjectID,
    pub storage_size: u64,
    /// First epoch covered (inclusive)
    pub start_epoch: EpochId,
    /// First epoch no longer covered (exclusive)
    pub end_epoch: EpochId,
}

impl StorageReservation {
    pub fn new(storage_size: u64, start_epoch: EpochId, end_epoch: EpochId) -> Self {
        assert!(start_epoch < end_epoch, "empty reservation range");
        assert!(storage_size > 0, "zero-size reservation");

        Self {
            id: ObjectID::random(),
            storage_size,
            start_epoch,
            end_epoch,
        }
    }

    pub fn epochs(&self) -> u32 {
        self.end_epoch - self.start_epoch
    }

    /// Split at `at`, keeping `[start_epoch, at)` and returning `[at, end_epoch)`.
    pub fn split_by_epoch(&mut self, at: EpochId) -> TidalResult<StorageReservation> {
        if at <= self.start_epoch || at >= self.end_epoch {
            return Err(TidalError::InvalidReservation {
                reason: format!(
                    "split epoch {at} outside range [{}, {})",
                    self.start_epoch, self.end_epoch
                ),
            });
        }

        let tail = StorageReservation::new(self.storage_size, at, self.end_epoch);
        self.end_epoch = at;
        Ok(tail)
    }

    /// Split off `amount` units over the same epoch range.
    pub fn split_by_size(&mut self, amount: u64) -> TidalResult<StorageReservation> {
        if amount == 0 || amount >= self.storage_size {
            return Err(TidalError::InvalidReservation {
                reason: format!(
                    "split amount {amount} outside range (0, {})",
                    self.storage_size
                ),
            });
        }

        self.storage_size -= amount;
        Ok(StorageReservation::new(
            amount,
            self.start_epoch,
            self.end_epoch,
        ))
    }

    /// Fuse `other` into this reservation. The two must either cover adjacent
    /// epoch ranges with the same size, or the same range (sizes add).
    pub fn fuse(&mut self, other: StorageReservation) -> TidalResult {
        if self.start_epoch == other.start_epoch && self.end_epoch == other.end_epoch {
            self.storage_size += other.storage_size;
            return Ok(());
        }

        if self.storage_size == other.storage_size {
            if self.end_epoch == other.start_epoch {
                self.end_epoch = other.end_epoch;
                return Ok(());
            }
            if other.end_epoch == self.start_epoch {
                self.start_epoch = other.start_epoch;
                return Ok(());
            }
        }

        Err(TidalError::InvalidReservation {
            reason: "reservations are neither adjacent nor congruent".to_string(),
        })
    }
}
