//! Monotonic, partition-scoped entity key allocation.
//!
//! The generator persists only the partition-local counter, in its own
//! single-row column family, inside the caller's transaction: a rolled
//! back processing step also rolls back the keys it allocated. The
//! partition id is mixed into the upper key bits on allocation, so keys
//! from different partitions never collide.

use crate::error::Result;
use crate::state::column_family::ColumnFamily;
use crate::state::context::TransactionScope;
use crate::types::{encode_entity_key, key_counter, key_partition, PartitionId};

/// Allocates strictly increasing entity keys for one partition.
#[derive(Debug, Clone, Copy)]
pub struct KeyGenerator {
    partition_id: PartitionId,
    family: ColumnFamily<(), u64>,
}

impl KeyGenerator {
    pub(crate) fn new(partition_id: PartitionId, family: ColumnFamily<(), u64>) -> Self {
        Self {
            partition_id,
            family,
        }
    }

    /// Allocate the next key within the open transaction.
    pub fn next_key(&self, tx: &mut TransactionScope<'_, '_>) -> Result<u64> {
        let current = self.family.get(tx, &())?.unwrap_or(0);
        let next = current + 1;
        self.family.put(tx, &(), &next)?;
        Ok(encode_entity_key(self.partition_id, next))
    }

    /// Raise the persisted counter to cover `key`, if it was allocated
    /// here. Called while replaying events that carry generated keys,
    /// so that post-recovery allocations stay strictly greater.
    pub fn track_key(&self, tx: &mut TransactionScope<'_, '_>, key: u64) -> Result<()> {
        if key_partition(key) != self.partition_id {
            return Ok(());
        }
        let counter = key_counter(key);
        let current = self.family.get(tx, &())?.unwrap_or(0);
        if counter > current {
            self.family.put(tx, &(), &counter)?;
        }
        Ok(())
    }
}
