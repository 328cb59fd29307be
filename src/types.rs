//! Core types shared across the engine.

use serde::{Deserialize, Serialize};

/// Partition identifier. Partitions are numbered starting at 1.
pub type PartitionId = u32;

/// Number of bits of an entity key reserved for the partition id.
pub const PARTITION_BITS: u32 = 13;

/// Number of bits of an entity key carrying the partition-local counter.
pub const COUNTER_BITS: u32 = 64 - PARTITION_BITS;

/// Highest partition id that fits the key layout.
pub const MAX_PARTITION_ID: PartitionId = (1 << PARTITION_BITS) - 1;

/// Mask selecting the counter bits of an entity key.
pub const COUNTER_MASK: u64 = (1 << COUNTER_BITS) - 1;

/// Build an entity key from a partition id and a partition-local counter.
///
/// The partition id occupies the upper [`PARTITION_BITS`] bits, so keys
/// allocated on different partitions never collide.
pub fn encode_entity_key(partition_id: PartitionId, counter: u64) -> u64 {
    debug_assert!(partition_id <= MAX_PARTITION_ID);
    debug_assert!(counter <= COUNTER_MASK);
    (u64::from(partition_id) << COUNTER_BITS) | (counter & COUNTER_MASK)
}

/// Extract the originating partition id from an entity key.
pub fn key_partition(key: u64) -> PartitionId {
    (key >> COUNTER_BITS) as PartitionId
}

/// Extract the partition-local counter from an entity key.
pub fn key_counter(key: u64) -> u64 {
    key & COUNTER_MASK
}

/// Ordering mode for cross-partition command distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistributionOrdering {
    /// Commands in the same queue are applied by each receiving partition
    /// in the same relative order they were distributed from the origin.
    /// The value names the queue.
    Ordered(u64),
    /// No cross-command ordering guarantee; cheaper to transmit.
    Unordered,
}

impl DistributionOrdering {
    /// The queue id, if this is an ordered distribution.
    pub fn queue_id(&self) -> Option<u64> {
        match self {
            Self::Ordered(queue) => Some(*queue),
            Self::Unordered => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_key_round_trip() {
        let key = encode_entity_key(3, 42);
        assert_eq!(key_partition(key), 3);
        assert_eq!(key_counter(key), 42);
    }

    #[test]
    fn test_entity_keys_do_not_collide_across_partitions() {
        let a = encode_entity_key(1, 7);
        let b = encode_entity_key(2, 7);
        assert_ne!(a, b);
    }

    #[test]
    fn test_entity_keys_are_ordered_within_a_partition() {
        let a = encode_entity_key(5, 1);
        let b = encode_entity_key(5, 2);
        assert!(a < b);
    }

    #[test]
    fn test_max_partition_fits() {
        let key = encode_entity_key(MAX_PARTITION_ID, COUNTER_MASK);
        assert_eq!(key_partition(key), MAX_PARTITION_ID);
        assert_eq!(key_counter(key), COUNTER_MASK);
    }
}
