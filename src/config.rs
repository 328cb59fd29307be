//! Configuration types for the engine core.

use crate::types::PartitionId;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for one partition's engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// This partition's id (1-based).
    pub partition_id: PartitionId,

    /// Total number of partitions in the deployment.
    pub partition_count: u32,

    /// State store configuration.
    pub store: StoreConfig,

    /// Command distribution configuration.
    pub distribution: DistributionConfig,

    /// Checkpoint and backup configuration.
    pub checkpoint: CheckpointConfig,
}

impl EngineConfig {
    /// Create a new configuration for the given partition and store path.
    pub fn new(partition_id: PartitionId, partition_count: u32, path: impl Into<PathBuf>) -> Self {
        Self {
            partition_id,
            partition_count,
            store: StoreConfig::new(path),
            distribution: DistributionConfig::default(),
            checkpoint: CheckpointConfig::default(),
        }
    }

    /// Set the store configuration.
    pub fn with_store_config(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    /// Set the distribution configuration.
    pub fn with_distribution_config(mut self, distribution: DistributionConfig) -> Self {
        self.distribution = distribution;
        self
    }

    /// Set the checkpoint configuration.
    pub fn with_checkpoint_config(mut self, checkpoint: CheckpointConfig) -> Self {
        self.checkpoint = checkpoint;
        self
    }

    /// The ids of all other partitions, i.e. the distribution targets.
    pub fn other_partitions(&self) -> Vec<PartitionId> {
        (1..=self.partition_count)
            .filter(|p| *p != self.partition_id)
            .collect()
    }
}

/// Configuration for the embedded state store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path to the store directory.
    pub path: PathBuf,

    /// Whether to sync writes to disk on commit.
    /// Stronger durability, lower throughput.
    pub sync_writes: bool,

    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,

    /// Maximum number of open files for the embedded engine.
    pub max_open_files: i32,

    /// Write buffer size in bytes.
    pub write_buffer_size: usize,

    /// Maximum number of write buffers.
    pub max_write_buffer_number: i32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("flowcore-state"),
            sync_writes: true,
            create_if_missing: true,
            max_open_files: 1000,
            write_buffer_size: 64 * 1024 * 1024, // 64MB
            max_write_buffer_number: 3,
        }
    }
}

impl StoreConfig {
    /// Create a new config with the specified path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Set whether to sync writes.
    pub fn with_sync_writes(mut self, sync: bool) -> Self {
        self.sync_writes = sync;
        self
    }

    /// Set the write buffer size.
    pub fn with_write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = size;
        self
    }
}

/// Configuration for the command redistribution loop.
#[derive(Debug, Clone)]
pub struct DistributionConfig {
    /// Interval between scans of the retriable distributions.
    pub scan_interval: Duration,

    /// First retry delay for a pending distribution.
    pub initial_backoff: Duration,

    /// Upper bound for the per-distribution retry delay.
    pub max_backoff: Duration,

    /// Fraction of the delay added as random jitter (0.0 to 1.0).
    pub jitter: f64,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(1),
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(300), // 5 minutes
            jitter: 0.1,
        }
    }
}

impl DistributionConfig {
    /// Set the scan interval.
    pub fn with_scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval = interval;
        self
    }

    /// Set the initial retry backoff.
    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    /// Set the maximum retry backoff.
    pub fn with_max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = backoff;
        self
    }
}

/// Configuration for checkpoint-triggered backups.
#[derive(Debug, Clone)]
pub struct CheckpointConfig {
    /// Root directory for backup artifacts.
    pub backup_dir: PathBuf,

    /// Whether to compress the backup manifest body.
    pub compress: bool,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            backup_dir: PathBuf::from("./backups"),
            compress: true,
        }
    }
}

impl CheckpointConfig {
    /// Create a new configuration with the given backup directory.
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            ..Default::default()
        }
    }

    /// Set manifest compression.
    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::new(1, 3, "/tmp/p1");
        assert_eq!(config.partition_id, 1);
        assert_eq!(config.partition_count, 3);
        assert!(config.store.sync_writes);
    }

    #[test]
    fn test_other_partitions() {
        let config = EngineConfig::new(2, 3, "/tmp/p2");
        assert_eq!(config.other_partitions(), vec![1, 3]);

        let single = EngineConfig::new(1, 1, "/tmp/p1");
        assert!(single.other_partitions().is_empty());
    }

    #[test]
    fn test_config_builder() {
        let config = EngineConfig::new(1, 1, "/tmp/p1")
            .with_store_config(StoreConfig::new("/tmp/other").with_sync_writes(false))
            .with_distribution_config(
                DistributionConfig::default().with_initial_backoff(Duration::from_millis(50)),
            );

        assert!(!config.store.sync_writes);
        assert_eq!(config.distribution.initial_backoff, Duration::from_millis(50));
    }
}
