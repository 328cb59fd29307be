//! The embedded, transactional state store.
//!
//! Wraps an optimistic-transaction RocksDB instance opened in
//! single-threaded mode: one partition, one writer. All logical column
//! families live in the default keyspace, scoped by one-byte prefixes
//! registered at open time. This keeps prefix scans across related
//! families cheap and makes a physical snapshot a single checkpoint of
//! the whole store.
//!
//! # Transactions
//!
//! [`StateStore::run_in_transaction`] executes a closure against a
//! fresh [`TransactionScope`], commits on `Ok`, and rolls back and
//! propagates on `Err`. Commit failures are classified into
//! recoverable and fatal storage errors; nothing of a rolled-back
//! transaction is ever visible afterwards.
//!
//! # Shared reads
//!
//! Column family handles are immutable and freely shared. Threads that
//! never open a transaction (health checks, the redistribution loop)
//! read through [`StateStore::read`] and [`StateStore::scan`] with
//! their own [`DbContext`].

use crate::config::StoreConfig;
use crate::error::{Error, Result, SchemaError, StorageError};
use crate::state::codec::{KeyCodec, ValueCodec};
use crate::state::column_family::ColumnFamily;
use crate::state::context::{DbContext, TransactionScope};
use parking_lot::Mutex;
use rocksdb::checkpoint::Checkpoint;
use rocksdb::{
    Direction, IteratorMode, OptimisticTransactionDB, OptimisticTransactionOptions, Options,
    SingleThreaded, WriteOptions,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The embedded ordered, transactional key-value store for one partition.
///
/// Cloneable; clones share the same underlying database.
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    db: OptimisticTransactionDB<SingleThreaded>,
    sync_writes: bool,
    families: Mutex<FamilyRegistry>,
}

#[derive(Default)]
struct FamilyRegistry {
    by_prefix: HashMap<u8, &'static str>,
}

impl StateStore {
    /// Open (or create) the store at the configured path.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(config.create_if_missing);
        opts.set_max_open_files(config.max_open_files);
        opts.set_write_buffer_size(config.write_buffer_size);
        opts.set_max_write_buffer_number(config.max_write_buffer_number);

        let db = OptimisticTransactionDB::<SingleThreaded>::open(&opts, &config.path)
            .map_err(StorageError::from_engine)?;

        info!(path = %config.path.display(), sync_writes = config.sync_writes, "State store opened");

        Ok(Self {
            inner: Arc::new(StoreInner {
                db,
                sync_writes: config.sync_writes,
                families: Mutex::new(FamilyRegistry::default()),
            }),
        })
    }

    /// Register a typed column family under the given one-byte prefix.
    ///
    /// Fails with a [`SchemaError`] if the prefix or the name collides
    /// with an already-registered family. Families live for the lifetime
    /// of the store.
    pub fn open_column_family<K: KeyCodec, V: ValueCodec>(
        &self,
        name: &'static str,
        prefix: u8,
    ) -> Result<ColumnFamily<K, V>> {
        let mut registry = self.inner.families.lock();
        if let Some(existing) = registry.by_prefix.get(&prefix) {
            return Err(SchemaError::PrefixCollision {
                prefix,
                existing: (*existing).to_string(),
            }
            .into());
        }
        if registry.by_prefix.values().any(|n| *n == name) {
            return Err(SchemaError::NameCollision {
                name: name.to_string(),
            }
            .into());
        }
        registry.by_prefix.insert(prefix, name);
        debug!(name, prefix, "Column family registered");
        Ok(ColumnFamily::new(name, prefix))
    }

    /// Execute `operations` inside a transaction.
    ///
    /// Commits on normal return; rolls back and propagates on any
    /// failure. The scope's reads observe its own uncommitted writes.
    pub fn run_in_transaction<T>(
        &self,
        ctx: &mut DbContext,
        operations: impl FnOnce(&mut TransactionScope<'_, '_>) -> Result<T>,
    ) -> Result<T> {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.inner.sync_writes);
        let txn = self
            .inner
            .db
            .transaction_opt(&write_opts, &OptimisticTransactionOptions::default());

        let mut scope = TransactionScope::new(txn, ctx);
        match operations(&mut scope) {
            Ok(value) => {
                scope
                    .txn
                    .commit()
                    .map_err(StorageError::from_engine)?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = scope.txn.rollback() {
                    warn!(error = %rollback_err, "Transaction rollback failed");
                }
                Err(err)
            }
        }
    }

    /// Single-operation read outside any transaction.
    ///
    /// For threads that only read (and therefore never conflict with
    /// the partition's writer). Uses the caller's own context.
    pub fn read<K: KeyCodec, V: ValueCodec>(
        &self,
        family: &ColumnFamily<K, V>,
        ctx: &mut DbContext,
        key: &K,
    ) -> Result<Option<V>> {
        let k = ctx.encode_key(family.prefix(), key);
        let raw = self.inner.db.get(k).map_err(StorageError::from_engine)?;
        raw.map(|bytes| V::decode_value(&bytes)).transpose()
    }

    /// Ordered full-family scan outside any transaction.
    ///
    /// Visits committed entries only; stops when the visitor returns
    /// `false`.
    pub fn scan<K: KeyCodec, V: ValueCodec>(
        &self,
        family: &ColumnFamily<K, V>,
        mut visitor: impl FnMut(K, V) -> bool,
    ) -> Result<()> {
        let bound = [family.prefix()];
        let iter = self
            .inner
            .db
            .iterator(IteratorMode::From(&bound, Direction::Forward));

        for item in iter {
            let (key_bytes, value_bytes) = item.map_err(StorageError::from_engine)?;
            if !key_bytes.starts_with(&bound) {
                break;
            }
            let key = K::decode(&key_bytes[1..])?;
            let value = V::decode_value(&value_bytes)?;
            if !visitor(key, value) {
                break;
            }
        }
        Ok(())
    }

    /// Write a consistent, point-in-time copy of the full store to
    /// `target_dir`. The directory must not exist yet.
    pub fn create_snapshot(&self, target_dir: &Path) -> Result<()> {
        if let Some(parent) = target_dir.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Internal(format!("snapshot dir: {e}")))?;
        }
        let checkpoint = Checkpoint::new(&self.inner.db).map_err(StorageError::from_engine)?;
        checkpoint
            .create_checkpoint(target_dir)
            .map_err(StorageError::from_engine)?;
        info!(target = %target_dir.display(), "Snapshot created");
        Ok(())
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.inner.db.flush().map_err(|e| StorageError::from_engine(e).into())
    }

    /// Dump every `(key, value)` byte pair in the keyspace, in order.
    ///
    /// Diagnostics and test helper; the backbone of replay-determinism
    /// checks.
    pub fn export_keyspace(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut entries = Vec::new();
        for item in self.inner.db.iterator(IteratorMode::Start) {
            let (key, value) = item.map_err(StorageError::from_engine)?;
            entries.push((key.to_vec(), value.to_vec()));
        }
        Ok(entries)
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("families", &self.inner.families.lock().by_prefix.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (StateStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig::new(dir.path()).with_sync_writes(false);
        let store = StateStore::open(&config).unwrap();
        (store, dir)
    }

    #[test]
    fn test_put_get_round_trip() {
        let (store, _dir) = create_test_store();
        let cf = store.open_column_family::<u64, String>("values", 0x01).unwrap();
        let mut ctx = DbContext::new();

        store
            .run_in_transaction(&mut ctx, |tx| cf.put(tx, &7, &"hello".to_string()))
            .unwrap();

        let value = store.read(&cf, &mut ctx, &7).unwrap();
        assert_eq!(value, Some("hello".to_string()));
        assert_eq!(store.read(&cf, &mut ctx, &8).unwrap(), None);
    }

    #[test]
    fn test_prefix_collision_rejected() {
        let (store, _dir) = create_test_store();
        store.open_column_family::<u64, u64>("first", 0x01).unwrap();

        let err = store.open_column_family::<u64, u64>("second", 0x01).unwrap_err();
        assert!(matches!(err, Error::Schema(SchemaError::PrefixCollision { .. })));

        let err = store.open_column_family::<u64, u64>("first", 0x02).unwrap_err();
        assert!(matches!(err, Error::Schema(SchemaError::NameCollision { .. })));
    }

    #[test]
    fn test_transaction_rollback_leaves_no_trace() {
        let (store, _dir) = create_test_store();
        let cf = store.open_column_family::<u64, String>("values", 0x01).unwrap();
        let mut ctx = DbContext::new();

        let result: Result<()> = store.run_in_transaction(&mut ctx, |tx| {
            cf.put(tx, &1, &"one".to_string())?;
            cf.put(tx, &2, &"two".to_string())?;
            Err(Error::Internal("boom".into()))
        });
        assert!(result.is_err());

        assert_eq!(store.read(&cf, &mut ctx, &1).unwrap(), None);
        assert_eq!(store.read(&cf, &mut ctx, &2).unwrap(), None);
    }

    #[test]
    fn test_read_your_writes() {
        let (store, _dir) = create_test_store();
        let cf = store.open_column_family::<u64, u64>("counters", 0x01).unwrap();
        let mut ctx = DbContext::new();

        store
            .run_in_transaction(&mut ctx, |tx| {
                cf.put(tx, &1, &10)?;
                // Uncommitted write must be visible to point reads...
                assert_eq!(cf.get(tx, &1)?, Some(10));
                // ...and to scans.
                let mut seen = Vec::new();
                cf.for_each(tx, |k, v| {
                    seen.push((k, v));
                    Ok(())
                })?;
                assert_eq!(seen, vec![(1, 10)]);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_families_do_not_interleave() {
        let (store, _dir) = create_test_store();
        let left = store.open_column_family::<u64, u64>("left", 0x01).unwrap();
        let right = store.open_column_family::<u64, u64>("right", 0x02).unwrap();
        let mut ctx = DbContext::new();

        store
            .run_in_transaction(&mut ctx, |tx| {
                left.put(tx, &1, &100)?;
                right.put(tx, &1, &200)?;
                right.put(tx, &2, &201)?;
                Ok(())
            })
            .unwrap();

        store
            .run_in_transaction(&mut ctx, |tx| {
                let mut left_entries = Vec::new();
                left.for_each(tx, |k, v| {
                    left_entries.push((k, v));
                    Ok(())
                })?;
                assert_eq!(left_entries, vec![(1, 100)]);
                assert!(!left.is_empty(tx)?);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_while_equal_prefix_scopes_composite_keys() {
        let (store, _dir) = create_test_store();
        let cf = store
            .open_column_family::<(u64, u64), u64>("by-owner", 0x01)
            .unwrap();
        let mut ctx = DbContext::new();

        store
            .run_in_transaction(&mut ctx, |tx| {
                cf.put(tx, &(1, 10), &0)?;
                cf.put(tx, &(1, 11), &0)?;
                cf.put(tx, &(2, 10), &0)?;
                Ok(())
            })
            .unwrap();

        store
            .run_in_transaction(&mut ctx, |tx| {
                let mut keys = Vec::new();
                cf.while_equal_prefix(tx, &1u64, |k, _| {
                    keys.push(k);
                    true
                })?;
                assert_eq!(keys, vec![(1, 10), (1, 11)]);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_while_true_stops_early() {
        let (store, _dir) = create_test_store();
        let cf = store.open_column_family::<u64, u64>("values", 0x01).unwrap();
        let mut ctx = DbContext::new();

        store
            .run_in_transaction(&mut ctx, |tx| {
                for i in 0..10 {
                    cf.put(tx, &i, &i)?;
                }
                Ok(())
            })
            .unwrap();

        store
            .run_in_transaction(&mut ctx, |tx| {
                let mut visited = 0;
                cf.while_true(tx, |_, _| {
                    visited += 1;
                    visited < 3
                })?;
                assert_eq!(visited, 3);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_persistence_across_reopen() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig::new(dir.path()).with_sync_writes(false);

        {
            let store = StateStore::open(&config).unwrap();
            let cf = store.open_column_family::<u64, String>("values", 0x01).unwrap();
            let mut ctx = DbContext::new();
            store
                .run_in_transaction(&mut ctx, |tx| cf.put(tx, &5, &"persisted".to_string()))
                .unwrap();
            store.flush().unwrap();
        }

        {
            let store = StateStore::open(&config).unwrap();
            let cf = store.open_column_family::<u64, String>("values", 0x01).unwrap();
            let mut ctx = DbContext::new();
            assert_eq!(
                store.read(&cf, &mut ctx, &5).unwrap(),
                Some("persisted".to_string())
            );
        }
    }

    #[test]
    fn test_snapshot_is_a_consistent_copy() {
        let (store, dir) = create_test_store();
        let cf = store.open_column_family::<u64, u64>("values", 0x01).unwrap();
        let mut ctx = DbContext::new();

        store
            .run_in_transaction(&mut ctx, |tx| {
                cf.put(tx, &1, &11)?;
                cf.put(tx, &2, &22)?;
                Ok(())
            })
            .unwrap();

        let target = dir.path().join("snap").join("state");
        store.create_snapshot(&target).unwrap();

        let copy = StateStore::open(&StoreConfig::new(&target).with_sync_writes(false)).unwrap();
        let cf_copy = copy.open_column_family::<u64, u64>("values", 0x01).unwrap();
        let mut copy_ctx = DbContext::new();
        assert_eq!(copy.read(&cf_copy, &mut copy_ctx, &1).unwrap(), Some(11));
        assert_eq!(copy.read(&cf_copy, &mut copy_ctx, &2).unwrap(), Some(22));
    }
}
