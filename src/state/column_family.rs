//! Typed column families over the shared physical keyspace.
//!
//! A column family is a named, strongly-typed key→value mapping. All
//! families share the embedded store's single ordered keyspace; each is
//! scoped by a one-byte prefix, so keys of one family never interleave
//! with another's and a full-family scan is a single prefix scan.
//!
//! The handle itself is a plain `(prefix, name)` pair with type markers.
//! It is `Copy`, immutable, and freely shareable; all data access goes
//! through a [`TransactionScope`].

use crate::error::{Result, StorageError};
use crate::state::codec::{KeyCodec, ValueCodec};
use crate::state::context::TransactionScope;
use rocksdb::{Direction, IteratorMode};
use std::marker::PhantomData;

/// A typed view over one prefix of the shared keyspace.
pub struct ColumnFamily<K, V> {
    prefix: u8,
    name: &'static str,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> Clone for ColumnFamily<K, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K, V> Copy for ColumnFamily<K, V> {}

impl<K, V> std::fmt::Debug for ColumnFamily<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnFamily")
            .field("name", &self.name)
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl<K, V> ColumnFamily<K, V>
where
    K: KeyCodec,
    V: ValueCodec,
{
    pub(crate) fn new(name: &'static str, prefix: u8) -> Self {
        Self {
            prefix,
            name,
            _marker: PhantomData,
        }
    }

    /// The family's registered name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The family's one-byte keyspace prefix.
    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// Insert or overwrite a key-value pair.
    pub fn put(&self, tx: &mut TransactionScope<'_, '_>, key: &K, value: &V) -> Result<()> {
        let (k, v) = tx.ctx.encode_pair(self.prefix, key, value)?;
        tx.txn.put(k, v).map_err(|e| StorageError::from_engine(e).into())
    }

    /// Look up a key, observing the scope's uncommitted writes.
    pub fn get(&self, tx: &mut TransactionScope<'_, '_>, key: &K) -> Result<Option<V>> {
        let k = tx.ctx.encode_key(self.prefix, key);
        let raw = tx.txn.get(k).map_err(StorageError::from_engine)?;
        raw.map(|bytes| V::decode_value(&bytes)).transpose()
    }

    /// Delete a key. Deleting an absent key is a no-op.
    pub fn delete(&self, tx: &mut TransactionScope<'_, '_>, key: &K) -> Result<()> {
        let k = tx.ctx.encode_key(self.prefix, key);
        tx.txn.delete(k).map_err(|e| StorageError::from_engine(e).into())
    }

    /// Whether the key exists.
    pub fn exists(&self, tx: &mut TransactionScope<'_, '_>, key: &K) -> Result<bool> {
        let k = tx.ctx.encode_key(self.prefix, key);
        let raw = tx.txn.get(k).map_err(StorageError::from_engine)?;
        Ok(raw.is_some())
    }

    /// Whether the family holds no entries at all.
    pub fn is_empty(&self, tx: &mut TransactionScope<'_, '_>) -> Result<bool> {
        let mut any = false;
        self.while_true(tx, |_, _| {
            any = true;
            false
        })?;
        Ok(!any)
    }

    /// Visit every entry in key order.
    pub fn for_each(
        &self,
        tx: &mut TransactionScope<'_, '_>,
        mut visitor: impl FnMut(K, V) -> Result<()>,
    ) -> Result<()> {
        self.iterate(tx, &[], |key, value| {
            visitor(key, value)?;
            Ok(true)
        })
    }

    /// Visit entries in key order until the visitor returns `false`.
    pub fn while_true(
        &self,
        tx: &mut TransactionScope<'_, '_>,
        mut visitor: impl FnMut(&K, &V) -> bool,
    ) -> Result<()> {
        self.iterate(tx, &[], |key, value| Ok(visitor(&key, &value)))
    }

    /// Visit, in key order, exactly the entries whose encoded key starts
    /// with `key_prefix`'s encoded bytes. This is the primitive behind
    /// all by-owner secondary lookups.
    pub fn while_equal_prefix<P: KeyCodec>(
        &self,
        tx: &mut TransactionScope<'_, '_>,
        key_prefix: &P,
        mut visitor: impl FnMut(K, V) -> bool,
    ) -> Result<()> {
        let mut prefix = Vec::with_capacity(P::ENCODED_LEN);
        key_prefix.encode_into(&mut prefix);
        self.iterate(tx, &prefix, |key, value| Ok(visitor(key, value)))
    }

    /// Ordered iteration over keys starting with `prefix || within`,
    /// decoding each entry and stopping when the visitor returns
    /// `Ok(false)` or the scan leaves the range.
    fn iterate(
        &self,
        tx: &mut TransactionScope<'_, '_>,
        within: &[u8],
        mut visitor: impl FnMut(K, V) -> Result<bool>,
    ) -> Result<()> {
        let start = tx.ctx.encode_key(self.prefix, &Raw(within));
        let bound = start.to_vec();
        let iter = tx
            .txn
            .iterator(IteratorMode::From(&bound, Direction::Forward));

        for item in iter {
            let (key_bytes, value_bytes) = item.map_err(StorageError::from_engine)?;
            if !key_bytes.starts_with(&bound) {
                break;
            }
            let key = K::decode(&key_bytes[1..])?;
            let value = V::decode_value(&value_bytes)?;
            if !visitor(key, value)? {
                break;
            }
        }
        Ok(())
    }
}

/// Pre-encoded key fragment used to build scan bounds.
struct Raw<'a>(&'a [u8]);

impl KeyCodec for Raw<'_> {
    const ENCODED_LEN: usize = 0;

    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.0);
    }

    fn decode(_bytes: &[u8]) -> Result<Self> {
        Err(StorageError::Corruption("scan bounds cannot be decoded".into()).into())
    }
}
