//! Per-thread database context and transaction scope.
//!
//! A [`DbContext`] is the reusable scratch space for one processing
//! thread: key and value encode buffers that are filled and overwritten
//! on every store call, so the hot path does not allocate. The buffers
//! are not safe for concurrent use; create one context per thread.
//!
//! A [`TransactionScope`] bundles an open transaction with the context
//! it borrows. At most one scope exists per context at a time, enforced
//! by the mutable borrow. Reads inside a scope observe its own
//! uncommitted writes, for point lookups and scans alike.

use crate::error::Result;
use crate::state::codec::{KeyCodec, ValueCodec};
use rocksdb::{OptimisticTransactionDB, Transaction};

/// Reusable per-thread scratch space for store calls.
#[derive(Debug)]
pub struct DbContext {
    pub(crate) key_buf: Vec<u8>,
    pub(crate) value_buf: Vec<u8>,
}

impl DbContext {
    /// Create a context with preallocated encode buffers.
    pub fn new() -> Self {
        Self {
            key_buf: Vec::with_capacity(64),
            value_buf: Vec::with_capacity(512),
        }
    }

    /// Encode `prefix || key` into the key buffer and return it.
    pub(crate) fn encode_key<K: KeyCodec>(&mut self, prefix: u8, key: &K) -> &[u8] {
        self.key_buf.clear();
        self.key_buf.push(prefix);
        key.encode_into(&mut self.key_buf);
        &self.key_buf
    }

    /// Encode key and value into the context buffers and return both.
    pub(crate) fn encode_pair<K: KeyCodec, V: ValueCodec>(
        &mut self,
        prefix: u8,
        key: &K,
        value: &V,
    ) -> Result<(&[u8], &[u8])> {
        self.key_buf.clear();
        self.key_buf.push(prefix);
        key.encode_into(&mut self.key_buf);
        value.encode_value(&mut self.value_buf)?;
        Ok((&self.key_buf, &self.value_buf))
    }
}

impl Default for DbContext {
    fn default() -> Self {
        Self::new()
    }
}

/// An open transaction plus the context it borrows.
///
/// Spans exactly one record's processing step; must not be held across
/// an asynchronous boundary.
pub struct TransactionScope<'db, 'ctx> {
    pub(crate) txn: Transaction<'db, OptimisticTransactionDB>,
    pub(crate) ctx: &'ctx mut DbContext,
}

impl<'db, 'ctx> TransactionScope<'db, 'ctx> {
    pub(crate) fn new(
        txn: Transaction<'db, OptimisticTransactionDB>,
        ctx: &'ctx mut DbContext,
    ) -> Self {
        Self { txn, ctx }
    }
}
