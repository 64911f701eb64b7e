//! XP Ledger: serialized read-modify-write over member records.
//!
//! Every mutation of a [`MemberRecord`] goes through [`Ledger::transact`],
//! which holds a per-key mutex for the whole load, mutate, persist cycle.
//! Different members never contend. The lock is synchronous and must not be
//! held across an `.await`; callers do their async lookups first.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::Result;
use crate::store::MemberStore;
use crate::types::{CommunityId, MemberKey, MemberRecord};

/// What to do with the record once a transaction closure returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commit<T> {
    /// Write the record back, then return the value.
    Persist(T),
    /// Drop any changes and return the value.
    Discard(T),
}

/// Owner of all member records.
pub struct Ledger {
    store: Arc<dyn MemberStore>,
    locks: DashMap<MemberKey, Arc<Mutex<()>>>,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("locked_keys", &self.locks.len())
            .finish_non_exhaustive()
    }
}

impl Ledger {
    /// Wrap a member store.
    #[must_use]
    pub fn new(store: Arc<dyn MemberStore>) -> Self {
        Self {
            store,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, key: MemberKey) -> Arc<Mutex<()>> {
        // Clone out of the shard before locking so the shard guard is released.
        Arc::clone(&*self.locks.entry(key).or_default())
    }

    /// Run `f` against the record for `key` under that key's lock.
    ///
    /// A missing record is default-initialized. It is only written when the
    /// closure returns [`Commit::Persist`].
    ///
    /// # Errors
    ///
    /// Propagates store read and write failures. On a failed write the
    /// closure's changes are lost and nothing is returned.
    pub fn transact<T>(
        &self,
        key: MemberKey,
        f: impl FnOnce(&mut MemberRecord) -> Commit<T>,
    ) -> Result<T> {
        let lock = self.lock_for(key);
        let _guard = lock.lock();

        let mut record = self
            .store
            .get(key)?
            .unwrap_or_else(|| MemberRecord::new(key));

        match f(&mut record) {
            Commit::Persist(value) => {
                self.store.upsert(&record)?;
                debug!(member = %key, xp = record.xp, level = record.level, "Ledger write");
                Ok(value)
            }
            Commit::Discard(value) => Ok(value),
        }
    }

    /// Current record for `key`, or a default one. Never writes.
    ///
    /// # Errors
    ///
    /// Propagates store read failures.
    pub fn snapshot(&self, key: MemberKey) -> Result<MemberRecord> {
        Ok(self
            .store
            .get(key)?
            .unwrap_or_else(|| MemberRecord::new(key)))
    }

    /// Top `limit` records of a community by XP.
    ///
    /// # Errors
    ///
    /// Propagates store read failures.
    pub fn top(&self, community: CommunityId, limit: usize) -> Result<Vec<MemberRecord>> {
        self.store.top_by_xp(community, limit)
    }
}
