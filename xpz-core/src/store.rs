//! Storage seams for member records and voice sessions.
//!
//! The core only assumes that a single `upsert` or `delete` is atomic for its
//! key. Serializing read-modify-write cycles is the [`Ledger`]'s job.
//!
//! [`Ledger`]: crate::ledger::Ledger

use std::collections::HashSet;

use dashmap::DashMap;

use crate::error::Result;
use crate::types::{CommunityId, MemberKey, MemberRecord, VoiceSession};

/// Persistent home of [`MemberRecord`]s.
pub trait MemberStore: Send + Sync {
    /// Fetch the record for `key`, if one was ever written.
    ///
    /// # Errors
    ///
    /// Returns an error when the backing store cannot be read.
    fn get(&self, key: MemberKey) -> Result<Option<MemberRecord>>;

    /// Insert or replace the record.
    ///
    /// # Errors
    ///
    /// Returns an error when the write fails.
    fn upsert(&self, record: &MemberRecord) -> Result<()>;

    /// Up to `limit` records of `community`, XP descending, member id ascending.
    ///
    /// # Errors
    ///
    /// Returns an error when the backing store cannot be read.
    fn top_by_xp(&self, community: CommunityId, limit: usize) -> Result<Vec<MemberRecord>>;
}

/// Persistent home of active [`VoiceSession`]s.
pub trait SessionStore: Send + Sync {
    /// Fetch the session for `key`.
    ///
    /// # Errors
    ///
    /// Returns an error when the backing store cannot be read.
    fn get_session(&self, key: MemberKey) -> Result<Option<VoiceSession>>;

    /// Insert or replace the session.
    ///
    /// # Errors
    ///
    /// Returns an error when the write fails.
    fn upsert_session(&self, session: &VoiceSession) -> Result<()>;

    /// Remove the session. Returns whether one existed.
    ///
    /// # Errors
    ///
    /// Returns an error when the write fails.
    fn delete_session(&self, key: MemberKey) -> Result<bool>;

    /// Every session in `community`.
    ///
    /// # Errors
    ///
    /// Returns an error when the backing store cannot be read.
    fn list_by_community(&self, community: CommunityId) -> Result<Vec<VoiceSession>>;

    /// Communities with at least one session, ascending.
    ///
    /// # Errors
    ///
    /// Returns an error when the backing store cannot be read.
    fn communities(&self) -> Result<Vec<CommunityId>>;
}

/// In-process store, for tests and ephemeral deployments.
#[derive(Debug, Default)]
pub struct MemoryStore {
    members: DashMap<MemberKey, MemberRecord>,
    sessions: DashMap<MemberKey, VoiceSession>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of member records held.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }
}

impl MemberStore for MemoryStore {
    fn get(&self, key: MemberKey) -> Result<Option<MemberRecord>> {
        Ok(self.members.get(&key).map(|r| r.value().clone()))
    }

    fn upsert(&self, record: &MemberRecord) -> Result<()> {
        self.members.insert(record.key(), record.clone());
        Ok(())
    }

    fn top_by_xp(&self, community: CommunityId, limit: usize) -> Result<Vec<MemberRecord>> {
        let mut records: Vec<MemberRecord> = self
            .members
            .iter()
            .filter(|r| r.key().community == community)
            .map(|r| r.value().clone())
            .collect();
        records.sort_by(|a, b| b.xp.cmp(&a.xp).then(a.member.cmp(&b.member)));
        records.truncate(limit);
        Ok(records)
    }
}

impl SessionStore for MemoryStore {
    fn get_session(&self, key: MemberKey) -> Result<Option<VoiceSession>> {
        Ok(self.sessions.get(&key).map(|s| *s.value()))
    }

    fn upsert_session(&self, session: &VoiceSession) -> Result<()> {
        self.sessions.insert(session.key(), *session);
        Ok(())
    }

    fn delete_session(&self, key: MemberKey) -> Result<bool> {
        Ok(self.sessions.remove(&key).is_some())
    }

    fn list_by_community(&self, community: CommunityId) -> Result<Vec<VoiceSession>> {
        let mut sessions: Vec<VoiceSession> = self
            .sessions
            .iter()
            .filter(|s| s.key().community == community)
            .map(|s| *s.value())
            .collect();
        sessions.sort_by_key(|s| s.member);
        Ok(sessions)
    }

    fn communities(&self) -> Result<Vec<CommunityId>> {
        let set: HashSet<CommunityId> = self.sessions.iter().map(|s| s.key().community).collect();
        let mut out: Vec<CommunityId> = set.into_iter().collect();
        out.sort();
        Ok(out)
    }
}
