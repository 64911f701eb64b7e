//! Voice presence tracking.
//!
//! Sessions are opened and closed from voice-state-change events and checked
//! again on every sweep, because the platform does not guarantee delivery of
//! every leave event. The sweep itself lives in the runtime; this module holds
//! the decisions it makes.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::award::{self, GrantOutcome};
use crate::config::VoiceXpConfig;
use crate::error::Result;
use crate::store::SessionStore;
use crate::types::{
    ChannelId, CommunityId, MemberKey, MemberRecord, UnixSeconds, VoiceSession, XpSource,
};

// ---------------------------------------------------------------------------
// Presence snapshot
// ---------------------------------------------------------------------------

/// What the platform reports about a member's voice presence right now.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemberVoiceState {
    /// Voice channel the member is in, if any.
    pub channel: Option<ChannelId>,
    /// Muted themselves.
    pub self_mute: bool,
    /// Deafened themselves.
    pub self_deaf: bool,
    /// Muted by a moderator.
    pub server_mute: bool,
    /// Deafened by a moderator.
    pub server_deaf: bool,
}

impl MemberVoiceState {
    /// Present in `channel` with every flag clear.
    #[must_use]
    pub fn in_channel(channel: ChannelId) -> Self {
        Self {
            channel: Some(channel),
            ..Self::default()
        }
    }

    /// Any of the four mute/deaf flags set.
    #[must_use]
    pub fn is_muted(&self) -> bool {
        self.self_mute || self.self_deaf || self.server_mute || self.server_deaf
    }
}

// ---------------------------------------------------------------------------
// Session transitions
// ---------------------------------------------------------------------------

/// What a voice-state change should do to the member's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    /// Open (or move) the session into this channel.
    Open(ChannelId),
    /// Drop the session.
    Close,
    /// Leave it alone.
    Keep,
}

/// Decide the session action for a move from `old` to `new`.
#[must_use]
pub fn plan_transition(
    config: &VoiceXpConfig,
    old: Option<ChannelId>,
    new: Option<ChannelId>,
) -> SessionAction {
    match (old, new) {
        (None, None) => SessionAction::Keep,
        (Some(_), None) => SessionAction::Close,
        (None, Some(to)) if config.exempt_channels.contains(&to) => SessionAction::Keep,
        (None, Some(to)) => SessionAction::Open(to),
        (Some(from), Some(to)) if from == to => SessionAction::Keep,
        (Some(_), Some(to)) if config.exempt_channels.contains(&to) => SessionAction::Close,
        (Some(_), Some(to)) => SessionAction::Open(to),
    }
}

/// What actually happened to the stored session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionChange {
    /// A new session was opened.
    Started {
        /// Channel joined.
        channel: ChannelId,
    },
    /// An existing session moved and was re-stamped.
    Moved {
        /// Channel left.
        from: ChannelId,
        /// Channel joined.
        to: ChannelId,
    },
    /// The session was removed.
    Ended {
        /// Channel the session was in.
        channel: ChannelId,
    },
    /// Nothing changed.
    Unchanged,
}

/// Owner of the voice session table.
///
/// Every read-then-write for a member runs under that member's lock, so a
/// sweep acting on an old snapshot cannot clobber a newer session.
pub struct SessionTracker {
    store: Arc<dyn SessionStore>,
    locks: DashMap<MemberKey, Arc<Mutex<()>>>,
}

impl std::fmt::Debug for SessionTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTracker").finish_non_exhaustive()
    }
}

impl SessionTracker {
    /// Wrap a session store.
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, key: MemberKey) -> Arc<Mutex<()>> {
        Arc::clone(&*self.locks.entry(key).or_default())
    }

    /// Apply `action` for `key` at `now`.
    ///
    /// Replaying the same action yields the same stored state.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn apply(
        &self,
        key: MemberKey,
        action: SessionAction,
        now: UnixSeconds,
    ) -> Result<SessionChange> {
        let lock = self.lock_for(key);
        let _guard = lock.lock();

        let existing = self.store.get_session(key)?;
        let change = match (action, existing) {
            (SessionAction::Keep, _) | (SessionAction::Close, None) => SessionChange::Unchanged,
            (SessionAction::Close, Some(session)) => {
                self.store.delete_session(key)?;
                SessionChange::Ended {
                    channel: session.channel,
                }
            }
            (SessionAction::Open(channel), Some(session)) if session.channel == channel => {
                SessionChange::Unchanged
            }
            (SessionAction::Open(channel), existing) => {
                self.store.upsert_session(&VoiceSession {
                    community: key.community,
                    member: key.member,
                    channel,
                    joined_at: now,
                })?;
                match existing {
                    Some(previous) => SessionChange::Moved {
                        from: previous.channel,
                        to: channel,
                    },
                    None => SessionChange::Started { channel },
                }
            }
        };
        if change != SessionChange::Unchanged {
            debug!(member = %key, ?change, "Voice session updated");
        }
        Ok(change)
    }

    /// The session for `key`, if any.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn get(&self, key: MemberKey) -> Result<Option<VoiceSession>> {
        self.store.get_session(key)
    }

    /// Every active session across all communities.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn all(&self) -> Result<Vec<VoiceSession>> {
        let mut sessions = Vec::new();
        for community in self.store.communities()? {
            sessions.extend(self.store.list_by_community(community)?);
        }
        Ok(sessions)
    }

    /// Sessions of one community.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn in_community(&self, community: CommunityId) -> Result<Vec<VoiceSession>> {
        self.store.list_by_community(community)
    }

    /// Drop a session that no longer reflects reality.
    ///
    /// `session` is the snapshot the caller judged stale. Nothing is removed
    /// when the stored session has since been replaced or closed.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn heal(&self, session: &VoiceSession, reason: StaleReason) -> Result<bool> {
        let lock = self.lock_for(session.key());
        let _guard = lock.lock();

        if self.store.get_session(session.key())?.as_ref() != Some(session) {
            debug!(member = %session.key(), "Session changed since sweep snapshot, not healing");
            return Ok(false);
        }
        let removed = self.store.delete_session(session.key())?;
        if removed {
            info!(
                member = %session.key(),
                channel = %session.channel,
                reason = reason.label(),
                "Removed stale voice session"
            );
        }
        Ok(removed)
    }

    /// Run `f` only while `session` is still the stored session for its member.
    ///
    /// The member's session lock is held for the duration of `f`, so no join,
    /// move or leave can interleave. Returns `None` when the session changed.
    ///
    /// # Errors
    ///
    /// Propagates store failures and errors from `f`.
    pub fn while_current<T>(
        &self,
        session: &VoiceSession,
        f: impl FnOnce() -> Result<T>,
    ) -> Result<Option<T>> {
        let lock = self.lock_for(session.key());
        let _guard = lock.lock();

        if self.store.get_session(session.key())?.as_ref() != Some(session) {
            return Ok(None);
        }
        f().map(Some)
    }
}

// ---------------------------------------------------------------------------
// Sweep decisions
// ---------------------------------------------------------------------------

/// Why a stored session no longer matches the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    /// The member could not be found (or the lookup failed).
    MemberGone,
    /// The member is elsewhere, or in no channel at all.
    ChannelMismatch,
}

impl StaleReason {
    /// Short label for logs.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::MemberGone => "member_gone",
            Self::ChannelMismatch => "channel_mismatch",
        }
    }
}

/// Compare a stored session with the member's live state.
#[must_use]
pub fn validate(session: &VoiceSession, live: Option<&MemberVoiceState>) -> Option<StaleReason> {
    match live {
        None => Some(StaleReason::MemberGone),
        Some(state) if state.channel != Some(session.channel) => Some(StaleReason::ChannelMismatch),
        Some(_) => None,
    }
}

/// Why a valid session earned nothing this sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceSkip {
    /// The channel never earns voice XP.
    ExemptChannel,
    /// Muted or deafened while unmuted presence is required.
    Muted,
    /// Not enough non-bot members in the channel.
    TooFewMembers {
        /// Non-bot members counted.
        present: usize,
    },
    /// The member count could not be obtained.
    CountUnavailable,
}

impl VoiceSkip {
    /// Short label for logs.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::ExemptChannel => "exempt_channel",
            Self::Muted => "muted",
            Self::TooFewMembers { .. } => "too_few_members",
            Self::CountUnavailable => "count_unavailable",
        }
    }
}

/// Check the per-sweep eligibility rules for a validated session.
///
/// `present` is the non-bot head count of the channel, `None` when the
/// lookup failed.
///
/// # Errors
///
/// Returns the first rule that failed.
pub fn check_eligibility(
    config: &VoiceXpConfig,
    channel: ChannelId,
    state: &MemberVoiceState,
    present: Option<usize>,
) -> std::result::Result<(), VoiceSkip> {
    if config.exempt_channels.contains(&channel) {
        return Err(VoiceSkip::ExemptChannel);
    }
    if config.require_unmuted && state.is_muted() {
        return Err(VoiceSkip::Muted);
    }
    match present {
        None => Err(VoiceSkip::CountUnavailable),
        Some(present) if present < config.min_members => Err(VoiceSkip::TooFewMembers { present }),
        Some(_) => Ok(()),
    }
}

/// Result of a voice award attempt inside the ledger transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceAward {
    /// XP granted and `last_voice_xp_at` stamped.
    Granted(GrantOutcome),
    /// Too soon after the previous voice award.
    Throttled {
        /// Seconds until the next award is possible.
        remaining: i64,
    },
}

/// Throttle check plus flat grant, applied to `record` in one step.
pub fn award(
    config: &VoiceXpConfig,
    record: &mut MemberRecord,
    now: UnixSeconds,
    bonus_basis_points: u64,
) -> VoiceAward {
    let since = now.saturating_sub(record.last_voice_xp_at);
    if since < config.award_interval_seconds {
        return VoiceAward::Throttled {
            remaining: config.award_interval_seconds - since,
        };
    }
    record.last_voice_xp_at = now;
    VoiceAward::Granted(award::apply_grant(
        record,
        u64::from(config.xp_per_award),
        XpSource::Voice,
        bonus_basis_points,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::MemberId;

    const A: ChannelId = ChannelId(100);
    const B: ChannelId = ChannelId(200);
    const AFK: ChannelId = ChannelId(999);

    fn config() -> VoiceXpConfig {
        let mut config = VoiceXpConfig::default();
        config.exempt_channels.insert(AFK);
        config
    }

    fn key() -> MemberKey {
        MemberKey::new(CommunityId(1), MemberId(2))
    }

    #[test]
    fn transition_table() {
        let c = config();
        assert_eq!(plan_transition(&c, None, None), SessionAction::Keep);
        assert_eq!(plan_transition(&c, None, Some(A)), SessionAction::Open(A));
        assert_eq!(plan_transition(&c, None, Some(AFK)), SessionAction::Keep);
        assert_eq!(plan_transition(&c, Some(A), None), SessionAction::Close);
        assert_eq!(plan_transition(&c, Some(A), Some(A)), SessionAction::Keep);
        assert_eq!(plan_transition(&c, Some(A), Some(B)), SessionAction::Open(B));
        assert_eq!(plan_transition(&c, Some(A), Some(AFK)), SessionAction::Close);
    }

    #[test]
    fn tracker_lifecycle_is_idempotent() {
        let tracker = SessionTracker::new(Arc::new(MemoryStore::new()));

        let change = tracker.apply(key(), SessionAction::Open(A), 10).expect("open");
        assert_eq!(change, SessionChange::Started { channel: A });
        let change = tracker.apply(key(), SessionAction::Open(A), 20).expect("replay");
        assert_eq!(change, SessionChange::Unchanged);
        assert_eq!(tracker.get(key()).expect("get").map(|s| s.joined_at), Some(10));

        let change = tracker.apply(key(), SessionAction::Open(B), 30).expect("move");
        assert_eq!(change, SessionChange::Moved { from: A, to: B });
        assert_eq!(tracker.get(key()).expect("get").map(|s| s.joined_at), Some(30));

        let change = tracker.apply(key(), SessionAction::Close, 40).expect("close");
        assert_eq!(change, SessionChange::Ended { channel: B });
        let change = tracker.apply(key(), SessionAction::Close, 50).expect("replay close");
        assert_eq!(change, SessionChange::Unchanged);
        assert!(tracker.all().expect("all").is_empty());
    }

    #[test]
    fn heal_leaves_a_newer_session_alone() {
        let tracker = SessionTracker::new(Arc::new(MemoryStore::new()));
        tracker.apply(key(), SessionAction::Open(A), 10).expect("open");
        let snapshot = tracker.get(key()).expect("get").expect("session");

        tracker.apply(key(), SessionAction::Open(B), 20).expect("move");
        assert!(!tracker.heal(&snapshot, StaleReason::ChannelMismatch).expect("heal"));
        assert_eq!(tracker.get(key()).expect("get").map(|s| s.channel), Some(B));

        let current = tracker.get(key()).expect("get").expect("session");
        assert!(tracker.heal(&current, StaleReason::MemberGone).expect("heal"));
        assert!(tracker.get(key()).expect("get").is_none());
    }

    #[test]
    fn while_current_skips_replaced_or_closed_sessions() {
        let tracker = SessionTracker::new(Arc::new(MemoryStore::new()));
        tracker.apply(key(), SessionAction::Open(A), 10).expect("open");
        let snapshot = tracker.get(key()).expect("get").expect("session");

        assert_eq!(tracker.while_current(&snapshot, || Ok(7)).expect("current"), Some(7));

        tracker.apply(key(), SessionAction::Close, 20).expect("close");
        let mut ran = false;
        let skipped = tracker
            .while_current(&snapshot, || {
                ran = true;
                Ok(())
            })
            .expect("closed");
        assert_eq!(skipped, None);
        assert!(!ran);
    }

    #[test]
    fn validation() {
        let session = VoiceSession {
            community: CommunityId(1),
            member: MemberId(2),
            channel: A,
            joined_at: 0,
        };
        assert_eq!(validate(&session, None), Some(StaleReason::MemberGone));
        let elsewhere = MemberVoiceState::in_channel(B);
        assert_eq!(validate(&session, Some(&elsewhere)), Some(StaleReason::ChannelMismatch));
        let gone = MemberVoiceState::default();
        assert_eq!(validate(&session, Some(&gone)), Some(StaleReason::ChannelMismatch));
        let here = MemberVoiceState::in_channel(A);
        assert_eq!(validate(&session, Some(&here)), None);
    }

    #[test]
    fn eligibility_rules() {
        let c = config();
        let here = MemberVoiceState::in_channel(A);
        assert_eq!(check_eligibility(&c, A, &here, Some(2)), Ok(()));
        assert_eq!(
            check_eligibility(&c, A, &here, Some(1)),
            Err(VoiceSkip::TooFewMembers { present: 1 })
        );
        assert_eq!(check_eligibility(&c, A, &here, None), Err(VoiceSkip::CountUnavailable));
        assert_eq!(check_eligibility(&c, AFK, &here, Some(5)), Err(VoiceSkip::ExemptChannel));

        let muted = MemberVoiceState { server_deaf: true, ..here };
        assert_eq!(check_eligibility(&c, A, &muted, Some(5)), Err(VoiceSkip::Muted));

        let lenient = VoiceXpConfig { require_unmuted: false, ..config() };
        assert_eq!(check_eligibility(&lenient, A, &muted, Some(5)), Ok(()));
    }

    #[test]
    fn award_throttles_and_stamps() {
        let c = config();
        let mut rec = MemberRecord::new(key());
        let VoiceAward::Granted(outcome) = award(&c, &mut rec, 1_000, 500) else {
            panic!("first award should be granted");
        };
        assert_eq!(outcome.awarded, 5);
        assert_eq!(rec.last_voice_xp_at, 1_000);

        assert_eq!(award(&c, &mut rec, 1_045, 500), VoiceAward::Throttled { remaining: 15 });
        assert_eq!(rec.xp, 5);
        assert!(matches!(award(&c, &mut rec, 1_060, 500), VoiceAward::Granted(_)));
        assert_eq!(rec.xp, 10);
    }
}
