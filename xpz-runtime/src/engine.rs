//! The XP engine: event handling, grants, voice sweeps and read commands.
//!
//! Each handler does its platform lookups first, then runs one ledger
//! transaction for the member, then queues side effects. Ledger and session
//! locks are never held across an `.await`, and a session lock is always
//! taken before the ledger lock.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, info_span, warn, Instrument};

use xpz_core::admin::AdminOp;
use xpz_core::award::{self, GrantOutcome, LevelUp};
use xpz_core::config::XpzConfig;
use xpz_core::curve;
use xpz_core::error::Result;
use xpz_core::filter::{self, TextRejection, TextVerdict};
use xpz_core::ledger::{Commit, Ledger};
use xpz_core::metrics::{spans, XpzCounters};
use xpz_core::prestige::{self, PrestigeOutcome};
use xpz_core::store::{MemberStore, SessionStore};
use xpz_core::types::{
    ChannelId, CommunityId, MemberId, MemberKey, MemberRecord, VoiceSession, XpSource,
};
use xpz_core::voice::{self, MemberVoiceState, SessionChange, SessionTracker, VoiceAward};

use crate::clock::{Clock, SystemClock};
use crate::effects::{Effect, EffectQueue};
use crate::events::{TextEvent, VoiceStateChange};
use crate::notify;
use crate::ports::{Directory, PortError};

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// What a text event produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextOutcome {
    /// Bot authors are ignored outright.
    Ignored,
    /// The filter refused the message.
    Rejected(TextRejection),
    /// The message earned XP.
    Awarded(GrantOutcome),
}

/// Tally of one voice sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VoiceTickReport {
    /// Sessions examined.
    pub sessions: usize,
    /// Voice awards granted.
    pub awarded: usize,
    /// Stale sessions removed.
    pub healed: usize,
    /// Valid sessions that failed an eligibility rule.
    pub ineligible: usize,
    /// Eligible sessions still inside the award interval.
    pub throttled: usize,
    /// Sessions skipped because a store call failed.
    pub failed: usize,
    /// Sessions left alone because a join, move or leave landed mid-sweep.
    pub superseded: usize,
}

/// A member's standing, for rank displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankCard {
    /// Cumulative XP.
    pub xp: u64,
    /// Current level.
    pub level: u32,
    /// Prestige tier.
    pub prestige: u32,
    /// XP earned inside the current level.
    pub within_level_xp: u64,
    /// XP the current level spans.
    pub needed_xp: u64,
}

/// One leaderboard row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaderboardEntry {
    /// The member.
    pub member: MemberId,
    /// Cumulative XP.
    pub xp: u64,
    /// Current level.
    pub level: u32,
    /// Prestige tier.
    pub prestige: u32,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Owns the ledger and session tracker and drives every XP flow.
pub struct XpEngine {
    config: Arc<XpzConfig>,
    ledger: Ledger,
    sessions: SessionTracker,
    directory: Arc<dyn Directory>,
    effects: EffectQueue,
    clock: Arc<dyn Clock>,
    rng: Mutex<StdRng>,
    counters: Arc<XpzCounters>,
}

impl std::fmt::Debug for XpEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XpEngine")
            .field("ledger", &self.ledger)
            .field("effects", &self.effects)
            .finish_non_exhaustive()
    }
}

impl XpEngine {
    /// Assemble an engine. Uses the system clock and an entropy-seeded RNG.
    #[must_use]
    pub fn new(
        config: Arc<XpzConfig>,
        members: Arc<dyn MemberStore>,
        sessions: Arc<dyn SessionStore>,
        directory: Arc<dyn Directory>,
        effects: EffectQueue,
    ) -> Self {
        Self {
            config,
            ledger: Ledger::new(members),
            sessions: SessionTracker::new(sessions),
            directory,
            effects,
            clock: Arc::new(SystemClock),
            rng: Mutex::new(StdRng::from_entropy()),
            counters: Arc::new(XpzCounters::new()),
        }
    }

    /// Replace the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Make text award rolls reproducible.
    #[must_use]
    pub fn with_seed(self, seed: u64) -> Self {
        *self.rng.lock() = StdRng::seed_from_u64(seed);
        self
    }

    /// Share an existing counter set (e.g. with an [`EffectWorker`](crate::effects::EffectWorker)).
    #[must_use]
    pub fn with_counters(mut self, counters: Arc<XpzCounters>) -> Self {
        self.counters = counters;
        self
    }

    /// Engine configuration.
    #[must_use]
    pub fn config(&self) -> &XpzConfig {
        &self.config
    }

    /// Engine counters.
    #[must_use]
    pub fn counters(&self) -> &Arc<XpzCounters> {
        &self.counters
    }

    fn bonus_bp(&self) -> u64 {
        self.config.prestige.bonus_basis_points()
    }

    fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.config.voice.lookup_timeout_ms)
    }

    /// Await a directory call, treating failure and timeout as "not found".
    async fn lookup<T>(
        &self,
        what: &'static str,
        call: impl Future<Output = std::result::Result<T, PortError>>,
    ) -> Option<T> {
        match tokio::time::timeout(self.lookup_timeout(), call).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(err)) => {
                debug!(lookup = what, error = %err, "Directory lookup failed");
                None
            }
            Err(_) => {
                debug!(
                    lookup = what,
                    timeout_ms = self.config.voice.lookup_timeout_ms,
                    "Directory lookup timed out"
                );
                None
            }
        }
    }

    // -----------------------------------------------------------------
    // Text
    // -----------------------------------------------------------------

    /// Run a text event through the filter and award XP if it qualifies.
    ///
    /// # Errors
    ///
    /// Propagates store failures for this member only.
    pub fn handle_text(&self, event: &TextEvent) -> Result<TextOutcome> {
        if event.is_bot {
            return Ok(TextOutcome::Ignored);
        }
        let _span = info_span!(
            spans::TEXT_EVENT,
            community = %event.community,
            member = %event.author
        )
        .entered();
        let key = MemberKey::new(event.community, event.author);
        let now = event.timestamp;
        let outcome = self.ledger.transact(key, |rec| {
            let verdict =
                filter::evaluate(&self.config.text, rec, event.channel, &event.content, now);
            let changed = verdict.apply(rec, now);
            let outcome = match verdict {
                TextVerdict::Award { .. } => {
                    let base = filter::roll_award(&self.config.text, &mut *self.rng.lock());
                    let grant =
                        award::apply_grant(rec, u64::from(base), XpSource::Text, self.bonus_bp());
                    TextOutcome::Awarded(grant)
                }
                TextVerdict::Reject(reason) => TextOutcome::Rejected(reason),
            };
            if changed {
                Commit::Persist(outcome)
            } else {
                Commit::Discard(outcome)
            }
        })?;

        match &outcome {
            TextOutcome::Awarded(grant) => {
                XpzCounters::bump(&self.counters.text_awarded);
                debug!(awarded = grant.awarded, xp = grant.new_xp, "Text XP awarded");
                if let Some(up) = grant.level_up() {
                    self.announce_level_up(key, &up, Some(event.channel));
                }
            }
            TextOutcome::Rejected(reason) => {
                XpzCounters::bump(&self.counters.text_rejected);
                if matches!(reason, TextRejection::Duplicate { .. }) {
                    XpzCounters::bump(&self.counters.text_duplicates);
                }
                debug!(reason = reason.label(), "Text event rejected");
            }
            TextOutcome::Ignored => {}
        }
        Ok(outcome)
    }

    // -----------------------------------------------------------------
    // Grants
    // -----------------------------------------------------------------

    /// Grant `base` XP (before the prestige multiplier) to a member.
    ///
    /// A level-up crossing queues role rewards and, when a target channel is
    /// known, one announcement.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn grant_xp(
        &self,
        community: CommunityId,
        member: MemberId,
        base: u64,
        source: XpSource,
        origin_channel: Option<ChannelId>,
    ) -> Result<GrantOutcome> {
        let key = MemberKey::new(community, member);
        let grant = self.ledger.transact(key, |rec| {
            Commit::Persist(award::apply_grant(rec, base, source, self.bonus_bp()))
        })?;
        if let Some(up) = grant.level_up() {
            self.announce_level_up(key, &up, origin_channel);
        }
        Ok(grant)
    }

    fn announce_level_up(&self, key: MemberKey, up: &LevelUp, origin_channel: Option<ChannelId>) {
        XpzCounters::bump(&self.counters.level_ups);
        info!(
            member = %key,
            source = %up.source,
            old_level = up.old_level,
            new_level = up.new_level,
            "Level up"
        );
        self.push(Effect::ApplyRewards {
            community: key.community,
            member: key.member,
            level: up.new_level,
        });
        if let Some(channel) = self.announcement_channel(origin_channel) {
            self.push(Effect::Notify {
                community: key.community,
                channel,
                notification: notify::level_up_notification(key.member, up),
            });
        }
    }

    fn announcement_channel(&self, origin: Option<ChannelId>) -> Option<ChannelId> {
        self.config.notifications.level_up_channel.or(origin)
    }

    fn push(&self, effect: Effect) {
        if !self.effects.enqueue(effect) {
            XpzCounters::bump(&self.counters.effects_dropped);
            warn!(depth = self.effects.len(), "Effect queue full, dropping side effect");
        }
    }

    // -----------------------------------------------------------------
    // Voice
    // -----------------------------------------------------------------

    /// Open, move or close the member's voice session.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn handle_voice_change(&self, change: &VoiceStateChange) -> Result<SessionChange> {
        if change.is_bot {
            return Ok(SessionChange::Unchanged);
        }
        let _span = info_span!(
            spans::VOICE_CHANGE,
            community = %change.community,
            member = %change.member
        )
        .entered();
        let action =
            voice::plan_transition(&self.config.voice, change.old_channel, change.new_channel);
        let key = MemberKey::new(change.community, change.member);
        self.sessions.apply(key, action, self.clock.now())
    }

    /// One sweep over every active session.
    ///
    /// Stale sessions are removed, eligible members get the flat voice award
    /// if their interval has passed. A store failure on one session is logged
    /// and counted; the sweep continues.
    ///
    /// # Errors
    ///
    /// Returns an error only when the session list itself cannot be read.
    pub async fn voice_tick(&self) -> Result<VoiceTickReport> {
        self.sweep_all().instrument(info_span!(spans::VOICE_TICK)).await
    }

    async fn sweep_all(&self) -> Result<VoiceTickReport> {
        let sessions = self.sessions.all()?;
        let mut report = VoiceTickReport {
            sessions: sessions.len(),
            ..VoiceTickReport::default()
        };
        for session in sessions {
            if let Err(err) = self.sweep_session(&session, &mut report).await {
                report.failed += 1;
                warn!(member = %session.key(), error = %err, "Voice sweep failed for session");
            }
        }
        if report.sessions > 0 {
            debug!(?report, "Voice sweep finished");
        }
        Ok(report)
    }

    async fn sweep_session(
        &self,
        session: &VoiceSession,
        report: &mut VoiceTickReport,
    ) -> Result<()> {
        let live: Option<MemberVoiceState> = self
            .lookup("voice_state", self.directory.voice_state(session.community, session.member))
            .await
            .flatten();
        if let Some(reason) = voice::validate(session, live.as_ref()) {
            if self.sessions.heal(session, reason)? {
                report.healed += 1;
                XpzCounters::bump(&self.counters.sessions_healed);
            } else {
                report.superseded += 1;
            }
            return Ok(());
        }
        let Some(state) = live else {
            return Ok(());
        };

        let present = self
            .lookup(
                "present_members",
                self.directory.present_members(session.community, session.channel),
            )
            .await
            .map(|members| members.len());
        let eligibility =
            voice::check_eligibility(&self.config.voice, session.channel, &state, present);
        if let Err(skip) = eligibility {
            report.ineligible += 1;
            XpzCounters::bump(&self.counters.voice_ineligible);
            debug!(member = %session.key(), reason = skip.label(), "Voice session ineligible");
            return Ok(());
        }

        let now = self.clock.now();
        let outcome = self.sessions.while_current(session, || {
            self.ledger.transact(session.key(), |rec| {
                match voice::award(&self.config.voice, rec, now, self.bonus_bp()) {
                    granted @ VoiceAward::Granted(_) => Commit::Persist(granted),
                    throttled @ VoiceAward::Throttled { .. } => Commit::Discard(throttled),
                }
            })
        })?;
        let Some(outcome) = outcome else {
            report.superseded += 1;
            debug!(member = %session.key(), "Session changed during sweep, skipping award");
            return Ok(());
        };
        match outcome {
            VoiceAward::Granted(grant) => {
                report.awarded += 1;
                XpzCounters::bump(&self.counters.voice_awarded);
                if let Some(up) = grant.level_up() {
                    self.announce_level_up(session.key(), &up, None);
                }
            }
            VoiceAward::Throttled { .. } => {
                report.throttled += 1;
                XpzCounters::bump(&self.counters.voice_throttled);
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Prestige & admin
    // -----------------------------------------------------------------

    /// Reset level and XP in exchange for the next prestige tier.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn request_prestige(
        &self,
        community: CommunityId,
        member: MemberId,
        channel: Option<ChannelId>,
    ) -> Result<PrestigeOutcome> {
        let key = MemberKey::new(community, member);
        let outcome = self.ledger.transact(key, |rec| {
            match prestige::transition(&self.config.prestige, rec) {
                promoted @ PrestigeOutcome::Promoted { .. } => Commit::Persist(promoted),
                refused => Commit::Discard(refused),
            }
        })?;
        if let PrestigeOutcome::Promoted { prestige: tier } = outcome {
            XpzCounters::bump(&self.counters.prestiges);
            info!(member = %key, prestige = tier, "Prestige");
            if let Some(channel) = self.announcement_channel(channel) {
                let bonus = prestige::bonus_percent(&self.config.prestige, tier);
                self.push(Effect::Notify {
                    community,
                    channel,
                    notification: notify::prestige_notification(member, tier, bonus),
                });
            }
        }
        Ok(outcome)
    }

    /// Apply an administrative override and return the resulting record.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn admin(
        &self,
        community: CommunityId,
        member: MemberId,
        op: AdminOp,
    ) -> Result<MemberRecord> {
        let key = MemberKey::new(community, member);
        let record = self.ledger.transact(key, |rec| {
            op.apply(rec);
            Commit::Persist(rec.clone())
        })?;
        info!(
            member = %key,
            op = op.name(),
            xp = record.xp,
            level = record.level,
            "Admin override"
        );
        Ok(record)
    }

    /// Set XP; the level follows the curve. Negative input counts as zero.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn set_xp(
        &self,
        community: CommunityId,
        member: MemberId,
        xp: i64,
    ) -> Result<MemberRecord> {
        self.admin(community, member, AdminOp::set_xp(xp))
    }

    /// Add raw XP without multiplier or level-up announcement.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn add_xp(
        &self,
        community: CommunityId,
        member: MemberId,
        xp: i64,
    ) -> Result<MemberRecord> {
        self.admin(community, member, AdminOp::add_xp(xp))
    }

    /// Set the level; XP moves to the start of that level.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn set_level(
        &self,
        community: CommunityId,
        member: MemberId,
        level: i64,
    ) -> Result<MemberRecord> {
        self.admin(community, member, AdminOp::set_level(level))
    }

    /// Zero XP and level. Prestige is kept.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn reset_xp(&self, community: CommunityId, member: MemberId) -> Result<MemberRecord> {
        self.admin(community, member, AdminOp::ResetXp)
    }

    /// Overwrite the prestige tier.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn set_prestige(
        &self,
        community: CommunityId,
        member: MemberId,
        prestige: i64,
    ) -> Result<MemberRecord> {
        self.admin(community, member, AdminOp::set_prestige(prestige))
    }

    // -----------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------

    /// A member's XP, level, prestige and progress. Unknown members rank at zero.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn rank(&self, community: CommunityId, member: MemberId) -> Result<RankCard> {
        let rec = self.ledger.snapshot(MemberKey::new(community, member))?;
        let progress = curve::progress(rec.xp, rec.level);
        Ok(RankCard {
            xp: rec.xp,
            level: rec.level,
            prestige: rec.prestige,
            within_level_xp: progress.within,
            needed_xp: progress.needed,
        })
    }

    /// Top `limit` members by XP; ties go to the lower member id.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn leaderboard(
        &self,
        community: CommunityId,
        limit: usize,
    ) -> Result<Vec<LeaderboardEntry>> {
        Ok(self
            .ledger
            .top(community, limit)?
            .into_iter()
            .map(|rec| LeaderboardEntry {
                member: rec.member,
                xp: rec.xp,
                level: rec.level,
                prestige: rec.prestige,
            })
            .collect())
    }
}
