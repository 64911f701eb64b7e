//! Grant math: prestige multiplier, XP and level update, level-up detection.
//!
//! This is the synchronous half of the award path. It mutates a record in
//! place; the caller decides when to persist it and what to do about a
//! level-up crossing.

use crate::curve::{self, LevelProgress};
use crate::types::{MemberRecord, XpSource};

const BASIS_POINTS: u128 = 10_000;

/// `floor(base * (1 + prestige * bonus))`, with the bonus in basis points.
///
/// Exact integer arithmetic; saturates instead of overflowing.
#[must_use]
pub fn apply_prestige_multiplier(base: u64, prestige: u32, bonus_basis_points: u64) -> u64 {
    let factor = BASIS_POINTS + u128::from(prestige) * u128::from(bonus_basis_points);
    let scaled = u128::from(base) * factor / BASIS_POINTS;
    u64::try_from(scaled).unwrap_or(u64::MAX)
}

/// Result of one grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantOutcome {
    /// Where the XP came from.
    pub source: XpSource,
    /// Amount requested before the prestige multiplier.
    pub base: u64,
    /// Amount actually added.
    pub awarded: u64,
    /// XP before the grant.
    pub old_xp: u64,
    /// XP after the grant.
    pub new_xp: u64,
    /// Level before the grant.
    pub old_level: u32,
    /// Level after the grant.
    pub new_level: u32,
    /// Prestige tier the multiplier was computed from.
    pub prestige: u32,
}

impl GrantOutcome {
    /// The level-up crossing this grant caused, if any.
    ///
    /// A grant that skips several levels still yields a single crossing for
    /// the final level reached.
    #[must_use]
    pub fn level_up(&self) -> Option<LevelUp> {
        (self.new_level > self.old_level).then(|| LevelUp {
            source: self.source,
            old_level: self.old_level,
            new_level: self.new_level,
            prestige: self.prestige,
            total_xp: self.new_xp,
            progress: curve::progress(self.new_xp, self.new_level),
        })
    }
}

/// Everything a level-up announcement needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelUp {
    /// Source of the crossing grant.
    pub source: XpSource,
    /// Level before.
    pub old_level: u32,
    /// Level reached.
    pub new_level: u32,
    /// Current prestige tier.
    pub prestige: u32,
    /// Total XP after the grant.
    pub total_xp: u64,
    /// Position inside the new level.
    pub progress: LevelProgress,
}

/// Add `base` XP (after the prestige multiplier) to `record`.
///
/// The level only ever moves forward here:
/// `new_level = max(old_level, level_from_total_xp(new_xp))`.
pub fn apply_grant(
    record: &mut MemberRecord,
    base: u64,
    source: XpSource,
    bonus_basis_points: u64,
) -> GrantOutcome {
    let awarded = apply_prestige_multiplier(base, record.prestige, bonus_basis_points);
    let old_xp = record.xp;
    let old_level = record.level;

    let new_xp = old_xp.saturating_add(awarded);
    let new_level = old_level.max(curve::level_from_total_xp(new_xp));

    record.xp = new_xp;
    record.level = new_level;

    GrantOutcome {
        source,
        base,
        awarded,
        old_xp,
        new_xp,
        old_level,
        new_level,
        prestige: record.prestige,
    }
}
