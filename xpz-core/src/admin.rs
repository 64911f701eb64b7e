//! Administrative overrides.
//!
//! These are direct writes: no multiplier, no cooldown, no level-up trigger.
//! Authorization is the caller's business.

use crate::curve;
use crate::types::MemberRecord;

/// One administrative change to a member record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminOp {
    /// Set XP and recompute the level from the curve.
    SetXp(u64),
    /// Add raw XP and recompute the level from the curve.
    AddXp(u64),
    /// Set the level and move XP to the start of it.
    SetLevel(u32),
    /// Zero XP and level, keep prestige.
    ResetXp,
    /// Overwrite the prestige tier.
    SetPrestige(u32),
}

impl AdminOp {
    /// Build a `SetXp`, clamping negative input to zero.
    #[must_use]
    pub fn set_xp(xp: i64) -> Self {
        Self::SetXp(clamp_unsigned(xp))
    }

    /// Build an `AddXp`, clamping negative input to zero.
    #[must_use]
    pub fn add_xp(xp: i64) -> Self {
        Self::AddXp(clamp_unsigned(xp))
    }

    /// Build a `SetLevel`, clamping to the `u32` range.
    #[must_use]
    pub fn set_level(level: i64) -> Self {
        Self::SetLevel(u32::try_from(level.max(0)).unwrap_or(u32::MAX))
    }

    /// Build a `SetPrestige`, clamping to the `u32` range.
    #[must_use]
    pub fn set_prestige(prestige: i64) -> Self {
        Self::SetPrestige(u32::try_from(prestige.max(0)).unwrap_or(u32::MAX))
    }

    /// Command-style name, used in logs.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::SetXp(_) => "setxp",
            Self::AddXp(_) => "addxp",
            Self::SetLevel(_) => "setlevel",
            Self::ResetXp => "resetxp",
            Self::SetPrestige(_) => "setprestige",
        }
    }

    /// Apply the change. Anti-farm fields are never touched.
    pub fn apply(self, record: &mut MemberRecord) {
        match self {
            Self::SetXp(xp) => {
                record.xp = xp;
                record.level = curve::level_from_total_xp(xp);
            }
            Self::AddXp(xp) => {
                record.xp = record.xp.saturating_add(xp);
                record.level = curve::level_from_total_xp(record.xp);
            }
            Self::SetLevel(level) => {
                record.level = level;
                record.xp = curve::total_xp_for_level(level);
            }
            Self::ResetXp => {
                record.xp = 0;
                record.level = 0;
            }
            Self::SetPrestige(prestige) => record.prestige = prestige,
        }
    }
}

fn clamp_unsigned(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CommunityId, MemberId, MemberKey};

    fn record() -> MemberRecord {
        let mut rec = MemberRecord::new(MemberKey::new(CommunityId(5), MemberId(6)));
        rec.prestige = 4;
        rec.last_text_xp_at = 99;
        rec
    }

    #[test]
    fn set_xp_recomputes_level() {
        let mut rec = record();
        AdminOp::set_xp(300).apply(&mut rec);
        assert_eq!((rec.xp, rec.level), (300, 2));

        AdminOp::set_xp(-50).apply(&mut rec);
        assert_eq!((rec.xp, rec.level), (0, 0));
    }

    #[test]
    fn add_xp_has_no_multiplier() {
        let mut rec = record();
        AdminOp::add_xp(100).apply(&mut rec);
        assert_eq!((rec.xp, rec.level), (100, 1));
    }

    #[test]
    fn set_level_moves_xp_to_level_floor() {
        let mut rec = record();
        AdminOp::set_level(3).apply(&mut rec);
        assert_eq!((rec.xp, rec.level), (475, 3));
    }

    #[test]
    fn reset_keeps_prestige_and_stamps() {
        let mut rec = record();
        rec.xp = 5_000;
        rec.level = 9;
        AdminOp::ResetXp.apply(&mut rec);
        assert_eq!((rec.xp, rec.level, rec.prestige), (0, 0, 4));
        assert_eq!(rec.last_text_xp_at, 99);
    }

    #[test]
    fn set_prestige_only_touches_prestige() {
        let mut rec = record();
        rec.xp = 42;
        AdminOp::set_prestige(1).apply(&mut rec);
        assert_eq!((rec.xp, rec.prestige), (42, 1));
    }
}
