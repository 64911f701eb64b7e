//! Prestige transition: trade a high level for a permanent XP bonus.

use crate::config::PrestigeConfig;
use crate::types::MemberRecord;

/// Result of a prestige request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrestigeOutcome {
    /// XP and level were reset and the tier went up by one.
    Promoted {
        /// The new prestige tier.
        prestige: u32,
    },
    /// The member has not reached the required level.
    NotEligible {
        /// Level the member is at.
        current_level: u32,
        /// Level the member needs.
        required_level: u32,
    },
}

impl PrestigeOutcome {
    /// Whether the transition happened.
    #[must_use]
    pub fn is_promoted(self) -> bool {
        matches!(self, Self::Promoted { .. })
    }
}

/// Attempt the transition on `record`.
///
/// Only XP, level and prestige change. Cooldown stamps and last-message state
/// stay as they were.
pub fn transition(config: &PrestigeConfig, record: &mut MemberRecord) -> PrestigeOutcome {
    if record.level < config.min_level {
        return PrestigeOutcome::NotEligible {
            current_level: record.level,
            required_level: config.min_level,
        };
    }
    record.prestige = record.prestige.saturating_add(1);
    record.xp = 0;
    record.level = 0;
    PrestigeOutcome::Promoted {
        prestige: record.prestige,
    }
}

/// The total XP bonus a tier grants, in whole percent (rounded).
#[must_use]
pub fn bonus_percent(config: &PrestigeConfig, prestige: u32) -> u64 {
    (u64::from(prestige) * config.bonus_basis_points() + 50) / 100
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve;
    use crate::types::{CommunityId, MemberId, MemberKey};

    fn record_at(level: u32) -> MemberRecord {
        let mut rec = MemberRecord::new(MemberKey::new(CommunityId(1), MemberId(1)));
        rec.level = level;
        rec.xp = curve::total_xp_for_level(level);
        rec.last_text_xp_at = 111;
        rec.last_voice_xp_at = 222;
        rec.last_message_normalized = "gg".into();
        rec.last_message_at = 333;
        rec
    }

    #[test]
    fn level_99_is_refused_untouched() {
        let mut rec = record_at(99);
        let before = rec.clone();
        let outcome = transition(&PrestigeConfig::default(), &mut rec);
        assert_eq!(
            outcome,
            PrestigeOutcome::NotEligible { current_level: 99, required_level: 100 }
        );
        assert_eq!(rec, before);
    }

    #[test]
    fn level_100_resets_and_keeps_anti_farm_state() {
        let mut rec = record_at(100);
        rec.prestige = 2;
        let outcome = transition(&PrestigeConfig::default(), &mut rec);
        assert_eq!(outcome, PrestigeOutcome::Promoted { prestige: 3 });
        assert_eq!(rec.xp, 0);
        assert_eq!(rec.level, 0);
        assert_eq!(rec.last_text_xp_at, 111);
        assert_eq!(rec.last_voice_xp_at, 222);
        assert_eq!(rec.last_message_normalized, "gg");
        assert_eq!(rec.last_message_at, 333);
    }

    #[test]
    fn bonus_percent_rounds() {
        let config = PrestigeConfig::default();
        assert_eq!(bonus_percent(&config, 0), 0);
        assert_eq!(bonus_percent(&config, 1), 5);
        assert_eq!(bonus_percent(&config, 3), 15);
    }
}
