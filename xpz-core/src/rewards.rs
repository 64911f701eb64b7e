//! Role rewards. Which threshold roles a member should hold at a level.
//!
//! Selection is pure: given the thresholds, the member's new level and the
//! roles they currently hold, produce a plan of grants and revocations. The
//! runtime executes the plan best-effort.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::types::RoleId;

/// A role granted once a member reaches `level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleReward {
    /// Minimum level.
    pub level: u32,
    /// Role handed out.
    pub role: RoleId,
}

/// How multiple earned rewards interact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardMode {
    /// Keep every earned threshold role.
    #[default]
    Stack,
    /// Keep only the highest earned threshold role.
    HighestOnly,
}

/// Role changes to apply to one member.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewardPlan {
    /// Roles to add, lowest threshold first.
    pub grant: Vec<RoleId>,
    /// Roles to remove.
    pub revoke: Vec<RoleId>,
}

impl RewardPlan {
    /// Whether the plan changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.grant.is_empty() && self.revoke.is_empty()
    }
}

/// Thresholds at or below `level`, ascending by level.
#[must_use]
pub fn eligible(rewards: &[RoleReward], level: u32) -> Vec<RoleReward> {
    let mut earned: Vec<RoleReward> = rewards
        .iter()
        .copied()
        .filter(|r| r.level <= level)
        .collect();
    earned.sort_by_key(|r| r.level);
    earned
}

/// Decide which roles to add and remove for a member now at `level`.
///
/// With no eligible threshold nothing changes, in either mode.
#[must_use]
pub fn plan(
    rewards: &[RoleReward],
    mode: RewardMode,
    level: u32,
    held: &HashSet<RoleId>,
) -> RewardPlan {
    let earned = eligible(rewards, level);
    let Some(highest) = earned.last().copied() else {
        return RewardPlan::default();
    };

    match mode {
        RewardMode::Stack => RewardPlan {
            grant: earned
                .iter()
                .map(|r| r.role)
                .filter(|role| !held.contains(role))
                .collect(),
            revoke: Vec::new(),
        },
        RewardMode::HighestOnly => {
            let grant = if held.contains(&highest.role) {
                Vec::new()
            } else {
                vec![highest.role]
            };
            let mut revoke: Vec<RoleId> = rewards
                .iter()
                .map(|r| r.role)
                .filter(|role| *role != highest.role && held.contains(role))
                .collect();
            revoke.sort();
            revoke.dedup();
            RewardPlan { grant, revoke }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ladder() -> Vec<RoleReward> {
        vec![
            RoleReward { level: 20, role: RoleId(3) },
            RoleReward { level: 5, role: RoleId(1) },
            RoleReward { level: 10, role: RoleId(2) },
        ]
    }

    fn held(ids: &[u64]) -> HashSet<RoleId> {
        ids.iter().copied().map(RoleId).collect()
    }

    #[test]
    fn below_first_threshold_is_noop() {
        let plan = plan(&ladder(), RewardMode::HighestOnly, 4, &held(&[2]));
        assert!(plan.is_empty(), "nothing eligible means no revocations either");
    }

    #[test]
    fn stack_grants_all_missing_thresholds() {
        let plan = plan(&ladder(), RewardMode::Stack, 12, &held(&[1]));
        assert_eq!(plan.grant, vec![RoleId(2)]);
        assert!(plan.revoke.is_empty());
    }

    #[test]
    fn stack_covers_skipped_levels() {
        let plan = plan(&ladder(), RewardMode::Stack, 25, &HashSet::new());
        assert_eq!(plan.grant, vec![RoleId(1), RoleId(2), RoleId(3)]);
    }

    #[test]
    fn highest_only_swaps_roles() {
        let plan = plan(&ladder(), RewardMode::HighestOnly, 10, &held(&[1, 3]));
        assert_eq!(plan.grant, vec![RoleId(2)]);
        assert_eq!(plan.revoke, vec![RoleId(1), RoleId(3)]);
    }

    #[test]
    fn highest_only_already_held() {
        let plan = plan(&ladder(), RewardMode::HighestOnly, 30, &held(&[3]));
        assert!(plan.is_empty());
    }
}
