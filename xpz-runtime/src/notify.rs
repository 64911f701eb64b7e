//! Announcement builders for level-ups and prestige.

use xpz_core::award::LevelUp;
use xpz_core::types::MemberId;

use crate::ports::Notification;

/// Level-up announcement with source, prestige, total XP and progress.
#[must_use]
pub fn level_up_notification(member: MemberId, up: &LevelUp) -> Notification {
    Notification::new(
        "Level Up!",
        format!("Member {member} is now level {}.", up.new_level),
    )
    .field("Source", up.source)
    .field("Prestige", up.prestige)
    .field("Total XP", up.total_xp)
    .field("Progress", format!("{}/{} XP", up.progress.within, up.progress.needed))
}

/// Prestige announcement with the new tier and its XP bonus.
#[must_use]
pub fn prestige_notification(member: MemberId, prestige: u32, bonus_percent: u64) -> Notification {
    Notification::new(
        "Prestige!",
        format!("Member {member} reached prestige {prestige}. Level and XP were reset."),
    )
    .field("XP bonus", format!("+{bonus_percent}%"))
}
