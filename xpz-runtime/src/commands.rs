//! Slash-command surface: rank, leaderboard, prestige and admin overrides.
//!
//! Platform adapters parse their own command payloads into [`Command`] and
//! render the returned [`Reply`]. Authorization for admin commands is the
//! adapter's call, passed in as [`Invocation::is_admin`].

use xpz_core::error::Result;
use xpz_core::prestige::PrestigeOutcome;
use xpz_core::types::{ChannelId, CommunityId, MemberId, MemberRecord};

use crate::engine::XpEngine;
use crate::ports::Notification;

/// Rows shown by the leaderboard command.
pub const LEADERBOARD_SIZE: usize = 10;

/// A parsed command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Show a member's standing (the invoker's when `target` is `None`).
    Rank {
        /// Member to look up.
        target: Option<MemberId>,
    },
    /// Show the top members.
    Leaderboard,
    /// Prestige the invoker.
    Prestige,
    /// Admin: set XP.
    SetXp {
        /// Member to change.
        target: MemberId,
        /// New XP.
        xp: i64,
    },
    /// Admin: add raw XP.
    AddXp {
        /// Member to change.
        target: MemberId,
        /// XP to add.
        xp: i64,
    },
    /// Admin: set the level.
    SetLevel {
        /// Member to change.
        target: MemberId,
        /// New level.
        level: i64,
    },
    /// Admin: zero XP and level.
    ResetXp {
        /// Member to change.
        target: MemberId,
    },
    /// Admin: set the prestige tier.
    SetPrestige {
        /// Member to change.
        target: MemberId,
        /// New tier.
        prestige: i64,
    },
}

impl Command {
    /// Whether only administrators may run this command.
    #[must_use]
    pub fn requires_admin(&self) -> bool {
        !matches!(self, Self::Rank { .. } | Self::Leaderboard | Self::Prestige)
    }
}

/// Who ran a command, and where.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Invocation {
    /// Community the command ran in.
    pub community: CommunityId,
    /// Member who ran it.
    pub invoker: MemberId,
    /// Whether the invoker holds administrator rights.
    pub is_admin: bool,
    /// Channel the command ran in.
    pub channel: ChannelId,
}

/// What to show the invoker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// A rich card, visible to the channel.
    Card(Notification),
    /// Plain text, visible to the channel.
    Public(String),
    /// Plain text, visible to the invoker only.
    Private(String),
}

/// Run `command` against `engine`.
///
/// # Errors
///
/// Propagates store failures.
pub fn execute(engine: &XpEngine, invocation: &Invocation, command: Command) -> Result<Reply> {
    if command.requires_admin() && !invocation.is_admin {
        return Ok(Reply::Private("Only administrators can use this command.".into()));
    }
    let community = invocation.community;

    match command {
        Command::Rank { target } => {
            let member = target.unwrap_or(invocation.invoker);
            let card = engine.rank(community, member)?;
            Ok(Reply::Card(
                Notification::new(format!("Rank of member {member}"), String::new())
                    .field("Prestige", card.prestige)
                    .field("Level", card.level)
                    .field("Total XP", card.xp)
                    .field(
                        "To next level",
                        format!("{}/{} XP", card.within_level_xp, card.needed_xp),
                    ),
            ))
        }
        Command::Leaderboard => {
            let top = engine.leaderboard(community, LEADERBOARD_SIZE)?;
            if top.is_empty() {
                return Ok(Reply::Private("No data yet.".into()));
            }
            let lines: Vec<String> = top
                .iter()
                .enumerate()
                .map(|(idx, e)| {
                    format!(
                        "{}. Member {} | P{} | L{} | {} XP",
                        idx + 1,
                        e.member,
                        e.prestige,
                        e.level,
                        e.xp
                    )
                })
                .collect();
            Ok(Reply::Card(Notification::new("Leaderboard", lines.join("\n"))))
        }
        Command::Prestige => {
            let outcome =
                engine.request_prestige(community, invocation.invoker, Some(invocation.channel))?;
            match outcome {
                PrestigeOutcome::Promoted { prestige } => Ok(Reply::Private(format!(
                    "Prestige successful: now prestige {prestige}."
                ))),
                PrestigeOutcome::NotEligible {
                    current_level,
                    required_level,
                } => Ok(Reply::Private(format!(
                    "You need level {required_level} to prestige (currently {current_level})."
                ))),
            }
        }
        Command::SetXp { target, xp } => {
            let rec = engine.set_xp(community, target, xp)?;
            Ok(admin_reply("XP set", &rec))
        }
        Command::AddXp { target, xp } => {
            let rec = engine.add_xp(community, target, xp)?;
            Ok(admin_reply("XP added", &rec))
        }
        Command::SetLevel { target, level } => {
            let rec = engine.set_level(community, target, level)?;
            Ok(admin_reply("Level set", &rec))
        }
        Command::ResetXp { target } => {
            let rec = engine.reset_xp(community, target)?;
            Ok(Reply::Private(format!(
                "Reset: member {target} is back to 0 XP / level 0 (prestige stays {}).",
                rec.prestige
            )))
        }
        Command::SetPrestige { target, prestige } => {
            let rec = engine.set_prestige(community, target, prestige)?;
            Ok(Reply::Private(format!(
                "Prestige set: member {target} is now prestige {}.",
                rec.prestige
            )))
        }
    }
}

fn admin_reply(action: &str, rec: &MemberRecord) -> Reply {
    Reply::Private(format!(
        "{action}: member {} now has {} XP (level {}).",
        rec.member, rec.xp, rec.level
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_classification() {
        assert!(!Command::Rank { target: None }.requires_admin());
        assert!(!Command::Leaderboard.requires_admin());
        assert!(!Command::Prestige.requires_admin());
        assert!(Command::ResetXp { target: MemberId(1) }.requires_admin());
        assert!(Command::SetPrestige { target: MemberId(1), prestige: 2 }.requires_admin());
    }
}
