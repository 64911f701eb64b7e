//! Core type definitions for the XPZ engine.
//!
//! Platform identifiers are opaque 64-bit snowflakes. Each kind gets its own
//! newtype so a channel can never be passed where a member is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};

/// Unix timestamp in whole seconds.
pub type UnixSeconds = i64;

// ---------------------------------------------------------------------------
// Identity Types
// ---------------------------------------------------------------------------

macro_rules! snowflake {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }

        // Stored as TEXT so the full u64 range survives SQLite's signed integers.
        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.0.to_string()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                match value {
                    ValueRef::Text(bytes) => std::str::from_utf8(bytes)
                        .ok()
                        .and_then(|s| s.parse::<u64>().ok())
                        .map(Self)
                        .ok_or(FromSqlError::InvalidType),
                    ValueRef::Integer(i) => u64::try_from(i)
                        .map(Self)
                        .map_err(|_| FromSqlError::OutOfRange(i)),
                    _ => Err(FromSqlError::InvalidType),
                }
            }
        }
    };
}

snowflake!(
    /// A community (chat server). All records are partitioned by community.
    CommunityId
);
snowflake!(
    /// A member of a community.
    MemberId
);
snowflake!(
    /// A text or voice channel.
    ChannelId
);
snowflake!(
    /// A platform role handed out as a level reward.
    RoleId
);

/// Primary key of both persisted tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberKey {
    /// Owning community.
    pub community: CommunityId,
    /// The member inside that community.
    pub member: MemberId,
}

impl MemberKey {
    /// Build a key from its parts.
    #[must_use]
    pub const fn new(community: CommunityId, member: MemberId) -> Self {
        Self { community, member }
    }
}

impl fmt::Display for MemberKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.community, self.member)
    }
}

// ---------------------------------------------------------------------------
// Member Record
// ---------------------------------------------------------------------------

/// Persistent XP state of one member in one community.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRecord {
    /// Community the record belongs to.
    pub community: CommunityId,
    /// Member the record belongs to.
    pub member: MemberId,
    /// Cumulative XP.
    pub xp: u64,
    /// Cached level, never lower than the curve level on the grant path.
    pub level: u32,
    /// Number of completed prestige transitions.
    pub prestige: u32,
    /// Last time text XP was granted (0 = never).
    pub last_text_xp_at: UnixSeconds,
    /// Last time voice XP was granted (0 = never).
    pub last_voice_xp_at: UnixSeconds,
    /// Normalized body of the last considered message.
    pub last_message_normalized: String,
    /// Last time a text event was considered (0 = never).
    pub last_message_at: UnixSeconds,
}

impl MemberRecord {
    /// A fresh record with every field at its default.
    #[must_use]
    pub fn new(key: MemberKey) -> Self {
        Self {
            community: key.community,
            member: key.member,
            xp: 0,
            level: 0,
            prestige: 0,
            last_text_xp_at: 0,
            last_voice_xp_at: 0,
            last_message_normalized: String::new(),
            last_message_at: 0,
        }
    }

    /// The record's primary key.
    #[must_use]
    pub fn key(&self) -> MemberKey {
        MemberKey::new(self.community, self.member)
    }
}

// ---------------------------------------------------------------------------
// Voice Session
// ---------------------------------------------------------------------------

/// "Member is present in this voice channel since `joined_at`."
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceSession {
    /// Owning community.
    pub community: CommunityId,
    /// The tracked member.
    pub member: MemberId,
    /// Voice channel the member was last seen in.
    pub channel: ChannelId,
    /// When the member joined (or switched into) the channel.
    pub joined_at: UnixSeconds,
}

impl VoiceSession {
    /// The session's primary key.
    #[must_use]
    pub fn key(&self) -> MemberKey {
        MemberKey::new(self.community, self.member)
    }
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// Where a grant came from. Carried into level-up notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum XpSource {
    /// A qualifying text message.
    Text,
    /// A voice presence award.
    Voice,
    /// A grant issued by an administrator or an external system.
    Admin,
}

impl XpSource {
    /// Human-readable tag.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Text => "Text chat",
            Self::Voice => "Voice chat",
            Self::Admin => "Admin",
        }
    }
}

impl fmt::Display for XpSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_is_zeroed() {
        let key = MemberKey::new(CommunityId(1), MemberId(2));
        let rec = MemberRecord::new(key);
        assert_eq!(rec.xp, 0);
        assert_eq!(rec.level, 0);
        assert_eq!(rec.prestige, 0);
        assert!(rec.last_message_normalized.is_empty());
        assert_eq!(rec.key(), key);
    }

    #[test]
    fn key_display() {
        let key = MemberKey::new(CommunityId(10), MemberId(20));
        assert_eq!(key.to_string(), "10/20");
    }
}
