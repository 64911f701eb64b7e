//! Platform events consumed by the engine.

use xpz_core::types::{ChannelId, CommunityId, MemberId, UnixSeconds};

/// A message posted in a community text channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEvent {
    /// Community the message was posted in.
    pub community: CommunityId,
    /// Author of the message.
    pub author: MemberId,
    /// Bots never earn XP.
    pub is_bot: bool,
    /// Channel the message was posted in.
    pub channel: ChannelId,
    /// Raw message content.
    pub content: String,
    /// When the message was posted.
    pub timestamp: UnixSeconds,
}

/// A member's voice channel changed (or their mute/deaf flags did).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceStateChange {
    /// Community the change happened in.
    pub community: CommunityId,
    /// The member whose state changed.
    pub member: MemberId,
    /// Bot members are never tracked.
    pub is_bot: bool,
    /// Channel before the change.
    pub old_channel: Option<ChannelId>,
    /// Channel after the change.
    pub new_channel: Option<ChannelId>,
}
