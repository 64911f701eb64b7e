//! Collaborator ports: what the engine needs from the chat platform.
//!
//! Implementations wrap a platform client. Every call is bounded by the
//! engine's lookup timeout, and role or notification failures are logged and
//! swallowed, so implementations should simply report what happened.

use std::collections::HashSet;
use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use xpz_core::types::{ChannelId, CommunityId, MemberId, RoleId};
use xpz_core::voice::MemberVoiceState;

/// Failure of a platform call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortError {
    /// The member, channel or role does not exist (any more).
    #[error("not found")]
    NotFound,
    /// The call did not finish in time.
    #[error("timed out after {0}ms")]
    Timeout(u64),
    /// Anything else the platform reported.
    #[error("platform call failed: {0}")]
    Failed(String),
}

/// Member and channel lookups.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Live voice state of a member. `Ok(None)` means the member is gone.
    async fn voice_state(
        &self,
        community: CommunityId,
        member: MemberId,
    ) -> Result<Option<MemberVoiceState>, PortError>;

    /// Non-bot members currently in a voice channel.
    async fn present_members(
        &self,
        community: CommunityId,
        channel: ChannelId,
    ) -> Result<Vec<MemberId>, PortError>;
}

/// Role assignment.
#[async_trait]
pub trait RoleGateway: Send + Sync {
    /// Roles the member holds right now.
    async fn member_roles(
        &self,
        community: CommunityId,
        member: MemberId,
    ) -> Result<HashSet<RoleId>, PortError>;

    /// Give `role` to the member.
    async fn grant_role(
        &self,
        community: CommunityId,
        member: MemberId,
        role: RoleId,
    ) -> Result<(), PortError>;

    /// Take `role` from the member.
    async fn revoke_role(
        &self,
        community: CommunityId,
        member: MemberId,
        role: RoleId,
    ) -> Result<(), PortError>;
}

/// A rich announcement: title, body and labelled fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Notification {
    /// Headline.
    pub title: String,
    /// Body text.
    pub description: String,
    /// `(label, value)` pairs, in display order.
    pub fields: Vec<(String, String)>,
}

impl Notification {
    /// Start a notification.
    #[must_use]
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            fields: Vec::new(),
        }
    }

    /// Append a field.
    #[must_use]
    pub fn field(mut self, label: impl Into<String>, value: impl ToString) -> Self {
        self.fields.push((label.into(), value.to_string()));
        self
    }

    /// Value of the first field labelled `label`.
    #[must_use]
    pub fn field_value(&self, label: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.title)?;
        write!(f, "{}", self.description)?;
        for (label, value) in &self.fields {
            write!(f, "\n{label}: {value}")?;
        }
        Ok(())
    }
}

/// Message delivery.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Post `notification` into `channel`.
    async fn deliver(
        &self,
        community: CommunityId,
        channel: ChannelId,
        notification: Notification,
    ) -> Result<(), PortError>;
}
