//! The chat platform as seen by the prison: identities, member snapshots and the
//! `Platform` trait the warden drives. The Discord implementation lives in
//! `crate::discord`.

use async_trait::async_trait;
use std::fmt;

use crate::error::PlatformError;
use crate::transcription::AudioSink;

/// Stable platform user id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberId(pub u64);

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoleId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoiceChannelId(pub u64);

/// Where a conversation happens: the guild, or the author for direct messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKey {
    Guild(u64),
    Direct(MemberId),
}

impl SessionKey {
    pub fn for_message(guild_id: Option<u64>, author: MemberId) -> Self {
        match guild_id {
            Some(id) => SessionKey::Guild(id),
            None => SessionKey::Direct(author),
        }
    }

    pub fn guild_id(&self) -> Option<u64> {
        match self {
            SessionKey::Guild(id) => Some(*id),
            SessionKey::Direct(_) => None,
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionKey::Guild(id) => write!(f, "guild {}", id),
            SessionKey::Direct(user) => write!(f, "direct {}", user),
        }
    }
}

/// Everything a command needs to act and report back. Cloned into timers and
/// transcription sessions so they can re-enter the warden later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandContext {
    pub session: SessionKey,
    /// Text channel to report into.
    pub channel_id: u64,
    pub actor: MemberId,
    pub actor_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleRef {
    pub id: RoleId,
    pub name: String,
}

/// Point-in-time view of a guild member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberSnapshot {
    pub id: MemberId,
    pub name: String,
    pub nickname: Option<String>,
    pub roles: Vec<RoleRef>,
    pub voice_channel: Option<VoiceChannelId>,
}

impl MemberSnapshot {
    pub fn role_ids(&self) -> Vec<RoleId> {
        self.roles.iter().map(|r| r.id).collect()
    }

    pub fn has_role(&self, role: RoleId) -> bool {
        self.roles.iter().any(|r| r.id == role)
    }

    pub fn has_any_role_named(&self, names: &[String]) -> bool {
        self.roles
            .iter()
            .any(|r| names.iter().any(|n| n == &r.name))
    }
}

#[async_trait]
pub trait Platform: Send + Sync {
    async fn member(
        &self,
        ctx: &CommandContext,
        member: MemberId,
    ) -> Result<Option<MemberSnapshot>, PlatformError>;

    async fn member_by_name(
        &self,
        ctx: &CommandContext,
        name: &str,
    ) -> Result<Option<MemberSnapshot>, PlatformError>;

    async fn find_role_by_name(
        &self,
        ctx: &CommandContext,
        name: &str,
    ) -> Result<Option<RoleId>, PlatformError>;

    async fn find_voice_channel_by_name(
        &self,
        ctx: &CommandContext,
        name: &str,
    ) -> Result<Option<VoiceChannelId>, PlatformError>;

    /// Move a member between voice channels; `None` disconnects them.
    async fn move_member(
        &self,
        ctx: &CommandContext,
        member: MemberId,
        channel: Option<VoiceChannelId>,
    ) -> Result<(), PlatformError>;

    async fn set_member_roles(
        &self,
        ctx: &CommandContext,
        member: MemberId,
        roles: &[RoleId],
    ) -> Result<(), PlatformError>;

    /// `None` removes the nickname override.
    async fn set_member_nickname(
        &self,
        ctx: &CommandContext,
        member: MemberId,
        nickname: Option<&str>,
    ) -> Result<(), PlatformError>;

    async fn mute_member(
        &self,
        ctx: &CommandContext,
        member: MemberId,
        muted: bool,
    ) -> Result<(), PlatformError>;

    async fn members_in_voice_channel(
        &self,
        ctx: &CommandContext,
        channel: VoiceChannelId,
    ) -> Result<Vec<MemberSnapshot>, PlatformError>;

    /// Connect the bot's own voice presence to `channel`, moving it if already connected.
    async fn join_voice_channel(
        &self,
        ctx: &CommandContext,
        channel: VoiceChannelId,
    ) -> Result<(), PlatformError>;

    /// Route received voice audio of the context into `sink`.
    async fn start_capture(&self, ctx: &CommandContext, sink: AudioSink)
        -> Result<(), PlatformError>;

    async fn disconnect_voice(&self, ctx: &CommandContext) -> Result<(), PlatformError>;

    /// Post a chat message into the context's text channel.
    async fn notify(&self, ctx: &CommandContext, text: &str) -> Result<(), PlatformError>;
}
