//! `Platform` backed by serenity's HTTP client and cache, and songbird.

use async_trait::async_trait;
use log::{debug, info};
use serenity::all::{ChannelId, ChannelType, EditMember, Guild, GuildId, Member, UserId};
use serenity::cache::Cache;
use serenity::http::Http;
use songbird::error::JoinError;
use songbird::{CoreEvent, Songbird};
use std::sync::Arc;

use super::voice::CaptureReceiver;
use crate::error::PlatformError;
use crate::platform::{CommandContext, MemberId, MemberSnapshot, Platform, RoleId, RoleRef, VoiceChannelId};
use crate::transcription::AudioSink;

pub struct DiscordPlatform {
    http: Arc<Http>,
    cache: Arc<Cache>,
    songbird: Arc<Songbird>,
}

impl DiscordPlatform {
    pub fn new(http: Arc<Http>, cache: Arc<Cache>, songbird: Arc<Songbird>) -> Self {
        Self { http, cache, songbird }
    }

    /// Run `f` against the cached guild. The cache guard never outlives the call.
    fn with_guild<T>(&self, guild_id: GuildId, f: impl FnOnce(&Guild) -> T) -> Result<T, PlatformError> {
        let guild = self
            .cache
            .guild(guild_id)
            .ok_or(PlatformError::GuildUnavailable(guild_id.get()))?;
        Ok(f(&guild))
    }

    async fn edit_member(
        &self,
        ctx: &CommandContext,
        member: MemberId,
        action: &'static str,
        builder: EditMember<'_>,
    ) -> Result<(), PlatformError> {
        guild_id(ctx)?
            .edit_member(self.http.as_ref(), UserId::new(member.0), builder)
            .await
            .map(|_| ())
            .map_err(|e| PlatformError::request(action, e))
    }
}

fn guild_id(ctx: &CommandContext) -> Result<GuildId, PlatformError> {
    ctx.session
        .guild_id()
        .map(GuildId::new)
        .ok_or(PlatformError::NoGuild)
}

fn snapshot(guild: &Guild, member: &Member) -> MemberSnapshot {
    let roles = member
        .roles
        .iter()
        .map(|id| RoleRef {
            id: RoleId(id.get()),
            name: guild
                .roles
                .get(id)
                .map(|r| r.name.clone())
                .unwrap_or_else(|| id.to_string()),
        })
        .collect();

    MemberSnapshot {
        id: MemberId(member.user.id.get()),
        name: member.user.name.clone(),
        nickname: member.nick.clone(),
        roles,
        voice_channel: guild
            .voice_states
            .get(&member.user.id)
            .and_then(|vs| vs.channel_id)
            .map(|c| VoiceChannelId(c.get())),
    }
}

#[async_trait]
impl Platform for DiscordPlatform {
    async fn member(&self, ctx: &CommandContext, member: MemberId) -> Result<Option<MemberSnapshot>, PlatformError> {
        let guild_id = guild_id(ctx)?;
        let user_id = UserId::new(member.0);

        let cached = self.with_guild(guild_id, |g| g.members.get(&user_id).map(|m| snapshot(g, m)))?;
        if cached.is_some() {
            return Ok(cached);
        }

        debug!("Member {} not cached, fetching", member);
        let fetched = self
            .http
            .get_member(guild_id, user_id)
            .await
            .map_err(|e| PlatformError::request("fetch member", e))?;
        Ok(Some(self.with_guild(guild_id, |g| snapshot(g, &fetched))?))
    }

    async fn member_by_name(&self, ctx: &CommandContext, name: &str) -> Result<Option<MemberSnapshot>, PlatformError> {
        let guild_id = guild_id(ctx)?;

        let cached = self.with_guild(guild_id, |g| g.member_named(name).map(|m| snapshot(g, m)))?;
        if cached.is_some() {
            return Ok(cached);
        }

        debug!("Member {} not cached, searching", name);
        let found = guild_id
            .search_members(self.http.as_ref(), name, Some(10))
            .await
            .map_err(|e| PlatformError::request("search members", e))?;
        let Some(member) = found
            .into_iter()
            .find(|m| m.user.name == name || m.nick.as_deref() == Some(name))
        else {
            return Ok(None);
        };
        Ok(Some(self.with_guild(guild_id, |g| snapshot(g, &member))?))
    }

    async fn find_role_by_name(&self, ctx: &CommandContext, name: &str) -> Result<Option<RoleId>, PlatformError> {
        self.with_guild(guild_id(ctx)?, |g| g.role_by_name(name).map(|r| RoleId(r.id.get())))
    }

    async fn find_voice_channel_by_name(
        &self,
        ctx: &CommandContext,
        name: &str,
    ) -> Result<Option<VoiceChannelId>, PlatformError> {
        self.with_guild(guild_id(ctx)?, |g| {
            g.channels
                .values()
                .find(|c| c.kind == ChannelType::Voice && c.name == name)
                .map(|c| VoiceChannelId(c.id.get()))
        })
    }

    async fn move_member(
        &self,
        ctx: &CommandContext,
        member: MemberId,
        channel: Option<VoiceChannelId>,
    ) -> Result<(), PlatformError> {
        let builder = match channel {
            Some(channel) => EditMember::new().voice_channel(ChannelId::new(channel.0)),
            None => EditMember::new().disconnect_member(),
        };
        self.edit_member(ctx, member, "move member", builder).await
    }

    async fn set_member_roles(&self, ctx: &CommandContext, member: MemberId, roles: &[RoleId]) -> Result<(), PlatformError> {
        let roles: Vec<serenity::all::RoleId> = roles.iter().map(|r| serenity::all::RoleId::new(r.0)).collect();
        self.edit_member(ctx, member, "edit roles", EditMember::new().roles(roles))
            .await
    }

    async fn set_member_nickname(
        &self,
        ctx: &CommandContext,
        member: MemberId,
        nickname: Option<&str>,
    ) -> Result<(), PlatformError> {
        // An empty nickname removes the override
        let builder = EditMember::new().nickname(nickname.unwrap_or_default());
        self.edit_member(ctx, member, "edit nickname", builder).await
    }

    async fn mute_member(&self, ctx: &CommandContext, member: MemberId, muted: bool) -> Result<(), PlatformError> {
        self.edit_member(ctx, member, "mute member", EditMember::new().mute(muted))
            .await
    }

    async fn members_in_voice_channel(
        &self,
        ctx: &CommandContext,
        channel: VoiceChannelId,
    ) -> Result<Vec<MemberSnapshot>, PlatformError> {
        let channel = ChannelId::new(channel.0);
        self.with_guild(guild_id(ctx)?, |g| {
            g.voice_states
                .values()
                .filter(|vs| vs.channel_id == Some(channel))
                .filter_map(|vs| g.members.get(&vs.user_id).or(vs.member.as_ref()))
                .map(|m| snapshot(g, m))
                .collect()
        })
    }

    async fn join_voice_channel(&self, ctx: &CommandContext, channel: VoiceChannelId) -> Result<(), PlatformError> {
        let guild_id = guild_id(ctx)?;
        info!("Joining voice channel: guild={}, channel={}", guild_id, channel.0);
        self.songbird
            .join(guild_id, ChannelId::new(channel.0))
            .await
            .map(|_| ())
            .map_err(|e| PlatformError::request("join voice", e))
    }

    async fn start_capture(&self, ctx: &CommandContext, sink: AudioSink) -> Result<(), PlatformError> {
        let call = self
            .songbird
            .get(guild_id(ctx)?)
            .ok_or(PlatformError::VoiceUnavailable)?;
        let mut call = call.lock().await;

        let receiver = CaptureReceiver::new(sink);
        call.add_global_event(CoreEvent::SpeakingStateUpdate.into(), receiver.clone());
        call.add_global_event(CoreEvent::VoiceTick.into(), receiver);

        info!("Voice receiver registered for audio capture");
        Ok(())
    }

    async fn disconnect_voice(&self, ctx: &CommandContext) -> Result<(), PlatformError> {
        match self.songbird.remove(guild_id(ctx)?).await {
            Ok(()) | Err(JoinError::NoCall) => Ok(()),
            Err(e) => Err(PlatformError::request("leave voice", e)),
        }
    }

    async fn notify(&self, ctx: &CommandContext, text: &str) -> Result<(), PlatformError> {
        ChannelId::new(ctx.channel_id)
            .say(self.http.as_ref(), text)
            .await
            .map(|_| ())
            .map_err(|e| PlatformError::request("send message", e))
    }
}
