//! In-memory collaborators for unit tests.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::announcer::{Announcement, Announcer};
use crate::error::{AnnounceError, PlatformError, TranscriptionError};
use crate::platform::{
    CommandContext, MemberId, MemberSnapshot, Platform, RoleId, RoleRef, SessionKey, VoiceChannelId,
};
use crate::transcription::{AudioSink, Transcriber};

pub const ADMIN: MemberId = MemberId(1);
pub const BOB: MemberId = MemberId(2);
pub const CAROL: MemberId = MemberId(3);

pub const ADMIN_ROLE: RoleId = RoleId(100);
pub const PRISONER_ROLE: RoleId = RoleId(101);
pub const MEMBER_ROLE: RoleId = RoleId(102);

pub const GENERAL: VoiceChannelId = VoiceChannelId(200);
pub const PRISON: VoiceChannelId = VoiceChannelId(201);

/// Context of a command issued by the admin in `guild_id`.
pub fn context(guild_id: u64) -> CommandContext {
    context_for(guild_id, ADMIN, "admin")
}

pub fn context_for(guild_id: u64, actor: MemberId, actor_name: &str) -> CommandContext {
    CommandContext {
        session: SessionKey::Guild(guild_id),
        channel_id: 500,
        actor,
        actor_name: actor_name.to_string(),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap()
}

// -----------------------------------------------------------------------------
// Platform
// -----------------------------------------------------------------------------

#[derive(Default)]
struct GuildState {
    members: HashMap<MemberId, MemberSnapshot>,
    roles: Vec<RoleRef>,
    voice_channels: Vec<(VoiceChannelId, String)>,
    bot_voice: Option<VoiceChannelId>,
    captures_started: usize,
    notifications: Vec<String>,
    mutes: Vec<(MemberId, bool)>,
    fail_role_changes: bool,
    failing_lookups: Vec<MemberId>,
}

impl GuildState {
    fn role(&self, id: RoleId) -> Option<RoleRef> {
        self.roles.iter().find(|r| r.id == id).cloned()
    }
}

/// A single guild with admin, bob and carol sitting in the General voice channel.
pub struct MockPlatform {
    state: Mutex<GuildState>,
}

impl MockPlatform {
    pub fn guild() -> Self {
        let roles = vec![
            RoleRef {
                id: ADMIN_ROLE,
                name: "Admin".to_string(),
            },
            RoleRef {
                id: PRISONER_ROLE,
                name: "Prisoner".to_string(),
            },
            RoleRef {
                id: MEMBER_ROLE,
                name: "Member".to_string(),
            },
        ];

        let member = |id: MemberId, name: &str, nickname: Option<&str>, role: &RoleRef| MemberSnapshot {
            id,
            name: name.to_string(),
            nickname: nickname.map(str::to_string),
            roles: vec![role.clone()],
            voice_channel: Some(GENERAL),
        };
        let members = [
            member(ADMIN, "admin", None, &roles[0]),
            member(BOB, "bob", Some("Bobby"), &roles[2]),
            member(CAROL, "carol", None, &roles[2]),
        ]
        .into_iter()
        .map(|m| (m.id, m))
        .collect();

        Self {
            state: Mutex::new(GuildState {
                members,
                roles,
                voice_channels: vec![(GENERAL, "General".to_string()), (PRISON, "Prison".to_string())],
                ..GuildState::default()
            }),
        }
    }

    pub fn snapshot(&self, id: MemberId) -> MemberSnapshot {
        lock(&self.state).members[&id].clone()
    }

    pub fn set_roles(&self, id: MemberId, roles: &[RoleId]) {
        let mut state = lock(&self.state);
        let roles: Vec<RoleRef> = roles.iter().filter_map(|r| state.role(*r)).collect();
        if let Some(member) = state.members.get_mut(&id) {
            member.roles = roles;
        }
    }

    pub fn set_voice(&self, id: MemberId, channel: Option<VoiceChannelId>) {
        if let Some(member) = lock(&self.state).members.get_mut(&id) {
            member.voice_channel = channel;
        }
    }

    pub fn fail_role_changes(&self) {
        lock(&self.state).fail_role_changes = true;
    }

    /// Make the next lookup of `member` fail as if the API were unavailable.
    pub fn fail_next_lookup(&self, member: MemberId) {
        lock(&self.state).failing_lookups.push(member);
    }

    pub fn bot_voice(&self) -> Option<VoiceChannelId> {
        lock(&self.state).bot_voice
    }

    pub fn captures_started(&self) -> usize {
        lock(&self.state).captures_started
    }

    pub fn notifications(&self) -> Vec<String> {
        lock(&self.state).notifications.clone()
    }

    pub fn mutes(&self) -> Vec<(MemberId, bool)> {
        lock(&self.state).mutes.clone()
    }
}

#[async_trait]
impl Platform for MockPlatform {
    async fn member(&self, _ctx: &CommandContext, member: MemberId) -> Result<Option<MemberSnapshot>, PlatformError> {
        let mut state = lock(&self.state);
        if let Some(pos) = state.failing_lookups.iter().position(|m| *m == member) {
            state.failing_lookups.remove(pos);
            return Err(PlatformError::request("get member", "503 Service Unavailable"));
        }
        Ok(state.members.get(&member).cloned())
    }

    async fn member_by_name(&self, _ctx: &CommandContext, name: &str) -> Result<Option<MemberSnapshot>, PlatformError> {
        Ok(lock(&self.state)
            .members
            .values()
            .find(|m| m.name == name || m.nickname.as_deref() == Some(name))
            .cloned())
    }

    async fn find_role_by_name(&self, _ctx: &CommandContext, name: &str) -> Result<Option<RoleId>, PlatformError> {
        Ok(lock(&self.state).roles.iter().find(|r| r.name == name).map(|r| r.id))
    }

    async fn find_voice_channel_by_name(
        &self,
        _ctx: &CommandContext,
        name: &str,
    ) -> Result<Option<VoiceChannelId>, PlatformError> {
        Ok(lock(&self.state)
            .voice_channels
            .iter()
            .find(|(_, n)| n == name)
            .map(|(id, _)| *id))
    }

    async fn move_member(
        &self,
        _ctx: &CommandContext,
        member: MemberId,
        channel: Option<VoiceChannelId>,
    ) -> Result<(), PlatformError> {
        self.set_voice(member, channel);
        Ok(())
    }

    async fn set_member_roles(&self, _ctx: &CommandContext, member: MemberId, roles: &[RoleId]) -> Result<(), PlatformError> {
        if lock(&self.state).fail_role_changes {
            return Err(PlatformError::request("edit roles", "Missing Permissions"));
        }
        self.set_roles(member, roles);
        Ok(())
    }

    async fn set_member_nickname(
        &self,
        _ctx: &CommandContext,
        member: MemberId,
        nickname: Option<&str>,
    ) -> Result<(), PlatformError> {
        if let Some(m) = lock(&self.state).members.get_mut(&member) {
            m.nickname = nickname.map(str::to_string);
        }
        Ok(())
    }

    async fn mute_member(&self, _ctx: &CommandContext, member: MemberId, muted: bool) -> Result<(), PlatformError> {
        lock(&self.state).mutes.push((member, muted));
        Ok(())
    }

    async fn members_in_voice_channel(
        &self,
        _ctx: &CommandContext,
        channel: VoiceChannelId,
    ) -> Result<Vec<MemberSnapshot>, PlatformError> {
        Ok(lock(&self.state)
            .members
            .values()
            .filter(|m| m.voice_channel == Some(channel))
            .cloned()
            .collect())
    }

    async fn join_voice_channel(&self, _ctx: &CommandContext, channel: VoiceChannelId) -> Result<(), PlatformError> {
        lock(&self.state).bot_voice = Some(channel);
        Ok(())
    }

    async fn start_capture(&self, _ctx: &CommandContext, _sink: AudioSink) -> Result<(), PlatformError> {
        lock(&self.state).captures_started += 1;
        Ok(())
    }

    async fn disconnect_voice(&self, _ctx: &CommandContext) -> Result<(), PlatformError> {
        lock(&self.state).bot_voice = None;
        Ok(())
    }

    async fn notify(&self, _ctx: &CommandContext, text: &str) -> Result<(), PlatformError> {
        lock(&self.state).notifications.push(text.to_string());
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Announcer
// -----------------------------------------------------------------------------

/// Records what was said; every announcement completes at once.
#[derive(Default)]
pub struct MockAnnouncer {
    spoken: Mutex<Vec<String>>,
    fail_next: AtomicBool,
}

impl MockAnnouncer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn spoken(&self) -> Vec<String> {
        lock(&self.spoken).clone()
    }
}

#[async_trait]
impl Announcer for MockAnnouncer {
    async fn speak(&self, _ctx: &CommandContext, text: &str) -> Result<Announcement, AnnounceError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(AnnounceError::Synthesis("tts unavailable".to_string()));
        }
        lock(&self.spoken).push(text.to_string());
        Ok(Announcement::completed(Ok(())))
    }
}

// -----------------------------------------------------------------------------
// Transcriber
// -----------------------------------------------------------------------------

/// Answers from a script, then with empty text once the script runs out.
pub struct ScriptedTranscriber {
    responses: Mutex<VecDeque<Result<String, TranscriptionError>>>,
    calls: Mutex<Vec<(usize, Option<String>)>>,
}

impl ScriptedTranscriber {
    pub fn new(responses: &[&str]) -> Self {
        Self {
            responses: Mutex::new(responses.iter().map(|r| Ok(r.to_string())).collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Like `new`, with a failing call in front of the script.
    pub fn with_failure_first(responses: &[&str]) -> Self {
        let transcriber = Self::new(responses);
        lock(&transcriber.responses).push_front(Err(TranscriptionError::Engine("model crashed".to_string())));
        transcriber
    }

    /// Sample count and language of every call so far.
    pub fn calls(&self) -> Vec<(usize, Option<String>)> {
        lock(&self.calls).clone()
    }
}

impl Transcriber for ScriptedTranscriber {
    fn transcribe(&self, samples: &[f32], language: Option<&str>) -> Result<String, TranscriptionError> {
        lock(&self.calls).push((samples.len(), language.map(str::to_string)));
        lock(&self.responses).pop_front().unwrap_or_else(|| Ok(String::new()))
    }
}
