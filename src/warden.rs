//! The punishment state machine.
//!
//! A single `Warden` owns the prisoner registry and the transcription sessions.
//! Everything that can change them (commands, timers, announcement completions,
//! transcripts) arrives as a [`WardenEvent`] on one channel and is handled in
//! order by [`Warden::run`].

use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::announcer::Announcer;
use crate::error::{AnnounceError, PlatformError, PunishmentError};
use crate::matcher::{split_sentences, EscapeVerdict};
use crate::platform::{CommandContext, MemberId, MemberSnapshot, Platform, RoleId, SessionKey, VoiceChannelId};
use crate::registry::{PrisonerRecord, PrisonerRegistry, PunishmentToken};
use crate::settings::{fill_pattern, PrisonSettings};
use crate::tasks::BackgroundTasks;
use crate::transcription::{Transcriber, Transcript, TranscriptionSession};

const EVENT_QUEUE_SIZE: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct PunishRequest {
    pub target: String,
    pub escape_phrase: Option<String>,
    pub auto_pardon: Option<Duration>,
}

#[derive(Debug)]
pub enum WardenEvent {
    Punish {
        ctx: CommandContext,
        request: PunishRequest,
    },
    Pardon {
        ctx: CommandContext,
        target: Option<String>,
    },
    /// The punishment announcement stopped playing; recording may start.
    AnnouncementFinished {
        ctx: CommandContext,
        result: Result<(), AnnounceError>,
    },
    AutoPardon {
        ctx: CommandContext,
        member: MemberId,
        token: PunishmentToken,
    },
    /// Only the newest mute of a member is lifted; `mute` identifies it.
    MuteExpired {
        ctx: CommandContext,
        member: MemberId,
        mute: u64,
    },
    Transcript(Transcript),
    Shutdown,
}

/// Sending side of the warden's event queue.
#[derive(Clone, Debug)]
pub struct WardenHandle {
    tx: mpsc::Sender<WardenEvent>,
}

impl WardenHandle {
    /// Returns false if the warden has stopped.
    pub async fn submit(&self, event: WardenEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }
}

/// External collaborators of the warden.
#[derive(Clone)]
pub struct Services {
    pub platform: Arc<dyn Platform>,
    pub announcer: Arc<dyn Announcer>,
    pub transcriber: Arc<dyn Transcriber>,
}

pub struct Warden {
    settings: PrisonSettings,
    forbidden: Vec<String>,
    platform: Arc<dyn Platform>,
    announcer: Arc<dyn Announcer>,
    transcriber: Arc<dyn Transcriber>,
    registry: PrisonerRegistry,
    sessions: HashMap<SessionKey, TranscriptionSession>,
    active_mutes: HashMap<MemberId, u64>,
    mutes_issued: u64,
    tasks: BackgroundTasks,
    events_tx: mpsc::Sender<WardenEvent>,
}

/// Create the warden's event queue. The handle can be given out before the
/// warden itself is built.
pub fn channel() -> (WardenHandle, mpsc::Receiver<WardenEvent>) {
    let (tx, rx) = mpsc::channel(EVENT_QUEUE_SIZE);
    (WardenHandle { tx }, rx)
}

impl Warden {
    pub fn new(
        settings: PrisonSettings,
        forbidden: Vec<String>,
        services: Services,
    ) -> (Self, mpsc::Receiver<WardenEvent>) {
        let (handle, events) = channel();
        (Self::with_handle(settings, forbidden, services, handle), events)
    }

    /// Build a warden feeding on the queue `handle` belongs to.
    pub fn with_handle(settings: PrisonSettings, forbidden: Vec<String>, services: Services, handle: WardenHandle) -> Self {
        Self {
            settings,
            forbidden,
            platform: services.platform,
            announcer: services.announcer,
            transcriber: services.transcriber,
            registry: PrisonerRegistry::new(),
            sessions: HashMap::new(),
            active_mutes: HashMap::new(),
            mutes_issued: 0,
            tasks: BackgroundTasks::new(),
            events_tx: handle.tx,
        }
    }

    pub fn handle(&self) -> WardenHandle {
        WardenHandle {
            tx: self.events_tx.clone(),
        }
    }

    pub fn registry(&self) -> &PrisonerRegistry {
        &self.registry
    }

    pub fn has_session(&self, session: SessionKey) -> bool {
        self.sessions.contains_key(&session)
    }

    pub fn background_tasks(&self) -> &BackgroundTasks {
        &self.tasks
    }

    pub async fn run(mut self, mut events: mpsc::Receiver<WardenEvent>) {
        info!("Warden started");
        while let Some(event) = events.recv().await {
            if !self.handle_event(event).await {
                break;
            }
        }

        self.tasks.abort_all();
        self.sessions.clear();
        info!("Warden stopped");
    }

    /// Process one event. Returns false when the warden should stop.
    pub async fn handle_event(&mut self, event: WardenEvent) -> bool {
        match event {
            WardenEvent::Punish { ctx, request } => {
                if let Err(e) = self.punish(&ctx, request).await {
                    warn!("Punish rejected: {}", e);
                    self.report(&ctx, &e.to_string()).await;
                }
            }
            WardenEvent::Pardon { ctx, target } => {
                if let Err(e) = self.pardon(&ctx, target.as_deref()).await {
                    warn!("Pardon rejected: {}", e);
                    self.report(&ctx, &e.to_string()).await;
                }
            }
            WardenEvent::AnnouncementFinished { ctx, result } => {
                if let Err(e) = result {
                    error!("Announcement playback error: {}", e);
                }
                self.ensure_session(&ctx).await;
            }
            WardenEvent::AutoPardon { ctx, member, token } => {
                self.auto_pardon(&ctx, member, token).await;
            }
            WardenEvent::MuteExpired { ctx, member, mute } => {
                self.lift_mute(&ctx, member, mute).await;
            }
            WardenEvent::Transcript(transcript) => {
                self.on_transcript(transcript).await;
            }
            WardenEvent::Shutdown => {
                info!("Shutdown requested");
                return false;
            }
        }
        true
    }

    pub async fn punish(&mut self, ctx: &CommandContext, request: PunishRequest) -> Result<MemberId, PunishmentError> {
        info!(
            "Punish({}, {:?}, {:?}) command issued by {}",
            request.target, request.escape_phrase, request.auto_pardon, ctx.actor_name
        );

        if ctx.session.guild_id().is_none() {
            return Err(PunishmentError::GuildOnly);
        }
        self.authorize(ctx).await?;

        let target = self
            .platform
            .member_by_name(ctx, &request.target)
            .await?
            .ok_or_else(|| PunishmentError::MemberNotFound(request.target.clone()))?;

        let prison_name = self.settings.prison_channel.clone();
        let prison = self
            .platform
            .find_voice_channel_by_name(ctx, &prison_name)
            .await?
            .ok_or_else(|| PunishmentError::VoiceChannelNotFound(prison_name.clone()))?;

        if self.registry.contains(target.id) {
            return Err(PunishmentError::AlreadyImprisoned(target.name.clone()));
        }

        let token = self.registry.next_token();
        let record = PrisonerRecord {
            token,
            session: ctx.session,
            saved_roles: target.role_ids(),
            saved_voice: target.voice_channel,
            saved_nickname: target.nickname.clone(),
            escape_phrase: request.escape_phrase.clone(),
        };
        self.registry
            .put(target.id, record)
            .map_err(|_| PunishmentError::AlreadyImprisoned(target.name.clone()))?;

        let moved = self.platform.move_member(ctx, target.id, Some(prison)).await;
        self.best_effort(ctx, moved, format!("Cannot move {} to {}", target.name, prison_name))
            .await;

        self.apply_prisoner_role(ctx, &target).await;

        let joined = self.platform.join_voice_channel(ctx, prison).await;
        self.best_effort(ctx, joined, format!("Cannot join {}", prison_name)).await;

        let nick = fill_pattern(&self.settings.nick_pattern, &[&target.name]);
        match self.platform.set_member_nickname(ctx, target.id, Some(&nick)).await {
            Ok(()) => info!("{} nickname changed to {}", target.name, nick),
            Err(e) => {
                self.best_effort(ctx, Err(e), format!("Failed to set {} nick to {}", target.name, nick))
                    .await
            }
        }

        let mut message = format!("{} sent to {} for bad behavior!", target.name, prison_name);
        if let Some(phrase) = &request.escape_phrase {
            message.push_str(&format!("\n{} can say '{}' to escape the prison!", target.name, phrase));
        }
        if let Some(delay) = request.auto_pardon {
            message.push_str(&format!(
                "\n{} will be automatically released in {} seconds.",
                target.name,
                delay.as_secs_f64()
            ));
            self.tasks.schedule(
                "auto-pardon",
                delay,
                self.events_tx.clone(),
                WardenEvent::AutoPardon {
                    ctx: ctx.clone(),
                    member: target.id,
                    token,
                },
            );
        }
        self.report(ctx, &message).await;

        let announcement = match &request.escape_phrase {
            Some(phrase) => fill_pattern(&self.settings.announcement_pattern, &[&target.name, phrase]),
            None => fill_pattern(&self.settings.announcement_pattern_no_escape, &[&target.name]),
        };
        self.announce_then_listen(ctx, &announcement).await;

        Ok(target.id)
    }

    /// Pardon one named prisoner or, without a name, every prisoner of the context.
    /// Returns how many members were pardoned.
    pub async fn pardon(&mut self, ctx: &CommandContext, target: Option<&str>) -> Result<usize, PunishmentError> {
        info!("Pardon({:?}) command issued by {}", target, ctx.actor_name);

        if ctx.session.guild_id().is_none() {
            return Err(PunishmentError::GuildOnly);
        }
        self.authorize(ctx).await?;

        let members = match target.map(str::trim).filter(|t| !t.is_empty()) {
            Some(name) => {
                let member = self
                    .platform
                    .member_by_name(ctx, name)
                    .await?
                    .ok_or_else(|| PunishmentError::MemberNotFound(name.to_string()))?;
                if !self.registry.contains(member.id) {
                    return Err(PunishmentError::NotImprisoned(member.name));
                }
                vec![member.id]
            }
            None => self.registry.members_in(ctx.session),
        };

        Ok(self.pardon_members(ctx, &members).await)
    }

    async fn authorize(&self, ctx: &CommandContext) -> Result<(), PunishmentError> {
        if self.settings.is_admin_username(&ctx.actor_name) {
            return Ok(());
        }

        match self.platform.member(ctx, ctx.actor).await? {
            Some(actor) if actor.has_any_role_named(&self.settings.admin_roles) => Ok(()),
            _ => Err(PunishmentError::Unauthorized),
        }
    }

    async fn apply_prisoner_role(&self, ctx: &CommandContext, target: &MemberSnapshot) {
        let role_name = &self.settings.prisoner_role;
        match self.platform.find_role_by_name(ctx, role_name).await {
            Ok(Some(role)) => {
                let result = self.platform.set_member_roles(ctx, target.id, &[role]).await;
                self.best_effort(ctx, result, format!("Cannot set role {} for {}", role_name, target.name))
                    .await;
            }
            Ok(None) => {
                warn!("Prisoner role {} not found", role_name);
                self.report(ctx, &format!("Role {} not found, roles of {} were not changed", role_name, target.name))
                    .await;
            }
            Err(e) => {
                self.best_effort(ctx, Err(e), format!("Cannot set role {} for {}", role_name, target.name))
                    .await
            }
        }
    }

    async fn announce_then_listen(&mut self, ctx: &CommandContext, text: &str) {
        info!("[TTS]: {}", text);
        match self.announcer.speak(ctx, text).await {
            Ok(announcement) => {
                let events = self.events_tx.clone();
                let ctx = ctx.clone();
                self.tasks.spawn("announcement", async move {
                    let result = announcement.finished().await;
                    if events
                        .send(WardenEvent::AnnouncementFinished { ctx, result })
                        .await
                        .is_err()
                    {
                        debug!("Warden stopped before the announcement finished");
                    }
                });
            }
            Err(e) => {
                error!("Announcement failed to start: {}", e);
                self.ensure_session(ctx).await;
            }
        }
    }

    /// Start recording in the context unless a session is already running.
    async fn ensure_session(&mut self, ctx: &CommandContext) {
        if self.sessions.contains_key(&ctx.session) {
            debug!("Transcription already running in {}", ctx.session);
            return;
        }
        if self.registry.members_in(ctx.session).is_empty() {
            info!("No prisoners left in {}, not starting transcription", ctx.session);
            return;
        }

        let session = match TranscriptionSession::start(
            ctx.clone(),
            self.transcriber.clone(),
            self.settings.capture,
            self.settings.whisper_language.clone(),
            self.events_tx.clone(),
        ) {
            Ok(session) => session,
            Err(e) => {
                error!("Failed to start transcription in {}: {}", ctx.session, e);
                return;
            }
        };

        if let Err(e) = self.platform.start_capture(ctx, session.sink()).await {
            error!("Failed to start recording in {}: {}", ctx.session, e);
            return;
        }

        info!("Recording started in {}", ctx.session);
        self.sessions.insert(ctx.session, session);
    }

    async fn auto_pardon(&mut self, ctx: &CommandContext, member: MemberId, token: PunishmentToken) {
        if self.registry.get(member).map(|r| r.token) != Some(token) {
            info!("Ignoring auto-pardon of {} from an earlier punishment", member);
            return;
        }

        info!("Auto-pardon timeout for {}", member);
        let name = self.member_name(ctx, member).await;
        self.report(ctx, &format!("Prison time of {} ended!", name)).await;
        self.pardon_members(ctx, &[member]).await;
    }

    async fn pardon_members(&mut self, ctx: &CommandContext, members: &[MemberId]) -> usize {
        let prison_name = self.settings.prison_channel.clone();
        let prison = match self.platform.find_voice_channel_by_name(ctx, &prison_name).await {
            Ok(prison) => prison,
            Err(e) => {
                error!("Failed to look up {}: {}", prison_name, e);
                None
            }
        };
        let prisoner_role = match self.platform.find_role_by_name(ctx, &self.settings.prisoner_role).await {
            Ok(role) => role,
            Err(e) => {
                error!("Failed to look up role {}: {}", self.settings.prisoner_role, e);
                None
            }
        };

        let mut pardoned = 0;
        for &id in members {
            if !self.registry.contains(id) {
                debug!("{} has no prisoner record", id);
                continue;
            }

            // The record is the only copy of the saved state; keep it until the member is known
            let member = match self.platform.member(ctx, id).await {
                Ok(Some(member)) => member,
                Ok(None) => {
                    warn!("Prisoner {} left the guild, dropping their record", id);
                    self.registry.remove(id);
                    continue;
                }
                Err(e) => {
                    error!("Failed to fetch prisoner {}, keeping their record: {}", id, e);
                    self.best_effort(ctx, Err(e), format!("Cannot pardon {}", id)).await;
                    continue;
                }
            };
            let Some(record) = self.registry.remove(id) else {
                continue;
            };

            self.restore_member(ctx, &member, record, prison, prisoner_role).await;
            self.report(ctx, &format!("Pardoned user {}", member.name)).await;
            pardoned += 1;
        }

        self.release_session_if_empty(ctx, prison, prisoner_role).await;
        pardoned
    }

    async fn restore_member(
        &self,
        ctx: &CommandContext,
        member: &MemberSnapshot,
        record: PrisonerRecord,
        prison: Option<VoiceChannelId>,
        prisoner_role: Option<RoleId>,
    ) {
        // Only undo our own role change; someone may have fixed roles by hand already
        match prisoner_role {
            Some(role) if member.has_role(role) => {
                match self.platform.set_member_roles(ctx, member.id, &record.saved_roles).await {
                    Ok(()) => info!("Roles of {} restored to {:?}", member.name, record.saved_roles),
                    Err(e) => {
                        self.best_effort(ctx, Err(e), format!("Cannot restore roles of {}", member.name))
                            .await
                    }
                }
            }
            _ => info!("{} no longer holds the prisoner role, roles left as they are", member.name),
        }

        match prison {
            Some(prison) if member.voice_channel == Some(prison) => {
                let destination = match record.saved_voice {
                    Some(channel) => Some(channel),
                    None => self.actor_voice_channel(ctx).await,
                };
                match self.platform.move_member(ctx, member.id, destination).await {
                    Ok(()) => info!("{} moved to {:?}", member.name, destination),
                    Err(e) => {
                        self.best_effort(ctx, Err(e), format!("Cannot move {} out of prison", member.name))
                            .await
                    }
                }
            }
            _ => info!(
                "{} is not in {}, they will not be moved",
                member.name, self.settings.prison_channel
            ),
        }

        match self
            .platform
            .set_member_nickname(ctx, member.id, record.saved_nickname.as_deref())
            .await
        {
            Ok(()) => info!("{} nickname restored to {:?}", member.name, record.saved_nickname),
            Err(e) => {
                self.best_effort(ctx, Err(e), format!("Failed to restore nickname for {}", member.name))
                    .await
            }
        }
    }

    /// Leave voice once nobody in the prison channel is a prisoner any more.
    async fn release_session_if_empty(
        &mut self,
        ctx: &CommandContext,
        prison: Option<VoiceChannelId>,
        prisoner_role: Option<RoleId>,
    ) {
        let prison_name = &self.settings.prison_channel;
        let remaining = match prison {
            Some(prison) => match self.platform.members_in_voice_channel(ctx, prison).await {
                Ok(members) => members
                    .iter()
                    .filter(|m| {
                        prisoner_role.is_some_and(|role| m.has_role(role)) || self.registry.has_escape_phrase(m.id)
                    })
                    .count(),
                Err(e) => {
                    error!("Failed to list members of {}: {}", prison_name, e);
                    return;
                }
            },
            None => self.registry.members_in(ctx.session).len(),
        };

        if remaining > 0 {
            info!("Prisoners left in channel {}: {}", prison_name, remaining);
            return;
        }

        info!("Nobody is in prison channel {}. Disconnecting.", prison_name);
        self.sessions.remove(&ctx.session);
        if let Err(e) = self.platform.disconnect_voice(ctx).await {
            error!("Failed to disconnect from channel {}. Error: {}", prison_name, e);
        }
    }

    async fn on_transcript(&mut self, transcript: Transcript) {
        let Transcript { session, member, text } = transcript;

        let escape_phrase = self
            .registry
            .get(member)
            .filter(|record| record.session == session)
            .and_then(|record| record.escape_phrase.clone());
        let Some(escape_phrase) = escape_phrase else {
            debug!("[Text recognition]: {} ignored due to not having an escape phrase", member);
            return;
        };

        let Some(ctx) = self.sessions.get(&session).map(|s| s.context().clone()) else {
            debug!("[Text recognition]: no session for {}, dropping transcript", session);
            return;
        };

        let text = text.trim();
        if text.is_empty() {
            return;
        }

        let name = self.member_name(&ctx, member).await;
        info!("[Text recognition] {}: {}", name, text);

        let sentences = split_sentences(text);
        debug!("[Text recognition] {} sentences: {:?}", name, sentences);

        let escape = self.settings.escape_thresholds();
        let forbidden = self.settings.forbidden_thresholds();

        for sentence in &sentences {
            match escape.judge_escape(sentence, &escape_phrase) {
                EscapeVerdict::Escape(score) => {
                    self.report(
                        &ctx,
                        &format!(
                            "Prisoner {} said '{}', which is {}% close to {}!",
                            name, sentence, score, escape_phrase
                        ),
                    )
                    .await;
                    self.pardon_members(&ctx, &[member]).await;
                    return;
                }
                EscapeVerdict::Close(score) => {
                    self.report(
                        &ctx,
                        &format!(
                            "Prisoner {} said '{}', which is {}% close to {}!",
                            name, sentence, score, escape_phrase
                        ),
                    )
                    .await;
                }
                EscapeVerdict::Miss(_) => {}
            }

            let matched = forbidden
                .find_forbidden(sentence, &self.forbidden)
                .map(|(line, score)| (line.to_string(), score));
            if let Some((line, score)) = matched {
                info!("Forbidden line {} detected in {}'s voice", line, name);
                self.report(
                    &ctx,
                    &format!(
                        "Prisoner {} said '{}', which is {}% close to forbidden {}!",
                        name, sentence, score, line
                    ),
                )
                .await;
                self.penalize(&ctx, member, &name).await;
            }
        }
    }

    /// Mute now, rebuke out loud, unmute after the configured duration.
    async fn penalize(&mut self, ctx: &CommandContext, member: MemberId, name: &str) {
        let duration = self.settings.mute_duration();
        let muted = match self.platform.mute_member(ctx, member, true).await {
            Ok(()) => {
                info!("Member {} is muted for {}s", name, duration.as_secs());
                true
            }
            Err(e) => {
                error!("Failed to mute {}: {}", name, e);
                false
            }
        };

        let rebuke = fill_pattern(&self.settings.forbidden_pattern, &[name]);
        info!("[TTS]: {}", rebuke);
        match self.announcer.speak(ctx, &rebuke).await {
            Ok(announcement) => self.tasks.spawn("forbidden-rebuke", async move {
                if let Err(e) = announcement.finished().await {
                    error!("Forbidden TTS playback error: {}", e);
                }
            }),
            Err(e) => error!("Forbidden TTS failed: {}", e),
        }

        if muted {
            self.mutes_issued += 1;
            let mute = self.mutes_issued;
            self.active_mutes.insert(member, mute);
            self.tasks.schedule(
                "unmute",
                duration,
                self.events_tx.clone(),
                WardenEvent::MuteExpired {
                    ctx: ctx.clone(),
                    member,
                    mute,
                },
            );
        }
    }

    async fn lift_mute(&mut self, ctx: &CommandContext, member: MemberId, mute: u64) {
        if self.active_mutes.get(&member) != Some(&mute) {
            debug!("Mute {} of {} was superseded, leaving it muted", mute, member);
            return;
        }
        self.active_mutes.remove(&member);

        match self.platform.mute_member(ctx, member, false).await {
            Ok(()) => info!("Member {} is unmuted", member),
            Err(e) => error!("Failed to unmute {}: {}", member, e),
        }
    }

    async fn actor_voice_channel(&self, ctx: &CommandContext) -> Option<VoiceChannelId> {
        match self.platform.member(ctx, ctx.actor).await {
            Ok(actor) => actor.and_then(|a| a.voice_channel),
            Err(e) => {
                error!("Failed to look up {}: {}", ctx.actor_name, e);
                None
            }
        }
    }

    async fn member_name(&self, ctx: &CommandContext, member: MemberId) -> String {
        match self.platform.member(ctx, member).await {
            Ok(Some(m)) => m.name,
            _ => member.to_string(),
        }
    }

    /// Log and report a failed step without aborting the caller.
    async fn best_effort(&self, ctx: &CommandContext, result: Result<(), PlatformError>, what: String) {
        if let Err(e) = result {
            error!("{}: {}", what, e);
            self.report(ctx, &format!("{}. Reason: {}", what, e)).await;
        }
    }

    async fn report(&self, ctx: &CommandContext, text: &str) {
        if let Err(e) = self.platform.notify(ctx, text).await {
            error!("Failed to send message to channel {}: {}", ctx.channel_id, e);
        }
    }
}
