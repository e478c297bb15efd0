//! Discord side of the bot: gateway event handler, `Platform` and `Announcer`
//! implementations, and client startup.

pub mod announcer;
pub mod platform;
pub mod voice;

use anyhow::{Context as _, Result};
use log::{error, info};
use serenity::all::{GatewayIntents, Message, Ready};
use serenity::client::{Client, Context, EventHandler};
use songbird::driver::DecodeMode;
use songbird::{Config, SerenityInit, Songbird};
use std::sync::Arc;

use crate::commands::{dispatch, parse_command, Dispatch};
use crate::platform::{CommandContext, MemberId, SessionKey};
use crate::settings::PrisonSettings;
use crate::transcription::Transcriber;
use crate::warden::{self, Services, Warden, WardenEvent, WardenHandle};

pub use announcer::SongbirdAnnouncer;
pub use platform::DiscordPlatform;

struct Handler {
    warden: WardenHandle,
    prefix: String,
}

#[serenity::async_trait]
impl EventHandler for Handler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!("Logged on as {}", ready.user.name);
        info!("Guilds in ready payload: {}", ready.guilds.len());
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }

        let bot_id = ctx.cache.current_user().id.get();
        let Some(parsed) = parse_command(&msg.content, &self.prefix, Some(bot_id)) else {
            return;
        };

        let author = MemberId(msg.author.id.get());
        let command_ctx = CommandContext {
            session: SessionKey::for_message(msg.guild_id.map(|g| g.get()), author),
            channel_id: msg.channel_id.get(),
            actor: author,
            actor_name: msg.author.name.clone(),
        };

        match dispatch(parsed, command_ctx) {
            Dispatch::Warden(event) => {
                if !self.warden.submit(event).await {
                    error!("Warden is not running, dropping command from {}", msg.author.name);
                }
            }
            Dispatch::Reply(text) => {
                if let Err(e) = msg.channel_id.say(&ctx, text).await {
                    error!("Failed to reply in channel {}: {}", msg.channel_id, e);
                }
            }
        }
    }
}

/// Connect to Discord and run until the gateway connection ends.
pub async fn run_bot(
    token: &str,
    prefix: String,
    settings: PrisonSettings,
    forbidden: Vec<String>,
    transcriber: Arc<dyn Transcriber>,
) -> Result<()> {
    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MEMBERS
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::DIRECT_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    // Receiving prisoners' voice needs decoded audio
    let songbird = Songbird::serenity_from_config(Config::default().decode_mode(DecodeMode::Decode));

    let (handle, events) = warden::channel();
    let mut client = Client::builder(token, intents)
        .event_handler(Handler {
            warden: handle.clone(),
            prefix,
        })
        .register_songbird_with(songbird.clone())
        .await
        .context("Failed to create Discord client")?;

    let services = Services {
        platform: Arc::new(DiscordPlatform::new(
            client.http.clone(),
            client.cache.clone(),
            songbird.clone(),
        )),
        announcer: Arc::new(SongbirdAnnouncer::new(
            client.http.clone(),
            songbird,
            &settings.announcement_language,
        )),
        transcriber,
    };
    let warden = Warden::with_handle(settings, forbidden, services, handle.clone());
    let warden_task = tokio::spawn(warden.run(events));

    info!("Connecting to Discord...");
    let result = client.start().await.context("Discord client error");

    handle.submit(WardenEvent::Shutdown).await;
    if let Err(e) = warden_task.await {
        error!("Warden task failed: {}", e);
    }
    result
}
