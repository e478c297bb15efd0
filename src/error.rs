//! Error types for the prison bot

use thiserror::Error;

use crate::platform::MemberId;

/// Rejections of `punish`/`pardon`. The `Display` text is what the actor sees in chat.
#[derive(Error, Debug)]
pub enum PunishmentError {
    #[error("You don't have permission to use this command!")]
    Unauthorized,

    #[error("Can only be used on a server!")]
    GuildOnly,

    #[error("Member with name {0} not found!")]
    MemberNotFound(String),

    #[error("Voice channel {0} not found!")]
    VoiceChannelNotFound(String),

    #[error("{0} is already in prison!")]
    AlreadyImprisoned(String),

    #[error("{0} is not in prison")]
    NotImprisoned(String),

    #[error(transparent)]
    Platform(#[from] PlatformError),
}

/// Malformed command arguments. Shown to the author as a usage hint.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CommandError {
    #[error("Usage: {0}")]
    MissingArgument(&'static str),

    #[error("'{0}' is not a number of seconds")]
    InvalidSeconds(String),

    #[error("Unterminated quote in command")]
    UnterminatedQuote,
}

/// Failures of the chat platform collaborator.
#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("{action} failed: {reason}")]
    Request { action: &'static str, reason: String },

    #[error("Guild {0} is not in the cache")]
    GuildUnavailable(u64),

    #[error("Command context has no guild")]
    NoGuild,

    #[error("Voice is not initialized")]
    VoiceUnavailable,
}

impl PlatformError {
    pub fn request(action: &'static str, reason: impl std::fmt::Display) -> Self {
        PlatformError::Request {
            action,
            reason: reason.to_string(),
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Member {0} already has a prisoner record")]
    AlreadyImprisoned(MemberId),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnnounceError {
    #[error("Speech synthesis failed: {0}")]
    Synthesis(String),

    #[error("Playback failed: {0}")]
    Playback(String),

    #[error("Playback was interrupted")]
    Interrupted,

    #[error("Not connected to a voice channel")]
    NotConnected,
}

#[derive(Error, Debug)]
pub enum TranscriptionError {
    #[error("Audio encoding failed: {0}")]
    Encoding(String),

    #[error("Transcription request failed: {0}")]
    Request(String),

    #[error("Transcription engine error: {0}")]
    Engine(String),

    #[error("Failed to start transcription worker: {0}")]
    Worker(#[from] std::io::Error),
}
