use anyhow::{anyhow, Context, Result};
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::CliArgs;
use crate::matcher::MatchThresholds;

/// Buffering policy of the per-speaker transcription gate, in seconds of audio.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct CaptureSettings {
    /// Audio that must accumulate since the previous emission before transcribing again
    pub chunk_secs: f32,
    /// Buffer length after which the speaker's buffer is dropped
    pub reset_secs: f32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            chunk_secs: 3.0,
            reset_secs: 6.0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PrisonSettings {
    pub admin_roles: Vec<String>,
    pub admin_usernames: Vec<String>,
    pub prison_channel: String,
    pub prisoner_role: String,
    pub nick_pattern: String,
    pub announcement_pattern: String,
    pub announcement_pattern_no_escape: String,
    pub forbidden_pattern: String,
    pub announcement_language: String,
    /// `None` lets Whisper detect the language
    pub whisper_language: Option<String>,
    pub forbidden_path: PathBuf,
    pub mute_duration_secs: u64,
    pub escape_act_threshold: u8,
    pub escape_warn_threshold: u8,
    pub forbidden_threshold: u8,
    pub capture: CaptureSettings,
}

impl Default for PrisonSettings {
    fn default() -> Self {
        Self {
            admin_roles: Vec::new(),
            admin_usernames: Vec::new(),
            prison_channel: "Prison".to_string(),
            prisoner_role: "Prisoner".to_string(),
            nick_pattern: "Prisoner {}".to_string(),
            announcement_pattern: "{}, say {}".to_string(),
            announcement_pattern_no_escape: "{}, you are in prison".to_string(),
            forbidden_pattern: "{}, watch your language!".to_string(),
            announcement_language: "en".to_string(),
            whisper_language: Some("en".to_string()),
            forbidden_path: PathBuf::from("config/forbidden.txt"),
            mute_duration_secs: 30,
            escape_act_threshold: 80,
            escape_warn_threshold: 50,
            forbidden_threshold: 80,
            capture: CaptureSettings::default(),
        }
    }
}

impl PrisonSettings {
    pub fn from_cli(args: &CliArgs) -> Self {
        let whisper_language = match args.whisper_language.trim() {
            "" | "auto" => None,
            lang => Some(lang.to_string()),
        };

        Self {
            admin_roles: args.admin_roles.clone(),
            admin_usernames: args.admin_usernames.clone(),
            prison_channel: args.prison_channel.clone(),
            prisoner_role: args.prisoner_role.clone(),
            nick_pattern: args.nick_pattern.clone(),
            announcement_pattern: args.announcement_pattern.clone(),
            announcement_pattern_no_escape: args.announcement_pattern_no_escape.clone(),
            forbidden_pattern: args.forbidden_pattern.clone(),
            announcement_language: args.announcement_language.clone(),
            whisper_language,
            forbidden_path: args
                .forbidden_path
                .clone()
                .unwrap_or_else(|| args.config_dir.join("forbidden.txt")),
            mute_duration_secs: args.forbidden_mute_duration,
            ..Self::default()
        }
    }

    pub fn mute_duration(&self) -> Duration {
        Duration::from_secs(self.mute_duration_secs)
    }

    pub fn escape_thresholds(&self) -> MatchThresholds {
        MatchThresholds {
            act: self.escape_act_threshold,
            warn: self.escape_warn_threshold,
        }
    }

    pub fn forbidden_thresholds(&self) -> MatchThresholds {
        MatchThresholds {
            act: self.forbidden_threshold,
            warn: self.forbidden_threshold,
        }
    }

    pub fn is_admin_username(&self, username: &str) -> bool {
        self.admin_usernames.iter().any(|u| u == username)
    }
}

/// Fill `{}` placeholders left to right. Missing arguments leave an empty string,
/// surplus arguments are ignored.
pub fn fill_pattern(pattern: &str, args: &[&str]) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut args = args.iter();
    let mut rest = pattern;

    while let Some(pos) = rest.find("{}") {
        out.push_str(&rest[..pos]);
        if let Some(arg) = args.next() {
            out.push_str(arg);
        }
        rest = &rest[pos + 2..];
    }
    out.push_str(rest);
    out
}

/// Load the forbidden phrase table. A missing file is not fatal: the bot runs
/// without forbidden phrases.
pub fn load_forbidden_phrases(path: &Path) -> Vec<String> {
    if !path.exists() {
        error!("File {} not found!", path.display());
        return Vec::new();
    }

    info!("Loading forbidden phrases from '{}'...", path.display());
    match std::fs::read_to_string(path) {
        Ok(contents) => contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| {
                debug!("Forbidden line '{}' registered", line);
                line.to_string()
            })
            .collect(),
        Err(e) => {
            error!("Failed to read {}: {}", path.display(), e);
            Vec::new()
        }
    }
}

/// Resolve the bot token from `--token` or `--token-file`.
pub fn read_token(args: &CliArgs) -> Result<String> {
    if let Some(token) = &args.token {
        return Ok(token.trim().to_string());
    }

    let path = args
        .token_file
        .as_ref()
        .ok_or_else(|| anyhow!("Either --token or --token-file is required"))?;
    let token = std::fs::read_to_string(path)
        .with_context(|| format!("File {} does not exist or is unreadable", path.display()))?;
    let token = token.trim().to_string();
    if token.is_empty() {
        return Err(anyhow!("Token file {} is empty", path.display()));
    }
    Ok(token)
}
