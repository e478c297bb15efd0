use clap::{ArgGroup, Parser};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "prison-bot",
    about = "Discord bot for punishing guild members",
    group(ArgGroup::new("auth").required(true).args(["token", "token_file"]))
)]
pub struct CliArgs {
    /// API token for the bot. Must be kept in secret!
    #[arg(long)]
    pub token: Option<String>,

    /// Text file holding the API token
    #[arg(long)]
    pub token_file: Option<PathBuf>,

    /// Commands prefix
    #[arg(long, default_value = "$")]
    pub command_prefix: String,

    /// Directory for config files
    #[arg(long, default_value = "config")]
    pub config_dir: PathBuf,

    /// Forbidden phrases file, one per line (defaults to <config_dir>/forbidden.txt)
    #[arg(long)]
    pub forbidden_path: Option<PathBuf>,

    /// Prison voice channel name
    #[arg(long, default_value = "Prison")]
    pub prison_channel: String,

    /// Prisoner role name
    #[arg(long, default_value = "Prisoner")]
    pub prisoner_role: String,

    /// Role names allowed to punish
    #[arg(long, num_args = 0..)]
    pub admin_roles: Vec<String>,

    /// Usernames allowed to punish
    #[arg(long, num_args = 0..)]
    pub admin_usernames: Vec<String>,

    /// Nickname given to prisoners, `{}` is the username
    #[arg(long, default_value = "Prisoner {}")]
    pub nick_pattern: String,

    /// Announcement when an escape phrase is set: `{}` username, `{}` phrase
    #[arg(long, default_value = "{}, say {}")]
    pub announcement_pattern: String,

    /// Announcement when no escape phrase is set, `{}` is the username
    #[arg(long, default_value = "{}, you are in prison")]
    pub announcement_pattern_no_escape: String,

    /// Rebuke spoken after a forbidden phrase, `{}` is the username
    #[arg(long, default_value = "{}, watch your language!")]
    pub forbidden_pattern: String,

    /// Language of spoken announcements
    #[arg(long, default_value = "en")]
    pub announcement_language: String,

    /// Language passed to Whisper ("auto" to detect)
    #[arg(long, default_value = "en")]
    pub whisper_language: String,

    /// Mute duration after a forbidden phrase, in seconds
    #[arg(long, default_value_t = 30)]
    pub forbidden_mute_duration: u64,

    /// OpenAI-compatible transcription endpoint
    #[arg(long, default_value = "https://api.openai.com/v1")]
    pub whisper_url: String,

    #[arg(long, default_value = "whisper-1")]
    pub whisper_model: String,

    #[arg(long)]
    pub whisper_api_key: Option<String>,

    /// Local ggml Whisper model; takes precedence over the remote endpoint
    #[cfg(feature = "whisper")]
    #[arg(long)]
    pub whisper_model_path: Option<PathBuf>,

    /// Also write logs to a rotating file in this directory
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Enable debug mode with verbose logging
    #[arg(long)]
    pub debug: bool,
}
