pub mod announcer;
pub mod cli;
pub mod commands;
pub mod discord;
pub mod error;
pub mod matcher;
pub mod platform;
pub mod registry;
pub mod settings;
pub mod tasks;
pub mod transcription;
pub mod warden;

#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use file_rotate::compression::Compression;
use file_rotate::suffix::AppendCount;
use file_rotate::{ContentLimit, FileRotate};
use log::{debug, info};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use cli::CliArgs;
use settings::{load_forbidden_phrases, read_token, PrisonSettings};
use transcription::{RemoteWhisper, Transcriber};

const LOG_FILE_NAME: &str = "prison-bot.log";
const LOG_FILE_MAX_BYTES: usize = 32 * 1024 * 1024;
const LOG_FILE_BACKUPS: usize = 5;

/// Install the global logger. `RUST_LOG` overrides the defaults.
///
/// With `log_dir`, every line also goes to `prison-bot.log` in that directory,
/// rotated at 32 MiB with five backups kept.
pub fn init_logging(debug: bool, log_dir: Option<&Path>) -> Result<()> {
    let default_filter = if debug {
        "debug,serenity=warn,songbird=warn,tracing=warn,rustls=warn,h2=warn,hyper=warn,tungstenite=warn"
    } else {
        "info,serenity=warn,songbird=warn,tracing=warn,rustls=warn,h2=warn,hyper=warn,tungstenite=warn"
    };

    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter));
    builder.format_timestamp(None).format_target(false);

    if let Some(dir) = log_dir {
        let file = open_log_file(dir)?;
        builder
            .format_timestamp_secs()
            .target(env_logger::Target::Pipe(Box::new(ConsoleAndFile { file })));
    }

    builder.init();
    Ok(())
}

fn open_log_file(dir: &Path) -> Result<FileRotate<AppendCount>> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create log directory {}", dir.display()))?;
    Ok(FileRotate::new(
        dir.join(LOG_FILE_NAME),
        AppendCount::new(LOG_FILE_BACKUPS),
        ContentLimit::Bytes(LOG_FILE_MAX_BYTES),
        Compression::None,
        #[cfg(unix)]
        None,
    ))
}

/// Copies every log line to stderr and the log file.
struct ConsoleAndFile<W> {
    file: W,
}

impl<W: Write> Write for ConsoleAndFile<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

fn build_transcriber(args: &CliArgs) -> Result<Arc<dyn Transcriber>> {
    #[cfg(feature = "whisper")]
    {
        if let Some(path) = &args.whisper_model_path {
            info!("Loading local Whisper model from {}", path.display());
            return Ok(Arc::new(transcription::LocalWhisper::new(path)?));
        }
    }

    info!("Using remote Whisper at {} ({})", args.whisper_url, args.whisper_model);
    Ok(Arc::new(RemoteWhisper::new(
        &args.whisper_url,
        &args.whisper_model,
        args.whisper_api_key.clone(),
    )))
}

pub async fn run(args: CliArgs) -> Result<()> {
    let token = read_token(&args)?;
    let settings = PrisonSettings::from_cli(&args);
    if let Ok(json) = serde_json::to_string_pretty(&settings) {
        debug!("Settings: {}", json);
    }
    let forbidden = load_forbidden_phrases(&settings.forbidden_path);
    info!("{} forbidden phrases loaded", forbidden.len());

    let transcriber = build_transcriber(&args)?;

    discord::run_bot(&token, args.command_prefix.clone(), settings, forbidden, transcriber).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_lines_reach_file() {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path().join("logs");

        let mut out = ConsoleAndFile {
            file: open_log_file(&logs).unwrap(),
        };
        out.write_all(b"[INFO] Warden started\n").unwrap();
        out.flush().unwrap();

        let written = std::fs::read_to_string(logs.join(LOG_FILE_NAME)).unwrap();
        assert_eq!(written, "[INFO] Warden started\n");
    }
}
