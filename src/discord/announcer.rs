//! Spoken announcements: Google Translate TTS, decoded with symphonia and
//! queued on the guild's songbird call. Falls back to a Discord `/tts` message
//! when speech cannot be produced or the bot is not in voice.

use async_trait::async_trait;
use log::{debug, error, info, warn};
use serenity::all::{ChannelId, CreateMessage, GuildId};
use serenity::http::Http;
use songbird::events::{Event, EventContext, EventHandler as VoiceEventHandler, TrackEvent};
use songbird::Songbird;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tokio::sync::oneshot;

use super::voice::{pcm_input, to_discord_pcm};
use crate::announcer::{Announcement, Announcer};
use crate::error::AnnounceError;
use crate::platform::CommandContext;

const TTS_URL: &str = "https://translate.google.com/translate_tts";
/// Longest text the TTS endpoint accepts per request
const TTS_CHUNK_CHARS: usize = 100;

type DoneSender = Arc<Mutex<Option<oneshot::Sender<Result<(), AnnounceError>>>>>;

pub struct SongbirdAnnouncer {
    http: Arc<Http>,
    songbird: Arc<Songbird>,
    client: reqwest::Client,
    language: String,
}

impl SongbirdAnnouncer {
    pub fn new(http: Arc<Http>, songbird: Arc<Songbird>, language: &str) -> Self {
        Self {
            http,
            songbird,
            client: reqwest::Client::new(),
            language: language.to_string(),
        }
    }

    /// Fetch and decode `text` into 48kHz stereo PCM bytes.
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, AnnounceError> {
        let mut pcm = Vec::new();
        for chunk in split_for_tts(text, TTS_CHUNK_CHARS) {
            let mp3 = self.fetch_speech(&chunk).await?;
            let (mono, sample_rate) = decode_to_mono(mp3)?;
            pcm.extend(to_discord_pcm(&mono, sample_rate));
        }
        if pcm.is_empty() {
            return Err(AnnounceError::Synthesis("no audio produced".to_string()));
        }
        Ok(pcm)
    }

    async fn fetch_speech(&self, chunk: &str) -> Result<Vec<u8>, AnnounceError> {
        debug!("Requesting TTS for '{}'", chunk);
        let response = self
            .client
            .get(TTS_URL)
            .query(&[
                ("ie", "UTF-8"),
                ("client", "tw-ob"),
                ("tl", self.language.as_str()),
                ("q", chunk),
            ])
            .send()
            .await
            .map_err(|e| AnnounceError::Synthesis(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AnnounceError::Synthesis(format!("status {}", status)));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| AnnounceError::Synthesis(format!("Failed to read response: {}", e)))?;
        Ok(bytes.to_vec())
    }

    async fn speak_in_chat(&self, ctx: &CommandContext, text: &str) -> Result<Announcement, AnnounceError> {
        ChannelId::new(ctx.channel_id)
            .send_message(self.http.as_ref(), CreateMessage::new().content(text).tts(true))
            .await
            .map_err(|e| AnnounceError::Playback(format!("TTS message failed: {}", e)))?;
        Ok(Announcement::completed(Ok(())))
    }
}

#[async_trait]
impl Announcer for SongbirdAnnouncer {
    async fn speak(&self, ctx: &CommandContext, text: &str) -> Result<Announcement, AnnounceError> {
        let Some(call) = ctx
            .session
            .guild_id()
            .and_then(|id| self.songbird.get(GuildId::new(id)))
        else {
            warn!("Not in a voice channel, announcing in chat instead");
            return self.speak_in_chat(ctx, text).await;
        };

        let pcm = match self.synthesize(text).await {
            Ok(pcm) => pcm,
            Err(e) => {
                error!("{}, announcing in chat instead", e);
                return self.speak_in_chat(ctx, text).await;
            }
        };

        let (tx, announcement) = Announcement::new();
        let done: DoneSender = Arc::new(Mutex::new(Some(tx)));

        let track = call.lock().await.enqueue_input(pcm_input(pcm)).await;
        track
            .add_event(
                Event::Track(TrackEvent::End),
                TrackNotifier {
                    done: done.clone(),
                    result: Ok(()),
                },
            )
            .map_err(|e| AnnounceError::Playback(e.to_string()))?;
        track
            .add_event(
                Event::Track(TrackEvent::Error),
                TrackNotifier {
                    done,
                    result: Err(AnnounceError::Playback("track errored".to_string())),
                },
            )
            .map_err(|e| AnnounceError::Playback(e.to_string()))?;

        info!("Announcement queued in {}", ctx.session);
        Ok(announcement)
    }
}

/// Resolves the announcement once the track ends or fails, whichever comes first.
struct TrackNotifier {
    done: DoneSender,
    result: Result<(), AnnounceError>,
}

#[async_trait]
impl VoiceEventHandler for TrackNotifier {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        let sender = match self.done.lock() {
            Ok(mut done) => done.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(sender) = sender {
            let _ = sender.send(self.result.clone());
        }
        None
    }
}

/// Split text into pieces of at most `max_chars` characters at word
/// boundaries. Words longer than the limit are cut.
pub fn split_for_tts(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        while word.len() > max_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            chunks.push(word.drain(..max_chars).collect());
        }
        if word.is_empty() {
            continue;
        }

        let current_len = current.chars().count();
        let needed = if current.is_empty() { word.len() } else { current_len + 1 + word.len() };
        if needed > max_chars {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.extend(word);
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Decode an MP3 (or any format symphonia probes) into mono f32 samples.
pub fn decode_to_mono(data: Vec<u8>) -> Result<(Vec<f32>, u32), AnnounceError> {
    let mut hint = Hint::new();
    hint.with_extension("mp3");

    let mss = MediaSourceStream::new(Box::new(Cursor::new(data)), Default::default());
    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| AnnounceError::Synthesis(format!("Unrecognised audio: {}", e)))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| AnnounceError::Synthesis("No audio track".to_string()))?;
    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| AnnounceError::Synthesis("Unknown sample rate".to_string()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| AnnounceError::Synthesis(format!("Decoder creation failed: {}", e)))?;

    let mut mono = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            // End of stream
            Err(SymphoniaError::IoError(_)) => break,
            Err(e) => return Err(AnnounceError::Synthesis(format!("Packet read failed: {}", e))),
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let channels = decoded.spec().channels.count().max(1);
                let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
                buf.copy_interleaved_ref(decoded);
                mono.extend(
                    buf.samples()
                        .chunks(channels)
                        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32),
                );
            }
            Err(SymphoniaError::IoError(_)) | Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => return Err(AnnounceError::Synthesis(format!("Decoding failed: {}", e))),
        }
    }

    Ok((mono, sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_for_tts_keeps_words_whole() {
        let chunks = split_for_tts("bob, say let me out", 10);
        assert_eq!(chunks, vec!["bob, say", "let me out"]);
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
    }

    #[test]
    fn test_split_for_tts_short_text_is_one_chunk() {
        assert_eq!(split_for_tts("  bob, you are in prison ", 100), vec!["bob, you are in prison"]);
        assert!(split_for_tts("   ", 100).is_empty());
    }

    #[test]
    fn test_split_for_tts_cuts_long_words() {
        assert_eq!(split_for_tts("ab abcdefg", 3), vec!["ab", "abc", "def", "g"]);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode_to_mono(vec![0u8; 64]),
            Err(AnnounceError::Synthesis(_))
        ));
    }

    #[test]
    fn test_decode_wav_downmixes_to_mono() {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 24000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for _ in 0..100 {
                writer.write_sample(i16::MAX).unwrap();
                writer.write_sample(0i16).unwrap();
            }
            writer.finalize().unwrap();
        }

        let (mono, rate) = decode_to_mono(cursor.into_inner()).unwrap();
        assert_eq!(rate, 24000);
        assert_eq!(mono.len(), 100);
        assert!((mono[0] - 0.5).abs() < 0.01);
    }
}
