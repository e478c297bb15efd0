//! Songbird plumbing: receiving prisoners' audio and playing PCM into a call.

use async_trait::async_trait;
use songbird::events::{Event, EventContext, EventHandler as VoiceEventHandler};
use songbird::input::{Input, RawAdapter};
use std::collections::HashMap;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::sync::Arc;
use symphonia_core::io::MediaSource;
use tokio::sync::RwLock;

use crate::platform::MemberId;
use crate::transcription::buffer::DISCORD_SAMPLE_RATE;
use crate::transcription::AudioSink;

/// Forwards decoded voice of every speaker in the call into a transcription sink.
#[derive(Clone)]
pub struct CaptureReceiver {
    sink: AudioSink,
    ssrc_to_user: Arc<RwLock<HashMap<u32, MemberId>>>,
}

impl CaptureReceiver {
    pub fn new(sink: AudioSink) -> Self {
        Self {
            sink,
            ssrc_to_user: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

#[async_trait]
impl VoiceEventHandler for CaptureReceiver {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        match ctx {
            EventContext::SpeakingStateUpdate(speaking) => {
                if let Some(user_id) = speaking.user_id {
                    let member = MemberId(u64::from(user_id.0));
                    self.ssrc_to_user.write().await.insert(speaking.ssrc, member);
                    log::debug!("Mapped SSRC {} to user {}", speaking.ssrc, member);
                }
            }
            EventContext::VoiceTick(tick) => {
                let ssrc_to_user = self.ssrc_to_user.read().await;
                for (ssrc, data) in &tick.speaking {
                    let Some(decoded) = data.decoded_voice.as_ref() else {
                        log::debug!(
                            "VoiceTick: SSRC {} speaking but no decoded audio (has packet: {})",
                            ssrc,
                            data.packet.is_some()
                        );
                        continue;
                    };
                    let Some(member) = ssrc_to_user.get(ssrc) else {
                        continue;
                    };
                    if !self.sink.push(*member, decoded.clone()) {
                        log::debug!("Transcription session closed, dropping audio of {}", member);
                    }
                }
            }
            _ => {}
        }
        None
    }
}

/// A simple MediaSource wrapper around a Cursor<Vec<u8>> for in-memory audio
pub struct MemoryAudioSource {
    cursor: Cursor<Vec<u8>>,
    len: u64,
}

impl MemoryAudioSource {
    pub fn new(data: Vec<u8>) -> Self {
        let len = data.len() as u64;
        Self {
            cursor: Cursor::new(data),
            len,
        }
    }
}

impl Read for MemoryAudioSource {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl Seek for MemoryAudioSource {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.cursor.seek(pos)
    }
}

impl MediaSource for MemoryAudioSource {
    fn is_seekable(&self) -> bool {
        true
    }

    fn byte_len(&self) -> Option<u64> {
        Some(self.len)
    }
}

/// Resample mono audio to 48kHz and duplicate it into interleaved stereo f32
/// little-endian bytes, the layout `RawAdapter` expects.
pub fn to_discord_pcm(mono: &[f32], sample_rate: u32) -> Vec<u8> {
    let resampled = if sample_rate != DISCORD_SAMPLE_RATE && sample_rate > 0 {
        let ratio = DISCORD_SAMPLE_RATE as f64 / sample_rate as f64;
        let new_len = (mono.len() as f64 * ratio) as usize;
        (0..new_len)
            .map(|i| {
                let src_idx = (i as f64 / ratio) as usize;
                mono.get(src_idx).copied().unwrap_or(0.0)
            })
            .collect::<Vec<f32>>()
    } else {
        mono.to_vec()
    };

    resampled
        .iter()
        .flat_map(|&sample| [sample, sample])
        .flat_map(|s| s.to_le_bytes())
        .collect()
}

/// Wrap bytes produced by [`to_discord_pcm`] as a playable input.
pub fn pcm_input(pcm: Vec<u8>) -> Input {
    RawAdapter::new(MemoryAudioSource::new(pcm), DISCORD_SAMPLE_RATE, 2).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_discord_pcm_upsamples_and_duplicates_channels() {
        let pcm = to_discord_pcm(&[0.5, -0.5, 0.25], 24000);
        // 3 samples at 24kHz -> 6 at 48kHz -> 12 stereo samples -> 48 bytes
        assert_eq!(pcm.len(), 48);

        let samples: Vec<f32> = pcm
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        assert_eq!(&samples[..4], &[0.5, 0.5, 0.5, 0.5]);
        assert_eq!(&samples[4..6], &[-0.5, -0.5]);
        assert_eq!(samples[11], 0.25);
    }

    #[test]
    fn test_to_discord_pcm_passthrough_at_48k() {
        assert_eq!(to_discord_pcm(&[1.0], 48000).len(), 8);
    }

    #[test]
    fn test_memory_audio_source_reads_and_seeks() {
        let mut source = MemoryAudioSource::new(vec![1, 2, 3, 4]);
        assert_eq!(source.byte_len(), Some(4));
        let mut buf = [0u8; 2];
        source.seek(SeekFrom::Start(2)).unwrap();
        source.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [3, 4]);
    }
}
