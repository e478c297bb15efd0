use std::collections::HashMap;

use crate::platform::MemberId;
use crate::settings::CaptureSettings;

/// Discord voice arrives as 48kHz interleaved stereo i16.
pub const DISCORD_SAMPLE_RATE: u32 = 48000;
/// Whisper wants 16kHz mono f32.
pub const WHISPER_SAMPLE_RATE: u32 = 16000;

/// Convert stereo audio to mono and resample
pub fn convert_audio(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<f32> {
    // First convert stereo to mono (average channels)
    let mono: Vec<f32> = samples
        .chunks(2)
        .map(|chunk| {
            let left = chunk.first().copied().unwrap_or(0) as f32 / 32768.0;
            let right = chunk.get(1).copied().unwrap_or(0) as f32 / 32768.0;
            (left + right) / 2.0
        })
        .collect();

    // Simple linear resampling
    if from_rate == to_rate {
        return mono;
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let new_len = (mono.len() as f64 / ratio) as usize;

    (0..new_len)
        .map(|i| {
            let src_idx = (i as f64 * ratio) as usize;
            mono.get(src_idx).copied().unwrap_or(0.0)
        })
        .collect()
}

#[derive(Debug, Default)]
struct SpeakerBuffer {
    samples: Vec<f32>,
    /// Buffered duration at the previous emission
    emitted_at_secs: f32,
}

/// Per-speaker accumulation gate. Each speaker's audio keeps growing and the whole
/// buffer is handed out for transcription every `chunk_secs` of new audio, so later
/// transcripts include earlier words of the same utterance.
#[derive(Debug)]
pub struct SpeakerBuffers {
    settings: CaptureSettings,
    speakers: HashMap<MemberId, SpeakerBuffer>,
}

impl SpeakerBuffers {
    pub fn new(settings: CaptureSettings) -> Self {
        Self {
            settings,
            speakers: HashMap::new(),
        }
    }

    /// Append a Discord voice frame. Returns the accumulated 16kHz buffer when it is
    /// due for transcription.
    pub fn push(&mut self, member: MemberId, pcm: &[i16]) -> Option<Vec<f32>> {
        let buffer = self.speakers.entry(member).or_default();
        buffer
            .samples
            .extend(convert_audio(pcm, DISCORD_SAMPLE_RATE, WHISPER_SAMPLE_RATE));

        let recorded_secs = buffer.samples.len() as f32 / WHISPER_SAMPLE_RATE as f32;
        if recorded_secs - buffer.emitted_at_secs < self.settings.chunk_secs {
            return None;
        }

        log::debug!("{} recorded time: {:.2}s", member, recorded_secs);

        if recorded_secs >= self.settings.reset_secs {
            buffer.emitted_at_secs = 0.0;
            Some(std::mem::take(&mut buffer.samples))
        } else {
            buffer.emitted_at_secs = recorded_secs;
            Some(buffer.samples.clone())
        }
    }

    pub fn buffered_secs(&self, member: MemberId) -> f32 {
        self.speakers
            .get(&member)
            .map(|b| b.samples.len() as f32 / WHISPER_SAMPLE_RATE as f32)
            .unwrap_or(0.0)
    }
}
