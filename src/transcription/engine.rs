//! Speech-to-text engines. Calls block: they run on the session worker thread.

use hound::{SampleFormat, WavSpec, WavWriter};
use log::debug;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::io::Cursor;
use tokio::runtime::Handle;

use super::buffer::WHISPER_SAMPLE_RATE;
use crate::error::TranscriptionError;

pub trait Transcriber: Send + Sync {
    /// Transcribe 16kHz mono samples. Blocks until the engine answers.
    fn transcribe(&self, samples: &[f32], language: Option<&str>) -> Result<String, TranscriptionError>;
}

#[derive(Debug, Deserialize)]
struct RemoteWhisperResponse {
    text: String,
}

pub fn samples_to_wav_bytes(samples: &[f32]) -> Result<Vec<u8>, TranscriptionError> {
    let spec = WavSpec {
        channels: 1,
        sample_rate: WHISPER_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    let mut writer = WavWriter::new(&mut cursor, spec)
        .map_err(|e| TranscriptionError::Encoding(format!("Failed to initialize WAV writer: {}", e)))?;

    for sample in samples {
        let sample_i16 = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        writer
            .write_sample(sample_i16)
            .map_err(|e| TranscriptionError::Encoding(format!("Failed to write WAV sample: {}", e)))?;
    }

    writer
        .finalize()
        .map_err(|e| TranscriptionError::Encoding(format!("Failed to finalize WAV data: {}", e)))?;

    Ok(cursor.into_inner())
}

/// OpenAI-compatible `/audio/transcriptions` endpoint.
pub struct RemoteWhisper {
    client: reqwest::Client,
    runtime: Handle,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl RemoteWhisper {
    /// Must be called from inside the tokio runtime; requests are driven on it.
    pub fn new(base_url: &str, model: &str, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            runtime: Handle::current(),
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            model: model.trim().to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        }
    }

    async fn request(&self, samples: &[f32], language: Option<&str>) -> Result<String, TranscriptionError> {
        if self.base_url.is_empty() {
            return Err(TranscriptionError::Request("Remote Whisper base URL is empty".to_string()));
        }

        let url = format!("{}/audio/transcriptions", self.base_url);
        debug!("Sending remote transcription request to: {}", url);

        let wav_bytes = samples_to_wav_bytes(samples)?;
        let file_part = Part::bytes(wav_bytes)
            .file_name("recording.wav")
            .mime_str("audio/wav")
            .map_err(|e| TranscriptionError::Request(format!("Failed to build multipart audio part: {}", e)))?;

        let mut form = Form::new()
            .part("file", file_part)
            .text("model", self.model.clone())
            .text("response_format", "json".to_string());

        if let Some(language) = language {
            form = form.text("language", language.to_string());
        }

        let mut request = self.client.post(&url).multipart(form);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TranscriptionError::Request(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            return Err(TranscriptionError::Request(format!(
                "status {}: {}",
                status, error_text
            )));
        }

        let body: RemoteWhisperResponse = response
            .json()
            .await
            .map_err(|e| TranscriptionError::Request(format!("Failed to parse response: {}", e)))?;

        Ok(body.text.trim().to_string())
    }
}

impl Transcriber for RemoteWhisper {
    fn transcribe(&self, samples: &[f32], language: Option<&str>) -> Result<String, TranscriptionError> {
        if samples.is_empty() {
            return Ok(String::new());
        }
        self.runtime.block_on(self.request(samples, language))
    }
}

// -----------------------------------------------------------------------------
// Local Whisper (optional feature). Requires whisper.cpp/ggml.
// -----------------------------------------------------------------------------
#[cfg(feature = "whisper")]
mod local {
    use super::*;
    use std::path::Path;
    use std::sync::Mutex;
    use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

    /// Runs a ggml Whisper model (e.g. ggml-base.bin) on-device.
    pub struct LocalWhisper {
        #[allow(dead_code)]
        context: WhisperContext,
        state: Mutex<whisper_rs::WhisperState>,
    }

    impl LocalWhisper {
        pub fn new(model_path: &Path) -> Result<Self, TranscriptionError> {
            let path = model_path.to_string_lossy();
            let context = WhisperContext::new_with_params(&path, WhisperContextParameters::default())
                .map_err(|e| TranscriptionError::Engine(format!("Whisper load failed: {}", e)))?;
            let state = context
                .create_state()
                .map_err(|e| TranscriptionError::Engine(format!("Whisper state init failed: {}", e)))?;
            Ok(Self {
                context,
                state: Mutex::new(state),
            })
        }
    }

    impl Transcriber for LocalWhisper {
        fn transcribe(&self, samples: &[f32], language: Option<&str>) -> Result<String, TranscriptionError> {
            if samples.is_empty() {
                return Ok(String::new());
            }

            let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
            params.set_print_progress(false);
            params.set_print_realtime(false);
            params.set_no_timestamps(true);
            params.set_language(language);

            let mut state = self
                .state
                .lock()
                .map_err(|e| TranscriptionError::Engine(format!("Whisper lock poisoned: {}", e)))?;
            state
                .full(params, samples)
                .map_err(|e| TranscriptionError::Engine(format!("Whisper inference failed: {}", e)))?;

            Ok(state
                .as_iter()
                .filter_map(|seg| seg.to_str().ok().map(str::to_string))
                .collect::<Vec<_>>()
                .join(" ")
                .trim()
                .to_string())
        }
    }
}

#[cfg(feature = "whisper")]
pub use local::LocalWhisper;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_samples_to_wav_bytes_header() {
        let wav = samples_to_wav_bytes(&[0.0, 0.5, -0.5, 2.0]).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        // 44 byte header + 4 samples * 2 bytes
        assert_eq!(wav.len(), 44 + 8);

        let reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
        assert_eq!(reader.spec().sample_rate, 16000);
        let samples: Vec<i16> = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples[3], i16::MAX);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_remote_whisper_skips_empty_audio() {
        let whisper = RemoteWhisper::new("http://127.0.0.1:9", "whisper-1", None);
        let text = tokio::task::spawn_blocking(move || whisper.transcribe(&[], Some("en")))
            .await
            .unwrap()
            .unwrap();
        assert!(text.is_empty());
    }
}
