//! Live transcription of imprisoned speakers.
//!
//! Audio flows from the voice receiver into an [`AudioSink`], is accumulated per
//! speaker on a session worker thread, transcribed there with a blocking
//! [`Transcriber`], and the text is handed back to the warden as a
//! [`Transcript`] event.

pub mod buffer;
pub mod engine;
pub mod session;

use std::sync::mpsc;

use crate::platform::{MemberId, SessionKey};

pub use buffer::{convert_audio, SpeakerBuffers};
pub use engine::{RemoteWhisper, Transcriber};
pub use session::TranscriptionSession;

#[cfg(feature = "whisper")]
pub use engine::LocalWhisper;

/// One decoded voice frame (48kHz interleaved stereo) from one speaker.
#[derive(Debug, Clone)]
pub struct VoiceChunk {
    pub member: MemberId,
    pub pcm: Vec<i16>,
}

/// Text recognised for a speaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    pub session: SessionKey,
    pub member: MemberId,
    pub text: String,
}

/// Entry point for received audio. Cheap to clone; pushing never blocks.
#[derive(Debug, Clone)]
pub struct AudioSink {
    tx: mpsc::Sender<VoiceChunk>,
}

impl AudioSink {
    pub(crate) fn new(tx: mpsc::Sender<VoiceChunk>) -> Self {
        Self { tx }
    }

    /// Returns false once the session has shut down.
    pub fn push(&self, member: MemberId, pcm: Vec<i16>) -> bool {
        self.tx.send(VoiceChunk { member, pcm }).is_ok()
    }
}
