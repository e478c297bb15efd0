use log::{debug, error, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc as tokio_mpsc;

use super::{AudioSink, SpeakerBuffers, Transcriber, Transcript, VoiceChunk};
use crate::error::TranscriptionError;
use crate::platform::{CommandContext, SessionKey};
use crate::settings::CaptureSettings;
use crate::warden::WardenEvent;

/// How often an idle worker checks whether its session was torn down
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// A running transcription session for one conversation context.
///
/// Dropping the session stops it; the worker thread notices on its next poll and
/// is not joined, since it may be blocked inside a transcription call.
pub struct TranscriptionSession {
    ctx: CommandContext,
    sink: AudioSink,
    running: Arc<AtomicBool>,
    _worker: thread::JoinHandle<()>,
}

impl TranscriptionSession {
    pub fn start(
        ctx: CommandContext,
        transcriber: Arc<dyn Transcriber>,
        capture: CaptureSettings,
        language: Option<String>,
        events: tokio_mpsc::Sender<WardenEvent>,
    ) -> Result<Self, TranscriptionError> {
        let (tx, rx) = mpsc::channel();
        let running = Arc::new(AtomicBool::new(true));

        let session = ctx.session;
        let running_clone = running.clone();
        let worker = thread::Builder::new()
            .name(format!("transcribe-{}", session))
            .spawn(move || {
                run_worker(session, rx, transcriber, capture, language, events, running_clone);
            })?;

        info!("Transcription session started for {}", session);

        Ok(Self {
            ctx,
            sink: AudioSink::new(tx),
            running,
            _worker: worker,
        })
    }

    pub fn context(&self) -> &CommandContext {
        &self.ctx
    }

    pub fn sink(&self) -> AudioSink {
        self.sink.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}

impl Drop for TranscriptionSession {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        info!("Transcription session stopped for {}", self.ctx.session);
    }
}

fn run_worker(
    session: SessionKey,
    rx: Receiver<VoiceChunk>,
    transcriber: Arc<dyn Transcriber>,
    capture: CaptureSettings,
    language: Option<String>,
    events: tokio_mpsc::Sender<WardenEvent>,
    running: Arc<AtomicBool>,
) {
    let mut buffers = SpeakerBuffers::new(capture);

    while running.load(Ordering::Relaxed) {
        let chunk = match rx.recv_timeout(POLL_INTERVAL) {
            Ok(chunk) => chunk,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let Some(audio) = buffers.push(chunk.member, &chunk.pcm) else {
            continue;
        };

        // Transcription is synchronous: audio from this session queues up meanwhile
        let text = match transcriber.transcribe(&audio, language.as_deref()) {
            Ok(text) => text,
            Err(e) => {
                error!("[Text recognition] {} in {}: {}", chunk.member, session, e);
                continue;
            }
        };

        let text = text.trim();
        if text.is_empty() {
            debug!("[Text recognition] {}: <empty string>", chunk.member);
            continue;
        }

        if !running.load(Ordering::Relaxed) {
            break;
        }

        let transcript = Transcript {
            session,
            member: chunk.member,
            text: text.to_string(),
        };
        if events.blocking_send(WardenEvent::Transcript(transcript)).is_err() {
            debug!("Warden stopped, dropping transcription worker for {}", session);
            break;
        }
    }

    debug!("Transcription worker for {} exiting", session);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::MemberId;
    use crate::testing::{context, ScriptedTranscriber};
    use std::time::Instant;

    const FRAME: usize = 1920;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_session_emits_transcripts_for_accumulated_audio() {
        let (tx, mut rx) = tokio_mpsc::channel(8);
        let transcriber = Arc::new(ScriptedTranscriber::new(&["  let me out  "]));
        let session = TranscriptionSession::start(
            context(1),
            transcriber.clone(),
            CaptureSettings::default(),
            Some("en".to_string()),
            tx,
        )
        .unwrap();

        let sink = session.sink();
        for _ in 0..150 {
            assert!(sink.push(MemberId(7), vec![100; FRAME]));
        }

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            WardenEvent::Transcript(t) => {
                assert_eq!(t.member, MemberId(7));
                assert_eq!(t.session, SessionKey::Guild(1));
                assert_eq!(t.text, "let me out");
            }
            other => panic!("unexpected event {:?}", other),
        }

        let calls = transcriber.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, 48000);
        assert_eq!(calls[0].1.as_deref(), Some("en"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failed_and_empty_transcriptions_are_dropped() {
        let (tx, mut rx) = tokio_mpsc::channel(8);
        // Script: error, empty, then text
        let transcriber = Arc::new(ScriptedTranscriber::with_failure_first(&["", "hello"]));
        let session = TranscriptionSession::start(
            context(1),
            transcriber.clone(),
            CaptureSettings::default(),
            None,
            tx,
        )
        .unwrap();

        let sink = session.sink();
        for _ in 0..450 {
            sink.push(MemberId(3), vec![0; FRAME]);
        }

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, WardenEvent::Transcript(ref t) if t.text == "hello"));
        assert_eq!(transcriber.calls().len(), 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_dropping_session_stops_worker() {
        let (tx, _rx) = tokio_mpsc::channel(8);
        let session = TranscriptionSession::start(
            context(1),
            Arc::new(ScriptedTranscriber::new(&[])),
            CaptureSettings::default(),
            None,
            tx,
        )
        .unwrap();
        let sink = session.sink();
        assert!(session.is_running());
        drop(session);

        let deadline = Instant::now() + Duration::from_secs(5);
        while sink.push(MemberId(1), vec![0; 2]) {
            assert!(Instant::now() < deadline, "worker did not exit");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}
