//! Voice session orchestration.
//!
//! [`VoiceSessionManager`] owns one live conversation at a time: it
//! opens the output sink, connects the streaming session, starts the
//! microphone only after the session is confirmed open, and dispatches
//! every domain event into the playback scheduler and the transcript.
//! The UI (here: the CLI) observes progress through [`snapshot`].
//!
//! Teardown is centralized and idempotent: any terminal event — remote
//! close, error, or a user-initiated `disconnect()` — funnels through
//! the same resource-release path.
//!
//! [`snapshot`]: VoiceSessionManager::snapshot

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

use super::capture::{self, CaptureHandle};
use super::codec;
use super::live::{ContentDelta, LiveConfig, LiveEvent, LiveSession, SessionStatus};
use super::playback::{DeviceSink, PlaybackScheduler, Scheduled};
use super::transcript::{TranscriptEntry, TurnBuffers};
use super::OUTPUT_SAMPLE_RATE;
use crate::assist::SYSTEM_INSTRUCTION;
use crate::config::Config;
use crate::error::SathiError;
use crate::language::Language;

/// Everything a voice session needs, resolved before connecting.
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    pub api_key: String,
    pub model: String,
    pub voice_name: String,
    /// Response language, fixed for the session's lifetime.
    pub language: Language,
    pub volume: f32,
}

impl VoiceConfig {
    /// Resolve from the loaded client config. Fails with a configuration
    /// error (before any connection attempt) when the API key is missing.
    pub fn from_config(config: &Config, language: Language) -> Result<Self, SathiError> {
        Ok(Self {
            api_key: config.resolve_api_key()?,
            model: config.voice.model.clone(),
            voice_name: config.voice.voice_name.clone(),
            language,
            volume: config.voice.volume,
        })
    }

    /// System instruction for the streaming session: the assistant
    /// persona plus the active language directive.
    pub fn system_instruction(&self) -> String {
        format!(
            "{SYSTEM_INSTRUCTION}\n\nIMPORTANT: {} Keep your audio responses concise and conversational.",
            self.language.directive()
        )
    }
}

/// Observable state of the voice session.
#[derive(Debug, Clone, Serialize)]
pub struct VoiceSnapshot {
    pub status: SessionStatus,
    /// True while model audio is playing or queued.
    pub speaking: bool,
    /// Last failure, kept until the next `connect()`.
    pub error: Option<String>,
    pub transcript: Vec<TranscriptEntry>,
}

struct State {
    status: SessionStatus,
    error: Option<String>,
    transcript: Vec<TranscriptEntry>,
    buffers: TurnBuffers,
    scheduler: PlaybackScheduler,
    capture: Option<CaptureHandle>,
    session: Option<Arc<LiveSession>>,
    /// Bumped on every connect and teardown so stale event loops and
    /// playback timers from a previous session cannot touch this one.
    generation: u64,
}

struct Inner {
    config: VoiceConfig,
    state: Mutex<State>,
}

/// Manages the lifecycle of one live voice conversation.
#[derive(Clone)]
pub struct VoiceSessionManager {
    inner: Arc<Inner>,
}

impl VoiceSessionManager {
    pub fn new(config: VoiceConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(State {
                    status: SessionStatus::Idle,
                    error: None,
                    transcript: Vec::new(),
                    buffers: TurnBuffers::new(),
                    scheduler: PlaybackScheduler::new(),
                    capture: None,
                    session: None,
                    generation: 0,
                }),
            }),
        }
    }

    /// Current observable state.
    pub fn snapshot(&self) -> VoiceSnapshot {
        let state = self.inner.state.lock();
        VoiceSnapshot {
            status: state.status,
            speaking: state.scheduler.is_speaking(),
            error: state.error.clone(),
            transcript: state.transcript.clone(),
        }
    }

    /// Start a voice session. No-op when one is already connecting or
    /// open. On any failure the partial setup is fully torn down before
    /// the error is returned.
    pub async fn connect(&self) -> Result<(), SathiError> {
        let generation = {
            let mut state = self.inner.state.lock();
            if matches!(state.status, SessionStatus::Connecting | SessionStatus::Open) {
                return Ok(());
            }
            state.transcript.clear();
            state.error = None;
            state.buffers.clear();
            state.status = SessionStatus::Connecting;
            state.generation += 1;
            state.generation
        };

        let sink = match DeviceSink::open() {
            Ok(sink) => sink,
            Err(e) => return self.fail(generation, e),
        };
        {
            let mut state = self.inner.state.lock();
            if state.generation != generation {
                return Ok(()); // disconnected mid-setup
            }
            state.scheduler.attach(Box::new(sink));
            state.scheduler.set_volume(self.inner.config.volume);
        }

        let live_config = LiveConfig {
            api_key: self.inner.config.api_key.clone(),
            model: self.inner.config.model.clone(),
            system_instruction: self.inner.config.system_instruction(),
            voice_name: self.inner.config.voice_name.clone(),
        };
        let (session, events) = match LiveSession::connect(live_config).await {
            Ok(pair) => pair,
            Err(e) => return self.fail(generation, e),
        };
        let session = Arc::new(session);
        {
            let mut state = self.inner.state.lock();
            if state.generation != generation {
                session.close();
                return Ok(());
            }
            state.session = Some(Arc::clone(&session));
            state.status = SessionStatus::Open;
        }

        // The microphone starts only now that the session is confirmed
        // open. The capture callback hands frames straight to the
        // session, which drops them synchronously unless it is `Open`.
        let capture_session = Arc::clone(&session);
        match capture::start(move |frame| capture_session.send_frame(frame)) {
            Ok(handle) => {
                let mut state = self.inner.state.lock();
                if state.generation != generation {
                    drop(state);
                    let mut handle = handle;
                    handle.stop();
                    return Ok(());
                }
                state.capture = Some(handle);
            }
            Err(e) => return self.fail(generation, e),
        }

        let manager = self.clone();
        tokio::spawn(async move {
            manager.event_loop(generation, events).await;
        });

        Ok(())
    }

    /// Idempotent full teardown: stop capture, kill playback, release
    /// both audio devices, close the session. Callable from any state.
    pub fn disconnect(&self) {
        let mut state = self.inner.state.lock();
        Self::teardown_locked(&mut state);
    }

    // ── Internal ──────────────────────────────────────────────────

    /// Record a connect-phase failure, tear down, and propagate.
    fn fail(&self, generation: u64, error: SathiError) -> Result<(), SathiError> {
        {
            let mut state = self.inner.state.lock();
            if state.generation == generation {
                state.error = Some(error.to_string());
                state.status = SessionStatus::Errored;
                Self::teardown_locked(&mut state);
            }
        }
        Err(error)
    }

    async fn event_loop(self, generation: u64, mut events: mpsc::UnboundedReceiver<LiveEvent>) {
        while let Some(event) = events.recv().await {
            if !self.handle_event(generation, event) {
                return;
            }
        }
        // Channel closed without a terminal event: treat as remote close.
        self.finish(generation, None);
    }

    /// Apply one domain event. Returns false once the session reached a
    /// terminal state and the loop should stop.
    fn handle_event(&self, generation: u64, event: LiveEvent) -> bool {
        match event {
            LiveEvent::Opened => true,
            LiveEvent::Content(delta) => self.handle_content(generation, delta),
            LiveEvent::Interrupted => {
                let mut state = self.inner.state.lock();
                if state.generation != generation {
                    return false;
                }
                state.scheduler.stop_all();
                if let Some(entry) = state.buffers.flush_interrupted() {
                    state.transcript.push(entry);
                }
                true
            }
            LiveEvent::Closed => {
                self.finish(generation, None);
                false
            }
            LiveEvent::Errored { reason } => {
                self.finish(generation, Some(reason));
                false
            }
        }
    }

    fn handle_content(&self, generation: u64, delta: ContentDelta) -> bool {
        let mut state = self.inner.state.lock();
        if state.generation != generation {
            return false;
        }

        if let Some(text) = &delta.input_text {
            state.buffers.push_input(text);
        }
        if let Some(text) = &delta.output_text {
            state.buffers.push_output(text);
        }

        if let Some(payload) = &delta.audio {
            match codec::decode_frame(payload, OUTPUT_SAMPLE_RATE, 1) {
                Ok(chunk) => {
                    if let Some(scheduled) = state.scheduler.enqueue(chunk) {
                        self.arm_end_timer(generation, scheduled);
                    }
                }
                Err(e) => {
                    // Contained: the chunk is dropped, the session lives on.
                    tracing::warn!(error = %e, "Dropping malformed audio chunk");
                    state.error = Some(e.to_string());
                }
            }
        }

        if delta.turn_complete {
            let entries = state.buffers.flush_turn();
            state.transcript.extend(entries);
        }
        true
    }

    /// Mark the end of a chunk's playback so `speaking` clears once the
    /// in-flight set drains.
    fn arm_end_timer(&self, generation: u64, scheduled: Scheduled) {
        let manager = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(scheduled.ends_in).await;
            let mut state = manager.inner.state.lock();
            if state.generation == generation {
                state.scheduler.chunk_ended(scheduled.handle);
            }
        });
    }

    /// Terminal transition from a remote close or error, followed by the
    /// same teardown `disconnect()` runs.
    fn finish(&self, generation: u64, error_reason: Option<String>) {
        let mut state = self.inner.state.lock();
        if state.generation != generation {
            return;
        }
        match error_reason {
            Some(reason) => {
                state.status = SessionStatus::Errored;
                state.error = Some(SathiError::Connection(reason).to_string());
            }
            None => state.status = SessionStatus::Closed,
        }
        Self::teardown_locked(&mut state);
    }

    fn teardown_locked(state: &mut State) {
        // Invalidate in-flight event loops and playback timers first.
        state.generation += 1;
        if let Some(mut capture) = state.capture.take() {
            capture.stop();
        }
        state.scheduler.release();
        if let Some(session) = state.session.take() {
            session.close();
        }
        state.buffers.clear();
        state.status = SessionStatus::Idle;
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::playback::OutputSink;
    use crate::voice::transcript::Role;
    use crate::voice::PlaybackChunk;

    fn test_config() -> VoiceConfig {
        VoiceConfig {
            api_key: "test-key".into(),
            model: "test-model".into(),
            voice_name: "Zephyr".into(),
            language: Language::En,
            volume: 1.0,
        }
    }

    /// Manager with the state a successful connect would leave behind,
    /// minus real devices and sockets.
    fn open_manager() -> (VoiceSessionManager, u64) {
        let manager = VoiceSessionManager::new(test_config());
        let generation = {
            let mut state = manager.inner.state.lock();
            state.status = SessionStatus::Open;
            state.generation
        };
        (manager, generation)
    }

    fn content(
        input: Option<&str>,
        output: Option<&str>,
        audio: Option<&str>,
        turn_complete: bool,
    ) -> LiveEvent {
        LiveEvent::Content(ContentDelta {
            input_text: input.map(str::to_string),
            output_text: output.map(str::to_string),
            audio: audio.map(str::to_string),
            turn_complete,
        })
    }

    #[test]
    fn disconnect_is_idempotent_from_idle() {
        let manager = VoiceSessionManager::new(test_config());
        manager.disconnect();
        manager.disconnect();

        let snapshot = manager.snapshot();
        assert_eq!(snapshot.status, SessionStatus::Idle);
        assert!(snapshot.error.is_none());
        assert!(snapshot.transcript.is_empty());
    }

    #[test]
    fn transcript_only_turn_does_not_speak() {
        let (manager, generation) = open_manager();
        assert!(manager.handle_event(generation, content(None, Some("Hello"), None, true)));

        let snapshot = manager.snapshot();
        assert_eq!(
            snapshot.transcript,
            vec![TranscriptEntry {
                role: Role::Model,
                text: "Hello".into()
            }]
        );
        assert!(!snapshot.speaking);
        assert_eq!(snapshot.status, SessionStatus::Open);
    }

    #[test]
    fn turn_complete_flushes_user_before_model() {
        let (manager, generation) = open_manager();
        manager.handle_event(generation, content(Some("hello"), None, None, false));
        manager.handle_event(generation, content(None, Some("hi"), None, false));
        manager.handle_event(generation, content(None, None, None, true));

        let transcript = manager.snapshot().transcript;
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[0].role, Role::User);
        assert_eq!(transcript[0].text, "hello");
        assert_eq!(transcript[1].role, Role::Model);
        assert_eq!(transcript[1].text, "hi");
    }

    #[test]
    fn interruption_flushes_model_and_keeps_input_pending() {
        let (manager, generation) = open_manager();
        manager.handle_event(generation, content(Some("user says"), None, None, false));
        manager.handle_event(generation, content(None, Some("partial resp"), None, false));
        manager.handle_event(generation, LiveEvent::Interrupted);

        let snapshot = manager.snapshot();
        assert_eq!(
            snapshot.transcript,
            vec![TranscriptEntry {
                role: Role::Model,
                text: "partial resp".into()
            }]
        );
        assert!(!snapshot.speaking);

        // The buffered user input flushes with the next completed turn.
        manager.handle_event(generation, content(None, None, None, true));
        let transcript = manager.snapshot().transcript;
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[1].role, Role::User);
        assert_eq!(transcript[1].text, "user says");
    }

    #[test]
    fn remote_close_runs_full_teardown() {
        let (manager, generation) = open_manager();
        assert!(!manager.handle_event(generation, LiveEvent::Closed));

        let snapshot = manager.snapshot();
        assert_eq!(snapshot.status, SessionStatus::Idle);
        assert!(snapshot.error.is_none());
    }

    #[test]
    fn remote_error_is_surfaced_once_then_torn_down() {
        let (manager, generation) = open_manager();
        assert!(!manager.handle_event(
            generation,
            LiveEvent::Errored {
                reason: "quota exceeded".into()
            }
        ));

        let snapshot = manager.snapshot();
        assert_eq!(snapshot.status, SessionStatus::Idle);
        let error = snapshot.error.expect("error recorded");
        assert!(error.contains("quota exceeded"));
    }

    #[test]
    fn malformed_audio_is_dropped_without_teardown() {
        let (manager, generation) = open_manager();
        assert!(manager.handle_event(generation, content(None, None, Some("!!bad!!"), false)));

        let snapshot = manager.snapshot();
        assert_eq!(snapshot.status, SessionStatus::Open);
        assert!(snapshot.error.is_some());
        assert!(!snapshot.speaking);
    }

    #[test]
    fn stale_generation_events_are_ignored() {
        let (manager, generation) = open_manager();
        manager.disconnect(); // bumps the generation

        assert!(!manager.handle_event(generation, content(None, Some("late"), None, true)));
        assert!(manager.snapshot().transcript.is_empty());
    }

    #[test]
    fn system_instruction_carries_language_directive() {
        let config = VoiceConfig {
            language: Language::Hi,
            ..test_config()
        };
        let instruction = config.system_instruction();
        assert!(instruction.contains("Legal Sathi"));
        assert!(instruction.contains("Hindi (Devanagari script)"));
        assert!(instruction.contains("concise and conversational"));
    }

    /// End-to-end through the dispatch path with a real (mock) sink:
    /// audio content drives `speaking`, and the armed timer clears it.
    #[tokio::test]
    async fn audio_content_drives_speaking_flag() {
        use parking_lot::Mutex as PMutex;
        use std::sync::Arc;

        #[derive(Clone, Default)]
        struct NullSink {
            stopped: Arc<PMutex<Vec<u64>>>,
            next: Arc<PMutex<u64>>,
        }
        impl OutputSink for NullSink {
            fn now(&self) -> f64 {
                0.0
            }
            fn schedule(&mut self, _chunk: PlaybackChunk, _start_at: f64) -> u64 {
                let mut next = self.next.lock();
                *next += 1;
                *next
            }
            fn stop(&mut self, handle: u64) {
                self.stopped.lock().push(handle);
            }
            fn set_volume(&mut self, _gain: f32) {}
            fn close(&mut self) {}
        }

        let (manager, generation) = open_manager();
        {
            let mut state = manager.inner.state.lock();
            state.scheduler.attach(Box::new(NullSink::default()));
        }

        // 10 ms of silence at 24 kHz.
        let frame = crate::voice::encode_frame(&[0.0f32; 240]);
        manager.handle_event(generation, content(None, None, Some(&frame.payload), false));
        assert!(manager.snapshot().speaking);

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(!manager.snapshot().speaking, "end timer clears speaking");
    }
}
