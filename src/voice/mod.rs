//! Real-time voice pipeline for Legal Sathi.
//!
//! Provides a live voice conversation with the legal assistant over the
//! Gemini Live API (BidiGenerateContent): microphone capture, PCM16
//! framing, bidirectional streaming, gapless playback of the model's
//! spoken replies, and barge-in interruption.
//!
//! ## Architecture
//!
//! ```text
//! mic ─▸ CapturePipeline ─▸ encode_frame ─▸ LiveSession ─▸ Gemini Live
//!                                               │
//!              PlaybackScheduler ◂─ audio ──────┤
//!              TurnBuffers ◂────── transcripts ─┘
//! ```
//!
//! [`VoiceSessionManager`] composes the pieces behind a single
//! connect/disconnect surface and an observable snapshot of status,
//! speaking flag, error, and transcript.

pub mod capture;
pub mod codec;
pub mod live;
pub mod manager;
pub mod playback;
pub mod transcript;

/// Microphone capture sample rate (Hz).
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Model audio output sample rate (Hz).
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Samples per capture frame (256 ms of mono audio at 16 kHz).
pub const FRAME_SAMPLES: usize = 4096;

pub use capture::CaptureHandle;
pub use codec::{decode_frame, encode_frame, EncodedFrame, PlaybackChunk};
pub use live::{
    parse_server_message, ContentDelta, LiveConfig, LiveEvent, LiveSession, SessionStatus,
};
pub use manager::{VoiceConfig, VoiceSessionManager, VoiceSnapshot};
pub use playback::{DeviceSink, OutputSink, PlaybackScheduler};
pub use transcript::{Role, TranscriptEntry, TurnBuffers};
