//! Legal Sathi — an AI legal assistant client.
//!
//! Four concerns, one crate:
//! - [`voice`] — real-time voice conversations over the Gemini Live
//!   API: microphone capture, PCM framing, gapless playback with
//!   barge-in, and a synchronized transcript.
//! - [`assist`] — single-shot legal-advice chat and document analysis.
//! - [`auth`] — local identity store (register/login/logout).
//! - [`config`] / [`language`] — client configuration and the active
//!   response language.

pub mod assist;
pub mod auth;
pub mod config;
pub mod error;
pub mod language;
pub mod voice;

pub use config::Config;
pub use error::SathiError;
pub use language::Language;
