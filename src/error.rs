//! Error types for the Legal Sathi client.

use thiserror::Error;

/// Main error type shared across the client.
#[derive(Error, Debug)]
pub enum SathiError {
    /// Microphone unavailable or access denied. The underlying device
    /// error is logged where it happens; the user-facing message is fixed.
    #[error("Microphone access failed")]
    Permission,

    /// Streaming handshake or transport failure. Carries the remote
    /// reason where one was provided.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Malformed audio payload. The offending chunk is dropped and the
    /// session continues.
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// Speaker/output device failure.
    #[error("Audio output error: {0}")]
    Playback(String),

    /// Missing or invalid client configuration (e.g. no API key).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Registration/login/session failures, already human-readable.
    #[error("{0}")]
    Auth(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
