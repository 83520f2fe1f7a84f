//! Transcript accumulation for a live voice session.
//!
//! The Live API streams transcription deltas for both directions while
//! a turn is in progress. Deltas are buffered here and only become
//! immutable [`TranscriptEntry`] values at well-defined points: turn
//! completion flushes both sides, an interruption flushes the model's
//! partial reply only.

use serde::{Deserialize, Serialize};

/// Who said it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "model")]
    Model,
}

/// One completed line of the conversation transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub text: String,
}

/// Pending per-turn transcription buffers.
#[derive(Debug, Default)]
pub struct TurnBuffers {
    pending_input: String,
    pending_output: String,
}

impl TurnBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a user-speech transcription delta.
    pub fn push_input(&mut self, delta: &str) {
        self.pending_input.push_str(delta);
    }

    /// Append a model-speech transcription delta.
    pub fn push_output(&mut self, delta: &str) {
        self.pending_output.push_str(delta);
    }

    /// Flush both buffers at turn completion: the user's utterance first,
    /// then the model's reply. Empty buffers produce no entries.
    pub fn flush_turn(&mut self) -> Vec<TranscriptEntry> {
        let mut entries = Vec::new();
        if !self.pending_input.is_empty() {
            entries.push(TranscriptEntry {
                role: Role::User,
                text: std::mem::take(&mut self.pending_input),
            });
        }
        if !self.pending_output.is_empty() {
            entries.push(TranscriptEntry {
                role: Role::Model,
                text: std::mem::take(&mut self.pending_output),
            });
        }
        entries
    }

    /// Flush the model's partial reply when playback is interrupted.
    ///
    /// The user's input buffer is left untouched: the user is still
    /// speaking, so their transcript is not assumed complete and will
    /// flush with the next completed turn.
    pub fn flush_interrupted(&mut self) -> Option<TranscriptEntry> {
        if self.pending_output.is_empty() {
            return None;
        }
        Some(TranscriptEntry {
            role: Role::Model,
            text: std::mem::take(&mut self.pending_output),
        })
    }

    /// Discard both buffers (session teardown).
    pub fn clear(&mut self) {
        self.pending_input.clear();
        self.pending_output.clear();
    }

    pub fn pending_input(&self) -> &str {
        &self.pending_input
    }

    pub fn pending_output(&self) -> &str {
        &self.pending_output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_complete_flushes_user_then_model() {
        let mut buffers = TurnBuffers::new();
        buffers.push_input("hel");
        buffers.push_input("lo");
        buffers.push_output("hi");

        let entries = buffers.flush_turn();
        assert_eq!(
            entries,
            vec![
                TranscriptEntry {
                    role: Role::User,
                    text: "hello".into()
                },
                TranscriptEntry {
                    role: Role::Model,
                    text: "hi".into()
                },
            ]
        );
        assert!(buffers.pending_input().is_empty());
        assert!(buffers.pending_output().is_empty());
    }

    #[test]
    fn empty_buffers_flush_to_nothing() {
        let mut buffers = TurnBuffers::new();
        assert!(buffers.flush_turn().is_empty());
        assert!(buffers.flush_interrupted().is_none());
    }

    #[test]
    fn one_sided_turn_produces_one_entry() {
        let mut buffers = TurnBuffers::new();
        buffers.push_output("Hello");
        let entries = buffers.flush_turn();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].role, Role::Model);
    }

    #[test]
    fn interruption_flushes_model_only() {
        let mut buffers = TurnBuffers::new();
        buffers.push_input("still talk");
        buffers.push_output("partial resp");

        let entry = buffers.flush_interrupted().unwrap();
        assert_eq!(entry.role, Role::Model);
        assert_eq!(entry.text, "partial resp");

        // Input stays buffered for the next completed turn.
        assert_eq!(buffers.pending_input(), "still talk");
        assert!(buffers.pending_output().is_empty());
    }

    #[test]
    fn clear_discards_everything() {
        let mut buffers = TurnBuffers::new();
        buffers.push_input("a");
        buffers.push_output("b");
        buffers.clear();
        assert!(buffers.flush_turn().is_empty());
    }
}
