//! PCM16 transport codec.
//!
//! The Live API exchanges raw audio as base64-encoded little-endian
//! 16-bit PCM inside JSON frames. Capture produces `f32` samples in
//! [-1, 1]; playback consumes them the same way. These conversions are
//! pure and stateless.

use base64::Engine;

use crate::error::SathiError;

/// MIME type for microphone input frames (16 kHz mono PCM).
pub const INPUT_AUDIO_MIME: &str = "audio/pcm;rate=16000";

/// A transport-ready audio frame: base64 PCM16LE plus its MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    /// Base64 of the little-endian 16-bit samples.
    pub payload: String,
    pub mime_type: &'static str,
}

/// Decoded model audio, de-interleaved per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackChunk {
    /// One sample vector per channel; all channels have equal length.
    pub channel_data: Vec<Vec<f32>>,
    pub sample_rate: u32,
}

impl PlaybackChunk {
    /// Number of sample frames (per-channel samples).
    pub fn frame_count(&self) -> usize {
        self.channel_data.first().map_or(0, Vec::len)
    }

    /// Playback duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.frame_count() as f64 / f64::from(self.sample_rate)
    }
}

/// Encode a block of mono `f32` samples into a transport frame.
///
/// Samples are clamped to [-1, 1] (NaN becomes silence) and quantized
/// with asymmetric scale factors — 32767 for positives, 32768 for
/// negatives — so the full signed 16-bit range is used without
/// wraparound at -1.0.
pub fn encode_frame(samples: &[f32]) -> EncodedFrame {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let sample = if sample.is_nan() {
            0.0
        } else {
            sample.clamp(-1.0, 1.0)
        };
        let quantized = if sample >= 0.0 {
            (sample * 32767.0) as i16
        } else {
            (sample * 32768.0) as i16
        };
        bytes.extend_from_slice(&quantized.to_le_bytes());
    }
    EncodedFrame {
        payload: base64::engine::general_purpose::STANDARD.encode(&bytes),
        mime_type: INPUT_AUDIO_MIME,
    }
}

/// Decode a base64 PCM16LE payload into a playback chunk.
pub fn decode_frame(
    payload: &str,
    sample_rate: u32,
    channels: u16,
) -> Result<PlaybackChunk, SathiError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| SathiError::Decode(format!("invalid base64 audio payload: {e}")))?;
    decode_pcm(&bytes, sample_rate, channels)
}

/// Decode raw PCM16LE bytes into a playback chunk, de-interleaving by
/// channel. Fails if the byte length is not a whole number of sample
/// frames (`2 * channels`).
pub fn decode_pcm(
    bytes: &[u8],
    sample_rate: u32,
    channels: u16,
) -> Result<PlaybackChunk, SathiError> {
    if channels == 0 {
        return Err(SathiError::Decode("channel count must be non-zero".into()));
    }
    let stride = 2 * channels as usize;
    if bytes.len() % stride != 0 {
        return Err(SathiError::Decode(format!(
            "payload length {} is not a multiple of {} (2 bytes x {} channels)",
            bytes.len(),
            stride,
            channels
        )));
    }

    let frames = bytes.len() / stride;
    let mut channel_data = vec![Vec::with_capacity(frames); channels as usize];
    for frame in bytes.chunks_exact(stride) {
        for (ch, sample) in frame.chunks_exact(2).enumerate() {
            let value = i16::from_le_bytes([sample[0], sample[1]]);
            channel_data[ch].push(f32::from(value) / 32768.0);
        }
    }

    Ok(PlaybackChunk {
        channel_data,
        sample_rate,
    })
}
