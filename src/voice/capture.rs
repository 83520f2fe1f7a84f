//! Microphone capture pipeline.
//!
//! Owns the input device for the lifetime of a voice session. The cpal
//! stream is not `Send`, so it lives on a dedicated capture thread; the
//! device callback accumulates fixed 4096-sample frames, encodes each
//! one, and hands it to the caller's `on_frame` — which must never
//! block, since it runs on the real-time audio callback.

use std::sync::mpsc;
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, StreamConfig};

use super::codec::{encode_frame, EncodedFrame};
use super::{FRAME_SAMPLES, INPUT_SAMPLE_RATE};
use crate::error::SathiError;

/// Handle to a running capture stream. Stopping is idempotent and also
/// happens on drop.
pub struct CaptureHandle {
    stop_tx: Option<mpsc::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl CaptureHandle {
    /// Disconnect the capture graph and release the microphone.
    pub fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Acquire the default microphone and start streaming encoded frames.
///
/// `on_frame` receives one [`EncodedFrame`] per 4096 captured samples.
/// Fails with the fixed permission error when no input device is
/// available or the stream cannot be built/started — the distinction is
/// logged, the user-facing message is uniform.
pub fn start<F>(on_frame: F) -> Result<CaptureHandle, SathiError>
where
    F: Fn(EncodedFrame) + Send + 'static,
{
    let (stop_tx, stop_rx) = mpsc::channel::<()>();
    let (ready_tx, ready_rx) = mpsc::channel::<Result<(), SathiError>>();

    let thread = thread::Builder::new()
        .name("audio-capture".to_string())
        .spawn(move || run_capture_thread(on_frame, stop_rx, ready_tx))
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to spawn capture thread");
            SathiError::Permission
        })?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(CaptureHandle {
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        }),
        Ok(Err(e)) => {
            let _ = thread.join();
            Err(e)
        }
        Err(_) => Err(SathiError::Permission),
    }
}

fn run_capture_thread<F>(
    on_frame: F,
    stop_rx: mpsc::Receiver<()>,
    ready_tx: mpsc::Sender<Result<(), SathiError>>,
) where
    F: Fn(EncodedFrame) + Send + 'static,
{
    let host = cpal::default_host();
    let device = match host.default_input_device() {
        Some(device) => device,
        None => {
            tracing::error!("No default input device");
            let _ = ready_tx.send(Err(SathiError::Permission));
            return;
        }
    };
    tracing::info!(
        device = %device.name().unwrap_or_else(|_| "unknown".to_string()),
        rate = INPUT_SAMPLE_RATE,
        "Opening microphone"
    );

    let config = StreamConfig {
        channels: 1,
        sample_rate: SampleRate(INPUT_SAMPLE_RATE),
        buffer_size: BufferSize::Default,
    };

    let mut frame_buffer: Vec<f32> = Vec::with_capacity(FRAME_SAMPLES);
    let stream = device.build_input_stream(
        &config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            for &sample in data {
                frame_buffer.push(sample);
                if frame_buffer.len() == FRAME_SAMPLES {
                    // Encoding is synchronous and bounded by the fixed
                    // frame size; on_frame must not block.
                    on_frame(encode_frame(&frame_buffer));
                    frame_buffer.clear();
                }
            }
        },
        |err| tracing::error!(error = %err, "Capture stream error"),
        None,
    );

    let stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build capture stream");
            let _ = ready_tx.send(Err(SathiError::Permission));
            return;
        }
    };

    if let Err(e) = stream.play() {
        tracing::error!(error = %e, "Failed to start capture stream");
        let _ = ready_tx.send(Err(SathiError::Permission));
        return;
    }

    let _ = ready_tx.send(Ok(()));

    // Hold the stream until stopped; dropping it releases the device.
    let _ = stop_rx.recv();
    drop(stream);
    tracing::debug!("Capture thread terminated");
}

#[cfg(test)]
mod tests {
    use super::*;

    // Device-dependent paths are exercised manually; here we only pin
    // down the handle contract.

    #[test]
    fn stop_is_idempotent_without_a_thread() {
        let mut handle = CaptureHandle {
            stop_tx: None,
            thread: None,
        };
        handle.stop();
        handle.stop();
    }

    #[test]
    fn stop_signals_the_capture_thread() {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let thread = thread::spawn(move || {
            let _ = stop_rx.recv();
        });
        let mut handle = CaptureHandle {
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        };
        handle.stop();
        assert!(handle.stop_tx.is_none());
        assert!(handle.thread.is_none());
    }
}
