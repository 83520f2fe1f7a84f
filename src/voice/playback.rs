//! Gapless playback scheduling with barge-in support.
//!
//! The model streams short audio chunks faster than real time. The
//! scheduler keeps a `next_start_time` cursor on the output sink's
//! clock: every chunk starts exactly at the cursor and advances it by
//! its own duration, so consecutive chunks play back-to-back with no
//! gaps or overlaps. An interruption (`stop_all`) kills every in-flight
//! chunk at once and resets the cursor.
//!
//! The audio device itself lives behind the [`OutputSink`] trait: the
//! real implementation drives a rodio sink on a dedicated thread
//! (audio streams are not `Send`), tests use a recording mock.

use std::collections::HashSet;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use super::codec::PlaybackChunk;
use crate::error::SathiError;

/// An audio output device with its own clock.
///
/// Handles returned by [`schedule`](OutputSink::schedule) identify one
/// queued chunk; chunks are always scheduled strictly sequentially.
pub trait OutputSink: Send {
    /// Seconds elapsed on the sink's clock.
    fn now(&self) -> f64;

    /// Queue a chunk to begin at `start_at` (sink clock seconds).
    fn schedule(&mut self, chunk: PlaybackChunk, start_at: f64) -> u64;

    /// Force-stop one queued chunk.
    fn stop(&mut self, handle: u64);

    /// Set the output gain (0.0..=1.0).
    fn set_volume(&mut self, gain: f32);

    /// Release the output device.
    fn close(&mut self);
}

/// Outcome of a successful enqueue, used by the caller to arm an
/// end-of-playback timer for the chunk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scheduled {
    pub handle: u64,
    /// Start time on the sink clock.
    pub start_at: f64,
    /// Chunk duration in seconds.
    pub duration: f64,
    /// Time from now until the chunk finishes playing.
    pub ends_in: Duration,
}

/// Schedules decoded chunks back-to-back on an output sink.
pub struct PlaybackScheduler {
    sink: Option<Box<dyn OutputSink>>,
    next_start_time: f64,
    in_flight: HashSet<u64>,
    speaking: bool,
}

impl Default for PlaybackScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackScheduler {
    /// A scheduler with no sink attached; `enqueue` is a no-op until
    /// [`attach`](Self::attach) is called.
    pub fn new() -> Self {
        Self {
            sink: None,
            next_start_time: 0.0,
            in_flight: HashSet::new(),
            speaking: false,
        }
    }

    /// Attach the output sink for this session.
    pub fn attach(&mut self, sink: Box<dyn OutputSink>) {
        self.sink = Some(sink);
        self.next_start_time = 0.0;
    }

    /// Schedule a chunk at the cursor and advance the cursor by its
    /// duration. Returns `None` when no sink is attached (the session
    /// has already been torn down) — the chunk is dropped.
    pub fn enqueue(&mut self, chunk: PlaybackChunk) -> Option<Scheduled> {
        let sink = self.sink.as_mut()?;

        // Never schedule in the past: an idle gap moves the cursor
        // forward to "now", a busy queue leaves it alone.
        self.next_start_time = self.next_start_time.max(sink.now());

        let start_at = self.next_start_time;
        let duration = chunk.duration_secs();
        let handle = sink.schedule(chunk, start_at);
        self.next_start_time += duration;
        let ends_in = Duration::from_secs_f64((start_at + duration - sink.now()).max(0.0));

        self.in_flight.insert(handle);
        self.speaking = true;
        Some(Scheduled {
            handle,
            start_at,
            duration,
            ends_in,
        })
    }

    /// Record natural completion of one chunk.
    pub fn chunk_ended(&mut self, handle: u64) {
        self.in_flight.remove(&handle);
        if self.in_flight.is_empty() {
            self.speaking = false;
        }
    }

    /// Barge-in: force-stop every in-flight chunk, clear the set, and
    /// reset the cursor. Idempotent; safe with no sink or empty set.
    pub fn stop_all(&mut self) {
        if let Some(sink) = self.sink.as_mut() {
            for handle in self.in_flight.drain() {
                sink.stop(handle);
            }
        } else {
            self.in_flight.clear();
        }
        self.next_start_time = 0.0;
        self.speaking = false;
    }

    /// Stop everything and release the output device.
    pub fn release(&mut self) {
        self.stop_all();
        if let Some(mut sink) = self.sink.take() {
            sink.close();
        }
    }

    pub fn set_volume(&mut self, gain: f32) {
        if let Some(sink) = self.sink.as_mut() {
            sink.set_volume(gain);
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn has_sink(&self) -> bool {
        self.sink.is_some()
    }
}

// ── Device sink (rodio) ────────────────────────────────────────────

enum SinkCmd {
    Append(Vec<f32>, u16, u32),
    Volume(f32),
    Clear,
    Shutdown,
}

/// Output sink backed by the default audio device.
///
/// The rodio output stream is not `Send`, so it is owned by a dedicated
/// playback thread; this handle only forwards commands. Chunks are
/// strictly sequential, so appending to the rodio queue realizes the
/// back-to-back start times the scheduler computes.
pub struct DeviceSink {
    cmd_tx: mpsc::Sender<SinkCmd>,
    epoch: Instant,
    next_handle: u64,
    thread: Option<thread::JoinHandle<()>>,
}

impl DeviceSink {
    /// Open the default output device.
    pub fn open() -> Result<Self, SathiError> {
        let (cmd_tx, cmd_rx) = mpsc::channel::<SinkCmd>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), String>>();

        let thread = thread::Builder::new()
            .name("audio-playback".to_string())
            .spawn(move || playback_thread(cmd_rx, ready_tx))
            .map_err(|e| SathiError::Playback(format!("failed to spawn playback thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                cmd_tx,
                epoch: Instant::now(),
                next_handle: 0,
                thread: Some(thread),
            }),
            Ok(Err(e)) => Err(SathiError::Playback(e)),
            Err(_) => Err(SathiError::Playback("playback thread died during init".into())),
        }
    }
}

fn playback_thread(cmd_rx: mpsc::Receiver<SinkCmd>, ready_tx: mpsc::Sender<Result<(), String>>) {
    let (_stream, stream_handle) = match rodio::OutputStream::try_default() {
        Ok(pair) => pair,
        Err(e) => {
            let _ = ready_tx.send(Err(format!("no output device: {e}")));
            return;
        }
    };
    let sink = match rodio::Sink::try_new(&stream_handle) {
        Ok(sink) => sink,
        Err(e) => {
            let _ = ready_tx.send(Err(format!("failed to create sink: {e}")));
            return;
        }
    };
    let _ = ready_tx.send(Ok(()));

    while let Ok(cmd) = cmd_rx.recv() {
        match cmd {
            SinkCmd::Append(samples, channels, sample_rate) => {
                sink.append(rodio::buffer::SamplesBuffer::new(
                    channels,
                    sample_rate,
                    samples,
                ));
            }
            SinkCmd::Volume(gain) => sink.set_volume(gain),
            SinkCmd::Clear => sink.stop(),
            SinkCmd::Shutdown => break,
        }
    }
    tracing::debug!("Playback thread terminated");
}

impl OutputSink for DeviceSink {
    fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    fn schedule(&mut self, chunk: PlaybackChunk, _start_at: f64) -> u64 {
        let channels = chunk.channel_data.len().max(1) as u16;
        let frames = chunk.frame_count();
        let mut samples = Vec::with_capacity(frames * channels as usize);
        for i in 0..frames {
            for ch in &chunk.channel_data {
                samples.push(ch[i]);
            }
        }
        self.next_handle += 1;
        let _ = self
            .cmd_tx
            .send(SinkCmd::Append(samples, channels, chunk.sample_rate));
        self.next_handle
    }

    fn stop(&mut self, _handle: u64) {
        // The queue is strictly sequential, so stopping any chunk means
        // stopping the whole tail; clearing the queue is idempotent.
        let _ = self.cmd_tx.send(SinkCmd::Clear);
    }

    fn set_volume(&mut self, gain: f32) {
        let _ = self.cmd_tx.send(SinkCmd::Volume(gain));
    }

    fn close(&mut self) {
        let _ = self.cmd_tx.send(SinkCmd::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for DeviceSink {
    fn drop(&mut self) {
        self.close();
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct MockState {
        now: f64,
        scheduled: Vec<(u64, f64, f64)>, // handle, start_at, duration
        stopped: Vec<u64>,
        volume: Option<f32>,
        closed: bool,
    }

    #[derive(Clone, Default)]
    struct MockSink {
        state: Arc<Mutex<MockState>>,
    }

    impl OutputSink for MockSink {
        fn now(&self) -> f64 {
            self.state.lock().now
        }
        fn schedule(&mut self, chunk: PlaybackChunk, start_at: f64) -> u64 {
            let mut state = self.state.lock();
            let handle = state.scheduled.len() as u64 + 1;
            state
                .scheduled
                .push((handle, start_at, chunk.duration_secs()));
            handle
        }
        fn stop(&mut self, handle: u64) {
            self.state.lock().stopped.push(handle);
        }
        fn set_volume(&mut self, gain: f32) {
            self.state.lock().volume = Some(gain);
        }
        fn close(&mut self) {
            self.state.lock().closed = true;
        }
    }

    fn chunk(duration_secs: f64) -> PlaybackChunk {
        let frames = (duration_secs * 24_000.0).round() as usize;
        PlaybackChunk {
            channel_data: vec![vec![0.0; frames]],
            sample_rate: 24_000,
        }
    }

    fn scheduler_with_mock() -> (PlaybackScheduler, MockSink) {
        let sink = MockSink::default();
        let mut scheduler = PlaybackScheduler::new();
        scheduler.attach(Box::new(sink.clone()));
        (scheduler, sink)
    }

    #[test]
    fn enqueue_without_sink_is_a_noop() {
        let mut scheduler = PlaybackScheduler::new();
        assert!(scheduler.enqueue(chunk(0.5)).is_none());
        assert!(!scheduler.is_speaking());
        assert_eq!(scheduler.in_flight(), 0);
    }

    #[test]
    fn chunks_schedule_back_to_back() {
        let (mut scheduler, sink) = scheduler_with_mock();
        let durations = [0.25, 0.5, 0.125, 1.0];
        for d in durations {
            scheduler.enqueue(chunk(d)).unwrap();
        }

        let state = sink.state.lock();
        let mut expected_start = 0.0;
        for ((_, start_at, duration), d) in state.scheduled.iter().zip(durations) {
            assert!((start_at - expected_start).abs() < 1e-9, "gap or overlap");
            assert!((duration - d).abs() < 1e-9);
            expected_start += d;
        }
        assert_eq!(scheduler.in_flight(), durations.len());
        assert!(scheduler.is_speaking());
    }

    #[test]
    fn cursor_never_lags_the_sink_clock() {
        let (mut scheduler, sink) = scheduler_with_mock();
        scheduler.enqueue(chunk(0.5)).unwrap();
        // Playback drained and the clock moved past the queue end.
        sink.state.lock().now = 3.0;

        let scheduled = scheduler.enqueue(chunk(0.5)).unwrap();
        assert!((scheduled.start_at - 3.0).abs() < 1e-9);
        assert!((scheduler.next_start_time() - 3.5).abs() < 1e-9);
    }

    #[test]
    fn two_half_second_chunks_mid_playback() {
        let (mut scheduler, sink) = scheduler_with_mock();
        let first = scheduler.enqueue(chunk(0.5)).unwrap();
        let second = scheduler.enqueue(chunk(0.5)).unwrap();

        assert_eq!(scheduler.in_flight(), 2);
        assert!(scheduler.is_speaking());
        assert!((second.start_at - (first.start_at + 0.5)).abs() < 1e-9);
        assert_eq!(sink.state.lock().scheduled.len(), 2);
    }

    #[test]
    fn natural_completion_clears_speaking() {
        let (mut scheduler, _sink) = scheduler_with_mock();
        let a = scheduler.enqueue(chunk(0.5)).unwrap();
        let b = scheduler.enqueue(chunk(0.5)).unwrap();

        scheduler.chunk_ended(a.handle);
        assert!(scheduler.is_speaking(), "one chunk still playing");
        scheduler.chunk_ended(b.handle);
        assert!(!scheduler.is_speaking());
        assert_eq!(scheduler.in_flight(), 0);
    }

    #[test]
    fn stop_all_kills_everything_and_resets_cursor() {
        let (mut scheduler, sink) = scheduler_with_mock();
        let handles: Vec<u64> = (0..3)
            .map(|_| scheduler.enqueue(chunk(0.5)).unwrap().handle)
            .collect();

        scheduler.stop_all();
        assert_eq!(scheduler.in_flight(), 0);
        assert!(!scheduler.is_speaking());
        assert_eq!(scheduler.next_start_time(), 0.0);
        {
            let state = sink.state.lock();
            let mut stopped = state.stopped.clone();
            stopped.sort_unstable();
            assert_eq!(stopped, handles);
        }

        // A later enqueue starts at max(0, now).
        sink.state.lock().now = 1.25;
        let scheduled = scheduler.enqueue(chunk(0.5)).unwrap();
        assert!((scheduled.start_at - 1.25).abs() < 1e-9);
    }

    #[test]
    fn stop_all_is_idempotent() {
        let (mut scheduler, _sink) = scheduler_with_mock();
        scheduler.stop_all();
        scheduler.stop_all();
        assert_eq!(scheduler.in_flight(), 0);

        let mut sinkless = PlaybackScheduler::new();
        sinkless.stop_all(); // no sink, no panic
    }

    #[test]
    fn release_closes_the_sink() {
        let (mut scheduler, sink) = scheduler_with_mock();
        scheduler.enqueue(chunk(0.5)).unwrap();
        scheduler.release();
        assert!(sink.state.lock().closed);
        assert!(!scheduler.has_sink());
        // Post-release enqueues are dropped.
        assert!(scheduler.enqueue(chunk(0.5)).is_none());
    }

    #[test]
    fn ends_in_accounts_for_queue_depth() {
        let (mut scheduler, _sink) = scheduler_with_mock();
        let first = scheduler.enqueue(chunk(0.5)).unwrap();
        let second = scheduler.enqueue(chunk(0.25)).unwrap();
        assert!((first.ends_in.as_secs_f64() - 0.5).abs() < 1e-9);
        assert!((second.ends_in.as_secs_f64() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn volume_forwarded_to_sink() {
        let (mut scheduler, sink) = scheduler_with_mock();
        scheduler.set_volume(0.4);
        assert_eq!(sink.state.lock().volume, Some(0.4));
    }
}
