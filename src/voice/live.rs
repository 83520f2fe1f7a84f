//! Gemini Live WebSocket session for voice conversations.
//!
//! Implements the bidirectional streaming protocol (BidiGenerateContent):
//!
//! 1. **Connect** — open the WebSocket to the Live endpoint
//! 2. **Setup** — send the session configuration (model, voice,
//!    system instruction, transcription echo for both directions)
//! 3. **Stream** — send microphone frames as `realtimeInput`, receive
//!    audio + transcription as `serverContent`
//! 4. **Close** — graceful shutdown, or teardown on error
//!
//! Raw server messages are normalized into [`LiveEvent`] by a pure
//! function, so the protocol handling is testable without a socket.
//!
//! Note: the server sends all messages as WebSocket Binary frames,
//! including JSON control messages such as `setupComplete`. JSON in
//! Binary frames (content starting with `{`) is parsed before falling
//! back to skipping the frame.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use super::codec::EncodedFrame;
use crate::error::SathiError;

/// Live API WebSocket endpoint.
const LIVE_WS_URL: &str =
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// How long to wait for the server's open acknowledgment.
const SETUP_TIMEOUT: Duration = Duration::from_secs(15);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

// ── Session configuration ─────────────────────────────────────────

/// Configuration for one live session, fixed at connect time.
#[derive(Debug, Clone)]
pub struct LiveConfig {
    pub api_key: String,
    /// Native-audio dialog model id.
    pub model: String,
    /// Full system instruction, language directive included.
    pub system_instruction: String,
    /// Prebuilt voice profile name.
    pub voice_name: String,
}

// ── Setup message (JSON sent as first frame) ──────────────────────

#[derive(Debug, Serialize)]
pub struct SetupMessage {
    pub setup: SetupPayload,
}

#[derive(Debug, Serialize)]
pub struct SetupPayload {
    pub model: String,
    #[serde(rename = "generationConfig")]
    pub generation_config: GenerationConfig,
    #[serde(rename = "systemInstruction")]
    pub system_instruction: SystemInstruction,
    /// Ask the server to echo transcriptions of the user's speech.
    #[serde(rename = "inputAudioTranscription")]
    pub input_audio_transcription: TranscriptionConfig,
    /// Ask the server to echo transcriptions of the model's speech.
    #[serde(rename = "outputAudioTranscription")]
    pub output_audio_transcription: TranscriptionConfig,
}

#[derive(Debug, Serialize)]
pub struct GenerationConfig {
    #[serde(rename = "responseModalities")]
    pub response_modalities: Vec<String>,
    #[serde(rename = "speechConfig")]
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Serialize)]
pub struct SpeechConfig {
    #[serde(rename = "voiceConfig")]
    pub voice_config: VoiceProfile,
}

#[derive(Debug, Serialize)]
pub struct VoiceProfile {
    #[serde(rename = "prebuiltVoiceConfig")]
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize)]
pub struct PrebuiltVoiceConfig {
    #[serde(rename = "voiceName")]
    pub voice_name: String,
}

#[derive(Debug, Serialize)]
pub struct SystemInstruction {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Serialize)]
pub struct TextPart {
    pub text: String,
}

/// Empty marker object — presence alone enables the transcription echo.
#[derive(Debug, Serialize)]
pub struct TranscriptionConfig {}

/// Build the setup frame for a voice session.
pub fn build_setup_message(config: &LiveConfig) -> SetupMessage {
    SetupMessage {
        setup: SetupPayload {
            model: format!("models/{}", config.model),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceProfile {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: config.voice_name.clone(),
                        },
                    },
                },
            },
            system_instruction: SystemInstruction {
                parts: vec![TextPart {
                    text: config.system_instruction.clone(),
                }],
            },
            input_audio_transcription: TranscriptionConfig {},
            output_audio_transcription: TranscriptionConfig {},
        },
    }
}

// ── Audio input message ───────────────────────────────────────────

/// Wire format: `{"realtimeInput": {"mediaChunks": [{"mimeType": ..., "data": ...}]}}`
#[derive(Debug, Serialize)]
pub struct RealtimeInputMessage {
    #[serde(rename = "realtimeInput")]
    pub realtime_input: RealtimeInput,
}

#[derive(Debug, Serialize)]
pub struct RealtimeInput {
    #[serde(rename = "mediaChunks")]
    pub media_chunks: Vec<MediaChunk>,
}

#[derive(Debug, Serialize)]
pub struct MediaChunk {
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    /// Base64-encoded PCM16LE audio.
    pub data: String,
}

/// Wrap an encoded microphone frame for the wire.
pub fn build_audio_message(frame: &EncodedFrame) -> RealtimeInputMessage {
    RealtimeInputMessage {
        realtime_input: RealtimeInput {
            media_chunks: vec![MediaChunk {
                mime_type: frame.mime_type.to_string(),
                data: frame.payload.clone(),
            }],
        },
    }
}

// ── Domain events ─────────────────────────────────────────────────

/// Session lifecycle state.
///
/// `Closed` and `Errored` are terminal; retrying requires a new session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionStatus {
    Idle,
    Connecting,
    Open,
    Closed,
    Errored,
}

/// Normalized server event.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    /// Setup acknowledged — safe to start streaming audio.
    Opened,
    /// Incremental turn content (transcription deltas and/or audio).
    Content(ContentDelta),
    /// The user barged in while the model was speaking.
    Interrupted,
    /// The server closed the session.
    Closed,
    /// Transport or server error.
    Errored { reason: String },
}

/// One slice of streamed turn content.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContentDelta {
    /// Transcription delta of the user's speech.
    pub input_text: Option<String>,
    /// Transcription delta of the model's speech.
    pub output_text: Option<String>,
    /// Base64 PCM16LE model audio (24 kHz mono).
    pub audio: Option<String>,
    /// The model finished its response turn.
    pub turn_complete: bool,
}

/// Parse one raw server message into normalized events.
///
/// A single message can carry several events (e.g. audio parts plus an
/// interruption flag); relative order within the message is preserved:
/// content first, then `Interrupted`.
pub fn parse_server_message(json_text: &str) -> Vec<LiveEvent> {
    let value: serde_json::Value = match serde_json::from_str(json_text) {
        Ok(v) => v,
        Err(e) => {
            return vec![LiveEvent::Errored {
                reason: format!("unparseable server message: {e}"),
            }]
        }
    };

    let mut events = Vec::new();

    if value.get("setupComplete").is_some() {
        events.push(LiveEvent::Opened);
    }

    if let Some(content) = value.get("serverContent") {
        let mut input_text = content
            .pointer("/inputTranscription/text")
            .and_then(|v| v.as_str())
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        let mut output_text = content
            .pointer("/outputTranscription/text")
            .and_then(|v| v.as_str())
            .filter(|t| !t.is_empty())
            .map(str::to_string);

        let mut audio_payloads = Vec::new();
        if let Some(parts) = content.pointer("/modelTurn/parts").and_then(|v| v.as_array()) {
            for part in parts {
                if let Some(data) = part.pointer("/inlineData/data").and_then(|v| v.as_str()) {
                    audio_payloads.push(data.to_string());
                }
                // Some models put reply text directly in the turn parts.
                if let Some(text) = part.get("text").and_then(|v| v.as_str()) {
                    if !text.is_empty() {
                        match &mut output_text {
                            Some(existing) => existing.push_str(text),
                            None => output_text = Some(text.to_string()),
                        }
                    }
                }
            }
        }

        let turn_complete = content.get("turnComplete").and_then(|v| v.as_bool()) == Some(true);

        if audio_payloads.is_empty() {
            if input_text.is_some() || output_text.is_some() || turn_complete {
                events.push(LiveEvent::Content(ContentDelta {
                    input_text,
                    output_text,
                    audio: None,
                    turn_complete,
                }));
            }
        } else {
            // Text rides on the first audio part, turn completion on the
            // last, so a consumer handling events in order flushes after
            // every audio chunk of the turn is scheduled.
            let last = audio_payloads.len() - 1;
            for (i, payload) in audio_payloads.into_iter().enumerate() {
                events.push(LiveEvent::Content(ContentDelta {
                    input_text: if i == 0 { input_text.take() } else { None },
                    output_text: if i == 0 { output_text.take() } else { None },
                    audio: Some(payload),
                    turn_complete: turn_complete && i == last,
                }));
            }
        }

        if content.get("interrupted").and_then(|v| v.as_bool()) == Some(true) {
            events.push(LiveEvent::Interrupted);
        }
    }

    if let Some(err) = value.get("error") {
        let reason = err
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown server error");
        events.push(LiveEvent::Errored {
            reason: reason.to_string(),
        });
    }

    events
}

// ── Live session (WebSocket connection manager) ───────────────────

enum Outbound {
    Frame(EncodedFrame),
    Close,
}

/// Handle to one live streaming session.
///
/// Created by [`LiveSession::connect`], which only returns once the
/// server acknowledged the setup frame — so a handle is always `Open`
/// at birth. Events arrive on the receiver returned alongside it.
pub struct LiveSession {
    out_tx: mpsc::UnboundedSender<Outbound>,
    status: Arc<Mutex<SessionStatus>>,
    session_id: String,
}

impl LiveSession {
    /// Connect, send the setup frame, and wait for the open
    /// acknowledgment before spawning the stream loops.
    pub async fn connect(
        config: LiveConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<LiveEvent>), SathiError> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let url = format!("{LIVE_WS_URL}?key={}", config.api_key);

        tracing::info!(
            session_id = %session_id,
            model = %config.model,
            voice = %config.voice_name,
            "Connecting live session"
        );

        let (mut ws_stream, _response) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| SathiError::Connection(format!("failed to connect: {e}")))?;

        let setup = build_setup_message(&config);
        let setup_json = serde_json::to_string(&setup)
            .map_err(|e| SathiError::Connection(format!("failed to encode setup: {e}")))?;
        ws_stream
            .send(WsMessage::text(setup_json))
            .await
            .map_err(|e| SathiError::Connection(format!("failed to send setup: {e}")))?;

        match tokio::time::timeout(SETUP_TIMEOUT, wait_for_open(&mut ws_stream, &session_id))
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(SathiError::Connection(
                    "timed out waiting for setup acknowledgment".into(),
                ))
            }
        }

        let (ws_sender, ws_receiver) = ws_stream.split();
        let status = Arc::new(Mutex::new(SessionStatus::Open));
        let (out_tx, out_rx) = mpsc::unbounded_channel::<Outbound>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<LiveEvent>();

        let sid = session_id.clone();
        tokio::spawn(async move {
            outbound_loop(out_rx, ws_sender, sid).await;
        });

        let sid = session_id.clone();
        let status_in = Arc::clone(&status);
        tokio::spawn(async move {
            inbound_loop(ws_receiver, event_tx, status_in, sid).await;
        });

        Ok((
            Self {
                out_tx,
                status,
                session_id,
            },
            event_rx,
        ))
    }

    /// Send one encoded microphone frame.
    ///
    /// Real-time audio is worthless once stale: frames produced while
    /// the session is not `Open` are dropped synchronously, never
    /// buffered. Safe to call from the capture callback — it does not
    /// block or await.
    pub fn send_frame(&self, frame: EncodedFrame) {
        if *self.status.lock() != SessionStatus::Open {
            tracing::trace!(session_id = %self.session_id, "Dropping frame: session not open");
            return;
        }
        let _ = self.out_tx.send(Outbound::Frame(frame));
    }

    /// Close the session gracefully. Idempotent.
    pub fn close(&self) {
        {
            let mut status = self.status.lock();
            if matches!(*status, SessionStatus::Open | SessionStatus::Connecting) {
                *status = SessionStatus::Closed;
            }
        }
        let _ = self.out_tx.send(Outbound::Close);
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.lock()
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    #[cfg(test)]
    fn stub(status: SessionStatus) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        (
            Self {
                out_tx,
                status: Arc::new(Mutex::new(status)),
                session_id: "stub".to_string(),
            },
            out_rx,
        )
    }
}

/// Extract the JSON text of a frame, if any. The server wraps JSON in
/// Binary frames, so both kinds are accepted.
fn message_text(msg: &WsMessage) -> Option<&str> {
    match msg {
        WsMessage::Text(text) => Some(text.as_str()),
        WsMessage::Binary(data) if data.first() == Some(&b'{') => std::str::from_utf8(data).ok(),
        _ => None,
    }
}

/// Drive the handshake until the open acknowledgment arrives.
async fn wait_for_open(ws_stream: &mut WsStream, session_id: &str) -> Result<(), SathiError> {
    while let Some(msg_result) = ws_stream.next().await {
        match msg_result {
            Ok(msg) => {
                if let Some(text) = message_text(&msg) {
                    for event in parse_server_message(text) {
                        match event {
                            LiveEvent::Opened => {
                                tracing::info!(session_id = %session_id, "Live session open");
                                return Ok(());
                            }
                            LiveEvent::Errored { reason } => {
                                return Err(SathiError::Connection(reason));
                            }
                            other => {
                                tracing::debug!(
                                    session_id = %session_id,
                                    event = ?other,
                                    "Event before open acknowledgment"
                                );
                            }
                        }
                    }
                } else if let WsMessage::Close(frame) = msg {
                    return Err(SathiError::Connection(format!(
                        "closed before setup acknowledgment: {frame:?}"
                    )));
                }
            }
            Err(e) => {
                return Err(SathiError::Connection(format!(
                    "transport error during setup: {e}"
                )));
            }
        }
    }
    Err(SathiError::Connection(
        "stream ended before setup acknowledgment".into(),
    ))
}

/// Outbound loop: wrap frames and write them to the socket.
async fn outbound_loop(
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    mut ws_sender: futures_util::stream::SplitSink<WsStream, WsMessage>,
    session_id: String,
) {
    let mut frames_sent: u64 = 0;

    while let Some(cmd) = rx.recv().await {
        match cmd {
            Outbound::Frame(frame) => {
                let msg = build_audio_message(&frame);
                match serde_json::to_string(&msg) {
                    Ok(json) => {
                        frames_sent += 1;
                        if frames_sent == 1 || frames_sent % 50 == 0 {
                            tracing::debug!(
                                session_id = %session_id,
                                frames = frames_sent,
                                "Streaming microphone audio"
                            );
                        }
                        if ws_sender.send(WsMessage::text(json)).await.is_err() {
                            tracing::warn!(
                                session_id = %session_id,
                                "WebSocket send failed, closing outbound loop"
                            );
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!(
                            session_id = %session_id,
                            error = %e,
                            "Failed to serialize audio message"
                        );
                    }
                }
            }
            Outbound::Close => {
                let _ = ws_sender.send(WsMessage::Close(None)).await;
                break;
            }
        }
    }

    tracing::debug!(session_id = %session_id, "Outbound loop terminated");
}

/// Inbound loop: normalize server frames and forward domain events.
async fn inbound_loop(
    mut ws_receiver: futures_util::stream::SplitStream<WsStream>,
    event_tx: mpsc::UnboundedSender<LiveEvent>,
    status: Arc<Mutex<SessionStatus>>,
    session_id: String,
) {
    let mut terminal_event_sent = false;

    while let Some(msg_result) = ws_receiver.next().await {
        match msg_result {
            Ok(msg) => {
                if let Some(text) = message_text(&msg) {
                    for event in parse_server_message(text) {
                        match &event {
                            LiveEvent::Errored { reason } => {
                                tracing::error!(
                                    session_id = %session_id,
                                    reason = %reason,
                                    "Live session server error"
                                );
                                *status.lock() = SessionStatus::Errored;
                                terminal_event_sent = true;
                            }
                            LiveEvent::Interrupted => {
                                tracing::info!(session_id = %session_id, "Model interrupted");
                            }
                            _ => {}
                        }
                        if event_tx.send(event).is_err() {
                            tracing::debug!(
                                session_id = %session_id,
                                "Event receiver dropped, closing inbound loop"
                            );
                            return;
                        }
                    }
                } else {
                    match msg {
                        WsMessage::Close(frame) => {
                            tracing::info!(
                                session_id = %session_id,
                                close_frame = ?frame,
                                "Live session closed by server"
                            );
                            let mut status = status.lock();
                            if *status != SessionStatus::Errored {
                                *status = SessionStatus::Closed;
                            }
                            drop(status);
                            let _ = event_tx.send(LiveEvent::Closed);
                            terminal_event_sent = true;
                            break;
                        }
                        WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => {}
                        WsMessage::Binary(data) => {
                            // Non-JSON binary is unexpected on this API;
                            // skip rather than misread it as raw PCM.
                            tracing::warn!(
                                session_id = %session_id,
                                len = data.len(),
                                "Unexpected non-JSON binary frame, skipping"
                            );
                        }
                        WsMessage::Text(_) => {}
                    }
                }
            }
            Err(e) => {
                tracing::error!(session_id = %session_id, error = %e, "WebSocket error");
                *status.lock() = SessionStatus::Errored;
                let _ = event_tx.send(LiveEvent::Errored {
                    reason: format!("transport error: {e}"),
                });
                terminal_event_sent = true;
                break;
            }
        }
    }

    // Stream ended without a close frame or error: still a close.
    if !terminal_event_sent {
        let mut guard = status.lock();
        if *guard == SessionStatus::Open {
            *guard = SessionStatus::Closed;
        }
        drop(guard);
        let _ = event_tx.send(LiveEvent::Closed);
    }

    tracing::debug!(session_id = %session_id, "Inbound loop terminated");
}

// ── Tests ──────────────────────────────────────────────────────────
