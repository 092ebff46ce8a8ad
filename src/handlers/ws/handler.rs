//! The duplex voice session.
//!
//! One task per connection consumes inbound messages sequentially: PCM
//! frames run through the session's voice activity detector synchronously,
//! and a detected utterance (or an explicit text/audio request) launches a
//! turn on its own task. Turn events flow back through a channel and are
//! forwarded here in order, so a session interleaves exactly one turn's
//! output with control messages at any time. Stop requests go through the
//! shared registry and take effect at the turn's next cancellation
//! checkpoint.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::core::audio::{AudioFrame, SpeechSegment};
use crate::core::orchestrator::{TurnEvent, TurnInput, TurnOptions};
use crate::core::registry::TurnId;
use crate::core::vad::VadVerdict;
use crate::state::AppState;

use super::messages::{IncomingMessage, OutgoingMessage, TurnErrorBody};
use super::session::SessionState;

/// Outbound channel depth; sized for audio bursts.
const CHANNEL_BUFFER_SIZE: usize = 256;

/// The turn currently streaming events into this session.
struct ActiveTurn {
    id: TurnId,
    events: mpsc::Receiver<TurnEvent>,
}

/// Upgrade handler for `GET /ws/voice`.
pub async fn ws_voice_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    info!("voice session upgrade requested");
    ws.on_upgrade(move |socket| handle_voice_socket(socket, state))
}

/// Run one voice session to completion.
async fn handle_voice_socket(socket: WebSocket, app_state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let (message_tx, mut message_rx) = mpsc::channel::<OutgoingMessage>(CHANNEL_BUFFER_SIZE);

    // Outbound messages are serialized and sent by a dedicated task so the
    // session loop never blocks on the socket.
    let sender_task = tokio::spawn(async move {
        while let Some(message) = message_rx.recv().await {
            match serde_json::to_string(&message) {
                Ok(json) => {
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!("failed to serialize outgoing message: {}", e);
                }
            }
        }
    });

    let mut session = SessionState::new(&app_state);
    let mut active: Option<ActiveTurn> = None;

    info!(session_id = %session.session_id, "voice session established");
    let _ = message_tx.send(OutgoingMessage::Ready).await;

    loop {
        tokio::select! {
            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(msg)) => {
                        if !process_message(msg, &mut session, &mut active, &message_tx, &app_state).await {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(session_id = %session.session_id, "websocket error: {}", e);
                        break;
                    }
                    None => {
                        info!(session_id = %session.session_id, "connection closed by client");
                        break;
                    }
                }
            }
            event = next_turn_event(&mut active), if active.is_some() => {
                match event {
                    Some(event) => {
                        let turn_id = active.as_ref().map(|t| t.id).expect("turn is active");
                        if !forward_turn_event(event, turn_id, &message_tx).await {
                            active = None;
                            session.active_turn = None;
                        }
                    }
                    None => {
                        // Channel closed without a terminal event; treat the
                        // turn as gone.
                        active = None;
                        session.active_turn = None;
                    }
                }
            }
        }
    }

    // Teardown: recover any buffered utterance (nobody is left to answer,
    // so it is only logged), stop the in-flight turn, drop the sender.
    if let Some(segment) = session.vad.force_flush() {
        debug!(
            session_id = %session.session_id,
            duration_ms = segment.duration_ms(),
            "discarding utterance buffered at session close"
        );
    }
    if let Some(turn) = &active {
        app_state.registry.stop(turn.id, "session closed");
    }
    sender_task.abort();
    info!(session_id = %session.session_id, "voice session terminated");
}

async fn next_turn_event(active: &mut Option<ActiveTurn>) -> Option<TurnEvent> {
    match active {
        Some(turn) => turn.events.recv().await,
        None => std::future::pending().await,
    }
}

/// Handle one inbound WebSocket message. Returns `false` to end the session.
async fn process_message(
    msg: Message,
    session: &mut SessionState,
    active: &mut Option<ActiveTurn>,
    message_tx: &mpsc::Sender<OutgoingMessage>,
    app_state: &Arc<AppState>,
) -> bool {
    match msg {
        Message::Text(text) => {
            match serde_json::from_str::<IncomingMessage>(&text) {
                Ok(incoming) => {
                    handle_incoming(incoming, session, active, message_tx, app_state).await
                }
                Err(e) => {
                    // Malformed messages are dropped; the session stays open.
                    warn!(session_id = %session.session_id, "dropping malformed message: {}", e);
                    true
                }
            }
        }
        Message::Binary(data) => {
            let frame = AudioFrame::from_pcm16_bytes(&data, app_state.config.sample_rate);
            handle_frame(frame, session, active, app_state);
            true
        }
        Message::Ping(_) | Message::Pong(_) => true,
        Message::Close(_) => {
            info!(session_id = %session.session_id, "close frame received");
            false
        }
    }
}

async fn handle_incoming(
    incoming: IncomingMessage,
    session: &mut SessionState,
    active: &mut Option<ActiveTurn>,
    message_tx: &mpsc::Sender<OutgoingMessage>,
    app_state: &Arc<AppState>,
) -> bool {
    match incoming {
        IncomingMessage::AudioFrame { samples } => {
            let frame = AudioFrame::new(samples, app_state.config.sample_rate);
            handle_frame(frame, session, active, app_state);
        }
        IncomingMessage::TextPrompt { text, voice } => {
            if session.has_active_turn() {
                let _ = message_tx
                    .send(OutgoingMessage::Error {
                        message: "a turn is already active on this session".to_string(),
                    })
                    .await;
            } else {
                start_turn(TurnInput::Text(text), voice, None, session, active, app_state);
            }
        }
        IncomingMessage::StartTurn {
            samples,
            language,
            voice,
        } => {
            if session.has_active_turn() {
                let _ = message_tx
                    .send(OutgoingMessage::Error {
                        message: "a turn is already active on this session".to_string(),
                    })
                    .await;
            } else {
                let sample_rate = app_state.config.sample_rate;
                let speech_duration_ms = if sample_rate == 0 {
                    0
                } else {
                    samples.len() as u64 * 1000 / sample_rate as u64
                };
                let segment = SpeechSegment {
                    samples,
                    sample_rate,
                    speech_duration_ms,
                };
                start_turn(
                    TurnInput::Audio(segment),
                    voice,
                    language,
                    session,
                    active,
                    app_state,
                );
            }
        }
        IncomingMessage::StopTurn { id, reason } => {
            let reason = reason.unwrap_or_else(|| "stopped by client".to_string());
            let known = app_state.registry.stop(id, &reason);
            // An unknown id is a normal outcome: the turn already finished.
            debug!(
                session_id = %session.session_id,
                turn_id = %id,
                known = known,
                "stop_turn processed"
            );
        }
        IncomingMessage::StopAll { reason } => {
            let reason = reason.unwrap_or_else(|| "stopped by client".to_string());
            let count = app_state.registry.stop_all(&reason);
            info!(session_id = %session.session_id, count = count, "stop_all processed");
        }
    }
    true
}

/// Run one frame through the detector; a flushed utterance starts a turn
/// unless one is already active.
fn handle_frame(
    frame: AudioFrame,
    session: &mut SessionState,
    active: &mut Option<ActiveTurn>,
    app_state: &Arc<AppState>,
) {
    match session.vad.process(frame) {
        VadVerdict::Buffering => {}
        VadVerdict::Flush(segment) => {
            if session.has_active_turn() {
                warn!(
                    session_id = %session.session_id,
                    duration_ms = segment.duration_ms(),
                    "utterance detected while a turn is active, dropping segment"
                );
            } else {
                start_turn(
                    TurnInput::Audio(segment),
                    None,
                    None,
                    session,
                    active,
                    app_state,
                );
            }
        }
    }
}

fn start_turn(
    input: TurnInput,
    voice: Option<String>,
    language: Option<String>,
    session: &mut SessionState,
    active: &mut Option<ActiveTurn>,
    app_state: &Arc<AppState>,
) {
    let options = TurnOptions {
        voice: voice.unwrap_or_else(|| app_state.config.default_voice.clone()),
        language: language.unwrap_or_else(|| app_state.config.language.clone()),
        session: Some(session.session_id.clone()),
        history: Arc::clone(&session.history),
    };
    let (id, events) = app_state.orchestrator.spawn_turn(input, options);
    info!(session_id = %session.session_id, turn_id = %id, "turn started");
    session.active_turn = Some(id);
    *active = Some(ActiveTurn { id, events });
}

/// Translate one turn event into its outbound message.
///
/// Returns `false` once the terminal event was forwarded and the session may
/// accept the next turn.
async fn forward_turn_event(
    event: TurnEvent,
    turn_id: TurnId,
    message_tx: &mpsc::Sender<OutgoingMessage>,
) -> bool {
    match event {
        TurnEvent::Transcription { text, confidence } => {
            let _ = message_tx
                .send(OutgoingMessage::Transcription {
                    turn_id,
                    text,
                    confidence,
                })
                .await;
            true
        }
        TurnEvent::Audio(chunk) => {
            let _ = message_tx
                .send(OutgoingMessage::AudioChunk {
                    turn_id,
                    chunk_number: chunk.chunk_number,
                    samples: chunk.samples,
                    text: Some(chunk.text),
                })
                .await;
            true
        }
        TurnEvent::Completed { total_chunks } => {
            let _ = message_tx
                .send(OutgoingMessage::TurnEnd {
                    turn_id,
                    total_chunks,
                })
                .await;
            false
        }
        TurnEvent::Failed(error) => {
            let _ = message_tx
                .send(OutgoingMessage::TurnError {
                    turn_id,
                    error: TurnErrorBody {
                        kind: error.kind().to_string(),
                        detail: error.to_string(),
                    },
                })
                .await;
            false
        }
        TurnEvent::Cancelled { reason } => {
            let _ = message_tx
                .send(OutgoingMessage::TurnCancelled { turn_id, reason })
                .await;
            false
        }
    }
}
