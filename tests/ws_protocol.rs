//! WebSocket protocol tests against a live server with the reference
//! provider set.

use std::net::SocketAddr;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use parla::handlers::ws::messages::OutgoingMessage;
use parla::{routes, AppState, ServerConfig};

async fn start_server() -> SocketAddr {
    let state = AppState::new(ServerConfig::default());
    let app = routes::create_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

type WsClient = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn connect(addr: SocketAddr) -> WsClient {
    let (client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws/voice"))
        .await
        .expect("websocket connect");
    client
}

async fn next_message(client: &mut WsClient) -> OutgoingMessage {
    loop {
        let msg = tokio::time::timeout(std::time::Duration::from_secs(5), client.next())
            .await
            .expect("server reply within timeout")
            .expect("connection open")
            .expect("websocket frame");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).expect("valid outgoing message");
        }
    }
}

/// Drive one turn to its end, returning every turn message in order.
async fn collect_turn(client: &mut WsClient) -> Vec<OutgoingMessage> {
    let mut messages = Vec::new();
    loop {
        let message = next_message(client).await;
        let terminal = matches!(
            message,
            OutgoingMessage::TurnEnd { .. }
                | OutgoingMessage::TurnError { .. }
                | OutgoingMessage::TurnCancelled { .. }
        );
        messages.push(message);
        if terminal {
            return messages;
        }
    }
}

#[tokio::test]
async fn test_ready_greeting_on_connect() {
    let addr = start_server().await;
    let mut client = connect(addr).await;
    assert!(matches!(next_message(&mut client).await, OutgoingMessage::Ready));
}

#[tokio::test]
async fn test_text_prompt_turn_roundtrip() {
    let addr = start_server().await;
    let mut client = connect(addr).await;
    next_message(&mut client).await; // ready

    client
        .send(Message::Text(
            r#"{"type":"text_prompt","text":"Wie ist das Wetter heute?"}"#.into(),
        ))
        .await
        .unwrap();

    let messages = collect_turn(&mut client).await;

    let chunk_numbers: Vec<u32> = messages
        .iter()
        .filter_map(|m| match m {
            OutgoingMessage::AudioChunk { chunk_number, .. } => Some(*chunk_number),
            _ => None,
        })
        .collect();
    assert!(!chunk_numbers.is_empty(), "a text turn must produce audio");
    for (i, n) in chunk_numbers.iter().enumerate() {
        assert_eq!(*n, i as u32 + 1);
    }

    match messages.last().unwrap() {
        OutgoingMessage::TurnEnd { total_chunks, .. } => {
            assert_eq!(*total_chunks, *chunk_numbers.last().unwrap());
        }
        other => panic!("expected turn_end, got {other:?}"),
    }

    // Every turn message carries the same turn id.
    let mut ids = messages.iter().filter_map(|m| match m {
        OutgoingMessage::AudioChunk { turn_id, .. } => Some(*turn_id),
        OutgoingMessage::TurnEnd { turn_id, .. } => Some(*turn_id),
        _ => None,
    });
    let first = ids.next().unwrap();
    assert!(ids.all(|id| id == first));

    // The session accepts the next turn afterwards.
    client
        .send(Message::Text(
            r#"{"type":"text_prompt","text":"Und morgen?"}"#.into(),
        ))
        .await
        .unwrap();
    let messages = collect_turn(&mut client).await;
    assert!(matches!(
        messages.last().unwrap(),
        OutgoingMessage::TurnEnd { .. }
    ));
}

#[tokio::test]
async fn test_malformed_message_is_dropped_session_survives() {
    let addr = start_server().await;
    let mut client = connect(addr).await;
    next_message(&mut client).await; // ready

    client
        .send(Message::Text("this is not json".into()))
        .await
        .unwrap();
    client
        .send(Message::Text(r#"{"type":"reboot"}"#.into()))
        .await
        .unwrap();

    // The session still processes valid input afterwards.
    client
        .send(Message::Text(
            r#"{"type":"text_prompt","text":"Geht es noch?"}"#.into(),
        ))
        .await
        .unwrap();
    let messages = collect_turn(&mut client).await;
    assert!(matches!(
        messages.last().unwrap(),
        OutgoingMessage::TurnEnd { .. }
    ));
}

#[tokio::test]
async fn test_empty_text_prompt_reports_turn_error() {
    let addr = start_server().await;
    let mut client = connect(addr).await;
    next_message(&mut client).await; // ready

    client
        .send(Message::Text(r#"{"type":"text_prompt","text":"   "}"#.into()))
        .await
        .unwrap();

    let messages = collect_turn(&mut client).await;
    match messages.last().unwrap() {
        OutgoingMessage::TurnError { error, .. } => {
            assert_eq!(error.kind, "empty_prompt");
        }
        other => panic!("expected turn_error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_one_shot_audio_turn() {
    let addr = start_server().await;
    let mut client = connect(addr).await;
    next_message(&mut client).await; // ready

    // Half a second of tone, submitted as a complete clip.
    let samples: Vec<f32> = vec![0.1; 24000];
    let payload = serde_json::json!({
        "type": "start_turn",
        "samples": samples,
        "language": "de-DE",
    });
    client
        .send(Message::Text(payload.to_string().into()))
        .await
        .unwrap();

    let messages = collect_turn(&mut client).await;
    match &messages[0] {
        OutgoingMessage::Transcription { text, confidence, .. } => {
            assert!(!text.is_empty());
            assert!(*confidence > 0.0);
        }
        other => panic!("expected transcription first, got {other:?}"),
    }
    assert!(matches!(
        messages.last().unwrap(),
        OutgoingMessage::TurnEnd { .. }
    ));
}

/// Streaming detection over the wire: silence, speech, silence as binary
/// PCM frames; the detector flushes one utterance and a full turn runs.
#[tokio::test]
async fn test_streaming_vad_turn_over_binary_frames() {
    let addr = start_server().await;
    let mut client = connect(addr).await;
    next_message(&mut client).await; // ready

    // 100ms frames at the default 48kHz: 4800 samples of i16 LE.
    let frame_bytes = |value: i16| -> Vec<u8> {
        std::iter::repeat(value.to_le_bytes())
            .take(4800)
            .flatten()
            .collect()
    };
    let silent = frame_bytes(0);
    let voiced = frame_bytes(3300); // ≈0.1 amplitude, above the 0.01 threshold

    // 300ms silence, 900ms speech, 1200ms silence. Default thresholds:
    // 3 voiced frames to confirm, 5 silent frames and 500ms to flush.
    for _ in 0..3 {
        client.send(Message::Binary(silent.clone().into())).await.unwrap();
    }
    for _ in 0..9 {
        client.send(Message::Binary(voiced.clone().into())).await.unwrap();
    }
    for _ in 0..12 {
        client.send(Message::Binary(silent.clone().into())).await.unwrap();
    }

    let messages = collect_turn(&mut client).await;
    match &messages[0] {
        OutgoingMessage::Transcription { text, .. } => {
            // Confirmed speech spans the 3rd through 9th voiced frame.
            assert!(text.contains("600ms"), "unexpected transcript: {text}");
        }
        other => panic!("expected transcription first, got {other:?}"),
    }
    assert!(messages
        .iter()
        .any(|m| matches!(m, OutgoingMessage::AudioChunk { .. })));
    assert!(matches!(
        messages.last().unwrap(),
        OutgoingMessage::TurnEnd { .. }
    ));
}
