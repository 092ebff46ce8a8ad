//! WebSocket session message types.
//!
//! Inbound and outbound messages are internally tagged JSON objects. Audio
//! frames may alternatively arrive as binary WebSocket frames carrying
//! little-endian 16-bit PCM. Every outbound message except the connection
//! control messages (`ready`, `error`) belongs to exactly one turn.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Messages accepted from the client.
#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IncomingMessage {
    /// One PCM frame for the voice activity detector.
    AudioFrame { samples: Vec<f32> },
    /// Start a turn from typed text.
    TextPrompt {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        voice: Option<String>,
    },
    /// Start a turn from a complete audio clip, bypassing the detector.
    StartTurn {
        samples: Vec<f32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        voice: Option<String>,
    },
    /// Cancel one turn by id.
    StopTurn {
        id: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Cancel every in-flight turn, across all sessions.
    StopAll {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

/// Stable error payload of a `turn_error` message.
#[derive(Debug, Serialize, Deserialize)]
pub struct TurnErrorBody {
    /// Stable machine-readable kind, e.g. `empty_transcript`.
    pub kind: String,
    /// Human-readable detail.
    pub detail: String,
}

/// Messages sent to the client.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutgoingMessage {
    /// Session greeting; the server is ready for input.
    Ready,
    Transcription {
        turn_id: Uuid,
        text: String,
        confidence: f32,
    },
    AudioChunk {
        turn_id: Uuid,
        /// 1-based, strictly increasing within the turn.
        chunk_number: u32,
        samples: Vec<i16>,
        /// Source text of this chunk, for display.
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    TurnEnd {
        turn_id: Uuid,
        total_chunks: u32,
    },
    TurnError {
        turn_id: Uuid,
        error: TurnErrorBody,
    },
    TurnCancelled {
        turn_id: Uuid,
        reason: String,
    },
    /// Connection-level error, not tied to a turn.
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incoming_tags() {
        let msg: IncomingMessage =
            serde_json::from_str(r#"{"type":"audio_frame","samples":[0.0,0.5]}"#).unwrap();
        assert!(matches!(msg, IncomingMessage::AudioFrame { .. }));

        let msg: IncomingMessage =
            serde_json::from_str(r#"{"type":"text_prompt","text":"Hallo"}"#).unwrap();
        match msg {
            IncomingMessage::TextPrompt { text, voice } => {
                assert_eq!(text, "Hallo");
                assert!(voice.is_none());
            }
            other => panic!("unexpected message {other:?}"),
        }

        let msg: IncomingMessage =
            serde_json::from_str(r#"{"type":"stop_all","reason":"done"}"#).unwrap();
        assert!(matches!(msg, IncomingMessage::StopAll { .. }));
    }

    #[test]
    fn test_stop_turn_requires_valid_id() {
        let id = Uuid::new_v4();
        let raw = format!(r#"{{"type":"stop_turn","id":"{id}"}}"#);
        let msg: IncomingMessage = serde_json::from_str(&raw).unwrap();
        match msg {
            IncomingMessage::StopTurn { id: parsed, reason } => {
                assert_eq!(parsed, id);
                assert!(reason.is_none());
            }
            other => panic!("unexpected message {other:?}"),
        }

        assert!(
            serde_json::from_str::<IncomingMessage>(r#"{"type":"stop_turn","id":"nope"}"#)
                .is_err()
        );
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        assert!(serde_json::from_str::<IncomingMessage>(r#"{"type":"reboot"}"#).is_err());
    }

    #[test]
    fn test_outgoing_serialization() {
        let json = serde_json::to_string(&OutgoingMessage::Ready).unwrap();
        assert_eq!(json, r#"{"type":"ready"}"#);

        let id = Uuid::new_v4();
        let json = serde_json::to_string(&OutgoingMessage::AudioChunk {
            turn_id: id,
            chunk_number: 3,
            samples: vec![0, -1, 2],
            text: Some("Hallo".into()),
        })
        .unwrap();
        assert!(json.contains(r#""type":"audio_chunk""#));
        assert!(json.contains(r#""chunk_number":3"#));
        assert!(json.contains(&id.to_string()));

        let json = serde_json::to_string(&OutgoingMessage::TurnError {
            turn_id: id,
            error: TurnErrorBody {
                kind: "empty_transcript".into(),
                detail: "transcript was empty".into(),
            },
        })
        .unwrap();
        assert!(json.contains(r#""kind":"empty_transcript""#));
    }

    #[test]
    fn test_audio_chunk_text_omitted_when_none() {
        let json = serde_json::to_string(&OutgoingMessage::AudioChunk {
            turn_id: Uuid::new_v4(),
            chunk_number: 1,
            samples: vec![],
            text: None,
        })
        .unwrap();
        assert!(!json.contains("\"text\""));
    }
}
