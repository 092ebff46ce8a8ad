//! Per-connection session state.

use std::sync::Arc;

use uuid::Uuid;

use crate::core::history::ConversationHistory;
use crate::core::registry::TurnId;
use crate::core::vad::VoiceActivityDetector;
use crate::state::AppState;

/// State owned by one WebSocket session.
///
/// Driven exclusively by the session task; the VAD and history need no
/// external locking beyond what the turn task shares.
pub struct SessionState {
    /// Identifier used in logs and turn metadata.
    pub session_id: String,
    /// This session's voice activity detector.
    pub vad: VoiceActivityDetector,
    /// Rolling window of recent assistant responses.
    pub history: Arc<ConversationHistory>,
    /// The single turn allowed to be in flight, if any.
    pub active_turn: Option<TurnId>,
}

impl SessionState {
    pub fn new(state: &AppState) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            vad: VoiceActivityDetector::new(state.config.vad, Arc::clone(&state.classifier)),
            history: Arc::new(ConversationHistory::new(state.config.history_limit)),
            active_turn: None,
        }
    }

    pub fn has_active_turn(&self) -> bool {
        self.active_turn.is_some()
    }
}
