//! Conversational core: audio types, voice activity detection, synthesis
//! chunking, turn cancellation and orchestration.

pub mod audio;
pub mod chunker;
pub mod history;
pub mod orchestrator;
pub mod providers;
pub mod registry;
pub mod vad;

pub use audio::{AudioFrame, SpeechSegment};
pub use chunker::{ChunkerConfig, SpanBoundary, SynthesisChunker, SynthesizableSpan};
pub use history::ConversationHistory;
pub use orchestrator::{
    AudioChunk, OrchestratorConfig, TurnError, TurnEvent, TurnInput, TurnOptions,
    TurnOrchestrator,
};
pub use registry::{CancellationToken, ProcessRegistry, TurnId, TurnInfo, TurnMetadata};
pub use vad::{VadConfig, VadVerdict, VoiceActivityDetector};
