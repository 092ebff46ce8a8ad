//! Collaborator interfaces consumed by the conversational core.
//!
//! The actual model calls (speech recognition, text generation, synthesis,
//! embeddings) live behind these narrow traits; the core never sees more
//! than the call shapes defined here. Streaming collaborators return boxed
//! streams whose items carry an explicit error signal, so a mid-stream
//! failure ends the sequence with a value callers can branch on.

mod energy;
mod stub;

pub use energy::EnergyClassifier;
pub use stub::{HashEmbedder, MemoryRetriever, StubLanguageModel, StubRecognizer, StubSynthesizer};

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::core::audio::{AudioFrame, SpeechSegment};

/// Error raised by any collaborator call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("provider error: {0}")]
    Provider(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Result of transcribing one speech segment.
#[derive(Debug, Clone)]
pub struct Transcript {
    pub text: String,
    /// Confidence score in [0.0, 1.0].
    pub confidence: f32,
}

impl Transcript {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// Lazily produced text fragments from a generator; finite, single
/// consumption only.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// Lazily produced PCM blocks for one synthesized span.
pub type SynthesisStream = Pin<Box<dyn Stream<Item = Result<Vec<i16>, ProviderError>> + Send>>;

/// Frame-level voice/silence classification.
///
/// Treated as a pure, possibly-failing function; called synchronously on the
/// session task for every frame.
pub trait VoiceClassifier: Send + Sync {
    fn classify(&self, frame: &AudioFrame) -> Result<bool, ProviderError>;
}

/// Speech-to-text over one complete segment.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    async fn transcribe(
        &self,
        segment: &SpeechSegment,
        language: &str,
    ) -> Result<Transcript, ProviderError>;
}

/// Streaming text generation from a fully assembled prompt.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate_stream(&self, prompt: &str) -> Result<FragmentStream, ProviderError>;
}

/// Streaming speech synthesis of one text span.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize_stream(
        &self,
        text: &str,
        voice: &str,
    ) -> Result<SynthesisStream, ProviderError>;
}

/// Retrieval of context documents for prompt assembly.
#[async_trait]
pub trait ContextRetriever: Send + Sync {
    async fn retrieve(&self, query: &str, limit: usize) -> Result<Vec<String>, ProviderError>;
}

/// Text embedding, used by retriever implementations.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;
}
