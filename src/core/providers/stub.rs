//! Deterministic reference providers.
//!
//! These implementations let the server run end-to-end without any vendor
//! service: the recognizer describes the segment it received, the language
//! model echoes the prompt tail as a streamed sentence, the synthesizer
//! produces a tone whose length tracks the text, and the retriever ranks an
//! in-memory document set by feature-hash embeddings. Real adapters replace
//! them behind the same traits.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream;
use futures::StreamExt;
use parking_lot::Mutex;

use crate::core::audio::SpeechSegment;

use super::{
    ContextRetriever, EmbeddingModel, FragmentStream, LanguageModel, ProviderError,
    SpeechRecognizer, SpeechSynthesizer, SynthesisStream, Transcript,
};

/// Recognizer that reports what it heard instead of transcribing it.
#[derive(Debug, Default)]
pub struct StubRecognizer;

#[async_trait]
impl SpeechRecognizer for StubRecognizer {
    async fn transcribe(
        &self,
        segment: &SpeechSegment,
        language: &str,
    ) -> Result<Transcript, ProviderError> {
        if segment.is_empty() {
            return Err(ProviderError::InvalidInput("empty audio segment".into()));
        }
        Ok(Transcript::new(
            format!(
                "({}ms of speech, language {})",
                segment.speech_duration_ms, language
            ),
            0.9,
        ))
    }
}

/// Language model that answers by echoing the last prompt line, streamed
/// word by word.
#[derive(Debug, Default)]
pub struct StubLanguageModel;

#[async_trait]
impl LanguageModel for StubLanguageModel {
    async fn generate_stream(&self, prompt: &str) -> Result<FragmentStream, ProviderError> {
        if prompt.trim().is_empty() {
            return Err(ProviderError::InvalidInput("empty prompt".into()));
        }
        let tail = prompt
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("")
            .trim()
            .to_string();
        let answer = format!("Sie sagten: {tail}. Kann ich sonst noch helfen?");

        let fragments: Vec<Result<String, ProviderError>> = answer
            .split_inclusive(' ')
            .map(|piece| Ok(piece.to_string()))
            .collect();
        Ok(stream::iter(fragments).boxed())
    }
}

/// Synthesizer producing a quiet tone proportional to the text length.
#[derive(Debug, Clone, Copy)]
pub struct StubSynthesizer {
    sample_rate: u32,
    /// Synthesized samples per input character.
    samples_per_char: usize,
}

impl StubSynthesizer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            samples_per_char: 160,
        }
    }
}

impl Default for StubSynthesizer {
    fn default() -> Self {
        Self::new(24000)
    }
}

#[async_trait]
impl SpeechSynthesizer for StubSynthesizer {
    async fn synthesize_stream(
        &self,
        text: &str,
        _voice: &str,
    ) -> Result<SynthesisStream, ProviderError> {
        if text.trim().is_empty() {
            return Err(ProviderError::InvalidInput("empty synthesis text".into()));
        }

        let total = text.chars().count() * self.samples_per_char;
        let rate = self.sample_rate as f32;
        let samples: Vec<i16> = (0..total)
            .map(|i| {
                let t = i as f32 / rate;
                ((t * 220.0 * std::f32::consts::TAU).sin() * 0.2 * i16::MAX as f32) as i16
            })
            .collect();

        let blocks: Vec<Result<Vec<i16>, ProviderError>> = samples
            .chunks(2400)
            .map(|block| Ok(block.to_vec()))
            .collect();
        Ok(stream::iter(blocks).boxed())
    }
}

/// Feature-hashing bag-of-words embedder.
///
/// Deterministic and dependency-free; adequate for ranking a small document
/// set by lexical overlap.
#[derive(Debug, Clone, Copy)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self { dimensions: 64 }
    }
}

#[async_trait]
impl EmbeddingModel for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            token.to_lowercase().hash(&mut hasher);
            let index = (hasher.finish() % self.dimensions as u64) as usize;
            vector[index] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }
}

/// In-memory vector store ranking documents by cosine similarity.
pub struct MemoryRetriever {
    embedder: Arc<dyn EmbeddingModel>,
    documents: Mutex<Vec<(String, Vec<f32>)>>,
}

impl MemoryRetriever {
    pub fn new(embedder: Arc<dyn EmbeddingModel>) -> Self {
        Self {
            embedder,
            documents: Mutex::new(Vec::new()),
        }
    }

    pub async fn insert(&self, document: &str) -> Result<(), ProviderError> {
        let embedding = self.embedder.embed(document).await?;
        self.documents.lock().push((document.to_string(), embedding));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.documents.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.lock().is_empty()
    }

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }
}

#[async_trait]
impl ContextRetriever for MemoryRetriever {
    async fn retrieve(&self, query: &str, limit: usize) -> Result<Vec<String>, ProviderError> {
        let query_embedding = self.embedder.embed(query).await?;

        let mut scored: Vec<(f32, String)> = self
            .documents
            .lock()
            .iter()
            .map(|(text, embedding)| (Self::cosine(&query_embedding, embedding), text.clone()))
            .filter(|(score, _)| *score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored.into_iter().take(limit).map(|(_, text)| text).collect())
    }
}
