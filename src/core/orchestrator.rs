//! Turn orchestration: transcribe → generate → chunk → synthesize → emit.
//!
//! One turn runs on its own task and reports progress through an event
//! channel ending in exactly one terminal event (`Completed`, `Failed` or
//! `Cancelled`). The session task forwards events to the client; multiple
//! sessions run turns fully in parallel.
//!
//! Cancellation is cooperative: the token is polled before and after every
//! external call, and every await of an external call is raced against
//! `token.cancelled()` so a stop request takes effect mid-call. The losing
//! future of each race is dropped, which cancels the in-flight call; a call
//! that completes after cancellation has its result discarded, never
//! emitted. Whatever the outcome, the turn removes itself from the registry
//! exactly once.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::core::audio::SpeechSegment;
use crate::core::chunker::{ChunkerConfig, SynthesisChunker, SynthesizableSpan};
use crate::core::history::ConversationHistory;
use crate::core::providers::{
    ContextRetriever, LanguageModel, SpeechRecognizer, SpeechSynthesizer,
};
use crate::core::registry::{CancellationToken, ProcessRegistry, TurnId, TurnMetadata};

/// Terminal failure of a turn. `kind` values are stable identifiers that
/// reach the client unchanged.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TurnError {
    #[error("transcription failed: {0}")]
    Transcription(String),
    #[error("transcript was empty after trimming")]
    EmptyTranscript,
    #[error("text input was empty after trimming")]
    EmptyPrompt,
    #[error("generation failed: {0}")]
    Generation(String),
}

impl TurnError {
    pub fn kind(&self) -> &'static str {
        match self {
            TurnError::Transcription(_) => "transcription_failed",
            TurnError::EmptyTranscript => "empty_transcript",
            TurnError::EmptyPrompt => "empty_prompt",
            TurnError::Generation(_) => "generation_failed",
        }
    }
}

/// One synthesized audio piece paired with the text that produced it.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// PCM samples as signed 16-bit.
    pub samples: Vec<i16>,
    /// Source text span, for client display.
    pub text: String,
    /// 1-based position within the turn; strictly increasing.
    pub chunk_number: u32,
}

/// Progress of one turn. The stream ends with exactly one of the three
/// terminal variants.
#[derive(Debug, Clone)]
pub enum TurnEvent {
    Transcription { text: String, confidence: f32 },
    Audio(AudioChunk),
    Completed { total_chunks: u32 },
    Failed(TurnError),
    Cancelled { reason: String },
}

/// Input that starts a turn.
pub enum TurnInput {
    Audio(SpeechSegment),
    Text(String),
}

/// Per-turn parameters supplied by the session.
pub struct TurnOptions {
    pub voice: String,
    pub language: String,
    pub session: Option<String>,
    /// Rolling history shared with the session; appended to on natural
    /// completion only.
    pub history: Arc<ConversationHistory>,
}

/// Orchestrator tuning.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Instruction prepended to every generation prompt.
    pub base_instruction: String,
    pub chunker: ChunkerConfig,
    /// Maximum context documents retrieved per turn.
    pub retrieval_limit: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            base_instruction: "You are a voice assistant. Answer in complete, \
                               natural sentences suitable for speech synthesis, \
                               and keep answers concise."
                .to_string(),
            chunker: ChunkerConfig::default(),
            retrieval_limit: 5,
        }
    }
}

/// Drives complete turns against the collaborator set.
///
/// Stateless across turns; all per-turn state lives on the turn task.
pub struct TurnOrchestrator {
    recognizer: Arc<dyn SpeechRecognizer>,
    model: Arc<dyn LanguageModel>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    retriever: Arc<dyn ContextRetriever>,
    registry: Arc<ProcessRegistry>,
    config: OrchestratorConfig,
}

/// Buffer enough events that a slow reader never stalls synthesis of a
/// typical answer.
const EVENT_CHANNEL_SIZE: usize = 256;

enum Step<T> {
    Value(T),
    Cancelled(String),
}

impl TurnOrchestrator {
    pub fn new(
        recognizer: Arc<dyn SpeechRecognizer>,
        model: Arc<dyn LanguageModel>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        retriever: Arc<dyn ContextRetriever>,
        registry: Arc<ProcessRegistry>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            recognizer,
            model,
            synthesizer,
            retriever,
            registry,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    /// Register and launch a turn. Events arrive on the returned receiver in
    /// emission order; the registry entry is cleaned up on every exit path.
    pub fn spawn_turn(
        self: &Arc<Self>,
        input: TurnInput,
        options: TurnOptions,
    ) -> (TurnId, mpsc::Receiver<TurnEvent>) {
        let name = match &input {
            TurnInput::Audio(_) => "voice turn",
            TurnInput::Text(_) => "text turn",
        };
        let metadata = TurnMetadata {
            language: Some(options.language.clone()),
            voice: Some(options.voice.clone()),
            session: options.session.clone(),
        };
        let (id, token) = self.registry.start(name, metadata);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);

        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            let terminal = orchestrator
                .drive_turn(id, input, &options, &token, &events_tx)
                .await;
            match &terminal {
                TurnEvent::Completed { total_chunks } => {
                    info!(turn_id = %id, total_chunks = total_chunks, "turn completed")
                }
                TurnEvent::Failed(e) => {
                    warn!(turn_id = %id, kind = e.kind(), error = %e, "turn failed")
                }
                TurnEvent::Cancelled { reason } => {
                    info!(turn_id = %id, reason = %reason, "turn cancelled")
                }
                _ => unreachable!("drive_turn returns a terminal event"),
            }
            let _ = events_tx.send(terminal).await;
            orchestrator.registry.cleanup(id);
        });

        (id, events_rx)
    }

    /// Run one turn to its terminal event.
    async fn drive_turn(
        &self,
        id: TurnId,
        input: TurnInput,
        options: &TurnOptions,
        token: &CancellationToken,
        events: &mpsc::Sender<TurnEvent>,
    ) -> TurnEvent {
        if let Some(reason) = token.reason() {
            return TurnEvent::Cancelled { reason };
        }

        // Resolve the user's query text, transcribing if the input is audio.
        let query = match input {
            TurnInput::Text(text) => {
                let text = text.trim().to_string();
                if text.is_empty() {
                    return TurnEvent::Failed(TurnError::EmptyPrompt);
                }
                text
            }
            TurnInput::Audio(segment) => {
                match self.transcribe_step(id, &segment, options, token, events).await {
                    Ok(text) => text,
                    Err(terminal) => return terminal,
                }
            }
        };

        if let Some(reason) = token.reason() {
            return TurnEvent::Cancelled { reason };
        }

        // Context retrieval failure degrades to an uncontextualized prompt.
        let context = {
            let retrieval = self
                .retriever
                .retrieve(&query, self.config.retrieval_limit);
            tokio::select! {
                result = retrieval => match result {
                    Ok(docs) => docs,
                    Err(e) => {
                        warn!(turn_id = %id, error = %e, "context retrieval failed, continuing without context");
                        Vec::new()
                    }
                },
                reason = token.cancelled() => return TurnEvent::Cancelled { reason },
            }
        };

        let prompt = self.build_prompt(&query, &context, &options.history.snapshot());
        debug!(turn_id = %id, prompt_chars = prompt.len(), context_docs = context.len(), "prompt assembled");

        let mut fragments = {
            let generation = self.model.generate_stream(&prompt);
            match tokio::select! {
                result = generation => Step::Value(result),
                reason = token.cancelled() => Step::Cancelled(reason),
            } {
                Step::Value(Ok(stream)) => stream,
                Step::Value(Err(e)) => {
                    return TurnEvent::Failed(TurnError::Generation(e.to_string()))
                }
                Step::Cancelled(reason) => return TurnEvent::Cancelled { reason },
            }
        };

        // Stream fragments through the chunker, synthesizing spans as they
        // become ready so audio starts before generation finishes.
        let mut chunker = SynthesisChunker::new(self.config.chunker);
        let mut chunk_number: u32 = 0;
        let mut spoken = Vec::new();

        loop {
            let item = tokio::select! {
                item = fragments.next() => item,
                reason = token.cancelled() => return TurnEvent::Cancelled { reason },
            };
            match item {
                Some(Ok(fragment)) => {
                    for span in chunker.push(&fragment) {
                        if let Err(reason) = self
                            .synthesize_span(id, &span, options, token, events, &mut chunk_number)
                            .await
                        {
                            return TurnEvent::Cancelled { reason };
                        }
                        spoken.push(span.text);
                    }
                }
                Some(Err(e)) => {
                    return TurnEvent::Failed(TurnError::Generation(e.to_string()));
                }
                None => break,
            }
        }

        if let Some(span) = chunker.finish() {
            if let Err(reason) = self
                .synthesize_span(id, &span, options, token, events, &mut chunk_number)
                .await
            {
                return TurnEvent::Cancelled { reason };
            }
            spoken.push(span.text);
        }

        if let Some(reason) = token.reason() {
            return TurnEvent::Cancelled { reason };
        }

        // Natural completion: the spoken text joins the rolling history.
        options.history.push(spoken.join(" "));

        TurnEvent::Completed {
            total_chunks: chunk_number,
        }
    }

    /// Transcribe an audio segment, emitting the transcription event.
    ///
    /// Returns the trimmed transcript text, or the terminal event that ends
    /// the turn.
    async fn transcribe_step(
        &self,
        id: TurnId,
        segment: &SpeechSegment,
        options: &TurnOptions,
        token: &CancellationToken,
        events: &mpsc::Sender<TurnEvent>,
    ) -> Result<String, TurnEvent> {
        let transcription = self.recognizer.transcribe(segment, &options.language);
        let transcript = match tokio::select! {
            result = transcription => Step::Value(result),
            reason = token.cancelled() => Step::Cancelled(reason),
        } {
            Step::Value(Ok(t)) => t,
            Step::Value(Err(e)) => {
                return Err(TurnEvent::Failed(TurnError::Transcription(e.to_string())))
            }
            Step::Cancelled(reason) => return Err(TurnEvent::Cancelled { reason }),
        };

        let text = transcript.text.trim().to_string();
        if text.is_empty() {
            // A turn with nothing to say is rejected, not a system fault.
            return Err(TurnEvent::Failed(TurnError::EmptyTranscript));
        }

        debug!(turn_id = %id, confidence = transcript.confidence, "transcription ready");
        let _ = events
            .send(TurnEvent::Transcription {
                text: text.clone(),
                confidence: transcript.confidence,
            })
            .await;

        Ok(text)
    }

    /// Synthesize one span and emit its audio in order.
    ///
    /// A failing span is logged and skipped; one bad chunk must not abort
    /// the rest of the turn's audio. Only cancellation propagates, as the
    /// `Err` reason.
    async fn synthesize_span(
        &self,
        id: TurnId,
        span: &SynthesizableSpan,
        options: &TurnOptions,
        token: &CancellationToken,
        events: &mpsc::Sender<TurnEvent>,
        chunk_number: &mut u32,
    ) -> Result<(), String> {
        if let Some(reason) = token.reason() {
            return Err(reason);
        }

        let synthesis = self.synthesizer.synthesize_stream(&span.text, &options.voice);
        let mut audio = match tokio::select! {
            result = synthesis => Step::Value(result),
            reason = token.cancelled() => Step::Cancelled(reason),
        } {
            Step::Value(Ok(stream)) => stream,
            Step::Value(Err(e)) => {
                warn!(turn_id = %id, text = %span.text, error = %e, "span synthesis failed, skipping span");
                return Ok(());
            }
            Step::Cancelled(reason) => return Err(reason),
        };

        loop {
            let item = tokio::select! {
                item = audio.next() => item,
                reason = token.cancelled() => return Err(reason),
            };
            match item {
                Some(Ok(samples)) => {
                    *chunk_number += 1;
                    let event = TurnEvent::Audio(AudioChunk {
                        samples,
                        text: span.text.clone(),
                        chunk_number: *chunk_number,
                    });
                    if events.send(event).await.is_err() {
                        // Receiver gone: the session is dead, stop working.
                        return Err("session closed".to_string());
                    }
                }
                Some(Err(e)) => {
                    warn!(turn_id = %id, text = %span.text, error = %e, "span synthesis failed mid-stream, skipping rest of span");
                    return Ok(());
                }
                None => return Ok(()),
            }
        }
    }

    fn build_prompt(&self, query: &str, context: &[String], history: &[String]) -> String {
        let mut prompt = self.config.base_instruction.clone();
        if !history.is_empty() {
            prompt.push_str("\n\nRecent conversation:\n");
            for entry in history {
                prompt.push_str("- ");
                prompt.push_str(entry);
                prompt.push('\n');
            }
        }
        if !context.is_empty() {
            prompt.push_str("\n\nContext:\n");
            prompt.push_str(&context.join("\n"));
        }
        prompt.push_str("\n\nQuestion: ");
        prompt.push_str(query);
        prompt
    }
}
