//! Shared application state.

use std::sync::Arc;

use crate::config::ServerConfig;
use crate::core::orchestrator::{OrchestratorConfig, TurnOrchestrator};
use crate::core::providers::{
    EnergyClassifier, HashEmbedder, MemoryRetriever, StubLanguageModel, StubRecognizer,
    StubSynthesizer, VoiceClassifier,
};
use crate::core::registry::ProcessRegistry;

/// State shared across all handlers and sessions.
///
/// All collaborators are constructed once at startup and passed in here;
/// nothing in the pipeline reaches for global state.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    /// Registry of in-flight turns across every session.
    pub registry: Arc<ProcessRegistry>,
    pub orchestrator: Arc<TurnOrchestrator>,
    /// Frame classifier shared by all sessions' detectors.
    pub classifier: Arc<dyn VoiceClassifier>,
}

impl AppState {
    /// Build the state with the reference provider set.
    ///
    /// Vendor-backed providers plug in through the same traits; the stubs
    /// keep the server self-contained.
    pub fn new(config: ServerConfig) -> Arc<Self> {
        let registry = Arc::new(ProcessRegistry::new());
        let retriever = Arc::new(MemoryRetriever::new(Arc::new(HashEmbedder::default())));

        let orchestrator = Arc::new(TurnOrchestrator::new(
            Arc::new(StubRecognizer),
            Arc::new(StubLanguageModel),
            Arc::new(StubSynthesizer::default()),
            retriever,
            Arc::clone(&registry),
            OrchestratorConfig {
                chunker: config.chunker,
                retrieval_limit: config.retrieval_limit,
                ..OrchestratorConfig::default()
            },
        ));

        let classifier: Arc<dyn VoiceClassifier> =
            Arc::new(EnergyClassifier::new(config.vad_energy_threshold));

        Arc::new(Self {
            config,
            registry,
            orchestrator,
            classifier,
        })
    }
}
