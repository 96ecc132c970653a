//! Assist engine
//!
//! Owns the caches, the synonym table and the providers, and runs the
//! per-request pipeline: expand, fetch per channel, fuse, score, format or
//! compress, and optionally generate.

use crate::assembler::{ContextAssembler, PromptRequest};
use serde::{Deserialize, Serialize};
use shellforge_common::cache::{CombinedStats, MultiChannelCache};
use shellforge_common::config::AppConfig;
use shellforge_common::context::{QueryExpander, SemanticChunker, SynonymTable, TokenCompressor};
use shellforge_common::embeddings::{Embedder, HashingEmbedder};
use shellforge_common::errors::{AppError, Result};
use shellforge_common::llm::{generate_with_timeout, GenerationOptions, LanguageModel, PromptBundle};
use shellforge_search::retrieval::{
    CachedResults, GraphProvider, HistoryEntry, HistoryStore, HybridRetriever, KeywordProvider, SearchProvider,
    SemanticProvider,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// A prompt and the model's answer to it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assistance {
    pub bundle: PromptBundle,
    pub completion: String,
    pub elapsed_ms: u64,
}

/// Builder for [`AssistEngine`]
pub struct EngineBuilder {
    config: AppConfig,
    embedder: Option<Arc<dyn Embedder>>,
    history: Option<Arc<HistoryStore>>,
    providers: Vec<Arc<dyn SearchProvider>>,
    history_providers: bool,
    llm: Option<Arc<dyn LanguageModel>>,
    synonyms: Option<SynonymTable>,
}

impl EngineBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            embedder: None,
            history: None,
            providers: Vec::new(),
            history_providers: false,
            llm: None,
            synonyms: None,
        }
    }

    /// Sentence and query embedder (defaults to the hashing embedder)
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_history(mut self, history: Arc<HistoryStore>) -> Self {
        self.history = Some(history);
        self
    }

    /// Register an external channel provider
    pub fn with_provider(mut self, provider: Arc<dyn SearchProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Serve all three channels from the in-memory history
    pub fn with_history_providers(mut self) -> Self {
        self.history_providers = true;
        self
    }

    pub fn with_language_model(mut self, llm: Arc<dyn LanguageModel>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Replace the default shell thesaurus
    pub fn with_synonyms(mut self, table: SynonymTable) -> Self {
        self.synonyms = Some(table);
        self
    }

    pub fn build(self) -> Result<AssistEngine> {
        self.config.validate_all()?;
        let config = Arc::new(self.config);

        let embedder: Arc<dyn Embedder> = match self.embedder {
            Some(embedder) => embedder,
            None => Arc::new(HashingEmbedder::default()),
        };
        let history = self.history.unwrap_or_default();
        let cache = Arc::new(MultiChannelCache::from_settings(&config.cache));
        let expander = Arc::new(match self.synonyms {
            Some(table) => QueryExpander::with_table(config.expansion.clone(), table),
            None => QueryExpander::new(config.expansion.clone()),
        });

        let mut retriever = HybridRetriever::new(&config, cache.clone(), expander.clone());
        if self.history_providers {
            retriever = retriever
                .with_provider(Arc::new(KeywordProvider::new(history.clone())))
                .with_provider(Arc::new(SemanticProvider::new(history.clone(), embedder.clone())))
                .with_provider(Arc::new(GraphProvider::new(history.clone())));
        }
        for provider in self.providers {
            retriever = retriever.with_provider(provider);
        }
        let retriever = Arc::new(retriever);

        let chunker = SemanticChunker::new(config.chunker.clone(), embedder);
        let compressor = Arc::new(TokenCompressor::new(chunker, config.compressor.clone()));
        let assembler = ContextAssembler::new(retriever.clone(), history.clone(), config.context.clone())
            .with_compressor(compressor);

        info!(
            version = shellforge_common::VERSION,
            cache_capacity = config.cache.capacity,
            llm = self.llm.is_some(),
            "Assist engine ready"
        );

        Ok(AssistEngine {
            config,
            cache,
            expander,
            retriever,
            assembler,
            history,
            llm: self.llm,
        })
    }
}

/// Shared engine instance; cheap to wrap in an `Arc` and call concurrently
pub struct AssistEngine {
    config: Arc<AppConfig>,
    cache: Arc<MultiChannelCache<CachedResults>>,
    expander: Arc<QueryExpander>,
    retriever: Arc<HybridRetriever>,
    assembler: ContextAssembler,
    history: Arc<HistoryStore>,
    llm: Option<Arc<dyn LanguageModel>>,
}

impl AssistEngine {
    pub fn builder(config: AppConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn retriever(&self) -> &Arc<HybridRetriever> {
        &self.retriever
    }

    pub fn assembler(&self) -> &ContextAssembler {
        &self.assembler
    }

    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }

    /// Build the prompt bundle for a request
    pub async fn prompt(&self, request: &PromptRequest) -> Result<PromptBundle> {
        self.assembler.build_bundle(request).await
    }

    /// Build the prompt and run it through the language model
    pub async fn assist(&self, request: &PromptRequest, cancel: &CancellationToken) -> Result<Assistance> {
        let options = GenerationOptions::from(&self.config.llm);
        self.assist_with_options(request, &options, cancel).await
    }

    pub async fn assist_with_options(
        &self,
        request: &PromptRequest,
        options: &GenerationOptions,
        cancel: &CancellationToken,
    ) -> Result<Assistance> {
        let llm = self.llm.as_ref().ok_or_else(|| AppError::Configuration {
            message: "no language model configured".to_string(),
        })?;

        let start = Instant::now();
        let bundle = self.prompt(request).await?;
        let completion = generate_with_timeout(llm.as_ref(), &bundle, options, cancel).await?;

        Ok(Assistance {
            bundle,
            completion,
            elapsed_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Append an executed command to the history
    pub fn record_command(&self, entry: HistoryEntry) {
        self.history.push(entry);
    }

    /// Add a synonym at runtime
    pub fn add_synonym(&self, term: &str, synonym: &str) {
        self.expander.add_synonym(term, synonym);
    }

    pub fn cache_stats(&self) -> CombinedStats {
        self.cache.combined_stats()
    }

    pub fn clear_caches(&self) {
        self.cache.clear_all();
    }

    /// Sweep expired cache entries every `interval` until `token` is cancelled
    pub fn spawn_maintenance(&self, interval: Duration, token: CancellationToken) -> JoinHandle<()> {
        let cache = self.cache.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("Cache maintenance stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let removed = cache.prune_expired();
                        if removed > 0 {
                            debug!(removed, "Pruned expired cache entries");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = AppConfig::default();
        config.chunker.similarity_threshold = 2.0;
        assert!(AssistEngine::builder(config).build().is_err());
    }

    #[test]
    fn test_prompt_with_empty_history() {
        let engine = AssistEngine::builder(AppConfig::default())
            .with_history_providers()
            .build()
            .unwrap();
        let bundle = tokio_test::block_on(engine.prompt(&PromptRequest::new("list files"))).unwrap();
        assert_eq!(bundle.context, "Current directory: unknown");
        assert_eq!(bundle.query, "list files");
    }

    #[tokio::test]
    async fn test_assist_without_model_is_configuration_error() {
        let engine = AssistEngine::builder(AppConfig::default())
            .with_history_providers()
            .build()
            .unwrap();
        let err = engine
            .assist(&PromptRequest::new("ls"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_maintenance_stops_on_cancel() {
        let engine = AssistEngine::builder(AppConfig::default())
            .with_history_providers()
            .build()
            .unwrap();
        let token = CancellationToken::new();
        let handle = engine.spawn_maintenance(Duration::from_millis(5), token.clone());
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("maintenance task did not stop")
            .unwrap();
    }
}
