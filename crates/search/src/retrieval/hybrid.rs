//! Hybrid retrieval across all registered channels
//!
//! Expands the query, fans out to every provider concurrently (through the
//! per-channel cache), and fuses whatever came back with RRF.

use super::fusion::RankFuser;
use super::query_type::{analyze_query_terms, select_weights, QueryAnalysis, QueryType};
use super::{Channel, FusedResult, RankedList, RankedResult, SearchProvider};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use shellforge_common::cache::{CacheChannel, MultiChannelCache};
use shellforge_common::config::{AppConfig, ChannelWeights, QueryTypeWeights, RrfConfig};
use shellforge_common::context::{QueryExpander, QueryVariants};
use shellforge_common::errors::{AppError, Result};
use shellforge_common::metrics::{record_channel, record_fusion, PipelineTimer};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Values held by the retrieval cache
#[derive(Debug, Clone, PartialEq)]
pub enum CachedResults {
    /// A provider's raw list
    Ranked(Vec<RankedResult>),
    /// A fused list
    Fused(Vec<FusedResult>),
}

/// Result of one hybrid retrieval
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalOutcome {
    pub query_type: QueryType,

    /// Keywords and intent buckets the query was tagged with
    pub analysis: QueryAnalysis,

    /// Normalized weights the lists were fused with
    pub weights: ChannelWeights,

    pub results: Vec<FusedResult>,

    /// Channels whose lists entered fusion
    pub channels_used: Vec<Channel>,

    /// Channels that failed or timed out
    pub degraded: Vec<Channel>,

    /// Served from the fused-result cache
    pub from_cache: bool,
}

impl RetrievalOutcome {
    fn empty(query_type: QueryType, analysis: QueryAnalysis, weights: ChannelWeights) -> Self {
        Self {
            query_type,
            analysis,
            weights,
            results: Vec::new(),
            channels_used: Vec::new(),
            degraded: Vec::new(),
            from_cache: false,
        }
    }
}

/// Hybrid retriever over any set of channel providers
pub struct HybridRetriever {
    providers: Vec<Arc<dyn SearchProvider>>,
    cache: Arc<MultiChannelCache<CachedResults>>,
    expander: Arc<QueryExpander>,
    fuser: RankFuser,
    rrf: RrfConfig,
    type_weights: QueryTypeWeights,
    provider_limit: usize,
    provider_timeout: Option<Duration>,
}

impl HybridRetriever {
    /// Create a retriever with no providers
    pub fn new(config: &AppConfig, cache: Arc<MultiChannelCache<CachedResults>>, expander: Arc<QueryExpander>) -> Self {
        Self {
            providers: Vec::new(),
            cache,
            expander,
            fuser: RankFuser::from_config(config),
            rrf: config.rrf.clone(),
            type_weights: config.fusion.default_weights.clone(),
            provider_limit: config.providers.limit,
            provider_timeout: config.provider_timeout(),
        }
    }

    /// Register a provider for its channel
    pub fn with_provider(mut self, provider: Arc<dyn SearchProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn cache(&self) -> &Arc<MultiChannelCache<CachedResults>> {
        &self.cache
    }

    pub fn expander(&self) -> &Arc<QueryExpander> {
        &self.expander
    }

    /// Query string a channel is searched with: keyword channels get the
    /// synonym expansion, semantic the exact phrase, graph the keyword list.
    fn variant_for(channel: Channel, variants: &QueryVariants) -> Option<&str> {
        let variant = match channel {
            Channel::Keyword => &variants.expanded,
            Channel::Semantic => &variants.phrase,
            Channel::Graph => &variants.keywords,
        };
        (!variant.is_empty()).then_some(variant.as_str())
    }

    /// Retrieve and fuse up to `limit` results for `query`.
    ///
    /// Provider failures and timeouts are logged and the channel is left out
    /// of fusion; only an empty provider set is an error.
    pub async fn retrieve(&self, query: &str, limit: usize) -> Result<RetrievalOutcome> {
        if self.providers.is_empty() {
            return Err(AppError::Configuration {
                message: "no search providers registered".to_string(),
            });
        }

        let timer = PipelineTimer::start("retrieve");
        let (query_type, weights) = select_weights(query, &self.rrf, &self.type_weights);
        let analysis = analyze_query_terms(query);
        let variants = self.expander.variant_set(query);
        if variants.is_empty() || limit == 0 {
            return Ok(RetrievalOutcome::empty(query_type, analysis, weights));
        }

        let fused_params = [
            ("k", self.fuser.k.to_string()),
            ("limit", limit.to_string()),
            (
                "weights",
                format!("{:.4},{:.4},{:.4}", weights.keyword, weights.semantic, weights.graph),
            ),
        ];
        if let Some(CachedResults::Fused(results)) = self.cache.get(CacheChannel::Rag, query, &fused_params) {
            debug!(query, results = results.len(), "Fused cache hit");
            timer.finish();
            return Ok(RetrievalOutcome {
                query_type,
                analysis,
                weights,
                channels_used: Vec::new(),
                degraded: Vec::new(),
                results,
                from_cache: true,
            });
        }

        let calls = self.providers.iter().filter_map(|provider| {
            let channel = provider.channel();
            Self::variant_for(channel, &variants).map(|variant| async move {
                (channel, self.fetch_channel(provider.as_ref(), channel, variant).await)
            })
        });
        let responses = join_all(calls).await;

        let mut lists = Vec::new();
        let mut channels_used = Vec::new();
        let mut degraded = Vec::new();
        for (channel, response) in responses {
            match response {
                Ok(results) => {
                    channels_used.push(channel);
                    lists.push(RankedList::new(channel, results));
                }
                Err(e) => {
                    warn!(
                        channel = %channel,
                        code = e.code().as_code(),
                        error = %e,
                        "Channel degraded, fusing without it"
                    );
                    degraded.push(channel);
                }
            }
        }

        let fused = self.fuser.fuse(&lists, weights);
        let mut results = self.fuser.apply_boosts(fused);
        results.truncate(limit);
        record_fusion(query_type.as_str(), results.len());

        // Degraded fusions are not cached
        if degraded.is_empty() {
            self.cache
                .set(CacheChannel::Rag, query, &fused_params, CachedResults::Fused(results.clone()));
        }

        debug!(
            query,
            query_type = %query_type,
            results = results.len(),
            degraded = degraded.len(),
            elapsed = timer.elapsed_secs(),
            "Hybrid retrieval complete"
        );
        timer.finish();

        Ok(RetrievalOutcome {
            query_type,
            analysis,
            weights,
            results,
            channels_used,
            degraded,
            from_cache: false,
        })
    }

    /// One channel's list, from cache or provider. The cache is written only
    /// once the provider call has completed.
    async fn fetch_channel(&self, provider: &dyn SearchProvider, channel: Channel, variant: &str) -> Result<Vec<RankedResult>> {
        let Some(cache_channel) = channel.cache_channel() else {
            return self.call_provider(provider, channel, variant).await;
        };

        let params = [("limit", self.provider_limit.to_string())];
        let cached = self
            .cache
            .get_or_load(cache_channel, variant, &params, || async {
                self.call_provider(provider, channel, variant)
                    .await
                    .map(CachedResults::Ranked)
            })
            .await?;

        match cached {
            CachedResults::Ranked(results) => Ok(results),
            CachedResults::Fused(_) => Err(AppError::Internal {
                message: format!("fused results cached under the {} channel", channel),
            }),
        }
    }

    /// Call a provider under the configured deadline and dedup its list
    async fn call_provider(&self, provider: &dyn SearchProvider, channel: Channel, variant: &str) -> Result<Vec<RankedResult>> {
        let start = Instant::now();
        let call = provider.search(channel, variant, self.provider_limit);
        let outcome = match self.provider_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, call).await {
                Ok(inner) => inner,
                Err(_) => Err(AppError::ChannelTimeout {
                    channel: channel.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                }),
            },
            None => call.await,
        };
        let elapsed = start.elapsed().as_secs_f64();

        match outcome {
            Ok(results) => {
                record_channel(channel.as_str(), "success", elapsed);
                Ok(super::fusion::deduplicate(results))
            }
            Err(e) => {
                let label = if matches!(e, AppError::ChannelTimeout { .. }) { "timeout" } else { "error" };
                record_channel(channel.as_str(), label, elapsed);
                Err(e)
            }
        }
    }
}
