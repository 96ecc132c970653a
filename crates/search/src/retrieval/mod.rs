//! Multi-channel retrieval system
//!
//! Provides three retrieval channels:
//! - Keyword search (lexical matching)
//! - Semantic search (embedding similarity)
//! - Graph search (command transition graph)
//!
//! and the hybrid retriever that fuses them with RRF.

mod fusion;
mod graph;
mod history;
mod hybrid;
mod query_type;

pub use fusion::{deduplicate, RankFuser};
pub use graph::{CommandGraph, GraphProvider};
pub use history::{HistoryEntry, HistoryStore, KeywordProvider, SemanticProvider};
pub use hybrid::{CachedResults, HybridRetriever, RetrievalOutcome};
pub use query_type::{
    analyze_query_terms, detect_query_type, select_weights, weights_for, QueryAnalysis, QueryIntent,
    QueryType,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shellforge_common::cache::CacheChannel;
use shellforge_common::config::ChannelWeights;
use shellforge_common::errors::Result;
use std::fmt;

/// Search channel
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Lexical matching
    Keyword,
    /// Embedding similarity
    Semantic,
    /// Command transition graph
    Graph,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Keyword, Channel::Semantic, Channel::Graph];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Keyword => "keyword",
            Channel::Semantic => "semantic",
            Channel::Graph => "graph",
        }
    }

    /// Cache channel holding this channel's raw lists. Graph lists are not cached.
    pub fn cache_channel(&self) -> Option<CacheChannel> {
        match self {
            Channel::Keyword => Some(CacheChannel::Keyword),
            Channel::Semantic => Some(CacheChannel::Semantic),
            Channel::Graph => None,
        }
    }

    /// This channel's share of a weight vector
    pub fn weight(&self, weights: &ChannelWeights) -> f64 {
        match self {
            Channel::Keyword => weights.keyword,
            Channel::Semantic => weights.semantic,
            Channel::Graph => weights.graph,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a result points at
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultPayload {
    /// Command or snippet text
    pub text: String,

    /// Working directory the command ran in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,

    /// When the command ran
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,

    /// Whether the command exited successfully
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
}

impl ResultPayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// One entry of a channel's ranked list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    /// Stable identifier shared across channels
    pub id: String,

    pub payload: ResultPayload,

    /// Channel-native score, only used for ordering within the channel
    pub score: f32,

    pub channel: Channel,
}

/// A channel's ranked list, best first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedList {
    pub channel: Channel,
    pub results: Vec<RankedResult>,
}

impl RankedList {
    pub fn new(channel: Channel, results: Vec<RankedResult>) -> Self {
        Self { channel, results }
    }
}

/// Result after fusion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedResult {
    pub id: String,

    /// Sum of weighted reciprocal-rank contributions
    pub rrf_score: f64,

    /// `rrf_score` after payload boosts
    pub boosted_score: f64,

    pub payload: ResultPayload,

    /// Channel of the first list the id appeared in
    pub channel: Channel,

    /// 1-based rank per list the id appeared in
    pub ranks: Vec<(Channel, usize)>,
}

/// A ranked-list provider for one channel
#[async_trait::async_trait]
pub trait SearchProvider: Send + Sync {
    /// Up to `limit` results for `query`, best first
    async fn search(&self, channel: Channel, query: &str, limit: usize) -> Result<Vec<RankedResult>>;

    /// Channel this provider serves
    fn channel(&self) -> Channel;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_cache_mapping() {
        assert_eq!(Channel::Keyword.cache_channel(), Some(CacheChannel::Keyword));
        assert_eq!(Channel::Semantic.cache_channel(), Some(CacheChannel::Semantic));
        assert_eq!(Channel::Graph.cache_channel(), None);
    }

    #[test]
    fn test_payload_serialization_skips_empty_fields() {
        let json = serde_json::to_string(&ResultPayload::text("ls -la")).unwrap();
        assert_eq!(json, r#"{"text":"ls -la"}"#);
    }
}
