//! Configuration management for ShellForge
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with SHELLFORGE__)
//! - Configuration files (config/default.toml, config/{env}.toml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

use crate::errors::Result;

/// Main engine configuration
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct AppConfig {
    /// Per-channel result cache
    #[serde(default)]
    #[validate(nested)]
    pub cache: CacheSettings,

    /// Reciprocal rank fusion
    #[serde(default)]
    #[validate(nested)]
    pub rrf: RrfConfig,

    /// Per-query-type channel weights and boosts
    #[serde(default)]
    #[validate(nested)]
    pub fusion: FusionConfig,

    /// Synonym expansion
    #[serde(default)]
    #[validate(nested)]
    pub expansion: ExpansionConfig,

    /// Semantic chunking
    #[serde(default)]
    #[validate(nested)]
    pub chunker: ChunkerConfig,

    /// Context compression
    #[serde(default)]
    #[validate(nested)]
    pub compressor: CompressorConfig,

    /// Context assembly
    #[serde(default)]
    #[validate(nested)]
    pub context: ContextConfig,

    /// Channel provider calls
    #[serde(default)]
    #[validate(nested)]
    pub providers: ProviderConfig,

    /// Language model invocation
    #[serde(default)]
    #[validate(nested)]
    pub llm: LlmConfig,

    /// Logging
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct CacheSettings {
    /// Maximum entries per channel
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,

    /// Entry lifetime in seconds (None disables expiry)
    #[serde(default = "default_cache_ttl")]
    #[validate(range(min = 1))]
    pub ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct RrfConfig {
    /// RRF smoothing constant
    #[serde(default = "default_rrf_k")]
    #[validate(range(min = 0.0))]
    pub k: f64,

    /// Pick channel weights from the detected query type
    #[serde(default = "default_true")]
    pub adaptive: bool,

    /// Weights used when adaptive mode is off
    #[serde(default = "default_static_weights")]
    #[validate(nested)]
    pub static_weights: ChannelWeights,
}

/// Keyword / semantic / graph weights. Normalized before every fusion.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize, Validate)]
pub struct ChannelWeights {
    #[validate(range(min = 0.0))]
    pub keyword: f64,
    #[validate(range(min = 0.0))]
    pub semantic: f64,
    #[validate(range(min = 0.0))]
    pub graph: f64,
}

impl ChannelWeights {
    pub const fn new(keyword: f64, semantic: f64, graph: f64) -> Self {
        Self {
            keyword,
            semantic,
            graph,
        }
    }

    pub fn sum(&self) -> f64 {
        self.keyword + self.semantic + self.graph
    }

    /// Rescale so the three weights sum to 1.0. A zero or non-finite
    /// vector becomes uniform.
    pub fn normalized(&self) -> Self {
        let parts = [self.keyword, self.semantic, self.graph];
        let max = parts.iter().copied().fold(0.0, f64::max);
        if parts.iter().any(|w| !w.is_finite() || *w < 0.0) || max <= 0.0 {
            let third = 1.0 / 3.0;
            return Self::new(third, third, third);
        }
        // Scale by the largest weight first so the sum cannot overflow
        let scaled = parts.map(|w| w / max);
        let total: f64 = scaled.iter().sum();
        Self::new(scaled[0] / total, scaled[1] / total, scaled[2] / total)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct FusionConfig {
    /// Weights per detected query type
    #[serde(default)]
    #[validate(nested)]
    pub default_weights: QueryTypeWeights,

    /// Post-fusion multipliers applied when a payload field is truthy
    #[serde(default)]
    pub boosts: Vec<BoostSetting>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct QueryTypeWeights {
    #[serde(default = "default_factual_weights")]
    #[validate(nested)]
    pub factual: ChannelWeights,
    #[serde(default = "default_procedural_weights")]
    #[validate(nested)]
    pub procedural: ChannelWeights,
    #[serde(default = "default_conceptual_weights")]
    #[validate(nested)]
    pub conceptual: ChannelWeights,
    #[serde(default = "default_command_weights")]
    #[validate(nested)]
    pub command: ChannelWeights,
}

/// Payload fields a boost can test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BoostField {
    /// The command exited successfully
    Successful,
    /// The result carries a working directory
    HasDirectory,
    /// The result carries a timestamp
    HasTimestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct BoostSetting {
    pub field: BoostField,
    pub factor: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ExpansionConfig {
    /// Synonyms added per query token
    #[serde(default = "default_max_expansions")]
    pub max_expansions: usize,

    /// Weight lost per successive synonym
    #[serde(default = "default_decay_step")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub decay_step: f32,

    /// Weight of the user's own terms
    #[serde(default = "default_original_weight")]
    #[validate(range(min = 0.0))]
    pub original_weight: f32,

    /// Weight of the first synonym
    #[serde(default = "default_synonym_weight")]
    #[validate(range(min = 0.0))]
    pub synonym_weight: f32,

    /// Floor for decayed synonym weights
    #[serde(default = "default_min_synonym_weight")]
    #[validate(range(min = 0.0))]
    pub min_synonym_weight: f32,

    /// Queries longer than this (in characters) get a prefix variant
    #[serde(default = "default_prefix_min_chars")]
    pub prefix_min_chars: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ChunkerConfig {
    /// Adjacent sentences at or above this cosine similarity share a chunk
    #[serde(default = "default_similarity_threshold")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub similarity_threshold: f32,

    /// Size cap for a single chunk
    #[serde(default = "default_max_chunk_tokens")]
    #[validate(range(min = 1))]
    pub max_chunk_tokens: usize,

    /// Tokens carried over when a chunk is closed by the size cap
    #[serde(default)]
    pub overlap_tokens: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct CompressorConfig {
    /// Compress context when the prompt would overflow
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Target 80% of the free budget instead of 95%
    #[serde(default)]
    pub aggressive: bool,

    /// Smallest leftover budget worth a truncated trailing chunk
    #[serde(default = "default_min_partial_tokens")]
    pub min_partial_tokens: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ContextConfig {
    /// Total prompt budget in estimated tokens
    #[serde(default = "default_context_max_tokens")]
    pub max_tokens: usize,

    /// Recent history entries always shown
    #[serde(default = "default_recent_history")]
    #[validate(range(max = 100))]
    pub recent_history: usize,

    /// Fused results requested for the similar-commands section
    #[serde(default = "default_similar_limit")]
    pub similar_limit: usize,

    /// Directory-pattern candidates considered
    #[serde(default = "default_directory_patterns")]
    pub directory_patterns: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ProviderConfig {
    /// Results requested from each channel
    #[serde(default = "default_provider_limit")]
    #[validate(range(min = 1))]
    pub limit: usize,

    /// Per-call deadline in milliseconds (None waits indefinitely)
    #[serde(default = "default_provider_timeout")]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct LlmConfig {
    /// Generation deadline in seconds
    #[serde(default = "default_llm_timeout")]
    #[validate(range(min = 1))]
    pub timeout_secs: u64,

    /// Output token cap
    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: usize,

    #[serde(default = "default_temperature")]
    #[validate(range(min = 0.0, max = 2.0))]
    pub temperature: f32,

    #[serde(default)]
    pub stop_sequences: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logging: bool,

    /// Service name attached to log lines
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_true() -> bool { true }
fn default_cache_capacity() -> usize { 256 }
fn default_cache_ttl() -> Option<u64> { Some(300) }
fn default_rrf_k() -> f64 { 60.0 }
fn default_static_weights() -> ChannelWeights { ChannelWeights::new(0.4, 0.4, 0.2) }
fn default_factual_weights() -> ChannelWeights { ChannelWeights::new(0.5, 0.4, 0.1) }
fn default_procedural_weights() -> ChannelWeights { ChannelWeights::new(0.3, 0.3, 0.4) }
fn default_conceptual_weights() -> ChannelWeights { ChannelWeights::new(0.2, 0.5, 0.3) }
fn default_command_weights() -> ChannelWeights { ChannelWeights::new(0.6, 0.3, 0.1) }
fn default_max_expansions() -> usize { 3 }
fn default_decay_step() -> f32 { 0.3 }
fn default_original_weight() -> f32 { 2.0 }
fn default_synonym_weight() -> f32 { 1.0 }
fn default_min_synonym_weight() -> f32 { 0.5 }
fn default_prefix_min_chars() -> usize { 3 }
fn default_similarity_threshold() -> f32 { 0.75 }
fn default_max_chunk_tokens() -> usize { 128 }
fn default_min_partial_tokens() -> usize { 10 }
fn default_context_max_tokens() -> usize { 1024 }
fn default_recent_history() -> usize { 5 }
fn default_similar_limit() -> usize { 10 }
fn default_directory_patterns() -> usize { 5 }
fn default_provider_limit() -> usize { 20 }
fn default_provider_timeout() -> Option<u64> { Some(250) }
fn default_llm_timeout() -> u64 { 30 }
fn default_llm_max_tokens() -> usize { 256 }
fn default_temperature() -> f32 { 0.2 }
fn default_log_level() -> String { "info".to_string() }
fn default_service_name() -> String { "shellforge".to_string() }

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            ttl_seconds: default_cache_ttl(),
        }
    }
}

impl Default for RrfConfig {
    fn default() -> Self {
        Self {
            k: default_rrf_k(),
            adaptive: true,
            static_weights: default_static_weights(),
        }
    }
}

impl Default for QueryTypeWeights {
    fn default() -> Self {
        Self {
            factual: default_factual_weights(),
            procedural: default_procedural_weights(),
            conceptual: default_conceptual_weights(),
            command: default_command_weights(),
        }
    }
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            default_weights: QueryTypeWeights::default(),
            boosts: Vec::new(),
        }
    }
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self {
            max_expansions: default_max_expansions(),
            decay_step: default_decay_step(),
            original_weight: default_original_weight(),
            synonym_weight: default_synonym_weight(),
            min_synonym_weight: default_min_synonym_weight(),
            prefix_min_chars: default_prefix_min_chars(),
        }
    }
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            max_chunk_tokens: default_max_chunk_tokens(),
            overlap_tokens: 0,
        }
    }
}

impl Default for CompressorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            aggressive: false,
            min_partial_tokens: default_min_partial_tokens(),
        }
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_context_max_tokens(),
            recent_history: default_recent_history(),
            similar_limit: default_similar_limit(),
            directory_patterns: default_directory_patterns(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            limit: default_provider_limit(),
            timeout_ms: default_provider_timeout(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_llm_timeout(),
            max_tokens: default_llm_max_tokens(),
            temperature: default_temperature(),
            stop_sequences: Vec::new(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: false,
            service_name: default_service_name(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cache: CacheSettings::default(),
            rrf: RrfConfig::default(),
            fusion: FusionConfig::default(),
            expansion: ExpansionConfig::default(),
            chunker: ChunkerConfig::default(),
            compressor: CompressorConfig::default(),
            context: ContextConfig::default(),
            providers: ProviderConfig::default(),
            llm: LlmConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> std::result::Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with SHELLFORGE__ prefix
            // e.g., SHELLFORGE__CACHE__CAPACITY=512
            .add_source(
                Environment::with_prefix("SHELLFORGE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> std::result::Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("SHELLFORGE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load and run range validation
    pub fn load_validated() -> Result<Self> {
        let config = Self::load()?;
        config.validate_all()?;
        Ok(config)
    }

    /// Run range checks over every section
    pub fn validate_all(&self) -> Result<()> {
        self.validate()?;
        Ok(())
    }

    /// Cache TTL as Duration
    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache.ttl_seconds.map(Duration::from_secs)
    }

    /// Provider deadline as Duration
    pub fn provider_timeout(&self) -> Option<Duration> {
        self.providers.timeout_ms.map(Duration::from_millis)
    }

    /// Generation deadline as Duration
    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm.timeout_secs)
    }
}
