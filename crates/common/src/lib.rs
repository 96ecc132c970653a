//! ShellForge Common Library
//!
//! Shared building blocks for the retrieval and context crates:
//! - Error types and handling
//! - Configuration management
//! - Multi-channel TTL/LRU result cache
//! - Query expansion and semantic compression
//! - Embedding and language model boundaries
//! - Metrics and observability

pub mod cache;
pub mod config;
pub mod context;
pub mod embeddings;
pub mod errors;
pub mod llm;
pub mod metrics;

// Re-export commonly used types
pub use cache::{CacheChannel, MultiChannelCache};
pub use config::{AppConfig, ChannelWeights};
pub use embeddings::Embedder;
pub use errors::{AppError, Result};
pub use llm::{LanguageModel, PromptBundle};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding dimension for the hashing embedder
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 256;
