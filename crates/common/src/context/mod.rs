//! Context Engine Core Components
//!
//! Building blocks for prompt assembly:
//! - Query expansion with weighted synonyms
//! - Semantic chunking and token-budgeted compression
//! - Token estimation

mod compressor;
mod query_expander;

pub use compressor::{importance_score, split_sentences, SemanticChunk, SemanticChunker, TokenCompressor};
pub use query_expander::{is_stopword, keywords, tokenize, QueryExpander, QueryVariants, SynonymTable};

/// Characters per estimated token
pub const CHARS_PER_TOKEN: usize = 4;

/// Rough token count: one token per four characters
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / CHARS_PER_TOKEN
}

/// First `max_chars` characters of `text`, respecting char boundaries
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
