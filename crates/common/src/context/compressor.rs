//! Semantic chunking and token-budgeted compression
//!
//! Text is split into sentences, adjacent sentences are merged into chunks
//! while their embeddings stay similar, and chunks are then selected by
//! importance until the token budget is spent.

use super::{estimate_tokens, truncate_chars, tokenize, CHARS_PER_TOKEN};
use crate::config::{ChunkerConfig, CompressorConfig};
use crate::embeddings::{cosine_similarity, Embedder};
use crate::errors::{AppError, Result};
use crate::llm::PromptBundle;
use crate::metrics::record_compression;
use regex_lite::Regex;
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

static SENTENCE_PATTERN: OnceLock<Regex> = OnceLock::new();

fn sentence_pattern() -> &'static Regex {
    // `. ! ?` followed by whitespace or end of string
    SENTENCE_PATTERN.get_or_init(|| Regex::new(r"[.!?]+(?:\s+|$)").expect("Invalid sentence regex pattern"))
}

/// Words that mark a chunk as worth keeping
const DOMAIN_KEYWORDS: &[&str] = &[
    "error", "failed", "command", "file", "directory", "path", "install",
    "config", "permission", "sudo", "git", "docker", "service", "port",
];

/// Split text at sentence boundaries. Terminal punctuation stays with its
/// sentence; trailing text without punctuation is the last sentence.
pub fn split_sentences(text: &str) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return vec![];
    }

    let mut sentences = Vec::new();
    let mut last_end = 0;
    for mat in sentence_pattern().find_iter(text) {
        let sentence = text[last_end..mat.end()].trim();
        if !sentence.is_empty() {
            sentences.push(sentence.to_string());
        }
        last_end = mat.end();
    }

    if last_end < text.len() {
        let sentence = text[last_end..].trim();
        if !sentence.is_empty() {
            sentences.push(sentence.to_string());
        }
    }

    sentences
}

/// Importance in [0, 1]: a length bucket, the unique-word ratio and domain
/// keyword hits (at most three count).
pub fn importance_score(text: &str, keywords: &[String]) -> f32 {
    let chars = text.chars().count();
    let length_score = if chars < 50 {
        0.1
    } else if chars <= 200 {
        0.3
    } else {
        0.2
    };

    let words = tokenize(text);
    let diversity = if words.is_empty() {
        0.0
    } else {
        let unique: HashSet<&String> = words.iter().collect();
        unique.len() as f32 / words.len() as f32 * 0.4
    };

    let present: HashSet<&str> = words.iter().map(String::as_str).collect();
    let hits = keywords.iter().filter(|k| present.contains(k.as_str())).count().min(3);

    (length_score + diversity + hits as f32 * 0.1).clamp(0.0, 1.0)
}

/// A similarity-coherent run of sentences
#[derive(Debug, Clone, PartialEq)]
pub struct SemanticChunk {
    pub text: String,

    /// Sentence index range, end exclusive
    pub start_sentence: usize,
    pub end_sentence: usize,

    pub estimated_tokens: usize,
    pub importance_score: f32,
}

/// Groups sentences into chunks by adjacent embedding similarity
pub struct SemanticChunker {
    config: ChunkerConfig,
    embedder: Arc<dyn Embedder>,
    keywords: Vec<String>,
}

impl SemanticChunker {
    pub fn new(config: ChunkerConfig, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            config,
            embedder,
            keywords: DOMAIN_KEYWORDS.iter().map(|k| k.to_string()).collect(),
        }
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Chunk with the configured overlap
    pub async fn chunk(&self, text: &str) -> Result<Vec<SemanticChunk>> {
        self.chunk_with_overlap(text, self.config.overlap_tokens, &self.keywords).await
    }

    /// Chunk `text`, seeding a chunk closed by the size cap with up to
    /// `overlap_tokens` worth of trailing sentences from the previous one.
    pub async fn chunk_with_overlap(
        &self,
        text: &str,
        overlap_tokens: usize,
        keywords: &[String],
    ) -> Result<Vec<SemanticChunk>> {
        let sentences = split_sentences(text);
        if sentences.is_empty() {
            return Ok(vec![]);
        }

        let embeddings = self
            .embedder
            .embed_batch(&sentences)
            .await
            .map_err(|e| AppError::CompressionFailed {
                message: format!("sentence embedding failed: {}", e),
            })?;
        if embeddings.len() != sentences.len() {
            return Err(AppError::CompressionFailed {
                message: format!("expected {} embeddings, got {}", sentences.len(), embeddings.len()),
            });
        }

        let tokens: Vec<usize> = sentences.iter().map(|s| estimate_tokens(s)).collect();
        let max_tokens = self.config.max_chunk_tokens.max(1);

        let mut chunks = Vec::new();
        let mut start = 0;
        let mut current_tokens = tokens[0];

        for i in 1..sentences.len() {
            let similar = cosine_similarity(&embeddings[i - 1], &embeddings[i]) >= self.config.similarity_threshold;
            let fits = current_tokens + tokens[i] <= max_tokens;

            if similar && fits {
                current_tokens += tokens[i];
                continue;
            }

            chunks.push(self.build_chunk(&sentences, &tokens, start, i, keywords));

            // Overlap only carries across a size-cap boundary
            let mut next_start = i;
            if similar && overlap_tokens > 0 {
                let mut carried = 0;
                while next_start > start + 1 && carried + tokens[next_start - 1] <= overlap_tokens {
                    next_start -= 1;
                    carried += tokens[next_start];
                }
            }
            start = next_start;
            current_tokens = tokens[start..=i].iter().sum();
        }

        chunks.push(self.build_chunk(&sentences, &tokens, start, sentences.len(), keywords));
        debug!(sentences = sentences.len(), chunks = chunks.len(), "Chunked text");
        Ok(chunks)
    }

    fn build_chunk(
        &self,
        sentences: &[String],
        tokens: &[usize],
        start: usize,
        end: usize,
        keywords: &[String],
    ) -> SemanticChunk {
        let text = sentences[start..end].join(" ");
        let importance_score = importance_score(&text, keywords);
        SemanticChunk {
            text,
            start_sentence: start,
            end_sentence: end,
            estimated_tokens: tokens[start..end].iter().sum(),
            importance_score,
        }
    }
}

/// Fits text into a token budget by importance-ordered chunk selection
pub struct TokenCompressor {
    chunker: SemanticChunker,
    config: CompressorConfig,
}

impl TokenCompressor {
    pub fn new(chunker: SemanticChunker, config: CompressorConfig) -> Self {
        Self { chunker, config }
    }

    pub fn config(&self) -> &CompressorConfig {
        &self.config
    }

    pub fn chunker(&self) -> &SemanticChunker {
        &self.chunker
    }

    /// Compress `text` to at most `target_tokens`.
    ///
    /// With `preserve_important` chunks are taken by descending importance
    /// and emitted in their original order. Falls back to hard truncation if
    /// chunking fails.
    pub async fn compress(&self, text: &str, target_tokens: usize, preserve_important: bool) -> String {
        self.compress_with_keywords(text, target_tokens, preserve_important, &self.chunker.keywords)
            .await
    }

    async fn compress_with_keywords(
        &self,
        text: &str,
        target_tokens: usize,
        preserve_important: bool,
        keywords: &[String],
    ) -> String {
        let before = estimate_tokens(text);
        if before <= target_tokens {
            return text.to_string();
        }
        if target_tokens == 0 {
            record_compression(before, 0, false);
            return String::new();
        }

        let chunks = match self.chunker.chunk_with_overlap(text, 0, keywords).await {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!(error = %e, target_tokens, "Semantic compression failed, truncating");
                let out = truncate_chars(text, target_tokens * CHARS_PER_TOKEN).to_string();
                record_compression(before, estimate_tokens(&out), true);
                return out;
            }
        };

        let out = self.select(&chunks, target_tokens, preserve_important);
        let after = estimate_tokens(&out);
        debug!(before, after, chunks = chunks.len(), "Compressed text");
        record_compression(before, after, false);
        out
    }

    fn select(&self, chunks: &[SemanticChunk], target_tokens: usize, preserve_important: bool) -> String {
        let mut order: Vec<usize> = (0..chunks.len()).collect();
        if preserve_important {
            // Stable: equal scores keep document order
            order.sort_by(|&a, &b| {
                chunks[b]
                    .importance_score
                    .partial_cmp(&chunks[a].importance_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }

        let budget_chars = target_tokens * CHARS_PER_TOKEN;
        let mut used_chars = 0;
        let mut selected: Vec<(usize, String)> = Vec::new();

        for idx in order {
            let chunk = &chunks[idx];
            let separator = usize::from(!selected.is_empty());
            let chunk_chars = chunk.text.chars().count();

            if used_chars + separator + chunk_chars <= budget_chars {
                used_chars += separator + chunk_chars;
                selected.push((idx, chunk.text.clone()));
                continue;
            }

            let remaining_chars = budget_chars.saturating_sub(used_chars + separator);
            if remaining_chars / CHARS_PER_TOKEN > self.config.min_partial_tokens {
                let head = truncate_chars(&chunk.text, remaining_chars - 3);
                selected.push((idx, format!("{}...", head)));
            }
            break;
        }

        if preserve_important {
            selected.sort_by_key(|(idx, _)| *idx);
        }
        selected.into_iter().map(|(_, text)| text).collect::<Vec<_>>().join(" ")
    }

    /// Fit a prompt into `max_total_tokens`. System and query costs are
    /// reserved first and never compressed; the context gets 95% of what is
    /// left (80% when aggressive).
    pub async fn compress_prompt(
        &self,
        system: &str,
        query: &str,
        context: &str,
        max_total_tokens: usize,
    ) -> PromptBundle {
        let reserved = estimate_tokens(system) + estimate_tokens(query);
        let available = max_total_tokens.saturating_sub(reserved);
        if available == 0 {
            let err = AppError::BudgetExhausted {
                required: reserved,
                available: max_total_tokens,
            };
            warn!(error = %err, "No room for context");
            return PromptBundle::new(system, "", query);
        }

        let ratio = if self.config.aggressive { 80 } else { 95 };
        let target = available * ratio / 100;

        let mut keywords = self.chunker.keywords.clone();
        keywords.extend(super::keywords(query));
        let context = self.compress_with_keywords(context, target, true, &keywords).await;

        PromptBundle::new(system, context, query)
    }
}
