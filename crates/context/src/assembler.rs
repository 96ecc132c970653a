//! Context Assembler - relevance-ranked, token-budgeted prompt context
//!
//! Provides:
//! - Context retrieval (similar commands, recent history, directory patterns)
//! - Relevance scoring by similarity, recency, directory and outcome
//! - Budgeted prioritization and formatting
//! - Prompt building with optional compression

use crate::templates::TaskType;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use shellforge_common::config::ContextConfig;
use shellforge_common::context::{estimate_tokens, truncate_chars, TokenCompressor, CHARS_PER_TOKEN};
use shellforge_common::errors::Result;
use shellforge_common::llm::PromptBundle;
use shellforge_common::metrics::PipelineTimer;
use shellforge_search::retrieval::{FusedResult, HistoryEntry, HistoryStore, HybridRetriever};
use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Marker appended when formatted context is cut
pub const TRUNCATION_MARKER: &str = "\n[context truncated]";

/// Days over which recency decays to zero
const RECENCY_WINDOW_DAYS: f32 = 30.0;

/// Where a context item came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContextSource {
    Similar,
    Recent,
    Directory,
}

/// One candidate line of prompt context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextItem {
    pub text: String,
    pub estimated_tokens: usize,
    pub relevance_score: f32,

    /// Retrieval similarity in [0, 1]
    pub similarity: f32,
    pub timestamp: Option<DateTime<Utc>>,
    pub cwd: Option<String>,
    pub success: Option<bool>,
    pub source: ContextSource,
}

impl ContextItem {
    pub fn new(text: impl Into<String>, source: ContextSource) -> Self {
        let text = text.into();
        Self {
            estimated_tokens: estimate_tokens(&text),
            text,
            relevance_score: 0.0,
            similarity: 0.0,
            timestamp: None,
            cwd: None,
            success: None,
            source,
        }
    }

    pub fn from_fused(result: &FusedResult, similarity: f32) -> Self {
        Self {
            similarity,
            timestamp: result.payload.timestamp,
            cwd: result.payload.cwd.clone(),
            success: result.payload.success,
            ..Self::new(result.payload.text.clone(), ContextSource::Similar)
        }
    }

    pub fn from_history(entry: &HistoryEntry, source: ContextSource) -> Self {
        Self {
            timestamp: Some(entry.timestamp),
            cwd: entry.cwd.clone(),
            success: entry.success(),
            ..Self::new(entry.command.clone(), source)
        }
    }
}

/// Retrieved context, grouped by section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextGroups {
    pub cwd: String,
    pub similar_commands: Vec<ContextItem>,

    /// Oldest first
    pub recent_history: Vec<ContextItem>,
    pub directory_patterns: Vec<ContextItem>,
}

/// A prompt-building request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptRequest {
    pub query: String,

    #[serde(default)]
    pub cwd: Option<String>,

    /// Detected from the query when absent
    #[serde(default)]
    pub task: Option<TaskType>,

    /// Total prompt budget; enables compression when set
    #[serde(default)]
    pub max_tokens: Option<usize>,

    /// Replaces the engine's history for the recent-commands and directory
    /// sections of this request; similar commands still come from the
    /// registered providers
    #[serde(default)]
    pub history: Option<Vec<HistoryEntry>>,
}

impl PromptRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_task(mut self, task: TaskType) -> Self {
        self.task = Some(task);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// `a` and `b` are the same directory (2), one contains the other (1), or neither (0)
fn directory_affinity(a: &str, b: &str) -> u8 {
    let (a, b) = (Path::new(a), Path::new(b));
    if a == b {
        2
    } else if a.starts_with(b) || b.starts_with(a) {
        1
    } else {
        0
    }
}

/// Relevance in [0, 1] as of `now`: 0.5 base, similarity x 0.3, recency
/// (linear over 30 days) x 0.2, +0.2 same directory or +0.1 parent/child,
/// +0.1 when the command succeeded.
pub fn relevance_at(item: &ContextItem, cwd: Option<&str>, now: DateTime<Utc>) -> f32 {
    let mut score = 0.5 + item.similarity.clamp(0.0, 1.0) * 0.3;

    if let Some(ts) = item.timestamp {
        let age_days = (now - ts).num_seconds().max(0) as f32 / 86_400.0;
        score += (1.0 - age_days / RECENCY_WINDOW_DAYS).max(0.0) * 0.2;
    }

    if let (Some(current), Some(item_cwd)) = (cwd, item.cwd.as_deref()) {
        score += match directory_affinity(current, item_cwd) {
            2 => 0.2,
            1 => 0.1,
            _ => 0.0,
        };
    }

    if item.success == Some(true) {
        score += 0.1;
    }

    score.clamp(0.0, 1.0)
}

/// Stable sort by relevance, then admit whole items until the next one
/// would overflow `max_tokens`.
pub fn prioritize_and_truncate(mut items: Vec<ContextItem>, max_tokens: usize) -> Vec<ContextItem> {
    items.sort_by(|a, b| b.relevance_score.partial_cmp(&a.relevance_score).unwrap_or(Ordering::Equal));

    let mut used = 0;
    let mut admitted = Vec::new();
    for item in items {
        if used + item.estimated_tokens > max_tokens {
            break;
        }
        used += item.estimated_tokens;
        admitted.push(item);
    }
    admitted
}

fn section(title: &str, items: &[ContextItem]) -> Option<String> {
    if items.is_empty() {
        return None;
    }
    let lines: Vec<String> = items.iter().map(|i| format!("- {}", i.text)).collect();
    Some(format!("{}:\n{}", title, lines.join("\n")))
}

/// The line every context starts with
fn directory_line(groups: &ContextGroups) -> String {
    format!("Current directory: {}", groups.cwd)
}

/// Sections below the directory line; the similar-command and
/// directory-pattern groups each get `share` tokens.
fn budgeted_sections(groups: &ContextGroups, share: usize) -> Vec<String> {
    let similar = prioritize_and_truncate(groups.similar_commands.clone(), share);
    let patterns = prioritize_and_truncate(groups.directory_patterns.clone(), share);
    [
        section("Similar commands", &similar),
        section("Recent commands", &groups.recent_history),
        section("Common in this directory", &patterns),
    ]
    .into_iter()
    .flatten()
    .collect()
}

/// Render grouped context within `max_tokens`. The current-directory line
/// is always kept; similar commands and directory patterns get about a
/// third of the remaining budget each.
pub fn format_context(groups: &ContextGroups, max_tokens: usize) -> String {
    let mandatory = directory_line(groups);
    let remaining = max_tokens.saturating_sub(estimate_tokens(&mandatory));

    let mut sections = vec![mandatory.clone()];
    sections.extend(budgeted_sections(groups, remaining / 3));

    let text = sections.join("\n\n");
    if estimate_tokens(&text) <= max_tokens {
        return text;
    }

    let marker_chars = TRUNCATION_MARKER.chars().count();
    let limit = (max_tokens * CHARS_PER_TOKEN)
        .saturating_sub(marker_chars)
        .max(mandatory.chars().count());
    format!("{}{}", truncate_chars(&text, limit), TRUNCATION_MARKER)
}

/// Builds prompt context from retrieval results and command history
pub struct ContextAssembler {
    retriever: Arc<HybridRetriever>,
    history: Arc<HistoryStore>,
    compressor: Option<Arc<TokenCompressor>>,
    config: ContextConfig,
}

impl ContextAssembler {
    pub fn new(retriever: Arc<HybridRetriever>, history: Arc<HistoryStore>, config: ContextConfig) -> Self {
        Self {
            retriever,
            history,
            compressor: None,
            config,
        }
    }

    pub fn with_compressor(mut self, compressor: Arc<TokenCompressor>) -> Self {
        self.compressor = Some(compressor);
        self
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Score an item against the current directory, as of now
    pub fn score_relevance(&self, item: &ContextItem, cwd: Option<&str>) -> f32 {
        relevance_at(item, cwd, Utc::now())
    }

    /// Gather grouped context for a query. Retrieval failures leave the
    /// similar-commands group empty.
    pub async fn retrieve_context(
        &self,
        query: &str,
        cwd: Option<&str>,
        history: Option<&[HistoryEntry]>,
    ) -> Result<ContextGroups> {
        let now = Utc::now();
        let mut similar_commands = match self.retriever.retrieve(query, self.config.similar_limit).await {
            Ok(outcome) => similar_items(&outcome.results),
            Err(e) => {
                warn!(error = %e, "Retrieval failed, continuing without similar commands");
                Vec::new()
            }
        };

        let owned;
        let entries: &[HistoryEntry] = match history {
            Some(entries) => entries,
            None => {
                owned = self.history.snapshot();
                &owned
            }
        };

        let recent_start = entries.len().saturating_sub(self.config.recent_history);
        let mut recent_history: Vec<ContextItem> = entries[recent_start..]
            .iter()
            .map(|e| ContextItem::from_history(e, ContextSource::Recent))
            .collect();

        let mut directory_patterns = match cwd {
            Some(dir) => directory_items(entries, dir, self.config.directory_patterns),
            None => Vec::new(),
        };

        for item in similar_commands
            .iter_mut()
            .chain(recent_history.iter_mut())
            .chain(directory_patterns.iter_mut())
        {
            item.relevance_score = relevance_at(item, cwd, now);
        }

        debug!(
            similar = similar_commands.len(),
            recent = recent_history.len(),
            patterns = directory_patterns.len(),
            "Retrieved context"
        );

        Ok(ContextGroups {
            cwd: cwd.unwrap_or("unknown").to_string(),
            similar_commands,
            recent_history,
            directory_patterns,
        })
    }

    /// Build the prompt bundle for a request
    pub async fn build_bundle(&self, request: &PromptRequest) -> Result<PromptBundle> {
        let timer = PipelineTimer::start("assemble");
        let task = request.task.unwrap_or_else(|| TaskType::detect(&request.query));
        let system = task.system_prompt();
        let query = task.render_query(&request.query);

        let groups = self
            .retrieve_context(&request.query, request.cwd.as_deref(), request.history.as_deref())
            .await?;

        let compressor = self.compressor.as_ref().filter(|c| c.config().enabled);
        let bundle = match (request.max_tokens, compressor) {
            (Some(limit), Some(compressor)) => {
                // The directory line is reserved up front and never compressed
                let mandatory = directory_line(&groups);
                let reserved = estimate_tokens(&mandatory);
                let share = self.config.max_tokens.saturating_sub(reserved) / 3;
                let sections = budgeted_sections(&groups, share).join("\n\n");

                let mut bundle = compressor
                    .compress_prompt(system, &query, &sections, limit.saturating_sub(reserved))
                    .await;
                bundle.context = if bundle.context.is_empty() {
                    mandatory
                } else {
                    format!("{}\n\n{}", mandatory, bundle.context)
                };
                bundle
            }
            (limit, _) => {
                let budget = limit.unwrap_or(self.config.max_tokens);
                let reserved = estimate_tokens(system) + estimate_tokens(&query);
                let context = format_context(&groups, budget.saturating_sub(reserved));
                PromptBundle::new(system, context, query)
            }
        };

        debug!(task = %task, tokens = bundle.estimated_tokens(), "Built prompt");
        timer.finish();
        Ok(bundle)
    }

    /// Build and render the final prompt string
    pub async fn build_prompt(&self, request: &PromptRequest) -> Result<String> {
        Ok(self.build_bundle(request).await?.render())
    }
}

/// Fused results as context items, similarity scaled against the best hit
fn similar_items(results: &[FusedResult]) -> Vec<ContextItem> {
    let best = results.iter().map(|r| r.boosted_score).fold(0.0, f64::max);
    results
        .iter()
        .map(|r| {
            let similarity = if best > 0.0 { (r.boosted_score / best) as f32 } else { 0.0 };
            ContextItem::from_fused(r, similarity)
        })
        .collect()
}

/// Most frequent commands run in or around `cwd`, latest run kept
fn directory_items(entries: &[HistoryEntry], cwd: &str, limit: usize) -> Vec<ContextItem> {
    let mut counts: IndexMap<&str, (usize, &HistoryEntry)> = IndexMap::new();
    for entry in entries.iter().rev() {
        let Some(dir) = entry.cwd.as_deref() else { continue };
        if directory_affinity(cwd, dir) == 0 {
            continue;
        }
        counts
            .entry(entry.command.trim())
            .and_modify(|(n, _)| *n += 1)
            .or_insert((1, entry));
    }

    let total = counts.values().map(|(n, _)| *n).max().unwrap_or(1) as f32;
    let mut ranked: Vec<(usize, &HistoryEntry)> = counts.into_values().collect();
    ranked.sort_by(|a, b| b.0.cmp(&a.0));
    ranked
        .into_iter()
        .take(limit)
        .map(|(n, entry)| ContextItem {
            similarity: n as f32 / total,
            ..ContextItem::from_history(entry, ContextSource::Directory)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn item(text: &str, relevance: f32) -> ContextItem {
        ContextItem {
            relevance_score: relevance,
            ..ContextItem::new(text, ContextSource::Similar)
        }
    }

    #[test]
    fn test_relevance_formula() {
        let now = Utc::now();
        let mut it = ContextItem::new("make build", ContextSource::Similar);
        assert!((relevance_at(&it, None, now) - 0.5).abs() < 1e-6);

        it.similarity = 1.0;
        it.timestamp = Some(now);
        it.cwd = Some("/home/dev/app".into());
        it.success = Some(true);
        // 0.5 + 0.3 + 0.2 + 0.2 + 0.1 clamps to 1.0
        assert_eq!(relevance_at(&it, Some("/home/dev/app"), now), 1.0);

        it.similarity = 0.0;
        it.timestamp = Some(now - Duration::days(15));
        it.success = Some(false);
        let parent = relevance_at(&it, Some("/home/dev"), now);
        assert!((parent - (0.5 + 0.1 + 0.1)).abs() < 1e-3);

        it.timestamp = Some(now - Duration::days(90));
        let unrelated = relevance_at(&it, Some("/var/log"), now);
        assert!((unrelated - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_directory_affinity_respects_components() {
        assert_eq!(directory_affinity("/home/dev", "/home/dev"), 2);
        assert_eq!(directory_affinity("/home/dev", "/home/dev/app"), 1);
        assert_eq!(directory_affinity("/home/dev", "/home/developer"), 0);
    }

    #[test]
    fn test_prioritize_stops_at_first_overflow() {
        let items = vec![
            item("aaaaaaaaaaaaaaaaaaaa", 0.9), // 5 tokens
            item("bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb", 0.8), // 10 tokens
            item("cccc", 0.7), // 1 token
        ];
        let admitted = prioritize_and_truncate(items, 12);
        assert_eq!(admitted.len(), 1);
        assert_eq!(admitted[0].text, "aaaaaaaaaaaaaaaaaaaa");

        assert!(prioritize_and_truncate(vec![item("abcdefgh", 1.0)], 0).is_empty());
    }

    #[test]
    fn test_prioritize_orders_by_relevance() {
        let admitted = prioritize_and_truncate(vec![item("low", 0.2), item("high", 0.9), item("mid", 0.5)], 100);
        let texts: Vec<&str> = admitted.iter().map(|i| i.text.as_str()).collect();
        assert_eq!(texts, vec!["high", "mid", "low"]);
    }

    #[test]
    fn test_format_context_sections() {
        let groups = ContextGroups {
            cwd: "/srv/app".into(),
            similar_commands: vec![item("docker compose up -d", 0.9)],
            recent_history: vec![item("git pull", 0.5)],
            directory_patterns: vec![item("make deploy", 0.6)],
        };
        let text = format_context(&groups, 500);
        assert!(text.starts_with("Current directory: /srv/app"));
        assert!(text.contains("Similar commands:\n- docker compose up -d"));
        assert!(text.contains("Recent commands:\n- git pull"));
        assert!(text.contains("Common in this directory:\n- make deploy"));
    }

    #[test]
    fn test_format_context_truncates_but_keeps_directory() {
        let recent: Vec<ContextItem> = (0..50).map(|i| item(&format!("echo history line {}", i), 0.5)).collect();
        let groups = ContextGroups {
            cwd: "/a/very/long/working/directory/path".into(),
            recent_history: recent,
            ..Default::default()
        };

        let text = format_context(&groups, 40);
        assert!(text.ends_with(TRUNCATION_MARKER));
        assert!(estimate_tokens(&text) <= 40);

        let tiny = format_context(&groups, 0);
        assert!(tiny.starts_with("Current directory: /a/very/long/working/directory/path"));
    }

    #[test]
    fn test_directory_items_counts_frequency() {
        let now = Utc::now();
        let at = |cmd: &str, dir: &str| HistoryEntry::new(cmd, Some(dir.into()), now, Some(0));
        let entries = vec![
            at("cargo test", "/src/app"),
            at("cargo build", "/src/app"),
            at("cargo test", "/src/app/crates"),
            at("ls", "/tmp"),
        ];
        let items = directory_items(&entries, "/src/app", 5);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].text, "cargo test");
        assert_eq!(items[0].similarity, 1.0);
        assert_eq!(items[1].similarity, 0.5);
    }
}
