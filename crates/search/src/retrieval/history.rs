//! In-memory command history and the keyword / semantic providers over it

use super::{Channel, RankedResult, ResultPayload, SearchProvider};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use shellforge_common::context::tokenize;
use shellforge_common::embeddings::{cosine_similarity, Embedder};
use shellforge_common::errors::{AppError, Result};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// One executed command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(default = "new_id")]
    pub id: String,

    pub command: String,

    #[serde(default)]
    pub cwd: Option<String>,

    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub exit_code: Option<i32>,
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

impl HistoryEntry {
    pub fn new(command: impl Into<String>, cwd: Option<String>, timestamp: DateTime<Utc>, exit_code: Option<i32>) -> Self {
        Self {
            id: new_id(),
            command: command.into(),
            cwd,
            timestamp,
            exit_code,
        }
    }

    pub fn success(&self) -> Option<bool> {
        self.exit_code.map(|code| code == 0)
    }

    pub fn payload(&self) -> ResultPayload {
        ResultPayload {
            text: self.command.clone(),
            cwd: self.cwd.clone(),
            timestamp: Some(self.timestamp),
            success: self.success(),
        }
    }

    pub fn to_ranked(&self, score: f32, channel: Channel) -> RankedResult {
        RankedResult {
            id: self.id.clone(),
            payload: self.payload(),
            score,
            channel,
        }
    }
}

/// Thread-safe command history, kept in execution order
#[derive(Debug, Default)]
pub struct HistoryStore {
    entries: RwLock<Vec<HistoryEntry>>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(mut entries: Vec<HistoryEntry>) -> Self {
        entries.sort_by_key(|e| e.timestamp);
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Load a JSON array of entries
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let entries: Vec<HistoryEntry> = serde_json::from_str(&raw).map_err(|e| AppError::InvalidFormat {
            message: format!("{}: {}", path.as_ref().display(), e),
        })?;
        debug!(entries = entries.len(), path = %path.as_ref().display(), "Loaded history");
        Ok(Self::from_entries(entries))
    }

    pub fn push(&self, entry: HistoryEntry) {
        let mut entries = self.entries.write();
        let pos = entries.partition_point(|e| e.timestamp <= entry.timestamp);
        entries.insert(pos, entry);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// All entries, oldest first
    pub fn snapshot(&self) -> Vec<HistoryEntry> {
        self.entries.read().clone()
    }

    /// Last `n` entries, oldest first
    pub fn recent(&self, n: usize) -> Vec<HistoryEntry> {
        let entries = self.entries.read();
        entries[entries.len().saturating_sub(n)..].to_vec()
    }

    /// Latest entry per distinct command, newest first
    pub fn unique_commands(&self) -> Vec<HistoryEntry> {
        let entries = self.entries.read();
        let mut seen = HashSet::new();
        entries
            .iter()
            .rev()
            .filter(|e| seen.insert(e.command.trim().to_string()))
            .cloned()
            .collect()
    }
}

enum Term {
    Exact(String),
    Prefix(String),
}

impl Term {
    fn matches(&self, tokens: &[String]) -> bool {
        match self {
            Term::Exact(t) => tokens.iter().any(|tok| tok == t),
            Term::Prefix(p) => tokens.iter().any(|tok| tok.starts_with(p.as_str())),
        }
    }
}

fn parse_terms(query: &str) -> Vec<Term> {
    let mut terms = Vec::new();
    for piece in query.split_whitespace() {
        let prefix = piece.ends_with('*');
        for token in tokenize(piece.trim_end_matches('*')) {
            terms.push(if prefix { Term::Prefix(token) } else { Term::Exact(token) });
        }
    }
    terms
}

fn rank_desc(scored: &mut [(f32, HistoryEntry)]) {
    // Stable: equal scores stay newest first
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
}

/// Term-overlap search over the history
pub struct KeywordProvider {
    store: Arc<HistoryStore>,
}

impl KeywordProvider {
    pub fn new(store: Arc<HistoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl SearchProvider for KeywordProvider {
    async fn search(&self, channel: Channel, query: &str, limit: usize) -> Result<Vec<RankedResult>> {
        let terms = parse_terms(query);
        if terms.is_empty() || limit == 0 {
            return Ok(vec![]);
        }

        let mut scored: Vec<(f32, HistoryEntry)> = self
            .store
            .unique_commands()
            .into_iter()
            .filter_map(|entry| {
                let tokens = tokenize(&entry.command);
                let matched = terms.iter().filter(|t| t.matches(&tokens)).count();
                (matched > 0).then(|| (matched as f32 / terms.len() as f32, entry))
            })
            .collect();

        rank_desc(&mut scored);
        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(score, entry)| entry.to_ranked(score, channel))
            .collect())
    }

    fn channel(&self) -> Channel {
        Channel::Keyword
    }
}

/// Embedding-similarity search over the history
pub struct SemanticProvider {
    store: Arc<HistoryStore>,
    embedder: Arc<dyn Embedder>,
    min_similarity: f32,
}

impl SemanticProvider {
    pub fn new(store: Arc<HistoryStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            store,
            embedder,
            min_similarity: 0.1,
        }
    }

    pub fn with_min_similarity(mut self, min_similarity: f32) -> Self {
        self.min_similarity = min_similarity;
        self
    }
}

#[async_trait::async_trait]
impl SearchProvider for SemanticProvider {
    async fn search(&self, channel: Channel, query: &str, limit: usize) -> Result<Vec<RankedResult>> {
        if query.trim().is_empty() || limit == 0 {
            return Ok(vec![]);
        }

        let candidates = self.store.unique_commands();
        if candidates.is_empty() {
            return Ok(vec![]);
        }

        let query_vec = self
            .embedder
            .embed(query)
            .await
            .map_err(|e| AppError::channel(channel.as_str(), e))?;
        let texts: Vec<String> = candidates.iter().map(|e| e.command.clone()).collect();
        let vectors = self
            .embedder
            .embed_batch(&texts)
            .await
            .map_err(|e| AppError::channel(channel.as_str(), e))?;

        let mut scored: Vec<(f32, HistoryEntry)> = candidates
            .into_iter()
            .zip(vectors.iter())
            .map(|(entry, vec)| (cosine_similarity(&query_vec, vec), entry))
            .filter(|(score, _)| *score >= self.min_similarity)
            .collect();

        rank_desc(&mut scored);
        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(score, entry)| entry.to_ranked(score, channel))
            .collect())
    }

    fn channel(&self) -> Channel {
        Channel::Semantic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use shellforge_common::embeddings::HashingEmbedder;

    fn store() -> Arc<HistoryStore> {
        let base = Utc::now() - Duration::hours(1);
        let entries = vec![
            HistoryEntry::new("sudo ufw enable", Some("/etc".into()), base, Some(0)),
            HistoryEntry::new("sudo apt install nginx", Some("/home/dev".into()), base + Duration::minutes(1), Some(0)),
            HistoryEntry::new("git status", Some("/home/dev/app".into()), base + Duration::minutes(2), Some(0)),
            HistoryEntry::new("sudo ufw enable", Some("/etc".into()), base + Duration::minutes(3), Some(1)),
        ];
        Arc::new(HistoryStore::from_entries(entries))
    }

    #[test]
    fn test_unique_commands_newest_first() {
        let unique = store().unique_commands();
        assert_eq!(unique.len(), 3);
        assert_eq!(unique[0].command, "sudo ufw enable");
        assert_eq!(unique[0].exit_code, Some(1));
    }

    #[test]
    fn test_recent_and_push() {
        let store = store();
        store.push(HistoryEntry::new("ls", None, Utc::now(), Some(0)));
        let recent = store.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[1].command, "ls");
        assert_eq!(store.recent(100).len(), 5);
    }

    #[tokio::test]
    async fn test_keyword_overlap() {
        let provider = KeywordProvider::new(store());
        let results = provider.search(Channel::Keyword, "install nginx", 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].payload.text, "sudo apt install nginx");
        assert_eq!(results[0].score, 1.0);
        assert_eq!(results[0].channel, Channel::Keyword);
    }

    #[tokio::test]
    async fn test_keyword_prefix_terms() {
        let provider = KeywordProvider::new(store());
        let results = provider.search(Channel::Keyword, "stat*", 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].payload.text, "git status");
    }

    #[tokio::test]
    async fn test_semantic_ids_match_keyword_ids() {
        let store = store();
        let keyword = KeywordProvider::new(store.clone());
        let semantic = SemanticProvider::new(store, Arc::new(HashingEmbedder::default()));

        let k = keyword.search(Channel::Keyword, "ufw enable", 5).await.unwrap();
        let s = semantic.search(Channel::Semantic, "ufw enable", 5).await.unwrap();
        assert_eq!(k[0].id, s[0].id);
        assert!(s[0].score > 0.5);
    }

    #[test]
    fn test_empty_query_and_zero_limit() {
        let provider = KeywordProvider::new(store());
        let empty = tokio_test::block_on(provider.search(Channel::Keyword, "   ", 10)).unwrap();
        let zero = tokio_test::block_on(provider.search(Channel::Keyword, "ufw", 0)).unwrap();
        assert!(empty.is_empty());
        assert!(zero.is_empty());
    }

    #[test]
    fn test_load_json_rejects_malformed_history() {
        let path = std::env::temp_dir().join(format!("shellforge-history-{}.json", Uuid::new_v4()));
        std::fs::write(&path, r#"[{"command": "ls"#).unwrap();
        let err = HistoryStore::load_json(&path).unwrap_err();
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(err, AppError::InvalidFormat { .. }));

        let good = std::env::temp_dir().join(format!("shellforge-history-{}.json", Uuid::new_v4()));
        std::fs::write(&good, r#"[{"command":"ls -la","timestamp":"2026-01-01T00:00:00Z"}]"#).unwrap();
        let store = HistoryStore::load_json(&good).unwrap();
        std::fs::remove_file(&good).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_json_round_trip_defaults() {
        let raw = r#"[{"command":"ls -la","timestamp":"2026-01-01T00:00:00Z"}]"#;
        let entries: Vec<HistoryEntry> = serde_json::from_str(raw).unwrap();
        assert!(!entries[0].id.is_empty());
        assert_eq!(entries[0].success(), None);
    }
}
