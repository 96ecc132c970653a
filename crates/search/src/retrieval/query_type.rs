//! Query-type detection and adaptive channel weights

use serde::{Deserialize, Serialize};
use shellforge_common::config::{ChannelWeights, QueryTypeWeights, RrfConfig};
use shellforge_common::context::{is_stopword, tokenize};
use std::collections::HashMap;
use std::fmt;

/// Coarse query classification driving channel weights
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    /// Looking for a fact or definition
    Factual,
    /// Looking for steps
    Procedural,
    /// Looking for understanding
    Conceptual,
    /// Looking for a command
    Command,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Factual => "factual",
            QueryType::Procedural => "procedural",
            QueryType::Conceptual => "conceptual",
            QueryType::Command => "command",
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const FACTUAL_PATTERNS: &[&str] = &["what is", "what are", "explain", "define", "difference between", "meaning of"];
const PROCEDURAL_PATTERNS: &[&str] = &["how to", "how do", "configure", "install", "setup", "set up", "steps to"];
const CONCEPTUAL_PATTERNS: &[&str] = &["understand", "learn", "overview of", "concept of", "why does"];

const COMMAND_KEYWORDS: &[&str] = &[
    "ls", "cd", "cp", "mv", "rm", "mkdir", "cat", "grep", "find", "sed", "awk", "tar",
    "chmod", "chown", "ps", "kill", "top", "df", "du", "ssh", "scp", "curl", "wget",
    "git", "docker", "kubectl", "sudo", "apt", "brew", "systemctl", "make", "cargo",
];

const ACTION_WORDS: &[&str] = &[
    "create", "delete", "remove", "install", "run", "start", "stop", "copy", "move",
    "list", "find", "build", "deploy", "update", "restart",
];
const TROUBLESHOOTING_WORDS: &[&str] = &[
    "error", "fail", "failed", "failing", "broken", "fix", "debug", "issue", "crash",
    "denied", "refused", "missing", "timeout",
];
const LEARNING_WORDS: &[&str] = &[
    "learn", "understand", "explain", "tutorial", "example", "guide", "meaning", "why",
];

fn contains_phrase(padded: &str, pattern: &str) -> bool {
    padded.contains(&format!(" {} ", pattern))
}

/// Classify a query. Rules are checked in order: factual, procedural,
/// conceptual, command; anything else is factual.
pub fn detect_query_type(query: &str) -> QueryType {
    let tokens = tokenize(query);
    let padded = format!(" {} ", tokens.join(" "));

    if FACTUAL_PATTERNS.iter().any(|p| contains_phrase(&padded, p)) {
        return QueryType::Factual;
    }
    if PROCEDURAL_PATTERNS.iter().any(|p| contains_phrase(&padded, p)) {
        return QueryType::Procedural;
    }
    if CONCEPTUAL_PATTERNS.iter().any(|p| contains_phrase(&padded, p)) {
        return QueryType::Conceptual;
    }
    if tokens.iter().any(|t| COMMAND_KEYWORDS.contains(&t.as_str())) {
        return QueryType::Command;
    }
    QueryType::Factual
}

/// Configured weights for a query type, normalized
pub fn weights_for(query_type: QueryType, table: &QueryTypeWeights) -> ChannelWeights {
    let weights = match query_type {
        QueryType::Factual => table.factual,
        QueryType::Procedural => table.procedural,
        QueryType::Conceptual => table.conceptual,
        QueryType::Command => table.command,
    };
    weights.normalized()
}

/// Detected type and the weights to fuse with. Static weights are used when
/// adaptive mode is off.
pub fn select_weights(query: &str, rrf: &RrfConfig, table: &QueryTypeWeights) -> (QueryType, ChannelWeights) {
    let query_type = detect_query_type(query);
    let weights = if rrf.adaptive {
        weights_for(query_type, table)
    } else {
        rrf.static_weights.normalized()
    };
    (query_type, weights)
}

/// Coarse intent buckets for content words
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    Action,
    Troubleshooting,
    Learning,
}

/// Term-level description of a query
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryAnalysis {
    /// Content words in query order
    pub keywords: Vec<String>,

    /// Intent buckets and the words that put the query there
    pub intents: Vec<(QueryIntent, Vec<String>)>,

    /// Up to five most frequent content words
    pub top_terms: Vec<(String, usize)>,
}

/// Tokenize, drop stopwords, bucket words by intent and count the top terms.
/// Descriptive only; scoring ignores it.
pub fn analyze_query_terms(query: &str) -> QueryAnalysis {
    let keywords: Vec<String> = tokenize(query).into_iter().filter(|t| !is_stopword(t)).collect();

    let mut intents = Vec::new();
    for (intent, words) in [
        (QueryIntent::Action, ACTION_WORDS),
        (QueryIntent::Troubleshooting, TROUBLESHOOTING_WORDS),
        (QueryIntent::Learning, LEARNING_WORDS),
    ] {
        let matched: Vec<String> = keywords.iter().filter(|k| words.contains(&k.as_str())).cloned().collect();
        if !matched.is_empty() {
            intents.push((intent, matched));
        }
    }

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for k in &keywords {
        *counts.entry(k.as_str()).or_insert(0) += 1;
    }
    let mut top_terms: Vec<(String, usize)> = counts.into_iter().map(|(k, c)| (k.to_string(), c)).collect();
    // Count desc, then alphabetical so output is deterministic
    top_terms.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    top_terms.truncate(5);

    QueryAnalysis {
        keywords,
        intents,
        top_terms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection_order() {
        assert_eq!(detect_query_type("what is a symlink"), QueryType::Factual);
        assert_eq!(detect_query_type("explain how to install nginx"), QueryType::Factual);
        assert_eq!(detect_query_type("how to install nginx"), QueryType::Procedural);
        assert_eq!(detect_query_type("install firewall"), QueryType::Procedural);
        assert_eq!(detect_query_type("understand git rebase"), QueryType::Conceptual);
        assert_eq!(detect_query_type("git log oneline"), QueryType::Command);
        assert_eq!(detect_query_type("weather tomorrow"), QueryType::Factual);
        assert_eq!(detect_query_type(""), QueryType::Factual);
    }

    #[test]
    fn test_patterns_respect_word_boundaries() {
        // "reinstall" must not trigger the procedural "install" rule
        assert_eq!(detect_query_type("reinstall"), QueryType::Factual);
    }

    #[test]
    fn test_default_weights() {
        let table = QueryTypeWeights::default();
        let w = weights_for(QueryType::Command, &table);
        assert!((w.keyword - 0.6).abs() < 1e-9);
        assert!((w.semantic - 0.3).abs() < 1e-9);
        assert!((w.graph - 0.1).abs() < 1e-9);
        for qt in [QueryType::Factual, QueryType::Procedural, QueryType::Conceptual, QueryType::Command] {
            assert!((weights_for(qt, &table).sum() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_overrides_are_normalized() {
        let table = QueryTypeWeights {
            command: ChannelWeights::new(6.0, 3.0, 1.0),
            ..Default::default()
        };
        let w = weights_for(QueryType::Command, &table);
        assert!((w.keyword - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_static_weights_when_not_adaptive() {
        let rrf = RrfConfig {
            adaptive: false,
            ..Default::default()
        };
        let (qt, w) = select_weights("git status", &rrf, &QueryTypeWeights::default());
        assert_eq!(qt, QueryType::Command);
        assert!((w.keyword - 0.4).abs() < 1e-9);
        assert!((w.graph - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_analyze_query_terms() {
        let analysis = analyze_query_terms("fix docker error: docker build failed with permission denied");
        assert!(!analysis.keywords.contains(&"with".to_string()));
        assert_eq!(analysis.top_terms[0], ("docker".to_string(), 2));
        assert!(analysis.top_terms.len() <= 5);

        let buckets: Vec<QueryIntent> = analysis.intents.iter().map(|(i, _)| *i).collect();
        assert!(buckets.contains(&QueryIntent::Action));
        assert!(buckets.contains(&QueryIntent::Troubleshooting));
        assert!(!buckets.contains(&QueryIntent::Learning));
    }
}
