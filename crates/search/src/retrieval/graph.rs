//! Command transition graph
//!
//! Nodes are distinct commands; an edge `a -> b` counts how often `b` was run
//! right after `a` in the same session. The graph channel answers a query
//! with the commands that usually follow the ones matching it.

use super::history::{HistoryEntry, HistoryStore};
use super::{Channel, RankedResult, SearchProvider};
use chrono::Duration;
use indexmap::IndexMap;
use shellforge_common::context::keywords;
use shellforge_common::context::tokenize;
use shellforge_common::errors::Result;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

/// In-memory transition graph
#[derive(Debug, Default)]
pub struct CommandGraph {
    /// Adjacency list: command -> (next command -> count)
    outgoing: HashMap<String, IndexMap<String, u32>>,

    /// Reverse adjacency: command -> commands that precede it
    incoming: HashMap<String, Vec<String>>,

    /// Latest entry per command, in first-seen order
    nodes: IndexMap<String, HistoryEntry>,
}

impl CommandGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from entries in execution order. Consecutive commands further
    /// apart than `max_gap` are not linked.
    pub fn from_history(entries: &[HistoryEntry], max_gap: Duration) -> Self {
        let mut graph = Self::new();
        for entry in entries {
            graph.nodes.insert(entry.command.trim().to_string(), entry.clone());
        }
        for pair in entries.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            if next.timestamp - prev.timestamp <= max_gap {
                graph.add_edge(prev.command.trim(), next.command.trim());
            }
        }
        graph
    }

    /// Add or strengthen an edge. Self-loops are ignored.
    pub fn add_edge(&mut self, from: &str, to: &str) {
        if from == to {
            return;
        }
        let counts = self.outgoing.entry(from.to_string()).or_default();
        let count = counts.entry(to.to_string()).or_insert(0);
        if *count == 0 {
            self.incoming.entry(to.to_string()).or_default().push(from.to_string());
        }
        *count += 1;
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.outgoing.values().map(|m| m.len()).sum()
    }

    pub fn out_degree(&self, command: &str) -> usize {
        self.outgoing.get(command).map(|m| m.len()).unwrap_or(0)
    }

    pub fn in_degree(&self, command: &str) -> usize {
        self.incoming.get(command).map(|v| v.len()).unwrap_or(0)
    }

    /// Transition probabilities out of `command`
    pub fn successors(&self, command: &str) -> Vec<(&str, f32)> {
        let Some(counts) = self.outgoing.get(command) else {
            return vec![];
        };
        let total: u32 = counts.values().sum();
        counts
            .iter()
            .map(|(next, count)| (next.as_str(), *count as f32 / total as f32))
            .collect()
    }

    /// Score commands reachable in one step from those matching `terms`.
    /// Seeds score by term overlap, neighbours by seed score times
    /// transition probability, summed over seeds.
    pub fn related(&self, terms: &[String]) -> Vec<(&HistoryEntry, f32)> {
        if terms.is_empty() {
            return vec![];
        }

        let mut scores: IndexMap<&str, f32> = IndexMap::new();
        for command in self.nodes.keys() {
            let tokens = tokenize(command);
            let overlap = terms.iter().filter(|t| tokens.contains(t)).count();
            if overlap == 0 {
                continue;
            }
            let seed_score = overlap as f32 / terms.len() as f32;
            for (next, probability) in self.successors(command) {
                *scores.entry(next).or_insert(0.0) += seed_score * probability;
            }
        }

        let mut related: Vec<(&HistoryEntry, f32)> = scores
            .into_iter()
            .filter_map(|(command, score)| self.nodes.get(command).map(|e| (e, score)))
            .collect();
        related.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        related
    }
}

/// Graph channel over the command history
pub struct GraphProvider {
    store: Arc<HistoryStore>,
    max_gap: Duration,
}

impl GraphProvider {
    pub fn new(store: Arc<HistoryStore>) -> Self {
        Self {
            store,
            max_gap: Duration::minutes(10),
        }
    }

    pub fn with_max_gap(mut self, max_gap: Duration) -> Self {
        self.max_gap = max_gap;
        self
    }
}

#[async_trait::async_trait]
impl SearchProvider for GraphProvider {
    async fn search(&self, channel: Channel, query: &str, limit: usize) -> Result<Vec<RankedResult>> {
        let terms = keywords(query);
        if terms.is_empty() || limit == 0 {
            return Ok(vec![]);
        }

        let graph = CommandGraph::from_history(&self.store.snapshot(), self.max_gap);
        Ok(graph
            .related(&terms)
            .into_iter()
            .take(limit)
            .map(|(entry, score)| entry.to_ranked(score, channel))
            .collect())
    }

    fn channel(&self) -> Channel {
        Channel::Graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn session() -> Vec<HistoryEntry> {
        let t0 = Utc::now() - Duration::hours(2);
        let at = |mins: i64, cmd: &str| HistoryEntry::new(cmd, None, t0 + Duration::minutes(mins), Some(0));
        vec![
            at(0, "git add ."),
            at(1, "git commit -m wip"),
            at(2, "git push"),
            at(3, "git add ."),
            at(4, "git commit -m fix"),
            at(60, "cargo test"),
        ]
    }

    #[test]
    fn test_build_graph() {
        let graph = CommandGraph::from_history(&session(), Duration::minutes(10));
        assert_eq!(graph.node_count(), 5);
        assert_eq!(graph.out_degree("git add ."), 2);
        assert_eq!(graph.in_degree("git add ."), 1);
        // 56 minute gap: no edge into cargo test
        assert_eq!(graph.in_degree("cargo test"), 0);
        assert_eq!(graph.edge_count(), 4);
    }

    #[test]
    fn test_successor_probabilities() {
        let graph = CommandGraph::from_history(&session(), Duration::minutes(10));
        let succ = graph.successors("git add .");
        let total: f32 = succ.iter().map(|(_, p)| p).sum();
        assert!((total - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_graph_provider_returns_followups() {
        let store = Arc::new(HistoryStore::from_entries(session()));
        let provider = GraphProvider::new(store);
        let results = provider.search(Channel::Graph, "push", 5).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].payload.text, "git add .");
        assert_eq!(results[0].channel, Channel::Graph);
    }
}
