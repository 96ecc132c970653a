//! Reciprocal Rank Fusion (RRF) for combining channel results
//!
//! RRF is a simple but effective fusion method that:
//! - Doesn't require score normalization
//! - Works well with different scoring distributions
//! - Rewards items that several channels agree on
//!
//! An item at 1-based rank `r` in a list with weight `w` contributes
//! `w / (k + r)`. Contributions are summed over every list containing it.

use super::{FusedResult, RankedList, RankedResult};
use indexmap::IndexMap;
use shellforge_common::config::{AppConfig, BoostField, BoostSetting, ChannelWeights};
use std::cmp::Ordering;
use std::collections::HashSet;
use tracing::debug;

/// RRF fusion parameters
#[derive(Debug, Clone)]
pub struct RankFuser {
    /// Constant k (typically 60)
    pub k: f64,

    /// Post-fusion payload boosts
    pub boosts: Vec<BoostSetting>,
}

impl Default for RankFuser {
    fn default() -> Self {
        Self {
            k: 60.0,
            boosts: Vec::new(),
        }
    }
}

/// Drop repeated ids, keeping the first (best ranked) occurrence
pub fn deduplicate(results: Vec<RankedResult>) -> Vec<RankedResult> {
    let mut seen = HashSet::new();
    results.into_iter().filter(|r| seen.insert(r.id.clone())).collect()
}

fn boost_applies(field: BoostField, result: &FusedResult) -> bool {
    match field {
        BoostField::Successful => result.payload.success == Some(true),
        BoostField::HasDirectory => result.payload.cwd.as_deref().is_some_and(|c| !c.is_empty()),
        BoostField::HasTimestamp => result.payload.timestamp.is_some(),
    }
}

fn by_score_desc(a: f64, b: f64) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

impl RankFuser {
    pub fn new(k: f64) -> Self {
        Self {
            k,
            ..Default::default()
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            k: config.rrf.k,
            boosts: config.fusion.boosts.clone(),
        }
    }

    pub fn with_boosts(mut self, boosts: Vec<BoostSetting>) -> Self {
        self.boosts = boosts;
        self
    }

    /// Fuse channel lists. `weights` are normalized to sum 1.0 first; a
    /// channel with no list contributes nothing and its weight is not
    /// redistributed. Ties keep first-appearance order.
    pub fn fuse(&self, lists: &[RankedList], weights: ChannelWeights) -> Vec<FusedResult> {
        let weights = weights.normalized();
        let mut fused: IndexMap<String, FusedResult> = IndexMap::new();

        for list in lists {
            let weight = list.channel.weight(&weights);
            let mut seen_in_list = HashSet::new();
            let mut rank = 0;

            for result in &list.results {
                if !seen_in_list.insert(result.id.as_str()) {
                    continue;
                }
                rank += 1;
                let contribution = weight / (self.k + rank as f64);

                fused
                    .entry(result.id.clone())
                    .and_modify(|f| {
                        f.rrf_score += contribution;
                        f.ranks.push((list.channel, rank));
                    })
                    .or_insert_with(|| FusedResult {
                        id: result.id.clone(),
                        rrf_score: contribution,
                        boosted_score: 0.0,
                        payload: result.payload.clone(),
                        channel: list.channel,
                        ranks: vec![(list.channel, rank)],
                    });
            }
        }

        let mut results: Vec<FusedResult> = fused
            .into_values()
            .map(|mut f| {
                f.boosted_score = f.rrf_score;
                f
            })
            .collect();

        // Stable sort: equal scores keep insertion order
        results.sort_by(|a, b| by_score_desc(a.rrf_score, b.rrf_score));

        debug!(
            lists = lists.len(),
            results = results.len(),
            k = self.k,
            "Fused ranked lists"
        );
        results
    }

    /// Multiply scores by every boost whose payload field is truthy and
    /// re-sort (stable).
    pub fn apply_boosts(&self, mut results: Vec<FusedResult>) -> Vec<FusedResult> {
        if self.boosts.is_empty() {
            return results;
        }

        for result in &mut results {
            let factor: f64 = self
                .boosts
                .iter()
                .filter(|b| boost_applies(b.field, result))
                .map(|b| b.factor)
                .product();
            result.boosted_score = result.rrf_score * factor;
        }

        results.sort_by(|a, b| by_score_desc(a.boosted_score, b.boosted_score));
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::{Channel, ResultPayload};
    use proptest::prelude::*;

    fn item(id: &str, channel: Channel) -> RankedResult {
        RankedResult {
            id: id.to_string(),
            payload: ResultPayload::text(id),
            score: 1.0,
            channel,
        }
    }

    fn list(channel: Channel, ids: &[&str]) -> RankedList {
        RankedList::new(channel, ids.iter().map(|id| item(id, channel)).collect())
    }

    fn ids(results: &[FusedResult]) -> Vec<&str> {
        results.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn test_three_list_example() {
        let fuser = RankFuser::default();
        let lists = vec![
            list(Channel::Keyword, &["A", "B", "C"]),
            list(Channel::Semantic, &["B", "A", "D"]),
            list(Channel::Graph, &["C", "D"]),
        ];
        let results = fuser.fuse(&lists, ChannelWeights::new(0.5, 0.3, 0.2));

        assert_eq!(ids(&results), vec!["A", "B", "C", "D"]);
        let expected = [
            0.5 / 61.0 + 0.3 / 62.0,
            0.5 / 62.0 + 0.3 / 61.0,
            0.5 / 63.0 + 0.2 / 61.0,
            0.3 / 63.0 + 0.2 / 62.0,
        ];
        for (result, want) in results.iter().zip(expected) {
            assert!((result.rrf_score - want).abs() < 1e-12);
        }
        assert_eq!(results[2].ranks, vec![(Channel::Keyword, 3), (Channel::Graph, 1)]);
        assert_eq!(results[3].channel, Channel::Semantic);
    }

    #[test]
    fn test_single_list_identity() {
        let fuser = RankFuser::default();
        let results = fuser.fuse(&[list(Channel::Semantic, &["x", "y", "z"])], ChannelWeights::new(0.2, 0.5, 0.3));
        assert_eq!(ids(&results), vec!["x", "y", "z"]);
    }

    #[test]
    fn test_missing_channel_weight_not_redistributed() {
        let fuser = RankFuser::default();
        let results = fuser.fuse(&[list(Channel::Keyword, &["a"])], ChannelWeights::new(0.5, 0.3, 0.2));
        assert!((results[0].rrf_score - 0.5 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn test_ties_break_by_first_appearance() {
        let fuser = RankFuser::default();
        let lists = vec![list(Channel::Keyword, &["p"]), list(Channel::Semantic, &["q"])];
        let results = fuser.fuse(&lists, ChannelWeights::new(0.5, 0.5, 0.0));
        assert_eq!(ids(&results), vec!["p", "q"]);
    }

    #[test]
    fn test_duplicates_within_a_list_count_once() {
        let fuser = RankFuser::default();
        let results = fuser.fuse(&[list(Channel::Keyword, &["a", "a", "b"])], ChannelWeights::new(1.0, 0.0, 0.0));
        assert_eq!(results.len(), 2);
        assert!((results[1].rrf_score - 1.0 / 62.0).abs() < 1e-12);
    }

    #[test]
    fn test_deduplicate_keeps_first() {
        let mut second = item("a", Channel::Keyword);
        second.score = 0.1;
        let out = deduplicate(vec![item("a", Channel::Keyword), item("b", Channel::Keyword), second]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].score, 1.0);
    }

    #[test]
    fn test_boosts_reorder() {
        let fuser = RankFuser::default().with_boosts(vec![BoostSetting {
            field: BoostField::Successful,
            factor: 1.5,
        }]);
        let mut lists = vec![list(Channel::Keyword, &["failed", "worked"])];
        lists[0].results[1].payload.success = Some(true);
        lists[0].results[0].payload.success = Some(false);

        let fused = fuser.fuse(&lists, ChannelWeights::new(1.0, 0.0, 0.0));
        assert_eq!(ids(&fused), vec!["failed", "worked"]);

        let boosted = fuser.apply_boosts(fused);
        assert_eq!(ids(&boosted), vec!["worked", "failed"]);
        assert!((boosted[0].boosted_score - 1.5 / 62.0).abs() < 1e-12);
        assert!((boosted[1].boosted_score - boosted[1].rrf_score).abs() < 1e-12);
    }

    #[test]
    fn test_empty_input() {
        let fuser = RankFuser::default();
        assert!(fuser.fuse(&[], ChannelWeights::new(0.5, 0.3, 0.2)).is_empty());
        assert!(fuser.fuse(&[RankedList::new(Channel::Graph, vec![])], ChannelWeights::new(0.5, 0.3, 0.2)).is_empty());
    }

    fn arb_list() -> impl Strategy<Value = Vec<u8>> {
        prop::collection::vec(0u8..12, 0..10)
    }

    proptest! {
        #[test]
        fn prop_fusion_is_deterministic(kw in arb_list(), sem in arb_list(), gr in arb_list()) {
            let make = |channel: Channel, raw: &[u8]| RankedList::new(
                channel,
                raw.iter().map(|n| item(&format!("id{}", n), channel)).collect(),
            );
            let lists = vec![make(Channel::Keyword, &kw), make(Channel::Semantic, &sem), make(Channel::Graph, &gr)];
            let fuser = RankFuser::default();
            let weights = ChannelWeights::new(0.5, 0.3, 0.2);

            let first = fuser.fuse(&lists, weights);
            let second = fuser.fuse(&lists, weights);
            prop_assert_eq!(&first, &second);

            let unique: HashSet<&str> = first.iter().map(|r| r.id.as_str()).collect();
            prop_assert_eq!(unique.len(), first.len());
            for pair in first.windows(2) {
                prop_assert!(pair[0].rrf_score >= pair[1].rrf_score);
            }
        }

        #[test]
        fn prop_normalized_weights_sum_to_one(a in 0.0f64..10.0, b in 0.0f64..10.0, c in 0.0f64..10.0) {
            let w = ChannelWeights::new(a, b, c).normalized();
            prop_assert!((w.sum() - 1.0).abs() < 1e-9);
        }

        #[test]
        fn prop_normalized_weights_sum_to_one_at_any_scale(
            a in 0.0f64..f64::MAX,
            b in 0.0f64..f64::MAX,
            c in 0.0f64..f64::MAX,
        ) {
            let w = ChannelWeights::new(a, b, c).normalized();
            prop_assert!((w.sum() - 1.0).abs() < 1e-9);
        }
    }
}
