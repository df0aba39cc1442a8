//! Recency / Frequency / Monetary quintile scoring.

use crate::features::UserFeatures;
use crate::rules::{DecisionTable, RfmScores};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Rank-based quintile scale fitted on a population.
///
/// A value scores `1 + floor(5 * r / n)` where `r` counts population values
/// strictly below it, so tied values share the lowest score of their run.
#[derive(Debug, Clone, PartialEq)]
pub struct QuintileScale {
    sorted: Vec<f64>,
}

impl QuintileScale {
    /// `None` for an empty population.
    pub fn fit(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        Some(Self { sorted })
    }

    pub fn score(&self, value: f64) -> u8 {
        let below = self.sorted.partition_point(|v| *v < value);
        let score = 1 + (5 * below) / self.sorted.len();
        score.min(5) as u8
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RfmScore {
    pub user_id: String,
    pub recency_days: Option<i64>,
    pub frequency_count: u64,
    pub monetary_total: f64,
    pub recency_score: Option<u8>,
    pub frequency_score: Option<u8>,
    pub monetary_score: Option<u8>,
    pub segment_label: String,
}

impl RfmScore {
    pub fn scores(&self) -> Option<RfmScores> {
        Some(RfmScores::new(
            self.recency_score?,
            self.frequency_score?,
            self.monetary_score?,
        ))
    }

    pub fn is_scored(&self) -> bool {
        self.scores().is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentSummary {
    pub segment_label: String,
    pub customers: u64,
    pub share: f64,
    pub avg_recency_days: Option<f64>,
    pub avg_frequency: f64,
    pub avg_monetary: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RfmResult {
    pub scores: Vec<RfmScore>,
    pub segments: Vec<SegmentSummary>,
    pub scored_users: u64,
    pub unscored_users: u64,
}

impl RfmResult {
    pub fn label_of(&self, user_id: &str) -> Option<&str> {
        self.scores
            .iter()
            .find(|s| s.user_id == user_id)
            .map(|s| s.segment_label.as_str())
    }

    /// Share of scored purchasers carrying `label`; `None` with no purchasers.
    pub fn share_of(&self, label: &str) -> Option<f64> {
        if self.scored_users == 0 {
            return None;
        }
        let matching = self
            .scores
            .iter()
            .filter(|s| s.is_scored() && s.segment_label == label)
            .count();
        Some(matching as f64 / self.scored_users as f64)
    }
}

/// Scores purchasers on quintiles of their own population and labels
/// everyone through `table`. Users without purchases get no scores and the
/// table's no-purchase label.
pub fn score_population(features: &[UserFeatures], table: &DecisionTable) -> RfmResult {
    let purchasers: Vec<&UserFeatures> = features.iter().filter(|f| f.has_purchases()).collect();

    // Recency is scored on negated days so recent buyers rank high.
    let recency_of = |f: &UserFeatures| -(f.recency_days.unwrap_or(0) as f64);
    let scales = (
        QuintileScale::fit(&purchasers.iter().map(|&f| recency_of(f)).collect::<Vec<_>>()),
        QuintileScale::fit(
            &purchasers
                .iter()
                .map(|f| f.frequency_count as f64)
                .collect::<Vec<_>>(),
        ),
        QuintileScale::fit(&purchasers.iter().map(|f| f.monetary_total).collect::<Vec<_>>()),
    );

    let scores: Vec<RfmScore> = features
        .iter()
        .map(|f| {
            let triple = match (&scales, f.has_purchases()) {
                ((Some(r), Some(fr), Some(m)), true) => Some(RfmScores::new(
                    r.score(recency_of(f)),
                    fr.score(f.frequency_count as f64),
                    m.score(f.monetary_total),
                )),
                _ => None,
            };
            let segment_label = match triple.as_ref().and_then(|t| table.classify(t)) {
                Some(label) => label.to_string(),
                None => table.no_purchase_label.clone(),
            };
            RfmScore {
                user_id: f.user_id.clone(),
                recency_days: f.recency_days,
                frequency_count: f.frequency_count,
                monetary_total: f.monetary_total,
                recency_score: triple.map(|t| t.recency),
                frequency_score: triple.map(|t| t.frequency),
                monetary_score: triple.map(|t| t.monetary),
                segment_label,
            }
        })
        .collect();

    let scored_users = scores.iter().filter(|s| s.is_scored()).count() as u64;
    debug!(
        scored = scored_users,
        unscored = scores.len() as u64 - scored_users,
        "RFM scores assigned"
    );

    RfmResult {
        segments: segment_summary(&scores),
        unscored_users: scores.len() as u64 - scored_users,
        scored_users,
        scores,
    }
}

/// Per-label counts and mean raw RFM values, largest segment first.
pub fn segment_summary(scores: &[RfmScore]) -> Vec<SegmentSummary> {
    #[derive(Default)]
    struct Acc {
        customers: u64,
        recency_sum: f64,
        recency_n: u64,
        frequency_sum: f64,
        monetary_sum: f64,
    }

    let mut by_label: BTreeMap<&str, Acc> = BTreeMap::new();
    for score in scores {
        let acc = by_label.entry(score.segment_label.as_str()).or_default();
        acc.customers += 1;
        if let Some(days) = score.recency_days {
            acc.recency_sum += days as f64;
            acc.recency_n += 1;
        }
        acc.frequency_sum += score.frequency_count as f64;
        acc.monetary_sum += score.monetary_total;
    }

    let total = scores.len().max(1) as f64;
    let mut summary: Vec<SegmentSummary> = by_label
        .into_iter()
        .map(|(label, acc)| {
            let n = acc.customers as f64;
            SegmentSummary {
                segment_label: label.to_string(),
                customers: acc.customers,
                share: n / total,
                avg_recency_days: (acc.recency_n > 0)
                    .then(|| acc.recency_sum / acc.recency_n as f64),
                avg_frequency: acc.frequency_sum / n,
                avg_monetary: acc.monetary_sum / n,
            }
        })
        .collect();
    summary.sort_by(|a, b| b.customers.cmp(&a.customers));
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{AT_RISK, CHAMPIONS, LOST, NO_PURCHASE_HISTORY};

    fn purchaser(id: &str, recency: i64, frequency: u64, monetary: f64) -> UserFeatures {
        UserFeatures {
            user_id: id.into(),
            last_purchase: None,
            recency_days: Some(recency),
            frequency_count: frequency,
            monetary_total: monetary,
            purchase_count: frequency,
            product_views: 0,
            sessions: frequency,
            events: frequency,
            distinct_products: 1,
            category_diversity: 1,
            avg_session_minutes: 0.0,
            view_to_purchase_ratio: 0.0,
        }
    }

    fn browser(id: &str) -> UserFeatures {
        UserFeatures {
            purchase_count: 0,
            frequency_count: 0,
            monetary_total: 0.0,
            recency_days: None,
            ..purchaser(id, 0, 0, 0.0)
        }
    }

    #[test]
    fn test_quintiles_are_uniform_without_ties() {
        for n in [5usize, 7, 10, 23, 100] {
            let values: Vec<f64> = (0..n).map(|i| i as f64 * 1.5).collect();
            let scale = QuintileScale::fit(&values).unwrap();
            let mut counts = [0usize; 5];
            for v in &values {
                counts[(scale.score(*v) - 1) as usize] += 1;
            }
            let expected = n as f64 / 5.0;
            for c in counts {
                assert!((c as f64 - expected).abs() <= 1.0, "n={n} counts={counts:?}");
            }
        }
    }

    #[test]
    fn test_ties_share_lowest_score() {
        let scale = QuintileScale::fit(&[1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
        assert_eq!(scale.score(1.0), 1);
        assert_eq!(scale.score(2.0), 4);
        assert_eq!(scale.score(5.0), 5);
        assert!(QuintileScale::fit(&[]).is_none());
    }

    #[test]
    fn test_score_steps_on_even_population() {
        let values: Vec<f64> = (1..=10).map(f64::from).collect();
        let scale = QuintileScale::fit(&values).unwrap();
        let scores: Vec<u8> = values.iter().map(|&v| scale.score(v)).collect();
        assert_eq!(scores, vec![1, 1, 2, 2, 3, 3, 4, 4, 5, 5]);
    }

    #[test]
    fn test_scores_in_range_and_labeled() {
        let features: Vec<UserFeatures> = (0..20)
            .map(|i| purchaser(&format!("u{i:02}"), 40 - i as i64 * 2, 1 + i as u64 / 3, 10.0 * i as f64))
            .collect();
        let result = score_population(&features, &DecisionTable::default());

        assert_eq!(result.scored_users, 20);
        for score in &result.scores {
            let triple = score.scores().unwrap();
            for s in [triple.recency, triple.frequency, triple.monetary] {
                assert!((1..=5).contains(&s));
            }
            assert_ne!(score.segment_label, NO_PURCHASE_HISTORY);
        }
        // Most recent, most frequent, highest spender.
        assert_eq!(result.label_of("u19"), Some(CHAMPIONS));
        // Stale, infrequent, cheap.
        assert_eq!(result.label_of("u00"), Some(LOST));
    }

    #[test]
    fn test_non_purchasers_unscored() {
        let features = vec![
            purchaser("a", 1, 3, 300.0),
            browser("b"),
            purchaser("c", 30, 1, 10.0),
        ];
        let result = score_population(&features, &DecisionTable::default());

        let b = &result.scores[1];
        assert_eq!(b.recency_score, None);
        assert_eq!(b.frequency_score, None);
        assert_eq!(b.monetary_score, None);
        assert_eq!(b.segment_label, NO_PURCHASE_HISTORY);
        assert_eq!(result.scored_users, 2);
        assert_eq!(result.unscored_users, 1);
    }

    #[test]
    fn test_no_purchasers_at_all() {
        let result = score_population(&[browser("x"), browser("y")], &DecisionTable::default());
        assert!(result.scores.iter().all(|s| !s.is_scored()));
        assert_eq!(result.share_of(AT_RISK), None);
        assert_eq!(result.segments.len(), 1);
        assert_eq!(result.segments[0].customers, 2);
        assert_eq!(result.segments[0].avg_recency_days, None);
    }

    #[test]
    fn test_segment_summary() {
        let features = vec![
            purchaser("a", 2, 4, 400.0),
            purchaser("b", 4, 2, 200.0),
            browser("c"),
        ];
        let result = score_population(&features, &DecisionTable::default());
        let total: u64 = result.segments.iter().map(|s| s.customers).sum();
        assert_eq!(total, 3);
        let share: f64 = result.segments.iter().map(|s| s.share).sum();
        assert!((share - 1.0).abs() < 1e-9);
    }
}
