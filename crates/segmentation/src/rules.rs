//! Score predicates and the ordered decision table that maps RFM score
//! triples to segment labels.

use serde::{Deserialize, Serialize};
use storefront_core::{AnalyticsError, AnalyticsResult};

pub const CHAMPIONS: &str = "Champions";
pub const LOYAL: &str = "Loyal";
pub const AT_RISK: &str = "At Risk";
pub const CANT_LOSE: &str = "Can't Lose";
pub const LOST: &str = "Lost";
pub const NO_PURCHASE_HISTORY: &str = "No Purchase History";

/// Quintile scores of one purchaser, each in 1..=5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RfmScores {
    pub recency: u8,
    pub frequency: u8,
    pub monetary: u8,
}

impl RfmScores {
    pub fn new(recency: u8, frequency: u8, monetary: u8) -> Self {
        Self {
            recency,
            frequency,
            monetary,
        }
    }

    pub fn total(&self) -> u8 {
        self.recency + self.frequency + self.monetary
    }

    fn metric(&self, metric: RfmMetric) -> u8 {
        match metric {
            RfmMetric::Recency => self.recency,
            RfmMetric::Frequency => self.frequency,
            RfmMetric::Monetary => self.monetary,
            RfmMetric::Total => self.total(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RfmMetric {
    Recency,
    Frequency,
    Monetary,
    /// Sum of the three scores, 3..=15.
    Total,
}

impl RfmMetric {
    fn range(&self) -> (u8, u8) {
        match self {
            Self::Total => (3, 15),
            _ => (1, 5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOperator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
}

pub fn compare_scores(actual: u8, operator: ComparisonOperator, expected: u8) -> bool {
    match operator {
        ComparisonOperator::Equals => actual == expected,
        ComparisonOperator::NotEquals => actual != expected,
        ComparisonOperator::GreaterThan => actual > expected,
        ComparisonOperator::GreaterThanOrEqual => actual >= expected,
        ComparisonOperator::LessThan => actual < expected,
        ComparisonOperator::LessThanOrEqual => actual <= expected,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreRule {
    All(Vec<ScoreRule>),
    Any(Vec<ScoreRule>),
    Score {
        metric: RfmMetric,
        operator: ComparisonOperator,
        value: u8,
    },
    Always,
}

impl ScoreRule {
    pub fn at_least(metric: RfmMetric, value: u8) -> Self {
        Self::Score {
            metric,
            operator: ComparisonOperator::GreaterThanOrEqual,
            value,
        }
    }

    pub fn at_most(metric: RfmMetric, value: u8) -> Self {
        Self::Score {
            metric,
            operator: ComparisonOperator::LessThanOrEqual,
            value,
        }
    }

    pub fn matches(&self, scores: &RfmScores) -> bool {
        match self {
            Self::All(rules) => rules.iter().all(|r| r.matches(scores)),
            Self::Any(rules) => rules.iter().any(|r| r.matches(scores)),
            Self::Score {
                metric,
                operator,
                value,
            } => compare_scores(scores.metric(*metric), *operator, *value),
            Self::Always => true,
        }
    }

    fn validate(&self, label: &str) -> AnalyticsResult<()> {
        match self {
            Self::All(rules) | Self::Any(rules) => {
                if rules.is_empty() {
                    return Err(AnalyticsError::configuration(format!(
                        "segment '{label}' has an empty rule group"
                    )));
                }
                rules.iter().try_for_each(|r| r.validate(label))
            }
            Self::Score { metric, value, .. } => {
                let (lo, hi) = metric.range();
                if *value < lo || *value > hi {
                    return Err(AnalyticsError::configuration(format!(
                        "segment '{label}' compares {metric:?} against {value}, outside {lo}..={hi}"
                    )));
                }
                Ok(())
            }
            Self::Always => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentRule {
    pub label: String,
    pub when: ScoreRule,
}

impl SegmentRule {
    pub fn new(label: impl Into<String>, when: ScoreRule) -> Self {
        Self {
            label: label.into(),
            when,
        }
    }
}

/// Ordered rules; the first matching rule names the segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTable {
    pub rules: Vec<SegmentRule>,
    #[serde(default = "default_no_purchase_label")]
    pub no_purchase_label: String,
}

fn default_no_purchase_label() -> String {
    NO_PURCHASE_HISTORY.to_string()
}

impl Default for DecisionTable {
    fn default() -> Self {
        use RfmMetric::*;
        use ScoreRule::{All, Always, Any};

        Self {
            rules: vec![
                SegmentRule::new(
                    CHAMPIONS,
                    All(vec![
                        ScoreRule::at_least(Recency, 4),
                        ScoreRule::at_least(Frequency, 4),
                        ScoreRule::at_least(Monetary, 4),
                    ]),
                ),
                SegmentRule::new(
                    CANT_LOSE,
                    All(vec![
                        ScoreRule::at_most(Recency, 2),
                        ScoreRule::at_least(Monetary, 4),
                    ]),
                ),
                SegmentRule::new(
                    AT_RISK,
                    All(vec![
                        ScoreRule::at_most(Recency, 2),
                        Any(vec![
                            ScoreRule::at_least(Frequency, 3),
                            ScoreRule::at_least(Monetary, 3),
                        ]),
                    ]),
                ),
                SegmentRule::new(LOST, ScoreRule::at_most(Recency, 2)),
                SegmentRule::new(LOYAL, ScoreRule::at_least(Frequency, 3)),
                SegmentRule::new(LOYAL, ScoreRule::at_least(Total, 10)),
                SegmentRule::new(LOST, ScoreRule::at_most(Total, 5)),
                SegmentRule::new(AT_RISK, Always),
            ],
            no_purchase_label: default_no_purchase_label(),
        }
    }
}

impl DecisionTable {
    pub fn classify(&self, scores: &RfmScores) -> Option<&str> {
        self.rules
            .iter()
            .find(|rule| rule.when.matches(scores))
            .map(|rule| rule.label.as_str())
    }

    /// Every label the table can produce, in rule order, deduplicated.
    pub fn labels(&self) -> Vec<&str> {
        let mut labels: Vec<&str> = Vec::new();
        for rule in &self.rules {
            if !labels.contains(&rule.label.as_str()) {
                labels.push(&rule.label);
            }
        }
        labels
    }

    /// Checks that every one of the 125 score triples lands in a segment.
    pub fn validate(&self) -> AnalyticsResult<()> {
        if self.rules.is_empty() {
            return Err(AnalyticsError::configuration("decision table has no rules"));
        }
        if self.no_purchase_label.trim().is_empty() {
            return Err(AnalyticsError::configuration(
                "no-purchase segment label is empty",
            ));
        }
        for rule in &self.rules {
            if rule.label.trim().is_empty() {
                return Err(AnalyticsError::configuration("segment label is empty"));
            }
            if rule.label == self.no_purchase_label {
                return Err(AnalyticsError::configuration(format!(
                    "segment '{}' collides with the no-purchase label",
                    rule.label
                )));
            }
            rule.when.validate(&rule.label)?;
        }

        let unmatched: Vec<RfmScores> = all_score_triples()
            .filter(|scores| self.classify(scores).is_none())
            .collect();
        if let Some(first) = unmatched.first() {
            return Err(AnalyticsError::configuration(format!(
                "decision table leaves {} score combinations unlabeled, e.g. R={} F={} M={}",
                unmatched.len(),
                first.recency,
                first.frequency,
                first.monetary
            )));
        }
        Ok(())
    }
}

fn all_score_triples() -> impl Iterator<Item = RfmScores> {
    (1..=5u8).flat_map(|r| {
        (1..=5u8).flat_map(move |f| (1..=5u8).map(move |m| RfmScores::new(r, f, m)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_is_exhaustive() {
        let table = DecisionTable::default();
        assert!(table.validate().is_ok());
        assert_eq!(all_score_triples().count(), 125);
    }

    #[test]
    fn test_default_labels() {
        let table = DecisionTable::default();
        let label = |r, f, m| table.classify(&RfmScores::new(r, f, m)).unwrap();

        assert_eq!(label(5, 5, 5), CHAMPIONS);
        assert_eq!(label(4, 4, 4), CHAMPIONS);
        assert_eq!(label(1, 1, 5), CANT_LOSE);
        assert_eq!(label(2, 3, 1), AT_RISK);
        assert_eq!(label(1, 1, 1), LOST);
        assert_eq!(label(5, 3, 1), LOYAL);
        assert_eq!(label(5, 1, 4), LOYAL);
        assert_eq!(label(3, 1, 1), LOST);
        assert_eq!(label(3, 2, 3), AT_RISK);
        assert_eq!(
            table.labels(),
            vec![CHAMPIONS, CANT_LOSE, AT_RISK, LOST, LOYAL]
        );
    }

    #[test]
    fn test_first_match_wins() {
        let table = DecisionTable {
            rules: vec![
                SegmentRule::new("first", ScoreRule::at_least(RfmMetric::Recency, 3)),
                SegmentRule::new("second", ScoreRule::Always),
            ],
            no_purchase_label: NO_PURCHASE_HISTORY.into(),
        };
        assert_eq!(table.classify(&RfmScores::new(5, 1, 1)), Some("first"));
        assert_eq!(table.classify(&RfmScores::new(2, 5, 5)), Some("second"));
    }

    #[test]
    fn test_incomplete_table_rejected() {
        let table = DecisionTable {
            rules: vec![SegmentRule::new(
                CHAMPIONS,
                ScoreRule::at_least(RfmMetric::Total, 12),
            )],
            no_purchase_label: NO_PURCHASE_HISTORY.into(),
        };
        let err = table.validate().unwrap_err();
        assert_eq!(err.kind(), "configuration");
        assert!(err.to_string().contains("R=1 F=1 M=1"));
    }

    #[test]
    fn test_out_of_range_score_rejected() {
        let table = DecisionTable {
            rules: vec![
                SegmentRule::new("odd", ScoreRule::at_least(RfmMetric::Recency, 6)),
                SegmentRule::new("rest", ScoreRule::Always),
            ],
            no_purchase_label: NO_PURCHASE_HISTORY.into(),
        };
        assert!(table.validate().is_err());
    }

    #[test]
    fn test_rule_serde_shape() {
        let json = r#"{
            "rules": [
                {"label": "Best", "when": {"all": [
                    {"score": {"metric": "recency", "operator": "greater_than_or_equal", "value": 5}},
                    {"score": {"metric": "total", "operator": "greater_than", "value": 12}}
                ]}},
                {"label": "Everyone", "when": "always"}
            ]
        }"#;
        let table: DecisionTable = serde_json::from_str(json).unwrap();
        assert_eq!(table.no_purchase_label, NO_PURCHASE_HISTORY);
        assert!(table.validate().is_ok());
        assert_eq!(table.classify(&RfmScores::new(5, 5, 3)), Some("Best"));
        assert_eq!(table.classify(&RfmScores::new(5, 4, 3)), Some("Everyone"));
    }
}
