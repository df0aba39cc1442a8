//! Customer segmentation: per-user features, RFM scoring against an ordered
//! decision table, and k-means clustering on behavioral features.

pub mod clustering;
pub mod engine;
pub mod features;
pub mod rfm;
pub mod rules;

pub use clustering::{ClusterAssignment, ClusterProfile, ClusteringConfig, ClusteringResult};
pub use engine::{SegmentationConfig, SegmentationEngine, SegmentationReport, SkippedStage};
pub use features::{BehavioralFeature, FeatureConfig, UserFeatures};
pub use rfm::{QuintileScale, RfmResult, RfmScore, SegmentSummary};
pub use rules::{DecisionTable, RfmMetric, RfmScores, ScoreRule, SegmentRule};
