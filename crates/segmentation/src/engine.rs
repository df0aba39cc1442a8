//! Segmentation engine: shared feature extraction, then RFM scoring and
//! behavioral clustering side by side.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use storefront_core::{AnalyticsResult, EventStore, User};
use tracing::{info, warn};

use crate::clustering::{cluster_users, ClusteringConfig, ClusteringResult};
use crate::features::{extract_features, reference_date, FeatureConfig, UserFeatures};
use crate::rfm::{score_population, RfmResult};
use crate::rules::{DecisionTable, AT_RISK};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    pub features: FeatureConfig,
    pub rfm: DecisionTable,
    pub clustering: ClusteringConfig,
}

impl SegmentationConfig {
    pub fn validate(&self) -> AnalyticsResult<()> {
        self.rfm.validate()?;
        self.clustering.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentationReport {
    pub reference_date: Option<NaiveDateTime>,
    pub features: Vec<UserFeatures>,
    pub rfm: RfmResult,
    pub clustering: Option<ClusteringResult>,
    /// Why clustering produced no result, when it didn't.
    pub clustering_skipped: Option<SkippedStage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedStage {
    /// `AnalyticsError::kind` of the failure.
    pub kind: String,
    pub reason: String,
}

impl SegmentationReport {
    /// Share of scored purchasers labeled "At Risk".
    pub fn at_risk_share(&self) -> Option<f64> {
        self.rfm.share_of(AT_RISK)
    }

    /// User records with `segment` overwritten by this run's RFM label.
    /// Users seen only in events get a bare record.
    pub fn relabel_users(&self, users: &BTreeMap<String, User>) -> BTreeMap<String, User> {
        self.rfm
            .scores
            .iter()
            .map(|score| {
                let mut user = users.get(&score.user_id).cloned().unwrap_or_else(|| User {
                    user_id: score.user_id.clone(),
                    registration_date: None,
                    attributes: BTreeMap::new(),
                    segment: None,
                });
                user.segment = Some(score.segment_label.clone());
                (score.user_id.clone(), user)
            })
            .collect()
    }
}

pub struct SegmentationEngine {
    config: SegmentationConfig,
}

impl SegmentationEngine {
    pub fn new(config: SegmentationConfig) -> AnalyticsResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SegmentationConfig {
        &self.config
    }

    /// Features are extracted once; RFM and clustering then read them
    /// concurrently. A clustering failure leaves the RFM result intact.
    pub fn run(&self, store: &EventStore) -> SegmentationReport {
        let features = extract_features(store, &self.config.features);

        let (rfm, clustering) = std::thread::scope(|scope| {
            let rfm = scope.spawn(|| score_population(&features, &self.config.rfm));
            let clustering = scope.spawn(|| cluster_users(&features, &self.config.clustering));
            (
                rfm.join().unwrap_or_else(|e| std::panic::resume_unwind(e)),
                clustering
                    .join()
                    .unwrap_or_else(|e| std::panic::resume_unwind(e)),
            )
        });

        let (clustering, clustering_skipped) = match clustering {
            Ok(result) => (Some(result), None),
            Err(err) => {
                warn!(error = %err, kind = err.kind(), "Clustering skipped");
                (
                    None,
                    Some(SkippedStage {
                        kind: err.kind().to_string(),
                        reason: err.to_string(),
                    }),
                )
            }
        };

        info!(
            users = features.len(),
            scored = rfm.scored_users,
            segments = rfm.segments.len(),
            clusters = clustering.as_ref().map(|c| c.k).unwrap_or(0),
            "Segmentation complete"
        );

        SegmentationReport {
            reference_date: reference_date(store, &self.config.features),
            features,
            rfm,
            clustering,
            clustering_skipped,
        }
    }
}
