//! Runs the cohort, funnel and segmentation engines over one snapshot and
//! assembles the combined report.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use storefront_core::{AnalyticsError, AnalyticsResult, EventStore, IngestDiagnostics, User};
use storefront_reporting::{
    BusinessInsights, CohortAnalyzer, CohortMatrix, FunnelAnalyzer, FunnelReport,
    StorefrontDashboard,
};
use storefront_segmentation::{SegmentationEngine, SegmentationReport};
use tokio::task::JoinError;
use tracing::{info, warn};

use crate::cache::CachedSnapshot;
use crate::config::AnalyticsConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    Cohort,
    Funnel,
    Segmentation,
    Clustering,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cohort => "cohort",
            Self::Funnel => "funnel",
            Self::Segmentation => "segmentation",
            Self::Clustering => "clustering",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineFailure {
    pub engine: EngineKind,
    /// Error kind, e.g. `empty_population`.
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsReport {
    pub time_range: Option<(NaiveDateTime, NaiveDateTime)>,
    pub diagnostics: IngestDiagnostics,
    pub cohort: Option<CohortMatrix>,
    pub funnel: Option<FunnelReport>,
    pub segmentation: Option<SegmentationReport>,
    /// User records carrying the segment label assigned by this run.
    pub users: Vec<User>,
    pub insights: BusinessInsights,
    pub failures: Vec<EngineFailure>,
}

impl AnalyticsReport {
    pub fn failed(&self, engine: EngineKind) -> bool {
        self.failures.iter().any(|f| f.engine == engine)
    }
}

pub struct AnalyticsPipeline {
    cohort: Arc<CohortAnalyzer>,
    funnel: Arc<FunnelAnalyzer>,
    segmentation: Arc<SegmentationEngine>,
    dashboard: StorefrontDashboard,
}

impl AnalyticsPipeline {
    /// Validates the whole configuration before building any engine.
    pub fn new(config: AnalyticsConfig) -> AnalyticsResult<Self> {
        config.validate()?;
        Ok(Self {
            cohort: Arc::new(CohortAnalyzer::new(config.cohort)?),
            funnel: Arc::new(FunnelAnalyzer::new(config.funnel)?),
            segmentation: Arc::new(SegmentationEngine::new(config.segmentation)?),
            dashboard: StorefrontDashboard::new(config.insights),
        })
    }

    pub async fn run_cached(&self, snapshot: &CachedSnapshot) -> AnalyticsReport {
        self.run(snapshot.store.clone(), (*snapshot.diagnostics).clone())
            .await
    }

    /// The three engines run concurrently on the blocking pool. A failing
    /// engine is listed in `failures`; the others still report.
    pub async fn run(&self, store: Arc<EventStore>, diagnostics: IngestDiagnostics) -> AnalyticsReport {
        let started = Instant::now();
        metrics::counter!("pipeline.runs").increment(1);

        let cohort = {
            let (engine, store) = (self.cohort.clone(), store.clone());
            tokio::task::spawn_blocking(move || Ok::<_, AnalyticsError>(engine.analyze(&store)))
        };
        let funnel = {
            let (engine, store) = (self.funnel.clone(), store.clone());
            tokio::task::spawn_blocking(move || engine.analyze(&store))
        };
        let segmentation = {
            let (engine, store) = (self.segmentation.clone(), store.clone());
            tokio::task::spawn_blocking(move || Ok::<_, AnalyticsError>(engine.run(&store)))
        };
        let (cohort, funnel, segmentation) = tokio::join!(cohort, funnel, segmentation);

        let mut failures = Vec::new();
        let cohort = settle(EngineKind::Cohort, cohort, &mut failures);
        let funnel = settle(EngineKind::Funnel, funnel, &mut failures);
        let segmentation = settle(EngineKind::Segmentation, segmentation, &mut failures);

        if let Some(skipped) = segmentation
            .as_ref()
            .and_then(|s| s.clustering_skipped.as_ref())
        {
            record(
                EngineKind::Clustering,
                &skipped.kind,
                skipped.reason.clone(),
                &mut failures,
            );
        }

        let at_risk_share = segmentation.as_ref().and_then(|s| s.at_risk_share());
        let insights = self.dashboard.build(&store, at_risk_share);
        let users = segmentation
            .as_ref()
            .map(|s| s.relabel_users(store.users()).into_values().collect())
            .unwrap_or_default();

        info!(
            events = store.events().len(),
            failures = failures.len(),
            recommendations = insights.recommendations.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Analytics pipeline finished"
        );

        AnalyticsReport {
            time_range: store.time_range(),
            diagnostics,
            cohort,
            funnel,
            segmentation,
            users,
            insights,
            failures,
        }
    }
}

fn settle<T>(
    engine: EngineKind,
    joined: Result<AnalyticsResult<T>, JoinError>,
    failures: &mut Vec<EngineFailure>,
) -> Option<T> {
    let error = match joined {
        Ok(Ok(value)) => return Some(value),
        Ok(Err(error)) => error,
        Err(join_error) => AnalyticsError::Internal(anyhow::anyhow!(
            "{engine} engine task failed: {join_error}"
        )),
    };
    record(engine, error.kind(), error.to_string(), failures);
    None
}

fn record(engine: EngineKind, kind: &str, message: String, failures: &mut Vec<EngineFailure>) {
    warn!(engine = engine.as_str(), kind, error = %message, "Engine produced no result");
    metrics::counter!("pipeline.engine_failures", "engine" => engine.as_str()).increment(1);
    failures.push(EngineFailure {
        engine,
        kind: kind.to_string(),
        message,
    });
}
