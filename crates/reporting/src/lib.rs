//! Storefront reporting: cohort retention, conversion funnels, and the
//! dashboard KPI views.

pub mod cohort;
pub mod dashboard;
pub mod funnel;

pub use cohort::{CohortAnalyzer, CohortConfig, CohortMatrix, CohortRecord, CohortRow};
pub use dashboard::{BusinessInsights, InsightThresholds, StorefrontDashboard};
pub use funnel::{
    FunnelAnalyzer, FunnelConfig, FunnelRecord, FunnelReport, FunnelStage, GroupingKey,
    StageOrdering,
};
