use serde::{Deserialize, Serialize};
use std::path::Path;
use storefront_core::{AnalyticsError, AnalyticsResult};
use storefront_reporting::{CohortConfig, FunnelConfig, InsightThresholds};
use storefront_segmentation::SegmentationConfig;

/// Root analytics configuration. Loaded from an optional TOML file and
/// environment variables with the prefix `STOREFRONT_ANALYTICS__`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    #[serde(default)]
    pub cohort: CohortConfig,
    #[serde(default)]
    pub funnel: FunnelConfig,
    #[serde(default)]
    pub segmentation: SegmentationConfig,
    #[serde(default)]
    pub insights: InsightThresholds,
}

impl AnalyticsConfig {
    /// Load configuration from environment variables only.
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::builder(None)?.build()?.try_deserialize()
    }

    /// Load configuration from `path`, with environment variables on top.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, config::ConfigError> {
        Self::builder(Some(path.as_ref()))?.build()?.try_deserialize()
    }

    fn builder(
        path: Option<&Path>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        Ok(builder.add_source(
            config::Environment::with_prefix("STOREFRONT_ANALYTICS")
                .separator("__")
                .try_parsing(true),
        ))
    }

    /// Every configuration check, run before any engine starts.
    pub fn validate(&self) -> AnalyticsResult<()> {
        self.cohort.validate()?;
        self.funnel.validate()?;
        self.segmentation.validate()?;

        let insights = &self.insights;
        for (name, value) in [
            ("insights.min_purchase_rate", insights.min_purchase_rate),
            ("insights.max_at_risk_share", insights.max_at_risk_share),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(AnalyticsError::configuration(format!(
                    "{name} must lie in [0, 1], got {value}"
                )));
            }
        }
        if !insights.min_average_order_value.is_finite() || insights.min_average_order_value < 0.0 {
            return Err(AnalyticsError::configuration(format!(
                "insights.min_average_order_value must be non-negative, got {}",
                insights.min_average_order_value
            )));
        }
        Ok(())
    }
}
