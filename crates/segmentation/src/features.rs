//! Per-user feature extraction shared by RFM scoring and clustering.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use storefront_core::{Event, EventStore, EventType};
use tracing::debug;

/// Behavioral columns available to the clustering model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehavioralFeature {
    Sessions,
    Events,
    DistinctProducts,
    CategoryDiversity,
    PurchaseCount,
    TotalSpent,
    AvgSessionMinutes,
    /// Purchases per product view.
    ViewToPurchaseRatio,
}

impl BehavioralFeature {
    pub const DEFAULT: [BehavioralFeature; 6] = [
        BehavioralFeature::Sessions,
        BehavioralFeature::Events,
        BehavioralFeature::DistinctProducts,
        BehavioralFeature::CategoryDiversity,
        BehavioralFeature::PurchaseCount,
        BehavioralFeature::TotalSpent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sessions => "sessions",
            Self::Events => "events",
            Self::DistinctProducts => "distinct_products",
            Self::CategoryDiversity => "category_diversity",
            Self::PurchaseCount => "purchase_count",
            Self::TotalSpent => "total_spent",
            Self::AvgSessionMinutes => "avg_session_minutes",
            Self::ViewToPurchaseRatio => "view_to_purchase_ratio",
        }
    }
}

impl fmt::Display for BehavioralFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Recency is measured up to this instant. Defaults to the latest event.
    #[serde(default)]
    pub reference_date: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserFeatures {
    pub user_id: String,
    pub last_purchase: Option<NaiveDateTime>,
    /// Whole days from the last purchase to the reference date.
    pub recency_days: Option<i64>,
    /// Distinct sessions containing a purchase.
    pub frequency_count: u64,
    /// Sum of price × quantity over valid purchase lines.
    pub monetary_total: f64,
    pub purchase_count: u64,
    pub product_views: u64,
    pub sessions: u64,
    pub events: u64,
    pub distinct_products: u64,
    pub category_diversity: u64,
    pub avg_session_minutes: f64,
    pub view_to_purchase_ratio: f64,
}

impl UserFeatures {
    fn empty(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            last_purchase: None,
            recency_days: None,
            frequency_count: 0,
            monetary_total: 0.0,
            purchase_count: 0,
            product_views: 0,
            sessions: 0,
            events: 0,
            distinct_products: 0,
            category_diversity: 0,
            avg_session_minutes: 0.0,
            view_to_purchase_ratio: 0.0,
        }
    }

    pub fn has_purchases(&self) -> bool {
        self.purchase_count > 0
    }

    pub fn value(&self, feature: BehavioralFeature) -> f64 {
        match feature {
            BehavioralFeature::Sessions => self.sessions as f64,
            BehavioralFeature::Events => self.events as f64,
            BehavioralFeature::DistinctProducts => self.distinct_products as f64,
            BehavioralFeature::CategoryDiversity => self.category_diversity as f64,
            BehavioralFeature::PurchaseCount => self.purchase_count as f64,
            BehavioralFeature::TotalSpent => self.monetary_total,
            BehavioralFeature::AvgSessionMinutes => self.avg_session_minutes,
            BehavioralFeature::ViewToPurchaseRatio => self.view_to_purchase_ratio,
        }
    }
}

/// The instant recency is measured against.
pub fn reference_date(store: &EventStore, config: &FeatureConfig) -> Option<NaiveDateTime> {
    config
        .reference_date
        .or_else(|| store.time_range().map(|(_, last)| last))
}

/// Features for every user in the population, sorted by user id.
pub fn extract_features(store: &EventStore, config: &FeatureConfig) -> Vec<UserFeatures> {
    let reference = reference_date(store, config);
    let by_user = store.events_by_user();

    let features: Vec<UserFeatures> = store
        .population()
        .into_iter()
        .map(|user_id| match by_user.get(user_id) {
            Some(events) => user_features(user_id, events, reference),
            None => UserFeatures::empty(user_id),
        })
        .collect();

    debug!(
        users = features.len(),
        purchasers = features.iter().filter(|f| f.has_purchases()).count(),
        "Features extracted"
    );
    features
}

fn user_features(user_id: &str, events: &[&Event], reference: Option<NaiveDateTime>) -> UserFeatures {
    let mut features = UserFeatures::empty(user_id);
    let mut purchase_sessions = HashSet::new();
    let mut products = HashSet::new();
    let mut categories = HashSet::new();
    let mut session_bounds: BTreeMap<&str, (NaiveDateTime, NaiveDateTime)> = BTreeMap::new();

    for event in events {
        features.events += 1;
        if let Some(product) = event.product_id.as_deref() {
            products.insert(product);
        }
        if let Some(category) = event.category.as_deref() {
            categories.insert(category);
        }
        if let Some(session) = event.session_id.as_deref() {
            let bounds = session_bounds
                .entry(session)
                .or_insert((event.timestamp, event.timestamp));
            bounds.0 = bounds.0.min(event.timestamp);
            bounds.1 = bounds.1.max(event.timestamp);
        }
        match event.event_type {
            EventType::ProductView => features.product_views += 1,
            EventType::Purchase => {
                features.purchase_count += 1;
                purchase_sessions.insert(
                    event
                        .session_id
                        .as_deref()
                        .unwrap_or(event.event_id.as_str()),
                );
                features.monetary_total += event.line_total().unwrap_or(0.0);
                features.last_purchase = features.last_purchase.max(Some(event.timestamp));
            }
            _ => {}
        }
    }

    features.frequency_count = purchase_sessions.len() as u64;
    features.recency_days = features
        .last_purchase
        .zip(reference)
        .map(|(last, reference)| (reference - last).num_days());
    features.sessions = session_bounds.len() as u64;
    features.distinct_products = products.len() as u64;
    features.category_diversity = categories.len() as u64;
    if !session_bounds.is_empty() {
        let total_minutes: f64 = session_bounds
            .values()
            .map(|(start, end)| (*end - *start).num_seconds() as f64 / 60.0)
            .sum();
        features.avg_session_minutes = total_minutes / session_bounds.len() as f64;
    }
    if features.product_views > 0 {
        features.view_to_purchase_ratio =
            features.purchase_count as f64 / features.product_views as f64;
    }
    features
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap as Map;
    use storefront_core::types::parse_timestamp;
    use storefront_core::User;

    #[allow(clippy::too_many_arguments)]
    fn event(
        id: &str,
        user: &str,
        session: Option<&str>,
        event_type: EventType,
        at: &str,
        product: Option<&str>,
        category: Option<&str>,
        line: Option<(f64, u32)>,
    ) -> Event {
        Event {
            event_id: id.into(),
            user_id: user.into(),
            session_id: session.map(Into::into),
            event_type,
            timestamp: parse_timestamp(at).unwrap(),
            product_id: product.map(Into::into),
            category: category.map(Into::into),
            price: line.map(|(p, _)| p),
            quantity: line.map(|(_, q)| q),
        }
    }

    fn store() -> EventStore {
        EventStore::new(
            vec![
                event("1", "u1", Some("s1"), EventType::SessionStart, "2024-01-01 10:00:00", None, None, None),
                event("2", "u1", Some("s1"), EventType::ProductView, "2024-01-01 10:10:00", Some("p1"), Some("Books"), None),
                event("3", "u1", Some("s1"), EventType::Purchase, "2024-01-01 10:20:00", Some("p1"), Some("Books"), Some((10.0, 2))),
                event("4", "u1", Some("s1"), EventType::Purchase, "2024-01-01 10:30:00", Some("p2"), Some("Toys"), Some((5.0, 1))),
                event("5", "u1", Some("s2"), EventType::ProductView, "2024-01-05 09:00:00", Some("p3"), Some("Toys"), None),
                event("6", "u1", Some("s2"), EventType::Purchase, "2024-01-05 09:10:00", Some("p3"), Some("Toys"), None),
                event("7", "u2", Some("s3"), EventType::ProductView, "2024-01-11 09:00:00", Some("p1"), Some("Books"), None),
            ],
            vec![User {
                user_id: "u3".into(),
                registration_date: None,
                attributes: Map::new(),
                segment: None,
            }],
            Vec::new(),
        )
    }

    #[test]
    fn test_rfm_inputs() {
        let features = extract_features(&store(), &FeatureConfig::default());
        assert_eq!(
            features.iter().map(|f| f.user_id.as_str()).collect::<Vec<_>>(),
            vec!["u1", "u2", "u3"]
        );

        let u1 = &features[0];
        assert_eq!(u1.purchase_count, 3);
        assert_eq!(u1.frequency_count, 2);
        // The purchase without a price drops out of the monetary total.
        assert!((u1.monetary_total - 25.0).abs() < 1e-9);
        // Reference date defaults to the last event (2024-01-11 09:00).
        assert_eq!(u1.recency_days, Some(5));
    }

    #[test]
    fn test_behavioral_features() {
        let features = extract_features(&store(), &FeatureConfig::default());
        let u1 = &features[0];
        assert_eq!(u1.sessions, 2);
        assert_eq!(u1.events, 6);
        assert_eq!(u1.distinct_products, 3);
        assert_eq!(u1.category_diversity, 2);
        // s1 lasts 30 minutes, s2 lasts 10.
        assert!((u1.avg_session_minutes - 20.0).abs() < 1e-9);
        assert!((u1.view_to_purchase_ratio - 1.5).abs() < 1e-9);
        assert_eq!(u1.value(BehavioralFeature::TotalSpent), u1.monetary_total);
    }

    #[test]
    fn test_users_without_purchases() {
        let features = extract_features(&store(), &FeatureConfig::default());
        let (u2, u3) = (&features[1], &features[2]);
        assert!(!u2.has_purchases());
        assert_eq!(u2.recency_days, None);
        assert_eq!(u2.product_views, 1);
        assert_eq!(u3.events, 0);
        assert_eq!(u3.sessions, 0);
    }

    #[test]
    fn test_explicit_reference_date() {
        let config = FeatureConfig {
            reference_date: parse_timestamp("2024-02-05 09:10:00"),
        };
        let features = extract_features(&store(), &config);
        assert_eq!(features[0].recency_days, Some(31));
    }
}
