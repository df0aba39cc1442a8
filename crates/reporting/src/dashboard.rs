//! Storefront performance dashboard: headline KPIs, category and daily
//! breakdowns, and rule-based recommendations.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use storefront_core::{EventStore, EventType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightThresholds {
    #[serde(default = "default_min_purchase_rate")]
    pub min_purchase_rate: f64,
    #[serde(default = "default_max_at_risk_share")]
    pub max_at_risk_share: f64,
    #[serde(default = "default_min_average_order_value")]
    pub min_average_order_value: f64,
}

fn default_min_purchase_rate() -> f64 {
    0.10
}
fn default_max_at_risk_share() -> f64 {
    0.30
}
fn default_min_average_order_value() -> f64 {
    50.0
}

impl Default for InsightThresholds {
    fn default() -> Self {
        Self {
            min_purchase_rate: default_min_purchase_rate(),
            max_at_risk_share: default_max_at_risk_share(),
            min_average_order_value: default_min_average_order_value(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiSummary {
    pub total_users: u64,
    pub total_sessions: u64,
    pub total_events: u64,
    pub total_purchases: u64,
    pub total_revenue: f64,
    pub average_order_value: f64,
    /// Started sessions that contain a purchase, over all started sessions.
    pub purchase_session_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventTypeCount {
    pub event_type: EventType,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryPerformance {
    pub category: String,
    pub events: u64,
    pub views: u64,
    pub cart_adds: u64,
    pub purchases: u64,
    pub revenue: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyActivity {
    pub date: NaiveDate,
    pub unique_users: u64,
    pub sessions: u64,
    pub events: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
    LowConversion,
    HighAtRiskShare,
    LowOrderValue,
    StrongPerformance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub kind: RecommendationKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessInsights {
    pub kpis: KpiSummary,
    pub event_types: Vec<EventTypeCount>,
    pub categories: Vec<CategoryPerformance>,
    pub daily_activity: Vec<DailyActivity>,
    pub recommendations: Vec<Recommendation>,
}

pub struct StorefrontDashboard {
    thresholds: InsightThresholds,
}

impl StorefrontDashboard {
    pub fn new(thresholds: InsightThresholds) -> Self {
        Self { thresholds }
    }

    /// Build every dashboard view. `at_risk_share` comes from segmentation,
    /// when it ran.
    pub fn build(&self, store: &EventStore, at_risk_share: Option<f64>) -> BusinessInsights {
        let kpis = kpi_summary(store);
        let recommendations = recommendations(&kpis, at_risk_share, &self.thresholds);
        BusinessInsights {
            event_types: event_type_distribution(store),
            categories: category_performance(store),
            daily_activity: daily_activity(store),
            kpis,
            recommendations,
        }
    }
}

impl Default for StorefrontDashboard {
    fn default() -> Self {
        Self::new(InsightThresholds::default())
    }
}

pub fn kpi_summary(store: &EventStore) -> KpiSummary {
    let events = store.events();
    let users: HashSet<&str> = events.iter().map(|e| e.user_id.as_str()).collect();
    let sessions: HashSet<&str> = events.iter().filter_map(|e| e.session_id.as_deref()).collect();
    let started: HashSet<&str> = events
        .iter()
        .filter(|e| e.event_type == EventType::SessionStart)
        .filter_map(|e| e.session_id.as_deref())
        .collect();
    let purchased: HashSet<&str> = events
        .iter()
        .filter(|e| e.is_purchase())
        .filter_map(|e| e.session_id.as_deref())
        .collect();

    let total_purchases = events.iter().filter(|e| e.is_purchase()).count() as u64;
    let total_revenue: f64 = events
        .iter()
        .filter(|e| e.is_purchase())
        .filter_map(|e| e.line_total())
        .sum();

    KpiSummary {
        total_users: users.len() as u64,
        total_sessions: sessions.len() as u64,
        total_events: events.len() as u64,
        total_purchases,
        total_revenue,
        average_order_value: if total_purchases > 0 {
            total_revenue / total_purchases as f64
        } else {
            0.0
        },
        purchase_session_rate: if started.is_empty() {
            0.0
        } else {
            started.intersection(&purchased).count() as f64 / started.len() as f64
        },
    }
}

pub fn event_type_distribution(store: &EventStore) -> Vec<EventTypeCount> {
    let mut counts: BTreeMap<EventType, u64> = BTreeMap::new();
    for event in store.events() {
        *counts.entry(event.event_type).or_default() += 1;
    }
    let mut distribution: Vec<EventTypeCount> = counts
        .into_iter()
        .map(|(event_type, count)| EventTypeCount { event_type, count })
        .collect();
    distribution.sort_by(|a, b| b.count.cmp(&a.count));
    distribution
}

pub fn category_performance(store: &EventStore) -> Vec<CategoryPerformance> {
    let mut by_category: BTreeMap<&str, CategoryPerformance> = BTreeMap::new();
    for event in store.events() {
        let Some(category) = event.category.as_deref() else {
            continue;
        };
        let entry = by_category
            .entry(category)
            .or_insert_with(|| CategoryPerformance {
                category: category.to_string(),
                events: 0,
                views: 0,
                cart_adds: 0,
                purchases: 0,
                revenue: 0.0,
            });
        entry.events += 1;
        match event.event_type {
            EventType::ProductView => entry.views += 1,
            EventType::AddToCart => entry.cart_adds += 1,
            EventType::Purchase => {
                entry.purchases += 1;
                entry.revenue += event.line_total().unwrap_or(0.0);
            }
            _ => {}
        }
    }
    let mut categories: Vec<_> = by_category.into_values().collect();
    categories.sort_by(|a, b| b.revenue.total_cmp(&a.revenue));
    categories
}

pub fn daily_activity(store: &EventStore) -> Vec<DailyActivity> {
    let mut days: BTreeMap<NaiveDate, (HashSet<&str>, HashSet<&str>, u64)> = BTreeMap::new();
    for event in store.events() {
        let (users, sessions, count) = days.entry(event.timestamp.date()).or_default();
        users.insert(event.user_id.as_str());
        if let Some(session) = event.session_id.as_deref() {
            sessions.insert(session);
        }
        *count += 1;
    }
    days.into_iter()
        .map(|(date, (users, sessions, events))| DailyActivity {
            date,
            unique_users: users.len() as u64,
            sessions: sessions.len() as u64,
            events,
        })
        .collect()
}

pub fn recommendations(
    kpis: &KpiSummary,
    at_risk_share: Option<f64>,
    thresholds: &InsightThresholds,
) -> Vec<Recommendation> {
    let mut out = Vec::new();

    if kpis.purchase_session_rate < thresholds.min_purchase_rate {
        out.push(Recommendation {
            kind: RecommendationKind::LowConversion,
            message: format!(
                "Session purchase rate is {:.1}% (target {:.1}%): A/B test the checkout flow",
                kpis.purchase_session_rate * 100.0,
                thresholds.min_purchase_rate * 100.0
            ),
        });
    }

    if let Some(share) = at_risk_share.filter(|s| *s > thresholds.max_at_risk_share) {
        out.push(Recommendation {
            kind: RecommendationKind::HighAtRiskShare,
            message: format!(
                "{:.1}% of purchasing customers are at risk: launch retention campaigns",
                share * 100.0
            ),
        });
    }

    if kpis.average_order_value < thresholds.min_average_order_value {
        out.push(Recommendation {
            kind: RecommendationKind::LowOrderValue,
            message: format!(
                "Average order value is {:.2} (target {:.2}): add upselling and cross-selling",
                kpis.average_order_value, thresholds.min_average_order_value
            ),
        });
    }

    if out.is_empty() {
        out.push(Recommendation {
            kind: RecommendationKind::StrongPerformance,
            message: "Strong performance: focus on customer retention and expansion".to_string(),
        });
    }

    out
}
