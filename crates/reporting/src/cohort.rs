//! Cohort analysis: retention curves by acquisition period.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use storefront_core::{AnalyticsError, AnalyticsResult, EventStore, EventType, Period};
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CohortConfig {
    #[serde(default)]
    pub period: Period,
    /// Event types that count as activity. Empty means every type.
    #[serde(default)]
    pub activity_events: Vec<EventType>,
    /// Cap on the number of offset columns (offset 0 included).
    #[serde(default)]
    pub max_periods: Option<u32>,
    /// End of the observation window. Defaults to the latest observed timestamp.
    #[serde(default)]
    pub as_of: Option<NaiveDateTime>,
}

impl CohortConfig {
    pub fn validate(&self) -> AnalyticsResult<()> {
        if self.max_periods == Some(0) {
            return Err(AnalyticsError::configuration(
                "cohort.max_periods must be at least 1",
            ));
        }
        Ok(())
    }

    fn is_activity(&self, event_type: EventType) -> bool {
        self.activity_events.is_empty() || self.activity_events.contains(&event_type)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortRecord {
    pub cohort_period: NaiveDate,
    pub period_index: u32,
    pub active_user_count: u64,
    pub retention_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortRow {
    pub cohort_period: NaiveDate,
    pub cohort_size: u64,
    pub records: Vec<CohortRecord>,
}

/// Triangular retention matrix: one row per non-empty acquisition period,
/// one record per offset observable before the horizon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortMatrix {
    pub period: Period,
    pub rows: Vec<CohortRow>,
    /// Periods inside the acquisition range that acquired nobody.
    pub empty_periods: Vec<NaiveDate>,
    /// Users with neither a registration date nor any event.
    pub unplaced_users: u64,
}

impl CohortMatrix {
    fn empty(period: Period) -> Self {
        Self {
            period,
            rows: Vec::new(),
            empty_periods: Vec::new(),
            unplaced_users: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, cohort_period: NaiveDate) -> Option<&CohortRow> {
        self.rows.iter().find(|r| r.cohort_period == cohort_period)
    }

    pub fn retention(&self, cohort_period: NaiveDate, offset: u32) -> Option<f64> {
        self.row(cohort_period)?
            .records
            .get(offset as usize)
            .map(|r| r.retention_rate)
    }

    pub fn records(&self) -> impl Iterator<Item = &CohortRecord> {
        self.rows.iter().flat_map(|r| r.records.iter())
    }

    /// Size-weighted retention per offset across every cohort that reaches it.
    pub fn average_retention(&self) -> Vec<f64> {
        let width = self.rows.iter().map(|r| r.records.len()).max().unwrap_or(0);
        (0..width)
            .map(|offset| {
                let (active, size) = self
                    .rows
                    .iter()
                    .filter_map(|r| r.records.get(offset).map(|rec| (rec.active_user_count, r.cohort_size)))
                    .fold((0u64, 0u64), |(a, s), (ra, rs)| (a + ra, s + rs));
                if size > 0 {
                    active as f64 / size as f64
                } else {
                    0.0
                }
            })
            .collect()
    }
}

pub struct CohortAnalyzer {
    config: CohortConfig,
}

impl CohortAnalyzer {
    pub fn new(config: CohortConfig) -> AnalyticsResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &CohortConfig {
        &self.config
    }

    pub fn analyze(&self, store: &EventStore) -> CohortMatrix {
        let period = self.config.period;

        // Acquisition instant: the earlier of registration and first event.
        let mut acquired: BTreeMap<&str, NaiveDateTime> = BTreeMap::new();
        for event in store.events() {
            acquired.entry(event.user_id.as_str()).or_insert(event.timestamp);
        }
        let mut unplaced_users = 0u64;
        for user in store.users().values() {
            match user.registration_date {
                Some(registered) => {
                    acquired
                        .entry(user.user_id.as_str())
                        .and_modify(|first| *first = (*first).min(registered))
                        .or_insert(registered);
                }
                None if !acquired.contains_key(user.user_id.as_str()) => unplaced_users += 1,
                None => {}
            }
        }

        if acquired.is_empty() {
            let mut matrix = CohortMatrix::empty(period);
            matrix.unplaced_users = unplaced_users;
            return matrix;
        }

        let cohort_of: HashMap<&str, NaiveDate> = acquired
            .iter()
            .map(|(user, ts)| (*user, period.start_of(*ts)))
            .collect();

        let mut sizes: BTreeMap<NaiveDate, u64> = BTreeMap::new();
        for cohort in cohort_of.values() {
            *sizes.entry(*cohort).or_default() += 1;
        }

        // Distinct active users per (cohort, offset); offset 0 is implied by membership.
        let mut active: HashMap<(NaiveDate, u32), HashSet<&str>> = HashMap::new();
        for event in store.events() {
            if !self.config.is_activity(event.event_type) {
                continue;
            }
            let Some(cohort) = cohort_of.get(event.user_id.as_str()) else {
                continue;
            };
            let offset = period.offset_between(*cohort, event.timestamp.date());
            if offset > 0 {
                active
                    .entry((*cohort, offset as u32))
                    .or_default()
                    .insert(event.user_id.as_str());
            }
        }

        let latest_seen = store
            .time_range()
            .map(|(_, last)| last)
            .into_iter()
            .chain(acquired.values().copied())
            .max();
        let horizon = match (self.config.as_of, latest_seen) {
            (Some(as_of), _) => period.start_of(as_of),
            (None, Some(latest)) => period.start_of(latest),
            (None, None) => return CohortMatrix::empty(period),
        };

        let (first, last) = match (sizes.keys().next(), sizes.keys().next_back()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => return CohortMatrix::empty(period),
        };

        let mut rows = Vec::new();
        let mut empty_periods = Vec::new();
        let span = period.offset_between(first, last).max(0) as u32;
        for step in 0..=span {
            let cohort_period = period.advance(first, step);
            let cohort_size = sizes.get(&cohort_period).copied().unwrap_or(0);
            if cohort_size == 0 {
                empty_periods.push(cohort_period);
                continue;
            }

            let mut width = period.offset_between(cohort_period, horizon).max(0) as u32 + 1;
            if let Some(cap) = self.config.max_periods {
                width = width.min(cap);
            }

            let records = (0..width)
                .map(|offset| {
                    let active_user_count = if offset == 0 {
                        cohort_size
                    } else {
                        active
                            .get(&(cohort_period, offset))
                            .map_or(0, |users| users.len() as u64)
                    };
                    CohortRecord {
                        cohort_period,
                        period_index: offset,
                        active_user_count,
                        retention_rate: active_user_count as f64 / cohort_size as f64,
                    }
                })
                .collect();

            rows.push(CohortRow {
                cohort_period,
                cohort_size,
                records,
            });
        }

        debug!(
            period = %period,
            cohorts = rows.len(),
            empty_periods = empty_periods.len(),
            "Cohort matrix computed"
        );

        CohortMatrix {
            period,
            rows,
            empty_periods,
            unplaced_users,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use storefront_core::types::parse_timestamp;
    use storefront_core::{Event, User};

    fn ts(s: &str) -> NaiveDateTime {
        parse_timestamp(s).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn event(id: usize, user: &str, event_type: EventType, at: &str) -> Event {
        Event {
            event_id: format!("e{id}"),
            user_id: user.into(),
            session_id: Some(format!("{user}-{at}")),
            event_type,
            timestamp: ts(at),
            product_id: None,
            category: None,
            price: Some(10.0),
            quantity: Some(1),
        }
    }

    fn user(id: &str, registered: Option<&str>) -> User {
        User {
            user_id: id.into(),
            registration_date: registered.map(ts),
            attributes: BTreeMap::new(),
            segment: None,
        }
    }

    fn analyzer(config: CohortConfig) -> CohortAnalyzer {
        CohortAnalyzer::new(config).unwrap()
    }

    #[test]
    fn test_same_month_purchases_retain_only_offset_zero() {
        let users = vec![
            user("u1", Some("2024-01-02")),
            user("u2", Some("2024-01-10")),
            user("u3", Some("2024-01-20")),
        ];
        let mut events = Vec::new();
        for (i, u) in ["u1", "u2", "u3"].iter().enumerate() {
            events.push(event(i * 2, u, EventType::Purchase, "2024-01-21 10:00:00"));
            events.push(event(i * 2 + 1, u, EventType::Purchase, "2024-01-25 10:00:00"));
        }
        let store = EventStore::new(events, users, Vec::new());

        let matrix = analyzer(CohortConfig {
            as_of: Some(ts("2024-02-15")),
            ..Default::default()
        })
        .analyze(&store);

        assert_eq!(matrix.rows.len(), 1);
        assert_eq!(matrix.rows[0].cohort_size, 3);
        assert_eq!(matrix.retention(date(2024, 1, 1), 0), Some(1.0));
        assert_eq!(matrix.retention(date(2024, 1, 1), 1), Some(0.0));
    }

    #[test]
    fn test_offset_zero_is_always_full() {
        let users = vec![user("u1", Some("2023-11-30")), user("u2", None)];
        let events = vec![
            event(1, "u2", EventType::ProductView, "2023-12-03 09:00:00"),
            event(2, "u1", EventType::ProductView, "2024-01-04 09:00:00"),
        ];
        let store = EventStore::new(events, users, Vec::new());
        let matrix = analyzer(CohortConfig::default()).analyze(&store);

        for row in &matrix.rows {
            assert_eq!(row.records[0].retention_rate, 1.0);
        }
    }

    #[test]
    fn test_triangular_shape_and_retention() {
        let users = vec![
            user("a", Some("2024-01-05")),
            user("b", Some("2024-01-06")),
            user("c", Some("2024-02-01")),
        ];
        let events = vec![
            event(1, "a", EventType::SessionStart, "2024-02-10 08:00:00"),
            event(2, "a", EventType::SessionStart, "2024-03-10 08:00:00"),
            event(3, "b", EventType::SessionStart, "2024-03-11 08:00:00"),
            event(4, "c", EventType::SessionStart, "2024-03-12 08:00:00"),
        ];
        let store = EventStore::new(events, users, Vec::new());
        let matrix = analyzer(CohortConfig::default()).analyze(&store);

        assert_eq!(matrix.rows.len(), 2);
        let jan = matrix.row(date(2024, 1, 1)).unwrap();
        let feb = matrix.row(date(2024, 2, 1)).unwrap();
        assert_eq!(jan.records.len(), 3);
        assert_eq!(feb.records.len(), 2);
        assert_eq!(matrix.retention(date(2024, 1, 1), 1), Some(0.5));
        assert_eq!(matrix.retention(date(2024, 1, 1), 2), Some(1.0));
        assert_eq!(matrix.retention(date(2024, 2, 1), 1), Some(1.0));

        // Offset 1: (1 + 1) / (2 + 1); offset 2 only reached by January.
        let curve = matrix.average_retention();
        assert!((curve[1] - 2.0 / 3.0).abs() < 1e-9);
        assert!((curve[2] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_registration_falls_back_to_first_event() {
        let users = vec![user("u1", None)];
        let events = vec![
            event(1, "u1", EventType::ProductView, "2024-03-15 12:00:00"),
            event(2, "u1", EventType::ProductView, "2024-04-02 12:00:00"),
        ];
        let store = EventStore::new(events, users, Vec::new());
        let matrix = analyzer(CohortConfig::default()).analyze(&store);

        assert_eq!(matrix.rows[0].cohort_period, date(2024, 3, 1));
        assert_eq!(matrix.retention(date(2024, 3, 1), 1), Some(1.0));
    }

    #[test]
    fn test_activity_before_registration_sets_cohort() {
        let users = vec![user("u1", Some("2024-02-10"))];
        let events = vec![
            event(1, "u1", EventType::ProductView, "2024-01-05 12:00:00"),
            event(2, "u1", EventType::ProductView, "2024-02-15 12:00:00"),
        ];
        let store = EventStore::new(events, users, Vec::new());
        let matrix = analyzer(CohortConfig::default()).analyze(&store);

        assert_eq!(matrix.rows.len(), 1);
        assert_eq!(matrix.rows[0].cohort_period, date(2024, 1, 1));
        assert_eq!(matrix.rows[0].cohort_size, 1);
        assert_eq!(matrix.retention(date(2024, 1, 1), 1), Some(1.0));
    }

    #[test]
    fn test_empty_periods_are_listed_not_reported() {
        let users = vec![user("u1", Some("2024-01-03")), user("u2", Some("2024-03-03"))];
        let store = EventStore::new(Vec::new(), users, Vec::new());
        let matrix = analyzer(CohortConfig::default()).analyze(&store);

        assert_eq!(matrix.rows.len(), 2);
        assert_eq!(matrix.empty_periods, vec![date(2024, 2, 1)]);
        assert!(matrix.records().all(|r| r.retention_rate.is_finite()));
    }

    #[test]
    fn test_empty_input_yields_empty_matrix() {
        let matrix = analyzer(CohortConfig::default()).analyze(&EventStore::default());
        assert!(matrix.is_empty());
        assert!(matrix.empty_periods.is_empty());
    }

    #[test]
    fn test_activity_filter_and_period_cap() {
        let users = vec![user("u1", Some("2024-01-01"))];
        let events = vec![
            event(1, "u1", EventType::ProductView, "2024-01-09 12:00:00"),
            event(2, "u1", EventType::Purchase, "2024-01-16 12:00:00"),
            event(3, "u1", EventType::ProductView, "2024-01-23 12:00:00"),
        ];
        let store = EventStore::new(events, users, Vec::new());
        let matrix = analyzer(CohortConfig {
            period: Period::Weekly,
            activity_events: vec![EventType::Purchase],
            max_periods: Some(3),
            ..Default::default()
        })
        .analyze(&store);

        let row = &matrix.rows[0];
        assert_eq!(row.cohort_period, date(2024, 1, 1));
        assert_eq!(row.records.len(), 3);
        let rates: Vec<f64> = row.records.iter().map(|r| r.retention_rate).collect();
        assert_eq!(rates, vec![1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_zero_period_cap_is_rejected() {
        let result = CohortAnalyzer::new(CohortConfig {
            max_periods: Some(0),
            ..Default::default()
        });
        assert!(matches!(result, Err(AnalyticsError::Configuration(_))));
    }

    #[test]
    fn test_matrix_serde_round_trip() {
        let users = vec![user("a", Some("2024-01-05")), user("b", Some("2024-01-06")), user("c", Some("2024-01-07"))];
        let events = vec![event(1, "a", EventType::SessionStart, "2024-02-10 08:00:00")];
        let store = EventStore::new(events, users, Vec::new());
        let matrix = analyzer(CohortConfig::default()).analyze(&store);

        let json = serde_json::to_string(&matrix).unwrap();
        let back: CohortMatrix = serde_json::from_str(&json).unwrap();
        assert_eq!(back.rows[0].cohort_size, 3);
        let (a, b) = (matrix.retention(date(2024, 1, 1), 1).unwrap(), back.retention(date(2024, 1, 1), 1).unwrap());
        assert!((a - b).abs() < 1e-9);
    }
}
