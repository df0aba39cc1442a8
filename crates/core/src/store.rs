//! Read-only event store accessor shared by every analyzer.

use crate::types::{Event, EventType, Product, User};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Immutable snapshot of the event log and its reference tables.
///
/// Events are kept ordered by timestamp (ties keep input order); user and
/// product tables are keyed by id with deterministic iteration order.
#[derive(Debug, Clone, Default)]
pub struct EventStore {
    events: Vec<Event>,
    users: BTreeMap<String, User>,
    products: BTreeMap<String, Product>,
}

impl EventStore {
    pub fn new(
        mut events: Vec<Event>,
        users: impl IntoIterator<Item = User>,
        products: impl IntoIterator<Item = Product>,
    ) -> Self {
        events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Self {
            events,
            users: users.into_iter().map(|u| (u.user_id.clone(), u)).collect(),
            products: products
                .into_iter()
                .map(|p| (p.product_id.clone(), p))
                .collect(),
        }
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn users(&self) -> &BTreeMap<String, User> {
        &self.users
    }

    pub fn products(&self) -> &BTreeMap<String, Product> {
        &self.products
    }

    pub fn user(&self, user_id: &str) -> Option<&User> {
        self.users.get(user_id)
    }

    pub fn product(&self, product_id: &str) -> Option<&Product> {
        self.products.get(product_id)
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.users.is_empty()
    }

    /// Earliest and latest event timestamps.
    pub fn time_range(&self) -> Option<(NaiveDateTime, NaiveDateTime)> {
        Some((self.events.first()?.timestamp, self.events.last()?.timestamp))
    }

    /// Every known user: the user table plus any user seen only in events.
    pub fn population(&self) -> BTreeSet<&str> {
        self.users
            .keys()
            .map(String::as_str)
            .chain(self.events.iter().map(|e| e.user_id.as_str()))
            .collect()
    }

    /// Events grouped per user, each group in timestamp order.
    pub fn events_by_user(&self) -> BTreeMap<&str, Vec<&Event>> {
        let mut grouped: BTreeMap<&str, Vec<&Event>> = BTreeMap::new();
        for event in &self.events {
            grouped.entry(event.user_id.as_str()).or_default().push(event);
        }
        grouped
    }

    /// A new store restricted to events matching `filter`.
    ///
    /// A segment filter also restricts the user table to that segment.
    pub fn filtered(&self, filter: &EventFilter) -> EventStore {
        let events = self
            .events
            .iter()
            .filter(|e| filter.matches(e, self))
            .cloned()
            .collect();
        let users = self
            .users
            .values()
            .filter(|u| match &filter.segment {
                Some(segment) => u.segment.as_deref() == Some(segment.as_str()),
                None => true,
            })
            .cloned();
        EventStore::new(events, users, self.products.values().cloned())
    }
}

/// Slice of the event log selected for analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventFilter {
    /// Inclusive lower bound on the event date.
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    /// Inclusive upper bound on the event date.
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    /// Empty means every event type.
    #[serde(default)]
    pub event_types: Vec<EventType>,
    #[serde(default)]
    pub category: Option<String>,
    /// User segment label as stored on the user record.
    #[serde(default)]
    pub segment: Option<String>,
}

impl EventFilter {
    pub fn is_empty(&self) -> bool {
        self.start_date.is_none()
            && self.end_date.is_none()
            && self.event_types.is_empty()
            && self.category.is_none()
            && self.segment.is_none()
    }

    pub fn matches(&self, event: &Event, store: &EventStore) -> bool {
        let date = event.timestamp.date();
        if self.start_date.is_some_and(|start| date < start) {
            return false;
        }
        if self.end_date.is_some_and(|end| date > end) {
            return false;
        }
        if !self.event_types.is_empty() && !self.event_types.contains(&event.event_type) {
            return false;
        }
        if let Some(category) = &self.category {
            if event.category.as_deref() != Some(category.as_str()) {
                return false;
            }
        }
        if let Some(segment) = &self.segment {
            let user_segment = store.user(&event.user_id).and_then(|u| u.segment.as_deref());
            if user_segment != Some(segment.as_str()) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::parse_timestamp;

    fn event(id: &str, user: &str, event_type: EventType, ts: &str) -> Event {
        Event {
            event_id: id.into(),
            user_id: user.into(),
            session_id: Some(format!("{user}-s")),
            event_type,
            timestamp: parse_timestamp(ts).unwrap(),
            product_id: None,
            category: Some("Books".into()),
            price: None,
            quantity: None,
        }
    }

    fn user(id: &str, segment: &str) -> User {
        User {
            user_id: id.into(),
            registration_date: None,
            attributes: BTreeMap::new(),
            segment: Some(segment.into()),
        }
    }

    fn sample_store() -> EventStore {
        EventStore::new(
            vec![
                event("e3", "u2", EventType::Purchase, "2024-02-10 09:00:00"),
                event("e1", "u1", EventType::SessionStart, "2024-01-05 10:00:00"),
                event("e2", "u1", EventType::ProductView, "2024-01-05 10:01:00"),
            ],
            vec![user("u1", "premium"), user("u3", "regular")],
            Vec::new(),
        )
    }

    #[test]
    fn test_events_are_time_ordered() {
        let store = sample_store();
        let ids: Vec<_> = store.events().iter().map(|e| e.event_id.as_str()).collect();
        assert_eq!(ids, vec!["e1", "e2", "e3"]);
        let (first, last) = store.time_range().unwrap();
        assert!(first < last);
    }

    #[test]
    fn test_population_includes_event_only_users() {
        let store = sample_store();
        let population: Vec<_> = store.population().into_iter().collect();
        assert_eq!(population, vec!["u1", "u2", "u3"]);
    }

    #[test]
    fn test_filter_by_date_and_type() {
        let store = sample_store();
        let filter = EventFilter {
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1),
            end_date: NaiveDate::from_ymd_opt(2024, 1, 31),
            event_types: vec![EventType::ProductView],
            ..Default::default()
        };
        let filtered = store.filtered(&filter);
        assert_eq!(filtered.events().len(), 1);
        assert_eq!(filtered.events()[0].event_id, "e2");
        assert_eq!(filtered.users().len(), 2);
    }

    #[test]
    fn test_filter_by_segment_restricts_users() {
        let store = sample_store();
        let filter = EventFilter {
            segment: Some("premium".into()),
            ..Default::default()
        };
        let filtered = store.filtered(&filter);
        assert_eq!(filtered.events().len(), 2);
        assert_eq!(filtered.users().keys().collect::<Vec<_>>(), vec!["u1"]);
    }
}
