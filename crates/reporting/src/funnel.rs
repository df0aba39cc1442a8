//! Funnel analysis: tracks session or user progression through an ordered
//! sequence of stages.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use storefront_core::{AnalyticsError, AnalyticsResult, Event, EventStore, EventType};
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupingKey {
    #[default]
    Session,
    User,
}

impl std::str::FromStr for GroupingKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "session" => Ok(Self::Session),
            "user" => Ok(Self::User),
            other => Err(format!("unknown grouping key '{other}'")),
        }
    }
}

/// How a group earns credit for a stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOrdering {
    /// Stage k counts when stages 0..=k were all reached at some point.
    #[default]
    Reached,
    /// Like `Reached`, and each stage must first occur at or after the
    /// event credited for the previous one.
    Sequential,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunnelStage {
    pub name: String,
    /// The stage is reached by any event of one of these types.
    pub event_types: Vec<EventType>,
}

impl FunnelStage {
    pub fn new(name: impl Into<String>, event_types: Vec<EventType>) -> Self {
        Self {
            name: name.into(),
            event_types,
        }
    }

    fn matches(&self, event: &Event) -> bool {
        self.event_types.contains(&event.event_type)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunnelConfig {
    #[serde(default = "default_stages")]
    pub stages: Vec<FunnelStage>,
    #[serde(default)]
    pub group_by: GroupingKey,
    #[serde(default)]
    pub ordering: StageOrdering,
    /// Only events within this many hours of the group's first stage-0 event count.
    #[serde(default)]
    pub conversion_window_hours: Option<u32>,
}

fn default_stages() -> Vec<FunnelStage> {
    vec![
        FunnelStage::new("Sessions", vec![EventType::SessionStart]),
        FunnelStage::new("Product Views", vec![EventType::ProductView]),
        FunnelStage::new("Cart Adds", vec![EventType::AddToCart]),
        FunnelStage::new("Purchases", vec![EventType::Purchase]),
    ]
}

impl Default for FunnelConfig {
    fn default() -> Self {
        Self {
            stages: default_stages(),
            group_by: GroupingKey::default(),
            ordering: StageOrdering::default(),
            conversion_window_hours: None,
        }
    }
}

impl FunnelConfig {
    pub fn validate(&self) -> AnalyticsResult<()> {
        if self.stages.is_empty() {
            return Err(AnalyticsError::configuration(
                "funnel needs at least one stage",
            ));
        }
        let mut names = HashSet::new();
        for (order, stage) in self.stages.iter().enumerate() {
            if stage.name.trim().is_empty() {
                return Err(AnalyticsError::configuration(format!(
                    "funnel stage {order} has an empty name"
                )));
            }
            if !names.insert(stage.name.as_str()) {
                return Err(AnalyticsError::configuration(format!(
                    "funnel stage name '{}' is used twice",
                    stage.name
                )));
            }
            if stage.event_types.is_empty() {
                return Err(AnalyticsError::configuration(format!(
                    "funnel stage '{}' matches no event type",
                    stage.name
                )));
            }
        }
        if self.conversion_window_hours == Some(0) {
            return Err(AnalyticsError::configuration(
                "funnel.conversion_window_hours must be positive",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunnelRecord {
    pub stage_name: String,
    pub stage_order: usize,
    pub entrant_count: u64,
    pub conversion_rate_from_previous: f64,
    pub conversion_rate_from_first: f64,
    /// Groups credited at the previous stage but not this one. For the first
    /// stage: groups that never reached it.
    pub drop_off_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunnelReport {
    pub group_by: GroupingKey,
    pub ordering: StageOrdering,
    pub total_groups: u64,
    /// Events skipped because they carry no session id under session grouping.
    pub ungrouped_events: u64,
    pub stages: Vec<FunnelRecord>,
    pub overall_conversion_rate: f64,
}

impl FunnelReport {
    pub fn counts(&self) -> Vec<u64> {
        self.stages.iter().map(|s| s.entrant_count).collect()
    }
}

pub struct FunnelAnalyzer {
    config: FunnelConfig,
}

impl FunnelAnalyzer {
    pub fn new(config: FunnelConfig) -> AnalyticsResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &FunnelConfig {
        &self.config
    }

    pub fn analyze(&self, store: &EventStore) -> AnalyticsResult<FunnelReport> {
        let mut groups: BTreeMap<&str, Vec<&Event>> = BTreeMap::new();
        let mut ungrouped_events = 0u64;
        for event in store.events() {
            let key = match self.config.group_by {
                GroupingKey::Session => event.session_id.as_deref(),
                GroupingKey::User => Some(event.user_id.as_str()),
            };
            match key {
                Some(key) => groups.entry(key).or_default().push(event),
                None => ungrouped_events += 1,
            }
        }

        let stage_count = self.config.stages.len();
        let mut counts = vec![0u64; stage_count];
        for events in groups.values() {
            let depth = self.depth_reached(events);
            for count in counts.iter_mut().take(depth) {
                *count += 1;
            }
        }

        let first = counts[0];
        if first == 0 {
            return Err(AnalyticsError::empty_population(format!(
                "no group reached funnel stage '{}'",
                self.config.stages[0].name
            )));
        }

        let total_groups = groups.len() as u64;
        let stages = self
            .config
            .stages
            .iter()
            .enumerate()
            .map(|(order, stage)| {
                let count = counts[order];
                let previous = if order == 0 { total_groups } else { counts[order - 1] };
                let conversion_rate_from_previous = if order == 0 {
                    1.0
                } else if previous > 0 {
                    count as f64 / previous as f64
                } else {
                    0.0
                };
                FunnelRecord {
                    stage_name: stage.name.clone(),
                    stage_order: order,
                    entrant_count: count,
                    conversion_rate_from_previous,
                    conversion_rate_from_first: count as f64 / first as f64,
                    drop_off_count: previous.saturating_sub(count),
                }
            })
            .collect::<Vec<_>>();

        let overall_conversion_rate = stages
            .last()
            .map_or(0.0, |s| s.conversion_rate_from_first);

        debug!(
            groups = total_groups,
            stages = stage_count,
            overall = overall_conversion_rate,
            "Funnel computed"
        );

        Ok(FunnelReport {
            group_by: self.config.group_by,
            ordering: self.config.ordering,
            total_groups,
            ungrouped_events,
            stages,
            overall_conversion_rate,
        })
    }

    /// Number of leading stages a group is credited with.
    fn depth_reached(&self, events: &[&Event]) -> usize {
        let stages = &self.config.stages;
        let Some(entry) = events.iter().find(|e| stages[0].matches(e)) else {
            return 0;
        };
        let window_end = self
            .config
            .conversion_window_hours
            .map(|h| entry.timestamp + Duration::hours(h as i64));
        let in_window = |e: &&&Event| match window_end {
            Some(end) => e.timestamp >= entry.timestamp && e.timestamp <= end,
            None => true,
        };

        match self.config.ordering {
            StageOrdering::Reached => {
                let reached: HashSet<usize> = events
                    .iter()
                    .filter(in_window)
                    .flat_map(|e| {
                        stages
                            .iter()
                            .enumerate()
                            .filter(move |(_, s)| s.matches(e))
                            .map(|(i, _)| i)
                    })
                    .collect();
                (0..stages.len()).take_while(|i| reached.contains(i)).count()
            }
            StageOrdering::Sequential => {
                let mut cursor = entry.timestamp;
                let mut depth = 1;
                for stage in &stages[1..] {
                    let next = events
                        .iter()
                        .filter(in_window)
                        .find(|e| e.timestamp >= cursor && stage.matches(e));
                    match next {
                        Some(e) => {
                            cursor = e.timestamp;
                            depth += 1;
                        }
                        None => break,
                    }
                }
                depth
            }
        }
    }
}
