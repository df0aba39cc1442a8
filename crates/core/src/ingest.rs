//! Record validation: turns raw snapshot rows into typed records.
//!
//! Malformed rows are rejected one by one and reported in
//! [`IngestDiagnostics`]; a bad row never aborts the batch. Numeric fields that
//! cannot be read are cleared on the record (so it drops out of monetary
//! aggregation) and counted separately.

use crate::error::{AnalyticsError, AnalyticsResult};
use crate::store::EventStore;
use crate::types::{
    id_from_value, number_from_value, parse_timestamp, Event, EventType, Product, RawEvent,
    RawProduct, RawUser, Snapshot, User,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Event,
    User,
    Product,
}

/// One problem found on one input row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordIssue {
    pub kind: RecordKind,
    pub index: usize,
    pub record_id: Option<String>,
    pub field: String,
    pub reason: String,
    /// `true` when the whole record was dropped, `false` when only a field was cleared.
    pub rejected: bool,
}

impl RecordIssue {
    fn new(kind: RecordKind, record_id: Option<String>, error: AnalyticsError, rejected: bool) -> Self {
        match error {
            AnalyticsError::InputValidation {
                index,
                field,
                reason,
            } => Self {
                kind,
                index,
                record_id,
                field,
                reason,
                rejected,
            },
            other => Self {
                kind,
                index: 0,
                record_id,
                field: String::new(),
                reason: other.to_string(),
                rejected,
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestDiagnostics {
    pub total_events: usize,
    pub accepted_events: usize,
    pub rejected_events: usize,
    /// Events kept with a cleared `price` or `quantity`.
    pub invalid_numeric: usize,
    pub total_users: usize,
    pub rejected_users: usize,
    pub total_products: usize,
    pub rejected_products: usize,
    pub issues: Vec<RecordIssue>,
}

impl IngestDiagnostics {
    /// Number of rows dropped for missing or unreadable required fields.
    pub fn malformed_count(&self) -> usize {
        self.rejected_events + self.rejected_users + self.rejected_products
    }
}

/// Validate every row of a snapshot and build the read-only store.
pub fn ingest(snapshot: Snapshot) -> (EventStore, IngestDiagnostics) {
    let mut diagnostics = IngestDiagnostics {
        total_events: snapshot.events.len(),
        total_users: snapshot.users.len(),
        total_products: snapshot.products.len(),
        ..Default::default()
    };

    let mut users = Vec::with_capacity(snapshot.users.len());
    let mut seen_users = HashSet::new();
    for (index, raw) in snapshot.users.iter().enumerate() {
        let record_id = raw.user_id.as_ref().and_then(id_from_value);
        match validate_user(index, raw) {
            Ok((user, warning)) if seen_users.insert(user.user_id.clone()) => {
                if let Some(warning) = warning {
                    diagnostics
                        .issues
                        .push(RecordIssue::new(RecordKind::User, record_id, warning, false));
                }
                users.push(user);
            }
            Ok((user, _)) => {
                diagnostics.rejected_users += 1;
                let error = AnalyticsError::input(index, "user_id", format!("duplicate id '{}'", user.user_id));
                diagnostics
                    .issues
                    .push(RecordIssue::new(RecordKind::User, record_id, error, true));
            }
            Err(error) => {
                diagnostics.rejected_users += 1;
                diagnostics
                    .issues
                    .push(RecordIssue::new(RecordKind::User, record_id, error, true));
            }
        }
    }

    let mut products = Vec::with_capacity(snapshot.products.len());
    let mut seen_products = HashSet::new();
    for (index, raw) in snapshot.products.iter().enumerate() {
        let record_id = raw.product_id.as_ref().and_then(id_from_value);
        let outcome = validate_product(index, raw).and_then(|product| {
            if seen_products.insert(product.product_id.clone()) {
                Ok(product)
            } else {
                Err(AnalyticsError::input(
                    index,
                    "product_id",
                    format!("duplicate id '{}'", product.product_id),
                ))
            }
        });
        match outcome {
            Ok(product) => products.push(product),
            Err(error) => {
                diagnostics.rejected_products += 1;
                diagnostics
                    .issues
                    .push(RecordIssue::new(RecordKind::Product, record_id, error, true));
            }
        }
    }

    let mut events = Vec::with_capacity(snapshot.events.len());
    let mut seen_events = HashSet::new();
    for (index, raw) in snapshot.events.iter().enumerate() {
        let record_id = raw.event_id.as_ref().and_then(id_from_value);
        let outcome = validate_event(index, raw).and_then(|(event, warnings)| {
            if seen_events.insert(event.event_id.clone()) {
                Ok((event, warnings))
            } else {
                Err(AnalyticsError::input(
                    index,
                    "event_id",
                    format!("duplicate id '{}'", event.event_id),
                ))
            }
        });
        match outcome {
            Ok((event, warnings)) => {
                if !warnings.is_empty() {
                    diagnostics.invalid_numeric += 1;
                }
                for warning in warnings {
                    diagnostics.issues.push(RecordIssue::new(
                        RecordKind::Event,
                        record_id.clone(),
                        warning,
                        false,
                    ));
                }
                events.push(event);
            }
            Err(error) => {
                debug!(index, error = %error, "Rejected event record");
                diagnostics.rejected_events += 1;
                diagnostics
                    .issues
                    .push(RecordIssue::new(RecordKind::Event, record_id, error, true));
            }
        }
    }
    diagnostics.accepted_events = events.len();

    metrics::counter!("ingest.events.accepted").increment(diagnostics.accepted_events as u64);
    metrics::counter!("ingest.events.rejected").increment(diagnostics.rejected_events as u64);
    metrics::counter!("ingest.events.invalid_numeric").increment(diagnostics.invalid_numeric as u64);

    info!(
        accepted = diagnostics.accepted_events,
        rejected = diagnostics.rejected_events,
        invalid_numeric = diagnostics.invalid_numeric,
        users = users.len(),
        products = products.len(),
        "Snapshot ingested"
    );

    (EventStore::new(events, users, products), diagnostics)
}

/// Validate one event row.
///
/// Returns the typed event plus any non-fatal numeric problems; the error
/// path means the row is rejected.
pub fn validate_event(
    index: usize,
    raw: &RawEvent,
) -> AnalyticsResult<(Event, Vec<AnalyticsError>)> {
    let user_id = raw
        .user_id
        .as_ref()
        .and_then(id_from_value)
        .ok_or_else(|| AnalyticsError::input(index, "user_id", "is missing"))?;

    let event_type = match &raw.event_type {
        Some(serde_json::Value::String(s)) => s
            .parse::<EventType>()
            .map_err(|reason| AnalyticsError::input(index, "event_type", reason))?,
        Some(serde_json::Value::Null) | None => {
            return Err(AnalyticsError::input(index, "event_type", "is missing"))
        }
        Some(other) => {
            return Err(AnalyticsError::input(
                index,
                "event_type",
                format!("is not a string: {other}"),
            ))
        }
    };

    let timestamp = match &raw.timestamp {
        Some(serde_json::Value::String(s)) => parse_timestamp(s).ok_or_else(|| {
            AnalyticsError::input(index, "timestamp", format!("cannot be parsed: '{s}'"))
        })?,
        Some(serde_json::Value::Null) | None => {
            return Err(AnalyticsError::input(index, "timestamp", "is missing"))
        }
        Some(other) => {
            return Err(AnalyticsError::input(
                index,
                "timestamp",
                format!("is not a string: {other}"),
            ))
        }
    };

    let mut warnings = Vec::new();

    let price = match raw.price.as_ref().filter(|v| !v.is_null()) {
        None => None,
        Some(value) => match number_from_value(value) {
            Some(p) if p >= 0.0 => Some(p),
            _ => {
                warnings.push(AnalyticsError::input(
                    index,
                    "price",
                    format!("is not a non-negative number: {value}"),
                ));
                None
            }
        },
    };

    let quantity = match raw.quantity.as_ref().filter(|v| !v.is_null()) {
        None => None,
        Some(value) => match number_from_value(value) {
            Some(q) if q >= 0.0 && q.fract() == 0.0 && q <= u32::MAX as f64 => Some(q as u32),
            _ => {
                warnings.push(AnalyticsError::input(
                    index,
                    "quantity",
                    format!("is not a non-negative integer: {value}"),
                ));
                None
            }
        },
    };

    let event = Event {
        event_id: raw
            .event_id
            .as_ref()
            .and_then(id_from_value)
            .unwrap_or_else(|| format!("row-{index}")),
        user_id,
        session_id: raw.session_id.as_ref().and_then(id_from_value),
        event_type,
        timestamp,
        product_id: raw.product_id.as_ref().and_then(id_from_value),
        category: raw.category.clone().filter(|c| !c.trim().is_empty()),
        price,
        quantity,
    };

    Ok((event, warnings))
}

/// Validate one user row. An unreadable registration date is reported but
/// not fatal: the cohort engine falls back to the first event.
pub fn validate_user(
    index: usize,
    raw: &RawUser,
) -> AnalyticsResult<(User, Option<AnalyticsError>)> {
    let user_id = raw
        .user_id
        .as_ref()
        .and_then(id_from_value)
        .ok_or_else(|| AnalyticsError::input(index, "user_id", "is missing"))?;

    let mut warning = None;
    let registration_date = match raw.registration_date.as_ref().filter(|v| !v.is_null()) {
        None => None,
        Some(serde_json::Value::String(s)) => {
            let parsed = parse_timestamp(s);
            if parsed.is_none() {
                warning = Some(AnalyticsError::input(
                    index,
                    "registration_date",
                    format!("cannot be parsed: '{s}'"),
                ));
            }
            parsed
        }
        Some(other) => {
            warning = Some(AnalyticsError::input(
                index,
                "registration_date",
                format!("is not a string: {other}"),
            ));
            None
        }
    };

    Ok((
        User {
            user_id,
            registration_date,
            attributes: raw.attributes.clone(),
            segment: raw.segment.clone(),
        },
        warning,
    ))
}

pub fn validate_product(index: usize, raw: &RawProduct) -> AnalyticsResult<Product> {
    let product_id = raw
        .product_id
        .as_ref()
        .and_then(id_from_value)
        .ok_or_else(|| AnalyticsError::input(index, "product_id", "is missing"))?;
    let price = match raw.price.as_ref().filter(|v| !v.is_null()) {
        None => None,
        Some(value) => Some(
            number_from_value(value)
                .filter(|p| *p >= 0.0)
                .ok_or_else(|| {
                    AnalyticsError::input(index, "price", format!("is not a non-negative number: {value}"))
                })?,
        ),
    };
    Ok(Product {
        product_id,
        name: raw.name.clone(),
        category: raw.category.clone(),
        price,
    })
}
