use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Interaction kinds recorded by the storefront.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SessionStart,
    ProductView,
    AddToCart,
    Purchase,
    SessionEnd,
}

impl EventType {
    pub const ALL: [EventType; 5] = [
        EventType::SessionStart,
        EventType::ProductView,
        EventType::AddToCart,
        EventType::Purchase,
        EventType::SessionEnd,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionStart => "session_start",
            Self::ProductView => "product_view",
            Self::AddToCart => "add_to_cart",
            Self::Purchase => "purchase",
            Self::SessionEnd => "session_end",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "session_start" => Ok(Self::SessionStart),
            "product_view" => Ok(Self::ProductView),
            "add_to_cart" => Ok(Self::AddToCart),
            "purchase" => Ok(Self::Purchase),
            "session_end" => Ok(Self::SessionEnd),
            other => Err(format!("unknown event type '{other}'")),
        }
    }
}

// ─── Raw input rows ─────────────────────────────────────────────────────────

/// Event row as supplied by the event store, before validation.
///
/// Every field is optional so that a malformed row can be reported instead of
/// failing deserialization of the whole batch. Ids may arrive as strings or
/// integers; `price` and `quantity` are kept as raw JSON values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(default)]
    pub event_id: Option<serde_json::Value>,
    #[serde(default)]
    pub user_id: Option<serde_json::Value>,
    #[serde(default)]
    pub session_id: Option<serde_json::Value>,
    #[serde(default)]
    pub event_type: Option<serde_json::Value>,
    #[serde(default)]
    pub timestamp: Option<serde_json::Value>,
    #[serde(default)]
    pub product_id: Option<serde_json::Value>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub price: Option<serde_json::Value>,
    #[serde(default)]
    pub quantity: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawUser {
    #[serde(default)]
    pub user_id: Option<serde_json::Value>,
    #[serde(default)]
    pub registration_date: Option<serde_json::Value>,
    #[serde(default)]
    pub segment: Option<String>,
    /// Demographic attributes (age, gender, location, ...), passed through untouched.
    #[serde(flatten)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawProduct {
    #[serde(default)]
    pub product_id: Option<serde_json::Value>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub price: Option<serde_json::Value>,
}

/// On-disk snapshot: reference tables plus the event log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub users: Vec<RawUser>,
    #[serde(default)]
    pub products: Vec<RawProduct>,
    #[serde(default)]
    pub events: Vec<RawEvent>,
}

// ─── Validated records ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub user_id: String,
    pub session_id: Option<String>,
    pub event_type: EventType,
    pub timestamp: NaiveDateTime,
    pub product_id: Option<String>,
    pub category: Option<String>,
    pub price: Option<f64>,
    pub quantity: Option<u32>,
}

impl Event {
    /// Price × quantity, when both fields passed validation.
    pub fn line_total(&self) -> Option<f64> {
        Some(self.price? * self.quantity? as f64)
    }

    pub fn is_purchase(&self) -> bool {
        self.event_type == EventType::Purchase
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub registration_date: Option<NaiveDateTime>,
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
    /// Derived label; overwritten whenever segmentation runs.
    pub segment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub product_id: String,
    pub name: Option<String>,
    pub category: Option<String>,
    pub price: Option<f64>,
}

// ─── Field helpers ──────────────────────────────────────────────────────────

/// Render a JSON id (string or integer) as a non-empty string.
pub fn id_from_value(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse a number carried either as a JSON number or a numeric string.
pub fn number_from_value(value: &serde_json::Value) -> Option<f64> {
    let n = match value {
        serde_json::Value::Number(n) => n.as_f64()?,
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// Parse a timestamp without any timezone conversion.
///
/// RFC 3339 inputs keep their wall-clock reading and drop the offset.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_local());
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}
