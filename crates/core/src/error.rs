use thiserror::Error;

pub type AnalyticsResult<T> = Result<T, AnalyticsError>;

#[derive(Error, Debug)]
pub enum AnalyticsError {
    /// A single input record is malformed. Reported per record; the batch continues.
    #[error("Invalid record #{index}: {field} {reason}")]
    InputValidation {
        index: usize,
        field: String,
        reason: String,
    },

    /// A ratio or model would be computed over zero members.
    #[error("Empty population: {0}")]
    EmptyPopulation(String),

    /// Invalid engine configuration. Raised before any computation starts.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AnalyticsError {
    pub fn input(index: usize, field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InputValidation {
            index,
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn empty_population(msg: impl Into<String>) -> Self {
        Self::EmptyPopulation(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Short machine-readable kind, used in reports and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InputValidation { .. } => "input_validation",
            Self::EmptyPopulation(_) => "empty_population",
            Self::Configuration(_) => "configuration",
            Self::Serialization(_) => "serialization",
            Self::Io(_) => "io",
            Self::Internal(_) => "internal",
        }
    }
}
