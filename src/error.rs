// Error taxonomy shared by every stage of the pipeline.
//
// Data-quality anomalies (negative counts, zero denominators, infinite
// ratios) are never errors: they are clamped or dropped where they occur.
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DashboardError>;

#[derive(Debug, Error)]
pub enum DashboardError {
    /// Fewer rows than a delta or a model fit needs.
    #[error("Not enough data to {context}: need at least {required} rows, found {available}")]
    InsufficientData {
        context: &'static str,
        required: usize,
        available: usize,
    },

    /// A required secret or setting is absent from the environment.
    #[error("{key} is not set. Please set the {key} environment variable.")]
    MissingConfiguration { key: &'static str },

    /// The hosted language model call failed or returned something unusable.
    #[error("Chat backend error: {message}")]
    Backend { message: String },

    /// The forecasting model could not be fitted on the given data.
    #[error("Model fit failed: {message}")]
    ModelFit { message: String },

    #[error("Invalid {name} {value}: expected {expected}")]
    InvalidParameter {
        name: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("Unknown location: {0}")]
    UnknownLocation(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DashboardError {
    pub fn insufficient(context: &'static str, required: usize, available: usize) -> Self {
        Self::InsufficientData {
            context,
            required,
            available,
        }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// True for failures caused by missing input rather than a fault.
    pub fn is_insufficient_data(&self) -> bool {
        matches!(self, Self::InsufficientData { .. })
    }
}
