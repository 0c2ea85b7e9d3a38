use thiserror::Error;

/// Validation errors for caller-supplied parameters.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("latitude {value} must be within [-90, 90]")]
    LatitudeOutOfRange { value: f64 },
    #[error("longitude {value} must be within [-180, 180]")]
    LongitudeOutOfRange { value: f64 },
    #[error("field '{field}' must be finite")]
    NonFiniteValue { field: &'static str },

    #[error("search query must be at least {min} characters")]
    QueryTooShort { min: usize },
    #[error("result limit {value} must be within [{min}, {max}]")]
    LimitOutOfRange { value: usize, min: usize, max: usize },
    #[error("language tag cannot be empty")]
    EmptyLanguage,
    #[error("country codes must be comma separated ISO 3166-1 alpha-2 codes: '{value}'")]
    InvalidCountryCodes { value: String },

    #[error("timezone cannot be empty")]
    EmptyTimezone,
    #[error("date range end {end} is before start {start}")]
    InvertedDateRange { start: String, end: String },
}

/// Top-level error type for core operations that touch the filesystem.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to start blocking runtime: {0}")]
    Runtime(String),
}
