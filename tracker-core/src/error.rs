use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Content source error: {0}")]
    Source(#[from] SourceError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("Transient source failure: {reason}")]
    Transient { reason: String },

    #[error("Request timeout")]
    RequestTimeout,

    #[error("Rate limit exceeded. Retry after {retry_after} seconds")]
    RateLimitExceeded { retry_after: u64 },

    #[error("Server error: {status_code}")]
    ServerError { status_code: u16 },

    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Forbidden access to resource: {resource}")]
    Forbidden { resource: String },

    #[error("Malformed data from source: {details}")]
    Malformed { details: String },
}

/// Coarse classification callers match on instead of individual variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceErrorKind {
    Transient,
    NotFound,
    Malformed,
    Permanent,
}

impl SourceError {
    pub fn kind(&self) -> SourceErrorKind {
        match self {
            SourceError::Transient { .. }
            | SourceError::RequestTimeout
            | SourceError::RateLimitExceeded { .. }
            | SourceError::ServerError { .. } => SourceErrorKind::Transient,
            SourceError::NotFound { .. } => SourceErrorKind::NotFound,
            SourceError::Malformed { .. } => SourceErrorKind::Malformed,
            SourceError::Forbidden { .. } => SourceErrorKind::Permanent,
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    pub fn malformed(details: impl Into<String>) -> Self {
        Self::Malformed {
            details: details.into(),
        }
    }

    pub fn transient(reason: impl std::fmt::Display) -> Self {
        Self::Transient {
            reason: reason.to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Failed to write {path}: {reason}")]
    Write { path: String, reason: String },

    #[error("Failed to serialize output: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    #[error("Configuration validation failed: {reason}")]
    ValidationFailed { reason: String },

    #[error("Configuration parsing error: {0}")]
    Parse(#[from] toml::de::Error),
}
