use crate::error::*;
use std::time::Duration;
use tracing::{error, warn};

pub trait ErrorExt {
    fn log_error(&self) -> &Self;
    fn log_warn(&self) -> &Self;
    fn is_retryable(&self) -> bool;
    fn retry_after(&self) -> Option<Duration>;
    fn error_code(&self) -> String;
}

impl ErrorExt for CoreError {
    fn log_error(&self) -> &Self {
        error!("CoreError: {}", self);
        match self {
            CoreError::Source(e) => {
                error!("Content source error details: {:?}", e);
            }
            CoreError::Persistence(e) => {
                error!("Persistence error details: {:?}", e);
            }
            CoreError::Config(e) => {
                error!("Configuration error details: {:?}", e);
            }
            _ => {}
        }
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("CoreError (warning): {}", self);
        self
    }

    fn is_retryable(&self) -> bool {
        match self {
            CoreError::Source(e) => e.is_retryable(),
            // A failed flush keeps its batch and is attempted again next cycle
            CoreError::Persistence(_) => true,
            CoreError::Io(_) => true,
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            CoreError::Source(e) => e.retry_after(),
            _ if self.is_retryable() => Some(Duration::from_secs(5)),
            _ => None,
        }
    }

    fn error_code(&self) -> String {
        match self {
            CoreError::Source(e) => e.error_code(),
            CoreError::Persistence(_) => "PERSISTENCE".to_string(),
            CoreError::Config(_) => "CONFIG".to_string(),
            CoreError::Io(_) => "IO".to_string(),
            CoreError::Serialization(_) => "SERIALIZATION".to_string(),
            CoreError::Internal { .. } => "INTERNAL".to_string(),
        }
    }
}

impl ErrorExt for SourceError {
    fn log_error(&self) -> &Self {
        error!("SourceError: {}", self);
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("SourceError (warning): {}", self);
        self
    }

    fn is_retryable(&self) -> bool {
        self.kind() == SourceErrorKind::Transient
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            SourceError::RateLimitExceeded { retry_after } => {
                Some(Duration::from_secs(*retry_after))
            }
            _ if self.is_retryable() => Some(Duration::from_secs(30)),
            _ => None,
        }
    }

    fn error_code(&self) -> String {
        match self {
            SourceError::Transient { .. } => "SOURCE_TRANSIENT".to_string(),
            SourceError::RequestTimeout => "SOURCE_TIMEOUT".to_string(),
            SourceError::RateLimitExceeded { .. } => "SOURCE_RATE_LIMIT".to_string(),
            SourceError::ServerError { .. } => "SOURCE_SERVER_ERROR".to_string(),
            SourceError::NotFound { .. } => "SOURCE_NOT_FOUND".to_string(),
            SourceError::Forbidden { .. } => "SOURCE_FORBIDDEN".to_string(),
            SourceError::Malformed { .. } => "SOURCE_MALFORMED".to_string(),
        }
    }
}
