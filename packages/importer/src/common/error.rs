use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification attached to every failure sample and pipeline error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    ValidationError,
    DbError,
    ParseError,
    HttpError,
    #[default]
    Unknown,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::ValidationError => "VALIDATION_ERROR",
            ReasonCode::DbError => "DB_ERROR",
            ReasonCode::ParseError => "PARSE_ERROR",
            ReasonCode::HttpError => "HTTP_ERROR",
            ReasonCode::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by the import pipeline.
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("{message}")]
    Http { status: u16, message: String },

    #[error("XML parse failed: {message}")]
    Parse { message: String },

    #[error("{message}")]
    Validation { message: String },

    #[error("Database error: {0}")]
    Database(anyhow::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ImportError {
    pub fn http(message: impl Into<String>) -> Self {
        ImportError::Http {
            status: 502,
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        ImportError::Parse {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ImportError::Validation {
            message: message.into(),
        }
    }

    pub fn reason_code(&self) -> ReasonCode {
        match self {
            ImportError::Http { .. } => ReasonCode::HttpError,
            ImportError::Parse { .. } => ReasonCode::ParseError,
            ImportError::Validation { .. } => ReasonCode::ValidationError,
            ImportError::Database(_) => ReasonCode::DbError,
            ImportError::Other(_) => ReasonCode::Unknown,
        }
    }

    /// Status code suitable for surfacing to an HTTP caller.
    pub fn status_code(&self) -> u16 {
        match self {
            ImportError::Http { status, .. } => *status,
            ImportError::Parse { .. } => 400,
            ImportError::Validation { .. } => 422,
            ImportError::Database(_) | ImportError::Other(_) => 500,
        }
    }

    /// Contract violations are never going to succeed on redelivery.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ImportError::Validation { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_codes_serialize_in_screaming_case() {
        let json = serde_json::to_string(&ReasonCode::ValidationError).unwrap();
        assert_eq!(json, "\"VALIDATION_ERROR\"");

        let parsed: ReasonCode = serde_json::from_str("\"HTTP_ERROR\"").unwrap();
        assert_eq!(parsed, ReasonCode::HttpError);
    }

    #[test]
    fn test_http_errors_default_to_bad_gateway() {
        let err = ImportError::http("connection refused");
        assert_eq!(err.status_code(), 502);
        assert_eq!(err.reason_code(), ReasonCode::HttpError);
    }

    #[test]
    fn test_parse_errors_always_carry_parse_reason() {
        let err = ImportError::parse("unexpected end of document");
        assert_eq!(err.reason_code(), ReasonCode::ParseError);
        assert_eq!(err.status_code(), 400);
        assert!(err.to_string().starts_with("XML parse failed"));
    }

    #[test]
    fn test_only_validation_errors_are_permanent() {
        assert!(!ImportError::validation("missing runId").is_retryable());
        assert!(ImportError::Database(anyhow::anyhow!("deadlock")).is_retryable());
        assert!(ImportError::http("timeout").is_retryable());
    }
}
