//! Error types and handling for the JIRA work item server
//!
//! Provides structured error types that map to MCP JSON-RPC error codes,
//! a data-free [`ErrorKind`] used inside dispatch outcomes, and conversions
//! from the errors of our dependencies.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Custom error types for the JIRA work item server
#[derive(Debug, Error)]
pub enum JiraMcpError {
    /// Configuration errors (-32001)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Authentication or permission failures (-32002)
    #[error("Authorization failed: {message}")]
    Authorization { message: String },

    /// Transport failures and timeouts (-32003)
    #[error("Network error: {message}")]
    Network { message: String },

    /// Resource not found errors (-32005)
    #[error("Not found: {resource} '{key}' not found")]
    NotFound { resource: String, key: String },

    /// Malformed input or a payload the backend rejected (-32006)
    #[error("Invalid parameter: {parameter} - {message}")]
    Validation { parameter: String, message: String },

    /// Rate limit exceeded errors (-32007)
    #[error("Rate limit exceeded, retry after {retry_after} seconds")]
    RateLimit { retry_after: u64 },

    /// A specialized endpoint does not support the request shape (-32008)
    ///
    /// Absorbed by the fallback step; only visible when the fallback fails too.
    #[error("Unsupported operation: {message}")]
    UnsupportedOperation { message: String },

    /// Backend answered with an unexpected server-side status (-32009)
    #[error("JIRA server error ({status}): {message}")]
    UnknownServer { status: u16, message: String },

    /// Internal server errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Data-free classification of a failure, reported inside outcomes and warnings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Authorization,
    UnsupportedOperation,
    RateLimit,
    Network,
    UnknownServer,
}

impl ErrorKind {
    /// Terminal kinds are reported as-is and never trigger a fallback attempt
    pub fn is_terminal(self) -> bool {
        !matches!(self, ErrorKind::UnsupportedOperation)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Authorization => "authorization",
            ErrorKind::UnsupportedOperation => "unsupported_operation",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Network => "network",
            ErrorKind::UnknownServer => "unknown_server",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl JiraMcpError {
    /// Get the MCP JSON-RPC error code for this error
    pub fn error_code(&self) -> i32 {
        match self {
            JiraMcpError::Configuration { .. } => -32001,
            JiraMcpError::Authorization { .. } => -32002,
            JiraMcpError::Network { .. } => -32003,
            JiraMcpError::NotFound { .. } => -32005,
            JiraMcpError::Validation { .. } => -32006,
            JiraMcpError::RateLimit { .. } => -32007,
            JiraMcpError::UnsupportedOperation { .. } => -32008,
            JiraMcpError::UnknownServer { .. } => -32009,
            JiraMcpError::Internal { .. } => -32603,
        }
    }

    /// Get the error category for logging and metrics
    pub fn category(&self) -> &'static str {
        match self {
            JiraMcpError::Configuration { .. } => "configuration",
            JiraMcpError::Internal { .. } => "internal",
            other => other.kind().map(ErrorKind::as_str).unwrap_or("internal"),
        }
    }

    /// Map onto the dispatch taxonomy; configuration and internal errors have no kind
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            JiraMcpError::Authorization { .. } => Some(ErrorKind::Authorization),
            JiraMcpError::Network { .. } => Some(ErrorKind::Network),
            JiraMcpError::NotFound { .. } => Some(ErrorKind::NotFound),
            JiraMcpError::Validation { .. } => Some(ErrorKind::Validation),
            JiraMcpError::RateLimit { .. } => Some(ErrorKind::RateLimit),
            JiraMcpError::UnsupportedOperation { .. } => Some(ErrorKind::UnsupportedOperation),
            JiraMcpError::UnknownServer { .. } => Some(ErrorKind::UnknownServer),
            JiraMcpError::Configuration { .. } | JiraMcpError::Internal { .. } => None,
        }
    }

    /// Get additional error data for MCP error responses
    pub fn error_data(&self) -> Option<Value> {
        let mut data = serde_json::Map::new();
        data.insert(
            "category".to_string(),
            Value::String(self.category().to_string()),
        );

        match self {
            JiraMcpError::RateLimit { retry_after } => {
                data.insert(
                    "retry_after".to_string(),
                    Value::Number((*retry_after).into()),
                );
            }
            JiraMcpError::NotFound { resource, key } => {
                data.insert("resource".to_string(), Value::String(resource.clone()));
                data.insert("key".to_string(), Value::String(key.clone()));
            }
            JiraMcpError::Validation { parameter, .. } => {
                data.insert("parameter".to_string(), Value::String(parameter.clone()));
            }
            JiraMcpError::UnknownServer { status, .. } => {
                data.insert("status".to_string(), Value::Number((*status).into()));
            }
            _ => {}
        }

        Some(Value::Object(data))
    }

    /// Build an error of the given kind from a backend status and body text
    pub fn from_kind(kind: ErrorKind, status: u16, resource_key: &str, message: String) -> Self {
        match kind {
            ErrorKind::Validation => JiraMcpError::invalid_param("fields", message),
            ErrorKind::NotFound => JiraMcpError::not_found("issue", resource_key),
            ErrorKind::Authorization => JiraMcpError::auth(message),
            ErrorKind::UnsupportedOperation => JiraMcpError::unsupported(message),
            ErrorKind::RateLimit => {
                JiraMcpError::rate_limit(extract_retry_after(&message).unwrap_or(60))
            }
            ErrorKind::Network => JiraMcpError::network(message),
            ErrorKind::UnknownServer => JiraMcpError::UnknownServer { status, message },
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        JiraMcpError::Configuration {
            message: message.into(),
        }
    }

    /// Create an authorization error
    pub fn auth(message: impl Into<String>) -> Self {
        JiraMcpError::Authorization {
            message: message.into(),
        }
    }

    /// Create a network error
    pub fn network(message: impl Into<String>) -> Self {
        JiraMcpError::Network {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(resource: impl Into<String>, key: impl Into<String>) -> Self {
        JiraMcpError::NotFound {
            resource: resource.into(),
            key: key.into(),
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_param(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        JiraMcpError::Validation {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Create a rate limit error
    pub fn rate_limit(retry_after: u64) -> Self {
        JiraMcpError::RateLimit { retry_after }
    }

    /// Create an unsupported operation error
    pub fn unsupported(message: impl Into<String>) -> Self {
        JiraMcpError::UnsupportedOperation {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        JiraMcpError::Internal {
            message: message.into(),
        }
    }
}

/// Convert from gouqi errors raised while building the client
impl From<gouqi::Error> for JiraMcpError {
    fn from(err: gouqi::Error) -> Self {
        match err {
            gouqi::Error::Http(_) => JiraMcpError::network(format!("HTTP error: {}", err)),
            gouqi::Error::IO(_) => JiraMcpError::network(format!("IO error: {}", err)),
            gouqi::Error::Serde(_) => {
                JiraMcpError::internal(format!("Serialization error: {}", err))
            }
            gouqi::Error::Unauthorized => JiraMcpError::auth("JIRA authentication failed"),
            gouqi::Error::NotFound => JiraMcpError::not_found("resource", "unknown"),
            _ => JiraMcpError::internal(format!("JIRA client error: {}", err)),
        }
    }
}

/// Convert from serde_json errors
impl From<serde_json::Error> for JiraMcpError {
    fn from(err: serde_json::Error) -> Self {
        JiraMcpError::internal(format!("JSON error: {}", err))
    }
}

/// Convert from TOML parsing errors
impl From<toml::de::Error> for JiraMcpError {
    fn from(err: toml::de::Error) -> Self {
        JiraMcpError::config(format!("TOML parsing error: {}", err))
    }
}

/// Convert from generic anyhow errors (configuration loading reports through anyhow)
impl From<anyhow::Error> for JiraMcpError {
    fn from(err: anyhow::Error) -> Self {
        let message = err.to_string();
        let lower_message = message.to_lowercase();

        if lower_message.contains("config")
            || lower_message.contains("jira url")
            || lower_message.contains("jira_")
        {
            JiraMcpError::config(message)
        } else if lower_message.contains("authentication") || lower_message.contains("unauthorized")
        {
            JiraMcpError::auth(message)
        } else if lower_message.contains("timeout") || lower_message.contains("connection") {
            JiraMcpError::network(message)
        } else {
            JiraMcpError::internal(message)
        }
    }
}

/// Helper function to extract retry-after from backend error text
pub fn extract_retry_after(error_message: &str) -> Option<u64> {
    let lower = error_message.to_lowercase();
    let (_, tail) = lower.split_once("retry-after")?;
    tail.split(|c: char| !c.is_ascii_digit())
        .find(|word| !word.is_empty())
        .and_then(|word| word.parse::<u64>().ok())
}

/// Result type alias for JIRA MCP operations
pub type JiraMcpResult<T> = Result<T, JiraMcpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(JiraMcpError::config("test").error_code(), -32001);
        assert_eq!(JiraMcpError::auth("test").error_code(), -32002);
        assert_eq!(JiraMcpError::network("test").error_code(), -32003);
        assert_eq!(
            JiraMcpError::not_found("issue", "KEY-123").error_code(),
            -32005
        );
        assert_eq!(
            JiraMcpError::invalid_param("status", "invalid").error_code(),
            -32006
        );
        assert_eq!(JiraMcpError::rate_limit(60).error_code(), -32007);
        assert_eq!(JiraMcpError::unsupported("epic").error_code(), -32008);
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(JiraMcpError::config("test").category(), "configuration");
        assert_eq!(JiraMcpError::auth("test").category(), "authorization");
        assert_eq!(JiraMcpError::network("test").category(), "network");
        assert_eq!(
            JiraMcpError::not_found("issue", "KEY-123").category(),
            "not_found"
        );
        assert_eq!(
            JiraMcpError::unsupported("x").category(),
            "unsupported_operation"
        );
    }

    #[test]
    fn test_only_unsupported_operation_is_non_terminal() {
        assert!(!ErrorKind::UnsupportedOperation.is_terminal());
        assert!(ErrorKind::Validation.is_terminal());
        assert!(ErrorKind::Authorization.is_terminal());
        assert!(ErrorKind::NotFound.is_terminal());
        assert!(ErrorKind::RateLimit.is_terminal());
    }

    #[test]
    fn test_error_data() {
        let rate_limit_error = JiraMcpError::rate_limit(120);
        let data = rate_limit_error.error_data().unwrap();

        assert_eq!(data["category"], "rate_limit");
        assert_eq!(data["retry_after"], 120);

        let not_found_error = JiraMcpError::not_found("issue", "KEY-123");
        let data = not_found_error.error_data().unwrap();

        assert_eq!(data["category"], "not_found");
        assert_eq!(data["resource"], "issue");
        assert_eq!(data["key"], "KEY-123");
    }

    #[test]
    fn test_from_kind_keeps_retry_after() {
        let err = JiraMcpError::from_kind(
            ErrorKind::RateLimit,
            429,
            "PROJ-1",
            "Too many requests, retry-after: 17".to_string(),
        );
        assert!(matches!(err, JiraMcpError::RateLimit { retry_after: 17 }));
    }

    #[test]
    fn test_anyhow_conversion() {
        let cfg_error = anyhow::anyhow!("JIRA URL is required");
        let jira_error: JiraMcpError = cfg_error.into();
        assert_eq!(jira_error.category(), "configuration");

        let auth_error = anyhow::anyhow!("Authentication failed");
        let jira_error: JiraMcpError = auth_error.into();
        assert_eq!(jira_error.category(), "authorization");
    }

    #[test]
    fn test_retry_after_extraction() {
        assert_eq!(
            extract_retry_after("Rate limit exceeded, retry-after 60"),
            Some(60)
        );
        assert_eq!(extract_retry_after("No retry info"), None);
    }
}
