//! Request/response contract between the engine and the JIRA backend
//!
//! The engine never talks HTTP directly. It hands an [`ApiRequest`] to a
//! [`JiraTransport`] and always gets an [`ApiResponse`] back: failures are a
//! status code plus body, never an `Err`. Status `0` marks a transport
//! failure or a timeout.

use crate::error::{ErrorKind, JiraMcpError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// HTTP method subset used by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    Get,
    Post,
    Put,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
        };
        f.write_str(name)
    }
}

/// Which REST surface a request is addressed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiFamily {
    /// The generic item CRUD surface, usable for any category
    Platform,
    /// The agile surface; understands epics and their issues only
    Agile,
}

impl ApiFamily {
    /// gouqi api name for the family
    pub fn api_name(self) -> &'static str {
        match self {
            ApiFamily::Platform => "api",
            ApiFamily::Agile => "agile",
        }
    }

    pub fn is_specialized(self) -> bool {
        matches!(self, ApiFamily::Agile)
    }
}

/// A single backend call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiRequest {
    pub method: Method,
    pub family: ApiFamily,
    /// Endpoint path below the family root, e.g. `/issue/PROJ-1`
    pub path: String,
    pub body: Option<Value>,
    /// Whether the endpoint answers with a JSON body (false for 204 endpoints)
    pub expects_content: bool,
}

impl ApiRequest {
    pub fn get(family: ApiFamily, path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            family,
            path: path.into(),
            body: None,
            expects_content: true,
        }
    }

    pub fn post(family: ApiFamily, path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            family,
            path: path.into(),
            body: Some(body),
            expects_content: true,
        }
    }

    pub fn put(family: ApiFamily, path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Put,
            family,
            path: path.into(),
            body: Some(body),
            expects_content: false,
        }
    }

    /// Mark the request as answering `204 No Content`
    pub fn without_content(mut self) -> Self {
        self.expects_content = false;
        self
    }
}

impl fmt::Display for ApiRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}:{}", self.method, self.family.api_name(), self.path)
    }
}

/// A JQL search page request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchQuery {
    pub jql: String,
    #[serde(rename = "startAt")]
    pub start_at: u32,
    #[serde(rename = "maxResults")]
    pub max_results: u32,
}

impl SearchQuery {
    pub fn new(jql: impl Into<String>, start_at: u32, max_results: u32) -> Self {
        Self {
            jql: jql.into(),
            start_at,
            max_results,
        }
    }
}

impl fmt::Display for SearchQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "search '{}' [{}+{}]",
            self.jql, self.start_at, self.max_results
        )
    }
}

/// Backend answer: a status and either JSON or text (as a JSON string)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    pub fn ok(body: Value) -> Self {
        Self::new(200, body)
    }

    pub fn text(status: u16, text: impl Into<String>) -> Self {
        Self::new(status, Value::String(text.into()))
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Classify a non-success status for a request sent to `family`
    pub fn error_kind(&self, family: ApiFamily) -> Option<ErrorKind> {
        if self.is_success() {
            return None;
        }
        Some(classify_status(self.status, family))
    }

    /// Human-readable error text extracted from the body
    pub fn error_message(&self) -> String {
        match &self.body {
            Value::String(text) => text.clone(),
            Value::Object(map) => {
                let mut parts: Vec<String> = map
                    .get("errorMessages")
                    .and_then(Value::as_array)
                    .map(|messages| {
                        messages
                            .iter()
                            .filter_map(Value::as_str)
                            .map(String::from)
                            .collect()
                    })
                    .unwrap_or_default();

                if let Some(errors) = map.get("errors").and_then(Value::as_object) {
                    for (field, message) in errors {
                        let message = message.as_str().unwrap_or_default();
                        parts.push(format!("{}: {}", field, message));
                    }
                }

                if parts.is_empty() {
                    Value::Object(map.clone()).to_string()
                } else {
                    parts.join("; ")
                }
            }
            Value::Null => format!("HTTP {}", self.status),
            other => other.to_string(),
        }
    }

    /// Field keys the backend rejected (`errors` object of a 400 answer)
    pub fn rejected_fields(&self) -> Vec<String> {
        self.body
            .get("errors")
            .and_then(Value::as_object)
            .map(|errors| errors.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Convert into a JSON body or the matching error
    pub fn into_result(self, family: ApiFamily, resource_key: &str) -> Result<Value, JiraMcpError> {
        match self.error_kind(family) {
            None => Ok(self.body),
            Some(kind) => Err(JiraMcpError::from_kind(
                kind,
                self.status,
                resource_key,
                self.error_message(),
            )),
        }
    }
}

/// Map a status code onto the error taxonomy.
///
/// A 404 from the specialized family means the endpoint does not know the
/// shape of the item (team-managed projects, non-epic keys), so it is an
/// unsupported operation there and a plain not-found on the generic family.
pub fn classify_status(status: u16, family: ApiFamily) -> ErrorKind {
    match status {
        0 => ErrorKind::Network,
        400 | 422 => ErrorKind::Validation,
        401 | 403 => ErrorKind::Authorization,
        404 if family.is_specialized() => ErrorKind::UnsupportedOperation,
        404 | 410 => ErrorKind::NotFound,
        405 | 415 | 501 => ErrorKind::UnsupportedOperation,
        429 => ErrorKind::RateLimit,
        _ => ErrorKind::UnknownServer,
    }
}

/// Authenticated access to the backend
#[async_trait]
pub trait JiraTransport: Send + Sync + fmt::Debug {
    /// Issue one request; never fails outside of the returned status
    async fn send(&self, request: ApiRequest) -> ApiResponse;

    /// Run one JQL search page. A successful answer carries `issues`,
    /// `total`, `startAt` and `maxResults`, plus `isLast` when the backend
    /// reports it.
    async fn search(&self, query: SearchQuery) -> ApiResponse;

    /// Base URL of the instance, used to build browse links
    fn base_url(&self) -> &str;
}
