//! JIRA client wrapper around gouqi
//!
//! Implements [`JiraTransport`] on top of gouqi's async client. Every call is
//! bounded by the configured request timeout, and every gouqi failure is
//! folded into a status code plus body text.

use crate::config::JiraConfig;
use crate::error::{JiraMcpError, JiraMcpResult};
use crate::transport::{ApiRequest, ApiResponse, JiraTransport, Method, SearchQuery};
use async_trait::async_trait;
use gouqi::r#async::Jira;
use gouqi::{SearchOptions, SearchResults};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

/// gouqi-backed transport
#[derive(Debug, Clone)]
pub struct JiraClient {
    pub(crate) client: Arc<Jira>,
    base_url: String,
    request_timeout: Duration,
}

impl JiraClient {
    /// Create a new JIRA client with the given configuration
    #[instrument(skip_all)]
    pub fn new(config: &JiraConfig) -> JiraMcpResult<Self> {
        info!("Initializing JIRA client for URL: {}", config.jira_url);

        let credentials = config.to_gouqi_credentials();
        let client = Jira::new(&config.jira_url, credentials).map_err(JiraMcpError::from)?;

        Ok(Self {
            client: Arc::new(client),
            base_url: config.jira_url.trim_end_matches('/').to_string(),
            request_timeout: Duration::from_secs(config.request_timeout_seconds),
        })
    }

    async fn dispatch(&self, request: &ApiRequest) -> Result<Value, gouqi::Error> {
        let api = request.family.api_name();
        let body = request.body.clone().unwrap_or(Value::Null);

        match (request.method, request.expects_content) {
            (Method::Get, _) => self.client.get::<Value>(api, &request.path).await,
            (Method::Post, true) => {
                self.client
                    .post::<Value, Value>(api, &request.path, body)
                    .await
            }
            (Method::Post, false) => self
                .client
                .post::<(), Value>(api, &request.path, body)
                .await
                .map(|_| Value::Null),
            (Method::Put, true) => self.client.put::<Value, Value>(api, &request.path, body).await,
            (Method::Put, false) => self
                .client
                .put::<(), Value>(api, &request.path, body)
                .await
                .map(|_| Value::Null),
        }
    }
}

/// Page of gouqi search results in the shape the engine reads
fn search_results_body(results: SearchResults) -> Value {
    let mut body = json!({
        "issues": results.issues,
        "total": results.total,
        "startAt": results.start_at,
        "maxResults": results.max_results,
    });
    if let Some(is_last) = results.is_last_page {
        body["isLast"] = Value::Bool(is_last);
    }
    body
}

/// Fold a gouqi failure into a status and body text
fn error_to_response(err: gouqi::Error) -> ApiResponse {
    let status = match &err {
        gouqi::Error::Unauthorized => 401,
        gouqi::Error::NotFound => 404,
        gouqi::Error::MethodNotAllowed => 405,
        gouqi::Error::Fault { code, .. } => code.as_u16(),
        gouqi::Error::Http(http) => http.status().map(|s| s.as_u16()).unwrap_or(0),
        _ => 0,
    };
    ApiResponse::text(status, err.to_string())
}

#[async_trait]
impl JiraTransport for JiraClient {
    #[instrument(skip(self), fields(request = %request))]
    async fn send(&self, request: ApiRequest) -> ApiResponse {
        debug!("Sending JIRA request");

        match timeout(self.request_timeout, self.dispatch(&request)).await {
            Ok(Ok(Value::Null)) => ApiResponse::new(204, Value::Null),
            Ok(Ok(body)) => ApiResponse::ok(body),
            Ok(Err(err)) => {
                let response = error_to_response(err);
                debug!("JIRA answered {}: {}", response.status, response.error_message());
                response
            }
            Err(_) => {
                warn!(
                    "JIRA request timed out after {}s",
                    self.request_timeout.as_secs()
                );
                ApiResponse::text(
                    0,
                    format!(
                        "Request timed out after {} seconds",
                        self.request_timeout.as_secs()
                    ),
                )
            }
        }
    }

    #[instrument(skip(self), fields(query = %query))]
    async fn search(&self, query: SearchQuery) -> ApiResponse {
        debug!("Searching JIRA");

        let options = SearchOptions::builder()
            .start_at(u64::from(query.start_at))
            .max_results(u64::from(query.max_results))
            .fields(vec!["*navigable"])
            .build();

        let search = self.client.search();
        match timeout(self.request_timeout, search.list(query.jql.as_str(), &options)).await {
            Ok(Ok(results)) => ApiResponse::ok(search_results_body(results)),
            Ok(Err(err)) => {
                let response = error_to_response(err);
                debug!("JIRA search answered {}: {}", response.status, response.error_message());
                response
            }
            Err(_) => {
                warn!(
                    "JIRA search timed out after {}s",
                    self.request_timeout.as_secs()
                );
                ApiResponse::text(
                    0,
                    format!(
                        "Search timed out after {} seconds",
                        self.request_timeout.as_secs()
                    ),
                )
            }
        }
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }
}
