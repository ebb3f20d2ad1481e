//! Read-side backend calls shared by the tools and the hierarchy aggregator

use crate::engine::dispatch::PathUsed;
use crate::engine::predicate::epic_children_predicate;
use crate::error::{JiraMcpError, JiraMcpResult};
use crate::transport::{ApiFamily, ApiRequest, JiraTransport, SearchQuery};
use serde_json::Value;
use tracing::{debug, instrument, warn};

/// Upper bound on children fetched for one aggregation
pub const MAX_CHILDREN: u32 = 200;

/// One page of issues
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchPage {
    pub issues: Vec<Value>,
    pub total: u64,
    pub start_at: u32,
    pub max_results: u32,
    /// Last-page flag when the backend reports one instead of a reliable total
    pub last_page: Option<bool>,
}

impl SearchPage {
    fn from_body(body: &Value, start_at: u32, max_results: u32) -> Self {
        let issues: Vec<Value> = body
            .get("issues")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let total = body
            .get("total")
            .and_then(Value::as_u64)
            .unwrap_or(issues.len() as u64);
        let last_page = body.get("isLast").and_then(Value::as_bool);

        Self {
            issues,
            total,
            start_at,
            max_results,
            last_page,
        }
    }

    pub fn is_last(&self) -> bool {
        self.last_page
            .unwrap_or_else(|| u64::from(self.start_at) + self.issues.len() as u64 >= self.total)
    }
}

/// Fetch one item through the generic endpoint
#[instrument(skip(transport))]
pub async fn fetch_issue(transport: &dyn JiraTransport, issue_key: &str) -> JiraMcpResult<Value> {
    transport
        .send(ApiRequest::get(
            ApiFamily::Platform,
            format!("/issue/{}", issue_key),
        ))
        .await
        .into_result(ApiFamily::Platform, issue_key)
}

/// Run a JQL search
#[instrument(skip(transport))]
pub async fn search(
    transport: &dyn JiraTransport,
    jql: &str,
    start_at: u32,
    max_results: u32,
) -> JiraMcpResult<SearchPage> {
    let response = transport
        .search(SearchQuery::new(jql, start_at, max_results))
        .await;

    if response.status == 400 {
        return Err(JiraMcpError::invalid_param(
            "jql",
            format!("JIRA rejected the query '{}': {}", jql, response.error_message()),
        ));
    }

    let body = response.into_result(ApiFamily::Platform, "search")?;
    let page = SearchPage::from_body(&body, start_at, max_results);
    debug!("Search returned {} of {} issues", page.issues.len(), page.total);
    Ok(page)
}

/// Issues of an epic: agile listing first, generic search when the agile
/// endpoint does not know the epic
#[instrument(skip(transport))]
pub async fn fetch_epic_children(
    transport: &dyn JiraTransport,
    epic_key: &str,
    max_results: u32,
) -> JiraMcpResult<(SearchPage, PathUsed)> {
    let response = transport
        .send(ApiRequest::get(
            ApiFamily::Agile,
            format!("/epic/{}/issue?startAt=0&maxResults={}", epic_key, max_results),
        ))
        .await;

    match response.error_kind(ApiFamily::Agile) {
        None => Ok((
            SearchPage::from_body(&response.body, 0, max_results),
            PathUsed::Primary,
        )),
        Some(kind) if !kind.is_terminal() => {
            warn!(
                "Agile epic listing unavailable for {}, falling back to search",
                epic_key
            );
            let jql = epic_children_predicate(epic_key).render();
            let page = search(transport, &jql, 0, max_results).await?;
            Ok((page, PathUsed::Fallback))
        }
        Some(kind) => Err(JiraMcpError::from_kind(
            kind,
            response.status,
            epic_key,
            response.error_message(),
        )),
    }
}
