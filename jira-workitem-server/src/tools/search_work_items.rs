//! Search work items tool
//!
//! Structured filters are compiled to JQL, one page is fetched and every
//! hit is normalized. Hierarchy aggregation per hit is optional and runs
//! with bounded concurrency.

use crate::cache::Connection;
use crate::config::JiraConfig;
use crate::engine::fetch::search;
use crate::engine::hierarchy::{aggregate, HierarchyContext};
use crate::engine::normalize::{normalize_issue, NormalizedItem};
use crate::engine::predicate::{build_predicate, SearchFilter};
use crate::error::{JiraMcpError, JiraMcpResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info, instrument};

const MAX_LIMIT: u32 = 200;
const MAX_START_AT: u32 = 10_000;

/// Parameters for the search_work_items tool
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SearchWorkItemsParams {
    #[serde(flatten)]
    pub filter: SearchFilter,

    /// Maximum results to return (optional, default from configuration, max: 200)
    pub limit: Option<u32>,

    /// Starting offset for pagination (optional, default: 0)
    pub start_at: Option<u32>,

    /// Attach hierarchy context to every hit (optional, default: false)
    pub include_hierarchy: Option<bool>,
}

/// One search hit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(flatten)]
    pub item: NormalizedItem,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub hierarchy: Option<HierarchyContext>,
}

/// Pagination details of a search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pagination {
    pub start_at: u32,
    pub limit: u32,
    pub returned: usize,
    pub has_more: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_start_at: Option<u32>,
}

/// Result from the search_work_items tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchWorkItemsResult {
    pub items: Vec<SearchHit>,
    pub total: u64,
    /// The JQL query that was executed
    pub predicate_used: String,
    pub pagination: Pagination,
    pub warnings: Vec<String>,
}

// Workaround for pulseengine-mcp-macros bug #62
// The macro uses format!("{:?}") instead of serde_json serialization
// Implement Display to return JSON format
impl std::fmt::Display for SearchWorkItemsResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => write!(f, "{}", json),
            Err(_) => write!(
                f,
                "{{\"error\": \"Failed to serialize SearchWorkItemsResult\"}}"
            ),
        }
    }
}

/// Implementation of the search_work_items tool
pub struct SearchWorkItemsTool {
    config: Arc<JiraConfig>,
}

impl SearchWorkItemsTool {
    pub fn new(config: Arc<JiraConfig>) -> Self {
        Self { config }
    }

    #[instrument(skip(self, conn, params), fields(
        project = params.filter.project.as_deref(),
        limit = params.limit,
        start_at = params.start_at,
    ))]
    pub async fn execute(
        &self,
        conn: Arc<Connection>,
        params: SearchWorkItemsParams,
    ) -> JiraMcpResult<SearchWorkItemsResult> {
        let start_time = std::time::Instant::now();
        info!("Executing search_work_items tool");

        self.validate_params(&params)?;

        let limit = params.limit.unwrap_or(self.config.max_search_results);
        let start_at = params.start_at.unwrap_or(0);
        let jql = build_predicate(&params.filter, &self.config.subtask_type_name)?;

        let page = search(conn.transport(), &jql, start_at, limit).await?;
        let table = conn.field_table();
        let items: Vec<NormalizedItem> = page
            .issues
            .iter()
            .map(|issue| normalize_issue(issue, None, &table).without_raw())
            .collect();

        let mut warnings = Vec::new();
        let hierarchies = if params.include_hierarchy.unwrap_or(false) {
            self.aggregate_all(&conn, &items, &mut warnings).await
        } else {
            vec![None; items.len()]
        };

        let returned = items.len();
        let next = u64::from(start_at) + returned as u64;
        let has_more = !page.is_last();
        let pagination = Pagination {
            start_at,
            limit,
            returned,
            has_more,
            next_start_at: has_more.then(|| u32::try_from(next).unwrap_or(u32::MAX)),
        };

        info!(
            "Search returned {} of {} items in {}ms",
            returned,
            page.total,
            start_time.elapsed().as_millis()
        );

        Ok(SearchWorkItemsResult {
            items: items
                .into_iter()
                .zip(hierarchies)
                .map(|(item, hierarchy)| SearchHit { item, hierarchy })
                .collect(),
            total: page.total,
            predicate_used: jql,
            pagination,
            warnings,
        })
    }

    fn validate_params(&self, params: &SearchWorkItemsParams) -> JiraMcpResult<()> {
        if let Some(limit) = params.limit {
            if limit == 0 {
                return Err(JiraMcpError::invalid_param(
                    "limit",
                    "Limit must be greater than 0",
                ));
            }
            if limit > MAX_LIMIT {
                return Err(JiraMcpError::invalid_param(
                    "limit",
                    format!("Limit cannot exceed {}", MAX_LIMIT),
                ));
            }
        }

        if let Some(start_at) = params.start_at {
            if start_at > MAX_START_AT {
                return Err(JiraMcpError::invalid_param(
                    "start_at",
                    format!("Start offset cannot exceed {}", MAX_START_AT),
                ));
            }
        }

        Ok(())
    }

    /// Aggregate every hit with at most `aggregation_concurrency` in flight
    async fn aggregate_all(
        &self,
        conn: &Arc<Connection>,
        items: &[NormalizedItem],
        warnings: &mut Vec<String>,
    ) -> Vec<Option<HierarchyContext>> {
        let concurrency_limit = self.config.aggregation_concurrency.max(1);
        let mut slots: Vec<Option<HierarchyContext>> = vec![None; items.len()];
        let mut join_set = JoinSet::new();
        let mut pending_count = 0;

        for (index, item) in items.iter().enumerate() {
            let conn = Arc::clone(conn);
            let config = Arc::clone(&self.config);
            let item = item.clone();

            join_set.spawn(async move {
                let context = aggregate(&conn, &config, &item).await;
                (index, context)
            });
            pending_count += 1;

            if pending_count >= concurrency_limit {
                if let Some(result) = join_set.join_next().await {
                    pending_count -= 1;
                    Self::store(result, &mut slots, warnings);
                }
            }
        }

        while let Some(result) = join_set.join_next().await {
            Self::store(result, &mut slots, warnings);
        }

        slots
    }

    fn store(
        result: Result<(usize, HierarchyContext), tokio::task::JoinError>,
        slots: &mut [Option<HierarchyContext>],
        warnings: &mut Vec<String>,
    ) {
        match result {
            Ok((index, context)) => slots[index] = Some(context),
            Err(e) => {
                error!("Aggregation task join error: {}", e);
                warnings.push(format!("Hierarchy aggregation task failed: {}", e));
            }
        }
    }
}
