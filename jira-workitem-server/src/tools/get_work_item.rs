//! Get work item tool
//!
//! Fetches one item, normalizes it and, unless disabled, attaches its
//! hierarchy context. Only the primary fetch can fail the call.

use crate::cache::Connection;
use crate::config::JiraConfig;
use crate::engine::fetch::fetch_issue;
use crate::engine::hierarchy::{aggregate, HierarchyContext, Progress};
use crate::engine::normalize::{normalize_issue, NormalizedItem, Relation};
use crate::error::JiraMcpResult;
use crate::tools::validate_issue_key;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};

/// Parameters for the get_work_item tool
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct GetWorkItemParams {
    /// JIRA issue key (required)
    /// Examples: "PROJ-123", "KEY-456"
    pub issue_key: String,

    /// Attach epic, parent, children, siblings and progress (optional, default: true)
    pub include_hierarchy: Option<bool>,

    /// Include the untouched backend payload (optional, default: false)
    pub include_raw: Option<bool>,
}

/// Result from the get_work_item tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetWorkItemResult {
    pub item: NormalizedItem,

    /// Edges of the item itself plus those found during aggregation
    pub relations: Vec<Relation>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub hierarchy: Option<HierarchyContext>,

    pub warnings: Vec<String>,
}

// Workaround for pulseengine-mcp-macros bug #62
// The macro uses format!("{:?}") instead of serde_json serialization
// Implement Display to return JSON format
impl std::fmt::Display for GetWorkItemResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => write!(f, "{}", json),
            Err(_) => write!(f, "{{\"error\": \"Failed to serialize GetWorkItemResult\"}}"),
        }
    }
}

/// Implementation of the get_work_item tool
pub struct GetWorkItemTool {
    config: Arc<JiraConfig>,
}

impl GetWorkItemTool {
    pub fn new(config: Arc<JiraConfig>) -> Self {
        Self { config }
    }

    #[instrument(skip(self, conn), fields(issue_key = %params.issue_key))]
    pub async fn execute(
        &self,
        conn: Arc<Connection>,
        params: GetWorkItemParams,
    ) -> JiraMcpResult<GetWorkItemResult> {
        let start_time = std::time::Instant::now();
        info!("Executing get_work_item tool for {}", params.issue_key);

        let issue_key = validate_issue_key("issue_key", &params.issue_key)?;
        let issue = fetch_issue(conn.transport(), &issue_key).await?;

        let item = normalize_issue(&issue, None, &conn.field_table());
        let item = if params.include_raw.unwrap_or(false) {
            item
        } else {
            item.without_raw()
        };

        let mut relations = item.relations.clone();
        let mut progress = None;
        let mut warnings = Vec::new();
        let mut hierarchy = None;

        if params.include_hierarchy.unwrap_or(true) {
            let context = aggregate(&conn, &self.config, &item).await;
            merge_relations(&mut relations, &context.relations);
            progress = context.progress.clone();
            warnings.extend(context.warnings.iter().cloned());
            hierarchy = Some(context);
        }

        info!(
            "Retrieved {} ({}) in {}ms with {} warnings",
            item.key,
            item.category,
            start_time.elapsed().as_millis(),
            warnings.len()
        );

        Ok(GetWorkItemResult {
            item,
            relations,
            progress,
            hierarchy,
            warnings,
        })
    }
}

/// Append the edges not already present
pub(crate) fn merge_relations(relations: &mut Vec<Relation>, extra: &[Relation]) {
    for relation in extra {
        if !relations.contains(relation) {
            relations.push(relation.clone());
        }
    }
}
