//! Update work item tool
//!
//! Fields are grouped by the endpoint that accepts them and every group is
//! dispatched independently, so a failing epic update never hides a
//! successful summary change (or the other way round).

use crate::cache::Connection;
use crate::config::JiraConfig;
use crate::engine::category::{detect_category, Category};
use crate::engine::dispatch::dispatch_all;
use crate::engine::fields::{map_fields, WorkItemFields};
use crate::error::{ErrorKind, JiraMcpError, JiraMcpResult};
use crate::tools::{normalize_relation_keys, validate_issue_key, WorkItemChangeResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Parameters for the update_work_item tool
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct UpdateWorkItemParams {
    /// JIRA issue key (required)
    /// Examples: "PROJ-123", "KEY-456"
    pub issue_key: String,

    /// Explicit category (optional). Without it the category is inferred
    /// from the fields, or looked up from the item's issue type.
    pub category: Option<Category>,

    /// Fields to change; absent fields are left untouched
    pub fields: WorkItemFields,
}

/// Implementation of the update_work_item tool
pub struct UpdateWorkItemTool {
    config: Arc<JiraConfig>,
}

impl UpdateWorkItemTool {
    pub fn new(config: Arc<JiraConfig>) -> Self {
        Self { config }
    }

    #[instrument(skip(self, conn, params), fields(issue_key = %params.issue_key))]
    pub async fn execute(
        &self,
        conn: Arc<Connection>,
        mut params: UpdateWorkItemParams,
    ) -> JiraMcpResult<WorkItemChangeResult> {
        info!("Executing update_work_item tool for {}", params.issue_key);

        let issue_key = validate_issue_key("issue_key", &params.issue_key)?;
        if params.fields == WorkItemFields::default() {
            return Err(JiraMcpError::invalid_param(
                "fields",
                "No field updates specified",
            ));
        }
        normalize_relation_keys(&mut params.fields)?;

        let category = detect_category(
            conn.transport(),
            params.category,
            &params.fields,
            Some(&issue_key),
            self.config.strict_detection,
        )
        .await?;

        let mut mapped = map_fields(category, &params.fields, &conn.field_table());
        mapped
            .resolve_pending_assignee(conn.transport(), conn.current_user_id())
            .await;

        if mapped.sets.is_empty() {
            warn!("Nothing applicable to update on {}", issue_key);
            let mut result = WorkItemChangeResult::from_reports(
                issue_key,
                category,
                Vec::new(),
                Vec::new(),
                mapped.warnings,
            );
            result.success = false;
            result.error = Some(format!(
                "None of the given fields apply to a {}; see warnings",
                category
            ));
            return Ok(result);
        }

        let reports = dispatch_all(Arc::clone(&conn), &issue_key, mapped.sets).await;
        if reports
            .iter()
            .any(|report| report.outcome.error_kind == Some(ErrorKind::NotFound))
        {
            return Err(JiraMcpError::not_found("issue", issue_key));
        }

        let result = WorkItemChangeResult::from_reports(
            issue_key.clone(),
            category,
            Vec::new(),
            reports,
            mapped.warnings,
        );

        info!(
            "Updated {}: {} applied, {} failed",
            issue_key,
            result.applied_field_groups.len(),
            result.failed_field_groups.len()
        );

        Ok(result)
    }
}
