//! Create work item tool
//!
//! The item is created through the generic endpoint with every field that
//! endpoint accepts; category-specific field-groups are then dispatched
//! against the new key.

use crate::cache::Connection;
use crate::config::JiraConfig;
use crate::engine::category::{detect, Category};
use crate::engine::dispatch::{dispatch_all, DispatchOutcome, PathUsed};
use crate::engine::fields::{map_fields, WorkItemFields};
use crate::error::{JiraMcpError, JiraMcpResult};
use crate::tools::{normalize_relation_keys, validate_issue_key, WorkItemChangeResult};
use crate::transport::{ApiFamily, ApiRequest};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, instrument};

/// Parameters for the create_work_item tool
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct CreateWorkItemParams {
    /// Project key (e.g., "PROJ"). Optional for sub-tasks, which are
    /// created in the project of their parent.
    pub project_key: Option<String>,

    /// Explicit category (optional). Without it the category is inferred
    /// from the fields: epic fields make an Epic, story points or an epic
    /// link make a Story, a parent key makes a Subtask, otherwise Task.
    pub category: Option<Category>,

    /// Backend issue type name overriding the category default (optional)
    /// Examples: "Bug", "Improvement"
    pub issue_type: Option<String>,

    /// Field values; `summary` is required
    pub fields: WorkItemFields,
}

/// Implementation of the create_work_item tool
pub struct CreateWorkItemTool {
    config: Arc<JiraConfig>,
}

impl CreateWorkItemTool {
    pub fn new(config: Arc<JiraConfig>) -> Self {
        Self { config }
    }

    #[instrument(skip(self, conn, params), fields(
        project_key = params.project_key.as_deref(),
        category = ?params.category,
    ))]
    pub async fn execute(
        &self,
        conn: Arc<Connection>,
        mut params: CreateWorkItemParams,
    ) -> JiraMcpResult<WorkItemChangeResult> {
        info!("Executing create_work_item tool");

        self.validate_params(&mut params)?;

        let category = detect(params.category, &params.fields);
        let project_key = self.resolve_project(&params, category)?;
        let issue_type = self.issue_type_name(&params, category);

        let mut mapped = map_fields(category, &params.fields, &conn.field_table());
        mapped
            .resolve_pending_assignee(conn.transport(), conn.current_user_id())
            .await;

        let mut fields = mapped.take_generic();
        fields.insert("project".to_string(), json!({ "key": project_key }));
        fields.insert("issuetype".to_string(), json!({ "name": issue_type }));

        let created = conn
            .transport()
            .send(ApiRequest::post(
                ApiFamily::Platform,
                "/issue",
                json!({ "fields": fields }),
            ))
            .await
            .into_result(ApiFamily::Platform, &project_key)?;

        let issue_key = created
            .get("key")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| JiraMcpError::internal("Create response did not contain an issue key"))?;

        info!("Created {} {} in {}", category, issue_key, project_key);

        let reports = dispatch_all(Arc::clone(&conn), &issue_key, mapped.sets).await;

        let mut result = WorkItemChangeResult::from_reports(
            issue_key.clone(),
            category,
            vec![DispatchOutcome::succeeded(
                "generic".to_string(),
                PathUsed::Primary,
                1,
            )],
            reports,
            mapped.warnings,
        );
        result.data = Some(json!({
            "key": issue_key,
            "id": created.get("id").cloned().unwrap_or(Value::Null),
            "issue_type": issue_type,
            "project_key": project_key,
            "url": conn.browse_url(&issue_key),
        }));

        Ok(result)
    }

    fn validate_params(&self, params: &mut CreateWorkItemParams) -> JiraMcpResult<()> {
        let summary = params.fields.summary.as_deref().unwrap_or_default().trim();
        if summary.is_empty() {
            return Err(JiraMcpError::invalid_param(
                "fields.summary",
                "Summary is required to create a work item",
            ));
        }
        if summary.len() > 255 {
            return Err(JiraMcpError::invalid_param(
                "fields.summary",
                "Summary cannot exceed 255 characters",
            ));
        }

        normalize_relation_keys(&mut params.fields)
    }

    fn resolve_project(&self, params: &CreateWorkItemParams, category: Category) -> JiraMcpResult<String> {
        if let Some(project_key) = params
            .project_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
        {
            return Ok(project_key.to_uppercase());
        }

        if category == Category::Subtask {
            if let Some(parent_key) = &params.fields.parent_key {
                let parent_key = validate_issue_key("fields.parent_key", parent_key)?;
                if let Some((project, _)) = parent_key.rsplit_once('-') {
                    return Ok(project.to_string());
                }
            }
        }

        Err(JiraMcpError::invalid_param(
            "project_key",
            "Project key is required (only sub-tasks may omit it, taking the project of their parent)",
        ))
    }

    fn issue_type_name(&self, params: &CreateWorkItemParams, category: Category) -> String {
        if let Some(issue_type) = params
            .issue_type
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
        {
            return issue_type.to_string();
        }
        category.type_name(&self.config.subtask_type_name).to_string()
    }
}
