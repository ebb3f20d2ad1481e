//! Tools module for the JIRA work item server
//!
//! Each tool validates its parameters, runs the work item engine against a
//! cached connection and returns a JSON-serializable result.

pub mod create_work_item;
pub mod epic_resolution;
pub mod get_work_item;
pub mod search_work_items;
pub mod update_work_item;

pub use create_work_item::*;
pub use epic_resolution::*;
pub use get_work_item::*;
pub use search_work_items::*;
pub use update_work_item::*;

use crate::engine::category::Category;
use crate::engine::dispatch::{all_succeeded, DispatchOutcome, GroupReport};
use crate::engine::fields::{FieldWarning, WorkItemFields};
use crate::error::{JiraMcpError, JiraMcpResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Validate an issue key and return it trimmed and uppercased
pub(crate) fn validate_issue_key(parameter: &str, key: &str) -> JiraMcpResult<String> {
    let key = key.trim().to_uppercase();

    if key.is_empty() {
        return Err(JiraMcpError::invalid_param(
            parameter,
            "Issue key is required (e.g., 'PROJ-123'). Use search_work_items first if you don't know the key.",
        ));
    }

    if key.len() > 100 {
        return Err(JiraMcpError::invalid_param(
            parameter,
            "Issue key cannot exceed 100 characters",
        ));
    }

    let Some((project, number)) = key.rsplit_once('-') else {
        return Err(JiraMcpError::invalid_param(
            parameter,
            "Issue key must follow PROJECT-NUMBER format (e.g., 'PROJ-123')",
        ));
    };

    let project_ok = project.starts_with(|c: char| c.is_ascii_alphabetic())
        && project.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !project_ok {
        return Err(JiraMcpError::invalid_param(
            parameter,
            "Project part of issue key must start with a letter and contain only letters, digits or '_'",
        ));
    }

    if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit()) {
        return Err(JiraMcpError::invalid_param(
            parameter,
            "Number part of issue key must contain only digits",
        ));
    }

    Ok(key)
}

/// Validate the item references in `fields` and replace them with their normalized keys
pub(crate) fn normalize_relation_keys(fields: &mut WorkItemFields) -> JiraMcpResult<()> {
    fields.parent_key = fields
        .parent_key
        .as_deref()
        .map(|key| validate_issue_key("fields.parent_key", key))
        .transpose()?;
    fields.epic_link = fields
        .epic_link
        .as_deref()
        .map(|key| validate_issue_key("fields.epic_link", key))
        .transpose()?;
    Ok(())
}

/// Result of a create or update: one outcome per field-group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItemChangeResult {
    /// True only when every field-group succeeded
    pub success: bool,

    pub issue_key: String,

    /// Category the request was handled as
    pub category: Category,

    pub applied_field_groups: Vec<String>,

    /// Groups that can be retried on their own
    pub failed_field_groups: Vec<String>,

    pub outcomes: Vec<DispatchOutcome>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    pub warnings: Vec<FieldWarning>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// Workaround for pulseengine-mcp-macros bug #62
// The macro uses format!("{:?}") instead of serde_json serialization
// Implement Display to return JSON format
impl std::fmt::Display for WorkItemChangeResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => write!(f, "{}", json),
            Err(_) => write!(
                f,
                "{{\"error\": \"Failed to serialize WorkItemChangeResult\"}}"
            ),
        }
    }
}

impl WorkItemChangeResult {
    pub(crate) fn from_reports(
        issue_key: String,
        category: Category,
        mut outcomes: Vec<DispatchOutcome>,
        reports: Vec<GroupReport>,
        mut warnings: Vec<FieldWarning>,
    ) -> Self {
        for report in reports {
            outcomes.push(report.outcome);
            warnings.extend(report.warnings);
        }

        let applied_field_groups = outcomes
            .iter()
            .filter(|o| o.succeeded)
            .map(|o| o.group.clone())
            .collect();
        let failed: Vec<&DispatchOutcome> = outcomes.iter().filter(|o| !o.succeeded).collect();
        let failed_field_groups = failed.iter().map(|o| o.group.clone()).collect();

        let error = (!failed.is_empty()).then(|| {
            failed
                .iter()
                .map(|o| {
                    format!(
                        "{}: {}",
                        o.group,
                        o.error.as_deref().unwrap_or("failed")
                    )
                })
                .collect::<Vec<_>>()
                .join("; ")
        });

        Self {
            success: all_succeeded(&outcomes),
            issue_key,
            category,
            applied_field_groups,
            failed_field_groups,
            outcomes,
            data: None,
            warnings,
            error,
        }
    }
}
