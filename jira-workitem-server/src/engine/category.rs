//! Work item category detection
//!
//! A category is decided once per request and never re-derived afterwards.
//! Detection order: explicit hint, Epic-only fields, Story-only fields,
//! Sub-task-only fields, then `Task` (or a single remote type lookup when
//! the caller asked for one).

use crate::engine::fields::WorkItemFields;
use crate::error::{ErrorKind, JiraMcpError, JiraMcpResult};
use crate::transport::{ApiFamily, ApiRequest, JiraTransport};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::{debug, warn};

/// The kind of work item; determines which fields apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum Category {
    Epic,
    Story,
    Task,
    Subtask,
    Other,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Epic,
        Category::Story,
        Category::Task,
        Category::Subtask,
        Category::Other,
    ];

    /// Map a backend issue type name to the closest category
    pub fn from_type_name(name: &str) -> Category {
        let normalized: String = name
            .trim()
            .to_lowercase()
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect();

        match normalized.as_str() {
            "epic" => Category::Epic,
            "story" | "userstory" => Category::Story,
            "task" => Category::Task,
            "subtask" => Category::Subtask,
            _ => Category::Other,
        }
    }

    /// Default backend issue type name when creating an item of this category
    pub fn default_type_name(self) -> &'static str {
        match self {
            Category::Epic => "Epic",
            Category::Story => "Story",
            Category::Task | Category::Other => "Task",
            Category::Subtask => "Sub-task",
        }
    }

    /// Issue type name on an instance whose sub-task type is `subtask_type_name`
    pub fn type_name(self, subtask_type_name: &str) -> &str {
        match self {
            Category::Subtask => subtask_type_name,
            other => other.default_type_name(),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Category::Epic => "Epic",
            Category::Story => "Story",
            Category::Task => "Task",
            Category::Subtask => "Subtask",
            Category::Other => "Other",
        };
        f.write_str(name)
    }
}

/// Infer the category from an explicit hint or the fields present in the request.
/// Items without a hint or any category-specific field are `Task`.
pub fn detect(hint: Option<Category>, fields: &WorkItemFields) -> Category {
    detect_from_request(hint, fields).unwrap_or(Category::Task)
}

fn detect_from_request(hint: Option<Category>, fields: &WorkItemFields) -> Option<Category> {
    if let Some(category) = hint {
        return Some(category);
    }
    if fields.has_epic_fields() {
        return Some(Category::Epic);
    }
    if fields.has_story_fields() {
        return Some(Category::Story);
    }
    if fields.parent_key.is_some() {
        return Some(Category::Subtask);
    }
    None
}

/// Like [`detect`], but an undecided request may be resolved by one remote type lookup.
///
/// A failed lookup defaults to Task unless `strict`; an item that does not
/// exist is always an error.
pub async fn detect_category(
    transport: &dyn JiraTransport,
    hint: Option<Category>,
    fields: &WorkItemFields,
    lookup_key: Option<&str>,
    strict: bool,
) -> JiraMcpResult<Category> {
    if let Some(category) = detect_from_request(hint, fields) {
        debug!("Detected category {} without remote lookup", category);
        return Ok(category);
    }

    let Some(issue_key) = lookup_key else {
        return Ok(Category::Task);
    };

    match lookup_category(transport, issue_key).await {
        Ok(category) => {
            debug!("Remote lookup resolved {} to {}", issue_key, category);
            Ok(category)
        }
        Err(e) if strict || e.kind() == Some(ErrorKind::NotFound) => Err(e),
        Err(e) => {
            warn!(
                "Category lookup for {} failed ({}), defaulting to Task",
                issue_key, e
            );
            Ok(Category::Task)
        }
    }
}

/// Fetch the item's real issue type and map it to a category
pub async fn lookup_category(
    transport: &dyn JiraTransport,
    issue_key: &str,
) -> JiraMcpResult<Category> {
    let response = transport
        .send(ApiRequest::get(
            ApiFamily::Platform,
            format!("/issue/{}?fields=issuetype", issue_key),
        ))
        .await;

    let body = response.into_result(ApiFamily::Platform, issue_key)?;
    category_of_issue(&body).ok_or_else(|| {
        JiraMcpError::from_kind(
            ErrorKind::UnknownServer,
            200,
            issue_key,
            format!("Issue {} has no issue type in the response", issue_key),
        )
    })
}

/// Category of a generic issue payload (`fields.issuetype`)
pub fn category_of_issue(issue: &Value) -> Option<Category> {
    let issue_type = issue.get("fields")?.get("issuetype")?;
    if issue_type.get("subtask").and_then(Value::as_bool) == Some(true) {
        return Some(Category::Subtask);
    }
    issue_type
        .get("name")
        .and_then(Value::as_str)
        .map(Category::from_type_name)
}
