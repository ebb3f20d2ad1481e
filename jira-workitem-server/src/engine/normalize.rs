//! Response normalization
//!
//! Generic issue payloads, agile issue payloads and agile epic payloads all
//! become one [`NormalizedItem`]. Missing nested fields become `None` or an
//! empty list; nothing here fails. Dates are passed through untouched.

use crate::config::JiraConfig;
use crate::engine::adf::description_text;
use crate::engine::category::{category_of_issue, Category};
use crate::engine::fields::{FieldTable, LogicalField};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of a hierarchy edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum RelationKind {
    ParentOf,
    EpicLinkOf,
}

/// Directed hierarchy edge; `from_key` is always the container
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct Relation {
    pub from_key: String,
    pub to_key: String,
    pub kind: RelationKind,
}

impl Relation {
    pub fn new(from_key: impl Into<String>, to_key: impl Into<String>, kind: RelationKind) -> Self {
        Self {
            from_key: from_key.into(),
            to_key: to_key.into(),
            kind,
        }
    }
}

/// Stable view of a work item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedItem {
    pub key: String,
    pub id: Option<String>,
    pub category: Category,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub issue_type: Option<String>,
    pub status: Option<String>,
    /// Status category key: "new", "indeterminate" or "done"
    pub status_category: Option<String>,
    pub priority: Option<String>,
    /// Assignee display name
    pub assignee: Option<String>,
    pub assignee_account_id: Option<String>,
    pub labels: Vec<String>,
    pub created: Option<String>,
    pub updated: Option<String>,
    pub parent_key: Option<String>,
    pub epic_key: Option<String>,
    pub story_points: Option<f64>,
    pub relations: Vec<Relation>,
    /// Untouched backend payload
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub raw: Value,
}

impl NormalizedItem {
    /// Drop the backend payload
    pub fn without_raw(mut self) -> Self {
        self.raw = Value::Null;
        self
    }

    /// Whether the item counts as complete
    pub fn is_done(&self, config: &JiraConfig) -> bool {
        self.status_category.as_deref() == Some("done")
            || self
                .status
                .as_deref()
                .is_some_and(|status| config.is_done_status(status))
    }
}

fn str_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    path.iter()
        .try_fold(value, |current, segment| current.get(segment))
        .and_then(Value::as_str)
}

fn owned_at(value: &Value, path: &[&str]) -> Option<String> {
    str_at(value, path).map(String::from)
}

/// Normalize a generic or agile issue payload.
///
/// `declared` is the category decided earlier in the request; without it
/// the category comes from the payload's issue type.
pub fn normalize_issue(
    issue: &Value,
    declared: Option<Category>,
    table: &FieldTable,
) -> NormalizedItem {
    let key = owned_at(issue, &["key"]).unwrap_or_default();
    let fields = issue.get("fields").unwrap_or(&Value::Null);

    let category = declared
        .or_else(|| category_of_issue(issue))
        .unwrap_or(Category::Other);

    let labels = fields
        .get("labels")
        .and_then(Value::as_array)
        .map(|labels| {
            labels
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    let parent_key = owned_at(fields, &["parent", "key"]);
    let parent_is_epic = str_at(fields, &["parent", "fields", "issuetype", "name"])
        .map(|name| Category::from_type_name(name) == Category::Epic)
        .unwrap_or(false);

    let epic_key = table
        .value_in(LogicalField::EpicLink, fields)
        .and_then(Value::as_str)
        .map(String::from)
        .or_else(|| owned_at(fields, &["epic", "key"]))
        .or_else(|| parent_is_epic.then(|| parent_key.clone()).flatten());

    let story_points = table
        .value_in(LogicalField::StoryPoints, fields)
        .and_then(Value::as_f64);

    let mut relations = Vec::new();
    if let Some(parent) = &parent_key {
        if !parent_is_epic {
            relations.push(Relation::new(parent, &key, RelationKind::ParentOf));
        }
    }
    if let Some(epic) = &epic_key {
        relations.push(Relation::new(epic, &key, RelationKind::EpicLinkOf));
    }
    if let Some(subtasks) = fields.get("subtasks").and_then(Value::as_array) {
        for subtask in subtasks {
            if let Some(child) = str_at(subtask, &["key"]) {
                relations.push(Relation::new(&key, child, RelationKind::ParentOf));
            }
        }
    }

    NormalizedItem {
        id: owned_at(issue, &["id"]),
        category,
        summary: owned_at(fields, &["summary"]),
        description: fields.get("description").and_then(description_text),
        issue_type: owned_at(fields, &["issuetype", "name"]),
        status: owned_at(fields, &["status", "name"]),
        status_category: owned_at(fields, &["status", "statusCategory", "key"]),
        priority: owned_at(fields, &["priority", "name"]),
        assignee: owned_at(fields, &["assignee", "displayName"]),
        assignee_account_id: owned_at(fields, &["assignee", "accountId"]),
        labels,
        created: owned_at(fields, &["created"]),
        updated: owned_at(fields, &["updated"]),
        parent_key,
        epic_key,
        story_points,
        relations,
        raw: issue.clone(),
        key,
    }
}

/// Normalize an agile epic payload (`GET /epic/{key}`)
pub fn normalize_agile_epic(epic: &Value) -> NormalizedItem {
    let done = epic.get("done").and_then(Value::as_bool);
    let id = match epic.get("id") {
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::String(s)) => Some(s.clone()),
        _ => None,
    };

    NormalizedItem {
        key: owned_at(epic, &["key"]).unwrap_or_default(),
        id,
        category: Category::Epic,
        summary: owned_at(epic, &["summary"]).or_else(|| owned_at(epic, &["name"])),
        description: None,
        issue_type: Some(Category::Epic.default_type_name().to_string()),
        status: None,
        status_category: done.map(|d| if d { "done" } else { "indeterminate" }.to_string()),
        priority: None,
        assignee: None,
        assignee_account_id: None,
        labels: Vec::new(),
        created: None,
        updated: None,
        parent_key: None,
        epic_key: None,
        story_points: None,
        relations: Vec::new(),
        raw: epic.clone(),
    }
}
