//! Epic resolution tools
//!
//! `resolve_epic` finds the epic an item belongs to, asking the agile
//! issue endpoint first and reading the generic item when that endpoint is
//! unavailable. Sub-tasks take the epic of their parent. `get_epic_children` lists an epic's items with progress.

use crate::cache::Connection;
use crate::config::JiraConfig;
use crate::engine::category::{category_of_issue, Category};
use crate::engine::dispatch::PathUsed;
use crate::engine::fetch::{fetch_epic_children, fetch_issue, MAX_CHILDREN};
use crate::engine::fields::FieldTable;
use crate::engine::hierarchy::{ItemSummary, Progress, EMPTY_EPIC_PROGRESS};
use crate::engine::normalize::{normalize_agile_epic, normalize_issue};
use crate::error::{JiraMcpError, JiraMcpResult};
use crate::tools::validate_issue_key;
use crate::transport::{ApiFamily, ApiRequest};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Parameters for the resolve_epic tool
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ResolveEpicParams {
    /// Key of the item whose epic is wanted (e.g., "PROJ-123")
    pub issue_key: String,

    /// Also compute the epic's progress (optional, default: false)
    pub include_progress: Option<bool>,
}

/// Result from the resolve_epic tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveEpicResult {
    pub issue_key: String,

    /// The epic, or null when the item has none
    pub epic: Option<ItemSummary>,

    /// Endpoint that answered the lookup
    pub path_used: PathUsed,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,

    pub warnings: Vec<String>,
}

// Workaround for pulseengine-mcp-macros bug #62
// The macro uses format!("{:?}") instead of serde_json serialization
// Implement Display to return JSON format
impl std::fmt::Display for ResolveEpicResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => write!(f, "{}", json),
            Err(_) => write!(f, "{{\"error\": \"Failed to serialize ResolveEpicResult\"}}"),
        }
    }
}

/// Parameters for the get_epic_children tool
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct GetEpicChildrenParams {
    /// Epic key (e.g., "PROJ-100")
    pub epic_key: String,

    /// Compute progress over the children (optional, default: true)
    pub include_progress: Option<bool>,
}

/// Result from the get_epic_children tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetEpicChildrenResult {
    pub epic_key: String,
    pub children: Vec<ItemSummary>,
    /// Total children known to the backend
    pub total: u64,
    pub path_used: PathUsed,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
    pub warnings: Vec<String>,
}

// Workaround for pulseengine-mcp-macros bug #62
impl std::fmt::Display for GetEpicChildrenResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => write!(f, "{}", json),
            Err(_) => write!(
                f,
                "{{\"error\": \"Failed to serialize GetEpicChildrenResult\"}}"
            ),
        }
    }
}

/// Where the epic lookup found its answer
struct EpicLookup {
    epic_key: Option<String>,
    /// Epic payload from the agile endpoint, when it sent one
    agile_epic: Option<Value>,
    item_category: Option<Category>,
    parent_key: Option<String>,
    path_used: PathUsed,
}

/// Implementation of the epic resolution tools
pub struct EpicResolutionTool {
    config: Arc<JiraConfig>,
}

impl EpicResolutionTool {
    pub fn new(config: Arc<JiraConfig>) -> Self {
        Self { config }
    }

    #[instrument(skip(self, conn), fields(issue_key = %params.issue_key))]
    pub async fn resolve_epic(
        &self,
        conn: Arc<Connection>,
        params: ResolveEpicParams,
    ) -> JiraMcpResult<ResolveEpicResult> {
        info!("Executing resolve_epic tool for {}", params.issue_key);

        let issue_key = validate_issue_key("issue_key", &params.issue_key)?;
        let table = conn.field_table();
        let mut lookup = self.lookup_epic(&conn, &table, &issue_key).await?;
        let mut warnings = Vec::new();
        let mut explanation = None;

        if lookup.epic_key.is_none() && lookup.item_category == Some(Category::Subtask) {
            if let Some(parent_key) = lookup.parent_key.clone() {
                match fetch_issue(conn.transport(), &parent_key).await {
                    Ok(parent) => {
                        let parent = normalize_issue(&parent, None, &table);
                        if parent.epic_key.is_some() {
                            explanation = Some(format!(
                                "{} is a sub-task and belongs to the epic of its parent {}",
                                issue_key, parent_key
                            ));
                        }
                        lookup.epic_key = parent.epic_key;
                    }
                    Err(e) => {
                        warn!("Could not read parent {} of {}: {}", parent_key, issue_key, e);
                        warnings.push(format!("Could not read parent {}: {}", parent_key, e));
                    }
                }
            }
        }

        let Some(epic_key) = lookup.epic_key else {
            let explanation = match (lookup.item_category, &lookup.parent_key) {
                (Some(Category::Epic), _) => format!("{} is itself an epic", issue_key),
                (Some(Category::Subtask), Some(parent_key)) => format!(
                    "{} is a sub-task of {}, which does not belong to an epic",
                    issue_key, parent_key
                ),
                _ => format!("{} does not belong to an epic", issue_key),
            };
            return Ok(ResolveEpicResult {
                issue_key,
                epic: None,
                path_used: lookup.path_used,
                progress: None,
                explanation: Some(explanation),
                warnings,
            });
        };

        let epic = match lookup.agile_epic {
            Some(payload) => {
                let mut item = normalize_agile_epic(&payload);
                if item.key.is_empty() {
                    item.key = epic_key.clone();
                }
                ItemSummary::from_item(&item, &self.config)
            }
            None => match fetch_issue(conn.transport(), &epic_key).await {
                Ok(issue) => {
                    let item = normalize_issue(&issue, Some(Category::Epic), &table);
                    ItemSummary::from_item(&item, &self.config)
                }
                Err(e) => {
                    warn!("Could not fetch epic {}: {}", epic_key, e);
                    warnings.push(format!("Could not fetch epic {}: {}", epic_key, e));
                    ItemSummary {
                        key: epic_key.clone(),
                        category: Category::Epic,
                        summary: None,
                        status: None,
                        assignee: None,
                        story_points: None,
                        done: false,
                    }
                }
            },
        };

        let progress = if params.include_progress.unwrap_or(false) {
            match fetch_epic_children(conn.transport(), &epic_key, MAX_CHILDREN).await {
                Ok((page, _)) => {
                    let children: Vec<_> = page
                        .issues
                        .iter()
                        .map(|issue| normalize_issue(issue, None, &table))
                        .collect();
                    Some(Progress::compute(&children, &self.config, EMPTY_EPIC_PROGRESS))
                }
                Err(e) => {
                    warn!("Could not compute progress for {}: {}", epic_key, e);
                    warnings.push(format!("Could not fetch children of {}: {}", epic_key, e));
                    None
                }
            }
        } else {
            None
        };

        info!("{} belongs to epic {}", issue_key, epic_key);

        Ok(ResolveEpicResult {
            issue_key,
            epic: Some(epic),
            path_used: lookup.path_used,
            progress,
            explanation,
            warnings,
        })
    }

    #[instrument(skip(self, conn), fields(epic_key = %params.epic_key))]
    pub async fn get_epic_children(
        &self,
        conn: Arc<Connection>,
        params: GetEpicChildrenParams,
    ) -> JiraMcpResult<GetEpicChildrenResult> {
        info!("Executing get_epic_children tool for {}", params.epic_key);

        let epic_key = validate_issue_key("epic_key", &params.epic_key)?;
        let (page, path_used) =
            fetch_epic_children(conn.transport(), &epic_key, MAX_CHILDREN).await?;

        let table = conn.field_table();
        let children: Vec<_> = page
            .issues
            .iter()
            .map(|issue| normalize_issue(issue, None, &table))
            .collect();

        let mut warnings = Vec::new();
        if page.total > children.len() as u64 {
            warnings.push(format!(
                "Only the first {} of {} children were listed",
                children.len(),
                page.total
            ));
        }

        let progress = params
            .include_progress
            .unwrap_or(true)
            .then(|| Progress::compute(&children, &self.config, EMPTY_EPIC_PROGRESS));

        Ok(GetEpicChildrenResult {
            epic_key,
            children: children
                .iter()
                .map(|child| ItemSummary::from_item(child, &self.config))
                .collect(),
            total: page.total,
            path_used,
            progress,
            warnings,
        })
    }

    /// Agile issue endpoint first, generic item when the agile endpoint is unavailable
    async fn lookup_epic(
        &self,
        conn: &Connection,
        table: &FieldTable,
        issue_key: &str,
    ) -> JiraMcpResult<EpicLookup> {
        let response = conn
            .transport()
            .send(ApiRequest::get(
                ApiFamily::Agile,
                format!("/issue/{}?fields=epic,issuetype,parent", issue_key),
            ))
            .await;

        match response.error_kind(ApiFamily::Agile) {
            None => {
                let fields = response.body.get("fields").unwrap_or(&Value::Null);
                let epic = fields.get("epic").filter(|epic| !epic.is_null()).cloned();
                let epic_key = epic
                    .as_ref()
                    .and_then(|epic| epic.get("key"))
                    .and_then(Value::as_str)
                    .map(String::from);
                let parent_key = fields
                    .get("parent")
                    .and_then(|parent| parent.get("key"))
                    .and_then(Value::as_str)
                    .map(String::from);

                Ok(EpicLookup {
                    epic_key,
                    agile_epic: epic,
                    item_category: category_of_issue(&response.body),
                    parent_key,
                    path_used: PathUsed::Primary,
                })
            }
            Some(kind) if !kind.is_terminal() => {
                warn!(
                    "Agile issue endpoint unavailable for {}, reading the generic item",
                    issue_key
                );
                let issue = fetch_issue(conn.transport(), issue_key).await?;
                let item = normalize_issue(&issue, None, table);
                Ok(EpicLookup {
                    epic_key: item.epic_key,
                    agile_epic: None,
                    item_category: Some(item.category),
                    parent_key: item.parent_key,
                    path_used: PathUsed::Fallback,
                })
            }
            Some(kind) => Err(JiraMcpError::from_kind(
                kind,
                response.status,
                issue_key,
                response.error_message(),
            )),
        }
    }
}
