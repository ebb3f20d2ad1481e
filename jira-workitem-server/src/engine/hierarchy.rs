//! Hierarchy aggregation
//!
//! Attaches relational context to a normalized item: children and progress
//! for epics, epic and sub-tasks for stories, parent and siblings for
//! sub-tasks. Branches run concurrently; a failing branch leaves its part
//! empty and records a warning, the rest of the context is kept.

use crate::cache::Connection;
use crate::config::JiraConfig;
use crate::engine::category::Category;
use crate::engine::dispatch::PathUsed;
use crate::engine::fetch::{fetch_epic_children, fetch_issue, search, SearchPage, MAX_CHILDREN};
use crate::engine::fields::FieldTable;
use crate::engine::normalize::{normalize_issue, NormalizedItem, Relation, RelationKind};
use crate::engine::predicate::children_predicate;
use crate::error::JiraMcpResult;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

/// Progress reported for an epic without children
pub const EMPTY_EPIC_PROGRESS: u8 = 0;

/// Progress reported for a story or task without sub-tasks
pub const EMPTY_STORY_PROGRESS: u8 = 100;

/// Completion statistics over a set of children
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Progress {
    pub total_children: usize,
    pub completed_children: usize,
    pub total_points: f64,
    pub completed_points: f64,
    /// Completed children over total children, rounded
    pub progress_percentage: u8,
    /// Completed points over total points, rounded
    pub points_progress_percentage: u8,
    /// True when the percentages are the empty-set convention
    pub empty: bool,
}

impl Progress {
    pub fn compute(children: &[NormalizedItem], config: &JiraConfig, when_empty: u8) -> Self {
        let total_children = children.len();
        let mut completed_children = 0;
        let mut total_points = 0.0;
        let mut completed_points = 0.0;

        for child in children {
            let points = child.story_points.unwrap_or(0.0);
            total_points += points;
            if child.is_done(config) {
                completed_children += 1;
                completed_points += points;
            }
        }

        Self {
            total_children,
            completed_children,
            total_points,
            completed_points,
            progress_percentage: percentage(
                completed_children as f64,
                total_children as f64,
                when_empty,
            ),
            points_progress_percentage: percentage(completed_points, total_points, when_empty),
            empty: total_children == 0,
        }
    }
}

fn percentage(done: f64, total: f64, when_empty: u8) -> u8 {
    if total <= 0.0 {
        return when_empty;
    }
    (done / total * 100.0).round().clamp(0.0, 100.0) as u8
}

/// Compact view of a related item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemSummary {
    pub key: String,
    pub category: Category,
    pub summary: Option<String>,
    pub status: Option<String>,
    pub assignee: Option<String>,
    pub story_points: Option<f64>,
    pub done: bool,
}

impl ItemSummary {
    pub fn from_item(item: &NormalizedItem, config: &JiraConfig) -> Self {
        Self {
            key: item.key.clone(),
            category: item.category,
            summary: item.summary.clone(),
            status: item.status.clone(),
            assignee: item.assignee.clone(),
            story_points: item.story_points,
            done: item.is_done(config),
        }
    }
}

/// Relational context of one item
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HierarchyContext {
    pub epic_info: Option<ItemSummary>,
    pub parent_info: Option<ItemSummary>,
    pub children: Vec<ItemSummary>,
    pub siblings: Vec<ItemSummary>,
    /// 1-based position among the parent's sub-tasks
    pub position: Option<usize>,
    pub progress: Option<Progress>,
    /// Endpoint that listed an epic's children
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children_path: Option<PathUsed>,
    pub relations: Vec<Relation>,
    pub warnings: Vec<String>,
}

impl HierarchyContext {
    fn degrade<T: Default>(&mut self, branch: &str, key: &str, result: JiraMcpResult<T>) -> T {
        match result {
            Ok(value) => value,
            Err(e) => {
                warn!("Hierarchy branch '{}' failed for {}: {}", branch, key, e);
                self.warnings
                    .push(format!("Could not fetch {} for {}: {}", branch, key, e));
                T::default()
            }
        }
    }

    fn note_truncation(&mut self, what: &str, page: &SearchPage) {
        if page.total > page.issues.len() as u64 {
            self.warnings.push(format!(
                "Only the first {} of {} {} were aggregated",
                page.issues.len(),
                page.total,
                what
            ));
        }
    }
}

/// Fetch and attach the relational context for an item
#[instrument(skip(conn, config, item), fields(key = %item.key, category = %item.category))]
pub async fn aggregate(conn: &Connection, config: &JiraConfig, item: &NormalizedItem) -> HierarchyContext {
    let table = conn.field_table();
    let context = match item.category {
        Category::Epic => aggregate_epic(conn, config, &table, item).await,
        Category::Subtask => aggregate_subtask(conn, config, &table, item).await,
        Category::Story | Category::Task | Category::Other => {
            aggregate_container(conn, config, &table, item).await
        }
    };

    debug!(
        "Aggregated {} children, {} siblings, {} warnings",
        context.children.len(),
        context.siblings.len(),
        context.warnings.len()
    );
    context
}

fn normalize_page(page: &SearchPage, table: &FieldTable) -> Vec<NormalizedItem> {
    page.issues
        .iter()
        .map(|issue| normalize_issue(issue, None, table))
        .collect()
}

fn summaries(items: &[NormalizedItem], config: &JiraConfig) -> Vec<ItemSummary> {
    items
        .iter()
        .map(|item| ItemSummary::from_item(item, config))
        .collect()
}

async fn fetch_summary(
    conn: &Connection,
    config: &JiraConfig,
    table: &FieldTable,
    key: &str,
) -> JiraMcpResult<Option<ItemSummary>> {
    let issue = fetch_issue(conn.transport(), key).await?;
    let item = normalize_issue(&issue, None, table);
    Ok(Some(ItemSummary::from_item(&item, config)))
}

async fn aggregate_epic(
    conn: &Connection,
    config: &JiraConfig,
    table: &FieldTable,
    item: &NormalizedItem,
) -> HierarchyContext {
    let mut context = HierarchyContext::default();

    match fetch_epic_children(conn.transport(), &item.key, MAX_CHILDREN).await {
        Ok((page, path)) => {
            context.note_truncation("children", &page);
            let children = normalize_page(&page, table);
            context.relations = children
                .iter()
                .map(|child| Relation::new(&item.key, &child.key, RelationKind::EpicLinkOf))
                .collect();
            context.progress = Some(Progress::compute(&children, config, EMPTY_EPIC_PROGRESS));
            context.children = summaries(&children, config);
            context.children_path = Some(path);
        }
        Err(e) => {
            context.degrade::<()>("children", &item.key, Err(e));
        }
    }

    context
}

async fn aggregate_container(
    conn: &Connection,
    config: &JiraConfig,
    table: &FieldTable,
    item: &NormalizedItem,
) -> HierarchyContext {
    let mut context = HierarchyContext::default();
    let subtasks_jql = children_predicate(&item.key).render();

    let epic_branch = async {
        match &item.epic_key {
            Some(epic_key) => fetch_summary(conn, config, table, epic_key).await,
            None => Ok(None),
        }
    };
    let subtasks_branch = search(conn.transport(), &subtasks_jql, 0, MAX_CHILDREN);

    let (epic, subtasks) = tokio::join!(epic_branch, subtasks_branch);

    let epic_key = item.epic_key.as_deref().unwrap_or_default();
    context.epic_info = context.degrade("epic", epic_key, epic);

    match subtasks {
        Ok(page) => {
            context.note_truncation("sub-tasks", &page);
            let children = normalize_page(&page, table);
            context.relations = children
                .iter()
                .map(|child| Relation::new(&item.key, &child.key, RelationKind::ParentOf))
                .collect();
            context.progress = Some(Progress::compute(&children, config, EMPTY_STORY_PROGRESS));
            context.children = summaries(&children, config);
        }
        Err(e) => {
            context.degrade::<()>("sub-tasks", &item.key, Err(e));
        }
    }

    context
}

async fn aggregate_subtask(
    conn: &Connection,
    config: &JiraConfig,
    table: &FieldTable,
    item: &NormalizedItem,
) -> HierarchyContext {
    let mut context = HierarchyContext::default();

    let Some(parent_key) = item.parent_key.as_deref() else {
        warn!("Sub-task {} has no parent", item.key);
        context
            .warnings
            .push(format!("Sub-task {} has no parent", item.key));
        return context;
    };

    let siblings_jql = children_predicate(parent_key).render();
    let (parent, siblings) = tokio::join!(
        fetch_summary(conn, config, table, parent_key),
        search(conn.transport(), &siblings_jql, 0, MAX_CHILDREN)
    );

    context.parent_info = context.degrade("parent", parent_key, parent);

    let siblings = context.degrade("siblings", parent_key, siblings);
    context.note_truncation("siblings", &siblings);
    let siblings = normalize_page(&siblings, table);
    context.position = siblings
        .iter()
        .position(|sibling| sibling.key == item.key)
        .map(|index| index + 1);
    context.relations = siblings
        .iter()
        .filter(|sibling| sibling.key != item.key)
        .map(|sibling| Relation::new(parent_key, &sibling.key, RelationKind::ParentOf))
        .collect();
    context.siblings = summaries(&siblings, config);

    context
}
