//! Search predicate construction
//!
//! Structured search filters are turned into a small clause tree and
//! rendered to JQL in one step. Top-level clauses are AND-joined in a fixed
//! order: project, issue type, the remaining filters in declaration order,
//! then quick filters. Multi-value filters always render as a parenthesized
//! group and every string value is quoted.

use crate::engine::category::Category;
use crate::error::{JiraMcpError, JiraMcpResult};
use chrono::{NaiveDate, NaiveDateTime};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

/// Ordering used when the caller gives none
pub const DEFAULT_ORDER_BY: &str = "updated DESC";

/// Structured search filter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SearchFilter {
    /// Project key, e.g. "PROJ"
    pub project: Option<String>,

    /// Work item categories, e.g. ["Epic", "Story"]
    pub categories: Option<Vec<Category>>,

    /// Backend issue type names, e.g. ["Story", "Bug"]
    pub issue_types: Option<Vec<String>>,

    /// Free-text search across summary, description and comments
    pub text: Option<String>,

    /// Status names, e.g. ["In Progress", "Review"]
    pub statuses: Option<Vec<String>>,

    /// "me", "unassigned", an e-mail address or an account id
    pub assignee: Option<String>,

    /// "me", an e-mail address or an account id
    pub reporter: Option<String>,

    pub labels: Option<Vec<String>>,

    pub components: Option<Vec<String>>,

    /// Priority names, e.g. ["High", "Highest"]
    pub priorities: Option<Vec<String>>,

    /// Dates: "2024-01-31", "2024-01-31 14:00", "-7d" or "7 days ago"
    pub created_after: Option<String>,
    pub created_before: Option<String>,
    pub updated_after: Option<String>,
    pub updated_before: Option<String>,

    /// "none", "any" or a parent key
    pub parent_filter: Option<String>,

    /// "none", "any" or an epic key
    pub epic_filter: Option<String>,

    /// Canned filters: my_items, my_open_items, unassigned, overdue,
    /// high_priority, recently_updated, recently_created, updated_last_<N>_days
    pub quick_filters: Option<Vec<String>>,

    /// ORDER BY override, e.g. "priority DESC, created ASC"
    pub order_by: Option<String>,

    /// Raw JQL; when set, every other filter is ignored
    pub jql: Option<String>,
}

/// Comparison operators used by the builder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    NotEq,
    Lt,
    Gte,
    Lte,
    Contains,
    Is,
    IsNot,
}

impl Operator {
    fn as_str(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::NotEq => "!=",
            Operator::Lt => "<",
            Operator::Gte => ">=",
            Operator::Lte => "<=",
            Operator::Contains => "~",
            Operator::Is => "is",
            Operator::IsNot => "is not",
        }
    }
}

/// Right-hand side of a comparison
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    /// Always quoted and escaped
    Quoted(String),
    /// JQL keyword or function, e.g. `EMPTY`, `currentUser()`
    Keyword(&'static str),
}

/// One node of the predicate tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Clause {
    Compare {
        field: String,
        op: Operator,
        value: Literal,
    },
    /// `field in ("a","b")`
    AnyOf { field: String, values: Vec<String> },
    /// Parenthesized OR-group
    Or(Vec<Clause>),
}

impl Clause {
    fn compare(field: &str, op: Operator, value: Literal) -> Self {
        Clause::Compare {
            field: field.to_string(),
            op,
            value,
        }
    }

    fn quoted(field: &str, op: Operator, value: impl Into<String>) -> Self {
        Self::compare(field, op, Literal::Quoted(value.into()))
    }

    fn keyword(field: &str, op: Operator, keyword: &'static str) -> Self {
        Self::compare(field, op, Literal::Keyword(keyword))
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Clause::Compare { field, op, value } => {
                write!(f, "{} {} ", render_field(field), op.as_str())?;
                match value {
                    Literal::Quoted(text) => write!(f, "\"{}\"", escape_jql_string(text)),
                    Literal::Keyword(keyword) => f.write_str(keyword),
                }
            }
            Clause::AnyOf { field, values } => {
                let values: Vec<String> = values
                    .iter()
                    .map(|v| format!("\"{}\"", escape_jql_string(v)))
                    .collect();
                write!(f, "{} in ({})", render_field(field), values.join(","))
            }
            Clause::Or(clauses) => {
                let parts: Vec<String> = clauses.iter().map(ToString::to_string).collect();
                write!(f, "({})", parts.join(" OR "))
            }
        }
    }
}

/// AND-joined clauses plus an ordering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    pub clauses: Vec<Clause>,
    pub order_by: String,
}

impl Predicate {
    pub fn render(&self) -> String {
        if self.clauses.is_empty() {
            return format!("ORDER BY {}", self.order_by);
        }
        let conditions: Vec<String> = self.clauses.iter().map(ToString::to_string).collect();
        format!("{} ORDER BY {}", conditions.join(" AND "), self.order_by)
    }
}

/// Build the JQL string for a filter. Sub-task category filters render as
/// `subtask_type_name`.
pub fn build_predicate(filter: &SearchFilter, subtask_type_name: &str) -> JiraMcpResult<String> {
    if let Some(jql) = &filter.jql {
        if !jql.trim().is_empty() {
            debug!("Using raw JQL override");
            return Ok(jql.clone());
        }
    }

    let jql = to_predicate(filter, subtask_type_name)?.render();
    debug!("Built JQL query: {}", jql);
    Ok(jql)
}

/// Build the clause tree for a filter (the raw override is not consulted)
pub fn to_predicate(filter: &SearchFilter, subtask_type_name: &str) -> JiraMcpResult<Predicate> {
    let mut clauses = Vec::new();

    if let Some(project) = non_empty(&filter.project) {
        clauses.push(Clause::quoted("project", Operator::Eq, project));
    }

    let mut issue_types = Vec::new();
    for category in filter.categories.iter().flatten() {
        match category {
            Category::Other => warn!("Category 'Other' has no issue type name, ignoring"),
            category => issue_types.push(category.type_name(subtask_type_name).to_string()),
        }
    }
    issue_types.extend(filter.issue_types.iter().flatten().cloned());
    push_any_of(&mut clauses, "issuetype", &issue_types);

    if let Some(text) = non_empty(&filter.text) {
        clauses.push(Clause::quoted("text", Operator::Contains, text));
    }

    push_any_of(&mut clauses, "status", filter.statuses.as_deref().unwrap_or_default());

    if let Some(assignee) = non_empty(&filter.assignee) {
        clauses.push(user_clause("assignee", assignee));
    }
    if let Some(reporter) = non_empty(&filter.reporter) {
        clauses.push(user_clause("reporter", reporter));
    }

    push_any_of(&mut clauses, "labels", filter.labels.as_deref().unwrap_or_default());
    push_any_of(
        &mut clauses,
        "component",
        filter.components.as_deref().unwrap_or_default(),
    );
    push_any_of(
        &mut clauses,
        "priority",
        filter.priorities.as_deref().unwrap_or_default(),
    );

    let ranges = [
        ("created", Operator::Gte, "created_after", &filter.created_after),
        ("created", Operator::Lte, "created_before", &filter.created_before),
        ("updated", Operator::Gte, "updated_after", &filter.updated_after),
        ("updated", Operator::Lte, "updated_before", &filter.updated_before),
    ];
    for (field, op, parameter, value) in ranges {
        if let Some(value) = non_empty(value) {
            clauses.push(Clause::quoted(field, op, parse_date_filter(parameter, value)?));
        }
    }

    if let Some(parent) = non_empty(&filter.parent_filter) {
        clauses.push(relation_clause("parent", parent));
    }
    if let Some(epic) = non_empty(&filter.epic_filter) {
        clauses.push(relation_clause("Epic Link", epic));
    }

    for name in filter.quick_filters.iter().flatten() {
        clauses.extend(quick_filter_clauses(name)?);
    }

    let order_by = match non_empty(&filter.order_by) {
        Some(order_by) => validate_order_by(order_by)?,
        None => DEFAULT_ORDER_BY.to_string(),
    };

    Ok(Predicate { clauses, order_by })
}

/// Children of an epic, whichever way they are attached
pub fn epic_children_predicate(epic_key: &str) -> Predicate {
    Predicate {
        clauses: vec![Clause::Or(vec![
            Clause::quoted("Epic Link", Operator::Eq, epic_key),
            Clause::quoted("parent", Operator::Eq, epic_key),
        ])],
        order_by: "created ASC".to_string(),
    }
}

/// Direct children of an item
pub fn children_predicate(parent_key: &str) -> Predicate {
    Predicate {
        clauses: vec![Clause::quoted("parent", Operator::Eq, parent_key)],
        order_by: "created ASC".to_string(),
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Add `field in (...)` for the distinct non-empty values, first occurrence first
fn push_any_of(clauses: &mut Vec<Clause>, field: &str, values: &[String]) {
    let mut distinct: Vec<String> = Vec::new();
    for value in values.iter().map(|v| v.trim()).filter(|v| !v.is_empty()) {
        if !distinct.iter().any(|seen| seen == value) {
            distinct.push(value.to_string());
        }
    }

    if !distinct.is_empty() {
        clauses.push(Clause::AnyOf {
            field: field.to_string(),
            values: distinct,
        });
    }
}

fn user_clause(field: &str, user: &str) -> Clause {
    match user.to_lowercase().as_str() {
        "me" | "current_user" | "currentuser" => {
            Clause::keyword(field, Operator::Eq, "currentUser()")
        }
        "unassigned" | "none" => Clause::keyword(field, Operator::Is, "EMPTY"),
        _ => Clause::quoted(field, Operator::Eq, user),
    }
}

fn relation_clause(field: &str, filter: &str) -> Clause {
    match filter.to_lowercase().as_str() {
        "none" => Clause::keyword(field, Operator::Is, "EMPTY"),
        "any" => Clause::keyword(field, Operator::IsNot, "EMPTY"),
        _ => Clause::quoted(field, Operator::Eq, filter.to_uppercase()),
    }
}

fn not_done() -> Clause {
    Clause::quoted("statusCategory", Operator::NotEq, "Done")
}

/// Expand a named quick filter into its canned clauses
pub fn quick_filter_clauses(name: &str) -> JiraMcpResult<Vec<Clause>> {
    let normalized = name.trim().to_lowercase();

    let clauses = match normalized.as_str() {
        "my_items" => vec![Clause::keyword("assignee", Operator::Eq, "currentUser()")],
        "my_open_items" => vec![
            Clause::keyword("assignee", Operator::Eq, "currentUser()"),
            not_done(),
        ],
        "unassigned" => vec![Clause::keyword("assignee", Operator::Is, "EMPTY")],
        "overdue" => vec![Clause::keyword("duedate", Operator::Lt, "now()"), not_done()],
        "high_priority" => vec![Clause::AnyOf {
            field: "priority".to_string(),
            values: vec!["Highest".to_string(), "High".to_string()],
        }],
        "recently_updated" => vec![Clause::quoted("updated", Operator::Gte, "-7d")],
        "recently_created" => vec![Clause::quoted("created", Operator::Gte, "-7d")],
        other => {
            let days = other
                .strip_prefix("updated_last_")
                .and_then(|rest| rest.strip_suffix("_days"))
                .and_then(|n| n.parse::<u32>().ok())
                .filter(|n| *n > 0)
                .ok_or_else(|| {
                    JiraMcpError::invalid_param(
                        "quick_filters",
                        format!(
                            "Unknown quick filter '{}'. Use my_items, my_open_items, unassigned, \
                             overdue, high_priority, recently_updated, recently_created or \
                             updated_last_<N>_days",
                            name
                        ),
                    )
                })?;
            vec![Clause::quoted("updated", Operator::Gte, format!("-{}d", days))]
        }
    };

    Ok(clauses)
}

fn render_field(field: &str) -> String {
    if field.contains(' ') {
        format!("\"{}\"", field)
    } else {
        field.to_string()
    }
}

/// Escape special characters in JQL string literals
fn escape_jql_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

fn validate_order_by(order_by: &str) -> JiraMcpResult<String> {
    let allowed = order_by
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, ' ' | '_' | ',' | '.' | '"'));
    if !allowed {
        return Err(JiraMcpError::invalid_param(
            "order_by",
            format!("Invalid ORDER BY clause: '{}'", order_by),
        ));
    }
    Ok(order_by.to_string())
}

/// Parse a date filter into a JQL date value
pub fn parse_date_filter(parameter: &str, date_str: &str) -> JiraMcpResult<String> {
    let trimmed = date_str.trim();

    if NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").is_ok()
        || NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M").is_ok()
    {
        return Ok(trimmed.to_string());
    }

    if let Some(relative) = parse_offset(trimmed) {
        return Ok(relative);
    }

    if let Some(relative) = parse_relative_date(&trimmed.to_lowercase()) {
        return Ok(relative);
    }

    Err(JiraMcpError::invalid_param(
        parameter,
        format!(
            "Invalid date format: '{}'. Use formats like '2024-01-01', '2024-01-01 14:30', \
             '-7d' or '7 days ago'",
            date_str
        ),
    ))
}

/// Accept JQL offsets such as `-7d`, `-2w`, `-1M`
fn parse_offset(value: &str) -> Option<String> {
    let rest = value.strip_prefix('-')?;
    let unit = rest.chars().last()?;
    let amount = &rest[..rest.len() - unit.len_utf8()];
    if !matches!(unit, 'm' | 'h' | 'd' | 'w' | 'M' | 'y') {
        return None;
    }
    let amount: u32 = amount.parse().ok()?;
    Some(format!("-{}{}", amount, unit))
}

/// Parse relative date strings like "7 days ago"
fn parse_relative_date(date_str: &str) -> Option<String> {
    let parts: Vec<&str> = date_str.split_whitespace().collect();
    let [amount, unit, "ago"] = parts.as_slice() else {
        return None;
    };
    let amount: u32 = amount.parse().ok()?;
    let unit = match *unit {
        "hour" | "hours" => "h",
        "day" | "days" => "d",
        "week" | "weeks" => "w",
        "month" | "months" => "M",
        "year" | "years" => "y",
        _ => return None,
    };
    Some(format!("-{}{}", amount, unit))
}
