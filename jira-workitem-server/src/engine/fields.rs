//! Field mapping for work items
//!
//! Translates the generic field bag a caller sends into one or more
//! [`FieldSet`]s, each addressed to a specific backend endpoint family.
//! Mapping never fails: anything that cannot be mapped becomes a
//! [`FieldWarning`] and the rest of the request proceeds.

use crate::engine::category::Category;
use crate::transport::{ApiFamily, ApiRequest, JiraTransport};
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;
use tracing::{debug, instrument, warn};

static ACCOUNT_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:[0-9a-f]{24}|\d+:[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12})$")
        .expect("account id pattern is valid")
});

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$")
        .expect("email pattern is valid")
});

/// Logical, deployment-independent field names
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum LogicalField {
    StoryPoints,
    EpicLink,
    EpicName,
    EpicColor,
    EpicDone,
    ParentKey,
}

impl LogicalField {
    pub const ALL: [LogicalField; 6] = [
        LogicalField::StoryPoints,
        LogicalField::EpicLink,
        LogicalField::EpicName,
        LogicalField::EpicColor,
        LogicalField::EpicDone,
        LogicalField::ParentKey,
    ];

    pub fn name(self) -> &'static str {
        match self {
            LogicalField::StoryPoints => "story_points",
            LogicalField::EpicLink => "epic_link",
            LogicalField::EpicName => "epic_name",
            LogicalField::EpicColor => "epic_color",
            LogicalField::EpicDone => "epic_done",
            LogicalField::ParentKey => "parent_key",
        }
    }

    pub fn from_name(name: &str) -> Option<LogicalField> {
        Self::ALL.into_iter().find(|field| field.name() == name)
    }

    /// Display names the backend field catalogue uses for this field
    fn catalogue_names(self) -> &'static [&'static str] {
        match self {
            LogicalField::StoryPoints => &["story points", "story point estimate"],
            LogicalField::EpicLink => &["epic link"],
            LogicalField::EpicName => &["epic name"],
            LogicalField::EpicColor => &["epic colour", "epic color"],
            LogicalField::EpicDone | LogicalField::ParentKey => &[],
        }
    }
}

impl fmt::Display for LogicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The generic field bag of a create or update request
///
/// Keys that are not one of the named fields are kept verbatim in
/// `custom_fields` and passed through to the generic endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WorkItemFields {
    /// Item title
    pub summary: Option<String>,

    /// Plain-text description
    pub description: Option<String>,

    /// Priority name, e.g. "High"
    pub priority: Option<String>,

    /// Labels (replaces the existing set on update)
    pub labels: Option<Vec<String>>,

    /// E-mail address, account id, "me" or "unassigned"
    pub assignee: Option<String>,

    /// Component names
    pub components: Option<Vec<String>>,

    /// Epic only: short epic name
    pub epic_name: Option<String>,

    /// Epic only: board colour key, e.g. "color_4"
    pub epic_color: Option<String>,

    /// Epic only: whether the epic is done
    pub epic_done: Option<bool>,

    /// Story points estimate
    pub story_points: Option<f64>,

    /// Key of the epic this item belongs to
    pub epic_link: Option<String>,

    /// Key of the parent item (sub-tasks)
    pub parent_key: Option<String>,

    /// Backend fields passed through as-is, e.g. `customfield_10050`
    #[serde(flatten)]
    pub custom_fields: BTreeMap<String, Value>,
}

impl WorkItemFields {
    pub fn has_epic_fields(&self) -> bool {
        self.epic_name.is_some() || self.epic_color.is_some() || self.epic_done.is_some()
    }

    pub fn has_story_fields(&self) -> bool {
        self.story_points.is_some() || self.epic_link.is_some()
    }
}

/// Where a logical field lives on this deployment
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKey {
    /// Known backend key
    Resolved(String),
    /// Plausible keys, most likely first
    Candidates(Vec<String>),
}

impl FieldKey {
    pub fn preferred(&self) -> Option<&str> {
        match self {
            FieldKey::Resolved(key) => Some(key),
            FieldKey::Candidates(keys) => keys.first().map(String::as_str),
        }
    }

    pub fn keys(&self) -> Vec<&str> {
        match self {
            FieldKey::Resolved(key) => vec![key.as_str()],
            FieldKey::Candidates(keys) => keys.iter().map(String::as_str).collect(),
        }
    }
}

/// Per-connection table of logical field -> backend key(s)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldTable {
    entries: BTreeMap<LogicalField, FieldKey>,
}

impl FieldTable {
    /// Build the table from the configured mappings.
    /// A single configured key is taken as resolved.
    pub fn from_mappings(mappings: &BTreeMap<String, Vec<String>>) -> Self {
        let mut entries = BTreeMap::new();

        for (name, keys) in mappings {
            let Some(field) = LogicalField::from_name(name) else {
                continue;
            };
            let keys: Vec<String> = keys
                .iter()
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect();

            match keys.len() {
                0 => {}
                1 => {
                    entries.insert(field, FieldKey::Resolved(keys[0].clone()));
                }
                _ => {
                    entries.insert(field, FieldKey::Candidates(keys));
                }
            }
        }

        Self { entries }
    }

    pub fn get(&self, field: LogicalField) -> Option<&FieldKey> {
        self.entries.get(&field)
    }

    pub fn preferred_key(&self, field: LogicalField) -> Option<&str> {
        self.get(field).and_then(FieldKey::preferred)
    }

    pub fn resolve(&mut self, field: LogicalField, key: impl Into<String>) {
        self.entries.insert(field, FieldKey::Resolved(key.into()));
    }

    pub fn is_resolved(&self, field: LogicalField) -> bool {
        matches!(self.get(field), Some(FieldKey::Resolved(_)))
    }

    /// Resolve fields from the backend field catalogue (`GET /field`).
    /// Returns the number of fields resolved.
    pub fn apply_catalogue(&mut self, catalogue: &Value) -> usize {
        let Some(entries) = catalogue.as_array() else {
            warn!("Field catalogue is not a list, keeping configured field mappings");
            return 0;
        };

        let mut resolved = 0;
        for field in LogicalField::ALL {
            let names = field.catalogue_names();
            if names.is_empty() {
                continue;
            }

            let found = entries.iter().find_map(|entry| {
                let name = entry.get("name")?.as_str()?.to_lowercase();
                let id = entry.get("id")?.as_str()?;
                names.contains(&name.as_str()).then(|| id.to_string())
            });

            if let Some(key) = found {
                debug!("Discovered {} as {}", field, key);
                self.resolve(field, key);
                resolved += 1;
            }
        }

        resolved
    }

    /// First non-null value of a logical field in an issue's `fields` object
    pub fn value_in<'a>(&self, field: LogicalField, fields: &'a Value) -> Option<&'a Value> {
        self.get(field)?
            .keys()
            .into_iter()
            .filter_map(|key| fields.get(key))
            .find(|value| !value.is_null())
    }
}

/// Why a field was not sent as requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// No backend key is known for the field
    UnmappedField,
    /// Assignee did not match an accepted shape or could not be resolved
    InvalidAssignee,
    /// The field does not apply to the item's category
    UnsupportedValue,
    /// The backend refused a candidate key
    RejectedField,
}

/// Non-fatal problem found while mapping or dispatching fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FieldWarning {
    pub field: String,
    pub kind: WarningKind,
    pub message: String,
}

impl FieldWarning {
    pub fn new(field: impl Into<String>, kind: WarningKind, message: impl Into<String>) -> Self {
        let warning = Self {
            field: field.into(),
            kind,
            message: message.into(),
        };
        warn!("Field warning on '{}': {}", warning.field, warning.message);
        warning
    }
}

impl fmt::Display for FieldWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Epic attributes understood by the agile epic endpoint
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpicDetails {
    pub name: Option<String>,
    pub color: Option<String>,
    pub done: Option<bool>,
}

/// A single category-specific field and the backend keys it may live under,
/// most likely first (exactly one once resolved)
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateField {
    pub field: LogicalField,
    pub keys: Vec<String>,
    pub value: Value,
}

/// A group of fields destined for one endpoint
#[derive(Debug, Clone, PartialEq)]
pub enum FieldSet {
    /// Generic item endpoint, fixed or resolved keys
    Generic(Map<String, Value>),
    /// Agile epic endpoint
    EpicDetails(EpicDetails),
    /// Agile "move issues to epic" endpoint
    EpicLink { epic_key: String },
    /// One category-specific field on the generic endpoint, tried key by key
    Candidates(CandidateField),
}

impl FieldSet {
    /// Stable name of the field-group, reported in dispatch outcomes
    pub fn group_name(&self) -> String {
        match self {
            FieldSet::Generic(_) => "generic".to_string(),
            FieldSet::EpicDetails(_) => "epic_details".to_string(),
            FieldSet::EpicLink { .. } => "epic_link".to_string(),
            FieldSet::Candidates(candidate) => candidate.field.name().to_string(),
        }
    }

    /// Endpoint family the group is addressed to first
    pub fn family(&self) -> ApiFamily {
        match self {
            FieldSet::Generic(_) | FieldSet::Candidates(_) => ApiFamily::Platform,
            FieldSet::EpicDetails(_) | FieldSet::EpicLink { .. } => ApiFamily::Agile,
        }
    }

    /// Request applying this group to an existing item
    pub fn primary_request(&self, issue_key: &str) -> ApiRequest {
        match self {
            FieldSet::Generic(fields) => ApiRequest::put(
                ApiFamily::Platform,
                format!("/issue/{}", issue_key),
                json!({ "fields": fields }),
            ),
            FieldSet::EpicDetails(details) => {
                let mut body = Map::new();
                if let Some(name) = &details.name {
                    body.insert("name".to_string(), json!(name));
                }
                if let Some(color) = &details.color {
                    body.insert("color".to_string(), json!({ "key": color }));
                }
                if let Some(done) = details.done {
                    body.insert("done".to_string(), json!(done));
                }
                ApiRequest::post(
                    ApiFamily::Agile,
                    format!("/epic/{}", issue_key),
                    Value::Object(body),
                )
            }
            FieldSet::EpicLink { epic_key } => ApiRequest::post(
                ApiFamily::Agile,
                format!("/epic/{}/issue", epic_key),
                json!({ "issues": [issue_key] }),
            )
            .without_content(),
            FieldSet::Candidates(candidate) => {
                let key = candidate.keys.first().map(String::as_str).unwrap_or_default();
                candidate_request(issue_key, key, &candidate.value)
            }
        }
    }

    /// Equivalent request on the generic endpoint, with the fields remapped
    /// through the table. `None` when the group has no generic equivalent.
    pub fn fallback_request(
        &self,
        issue_key: &str,
        table: &FieldTable,
    ) -> Option<(ApiRequest, Vec<FieldWarning>)> {
        let mut warnings = Vec::new();
        let mut fields = Map::new();

        match self {
            FieldSet::Generic(_) | FieldSet::Candidates(_) => return None,
            FieldSet::EpicDetails(details) => {
                let remapped = [
                    (LogicalField::EpicName, details.name.as_ref().map(|n| json!(n))),
                    (LogicalField::EpicColor, details.color.as_ref().map(|c| json!(c))),
                    (LogicalField::EpicDone, details.done.map(|d| json!(d))),
                ];
                for (field, value) in remapped {
                    let Some(value) = value else { continue };
                    match table.preferred_key(field) {
                        Some(key) => {
                            fields.insert(key.to_string(), value);
                        }
                        None => warnings.push(FieldWarning::new(
                            field.name(),
                            WarningKind::UnmappedField,
                            format!("No generic field is mapped for {}, value not applied", field),
                        )),
                    }
                }
            }
            FieldSet::EpicLink { epic_key } => match table.preferred_key(LogicalField::EpicLink) {
                Some(key) => {
                    fields.insert(key.to_string(), json!(epic_key));
                }
                None => {
                    fields.insert("parent".to_string(), json!({ "key": epic_key }));
                }
            },
        }

        if fields.is_empty() {
            return None;
        }

        let request = ApiRequest::put(
            ApiFamily::Platform,
            format!("/issue/{}", issue_key),
            json!({ "fields": fields }),
        );
        Some((request, warnings))
    }
}

/// Generic update setting a single backend key
pub fn candidate_request(issue_key: &str, backend_key: &str, value: &Value) -> ApiRequest {
    let mut fields = Map::new();
    fields.insert(backend_key.to_string(), value.clone());
    ApiRequest::put(
        ApiFamily::Platform,
        format!("/issue/{}", issue_key),
        json!({ "fields": fields }),
    )
}

/// Accepted assignee shapes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssigneeTarget {
    AccountId(String),
    Email(String),
    CurrentUser,
    Unassigned,
}

/// Classify an assignee input; `None` when it matches no accepted shape
pub fn parse_assignee(input: &str) -> Option<AssigneeTarget> {
    let trimmed = input.trim();
    match trimmed.to_lowercase().as_str() {
        "me" | "current_user" | "currentuser" => return Some(AssigneeTarget::CurrentUser),
        "unassigned" | "none" => return Some(AssigneeTarget::Unassigned),
        _ => {}
    }

    if ACCOUNT_ID_PATTERN.is_match(trimmed) {
        Some(AssigneeTarget::AccountId(trimmed.to_string()))
    } else if EMAIL_PATTERN.is_match(trimmed) {
        Some(AssigneeTarget::Email(trimmed.to_string()))
    } else {
        None
    }
}

/// Turn an assignee target into the generic `assignee` field value
#[instrument(skip(transport))]
pub async fn resolve_assignee(
    transport: &dyn JiraTransport,
    current_user: Option<&str>,
    target: &AssigneeTarget,
) -> Result<Value, FieldWarning> {
    match target {
        AssigneeTarget::AccountId(id) => Ok(json!({ "accountId": id })),
        AssigneeTarget::Unassigned => Ok(Value::Null),
        AssigneeTarget::CurrentUser => current_user
            .map(|id| json!({ "accountId": id }))
            .ok_or_else(|| {
                FieldWarning::new(
                    "assignee",
                    WarningKind::InvalidAssignee,
                    "Current user is unknown for this connection, assignee not changed",
                )
            }),
        AssigneeTarget::Email(email) => {
            let response = transport
                .send(ApiRequest::get(
                    ApiFamily::Platform,
                    format!("/user/search?query={}", urlencoding::encode(email)),
                ))
                .await;

            if !response.is_success() {
                return Err(FieldWarning::new(
                    "assignee",
                    WarningKind::InvalidAssignee,
                    format!(
                        "User lookup for '{}' failed: {}",
                        email,
                        response.error_message()
                    ),
                ));
            }

            response
                .body
                .as_array()
                .and_then(|users| {
                    users
                        .iter()
                        .find_map(|user| user.get("accountId").and_then(Value::as_str))
                })
                .map(|id| json!({ "accountId": id }))
                .ok_or_else(|| {
                    FieldWarning::new(
                        "assignee",
                        WarningKind::InvalidAssignee,
                        format!("No user found for '{}', assignee not changed", email),
                    )
                })
        }
    }
}

/// Output of [`map_fields`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappedFields {
    /// Field-groups in dispatch order; the generic group, if any, comes first
    pub sets: Vec<FieldSet>,
    /// Assignee still to be resolved before dispatch
    pub assignee: Option<AssigneeTarget>,
    pub warnings: Vec<FieldWarning>,
}

impl MappedFields {
    /// Nothing to send
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty() && self.assignee.is_none()
    }

    pub fn generic(&self) -> Option<&Map<String, Value>> {
        self.sets.iter().find_map(|set| match set {
            FieldSet::Generic(fields) => Some(fields),
            _ => None,
        })
    }

    /// Remove and return the generic group (empty if there was none)
    pub fn take_generic(&mut self) -> Map<String, Value> {
        match self.sets.iter().position(|set| matches!(set, FieldSet::Generic(_))) {
            Some(index) => match self.sets.remove(index) {
                FieldSet::Generic(fields) => fields,
                _ => Map::new(),
            },
            None => Map::new(),
        }
    }

    /// Put a resolved assignee value into the generic group
    pub fn apply_assignee(&mut self, value: Value) {
        self.assignee = None;
        for set in &mut self.sets {
            if let FieldSet::Generic(fields) = set {
                fields.insert("assignee".to_string(), value);
                return;
            }
        }
        let mut fields = Map::new();
        fields.insert("assignee".to_string(), value);
        self.sets.insert(0, FieldSet::Generic(fields));
    }

    /// Resolve a pending assignee, or drop it with a warning
    pub async fn resolve_pending_assignee(
        &mut self,
        transport: &dyn JiraTransport,
        current_user: Option<&str>,
    ) {
        let Some(target) = self.assignee.take() else {
            return;
        };
        match resolve_assignee(transport, current_user, &target).await {
            Ok(value) => self.apply_assignee(value),
            Err(warning) => self.warnings.push(warning),
        }
    }
}

/// Map a field bag for an item of the given category
pub fn map_fields(category: Category, fields: &WorkItemFields, table: &FieldTable) -> MappedFields {
    let mut mapped = MappedFields::default();
    let mut generic = Map::new();

    if let Some(summary) = &fields.summary {
        generic.insert("summary".to_string(), json!(summary));
    }
    if let Some(description) = &fields.description {
        generic.insert("description".to_string(), json!(description));
    }
    if let Some(priority) = &fields.priority {
        generic.insert("priority".to_string(), json!({ "name": priority }));
    }
    if let Some(labels) = &fields.labels {
        generic.insert("labels".to_string(), json!(labels));
    }
    if let Some(components) = &fields.components {
        let components: Vec<Value> = components.iter().map(|c| json!({ "name": c })).collect();
        generic.insert("components".to_string(), Value::Array(components));
    }
    if let Some(assignee) = &fields.assignee {
        match parse_assignee(assignee) {
            Some(target) => mapped.assignee = Some(target),
            None => mapped.warnings.push(FieldWarning::new(
                "assignee",
                WarningKind::InvalidAssignee,
                format!(
                    "'{}' is neither an e-mail address nor an account id, assignee not changed",
                    assignee
                ),
            )),
        }
    }

    let mut specific = Vec::new();
    match category {
        Category::Epic => {
            if fields.has_epic_fields() {
                specific.push(FieldSet::EpicDetails(EpicDetails {
                    name: fields.epic_name.clone(),
                    color: fields.epic_color.clone(),
                    done: fields.epic_done,
                }));
            }
            if fields.epic_link.is_some() {
                mapped.warnings.push(FieldWarning::new(
                    LogicalField::EpicLink.name(),
                    WarningKind::UnsupportedValue,
                    "An epic cannot be linked to another epic",
                ));
            }
        }
        Category::Story | Category::Task | Category::Other => {
            reject_epic_fields(category, fields, &mut mapped.warnings);
            if let Some(epic_key) = &fields.epic_link {
                specific.push(FieldSet::EpicLink {
                    epic_key: epic_key.clone(),
                });
            }
        }
        Category::Subtask => {
            reject_epic_fields(category, fields, &mut mapped.warnings);
            if fields.epic_link.is_some() {
                mapped.warnings.push(FieldWarning::new(
                    LogicalField::EpicLink.name(),
                    WarningKind::UnsupportedValue,
                    "Sub-tasks belong to the epic of their parent and cannot be linked directly",
                ));
            }
        }
    }

    if let Some(points) = fields.story_points {
        map_custom_field(
            LogicalField::StoryPoints,
            json!(points),
            table,
            &mut specific,
            &mut mapped.warnings,
        );
    }

    if let Some(parent_key) = &fields.parent_key {
        generic.insert("parent".to_string(), json!({ "key": parent_key }));
    }

    for (key, value) in &fields.custom_fields {
        generic.insert(key.clone(), value.clone());
    }

    if !generic.is_empty() {
        mapped.sets.push(FieldSet::Generic(generic));
    }
    mapped.sets.extend(specific);

    debug!(
        "Mapped {} fields into {} field-groups with {} warnings",
        category,
        mapped.sets.len(),
        mapped.warnings.len()
    );
    mapped
}

fn reject_epic_fields(category: Category, fields: &WorkItemFields, warnings: &mut Vec<FieldWarning>) {
    let present = [
        (LogicalField::EpicName, fields.epic_name.is_some()),
        (LogicalField::EpicColor, fields.epic_color.is_some()),
        (LogicalField::EpicDone, fields.epic_done.is_some()),
    ];
    for (field, is_set) in present {
        if is_set {
            warnings.push(FieldWarning::new(
                field.name(),
                WarningKind::UnsupportedValue,
                format!("{} only applies to epics, not to a {}", field, category),
            ));
        }
    }
}

/// Category-specific custom fields always travel in a group of their own, so a
/// rejected key cannot take the universal fields down with it
fn map_custom_field(
    field: LogicalField,
    value: Value,
    table: &FieldTable,
    specific: &mut Vec<FieldSet>,
    warnings: &mut Vec<FieldWarning>,
) {
    match table.get(field) {
        Some(field_key) => specific.push(FieldSet::Candidates(CandidateField {
            field,
            keys: field_key.keys().into_iter().map(String::from).collect(),
            value,
        })),
        None => warnings.push(FieldWarning::new(
            field.name(),
            WarningKind::UnmappedField,
            format!("No backend field is mapped for {}, value not applied", field),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_field_mappings;
    use assert_matches::assert_matches;

    fn default_table() -> FieldTable {
        FieldTable::from_mappings(&default_field_mappings())
    }

    #[test]
    fn test_logical_field_names_round_trip() {
        for field in LogicalField::ALL {
            assert_eq!(LogicalField::from_name(field.name()), Some(field));
        }
        assert_eq!(LogicalField::from_name("sprint"), None);
    }

    #[test]
    fn test_table_from_mappings() {
        let mut mappings = BTreeMap::new();
        mappings.insert("story_points".to_string(), vec!["customfield_1".to_string()]);
        mappings.insert(
            "epic_link".to_string(),
            vec!["customfield_2".to_string(), "customfield_3".to_string()],
        );
        mappings.insert("bogus".to_string(), vec!["customfield_4".to_string()]);
        mappings.insert("epic_name".to_string(), vec![]);

        let table = FieldTable::from_mappings(&mappings);
        assert!(table.is_resolved(LogicalField::StoryPoints));
        assert_eq!(
            table.get(LogicalField::EpicLink),
            Some(&FieldKey::Candidates(vec![
                "customfield_2".to_string(),
                "customfield_3".to_string()
            ]))
        );
        assert_eq!(table.get(LogicalField::EpicName), None);
    }

    #[test]
    fn test_catalogue_discovery_resolves_by_name() {
        let mut table = default_table();
        let catalogue = json!([
            {"id": "summary", "name": "Summary", "custom": false},
            {"id": "customfield_10099", "name": "Story Points", "custom": true},
            {"id": "customfield_10100", "name": "Epic Colour", "custom": true}
        ]);

        assert_eq!(table.apply_catalogue(&catalogue), 2);
        assert_eq!(
            table.get(LogicalField::StoryPoints),
            Some(&FieldKey::Resolved("customfield_10099".to_string()))
        );
        assert_eq!(
            table.preferred_key(LogicalField::EpicColor),
            Some("customfield_10100")
        );
        assert!(!table.is_resolved(LogicalField::EpicLink));
    }

    #[test]
    fn test_value_in_reads_first_non_null_key() {
        let table = default_table();
        let fields = json!({"customfield_10016": null, "customfield_10026": 8.0});
        assert_eq!(
            table.value_in(LogicalField::StoryPoints, &fields),
            Some(&json!(8.0))
        );
        assert_eq!(table.value_in(LogicalField::EpicLink, &fields), None);
    }

    #[test]
    fn test_universal_fields_use_fixed_keys() {
        let fields = WorkItemFields {
            summary: Some("Fix login".to_string()),
            priority: Some("High".to_string()),
            labels: Some(vec!["auth".to_string()]),
            components: Some(vec!["API".to_string()]),
            ..Default::default()
        };

        for category in Category::ALL {
            let mapped = map_fields(category, &fields, &default_table());
            let generic = mapped.generic().unwrap();
            assert_eq!(generic["summary"], "Fix login");
            assert_eq!(generic["priority"], json!({"name": "High"}));
            assert_eq!(generic["labels"], json!(["auth"]));
            assert_eq!(generic["components"], json!([{"name": "API"}]));
            assert!(mapped.warnings.is_empty());
        }
    }

    #[test]
    fn test_epic_fields_go_to_a_separate_set() {
        let fields = WorkItemFields {
            summary: Some("Auth".to_string()),
            epic_name: Some("Auth".to_string()),
            epic_color: Some("color_4".to_string()),
            ..Default::default()
        };

        let mapped = map_fields(Category::Epic, &fields, &default_table());
        assert_eq!(mapped.sets.len(), 2);

        let generic = mapped.generic().unwrap();
        assert!(!generic.contains_key("customfield_10011"));
        assert!(!generic.contains_key("name"));

        assert_matches!(&mapped.sets[1], FieldSet::EpicDetails(details) => {
            assert_eq!(details.name.as_deref(), Some("Auth"));
            assert_eq!(details.color.as_deref(), Some("color_4"));
        });
        assert_eq!(mapped.sets[1].family(), ApiFamily::Agile);
    }

    #[test]
    fn test_story_points_emit_candidate_keys() {
        let fields = WorkItemFields {
            story_points: Some(5.0),
            ..Default::default()
        };

        let mapped = map_fields(Category::Story, &fields, &default_table());
        assert_matches!(&mapped.sets[..], [FieldSet::Candidates(candidate)] => {
            assert_eq!(candidate.field, LogicalField::StoryPoints);
            assert!(!candidate.keys.is_empty());
            assert_eq!(candidate.value, json!(5.0));
        });
    }

    #[test]
    fn test_resolved_story_points_keep_their_own_set() {
        let mut table = default_table();
        table.resolve(LogicalField::StoryPoints, "customfield_10099");
        let fields = WorkItemFields {
            summary: Some("Checkout".to_string()),
            story_points: Some(3.0),
            ..Default::default()
        };

        let mapped = map_fields(Category::Task, &fields, &table);
        assert_eq!(mapped.sets.len(), 2);
        assert!(!mapped.generic().unwrap().contains_key("customfield_10099"));
        assert_matches!(&mapped.sets[1], FieldSet::Candidates(candidate) => {
            assert_eq!(candidate.keys, vec!["customfield_10099".to_string()]);
            assert_eq!(candidate.value, json!(3.0));
        });
        assert_eq!(mapped.sets[1].group_name(), "story_points");
    }

    #[test]
    fn test_unmapped_field_is_a_warning() {
        let fields = WorkItemFields {
            story_points: Some(3.0),
            ..Default::default()
        };

        let mapped = map_fields(Category::Story, &fields, &FieldTable::default());
        assert!(mapped.sets.is_empty());
        assert_eq!(mapped.warnings.len(), 1);
        assert_eq!(mapped.warnings[0].kind, WarningKind::UnmappedField);
    }

    #[test]
    fn test_custom_fields_pass_through() {
        let fields: WorkItemFields = serde_json::from_value(json!({
            "summary": "x",
            "customfield_10050": {"value": "Gold"},
            "environment": "prod"
        }))
        .unwrap();

        let mapped = map_fields(Category::Task, &fields, &default_table());
        let generic = mapped.generic().unwrap();
        assert_eq!(generic["customfield_10050"], json!({"value": "Gold"}));
        assert_eq!(generic["environment"], "prod");
    }

    #[test]
    fn test_epic_fields_on_a_story_are_dropped() {
        let fields = WorkItemFields {
            epic_name: Some("Auth".to_string()),
            epic_link: Some("PROJ-1".to_string()),
            ..Default::default()
        };

        let mapped = map_fields(Category::Story, &fields, &default_table());
        assert_matches!(&mapped.sets[..], [FieldSet::EpicLink { epic_key }] => {
            assert_eq!(epic_key, "PROJ-1");
        });
        assert_eq!(mapped.warnings.len(), 1);
        assert_eq!(mapped.warnings[0].kind, WarningKind::UnsupportedValue);
    }

    #[test]
    fn test_assignee_shapes() {
        assert_eq!(
            parse_assignee("5b10a2844c20165700ede21g"),
            None,
            "non-hex characters are not an account id"
        );
        assert_eq!(
            parse_assignee("5b10a2844c20165700ede21f"),
            Some(AssigneeTarget::AccountId("5b10a2844c20165700ede21f".to_string()))
        );
        assert_eq!(
            parse_assignee("557058:f58131cb-b67d-43c7-b30d-6b58d40bd077"),
            Some(AssigneeTarget::AccountId(
                "557058:f58131cb-b67d-43c7-b30d-6b58d40bd077".to_string()
            ))
        );
        assert_eq!(
            parse_assignee("jane@example.com"),
            Some(AssigneeTarget::Email("jane@example.com".to_string()))
        );
        assert_eq!(parse_assignee("me"), Some(AssigneeTarget::CurrentUser));
        assert_eq!(parse_assignee("Unassigned"), Some(AssigneeTarget::Unassigned));
        assert_eq!(parse_assignee("John Smith"), None);
    }

    #[test]
    fn test_invalid_assignee_is_dropped_with_warning() {
        let fields = WorkItemFields {
            summary: Some("Keep me".to_string()),
            assignee: Some("John Smith".to_string()),
            ..Default::default()
        };

        let mapped = map_fields(Category::Task, &fields, &default_table());
        assert_eq!(mapped.assignee, None);
        assert_eq!(mapped.generic().unwrap()["summary"], "Keep me");
        assert_eq!(mapped.warnings[0].kind, WarningKind::InvalidAssignee);
    }

    #[test]
    fn test_apply_assignee_creates_generic_set() {
        let mut mapped = MappedFields {
            sets: vec![FieldSet::EpicLink {
                epic_key: "PROJ-1".to_string(),
            }],
            assignee: Some(AssigneeTarget::Unassigned),
            warnings: vec![],
        };

        mapped.apply_assignee(Value::Null);
        assert_eq!(mapped.sets.len(), 2);
        assert_eq!(mapped.generic().unwrap()["assignee"], Value::Null);
        assert!(mapped.assignee.is_none());
    }

    #[test]
    fn test_epic_details_fallback_remaps_to_generic_keys() {
        let set = FieldSet::EpicDetails(EpicDetails {
            name: Some("Auth".to_string()),
            color: None,
            done: Some(true),
        });

        let (request, warnings) = set.fallback_request("PROJ-1", &default_table()).unwrap();
        assert_eq!(request.family, ApiFamily::Platform);
        assert_eq!(request.path, "/issue/PROJ-1");
        assert_eq!(
            request.body,
            Some(json!({"fields": {"customfield_10011": "Auth"}}))
        );
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].field, "epic_done");
    }

    #[test]
    fn test_epic_link_fallback_uses_parent_when_unmapped() {
        let set = FieldSet::EpicLink {
            epic_key: "PROJ-1".to_string(),
        };

        let (request, _) = set.fallback_request("PROJ-7", &FieldTable::default()).unwrap();
        assert_eq!(
            request.body,
            Some(json!({"fields": {"parent": {"key": "PROJ-1"}}}))
        );
        assert!(FieldSet::Generic(Map::new())
            .fallback_request("PROJ-7", &default_table())
            .is_none());
    }
}
