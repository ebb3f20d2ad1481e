//! Dual-endpoint dispatch
//!
//! Each field-group is sent to the endpoint it targets. When a specialized
//! endpoint answers "unsupported operation", the group is retried exactly
//! once on the generic endpoint with the fields remapped through the
//! connection's field table. Independent groups run concurrently and never
//! cancel each other.

use crate::cache::Connection;
use crate::engine::fields::{
    candidate_request, CandidateField, FieldSet, FieldWarning, WarningKind,
};
use crate::error::ErrorKind;
use crate::transport::{ApiFamily, ApiRequest};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

/// Which endpoint finally handled a field-group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PathUsed {
    Primary,
    Fallback,
}

/// Result of dispatching one field-group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DispatchOutcome {
    /// Field-group name, e.g. "generic", "epic_details", "story_points"
    pub group: String,
    pub path_used: PathUsed,
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Requests sent for this group
    pub attempts: u32,
    /// Backend key that accepted a candidate field
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_key: Option<String>,
}

impl DispatchOutcome {
    pub fn succeeded(group: String, path_used: PathUsed, attempts: u32) -> Self {
        Self {
            group,
            path_used,
            succeeded: true,
            error_kind: None,
            error: None,
            attempts,
            backend_key: None,
        }
    }

    pub fn failed(
        group: String,
        path_used: PathUsed,
        attempts: u32,
        kind: ErrorKind,
        message: String,
    ) -> Self {
        Self {
            group,
            path_used,
            succeeded: false,
            error_kind: Some(kind),
            error: Some(message),
            attempts,
            backend_key: None,
        }
    }
}

/// Outcome plus the warnings raised while dispatching
#[derive(Debug, Clone, PartialEq)]
pub struct GroupReport {
    pub outcome: DispatchOutcome,
    pub warnings: Vec<FieldWarning>,
}

#[derive(Debug)]
enum DispatchState {
    Init,
    AttemptPrimary,
    NeedsFallback { kind: ErrorKind, message: String },
    AttemptFallback(ApiRequest),
    Succeeded(PathUsed),
    Failed {
        path: PathUsed,
        kind: ErrorKind,
        message: String,
    },
}

/// Apply one field-group to an existing item
#[instrument(skip(conn, set), fields(group = %set.group_name()))]
pub async fn dispatch_field_set(conn: &Connection, issue_key: &str, set: &FieldSet) -> GroupReport {
    if let FieldSet::Candidates(candidate) = set {
        return try_candidates(conn, issue_key, candidate).await;
    }

    let group = set.group_name();
    let table = conn.field_table();
    let mut warnings = Vec::new();
    let mut attempts = 0;
    let mut state = DispatchState::Init;

    loop {
        state = match state {
            DispatchState::Init => DispatchState::AttemptPrimary,
            DispatchState::AttemptPrimary => {
                attempts += 1;
                let request = set.primary_request(issue_key);
                let family = request.family;
                let response = conn.transport().send(request).await;

                match response.error_kind(family) {
                    None => DispatchState::Succeeded(PathUsed::Primary),
                    Some(kind) if !kind.is_terminal() => {
                        warn!(
                            "{} endpoint does not support '{}' for {}, falling back to the generic endpoint",
                            family.api_name(),
                            group,
                            issue_key
                        );
                        DispatchState::NeedsFallback {
                            kind,
                            message: response.error_message(),
                        }
                    }
                    Some(kind) => DispatchState::Failed {
                        path: PathUsed::Primary,
                        kind,
                        message: response.error_message(),
                    },
                }
            }
            DispatchState::NeedsFallback { kind, message } => {
                match set.fallback_request(issue_key, &table) {
                    Some((request, fallback_warnings)) => {
                        warnings.extend(fallback_warnings);
                        DispatchState::AttemptFallback(request)
                    }
                    None => DispatchState::Failed {
                        path: PathUsed::Primary,
                        kind,
                        message: format!("{} (no generic equivalent for '{}')", message, group),
                    },
                }
            }
            DispatchState::AttemptFallback(request) => {
                attempts += 1;
                let response = conn.transport().send(request).await;
                match response.error_kind(ApiFamily::Platform) {
                    None => DispatchState::Succeeded(PathUsed::Fallback),
                    Some(kind) => DispatchState::Failed {
                        path: PathUsed::Fallback,
                        kind,
                        message: response.error_message(),
                    },
                }
            }
            DispatchState::Succeeded(path) => {
                debug!("Field-group '{}' applied to {} via {:?}", group, issue_key, path);
                return GroupReport {
                    outcome: DispatchOutcome::succeeded(group, path, attempts),
                    warnings,
                };
            }
            DispatchState::Failed {
                path,
                kind,
                message,
            } => {
                warn!(
                    "Field-group '{}' failed on {} ({}): {}",
                    group, issue_key, kind, message
                );
                return GroupReport {
                    outcome: DispatchOutcome::failed(group, path, attempts, kind, message),
                    warnings,
                };
            }
        };
    }
}

/// Try each candidate key in turn; the first key the backend accepts wins
/// and is remembered for the rest of the connection's lifetime.
async fn try_candidates(
    conn: &Connection,
    issue_key: &str,
    candidate: &CandidateField,
) -> GroupReport {
    let group = candidate.field.name().to_string();
    let mut warnings = Vec::new();
    let mut attempts = 0;
    let mut last_error = String::from("no candidate keys configured");

    for key in &candidate.keys {
        attempts += 1;
        let response = conn
            .transport()
            .send(candidate_request(issue_key, key, &candidate.value))
            .await;

        match response.error_kind(ApiFamily::Platform) {
            None => {
                info!("{} resolved to {} on this connection", candidate.field, key);
                conn.promote_field(candidate.field, key);
                let mut outcome = DispatchOutcome::succeeded(group, PathUsed::Primary, attempts);
                outcome.backend_key = Some(key.clone());
                return GroupReport { outcome, warnings };
            }
            Some(ErrorKind::Validation) => {
                last_error = response.error_message();
                warnings.push(FieldWarning::new(
                    candidate.field.name(),
                    WarningKind::RejectedField,
                    format!("Backend rejected {} for {}: {}", key, candidate.field, last_error),
                ));
            }
            Some(kind) => {
                let message = response.error_message();
                warn!("Trying keys for {} stopped at {}: {}", candidate.field, key, message);
                return GroupReport {
                    outcome: DispatchOutcome::failed(group, PathUsed::Primary, attempts, kind, message),
                    warnings,
                };
            }
        }
    }

    warnings.push(FieldWarning::new(
        candidate.field.name(),
        WarningKind::UnmappedField,
        format!(
            "None of the candidate keys for {} was accepted, value not applied",
            candidate.field
        ),
    ));
    GroupReport {
        outcome: DispatchOutcome::failed(
            group,
            PathUsed::Primary,
            attempts,
            ErrorKind::Validation,
            last_error,
        ),
        warnings,
    }
}

/// Dispatch independent field-groups concurrently; reports keep input order
#[instrument(skip(conn, sets), fields(groups = sets.len()))]
pub async fn dispatch_all(
    conn: Arc<Connection>,
    issue_key: &str,
    sets: Vec<FieldSet>,
) -> Vec<GroupReport> {
    let groups: Vec<String> = sets.iter().map(FieldSet::group_name).collect();
    let mut join_set = JoinSet::new();

    for (index, set) in sets.into_iter().enumerate() {
        let conn = Arc::clone(&conn);
        let issue_key = issue_key.to_string();
        join_set.spawn(async move {
            let report = dispatch_field_set(&conn, &issue_key, &set).await;
            (index, report)
        });
    }

    let mut slots: Vec<Option<GroupReport>> = vec![None; groups.len()];
    while let Some(result) = join_set.join_next().await {
        match result {
            Ok((index, report)) => slots[index] = Some(report),
            Err(e) => error!("Dispatch task join error: {}", e),
        }
    }

    slots
        .into_iter()
        .zip(groups)
        .map(|(slot, group)| {
            slot.unwrap_or_else(|| GroupReport {
                outcome: DispatchOutcome::failed(
                    group,
                    PathUsed::Primary,
                    0,
                    ErrorKind::UnknownServer,
                    "Dispatch task did not complete".to_string(),
                ),
                warnings: Vec::new(),
            })
        })
        .collect()
}

/// Overall success of a multi-group operation: every group must succeed
pub fn all_succeeded(outcomes: &[DispatchOutcome]) -> bool {
    outcomes.iter().all(|outcome| outcome.succeeded)
}
