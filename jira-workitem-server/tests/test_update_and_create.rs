/// Create and update scenarios against a scripted JIRA
///
/// Covers category detection, field-group dispatch, the single generic
/// fallback, candidate keys and not-found handling.
mod common;

use assert_matches::assert_matches;
use common::{scripted_server, test_config, ScriptedTransport};
use jira_workitem_server::engine::category::Category;
use jira_workitem_server::engine::dispatch::PathUsed;
use jira_workitem_server::engine::fields::{LogicalField, WarningKind, WorkItemFields};
use jira_workitem_server::error::{ErrorKind, JiraMcpError};
use jira_workitem_server::tools::{
    CreateWorkItemParams, CreateWorkItemTool, UpdateWorkItemParams, UpdateWorkItemTool,
};
use jira_workitem_server::transport::{ApiFamily, ApiResponse, Method};
use jira_workitem_server::JiraMcpServer;
use serde_json::{json, Value};
use std::sync::Arc;

fn update_tool() -> UpdateWorkItemTool {
    UpdateWorkItemTool::new(Arc::new(test_config()))
}

fn create_tool() -> CreateWorkItemTool {
    CreateWorkItemTool::new(Arc::new(test_config()))
}

fn update(issue_key: &str, fields: WorkItemFields) -> UpdateWorkItemParams {
    UpdateWorkItemParams {
        issue_key: issue_key.to_string(),
        category: None,
        fields,
    }
}

fn no_content() -> ApiResponse {
    ApiResponse::new(204, Value::Null)
}

#[tokio::test]
async fn test_epic_name_update_is_sent_to_the_epic_endpoint() {
    let (server, transport) = scripted_server(
        ScriptedTransport::connected()
            .on(Method::Put, ApiFamily::Platform, "/issue/PROJ-1", no_content())
            .on(
                Method::Post,
                ApiFamily::Agile,
                "/epic/PROJ-1",
                ApiResponse::ok(json!({"id": 37, "key": "PROJ-1", "name": "Auth"})),
            ),
    );
    let conn = server.connection().await.unwrap();

    let result = update_tool()
        .execute(
            conn,
            update(
                "PROJ-1",
                WorkItemFields {
                    summary: Some("Authentication rework".to_string()),
                    epic_name: Some("Auth".to_string()),
                    ..Default::default()
                },
            ),
        )
        .await
        .unwrap();

    assert_eq!(result.category, Category::Epic);
    assert!(result.success);
    assert_eq!(result.applied_field_groups, vec!["generic", "epic_details"]);
    assert_eq!(
        transport.bodies(Method::Post, ApiFamily::Agile, "/epic/PROJ-1"),
        vec![json!({"name": "Auth"})]
    );
    assert_eq!(
        transport.bodies(Method::Put, ApiFamily::Platform, "/issue/PROJ-1"),
        vec![json!({"fields": {"summary": "Authentication rework"}})]
    );
    // The epic field decided the category, no type lookup was needed
    assert_eq!(
        transport.count(Method::Get, ApiFamily::Platform, "/issue/PROJ-1?fields=issuetype"),
        0
    );
}

#[tokio::test]
async fn test_unsupported_epic_endpoint_falls_back_to_generic_field() {
    let (server, transport) = scripted_server(
        ScriptedTransport::connected()
            .on(
                Method::Post,
                ApiFamily::Agile,
                "/epic/PROJ-1",
                ApiResponse::text(404, "Issue does not exist or is not an epic"),
            )
            .on(Method::Put, ApiFamily::Platform, "/issue/PROJ-1", no_content()),
    );
    let conn = server.connection().await.unwrap();

    let result = update_tool()
        .execute(
            conn,
            update(
                "PROJ-1",
                WorkItemFields {
                    epic_name: Some("Auth".to_string()),
                    ..Default::default()
                },
            ),
        )
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.outcomes.len(), 1);
    let outcome = &result.outcomes[0];
    assert_eq!(outcome.group, "epic_details");
    assert_eq!(outcome.path_used, PathUsed::Fallback);
    assert!(outcome.succeeded);
    assert_eq!(outcome.attempts, 2);

    assert_eq!(
        transport.bodies(Method::Put, ApiFamily::Platform, "/issue/PROJ-1"),
        vec![json!({"fields": {"customfield_10011": "Auth"}})]
    );
}

#[tokio::test]
async fn test_failed_fallback_is_reported_per_group() {
    let (server, transport) = scripted_server(
        ScriptedTransport::connected()
            .on(Method::Post, ApiFamily::Agile, "/epic/PROJ-1", ApiResponse::text(405, "Method not allowed"))
            .on_body(
                Method::Put,
                ApiFamily::Platform,
                "/issue/PROJ-1",
                "customfield_10011",
                ApiResponse::text(403, "You do not have permission to edit this field"),
            )
            .on(Method::Put, ApiFamily::Platform, "/issue/PROJ-1", no_content()),
    );
    let conn = server.connection().await.unwrap();

    let result = update_tool()
        .execute(
            conn,
            update(
                "PROJ-1",
                WorkItemFields {
                    summary: Some("Renamed".to_string()),
                    epic_name: Some("Auth".to_string()),
                    ..Default::default()
                },
            ),
        )
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.applied_field_groups, vec!["generic"]);
    assert_eq!(result.failed_field_groups, vec!["epic_details"]);
    let failed = &result.outcomes[1];
    assert_eq!(failed.error_kind, Some(ErrorKind::Authorization));
    assert_eq!(failed.path_used, PathUsed::Fallback);
    assert!(result.error.as_deref().unwrap().starts_with("epic_details:"));

    // One primary attempt and one fallback, never more
    assert_eq!(transport.count(Method::Post, ApiFamily::Agile, "/epic/PROJ-1"), 1);
    assert_eq!(transport.count(Method::Put, ApiFamily::Platform, "/issue/PROJ-1"), 2);
}

#[tokio::test]
async fn test_authorization_error_on_primary_is_terminal() {
    let (server, transport) = scripted_server(ScriptedTransport::connected().on(
        Method::Post,
        ApiFamily::Agile,
        "/epic/PROJ-1",
        ApiResponse::text(403, "Forbidden"),
    ));
    let conn = server.connection().await.unwrap();

    let result = update_tool()
        .execute(
            conn,
            update(
                "PROJ-1",
                WorkItemFields {
                    epic_done: Some(true),
                    ..Default::default()
                },
            ),
        )
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.outcomes[0].path_used, PathUsed::Primary);
    assert_eq!(result.outcomes[0].attempts, 1);
    assert_eq!(transport.count(Method::Put, ApiFamily::Platform, "/issue/PROJ-1"), 0);
}

#[tokio::test]
async fn test_story_points_create_tries_candidate_keys() {
    let (server, transport) = scripted_server(
        ScriptedTransport::connected()
            .on(
                Method::Post,
                ApiFamily::Platform,
                "/issue",
                ApiResponse::new(201, json!({"id": "10010", "key": "PROJ-10"})),
            )
            .on_body(
                Method::Put,
                ApiFamily::Platform,
                "/issue/PROJ-10",
                "customfield_10016",
                ApiResponse::new(
                    400,
                    json!({"errorMessages": [], "errors": {"customfield_10016": "Field 'customfield_10016' cannot be set."}}),
                ),
            )
            .on(Method::Put, ApiFamily::Platform, "/issue/PROJ-10", no_content()),
    );
    let conn = server.connection().await.unwrap();

    let result = create_tool()
        .execute(
            Arc::clone(&conn),
            CreateWorkItemParams {
                project_key: Some("PROJ".to_string()),
                category: None,
                issue_type: None,
                fields: WorkItemFields {
                    summary: Some("Login page".to_string()),
                    story_points: Some(5.0),
                    ..Default::default()
                },
            },
        )
        .await
        .unwrap();

    assert_eq!(result.category, Category::Story);
    assert_eq!(result.issue_key, "PROJ-10");
    assert!(result.success);
    assert_eq!(result.applied_field_groups, vec!["generic", "story_points"]);

    let story_points = &result.outcomes[1];
    assert_eq!(story_points.backend_key.as_deref(), Some("customfield_10026"));
    assert_eq!(story_points.attempts, 2);
    assert!(result
        .warnings
        .iter()
        .any(|w| w.kind == WarningKind::RejectedField && w.message.contains("customfield_10016")));

    let created = &transport.bodies(Method::Post, ApiFamily::Platform, "/issue")[0];
    assert_eq!(created["fields"]["issuetype"]["name"], "Story");
    assert_eq!(created["fields"]["project"]["key"], "PROJ");
    assert_eq!(created["fields"]["summary"], "Login page");

    // The accepted key is remembered for the rest of the connection
    let table = conn.field_table();
    assert!(table.is_resolved(LogicalField::StoryPoints));
    assert_eq!(table.preferred_key(LogicalField::StoryPoints), Some("customfield_10026"));
    assert_eq!(result.data.as_ref().unwrap()["url"], "https://test.atlassian.net/browse/PROJ-10");
}

#[tokio::test]
async fn test_subtask_create_uses_parent_project_and_configured_type() {
    let (server, transport) = scripted_server(ScriptedTransport::connected().on(
        Method::Post,
        ApiFamily::Platform,
        "/issue",
        ApiResponse::new(201, json!({"id": "10020", "key": "TEAM-43"})),
    ));
    let conn = server.connection().await.unwrap();

    let result = create_tool()
        .execute(
            conn,
            CreateWorkItemParams {
                project_key: None,
                category: None,
                issue_type: None,
                fields: WorkItemFields {
                    summary: Some("Write tests".to_string()),
                    parent_key: Some("TEAM-42".to_string()),
                    ..Default::default()
                },
            },
        )
        .await
        .unwrap();

    assert_eq!(result.category, Category::Subtask);
    assert!(result.success);
    let created = &transport.bodies(Method::Post, ApiFamily::Platform, "/issue")[0];
    assert_eq!(
        created["fields"],
        json!({
            "summary": "Write tests",
            "parent": {"key": "TEAM-42"},
            "project": {"key": "TEAM"},
            "issuetype": {"name": "Sub-task"}
        })
    );
}

#[tokio::test]
async fn test_story_epic_link_goes_through_agile_endpoint() {
    let (server, transport) = scripted_server(
        ScriptedTransport::connected()
            .on(
                Method::Post,
                ApiFamily::Platform,
                "/issue",
                ApiResponse::new(201, json!({"id": "10030", "key": "PROJ-11"})),
            )
            .on(Method::Post, ApiFamily::Agile, "/epic/PROJ-1/issue", no_content()),
    );
    let conn = server.connection().await.unwrap();

    let result = create_tool()
        .execute(
            conn,
            CreateWorkItemParams {
                project_key: Some("PROJ".to_string()),
                category: Some(Category::Story),
                issue_type: None,
                fields: WorkItemFields {
                    summary: Some("Password reset".to_string()),
                    epic_link: Some("PROJ-1".to_string()),
                    ..Default::default()
                },
            },
        )
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.applied_field_groups, vec!["generic", "epic_link"]);
    assert_eq!(
        transport.bodies(Method::Post, ApiFamily::Agile, "/epic/PROJ-1/issue"),
        vec![json!({"issues": ["PROJ-11"]})]
    );
}

#[tokio::test]
async fn test_update_without_hint_looks_up_the_category_once() {
    let (server, transport) = scripted_server(
        ScriptedTransport::connected()
            .on(
                Method::Get,
                ApiFamily::Platform,
                "/issue/PROJ-5?fields=issuetype",
                ApiResponse::ok(json!({"key": "PROJ-5", "fields": {"issuetype": {"name": "Story"}}})),
            )
            .on(Method::Put, ApiFamily::Platform, "/issue/PROJ-5", no_content()),
    );
    let conn = server.connection().await.unwrap();

    let result = update_tool()
        .execute(
            conn,
            update(
                "proj-5",
                WorkItemFields {
                    labels: Some(vec!["backend".to_string()]),
                    ..Default::default()
                },
            ),
        )
        .await
        .unwrap();

    assert_eq!(result.issue_key, "PROJ-5");
    assert_eq!(result.category, Category::Story);
    assert_eq!(
        transport.count(Method::Get, ApiFamily::Platform, "/issue/PROJ-5?fields=issuetype"),
        1
    );
}

#[tokio::test]
async fn test_email_assignee_is_resolved_to_account_id() {
    let (server, transport) = scripted_server(
        ScriptedTransport::connected()
            .on(
                Method::Get,
                ApiFamily::Platform,
                "/user/search?query=jane%40example.com",
                ApiResponse::ok(json!([{"accountId": "5b10ac8d82e05b22cc7d4ef5", "displayName": "Jane"}])),
            )
            .on(Method::Put, ApiFamily::Platform, "/issue/PROJ-7", no_content()),
    );
    let conn = server.connection().await.unwrap();

    let mut params = update(
        "PROJ-7",
        WorkItemFields {
            assignee: Some("jane@example.com".to_string()),
            ..Default::default()
        },
    );
    params.category = Some(Category::Task);
    let result = update_tool().execute(conn, params).await.unwrap();

    assert!(result.success);
    assert_eq!(
        transport.bodies(Method::Put, ApiFamily::Platform, "/issue/PROJ-7"),
        vec![json!({"fields": {"assignee": {"accountId": "5b10ac8d82e05b22cc7d4ef5"}}})]
    );
}

#[tokio::test]
async fn test_unusable_assignee_is_dropped_with_warning() {
    let (server, transport) = scripted_server(ScriptedTransport::connected());
    let conn = server.connection().await.unwrap();

    let mut params = update(
        "PROJ-7",
        WorkItemFields {
            assignee: Some("Jane Doe".to_string()),
            ..Default::default()
        },
    );
    params.category = Some(Category::Task);
    let result = update_tool().execute(conn, params).await.unwrap();

    assert!(!result.success);
    assert!(result.outcomes.is_empty());
    assert_matches!(result.warnings.as_slice(), [w] if w.kind == WarningKind::InvalidAssignee);
    assert_eq!(transport.count(Method::Put, ApiFamily::Platform, "/issue/PROJ-7"), 0);
}

#[tokio::test]
async fn test_empty_update_is_a_validation_error() {
    let (server, _transport) = scripted_server(ScriptedTransport::connected());
    let conn = server.connection().await.unwrap();

    let err = update_tool()
        .execute(conn, update("PROJ-1", WorkItemFields::default()))
        .await
        .unwrap_err();
    assert_matches!(err, JiraMcpError::Validation { ref parameter, .. } if parameter == "fields");
}

/// Connection whose field catalogue places story points at customfield_20000
fn discovering_server(transport: ScriptedTransport) -> (JiraMcpServer, Arc<ScriptedTransport>) {
    let transport = Arc::new(transport.on(
        Method::Get,
        ApiFamily::Platform,
        "/field",
        ApiResponse::ok(json!([
            {"id": "summary", "name": "Summary", "custom": false},
            {"id": "customfield_20000", "name": "Story Points", "custom": true}
        ])),
    ));
    let config = jira_workitem_server::config::JiraConfig {
        discover_fields: true,
        ..test_config()
    };
    let server = JiraMcpServer::with_transport(config, transport.clone());
    (server, transport)
}

#[tokio::test]
async fn test_discovered_story_points_field_is_set_after_create() {
    let (server, transport) = discovering_server(
        ScriptedTransport::connected()
            .on(
                Method::Post,
                ApiFamily::Platform,
                "/issue",
                ApiResponse::new(201, json!({"id": "10040", "key": "PROJ-12"})),
            )
            .on(Method::Put, ApiFamily::Platform, "/issue/PROJ-12", no_content()),
    );
    let conn = server.connection().await.unwrap();

    let result = create_tool()
        .execute(
            conn,
            CreateWorkItemParams {
                project_key: Some("PROJ".to_string()),
                category: None,
                issue_type: None,
                fields: WorkItemFields {
                    summary: Some("Estimate me".to_string()),
                    story_points: Some(3.0),
                    ..Default::default()
                },
            },
        )
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.applied_field_groups, vec!["generic", "story_points"]);
    assert_eq!(result.outcomes[1].backend_key.as_deref(), Some("customfield_20000"));
    assert_eq!(result.outcomes[1].attempts, 1);

    let created = &transport.bodies(Method::Post, ApiFamily::Platform, "/issue")[0];
    assert!(created["fields"].get("customfield_20000").is_none());
    assert_eq!(
        transport.bodies(Method::Put, ApiFamily::Platform, "/issue/PROJ-12"),
        vec![json!({"fields": {"customfield_20000": 3.0}})]
    );
}

#[tokio::test]
async fn test_rejected_story_points_do_not_block_the_summary() {
    let (server, transport) = discovering_server(
        ScriptedTransport::connected()
            .on_body(
                Method::Put,
                ApiFamily::Platform,
                "/issue/PROJ-5",
                "customfield_20000",
                ApiResponse::new(
                    400,
                    json!({"errorMessages": [], "errors": {"customfield_20000": "Field 'customfield_20000' cannot be set. It is not on the appropriate screen, or unknown."}}),
                ),
            )
            .on(Method::Put, ApiFamily::Platform, "/issue/PROJ-5", no_content()),
    );
    let conn = server.connection().await.unwrap();

    let mut params = update(
        "PROJ-5",
        WorkItemFields {
            summary: Some("Checkout flow".to_string()),
            story_points: Some(5.0),
            ..Default::default()
        },
    );
    params.category = Some(Category::Story);
    let result = update_tool().execute(conn, params).await.unwrap();

    assert!(!result.success);
    assert_eq!(result.applied_field_groups, vec!["generic"]);
    assert_eq!(result.failed_field_groups, vec!["story_points"]);
    assert_eq!(result.outcomes[1].error_kind, Some(ErrorKind::Validation));
    assert!(result
        .warnings
        .iter()
        .any(|w| w.kind == WarningKind::RejectedField && w.message.contains("customfield_20000")));

    let sent = transport.bodies(Method::Put, ApiFamily::Platform, "/issue/PROJ-5");
    assert_eq!(sent.len(), 2);
    assert!(sent.contains(&json!({"fields": {"summary": "Checkout flow"}})));
    assert!(sent.contains(&json!({"fields": {"customfield_20000": 5.0}})));
}

#[tokio::test]
async fn test_update_of_missing_item_is_not_found() {
    let (server, transport) = scripted_server(ScriptedTransport::connected().on(
        Method::Get,
        ApiFamily::Platform,
        "/issue/PROJ-404?fields=issuetype",
        ApiResponse::new(
            404,
            json!({"errorMessages": ["Issue does not exist or you do not have permission to see it."], "errors": {}}),
        ),
    ));
    let conn = server.connection().await.unwrap();

    let err = update_tool()
        .execute(
            conn,
            update(
                "PROJ-404",
                WorkItemFields {
                    summary: Some("Ghost".to_string()),
                    ..Default::default()
                },
            ),
        )
        .await
        .unwrap_err();

    assert_matches!(err, JiraMcpError::NotFound { ref key, .. } if key == "PROJ-404");
    assert_eq!(transport.count(Method::Put, ApiFamily::Platform, "/issue/PROJ-404"), 0);
}

#[tokio::test]
async fn test_update_of_missing_item_with_hint_is_not_found() {
    let (server, transport) = scripted_server(ScriptedTransport::connected().on(
        Method::Put,
        ApiFamily::Platform,
        "/issue/PROJ-404",
        ApiResponse::new(
            404,
            json!({"errorMessages": ["Issue does not exist or you do not have permission to see it."], "errors": {}}),
        ),
    ));
    let conn = server.connection().await.unwrap();

    let mut params = update(
        "PROJ-404",
        WorkItemFields {
            summary: Some("Ghost".to_string()),
            ..Default::default()
        },
    );
    params.category = Some(Category::Story);
    let err = update_tool().execute(conn, params).await.unwrap_err();

    assert_matches!(err, JiraMcpError::NotFound { ref key, .. } if key == "PROJ-404");
    assert_eq!(transport.count(Method::Put, ApiFamily::Platform, "/issue/PROJ-404"), 1);
}

#[tokio::test]
async fn test_category_hint_skips_the_type_lookup() {
    let (server, transport) = scripted_server(
        ScriptedTransport::connected()
            .on(Method::Put, ApiFamily::Platform, "/issue/PROJ-6", no_content()),
    );
    let conn = server.connection().await.unwrap();

    let mut params = update(
        "PROJ-6",
        WorkItemFields {
            labels: Some(vec!["backend".to_string()]),
            ..Default::default()
        },
    );
    params.category = Some(Category::Story);
    let result = update_tool().execute(conn, params).await.unwrap();

    assert!(result.success);
    assert_eq!(result.category, Category::Story);
    assert_eq!(
        transport.count(Method::Get, ApiFamily::Platform, "/issue/PROJ-6?fields=issuetype"),
        0
    );
}

#[tokio::test]
async fn test_connection_is_established_once_per_key() {
    let (server, transport) = scripted_server(ScriptedTransport::connected());

    let first = server.connection().await.unwrap();
    let second = server.connection().await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(transport.count(Method::Get, ApiFamily::Platform, "/myself"), 1);
    assert_eq!(
        first.current_user().map(|u| u.display_name.as_str()),
        Some("Test User")
    );
}

#[tokio::test]
async fn test_rejected_credentials_fail_the_connection() {
    let (server, _transport) = scripted_server(ScriptedTransport::default().on(
        Method::Get,
        ApiFamily::Platform,
        "/myself",
        ApiResponse::text(401, "Unauthorized"),
    ));

    let err = server.connection().await.unwrap_err();
    assert_eq!(err.category(), "authorization");
}
