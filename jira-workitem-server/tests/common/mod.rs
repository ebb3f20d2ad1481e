/// Common utilities for JIRA Work Item Server integration tests
///
/// `ScriptedTransport` answers requests from a fixed route table and records
/// everything it was sent. JQL searches are recorded and routed as
/// `POST api:/search` with the query as body. `McpTestClient` drives the real binary over STDIO
/// for the live tests.
use async_trait::async_trait;
use jira_workitem_server::config::{AuthConfig, JiraConfig};
use jira_workitem_server::transport::{
    ApiFamily, ApiRequest, ApiResponse, JiraTransport, Method, SearchQuery,
};
use jira_workitem_server::JiraMcpServer;
use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

static REQUEST_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
struct Route {
    method: Method,
    family: ApiFamily,
    path: String,
    body_contains: Option<String>,
    response: ApiResponse,
}

/// In-memory JIRA; unknown routes answer 404
#[derive(Debug, Default)]
#[allow(dead_code)]
pub struct ScriptedTransport {
    routes: Vec<Route>,
    sent: Mutex<Vec<ApiRequest>>,
}

#[allow(dead_code)]
impl ScriptedTransport {
    /// Transport that already answers `/myself`
    pub fn connected() -> Self {
        Self::default().on(
            Method::Get,
            ApiFamily::Platform,
            "/myself",
            ApiResponse::ok(json!({
                "accountId": "5b10a2844c20165700ede21g",
                "displayName": "Test User",
                "emailAddress": "test.user@example.com"
            })),
        )
    }

    /// Answer `method family path` with `response`
    pub fn on(mut self, method: Method, family: ApiFamily, path: &str, response: ApiResponse) -> Self {
        self.routes.push(Route {
            method,
            family,
            path: path.to_string(),
            body_contains: None,
            response,
        });
        self
    }

    /// Like [`on`](Self::on), but only when the serialized body contains `needle`.
    /// Routes are matched in registration order, so register these first.
    pub fn on_body(
        mut self,
        method: Method,
        family: ApiFamily,
        path: &str,
        needle: &str,
        response: ApiResponse,
    ) -> Self {
        self.routes.push(Route {
            method,
            family,
            path: path.to_string(),
            body_contains: Some(needle.to_string()),
            response,
        });
        self
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.sent.lock().unwrap().clone()
    }

    /// Number of requests sent to `method family path`
    pub fn count(&self, method: Method, family: ApiFamily, path: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.method == method && r.family == family && r.path == path)
            .count()
    }

    /// Bodies sent to `method family path`, in order
    pub fn bodies(&self, method: Method, family: ApiFamily, path: &str) -> Vec<Value> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method && r.family == family && r.path == path)
            .map(|r| r.body.unwrap_or(Value::Null))
            .collect()
    }
}

#[async_trait]
impl JiraTransport for ScriptedTransport {
    async fn send(&self, request: ApiRequest) -> ApiResponse {
        let body = request
            .body
            .as_ref()
            .map(|b| b.to_string())
            .unwrap_or_default();

        let response = self
            .routes
            .iter()
            .find(|route| {
                route.method == request.method
                    && route.family == request.family
                    && route.path == request.path
                    && route
                        .body_contains
                        .as_deref()
                        .map_or(true, |needle| body.contains(needle))
            })
            .map(|route| route.response.clone())
            .unwrap_or_else(|| ApiResponse::text(404, format!("No route for {}", request)));

        self.sent.lock().unwrap().push(request);
        response
    }

    async fn search(&self, query: SearchQuery) -> ApiResponse {
        let body = serde_json::to_value(&query).unwrap();
        self.send(ApiRequest::post(ApiFamily::Platform, "/search", body))
            .await
    }

    fn base_url(&self) -> &str {
        "https://test.atlassian.net"
    }
}

/// Configuration pointing at the scripted instance, field discovery off
#[allow(dead_code)]
pub fn test_config() -> JiraConfig {
    JiraConfig {
        jira_url: "https://test.atlassian.net".to_string(),
        auth: AuthConfig::PersonalAccessToken("test-token".to_string()),
        discover_fields: false,
        ..Default::default()
    }
}

/// Server wired to `transport`
#[allow(dead_code)]
pub fn scripted_server(transport: ScriptedTransport) -> (JiraMcpServer, Arc<ScriptedTransport>) {
    let transport = Arc::new(transport);
    let server = JiraMcpServer::with_transport(test_config(), transport.clone());
    (server, transport)
}

/// Generic issue payload
#[allow(dead_code)]
pub fn issue(key: &str, issue_type: &str, status_category: &str, extra: Value) -> Value {
    let mut fields = json!({
        "summary": format!("Summary of {}", key),
        "issuetype": {"name": issue_type, "subtask": issue_type == "Sub-task"},
        "status": {"name": "Some status", "statusCategory": {"key": status_category}},
        "labels": [],
        "created": "2024-03-01T09:00:00.000+0000",
        "updated": "2024-03-02T09:00:00.000+0000"
    });
    if let (Some(fields), Some(extra)) = (fields.as_object_mut(), extra.as_object()) {
        for (k, v) in extra {
            fields.insert(k.clone(), v.clone());
        }
    }
    json!({"id": "10000", "key": key, "fields": fields})
}

/// Search answer for `issues`
#[allow(dead_code)]
pub fn page(issues: Vec<Value>) -> ApiResponse {
    let total = issues.len();
    ApiResponse::ok(json!({"startAt": 0, "maxResults": 200, "total": total, "issues": issues}))
}

/// MCP Test Client for sending JSON-RPC requests to the server
#[allow(dead_code)]
pub struct McpTestClient {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

#[allow(dead_code)]
impl McpTestClient {
    /// Create a new test client by spawning the server
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        // Tests run from workspace root, so .env is in current directory
        dotenv::from_filename(".env").ok();

        let jira_url = std::env::var("JIRA_URL")?;
        let jira_auth_type = std::env::var("JIRA_AUTH_TYPE")?;
        let jira_username = std::env::var("JIRA_USERNAME").unwrap_or_default();
        let jira_password = std::env::var("JIRA_PASSWORD").unwrap_or_default();
        let jira_token = std::env::var("JIRA_TOKEN").unwrap_or_default();

        let binary_path = [
            "target/debug/jira-workitem-server",
            "target/release/jira-workitem-server",
            "../target/debug/jira-workitem-server",
            "../target/release/jira-workitem-server",
        ]
        .into_iter()
        .find(|path| std::path::Path::new(path).exists())
        .ok_or_else(|| {
            let cwd = std::env::current_dir().unwrap_or_default();
            format!(
                "Server binary not found. Current dir: {:?}. Looked in target/debug and target/release",
                cwd
            )
        })?;

        let mut child = Command::new(binary_path)
            .env("JIRA_URL", jira_url)
            .env("JIRA_AUTH_TYPE", jira_auth_type)
            .env("JIRA_USERNAME", jira_username)
            .env("JIRA_PASSWORD", jira_password)
            .env("JIRA_TOKEN", jira_token)
            .env("RUST_LOG", "error")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let stdin = child.stdin.take().expect("Failed to open stdin");
        let stdout = BufReader::new(child.stdout.take().expect("Failed to open stdout"));

        let mut client = Self {
            child,
            stdin,
            stdout,
        };
        client.initialize()?;

        Ok(client)
    }

    fn initialize(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 0,
            "method": "initialize",
            "params": {
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": {"name": "rust-test-client", "version": "1.0.0"}
            }
        });

        self.send_request(&request)?;
        let response = self.read_response()?;
        if response.get("error").is_some() {
            return Err(format!("Initialization failed: {:?}", response["error"]).into());
        }

        Ok(())
    }

    /// Call an MCP tool
    pub fn call_tool(
        &mut self,
        tool_name: &str,
        arguments: Value,
    ) -> Result<Value, Box<dyn std::error::Error>> {
        let request_id = REQUEST_ID.fetch_add(1, Ordering::SeqCst);
        let request = json!({
            "jsonrpc": "2.0",
            "id": request_id,
            "method": "tools/call",
            "params": {"name": tool_name, "arguments": arguments}
        });

        self.send_request(&request)?;
        self.read_response()
    }

    fn send_request(&mut self, request: &Value) -> Result<(), Box<dyn std::error::Error>> {
        writeln!(self.stdin, "{}", serde_json::to_string(request)?)?;
        self.stdin.flush()?;
        Ok(())
    }

    fn read_response(&mut self) -> Result<Value, Box<dyn std::error::Error>> {
        let mut line = String::new();
        self.stdout.read_line(&mut line)?;
        if line.is_empty() {
            return Err("Server closed connection".into());
        }
        Ok(serde_json::from_str(&line)?)
    }

    /// Extract the JSON tool result from a tools/call response
    pub fn extract_tool_result(response: &Value) -> Result<Value, String> {
        if let Some(error) = response.get("error") {
            return Err(format!("Tool call failed: {:?}", error));
        }

        let text = response
            .get("result")
            .and_then(|r| r.get("content"))
            .and_then(Value::as_array)
            .and_then(|content| {
                content
                    .iter()
                    .find(|item| item.get("type").and_then(Value::as_str) == Some("text"))
            })
            .and_then(|item| item.get("text"))
            .and_then(Value::as_str)
            .ok_or("No text content in result")?;

        serde_json::from_str(text)
            .map_err(|e| format!("Failed to parse tool result JSON: {}. Text was: {}", e, text))
    }
}

impl Drop for McpTestClient {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Test project key from the environment, default "SCRUM"
#[allow(dead_code)]
pub fn test_project_key() -> String {
    std::env::var("TEST_PROJECT_KEY").unwrap_or_else(|_| "SCRUM".to_string())
}
