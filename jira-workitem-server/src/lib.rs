//! JIRA Work Item Server Library
//!
//! An MCP server that treats epics, stories, tasks and sub-tasks as one
//! "work item" abstraction on top of JIRA.
//!
//! ## Features
//!
//! - **Category detection**: decides Epic / Story / Task / Sub-task once per request
//! - **Field mapping**: per-deployment custom field table with explicit warnings
//! - **Dual-endpoint dispatch**: agile endpoints first, generic endpoint as fallback
//! - **Structured search**: filters compiled to JQL through a small predicate tree
//! - **Hierarchy aggregation**: epic progress, story sub-tasks, sub-task siblings
//! - **Error Handling**: MCP-compliant error codes and messages

use crate::cache::{policy_from_config, Connection, ConnectionCache, ConnectionKey};
use crate::config::JiraConfig;
use crate::engine::fields::LogicalField;
use crate::error::JiraMcpResult;
use crate::jira_client::JiraClient;
use crate::tools::{
    CreateWorkItemParams, CreateWorkItemTool, EpicResolutionTool, GetEpicChildrenParams,
    GetEpicChildrenResult, GetWorkItemParams, GetWorkItemResult, GetWorkItemTool,
    ResolveEpicParams, ResolveEpicResult, SearchWorkItemsParams, SearchWorkItemsResult,
    SearchWorkItemsTool, UpdateWorkItemParams, UpdateWorkItemTool, WorkItemChangeResult,
};
use crate::transport::JiraTransport;

use pulseengine_mcp_macros::{mcp_server, mcp_tools};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};

// Re-export modules for external use
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod jira_client;
pub mod tools;
pub mod transport;

const TOOLS_COUNT: usize = 9;

/// Server status information
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JiraServerStatus {
    pub server_name: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub jira_url: String,
    pub jira_connection_status: String,
    pub authenticated_user: Option<String>,
    /// Logical fields whose backend key is known for this connection
    pub resolved_fields: Vec<String>,
    pub cache_stats: cache::CacheStats,
    pub tools_count: usize,
}

// Workaround for pulseengine-mcp-macros bug #62
impl std::fmt::Display for JiraServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => write!(f, "{}", json),
            Err(_) => write!(f, "{{\"error\": \"Failed to serialize JiraServerStatus\"}}"),
        }
    }
}

/// JIRA Work Item Server
///
/// Connections are established lazily on the first tool call and kept in a
/// [`ConnectionCache`] keyed by JIRA URL and credential identity.
#[mcp_server(
    name = "JIRA Work Item Server",
    version = "0.1.0",
    description = "Category-aware JIRA work items: create, update, search and hierarchy",
    auth = "disabled"
)]
#[derive(Clone)]
pub struct JiraMcpServer {
    /// Server start time for uptime calculation
    start_time: Instant,

    config: Arc<JiraConfig>,

    connections: Arc<ConnectionCache>,

    /// Transport used instead of a gouqi client (tests)
    transport: Option<Arc<dyn JiraTransport>>,

    /// Tool implementations
    create_tool: Arc<CreateWorkItemTool>,
    get_tool: Arc<GetWorkItemTool>,
    update_tool: Arc<UpdateWorkItemTool>,
    search_tool: Arc<SearchWorkItemsTool>,
    epic_tool: Arc<EpicResolutionTool>,
}

impl Default for JiraMcpServer {
    fn default() -> Self {
        Self::build(JiraConfig::default(), None)
    }
}

impl JiraMcpServer {
    /// Create a server from the environment and configuration files
    #[instrument]
    pub async fn new() -> JiraMcpResult<Self> {
        info!("Initializing JIRA Work Item Server");

        let config = JiraConfig::load()?;
        info!("Configuration loaded successfully");

        let server = Self::build(config, None);
        match server.connection().await {
            Ok(conn) => info!("Connected to {}", conn.base_url()),
            Err(e) => warn!("Initial connection failed, will retry on first tool call: {}", e),
        }

        info!("JIRA Work Item Server initialized successfully");
        Ok(server)
    }

    /// Create server with custom configuration (for testing)
    #[instrument(skip(config))]
    pub async fn with_config(config: JiraConfig) -> JiraMcpResult<Self> {
        config.validate()?;
        Ok(Self::build(config, None))
    }

    /// Create a server that talks to JIRA through `transport`
    pub fn with_transport(config: JiraConfig, transport: Arc<dyn JiraTransport>) -> Self {
        Self::build(config, Some(transport))
    }

    fn build(config: JiraConfig, transport: Option<Arc<dyn JiraTransport>>) -> Self {
        let config = Arc::new(config);
        let connections = Arc::new(ConnectionCache::new(policy_from_config(&config)));

        Self {
            start_time: Instant::now(),
            create_tool: Arc::new(CreateWorkItemTool::new(Arc::clone(&config))),
            get_tool: Arc::new(GetWorkItemTool::new(Arc::clone(&config))),
            update_tool: Arc::new(UpdateWorkItemTool::new(Arc::clone(&config))),
            search_tool: Arc::new(SearchWorkItemsTool::new(Arc::clone(&config))),
            epic_tool: Arc::new(EpicResolutionTool::new(Arc::clone(&config))),
            config,
            connections,
            transport,
        }
    }

    /// The cached connection for the configured JIRA, established on first use
    pub async fn connection(&self) -> JiraMcpResult<Arc<Connection>> {
        let key = ConnectionKey::from_config(&self.config);
        let config = Arc::clone(&self.config);
        let injected = self.transport.clone();

        self.connections
            .get_or_connect(key, || async move {
                let transport: Arc<dyn JiraTransport> = match injected {
                    Some(transport) => transport,
                    None => Arc::new(JiraClient::new(&config)?),
                };
                Connection::establish(transport, &config).await
            })
            .await
    }

    /// Get server uptime in seconds
    fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// All public methods in this impl block become MCP tools automatically
/// The #[mcp_tools] macro discovers these methods and exposes them via MCP
#[mcp_tools]
impl JiraMcpServer {
    /// Create a work item (epic, story, task or sub-task)
    ///
    /// The category is taken from `category` or inferred from the fields.
    /// Category-specific fields (epic name, story points, epic link) are
    /// applied after creation; each field-group reports its own outcome.
    ///
    /// # Examples
    /// - Epic: `{"project_key": "PROJ", "fields": {"summary": "Auth rework", "epic_name": "Auth"}}`
    /// - Story in an epic: `{"project_key": "PROJ", "fields": {"summary": "Login page", "story_points": 5, "epic_link": "PROJ-1"}}`
    /// - Sub-task: `{"fields": {"summary": "Write tests", "parent_key": "PROJ-2"}}`
    #[instrument(skip(self))]
    pub async fn create_work_item(
        &self,
        params: CreateWorkItemParams,
    ) -> anyhow::Result<WorkItemChangeResult> {
        let conn = self.connection().await.map_err(|e| {
            error!("create_work_item failed to connect: {}", e);
            anyhow::anyhow!(e)
        })?;
        self.create_tool.execute(conn, params).await.map_err(|e| {
            error!("create_work_item failed: {}", e);
            anyhow::anyhow!(e)
        })
    }

    /// Get a work item with its hierarchy context
    ///
    /// Epics come with their children and progress, stories with their
    /// epic and sub-tasks, sub-tasks with their parent, siblings and position.
    ///
    /// # Examples
    /// - `{"issue_key": "PROJ-123"}`
    /// - Without hierarchy: `{"issue_key": "PROJ-123", "include_hierarchy": false}`
    #[instrument(skip(self))]
    pub async fn get_work_item(
        &self,
        params: GetWorkItemParams,
    ) -> anyhow::Result<GetWorkItemResult> {
        let conn = self.connection().await.map_err(|e| {
            error!("get_work_item failed to connect: {}", e);
            anyhow::anyhow!(e)
        })?;
        self.get_tool.execute(conn, params).await.map_err(|e| {
            error!("get_work_item failed: {}", e);
            anyhow::anyhow!(e)
        })
    }

    /// Update a work item
    ///
    /// Generic fields and category-specific fields are dispatched as
    /// independent field-groups. `success` is true only when every group
    /// succeeded; `failed_field_groups` lists what can be retried.
    ///
    /// # Examples
    /// - `{"issue_key": "PROJ-1", "fields": {"epic_name": "Auth"}}`
    /// - `{"issue_key": "PROJ-2", "fields": {"summary": "New title", "story_points": 8}}`
    #[instrument(skip(self))]
    pub async fn update_work_item(
        &self,
        params: UpdateWorkItemParams,
    ) -> anyhow::Result<WorkItemChangeResult> {
        let conn = self.connection().await.map_err(|e| {
            error!("update_work_item failed to connect: {}", e);
            anyhow::anyhow!(e)
        })?;
        self.update_tool.execute(conn, params).await.map_err(|e| {
            error!("update_work_item failed: {}", e);
            anyhow::anyhow!(e)
        })
    }

    /// Search work items with structured filters
    ///
    /// # Examples
    /// - `{"project": "X", "issue_types": ["Story", "Bug"]}`
    /// - `{"epic_filter": "PROJ-1", "statuses": ["In Progress"]}`
    /// - `{"quick_filters": ["my_open_items"], "updated_after": "-7d"}`
    #[instrument(skip(self))]
    pub async fn search_work_items(
        &self,
        params: SearchWorkItemsParams,
    ) -> anyhow::Result<SearchWorkItemsResult> {
        let conn = self.connection().await.map_err(|e| {
            error!("search_work_items failed to connect: {}", e);
            anyhow::anyhow!(e)
        })?;
        self.search_tool.execute(conn, params).await.map_err(|e| {
            error!("search_work_items failed: {}", e);
            anyhow::anyhow!(e)
        })
    }

    /// Find the epic a work item belongs to
    ///
    /// # Examples
    /// - `{"issue_key": "PROJ-2"}`
    /// - With progress: `{"issue_key": "PROJ-2", "include_progress": true}`
    #[instrument(skip(self))]
    pub async fn resolve_epic(
        &self,
        params: ResolveEpicParams,
    ) -> anyhow::Result<ResolveEpicResult> {
        let conn = self.connection().await.map_err(|e| {
            error!("resolve_epic failed to connect: {}", e);
            anyhow::anyhow!(e)
        })?;
        self.epic_tool.resolve_epic(conn, params).await.map_err(|e| {
            error!("resolve_epic failed: {}", e);
            anyhow::anyhow!(e)
        })
    }

    /// List the children of an epic with progress
    ///
    /// # Examples
    /// - `{"epic_key": "PROJ-1"}`
    #[instrument(skip(self))]
    pub async fn get_epic_children(
        &self,
        params: GetEpicChildrenParams,
    ) -> anyhow::Result<GetEpicChildrenResult> {
        let conn = self.connection().await.map_err(|e| {
            error!("get_epic_children failed to connect: {}", e);
            anyhow::anyhow!(e)
        })?;
        self.epic_tool.get_epic_children(conn, params).await.map_err(|e| {
            error!("get_epic_children failed: {}", e);
            anyhow::anyhow!(e)
        })
    }

    /// Get server status and connection information
    ///
    /// Returns the JIRA connection state, authenticated user, resolved
    /// custom fields and connection cache statistics.
    #[instrument(skip(self))]
    pub async fn get_server_status(&self) -> anyhow::Result<JiraServerStatus> {
        info!("Getting server status");

        let (connection_status, authenticated_user, resolved_fields) = match self.connection().await {
            Ok(conn) => {
                let table = conn.field_table();
                let resolved = LogicalField::ALL
                    .iter()
                    .filter(|field| table.is_resolved(**field))
                    .map(|field| field.name().to_string())
                    .collect();
                (
                    "Connected".to_string(),
                    conn.current_user().map(|u| u.display_name.clone()),
                    resolved,
                )
            }
            Err(e) => (format!("Connection Error: {}", e), None, Vec::new()),
        };

        Ok(JiraServerStatus {
            server_name: "JIRA Work Item Server".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.get_uptime_seconds(),
            jira_url: self.config.jira_url.clone(),
            jira_connection_status: connection_status,
            authenticated_user,
            resolved_fields,
            cache_stats: self.connections.get_stats(),
            tools_count: TOOLS_COUNT,
        })
    }

    /// Drop cached connections
    ///
    /// The next tool call reconnects and resolves the field table again.
    /// Useful after custom fields were added or credentials changed.
    #[instrument(skip(self))]
    pub async fn clear_cache(&self) -> anyhow::Result<String> {
        info!("Clearing cached connections");

        match self.connections.clear_all() {
            Ok(()) => {
                info!("Cache cleared successfully");
                Ok("All cached connections have been cleared successfully".to_string())
            }
            Err(e) => {
                error!("Failed to clear cache: {}", e);
                Err(anyhow::anyhow!("Failed to clear cache: {}", e))
            }
        }
    }

    /// Test JIRA connection and authentication
    #[instrument(skip(self))]
    pub async fn test_connection(&self) -> anyhow::Result<String> {
        info!("Testing JIRA connection");

        match self.connection().await {
            Ok(conn) => {
                let user = conn.current_user();
                let message = format!(
                    "✅ Connection successful!\n\
                     JIRA URL: {}\n\
                     Authenticated as: {}\n\
                     Account ID: {}\n\
                     Email: {}",
                    conn.base_url(),
                    user.map(|u| u.display_name.as_str()).unwrap_or("Unknown"),
                    user.map(|u| u.account_id.as_str()).unwrap_or("N/A"),
                    user.and_then(|u| u.email_address.as_deref())
                        .unwrap_or("Not provided")
                );
                info!("Connection test successful");
                Ok(message)
            }
            Err(e) => {
                let message = format!(
                    "❌ Connection failed!\n\
                     JIRA URL: {}\n\
                     Error: {}\n\
                     \n\
                     Please check:\n\
                     - JIRA URL is correct and accessible\n\
                     - Authentication credentials are valid\n\
                     - Network connectivity to JIRA instance",
                    self.config.jira_url, e
                );
                error!("Connection test failed: {}", e);
                Ok(message) // Return as success with error message for user feedback
            }
        }
    }
}
