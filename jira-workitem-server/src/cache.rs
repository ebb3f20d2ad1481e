//! Connection cache for the JIRA work item server
//!
//! A [`Connection`] bundles the transport with what is resolved once per
//! backend and credential: the custom field table and the current user.
//! The [`ConnectionCache`] is owned by the server, keyed by
//! `(base_url, credential identity)`; the first caller to establish a
//! connection wins and later callers share it until the refresh policy
//! marks it stale.

use crate::config::JiraConfig;
use crate::engine::fields::{FieldTable, LogicalField};
use crate::error::{ErrorKind, JiraMcpError, JiraMcpResult};
use crate::transport::{ApiFamily, ApiRequest, JiraTransport};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// The authenticated user of a connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentUser {
    pub account_id: String,
    pub display_name: String,
    pub email_address: Option<String>,
}

impl CurrentUser {
    fn from_myself(body: &Value) -> Option<Self> {
        let account_id = body
            .get("accountId")
            .or_else(|| body.get("name"))
            .and_then(Value::as_str)?;
        Some(Self {
            account_id: account_id.to_string(),
            display_name: body
                .get("displayName")
                .and_then(Value::as_str)
                .unwrap_or(account_id)
                .to_string(),
            email_address: body
                .get("emailAddress")
                .and_then(Value::as_str)
                .map(String::from),
        })
    }
}

/// Transport plus per-connection resolved state
pub struct Connection {
    transport: Arc<dyn JiraTransport>,
    field_table: RwLock<FieldTable>,
    current_user: Option<CurrentUser>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("base_url", &self.transport.base_url())
            .field("current_user", &self.current_user)
            .finish()
    }
}

impl Connection {
    pub fn new(
        transport: Arc<dyn JiraTransport>,
        field_table: FieldTable,
        current_user: Option<CurrentUser>,
    ) -> Self {
        Self {
            transport,
            field_table: RwLock::new(field_table),
            current_user,
        }
    }

    /// Resolve the current user and the field table over `transport`.
    ///
    /// Rejected credentials fail the connection; any other failure only
    /// degrades it (no current user, configured field candidates).
    #[instrument(skip_all, fields(base_url = transport.base_url()))]
    pub async fn establish(
        transport: Arc<dyn JiraTransport>,
        config: &JiraConfig,
    ) -> JiraMcpResult<Self> {
        let mut field_table = FieldTable::from_mappings(&config.field_mappings);

        let myself = transport.send(ApiRequest::get(ApiFamily::Platform, "/myself"));
        let catalogue = async {
            if config.discover_fields {
                Some(transport.send(ApiRequest::get(ApiFamily::Platform, "/field")).await)
            } else {
                None
            }
        };
        let (myself, catalogue) = tokio::join!(myself, catalogue);

        let current_user = match myself.error_kind(ApiFamily::Platform) {
            None => CurrentUser::from_myself(&myself.body),
            Some(ErrorKind::Authorization) => {
                return Err(JiraMcpError::auth(format!(
                    "JIRA rejected the configured credentials: {}",
                    myself.error_message()
                )));
            }
            Some(kind) => {
                warn!(
                    "Could not retrieve current user information ({}): {}",
                    kind,
                    myself.error_message()
                );
                None
            }
        };

        match catalogue {
            Some(response) if response.is_success() => {
                let resolved = field_table.apply_catalogue(&response.body);
                info!("Field discovery resolved {} custom fields", resolved);
            }
            Some(response) => warn!(
                "Field discovery failed, keeping configured field candidates: {}",
                response.error_message()
            ),
            None => debug!("Field discovery disabled"),
        }

        if let Some(user) = &current_user {
            info!("Connected to {} as {}", transport.base_url(), user.display_name);
        }

        Ok(Self::new(transport, field_table, current_user))
    }

    pub fn transport(&self) -> &dyn JiraTransport {
        self.transport.as_ref()
    }

    pub fn base_url(&self) -> &str {
        self.transport.base_url()
    }

    pub fn current_user(&self) -> Option<&CurrentUser> {
        self.current_user.as_ref()
    }

    pub fn current_user_id(&self) -> Option<&str> {
        self.current_user.as_ref().map(|u| u.account_id.as_str())
    }

    /// Snapshot of the field table
    pub fn field_table(&self) -> FieldTable {
        match self.field_table.read() {
            Ok(table) => table.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Remember a backend key the backend accepted for a logical field
    pub fn promote_field(&self, field: LogicalField, key: &str) {
        if let Ok(mut table) = self.field_table.write() {
            table.resolve(field, key);
        }
    }

    /// Browse URL of an item
    pub fn browse_url(&self, issue_key: &str) -> String {
        format!("{}/browse/{}", self.base_url(), issue_key)
    }
}

/// Cache key: backend plus credential identity
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub base_url: String,
    pub identity: String,
}

impl ConnectionKey {
    pub fn from_config(config: &JiraConfig) -> Self {
        Self {
            base_url: config.jira_url.trim_end_matches('/').to_string(),
            identity: config.auth.identity(),
        }
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.base_url, self.identity)
    }
}

/// Decides when a cached connection must be re-established
pub trait RefreshPolicy: Send + Sync + fmt::Debug {
    fn is_stale(&self, age: Duration) -> bool;

    fn describe(&self) -> String;
}

/// Keep connections for the lifetime of the process
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverRefresh;

impl RefreshPolicy for NeverRefresh {
    fn is_stale(&self, _age: Duration) -> bool {
        false
    }

    fn describe(&self) -> String {
        "never".to_string()
    }
}

/// Re-establish connections older than the TTL
#[derive(Debug, Clone, Copy)]
pub struct TtlRefresh {
    pub ttl: Duration,
}

impl RefreshPolicy for TtlRefresh {
    fn is_stale(&self, age: Duration) -> bool {
        age > self.ttl
    }

    fn describe(&self) -> String {
        format!("ttl {}s", self.ttl.as_secs())
    }
}

/// Policy from the `connection_ttl_seconds` setting (0 = never refresh)
pub fn policy_from_config(config: &JiraConfig) -> Arc<dyn RefreshPolicy> {
    match config.connection_ttl_seconds {
        0 => Arc::new(NeverRefresh),
        seconds => Arc::new(TtlRefresh {
            ttl: Duration::from_secs(seconds),
        }),
    }
}

/// Cache entry with timestamp
#[derive(Debug, Clone)]
struct CacheEntry<T> {
    value: T,
    created_at: Instant,
}

impl<T> CacheEntry<T> {
    fn new(value: T) -> Self {
        Self {
            value,
            created_at: Instant::now(),
        }
    }
}

/// Connections keyed by backend and credential identity
#[derive(Debug)]
pub struct ConnectionCache {
    connections: RwLock<HashMap<ConnectionKey, CacheEntry<Arc<Connection>>>>,
    policy: Arc<dyn RefreshPolicy>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ConnectionCache {
    pub fn new(policy: Arc<dyn RefreshPolicy>) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            policy,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Fresh cached connection for `key`, if any
    pub fn get(&self, key: &ConnectionKey) -> Option<Arc<Connection>> {
        let connections = self.connections.read().ok()?;
        let entry = connections.get(key)?;

        if self.policy.is_stale(entry.created_at.elapsed()) {
            None
        } else {
            Some(Arc::clone(&entry.value))
        }
    }

    /// Return the cached connection or establish one with `connect`.
    ///
    /// When two callers race, the connection stored first is returned to
    /// both and the later one is dropped.
    pub async fn get_or_connect<F, Fut>(
        &self,
        key: ConnectionKey,
        connect: F,
    ) -> JiraMcpResult<Arc<Connection>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = JiraMcpResult<Connection>>,
    {
        if let Some(connection) = self.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(connection);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!("Establishing connection for {}", key);
        let connection = Arc::new(connect().await?);

        let mut connections = self
            .connections
            .write()
            .map_err(|_| JiraMcpError::internal("Failed to acquire write lock for connections"))?;

        if let Some(existing) = connections.get(&key) {
            if !self.policy.is_stale(existing.created_at.elapsed()) {
                debug!("Connection for {} was established concurrently, reusing it", key);
                return Ok(Arc::clone(&existing.value));
            }
        }

        connections.insert(key, CacheEntry::new(Arc::clone(&connection)));
        Ok(connection)
    }

    /// Drop every cached connection
    pub fn clear_all(&self) -> JiraMcpResult<()> {
        info!("Clearing all cached connections");

        self.connections
            .write()
            .map_err(|_| JiraMcpError::internal("Failed to clear connections"))?
            .clear();

        Ok(())
    }

    /// Get cache statistics
    pub fn get_stats(&self) -> CacheStats {
        let connections_count = self.connections.read().map(|m| m.len()).unwrap_or(0);

        CacheStats {
            connections_count,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            refresh_policy: self.policy.describe(),
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub connections_count: usize,
    pub hits: u64,
    pub misses: u64,
    pub refresh_policy: String,
}
