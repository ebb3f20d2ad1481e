//! Configuration management for the JIRA work item server
//!
//! Handles loading configuration from environment variables, TOML files,
//! and provides sensible defaults for all settings, including the
//! per-deployment custom field table used by the field mapper.

use crate::engine::fields::LogicalField;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::Path;
use tracing::{debug, info, warn};

/// Main configuration structure for the JIRA work item server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JiraConfig {
    /// JIRA instance URL (required)
    pub jira_url: String,

    /// Authentication configuration (required)
    pub auth: AuthConfig,

    /// HTTP request timeout in seconds (default: 30)
    pub request_timeout_seconds: u64,

    /// Maximum search results to return (default: 50, max: 200)
    pub max_search_results: u32,

    /// Maximum concurrent hierarchy aggregations during a search (default: 5)
    pub aggregation_concurrency: usize,

    /// Connection cache refresh interval in seconds (default: 0 = never refresh)
    pub connection_ttl_seconds: u64,

    /// Discover custom field ids from the field catalogue once per connection
    pub discover_fields: bool,

    /// Fail category detection when a requested remote type lookup fails
    pub strict_detection: bool,

    /// Logical field name -> candidate backend keys, most likely first
    pub field_mappings: BTreeMap<String, Vec<String>>,

    /// Status names counted as complete in addition to the "done" status category
    pub done_statuses: Vec<String>,

    /// Issue type name used when creating sub-tasks
    pub subtask_type_name: String,
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AuthConfig {
    /// Personal Access Token (recommended)
    PersonalAccessToken(String),

    /// Basic authentication (username + password)
    Basic { username: String, password: String },

    /// Bearer token
    Bearer(String),

    /// Anonymous access (limited functionality)
    Anonymous,
}

impl AuthConfig {
    /// Stable identity of the credential, used as part of the connection cache key.
    /// Secrets never appear in the identity.
    pub fn identity(&self) -> String {
        match self {
            AuthConfig::PersonalAccessToken(token) => format!("pat:{}", fingerprint(token)),
            AuthConfig::Basic { username, .. } => format!("basic:{}", username),
            AuthConfig::Bearer(token) => format!("bearer:{}", fingerprint(token)),
            AuthConfig::Anonymous => "anonymous".to_string(),
        }
    }
}

/// Short non-reversible fingerprint of a secret
fn fingerprint(secret: &str) -> String {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    secret.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

impl Default for JiraConfig {
    fn default() -> Self {
        Self {
            jira_url: String::new(),
            auth: AuthConfig::Anonymous,
            request_timeout_seconds: 30,
            max_search_results: 50,
            aggregation_concurrency: 5,
            connection_ttl_seconds: 0,
            discover_fields: true,
            strict_detection: false,
            field_mappings: default_field_mappings(),
            done_statuses: default_done_statuses(),
            subtask_type_name: "Sub-task".to_string(),
        }
    }
}

impl JiraConfig {
    /// Load configuration from environment variables, TOML file, and defaults
    /// Priority: env vars > TOML file > defaults
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(file_config) = Self::load_from_file("config/jira-workitem-config.toml") {
            info!("Loaded configuration from TOML file");
            config = file_config;
        } else if let Ok(file_config) = Self::load_from_file("jira-workitem-config.toml") {
            info!("Loaded configuration from TOML file in current directory");
            config = file_config;
        } else {
            debug!("No TOML configuration file found, using defaults and environment variables");
        }

        config.load_from_env()?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a TOML file
    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))
    }

    /// Parse a TOML document; missing field mappings fall back to the defaults key by key
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content)?;
        for (logical, candidates) in default_field_mappings() {
            config.field_mappings.entry(logical).or_insert(candidates);
        }
        Ok(config)
    }

    /// Load configuration from environment variables
    fn load_from_env(&mut self) -> Result<()> {
        if let Ok(url) = env::var("JIRA_URL") {
            self.jira_url = url;
            debug!("Loaded JIRA_URL from environment");
        }

        if let Ok(auth_type) = env::var("JIRA_AUTH_TYPE") {
            match auth_type.to_lowercase().as_str() {
                "pat" | "personal_access_token" => {
                    if let Ok(token) = env::var("JIRA_TOKEN") {
                        self.auth = AuthConfig::PersonalAccessToken(token);
                        debug!("Configured Personal Access Token authentication from environment");
                    }
                }
                "basic" => {
                    let username = env::var("JIRA_USERNAME")
                        .context("JIRA_USERNAME required for basic authentication")?;
                    let password = env::var("JIRA_PASSWORD")
                        .context("JIRA_PASSWORD required for basic authentication")?;
                    self.auth = AuthConfig::Basic { username, password };
                    debug!("Configured basic authentication from environment");
                }
                "bearer" => {
                    if let Ok(token) = env::var("JIRA_TOKEN") {
                        self.auth = AuthConfig::Bearer(token);
                        debug!("Configured bearer token authentication from environment");
                    }
                }
                "anonymous" => {
                    self.auth = AuthConfig::Anonymous;
                    debug!("Configured anonymous authentication from environment");
                }
                _ => {
                    warn!("Unknown JIRA_AUTH_TYPE: {}, using default", auth_type);
                }
            }
        }

        if let Ok(timeout) = env::var("JIRA_REQUEST_TIMEOUT") {
            if let Ok(timeout_seconds) = timeout.parse::<u64>() {
                self.request_timeout_seconds = timeout_seconds;
                debug!(
                    "Set request timeout to {} seconds from environment",
                    timeout_seconds
                );
            }
        }

        if let Ok(max_results) = env::var("JIRA_MAX_RESULTS") {
            if let Ok(max) = max_results.parse::<u32>() {
                self.max_search_results = max.min(200);
                debug!(
                    "Set max search results to {} from environment",
                    self.max_search_results
                );
            }
        }

        if let Ok(ttl) = env::var("JIRA_CONNECTION_TTL") {
            if let Ok(ttl_seconds) = ttl.parse::<u64>() {
                self.connection_ttl_seconds = ttl_seconds;
                debug!("Set connection TTL to {} seconds from environment", ttl_seconds);
            }
        }

        if let Ok(discover) = env::var("JIRA_DISCOVER_FIELDS") {
            self.discover_fields = parse_flag(&discover, self.discover_fields);
        }

        if let Ok(strict) = env::var("JIRA_STRICT_DETECTION") {
            self.strict_detection = parse_flag(&strict, self.strict_detection);
        }

        Ok(())
    }

    /// Validate the configuration
    pub(crate) fn validate(&self) -> Result<()> {
        if self.jira_url.is_empty() {
            return Err(anyhow::anyhow!(
                "JIRA URL is required. Set JIRA_URL environment variable or configure in TOML file."
            ));
        }

        if !self.jira_url.starts_with("http://") && !self.jira_url.starts_with("https://") {
            return Err(anyhow::anyhow!(
                "JIRA URL must start with http:// or https://. Got: {}",
                self.jira_url
            ));
        }

        match &self.auth {
            AuthConfig::PersonalAccessToken(token) => {
                if token.is_empty() {
                    return Err(anyhow::anyhow!("Personal access token cannot be empty"));
                }
            }
            AuthConfig::Basic { username, password } => {
                if username.is_empty() || password.is_empty() {
                    return Err(anyhow::anyhow!(
                        "Username and password cannot be empty for basic auth"
                    ));
                }
            }
            AuthConfig::Bearer(token) => {
                if token.is_empty() {
                    return Err(anyhow::anyhow!("Bearer token cannot be empty"));
                }
            }
            AuthConfig::Anonymous => {
                info!("Using anonymous authentication - functionality may be limited");
            }
        }

        if self.max_search_results > 200 {
            return Err(anyhow::anyhow!("max_search_results cannot exceed 200"));
        }

        if self.request_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("request_timeout_seconds must be greater than 0"));
        }

        if self.aggregation_concurrency == 0 {
            return Err(anyhow::anyhow!("aggregation_concurrency must be greater than 0"));
        }

        for logical in self.field_mappings.keys() {
            if LogicalField::from_name(logical).is_none() {
                warn!(
                    "Unknown logical field '{}' in field_mappings, it will be ignored",
                    logical
                );
            }
        }

        info!("Configuration validation successful");
        Ok(())
    }

    /// Get the gouqi Credentials from AuthConfig
    pub fn to_gouqi_credentials(&self) -> gouqi::Credentials {
        match &self.auth {
            AuthConfig::PersonalAccessToken(token) => gouqi::Credentials::Bearer(token.clone()),
            AuthConfig::Basic { username, password } => {
                gouqi::Credentials::Basic(username.clone(), password.clone())
            }
            AuthConfig::Bearer(token) => gouqi::Credentials::Bearer(token.clone()),
            AuthConfig::Anonymous => gouqi::Credentials::Anonymous,
        }
    }

    /// Whether a status name counts as complete
    pub fn is_done_status(&self, status: &str) -> bool {
        self.done_statuses
            .iter()
            .any(|done| done.eq_ignore_ascii_case(status))
    }
}

fn parse_flag(value: &str, current: bool) -> bool {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => {
            warn!("Ignoring unrecognised boolean value '{}'", value);
            current
        }
    }
}

/// Default custom field candidates for the most common JIRA deployments
pub fn default_field_mappings() -> BTreeMap<String, Vec<String>> {
    let mut mappings = BTreeMap::new();

    mappings.insert(
        LogicalField::StoryPoints.name().to_string(),
        vec![
            "customfield_10016".to_string(),
            "customfield_10026".to_string(),
            "customfield_10106".to_string(),
        ],
    );
    mappings.insert(
        LogicalField::EpicLink.name().to_string(),
        vec!["customfield_10014".to_string(), "customfield_10008".to_string()],
    );
    mappings.insert(
        LogicalField::EpicName.name().to_string(),
        vec!["customfield_10011".to_string(), "customfield_10009".to_string()],
    );
    mappings.insert(
        LogicalField::EpicColor.name().to_string(),
        vec!["customfield_10013".to_string(), "customfield_10010".to_string()],
    );

    mappings
}

fn default_done_statuses() -> Vec<String> {
    vec![
        "Done".to_string(),
        "Closed".to_string(),
        "Resolved".to_string(),
        "Complete".to_string(),
    ]
}
