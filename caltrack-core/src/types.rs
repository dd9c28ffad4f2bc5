//! Core configuration type definitions

use serde::{Deserialize, Serialize};

/// Top-level client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaltrackConfig {
    pub session: SessionConfig,
    pub liveness: LivenessConfig,
    pub routes: RouteConfig,
    pub api: ApiConfig,
}

/// Token persistence settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Key the serialized token is stored under
    pub storage_key: String,
    /// Validity window applied when a token is stored
    pub token_ttl_ms: i64,
    /// Directory for file-backed storage (None = platform data dir)
    pub data_dir: Option<String>,
    /// How a page exit decides whether to drop the session
    pub unload_strategy: UnloadStrategy,
}

/// Decides whether leaving the page destroys the stored token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnloadStrategy {
    /// Transient "refreshing" flag written on every load; racy by construction
    RefreshFlag,
    /// Trust the structured reload/close signal delivered with the exit
    NavigationType,
    /// Never clear on exit
    Disabled,
}

/// Backend/frontend reachability polling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessConfig {
    pub enabled: bool,
    pub poll_interval_ms: u64,
    /// Maximum time since the last successful check before forced logout
    pub staleness_threshold_ms: i64,
    pub probe_timeout_ms: u64,
    pub backend_health_url: String,
    pub frontend_url: String,
}

/// Paths the navigator is sent to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    pub landing: String,
    pub login: String,
    pub dashboard: String,
    /// Where a valid but under-privileged session is sent
    pub unauthorized: String,
}

/// Backend REST API client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout_seconds: u64,
    pub user_agent: String,
}
