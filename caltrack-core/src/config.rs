//! Configuration management

use crate::error::{CaltrackError, CaltrackResult, ErrorContext};
use crate::types::{
    ApiConfig, CaltrackConfig, LivenessConfig, RouteConfig, SessionConfig, UnloadStrategy,
};

use std::path::{Path, PathBuf};

/// Environment variables that override file configuration
pub const ENV_API_URL: &str = "CALTRACK_API_URL";
pub const ENV_FRONTEND_URL: &str = "CALTRACK_FRONTEND_URL";
pub const ENV_TOKEN_TTL_MS: &str = "CALTRACK_TOKEN_TTL_MS";

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            storage_key: "jwtToken".to_string(),
            token_ttl_ms: 3_600_000,
            data_dir: None,
            unload_strategy: UnloadStrategy::RefreshFlag,
        }
    }
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: 5000,
            staleness_threshold_ms: 10_000,
            probe_timeout_ms: 3000,
            backend_health_url: "http://localhost:8080/api/health".to_string(),
            frontend_url: "http://localhost:3000".to_string(),
        }
    }
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            landing: "/".to_string(),
            login: "/login".to_string(),
            dashboard: "/dashboard".to_string(),
            unauthorized: "/dashboard".to_string(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            timeout_seconds: 30,
            user_agent: format!("caltrack/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Default for CaltrackConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            liveness: LivenessConfig::default(),
            routes: RouteConfig::default(),
            api: ApiConfig::default(),
        }
    }
}

impl CaltrackConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> CaltrackResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| CaltrackError::Config {
            message: format!("Failed to read config file: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("read_file")
                .with_suggestion("Check if the config file exists and is readable"),
        })?;

        let config: CaltrackConfig = toml::from_str(&content).map_err(|e| CaltrackError::Config {
            message: format!("Failed to parse config: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("parse_toml")
                .with_suggestion("Check TOML syntax in config file"),
        })?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> CaltrackResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| CaltrackError::Config {
            message: format!("Failed to serialize config: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config").with_operation("serialize_toml"),
        })?;

        std::fs::write(path, content).map_err(|e| CaltrackError::Config {
            message: format!("Failed to write config file: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("write_file")
                .with_suggestion("Check if the directory exists and is writable"),
        })?;

        Ok(())
    }

    /// Candidate config file locations, most specific first
    pub fn default_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("caltrack").join("config.toml"));
        }
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".caltrack").join("config.toml"));
        }
        paths.push(PathBuf::from("caltrack.toml"));
        paths
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> CaltrackResult<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable source
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> CaltrackResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_API_URL) {
            let base = url.trim_end_matches('/').to_string();
            self.liveness.backend_health_url = format!("{}/api/health", base);
            self.api.base_url = base;
        }

        if let Some(url) = lookup(ENV_FRONTEND_URL) {
            self.liveness.frontend_url = url;
        }

        if let Some(ttl) = lookup(ENV_TOKEN_TTL_MS) {
            self.session.token_ttl_ms = ttl.parse().map_err(|_| CaltrackError::Config {
                message: format!("Invalid {} value: {}", ENV_TOKEN_TTL_MS, ttl),
                source: None,
                context: ErrorContext::new("config")
                    .with_operation("env_override")
                    .with_suggestion("Use an integer number of milliseconds"),
            })?;
        }

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> CaltrackResult<()> {
        if self.session.storage_key.trim().is_empty() {
            return Err(invalid("session.storage_key must not be empty"));
        }

        if self.session.token_ttl_ms <= 0 {
            return Err(invalid("session.token_ttl_ms must be greater than 0"));
        }

        if self.liveness.poll_interval_ms == 0 {
            return Err(invalid("liveness.poll_interval_ms must be greater than 0"));
        }

        if self.liveness.probe_timeout_ms == 0 {
            return Err(invalid("liveness.probe_timeout_ms must be greater than 0"));
        }

        if self.liveness.staleness_threshold_ms < self.liveness.poll_interval_ms as i64 {
            return Err(invalid(
                "liveness.staleness_threshold_ms must be at least liveness.poll_interval_ms",
            ));
        }

        for (name, value) in [
            ("liveness.backend_health_url", &self.liveness.backend_health_url),
            ("liveness.frontend_url", &self.liveness.frontend_url),
            ("api.base_url", &self.api.base_url),
        ] {
            url::Url::parse(value).map_err(|e| CaltrackError::Config {
                message: format!("{} is not a valid URL: {}", name, e),
                source: Some(Box::new(e)),
                context: ErrorContext::new("config").with_operation("validate"),
            })?;
        }

        if !self.routes.login.starts_with('/') {
            return Err(invalid("routes.login must be an absolute path"));
        }

        Ok(())
    }
}

fn invalid(message: &str) -> CaltrackError {
    CaltrackError::Config {
        message: message.to_string(),
        source: None,
        context: ErrorContext::new("config")
            .with_operation("validate")
            .with_suggestion("Fix the value in your config file or reset to defaults"),
    }
}
