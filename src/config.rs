use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure loaded from aiko_gateway.toml and environment variables
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub polling: PollingConfig,
    pub review: ReviewConfig,
    pub uploads: UploadConfig,
    pub report: ReportConfig,
    /// Runtime configuration loaded from environment variables
    #[serde(skip)]
    pub runtime: RuntimeConfig,
}

/// Connection to the external LangGraph workflow server
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    pub base_url: String,
    pub assistant_id: String,
    pub request_timeout_ms: u64,
    /// Sent as `x-api-key` when present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

/// Fixed-delay polling of thread state
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PollingConfig {
    pub max_attempts: u32,
    pub interval_ms: u64,
}

/// Human-in-the-loop thresholds
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReviewConfig {
    pub min_validated_needs: usize,
    pub min_validated_use_cases: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UploadConfig {
    pub dir: PathBuf,
    pub max_file_bytes: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReportConfig {
    pub brand: String,
    pub footer: String,
}

/// Runtime configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub log_level: String,
    pub http_bind: std::net::SocketAddr,
    pub bearer_token: Option<String>,
    pub session_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:2024".to_string(),
            assistant_id: "need_analysis".to_string(),
            request_timeout_ms: 600_000,
            api_key: None,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            max_attempts: 120,
            interval_ms: 1000,
        }
    }
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            min_validated_needs: 5,
            min_validated_use_cases: 5,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        let base = dirs::data_local_dir().unwrap_or_else(std::env::temp_dir);
        Self {
            dir: base.join("aiko-gateway").join("uploads"),
            max_file_bytes: 25 * 1024 * 1024,
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            brand: "AIKO".to_string(),
            footer: "Rapport généré par aikoGPT".to_string(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            log_level: crate::DEFAULT_LOG_FILTER.to_string(),
            http_bind: std::net::SocketAddr::from(([127, 0, 0, 1], 8080)),
            bearer_token: None,
            session_capacity: 256,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            polling: PollingConfig::default(),
            review: ReviewConfig::default(),
            uploads: UploadConfig::default(),
            report: ReportConfig::default(),
            runtime: RuntimeConfig::default(),
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Config {
    /// Load configuration from TOML file and environment variables
    /// Uses AIKO_GATEWAY_CONFIG environment variable or defaults to "aiko_gateway.toml"
    pub fn load() -> anyhow::Result<Self> {
        // 1) AIKO_ENV_FILE if set, 2) ./.env
        if let Ok(env_path) = std::env::var("AIKO_ENV_FILE") {
            let _ = dotenvy::from_path(env_path);
        } else {
            let _ = dotenvy::from_path(".env");
        }

        let config_path = std::env::var("AIKO_GATEWAY_CONFIG")
            .unwrap_or_else(|_| "aiko_gateway.toml".to_string());

        let mut config: Config = if let Ok(content) = std::fs::read_to_string(&config_path) {
            toml::from_str(&content)?
        } else {
            tracing::warn!("Config file {} not found, using defaults", config_path);
            Self::default()
        };

        config.apply_env_overrides();
        config.runtime = RuntimeConfig::load_from_env();
        config.validate()?;

        Ok(config)
    }

    /// Parse a TOML document without touching the environment
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("AIKO_LANGGRAPH_URL") {
            tracing::debug!("AIKO_LANGGRAPH_URL env override applied");
            self.engine.base_url = url;
        }
        if let Ok(assistant) = std::env::var("AIKO_ASSISTANT_ID") {
            self.engine.assistant_id = assistant;
        }
        if let Ok(key) = std::env::var("AIKO_LANGGRAPH_API_KEY")
            && !key.trim().is_empty()
        {
            self.engine.api_key = Some(key);
        }
        if let Some(timeout) = std::env::var("AIKO_REQUEST_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            self.engine.request_timeout_ms = timeout;
        }
        if let Some(attempts) = std::env::var("AIKO_POLL_MAX_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
        {
            self.polling.max_attempts = attempts;
        }
        if let Some(interval) = std::env::var("AIKO_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            self.polling.interval_ms = interval;
        }
        if let Some(n) = std::env::var("AIKO_MIN_VALIDATED_NEEDS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
        {
            self.review.min_validated_needs = n;
        }
        if let Some(n) = std::env::var("AIKO_MIN_VALIDATED_USE_CASES")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
        {
            self.review.min_validated_use_cases = n;
        }
        if let Ok(dir) = std::env::var("AIKO_UPLOAD_DIR") {
            self.uploads.dir = PathBuf::from(dir);
        }
    }

    /// Validate and clamp values; only unusable settings are errors
    pub fn validate(&mut self) -> anyhow::Result<()> {
        if !self.engine.base_url.starts_with("http://")
            && !self.engine.base_url.starts_with("https://")
        {
            anyhow::bail!(
                "Engine URL '{}' must start with http:// or https://",
                self.engine.base_url
            );
        }
        while self.engine.base_url.ends_with('/') {
            self.engine.base_url.pop();
        }
        if self.engine.assistant_id.trim().is_empty() {
            anyhow::bail!("engine.assistant_id cannot be empty");
        }

        if self.polling.max_attempts == 0 {
            tracing::warn!("polling.max_attempts is 0, using 1");
            self.polling.max_attempts = 1;
        } else if self.polling.max_attempts > 3600 {
            tracing::warn!(
                "polling.max_attempts {} exceeds max 3600, clamping",
                self.polling.max_attempts
            );
            self.polling.max_attempts = 3600;
        }
        if self.polling.interval_ms > 60_000 {
            tracing::warn!(
                "polling.interval_ms {} exceeds 60s, clamping",
                self.polling.interval_ms
            );
            self.polling.interval_ms = 60_000;
        }

        if self.review.min_validated_needs == 0 || self.review.min_validated_use_cases == 0 {
            anyhow::bail!("review thresholds must be at least 1");
        }
        if self.uploads.max_file_bytes == 0 {
            anyhow::bail!("uploads.max_file_bytes must be > 0");
        }
        Ok(())
    }
}

impl RuntimeConfig {
    /// Load runtime configuration from environment variables
    pub fn load_from_env() -> Self {
        let mut cfg = Self::default();

        // Level name or full directive; RUST_LOG still takes precedence at init
        if let Ok(level) = std::env::var("AIKO_LOG_LEVEL")
            && !level.trim().is_empty()
        {
            cfg.log_level = level.trim().to_string();
        }

        if let Ok(v) = std::env::var("AIKO_HTTP_BIND") {
            match v.parse::<std::net::SocketAddr>() {
                Ok(bind) => cfg.http_bind = bind,
                Err(_) => tracing::warn!("Ignoring invalid AIKO_HTTP_BIND '{}'", v),
            }
        }
        cfg.bearer_token = std::env::var("AIKO_BEARER_TOKEN")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        if let Some(cap) = std::env::var("AIKO_SESSION_CAPACITY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
        {
            cfg.session_capacity = cap.max(1);
        }

        cfg
    }
}
