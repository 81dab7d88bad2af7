// Application configuration
//
// Configuration is an enumerated schema validated at startup. Values come
// from an optional JSON config file (unknown keys are a startup error)
// overridden by environment variables, mirroring the deployment surface of
// the original service.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::llm::LlmStage;

/// Endpoint names recognised in `llm.endpoints`
pub const ENDPOINT_LOCAL: &str = "local";
pub const ENDPOINT_OPENAI_COMPATIBLE: &str = "openai-compatible";

// ============================================================================
// LLM
// ============================================================================

/// Gateway routing mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LlmProviderKind {
    #[serde(rename = "local")]
    Local,
    #[serde(rename = "openai-compatible")]
    OpenAiCompatible,
    #[serde(rename = "hybrid")]
    Hybrid,
}

impl LlmProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProviderKind::Local => "local",
            LlmProviderKind::OpenAiCompatible => "openai-compatible",
            LlmProviderKind::Hybrid => "hybrid",
        }
    }
}

impl std::fmt::Display for LlmProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for LlmProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" | "ollama" => Ok(LlmProviderKind::Local),
            "openai-compatible" | "openai_compatible" | "openai" | "vllm" => {
                Ok(LlmProviderKind::OpenAiCompatible)
            }
            "hybrid" => Ok(LlmProviderKind::Hybrid),
            _ => Err(format!(
                "Invalid LLM provider: '{}'. Expected 'local', 'openai-compatible', or 'hybrid'",
                s
            )),
        }
    }
}

fn default_endpoints() -> HashMap<String, String> {
    let mut endpoints = HashMap::new();
    endpoints.insert(
        ENDPOINT_LOCAL.to_string(),
        "http://localhost:11434".to_string(),
    );
    endpoints.insert(
        ENDPOINT_OPENAI_COMPATIBLE.to_string(),
        "http://localhost:8000".to_string(),
    );
    endpoints
}

fn default_model() -> String {
    "gemma3:4b".to_string()
}

fn default_request_timeout_ms() -> u64 {
    300_000
}

/// LLM gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LlmConfig {
    /// Routing mode: a single provider, or per-stage hybrid routing
    #[serde(default = "LlmConfig::default_provider")]
    pub provider: LlmProviderKind,
    /// Provider endpoint URLs, keyed by endpoint name
    #[serde(default = "default_endpoints")]
    pub endpoints: HashMap<String, String>,
    /// Model identifier forwarded to the provider
    #[serde(default = "default_model")]
    pub model: String,
    /// Bearer key for the OpenAI-compatible endpoint; unauthenticated when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Per-stage provider overrides, used when provider = hybrid
    #[serde(default)]
    pub per_stage: HashMap<LlmStage, LlmProviderKind>,
    /// Per-request generation timeout
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Stream researcher generations chunk by chunk
    #[serde(default)]
    pub stream_enabled: bool,
}

impl LlmConfig {
    fn default_provider() -> LlmProviderKind {
        LlmProviderKind::Local
    }

    pub fn endpoint(&self, name: &str) -> Option<&str> {
        self.endpoints.get(name).map(|s| s.as_str())
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: Self::default_provider(),
            endpoints: default_endpoints(),
            model: default_model(),
            api_key: None,
            per_stage: HashMap::new(),
            request_timeout_ms: default_request_timeout_ms(),
            stream_enabled: false,
        }
    }
}

// ============================================================================
// Search
// ============================================================================

fn default_max_results() -> usize {
    5
}

/// Search gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SearchConfig {
    /// Search provider key; the gateway runs degraded when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Results requested per query
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            max_results: default_max_results(),
        }
    }
}

// ============================================================================
// Engine
// ============================================================================

fn default_slot_timeout_ms() -> u64 {
    120_000
}

fn default_content_truncation() -> usize {
    500
}

/// Workflow engine tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EngineConfig {
    /// Supervisor loop cap; when absent the depth knob decides
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,
    /// Per-researcher slot budget
    #[serde(default = "default_slot_timeout_ms")]
    pub slot_timeout_ms: u64,
    /// Per-snippet character cap fed into the researcher prompt
    #[serde(default = "default_content_truncation")]
    pub content_truncation: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: None,
            slot_timeout_ms: default_slot_timeout_ms(),
            content_truncation: default_content_truncation(),
        }
    }
}

// ============================================================================
// Store / CORS / Logging / Server
// ============================================================================

fn default_store_url() -> String {
    "./sessions".to_string()
}

/// Persistence target
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StoreConfig {
    /// Directory the session store writes under
    #[serde(default = "default_store_url")]
    pub url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
        }
    }
}

/// Accepted cross-origin callers; empty means permissive
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CorsConfig {
    #[serde(default)]
    pub origins: Vec<String>,
}

/// Log verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(format!("Invalid log level: '{}'", s)),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LogConfig {
    #[serde(default)]
    pub level: LogLevel,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

/// Listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

// ============================================================================
// AppConfig
// ============================================================================

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl AppConfig {
    /// Load from an optional JSON file, then apply environment overrides,
    /// then validate. Unknown keys in the file fail the load.
    pub fn load(config_file: Option<&Path>) -> Result<Self, String> {
        let mut config = match config_file {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .map_err(|e| format!("Failed to read config file {:?}: {}", path, e))?;
                serde_json::from_str::<AppConfig>(&content)
                    .map_err(|e| format!("Invalid config file {:?}: {}", path, e))?
            }
            None => AppConfig::default(),
        };

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("SERVER_BIND") {
            self.server.bind = v;
        }
        if let Some(v) = parse_env("SERVER_PORT") {
            self.server.port = v;
        }

        if let Some(v) = parse_env("LLM_PROVIDER") {
            self.llm.provider = v;
        }
        if let Ok(v) = std::env::var("LLM_MODEL") {
            self.llm.model = v;
        }
        if let Ok(v) = std::env::var("LLM_API_KEY") {
            if !v.is_empty() {
                self.llm.api_key = Some(v);
            }
        }
        if let Ok(v) = std::env::var("OLLAMA_BASE_URL") {
            self.llm.endpoints.insert(ENDPOINT_LOCAL.to_string(), v);
        }
        if let Ok(v) = std::env::var("OPENAI_BASE_URL") {
            self.llm
                .endpoints
                .insert(ENDPOINT_OPENAI_COMPATIBLE.to_string(), v);
        }
        if let Some(v) = parse_env("LLM_REQUEST_TIMEOUT_MS") {
            self.llm.request_timeout_ms = v;
        }
        if let Some(v) = parse_env("LLM_STREAM_ENABLED") {
            self.llm.stream_enabled = v;
        }
        for (stage, var) in [
            (LlmStage::Summarization, "SUMMARIZATION_PROVIDER"),
            (LlmStage::Research, "RESEARCH_PROVIDER"),
            (LlmStage::Compression, "COMPRESSION_PROVIDER"),
            (LlmStage::FinalReport, "FINAL_REPORT_PROVIDER"),
        ] {
            if let Some(kind) = parse_env::<LlmProviderKind>(var) {
                self.llm.per_stage.insert(stage, kind);
            }
        }

        if let Ok(v) = std::env::var("TAVILY_API_KEY") {
            if !v.is_empty() {
                self.search.api_key = Some(v);
            }
        }
        if let Some(v) = parse_env("SEARCH_MAX_RESULTS") {
            self.search.max_results = v;
        }

        if let Some(v) = parse_env("ENGINE_MAX_ITERATIONS") {
            self.engine.max_iterations = Some(v);
        }
        if let Some(v) = parse_env("ENGINE_SLOT_TIMEOUT_MS") {
            self.engine.slot_timeout_ms = v;
        }
        if let Some(v) = parse_env("ENGINE_CONTENT_TRUNCATION") {
            self.engine.content_truncation = v;
        }

        if let Ok(v) = std::env::var("SESSION_STORAGE_DIR") {
            self.store.url = v;
        }
        if let Ok(v) = std::env::var("CORS_ORIGINS") {
            self.cors.origins = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(v) = parse_env("LOG_LEVEL") {
            self.log.level = v;
        }
    }

    /// Reject configurations the gateways cannot honour
    pub fn validate(&self) -> Result<(), String> {
        if self.llm.model.trim().is_empty() {
            return Err("llm.model must not be empty".to_string());
        }

        for name in self.llm.endpoints.keys() {
            if name != ENDPOINT_LOCAL && name != ENDPOINT_OPENAI_COMPATIBLE {
                return Err(format!(
                    "Unknown llm endpoint '{}'. Recognised endpoints: '{}', '{}'",
                    name, ENDPOINT_LOCAL, ENDPOINT_OPENAI_COMPATIBLE
                ));
            }
        }

        let mut required = Vec::new();
        match self.llm.provider {
            LlmProviderKind::Local => required.push(ENDPOINT_LOCAL),
            LlmProviderKind::OpenAiCompatible => required.push(ENDPOINT_OPENAI_COMPATIBLE),
            LlmProviderKind::Hybrid => {
                if self.llm.per_stage.is_empty() {
                    return Err(
                        "llm.provider = hybrid requires at least one llm.perStage override"
                            .to_string(),
                    );
                }
                for kind in self.llm.per_stage.values() {
                    match kind {
                        LlmProviderKind::Local => required.push(ENDPOINT_LOCAL),
                        LlmProviderKind::OpenAiCompatible => {
                            required.push(ENDPOINT_OPENAI_COMPATIBLE)
                        }
                        LlmProviderKind::Hybrid => {
                            return Err(
                                "llm.perStage overrides must name a concrete provider".to_string()
                            )
                        }
                    }
                }
            }
        }
        for name in required {
            if !self.llm.endpoints.contains_key(name) {
                return Err(format!("llm.endpoints is missing an entry for '{}'", name));
            }
        }

        if self.llm.request_timeout_ms == 0 {
            return Err("llm.requestTimeoutMs must be positive".to_string());
        }
        if self.engine.slot_timeout_ms == 0 {
            return Err("engine.slotTimeoutMs must be positive".to_string());
        }
        if self.engine.content_truncation == 0 {
            return Err("engine.contentTruncation must be positive".to_string());
        }
        if self.search.max_results == 0 {
            return Err("search.maxResults must be positive".to_string());
        }

        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
