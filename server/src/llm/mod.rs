// LLM gateway
//
// Routes generation requests to the configured providers with per-stage
// parameter profiles and falls back to the next provider on failure. The
// gateway keeps no prompt or completion state.

pub mod providers;

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::{LlmConfig, LlmProviderKind};
use providers::{build_providers, GenerateRequest, LlmProvider};

/// Timeout for health probes
pub const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// Stage profiles
// ============================================================================

/// Generative stage, each with a fixed sampling profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmStage {
    Summarization,
    Research,
    Compression,
    FinalReport,
}

impl LlmStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmStage::Summarization => "summarization",
            LlmStage::Research => "research",
            LlmStage::Compression => "compression",
            LlmStage::FinalReport => "final_report",
        }
    }

    pub fn temperature(&self) -> f32 {
        match self {
            LlmStage::Summarization => 0.1,
            LlmStage::Research => 0.3,
            LlmStage::Compression => 0.2,
            LlmStage::FinalReport => 0.4,
        }
    }

    pub fn top_p(&self) -> f32 {
        match self {
            LlmStage::Summarization | LlmStage::Compression => 0.9,
            LlmStage::Research | LlmStage::FinalReport => 0.95,
        }
    }
}

impl std::fmt::Display for LlmStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Errors and outcomes
// ============================================================================

/// Failure of a gateway call
#[derive(Debug, Error)]
pub enum LlmError {
    /// Every configured provider failed or timed out
    #[error("all LLM providers failed: {0}")]
    Unavailable(String),
    /// The session cancel token fired mid-call
    #[error("LLM call cancelled")]
    Cancelled,
}

/// Successful generation, with notes about providers that had to be skipped
#[derive(Debug, Clone)]
pub struct LlmOutcome {
    pub text: String,
    /// One entry per provider that failed before the successful one
    pub fallback_errors: Vec<String>,
}

// ============================================================================
// Gateway
// ============================================================================

struct ProviderEntry {
    kind: LlmProviderKind,
    provider: Box<dyn LlmProvider>,
}

/// Uniform text generation across the configured providers
pub struct LlmGateway {
    providers: Vec<ProviderEntry>,
    routing: LlmProviderKind,
    per_stage: std::collections::HashMap<LlmStage, LlmProviderKind>,
    model: String,
    request_timeout: Duration,
}

impl LlmGateway {
    pub fn new(config: &LlmConfig) -> Result<Self, String> {
        let providers = build_providers(config)?
            .into_iter()
            .map(|(kind, provider)| ProviderEntry { kind, provider })
            .collect::<Vec<_>>();
        if providers.is_empty() {
            return Err("No LLM providers configured".to_string());
        }

        Ok(Self {
            providers,
            routing: config.provider,
            per_stage: config.per_stage.clone(),
            model: config.model.clone(),
            request_timeout: Duration::from_millis(config.request_timeout_ms),
        })
    }

    /// Build a gateway over an explicit provider list. The first provider is
    /// the primary; the rest are fallbacks in order.
    pub fn with_providers(
        providers: Vec<(LlmProviderKind, Box<dyn LlmProvider>)>,
        model: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, String> {
        if providers.is_empty() {
            return Err("No LLM providers configured".to_string());
        }
        let routing = providers[0].0;
        Ok(Self {
            providers: providers
                .into_iter()
                .map(|(kind, provider)| ProviderEntry { kind, provider })
                .collect(),
            routing,
            per_stage: std::collections::HashMap::new(),
            model: model.into(),
            request_timeout,
        })
    }

    /// Fallback order for a stage: the routed provider first, then the rest
    fn provider_order(&self, stage: LlmStage) -> Vec<&ProviderEntry> {
        let primary = match self.routing {
            LlmProviderKind::Hybrid => self
                .per_stage
                .get(&stage)
                .copied()
                .unwrap_or(self.providers[0].kind),
            kind => kind,
        };

        let mut order: Vec<&ProviderEntry> = Vec::with_capacity(self.providers.len());
        order.extend(self.providers.iter().filter(|e| e.kind == primary));
        order.extend(self.providers.iter().filter(|e| e.kind != primary));
        order
    }

    fn request(&self, stage: LlmStage, prompt: &str) -> GenerateRequest {
        GenerateRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            temperature: stage.temperature(),
            top_p: stage.top_p(),
        }
    }

    /// Generate text for a stage, falling back across providers.
    pub async fn generate(
        &self,
        stage: LlmStage,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<LlmOutcome, LlmError> {
        let request = self.request(stage, prompt);
        let mut fallback_errors = Vec::new();

        for entry in self.provider_order(stage) {
            let attempt = tokio::time::timeout(self.request_timeout, entry.provider.generate(&request));
            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(LlmError::Cancelled),
                result = attempt => result,
            };

            match result {
                Ok(Ok(text)) => {
                    return Ok(LlmOutcome {
                        text,
                        fallback_errors,
                    });
                }
                Ok(Err(e)) => {
                    log::warn!("LLM provider '{}' failed for {}: {}", entry.provider.name(), stage, e);
                    fallback_errors.push(format!("{}: {}", entry.provider.name(), e));
                }
                Err(_) => {
                    log::warn!(
                        "LLM provider '{}' timed out after {:?} for {}",
                        entry.provider.name(),
                        self.request_timeout,
                        stage
                    );
                    fallback_errors.push(format!(
                        "{}: timed out after {}ms",
                        entry.provider.name(),
                        self.request_timeout.as_millis()
                    ));
                }
            }
        }

        Err(LlmError::Unavailable(fallback_errors.join("; ")))
    }

    /// Generate with chunk streaming. Chunks are forwarded on `tx` as they
    /// arrive; the assembled text is returned. Providers without native
    /// streaming deliver a single chunk.
    pub async fn stream(
        &self,
        stage: LlmStage,
        prompt: &str,
        cancel: &CancellationToken,
        tx: mpsc::UnboundedSender<String>,
    ) -> Result<LlmOutcome, LlmError> {
        let request = self.request(stage, prompt);
        let mut fallback_errors = Vec::new();

        for entry in self.provider_order(stage) {
            let attempt =
                tokio::time::timeout(self.request_timeout, entry.provider.stream(&request, tx.clone()));
            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(LlmError::Cancelled),
                result = attempt => result,
            };

            match result {
                Ok(Ok(text)) => {
                    return Ok(LlmOutcome {
                        text,
                        fallback_errors,
                    });
                }
                Ok(Err(e)) => {
                    fallback_errors.push(format!("{}: {}", entry.provider.name(), e));
                }
                Err(_) => {
                    fallback_errors.push(format!(
                        "{}: timed out after {}ms",
                        entry.provider.name(),
                        self.request_timeout.as_millis()
                    ));
                }
            }
        }

        Err(LlmError::Unavailable(fallback_errors.join("; ")))
    }

    /// True when any configured provider answers a minimal probe in time
    pub async fn health_check(&self) -> bool {
        let probes = self
            .providers
            .iter()
            .map(|e| e.provider.health_check(&self.model, HEALTH_PROBE_TIMEOUT));
        let results = futures_util::future::join_all(probes).await;
        results.into_iter().any(|ok| ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_temperature_profiles() {
        assert_eq!(LlmStage::Summarization.temperature(), 0.1);
        assert_eq!(LlmStage::Research.temperature(), 0.3);
        assert_eq!(LlmStage::Compression.temperature(), 0.2);
        assert_eq!(LlmStage::FinalReport.temperature(), 0.4);
    }

    #[test]
    fn test_stage_serialization() {
        assert_eq!(
            serde_json::to_string(&LlmStage::FinalReport).unwrap(),
            "\"final_report\""
        );
    }

    #[test]
    fn test_gateway_rejects_missing_endpoint() {
        let mut config = LlmConfig::default();
        config.endpoints.clear();
        assert!(LlmGateway::new(&config).is_err());
    }

    #[test]
    fn test_hybrid_provider_order_prefers_stage_override() {
        let mut config = LlmConfig::default();
        config.provider = LlmProviderKind::Hybrid;
        config
            .per_stage
            .insert(LlmStage::FinalReport, LlmProviderKind::OpenAiCompatible);

        let gateway = LlmGateway::new(&config).unwrap();
        let order = gateway.provider_order(LlmStage::FinalReport);
        assert_eq!(order[0].kind, LlmProviderKind::OpenAiCompatible);
        assert_eq!(order.len(), 2);

        // Stages without an override route to the first configured provider
        let order = gateway.provider_order(LlmStage::Research);
        assert_eq!(order[0].kind, gateway.providers[0].kind);
    }
}
