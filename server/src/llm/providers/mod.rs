// LLM provider implementations

mod ollama;
mod openai_compat;

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::{LlmConfig, LlmProviderKind, ENDPOINT_LOCAL, ENDPOINT_OPENAI_COMPATIBLE};

pub use ollama::OllamaProvider;
pub use openai_compat::OpenAiCompatProvider;

/// One generation request, fully resolved by the gateway
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub temperature: f32,
    pub top_p: f32,
}

/// A text-generation backend
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Short name used in logs and fallback notes
    fn name(&self) -> &'static str;

    /// Generate the full completion for a request
    async fn generate(&self, request: &GenerateRequest) -> Result<String, String>;

    /// Generate with chunk streaming; forwards chunks on `tx` and returns
    /// the assembled text. The default delivers the completion as one chunk.
    async fn stream(
        &self,
        request: &GenerateRequest,
        tx: mpsc::UnboundedSender<String>,
    ) -> Result<String, String> {
        let text = self.generate(request).await?;
        let _ = tx.send(text.clone());
        Ok(text)
    }

    /// Answer a minimal availability probe within `timeout`
    async fn health_check(&self, model: &str, timeout: Duration) -> bool;
}

/// Build the provider set for the configured endpoints, local first
pub fn build_providers(
    config: &LlmConfig,
) -> Result<Vec<(LlmProviderKind, Box<dyn LlmProvider>)>, String> {
    let mut providers: Vec<(LlmProviderKind, Box<dyn LlmProvider>)> = Vec::new();

    if let Some(base_url) = config.endpoint(ENDPOINT_LOCAL) {
        providers.push((
            LlmProviderKind::Local,
            Box::new(OllamaProvider::new(base_url)),
        ));
    }
    if let Some(base_url) = config.endpoint(ENDPOINT_OPENAI_COMPATIBLE) {
        providers.push((
            LlmProviderKind::OpenAiCompatible,
            Box::new(OpenAiCompatProvider::new(base_url, config.api_key.clone())),
        ));
    }

    Ok(providers)
}
