// Deep research orchestrator
//
// A multi-stage research workflow: a question is clarified and planned,
// bounded parallel researchers search the web and summarize findings
// through a local LLM backend, and the results are compressed into a
// citation-bearing final report. Sessions are exposed over HTTP with a
// WebSocket progress stream.

// Module declarations
pub mod config;
pub mod file_storage;
pub mod language;
pub mod llm;
pub mod models;
pub mod progress;
pub mod prompts;
pub mod search;
pub mod shutdown;
pub mod workflow;

// Server module (HTTP/WebSocket API)
pub mod server;

// Re-export models for use across the crate
pub use models::*;

use std::sync::Arc;

use config::AppConfig;
use file_storage::SessionStore;
use llm::LlmGateway;
use progress::ProgressBus;
use prompts::PromptRegistry;
use search::SearchGateway;
use workflow::WorkflowContext;

/// Wire up the gateways, store, and bus from a validated configuration.
/// Fails fast on anything the workflow could not run with.
pub fn build_workflow_context(config: &AppConfig) -> Result<WorkflowContext, String> {
    let llm = LlmGateway::new(&config.llm)?;
    let search = SearchGateway::new(&config.search);
    let prompts = PromptRegistry::new()?;
    let store = SessionStore::new(&config.store.url)?;

    Ok(WorkflowContext {
        llm: Arc::new(llm),
        search: Arc::new(search),
        prompts: Arc::new(prompts),
        store: Arc::new(store),
        bus: Arc::new(ProgressBus::new()),
        engine: config.engine.clone(),
        stream_enabled: config.llm.stream_enabled,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_build_workflow_context_from_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.store.url = temp_dir.path().to_string_lossy().to_string();

        let context = build_workflow_context(&config).unwrap();
        assert!(!context.stream_enabled);
        assert!(!context.search.is_configured());
    }
}
