// Workflow engine
//
// One state machine per session drives intake through the final report.
// The engine owns its collaborators explicitly; nothing here is a global.

mod engine;
mod scheduler;

pub use engine::{run_session, start_session};
pub use scheduler::{run_batch, SlotBudget, SlotContext, SlotResult};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::file_storage::SessionStore;
use crate::llm::LlmGateway;
use crate::progress::ProgressBus;
use crate::prompts::PromptRegistry;
use crate::search::WebSearch;

/// Everything a running session needs, passed in rather than global
pub struct WorkflowContext {
    pub llm: Arc<LlmGateway>,
    pub search: Arc<dyn WebSearch>,
    pub prompts: Arc<PromptRegistry>,
    pub store: Arc<SessionStore>,
    pub bus: Arc<ProgressBus>,
    pub engine: EngineConfig,
    /// Stream researcher generations for live previews
    pub stream_enabled: bool,
}

/// One cancel token per live session
pub struct CancelRegistry {
    tokens: Mutex<HashMap<String, CancellationToken>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Create and track the token for a new session
    pub fn register(&self, session_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens
            .lock()
            .unwrap()
            .insert(session_id.to_string(), token.clone());
        token
    }

    /// Fire the session's cancel token. Idempotent: cancelling a finished
    /// or unknown session is a no-op.
    pub fn cancel(&self, session_id: &str) -> bool {
        match self.tokens.lock().unwrap().get(session_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Drop the token once the session reached a terminal state
    pub fn remove(&self, session_id: &str) {
        self.tokens.lock().unwrap().remove(session_id);
    }

    pub fn is_running(&self, session_id: &str) -> bool {
        self.tokens.lock().unwrap().contains_key(session_id)
    }
}

impl Default for CancelRegistry {
    fn default() -> Self {
        Self::new()
    }
}
