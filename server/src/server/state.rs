//! Server application state shared across handlers

use std::sync::Arc;

use crate::config::AppConfig;
use crate::shutdown::ShutdownState;
use crate::workflow::{CancelRegistry, WorkflowContext};

/// Shared state for the HTTP surface. Everything heavy lives behind Arcs
/// so handlers can clone freely.
#[derive(Clone)]
pub struct ServerAppState {
    /// Validated application configuration
    pub config: Arc<AppConfig>,
    /// Gateways, store, and bus the workflow engine runs on
    pub workflow: Arc<WorkflowContext>,
    /// Per-session cancel tokens
    pub cancels: Arc<CancelRegistry>,
    /// Shutdown flag
    pub shutdown_state: ShutdownState,
}

impl ServerAppState {
    pub fn new(
        config: Arc<AppConfig>,
        workflow: Arc<WorkflowContext>,
        cancels: Arc<CancelRegistry>,
        shutdown_state: ShutdownState,
    ) -> Self {
        Self {
            config,
            workflow,
            cancels,
            shutdown_state,
        }
    }
}
