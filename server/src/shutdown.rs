// Graceful shutdown flag shared between the signal handler and the server

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable flag the server loop polls to stop accepting work
#[derive(Clone)]
pub struct ShutdownState {
    flag: Arc<AtomicBool>,
}

impl ShutdownState {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn request_shutdown(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

impl Default for ShutdownState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_flag_is_shared_across_clones() {
        let state = ShutdownState::new();
        let clone = state.clone();
        assert!(!clone.is_shutdown_requested());

        state.request_shutdown();
        assert!(clone.is_shutdown_requested());
    }
}
