//! Application state management
//!
//! Contains shared state accessible across all handlers.

use crate::config::Settings;
use crate::migration::WorkflowEngine;
use std::sync::Arc;

/// Application state shared across all handlers
pub struct AppState {
    /// Every migration read and write goes through the engine
    pub engine: Arc<WorkflowEngine>,

    pub settings: Settings,
}

impl AppState {
    pub fn new(engine: Arc<WorkflowEngine>, settings: Settings) -> Self {
        Self { engine, settings }
    }
}

/// Type alias for shared state
pub type SharedState = Arc<AppState>;
