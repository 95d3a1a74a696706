//! Server module for MCP protocol handling.
//!
//! This module provides:
//! - MCP server implementation over stdio
//! - Tool call handlers and routing
//! - Shared application state management

mod handlers;
mod mcp;
mod types;

pub use handlers::*;
pub use mcp::*;
pub use types::*;

use std::sync::Arc;

use crate::analysis::AnalysisOrchestrator;
use crate::config::Config;
use crate::llm::CompletionBackend;
use crate::plan::PlanExecutor;
use crate::session::ConnectionRegistry;

/// Application state shared across handlers.
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Live sessions.
    pub registry: Arc<ConnectionRegistry>,
    /// Explain runner.
    pub executor: PlanExecutor,
    /// Model-backed analysis.
    pub orchestrator: AnalysisOrchestrator,
}

impl AppState {
    /// Create new application state
    pub fn new(config: Config, backend: Arc<dyn CompletionBackend>) -> Self {
        tracing::info!(
            model = %config.gemini.model,
            session_ttl_secs = config.session.ttl_secs,
            connect_timeout_secs = config.database.connect_timeout_secs,
            replay_history = config.chat.replay_history,
            "AppState initializing"
        );

        let registry = Arc::new(ConnectionRegistry::new(&config.session, &config.database));
        let executor = PlanExecutor::new(&config.database);
        let orchestrator = AnalysisOrchestrator::new(backend, &config.chat);

        Self {
            config,
            registry,
            executor,
            orchestrator,
        }
    }
}

/// Shared application state handle
pub type SharedState = Arc<AppState>;
