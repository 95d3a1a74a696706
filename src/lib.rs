//! # pgplan-advisor
//!
//! A Model Context Protocol (MCP) server that fetches PostgreSQL execution
//! plans and asks a generative model to critique them.
//!
//! ## Features
//!
//! - **Sessions**: probe a database once, then refer to it by an opaque session ID
//! - **Explain**: `EXPLAIN (FORMAT JSON)` with optional `ANALYZE`, parsed into a plan tree
//! - **Analysis**: bottlenecks, index suggestions and rewrites for a single plan
//! - **Comparison**: which of two plans is better and why
//! - **Chat**: follow-up questions about a plan
//!
//! Model output is free text. It is parsed best-effort: when no JSON can be
//! recovered, the result is marked degraded and carries the raw text in the
//! same schema.
//!
//! ## Architecture
//!
//! ```text
//! MCP Client → MCP Server (stdio) → ConnectionRegistry → PostgreSQL
//!                    ↓
//!           AnalysisOrchestrator → Gemini (HTTP)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use pgplan_advisor::{AppState, Config, McpServer};
//! use pgplan_advisor::llm::GeminiClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let gemini = GeminiClient::new(&config.gemini, config.request.clone())?;
//!     let state = Arc::new(AppState::new(config, Arc::new(gemini)));
//!     McpServer::new(state).run().await?;
//!     Ok(())
//! }
//! ```

/// Model-backed plan analysis, comparison and chat.
pub mod analysis;
/// Configuration management for the server.
pub mod config;
/// Target database connections.
pub mod database;
/// Error types and result aliases for the application.
pub mod error;
/// Model provider client and types.
pub mod llm;
/// Execution plan model and the explain runner.
pub mod plan;
/// System instructions and prompt builders.
pub mod prompts;
/// MCP server implementation and request handling.
pub mod server;
/// Session registry.
pub mod session;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use server::{AppState, McpServer, SharedState};
