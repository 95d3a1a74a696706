use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("MCP protocol error: {0}")]
    Mcp(#[from] McpError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Session registry errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Invalid or expired session ID: {session_id}")]
    UnknownSession { session_id: String },
}

/// Database connectivity and explain errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Connection failed: {message}")]
    Connectivity { message: String },

    #[error("Connection timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// The engine refused the statement (syntax, permissions, undefined object).
    #[error("{message}")]
    EngineRejected {
        message: String,
        code: Option<String>,
    },

    #[error("No result returned from EXPLAIN query")]
    NoResult,

    #[error("Malformed plan output: {message}")]
    MalformedPlan { message: String },
}

/// Model provider errors
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("GEMINI_API_KEY not configured")]
    MissingCredential,

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// MCP protocol errors
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Unknown tool: {tool_name}")]
    UnknownTool { tool_name: String },

    #[error("Invalid parameters for {tool_name}: {message}")]
    InvalidParameters { tool_name: String, message: String },

    #[error("Tool execution failed: {message}")]
    ExecutionFailed { message: String },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DatabaseError {
    /// Whether this is an expected, user-facing rejection rather than an
    /// infrastructure failure.
    pub fn is_engine_rejection(&self) -> bool {
        matches!(self, DatabaseError::EngineRejected { .. })
    }
}

impl From<AppError> for McpError {
    fn from(err: AppError) -> Self {
        McpError::ExecutionFailed {
            message: err.to_string(),
        }
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for session registry lookups
pub type SessionResult<T> = Result<T, SessionError>;

/// Result type alias for database operations
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Result type alias for model provider operations
pub type LlmResult<T> = Result<T, LlmError>;

/// Result type alias for MCP operations
pub type McpResult<T> = Result<T, McpError>;
