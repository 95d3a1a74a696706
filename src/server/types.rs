use serde::Serialize;

use crate::plan::QueryPlan;
use crate::session::Connected;

/// Result of `pg_connect`.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Result of `pg_explain`.
#[derive(Debug, Clone, Serialize)]
pub struct QueryPlanResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<QueryPlan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of `pg_disconnect`.
#[derive(Debug, Clone, Serialize)]
pub struct DisconnectResponse {
    pub success: bool,
    pub message: String,
}

impl ConnectResponse {
    pub fn connected(connected: &Connected) -> Self {
        Self {
            success: true,
            message: format!("Connected successfully to {}", connected.server_version),
            session_id: Some(connected.session_id.to_string()),
        }
    }

    pub fn failed(error: impl std::fmt::Display) -> Self {
        Self {
            success: false,
            message: error.to_string(),
            session_id: None,
        }
    }
}

impl QueryPlanResponse {
    pub fn planned(plan: QueryPlan, query: impl Into<String>) -> Self {
        Self {
            success: true,
            plan: Some(plan),
            query: Some(query.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            plan: None,
            query: None,
            error: Some(error.into()),
        }
    }
}
