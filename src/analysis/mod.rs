//! Model-backed critique of execution plans.
//!
//! [`AnalysisOrchestrator`] turns plans into prompts, runs one model call per
//! operation, and shapes the reply through [`extract`] into typed results.
//! Provider failures become `success = false` responses; only a missing
//! credential is returned as an error.

pub mod extract;
mod types;

pub use types::*;

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ChatConfig;
use crate::error::{AppError, AppResult, LlmError};
use crate::llm::{CompletionBackend, Message, PromptRequest};
use crate::plan::QueryPlan;
use crate::prompts::{
    analyze_prompt, chat_context, compare_prompt, ANALYZE_PLAN_PROMPT, CHAT_ACKNOWLEDGEMENT,
    CHAT_PROMPT, COMPARE_PLANS_PROMPT,
};

/// Composes prompts, calls the model and shapes its replies.
#[derive(Clone)]
pub struct AnalysisOrchestrator {
    backend: Arc<dyn CompletionBackend>,
    replay_history: bool,
}

impl AnalysisOrchestrator {
    pub fn new(backend: Arc<dyn CompletionBackend>, config: &ChatConfig) -> Self {
        Self {
            backend,
            replay_history: config.replay_history,
        }
    }

    /// Critique a single plan.
    pub async fn analyze(&self, plan: &QueryPlan, sql: Option<&str>) -> AppResult<AnalysisResponse> {
        let start = Instant::now();
        let request = PromptRequest::new(ANALYZE_PLAN_PROMPT)
            .with_message(Message::user(analyze_prompt(&render(plan)?, sql)));

        let completion = match self.call("analyze", request).await? {
            Ok(text) => text,
            Err(message) => return Ok(AnalysisResponse::failed(message)),
        };

        let analysis = AnalysisResult::from_completion(&completion);
        info!(
            root = %plan.root().node_type,
            degraded = analysis.is_degraded(),
            latency_ms = start.elapsed().as_millis(),
            "Plan analysis completed"
        );
        Ok(AnalysisResponse::completed(analysis))
    }

    /// Compare two plans, usually before and after a change.
    pub async fn compare(
        &self,
        plan_a: &QueryPlan,
        plan_b: &QueryPlan,
        sql_a: Option<&str>,
        sql_b: Option<&str>,
    ) -> AppResult<ComparisonResponse> {
        let start = Instant::now();
        let prompt = compare_prompt(&render(plan_a)?, &render(plan_b)?, sql_a, sql_b);
        let request = PromptRequest::new(COMPARE_PLANS_PROMPT).with_message(Message::user(prompt));

        let completion = match self.call("compare", request).await? {
            Ok(text) => text,
            Err(message) => return Ok(ComparisonResponse::failed(message)),
        };

        let comparison = ComparisonResult::from_completion(&completion);
        info!(
            degraded = comparison.is_degraded(),
            latency_ms = start.elapsed().as_millis(),
            "Plan comparison completed"
        );
        Ok(ComparisonResponse::completed(comparison))
    }

    /// Answer a question about a plan.
    ///
    /// Every conversation opens with the plan as a user turn followed by a
    /// fixed acknowledgment. Caller history is appended after those two
    /// turns only when replay is enabled.
    pub async fn chat(
        &self,
        plan: &QueryPlan,
        sql: Option<&str>,
        message: &str,
        history: &[ChatTurn],
    ) -> AppResult<ChatResponse> {
        let start = Instant::now();
        let request = self.chat_request(&render(plan)?, sql, message, history);

        if !history.is_empty() && !self.replay_history {
            debug!(turns = history.len(), "Chat history supplied but replay is disabled");
        }

        match self.call("chat", request).await? {
            Ok(reply) => {
                info!(
                    history = history.len(),
                    latency_ms = start.elapsed().as_millis(),
                    "Chat reply generated"
                );
                Ok(ChatResponse::completed(reply))
            }
            Err(message) => Ok(ChatResponse::failed(message)),
        }
    }

    fn chat_request(
        &self,
        plan_json: &str,
        sql: Option<&str>,
        message: &str,
        history: &[ChatTurn],
    ) -> PromptRequest {
        let replayed = if self.replay_history { history } else { &history[..0] };

        PromptRequest::new(CHAT_PROMPT)
            .with_message(Message::user(chat_context(plan_json, sql)))
            .with_message(Message::assistant(CHAT_ACKNOWLEDGEMENT))
            .with_messages(replayed.iter().map(Message::from))
            .with_message(Message::user(message))
    }

    /// Run one model call. The outer result is fatal; the inner error is the
    /// message for a failed response.
    async fn call(&self, operation: &str, request: PromptRequest) -> AppResult<Result<String, String>> {
        match self.backend.generate(request).await {
            Ok(text) => Ok(Ok(text)),
            Err(LlmError::MissingCredential) => Err(AppError::Config {
                message: LlmError::MissingCredential.to_string(),
            }),
            Err(e) => {
                warn!(operation, error = %e, "Model call failed");
                Ok(Err(e.to_string()))
            }
        }
    }
}

fn render(plan: &QueryPlan) -> AppResult<String> {
    serde_json::to_string_pretty(plan).map_err(|e| AppError::Internal {
        message: format!("failed to render plan: {}", e),
    })
}
