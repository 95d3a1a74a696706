use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

use super::extract::{extract, Extracted};
use crate::llm::{Message, MessageRole};

/// Severity or impact rating attached to findings.
///
/// Matching is case-insensitive; anything unrecognised, including `null`,
/// becomes [`Severity::Unknown`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
    Low,
    #[default]
    Unknown,
}

impl<'de> Deserialize<'de> for Severity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        let severity = match value.as_str().map(|s| s.trim().to_ascii_lowercase()) {
            Some(s) if s == "high" => Severity::High,
            Some(s) if s == "medium" => Severity::Medium,
            Some(s) if s == "low" => Severity::Low,
            _ => Severity::Unknown,
        };
        Ok(severity)
    }
}

/// Models emit `null` for fields they have nothing to say about.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A plan node identified as a performance problem.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bottleneck {
    #[serde(default, deserialize_with = "null_as_default")]
    pub node_type: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub issue: String,
    #[serde(default)]
    pub impact: Severity,
}

/// Suggested index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexRecommendation {
    #[serde(default, deserialize_with = "null_as_default")]
    pub table: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub columns: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub reason: String,
}

/// Suggested rewrite of the statement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRewrite {
    #[serde(default, deserialize_with = "null_as_default")]
    pub suggestion: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub benefit: String,
}

/// Advice about one specific node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeAdvice {
    #[serde(default, deserialize_with = "null_as_default")]
    pub advice: String,
    #[serde(default)]
    pub severity: Severity,
}

/// Structured critique of a single plan.
///
/// Every key is optional so that any JSON object the model returns is kept.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanAnalysis {
    #[serde(default, deserialize_with = "null_as_default")]
    pub overall_assessment: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub bottlenecks: Vec<Bottleneck>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub index_recommendations: Vec<IndexRecommendation>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub query_rewrites: Vec<QueryRewrite>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub node_analysis: BTreeMap<String, NodeAdvice>,
}

/// Structured comparison of two plans.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanComparison {
    #[serde(default, deserialize_with = "null_as_default")]
    pub summary: String,
    /// Usually `cost_diff` and `time_diff`; whatever else the model adds is kept.
    #[serde(default, deserialize_with = "null_as_default")]
    pub metrics_comparison: Map<String, Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub structural_changes: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub recommendation: String,
}

impl PlanComparison {
    pub fn cost_diff(&self) -> Option<&str> {
        self.metrics_comparison.get("cost_diff").and_then(Value::as_str)
    }

    pub fn time_diff(&self) -> Option<&str> {
        self.metrics_comparison.get("time_diff").and_then(Value::as_str)
    }
}

/// A result schema with a fixed skeleton for text that could not be parsed.
pub trait Skeleton: Sized {
    /// The skeleton populated with the unparsed model text.
    fn from_raw_text(raw: &str) -> Self;
}

impl Skeleton for PlanAnalysis {
    fn from_raw_text(raw: &str) -> Self {
        Self {
            overall_assessment: raw.to_string(),
            ..Self::default()
        }
    }
}

impl Skeleton for PlanComparison {
    fn from_raw_text(raw: &str) -> Self {
        Self {
            summary: raw.to_string(),
            ..Self::default()
        }
    }
}

/// Model output shaped into a schema, or the raw text when it was not a JSON object.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelOutput<T> {
    Structured(T),
    Degraded(String),
}

/// Single-plan analysis result.
pub type AnalysisResult = ModelOutput<PlanAnalysis>;

/// Two-plan comparison result.
pub type ComparisonResult = ModelOutput<PlanComparison>;

impl<T: DeserializeOwned> ModelOutput<T> {
    /// Extract and shape a completion. Never fails.
    pub fn from_completion(completion: &str) -> Self {
        match extract(completion) {
            Extracted::Json(value) => match serde_json::from_value(value) {
                Ok(parsed) => ModelOutput::Structured(parsed),
                Err(e) => {
                    debug!(error = %e, "Model JSON was not an object");
                    ModelOutput::Degraded(completion.to_string())
                }
            },
            Extracted::Raw(raw) => ModelOutput::Degraded(raw),
        }
    }
}

impl<T> ModelOutput<T> {
    pub fn is_degraded(&self) -> bool {
        matches!(self, ModelOutput::Degraded(_))
    }

    pub fn structured(&self) -> Option<&T> {
        match self {
            ModelOutput::Structured(value) => Some(value),
            ModelOutput::Degraded(_) => None,
        }
    }

    pub fn raw_text(&self) -> Option<&str> {
        match self {
            ModelOutput::Structured(_) => None,
            ModelOutput::Degraded(raw) => Some(raw),
        }
    }
}

impl<T: Skeleton + Clone> ModelOutput<T> {
    /// The full schema: parsed fields, or the skeleton around the raw text.
    pub fn to_skeleton(&self) -> T {
        match self {
            ModelOutput::Structured(value) => value.clone(),
            ModelOutput::Degraded(raw) => T::from_raw_text(raw),
        }
    }
}

#[derive(Serialize)]
struct Tagged<'a, T> {
    #[serde(flatten)]
    body: &'a T,
    degraded: bool,
}

/// Always serializes every schema key, plus `"degraded"`.
impl<T: Skeleton + Clone + Serialize> Serialize for ModelOutput<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ModelOutput::Structured(body) => Tagged {
                body,
                degraded: false,
            }
            .serialize(serializer),
            ModelOutput::Degraded(raw) => Tagged {
                body: &T::from_raw_text(raw),
                degraded: true,
            }
            .serialize(serializer),
        }
    }
}

// ============================================================================
// Response envelopes
// ============================================================================

/// Outcome of a single-plan analysis.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<AnalysisResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of a plan comparison.
#[derive(Debug, Clone, Serialize)]
pub struct ComparisonResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparison: Option<ComparisonResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of a chat turn.
#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AnalysisResponse {
    pub fn completed(analysis: AnalysisResult) -> Self {
        Self {
            success: true,
            analysis: Some(analysis),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            analysis: None,
            error: Some(error.into()),
        }
    }
}

impl ComparisonResponse {
    pub fn completed(comparison: ComparisonResult) -> Self {
        Self {
            success: true,
            comparison: Some(comparison),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            comparison: None,
            error: Some(error.into()),
        }
    }
}

impl ChatResponse {
    pub fn completed(reply: impl Into<String>) -> Self {
        Self {
            success: true,
            reply: Some(reply.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            reply: None,
            error: Some(error.into()),
        }
    }
}

// ============================================================================
// Chat
// ============================================================================

/// Speaker of a chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    #[serde(alias = "ai", alias = "model")]
    Assistant,
}

/// One visible turn of a plan conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    #[serde(alias = "content")]
    pub text: String,
}

impl ChatTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            text: text.into(),
        }
    }
}

impl From<&ChatTurn> for Message {
    fn from(turn: &ChatTurn) -> Self {
        let role = match turn.role {
            ChatRole::User => MessageRole::User,
            ChatRole::Assistant => MessageRole::Assistant,
        };
        Message {
            role,
            content: turn.text.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_analysis_from_fenced_json() {
        let completion = r#"Sure, here is the analysis:
```json
{
  "overall_assessment": "Sequential scan dominates",
  "bottlenecks": [{"node_type": "Seq Scan", "issue": "full scan of orders", "impact": "high"}],
  "index_recommendations": [{"table": "orders", "columns": ["customer_id"], "reason": "join key"}],
  "query_rewrites": [],
  "node_analysis": {"1": {"advice": "add index", "severity": "critical"}}
}
```"#;

        let result = AnalysisResult::from_completion(completion);
        let analysis = result.structured().unwrap();

        assert_eq!(analysis.overall_assessment, "Sequential scan dominates");
        assert_eq!(analysis.bottlenecks[0].impact, Severity::High);
        assert_eq!(analysis.index_recommendations[0].columns, vec!["customer_id"]);
        assert_eq!(analysis.node_analysis["1"].severity, Severity::Unknown);
    }

    #[test]
    fn test_analysis_non_object_degrades() {
        let result = AnalysisResult::from_completion("[1, 2, 3]");
        assert_eq!(result.raw_text(), Some("[1, 2, 3]"));

        let result = AnalysisResult::from_completion("\"just a string\"");
        assert!(result.is_degraded());
    }

    #[test]
    fn test_analysis_null_fields_stay_structured() {
        let result = AnalysisResult::from_completion(
            r#"{
              "overall_assessment": "Seq scan dominates",
              "bottlenecks": null,
              "index_recommendations": [{"table": "orders", "columns": ["customer_id"], "reason": null}],
              "query_rewrites": [{"suggestion": "use EXISTS", "benefit": null}],
              "node_analysis": {"1": {"advice": null, "severity": null}}
            }"#,
        );
        let analysis = result.structured().unwrap();

        assert_eq!(analysis.overall_assessment, "Seq scan dominates");
        assert!(analysis.bottlenecks.is_empty());
        assert_eq!(analysis.index_recommendations[0].table, "orders");
        assert_eq!(analysis.index_recommendations[0].reason, "");
        assert_eq!(analysis.query_rewrites[0].benefit, "");
        assert_eq!(analysis.node_analysis["1"], NodeAdvice::default());
    }

    #[test]
    fn test_analysis_missing_assessment_stays_structured() {
        let result = AnalysisResult::from_completion(
            r#"{"bottlenecks": [{"node_type": "Hash Join", "issue": "spills to disk", "impact": "high"}]}"#,
        );
        let analysis = result.structured().unwrap();

        assert_eq!(analysis.overall_assessment, "");
        assert_eq!(analysis.bottlenecks[0].impact, Severity::High);

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["degraded"], json!(false));
        assert_eq!(value["query_rewrites"], json!([]));
    }

    #[test]
    fn test_comparison_missing_summary_stays_structured() {
        let result = ComparisonResult::from_completion(
            r#"{"structural_changes": ["Seq Scan -> Index Scan"], "recommendation": null}"#,
        );
        let comparison = result.structured().unwrap();

        assert_eq!(comparison.summary, "");
        assert_eq!(comparison.structural_changes, vec!["Seq Scan -> Index Scan"]);
        assert_eq!(comparison.recommendation, "");
    }

    #[test]
    fn test_severity_ignores_case() {
        let parsed: Vec<Severity> =
            serde_json::from_value(json!(["High", "HIGH", " medium ", "Low", "critical", null, 3]))
                .unwrap();

        assert_eq!(
            parsed,
            vec![
                Severity::High,
                Severity::High,
                Severity::Medium,
                Severity::Low,
                Severity::Unknown,
                Severity::Unknown,
                Severity::Unknown
            ]
        );
        assert_eq!(serde_json::to_value(Severity::High).unwrap(), json!("high"));
    }

    #[test]
    fn test_degraded_analysis_serializes_skeleton() {
        let result = AnalysisResult::from_completion("The plan looks fine.");
        let value = serde_json::to_value(&result).unwrap();

        assert_eq!(
            value,
            json!({
                "overall_assessment": "The plan looks fine.",
                "bottlenecks": [],
                "index_recommendations": [],
                "query_rewrites": [],
                "node_analysis": {},
                "degraded": true
            })
        );
    }

    #[test]
    fn test_degraded_comparison_serializes_skeleton() {
        let result = ComparisonResult::from_completion("Plan B wins.");
        let value = serde_json::to_value(&result).unwrap();

        assert_eq!(
            value,
            json!({
                "summary": "Plan B wins.",
                "metrics_comparison": {},
                "structural_changes": [],
                "recommendation": "",
                "degraded": true
            })
        );
    }

    #[test]
    fn test_structured_comparison_accessors() {
        let result = ComparisonResult::from_completion(
            r#"{"summary": "B is cheaper", "metrics_comparison": {"cost_diff": "-40%", "rows": 12}, "structural_changes": ["Seq Scan -> Index Scan"], "recommendation": "Use B"}"#,
        );
        let comparison = result.structured().unwrap();

        assert_eq!(comparison.cost_diff(), Some("-40%"));
        assert_eq!(comparison.time_diff(), None);
        assert_eq!(comparison.metrics_comparison["rows"], json!(12));

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["degraded"], json!(false));
    }

    #[test]
    fn test_failed_response_has_no_fields() {
        let value = serde_json::to_value(AnalysisResponse::failed("quota exceeded")).unwrap();
        assert_eq!(value, json!({"success": false, "error": "quota exceeded"}));
    }

    #[test]
    fn test_chat_turn_aliases() {
        let turns: Vec<ChatTurn> = serde_json::from_value(json!([
            {"role": "user", "content": "why a seq scan?"},
            {"role": "ai", "content": "no usable index"},
            {"role": "assistant", "text": "..."}
        ]))
        .unwrap();

        assert_eq!(turns[0], ChatTurn::user("why a seq scan?"));
        assert_eq!(turns[1], ChatTurn::assistant("no usable index"));
        assert_eq!(Message::from(&turns[1]).role, MessageRole::Assistant);
    }
}
