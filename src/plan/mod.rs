//! Execution plan model and retrieval.
//!
//! [`PlanNode`] mirrors one node of PostgreSQL's `EXPLAIN (FORMAT JSON)`
//! output, keeping the engine's own key names on the wire so plans can be
//! round-tripped to clients and prompts unchanged. [`QueryPlan`] is the
//! top-level object wrapping the root node with its timing information.

mod executor;

pub use executor::*;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{DatabaseError, DatabaseResult};

/// Nested string/array layers unwrapped before giving up on a document.
const MAX_UNWRAP_DEPTH: usize = 4;

/// Estimated cost of a plan node, in planner units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanCost {
    #[serde(rename = "Startup Cost", default)]
    pub startup: f64,
    #[serde(rename = "Total Cost", default)]
    pub total: f64,
}

/// Planned and (under ANALYZE) actual row counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanRows {
    #[serde(rename = "Plan Rows", default)]
    pub planned: u64,
    /// Per-loop average; fractional on recent server versions.
    #[serde(
        rename = "Actual Rows",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub actual: Option<f64>,
}

/// One node of an execution plan tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanNode {
    #[serde(rename = "Node Type")]
    pub node_type: String,
    #[serde(flatten)]
    pub cost: PlanCost,
    #[serde(flatten)]
    pub rows: PlanRows,
    /// Child nodes in execution order.
    #[serde(rename = "Plans", default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<PlanNode>,
    /// Every other key the engine reported, verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A complete explain result: the root node plus statement-level fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPlan {
    #[serde(rename = "Plan")]
    pub plan: PlanNode,
    #[serde(
        rename = "Planning Time",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub planning_time_ms: Option<f64>,
    #[serde(
        rename = "Execution Time",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub execution_time_ms: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PlanNode {
    pub fn new(node_type: impl Into<String>) -> Self {
        Self {
            node_type: node_type.into(),
            cost: PlanCost::default(),
            rows: PlanRows::default(),
            children: Vec::new(),
            extra: Map::new(),
        }
    }

    /// Pre-order traversal, children visited in execution order.
    pub fn iter(&self) -> PlanIter<'_> {
        PlanIter { stack: vec![self] }
    }

    /// Total number of nodes in this subtree.
    pub fn node_count(&self) -> usize {
        self.iter().count()
    }

    /// Height of this subtree (a leaf has depth 1).
    pub fn depth(&self) -> usize {
        1 + self.children.iter().map(PlanNode::depth).max().unwrap_or(0)
    }

    /// Relation the node reads, when it is a scan.
    pub fn relation_name(&self) -> Option<&str> {
        self.extra.get("Relation Name").and_then(Value::as_str)
    }
}

/// Iterator returned by [`PlanNode::iter`].
pub struct PlanIter<'a> {
    stack: Vec<&'a PlanNode>,
}

impl<'a> Iterator for PlanIter<'a> {
    type Item = &'a PlanNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}

impl From<PlanNode> for QueryPlan {
    fn from(plan: PlanNode) -> Self {
        Self {
            plan,
            planning_time_ms: None,
            execution_time_ms: None,
            extra: Map::new(),
        }
    }
}

impl QueryPlan {
    /// Root node of the tree.
    pub fn root(&self) -> &PlanNode {
        &self.plan
    }

    /// Interpret an explain document in any of the shapes it shows up in.
    ///
    /// Accepts the raw column value (possibly string-encoded), the one-element
    /// array the server returns, the object inside it, or a bare node.
    pub fn from_document(document: Value) -> DatabaseResult<Self> {
        Self::unwrap_document(document, 0)
    }

    fn unwrap_document(document: Value, depth: usize) -> DatabaseResult<Self> {
        if depth > MAX_UNWRAP_DEPTH {
            return Err(DatabaseError::MalformedPlan {
                message: "explain document is nested too deeply".to_string(),
            });
        }

        match document {
            Value::String(encoded) => {
                let inner: Value =
                    serde_json::from_str(&encoded).map_err(|e| DatabaseError::MalformedPlan {
                        message: format!("plan text is not JSON: {}", e),
                    })?;
                Self::unwrap_document(inner, depth + 1)
            }
            Value::Array(items) => {
                let first = items.into_iter().next().ok_or(DatabaseError::NoResult)?;
                Self::unwrap_document(first, depth + 1)
            }
            Value::Object(map) if map.contains_key("Plan") => {
                serde_json::from_value(Value::Object(map)).map_err(malformed)
            }
            Value::Object(map) if map.contains_key("Node Type") => {
                serde_json::from_value::<PlanNode>(Value::Object(map))
                    .map(QueryPlan::from)
                    .map_err(malformed)
            }
            Value::Null => Err(DatabaseError::NoResult),
            other => Err(DatabaseError::MalformedPlan {
                message: format!("expected an explain document, found {}", kind(&other)),
            }),
        }
    }
}

fn malformed(err: serde_json::Error) -> DatabaseError {
    DatabaseError::MalformedPlan {
        message: err.to_string(),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object without \"Plan\" or \"Node Type\"",
    }
}
