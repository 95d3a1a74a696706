//! Centralized prompt definitions for plan analysis
//!
//! The system instructions fix the JSON shape the analysis layer expects back.
//! Keeping them together makes them easier to version alongside the result
//! types in [`crate::analysis`].

/// System instruction for single-plan analysis.
pub const ANALYZE_PLAN_PROMPT: &str = r#"You are an expert PostgreSQL query optimization assistant.
Analyze query execution plans and provide actionable optimization recommendations.
Focus on:
1. Identifying performance bottlenecks (seq scans, nested loops, etc.)
2. Suggesting indexes
3. Query rewrite suggestions
4. Cost analysis
5. Row estimate accuracy

Return your analysis in JSON format with these sections:
{
  "overall_assessment": "brief summary of query performance",
  "bottlenecks": [{"node_type": "...", "issue": "...", "impact": "high|medium|low"}],
  "index_recommendations": [{"table": "...", "columns": ["..."], "reason": "..."}],
  "query_rewrites": [{"suggestion": "...", "benefit": "..."}],
  "node_analysis": {"node_id": {"advice": "...", "severity": "high|medium|low"}}
}"#;

/// System instruction for comparing two plans.
pub const COMPARE_PLANS_PROMPT: &str = r#"You are an expert PostgreSQL query optimization assistant.
Compare two query execution plans (Plan A and Plan B) and analyze the differences.
Focus on:
1. Cost differences (Total Cost, Startup Cost)
2. Execution time differences (if available)
3. Structural differences (scan types, join types)
4. Why one is better than the other

Return your analysis in JSON format with these sections:
{
  "summary": "Which plan is better and why",
  "metrics_comparison": {
    "cost_diff": "Description of cost difference",
    "time_diff": "Description of time difference (if applicable)"
  },
  "structural_changes": ["Change 1", "Change 2"],
  "recommendation": "Final recommendation"
}"#;

/// System instruction for conversational follow-up on a plan.
pub const CHAT_PROMPT: &str = r#"You are an expert PostgreSQL query optimization assistant.
You are discussing a specific query execution plan with a user.
Answer their questions about the plan, explain specific nodes, or suggest optimizations.
Be concise, technical but accessible, and practical."#;

/// Fixed assistant turn that closes the chat priming exchange.
pub const CHAT_ACKNOWLEDGEMENT: &str =
    "I understand. I am ready to discuss this query plan with you.";

/// User prompt for single-plan analysis.
pub fn analyze_prompt(plan_json: &str, sql: Option<&str>) -> String {
    let query_info = sql
        .map(|q| format!("\nOriginal Query: {}", q))
        .unwrap_or_default();

    format!(
        "Analyze this PostgreSQL EXPLAIN output and provide optimization recommendations:\n\n\
         {}{}\n\n\
         Provide a detailed JSON response following the schema specified in your instructions.",
        plan_json, query_info
    )
}

/// User prompt for a two-plan comparison.
pub fn compare_prompt(
    plan_a_json: &str,
    plan_b_json: &str,
    sql_a: Option<&str>,
    sql_b: Option<&str>,
) -> String {
    let qa = sql_a.map(|q| format!("\nQuery A: {}", q)).unwrap_or_default();
    let qb = sql_b.map(|q| format!("\nQuery B: {}", q)).unwrap_or_default();

    format!(
        "Compare these two PostgreSQL query plans:\n\n\
         PLAN A:{}\n{}\n\n\
         PLAN B:{}\n{}\n\n\
         Provide a detailed JSON comparison following the schema.",
        qa, plan_a_json, qb, plan_b_json
    )
}

/// First (user) turn of every chat: the plan under discussion.
pub fn chat_context(plan_json: &str, sql: Option<&str>) -> String {
    let query_context = sql
        .map(|q| format!("Original Query: {}\n", q))
        .unwrap_or_default();

    format!(
        "Here is the query plan we are discussing:\n{}\n{}",
        plan_json, query_context
    )
}
