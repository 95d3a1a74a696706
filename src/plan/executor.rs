use serde_json::Value;
use sqlx::postgres::PgConnection;
use sqlx::Row;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::QueryPlan;
use crate::config::DatabaseConfig;
use crate::database;
use crate::error::{DatabaseError, DatabaseResult};
use crate::session::ConnectionDescriptor;

/// Runs `EXPLAIN` against a session's database on a fresh connection.
#[derive(Debug, Clone)]
pub struct PlanExecutor {
    connect_timeout: Duration,
    statement_timeout_ms: Option<u64>,
}

impl PlanExecutor {
    pub fn new(config: &DatabaseConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            statement_timeout_ms: config.statement_timeout_ms,
        }
    }

    /// The explain command for `sql`, which is embedded verbatim.
    ///
    /// With `analyze` the statement is actually executed, so DML has side
    /// effects.
    pub fn explain_command(sql: &str, analyze: bool) -> String {
        if analyze {
            format!("EXPLAIN (ANALYZE, COSTS, VERBOSE, BUFFERS, FORMAT JSON) {}", sql)
        } else {
            format!("EXPLAIN (COSTS, VERBOSE, BUFFERS, FORMAT JSON) {}", sql)
        }
    }

    /// Explain `sql` and return the parsed plan.
    ///
    /// The connection is closed on every exit path; if the future is dropped
    /// the socket goes with it.
    pub async fn explain(
        &self,
        descriptor: &ConnectionDescriptor,
        sql: &str,
        analyze: bool,
    ) -> DatabaseResult<QueryPlan> {
        let start = Instant::now();
        let command = Self::explain_command(sql, analyze);

        if analyze {
            debug!(
                database = %descriptor.database,
                "Running EXPLAIN ANALYZE; the statement will execute"
            );
        }

        let mut conn =
            database::open(descriptor, self.connect_timeout, self.statement_timeout_ms).await?;
        let result = fetch_plan(&mut conn, &command).await;
        database::close(conn).await;

        let latency_ms = start.elapsed().as_millis();
        match &result {
            Ok(plan) => info!(
                database = %descriptor.database,
                analyze,
                root = %plan.root().node_type,
                nodes = plan.root().node_count(),
                total_cost = plan.root().cost.total,
                latency_ms,
                "EXPLAIN completed"
            ),
            Err(e) if e.is_engine_rejection() => warn!(
                database = %descriptor.database,
                error = %e,
                latency_ms,
                "EXPLAIN rejected by engine"
            ),
            Err(e) => error!(
                database = %descriptor.database,
                error = %e,
                latency_ms,
                "EXPLAIN failed"
            ),
        }

        result
    }
}

async fn fetch_plan(conn: &mut PgConnection, command: &str) -> DatabaseResult<QueryPlan> {
    let row = sqlx::query(command)
        .fetch_optional(&mut *conn)
        .await
        .map_err(database::classify_query_error)?
        .ok_or(DatabaseError::NoResult)?;

    let document: Value = row.try_get(0).map_err(database::classify_query_error)?;
    QueryPlan::from_document(document)
}
