//! Transient connections to the target PostgreSQL server.
//!
//! Nothing here is pooled: every call opens a fresh connection under a bounded
//! timeout and the caller closes it when done.

use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{Connection, Row};
use std::time::Duration;
use tracing::warn;

use crate::error::{DatabaseError, DatabaseResult};
use crate::session::ConnectionDescriptor;

const APPLICATION_NAME: &str = "pgplan-advisor";

/// Build driver options from a descriptor.
pub fn connect_options(
    descriptor: &ConnectionDescriptor,
    statement_timeout_ms: Option<u64>,
) -> PgConnectOptions {
    let options = PgConnectOptions::new_without_pgpass()
        .host(&descriptor.host)
        .port(descriptor.port)
        .username(&descriptor.username)
        .password(&descriptor.password)
        .database(&descriptor.database)
        .application_name(APPLICATION_NAME);

    match statement_timeout_ms {
        Some(ms) => options.options([("statement_timeout", ms.to_string())]),
        None => options,
    }
}

/// Open a connection, failing with [`DatabaseError::Timeout`] after `timeout`.
pub async fn open(
    descriptor: &ConnectionDescriptor,
    timeout: Duration,
    statement_timeout_ms: Option<u64>,
) -> DatabaseResult<PgConnection> {
    let options = connect_options(descriptor, statement_timeout_ms);

    tokio::time::timeout(timeout, PgConnection::connect_with(&options))
        .await
        .map_err(|_| DatabaseError::Timeout {
            timeout_secs: timeout.as_secs(),
        })?
        .map_err(classify_connect_error)
}

/// Close a connection, logging rather than propagating failures.
pub async fn close(conn: PgConnection) {
    if let Err(e) = conn.close().await {
        warn!(error = %e, "Failed to close database connection cleanly");
    }
}

/// Connect, fetch the server version and disconnect, all within `timeout`.
pub async fn probe(descriptor: &ConnectionDescriptor, timeout: Duration) -> DatabaseResult<String> {
    let attempt = async {
        let mut conn = open(descriptor, timeout, None).await?;
        let version = sqlx::query("SELECT version()")
            .fetch_one(&mut conn)
            .await
            .and_then(|row| row.try_get::<String, _>(0))
            .map_err(classify_connect_error);
        close(conn).await;
        version
    };

    tokio::time::timeout(timeout, attempt)
        .await
        .map_err(|_| DatabaseError::Timeout {
            timeout_secs: timeout.as_secs(),
        })?
}

/// Errors while establishing a session are always connectivity failures,
/// including authentication rejections.
pub(crate) fn classify_connect_error(err: sqlx::Error) -> DatabaseError {
    let message = match &err {
        sqlx::Error::Database(db) => db.message().to_string(),
        other => other.to_string(),
    };
    DatabaseError::Connectivity { message }
}

/// Split statement errors into engine rejections and infrastructure failures.
pub(crate) fn classify_query_error(err: sqlx::Error) -> DatabaseError {
    match err {
        sqlx::Error::Database(db) => DatabaseError::EngineRejected {
            message: db.message().to_string(),
            code: db.code().map(|c| c.into_owned()),
        },
        sqlx::Error::RowNotFound => DatabaseError::NoResult,
        err @ (sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnIndexOutOfBounds { .. }) => DatabaseError::MalformedPlan {
            message: err.to_string(),
        },
        err => DatabaseError::Connectivity {
            message: err.to_string(),
        },
    }
}
