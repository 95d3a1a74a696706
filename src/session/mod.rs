//! Session-scoped connection registry.
//!
//! Turns stateless requests into short-lived authenticated database sessions.
//! A successful [`ConnectionRegistry::connect`] probes the target, closes the
//! probe connection and stores only the [`ConnectionDescriptor`] under a fresh
//! [`SessionId`]. Every later operation re-establishes connectivity from the
//! descriptor.
//!
//! # Thread Safety
//!
//! Sessions live in a `DashMap`, so concurrent inserts of new keys and lookups
//! never contend on a global lock. Descriptors are immutable once stored.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{DatabaseConfig, SessionConfig};
use crate::database;
use crate::error::{DatabaseResult, SessionError, SessionResult};

const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

fn default_port() -> u16 {
    5432
}

/// Everything needed to open a connection to the target database.
///
/// The secret is held in memory for the lifetime of the session. It is never
/// serialized back out and `Debug` redacts it.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct ConnectionDescriptor {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default, alias = "secret")]
    pub password: String,
    #[serde(alias = "database_name")]
    pub database: String,
}

impl ConnectionDescriptor {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
            database: database.into(),
        }
    }
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .finish()
    }
}

/// Opaque session token (UUID v4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Mint a new random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(SessionId)
            .map_err(|_| SessionError::UnknownSession {
                session_id: s.to_string(),
            })
    }
}

/// A registered session. Never mutated after creation.
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub descriptor: Arc<ConnectionDescriptor>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Whether the session has outlived `ttl` as of `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => now.signed_duration_since(self.created_at) >= ttl,
            // A TTL too large for chrono never elapses.
            Err(_) => false,
        }
    }
}

/// Outcome of a successful connect.
#[derive(Debug, Clone)]
pub struct Connected {
    pub session_id: SessionId,
    /// Version string reported by the liveness probe.
    pub server_version: String,
}

/// Process-wide session store.
pub struct ConnectionRegistry {
    sessions: DashMap<SessionId, Arc<Session>>,
    ttl: Option<Duration>,
    connect_timeout: Duration,
}

impl ConnectionRegistry {
    pub fn new(session: &SessionConfig, database: &DatabaseConfig) -> Self {
        Self::with_settings(session.ttl(), database.connect_timeout())
    }

    pub fn with_settings(ttl: Option<Duration>, connect_timeout: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
            connect_timeout,
        }
    }

    /// Probe the target and register a session on success.
    ///
    /// Nothing is stored when the probe fails or times out.
    pub async fn connect(&self, descriptor: ConnectionDescriptor) -> DatabaseResult<Connected> {
        debug!(
            host = %descriptor.host,
            port = descriptor.port,
            database = %descriptor.database,
            "Probing database"
        );

        let server_version = database::probe(&descriptor, self.connect_timeout).await?;

        let host = descriptor.host.clone();
        let db = descriptor.database.clone();
        let session_id = self.register(descriptor);

        info!(
            session_id = %session_id,
            host = %host,
            database = %db,
            active_sessions = self.sessions.len(),
            "Session registered"
        );

        Ok(Connected {
            session_id,
            server_version,
        })
    }

    /// Store a descriptor under a freshly minted identifier.
    pub fn register(&self, descriptor: ConnectionDescriptor) -> SessionId {
        let descriptor = Arc::new(descriptor);
        loop {
            let id = SessionId::new();
            match self.sessions.entry(id) {
                Entry::Vacant(entry) => {
                    entry.insert(Arc::new(Session {
                        id,
                        descriptor: Arc::clone(&descriptor),
                        created_at: Utc::now(),
                    }));
                    return id;
                }
                Entry::Occupied(_) => {
                    warn!(session_id = %id, "Session ID collision, minting another");
                }
            }
        }
    }

    /// Look up the descriptor for a session token.
    ///
    /// Unknown, malformed and expired tokens all fail with
    /// [`SessionError::UnknownSession`].
    pub fn resolve(&self, session_id: &str) -> SessionResult<Arc<ConnectionDescriptor>> {
        let id: SessionId = session_id.parse()?;
        let unknown = || SessionError::UnknownSession {
            session_id: session_id.to_string(),
        };

        let session = self
            .sessions
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(unknown)?;

        if let Some(ttl) = self.ttl {
            let now = Utc::now();
            if session.is_expired_at(now, ttl) {
                self.sessions
                    .remove_if(&id, |_, s| s.is_expired_at(now, ttl));
                debug!(session_id = %id, "Session expired on lookup");
                return Err(unknown());
            }
        }

        Ok(Arc::clone(&session.descriptor))
    }

    /// Remove a session. Returns whether it existed.
    pub fn evict(&self, session_id: &str) -> bool {
        let Ok(id) = session_id.parse::<SessionId>() else {
            return false;
        };
        let removed = self.sessions.remove(&id).is_some();
        if removed {
            info!(session_id = %id, "Session evicted");
        }
        removed
    }

    /// Drop every session older than the TTL. Returns the number removed.
    pub fn evict_expired(&self) -> usize {
        self.evict_expired_at(Utc::now())
    }

    /// Same as [`evict_expired`](Self::evict_expired) against an explicit clock.
    pub fn evict_expired_at(&self, now: DateTime<Utc>) -> usize {
        let Some(ttl) = self.ttl else {
            return 0;
        };

        let mut removed = 0;
        self.sessions.retain(|_, session| {
            let keep = !session.is_expired_at(now, ttl);
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Periodically evict expired sessions until `shutdown` fires.
    ///
    /// Returns `None` when the registry has no TTL. Intervals shorter than
    /// one second are raised to one second.
    pub fn spawn_sweeper(
        registry: Arc<Self>,
        every: Duration,
        shutdown: CancellationToken,
    ) -> Option<JoinHandle<()>> {
        if registry.ttl.is_none() {
            return None;
        }

        let every = every.max(MIN_SWEEP_INTERVAL);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = registry.evict_expired();
                        if evicted > 0 {
                            info!(
                                evicted,
                                remaining = registry.len(),
                                "Evicted expired sessions"
                            );
                        }
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
        }))
    }
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("sessions", &self.sessions.len())
            .field("ttl", &self.ttl)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor() -> ConnectionDescriptor {
        ConnectionDescriptor::new("db.internal", 5432, "analyst", "hunter2", "orders")
    }

    fn registry(ttl: Option<Duration>) -> ConnectionRegistry {
        ConnectionRegistry::with_settings(ttl, Duration::from_secs(10))
    }

    #[test]
    fn test_session_id_is_uuid_v4() {
        let id = SessionId::new();
        let parsed = Uuid::parse_str(&id.to_string()).unwrap();
        assert_eq!(parsed.get_version(), Some(uuid::Version::Random));
    }

    #[test]
    fn test_session_id_parse_rejects_garbage() {
        let err = "not-a-session".parse::<SessionId>().unwrap_err();
        assert!(matches!(
            err,
            SessionError::UnknownSession { session_id } if session_id == "not-a-session"
        ));
    }

    #[test]
    fn test_descriptor_debug_redacts_password() {
        let debug = format!("{:?}", descriptor());
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
        assert!(debug.contains("db.internal"));
    }

    #[test]
    fn test_descriptor_deserialize_defaults() {
        let d: ConnectionDescriptor = serde_json::from_value(json!({
            "host": "localhost",
            "username": "postgres",
            "database": "app"
        }))
        .unwrap();
        assert_eq!(d.port, 5432);
        assert_eq!(d.password, "");
    }

    #[test]
    fn test_descriptor_deserialize_aliases() {
        let d: ConnectionDescriptor = serde_json::from_value(json!({
            "host": "localhost",
            "port": 6543,
            "username": "postgres",
            "secret": "pw",
            "database_name": "app"
        }))
        .unwrap();
        assert_eq!(d.port, 6543);
        assert_eq!(d.password, "pw");
        assert_eq!(d.database, "app");
    }

    #[test]
    fn test_register_then_resolve() {
        let registry = registry(None);
        let id = registry.register(descriptor());

        let resolved = registry.resolve(&id.to_string()).unwrap();
        assert_eq!(*resolved, descriptor());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_resolve_never_issued() {
        let registry = registry(None);
        registry.register(descriptor());

        let result = registry.resolve(&Uuid::new_v4().to_string());
        assert!(matches!(result, Err(SessionError::UnknownSession { .. })));
    }

    #[test]
    fn test_evict_removes_session() {
        let registry = registry(None);
        let id = registry.register(descriptor()).to_string();

        assert!(registry.evict(&id));
        assert!(!registry.evict(&id));
        assert!(!registry.evict("garbage"));
        assert!(registry.resolve(&id).is_err());
    }

    #[test]
    fn test_session_expiry_boundary() {
        let created_at = Utc::now();
        let session = Session {
            id: SessionId::new(),
            descriptor: Arc::new(descriptor()),
            created_at,
        };
        let ttl = Duration::from_secs(60);

        assert!(!session.is_expired_at(created_at + chrono::Duration::seconds(59), ttl));
        assert!(session.is_expired_at(created_at + chrono::Duration::seconds(60), ttl));
    }

    #[test]
    fn test_evict_expired_at() {
        let registry = registry(Some(Duration::from_secs(60)));
        registry.register(descriptor());
        registry.register(descriptor());

        assert_eq!(registry.evict_expired_at(Utc::now()), 0);
        assert_eq!(registry.len(), 2);

        let later = Utc::now() + chrono::Duration::seconds(120);
        assert_eq!(registry.evict_expired_at(later), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_no_ttl_never_expires() {
        let registry = registry(None);
        registry.register(descriptor());

        let far_future = Utc::now() + chrono::Duration::days(365);
        assert_eq!(registry.evict_expired_at(far_future), 0);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_resolve_expired_session_fails() {
        let registry = registry(Some(Duration::ZERO));
        let id = registry.register(descriptor()).to_string();

        assert!(matches!(
            registry.resolve(&id),
            Err(SessionError::UnknownSession { .. })
        ));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_sweeper_not_spawned_without_ttl() {
        let registry = Arc::new(registry(None));
        let handle = ConnectionRegistry::spawn_sweeper(
            registry,
            Duration::from_millis(10),
            CancellationToken::new(),
        );
        assert!(handle.is_none());
    }

    #[tokio::test]
    async fn test_sweeper_accepts_zero_interval() {
        let registry = Arc::new(registry(Some(Duration::ZERO)));
        registry.register(descriptor());
        let shutdown = CancellationToken::new();

        let handle = ConnectionRegistry::spawn_sweeper(
            Arc::clone(&registry),
            Duration::ZERO,
            shutdown.clone(),
        )
        .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(registry.is_empty());
        assert!(!handle.is_finished());

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_shutdown() {
        let registry = Arc::new(registry(Some(Duration::ZERO)));
        registry.register(descriptor());
        let shutdown = CancellationToken::new();

        let handle = ConnectionRegistry::spawn_sweeper(
            Arc::clone(&registry),
            Duration::from_millis(10),
            shutdown.clone(),
        )
        .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(registry.is_empty());

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
