//! Conversation sessions.
//!
//! A [`Session`] holds one conversation's turn history and usage counters.
//! The [`SessionStore`] is an explicit keyed store owned by the host
//! application and handed to the orchestrator on every call; there is no
//! process-wide session registry.
//!
//! Each session sits behind its own async mutex. The orchestrator holds that
//! lock for the whole of a query, so a session never runs two queries at
//! once, while different sessions proceed independently.

use crate::models::{AccessLevel, ConversationTurn};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::Mutex;

/// Unique session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generates a fresh random id.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Running usage counters for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    /// Queries that produced an answer.
    pub queries_answered: u64,
    /// Tool invocations keyed by tool name.
    pub tool_invocations: BTreeMap<String, u64>,
    /// Total wall-clock time spent answering, in milliseconds.
    pub cumulative_latency_ms: u64,
}

impl SessionStats {
    /// Records one answered query.
    pub fn record_query<'a>(
        &mut self,
        tools: impl IntoIterator<Item = &'a str>,
        latency: Duration,
    ) {
        self.queries_answered += 1;
        for tool in tools {
            *self.tool_invocations.entry(tool.to_string()).or_insert(0) += 1;
        }
        let latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.cumulative_latency_ms = self.cumulative_latency_ms.saturating_add(latency_ms);
    }

    /// Total tool invocations across all tools.
    #[must_use]
    pub fn total_tool_invocations(&self) -> u64 {
        self.tool_invocations.values().sum()
    }

    /// Number of distinct tools used.
    #[must_use]
    pub fn distinct_tools(&self) -> usize {
        self.tool_invocations.len()
    }

    /// Cumulative latency.
    #[must_use]
    pub const fn cumulative_latency(&self) -> Duration {
        Duration::from_millis(self.cumulative_latency_ms)
    }

    /// Mean latency per answered query; zero before the first answer.
    #[must_use]
    pub fn mean_latency(&self) -> Duration {
        if self.queries_answered == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(self.cumulative_latency_ms / self.queries_answered)
    }
}

/// One conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    id: SessionId,
    access_level: AccessLevel,
    created_at: DateTime<Utc>,
    turns: Vec<ConversationTurn>,
    stats: SessionStats,
}

impl Session {
    /// Creates an empty session.
    #[must_use]
    pub fn new(id: SessionId, access_level: AccessLevel) -> Self {
        Self {
            id,
            access_level,
            created_at: Utc::now(),
            turns: Vec::new(),
            stats: SessionStats::default(),
        }
    }

    /// Session id.
    #[must_use]
    pub const fn id(&self) -> &SessionId {
        &self.id
    }

    /// Access level fixed at creation.
    #[must_use]
    pub const fn access_level(&self) -> AccessLevel {
        self.access_level
    }

    /// Creation time.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Turn history, oldest first.
    #[must_use]
    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    /// Usage counters.
    #[must_use]
    pub const fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Appends a completed query's turns and updates the counters.
    ///
    /// This is the only way turns enter a session, so a query is recorded
    /// entirely or not at all.
    pub(crate) fn commit<'a>(
        &mut self,
        turns: Vec<ConversationTurn>,
        tools: impl IntoIterator<Item = &'a str>,
        latency: Duration,
    ) {
        self.turns.extend(turns);
        self.stats.record_query(tools, latency);
    }

    /// Clears the turn history. Id, access level and counters are kept.
    pub fn clear_history(&mut self) {
        self.turns.clear();
    }

    /// Serializes the session to an ordered JSON turn log.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_turn_log(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::OperationFailed {
            operation: "serialize_session".to_string(),
            cause: e.to_string(),
        })
    }

    /// Restores a session from a turn log written by [`Session::to_turn_log`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the log is malformed.
    pub fn from_turn_log(log: &str) -> Result<Self> {
        serde_json::from_str(log)
            .map_err(|e| Error::InvalidInput(format!("malformed session turn log: {e}")))
    }
}

type SessionHandle = Arc<Mutex<Session>>;

/// Keyed store of live sessions.
///
/// Cloning the store yields another handle to the same sessions.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<SessionId, SessionHandle>>>,
}

impl SessionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<SessionId, SessionHandle>> {
        self.sessions.read().unwrap_or_else(|poisoned| {
            tracing::warn!("Session store lock poisoned, recovering");
            PoisonError::into_inner(poisoned)
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<SessionId, SessionHandle>> {
        self.sessions.write().unwrap_or_else(|poisoned| {
            tracing::warn!("Session store lock poisoned, recovering");
            PoisonError::into_inner(poisoned)
        })
    }

    /// Opens a new session with a generated id.
    pub fn open(&self, access_level: AccessLevel) -> SessionId {
        let id = SessionId::generate();
        self.insert(Session::new(id.clone(), access_level));
        id
    }

    /// Opens the session with `id`, creating it at `access_level` if absent.
    ///
    /// An existing session keeps the level it was created with.
    pub fn open_with_id(&self, id: impl Into<SessionId>, access_level: AccessLevel) -> SessionId {
        let id = id.into();
        self.write().entry(id.clone()).or_insert_with(|| {
            tracing::debug!(session_id = %id, level = access_level.as_str(), "Opened session");
            Arc::new(Mutex::new(Session::new(id.clone(), access_level)))
        });
        id
    }

    /// Adds a restored session, replacing any session with the same id.
    pub fn insert(&self, session: Session) -> SessionId {
        let id = session.id().clone();
        self.write()
            .insert(id.clone(), Arc::new(Mutex::new(session)));
        id
    }

    /// Returns the lock guarding one session.
    pub(crate) fn handle(&self, id: &SessionId) -> Result<SessionHandle> {
        self.read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))
    }

    /// Returns a copy of the session.
    ///
    /// Waits for any in-flight query on the session to finish.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionNotFound`] if the id is unknown.
    pub async fn get(&self, id: &SessionId) -> Result<Session> {
        let handle = self.handle(id)?;
        let session = handle.lock().await;
        Ok(session.clone())
    }

    /// Clears a session's turn history, keeping its id and counters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionNotFound`] if the id is unknown.
    pub async fn reset(&self, id: &SessionId) -> Result<()> {
        let handle = self.handle(id)?;
        handle.lock().await.clear_history();
        tracing::debug!(session_id = %id, "Session history cleared");
        Ok(())
    }

    /// Ends a session. Returns true if it existed.
    pub fn remove(&self, id: &SessionId) -> bool {
        self.write().remove(id).is_some()
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Returns true if no sessions are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
