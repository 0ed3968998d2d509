//! Session management
//!
//! Each session's conversation state lives in a [`SessionStore`] between
//! requests. Operations on one session id are serialized behind a
//! per-session lock: load the blob, resume an engine, operate, save.

use crate::db::{Database, DbError};
use crate::engine::{
    ConversationEngine, ConversationState, EngineConfig, EngineError, LoadSummary,
    ResponseOutcome, StateRestoreError, StateSnapshot,
};
use crate::evaluator::ResponseEvaluator;
use crate::scenario::ScenarioCatalog;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

// ============================================================================
// Stores
// ============================================================================

/// Storage for serialized conversation state, keyed by session id
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Get the state blob, or `None` if absent or expired
    async fn load(&self, session_id: &str) -> Result<Option<String>, String>;

    async fn save(&self, session_id: &str, blob: &str) -> Result<(), String>;

    /// Remove a session. Returns whether anything was stored.
    async fn clear(&self, session_id: &str) -> Result<bool, String>;

    /// Drop every expired session. Returns how many were removed.
    async fn purge_expired(&self) -> Result<usize, String>;
}

/// Process-local store
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, (String, DateTime<Utc>)>>,
    ttl: Duration,
}

impl InMemorySessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl,
        }
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<String>, String> {
        let mut sessions = self.sessions.lock().unwrap();
        match sessions.get(session_id) {
            Some((_, updated)) if *updated < Utc::now() - self.ttl => {
                sessions.remove(session_id);
                Ok(None)
            }
            Some((blob, _)) => Ok(Some(blob.clone())),
            None => Ok(None),
        }
    }

    async fn save(&self, session_id: &str, blob: &str) -> Result<(), String> {
        self.sessions
            .lock()
            .unwrap()
            .insert(session_id.to_string(), (blob.to_string(), Utc::now()));
        Ok(())
    }

    async fn clear(&self, session_id: &str) -> Result<bool, String> {
        Ok(self.sessions.lock().unwrap().remove(session_id).is_some())
    }

    async fn purge_expired(&self) -> Result<usize, String> {
        let cutoff = Utc::now() - self.ttl;
        let mut sessions = self.sessions.lock().unwrap();
        let before = sessions.len();
        sessions.retain(|_, (_, updated)| *updated >= cutoff);
        Ok(before - sessions.len())
    }
}

/// `SQLite`-backed store
pub struct DatabaseSessionStore {
    db: Database,
    ttl: Duration,
}

impl DatabaseSessionStore {
    pub fn new(db: Database, ttl: Duration) -> Self {
        Self { db, ttl }
    }
}

#[async_trait]
impl SessionStore for DatabaseSessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<String>, String> {
        let record = self.db.get_session(session_id).map_err(|e| e.to_string())?;
        match record {
            Some(record) if record.updated_at < Utc::now() - self.ttl => {
                self.clear(session_id).await?;
                Ok(None)
            }
            Some(record) => Ok(Some(record.state)),
            None => Ok(None),
        }
    }

    async fn save(&self, session_id: &str, blob: &str) -> Result<(), String> {
        self.db
            .put_session(session_id, blob)
            .map_err(|e| e.to_string())
    }

    async fn clear(&self, session_id: &str) -> Result<bool, String> {
        match self.db.delete_session(session_id) {
            Ok(()) => Ok(true),
            Err(DbError::SessionNotFound(_)) => Ok(false),
            Err(e) => Err(e.to_string()),
        }
    }

    async fn purge_expired(&self) -> Result<usize, String> {
        self.db
            .purge_sessions_before(Utc::now() - self.ttl)
            .map_err(|e| e.to_string())
    }
}

// ============================================================================
// Manager
// ============================================================================

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Unknown scenario: {0}")]
    UnknownScenario(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("Session store error: {0}")]
    Store(String),
    #[error("Cannot serialize session state: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// What a session currently holds
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub has_state: bool,
    pub scenario_name: Option<String>,
    pub completed: bool,
}

/// Runs engine operations for many sessions against a shared catalog
pub struct SessionManager {
    catalog: Arc<ScenarioCatalog>,
    evaluator: Arc<ResponseEvaluator>,
    engine_config: EngineConfig,
    store: Arc<dyn SessionStore>,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl SessionManager {
    pub fn new(
        catalog: Arc<ScenarioCatalog>,
        evaluator: Arc<ResponseEvaluator>,
        engine_config: EngineConfig,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            catalog,
            evaluator,
            engine_config,
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn catalog(&self) -> &ScenarioCatalog {
        &self.catalog
    }

    /// Wait for exclusive access to a session
    async fn lock(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap();
            // Entries only the map still references are idle
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Rebuild the session's engine from its stored state. A blob that can
    /// no longer be resumed yields an empty engine.
    async fn restore(&self, session_id: &str) -> Result<ConversationEngine, SessionError> {
        let mut engine = ConversationEngine::new(self.evaluator.clone(), self.engine_config);
        let Some(blob) = self
            .store
            .load(session_id)
            .await
            .map_err(SessionError::Store)?
        else {
            return Ok(engine);
        };

        let resumed = ConversationState::from_blob(&blob)
            .map_err(EngineError::from)
            .and_then(|state| match self.catalog.get(&state.scenario_id) {
                Some(scenario) => engine.resume(scenario, state),
                None => Err(StateRestoreError::ScenarioUnavailable(state.scenario_id).into()),
            });
        if let Err(e) = resumed {
            tracing::warn!(session = %session_id, error = %e, "Discarding unrestorable session state");
            engine.clear();
        }
        Ok(engine)
    }

    async fn persist(
        &self,
        session_id: &str,
        engine: &ConversationEngine,
    ) -> Result<(), SessionError> {
        match engine.export_state()? {
            Some(blob) => self
                .store
                .save(session_id, &blob)
                .await
                .map_err(SessionError::Store),
            None => self
                .store
                .clear(session_id)
                .await
                .map(|_| ())
                .map_err(SessionError::Store),
        }
    }

    pub async fn load_scenario(
        &self,
        session_id: &str,
        scenario_name: &str,
    ) -> Result<(LoadSummary, StateSnapshot), SessionError> {
        let scenario = self
            .catalog
            .get(scenario_name)
            .ok_or_else(|| SessionError::UnknownScenario(scenario_name.to_string()))?;
        let _guard = self.lock(session_id).await;
        let mut engine = self.restore(session_id).await?;
        let summary = engine.load_scenario(scenario)?;
        self.persist(session_id, &engine).await?;
        tracing::info!(session = %session_id, scenario = %scenario_name, "Session loaded scenario");
        Ok((summary, engine.get_state()))
    }

    pub async fn current_prompt(&self, session_id: &str) -> Result<String, SessionError> {
        let _guard = self.lock(session_id).await;
        let engine = self.restore(session_id).await?;
        Ok(engine.get_current_prompt()?)
    }

    pub async fn respond(
        &self,
        session_id: &str,
        text: &str,
    ) -> Result<ResponseOutcome, SessionError> {
        let _guard = self.lock(session_id).await;
        let mut engine = self.restore(session_id).await?;
        let outcome = engine.process_student_response(text).await?;
        if !matches!(outcome, ResponseOutcome::Unavailable { .. }) {
            self.persist(session_id, &engine).await?;
        }
        Ok(outcome)
    }

    pub async fn state(&self, session_id: &str) -> Result<StateSnapshot, SessionError> {
        let _guard = self.lock(session_id).await;
        Ok(self.restore(session_id).await?.get_state())
    }

    pub async fn reset(&self, session_id: &str) -> Result<StateSnapshot, SessionError> {
        let _guard = self.lock(session_id).await;
        let mut engine = self.restore(session_id).await?;
        if engine.reset()?.is_some() {
            self.persist(session_id, &engine).await?;
        }
        Ok(engine.get_state())
    }

    /// Forget everything stored for a session
    pub async fn clear(&self, session_id: &str) -> Result<bool, SessionError> {
        let _guard = self.lock(session_id).await;
        self.store
            .clear(session_id)
            .await
            .map_err(SessionError::Store)
    }

    pub async fn info(&self, session_id: &str) -> Result<SessionInfo, SessionError> {
        let _guard = self.lock(session_id).await;
        let engine = self.restore(session_id).await?;
        let state = engine.get_state();
        Ok(SessionInfo {
            session_id: session_id.to_string(),
            has_state: engine.state().is_some(),
            scenario_name: state.scenario_name,
            completed: state.completed,
        })
    }

    pub async fn purge_expired(&self) -> Result<usize, SessionError> {
        self.store.purge_expired().await.map_err(SessionError::Store)
    }
}
