//! Database module for Chat Buddy
//!
//! Persists serialized conversation state per session.

mod schema;

pub use schema::*;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Session not found: {0}")]
    SessionNotFound(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&self) -> DbResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    // ==================== Session Operations ====================

    /// Insert or replace the state blob of a session
    pub fn put_session(&self, session_id: &str, state: &str) -> DbResult<()> {
        let conn = self.conn.lock().unwrap();
        let now = timestamp(Utc::now());
        conn.execute(
            "INSERT INTO sessions (session_id, state, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(session_id) DO UPDATE SET state = ?2, updated_at = ?3",
            params![session_id, state, now],
        )?;
        Ok(())
    }

    /// Get a session by ID
    pub fn get_session(&self, session_id: &str) -> DbResult<Option<SessionRecord>> {
        let conn = self.conn.lock().unwrap();
        let record = conn
            .query_row(
                "SELECT session_id, state, created_at, updated_at FROM sessions
                 WHERE session_id = ?1",
                params![session_id],
                |row| {
                    Ok(SessionRecord {
                        session_id: row.get(0)?,
                        state: row.get(1)?,
                        created_at: parse_datetime(&row.get::<_, String>(2)?),
                        updated_at: parse_datetime(&row.get::<_, String>(3)?),
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    /// Delete a session
    pub fn delete_session(&self, session_id: &str) -> DbResult<()> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM sessions WHERE session_id = ?1",
            params![session_id],
        )?;
        if deleted == 0 {
            return Err(DbError::SessionNotFound(session_id.to_string()));
        }
        Ok(())
    }

    /// Delete sessions not touched since `cutoff`. Returns how many went.
    pub fn purge_sessions_before(&self, cutoff: DateTime<Utc>) -> DbResult<usize> {
        let conn = self.conn.lock().unwrap();
        let purged = conn.execute(
            "DELETE FROM sessions WHERE updated_at < ?1",
            params![timestamp(cutoff)],
        )?;
        Ok(purged)
    }

    pub fn session_count(&self) -> DbResult<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

/// Fixed-width UTC timestamps, so text comparison in SQL orders by time
fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}
