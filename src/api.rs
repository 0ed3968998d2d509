//! HTTP API for Chat Buddy
//!
//! Sessions are identified by the `language_chat_session` cookie, created on
//! the first request that lacks one.

mod handlers;
mod types;

pub use handlers::create_router;
pub use types::*;

use crate::session::SessionManager;
use std::sync::Arc;
use std::time::Duration;

/// Name of the session cookie
pub const SESSION_COOKIE: &str = "language_chat_session";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
    /// Lifetime of the session cookie
    pub session_ttl: Duration,
}

impl AppState {
    pub fn new(sessions: Arc<SessionManager>, session_ttl: Duration) -> Self {
        Self {
            sessions,
            session_ttl,
        }
    }
}
