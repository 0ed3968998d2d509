//! HTTP request handlers

use super::types::{
    ClearSessionResponse, ErrorResponse, HealthResponse, LoadScenarioRequest,
    LoadScenarioResponse, PromptResponse, ResetResponse, ScenarioListResponse,
    StudentResponseRequest,
};
use super::{AppState, SESSION_COOKIE};
use crate::engine::{EngineError, ResponseOutcome, StateSnapshot};
use crate::session::{SessionError, SessionInfo};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use std::time::Duration;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Conversation
        .route("/load_scenario", post(load_scenario))
        .route("/current_prompt", get(current_prompt))
        .route("/student_response", post(student_response))
        .route("/reset", post(reset))
        .route("/state", get(get_state))
        // Catalog
        .route("/scenarios", get(list_scenarios))
        // Session lifecycle
        .route("/session/clear", post(clear_session))
        .route("/session/info", get(session_info))
        .route("/health", get(health))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================
// Session Cookie
// ============================================================

/// Session id from the cookie, minting a new cookie when absent
fn session_id(jar: CookieJar, ttl: Duration) -> (CookieJar, String) {
    if let Some(id) = jar
        .get(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .filter(|id| !id.is_empty())
    {
        return (jar, id);
    }

    let id = Uuid::new_v4().to_string();
    let max_age = time::Duration::seconds(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX));
    let cookie = Cookie::build((SESSION_COOKIE, id.clone()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(max_age)
        .build();
    tracing::debug!(session = %id, "Created session");
    (jar.add(cookie), id)
}

// ============================================================
// Conversation
// ============================================================

async fn load_scenario(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<LoadScenarioRequest>,
) -> Result<(CookieJar, Json<LoadScenarioResponse>), AppError> {
    let name = req.catalog_key().ok_or_else(|| {
        AppError::BadRequest("Missing scenario_name or scenario_path".to_string())
    })?;
    let (jar, session) = session_id(jar, state.session_ttl);
    let (summary, snapshot) = state.sessions.load_scenario(&session, &name).await?;

    Ok((
        jar,
        Json(LoadScenarioResponse {
            status: "loaded",
            scenario_name: summary.scenario_name,
            persona: summary.persona,
            opening: summary.opening,
            state: snapshot,
        }),
    ))
}

async fn current_prompt(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<PromptResponse>), AppError> {
    let (jar, session) = session_id(jar, state.session_ttl);
    let prompt = state.sessions.current_prompt(&session).await?;
    Ok((jar, Json(PromptResponse { prompt })))
}

async fn student_response(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<StudentResponseRequest>,
) -> Result<(CookieJar, Json<ResponseOutcome>), AppError> {
    let text = req
        .student_response
        .ok_or_else(|| AppError::BadRequest("Missing student_response".to_string()))?;
    let (jar, session) = session_id(jar, state.session_ttl);
    let outcome = state.sessions.respond(&session, &text).await?;
    Ok((jar, Json(outcome)))
}

async fn reset(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<ResetResponse>), AppError> {
    let (jar, session) = session_id(jar, state.session_ttl);
    let snapshot = state.sessions.reset(&session).await?;
    Ok((
        jar,
        Json(ResetResponse {
            status: "reset",
            state: snapshot,
        }),
    ))
}

async fn get_state(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<StateSnapshot>), AppError> {
    let (jar, session) = session_id(jar, state.session_ttl);
    let snapshot = state.sessions.state(&session).await?;
    Ok((jar, Json(snapshot)))
}

// ============================================================
// Catalog
// ============================================================

async fn list_scenarios(State(state): State<AppState>) -> Json<ScenarioListResponse> {
    Json(ScenarioListResponse {
        scenarios: state.sessions.catalog().scenario_ids(),
    })
}

// ============================================================
// Session Lifecycle
// ============================================================

async fn clear_session(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Json<ClearSessionResponse>, AppError> {
    let had_state = match jar.get(SESSION_COOKIE) {
        Some(cookie) => state.sessions.clear(cookie.value()).await?,
        None => false,
    };
    Ok(Json(ClearSessionResponse {
        status: "session_cleared",
        had_state,
    }))
}

async fn session_info(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<SessionInfo>), AppError> {
    let (jar, session) = session_id(jar, state.session_ttl);
    let info = state.sessions.info(&session).await?;
    Ok((jar, Json(info)))
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "chat-buddy",
    })
}

async fn not_found() -> AppError {
    AppError::NotFound("Endpoint not found".to_string())
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match &err {
            SessionError::UnknownScenario(_) => AppError::NotFound(err.to_string()),
            SessionError::Engine(EngineError::InvalidState(_)) => {
                AppError::Conflict(err.to_string())
            }
            SessionError::Engine(EngineError::Load(_)) => AppError::BadRequest(err.to_string()),
            SessionError::Engine(EngineError::Logic(_) | EngineError::Restore(_))
            | SessionError::Store(_)
            | SessionError::Serialize(_) => {
                tracing::error!(error = %err, "Request failed");
                AppError::Internal(err.to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
