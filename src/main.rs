//! Chat Buddy HTTP server

use axum::http::{header, Method};
use chat_buddy::api::{create_router, AppState};
use chat_buddy::config::AppConfig;
use chat_buddy::db::Database;
use chat_buddy::evaluator::{Judge, LlmJudge, ResponseEvaluator, UnconfiguredJudge};
use chat_buddy::llm::ModelRegistry;
use chat_buddy::scenario::ScenarioCatalog;
use chat_buddy::session::{
    DatabaseSessionStore, InMemorySessionStore, SessionManager, SessionStore,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chat_buddy=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = AppConfig::from_env();

    // Scenarios are validated up front; a broken file stops startup
    let catalog = ScenarioCatalog::load_dir(&config.scenarios_dir)?;
    if catalog.is_empty() {
        tracing::warn!(dir = %config.scenarios_dir.display(), "No scenarios found");
    } else {
        tracing::info!(scenarios = ?catalog.scenario_ids(), "Scenario catalog loaded");
    }

    // Judge model
    let llm_registry = ModelRegistry::new(&config.llm);
    let judge: Arc<dyn Judge> = match llm_registry.default() {
        Some(llm) => {
            tracing::info!(
                models = ?llm_registry.available_models(),
                judge = %llm_registry.default_model_id(),
                "LLM registry initialized"
            );
            Arc::new(LlmJudge::new(llm, config.judge_max_tokens))
        }
        None => {
            tracing::warn!(
                judge = %llm_registry.default_model_id(),
                "No judge model available. Set ANTHROPIC_API_KEY or LLM_GATEWAY."
            );
            Arc::new(UnconfiguredJudge)
        }
    };
    let evaluator = Arc::new(ResponseEvaluator::new(judge, config.retry));

    // Session storage
    let ttl = chrono::Duration::from_std(config.session_ttl)
        .unwrap_or_else(|_| chrono::Duration::days(7));
    let store: Arc<dyn SessionStore> = match &config.db_path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            tracing::info!(path = %path.display(), "Opening session database");
            let db = Database::open(path)?;
            tracing::info!(sessions = db.session_count()?, "Session database ready");
            Arc::new(DatabaseSessionStore::new(db, ttl))
        }
        None => {
            tracing::info!("Keeping sessions in memory");
            Arc::new(InMemorySessionStore::new(ttl))
        }
    };

    let sessions = Arc::new(SessionManager::new(
        Arc::new(catalog),
        evaluator,
        config.engine,
        store,
    ));
    let purged = sessions.purge_expired().await?;
    if purged > 0 {
        tracing::info!(purged, "Removed expired sessions");
    }

    let state = AppState::new(sessions, config.session_ttl);

    // Session cookies need credentialed CORS, so origins are mirrored
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    let app = create_router(state).layer(cors);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Chat Buddy server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
