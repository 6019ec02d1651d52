//! JS Property cookie consent backend
//!
//! Keeps each visitor's cookie consent, reconciles analytics and marketing
//! cookies with it, and serves the state to the site's consent banner and
//! preferences panel.

mod api;
mod config;
mod consent;
mod db;
mod errors;
mod models;

use std::sync::Arc;

use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::Config;
use consent::ConsentSessions;
use db::{MemoryStorage, StorageProvider};
use errors::{AppError, AppErrorWithRevision};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<ConsentSessions>,
    pub config: Arc<Config>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env();

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if config.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!("Starting JS Property consent backend");
    tracing::info!("Cookie policy version: {}", config.policy_version);
    tracing::info!("Bind address: {}", config.bind_addr);

    let storage = if config.in_memory {
        tracing::warn!("CONSENT_IN_MEMORY is set. Consent records will not survive a restart!");
        StorageProvider::Memory(MemoryStorage::new())
    } else {
        tracing::info!("Database path: {:?}", config.db_path);
        StorageProvider::Sqlite(db::init_database(&config.db_path).await?)
    };

    let config = Arc::new(config);
    let state = AppState {
        sessions: Arc::new(ConsentSessions::new(storage, config.clone())),
        config: config.clone(),
    };

    // Build router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/consent", get(api::get_consent))
        .route("/consent/categories", get(api::list_categories))
        .route("/consent/allowed/{category}", get(api::is_allowed))
        .route("/consent/accept-all", post(api::accept_all))
        .route("/consent/reject-all", post(api::reject_all))
        .route("/consent/essential-only", post(api::accept_essential_only))
        .route("/consent/preferences", put(api::save_preferences))
        .route("/consent/panel/open", post(api::open_preferences))
        .route("/consent/panel/close", post(api::close_preferences))
        .route("/consent/events", get(api::consent_events))
        .route("/consent/state/events", get(api::consent_state_events));

    // Health check
    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .fallback(not_found)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}

/// Envelope for unknown routes.
async fn not_found(uri: axum::http::Uri) -> AppErrorWithRevision {
    AppErrorWithRevision {
        error: AppError::NotFound(format!("No route for {}", uri.path())),
        revision_id: 0,
    }
}

#[cfg(test)]
mod tests;
