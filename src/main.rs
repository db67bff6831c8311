//! Assignments Backend
//!
//! A production-grade REST backend for designing crowdsourced assignment
//! forms and collecting responses, with SQLite persistence.

mod api;
mod auth;
mod config;
mod db;
mod errors;
mod export;
mod form;
mod models;
mod select;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::Config;
use db::Repository;
use select::DataSelector;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub selector: Arc<Mutex<DataSelector>>,
    pub config: Arc<Config>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env();

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Assignments Backend");
    tracing::info!("Database path: {:?}", config.db_path);
    tracing::info!("Bind address: {}", config.bind_addr);

    // Warn if PSK is not configured
    if config.api_psk.is_none() {
        tracing::warn!("No API PSK configured (ASSIGN_API_PSK). Admin authentication is disabled!");
    }

    // Initialize database
    let pool = db::init_database(&config.db_path).await?;
    let repo = Arc::new(Repository::new(pool));

    // Initialize the data-assignment selector
    let selector = Arc::new(Mutex::new(DataSelector::new(config.rng_seed)));

    // Create application state
    let state = AppState {
        repo,
        selector,
        config: Arc::new(config.clone()),
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

    // Clone PSK for the auth layer
    let psk = state.config.api_psk.clone();

    // Admin routes: assignment design, moderation and export
    let admin_routes = Router::new()
        .route("/assignments", get(api::list_assignments))
        .route("/assignments", post(api::create_assignment))
        .route("/assignments/{id}", put(api::update_assignment))
        .route("/assignments/{id}/open", post(api::open_assignment))
        .route("/assignments/{id}/close", post(api::close_assignment))
        .route("/assignments/{id}/form", put(api::put_form))
        .route("/assignments/{id}/data", post(api::add_data))
        .route("/assignments/{id}/data", get(api::list_data))
        .route("/assignments/{id}/responses", get(api::list_responses))
        .route("/assignments/{id}/export", get(api::export_responses))
        .route("/responses/{id}", put(api::edit_response))
        .route("/responses/{id}/revert", post(api::revert_response))
        // Apply PSK auth middleware
        .layer(middleware::from_fn(move |req, next| {
            auth::admin_auth_layer(psk.clone(), req, next)
        }));

    // Public routes: form rendering, data hand-out, submission
    let public_routes = Router::new()
        .route("/assignments/{id}", get(api::get_assignment))
        .route("/assignments/{id}/form", get(api::get_form))
        .route("/assignments/{id}/next", get(api::next_data))
        .route("/assignments/{id}/responses", post(api::submit_response))
        .route("/assignments/{id}/gallery", get(api::gallery))
        .route("/assignments/{id}/stats", get(api::get_stats));

    // Health check (no auth required)
    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", admin_routes.merge(public_routes))
        .merge(health_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests;
