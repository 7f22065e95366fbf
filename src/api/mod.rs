//! Operator REST API
//!
//! A thin HTTP surface over the schedulers and the state store.
//!
//! ## Architecture
//!
//! - **Axum** web framework with Tower middleware
//! - **Scheduler handles** for start/stop and manual triggers
//! - **State store** for read-only queries
//!
//! ## Endpoints
//!
//! - `GET /api/v1/health` - Health check
//! - `GET /api/v1/monitors` - All monitor classes with counts
//! - `GET /api/v1/monitors/{class}` - One monitor class
//! - `POST /api/v1/monitors/{class}/{start,stop,sync,check}` - Control
//! - `GET /api/v1/monitors/{class}/entities` - Active entities
//! - `GET /api/v1/monitors/{class}/entities/{key}` - One entity
//! - `POST /api/v1/monitors/{class}/entities/{key}/check` - Probe now
//! - `PUT /api/v1/monitors/{class}/entities/{key}/monitoring` - Toggle
//! - `GET /api/v1/monitors/{class}/entities/{key}/history` - Status changes
//! - `GET /api/v1/monitors/{class}/archive` - Archived entities

pub mod error;
pub mod routes;
pub mod state;
pub mod types;

pub use error::{ApiError, ApiResult};
pub use state::ApiState;
pub use types::{HealthResponse, MonitorSummary, MonitoringToggle};

use std::net::SocketAddr;

use axum::{
    Router,
    routing::{get, post, put},
};
use tracing::info;

use crate::config::ApiSettings;

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Bind address (e.g., "0.0.0.0:8080")
    pub bind_addr: SocketAddr,

    /// Enable CORS for browser clients
    pub enable_cors: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            enable_cors: true,
        }
    }
}

impl From<&ApiSettings> for ApiConfig {
    fn from(settings: &ApiSettings) -> Self {
        Self {
            bind_addr: settings.bind,
            enable_cors: settings.enable_cors,
        }
    }
}

/// Build the router with all routes and middleware
pub fn router(state: ApiState, enable_cors: bool) -> Router {
    use tower::ServiceBuilder;
    use tower_http::cors::{Any, CorsLayer};
    use tower_http::trace::TraceLayer;

    let cors = enable_cors.then(|| {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    });

    Router::new()
        .route("/api/v1/health", get(routes::health::health_check))
        .route("/api/v1/monitors", get(routes::monitors::list_monitors))
        .route("/api/v1/monitors/:class", get(routes::monitors::get_monitor))
        .route(
            "/api/v1/monitors/:class/start",
            post(routes::monitors::start_monitor),
        )
        .route(
            "/api/v1/monitors/:class/stop",
            post(routes::monitors::stop_monitor),
        )
        .route("/api/v1/monitors/:class/sync", post(routes::monitors::sync))
        .route(
            "/api/v1/monitors/:class/check",
            post(routes::monitors::check_all),
        )
        .route(
            "/api/v1/monitors/:class/archive",
            get(routes::monitors::list_archive),
        )
        .route(
            "/api/v1/monitors/:class/entities",
            get(routes::entities::list_entities),
        )
        .route(
            "/api/v1/monitors/:class/entities/:key",
            get(routes::entities::get_entity),
        )
        .route(
            "/api/v1/monitors/:class/entities/:key/check",
            post(routes::entities::check_entity),
        )
        .route(
            "/api/v1/monitors/:class/entities/:key/monitoring",
            put(routes::entities::set_monitoring),
        )
        .route(
            "/api/v1/monitors/:class/entities/:key/history",
            get(routes::entities::get_history),
        )
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .option_layer(cors),
        )
}

/// Spawn the API server
///
/// This starts an Axum HTTP server in a background task.
/// Returns the server's local address.
pub async fn spawn_api_server(config: ApiConfig, state: ApiState) -> anyhow::Result<SocketAddr> {
    info!("starting API server on {}", config.bind_addr);

    let app = router(state, config.enable_cors);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let addr = listener.local_addr()?;

    info!("API server listening on {}", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(addr)
}
