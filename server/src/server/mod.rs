//! HTTP/WebSocket surface for the research orchestrator

mod events;
pub mod routes;
pub mod state;

pub use state::ServerAppState;

use axum::{
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderValue,
    },
    routing::{get, post},
    Json, Router,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

use crate::models::HealthResponse;

/// Run the HTTP/WebSocket server until shutdown is requested
pub async fn run_server(state: ServerAppState) -> Result<(), String> {
    let bind = state.config.server.bind.clone();
    let port = state.config.server.port;
    let cors_origins = state.config.cors.origins.clone();

    // CORS must be the outermost layer so preflight requests are answered
    // before anything else sees them
    let cors = if cors_origins.is_empty() {
        // Permissive default for development
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT])
    } else {
        let allowed_origins: Vec<HeaderValue> =
            cors_origins.iter().filter_map(|o| o.parse().ok()).collect();
        CorsLayer::new()
            .allow_origin(allowed_origins)
            .allow_methods(Any)
            .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT])
    };

    let app = Router::new()
        .route(
            "/api/v1/research/start",
            post(routes::research_routes::start_research),
        )
        .route(
            "/api/v1/research",
            get(routes::research_routes::list_sessions),
        )
        .route(
            "/api/v1/research/:session_id",
            get(routes::research_routes::get_status)
                .delete(routes::research_routes::delete_session),
        )
        .route(
            "/api/v1/research/:session_id/report",
            get(routes::research_routes::get_report),
        )
        .route(
            "/api/v1/research/:session_id/cancel",
            post(routes::research_routes::cancel_research),
        )
        .route("/ws/:session_id", get(events::ws_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .with_state(state.clone());

    let addr: SocketAddr = format!("{}:{}", bind, port)
        .parse()
        .map_err(|e| format!("Invalid address: {}", e))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| format!("Failed to bind to {}: {}", addr, e))?;

    log::info!("Deep research server listening on http://{}", addr);
    log::info!(
        "Endpoints: POST /api/v1/research/start, GET /ws/:session_id, GET /health"
    );

    // Wait for the shutdown flag set by the signal handler
    let shutdown_state = state.shutdown_state.clone();
    let shutdown_signal = async move {
        loop {
            if shutdown_state.is_shutdown_requested() {
                log::info!("Shutdown requested, stopping server...");
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .map_err(|e| format!("Server error: {}", e))
}

/// GET /health
async fn health_handler(
    axum::extract::State(state): axum::extract::State<ServerAppState>,
) -> Json<HealthResponse> {
    let llm_available = state.workflow.llm.health_check().await;
    let search_available =
        state.workflow.search.is_configured() && state.workflow.search.health_check().await;

    Json(HealthResponse {
        status: "healthy".to_string(),
        llm_available,
        search_available,
    })
}
