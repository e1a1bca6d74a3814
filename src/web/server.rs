use axum::{routing::get, Json, Router};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::config::Config;
use crate::engine::Engine;

use super::api::elements as element_handlers;
use super::api::notifications as notification_handlers;
use super::api::passes as pass_handlers;
use super::api_doc::ApiDoc;
use super::auth::AppState;

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Pass API endpoints
        .route("/api/passes", get(pass_handlers::list_passes))
        .route("/api/passes/next", get(pass_handlers::next_pass))
        // Element set endpoints
        .route(
            "/api/elements",
            get(element_handlers::current_elements).post(element_handlers::submit_elements),
        )
        .route(
            "/api/notifications",
            get(notification_handlers::list_notifications),
        )
        // OpenAPI
        .route(
            "/api-doc/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
        // Middleware
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(config: Arc<Config>, engine: Arc<Mutex<Engine>>) -> std::io::Result<()> {
    let bind_addr = config.web.bind.clone();
    let app = router(AppState { config, engine });

    log::info!("Starting server on {}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await
}
