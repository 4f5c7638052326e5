//! Route definitions for the broker server.

use axum::{
    extract::{ws::WebSocketUpgrade, State},
    response::Response,
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::socket::handle_socket;
use crate::broker::{Broker, BrokerStats};

/// Create the full app router.
pub fn create_app_router(broker: Arc<Broker>) -> Router {
    Router::new()
        .route("/", get(ws_upgrade))
        .route("/ws", get(ws_upgrade))
        .route("/health", get(health_check))
        .route("/stats", get(stats))
        .with_state(broker)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(broker): State<Arc<Broker>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, broker))
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}

async fn stats(State(broker): State<Arc<Broker>>) -> Json<BrokerStats> {
    Json(broker.stats().await)
}
