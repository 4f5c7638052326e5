//! HTTP routes served next to the WebSocket endpoint.

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
};
use std::sync::Arc;
use tower::ServiceExt;

use linkbroker::config::BrokerConfig;
use linkbroker::server::create_app_router;
use linkbroker::Broker;

fn app() -> axum::Router {
    create_app_router(Arc::new(Broker::new(BrokerConfig::default())))
}

#[tokio::test]
async fn test_health_check() {
    let response = app()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"OK");
}

#[tokio::test]
async fn test_stats_on_empty_broker() {
    let response = app()
        .oneshot(Request::builder().uri("/stats").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let stats: serde_json::Value = serde_json::from_slice(&body).unwrap();

    assert_eq!(stats["instances"], 0);
    assert_eq!(stats["connections"], 0);
    assert_eq!(stats["messages"]["total"], 0);
    assert_eq!(stats["messages"]["byStatus"]["sent"], 0);
}

#[tokio::test]
async fn test_plain_get_on_socket_route_is_rejected() {
    let response = app()
        .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert!(response.status().is_client_error());
}
