//! Axum router for the ambient control plane.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, Method};
use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{debug_stream_detail, debug_streams, health_check, version_check, AppState};

pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::ACCEPT, header::CONTENT_TYPE, header::ORIGIN])
        .max_age(Duration::from_secs(3600));

    Router::new()
        .route("/health", get(health_check))
        .route("/version", get(version_check))
        .route("/debug/streams", get(debug_streams))
        .route("/debug/streams/{*url}", get(debug_stream_detail))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::registry::Registry;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::util::ServiceExt;

    #[tokio::test]
    async fn health_route_responds_ok() {
        let state = Arc::new(AppState::new(Arc::new(Registry::new(ServerConfig::default()))));
        let app = create_router(state);
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
