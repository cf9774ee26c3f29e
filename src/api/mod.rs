//! Management API.
//!
//! Path ids are URL-safe base64 without padding: `{id}` encodes the service
//! ID and `{node}` encodes `ip:port`.

pub mod auth;
pub mod error;
pub mod handlers;

use axum::{
    body::Body,
    http::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, patch, post, put},
    Router,
};
use std::sync::Arc;
use std::time::Instant;

use crate::config::ApiConfig;
use crate::observability::metrics;
use crate::registry::Registry;
use crate::storage::Storage;

use self::auth::secret_auth_middleware;
use self::handlers::*;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub storage: Arc<Storage>,
    pub config: Arc<ApiConfig>,
}

impl AppState {
    pub fn new(registry: Arc<Registry>, storage: Arc<Storage>, config: ApiConfig) -> Self {
        Self {
            registry,
            storage,
            config: Arc::new(config),
        }
    }
}

pub fn setup_api_router(state: AppState) -> Router {
    Router::new()
        .route("/data", get(dump_data).post(load_data).put(save_data))
        .route("/services", post(add_service))
        .route("/services/{id}", put(put_service).delete(delete_service))
        .route("/services/{id}/nodes", get(list_nodes).post(add_node))
        .route(
            "/services/{id}/nodes/{node}",
            patch(touch_node).put(put_node).delete(delete_node),
        )
        .route("/services/{id}/select", get(select_node))
        .layer(middleware::from_fn_with_state(state.clone(), secret_auth_middleware))
        .layer(middleware::from_fn(track_requests))
        .with_state(state)
}

async fn track_requests(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let response = next.run(request).await;
    metrics::record_request(&method, response.status().as_u16(), start);
    response
}
