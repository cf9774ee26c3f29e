//! Shared utilities for integration tests.

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use service_center::api::AppState;
use service_center::config::{ApiConfig, StorageConfig, WatchConfig};
use service_center::eviction::{EvictionWorker, Evictor};
use service_center::http::HttpServer;
use service_center::lifecycle::Shutdown;
use service_center::{MemoryBackend, Registry, Storage};

/// One registry process wired to a shared backend.
pub struct Instance {
    pub registry: Arc<Registry>,
    pub storage: Arc<Storage>,
    pub router: Router,
}

/// Build an instance without background tasks.
pub fn instance(backend: Arc<MemoryBackend>, secret: &str) -> Instance {
    let (evictor, _rx) = Evictor::new(16);
    build(backend, secret, evictor)
}

/// Build an instance with its eviction worker and watch loop running.
pub async fn running_instance(backend: Arc<MemoryBackend>, shutdown: &Shutdown) -> Instance {
    let (evictor, rx) = Evictor::new(16);
    let instance = build(backend.clone(), "", evictor);

    let worker = EvictionWorker::new(rx, instance.storage.clone());
    tokio::spawn(worker.run(shutdown.subscribe()));

    let watchers = backend.watchers();
    let storage = instance.storage.clone();
    let rx = shutdown.subscribe();
    let retry = WatchConfig {
        retry_base_ms: 10,
        retry_max_ms: 50,
    };
    tokio::spawn(async move { storage.watch(&retry, rx).await });

    assert!(eventually(|| backend.watchers() > watchers).await, "watch never subscribed");
    instance
}

fn build(backend: Arc<MemoryBackend>, secret: &str, evictor: Evictor) -> Instance {
    let registry = Arc::new(Registry::new(evictor));
    let storage = Arc::new(Storage::new(backend, registry.clone(), &StorageConfig::default()));
    let config = ApiConfig {
        secret: secret.to_string(),
        ..Default::default()
    };
    let router = HttpServer::build_router(AppState::new(registry.clone(), storage.clone(), config));
    Instance {
        registry,
        storage,
        router,
    }
}

/// Poll `check` for up to two seconds.
pub async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// Send one request through the router and decode the JSON body, if any.
pub async fn send(
    router: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
    secret: Option<&str>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(secret) = secret {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", secret));
    }
    let request = match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

pub fn b64(raw: &str) -> String {
    service_center::storage::keys::encode_id(raw)
}
