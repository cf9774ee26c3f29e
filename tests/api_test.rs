//! Management API tests driven through the router.

use axum::http::{Method, StatusCode};
use serde_json::json;
use std::sync::Arc;

use service_center::cluster::node::unix_now;
use service_center::{KvBackend, MemoryBackend};

mod common;
use common::{b64, instance, send};

#[tokio::test]
async fn test_secret_required() {
    let app = instance(Arc::new(MemoryBackend::new()), "s3cret");

    let (status, _) = send(&app.router, Method::GET, "/data", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app.router, Method::GET, "/data", None, Some("wrong")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(&app.router, Method::GET, "/data", None, Some("s3cret")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "services": [] }));
}

#[tokio::test]
async fn test_service_lifecycle() {
    let backend = Arc::new(MemoryBackend::new());
    let app = instance(backend.clone(), "");
    let r = &app.router;

    let add = json!({ "service_id": "user-api", "load_balance": "wrr" });
    let (status, _) = send(r, Method::POST, "/services", Some(add.clone()), None).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(r, Method::POST, "/services", Some(add), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("already exists"));

    let bad = json!({ "service_id": "other", "load_balance": "hash" });
    let (status, body) = send(r, Method::POST, "/services", Some(bad), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("hash"));

    // Stored upper-cased, in memory and in the store
    let stored = backend.get_prefix("/service-center/services/").await.unwrap();
    assert_eq!(stored.len(), 1);
    assert!(stored[0].1.contains("WRR"));

    let uri = format!("/services/{}", b64("user-api"));
    let (status, _) = send(r, Method::PUT, &uri, Some(json!({ "load_balance": "swrr" })), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, body) = send(r, Method::GET, "/data", None, None).await;
    assert_eq!(body["services"][0]["load_balance"], "SWRR");

    let (status, _) = send(r, Method::DELETE, &uri, None, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(r, Method::DELETE, &uri, None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(backend.is_empty());
}

#[tokio::test]
async fn test_node_lifecycle_and_select() {
    let backend = Arc::new(MemoryBackend::new());
    let app = instance(backend.clone(), "");
    let r = &app.router;

    send(r, Method::POST, "/services", Some(json!({ "service_id": "svc", "load_balance": "SWRR" })), None).await;
    let nodes_uri = format!("/services/{}/nodes", b64("svc"));
    let node_uri = format!("{}/{}", nodes_uri, b64("10.0.0.1:8080"));
    let select_uri = format!("/services/{}/select", b64("svc"));

    let node = json!({ "ip": "10.0.0.1", "port": 8080, "weight": 3, "meta": "{\"zone\":\"a\"}" });
    let (status, _) = send(r, Method::POST, &nodes_uri, Some(node.clone()), None).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = send(r, Method::POST, &nodes_uri, Some(node), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(r, Method::GET, &nodes_uri, None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, body) = send(r, Method::GET, &select_uri, None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ip"], "10.0.0.1");
    assert_eq!(body["port"], 8080);
    assert_eq!(body["meta"], "{\"zone\":\"a\"}");

    // Weight 0 parks the only node
    let (status, _) = send(r, Method::PUT, &node_uri, Some(json!({ "weight": 0 })), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(r, Method::GET, &select_uri, None, None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let (status, body) = send(r, Method::PATCH, &node_uri, None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ttl"], 30);
    assert!(body["expires"].as_i64().unwrap() > unix_now());

    let (status, _) = send(r, Method::DELETE, &node_uri, None, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(r, Method::DELETE, &node_uri, None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(r, Method::PATCH, &node_uri, None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    assert!(backend.get_prefix("/service-center/nodes/").await.unwrap().is_empty());
    // The service outlives its last node
    assert!(app.registry.contains("svc"));
}

#[tokio::test]
async fn test_bad_paths() {
    let app = instance(Arc::new(MemoryBackend::new()), "");
    let r = &app.router;

    let (status, _) = send(r, Method::GET, &format!("/services/{}/select", b64("nope")), None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(r, Method::GET, "/services/%21%21/select", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    send(r, Method::POST, "/services", Some(json!({ "service_id": "svc", "load_balance": "WR" })), None).await;
    let uri = format!("/services/{}/nodes/{}", b64("svc"), b64("10.0.0.1"));
    let (status, _) = send(r, Method::PUT, &uri, Some(json!({ "weight": 1 })), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let uri = format!("/services/{}/nodes", b64("missing"));
    let (status, _) = send(r, Method::POST, &uri, Some(json!({ "ip": "10.0.0.1", "port": 80 })), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_save_and_load_data() {
    let backend = Arc::new(MemoryBackend::new());
    let writer = instance(backend.clone(), "");

    writer
        .registry
        .set_service(service_center::ServiceConfig::new("svc", "WR"))
        .unwrap();
    writer
        .registry
        .set_node("svc", service_center::Node::new("10.0.0.1", 80, 5))
        .unwrap();

    let (status, _) = send(&writer.router, Method::PUT, "/data", None, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(backend.len(), 2);

    let reader = instance(backend, "");
    let (status, body) = send(&reader.router, Method::POST, "/data", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["services"], 1);
    assert_eq!(body["nodes"], 1);

    let (_, body) = send(&reader.router, Method::GET, "/data", None, None).await;
    assert_eq!(body["services"][0]["nodes"][0]["weight"], 5);
}

#[tokio::test]
async fn test_touch_node_with_ttl() {
    let backend = Arc::new(MemoryBackend::new());
    let app = instance(backend.clone(), "");
    let r = &app.router;

    send(r, Method::POST, "/services", Some(json!({ "service_id": "svc", "load_balance": "WRR" })), None).await;
    let nodes_uri = format!("/services/{}/nodes", b64("svc"));
    let node = json!({ "ip": "10.0.0.1", "port": 80, "weight": 1, "ttl": 5 });
    let (status, _) = send(r, Method::POST, &nodes_uri, Some(node), None).await;
    assert_eq!(status, StatusCode::CREATED);

    let before = unix_now();
    let node_uri = format!("{}/{}", nodes_uri, b64("10.0.0.1:80"));
    let (status, body) = send(r, Method::PATCH, &node_uri, None, None).await;
    assert_eq!(status, StatusCode::OK);
    // Keeps its own TTL instead of the configured fallback
    assert_eq!(body["ttl"], 5);
    let expires = body["expires"].as_i64().unwrap();
    assert!(expires >= before + 5);

    let stored = backend.get_prefix("/service-center/nodes/").await.unwrap();
    assert_eq!(stored.len(), 1);
    let record: serde_json::Value = serde_json::from_str(&stored[0].1).unwrap();
    assert_eq!(record["ttl"], 5);
    assert_eq!(record["expires"], expires);
}

#[tokio::test]
async fn test_touch_does_not_restore_removed_node() {
    let backend = Arc::new(MemoryBackend::new());
    let app = instance(backend.clone(), "");
    let r = &app.router;

    send(r, Method::POST, "/services", Some(json!({ "service_id": "svc", "load_balance": "SWRR" })), None).await;
    let nodes_uri = format!("/services/{}/nodes", b64("svc"));
    for ttl in [0, 5] {
        let ip = format!("10.0.0.{}", ttl + 1);
        let node = json!({ "ip": ip, "port": 80, "weight": 1, "ttl": ttl });
        let (status, _) = send(r, Method::POST, &nodes_uri, Some(node), None).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    // Both nodes are evicted elsewhere: gone from memory and from the store
    for ip in ["10.0.0.1", "10.0.0.6"] {
        app.registry.del_node("svc", ip, 80).unwrap();
        app.storage.delete_storage_node("svc", ip, 80).await.unwrap();
    }

    for ip in ["10.0.0.1", "10.0.0.6"] {
        let node_uri = format!("{}/{}", nodes_uri, b64(&format!("{}:80", ip)));
        let (status, _) = send(r, Method::PATCH, &node_uri, None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
    assert!(backend.get_prefix("/service-center/nodes/").await.unwrap().is_empty());
    assert_eq!(app.registry.find_cluster("svc").unwrap().total(), 0);
}

#[tokio::test]
async fn test_node_weight_limit() {
    let app = instance(Arc::new(MemoryBackend::new()), "");
    let r = &app.router;

    send(r, Method::POST, "/services", Some(json!({ "service_id": "svc", "load_balance": "WRR" })), None).await;
    let nodes_uri = format!("/services/{}/nodes", b64("svc"));
    let node = json!({ "ip": "10.0.0.1", "port": 80, "weight": 65536 });
    let (status, body) = send(r, Method::POST, &nodes_uri, Some(node), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("weight"));

    let node = json!({ "ip": "10.0.0.1", "port": 80, "weight": 65535 });
    let (status, _) = send(r, Method::POST, &nodes_uri, Some(node), None).await;
    assert_eq!(status, StatusCode::CREATED);
}
