//! Management API handlers.
//!
//! Mutations write memory first, then the store. A store failure is
//! reported as 500 even though memory already changed; the watch loop
//! reconciles the two.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::api::error::{ApiError, ApiResult};
use crate::api::AppState;
use crate::cluster::node::{parse_address, unix_now};
use crate::cluster::{Node, ServiceConfig};
use crate::error::RegistryError;
use crate::storage::keys::decode_id;
use crate::storage::store::LoadSummary;

#[derive(Debug, Deserialize)]
pub struct AddService {
    pub service_id: String,
    pub load_balance: String,
}

#[derive(Debug, Deserialize)]
pub struct PutService {
    pub load_balance: String,
}

#[derive(Debug, Deserialize)]
pub struct AddNode {
    pub ip: String,
    pub port: u16,
    #[serde(default)]
    pub weight: u32,
    #[serde(default)]
    pub ttl: u32,
    #[serde(default)]
    pub meta: String,
}

#[derive(Debug, Deserialize)]
pub struct PutNode {
    #[serde(default)]
    pub weight: u32,
    #[serde(default)]
    pub ttl: u32,
    #[serde(default)]
    pub meta: String,
}

#[derive(Debug, Serialize)]
pub struct ServiceDump {
    pub service_id: String,
    pub load_balance: String,
    pub nodes: Vec<Node>,
}

#[derive(Debug, Serialize)]
pub struct DataDump {
    pub services: Vec<ServiceDump>,
}

fn service_path(encoded: &str) -> ApiResult<String> {
    decode_id(encoded).map_err(|_| ApiError::BadRequest("service id is not valid base64".into()))
}

fn node_path(encoded: &str) -> ApiResult<(String, u16)> {
    let raw = decode_id(encoded).map_err(|_| ApiError::BadRequest("node is not valid base64".into()))?;
    parse_address(&raw).ok_or_else(|| ApiError::NotFound(format!("node {} is not ip:port", raw)))
}

/// GET /data
pub async fn dump_data(State(state): State<AppState>) -> Json<DataDump> {
    let mut services: Vec<ServiceDump> = state
        .registry
        .clusters()
        .into_iter()
        .map(|cluster| ServiceDump {
            service_id: cluster.service_id().to_string(),
            load_balance: cluster.config().load_balance.clone(),
            nodes: cluster.nodes(),
        })
        .collect();
    services.sort_by(|a, b| a.service_id.cmp(&b.service_id));
    Json(DataDump { services })
}

/// POST /data
pub async fn load_data(State(state): State<AppState>) -> ApiResult<Json<LoadSummary>> {
    Ok(Json(state.storage.load_all().await?))
}

/// PUT /data
pub async fn save_data(State(state): State<AppState>) -> ApiResult<StatusCode> {
    state.storage.save_all().await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /services
pub async fn add_service(
    State(state): State<AppState>,
    Json(req): Json<AddService>,
) -> ApiResult<StatusCode> {
    if state.registry.contains(&req.service_id) {
        return Err(ApiError::BadRequest(format!("service {} already exists", req.service_id)));
    }
    let service_id = req.service_id.clone();
    state
        .registry
        .set_service(ServiceConfig::new(req.service_id, req.load_balance))?;
    persist_service(&state, &service_id).await?;
    Ok(StatusCode::CREATED)
}

/// PUT /services/{id}
pub async fn put_service(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<PutService>,
) -> ApiResult<StatusCode> {
    let service_id = service_path(&id)?;
    state
        .registry
        .set_service(ServiceConfig::new(service_id.clone(), req.load_balance))?;
    persist_service(&state, &service_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// Store the config as normalized by the registry.
async fn persist_service(state: &AppState, service_id: &str) -> ApiResult<()> {
    if let Some(cluster) = state.registry.find_cluster(service_id) {
        state.storage.save_service(cluster.config()).await?;
    }
    Ok(())
}

/// DELETE /services/{id}
pub async fn delete_service(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let service_id = service_path(&id)?;
    if !state.registry.contains(&service_id) {
        return Err(RegistryError::ServiceNotFound(service_id).into());
    }
    state.registry.del_service(&service_id);
    state.storage.delete_storage_service(&service_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /services/{id}/nodes
pub async fn list_nodes(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<Node>>> {
    let service_id = service_path(&id)?;
    let cluster = state
        .registry
        .find_cluster(&service_id)
        .ok_or(RegistryError::ServiceNotFound(service_id))?;
    Ok(Json(cluster.nodes()))
}

/// POST /services/{id}/nodes
pub async fn add_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<AddNode>,
) -> ApiResult<StatusCode> {
    let service_id = service_path(&id)?;
    let cluster = state
        .registry
        .find_cluster(&service_id)
        .ok_or_else(|| RegistryError::ServiceNotFound(service_id.clone()))?;
    if cluster.find(&req.ip, req.port).is_some() {
        return Err(ApiError::BadRequest(format!(
            "node {}:{} already exists",
            req.ip, req.port
        )));
    }

    let node = Node::new(req.ip, req.port, req.weight)
        .with_ttl(req.ttl, unix_now())
        .with_meta(req.meta);
    state.registry.set_node(&service_id, node.clone())?;
    state.storage.save_node(&service_id, &node).await?;
    Ok(StatusCode::CREATED)
}

/// PUT /services/{id}/nodes/{node}
pub async fn put_node(
    State(state): State<AppState>,
    Path((id, node)): Path<(String, String)>,
    Json(req): Json<PutNode>,
) -> ApiResult<StatusCode> {
    let service_id = service_path(&id)?;
    let (ip, port) = node_path(&node)?;

    let node = Node::new(ip, port, req.weight)
        .with_ttl(req.ttl, unix_now())
        .with_meta(req.meta);
    state.registry.set_node(&service_id, node.clone())?;
    state.storage.save_node(&service_id, &node).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PATCH /services/{id}/nodes/{node}
///
/// Push the node's deadline out by its TTL. A node without a TTL is given
/// the configured touch lifetime, so from then on it must keep being touched.
/// Only nodes still in the registry are written back.
pub async fn touch_node(
    State(state): State<AppState>,
    Path((id, node)): Path<(String, String)>,
) -> ApiResult<Json<Node>> {
    let service_id = service_path(&id)?;
    let (ip, port) = node_path(&node)?;

    let touched = state.registry.touch_node(
        &service_id,
        &ip,
        port,
        unix_now(),
        state.config.touch_ttl_secs,
    )?;
    state.storage.save_node(&service_id, &touched).await?;

    // Removed while the write was in flight: take back the key we just wrote
    let still_present = state
        .registry
        .find_cluster(&service_id)
        .is_some_and(|c| c.find(&ip, port).is_some());
    if !still_present {
        state.storage.delete_storage_node(&service_id, &ip, port).await?;
        return Err(RegistryError::NodeNotFound {
            service_id,
            node: format!("{}:{}", ip, port),
        }
        .into());
    }
    Ok(Json(touched))
}

/// DELETE /services/{id}/nodes/{node}
pub async fn delete_node(
    State(state): State<AppState>,
    Path((id, node)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let service_id = service_path(&id)?;
    let (ip, port) = node_path(&node)?;

    let removed = state.registry.del_node(&service_id, &ip, port)?;
    state.storage.delete_storage_node(&service_id, &ip, port).await?;
    match removed {
        Some(_) => Ok(StatusCode::NO_CONTENT),
        None => Err(RegistryError::NodeNotFound {
            service_id,
            node: format!("{}:{}", ip, port),
        }
        .into()),
    }
}

/// GET /services/{id}/select
pub async fn select_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Node>> {
    let service_id = service_path(&id)?;
    let cluster = state
        .registry
        .find_cluster(&service_id)
        .ok_or_else(|| RegistryError::ServiceNotFound(service_id.clone()))?;
    cluster
        .select()
        .map(Json)
        .ok_or_else(|| ApiError::Unavailable(format!("no selectable node in service {}", service_id)))
}
