//! Marketplace endpoints: service listing/registration and task contracts.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;

use pactnet_core::registry::ServiceEntry;
use pactnet_core::types::{Amount, EntityId, TaskId};
use pactnet_core::PactError;

use crate::error::ApiError;
use crate::state::ApiState;

// ── Services ─────────────────────────────────────────────────────────────────

pub async fn list_services(
    State(state): State<Arc<ApiState>>,
) -> Json<Vec<ServiceEntry>> {
    Json(state.registry.list_all().await)
}

/// Register a signed service entry (append-or-replace).
pub async fn register_service(
    State(state): State<Arc<ApiState>>,
    Json(entry): Json<ServiceEntry>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let entity = entry.entity_id.clone();
    state.registry.register(entry).await?;
    Ok(Json(serde_json::json!({
        "status": "registered",
        "entity_id": entity,
    })))
}

pub async fn service_heartbeat(
    State(state): State<Arc<ApiState>>,
    Path(entity): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let entity = EntityId::new(entity);
    let now = Utc::now().timestamp();
    if !state.registry.heartbeat(&entity, now).await {
        return Err(PactError::UnknownRecipient(entity.to_string()).into());
    }
    Ok(Json(serde_json::json!({ "status": "alive" })))
}

// ── Tasks ────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateTaskRequest {
    pub creator_id: EntityId,
    pub description: String,
    pub reward_amount: Amount,
}

#[derive(Deserialize)]
pub struct AssignTaskRequest {
    pub worker_id: EntityId,
}

pub async fn list_tasks(State(state): State<Arc<ApiState>>) -> Json<serde_json::Value> {
    let tasks = state.economy.tasks_snapshot().await;
    Json(serde_json::json!({ "tasks": tasks }))
}

pub async fn create_task(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let now = Utc::now().timestamp();
    let task = state
        .economy
        .create_task(&req.creator_id, &req.description, req.reward_amount, now)
        .await?;
    Ok(Json(serde_json::json!({ "status": "created", "task": task })))
}

pub async fn assign_task(
    State(state): State<Arc<ApiState>>,
    Path(task_id): Path<String>,
    Json(req): Json<AssignTaskRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let task_id = TaskId::new(task_id);
    state.economy.assign_task(&task_id, &req.worker_id).await?;
    state.economy.start_task(&task_id).await?;
    Ok(Json(serde_json::json!({ "status": "assigned" })))
}

pub async fn complete_task(
    State(state): State<Arc<ApiState>>,
    Path(task_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let task_id = TaskId::new(task_id);
    let now = Utc::now().timestamp();
    state.economy.complete_task(&task_id, now).await?;
    Ok(Json(serde_json::json!({ "status": "completed" })))
}

pub async fn cancel_task(
    State(state): State<Arc<ApiState>>,
    Path(task_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let task_id = TaskId::new(task_id);
    let now = Utc::now().timestamp();
    state.economy.abort_task(&task_id, false, now).await?;
    Ok(Json(serde_json::json!({ "status": "cancelled" })))
}
