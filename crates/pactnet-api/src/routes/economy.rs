//! Token ledger and reputation endpoints. Transfers require bearer
//! authentication as the debited entity (or admin); minting is admin-only.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;

use pactnet_core::reputation::Evaluation;
use pactnet_core::types::{Amount, EntityId};
use pactnet_core::PactError;

use crate::error::ApiError;
use crate::state::ApiState;

// ── Balances & transfers ─────────────────────────────────────────────────────

pub async fn balance(
    State(state): State<Arc<ApiState>>,
    Path(entity): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let balance = state.economy.balance(&EntityId::new(entity)).await?;
    Ok(Json(serde_json::json!({ "balance": balance })))
}

#[derive(Deserialize)]
pub struct TransferRequest {
    pub from_entity: EntityId,
    pub to_entity: EntityId,
    pub amount: Amount,
    #[serde(default)]
    pub description: Option<String>,
}

pub async fn transfer(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(req): Json<TransferRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let caller = state.auth.authenticate(&headers).await?;
    if caller.entity != req.from_entity && !caller.is_admin() {
        return Err(PactError::Forbidden.into());
    }

    let now = Utc::now().timestamp();
    state
        .economy
        .transfer(
            &req.from_entity,
            &req.to_entity,
            req.amount,
            req.description.as_deref().unwrap_or("transfer"),
            now,
        )
        .await?;
    Ok(Json(serde_json::json!({ "status": "transferred" })))
}

// ── Wallets ──────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateWalletRequest {
    pub entity_id: EntityId,
    #[serde(default)]
    pub initial_balance: Amount,
}

/// Create a wallet (admin). A non-zero opening balance enters circulation
/// as minted supply.
pub async fn create_wallet(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(req): Json<CreateWalletRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let caller = state.auth.authenticate(&headers).await?;
    if !caller.is_admin() {
        return Err(PactError::Forbidden.into());
    }
    let now = Utc::now().timestamp();
    state
        .economy
        .create_wallet(&req.entity_id, req.initial_balance, now)
        .await?;
    Ok(Json(serde_json::json!({
        "status": "created",
        "entity_id": req.entity_id,
        "balance": req.initial_balance,
    })))
}

// ── Mint / supply ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct MintRequest {
    pub recipient: EntityId,
    pub amount: Amount,
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn mint(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(req): Json<MintRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let caller = state.auth.authenticate(&headers).await?;
    if !caller.is_admin() {
        return Err(PactError::Forbidden.into());
    }

    let now = Utc::now().timestamp();
    state
        .economy
        .mint_bonus(
            &req.recipient,
            req.amount,
            req.reason.as_deref().unwrap_or("admin mint"),
            now,
        )
        .await?;
    Ok(Json(serde_json::json!({ "status": "minted" })))
}

pub async fn supply(State(state): State<Arc<ApiState>>) -> Json<serde_json::Value> {
    let supply = state.economy.supply().await;
    let locked = state.economy.locked_total().await;
    let delta = state.economy.reconcile().await;
    Json(serde_json::json!({
        "supply": supply,
        "locked_total": locked,
        "reconciliation_delta": delta,
    }))
}

#[derive(Deserialize)]
pub struct AlertQuery {
    #[serde(default = "default_alert_limit")]
    pub limit: usize,
}

fn default_alert_limit() -> usize {
    50
}

pub async fn alerts(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<AlertQuery>,
) -> Json<serde_json::Value> {
    let alerts = state.monitor.recent_alerts(query.limit).await;
    Json(serde_json::json!({ "alerts": alerts }))
}

// ── Reputation ───────────────────────────────────────────────────────────────

pub async fn reputation(
    State(state): State<Arc<ApiState>>,
    Path(entity): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let rep = state
        .reputation
        .get_or_create(&EntityId::new(entity))
        .await?;
    Ok(Json(serde_json::to_value(rep).unwrap_or_default()))
}

pub async fn submit_evaluation(
    State(state): State<Arc<ApiState>>,
    Path(entity): Path<String>,
    headers: HeaderMap,
    Json(evaluation): Json<Evaluation>,
) -> Result<Json<serde_json::Value>, ApiError> {
    // Evaluations move scores; they need an authenticated submitter.
    state.auth.authenticate(&headers).await?;
    let now = Utc::now().timestamp();
    let rep = state
        .reputation
        .update_from_evaluation(&EntityId::new(entity), &evaluation, now)
        .await?;
    Ok(Json(serde_json::json!({
        "status": "recorded",
        "current_score": rep.current_score,
        "tier": rep.tier,
    })))
}
