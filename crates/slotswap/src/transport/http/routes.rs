//! HTTP route handlers.

use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post, put},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::watch;

use crate::coordinator::{SwapCoordinator, SwapError};
use crate::registry::{RegistryError, SlotPatch};
use crate::request::SwapRequestId;
use crate::slot::{Slot, SlotId, SlotStatus, UserId};
use crate::version::VersionInfo;

/// Shared handler state: the negotiation core plus the shutdown channel.
#[derive(Clone)]
pub struct AppState {
    coordinator: Arc<SwapCoordinator>,
    shutdown_tx: watch::Sender<bool>,
}

impl AppState {
    pub fn new(coordinator: Arc<SwapCoordinator>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            coordinator,
            shutdown_tx,
        }
    }

    pub fn coordinator(&self) -> &Arc<SwapCoordinator> {
        &self.coordinator
    }

    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn trigger_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

type ApiResponse = (StatusCode, Json<serde_json::Value>);

/// Caller identity from the `x-user-id` header, set by the upstream
/// authenticator. Authentication itself is out of scope here.
fn identify(headers: &HeaderMap) -> Result<UserId, ApiResponse> {
    let value = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "missing x-user-id header"})),
            )
        })?;
    UserId::parse(value).map_err(|_| {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "invalid x-user-id header"})),
        )
    })
}

fn swap_error(err: SwapError) -> ApiResponse {
    let status = match err {
        SwapError::NotFound => StatusCode::NOT_FOUND,
        SwapError::NotEligible(_) => StatusCode::BAD_REQUEST,
        SwapError::SlotUnavailable | SwapError::AlreadyResolved => StatusCode::CONFLICT,
        SwapError::Forbidden => StatusCode::FORBIDDEN,
    };
    (status, Json(json!({"error": err.to_string()})))
}

fn registry_error(err: RegistryError) -> ApiResponse {
    let status = match err {
        RegistryError::NotFound => StatusCode::NOT_FOUND,
        RegistryError::Conflict { .. } => StatusCode::CONFLICT,
        RegistryError::InvalidRange(_) => StatusCode::BAD_REQUEST,
    };
    (status, Json(json!({"error": err.to_string()})))
}

#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    pub status: &'static str,
    pub version: VersionInfo,
    pub slots: usize,
    pub pending_swaps: usize,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthCheckResponse> {
    Json(HealthCheckResponse {
        status: "READY",
        version: VersionInfo::new(),
        slots: state.coordinator.registry().count().await,
        pending_swaps: state.coordinator.requests().pending_count(),
    })
}

async fn shutdown(State(state): State<AppState>) -> ApiResponse {
    tracing::info!("Shutdown requested via HTTP");
    state.trigger_shutdown();
    (StatusCode::OK, Json(json!({})))
}

#[derive(Debug, Deserialize)]
pub struct CreateSlotRequest {
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Optional initial status; defaults to `Held`.
    #[serde(default)]
    pub status: Option<SlotStatus>,
}

async fn create_slot(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateSlotRequest>,
) -> ApiResponse {
    let user = match identify(&headers) {
        Ok(user) => user,
        Err(resp) => return resp,
    };
    let mut slot = match Slot::new(user, body.title, body.start, body.end) {
        Ok(slot) => slot,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": e.to_string()})),
            );
        }
    };
    match body.status {
        None | Some(SlotStatus::Held) => {}
        Some(SlotStatus::Offered) => slot.status = SlotStatus::Offered,
        Some(SlotStatus::Locked) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "a slot cannot be created LOCKED"})),
            );
        }
    }
    match state.coordinator.registry().insert(slot.clone()).await {
        Ok(()) => (StatusCode::CREATED, Json(json!(slot))),
        Err(e) => registry_error(e),
    }
}

async fn my_slots(State(state): State<AppState>, headers: HeaderMap) -> ApiResponse {
    let user = match identify(&headers) {
        Ok(user) => user,
        Err(resp) => return resp,
    };
    let slots = state.coordinator.registry().slots_for_owner(user).await;
    (StatusCode::OK, Json(json!(slots)))
}

/// Marketplace: other users' slots currently offered for exchange.
async fn swappable_slots(State(state): State<AppState>, headers: HeaderMap) -> ApiResponse {
    let user = match identify(&headers) {
        Ok(user) => user,
        Err(resp) => return resp,
    };
    let slots = state.coordinator.registry().offered_excluding(user).await;
    (StatusCode::OK, Json(json!(slots)))
}

async fn update_slot(
    State(state): State<AppState>,
    Path(slot_id): Path<SlotId>,
    headers: HeaderMap,
    Json(patch): Json<SlotPatch>,
) -> ApiResponse {
    let user = match identify(&headers) {
        Ok(user) => user,
        Err(resp) => return resp,
    };
    if patch.status == Some(SlotStatus::Locked) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "status may only be set to HELD or OFFERED"})),
        );
    }
    match state.coordinator.registry().update(slot_id, user, patch).await {
        Ok(slot) => (StatusCode::OK, Json(json!(slot))),
        Err(e) => registry_error(e),
    }
}

async fn delete_slot(
    State(state): State<AppState>,
    Path(slot_id): Path<SlotId>,
    headers: HeaderMap,
) -> ApiResponse {
    let user = match identify(&headers) {
        Ok(user) => user,
        Err(resp) => return resp,
    };
    match state.coordinator.registry().remove(slot_id, user).await {
        Ok(()) => (StatusCode::OK, Json(json!({}))),
        Err(e) => registry_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct ProposeSwapRequest {
    pub my_slot_id: SlotId,
    pub their_slot_id: SlotId,
}

async fn propose_swap(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ProposeSwapRequest>,
) -> ApiResponse {
    let user = match identify(&headers) {
        Ok(user) => user,
        Err(resp) => return resp,
    };
    match state
        .coordinator
        .propose(user, body.my_slot_id, body.their_slot_id)
        .await
    {
        Ok(request) => (StatusCode::CREATED, Json(json!(request))),
        Err(e) => swap_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct RespondSwapRequest {
    pub accept: bool,
}

async fn respond_swap(
    State(state): State<AppState>,
    Path(request_id): Path<SwapRequestId>,
    headers: HeaderMap,
    Json(body): Json<RespondSwapRequest>,
) -> ApiResponse {
    let user = match identify(&headers) {
        Ok(user) => user,
        Err(resp) => return resp,
    };
    match state.coordinator.respond(user, request_id, body.accept).await {
        Ok(request) => (StatusCode::OK, Json(json!(request))),
        Err(e) => swap_error(e),
    }
}

async fn my_swaps(State(state): State<AppState>, headers: HeaderMap) -> ApiResponse {
    let user = match identify(&headers) {
        Ok(user) => user,
        Err(resp) => return resp,
    };
    let inbox = state.coordinator.list_for_user(user);
    (StatusCode::OK, Json(json!(inbox)))
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/health-check", get(health_check))
        .route("/shutdown", post(shutdown))
        .route("/slots", post(create_slot))
        .route("/slots/mine", get(my_slots))
        .route("/slots/swappable", get(swappable_slots))
        .route("/slots/{id}", put(update_slot).delete(delete_slot))
        .route("/swaps", post(propose_swap))
        .route("/swaps/{id}/respond", post(respond_swap))
        .route("/swaps/mine", get(my_swaps))
        .with_state(state)
}
