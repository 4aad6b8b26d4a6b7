//! Operational surface.
//!
//! Thin axum layer over the registry: request validation, error-code
//! mapping, nothing else. Authentication and rate limiting live in the
//! API gateway in front of this service.

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::debug;
use uuid::Uuid;

use corridor_engine::{CorridorState, CorridorView};
use orchestration_registry::{CorridorRegistry, ListFilter};
use shared::error::OrchestrationError;
use shared::geo::GeoPoint;
use shared::types::{CorridorId, PositionSample, Urgency, VehicleId};

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<CorridorRegistry>,
}

#[derive(Debug, Deserialize)]
pub struct ActivateRequest {
    pub vehicle_id: String,
    pub origin: GeoPoint,
    pub destination: GeoPoint,
    #[serde(default = "default_urgency")]
    pub urgency: Urgency,
}

fn default_urgency() -> Urgency {
    Urgency::Priority
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub state: Option<String>,
    pub vehicle: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            code: "INVALID_REQUEST",
            message: message.into(),
        }),
    )
}

fn map_error(err: OrchestrationError) -> ApiError {
    let status = match err.code() {
        "ALREADY_ACTIVE" | "CORRIDOR_FROZEN" => StatusCode::CONFLICT,
        "VEHICLE_NOT_AUTHENTICATED" => StatusCode::FORBIDDEN,
        "NO_ROUTE_FOUND" => StatusCode::UNPROCESSABLE_ENTITY,
        "CORRIDOR_NOT_FOUND" => StatusCode::NOT_FOUND,
        "ACTIVATION_TIMEOUT" => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorBody {
            code: err.code(),
            message: err.to_string(),
        }),
    )
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/corridors", post(activate_corridor).get(list_corridors))
        .route(
            "/corridors/:id",
            delete(deactivate_corridor).get(get_corridor),
        )
        .route("/corridors/:id/reauthenticate", post(reauthenticate))
        .route("/telemetry", post(telemetry_update))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

async fn activate_corridor(
    State(state): State<AppState>,
    Json(request): Json<ActivateRequest>,
) -> Result<(StatusCode, Json<CorridorView>), ApiError> {
    if request.vehicle_id.trim().is_empty() {
        return Err(bad_request("vehicle_id is required"));
    }
    if !request.origin.is_valid() {
        return Err(bad_request("origin is outside coordinate range"));
    }
    if !request.destination.is_valid() {
        return Err(bad_request("destination is outside coordinate range"));
    }

    let view = state
        .registry
        .activate(
            VehicleId::new(request.vehicle_id),
            request.origin,
            request.destination,
            request.urgency,
        )
        .await
        .map_err(map_error)?;

    Ok((StatusCode::CREATED, Json(view)))
}

async fn deactivate_corridor(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let corridor_id = parse_corridor_id(&id)?;
    state
        .registry
        .deactivate(corridor_id)
        .await
        .map_err(map_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_corridor(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CorridorView>, ApiError> {
    let corridor_id = parse_corridor_id(&id)?;
    let view = state.registry.view(corridor_id).map_err(map_error)?;
    Ok(Json(view))
}

async fn reauthenticate(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let corridor_id = parse_corridor_id(&id)?;
    state
        .registry
        .reauthenticate(corridor_id)
        .await
        .map_err(map_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn telemetry_update(
    State(state): State<AppState>,
    Json(sample): Json<PositionSample>,
) -> Result<StatusCode, ApiError> {
    if sample.vehicle_id.as_str().trim().is_empty() {
        return Err(bad_request("vehicle_id is required"));
    }
    if !sample.point.is_valid() {
        return Err(bad_request("position is outside coordinate range"));
    }
    if !(0.0..=1.0).contains(&sample.signal_quality) {
        return Err(bad_request("signal_quality must be in [0, 1]"));
    }

    let vehicle_id = sample.vehicle_id.clone();
    state
        .registry
        .on_telemetry(&vehicle_id, sample)
        .map_err(map_error)?;
    debug!(vehicle = %vehicle_id, "telemetry accepted");
    Ok(StatusCode::ACCEPTED)
}

async fn list_corridors(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<CorridorView>>, ApiError> {
    let state_filter = match query.state.as_deref() {
        None => None,
        Some(raw) => Some(
            CorridorState::from_str(raw)
                .map_err(|_| bad_request(format!("unknown corridor state: {raw}")))?,
        ),
    };

    let filter = ListFilter {
        state: state_filter,
        vehicle: query.vehicle.map(VehicleId::new),
    };
    Ok(Json(state.registry.list_active(&filter)))
}

fn parse_corridor_id(raw: &str) -> Result<CorridorId, ApiError> {
    Uuid::parse_str(raw)
        .map(CorridorId)
        .map_err(|_| bad_request("corridor id must be a UUID"))
}
