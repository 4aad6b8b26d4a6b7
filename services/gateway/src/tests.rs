use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use alert_targeting::GeometricTargeting;
use orchestration_registry::{
    AlertDispatcher, AlertMessage, Archival, Authenticator, CandidateSource, Collaborators,
    CorridorRegistry, DispatchError, EngineStack, MissionSummary,
};
use route_predictor::{HeuristicPredictor, SegmentCost, TrafficError, TrafficProvider};
use shared::config::Settings;
use shared::geo::{destination_point, GeoPoint};
use shared::types::{AuthenticationResult, CivilianVehicle, VehicleId};
use telemetry_validator::TelemetryValidator;

use crate::router::{create_router, AppState};

struct UniformTraffic;

#[async_trait]
impl TrafficProvider for UniformTraffic {
    async fn segment_cost(
        &self,
        _from: GeoPoint,
        _to: GeoPoint,
    ) -> Result<SegmentCost, TrafficError> {
        Ok(SegmentCost {
            congestion: 0.2,
            average_speed_mps: 12.0,
        })
    }
}

struct ToggleAuthenticator {
    allow: AtomicBool,
}

#[async_trait]
impl Authenticator for ToggleAuthenticator {
    async fn verify(&self, vehicle_id: &VehicleId) -> AuthenticationResult {
        let allow = self.allow.load(Ordering::Relaxed);
        AuthenticationResult {
            vehicle_id: vehicle_id.clone(),
            success: allow,
            reason: (!allow).then(|| "not in registry".to_string()),
        }
    }
}

struct NullDispatcher;

#[async_trait]
impl AlertDispatcher for NullDispatcher {
    async fn dispatch(&self, _message: AlertMessage) -> Result<(), DispatchError> {
        Ok(())
    }
}

struct NullArchival;

#[async_trait]
impl Archival for NullArchival {
    async fn archive(&self, _summary: MissionSummary) {}
}

struct NoCandidates;

#[async_trait]
impl CandidateSource for NoCandidates {
    async fn candidates_near(&self, _center: GeoPoint, _radius_m: f64) -> Vec<CivilianVehicle> {
        Vec::new()
    }
}

fn app_with_auth(allow: bool) -> axum::Router {
    let settings = Settings::default();
    let registry = CorridorRegistry::new(
        settings.clone(),
        EngineStack {
            validator: Arc::new(TelemetryValidator::new(settings.validator.clone())),
            predictor: Arc::new(HeuristicPredictor::new(
                settings.predictor.clone(),
                Arc::new(UniformTraffic),
            )),
            targeting: Arc::new(GeometricTargeting::new(settings.targeting.clone())),
        },
        Collaborators {
            authenticator: Arc::new(ToggleAuthenticator {
                allow: AtomicBool::new(allow),
            }),
            candidates: Arc::new(NoCandidates),
            dispatcher: Arc::new(NullDispatcher),
            archival: Arc::new(NullArchival),
        },
    );
    create_router(AppState {
        registry: Arc::new(registry),
    })
}

fn app() -> axum::Router {
    app_with_auth(true)
}

fn origin() -> GeoPoint {
    GeoPoint::new(52.5200, 13.4050)
}

fn activate_body(vehicle: &str) -> String {
    let dest = destination_point(origin(), 90.0, 5_000.0);
    json!({
        "vehicle_id": vehicle,
        "origin": { "lat": origin().lat, "lon": origin().lon },
        "destination": { "lat": dest.lat, "lon": dest.lon },
        "urgency": "critical",
    })
    .to_string()
}

fn post_json(uri: &str, body: String) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .expect("request")
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn health_answers_ok() {
    let response = app()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn activation_returns_created_corridor() {
    let response = app()
        .oneshot(post_json("/corridors", activate_body("AMB-1")))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = body_json(response).await;
    assert_eq!(body["state"], "ACTIVE");
    assert_eq!(body["vehicle_id"], "AMB-1");
    assert!(body["corridor_id"].is_string());
    assert!(body["path_id"].is_string());
}

#[tokio::test]
async fn duplicate_activation_maps_to_conflict() {
    let app = app();
    let first = app
        .clone()
        .oneshot(post_json("/corridors", activate_body("AMB-1")))
        .await
        .expect("response");
    assert_eq!(first.status(), StatusCode::CREATED);

    let second = app
        .oneshot(post_json("/corridors", activate_body("AMB-1")))
        .await
        .expect("response");
    assert_eq!(second.status(), StatusCode::CONFLICT);
    let body = body_json(second).await;
    assert_eq!(body["code"], "ALREADY_ACTIVE");
}

#[tokio::test]
async fn unauthenticated_vehicle_maps_to_forbidden() {
    let response = app_with_auth(false)
        .oneshot(post_json("/corridors", activate_body("AMB-1")))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["code"], "VEHICLE_NOT_AUTHENTICATED");
}

#[tokio::test]
async fn invalid_coordinates_are_rejected_before_the_registry() {
    let body = json!({
        "vehicle_id": "AMB-1",
        "origin": { "lat": 95.0, "lon": 13.0 },
        "destination": { "lat": 52.0, "lon": 13.0 },
    })
    .to_string();

    let response = app()
        .oneshot(post_json("/corridors", body))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["code"], "INVALID_REQUEST");
}

#[tokio::test]
async fn empty_vehicle_id_is_rejected() {
    let response = app()
        .oneshot(post_json("/corridors", activate_body("  ")))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn deactivating_unknown_corridor_is_not_found() {
    let response = app()
        .oneshot(
            Request::delete(format!("/corridors/{}", uuid::Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["code"], "CORRIDOR_NOT_FOUND");
}

#[tokio::test]
async fn malformed_corridor_id_is_bad_request() {
    let response = app()
        .oneshot(
            Request::delete("/corridors/not-a-uuid")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn activate_then_deactivate_round_trip() {
    let app = app();
    let created = app
        .clone()
        .oneshot(post_json("/corridors", activate_body("AMB-1")))
        .await
        .expect("response");
    let created = body_json(created).await;
    let corridor_id = created["corridor_id"].as_str().expect("id").to_string();

    let deleted = app
        .clone()
        .oneshot(
            Request::delete(format!("/corridors/{corridor_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .expect("response");
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

    let gone = app
        .oneshot(
            Request::get(format!("/corridors/{corridor_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .expect("response");
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn telemetry_for_unknown_vehicle_is_not_found() {
    let sample = json!({
        "vehicle_id": "GHOST-1",
        "point": { "lat": 52.52, "lon": 13.405 },
        "accuracy_m": 5.0,
        "speed_mps": 14.0,
        "heading_deg": 90.0,
        "timestamp": "2026-03-14T09:00:00Z",
        "signal_quality": 1.0,
    })
    .to_string();

    let response = app()
        .oneshot(post_json("/telemetry", sample))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn telemetry_is_accepted_for_an_active_corridor() {
    let app = app();
    let created = app
        .clone()
        .oneshot(post_json("/corridors", activate_body("AMB-1")))
        .await
        .expect("response");
    assert_eq!(created.status(), StatusCode::CREATED);

    let sample = json!({
        "vehicle_id": "AMB-1",
        "point": { "lat": 52.5201, "lon": 13.4070 },
        "accuracy_m": 5.0,
        "speed_mps": 14.0,
        "heading_deg": 90.0,
        "timestamp": "2026-03-14T09:00:10Z",
        "signal_quality": 1.0,
    })
    .to_string();

    let response = app
        .oneshot(post_json("/telemetry", sample))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn telemetry_with_bad_signal_quality_is_rejected() {
    let sample = json!({
        "vehicle_id": "AMB-1",
        "point": { "lat": 52.52, "lon": 13.405 },
        "accuracy_m": 5.0,
        "speed_mps": 14.0,
        "heading_deg": 90.0,
        "timestamp": "2026-03-14T09:00:00Z",
        "signal_quality": 1.5,
    })
    .to_string();

    let response = app()
        .oneshot(post_json("/telemetry", sample))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn list_filters_by_state() {
    let app = app();
    app.clone()
        .oneshot(post_json("/corridors", activate_body("AMB-1")))
        .await
        .expect("response");

    let active = app
        .clone()
        .oneshot(
            Request::get("/corridors?state=ACTIVE")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .expect("response");
    assert_eq!(active.status(), StatusCode::OK);
    let body = body_json(active).await;
    assert_eq!(body.as_array().expect("array").len(), 1);

    let frozen = app
        .clone()
        .oneshot(
            Request::get("/corridors?state=FROZEN")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .expect("response");
    let body = body_json(frozen).await;
    assert!(body.as_array().expect("array").is_empty());

    let bad = app
        .oneshot(
            Request::get("/corridors?state=WARP")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .expect("response");
    assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
}
