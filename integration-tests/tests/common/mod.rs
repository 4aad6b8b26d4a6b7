//! Shared harness: a registry wired to in-memory collaborator doubles.
#![allow(dead_code)]

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use alert_targeting::GeometricTargeting;
use orchestration_registry::{
    AlertDispatcher, AlertKind, AlertMessage, Archival, Authenticator, CandidateSource,
    Collaborators, CorridorRegistry, DispatchError, EngineStack, MissionSummary,
};
use route_predictor::{HeuristicPredictor, SegmentCost, TrafficError, TrafficProvider};
use shared::config::Settings;
use shared::geo::{destination_point, GeoPoint};
use shared::types::{AuthenticationResult, CivilianVehicle, PositionSample, VehicleId};
use telemetry_validator::TelemetryValidator;

pub struct UniformTraffic;

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

pub struct ToggleAuthenticator {
    pub allow: AtomicBool,
}

#[async_trait]
impl Authenticator for ToggleAuthenticator {
    async fn verify(&self, vehicle_id: &VehicleId) -> AuthenticationResult {
        let allow = self.allow.load(std::sync::atomic::Ordering::Relaxed);
        AuthenticationResult {
            vehicle_id: vehicle_id.clone(),
            success: allow,
            reason: (!allow).then(|| "not in registry".to_string()),
        }
    }
}

#[derive(Default)]
pub struct RecordingDispatcher {
    pub messages: Mutex<Vec<AlertMessage>>,
}

impl RecordingDispatcher {
    pub fn kinds_for(&self, vehicle: &str) -> Vec<AlertKind> {
        self.messages
            .lock()
            .iter()
            .filter(|m| m.civilian_vehicle_id == VehicleId::from(vehicle))
            .map(|m| m.kind)
            .collect()
    }
}

#[async_trait]
impl AlertDispatcher for RecordingDispatcher {
    async fn dispatch(&self, message: AlertMessage) -> Result<(), DispatchError> {
        self.messages.lock().push(message);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingArchival {
    pub summaries: Mutex<Vec<MissionSummary>>,
}

#[async_trait]
impl Archival for RecordingArchival {
    async fn archive(&self, summary: MissionSummary) {
        self.summaries.lock().push(summary);
    }
}

#[derive(Default)]
pub struct StaticCandidates {
    pub vehicles: RwLock<Vec<CivilianVehicle>>,
}

#[async_trait]
impl CandidateSource for StaticCandidates {
    async fn candidates_near(&self, _center: GeoPoint, _radius_m: f64) -> Vec<CivilianVehicle> {
        self.vehicles.read().clone()
    }
}

pub struct Harness {
    pub registry: Arc<CorridorRegistry>,
    pub authenticator: Arc<ToggleAuthenticator>,
    pub dispatcher: Arc<RecordingDispatcher>,
    pub archival: Arc<RecordingArchival>,
    pub candidates: Arc<StaticCandidates>,
}

pub fn harness() -> Harness {
    let settings = Settings::default();
    let authenticator = Arc::new(ToggleAuthenticator {
        allow: AtomicBool::new(true),
    });
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let archival = Arc::new(RecordingArchival::default());
    let candidates = Arc::new(StaticCandidates::default());

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
            authenticator: authenticator.clone(),
            candidates: candidates.clone(),
            dispatcher: dispatcher.clone(),
            archival: archival.clone(),
        },
    );

    Harness {
        registry: Arc::new(registry),
        authenticator,
        dispatcher,
        archival,
        candidates,
    }
}

pub fn origin() -> GeoPoint {
    GeoPoint::new(52.5200, 13.4050)
}

pub fn dest() -> GeoPoint {
    destination_point(origin(), 90.0, 5_000.0)
}

pub fn sample_at(
    vehicle: &str,
    point: GeoPoint,
    timestamp: DateTime<Utc>,
    quality: f64,
) -> PositionSample {
    PositionSample {
        vehicle_id: VehicleId::from(vehicle),
        point,
        accuracy_m: 5.0,
        speed_mps: 14.0,
        heading_deg: 90.0,
        timestamp,
        signal_quality: quality,
    }
}

pub async fn wait_for(mut cond: impl FnMut() -> bool) {
    for _ in 0..300 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 3s");
}
