//! Boundary contracts toward the external collaborators.
//!
//! Everything that leaves the core crosses one of these traits. Delivery
//! guarantees (retry, batching) belong to the implementations, not here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use corridor_engine::MissionCounters;
use shared::geo::GeoPoint;
use shared::types::{AuthenticationResult, CivilianVehicle, CorridorId, Guidance, VehicleId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertKind {
    Alert,
    Update,
    Clearance,
}

/// One per-vehicle message derived from a target-set diff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertMessage {
    pub corridor_id: CorridorId,
    pub civilian_vehicle_id: VehicleId,
    pub kind: AlertKind,
    /// Absent for clearances: the vehicle just resumes normal driving.
    pub guidance: Option<Guidance>,
    pub eta_seconds: Option<u32>,
}

#[derive(Debug, Clone, Error)]
#[error("alert dispatch failed: {0}")]
pub struct DispatchError(pub String);

#[async_trait]
pub trait AlertDispatcher: Send + Sync {
    async fn dispatch(&self, message: AlertMessage) -> Result<(), DispatchError>;
}

/// Credential verification against the government registry.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn verify(&self, vehicle_id: &VehicleId) -> AuthenticationResult;
}

/// The external civilian-vehicle position feed.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    async fn candidates_near(&self, center: GeoPoint, radius_m: f64) -> Vec<CivilianVehicle>;
}

/// Emitted to durable storage when a corridor completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissionSummary {
    pub corridor_id: CorridorId,
    pub vehicle_id: VehicleId,
    pub destination: GeoPoint,
    pub reason: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_s: i64,
    pub path_count: usize,
    pub counters: MissionCounters,
    pub alerts_sent: u64,
    pub updates_sent: u64,
    pub clearances_sent: u64,
}

#[async_trait]
pub trait Archival: Send + Sync {
    async fn archive(&self, summary: MissionSummary);
}
