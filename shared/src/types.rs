use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::GeoPoint;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VehicleId(pub String);

impl VehicleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VehicleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VehicleId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorridorId(pub Uuid);

impl CorridorId {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for CorridorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathId(pub Uuid);

impl PathId {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for PathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A raw position report as received from the vehicle unit. Immutable
/// once created; per-vehicle ordering by `timestamp` is enforced by the
/// validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSample {
    pub vehicle_id: VehicleId,
    pub point: GeoPoint,
    pub accuracy_m: f64,
    pub speed_mps: f64,
    pub heading_deg: f64,
    pub timestamp: DateTime<Utc>,
    /// Receiver-reported quality in [0, 1].
    pub signal_quality: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnomalyFlag {
    ImpossibleSpeed(Severity),
    ImpossibleAcceleration(Severity),
    SignalAnomaly(Severity),
    LocationJump(Severity),
    CellMismatch(Severity),
}

impl AnomalyFlag {
    pub fn severity(&self) -> Severity {
        match self {
            AnomalyFlag::ImpossibleSpeed(s)
            | AnomalyFlag::ImpossibleAcceleration(s)
            | AnomalyFlag::SignalAnomaly(s)
            | AnomalyFlag::LocationJump(s)
            | AnomalyFlag::CellMismatch(s) => *s,
        }
    }
}

/// A sample that passed authenticity scoring. Produced exclusively by the
/// telemetry validator and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatedPosition {
    pub sample: PositionSample,
    pub confidence: f64,
    pub flags: Vec<AnomalyFlag>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Waypoint {
    pub point: GeoPoint,
    /// Meters travelled from the path origin to this waypoint.
    pub cumulative_distance_m: f64,
    /// Seconds of estimated travel from the path origin to this waypoint.
    pub cumulative_duration_s: f64,
}

/// An immutable, versioned route estimate. Recalculation supersedes a
/// path with a new value; the owning corridor keeps the history
/// append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictedPath {
    pub path_id: PathId,
    pub waypoints: Vec<Waypoint>,
    pub estimated_duration_s: f64,
    pub estimated_arrival: DateTime<Utc>,
    /// Probability in [0, 1]; 0.0 means dead-reckoning only.
    pub confidence: f64,
    /// True when the traffic deadline expired before every segment was
    /// scored. Degradation is explicit, never hidden.
    pub partial: bool,
    pub direction_changes: u32,
    pub generated_at: DateTime<Utc>,
}

impl PredictedPath {
    pub fn origin(&self) -> Option<GeoPoint> {
        self.waypoints.first().map(|w| w.point)
    }

    pub fn destination(&self) -> Option<GeoPoint> {
        self.waypoints.last().map(|w| w.point)
    }

    pub fn total_distance_m(&self) -> f64 {
        self.waypoints
            .last()
            .map(|w| w.cumulative_distance_m)
            .unwrap_or(0.0)
    }

    /// Consecutive waypoint pairs, in travel order.
    pub fn segments(&self) -> impl Iterator<Item = (&Waypoint, &Waypoint)> {
        self.waypoints.iter().zip(self.waypoints.iter().skip(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Guidance {
    Left,
    Right,
    PullOver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuidanceRecord {
    pub guidance: Guidance,
    pub eta_seconds: u32,
}

/// The civilian vehicles currently inside a corridor's alert buffer.
/// Recomputed wholesale on each path update; `BTreeMap` keeps iteration
/// deterministic so successive sets can be diffed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetSet {
    pub corridor_id: CorridorId,
    pub computed_at: DateTime<Utc>,
    pub entries: BTreeMap<VehicleId, GuidanceRecord>,
}

impl TargetSet {
    pub fn empty(corridor_id: CorridorId) -> Self {
        Self {
            corridor_id,
            computed_at: Utc::now(),
            entries: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Routine,
    Priority,
    Critical,
}

/// A candidate civilian vehicle as reported by the external position feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CivilianVehicle {
    pub id: VehicleId,
    pub position: GeoPoint,
    pub heading_deg: f64,
    pub speed_mps: f64,
}

/// Outcome of credential verification against the government registry.
/// Produced by the external authenticator; the core only consumes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticationResult {
    pub vehicle_id: VehicleId,
    pub success: bool,
    pub reason: Option<String>,
}
