//! One corridor's sequential evolution.
//!
//! A `CorridorEngine` is owned by exactly one worker task; nothing here
//! is shared, so there are no locks. All timing decisions take `now`
//! from the caller, which keeps the pause/escalation windows testable.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use route_predictor::RoutePredictor;
use shared::config::CorridorSettings;
use shared::error::OrchestrationError;
use shared::geo::{haversine_m, GeoPoint};
use shared::types::{
    AuthenticationResult, CorridorId, PathId, PositionSample, PredictedPath, Urgency, VehicleId,
};
use telemetry_validator::{Assessment, SpoofingEvent, TelemetryValidator};

use crate::lifecycle::{transition, CorridorState, TransitionError};

/// What the owning worker must do after a telemetry update.
#[derive(Debug)]
pub enum TelemetryEffect {
    /// Accepted while active: recompute the target set at this position.
    Retarget {
        path: Arc<PredictedPath>,
        position: GeoPoint,
        path_changed: bool,
    },
    /// State or movement bookkeeping advanced; no trusted fix to target
    /// from.
    StateOnly,
    /// Spoofing forced a freeze. Stop emitting target sets until
    /// re-authentication.
    Frozen(SpoofingEvent),
    /// Dropped without effect.
    Ignored,
}

/// Outcome of a cadence tick.
#[derive(Debug)]
pub enum TickEffect {
    None,
    Paused,
    /// Paused past the secondary timeout; operator-visible, not silent.
    Completed { reason: String },
    Recalculated {
        path: Arc<PredictedPath>,
        position: GeoPoint,
    },
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MissionCounters {
    pub samples_accepted: u64,
    pub samples_reviewed: u64,
    pub samples_rejected: u64,
    pub paths_generated: u64,
}

/// Read-only snapshot for the operational surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorridorView {
    pub corridor_id: CorridorId,
    pub vehicle_id: VehicleId,
    pub state: CorridorState,
    pub destination: GeoPoint,
    pub urgency: Urgency,
    pub created_at: DateTime<Utc>,
    pub last_movement_at: Option<DateTime<Utc>>,
    pub position: Option<GeoPoint>,
    pub path_id: Option<PathId>,
    pub estimated_arrival: Option<DateTime<Utc>>,
    pub path_confidence: Option<f64>,
    pub path_partial: Option<bool>,
    pub active_targets: usize,
}

pub struct CorridorEngine {
    corridor_id: CorridorId,
    vehicle_id: VehicleId,
    destination: GeoPoint,
    urgency: Urgency,
    state: CorridorState,
    created_at: DateTime<Utc>,
    settings: CorridorSettings,
    validator: Arc<TelemetryValidator>,
    predictor: Arc<dyn RoutePredictor>,

    current_position: Option<GeoPoint>,
    movement_anchor: Option<GeoPoint>,
    last_movement_at: Option<DateTime<Utc>>,
    paused_at: Option<DateTime<Utc>>,

    // Append-only: recalculation supersedes, never edits.
    path_history: Vec<Arc<PredictedPath>>,
    cost_baseline: f64,
    last_recalc_at: Option<DateTime<Utc>>,

    counters: MissionCounters,
    completion_reason: Option<String>,
}

impl std::fmt::Debug for CorridorEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorridorEngine")
            .field("corridor_id", &self.corridor_id)
            .field("vehicle_id", &self.vehicle_id)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl CorridorEngine {
    /// A corridor object only comes into existence on upstream
    /// authentication success; a failed result never constructs one.
    pub fn new(
        vehicle_id: VehicleId,
        destination: GeoPoint,
        urgency: Urgency,
        auth: &AuthenticationResult,
        settings: CorridorSettings,
        validator: Arc<TelemetryValidator>,
        predictor: Arc<dyn RoutePredictor>,
    ) -> Result<Self, OrchestrationError> {
        if !auth.success {
            return Err(OrchestrationError::VehicleNotAuthenticated(vehicle_id));
        }

        let mut state = CorridorState::Requested;
        transition(&mut state, CorridorState::Authenticated)
            .expect("REQUESTED -> AUTHENTICATED is always legal");

        Ok(Self {
            corridor_id: CorridorId::new(),
            vehicle_id,
            destination,
            urgency,
            state,
            created_at: Utc::now(),
            settings,
            validator,
            predictor,
            current_position: None,
            movement_anchor: None,
            last_movement_at: None,
            paused_at: None,
            path_history: Vec::new(),
            cost_baseline: 0.0,
            last_recalc_at: None,
            counters: MissionCounters::default(),
            completion_reason: None,
        })
    }

    pub fn corridor_id(&self) -> CorridorId {
        self.corridor_id
    }

    pub fn vehicle_id(&self) -> &VehicleId {
        &self.vehicle_id
    }

    pub fn state(&self) -> CorridorState {
        self.state
    }

    pub fn destination(&self) -> GeoPoint {
        self.destination
    }

    pub fn counters(&self) -> MissionCounters {
        self.counters
    }

    pub fn path_count(&self) -> usize {
        self.path_history.len()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn completion_reason(&self) -> Option<&str> {
        self.completion_reason.as_deref()
    }

    pub fn current_path(&self) -> Option<Arc<PredictedPath>> {
        self.path_history.last().cloned()
    }

    /// First route calculation. Must produce at least a partial path
    /// inside the activation window or the corridor fails to activate
    /// with a specific reason.
    pub async fn activate(
        &mut self,
        origin: GeoPoint,
        now: DateTime<Utc>,
    ) -> Result<Arc<PredictedPath>, OrchestrationError> {
        if self.state != CorridorState::Authenticated {
            return Err(OrchestrationError::AlreadyActive(self.vehicle_id.clone()));
        }

        let window = Duration::from_millis(self.settings.activation_window_ms);
        let predicted = tokio::time::timeout(
            window,
            self.predictor.predict(origin, self.destination, self.urgency),
        )
        .await;

        let path = match predicted {
            Err(_) => {
                warn!(corridor = %self.corridor_id, "activation window expired before a path was available");
                return Err(OrchestrationError::ActivationTimeout(
                    self.settings.activation_window_ms,
                ));
            }
            Ok(Err(err)) => {
                warn!(corridor = %self.corridor_id, %err, "activation failed: no route");
                return Err(OrchestrationError::NoRouteFound(err.to_string()));
            }
            Ok(Ok(path)) => Arc::new(path),
        };

        transition(&mut self.state, CorridorState::RouteCalculated)
            .expect("AUTHENTICATED -> ROUTE_CALCULATED after first path");
        transition(&mut self.state, CorridorState::Active)
            .expect("ROUTE_CALCULATED -> ACTIVE is immediate");

        self.cost_baseline = self.predictor.aggregate_cost(&path).await;
        self.path_history.push(path.clone());
        self.counters.paths_generated += 1;
        self.last_recalc_at = Some(now);
        self.current_position = Some(origin);
        self.movement_anchor = Some(origin);
        self.last_movement_at = Some(now);

        info!(
            corridor = %self.corridor_id,
            vehicle = %self.vehicle_id,
            path = %path.path_id,
            confidence = path.confidence,
            "corridor active"
        );
        Ok(path)
    }

    /// Process one raw sample, in arrival order. The caller guarantees
    /// samples for this corridor are fed sequentially.
    pub async fn on_telemetry(
        &mut self,
        sample: PositionSample,
        now: DateTime<Utc>,
    ) -> TelemetryEffect {
        if !self.state.accepts_telemetry() {
            debug!(corridor = %self.corridor_id, state = %self.state, "dropping telemetry");
            return TelemetryEffect::Ignored;
        }

        match self.validator.assess(sample).await {
            Assessment::Rejected { spoofing, .. } => {
                self.counters.samples_rejected += 1;
                match spoofing {
                    Some(event) => {
                        transition(&mut self.state, CorridorState::Frozen)
                            .expect("ACTIVE/PAUSED -> FROZEN on spoofing");
                        warn!(
                            corridor = %self.corridor_id,
                            vehicle = %event.vehicle_id,
                            "spoofing detected, corridor frozen pending manual verification"
                        );
                        TelemetryEffect::Frozen(event)
                    }
                    None => TelemetryEffect::Ignored,
                }
            }
            Assessment::Review(vp) => {
                self.counters.samples_reviewed += 1;
                // Review-band samples keep the movement clock honest
                // during signal degradation but never feed the path
                // position used for recalculation and targeting.
                let moved = self.note_movement(vp.sample.point, vp.sample.timestamp);
                if moved && self.state == CorridorState::Paused {
                    self.resume("movement under review confidence");
                }
                TelemetryEffect::StateOnly
            }
            Assessment::Accepted(vp) => {
                self.counters.samples_accepted += 1;
                let position = vp.sample.point;
                let moved = self.note_movement(position, vp.sample.timestamp);
                self.current_position = Some(position);

                if self.state == CorridorState::Paused {
                    if moved {
                        self.resume("movement resumed");
                    } else {
                        return TelemetryEffect::StateOnly;
                    }
                }

                let path_changed = self.maybe_recalculate(position, now).await;
                let path = self
                    .current_path()
                    .expect("an active corridor always has a path");
                TelemetryEffect::Retarget {
                    path,
                    position,
                    path_changed,
                }
            }
        }
    }

    /// Cadence tick from the worker: stationary detection, pause
    /// escalation, and the recalculation safety net.
    pub async fn on_tick(&mut self, now: DateTime<Utc>) -> TickEffect {
        match self.state {
            CorridorState::Active => {
                let idle_s = self
                    .last_movement_at
                    .map(|t| (now - t).num_seconds())
                    .unwrap_or(0);
                if idle_s >= self.settings.pause_after_s {
                    transition(&mut self.state, CorridorState::Paused)
                        .expect("ACTIVE -> PAUSED on stationary timeout");
                    self.paused_at = Some(now);
                    info!(corridor = %self.corridor_id, idle_s, "no movement beyond epsilon, corridor paused");
                    return TickEffect::Paused;
                }

                let position = match self.current_position {
                    Some(p) => p,
                    None => return TickEffect::None,
                };
                if self.maybe_recalculate(position, now).await {
                    let path = self
                        .current_path()
                        .expect("recalculation just stored a path");
                    return TickEffect::Recalculated { path, position };
                }
                TickEffect::None
            }
            CorridorState::Paused => {
                let paused_s = self
                    .paused_at
                    .map(|t| (now - t).num_seconds())
                    .unwrap_or(0);
                if paused_s >= self.settings.complete_after_paused_s {
                    let reason = format!(
                        "paused past secondary timeout ({paused_s}s without movement)"
                    );
                    self.complete(&reason);
                    return TickEffect::Completed { reason };
                }
                TickEffect::None
            }
            _ => TickEffect::None,
        }
    }

    /// Explicit operator/vehicle deactivation.
    pub fn deactivate(&mut self, reason: &str) -> Result<(), TransitionError> {
        if self.state.is_terminal() {
            return Err(TransitionError {
                from: self.state,
                to: CorridorState::Completed,
            });
        }
        self.complete(reason);
        Ok(())
    }

    /// A frozen corridor resumes only on an explicit re-authentication
    /// success.
    pub fn resume_from_reauth(
        &mut self,
        auth: &AuthenticationResult,
    ) -> Result<(), OrchestrationError> {
        if !auth.success {
            return Err(OrchestrationError::VehicleNotAuthenticated(
                self.vehicle_id.clone(),
            ));
        }
        if self.state != CorridorState::Frozen {
            debug!(corridor = %self.corridor_id, state = %self.state, "re-authentication with nothing to resume");
            return Ok(());
        }
        transition(&mut self.state, CorridorState::Active)
            .expect("FROZEN -> ACTIVE on re-authentication");
        info!(corridor = %self.corridor_id, "re-authenticated, corridor active again");
        Ok(())
    }

    pub fn view(&self) -> CorridorView {
        let path = self.current_path();
        CorridorView {
            corridor_id: self.corridor_id,
            vehicle_id: self.vehicle_id.clone(),
            state: self.state,
            destination: self.destination,
            urgency: self.urgency,
            created_at: self.created_at,
            last_movement_at: self.last_movement_at,
            position: self.current_position,
            path_id: path.as_ref().map(|p| p.path_id),
            estimated_arrival: path.as_ref().map(|p| p.estimated_arrival),
            path_confidence: path.as_ref().map(|p| p.confidence),
            path_partial: path.as_ref().map(|p| p.partial),
            active_targets: 0,
        }
    }

    fn complete(&mut self, reason: &str) {
        transition(&mut self.state, CorridorState::Completed)
            .expect("any live state completes on request");
        self.completion_reason = Some(reason.to_string());
        self.validator.forget(&self.vehicle_id);
        info!(corridor = %self.corridor_id, vehicle = %self.vehicle_id, reason, "corridor completed");
    }

    fn resume(&mut self, cause: &str) {
        transition(&mut self.state, CorridorState::Active)
            .expect("PAUSED -> ACTIVE on movement");
        self.paused_at = None;
        info!(corridor = %self.corridor_id, cause, "corridor resumed");
    }

    /// Track whether the vehicle has moved beyond the stationary
    /// epsilon. Returns true when it has.
    fn note_movement(&mut self, point: GeoPoint, at: DateTime<Utc>) -> bool {
        match self.movement_anchor {
            None => {
                self.movement_anchor = Some(point);
                self.last_movement_at = Some(at);
                true
            }
            Some(anchor) => {
                if haversine_m(anchor, point) > self.settings.stationary_epsilon_m {
                    self.movement_anchor = Some(point);
                    self.last_movement_at = Some(at);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Recalculate when the aggregate traffic cost has drifted more than
    /// the configured fraction since the current path was generated, or
    /// on the fixed cadence, whichever comes first. A failed
    /// recalculation keeps the previous path; degradation is absorbed,
    /// not propagated.
    async fn maybe_recalculate(&mut self, position: GeoPoint, now: DateTime<Utc>) -> bool {
        let current_path = match self.current_path() {
            Some(p) => p,
            None => return false,
        };

        let cadence_due = self
            .last_recalc_at
            .map(|t| (now - t).num_seconds() >= self.settings.recalc_cadence_s)
            .unwrap_or(true);

        let cost_due = if cadence_due {
            false
        } else {
            let current_cost = self.predictor.aggregate_cost(&current_path).await;
            let base = self.cost_baseline.max(0.05);
            (current_cost - self.cost_baseline).abs() / base > self.settings.recalc_cost_delta
        };

        if !cadence_due && !cost_due {
            return false;
        }

        match self
            .predictor
            .recalculate(position, self.destination, self.urgency, &current_path)
            .await
        {
            Ok(new_path) => {
                let new_path = Arc::new(new_path);
                self.cost_baseline = self.predictor.aggregate_cost(&new_path).await;
                self.path_history.push(new_path.clone());
                self.counters.paths_generated += 1;
                self.last_recalc_at = Some(now);
                debug!(
                    corridor = %self.corridor_id,
                    path = %new_path.path_id,
                    cadence_due,
                    cost_due,
                    "path superseded"
                );
                true
            }
            Err(err) => {
                warn!(corridor = %self.corridor_id, %err, "recalculation failed, keeping previous path");
                self.last_recalc_at = Some(now);
                false
            }
        }
    }
}
