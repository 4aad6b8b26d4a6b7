//! Per-corridor worker task.
//!
//! One task owns one `CorridorEngine`; every state transition and
//! recomputation for that corridor runs here, strictly sequentially, so
//! corridors never contend with each other. Cancellation (deactivation)
//! aborts in-flight work at its next await point, which guarantees a
//! cancelled recalculation never publishes a target set.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use alert_targeting::{candidate_radius_m, diff_target_sets, TargetingEngine};
use corridor_engine::{CorridorEngine, CorridorView, TelemetryEffect, TickEffect};
use shared::config::Settings;
use shared::geo::GeoPoint;
use shared::types::{AuthenticationResult, PositionSample, PredictedPath, TargetSet};

use crate::dispatch::{AlertDispatcher, AlertKind, AlertMessage, CandidateSource, MissionSummary};

#[derive(Debug)]
pub(crate) enum Command {
    Telemetry(PositionSample),
    Reauthenticate(AuthenticationResult),
}

pub(crate) struct CorridorWorker {
    engine: CorridorEngine,
    settings: Settings,
    targeting: Arc<dyn TargetingEngine>,
    candidates: Arc<dyn CandidateSource>,
    dispatcher: Arc<dyn AlertDispatcher>,
    status: Arc<RwLock<CorridorView>>,
    last_target_set: TargetSet,
    alerts_sent: u64,
    updates_sent: u64,
    clearances_sent: u64,
}

impl CorridorWorker {
    pub(crate) fn new(
        engine: CorridorEngine,
        settings: Settings,
        targeting: Arc<dyn TargetingEngine>,
        candidates: Arc<dyn CandidateSource>,
        dispatcher: Arc<dyn AlertDispatcher>,
        status: Arc<RwLock<CorridorView>>,
    ) -> Self {
        let last_target_set = TargetSet::empty(engine.corridor_id());
        Self {
            engine,
            settings,
            targeting,
            candidates,
            dispatcher,
            status,
            last_target_set,
            alerts_sent: 0,
            updates_sent: 0,
            clearances_sent: 0,
        }
    }

    /// Drive the corridor until it reaches a terminal state or is
    /// cancelled. Returns the mission summary for archival.
    pub(crate) async fn run(
        mut self,
        mut rx: mpsc::Receiver<Command>,
        cancel: CancellationToken,
    ) -> MissionSummary {
        // Alerts start flowing at activation, not at the first
        // telemetry update.
        if let (Some(path), Some(position)) = (self.engine.current_path(), self.initial_position())
        {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = self.retarget(path, position) => {}
            }
        }
        self.publish_status();

        let mut tick = tokio::time::interval(Duration::from_secs(
            self.settings.corridor.recalc_cadence_s.max(1) as u64,
        ));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tick.reset();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                maybe = rx.recv() => match maybe {
                    Some(Command::Telemetry(sample)) => {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = self.handle_telemetry(sample) => {}
                        }
                    }
                    Some(Command::Reauthenticate(auth)) => {
                        if let Err(err) = self.engine.resume_from_reauth(&auth) {
                            warn!(corridor = %self.engine.corridor_id(), %err, "re-authentication rejected");
                        }
                    }
                    None => {
                        debug!(corridor = %self.engine.corridor_id(), "command channel closed");
                        break;
                    }
                },
                _ = tick.tick() => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        effect = self.engine.on_tick(Utc::now()) => match effect {
                            TickEffect::Recalculated { path, position } => {
                                self.retarget(path, position).await;
                            }
                            TickEffect::Completed { .. } => {
                                self.publish_status();
                                break;
                            }
                            TickEffect::Paused | TickEffect::None => {}
                        }
                    }
                }
            }

            self.publish_status();
            if self.engine.state().is_terminal() {
                break;
            }
        }

        if !self.engine.state().is_terminal() {
            if let Err(err) = self.engine.deactivate("deactivated") {
                warn!(corridor = %self.engine.corridor_id(), %err, "deactivation raced completion");
            }
        }
        self.publish_status();
        self.summary()
    }

    fn initial_position(&self) -> Option<GeoPoint> {
        self.status.read().position
    }

    async fn handle_telemetry(&mut self, sample: PositionSample) {
        match self.engine.on_telemetry(sample, Utc::now()).await {
            TelemetryEffect::Retarget { path, position, .. } => {
                self.retarget(path, position).await;
            }
            TelemetryEffect::Frozen(event) => {
                info!(
                    corridor = %self.engine.corridor_id(),
                    vehicle = %event.vehicle_id,
                    reject_count = event.reject_count,
                    "target emission suspended, corridor frozen"
                );
            }
            TelemetryEffect::StateOnly | TelemetryEffect::Ignored => {}
        }
    }

    /// Recompute the target set at the given position and fan the diff
    /// out to the dispatcher.
    async fn retarget(&mut self, path: Arc<PredictedPath>, position: GeoPoint) {
        let radius = candidate_radius_m(&self.settings.targeting);
        let candidates = self.candidates.candidates_near(position, radius).await;
        let new_set =
            self.targeting
                .compute_targets(self.engine.corridor_id(), &path, position, &candidates);

        let diff = diff_target_sets(
            &self.last_target_set,
            &new_set,
            self.settings.targeting.eta_update_threshold_s,
        );

        for (vehicle, record) in &diff.alerts {
            self.dispatch(AlertMessage {
                corridor_id: self.engine.corridor_id(),
                civilian_vehicle_id: vehicle.clone(),
                kind: AlertKind::Alert,
                guidance: Some(record.guidance),
                eta_seconds: Some(record.eta_seconds),
            })
            .await;
        }
        for (vehicle, record) in &diff.updates {
            self.dispatch(AlertMessage {
                corridor_id: self.engine.corridor_id(),
                civilian_vehicle_id: vehicle.clone(),
                kind: AlertKind::Update,
                guidance: Some(record.guidance),
                eta_seconds: Some(record.eta_seconds),
            })
            .await;
        }
        for vehicle in &diff.clearances {
            self.dispatch(AlertMessage {
                corridor_id: self.engine.corridor_id(),
                civilian_vehicle_id: vehicle.clone(),
                kind: AlertKind::Clearance,
                guidance: None,
                eta_seconds: None,
            })
            .await;
        }

        self.last_target_set = new_set;
    }

    async fn dispatch(&mut self, message: AlertMessage) {
        let kind = message.kind;
        match self.dispatcher.dispatch(message).await {
            Ok(()) => match kind {
                AlertKind::Alert => self.alerts_sent += 1,
                AlertKind::Update => self.updates_sent += 1,
                AlertKind::Clearance => self.clearances_sent += 1,
            },
            Err(err) => {
                warn!(corridor = %self.engine.corridor_id(), %err, "alert dispatch failed");
            }
        }
    }

    fn publish_status(&self) {
        let mut view = self.engine.view();
        view.active_targets = self.last_target_set.len();
        *self.status.write() = view;
    }

    fn summary(&self) -> MissionSummary {
        let completed_at = Utc::now();
        MissionSummary {
            corridor_id: self.engine.corridor_id(),
            vehicle_id: self.engine.vehicle_id().clone(),
            destination: self.engine.destination(),
            reason: self
                .engine
                .completion_reason()
                .unwrap_or("completed")
                .to_string(),
            started_at: self.engine.created_at(),
            completed_at,
            duration_s: (completed_at - self.engine.created_at()).num_seconds(),
            path_count: self.engine.path_count(),
            counters: self.engine.counters(),
            alerts_sent: self.alerts_sent,
            updates_sent: self.updates_sent,
            clearances_sent: self.clearances_sent,
        }
    }
}
