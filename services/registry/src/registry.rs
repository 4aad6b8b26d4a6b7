//! The orchestration registry.
//!
//! Single authority for corridor uniqueness and for routing telemetry to
//! the owning corridor's worker. The vehicle index is the only structure
//! touched by more than one concurrent operation; dashmap gives it
//! per-key locking, so activations and lookups for unrelated vehicles
//! never contend.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use alert_targeting::TargetingEngine;
use corridor_engine::{CorridorEngine, CorridorState, CorridorView};
use route_predictor::RoutePredictor;
use shared::config::Settings;
use shared::error::OrchestrationError;
use shared::geo::GeoPoint;
use shared::types::{CorridorId, PositionSample, Urgency, VehicleId};
use telemetry_validator::TelemetryValidator;

use crate::dispatch::{AlertDispatcher, Archival, Authenticator, CandidateSource};
use crate::worker::{Command, CorridorWorker};

const COMMAND_BUFFER: usize = 64;

/// The capability interfaces, selected once at construction.
pub struct EngineStack {
    pub validator: Arc<TelemetryValidator>,
    pub predictor: Arc<dyn RoutePredictor>,
    pub targeting: Arc<dyn TargetingEngine>,
}

/// External collaborators reached only through their narrow traits.
pub struct Collaborators {
    pub authenticator: Arc<dyn Authenticator>,
    pub candidates: Arc<dyn CandidateSource>,
    pub dispatcher: Arc<dyn AlertDispatcher>,
    pub archival: Arc<dyn Archival>,
}

#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub state: Option<CorridorState>,
    pub vehicle: Option<VehicleId>,
}

enum Slot {
    /// Activation in flight; holds the vehicle key so no second
    /// activation can slip in while auth and routing run.
    Reserved,
    Live(Arc<LiveHandle>),
}

struct LiveHandle {
    corridor_id: CorridorId,
    tx: mpsc::Sender<Command>,
    cancel: CancellationToken,
    status: Arc<RwLock<CorridorView>>,
    finished: watch::Receiver<bool>,
}

pub struct CorridorRegistry {
    settings: Settings,
    engines: EngineStack,
    collaborators: Collaborators,
    vehicles: Arc<DashMap<VehicleId, Slot>>,
    corridors: Arc<DashMap<CorridorId, VehicleId>>,
}

impl CorridorRegistry {
    pub fn new(settings: Settings, engines: EngineStack, collaborators: Collaborators) -> Self {
        Self {
            settings,
            engines,
            collaborators,
            vehicles: Arc::new(DashMap::new()),
            corridors: Arc::new(DashMap::new()),
        }
    }

    /// Activate a corridor for a vehicle. At most one non-completed
    /// corridor may exist per vehicle; the reservation makes that hold
    /// under any interleaving of concurrent activations.
    pub async fn activate(
        &self,
        vehicle_id: VehicleId,
        origin: GeoPoint,
        destination: GeoPoint,
        urgency: Urgency,
    ) -> Result<CorridorView, OrchestrationError> {
        match self.vehicles.entry(vehicle_id.clone()) {
            Entry::Occupied(_) => {
                return Err(OrchestrationError::AlreadyActive(vehicle_id));
            }
            Entry::Vacant(slot) => {
                slot.insert(Slot::Reserved);
            }
        }

        match self
            .activate_reserved(vehicle_id.clone(), origin, destination, urgency)
            .await
        {
            Ok(view) => Ok(view),
            Err(err) => {
                self.vehicles
                    .remove_if(&vehicle_id, |_, slot| matches!(slot, Slot::Reserved));
                Err(err)
            }
        }
    }

    async fn activate_reserved(
        &self,
        vehicle_id: VehicleId,
        origin: GeoPoint,
        destination: GeoPoint,
        urgency: Urgency,
    ) -> Result<CorridorView, OrchestrationError> {
        let auth = self.collaborators.authenticator.verify(&vehicle_id).await;
        if !auth.success {
            info!(vehicle = %vehicle_id, reason = ?auth.reason, "activation denied by authenticator");
            return Err(OrchestrationError::VehicleNotAuthenticated(vehicle_id));
        }

        let mut engine = CorridorEngine::new(
            vehicle_id.clone(),
            destination,
            urgency,
            &auth,
            self.settings.corridor.clone(),
            self.engines.validator.clone(),
            self.engines.predictor.clone(),
        )?;
        engine.activate(origin, chrono::Utc::now()).await?;

        let corridor_id = engine.corridor_id();
        let view = engine.view();
        let status = Arc::new(RwLock::new(view.clone()));

        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let (finished_tx, finished_rx) = watch::channel(false);
        let cancel = CancellationToken::new();

        let worker = CorridorWorker::new(
            engine,
            self.settings.clone(),
            self.engines.targeting.clone(),
            self.collaborators.candidates.clone(),
            self.collaborators.dispatcher.clone(),
            status.clone(),
        );

        let handle = Arc::new(LiveHandle {
            corridor_id,
            tx,
            cancel: cancel.clone(),
            status,
            finished: finished_rx,
        });

        self.corridors.insert(corridor_id, vehicle_id.clone());
        self.vehicles
            .insert(vehicle_id.clone(), Slot::Live(handle.clone()));

        let vehicles = self.vehicles.clone();
        let corridors = self.corridors.clone();
        let archival = self.collaborators.archival.clone();
        tokio::spawn(async move {
            let summary = worker.run(rx, cancel).await;
            corridors.remove(&corridor_id);
            vehicles.remove_if(&vehicle_id, |_, slot| match slot {
                Slot::Live(h) => h.corridor_id == corridor_id,
                Slot::Reserved => false,
            });
            archival.archive(summary).await;
            // Signalled last: a deactivation caller observes the index
            // cleaned and the summary archived.
            let _ = finished_tx.send(true);
        });

        info!(corridor = %corridor_id, vehicle = %view.vehicle_id, "corridor registered");
        Ok(view)
    }

    /// Deactivate a corridor and wait for its in-flight work to unwind.
    pub async fn deactivate(&self, corridor_id: CorridorId) -> Result<(), OrchestrationError> {
        let handle = self.live_handle(corridor_id)?;
        handle.cancel.cancel();

        let mut finished = handle.finished.clone();
        while !*finished.borrow() {
            if finished.changed().await.is_err() {
                break;
            }
        }
        debug!(corridor = %corridor_id, "corridor deactivated");
        Ok(())
    }

    /// Route a raw sample to the owning corridor. Ingestion never blocks
    /// on a busy corridor; a full queue drops the sample, which telemetry
    /// tolerates by design of the ordering rules.
    pub fn on_telemetry(
        &self,
        vehicle_id: &VehicleId,
        sample: PositionSample,
    ) -> Result<(), OrchestrationError> {
        let handle = match self.vehicles.get(vehicle_id) {
            Some(entry) => match &*entry {
                Slot::Live(handle) => handle.clone(),
                Slot::Reserved => {
                    return Err(OrchestrationError::NoActiveCorridor(vehicle_id.clone()))
                }
            },
            None => {
                return Err(OrchestrationError::NoActiveCorridor(vehicle_id.clone()));
            }
        };

        if let Err(err) = handle.tx.try_send(Command::Telemetry(sample)) {
            warn!(vehicle = %vehicle_id, %err, "telemetry queue full, dropping sample");
        }
        Ok(())
    }

    /// Re-run authentication for a frozen corridor and resume it on
    /// success.
    pub async fn reauthenticate(&self, corridor_id: CorridorId) -> Result<(), OrchestrationError> {
        let handle = self.live_handle(corridor_id)?;
        let vehicle_id = self
            .corridors
            .get(&corridor_id)
            .map(|v| v.clone())
            .ok_or(OrchestrationError::CorridorNotFound(corridor_id))?;

        let auth = self.collaborators.authenticator.verify(&vehicle_id).await;
        if !auth.success {
            return Err(OrchestrationError::VehicleNotAuthenticated(vehicle_id));
        }

        handle
            .tx
            .send(Command::Reauthenticate(auth))
            .await
            .map_err(|_| OrchestrationError::CorridorNotFound(corridor_id))?;
        Ok(())
    }

    pub fn list_active(&self, filter: &ListFilter) -> Vec<CorridorView> {
        let mut views: Vec<CorridorView> = self
            .vehicles
            .iter()
            .filter_map(|entry| match entry.value() {
                Slot::Live(handle) => Some(handle.status.read().clone()),
                Slot::Reserved => None,
            })
            .filter(|view| !view.state.is_terminal())
            .filter(|view| filter.state.map(|s| view.state == s).unwrap_or(true))
            .filter(|view| {
                filter
                    .vehicle
                    .as_ref()
                    .map(|v| &view.vehicle_id == v)
                    .unwrap_or(true)
            })
            .collect();
        views.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        views
    }

    pub fn view(&self, corridor_id: CorridorId) -> Result<CorridorView, OrchestrationError> {
        let handle = self.live_handle(corridor_id)?;
        let view = handle.status.read().clone();
        Ok(view)
    }

    pub fn active_count(&self) -> usize {
        self.corridors.len()
    }

    /// Drain every live corridor: cancel, wait for unwind, archive.
    pub async fn shutdown(&self) {
        let handles: Vec<Arc<LiveHandle>> = self
            .vehicles
            .iter()
            .filter_map(|entry| match entry.value() {
                Slot::Live(handle) => Some(handle.clone()),
                Slot::Reserved => None,
            })
            .collect();

        info!(corridors = handles.len(), "draining corridor registry");
        for handle in &handles {
            handle.cancel.cancel();
        }
        for handle in handles {
            let mut finished = handle.finished.clone();
            while !*finished.borrow() {
                if finished.changed().await.is_err() {
                    break;
                }
            }
        }
    }

    fn live_handle(&self, corridor_id: CorridorId) -> Result<Arc<LiveHandle>, OrchestrationError> {
        let vehicle_id = self
            .corridors
            .get(&corridor_id)
            .map(|v| v.clone())
            .ok_or(OrchestrationError::CorridorNotFound(corridor_id))?;

        match self.vehicles.get(&vehicle_id) {
            Some(entry) => match &*entry {
                Slot::Live(handle) if handle.corridor_id == corridor_id => Ok(handle.clone()),
                _ => Err(OrchestrationError::CorridorNotFound(corridor_id)),
            },
            None => Err(OrchestrationError::CorridorNotFound(corridor_id)),
        }
    }
}
