//! Authenticity scoring for raw position reports.
//!
//! Every sample is scored against the vehicle's last accepted sample
//! (physical plausibility), its own receiver quality, and — when a
//! secondary fix source is configured — agreement with cellular
//! positioning. Classification thresholds and physical limits come from
//! `ValidatorSettings`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use shared::config::ValidatorSettings;
use shared::geo::{haversine_m, GeoPoint};
use shared::types::{AnomalyFlag, PositionSample, Severity, ValidatedPosition, VehicleId};

const KMH_PER_MPS: f64 = 3.6;
const CELL_LOOKUP_DEADLINE_MS: u64 = 100;

/// Secondary positioning signal (cellular/tower triangulation), consumed
/// as an external collaborator. `None` means no fix is available for the
/// vehicle right now.
#[async_trait]
pub trait SecondaryFix: Send + Sync {
    async fn lookup(&self, vehicle_id: &VehicleId) -> Option<GeoPoint>;
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RejectReason {
    #[error("sample timestamp is not newer than the last accepted sample")]
    OutOfOrder,
    #[error("confidence {confidence:.3} below review threshold")]
    LowConfidence { confidence: f64 },
}

/// Emitted with the rejection that crossed the consecutive-reject limit.
/// The consumer must treat this as a forced freeze, never as grounds for
/// deactivation: a false positive here would strand a real emergency
/// vehicle.
#[derive(Debug, Clone, Serialize)]
pub struct SpoofingEvent {
    pub vehicle_id: VehicleId,
    pub detected_at: DateTime<Utc>,
    pub reject_count: u32,
}

#[derive(Debug)]
pub enum Assessment {
    Accepted(ValidatedPosition),
    /// Confidence in the review band; still observable, with its flags,
    /// but not a downstream path input.
    Review(ValidatedPosition),
    Rejected {
        reason: RejectReason,
        flags: Vec<AnomalyFlag>,
        spoofing: Option<SpoofingEvent>,
    },
}

impl Assessment {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Assessment::Accepted(_))
    }
}

#[derive(Debug, Default)]
struct Track {
    last_accepted: Option<PositionSample>,
    reject_times: VecDeque<DateTime<Utc>>,
}

pub struct TelemetryValidator {
    settings: ValidatorSettings,
    tracks: DashMap<VehicleId, Track>,
    secondary: Option<Arc<dyn SecondaryFix>>,
}

impl TelemetryValidator {
    pub fn new(settings: ValidatorSettings) -> Self {
        Self {
            settings,
            tracks: DashMap::new(),
            secondary: None,
        }
    }

    pub fn with_secondary(settings: ValidatorSettings, secondary: Arc<dyn SecondaryFix>) -> Self {
        Self {
            settings,
            tracks: DashMap::new(),
            secondary: Some(secondary),
        }
    }

    /// Score and classify one sample. Per-vehicle track state advances
    /// only on acceptance; a stale sample is dropped without touching it.
    pub async fn assess(&self, sample: PositionSample) -> Assessment {
        let vehicle_id = sample.vehicle_id.clone();

        {
            let track = self.tracks.entry(vehicle_id.clone()).or_default();
            if let Some(last) = &track.last_accepted {
                if sample.timestamp <= last.timestamp {
                    debug!(vehicle = %vehicle_id, "dropping out-of-order sample");
                    return Assessment::Rejected {
                        reason: RejectReason::OutOfOrder,
                        flags: Vec::new(),
                        spoofing: None,
                    };
                }
            }
        }

        let mut flags = Vec::new();
        let plausibility = self.physical_plausibility(&vehicle_id, &sample, &mut flags);

        if sample.signal_quality < 0.5 {
            flags.push(AnomalyFlag::SignalAnomaly(Severity::Warning));
        }
        let signal = sample.signal_quality.clamp(0.0, 1.0);

        let cell = self.cell_agreement(&vehicle_id, &sample, &mut flags).await;

        // Weighted combination; the cell weight is redistributed when no
        // secondary fix was available.
        let confidence = match cell {
            Some(cell) => 0.5 * plausibility + 0.3 * signal + 0.2 * cell,
            None => (0.5 * plausibility + 0.3 * signal) / 0.8,
        };
        let confidence = confidence.clamp(0.0, 1.0);

        if confidence >= self.settings.accept_threshold {
            self.record_accept(&vehicle_id, &sample);
            Assessment::Accepted(ValidatedPosition {
                sample,
                confidence,
                flags,
            })
        } else if confidence >= self.settings.review_threshold {
            debug!(vehicle = %vehicle_id, confidence, ?flags, "sample under review");
            Assessment::Review(ValidatedPosition {
                sample,
                confidence,
                flags,
            })
        } else {
            let spoofing = self.record_reject(&vehicle_id, sample.timestamp);
            if spoofing.is_some() {
                warn!(vehicle = %vehicle_id, "consecutive reject limit crossed, raising spoofing event");
            }
            Assessment::Rejected {
                reason: RejectReason::LowConfidence { confidence },
                flags,
                spoofing,
            }
        }
    }

    /// Drop all track state for a vehicle. Called when its corridor
    /// reaches a terminal state.
    pub fn forget(&self, vehicle_id: &VehicleId) {
        self.tracks.remove(vehicle_id);
    }

    fn physical_plausibility(
        &self,
        vehicle_id: &VehicleId,
        sample: &PositionSample,
        flags: &mut Vec<AnomalyFlag>,
    ) -> f64 {
        let track = match self.tracks.get(vehicle_id) {
            Some(t) => t,
            None => return 1.0,
        };
        let last = match &track.last_accepted {
            Some(l) => l.clone(),
            None => return 1.0,
        };
        drop(track);

        let dt = (sample.timestamp - last.timestamp).num_milliseconds() as f64 / 1_000.0;
        if dt <= 0.0 {
            return 1.0;
        }

        let distance = haversine_m(last.point, sample.point);
        let derived_speed_mps = distance / dt;
        let accel_mps2 = (sample.speed_mps - last.speed_mps) / dt;

        let mut score: f64 = 1.0;

        if derived_speed_mps * KMH_PER_MPS > self.settings.max_speed_kmh {
            flags.push(AnomalyFlag::ImpossibleSpeed(Severity::Critical));
            score = 0.0;
            if distance > self.settings.jump_distance_m {
                flags.push(AnomalyFlag::LocationJump(Severity::Critical));
            }
        }

        if accel_mps2.abs() > self.settings.max_accel_mps2 {
            flags.push(AnomalyFlag::ImpossibleAcceleration(Severity::Warning));
            score = score.min(0.6);
        }

        score
    }

    async fn cell_agreement(
        &self,
        vehicle_id: &VehicleId,
        sample: &PositionSample,
        flags: &mut Vec<AnomalyFlag>,
    ) -> Option<f64> {
        let secondary = self.secondary.as_ref()?;

        let fix = tokio::time::timeout(
            Duration::from_millis(CELL_LOOKUP_DEADLINE_MS),
            secondary.lookup(vehicle_id),
        )
        .await
        .ok()
        .flatten()?;

        let disagreement = haversine_m(sample.point, fix);
        if disagreement > self.settings.cell_tolerance_m {
            flags.push(AnomalyFlag::CellMismatch(Severity::Warning));
        }
        Some((1.0 - disagreement / self.settings.cell_tolerance_m).clamp(0.0, 1.0))
    }

    fn record_accept(&self, vehicle_id: &VehicleId, sample: &PositionSample) {
        let mut track = self.tracks.entry(vehicle_id.clone()).or_default();
        track.last_accepted = Some(sample.clone());
        track.reject_times.clear();
    }

    fn record_reject(&self, vehicle_id: &VehicleId, at: DateTime<Utc>) -> Option<SpoofingEvent> {
        let mut track = self.tracks.entry(vehicle_id.clone()).or_default();
        track.reject_times.push_back(at);

        let window_start = at - chrono::Duration::seconds(self.settings.spoofing_window_s);
        while track
            .reject_times
            .front()
            .is_some_and(|t| *t < window_start)
        {
            track.reject_times.pop_front();
        }

        if track.reject_times.len() as u32 >= self.settings.spoofing_reject_count {
            let count = track.reject_times.len() as u32;
            track.reject_times.clear();
            Some(SpoofingEvent {
                vehicle_id: vehicle_id.clone(),
                detected_at: at,
                reject_count: count,
            })
        } else {
            None
        }
    }
}
