//! Alert targeting.
//!
//! Membership is geometric: a candidate is targeted when it sits within
//! the lateral buffer of any path segment inside the forward look-ahead
//! window, measured from the emergency vehicle's projection onto the
//! path. The look-ahead is bounded on purpose: it caps both the target
//! set size and the recomputation cost per update.
//!
//! Everything here is a pure function of its inputs. The registry diffs
//! successive target sets, so two identical computations must produce
//! identical output.

use std::collections::BTreeMap;

use chrono::Utc;
use tracing::trace;

use shared::config::TargetingSettings;
use shared::geo::{
    along_track_distance_m, bearing_diff_deg, cross_track_distance_m, initial_bearing_deg,
    point_to_segment_m, GeoPoint,
};
use shared::types::{
    CivilianVehicle, CorridorId, Guidance, GuidanceRecord, PredictedPath, TargetSet, VehicleId,
};

/// A position resolved against a path: how far along it lies and the
/// estimated travel time to reach it.
#[derive(Debug, Clone, Copy)]
pub struct PathAnchor {
    pub distance_m: f64,
    pub duration_s: f64,
    pub segment_index: usize,
}

/// Project `point` onto the nearest path segment.
pub fn project_onto_path(path: &PredictedPath, point: GeoPoint) -> Option<PathAnchor> {
    let mut best: Option<(f64, PathAnchor)> = None;

    for (i, (a, b)) in path.segments().enumerate() {
        let seg_len = b.cumulative_distance_m - a.cumulative_distance_m;
        if seg_len <= 0.0 {
            continue;
        }
        let lateral = point_to_segment_m(point, a.point, b.point);
        let along = along_track_distance_m(point, a.point, b.point).clamp(0.0, seg_len);
        let frac = along / seg_len;
        let anchor = PathAnchor {
            distance_m: a.cumulative_distance_m + along,
            duration_s: a.cumulative_duration_s
                + frac * (b.cumulative_duration_s - a.cumulative_duration_s),
            segment_index: i,
        };
        if best.map(|(d, _)| lateral < d).unwrap_or(true) {
            best = Some((lateral, anchor));
        }
    }

    best.map(|(_, anchor)| anchor)
}

pub trait TargetingEngine: Send + Sync {
    fn compute_targets(
        &self,
        corridor_id: CorridorId,
        path: &PredictedPath,
        vehicle_position: GeoPoint,
        candidates: &[CivilianVehicle],
    ) -> TargetSet;
}

pub struct GeometricTargeting {
    settings: TargetingSettings,
}

impl GeometricTargeting {
    pub fn new(settings: TargetingSettings) -> Self {
        Self { settings }
    }

    fn guidance_for(
        &self,
        candidate: &CivilianVehicle,
        tangent_deg: f64,
        signed_cross_m: f64,
    ) -> Guidance {
        let relative = bearing_diff_deg(tangent_deg, candidate.heading_deg);
        if relative.abs() <= self.settings.pull_over_cone_deg {
            // Travelling with the corridor, directly ahead of the
            // emergency vehicle: clear the lane completely.
            Guidance::PullOver
        } else if signed_cross_m >= 0.0 {
            Guidance::Right
        } else {
            Guidance::Left
        }
    }
}

impl TargetingEngine for GeometricTargeting {
    fn compute_targets(
        &self,
        corridor_id: CorridorId,
        path: &PredictedPath,
        vehicle_position: GeoPoint,
        candidates: &[CivilianVehicle],
    ) -> TargetSet {
        let mut entries = BTreeMap::new();

        let Some(vehicle_anchor) = project_onto_path(path, vehicle_position) else {
            return TargetSet {
                corridor_id,
                computed_at: Utc::now(),
                entries,
            };
        };

        let window_start = vehicle_anchor.distance_m;
        let window_end = window_start + self.settings.look_ahead_m;

        for candidate in candidates {
            let mut best: Option<(f64, usize)> = None;

            for (i, (a, b)) in path.segments().enumerate() {
                // Segment must overlap the forward window.
                if b.cumulative_distance_m < window_start || a.cumulative_distance_m > window_end {
                    continue;
                }
                let lateral = point_to_segment_m(candidate.position, a.point, b.point);
                if lateral > self.settings.lateral_buffer_m {
                    continue;
                }
                if best.map(|(d, _)| lateral < d).unwrap_or(true) {
                    best = Some((lateral, i));
                }
            }

            let Some((_, seg_idx)) = best else { continue };

            let a = &path.waypoints[seg_idx];
            let b = &path.waypoints[seg_idx + 1];
            let tangent = initial_bearing_deg(a.point, b.point);
            let signed_cross = cross_track_distance_m(candidate.position, a.point, b.point);

            // The candidate's own along-path position must also lie in
            // the forward window, not behind the vehicle.
            let candidate_anchor = PathAnchor {
                distance_m: a.cumulative_distance_m
                    + along_track_distance_m(candidate.position, a.point, b.point)
                        .clamp(0.0, b.cumulative_distance_m - a.cumulative_distance_m),
                duration_s: 0.0,
                segment_index: seg_idx,
            };
            if candidate_anchor.distance_m + self.settings.lateral_buffer_m < window_start {
                continue;
            }

            let eta_s =
                (eta_at(path, candidate_anchor.distance_m) - vehicle_anchor.duration_s).max(0.0);

            entries.insert(
                candidate.id.clone(),
                GuidanceRecord {
                    guidance: self.guidance_for(candidate, tangent, signed_cross),
                    eta_seconds: eta_s.round() as u32,
                },
            );
        }

        trace!(corridor = %corridor_id, targets = entries.len(), "target set computed");
        TargetSet {
            corridor_id,
            computed_at: Utc::now(),
            entries,
        }
    }
}

/// Estimated travel time from the path origin to `distance_m` along it,
/// interpolated between waypoint timings.
fn eta_at(path: &PredictedPath, distance_m: f64) -> f64 {
    for (a, b) in path.segments() {
        if distance_m <= b.cumulative_distance_m {
            let seg_len = b.cumulative_distance_m - a.cumulative_distance_m;
            if seg_len <= 0.0 {
                return a.cumulative_duration_s;
            }
            let frac = ((distance_m - a.cumulative_distance_m) / seg_len).clamp(0.0, 1.0);
            return a.cumulative_duration_s
                + frac * (b.cumulative_duration_s - a.cumulative_duration_s);
        }
    }
    path.waypoints
        .last()
        .map(|w| w.cumulative_duration_s)
        .unwrap_or(0.0)
}

#[derive(Debug, Clone, Default)]
pub struct TargetDiff {
    /// Newly in range: send an alert.
    pub alerts: Vec<(VehicleId, GuidanceRecord)>,
    /// Still in range with materially changed guidance or ETA.
    pub updates: Vec<(VehicleId, GuidanceRecord)>,
    /// Passed and safe to resume normal driving.
    pub clearances: Vec<VehicleId>,
}

impl TargetDiff {
    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty() && self.updates.is_empty() && self.clearances.is_empty()
    }
}

/// Diff two consecutive target sets for the same corridor.
///
/// Alerts are `keys(new) − keys(old)`, clearances are `keys(old) −
/// keys(new)`, and an entry present in both only becomes an update when
/// its guidance changed or its ETA moved by at least
/// `eta_threshold_s`.
pub fn diff_target_sets(old: &TargetSet, new: &TargetSet, eta_threshold_s: u32) -> TargetDiff {
    let mut diff = TargetDiff::default();

    for (id, record) in &new.entries {
        match old.entries.get(id) {
            None => diff.alerts.push((id.clone(), *record)),
            Some(previous) => {
                let guidance_changed = previous.guidance != record.guidance;
                let eta_moved =
                    previous.eta_seconds.abs_diff(record.eta_seconds) >= eta_threshold_s;
                if guidance_changed || eta_moved {
                    diff.updates.push((id.clone(), *record));
                }
            }
        }
    }

    for id in old.entries.keys() {
        if !new.entries.contains_key(id) {
            diff.clearances.push(id.clone());
        }
    }

    diff
}

/// Radius around the vehicle that the candidate feed must cover so that
/// no buffer member can be missed.
pub fn candidate_radius_m(settings: &TargetingSettings) -> f64 {
    settings
        .candidate_radius_m
        .max(settings.look_ahead_m + settings.lateral_buffer_m)
}
