//! Route prediction.
//!
//! `RoutePredictor` is the capability seam: the conforming implementation
//! is chosen at construction and the corridor engine only sees the trait.
//! `HeuristicPredictor` builds candidate polylines (direct plus two bow
//! variants, so a blocked leading segment always leaves an alternative),
//! scores segments through the traffic provider under a whole-path
//! deadline, and returns an explicitly-partial path when that deadline
//! expires.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info};

use shared::config::PredictorSettings;
use shared::geo::{
    bearing_diff_deg, destination_point, haversine_m, initial_bearing_deg, interpolate, GeoPoint,
};
use shared::types::{PathId, PredictedPath, Urgency, Waypoint};

use crate::traffic::TrafficProvider;

/// Heading change that counts as a direction change for the stability
/// tie-break.
const DIRECTION_CHANGE_DEG: f64 = 15.0;
/// Bow apex offset as a fraction of the direct distance.
const BOW_FRACTION: f64 = 0.15;
const BOW_OFFSET_MIN_M: f64 = 200.0;
const BOW_OFFSET_MAX_M: f64 = 2_000.0;

#[derive(Debug, Clone, Error)]
pub enum PredictError {
    #[error("not routable: {0}")]
    NotRoutable(String),
}

#[async_trait]
pub trait RoutePredictor: Send + Sync {
    async fn predict(
        &self,
        origin: GeoPoint,
        destination: GeoPoint,
        urgency: Urgency,
    ) -> Result<PredictedPath, PredictError>;

    /// Produce a successor path from the vehicle's current position. The
    /// previous path is input for stability, never mutated.
    async fn recalculate(
        &self,
        current: GeoPoint,
        destination: GeoPoint,
        urgency: Urgency,
        previous: &PredictedPath,
    ) -> Result<PredictedPath, PredictError>;

    /// Mean congestion over a path's segments, for the recalculation
    /// trigger check. Unscorable segments fall back to historical values.
    async fn aggregate_cost(&self, path: &PredictedPath) -> f64;
}

/// Assumed attainable speed for an emergency vehicle when no traffic data
/// covers a segment.
fn urgency_speed_mps(urgency: Urgency) -> f64 {
    match urgency {
        Urgency::Routine => 11.0,
        Urgency::Priority => 14.0,
        Urgency::Critical => 17.0,
    }
}

struct Candidate {
    waypoints: Vec<Waypoint>,
    duration_s: f64,
    scored_segments: usize,
    total_segments: usize,
    direction_changes: u32,
    leading_congestion: f64,
}

pub struct HeuristicPredictor {
    settings: PredictorSettings,
    traffic: Arc<dyn TrafficProvider>,
}

impl HeuristicPredictor {
    pub fn new(settings: PredictorSettings, traffic: Arc<dyn TrafficProvider>) -> Self {
        Self { settings, traffic }
    }

    fn polyline(&self, legs: &[GeoPoint]) -> Vec<GeoPoint> {
        let mut points = vec![legs[0]];
        for pair in legs.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            let dist = haversine_m(a, b);
            let n = (dist / self.settings.waypoint_spacing_m).ceil().max(1.0) as usize;
            for i in 1..=n {
                points.push(interpolate(a, b, i as f64 / n as f64));
            }
        }
        points
    }

    fn candidate_polylines(&self, origin: GeoPoint, destination: GeoPoint) -> Vec<Vec<GeoPoint>> {
        let direct = self.polyline(&[origin, destination]);

        let mid = interpolate(origin, destination, 0.5);
        let heading = initial_bearing_deg(origin, destination);
        let offset = (haversine_m(origin, destination) * BOW_FRACTION)
            .clamp(BOW_OFFSET_MIN_M, BOW_OFFSET_MAX_M);
        let apex_right = destination_point(mid, heading + 90.0, offset);
        let apex_left = destination_point(mid, heading - 90.0, offset);

        vec![
            direct,
            self.polyline(&[origin, apex_right, destination]),
            self.polyline(&[origin, apex_left, destination]),
        ]
    }

    async fn score(
        &self,
        points: Vec<GeoPoint>,
        urgency: Urgency,
        deadline: Instant,
    ) -> Candidate {
        let fallback_speed = urgency_speed_mps(urgency);
        let total_segments = points.len().saturating_sub(1);

        let mut waypoints = Vec::with_capacity(points.len());
        waypoints.push(Waypoint {
            point: points[0],
            cumulative_distance_m: 0.0,
            cumulative_duration_s: 0.0,
        });

        let mut distance = 0.0;
        let mut duration = 0.0;
        let mut scored = 0;
        let mut direction_changes = 0u32;
        let mut prev_heading: Option<f64> = None;
        let mut leading_congestion = 0.0;

        for (i, pair) in points.windows(2).enumerate() {
            let (a, b) = (pair[0], pair[1]);
            let seg_len = haversine_m(a, b);

            let heading = initial_bearing_deg(a, b);
            if let Some(prev) = prev_heading {
                if bearing_diff_deg(prev, heading).abs() > DIRECTION_CHANGE_DEG {
                    direction_changes += 1;
                }
            }
            prev_heading = Some(heading);

            // Past the whole-path deadline the remaining segments are
            // dead-reckoned at the urgency speed and left unscored. A
            // hanging provider is cut off at the deadline too.
            let now = Instant::now();
            let speed = if now < deadline {
                match tokio::time::timeout(deadline - now, self.traffic.segment_cost(a, b)).await {
                    Ok(Ok(cost)) => {
                        scored += 1;
                        if i == 0 {
                            leading_congestion = cost.congestion;
                        }
                        cost.average_speed_mps.max(1.0)
                    }
                    Ok(Err(_)) | Err(_) => fallback_speed,
                }
            } else {
                fallback_speed
            };

            distance += seg_len;
            duration += seg_len / speed;
            waypoints.push(Waypoint {
                point: b,
                cumulative_distance_m: distance,
                cumulative_duration_s: duration,
            });
        }

        Candidate {
            waypoints,
            duration_s: duration,
            scored_segments: scored,
            total_segments,
            direction_changes,
            leading_congestion,
        }
    }

    fn select(&self, mut candidates: Vec<Candidate>) -> Candidate {
        // Drop candidates whose leading segment is blocked, unless that
        // would leave nothing.
        let unblocked = candidates
            .iter()
            .filter(|c| c.leading_congestion < self.settings.blocked_congestion)
            .count();
        if unblocked > 0 && unblocked < candidates.len() {
            candidates.retain(|c| c.leading_congestion < self.settings.blocked_congestion);
        }

        candidates.sort_by(|a, b| {
            a.duration_s
                .partial_cmp(&b.duration_s)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut best = candidates.remove(0);
        for other in candidates {
            let tied = (other.duration_s - best.duration_s).abs() <= self.settings.tie_break_window_s;
            if tied && other.direction_changes < best.direction_changes {
                best = other;
            }
        }
        best
    }

    async fn build(
        &self,
        origin: GeoPoint,
        destination: GeoPoint,
        urgency: Urgency,
    ) -> Result<PredictedPath, PredictError> {
        if !origin.is_valid() || !destination.is_valid() {
            return Err(PredictError::NotRoutable(
                "origin or destination outside coordinate range".to_string(),
            ));
        }
        if haversine_m(origin, destination) < 1.0 {
            return Err(PredictError::NotRoutable(
                "origin and destination coincide".to_string(),
            ));
        }

        let deadline = Instant::now() + Duration::from_millis(self.settings.path_deadline_ms);
        let mut candidates = Vec::new();
        for points in self.candidate_polylines(origin, destination) {
            candidates.push(self.score(points, urgency, deadline).await);
        }
        let chosen = self.select(candidates);

        let scored_fraction = if chosen.total_segments == 0 {
            0.0
        } else {
            chosen.scored_segments as f64 / chosen.total_segments as f64
        };
        let partial = chosen.scored_segments < chosen.total_segments;
        let now = Utc::now();

        let path = PredictedPath {
            path_id: PathId::new(),
            waypoints: chosen.waypoints,
            estimated_duration_s: chosen.duration_s,
            estimated_arrival: now
                + chrono::Duration::milliseconds((chosen.duration_s * 1_000.0) as i64),
            confidence: scored_fraction,
            partial,
            direction_changes: chosen.direction_changes,
            generated_at: now,
        };

        if partial {
            info!(
                path = %path.path_id,
                confidence = path.confidence,
                "traffic deadline expired, returning partial path"
            );
        } else {
            debug!(path = %path.path_id, duration_s = path.estimated_duration_s, "path generated");
        }
        Ok(path)
    }
}

#[async_trait]
impl RoutePredictor for HeuristicPredictor {
    async fn predict(
        &self,
        origin: GeoPoint,
        destination: GeoPoint,
        urgency: Urgency,
    ) -> Result<PredictedPath, PredictError> {
        self.build(origin, destination, urgency).await
    }

    async fn recalculate(
        &self,
        current: GeoPoint,
        destination: GeoPoint,
        urgency: Urgency,
        _previous: &PredictedPath,
    ) -> Result<PredictedPath, PredictError> {
        // Candidate generation already biases toward stability via the
        // fewer-direction-changes tie-break.
        self.build(current, destination, urgency).await
    }

    async fn aggregate_cost(&self, path: &PredictedPath) -> f64 {
        let mut total = 0.0;
        let mut count = 0usize;
        for (a, b) in path.segments() {
            let congestion = match self.traffic.segment_cost(a.point, b.point).await {
                Ok(cost) => cost.congestion,
                Err(_) => crate::traffic::SegmentCost::historical_fallback().congestion,
            };
            total += congestion;
            count += 1;
        }
        if count == 0 {
            0.0
        } else {
            total / count as f64
        }
    }
}
