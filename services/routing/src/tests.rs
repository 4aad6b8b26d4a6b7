use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use shared::config::PredictorSettings;
use shared::geo::{destination_point, haversine_m, GeoPoint};
use shared::types::Urgency;

use crate::predictor::{HeuristicPredictor, PredictError, RoutePredictor};
use crate::traffic::{CachedTrafficProvider, SegmentCost, TrafficError, TrafficProvider};

fn origin() -> GeoPoint {
    GeoPoint::new(52.5200, 13.4050)
}

fn destination() -> GeoPoint {
    destination_point(origin(), 90.0, 5_000.0)
}

/// Uniform congestion and speed everywhere.
struct UniformTraffic {
    cost: RwLock<SegmentCost>,
    calls: AtomicUsize,
}

impl UniformTraffic {
    fn new(congestion: f64, speed: f64) -> Self {
        Self {
            cost: RwLock::new(SegmentCost {
                congestion,
                average_speed_mps: speed,
            }),
            calls: AtomicUsize::new(0),
        }
    }

    fn set(&self, congestion: f64, speed: f64) {
        *self.cost.write() = SegmentCost {
            congestion,
            average_speed_mps: speed,
        };
    }
}

#[async_trait]
impl TrafficProvider for UniformTraffic {
    async fn segment_cost(
        &self,
        _from: GeoPoint,
        _to: GeoPoint,
    ) -> Result<SegmentCost, TrafficError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(*self.cost.read())
    }
}

/// Never answers inside any deadline.
struct HangingTraffic;

#[async_trait]
impl TrafficProvider for HangingTraffic {
    async fn segment_cost(
        &self,
        _from: GeoPoint,
        _to: GeoPoint,
    ) -> Result<SegmentCost, TrafficError> {
        tokio::time::sleep(Duration::from_secs(3_600)).await;
        unreachable!("sleep outlives every test deadline")
    }
}

/// Fails every lookup outright.
struct DownTraffic;

#[async_trait]
impl TrafficProvider for DownTraffic {
    async fn segment_cost(
        &self,
        _from: GeoPoint,
        _to: GeoPoint,
    ) -> Result<SegmentCost, TrafficError> {
        Err(TrafficError::Unavailable("provider offline".to_string()))
    }
}

/// Blocks only the first segment out of the origin on the direct line.
struct BlockedLeadingSegment;

#[async_trait]
impl TrafficProvider for BlockedLeadingSegment {
    async fn segment_cost(
        &self,
        from: GeoPoint,
        to: GeoPoint,
    ) -> Result<SegmentCost, TrafficError> {
        // The direct route leaves the origin due east; the bow variants
        // leave at a visible angle. Block only the due-east departure.
        let leaves_origin = haversine_m(from, origin()) < 1.0;
        let bearing = shared::geo::initial_bearing_deg(from, to);
        let due_east = (bearing - 90.0).abs() < 5.0;
        let blocked = leaves_origin && due_east;
        Ok(SegmentCost {
            congestion: if blocked { 1.0 } else { 0.2 },
            average_speed_mps: if blocked { 0.5 } else { 12.0 },
        })
    }
}

fn predictor_with(traffic: Arc<dyn TrafficProvider>) -> HeuristicPredictor {
    HeuristicPredictor::new(PredictorSettings::default(), traffic)
}

#[tokio::test]
async fn predicts_full_confidence_path_with_healthy_provider() {
    let p = predictor_with(Arc::new(UniformTraffic::new(0.2, 12.0)));
    let path = p
        .predict(origin(), destination(), Urgency::Priority)
        .await
        .expect("route");

    assert!(!path.partial);
    assert!((path.confidence - 1.0).abs() < 1e-9);
    assert!(path.waypoints.len() >= 2);
    assert!((path.total_distance_m() - 5_000.0).abs() < 100.0);
    // 5 km at 12 m/s is ~417 s.
    assert!((path.estimated_duration_s - 417.0).abs() < 30.0);
}

#[tokio::test]
async fn waypoints_are_monotonic_in_distance_and_time() {
    let p = predictor_with(Arc::new(UniformTraffic::new(0.2, 12.0)));
    let path = p
        .predict(origin(), destination(), Urgency::Priority)
        .await
        .expect("route");

    for (a, b) in path.segments() {
        assert!(b.cumulative_distance_m > a.cumulative_distance_m);
        assert!(b.cumulative_duration_s > a.cumulative_duration_s);
    }
    assert_eq!(path.waypoints.first().map(|w| w.point), Some(origin()));
}

#[tokio::test]
async fn hanging_provider_degrades_to_partial_low_confidence() {
    let mut settings = PredictorSettings::default();
    settings.path_deadline_ms = 100;
    let p = HeuristicPredictor::new(settings, Arc::new(HangingTraffic));

    let path = p
        .recalculate(
            origin(),
            destination(),
            Urgency::Critical,
            &p.predict(origin(), destination(), Urgency::Critical)
                .await
                .expect("first path"),
        )
        .await
        .expect("degraded recalculation must still return a path");

    assert!(path.partial);
    assert!(path.confidence < 1.0);
    assert!(path.estimated_duration_s > 0.0);
}

#[tokio::test]
async fn failing_provider_yields_dead_reckoning_confidence_zero() {
    let p = predictor_with(Arc::new(DownTraffic));
    let path = p
        .predict(origin(), destination(), Urgency::Routine)
        .await
        .expect("route");

    assert!(path.partial);
    assert!(path.confidence < 1e-9);
}

#[tokio::test]
async fn blocked_leading_segment_selects_an_alternative() {
    let p = predictor_with(Arc::new(BlockedLeadingSegment));
    let path = p
        .predict(origin(), destination(), Urgency::Priority)
        .await
        .expect("route");

    // The alternative bows are longer than the 5 km direct line.
    assert!(path.total_distance_m() > 5_050.0);
}

#[tokio::test]
async fn invalid_coordinates_are_not_routable() {
    let p = predictor_with(Arc::new(UniformTraffic::new(0.2, 12.0)));
    let err = p
        .predict(GeoPoint::new(95.0, 0.0), destination(), Urgency::Priority)
        .await
        .unwrap_err();
    assert!(matches!(err, PredictError::NotRoutable(_)));

    let err = p
        .predict(origin(), origin(), Urgency::Priority)
        .await
        .unwrap_err();
    assert!(matches!(err, PredictError::NotRoutable(_)));
}

#[tokio::test]
async fn aggregate_cost_tracks_congestion() {
    let traffic = Arc::new(UniformTraffic::new(0.2, 12.0));
    let p = predictor_with(traffic.clone());
    let path = p
        .predict(origin(), destination(), Urgency::Priority)
        .await
        .expect("route");

    let before = p.aggregate_cost(&path).await;
    assert!((before - 0.2).abs() < 1e-9);

    traffic.set(0.6, 5.0);
    let after = p.aggregate_cost(&path).await;
    assert!((after - 0.6).abs() < 1e-9);
}

#[tokio::test]
async fn cached_provider_serves_fresh_hits_without_refetching() {
    let inner = Arc::new(UniformTraffic::new(0.2, 12.0));
    let cached = CachedTrafficProvider::new(inner.clone(), &PredictorSettings::default());

    let a = origin();
    let b = destination_point(a, 90.0, 300.0);

    cached.segment_cost(a, b).await.expect("first fetch");
    let calls_after_first = inner.calls.load(Ordering::Relaxed);
    cached.segment_cost(a, b).await.expect("cache hit");
    assert_eq!(inner.calls.load(Ordering::Relaxed), calls_after_first);
}

#[tokio::test]
async fn cached_provider_falls_back_to_historical_when_cold_and_down() {
    let mut settings = PredictorSettings::default();
    settings.segment_deadline_ms = 50;
    let cached = CachedTrafficProvider::new(Arc::new(DownTraffic), &settings);

    let a = origin();
    let b = destination_point(a, 90.0, 300.0);

    // First call fails through to the caller; the provider enters
    // backoff, after which historical values are served.
    assert!(cached.segment_cost(a, b).await.is_err());
    let cost = cached
        .segment_cost(a, b)
        .await
        .expect("historical fallback during backoff");
    assert!(cost.congestion > 0.0 && cost.congestion < 1.0);
}

#[tokio::test]
async fn cached_provider_times_out_hanging_inner() {
    let mut settings = PredictorSettings::default();
    settings.segment_deadline_ms = 50;
    let cached = CachedTrafficProvider::new(Arc::new(HangingTraffic), &settings);

    let a = origin();
    let b = destination_point(a, 90.0, 300.0);

    let started = std::time::Instant::now();
    let result = cached.segment_cost(a, b).await;
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(matches!(result, Err(TrafficError::Timeout)));
}

#[tokio::test]
async fn critical_urgency_assumes_faster_dead_reckoning() {
    let p = predictor_with(Arc::new(DownTraffic));
    let routine = p
        .predict(origin(), destination(), Urgency::Routine)
        .await
        .expect("route");
    let critical = p
        .predict(origin(), destination(), Urgency::Critical)
        .await
        .expect("route");

    assert!(critical.estimated_duration_s < routine.estimated_duration_s);
}
