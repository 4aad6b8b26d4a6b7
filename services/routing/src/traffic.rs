//! Traffic data boundary.
//!
//! The road-network/traffic provider is an external collaborator consumed
//! as a scoring function. `CachedTrafficProvider` wraps any provider with
//! a TTL cache, historical fallback values, and backoff after failures, so
//! provider absence degrades confidence instead of failing a corridor.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use shared::config::PredictorSettings;
use shared::geo::GeoPoint;

/// Historical average used when neither live nor cached data exists.
const FALLBACK_CONGESTION: f64 = 0.35;
const FALLBACK_SPEED_MPS: f64 = 9.0;

const BACKOFF_BASE_MS: u64 = 500;
const BACKOFF_MAX_MS: u64 = 30_000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SegmentCost {
    /// Congestion level in [0, 1]; 1.0 is fully blocked.
    pub congestion: f64,
    pub average_speed_mps: f64,
}

impl SegmentCost {
    pub fn historical_fallback() -> Self {
        Self {
            congestion: FALLBACK_CONGESTION,
            average_speed_mps: FALLBACK_SPEED_MPS,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum TrafficError {
    #[error("traffic provider unavailable: {0}")]
    Unavailable(String),
    #[error("traffic lookup timed out")]
    Timeout,
}

#[async_trait]
pub trait TrafficProvider: Send + Sync {
    /// Bounded-latency cost lookup for one road segment.
    async fn segment_cost(&self, from: GeoPoint, to: GeoPoint) -> Result<SegmentCost, TrafficError>;
}

// ~100 m grid cells; close enough that one cell is one road segment for
// caching purposes.
fn quantize(p: GeoPoint) -> (i64, i64) {
    ((p.lat * 1_000.0).round() as i64, (p.lon * 1_000.0).round() as i64)
}

type SegmentKey = ((i64, i64), (i64, i64));

struct CachedCost {
    cost: SegmentCost,
    fetched_at: Instant,
}

pub struct CachedTrafficProvider {
    inner: Arc<dyn TrafficProvider>,
    cache: DashMap<SegmentKey, CachedCost>,
    ttl: Duration,
    segment_deadline: Duration,
    consecutive_failures: AtomicU32,
    backoff_until: RwLock<Option<Instant>>,
}

impl CachedTrafficProvider {
    pub fn new(inner: Arc<dyn TrafficProvider>, settings: &PredictorSettings) -> Self {
        Self {
            inner,
            cache: DashMap::new(),
            ttl: Duration::from_secs(settings.traffic_cache_ttl_s.max(0) as u64),
            segment_deadline: Duration::from_millis(settings.segment_deadline_ms),
            consecutive_failures: AtomicU32::new(0),
            backoff_until: RwLock::new(None),
        }
    }

    fn in_backoff(&self) -> bool {
        self.backoff_until
            .read()
            .is_some_and(|until| Instant::now() < until)
    }

    fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        let backoff_ms =
            (BACKOFF_BASE_MS.saturating_mul(1u64 << failures.min(6))).min(BACKOFF_MAX_MS);
        *self.backoff_until.write() = Some(Instant::now() + Duration::from_millis(backoff_ms));
        warn!(failures, backoff_ms, "traffic provider failing, backing off");
    }

    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        *self.backoff_until.write() = None;
    }

    /// Cached or stale value for a segment, if any, regardless of age.
    fn cached(&self, key: &SegmentKey) -> Option<(SegmentCost, bool)> {
        self.cache
            .get(key)
            .map(|c| (c.cost, c.fetched_at.elapsed() <= self.ttl))
    }
}

#[async_trait]
impl TrafficProvider for CachedTrafficProvider {
    async fn segment_cost(&self, from: GeoPoint, to: GeoPoint) -> Result<SegmentCost, TrafficError> {
        let key = (quantize(from), quantize(to));

        if let Some((cost, fresh)) = self.cached(&key) {
            if fresh {
                return Ok(cost);
            }
        }

        if self.in_backoff() {
            // Stale beats nothing while the provider recovers.
            if let Some((cost, _)) = self.cached(&key) {
                debug!("serving stale traffic data during backoff");
                return Ok(cost);
            }
            return Ok(SegmentCost::historical_fallback());
        }

        match tokio::time::timeout(self.segment_deadline, self.inner.segment_cost(from, to)).await
        {
            Ok(Ok(cost)) => {
                self.record_success();
                self.cache.insert(
                    key,
                    CachedCost {
                        cost,
                        fetched_at: Instant::now(),
                    },
                );
                Ok(cost)
            }
            Ok(Err(err)) => {
                self.record_failure();
                match self.cached(&key) {
                    Some((cost, _)) => Ok(cost),
                    None => Err(err),
                }
            }
            Err(_) => {
                self.record_failure();
                match self.cached(&key) {
                    Some((cost, _)) => Ok(cost),
                    None => Err(TrafficError::Timeout),
                }
            }
        }
    }
}
