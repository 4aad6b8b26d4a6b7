//! Layered runtime settings.
//!
//! Defaults first, then an optional `clearway.toml`, then `CLEARWAY_*`
//! environment overrides (`CLEARWAY_CORRIDOR__PAUSE_AFTER_S=300`).

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ValidatorSettings {
    /// Derived speed above this is physically implausible for a ground
    /// vehicle in traffic.
    pub max_speed_kmh: f64,
    pub max_accel_mps2: f64,
    /// Samples at or above this confidence are accepted.
    pub accept_threshold: f64,
    /// Samples between this and `accept_threshold` stay observable under
    /// review; below it they are rejected.
    pub review_threshold: f64,
    pub spoofing_reject_count: u32,
    pub spoofing_window_s: i64,
    /// Disagreement with the cellular fix beyond this flags CellMismatch.
    pub cell_tolerance_m: f64,
    pub jump_distance_m: f64,
}

impl Default for ValidatorSettings {
    fn default() -> Self {
        Self {
            max_speed_kmh: 150.0,
            max_accel_mps2: 5.0,
            accept_threshold: 0.95,
            review_threshold: 0.90,
            spoofing_reject_count: 3,
            spoofing_window_s: 10,
            cell_tolerance_m: 400.0,
            jump_distance_m: 1_000.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PredictorSettings {
    pub waypoint_spacing_m: f64,
    /// Per-segment traffic lookup deadline.
    pub segment_deadline_ms: u64,
    /// Whole-path scoring deadline; expiry yields a partial path.
    pub path_deadline_ms: u64,
    pub traffic_cache_ttl_s: i64,
    /// Congestion at or above this counts as blocked.
    pub blocked_congestion: f64,
    /// ETA ties within this many seconds break on direction changes.
    pub tie_break_window_s: f64,
}

impl Default for PredictorSettings {
    fn default() -> Self {
        Self {
            waypoint_spacing_m: 250.0,
            segment_deadline_ms: 200,
            path_deadline_ms: 2_000,
            traffic_cache_ttl_s: 120,
            blocked_congestion: 0.95,
            tie_break_window_s: 1.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CorridorSettings {
    pub activation_window_ms: u64,
    /// Position deltas below this do not count as movement.
    pub stationary_epsilon_m: f64,
    pub pause_after_s: i64,
    /// A corridor paused this long is escalated to completed.
    pub complete_after_paused_s: i64,
    /// Aggregate traffic cost drift that forces recalculation.
    pub recalc_cost_delta: f64,
    pub recalc_cadence_s: i64,
}

impl Default for CorridorSettings {
    fn default() -> Self {
        Self {
            activation_window_ms: 5_000,
            stationary_epsilon_m: 20.0,
            pause_after_s: 600,
            complete_after_paused_s: 1_800,
            recalc_cost_delta: 0.20,
            recalc_cadence_s: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TargetingSettings {
    pub lateral_buffer_m: f64,
    pub look_ahead_m: f64,
    /// ETA movement below this is not worth another notification.
    pub eta_update_threshold_s: u32,
    /// Headings within this cone of the path tangent get PULL_OVER.
    pub pull_over_cone_deg: f64,
    pub candidate_radius_m: f64,
}

impl Default for TargetingSettings {
    fn default() -> Self {
        Self {
            lateral_buffer_m: 500.0,
            look_ahead_m: 1_200.0,
            eta_update_threshold_s: 15,
            pull_over_cone_deg: 30.0,
            candidate_radius_m: 2_000.0,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub validator: ValidatorSettings,
    pub predictor: PredictorSettings,
    pub corridor: CorridorSettings,
    pub targeting: TargetingSettings,
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::with_name("clearway").required(false))
            .add_source(Environment::with_prefix("CLEARWAY").separator("__"))
            .build()?
            .try_deserialize()
    }
}
