pub mod predictor;
pub mod traffic;

#[cfg(test)]
mod tests;

pub use predictor::{HeuristicPredictor, PredictError, RoutePredictor};
pub use traffic::{CachedTrafficProvider, SegmentCost, TrafficError, TrafficProvider};
