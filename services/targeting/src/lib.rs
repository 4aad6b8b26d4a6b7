pub mod engine;


pub use engine::{
    candidate_radius_m, diff_target_sets, GeometricTargeting, PathAnchor, TargetDiff,
    TargetingEngine,
};
