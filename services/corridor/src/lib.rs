pub mod engine;
pub mod lifecycle;


pub use engine::{CorridorEngine, CorridorView, MissionCounters, TelemetryEffect, TickEffect};
pub use lifecycle::{CorridorState, TransitionError};
