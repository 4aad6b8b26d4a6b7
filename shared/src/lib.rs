pub mod config;
pub mod error;
pub mod geo;
pub mod logger;
pub mod types;


pub use error::OrchestrationError;
pub use geo::GeoPoint;
