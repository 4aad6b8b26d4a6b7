use thiserror::Error;

use crate::types::{CorridorId, VehicleId};

/// Operational-surface errors. Every variant has a stable wire code that
/// the gateway exposes verbatim.
#[derive(Debug, Clone, Error)]
pub enum OrchestrationError {
    #[error("vehicle {0} is not authenticated")]
    VehicleNotAuthenticated(VehicleId),

    #[error("no route found from current position to destination: {0}")]
    NoRouteFound(String),

    #[error("a corridor is already active for vehicle {0}")]
    AlreadyActive(VehicleId),

    #[error("corridor {0} not found")]
    CorridorNotFound(CorridorId),

    #[error("no active corridor for vehicle {0}")]
    NoActiveCorridor(VehicleId),

    #[error("corridor {0} is frozen pending re-authentication")]
    CorridorFrozen(CorridorId),

    #[error("activation did not complete within {0} ms")]
    ActivationTimeout(u64),
}

impl OrchestrationError {
    pub fn code(&self) -> &'static str {
        match self {
            OrchestrationError::VehicleNotAuthenticated(_) => "VEHICLE_NOT_AUTHENTICATED",
            OrchestrationError::NoRouteFound(_) => "NO_ROUTE_FOUND",
            OrchestrationError::AlreadyActive(_) => "ALREADY_ACTIVE",
            OrchestrationError::CorridorNotFound(_) => "CORRIDOR_NOT_FOUND",
            OrchestrationError::NoActiveCorridor(_) => "CORRIDOR_NOT_FOUND",
            OrchestrationError::CorridorFrozen(_) => "CORRIDOR_FROZEN",
            OrchestrationError::ActivationTimeout(_) => "ACTIVATION_TIMEOUT",
        }
    }
}
