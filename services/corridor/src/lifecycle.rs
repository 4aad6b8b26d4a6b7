//! Corridor lifecycle.
//!
//! The transition table is the single authority on which state changes
//! are legal. `Completed` is terminal: a new mission requires a new
//! corridor id.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CorridorState {
    Requested,
    Authenticated,
    RouteCalculated,
    Active,
    Paused,
    Frozen,
    Completed,
}

impl CorridorState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CorridorState::Completed)
    }

    /// Telemetry is consumed only while the corridor is live and not
    /// frozen pending re-authentication.
    pub fn accepts_telemetry(&self) -> bool {
        matches!(self, CorridorState::Active | CorridorState::Paused)
    }

    pub fn can_transition_to(self, next: CorridorState) -> bool {
        use CorridorState::*;
        match (self, next) {
            (Requested, Authenticated) => true,
            (Authenticated, RouteCalculated) => true,
            (RouteCalculated, Active) => true,
            (Active, Paused) | (Paused, Active) => true,
            (Active, Frozen) | (Paused, Frozen) | (Frozen, Active) => true,
            // Explicit deactivation (or escalation) completes from any
            // live state.
            (from, Completed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for CorridorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CorridorState::Requested => "REQUESTED",
            CorridorState::Authenticated => "AUTHENTICATED",
            CorridorState::RouteCalculated => "ROUTE_CALCULATED",
            CorridorState::Active => "ACTIVE",
            CorridorState::Paused => "PAUSED",
            CorridorState::Frozen => "FROZEN",
            CorridorState::Completed => "COMPLETED",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for CorridorState {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "REQUESTED" => Ok(CorridorState::Requested),
            "AUTHENTICATED" => Ok(CorridorState::Authenticated),
            "ROUTE_CALCULATED" => Ok(CorridorState::RouteCalculated),
            "ACTIVE" => Ok(CorridorState::Active),
            "PAUSED" => Ok(CorridorState::Paused),
            "FROZEN" => Ok(CorridorState::Frozen),
            "COMPLETED" => Ok(CorridorState::Completed),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid corridor transition {from} -> {to}")]
pub struct TransitionError {
    pub from: CorridorState,
    pub to: CorridorState,
}

/// Validate and apply a transition in one step.
pub fn transition(
    state: &mut CorridorState,
    to: CorridorState,
) -> Result<CorridorState, TransitionError> {
    if state.can_transition_to(to) {
        let from = *state;
        *state = to;
        Ok(from)
    } else {
        Err(TransitionError { from: *state, to })
    }
}
