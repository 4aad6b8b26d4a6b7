pub mod dispatch;
pub mod registry;
mod worker;


pub use dispatch::{
    AlertDispatcher, AlertKind, AlertMessage, Archival, Authenticator, CandidateSource,
    DispatchError, MissionSummary,
};
pub use registry::{Collaborators, CorridorRegistry, EngineStack, ListFilter};
