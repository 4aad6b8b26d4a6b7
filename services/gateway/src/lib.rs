pub mod router;

#[cfg(test)]
mod tests;

pub use router::{create_router, AppState};
