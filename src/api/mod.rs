//! HTTP endpoints: health, stats and analytics reports

pub mod health;
pub mod router;
pub mod state;
pub mod stats;

pub use router::create_router;
pub use state::AppState;
