//! Game sessions: one hub per match, indexed by join code

pub mod hub;
pub mod registry;

pub use hub::SessionHandle;
pub use registry::{SessionConfig, SessionRegistry, SessionSummary};

/// Session lifecycle errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Server is at capacity ({max} sessions)")]
    CapacityReached { max: usize },

    #[error("Session {0} is closed")]
    Closed(String),
}
