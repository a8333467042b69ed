//! Capture session supervision.
//!
//! [`SessionManager`] owns at most one [`SessionHandle`] at a time and keeps it
//! alive across transient device failures.

pub mod handle;
pub mod manager;

pub use handle::{SessionHandle, WorkerStats};
pub use manager::{
    AcquireStage, HealthStatus, ReadyCallback, SessionError, SessionManager, SessionState,
};
